use crate::archive::ArchiveStore;
use crate::export::{ExportError, RawEntry, UploadedExport, extract_transcript, parse_export};
use crate::llm::{CompletionBackend, FALLBACK_REPLY};
use crate::prompt::build_style_prompt;
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::{Mutex, MutexGuard};
use tracing::{debug, error, info, warn};

pub const START_INSTRUCTIONS: &str = "👋 Hi! I'm a bot that mimics how another person chats.

📝 How to prepare the data:
1. Open Telegram Desktop
2. Pick the chat you want
3. Press ⋮ -> Export chat history
4. Format: JSON
5. Untick 'Photos', 'Videos' and 'Voice messages'
6. Pick a range such as 'Last year'
7. Export it and send me the file

Once it's processed I'll chat in that person's style!";

pub const NAME_PROMPT: &str = "✅ File received! Now send the name of the person whose style I should imitate (exactly as it appears in the chat):";

pub const INVALID_JSON_REPLY: &str =
    "❌ Could not read the file as JSON. Check that the export is intact.";

pub const MISSING_MESSAGES_REPLY: &str =
    "❌ Invalid export format: the messages list is missing.";

pub const UPLOAD_FAILED_REPLY: &str = "❌ Failed to process the file. Check the format.";

pub const MISSING_DATA_REPLY: &str = "❌ No data found. Start over with /start";

pub const PROCESSING_FAILED_REPLY: &str = "❌ Failed to process the data. Try another file.";

pub const EXIT_REPLY: &str =
    "Leaving mimic mode.\nTo start again, send a new export file or use /start";

pub const CANCELLED_REPLY: &str = "Operation cancelled";

pub fn no_messages_reply(interlocutor: &str) -> String {
    format!("❌ No messages from '{interlocutor}' found. Check the name and try again.")
}

pub fn ready_reply(count: usize, interlocutor: &str) -> String {
    format!(
        "✅ Chat analysis complete!\nFound {count} messages from {interlocutor}.\n\nI'm ready to chat in their style!\n\nJust send me a message and I'll answer like they would.\nUse /exit to leave mimic mode."
    )
}

/// One inbound unit of work from the transport, already stripped of any
/// transport-specific framing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionEvent {
    Start,
    Cancel,
    Exit,
    /// A spooled export file. The router owns the path from here on and
    /// removes the file once processing is over.
    Document(PathBuf),
    Text(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    AwaitingUpload,
    AwaitingName,
    Chat,
    Ended,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChatRole {
    User,
    Assistant,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Turn {
    pub role: ChatRole,
    pub content: String,
}

/// Per-owner conversation state. The raw export is retained for the whole
/// session lifetime, not just until the name is processed.
#[derive(Debug)]
pub struct Session {
    pub state: SessionState,
    pub raw_export: Option<Vec<RawEntry>>,
    pub interlocutor: Option<String>,
    pub style_prompt: Option<String>,
    pub history: Vec<Turn>,
}

impl Session {
    pub fn new() -> Self {
        Self {
            state: SessionState::AwaitingUpload,
            raw_export: None,
            interlocutor: None,
            style_prompt: None,
            history: Vec::new(),
        }
    }
}

impl Default for Session {
    fn default() -> Self {
        Self::new()
    }
}

/// Routes transport events into per-owner sessions and drives each session's
/// state machine. Events for the same owner serialize on the session lock,
/// which is held across the completion call on purpose.
pub struct SessionRouter<B> {
    backend: B,
    archive: ArchiveStore,
    max_messages: usize,
    sessions: Mutex<HashMap<i64, Arc<Mutex<Session>>>>,
}

impl<B: CompletionBackend> SessionRouter<B> {
    pub fn new(backend: B, archive: ArchiveStore, max_messages: usize) -> Self {
        Self {
            backend,
            archive,
            max_messages,
            sessions: Mutex::new(HashMap::new()),
        }
    }

    /// Handles one event for one owner and returns the replies to send back.
    /// An empty vec means the event was ignored in the current state.
    pub async fn handle(&self, owner_id: i64, event: SessionEvent) -> Vec<String> {
        match event {
            SessionEvent::Start => self.start_session(owner_id).await,
            SessionEvent::Cancel => self.cancel_session(owner_id).await,
            SessionEvent::Exit => self.exit_chat(owner_id).await,
            SessionEvent::Document(path) => self.receive_export(owner_id, path).await,
            SessionEvent::Text(text) => self.receive_text(owner_id, text).await,
        }
    }

    /// Current state of the owner's session, if one is open.
    pub async fn session_state(&self, owner_id: i64) -> Option<SessionState> {
        let handle = self.session_handle(owner_id).await?;
        let state = handle.lock().await.state;
        Some(state)
    }

    /// `/start` always opens a fresh session, discarding any prior state for
    /// this owner.
    async fn start_session(&self, owner_id: i64) -> Vec<String> {
        let session = Arc::new(Mutex::new(Session::new()));
        self.sessions.lock().await.insert(owner_id, session);
        info!(owner_id, "session started");
        vec![START_INSTRUCTIONS.to_owned()]
    }

    async fn cancel_session(&self, owner_id: i64) -> Vec<String> {
        let Some(handle) = self.session_handle(owner_id).await else {
            debug!(owner_id, "no active session, ignoring cancel");
            return Vec::new();
        };
        let mut session = handle.lock().await;
        session.state = SessionState::Ended;
        info!(owner_id, "session cancelled");
        self.finish(owner_id, session).await;
        vec![CANCELLED_REPLY.to_owned()]
    }

    /// `/exit` only means something in chat mode; anywhere else it is
    /// silently dropped.
    async fn exit_chat(&self, owner_id: i64) -> Vec<String> {
        let Some(handle) = self.session_handle(owner_id).await else {
            debug!(owner_id, "no active session, ignoring exit");
            return Vec::new();
        };
        let mut session = handle.lock().await;
        if session.state != SessionState::Chat {
            debug!(owner_id, state = ?session.state, "ignoring exit outside chat mode");
            return Vec::new();
        }
        info!(
            owner_id,
            interlocutor = session.interlocutor.as_deref().unwrap_or_default(),
            "left mimic mode"
        );
        session.state = SessionState::Ended;
        self.finish(owner_id, session).await;
        vec![EXIT_REPLY.to_owned()]
    }

    async fn receive_export(&self, owner_id: i64, path: PathBuf) -> Vec<String> {
        // The spooled file is removed on every path out of here, including
        // the ignored ones.
        let upload = UploadedExport::new(path);

        let Some(handle) = self.session_handle(owner_id).await else {
            debug!(owner_id, "no active session, dropping stray upload");
            return Vec::new();
        };
        let mut session = handle.lock().await;
        if session.state != SessionState::AwaitingUpload {
            debug!(owner_id, state = ?session.state, "ignoring upload in current state");
            return Vec::new();
        }

        let replies = self.process_upload(owner_id, &mut session, upload.path());
        self.finish(owner_id, session).await;
        replies
    }

    fn process_upload(&self, owner_id: i64, session: &mut Session, path: &Path) -> Vec<String> {
        let raw = match fs::read_to_string(path) {
            Ok(raw) => raw,
            Err(err) => {
                warn!(owner_id, error = %err, "failed to read uploaded export");
                session.state = SessionState::Ended;
                return vec![UPLOAD_FAILED_REPLY.to_owned()];
            }
        };

        match parse_export(&raw) {
            Ok(entries) => {
                info!(owner_id, entries = entries.len(), "export parsed");
                session.raw_export = Some(entries);
                session.state = SessionState::AwaitingName;
                vec![NAME_PROMPT.to_owned()]
            }
            Err(ExportError::Json(err)) => {
                warn!(owner_id, error = %err, "uploaded export is not valid JSON");
                session.state = SessionState::Ended;
                vec![INVALID_JSON_REPLY.to_owned()]
            }
            Err(ExportError::MissingMessages) => {
                warn!(owner_id, "uploaded export has no messages list");
                session.state = SessionState::Ended;
                vec![MISSING_MESSAGES_REPLY.to_owned()]
            }
        }
    }

    async fn receive_text(&self, owner_id: i64, text: String) -> Vec<String> {
        let Some(handle) = self.session_handle(owner_id).await else {
            debug!(owner_id, "no active session, ignoring text");
            return Vec::new();
        };
        let mut session = handle.lock().await;
        let replies = match session.state {
            SessionState::AwaitingName => self.assign_interlocutor(owner_id, &mut session, &text),
            SessionState::Chat => self.chat_turn(owner_id, &mut session, text).await,
            SessionState::AwaitingUpload | SessionState::Ended => {
                debug!(owner_id, state = ?session.state, "ignoring text in current state");
                Vec::new()
            }
        };
        self.finish(owner_id, session).await;
        replies
    }

    fn assign_interlocutor(
        &self,
        owner_id: i64,
        session: &mut Session,
        text: &str,
    ) -> Vec<String> {
        let name = text.trim();

        let transcript = match session.raw_export.as_ref() {
            Some(entries) => extract_transcript(entries, name, self.max_messages),
            None => {
                session.state = SessionState::Ended;
                return vec![MISSING_DATA_REPLY.to_owned()];
            }
        };
        if transcript.is_empty() {
            // Stay put so the owner can retry with a corrected name.
            return vec![no_messages_reply(name)];
        }

        let archived = match self.archive.archive(owner_id, &transcript) {
            Ok(path) => path,
            Err(err) => {
                error!(owner_id, error = %err, "failed to archive transcript");
                session.state = SessionState::Ended;
                return vec![PROCESSING_FAILED_REPLY.to_owned()];
            }
        };
        info!(
            owner_id,
            interlocutor = name,
            messages = transcript.len(),
            path = %archived.display(),
            "transcript archived"
        );

        session.style_prompt = Some(build_style_prompt(name, &transcript));
        session.interlocutor = Some(name.to_owned());
        session.history.clear();
        session.state = SessionState::Chat;
        vec![ready_reply(transcript.len(), name)]
    }

    async fn chat_turn(&self, owner_id: i64, session: &mut Session, text: String) -> Vec<String> {
        let Some(style_prompt) = session.style_prompt.clone() else {
            session.state = SessionState::Ended;
            return vec![MISSING_DATA_REPLY.to_owned()];
        };

        session.history.push(Turn {
            role: ChatRole::User,
            content: text.clone(),
        });

        let reply = match self.backend.complete(&style_prompt, &text).await {
            Ok(reply) => reply,
            Err(err) => {
                warn!(owner_id, error = %err, "completion failed, sending fallback");
                FALLBACK_REPLY.to_owned()
            }
        };

        // Fallback notices land in the history like any other turn.
        session.history.push(Turn {
            role: ChatRole::Assistant,
            content: reply.clone(),
        });

        vec![reply]
    }

    async fn session_handle(&self, owner_id: i64) -> Option<Arc<Mutex<Session>>> {
        self.sessions.lock().await.get(&owner_id).cloned()
    }

    /// Releases the session lock and evicts the session once it has ended.
    async fn finish(&self, owner_id: i64, session: MutexGuard<'_, Session>) {
        let ended = session.state == SessionState::Ended;
        drop(session);
        if ended {
            self.sessions.lock().await.remove(&owner_id);
        }
    }
}
