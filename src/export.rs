use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::warn;

#[derive(Debug, Error)]
pub enum ExportError {
    #[error("export is not valid JSON: {0}")]
    Json(#[from] serde_json::Error),
    #[error("export has no messages list")]
    MissingMessages,
}

/// One element of the export's `messages` array. Entries that are not
/// message-shaped objects are preserved as `Other` and skipped during
/// extraction instead of failing the whole document.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum RawEntry {
    Message(RawMessage),
    Other(Value),
}

#[derive(Debug, Clone, Deserialize)]
pub struct RawMessage {
    pub from: Option<String>,
    pub text: Option<MessageText>,
    pub date: Option<String>,
}

/// The export stores message text either as a plain string or as a list of
/// styled fragments (bold, links, mentions, ...). Anything else carries no
/// usable text.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum MessageText {
    Plain(String),
    Fragments(Vec<TextFragment>),
    Other(Value),
}

#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum TextFragment {
    Styled { text: Option<String> },
    Other(Value),
}

impl MessageText {
    pub fn flatten(&self) -> String {
        match self {
            MessageText::Plain(text) => text.clone(),
            MessageText::Fragments(fragments) => fragments
                .iter()
                .filter_map(TextFragment::text)
                .collect(),
            MessageText::Other(_) => String::new(),
        }
    }
}

impl TextFragment {
    fn text(&self) -> Option<&str> {
        match self {
            TextFragment::Styled { text } => text.as_deref(),
            TextFragment::Other(_) => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CleanedMessage {
    pub from: String,
    pub text: String,
    pub date: String,
}

pub fn parse_export(raw: &str) -> Result<Vec<RawEntry>, ExportError> {
    let mut document: Value = serde_json::from_str(raw)?;
    let messages = match document.get_mut("messages") {
        Some(value) if value.is_array() => value.take(),
        _ => return Err(ExportError::MissingMessages),
    };
    Ok(serde_json::from_value(messages)?)
}

/// Filters the export down to the interlocutor's own non-empty messages,
/// keeping at most the `max_messages` most recent ones. Entries are scanned
/// newest-first and the accumulator is reversed at the end, so the result is
/// chronological (oldest first) and recency-biased when the cap applies.
pub fn extract_transcript(
    entries: &[RawEntry],
    interlocutor: &str,
    max_messages: usize,
) -> Vec<CleanedMessage> {
    let mut cleaned: Vec<CleanedMessage> = Vec::new();

    for entry in entries.iter().rev() {
        if cleaned.len() >= max_messages {
            break;
        }

        let RawEntry::Message(message) = entry else {
            continue;
        };
        if message.from.as_deref() != Some(interlocutor) {
            continue;
        }

        let text = message.text.as_ref().map(MessageText::flatten).unwrap_or_default();
        let text = text.trim();
        if text.is_empty() {
            continue;
        }

        cleaned.push(CleanedMessage {
            from: interlocutor.to_owned(),
            text: text.to_owned(),
            date: message.date.clone().unwrap_or_default(),
        });
    }

    cleaned.reverse();
    cleaned
}

/// Scoped handle to a spooled export upload. The file is removed when the
/// handle drops, on success and failure paths alike.
pub struct UploadedExport {
    path: PathBuf,
}

impl UploadedExport {
    pub fn new(path: PathBuf) -> Self {
        Self { path }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for UploadedExport {
    fn drop(&mut self) {
        if let Err(err) = fs::remove_file(&self.path) {
            if err.kind() != io::ErrorKind::NotFound {
                warn!(
                    path = %self.path.display(),
                    error = %err,
                    "failed to remove uploaded export file"
                );
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::{ExportError, RawEntry, UploadedExport, extract_transcript, parse_export};
    use serde_json::json;

    fn entries(value: serde_json::Value) -> Vec<RawEntry> {
        serde_json::from_value(value).expect("test entries should deserialize")
    }

    #[test]
    fn extract_keeps_only_matching_senders_and_drops_blank_text() {
        let entries = entries(json!([
            {"from": "Alice", "text": "hi"},
            {"from": "Bob", "text": "yo"},
            {"from": "Alice", "text": "  "},
        ]));

        let transcript = extract_transcript(&entries, "Alice", 750);

        assert_eq!(transcript.len(), 1);
        assert_eq!(transcript[0].from, "Alice");
        assert_eq!(transcript[0].text, "hi");
        assert_eq!(transcript[0].date, "");
    }

    #[test]
    fn fragment_lists_concatenate_only_text_fragments() {
        let entries = entries(json!([
            {"from": "Alice", "text": [{"text": "foo"}, {"other": 1}, {"text": "bar"}]},
        ]));

        let transcript = extract_transcript(&entries, "Alice", 750);

        assert_eq!(transcript.len(), 1);
        assert_eq!(transcript[0].text, "foobar");
    }

    #[test]
    fn bare_string_fragments_carry_no_text() {
        let entries = entries(json!([
            {"from": "Alice", "text": ["loose prefix ", {"text": "kept"}, " loose suffix"]},
        ]));

        let transcript = extract_transcript(&entries, "Alice", 750);

        assert_eq!(transcript.len(), 1);
        assert_eq!(transcript[0].text, "kept");
    }

    #[test]
    fn plain_string_text_is_used_verbatim_after_trimming() {
        let entries = entries(json!([
            {"from": "Alice", "text": "  keep the middle  spacing  ", "date": "2023-01-15T12:30:00"},
        ]));

        let transcript = extract_transcript(&entries, "Alice", 750);

        assert_eq!(transcript[0].text, "keep the middle  spacing");
        assert_eq!(transcript[0].date, "2023-01-15T12:30:00");
    }

    #[test]
    fn non_message_entries_and_unsupported_text_shapes_are_skipped() {
        let entries = entries(json!([
            5,
            "loose string",
            {"from": "Alice", "text": {"nested": "object"}},
            {"from": "Alice"},
            {"from": "Alice", "text": null},
            {"text": "no sender"},
            {"from": "Alice", "text": "real"},
        ]));

        let transcript = extract_transcript(&entries, "Alice", 750);

        assert_eq!(transcript.len(), 1);
        assert_eq!(transcript[0].text, "real");
    }

    #[test]
    fn sender_match_is_exact_and_case_sensitive() {
        let entries = entries(json!([
            {"from": "alice", "text": "lower"},
            {"from": "Alice ", "text": "padded"},
            {"from": "Alice", "text": "exact"},
        ]));

        let transcript = extract_transcript(&entries, "Alice", 750);

        assert_eq!(transcript.len(), 1);
        assert_eq!(transcript[0].text, "exact");
    }

    #[test]
    fn extract_preserves_chronological_order() {
        let entries = entries(json!([
            {"from": "Alice", "text": "first"},
            {"from": "Bob", "text": "noise"},
            {"from": "Alice", "text": "second"},
            {"from": "Alice", "text": "third"},
        ]));

        let transcript = extract_transcript(&entries, "Alice", 750);

        let texts: Vec<&str> = transcript.iter().map(|m| m.text.as_str()).collect();
        assert_eq!(texts, vec!["first", "second", "third"]);
    }

    #[test]
    fn cap_keeps_exactly_the_most_recent_messages() {
        let raw: Vec<serde_json::Value> = (0..800)
            .map(|index| json!({"from": "Alice", "text": format!("msg {index}")}))
            .collect();
        let entries = entries(serde_json::Value::Array(raw));

        let transcript = extract_transcript(&entries, "Alice", 750);

        assert_eq!(transcript.len(), 750);
        assert_eq!(transcript[0].text, "msg 50");
        assert_eq!(transcript[749].text, "msg 799");
    }

    #[test]
    fn cap_ignores_non_qualifying_entries() {
        let entries = entries(json!([
            {"from": "Bob", "text": "a"},
            {"from": "Alice", "text": "one"},
            {"from": "Alice", "text": "   "},
            {"from": "Alice", "text": "two"},
            {"from": "Alice", "text": "three"},
        ]));

        let transcript = extract_transcript(&entries, "Alice", 2);

        let texts: Vec<&str> = transcript.iter().map(|m| m.text.as_str()).collect();
        assert_eq!(texts, vec!["two", "three"]);
    }

    #[test]
    fn unknown_name_yields_empty_transcript() {
        let entries = entries(json!([
            {"from": "Alice", "text": "hi"},
        ]));

        assert!(extract_transcript(&entries, "Carol", 750).is_empty());
    }

    #[test]
    fn missing_sender_never_matches_empty_name() {
        let entries = entries(json!([
            {"text": "orphaned"},
        ]));

        assert!(extract_transcript(&entries, "", 750).is_empty());
    }

    #[test]
    fn parse_export_accepts_mixed_entries() {
        let raw = r#"{"name": "chat", "messages": [{"from": "Alice", "text": "hi"}, 42]}"#;
        let entries = parse_export(raw).expect("export should parse");
        assert_eq!(entries.len(), 2);
    }

    #[test]
    fn parse_export_rejects_missing_messages_key() {
        let err = parse_export(r#"{"name": "chat"}"#).expect_err("should fail");
        assert!(matches!(err, ExportError::MissingMessages));
    }

    #[test]
    fn parse_export_rejects_non_array_messages() {
        let err = parse_export(r#"{"messages": "nope"}"#).expect_err("should fail");
        assert!(matches!(err, ExportError::MissingMessages));
    }

    #[test]
    fn parse_export_rejects_invalid_json() {
        let err = parse_export("{not json").expect_err("should fail");
        assert!(matches!(err, ExportError::Json(_)));
    }

    #[test]
    fn uploaded_export_removes_file_on_drop() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("temp_0.json");
        std::fs::write(&path, "{}").expect("write temp file");

        {
            let upload = UploadedExport::new(path.clone());
            assert_eq!(upload.path(), path.as_path());
        }

        assert!(!path.exists(), "spooled upload should be removed on drop");
    }

    #[test]
    fn uploaded_export_tolerates_already_removed_file() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("gone.json");
        let upload = UploadedExport::new(path);
        drop(upload);
    }
}
