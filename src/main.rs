use anyhow::{Context, Result};
use clap::Parser;
use std::fs;
use std::io::BufRead;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tg_style_mimic::archive::ArchiveStore;
use tg_style_mimic::config::load_config;
use tg_style_mimic::llm::CompletionClient;
use tg_style_mimic::session::{SessionEvent, SessionRouter};
use tokio::sync::mpsc;
use tracing::{info, warn};
use tracing_log::LogTracer;
use tracing_subscriber::EnvFilter;

/// Owner id for the local console chat. Real transports carry their own ids;
/// the console only ever has one operator.
const CONSOLE_OWNER_ID: i64 = 0;

#[derive(Debug, Parser)]
#[command(about = "Chats in the style of a person from an exported chat history")]
struct Cli {
    /// Path to the TOML config file.
    #[arg(long, default_value = "config.toml")]
    config: PathBuf,
}

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();

    let cli = Cli::parse();
    let config = load_config(&cli.config)?;

    let backend = CompletionClient::new(
        &config.openai.api_url,
        &config.openai.api_key,
        &config.openai.model,
        Duration::from_secs(config.openai.timeout_seconds),
    )?;
    let archive = ArchiveStore::new(config.mimic.archive_dir.clone())?;
    let spool_dir = archive.root().to_path_buf();
    let router = SessionRouter::new(backend, archive, config.mimic.max_messages);

    info!(
        config_path = %cli.config.display(),
        model = %config.openai.model,
        "style mimic started; type /start to begin"
    );

    run_console(&router, &spool_dir).await
}

async fn run_console(
    router: &SessionRouter<CompletionClient>,
    spool_dir: &Path,
) -> Result<()> {
    let mut lines = spawn_stdin_reader();

    loop {
        tokio::select! {
            signal = tokio::signal::ctrl_c() => {
                if let Err(err) = signal {
                    warn!(error = %err, "failed to listen for Ctrl+C");
                }
                info!("shutdown signal received");
                break;
            }
            line = lines.recv() => {
                let Some(line) = line else {
                    info!("console input closed");
                    break;
                };
                let Some(event) = console_event(&line, spool_dir) else {
                    continue;
                };
                for reply in router.handle(CONSOLE_OWNER_ID, event).await {
                    println!("{reply}");
                }
            }
        }
    }

    Ok(())
}

/// Stdin is read on a plain OS thread; the runtime must stay free to shut
/// down while `read_line` blocks.
fn spawn_stdin_reader() -> mpsc::UnboundedReceiver<String> {
    let (tx, rx) = mpsc::unbounded_channel();
    std::thread::spawn(move || {
        let stdin = std::io::stdin();
        for line in stdin.lock().lines() {
            let Ok(line) = line else {
                break;
            };
            if tx.send(line).is_err() {
                break;
            }
        }
    });
    rx
}

/// Maps one console line onto a session event. `None` means the line was
/// consumed locally (blank input, usage hints, spool failures).
fn console_event(line: &str, spool_dir: &Path) -> Option<SessionEvent> {
    let line = line.trim();
    if line.is_empty() {
        return None;
    }

    // "/upload" must stand alone or be followed by whitespace; "/uploadx"
    // is an unknown command.
    if let Some(rest) = line.strip_prefix("/upload") {
        if rest.is_empty() || rest.starts_with(char::is_whitespace) {
            let source = rest.trim();
            if source.is_empty() {
                println!("Usage: /upload <path-to-export.json>");
                return None;
            }
            return match spool_upload(Path::new(source), spool_dir) {
                Ok(spooled) => Some(SessionEvent::Document(spooled)),
                Err(err) => {
                    warn!(error = %err, "failed to spool uploaded file");
                    println!("Could not read that file: {err:#}");
                    None
                }
            };
        }
    }

    match line {
        "/start" => Some(SessionEvent::Start),
        "/cancel" => Some(SessionEvent::Cancel),
        "/exit" => Some(SessionEvent::Exit),
        other if other.starts_with('/') => {
            println!("Unknown command: {other}");
            None
        }
        other => Some(SessionEvent::Text(other.to_owned())),
    }
}

/// Copies the export into the spool the way a transport download would; the
/// session layer removes the spooled copy after processing.
fn spool_upload(source: &Path, spool_dir: &Path) -> Result<PathBuf> {
    let spooled = spool_dir.join(format!("temp_{CONSOLE_OWNER_ID}.json"));
    fs::copy(source, &spooled)
        .with_context(|| format!("failed to copy {} into the spool", source.display()))?;
    Ok(spooled)
}

fn init_tracing() {
    let _ = LogTracer::init();
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_target(false)
        .compact()
        .init();
}
