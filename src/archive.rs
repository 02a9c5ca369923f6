use crate::export::CleanedMessage;
use anyhow::{Context, Result};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::debug;
use uuid::Uuid;

/// Write-only audit storage for filtered transcripts. Each write gets a
/// random per-write token, so repeated archiving by the same owner never
/// collides.
pub struct ArchiveStore {
    root: PathBuf,
}

impl ArchiveStore {
    pub fn new(root: impl Into<PathBuf>) -> Result<Self> {
        let root = root.into();
        fs::create_dir_all(&root)
            .with_context(|| format!("failed to create archive directory: {}", root.display()))?;
        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn archive(&self, owner_id: i64, transcript: &[CleanedMessage]) -> Result<PathBuf> {
        let token = Uuid::new_v4().simple();
        let path = self.root.join(format!("{owner_id}_{token}.json"));
        let body = serde_json::to_string_pretty(transcript)
            .context("failed to serialize transcript for archiving")?;
        fs::write(&path, body)
            .with_context(|| format!("failed to write archive file: {}", path.display()))?;

        debug!(
            owner_id,
            message_count = transcript.len(),
            path = %path.display(),
            "archived transcript"
        );
        Ok(path)
    }
}
