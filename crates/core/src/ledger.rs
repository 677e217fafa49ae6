//! Append-only JSONL record of successfully ingested sources.

use crate::error::LedgerError;
use crate::models::{LedgerEntry, LedgerStatus};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;
use tracing::{debug, warn};

pub struct IngestionLedger {
    path: PathBuf,
    latest: Mutex<HashMap<String, LedgerEntry>>,
}

impl IngestionLedger {
    /// Loads an existing ledger. A missing file is an empty ledger.
    pub async fn open(path: impl Into<PathBuf>) -> Result<Self, LedgerError> {
        let path = path.into();
        let mut latest = HashMap::new();

        match tokio::fs::read_to_string(&path).await {
            Ok(contents) => {
                for (line_number, line) in contents.lines().enumerate() {
                    if line.trim().is_empty() {
                        continue;
                    }
                    match serde_json::from_str::<LedgerEntry>(line) {
                        Ok(entry) => {
                            latest.insert(entry.identity.clone(), entry);
                        }
                        Err(error) => warn!(
                            path = %path.display(),
                            line = line_number + 1,
                            error = %error,
                            "skipping malformed ledger line"
                        ),
                    }
                }
            }
            Err(error) if error.kind() == std::io::ErrorKind::NotFound => {}
            Err(error) => return Err(error.into()),
        }

        debug!(path = %path.display(), entries = latest.len(), "ledger opened");
        Ok(Self {
            path,
            latest: Mutex::new(latest),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub async fn is_ingested(&self, identity: &str) -> bool {
        self.latest
            .lock()
            .await
            .get(identity)
            .is_some_and(|entry| entry.status == LedgerStatus::Succeeded)
    }

    pub async fn latest(&self, identity: &str) -> Option<LedgerEntry> {
        self.latest.lock().await.get(identity).cloned()
    }

    pub async fn len(&self) -> usize {
        self.latest.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    /// Appends `entry` and makes it the latest for its identity.
    pub async fn record(&self, entry: LedgerEntry) -> Result<(), LedgerError> {
        let mut line = serde_json::to_string(&entry)?;
        line.push('\n');

        let mut latest = self.latest.lock().await;
        if let Some(parent) = self.path.parent().filter(|parent| !parent.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent).await?;
        }
        let mut file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .await?;
        file.write_all(line.as_bytes()).await?;
        file.flush().await?;

        latest.insert(entry.identity.clone(), entry);
        Ok(())
    }
}
