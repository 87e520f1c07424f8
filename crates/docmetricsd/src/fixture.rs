//! Replays recorded command replies from disk.
//!
//! Each invocation reads `<root>/<database>/<command>.json` afresh, so the
//! files can be swapped while the daemon runs. Replies are converted to
//! BSON before they are handed back, the same bytes a server would send.

use std::io;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tracing::trace;

use docmetrics_core::Document;
use docmetrics_core::transport::mock::COMMAND_NOT_FOUND;
use docmetrics_core::transport::{Command, CommandError, CommandRunner, Reply};

/// Key of a fixture that simulates a transport failure.
const ERROR_KEY: &str = "$error";

#[derive(Debug, Clone)]
pub struct FixtureRunner {
    root: PathBuf,
}

impl FixtureRunner {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn path_for(&self, database: &str, command: &str) -> Option<PathBuf> {
        let safe = |s: &str| !s.is_empty() && !s.contains(['/', '\\']) && s != "." && s != "..";
        if !safe(database) || !safe(command) {
            return None;
        }
        Some(self.root.join(database).join(format!("{}.json", command)))
    }
}

fn not_found(command: &str) -> CommandError {
    CommandError::Server {
        code: COMMAND_NOT_FOUND,
        message: format!("no such command: '{}'", command),
    }
}

#[async_trait]
impl CommandRunner for FixtureRunner {
    async fn run(&self, database: &str, command: &Command) -> Result<Reply, CommandError> {
        let name = command.name();
        let Some(path) = self.path_for(database, name) else {
            return Err(not_found(name));
        };
        trace!(path = %path.display(), "reading fixture");

        let raw = match tokio::fs::read(&path).await {
            Ok(raw) => raw,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Err(not_found(name)),
            Err(e) => {
                return Err(CommandError::Transport(format!(
                    "{}: {}",
                    path.display(),
                    e
                )));
            }
        };

        let json: serde_json::Value = serde_json::from_slice(&raw).map_err(|e| {
            CommandError::Transport(format!("{}: invalid JSON: {}", path.display(), e))
        })?;
        if let Some(message) = json.get(ERROR_KEY) {
            let message = message.as_str().map(str::to_string).unwrap_or_else(|| message.to_string());
            return Err(CommandError::Transport(message));
        }

        let doc = Document::from_json(json)
            .map_err(|e| CommandError::Transport(format!("{}: {}", path.display(), e)))?;
        Reply::from_document(&doc)
            .map_err(|e| CommandError::Transport(format!("{}: {}", path.display(), e)))
    }
}
