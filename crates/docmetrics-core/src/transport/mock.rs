//! In-memory command runner for tests and fixture replay.
//!
//! Responses are scripted per `(database, command name)`. Every script
//! answers the same way on each call, so one runner can serve many scrapes.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;

use super::{Command, CommandError, CommandRunner, Reply};
use crate::document::Document;

/// Error code a server returns for an unknown command.
pub const COMMAND_NOT_FOUND: i32 = 59;

#[derive(Debug, Clone)]
struct Script {
    response: Result<Reply, CommandError>,
    delay: Option<Duration>,
}

/// Scripted [`CommandRunner`].
#[derive(Debug, Default)]
pub struct MockRunner {
    scripts: HashMap<(String, String), Script>,
    calls: Mutex<Vec<(String, String)>>,
}

impl MockRunner {
    pub fn new() -> Self {
        Self::default()
    }

    /// Answers `command` on `database` with `doc`.
    pub fn with_reply(self, database: &str, command: &str, doc: Document) -> Self {
        let response = Reply::from_document(&doc)
            .map_err(|e| CommandError::Transport(format!("mock reply not encodable: {}", e)));
        self.script(database, command, response)
    }

    /// Answers with raw bytes, which need not be valid BSON.
    pub fn with_raw(self, database: &str, command: &str, bytes: Vec<u8>) -> Self {
        self.script(database, command, Ok(Reply::from_bytes(bytes)))
    }

    pub fn with_error(self, database: &str, command: &str, error: CommandError) -> Self {
        self.script(database, command, Err(error))
    }

    /// Delays the scripted response. The command must already be scripted.
    pub fn with_delay(mut self, database: &str, command: &str, delay: Duration) -> Self {
        if let Some(script) = self
            .scripts
            .get_mut(&(database.to_string(), command.to_string()))
        {
            script.delay = Some(delay);
        }
        self
    }

    fn script(
        mut self,
        database: &str,
        command: &str,
        response: Result<Reply, CommandError>,
    ) -> Self {
        self.scripts.insert(
            (database.to_string(), command.to_string()),
            Script {
                response,
                delay: None,
            },
        );
        self
    }

    /// Commands issued so far, as `database.command`.
    pub fn calls(&self) -> Vec<String> {
        self.calls
            .lock()
            .map(|calls| {
                calls
                    .iter()
                    .map(|(db, cmd)| format!("{}.{}", db, cmd))
                    .collect()
            })
            .unwrap_or_default()
    }

    pub fn call_count(&self, command: &str) -> usize {
        self.calls
            .lock()
            .map(|calls| calls.iter().filter(|(_, cmd)| cmd == command).count())
            .unwrap_or_default()
    }
}

#[async_trait]
impl CommandRunner for MockRunner {
    async fn run(&self, database: &str, command: &Command) -> Result<Reply, CommandError> {
        let key = (database.to_string(), command.name().to_string());
        if let Ok(mut calls) = self.calls.lock() {
            calls.push(key.clone());
        }

        let Some(script) = self.scripts.get(&key) else {
            return Err(CommandError::Server {
                code: COMMAND_NOT_FOUND,
                message: format!("no such command: '{}'", key.1),
            });
        };

        if let Some(delay) = script.delay {
            tokio::time::sleep(delay).await;
        }
        script.response.clone()
    }
}
