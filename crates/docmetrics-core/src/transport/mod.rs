//! Command transport abstraction.
//!
//! The pipeline never talks to the database directly. It hands a
//! [`Command`] to a [`CommandRunner`] and gets back the raw reply bytes;
//! connection handling, pooling and the wire protocol belong to whoever
//! implements the trait. [`MockRunner`] is the in-memory implementation
//! used by tests and fixtures.

pub mod mock;

use std::fmt;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use crate::document::{Document, DocumentError, Value};

pub use mock::MockRunner;

/// Database-command descriptor. The first key names the command.
#[derive(Debug, Clone, PartialEq)]
pub struct Command {
    doc: Document,
}

impl Command {
    /// Creates `{<name>: <arg>}`.
    pub fn new(name: &str, arg: impl Into<Value>) -> Self {
        Self {
            doc: Document::new().with(name, arg),
        }
    }

    /// Adds a command option.
    pub fn with(mut self, key: &str, value: impl Into<Value>) -> Self {
        self.doc.insert(key, value);
        self
    }

    pub fn name(&self) -> &str {
        self.doc.first_key().unwrap_or_default()
    }

    pub fn document(&self) -> &Document {
        &self.doc
    }
}

/// Raw BSON bytes of a command reply.
#[derive(Debug, Clone, PartialEq)]
pub struct Reply {
    bytes: Vec<u8>,
}

impl Reply {
    pub fn from_bytes(bytes: Vec<u8>) -> Self {
        Self { bytes }
    }

    pub fn from_document(doc: &Document) -> Result<Self, DocumentError> {
        Ok(Self {
            bytes: doc.to_bson_bytes()?,
        })
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }

    pub fn decode(&self) -> Result<Document, DocumentError> {
        Document::from_bson_bytes(&self.bytes)
    }
}

/// Failure reported by a [`CommandRunner`].
#[derive(Debug, Clone, PartialEq)]
pub enum CommandError {
    /// Connection-level failure.
    Transport(String),
    /// The server rejected the command.
    Server { code: i32, message: String },
    /// The scrape was cancelled while the command was in flight.
    Cancelled,
}

impl fmt::Display for CommandError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CommandError::Transport(msg) => write!(f, "transport error: {}", msg),
            CommandError::Server { code, message } => {
                write!(f, "server error {}: {}", code, message)
            }
            CommandError::Cancelled => write!(f, "command cancelled"),
        }
    }
}

impl std::error::Error for CommandError {}

/// Issues database commands.
///
/// Implementations borrow a connection for the duration of one call and
/// must not hold state between calls that would make concurrent use unsafe.
#[async_trait]
pub trait CommandRunner: Send + Sync {
    async fn run(&self, database: &str, command: &Command) -> Result<Reply, CommandError>;
}

/// Runs a command, giving up as soon as `cancel` fires.
pub async fn run_cancellable<R: CommandRunner + ?Sized>(
    runner: &R,
    cancel: &CancellationToken,
    database: &str,
    command: &Command,
) -> Result<Reply, CommandError> {
    if cancel.is_cancelled() {
        return Err(CommandError::Cancelled);
    }
    tokio::select! {
        biased;
        _ = cancel.cancelled() => Err(CommandError::Cancelled),
        reply = runner.run(database, command) => reply,
    }
}

/// Failure to obtain a decoded reply.
#[derive(Debug, Clone, PartialEq)]
pub enum FetchError {
    Command(CommandError),
    Decode(DocumentError),
}

impl FetchError {
    pub fn is_cancelled(&self) -> bool {
        matches!(self, FetchError::Command(CommandError::Cancelled))
    }
}

impl fmt::Display for FetchError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FetchError::Command(e) => write!(f, "{}", e),
            FetchError::Decode(e) => write!(f, "{}", e),
        }
    }
}

impl std::error::Error for FetchError {}

impl From<CommandError> for FetchError {
    fn from(e: CommandError) -> Self {
        FetchError::Command(e)
    }
}

impl From<DocumentError> for FetchError {
    fn from(e: DocumentError) -> Self {
        FetchError::Decode(e)
    }
}

/// Runs a command and decodes its reply.
pub async fn fetch_document<R: CommandRunner + ?Sized>(
    runner: &R,
    cancel: &CancellationToken,
    database: &str,
    command: &Command,
) -> Result<Document, FetchError> {
    let reply = run_cancellable(runner, cancel, database, command).await?;
    Ok(reply.decode()?)
}
