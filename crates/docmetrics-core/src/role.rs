//! Node-role resolution.
//!
//! Routing nodes (mongos) answer `isMaster` with `msg: "isdbgrid"`; anything
//! else that answers is treated as an ordinary data node. The role is
//! resolved on every scrape, never cached.

use std::fmt;

use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::document::Document;
use crate::transport::{Command, CommandRunner, FetchError, fetch_document};

const ROUTING_MARKER: &str = "isdbgrid";

/// Operating role of the server a collector talks to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeRole {
    Ordinary,
    Routing,
    Unknown,
}

impl NodeRole {
    /// Collapses a resolution result; failures become `Unknown`.
    pub fn from_resolution(result: &Result<NodeRole, RoleError>) -> NodeRole {
        match result {
            Ok(role) => *role,
            Err(_) => NodeRole::Unknown,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            NodeRole::Ordinary => "ordinary",
            NodeRole::Routing => "routing",
            NodeRole::Unknown => "unknown",
        }
    }
}

/// The role command failed or its reply could not be read.
#[derive(Debug, Clone, PartialEq)]
pub struct RoleError(pub FetchError);

impl RoleError {
    pub fn is_cancelled(&self) -> bool {
        self.0.is_cancelled()
    }
}

impl fmt::Display for RoleError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "cannot determine node role: {}", self.0)
    }
}

impl std::error::Error for RoleError {}

/// The administrative command used to classify the node.
pub fn role_command() -> Command {
    Command::new("isMaster", 1)
}

/// Classifies a decoded `isMaster` reply.
pub fn classify(reply: &Document) -> NodeRole {
    if reply.get_str("msg") == Some(ROUTING_MARKER) {
        NodeRole::Routing
    } else {
        NodeRole::Ordinary
    }
}

/// Asks the server for its role.
pub async fn resolve_role<R: CommandRunner + ?Sized>(
    runner: &R,
    cancel: &CancellationToken,
) -> Result<NodeRole, RoleError> {
    let reply = fetch_document(runner, cancel, "admin", &role_command())
        .await
        .map_err(RoleError)?;
    let role = classify(&reply);
    debug!(role = role.as_str(), "resolved node role");
    Ok(role)
}
