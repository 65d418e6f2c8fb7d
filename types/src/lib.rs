//! Shared types for the ktimer registry
//!
//! This crate holds the serializable values that cross the registry
//! boundary: limits, request/reply shapes and the persisted configuration.
//! It carries no runtime and is shared by `ktimer-core` and `ktimer-cli`.

use serde::{Deserialize, Serialize};
use std::fmt;

// ─────────────────────────────────────────────────────────────────────────────
// Limits
// ─────────────────────────────────────────────────────────────────────────────

/// Physical number of timer slots. `capacity_limit` can never exceed it.
pub const KTIMER_MAX: usize = 5;

/// Maximum key (message) length in bytes.
pub const KTIMER_MSG_MAX: usize = 128;

/// Shortest accepted timer duration, in seconds.
pub const MIN_DURATION_SECS: u64 = 1;

/// Longest accepted timer duration, in seconds (one day).
pub const MAX_DURATION_SECS: u64 = 86_400;

/// Name reported by the status exporter unless configured otherwise.
pub const DEFAULT_MODULE_NAME: &str = "mytimer";

// ─────────────────────────────────────────────────────────────────────────────
// Request / Reply Types
// ─────────────────────────────────────────────────────────────────────────────

/// Result of a successful Set request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SetOutcome {
    /// No active timer had this key; a slot was claimed.
    Created,
    /// An active timer with this key was re-armed in place.
    Updated,
}

/// One row of a List reply.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimerEntry {
    pub key: String,
    pub seconds_remaining: u64,
}

/// What a Reset request clears.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ResetTarget {
    All,
    Key(String),
}

impl ResetTarget {
    pub fn key(key: impl Into<String>) -> Self {
        ResetTarget::Key(key.into())
    }

    pub fn matches(&self, key: &str) -> bool {
        match self {
            ResetTarget::All => true,
            ResetTarget::Key(k) => k == key,
        }
    }
}

/// Identity of the client that created a timer.
///
/// Informational only; surfaced by the status exporter.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Owner {
    pub pid: u32,
    pub command: String,
}

impl Owner {
    pub fn new(pid: u32, command: impl Into<String>) -> Self {
        Self {
            pid,
            command: command.into(),
        }
    }

    /// Identity of the running process: its pid and executable file name.
    pub fn current() -> Self {
        let command = std::env::args()
            .next()
            .as_deref()
            .map(std::path::Path::new)
            .and_then(|p| p.file_name())
            .and_then(|n| n.to_str())
            .map(String::from)
            .unwrap_or_else(|| "unknown".to_string());

        Self {
            pid: std::process::id(),
            command,
        }
    }
}

impl fmt::Display for Owner {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.command, self.pid)
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Configuration
// ─────────────────────────────────────────────────────────────────────────────

/// Persisted registry configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegistryConfig {
    /// Module identity printed first in the status export
    #[serde(default = "default_module_name")]
    pub module_name: String,
    /// Soft capacity the registry starts with (1..=KTIMER_MAX)
    #[serde(default = "default_initial_capacity")]
    pub initial_capacity: usize,
    /// Depth of the client request queue
    #[serde(default = "default_request_buffer")]
    pub request_buffer: usize,
}

fn default_module_name() -> String {
    DEFAULT_MODULE_NAME.to_string()
}

fn default_initial_capacity() -> usize {
    1
}

fn default_request_buffer() -> usize {
    64
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            module_name: default_module_name(),
            initial_capacity: default_initial_capacity(),
            request_buffer: default_request_buffer(),
        }
    }
}
