//! Core type definitions for runs, jobs, and failure classification.
//!
//! All enums serialize in lowercase and round-trip through their `Display`/
//! `FromStr` forms, which is how they are stored in SQLite.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::ClientId;

/// What caused a processing run to be created.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TriggerSource {
    /// Interval timer inside the agent.
    Scheduled,
    /// Incoming webhook call.
    Webhook,
    /// Manual API request (`POST /api/process`).
    Manual,
}

impl fmt::Display for TriggerSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Scheduled => write!(f, "scheduled"),
            Self::Webhook => write!(f, "webhook"),
            Self::Manual => write!(f, "manual"),
        }
    }
}

impl std::str::FromStr for TriggerSource {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "scheduled" => Ok(Self::Scheduled),
            "webhook" => Ok(Self::Webhook),
            "manual" => Ok(Self::Manual),
            _ => Err(format!("Invalid trigger source: {}", s)),
        }
    }
}

/// Which clients a run covers.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase", tag = "scope", content = "client_id")]
pub enum RunScope {
    /// A single registered client.
    Client(ClientId),
    /// Every enabled client.
    All,
}

impl fmt::Display for RunScope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Client(id) => write!(f, "{}", id),
            Self::All => write!(f, "all"),
        }
    }
}

/// Lifecycle state of a processing run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RunStatus {
    /// Accepted but not yet expanded into jobs.
    Created,
    /// Listing media and consulting the dedup ledger.
    Expanding,
    /// Jobs dispatched to the worker pool.
    Running,
    /// Every job reached a terminal state (or the run was cancelled).
    Completed,
    /// Scope-level failure (e.g. the client was unreachable for listing).
    Failed,
}

impl fmt::Display for RunStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Created => write!(f, "created"),
            Self::Expanding => write!(f, "expanding"),
            Self::Running => write!(f, "running"),
            Self::Completed => write!(f, "completed"),
            Self::Failed => write!(f, "failed"),
        }
    }
}

impl std::str::FromStr for RunStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "created" => Ok(Self::Created),
            "expanding" => Ok(Self::Expanding),
            "running" => Ok(Self::Running),
            "completed" => Ok(Self::Completed),
            "failed" => Ok(Self::Failed),
            _ => Err(format!("Invalid run status: {}", s)),
        }
    }
}

/// Terminal outcome of a job, as recorded in the dedup ledger.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobOutcome {
    /// Metadata generated and written back to WordPress.
    Done,
    /// Exhausted its retry budget or hit a permanent failure.
    Failed,
    /// Content hash unchanged since the last successful pass.
    Skipped,
}

impl fmt::Display for JobOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Done => write!(f, "done"),
            Self::Failed => write!(f, "failed"),
            Self::Skipped => write!(f, "skipped"),
        }
    }
}

impl std::str::FromStr for JobOutcome {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "done" => Ok(Self::Done),
            "failed" => Ok(Self::Failed),
            "skipped" => Ok(Self::Skipped),
            _ => Err(format!("Invalid job outcome: {}", s)),
        }
    }
}

/// Classification of a job failure, used for retry decisions and reporting.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    /// Timeout, 5xx, or rate-limit response — eligible for retry.
    Transient,
    /// Credential rejected — requires external remediation.
    Auth,
    /// Provider rejected or mangled the content — flagged for review.
    Content,
}

impl fmt::Display for FailureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Transient => write!(f, "transient"),
            Self::Auth => write!(f, "auth"),
            Self::Content => write!(f, "content"),
        }
    }
}

impl std::str::FromStr for FailureKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "transient" => Ok(Self::Transient),
            "auth" => Ok(Self::Auth),
            "content" => Ok(Self::Content),
            _ => Err(format!("Invalid failure kind: {}", s)),
        }
    }
}
