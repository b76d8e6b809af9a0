//! Rust models matching the database schema.

use altsmith_common::{AssetId, ClientId, FailureKind, JobOutcome, RunId, RunScope, RunStatus, TriggerSource};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A registered WordPress site the agent manages.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Client {
    pub id: ClientId,
    /// Site root, e.g. `https://blog.example.com` (no trailing slash).
    pub base_url: String,
    pub username: String,
    /// WordPress application password. Never logged.
    #[serde(skip_serializing)]
    pub app_password: String,
    pub enabled: bool,
    /// Cleared when the site rejects the credential; jobs for the client are
    /// refused until the registration is updated.
    pub auth_ok: bool,
    /// BCP 47 tag for generated metadata, e.g. `en` or `de`.
    pub language: String,
    /// Per-client provider fallback order; `None` means the global order.
    pub provider_order: Option<Vec<String>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// One processing run: a sweep over one client's media library or all of them.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Run {
    pub id: RunId,
    pub trigger: TriggerSource,
    pub scope: RunScope,
    pub status: RunStatus,
    /// Scope-level error, set when the run itself failed (not per-job errors).
    pub error: Option<String>,
    /// Jobs admitted after dedup filtering.
    pub total: i64,
    pub processed: i64,
    pub skipped: i64,
    pub failed: i64,
    /// Jobs requeued at least once because the rate limiter deferred them.
    pub deferred: i64,
    pub started_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl Run {
    /// Whether the run has reached a terminal state.
    pub fn is_terminal(&self) -> bool {
        matches!(self.status, RunStatus::Completed | RunStatus::Failed)
    }
}

/// Dedup ledger entry for one (client, asset) pair.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LedgerEntry {
    pub client_id: ClientId,
    pub asset_id: AssetId,
    /// Hash of the asset's source URL and last-modified stamp at the time of
    /// the recorded outcome.
    pub content_hash: String,
    /// `None` while the first attempt is still in flight.
    pub outcome: Option<JobOutcome>,
    pub failure_kind: Option<FailureKind>,
    /// Consecutive failed attempts since the last success.
    pub attempts: i64,
    pub in_progress: bool,
    /// Name of the provider that produced the last successful metadata.
    pub provider: Option<String>,
    pub updated_at: DateTime<Utc>,
}

/// Lifetime counters for one client.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ClientStats {
    pub client_id: Option<ClientId>,
    pub processed: i64,
    pub failed: i64,
    pub skipped: i64,
    pub total_latency_ms: i64,
    pub last_run_at: Option<DateTime<Utc>>,
}

impl ClientStats {
    /// Mean end-to-end latency per processed image, or `None` before the
    /// first success.
    pub fn avg_latency_ms(&self) -> Option<i64> {
        if self.processed > 0 {
            Some(self.total_latency_ms / self.processed)
        } else {
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_avg_latency() {
        let stats = ClientStats {
            processed: 4,
            total_latency_ms: 1000,
            ..Default::default()
        };
        assert_eq!(stats.avg_latency_ms(), Some(250));

        let empty = ClientStats::default();
        assert_eq!(empty.avg_latency_ms(), None);
    }

    #[test]
    fn test_client_password_not_serialized() {
        let client = Client {
            id: ClientId::parse("acme").unwrap(),
            base_url: "https://acme.example".into(),
            username: "bot".into(),
            app_password: "hunter2".into(),
            enabled: true,
            auth_ok: true,
            language: "en".into(),
            provider_order: None,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        };
        let json = serde_json::to_string(&client).unwrap();
        assert!(!json.contains("hunter2"));
    }

    #[test]
    fn test_run_terminal() {
        let mut run = Run {
            id: RunId::new(),
            trigger: TriggerSource::Manual,
            scope: RunScope::All,
            status: RunStatus::Running,
            error: None,
            total: 0,
            processed: 0,
            skipped: 0,
            failed: 0,
            deferred: 0,
            started_at: Utc::now(),
            completed_at: None,
        };
        assert!(!run.is_terminal());
        run.status = RunStatus::Completed;
        assert!(run.is_terminal());
    }
}
