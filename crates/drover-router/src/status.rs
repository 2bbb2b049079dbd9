use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;

use crate::classify::ExecutionLocation;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CommandStatus {
    Pending,
    Executing,
    Completed,
    Failed,
    Timeout,
    Cancelled,
}

impl CommandStatus {
    #[must_use]
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            Self::Completed | Self::Failed | Self::Timeout | Self::Cancelled
        )
    }
}

/// Mutable tracking record for one in-flight (or recently finished)
/// command, kept for late status polling.
#[derive(Debug, Clone, Serialize)]
pub struct ExecutionStatus {
    pub request_id: String,
    pub command: String,
    pub target: String,
    pub status: CommandStatus,
    pub execution_location: ExecutionLocation,
    pub started_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    pub progress_percent: Option<u8>,
    pub current_step: Option<String>,
}

/// Router-owned map of execution statuses. All mutation goes through its
/// methods under the lock; entries are evicted by the router's deferred
/// cleanup tasks.
#[derive(Debug, Default)]
pub struct StatusBoard {
    entries: Mutex<HashMap<String, ExecutionStatus>>,
}

impl StatusBoard {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn insert_pending(
        &self,
        request_id: &str,
        command: &str,
        target: &str,
        location: ExecutionLocation,
    ) {
        let now = Utc::now();
        let entry = ExecutionStatus {
            request_id: request_id.to_owned(),
            command: command.to_owned(),
            target: target.to_owned(),
            status: CommandStatus::Pending,
            execution_location: location,
            started_at: now,
            updated_at: now,
            completed_at: None,
            progress_percent: None,
            current_step: None,
        };
        self.entries.lock().await.insert(request_id.to_owned(), entry);
    }

    pub async fn set_status(&self, request_id: &str, status: CommandStatus) {
        if let Some(entry) = self.entries.lock().await.get_mut(request_id) {
            entry.status = status;
            entry.updated_at = Utc::now();
        }
    }

    pub async fn set_step(&self, request_id: &str, step: &str) {
        if let Some(entry) = self.entries.lock().await.get_mut(request_id) {
            entry.current_step = Some(step.to_owned());
            entry.updated_at = Utc::now();
        }
    }

    pub async fn set_progress(&self, request_id: &str, percent: Option<u8>, step: Option<String>) {
        if let Some(entry) = self.entries.lock().await.get_mut(request_id) {
            if percent.is_some() {
                entry.progress_percent = percent;
            }
            if step.is_some() {
                entry.current_step = step;
            }
            entry.updated_at = Utc::now();
        }
    }

    /// Move an entry to a terminal status, stamping the completion time.
    pub async fn finish(&self, request_id: &str, status: CommandStatus) {
        if let Some(entry) = self.entries.lock().await.get_mut(request_id) {
            let now = Utc::now();
            entry.status = status;
            entry.updated_at = now;
            entry.completed_at = Some(now);
        }
    }

    pub async fn get(&self, request_id: &str) -> Option<ExecutionStatus> {
        self.entries.lock().await.get(request_id).cloned()
    }

    pub async fn remove(&self, request_id: &str) {
        self.entries.lock().await.remove(request_id);
    }

    pub async fn len(&self) -> usize {
        self.entries.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.entries.lock().await.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn lifecycle_transitions() {
        let board = StatusBoard::new();
        board
            .insert_pending("req-1", "health", "web-01", ExecutionLocation::Agent)
            .await;

        let entry = board.get("req-1").await.unwrap();
        assert_eq!(entry.status, CommandStatus::Pending);
        assert!(entry.completed_at.is_none());

        board.set_status("req-1", CommandStatus::Executing).await;
        board.set_step("req-1", "sending command to agent").await;
        let entry = board.get("req-1").await.unwrap();
        assert_eq!(entry.status, CommandStatus::Executing);
        assert_eq!(entry.current_step.as_deref(), Some("sending command to agent"));

        board.finish("req-1", CommandStatus::Completed).await;
        let entry = board.get("req-1").await.unwrap();
        assert_eq!(entry.status, CommandStatus::Completed);
        assert!(entry.completed_at.is_some());
        assert!(entry.status.is_terminal());
    }

    #[tokio::test]
    async fn unknown_request_id_is_ignored() {
        let board = StatusBoard::new();
        board.set_status("missing", CommandStatus::Failed).await;
        board.finish("missing", CommandStatus::Failed).await;
        assert!(board.get("missing").await.is_none());
    }

    #[tokio::test]
    async fn progress_updates_merge() {
        let board = StatusBoard::new();
        board
            .insert_pending("req-2", "logs", "db-01", ExecutionLocation::Hybrid)
            .await;

        board.set_progress("req-2", Some(40), None).await;
        board
            .set_progress("req-2", None, Some("reading log file".into()))
            .await;

        let entry = board.get("req-2").await.unwrap();
        assert_eq!(entry.progress_percent, Some(40));
        assert_eq!(entry.current_step.as_deref(), Some("reading log file"));
    }

    #[tokio::test]
    async fn remove_evicts_entry() {
        let board = StatusBoard::new();
        board
            .insert_pending("req-3", "health", "web-01", ExecutionLocation::Core)
            .await;
        assert_eq!(board.len().await, 1);
        board.remove("req-3").await;
        assert!(board.is_empty().await);
    }

    #[test]
    fn terminal_statuses() {
        assert!(!CommandStatus::Pending.is_terminal());
        assert!(!CommandStatus::Executing.is_terminal());
        assert!(CommandStatus::Completed.is_terminal());
        assert!(CommandStatus::Failed.is_terminal());
        assert!(CommandStatus::Timeout.is_terminal());
        assert!(CommandStatus::Cancelled.is_terminal());
    }
}
