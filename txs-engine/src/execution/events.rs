// Execution Events
// Progress reporting for batch execution, consumed by the CLI and any other observer

use crate::request::models::{
    ErrorKind, ExecutionMode, OperationStatus, ResponseStatus, Verb,
};

use std::time::Duration;
use tokio::sync::mpsc;

/// Sender for execution progress events
pub type ProgressSender = mpsc::UnboundedSender<ExecutionEvent>;

/// Receiver for execution progress events
pub type ProgressReceiver = mpsc::UnboundedReceiver<ExecutionEvent>;

/// Create a new progress channel
pub fn progress_channel() -> (ProgressSender, ProgressReceiver) {
    mpsc::unbounded_channel()
}

#[derive(Debug, Clone)]
pub enum ExecutionEvent {
    /// Request accepted and planned
    RequestStarted {
        execution_mode: ExecutionMode,
        total_groups: usize,
        total_operations: usize,
    },

    /// Request rejected before anything ran
    RequestRejected { kind: ErrorKind, message: String },

    RequestCompleted {
        status: ResponseStatus,
        duration: Duration,
    },

    GroupStarted {
        tx_id: String,
        execution_mode: ExecutionMode,
        total_operations: usize,
    },

    GroupCommitted { tx_id: String, duration: Duration },

    GroupRolledBack {
        tx_id: String,
        reason: String,
        duration: Duration,
    },

    /// Group never ran
    GroupSkipped { tx_id: String, reason: String },

    OperationStarted {
        tx_id: String,
        op_id: String,
        verb: Verb,
        domain_object: String,
    },

    OperationCompleted {
        tx_id: String,
        op_id: String,
        status: OperationStatus,
        error: Option<String>,
        duration: Duration,
    },

    /// Log message (info, warning, error)
    Log {
        level: LogLevel,
        message: String,
        tx_id: Option<String>,
    },
}

/// Log level for log events
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogLevel {
    Warning,
    Error,
}

impl ExecutionEvent {
    pub fn request_started(
        execution_mode: ExecutionMode,
        total_groups: usize,
        total_operations: usize,
    ) -> Self {
        Self::RequestStarted {
            execution_mode,
            total_groups,
            total_operations,
        }
    }

    pub fn request_rejected(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self::RequestRejected {
            kind,
            message: message.into(),
        }
    }

    pub fn request_completed(status: ResponseStatus, duration: Duration) -> Self {
        Self::RequestCompleted { status, duration }
    }

    pub fn group_started(
        tx_id: impl Into<String>,
        execution_mode: ExecutionMode,
        total_operations: usize,
    ) -> Self {
        Self::GroupStarted {
            tx_id: tx_id.into(),
            execution_mode,
            total_operations,
        }
    }

    pub fn group_committed(tx_id: impl Into<String>, duration: Duration) -> Self {
        Self::GroupCommitted {
            tx_id: tx_id.into(),
            duration,
        }
    }

    pub fn group_rolled_back(
        tx_id: impl Into<String>,
        reason: impl Into<String>,
        duration: Duration,
    ) -> Self {
        Self::GroupRolledBack {
            tx_id: tx_id.into(),
            reason: reason.into(),
            duration,
        }
    }

    pub fn group_skipped(tx_id: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::GroupSkipped {
            tx_id: tx_id.into(),
            reason: reason.into(),
        }
    }

    pub fn operation_started(
        tx_id: impl Into<String>,
        op_id: impl Into<String>,
        verb: Verb,
        domain_object: impl Into<String>,
    ) -> Self {
        Self::OperationStarted {
            tx_id: tx_id.into(),
            op_id: op_id.into(),
            verb,
            domain_object: domain_object.into(),
        }
    }

    pub fn operation_completed(
        tx_id: impl Into<String>,
        op_id: impl Into<String>,
        status: OperationStatus,
        error: Option<String>,
        duration: Duration,
    ) -> Self {
        Self::OperationCompleted {
            tx_id: tx_id.into(),
            op_id: op_id.into(),
            status,
            error,
            duration,
        }
    }

    /// Create a warning log event
    pub fn warning(message: impl Into<String>, tx_id: Option<String>) -> Self {
        Self::Log {
            level: LogLevel::Warning,
            message: message.into(),
            tx_id,
        }
    }

    /// Create an error log event
    pub fn error(message: impl Into<String>, tx_id: Option<String>) -> Self {
        Self::Log {
            level: LogLevel::Error,
            message: message.into(),
            tx_id,
        }
    }
}

/// Helper trait for sending events, ignoring errors (fire-and-forget)
pub trait EventSender {
    fn send_event(&self, event: ExecutionEvent);
}

impl EventSender for ProgressSender {
    fn send_event(&self, event: ExecutionEvent) {
        let _ = self.send(event);
    }
}

impl EventSender for Option<ProgressSender> {
    fn send_event(&self, event: ExecutionEvent) {
        if let Some(sender) = self {
            let _ = sender.send(event);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_progress_channel() {
        let (tx, mut rx) = progress_channel();

        tx.send_event(ExecutionEvent::request_started(ExecutionMode::Parallel, 2, 5));
        tx.send_event(ExecutionEvent::group_started("tx-001", ExecutionMode::Serial, 3));

        let event1 = rx.recv().await.unwrap();
        assert!(matches!(event1, ExecutionEvent::RequestStarted { total_groups: 2, .. }));

        let event2 = rx.recv().await.unwrap();
        assert!(matches!(event2, ExecutionEvent::GroupStarted { .. }));
    }

    #[test]
    fn test_event_construction() {
        let event = ExecutionEvent::operation_completed(
            "tx-001",
            "op-002",
            OperationStatus::Failed,
            Some("NotFound: team not found".to_string()),
            Duration::from_millis(12),
        );

        if let ExecutionEvent::OperationCompleted {
            tx_id,
            op_id,
            status,
            error,
            duration,
        } = event
        {
            assert_eq!(tx_id, "tx-001");
            assert_eq!(op_id, "op-002");
            assert_eq!(status, OperationStatus::Failed);
            assert_eq!(error.as_deref(), Some("NotFound: team not found"));
            assert_eq!(duration, Duration::from_millis(12));
        } else {
            panic!("wrong event type");
        }
    }

    #[test]
    fn test_optional_sender() {
        let sender: Option<ProgressSender> = None;
        sender.send_event(ExecutionEvent::warning("test", None));

        let (tx, mut rx) = progress_channel();
        Some(tx).send_event(ExecutionEvent::error("commit failed", Some("tx-001".into())));
        assert!(matches!(
            rx.try_recv().unwrap(),
            ExecutionEvent::Log { level: LogLevel::Error, tx_id: Some(_), .. }
        ));
    }
}
