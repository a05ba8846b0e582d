//! Progress Notifications
//!
//! The engine reports workflow status changes, step completions and handoff
//! status changes to a [`NotificationSink`]. Delivery is fire-and-forget:
//! [`notify`] logs sink failures and never returns them to the caller.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use log::{info, warn};
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc::UnboundedSender;

use crate::coordination::HandoffStatus;
use crate::error::SinkError;
use crate::workflow::{StepStatus, WorkflowStatus};

/// A progress event emitted by the engine.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum WorkflowEvent {
    WorkflowStatusChanged {
        instance_id: String,
        status: WorkflowStatus,
        timestamp: DateTime<Utc>,
    },
    StepStarted {
        instance_id: String,
        step_id: String,
        timestamp: DateTime<Utc>,
    },
    StepFinished {
        instance_id: String,
        step_id: String,
        status: StepStatus,
        timestamp: DateTime<Utc>,
    },
    HandoffStatusChanged {
        handoff_id: String,
        from_capability: String,
        to_capability: String,
        status: HandoffStatus,
        timestamp: DateTime<Utc>,
    },
}

impl WorkflowEvent {
    pub fn workflow_status(instance_id: &str, status: WorkflowStatus) -> Self {
        Self::WorkflowStatusChanged {
            instance_id: instance_id.to_string(),
            status,
            timestamp: Utc::now(),
        }
    }

    pub fn step_started(instance_id: &str, step_id: &str) -> Self {
        Self::StepStarted {
            instance_id: instance_id.to_string(),
            step_id: step_id.to_string(),
            timestamp: Utc::now(),
        }
    }

    pub fn step_finished(instance_id: &str, step_id: &str, status: StepStatus) -> Self {
        Self::StepFinished {
            instance_id: instance_id.to_string(),
            step_id: step_id.to_string(),
            status,
            timestamp: Utc::now(),
        }
    }

    pub fn handoff_status(
        handoff_id: &str,
        from_capability: &str,
        to_capability: &str,
        status: HandoffStatus,
    ) -> Self {
        Self::HandoffStatusChanged {
            handoff_id: handoff_id.to_string(),
            from_capability: from_capability.to_string(),
            to_capability: to_capability.to_string(),
            status,
            timestamp: Utc::now(),
        }
    }
}

/// Receiver of progress events.
#[async_trait]
pub trait NotificationSink: Send + Sync {
    async fn send(&self, event: &WorkflowEvent) -> Result<(), SinkError>;
}

/// Delivers an event, logging (never propagating) sink failures.
pub async fn notify(sink: &Arc<dyn NotificationSink>, event: WorkflowEvent) {
    if let Err(e) = sink.send(&event).await {
        warn!("Dropped notification {:?}: {}", event, e);
    }
}

/// Writes events to the log.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogSink;

#[async_trait]
impl NotificationSink for LogSink {
    async fn send(&self, event: &WorkflowEvent) -> Result<(), SinkError> {
        match event {
            WorkflowEvent::WorkflowStatusChanged { instance_id, status, .. } => {
                info!("Workflow {} is now {}", instance_id, status)
            }
            WorkflowEvent::StepStarted { instance_id, step_id, .. } => {
                info!("[{}] Starting step: {}", instance_id, step_id)
            }
            WorkflowEvent::StepFinished { instance_id, step_id, status, .. } => {
                info!("[{}] Step '{}' finished: {:?}", instance_id, step_id, status)
            }
            WorkflowEvent::HandoffStatusChanged {
                handoff_id,
                from_capability,
                to_capability,
                status,
                ..
            } => info!(
                "Handoff {} ({} -> {}): {:?}",
                handoff_id, from_capability, to_capability, status
            ),
        }
        Ok(())
    }
}

/// Discards every event.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullSink;

#[async_trait]
impl NotificationSink for NullSink {
    async fn send(&self, _event: &WorkflowEvent) -> Result<(), SinkError> {
        Ok(())
    }
}

/// Forwards events into an unbounded channel.
#[derive(Debug, Clone)]
pub struct ChannelSink {
    tx: UnboundedSender<WorkflowEvent>,
}

impl ChannelSink {
    pub fn new(tx: UnboundedSender<WorkflowEvent>) -> Self {
        Self { tx }
    }
}

#[async_trait]
impl NotificationSink for ChannelSink {
    async fn send(&self, event: &WorkflowEvent) -> Result<(), SinkError> {
        self.tx
            .send(event.clone())
            .map_err(|e| SinkError(format!("receiver dropped: {}", e)))
    }
}

/// Fans events out to several sinks. A failing sink does not stop the others.
#[derive(Default, Clone)]
pub struct FanoutSink {
    sinks: Vec<Arc<dyn NotificationSink>>,
}

impl FanoutSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, sink: Arc<dyn NotificationSink>) -> Self {
        self.sinks.push(sink);
        self
    }
}

#[async_trait]
impl NotificationSink for FanoutSink {
    async fn send(&self, event: &WorkflowEvent) -> Result<(), SinkError> {
        let mut failures = Vec::new();
        for sink in &self.sinks {
            if let Err(e) = sink.send(event).await {
                failures.push(e.0);
            }
        }
        if failures.is_empty() {
            Ok(())
        } else {
            Err(SinkError(failures.join("; ")))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::sync::mpsc::unbounded_channel;

    #[tokio::test]
    async fn test_channel_sink_forwards() {
        let (tx, mut rx) = unbounded_channel();
        let sink: Arc<dyn NotificationSink> = Arc::new(ChannelSink::new(tx));

        notify(&sink, WorkflowEvent::step_started("wf", "s1")).await;

        match rx.recv().await.unwrap() {
            WorkflowEvent::StepStarted { instance_id, step_id, .. } => {
                assert_eq!(instance_id, "wf");
                assert_eq!(step_id, "s1");
            }
            other => panic!("unexpected event {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_closed_channel_is_swallowed() {
        let (tx, rx) = unbounded_channel();
        drop(rx);
        let sink: Arc<dyn NotificationSink> = Arc::new(ChannelSink::new(tx));

        // Must not panic or return anything.
        notify(&sink, WorkflowEvent::workflow_status("wf", WorkflowStatus::Completed)).await;
        assert!(sink
            .send(&WorkflowEvent::workflow_status("wf", WorkflowStatus::Failed))
            .await
            .is_err());
    }

    #[tokio::test]
    async fn test_fanout_reaches_healthy_sinks() {
        let (dead_tx, dead_rx) = unbounded_channel();
        drop(dead_rx);
        let (tx, mut rx) = unbounded_channel();

        let sink = FanoutSink::new()
            .with(Arc::new(ChannelSink::new(dead_tx)))
            .with(Arc::new(LogSink))
            .with(Arc::new(ChannelSink::new(tx)));

        let result = sink
            .send(&WorkflowEvent::step_finished("wf", "s1", StepStatus::Completed))
            .await;
        assert!(result.is_err());
        assert!(rx.recv().await.is_some());
    }

    #[test]
    fn test_event_serializes_with_tag() {
        let event = WorkflowEvent::workflow_status("wf", WorkflowStatus::Paused);
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["event"], "workflow_status_changed");
        assert_eq!(json["status"], "paused");
    }
}
