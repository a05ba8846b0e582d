//! Execution Timeline
//!
//! A notification sink that records step start/finish events and renders
//! them as an ASCII Gantt chart.

use std::sync::{Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use super::events::{NotificationSink, WorkflowEvent};
use crate::error::SinkError;
use crate::workflow::StepStatus;

/// Chart width in characters.
const CHART_WIDTH: f64 = 50.0;

/// Kind of timeline entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventType {
    Started,
    Finished(StepStatus),
}

/// A single step event.
#[derive(Debug, Clone, PartialEq)]
pub struct TimelineEvent {
    pub instance_id: String,
    pub step_id: String,
    pub event_type: EventType,
    pub timestamp: DateTime<Utc>,
}

/// Records step timings as they are reported by the engine.
#[derive(Debug, Default)]
pub struct ExecutionTimeline {
    events: Mutex<Vec<TimelineEvent>>,
}

impl ExecutionTimeline {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Vec<TimelineEvent>> {
        self.events.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Records an event.
    pub fn add_event(&self, event: TimelineEvent) {
        self.lock().push(event);
    }

    /// Returns all recorded events in arrival order.
    pub fn events(&self) -> Vec<TimelineEvent> {
        self.lock().clone()
    }

    /// Events belonging to one workflow instance.
    pub fn events_for(&self, instance_id: &str) -> Vec<TimelineEvent> {
        self.lock()
            .iter()
            .filter(|e| e.instance_id == instance_id)
            .cloned()
            .collect()
    }

    /// Renders an ASCII Gantt chart of an instance's steps.
    pub fn gantt_chart(&self, instance_id: &str) -> String {
        let mut output = String::from("\nExecution Timeline:\n\n");
        let events = self.events_for(instance_id);

        let (Some(first), Some(last)) = (events.first(), events.last()) else {
            return output;
        };
        let origin = first.timestamp;
        let total_ms = (last.timestamp - origin).num_milliseconds().max(1);
        let scale = CHART_WIDTH / total_ms as f64;

        let mut spans: Vec<(String, i64, i64, Option<StepStatus>)> = Vec::new();
        for event in &events {
            let offset = (event.timestamp - origin).num_milliseconds();
            match event.event_type {
                EventType::Started => spans.push((event.step_id.clone(), offset, offset, None)),
                EventType::Finished(status) => {
                    if let Some(span) = spans
                        .iter_mut()
                        .rev()
                        .find(|(id, _, _, done)| *id == event.step_id && done.is_none())
                    {
                        span.2 = offset;
                        span.3 = Some(status);
                    } else {
                        // Skipped steps never start.
                        spans.push((event.step_id.clone(), offset, offset, Some(status)));
                    }
                }
            }
        }

        for (step_id, start, end, status) in spans {
            let start_pos = (start as f64 * scale) as usize;
            let width = ((end - start) as f64 * scale).max(1.0) as usize;
            let fill = match status {
                Some(StepStatus::Failed) => "x",
                Some(StepStatus::Skipped) => "-",
                _ => "#",
            };
            output.push_str(&format!(
                "{:16} |{}{}| ({} ms)\n",
                truncate(&step_id, 16),
                " ".repeat(start_pos),
                fill.repeat(width),
                end - start
            ));
        }

        output.push_str(&format!("\nTotal: {} ms\n", total_ms));
        output
    }
}

#[async_trait]
impl NotificationSink for ExecutionTimeline {
    async fn send(&self, event: &WorkflowEvent) -> Result<(), SinkError> {
        match event {
            WorkflowEvent::StepStarted { instance_id, step_id, timestamp } => {
                self.add_event(TimelineEvent {
                    instance_id: instance_id.clone(),
                    step_id: step_id.clone(),
                    event_type: EventType::Started,
                    timestamp: *timestamp,
                })
            }
            WorkflowEvent::StepFinished { instance_id, step_id, status, timestamp } => {
                self.add_event(TimelineEvent {
                    instance_id: instance_id.clone(),
                    step_id: step_id.clone(),
                    event_type: EventType::Finished(*status),
                    timestamp: *timestamp,
                })
            }
            _ => {}
        }
        Ok(())
    }
}

/// Pads or truncates a label to `max_len` characters.
fn truncate(s: &str, max_len: usize) -> String {
    if s.chars().count() <= max_len {
        format!("{:width$}", s, width = max_len)
    } else {
        let head: String = s.chars().take(max_len - 3).collect();
        format!("{}...", head)
    }
}
