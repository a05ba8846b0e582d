//! Progress Monitoring Module
//!
//! Provides the notification sinks the engine reports progress to, and an
//! execution timeline built on top of them.
//!
//! # Components
//!
//! - [`NotificationSink`]: fire-and-forget receiver of [`WorkflowEvent`]s
//! - [`ExecutionTimeline`]: step start/end timing for Gantt charts

pub mod events;
pub mod timeline;

pub use events::{notify, ChannelSink, FanoutSink, LogSink, NotificationSink, NullSink, WorkflowEvent};
pub use timeline::{EventType, ExecutionTimeline, TimelineEvent};
