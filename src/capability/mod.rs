//! Capability Bindings
//!
//! Capabilities are the external providers (market analysis, content,
//! logistics, executive decisions) the engine calls into. The engine only
//! sees them through the [`CommandTable`].
//!
//! - [`table`]: `(capability, operation)` → handler table
//! - [`loopback`]: echoing provider for local runs

pub mod loopback;
pub mod table;

pub use loopback::{bind_loopback, LoopbackCapability};
pub use table::{Capability, CommandTable, OperationHandler};
