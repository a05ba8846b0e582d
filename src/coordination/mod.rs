//! Cross-Capability Coordination
//!
//! Entry points that call capabilities directly instead of through a
//! workflow template.
//!
//! - [`consensus`]: Confidence-weighted voting across capabilities
//! - [`handoff`]: Transfer of an interaction between capabilities
//! - [`multi`]: One unit of work run across several capabilities

pub mod consensus;
pub mod handoff;
pub mod multi;

pub use consensus::{aggregate, ConsensusEngine, ConsensusOutcome, Decision};
pub use handoff::{HandoffCoordinator, HandoffRecord, HandoffStatus};
pub use multi::{CoordinationResult, CoordinationStatus, Coordinator};
