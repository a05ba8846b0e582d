//! Consensus Engine
//!
//! Asks several capabilities for an independent decision and combines the
//! answers by confidence-weighted vote.
//!
//! # Scoring
//!
//! Decisions are grouped by `choice`. A group's weight is the sum of its
//! members' confidence; the heaviest group wins, ties going to the choice
//! seen first. The consensus score is the winner's share of the total
//! confidence, and consensus is reached when it meets the threshold.
//!
//! # Example
//!
//! ```rust
//! use indexmap::IndexMap;
//! use sellerflow::coordination::{aggregate, Decision};
//!
//! let mut decisions = IndexMap::new();
//! decisions.insert("market".to_string(), Decision::new("approve", 0.9));
//! decisions.insert("executive".to_string(), Decision::new("approve", 0.8));
//!
//! let outcome = aggregate(decisions, 0.7);
//! assert!(outcome.consensus_reached);
//! assert_eq!(outcome.final_decision, "approve");
//! ```

use std::sync::Arc;
use std::time::Duration;

use indexmap::IndexMap;
use log::{debug, info, warn};
use serde::{Deserialize, Serialize};
use tokio::time::timeout;

use crate::capability::CommandTable;
use crate::workflow::Context;

/// Operation every voting capability answers to.
pub const DECIDE_OPERATION: &str = "decide";

/// Choice recorded for a capability that could not produce a decision.
pub const ABSTAIN: &str = "abstain";

/// Final decision when the winning share is below the threshold.
pub const NO_CONSENSUS: &str = "no_consensus";

pub const DEFAULT_CONSENSUS_THRESHOLD: f64 = 0.7;

/// Upper bound on how long a single capability may take to vote.
pub const DEFAULT_DECISION_TIMEOUT_SECS: u64 = 30;

/// One capability's vote.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct Decision {
    pub choice: String,

    /// Clamped to `[0, 1]` when read from a capability response
    pub confidence: f64,

    #[serde(default)]
    pub rationale: String,
}

impl Decision {
    pub fn new(choice: impl Into<String>, confidence: f64) -> Self {
        Self {
            choice: choice.into(),
            confidence: clamp_confidence(confidence),
            rationale: String::new(),
        }
    }

    pub fn with_rationale(mut self, rationale: impl Into<String>) -> Self {
        self.rationale = rationale.into();
        self
    }

    /// The vote recorded for a capability that failed to answer.
    pub fn abstain(reason: impl Into<String>) -> Self {
        Self::new(ABSTAIN, 0.0).with_rationale(reason)
    }
}

/// Result of a consensus round.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct ConsensusOutcome {
    /// Winning choice, or `"no_consensus"`
    pub final_decision: String,
    pub consensus_reached: bool,
    pub consensus_score: f64,

    /// Summed confidence per choice, in first-seen order
    pub weighted_scores: IndexMap<String, f64>,

    /// Every vote, keyed by capability
    pub decisions: IndexMap<String, Decision>,
}

impl ConsensusOutcome {
    /// Outcome of a round nobody took part in.
    pub fn no_consensus() -> Self {
        Self {
            final_decision: NO_CONSENSUS.to_string(),
            consensus_reached: false,
            consensus_score: 0.0,
            weighted_scores: IndexMap::new(),
            decisions: IndexMap::new(),
        }
    }
}

/// Combines collected votes into an outcome.
pub fn aggregate(decisions: IndexMap<String, Decision>, threshold: f64) -> ConsensusOutcome {
    let mut weighted_scores: IndexMap<String, f64> = IndexMap::new();
    for decision in decisions.values() {
        *weighted_scores.entry(decision.choice.clone()).or_insert(0.0) += decision.confidence;
    }

    let total: f64 = weighted_scores.values().sum();

    // Strict comparison keeps the earliest choice on ties.
    let mut winner: Option<(&String, f64)> = None;
    for (choice, &score) in &weighted_scores {
        if winner.map_or(true, |(_, best)| score > best) {
            winner = Some((choice, score));
        }
    }

    let Some((choice, score)) = winner else {
        return ConsensusOutcome {
            decisions,
            ..ConsensusOutcome::no_consensus()
        };
    };

    let consensus_score = if total > 0.0 { score / total } else { 0.0 };
    let consensus_reached = total > 0.0 && consensus_score >= threshold;
    let final_decision = if consensus_reached {
        choice.clone()
    } else {
        NO_CONSENSUS.to_string()
    };

    ConsensusOutcome {
        final_decision,
        consensus_reached,
        consensus_score,
        weighted_scores,
        decisions,
    }
}

/// Collects decisions from capabilities through the command table.
#[derive(Clone, Debug)]
pub struct ConsensusEngine {
    commands: Arc<CommandTable>,
    threshold: f64,
    decision_timeout: Duration,
}

impl ConsensusEngine {
    pub fn new(commands: Arc<CommandTable>) -> Self {
        Self {
            commands,
            threshold: DEFAULT_CONSENSUS_THRESHOLD,
            decision_timeout: Duration::from_secs(DEFAULT_DECISION_TIMEOUT_SECS),
        }
    }

    pub fn with_threshold(mut self, threshold: f64) -> Self {
        self.threshold = threshold;
        self
    }

    pub fn with_decision_timeout(mut self, decision_timeout: Duration) -> Self {
        self.decision_timeout = decision_timeout;
        self
    }

    pub fn threshold(&self) -> f64 {
        self.threshold
    }

    /// Runs a round with the configured threshold.
    pub async fn decide(&self, context: &Context, capabilities: &[String]) -> ConsensusOutcome {
        self.decide_with_threshold(context, capabilities, self.threshold)
            .await
    }

    /// Runs a round. Capabilities are asked in the given order; a repeated
    /// capability only votes once.
    pub async fn decide_with_threshold(
        &self,
        context: &Context,
        capabilities: &[String],
        threshold: f64,
    ) -> ConsensusOutcome {
        let mut decisions = IndexMap::new();

        for capability in capabilities {
            if decisions.contains_key(capability) {
                continue;
            }
            let decision = self.collect(capability, context).await;
            debug!(
                "{} voted '{}' ({:.2})",
                capability, decision.choice, decision.confidence
            );
            decisions.insert(capability.clone(), decision);
        }

        let outcome = aggregate(decisions, threshold);
        info!(
            "Consensus among {} capabilities: '{}' (score {:.3}, threshold {:.2})",
            outcome.decisions.len(),
            outcome.final_decision,
            outcome.consensus_score,
            threshold
        );
        outcome
    }

    /// Asks one capability for its vote, abstaining on any failure.
    async fn collect(&self, capability: &str, context: &Context) -> Decision {
        let call = self
            .commands
            .invoke(capability, DECIDE_OPERATION, context.clone());

        let response = match timeout(self.decision_timeout, call).await {
            Ok(Ok(value)) => value,
            Ok(Err(e)) => {
                warn!("{} could not decide: {}", capability, e);
                return Decision::abstain(e.to_string());
            }
            Err(_) => {
                warn!("{} did not decide within {:?}", capability, self.decision_timeout);
                return Decision::abstain("decision timed out");
            }
        };

        match serde_json::from_value::<Decision>(response) {
            Ok(decision) => Decision {
                confidence: clamp_confidence(decision.confidence),
                ..decision
            },
            Err(e) => {
                warn!("{} returned an unreadable decision: {}", capability, e);
                Decision::abstain(format!("invalid decision: {}", e))
            }
        }
    }
}

fn clamp_confidence(confidence: f64) -> f64 {
    if confidence.is_nan() {
        0.0
    } else {
        confidence.clamp(0.0, 1.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::CapabilityError;
    use serde_json::json;

    fn votes(entries: &[(&str, &str, f64)]) -> IndexMap<String, Decision> {
        entries
            .iter()
            .map(|(cap, choice, conf)| (cap.to_string(), Decision::new(*choice, *conf)))
            .collect()
    }

    fn caps(names: &[&str]) -> Vec<String> {
        names.iter().map(|n| n.to_string()).collect()
    }

    #[test]
    fn test_split_vote_below_threshold() {
        let outcome = aggregate(
            votes(&[("a", "approve", 0.9), ("b", "approve", 0.8), ("c", "reject", 0.85)]),
            0.7,
        );

        assert!(!outcome.consensus_reached);
        assert_eq!(outcome.final_decision, "no_consensus");
        assert!((outcome.weighted_scores["approve"] - 1.7).abs() < 1e-9);
        assert!((outcome.weighted_scores["reject"] - 0.85).abs() < 1e-9);
        assert!((outcome.consensus_score - 1.7 / 2.55).abs() < 1e-9);
    }

    #[test]
    fn test_clear_majority_reaches_consensus() {
        let outcome = aggregate(
            votes(&[("a", "approve", 0.9), ("b", "approve", 0.8), ("c", "reject", 0.3)]),
            0.7,
        );
        assert!(outcome.consensus_reached);
        assert_eq!(outcome.final_decision, "approve");
    }

    #[test]
    fn test_tie_goes_to_first_choice() {
        let outcome = aggregate(votes(&[("a", "reject", 0.5), ("b", "approve", 0.5)]), 0.5);
        assert!(outcome.consensus_reached);
        assert_eq!(outcome.final_decision, "reject");
    }

    #[test]
    fn test_zero_confidence_scores_zero() {
        let outcome = aggregate(votes(&[("a", "approve", 0.0), ("b", "abstain", 0.0)]), 0.0);
        assert_eq!(outcome.consensus_score, 0.0);
        assert!(!outcome.consensus_reached);
        assert_eq!(outcome.final_decision, "no_consensus");
    }

    #[test]
    fn test_empty_round() {
        let outcome = aggregate(IndexMap::new(), 0.7);
        assert_eq!(outcome, ConsensusOutcome::no_consensus());
    }

    #[test]
    fn test_confidence_is_clamped() {
        assert_eq!(Decision::new("x", 1.7).confidence, 1.0);
        assert_eq!(Decision::new("x", -0.2).confidence, 0.0);
        assert_eq!(Decision::new("x", f64::NAN).confidence, 0.0);
    }

    #[tokio::test]
    async fn test_failing_capabilities_abstain() {
        let table = CommandTable::new()
            .with("market", DECIDE_OPERATION, |_: Context| async {
                Ok::<_, CapabilityError>(json!({
                    "choice": "approve",
                    "confidence": 0.9,
                    "rationale": "demand is strong",
                }))
            })
            .with("content", DECIDE_OPERATION, |_: Context| async {
                Err::<serde_json::Value, _>(CapabilityError::failed("model offline"))
            })
            .with("executive", DECIDE_OPERATION, |_: Context| async {
                Ok::<_, CapabilityError>(json!("yes please"))
            });
        let engine = ConsensusEngine::new(Arc::new(table));

        let outcome = engine
            .decide(&Context::new(), &caps(&["market", "content", "executive", "logistics"]))
            .await;

        assert_eq!(outcome.decisions.len(), 4);
        assert_eq!(outcome.decisions["market"].rationale, "demand is strong");
        for abstained in ["content", "executive", "logistics"] {
            assert_eq!(outcome.decisions[abstained].choice, ABSTAIN);
            assert_eq!(outcome.decisions[abstained].confidence, 0.0);
        }
        assert!(outcome.consensus_reached);
        assert_eq!(outcome.final_decision, "approve");
        assert_eq!(outcome.consensus_score, 1.0);
    }

    #[tokio::test]
    async fn test_threshold_override_and_clamping() {
        let table = CommandTable::new()
            .with("market", DECIDE_OPERATION, |_: Context| async {
                Ok::<_, CapabilityError>(json!({ "choice": "approve", "confidence": 3.0 }))
            })
            .with("executive", DECIDE_OPERATION, |_: Context| async {
                Ok::<_, CapabilityError>(json!({ "choice": "reject", "confidence": 1.0 }))
            });
        let engine = ConsensusEngine::new(Arc::new(table)).with_threshold(0.4);

        let outcome = engine.decide(&Context::new(), &caps(&["market", "executive"])).await;
        assert_eq!(outcome.decisions["market"].confidence, 1.0);
        assert_eq!(outcome.consensus_score, 0.5);
        assert_eq!(outcome.final_decision, "approve");

        let strict = engine
            .decide_with_threshold(&Context::new(), &caps(&["market", "executive"]), 0.9)
            .await;
        assert_eq!(strict.final_decision, NO_CONSENSUS);
    }

    #[tokio::test(start_paused = true)]
    async fn test_slow_capability_abstains() {
        let table = CommandTable::new().with("market", DECIDE_OPERATION, |_: Context| async {
            tokio::time::sleep(Duration::from_secs(120)).await;
            Ok::<_, CapabilityError>(json!({ "choice": "approve", "confidence": 1.0 }))
        });
        let engine = ConsensusEngine::new(Arc::new(table))
            .with_decision_timeout(Duration::from_secs(5));

        let outcome = engine.decide(&Context::new(), &caps(&["market"])).await;
        assert_eq!(outcome.decisions["market"].choice, ABSTAIN);
        assert!(!outcome.consensus_reached);
    }
}
