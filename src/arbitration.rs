//! Gateway arbitration: choosing one execution branch from scored candidates.
//!
//! A Gateway block's executor scores each outgoing branch; arbitration turns
//! those scores into a single [`ArbitrationDecision`]. Selection is fully
//! deterministic: the highest score wins, and a tie goes to the branch whose
//! connection was declared first. The configured [`ArbitrationStrategy`]
//! names how the *scores were produced* (rules, a model, or both), never how
//! the winner is picked.
//!
//! Branches with no reported score are treated as scoring `0.0`, so an
//! executor that only scores the branches it considered still produces a
//! complete decision card.

use std::fmt;
use std::str::FromStr;

use miette::Diagnostic;
use rustc_hash::FxHashMap;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::graph::properties::{BlockProperties, DEFAULT_CONFIDENCE_THRESHOLD};
use crate::graph::{Block, Connection};

/// How a Gateway produces its branch scores.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ArbitrationStrategy {
    /// Scores come from declarative rules evaluated by the executor.
    #[default]
    RuleBased,
    /// Scores come from a model call.
    LlmDecision,
    /// Rules first, with a model consulted for the contested branches.
    Hybrid,
}

impl ArbitrationStrategy {
    /// Canonical lowercase name, matching the persisted form.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            ArbitrationStrategy::RuleBased => "rule_based",
            ArbitrationStrategy::LlmDecision => "llm_decision",
            ArbitrationStrategy::Hybrid => "hybrid",
        }
    }
}

impl fmt::Display for ArbitrationStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Error for strings that name no known arbitration strategy.
#[derive(Clone, Debug, Error, Diagnostic, PartialEq, Eq)]
#[error("unknown arbitration strategy {found:?}")]
#[diagnostic(
    code(reasonflow::arbitration::unknown_strategy),
    help("expected one of: rule_based, llm_decision, hybrid")
)]
pub struct UnknownArbitrationStrategy {
    pub found: String,
}

impl FromStr for ArbitrationStrategy {
    type Err = UnknownArbitrationStrategy;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "rule_based" => Ok(ArbitrationStrategy::RuleBased),
            "llm_decision" => Ok(ArbitrationStrategy::LlmDecision),
            "hybrid" => Ok(ArbitrationStrategy::Hybrid),
            other => Err(UnknownArbitrationStrategy {
                found: other.to_string(),
            }),
        }
    }
}

/// One scored branch of a gateway, identified by its connection.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BranchScore {
    pub connection_id: String,
    pub target_block_id: String,
    pub score: f64,
}

/// The record of one gateway decision: what won, what lost, and why.
///
/// Decision cards are embedded in the event trace so a reviewer can audit
/// every fork the run took.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ArbitrationDecision {
    /// The gateway block that forked.
    pub block_id: String,
    /// How the scores were produced.
    pub strategy: ArbitrationStrategy,
    /// The winning branch.
    pub chosen: BranchScore,
    /// Losing branches, in declaration order.
    pub alternatives: Vec<BranchScore>,
    /// Free-form evidence strings the executor attached to its result.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub evidence: Vec<String>,
}

/// Every candidate scored below the gateway's confidence threshold: the
/// gateway refuses to guess and hands the failure to recovery.
#[derive(Clone, Debug, Error, Diagnostic, PartialEq)]
#[error(
    "gateway {block_id:?}: best branch {target_block_id:?} scored {score:.3}, below threshold {threshold:.3}"
)]
#[diagnostic(
    code(reasonflow::arbitration::ambiguous),
    help("lower the gateway's confidenceThreshold or improve the branch scores")
)]
pub struct ArbitrationAmbiguity {
    pub block_id: String,
    /// The best-scoring branch, still under threshold.
    pub target_block_id: String,
    pub score: f64,
    pub threshold: f64,
    /// Every scored candidate, in declaration order, for the audit trail.
    pub candidates: Vec<BranchScore>,
}

/// Why a gateway could not commit to a branch.
#[derive(Clone, Debug, Error, Diagnostic, PartialEq)]
pub enum ArbitrationError {
    /// The gateway has no outgoing execution connections to choose from.
    #[error("gateway {block_id:?} has no outgoing execution connections")]
    #[diagnostic(
        code(reasonflow::arbitration::no_candidates),
        help("connect the gateway to at least one downstream block")
    )]
    NoCandidates { block_id: String },

    /// No branch met the threshold.
    #[error(transparent)]
    #[diagnostic(transparent)]
    Ambiguous(#[from] ArbitrationAmbiguity),
}

/// Picks the winning branch for a gateway.
///
/// `candidates` are the gateway's outgoing execution connections in
/// declaration order; `scores` maps target block ids to the executor's
/// branch scores (missing entries score `0.0`). The winner must meet the
/// gateway's confidence threshold, otherwise the gateway fails and recovery
/// takes over.
pub fn arbitrate(
    gateway: &Block,
    candidates: &[&Connection],
    scores: &FxHashMap<String, f64>,
    evidence: Vec<String>,
) -> Result<ArbitrationDecision, ArbitrationError> {
    let (threshold, strategy) = match &gateway.properties {
        BlockProperties::Gateway(props) => (props.confidence_threshold, props.strategy),
        _ => (DEFAULT_CONFIDENCE_THRESHOLD, ArbitrationStrategy::default()),
    };

    let scored: Vec<BranchScore> = candidates
        .iter()
        .map(|conn| BranchScore {
            connection_id: conn.id.clone(),
            target_block_id: conn.target_block_id.clone(),
            score: scores
                .get(conn.target_block_id.as_str())
                .copied()
                .unwrap_or(0.0),
        })
        .collect();

    // Strict comparison keeps the first declared branch on ties.
    let winner_idx = scored
        .iter()
        .enumerate()
        .fold(None::<(usize, f64)>, |best, (idx, branch)| match best {
            Some((_, best_score)) if branch.score <= best_score => best,
            _ => Some((idx, branch.score)),
        })
        .map(|(idx, _)| idx)
        .ok_or_else(|| ArbitrationError::NoCandidates {
            block_id: gateway.id.clone(),
        })?;

    let chosen = scored[winner_idx].clone();
    if chosen.score < threshold {
        return Err(ArbitrationAmbiguity {
            block_id: gateway.id.clone(),
            target_block_id: chosen.target_block_id,
            score: chosen.score,
            threshold,
            candidates: scored,
        }
        .into());
    }

    let alternatives: Vec<BranchScore> = scored
        .into_iter()
        .enumerate()
        .filter(|(idx, _)| *idx != winner_idx)
        .map(|(_, branch)| branch)
        .collect();

    tracing::debug!(
        gateway = %gateway.id,
        chosen = %chosen.target_block_id,
        score = chosen.score,
        %strategy,
        "gateway arbitration"
    );

    Ok(ArbitrationDecision {
        block_id: gateway.id.clone(),
        strategy,
        chosen,
        alternatives,
        evidence,
    })
}
