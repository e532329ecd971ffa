//! Structural validation of authored workflows.
//!
//! [`validate`] runs five ordered checks over a [`Workflow`] and reports
//! *every* violation it finds instead of stopping at the first, because the
//! authoring UI highlights all problems at once. The checks:
//!
//! 1. every connection endpoint resolves to an existing block id
//! 2. block ids are unique
//! 3. Goal blocks have no inbound execution connection; Exit blocks have no
//!    outbound execution connection
//! 4. the execution-flow subgraph contains a Goal and a terminal (Exit or
//!    Human-Verification), and some Goal reaches some terminal
//! 5. the execution-flow subgraph is acyclic (data edges are exempt: they
//!    may legally form feedback loops for iterative Reasoning blocks)
//!
//! Connections with dangling endpoints are reported by check 1 and excluded
//! from the graph walks of checks 3 to 5.

use std::fmt;

use miette::Diagnostic;
use rustc_hash::{FxHashMap, FxHashSet};
use thiserror::Error;

use crate::graph::workflow::Workflow;
use crate::types::BlockType;

/// Which end of a connection a violation concerns.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Endpoint {
    Source,
    Target,
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Endpoint::Source => f.write_str("source"),
            Endpoint::Target => f.write_str("target"),
        }
    }
}

/// One structural violation. Reported in bulk, never raised mid-run.
#[derive(Clone, Debug, Error, Diagnostic, PartialEq)]
pub enum ValidationError {
    /// A connection endpoint references a block id that does not exist.
    #[error("connection {connection_id:?}: {endpoint} block {block_id:?} does not exist")]
    #[diagnostic(code(reasonflow::validate::dangling_endpoint))]
    DanglingEndpoint {
        connection_id: String,
        endpoint: Endpoint,
        block_id: String,
    },

    /// The same block id appears more than once.
    #[error("duplicate block id {block_id:?} ({count} occurrences)")]
    #[diagnostic(code(reasonflow::validate::duplicate_block_id))]
    DuplicateBlockId { block_id: String, count: usize },

    /// A Goal block has an inbound execution connection.
    #[error("goal block {block_id:?} has inbound execution connection {connection_id:?}")]
    #[diagnostic(
        code(reasonflow::validate::goal_inbound),
        help("goal blocks start the walk; nothing may flow into them")
    )]
    GoalHasInboundExecution {
        block_id: String,
        connection_id: String,
    },

    /// An Exit block has an outbound execution connection.
    #[error("exit block {block_id:?} has outbound execution connection {connection_id:?}")]
    #[diagnostic(
        code(reasonflow::validate::exit_outbound),
        help("exit blocks end the walk; nothing may flow out of them")
    )]
    ExitHasOutboundExecution {
        block_id: String,
        connection_id: String,
    },

    /// The workflow has no Goal block at all.
    #[error("workflow has no goal block")]
    #[diagnostic(code(reasonflow::validate::missing_goal))]
    MissingGoal,

    /// The workflow has neither an Exit nor a Human-Verification block.
    #[error("workflow has no exit or human_verification block")]
    #[diagnostic(code(reasonflow::validate::missing_terminal))]
    MissingTerminal,

    /// Goals and terminals both exist, but no goal reaches a terminal on the
    /// execution flow.
    #[error("no goal reaches an exit or human_verification block on the execution flow")]
    #[diagnostic(code(reasonflow::validate::no_path_to_terminal))]
    NoPathToTerminal,

    /// The execution-flow subgraph contains a cycle.
    #[error("execution-flow cycle: {}", path.join(" -> "))]
    #[diagnostic(
        code(reasonflow::validate::execution_cycle),
        help("iterative feedback belongs on data connections, which are exempt")
    )]
    ExecutionCycle { path: Vec<String> },
}

/// The outcome of [`validate`]: every violation found, in check order.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct ValidationReport {
    pub errors: Vec<ValidationError>,
}

impl ValidationReport {
    /// Returns `true` when no violations were found.
    #[must_use]
    pub fn is_valid(&self) -> bool {
        self.errors.is_empty()
    }

    /// Number of violations.
    #[must_use]
    pub fn len(&self) -> usize {
        self.errors.len()
    }

    /// Returns `true` when the report carries no errors.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.errors.is_empty()
    }
}

impl fmt::Display for ValidationReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.errors.is_empty() {
            return f.write_str("workflow is structurally valid");
        }
        writeln!(f, "{} validation error(s):", self.errors.len())?;
        for err in &self.errors {
            writeln!(f, "  - {err}")?;
        }
        Ok(())
    }
}

/// Runs all structural checks over a workflow. Pure; the workflow is never
/// mutated and every violation is collected.
#[must_use]
pub fn validate(workflow: &Workflow) -> ValidationReport {
    let mut errors = Vec::new();

    let known_ids: FxHashSet<&str> = workflow.blocks.iter().map(|b| b.id.as_str()).collect();
    let block_types: FxHashMap<&str, BlockType> = workflow
        .blocks
        .iter()
        .map(|b| (b.id.as_str(), b.block_type))
        .collect();

    // Check 1: connection endpoints resolve.
    for conn in &workflow.connections {
        if !known_ids.contains(conn.source_block_id.as_str()) {
            errors.push(ValidationError::DanglingEndpoint {
                connection_id: conn.id.clone(),
                endpoint: Endpoint::Source,
                block_id: conn.source_block_id.clone(),
            });
        }
        if !known_ids.contains(conn.target_block_id.as_str()) {
            errors.push(ValidationError::DanglingEndpoint {
                connection_id: conn.id.clone(),
                endpoint: Endpoint::Target,
                block_id: conn.target_block_id.clone(),
            });
        }
    }

    // Check 2: block ids are unique. Counted first, reported in declaration
    // order so the report is stable.
    let mut counts: FxHashMap<&str, usize> = FxHashMap::default();
    for block in &workflow.blocks {
        *counts.entry(block.id.as_str()).or_default() += 1;
    }
    let mut reported: FxHashSet<&str> = FxHashSet::default();
    for block in &workflow.blocks {
        let count = counts[block.id.as_str()];
        if count > 1 && reported.insert(block.id.as_str()) {
            errors.push(ValidationError::DuplicateBlockId {
                block_id: block.id.clone(),
                count,
            });
        }
    }

    // Only connections with two resolvable endpoints participate in the
    // graph walks below.
    let resolved_execution: Vec<_> = workflow
        .connections
        .iter()
        .filter(|c| {
            c.kind.is_execution()
                && known_ids.contains(c.source_block_id.as_str())
                && known_ids.contains(c.target_block_id.as_str())
        })
        .collect();

    // Check 3: Goal/Exit degree rules on the execution flow.
    for conn in &resolved_execution {
        if block_types[conn.target_block_id.as_str()].is_goal() {
            errors.push(ValidationError::GoalHasInboundExecution {
                block_id: conn.target_block_id.clone(),
                connection_id: conn.id.clone(),
            });
        }
        if block_types[conn.source_block_id.as_str()].is_exit() {
            errors.push(ValidationError::ExitHasOutboundExecution {
                block_id: conn.source_block_id.clone(),
                connection_id: conn.id.clone(),
            });
        }
    }

    // Adjacency over the execution subgraph, declaration order preserved.
    let mut adjacency: FxHashMap<&str, Vec<&str>> = FxHashMap::default();
    for conn in &resolved_execution {
        adjacency
            .entry(conn.source_block_id.as_str())
            .or_default()
            .push(conn.target_block_id.as_str());
    }

    // Check 4: a goal exists, a terminal exists, and some goal reaches some
    // terminal.
    let goals: Vec<&str> = workflow
        .blocks
        .iter()
        .filter(|b| b.block_type.is_goal())
        .map(|b| b.id.as_str())
        .collect();
    let has_terminal = workflow.blocks.iter().any(|b| b.block_type.is_terminal());

    if goals.is_empty() {
        errors.push(ValidationError::MissingGoal);
    }
    if !has_terminal {
        errors.push(ValidationError::MissingTerminal);
    }
    if !goals.is_empty() && has_terminal {
        let mut reached: FxHashSet<&str> = goals.iter().copied().collect();
        let mut frontier: Vec<&str> = goals.clone();
        while let Some(current) = frontier.pop() {
            if let Some(next) = adjacency.get(current) {
                for &target in next {
                    if reached.insert(target) {
                        frontier.push(target);
                    }
                }
            }
        }
        let terminal_reached = reached
            .iter()
            .any(|id| block_types.get(id).is_some_and(BlockType::is_terminal));
        if !terminal_reached {
            errors.push(ValidationError::NoPathToTerminal);
        }
    }

    // Check 5: the execution subgraph is acyclic.
    for path in find_execution_cycles(workflow, &adjacency) {
        errors.push(ValidationError::ExecutionCycle { path });
    }

    ValidationReport { errors }
}

#[derive(Clone, Copy, PartialEq, Eq)]
enum Color {
    White,
    Gray,
    Black,
}

/// Iterative colored DFS over the execution subgraph. Each back edge yields
/// one cycle path, closed on itself for readable reporting.
fn find_execution_cycles(
    workflow: &Workflow,
    adjacency: &FxHashMap<&str, Vec<&str>>,
) -> Vec<Vec<String>> {
    let mut color: FxHashMap<&str, Color> = workflow
        .blocks
        .iter()
        .map(|b| (b.id.as_str(), Color::White))
        .collect();
    let mut cycles = Vec::new();

    for start in workflow.blocks.iter().map(|b| b.id.as_str()) {
        if color.get(start) != Some(&Color::White) {
            continue;
        }
        color.insert(start, Color::Gray);
        let mut stack: Vec<(&str, usize)> = vec![(start, 0)];

        while let Some(frame) = stack.last_mut() {
            let node = frame.0;
            let children = adjacency.get(node).map(Vec::as_slice).unwrap_or(&[]);
            if frame.1 < children.len() {
                let child = children[frame.1];
                frame.1 += 1;
                match color.get(child).copied().unwrap_or(Color::White) {
                    Color::White => {
                        color.insert(child, Color::Gray);
                        stack.push((child, 0));
                    }
                    Color::Gray => {
                        let from = stack
                            .iter()
                            .position(|(n, _)| *n == child)
                            .unwrap_or(stack.len() - 1);
                        let mut path: Vec<String> =
                            stack[from..].iter().map(|(n, _)| (*n).to_string()).collect();
                        path.push(child.to_string());
                        cycles.push(path);
                    }
                    Color::Black => {}
                }
            } else {
                color.insert(node, Color::Black);
                stack.pop();
            }
        }
    }
    cycles
}
