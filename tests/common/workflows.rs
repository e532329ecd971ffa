use reasonflow::graph::properties::{BlockProperties, GatewayProperties};
use reasonflow::graph::{Block, Workflow, WorkflowBuilder};
use reasonflow::recovery::RecoveryPolicy;
use reasonflow::types::BlockType;

/// goal -> work (reasoning) -> done.
#[allow(dead_code)]
pub fn linear() -> Workflow {
    linear_with(|b| b)
}

/// The linear workflow with the "work" block refined by `configure`.
#[allow(dead_code)]
pub fn linear_with(configure: impl FnOnce(Block) -> Block) -> Workflow {
    WorkflowBuilder::new("linear")
        .goal("goal", "Do the thing")
        .block_with("work", BlockType::Reasoning, "Work", configure)
        .exit("done", "Done")
        .connect("goal", "work")
        .connect("work", "done")
        .build()
}

/// goal -> draft (reasoning) -> done, plus an off-path canned (fallback)
/// block also wired to done. `policy` goes on draft.
#[allow(dead_code)]
pub fn with_fallback_path(policy: RecoveryPolicy) -> Workflow {
    WorkflowBuilder::new("fallback")
        .goal("goal", "Answer")
        .block_with("draft", BlockType::Reasoning, "Draft", |b| {
            b.with_recovery(policy)
        })
        .block_with("canned", BlockType::Fallback, "Canned reply", |b| b)
        .exit("done", "Send")
        .connect("goal", "draft")
        .connect("draft", "done")
        .connect("canned", "done")
        .build()
}

/// goal -> route (gateway) -> fast | thorough -> done. Branch order in the
/// document is fast first, thorough second.
#[allow(dead_code)]
pub fn forked(confidence_threshold: f64) -> Workflow {
    forked_with(confidence_threshold, |b| b)
}

/// The forked workflow with the "route" gateway refined by `configure`.
#[allow(dead_code)]
pub fn forked_with(
    confidence_threshold: f64,
    configure: impl FnOnce(Block) -> Block,
) -> Workflow {
    WorkflowBuilder::new("forked")
        .goal("goal", "Triage")
        .block_with("route", BlockType::Gateway, "Route", move |b| {
            configure(b.with_properties(BlockProperties::Gateway(GatewayProperties {
                confidence_threshold,
                ..GatewayProperties::default()
            })))
        })
        .block_with("fast", BlockType::Reasoning, "Fast path", |b| b)
        .block_with("thorough", BlockType::Reasoning, "Thorough path", |b| b)
        .exit("done", "Done")
        .connect("goal", "route")
        .connect("route", "fast")
        .connect("route", "thorough")
        .connect("fast", "done")
        .connect("thorough", "done")
        .build()
}
