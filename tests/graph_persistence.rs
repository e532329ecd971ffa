mod common;

use common::*;
use serde_json::{Value, json};

use reasonflow::arbitration::ArbitrationStrategy;
use reasonflow::evaluation::{CheckSpec, OutputFormat};
use reasonflow::graph::properties::{BlockProperties, GatewayProperties};
use reasonflow::graph::{ValidationError, Workflow, WorkflowBuilder, WorkflowParseError};
use reasonflow::recovery::RecoveryPolicy;
use reasonflow::types::BlockType;

fn rich_workflow() -> Workflow {
    WorkflowBuilder::new("support-triage")
        .named("Support triage")
        .describe("Routes tickets to the fast or thorough lane")
        .version("1.2.0")
        .goal("goal", "Resolve the ticket")
        .block_with("route", BlockType::Gateway, "Route", |b| {
            b.with_properties(BlockProperties::Gateway(GatewayProperties {
                confidence_threshold: 0.8,
                strategy: ArbitrationStrategy::LlmDecision,
            }))
        })
        .block_with("fast", BlockType::Reasoning, "Fast lane", |b| {
            b.with_check(CheckSpec::ValidateFormat {
                expect: OutputFormat::Text,
            })
            .with_recovery(RecoveryPolicy::retry(2).with_fallback_target("canned"))
        })
        .block_with("thorough", BlockType::Reasoning, "Thorough lane", |b| {
            b.with_tool("kb-search")
        })
        .block_with("canned", BlockType::Fallback, "Canned reply", |b| b)
        .exit("done", "Send")
        .connect("goal", "route")
        .connect("route", "fast")
        .connect("route", "thorough")
        .connect("fast", "done")
        .connect("thorough", "done")
        .connect("canned", "done")
        .connect_data("fast", "done")
        .build()
}

#[test]
fn a_rich_workflow_round_trips_through_json() {
    let workflow = rich_workflow();
    assert!(workflow.validate().is_valid());

    let json = workflow.to_json().expect("workflow serializes");
    let parsed = Workflow::from_json(&json).expect("document parses");
    assert_eq!(parsed, workflow);

    let pretty = workflow.to_json_pretty().expect("workflow serializes");
    assert_eq!(Workflow::from_json(&pretty).expect("pretty parses"), workflow);
}

#[test]
fn the_persisted_document_keeps_the_wire_shape() {
    let doc: Value =
        serde_json::from_str(&rich_workflow().to_json().expect("serializes")).expect("json");

    assert_eq!(doc["id"], json!("support-triage"));
    assert_eq!(doc["metadata"]["name"], json!("Support triage"));
    assert_eq!(doc["blocks"][0]["type"], json!("goal"));

    let route = &doc["blocks"][1];
    assert_eq!(route["type"], json!("gateway"));
    assert_eq!(route["properties"]["confidenceThreshold"], json!(0.8));
    assert_eq!(route["properties"]["strategy"], json!("llm_decision"));

    let fast = &doc["blocks"][2];
    assert_eq!(fast["properties"]["checks"][0]["check"], json!("validate_format"));
    assert_eq!(fast["properties"]["checks"][0]["expect"], json!("text"));
    assert_eq!(fast["properties"]["recoveryStrategy"], json!("retry"));
    assert_eq!(fast["properties"]["maxRetries"], json!(2));
    assert_eq!(fast["properties"]["fallbackTarget"], json!("canned"));

    let first = &doc["connections"][0];
    assert_eq!(first["sourceBlockId"], json!("goal"));
    assert_eq!(first["targetBlockId"], json!("route"));
    assert_eq!(first["kind"], json!("execution"));

    let data = &doc["connections"][6];
    assert_eq!(data["kind"], json!("data"));
    assert_eq!(data["sourcePin"], json!("data_output"));
    assert_eq!(data["targetPin"], json!("data_input"));
}

#[test]
fn documents_load_from_disk() {
    let dir = tempfile::tempdir().expect("temp dir");
    let path = dir.path().join("triage.json");

    let workflow = rich_workflow();
    std::fs::write(&path, workflow.to_json_pretty().expect("serializes")).expect("write");

    let loaded = Workflow::from_path(&path).expect("document loads");
    assert_eq!(loaded, workflow);
}

#[test]
fn load_failures_name_their_cause() {
    let dir = tempfile::tempdir().expect("temp dir");

    let missing = Workflow::from_path(dir.path().join("missing.json"));
    assert!(matches!(missing, Err(WorkflowParseError::Io { .. })));

    let garbage = dir.path().join("garbage.json");
    std::fs::write(&garbage, "not a workflow").expect("write");
    let parsed = Workflow::from_path(&garbage);
    assert!(matches!(parsed, Err(WorkflowParseError::Json { .. })));
}

#[test]
fn removing_a_block_severs_its_connections() {
    let workflow = linear();
    let edited = workflow.remove_block("work").expect("block exists");

    assert_eq!(edited.blocks.len(), 2);
    assert!(edited.connections.is_empty(), "both edges touched \"work\"");

    // The receiver is a value type; the original is untouched.
    assert_eq!(workflow.blocks.len(), 3);
    assert_eq!(workflow.connections.len(), 2);

    assert!(workflow.remove_block("ghost").is_err());
}

#[test]
fn a_loaded_document_still_has_to_validate() {
    let doc = json!({
        "id": "headless",
        "blocks": [
            {"id": "work", "type": "reasoning", "label": "Work", "properties": {}},
            {"id": "done", "type": "exit", "label": "Done", "properties": {}},
        ],
        "connections": [
            {"id": "c1", "sourceBlockId": "work", "targetBlockId": "done",
             "sourcePin": "output", "targetPin": "input", "kind": "execution"},
        ],
        "metadata": {"name": "Headless"},
    });

    let workflow = Workflow::from_json(&doc.to_string()).expect("document parses");
    let report = workflow.validate();
    assert!(!report.is_valid());
    assert!(report.errors.contains(&ValidationError::MissingGoal));
}
