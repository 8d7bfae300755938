//! Manual-exploration fixture: walks S1-S6 end to end against an ephemeral
//! `AdapterContext`, printing each outcome. Not part of the tested surface;
//! run with `cargo run --example replay_fixture`.

use serde_json::json;
use uicp_adapter::compute_bridge::NullComputeBridge;
use uicp_adapter::context::open_ephemeral;
use uicp_adapter::envelope::{
    ApiCallParams, Batch, DomOpParams, Envelope, Op, PatchOp, StatePatchParams, StateScope, StateSetParams,
    WindowCloseParams, WindowCreateParams,
};
use uicp_adapter::orchestrator::ApplyOptions;

fn window_create(id: &str, title: &str) -> Envelope {
    Envelope::new(Op::WindowCreate(WindowCreateParams {
        id: id.to_string(),
        title: Some(title.to_string()),
        ..Default::default()
    }))
}

#[tokio::main]
async fn main() {
    let ctx = open_ephemeral(NullComputeBridge).await.expect("ephemeral context");
    ctx.mark_workspace_ready();

    println!("-- S1: idempotent duplicate batch --");
    let dup_batch = Batch::new(vec![window_create("win-dup", "Duplicate Test")]);
    let first = ctx.apply_batch(dup_batch.clone(), ApplyOptions::default()).await;
    println!("first:  applied={} skippedDuplicates={}", first.applied, first.skipped_duplicates);
    let second = ctx.apply_batch(dup_batch, ApplyOptions::default()).await;
    println!("second: applied={} skippedDuplicates={}", second.applied, second.skipped_duplicates);

    println!("\n-- S2: sanitiser invariants --");
    let dirty = r#"<a href=" javascript:alert(1) " onclick="x=1">x</a><iframe></iframe>"#;
    let clean = uicp_adapter::sanitize::sanitize(dirty);
    println!("input:  {dirty}");
    println!("output: {clean}");

    println!("\n-- S3: policy denies unknown origin --");
    let env = Envelope::new(Op::ApiCall(ApiCallParams {
        url: "https://example.com/data".into(),
        method: "GET".into(),
        headers: None,
        body: None,
        into: None,
    }));
    let outcome = ctx.apply_batch(Batch::new(vec![env]), ApplyOptions::default()).await;
    println!("deniedByPolicy={} errors={:?}", outcome.denied_by_policy, outcome.errors);

    println!("\n-- S4: replay ordering --");
    ctx.pin_window("w1"); // keep w1's history across its close below
    let steps = vec![
        window_create("w1", "First"),
        Envelope::new(Op::DomSet(DomOpParams {
            window_id: "w1".into(),
            target: "#root".into(),
            html: "<p>one</p>".into(),
            sanitize: true,
        })),
        Envelope::new(Op::WindowClose(WindowCloseParams { id: "w1".into() })),
        window_create("w1", "Second"),
        Envelope::new(Op::DomSet(DomOpParams {
            window_id: "w1".into(),
            target: "#root".into(),
            html: "<p>two</p>".into(),
            sanitize: true,
        })),
    ];
    for step in steps {
        ctx.apply_batch(Batch::new(vec![step]), ApplyOptions::default()).await;
    }
    println!("w1 #root before replay = {:?}", ctx.dom.snapshot("w1"));

    let replay_outcome = ctx.replay_all().await.expect("replay from the persisted command log");
    println!(
        "replay: applied={} errors={:?}",
        replay_outcome.applied, replay_outcome.errors
    );
    println!("w1 #root after replay = {:?}", ctx.dom.snapshot("w1"));

    println!("\n-- S5: state.patch copy-on-write --");
    let set = Envelope::new(Op::StateSet(StateSetParams {
        scope: StateScope::Workspace,
        key: "data".into(),
        window_id: None,
        value: json!({"a": {"x": 1}, "b": {"y": 2}}),
    }));
    ctx.apply_batch(Batch::new(vec![set]), ApplyOptions::default()).await;
    let patch = Envelope::new(Op::StatePatch(StatePatchParams {
        scope: StateScope::Workspace,
        key: "data".into(),
        window_id: None,
        ops: vec![PatchOp::Set { path: "a.x".into(), value: json!(1) }],
    }));
    let patch_outcome = ctx.apply_batch(Batch::new(vec![patch]), ApplyOptions::default()).await;
    println!("no-op patch applied={}", patch_outcome.applied);

    println!("\n-- S6: structured intent spawns a clarifier --");
    let intent = Envelope::new(Op::ApiCall(ApiCallParams {
        url: "uicp://intent".into(),
        method: "POST".into(),
        headers: None,
        body: Some(json!({
            "title": "Clarify",
            "textPrompt": "Which city?",
            "fields": [{"name": "city", "label": "City", "required": true}],
            "submit": "Go",
        })),
        into: None,
    }));
    ctx.apply_batch(Batch::new(vec![intent]), ApplyOptions::default()).await;
    for window in ctx.window.list() {
        if window.id.starts_with("clarifier-") {
            println!("clarifier window: {} ({:?})", window.id, window.title);
            println!("content: {:?}", ctx.dom.snapshot(&window.id));
        }
    }
}
