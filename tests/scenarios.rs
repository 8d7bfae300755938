//! End-to-end scenarios against the public crate API, covering the
//! concrete literal-input/expected-output cases and a few of the
//! cross-cutting invariants.

use serde_json::json;
use uicp_adapter::{
    compute_bridge::NullComputeBridge, context::open_ephemeral, envelope::*, orchestrator::ApplyOptions,
};

async fn ready_ctx() -> uicp_adapter::context::AdapterContext<
    uicp_adapter::command_log::SqliteCommandStore,
    uicp_adapter::policy::NullPolicyStore,
    NullComputeBridge,
> {
    let ctx = open_ephemeral(NullComputeBridge).await.unwrap();
    ctx.mark_workspace_ready();
    ctx
}

fn window_create(id: &str, title: &str) -> Envelope {
    Envelope::new(Op::WindowCreate(WindowCreateParams {
        id: id.to_string(),
        title: Some(title.to_string()),
        ..Default::default()
    }))
}

#[tokio::test]
async fn s1_idempotent_duplicate_batch() {
    let ctx = ready_ctx().await;
    let batch = Batch::new(vec![window_create("win-dup", "Duplicate Test")]);

    let first = ctx.apply_batch(batch.clone(), ApplyOptions::default()).await;
    assert_eq!(first.applied, 1);
    assert_eq!(first.skipped_duplicates, 0);

    let second = ctx.apply_batch(batch, ApplyOptions::default()).await;
    assert_eq!(second.applied, 0);
    assert_eq!(second.skipped_duplicates, 1);
    assert_eq!(second.batch_id, first.batch_id);
}

#[tokio::test]
async fn s2_sanitiser_invariants() {
    let html = r#"<a href=" javascript:alert(1) " onclick="x=1">x</a><iframe></iframe>"#;
    let clean = uicp_adapter::sanitize::sanitize(html);
    assert!(clean.contains(r#"href="#""#));
    assert!(!clean.contains("onclick"));
    assert!(!clean.contains("<iframe"));

    let twice = uicp_adapter::sanitize::sanitize(&clean);
    assert_eq!(clean, twice);
}

#[tokio::test]
async fn s3_policy_denies_unknown_origin() {
    let ctx = ready_ctx().await;
    let env = Envelope::new(Op::ApiCall(ApiCallParams {
        url: "https://example.com/data".into(),
        method: "GET".into(),
        headers: None,
        body: None,
        into: None,
    }));
    let outcome = ctx.apply_batch(Batch::new(vec![env]), ApplyOptions::default()).await;
    assert_eq!(outcome.denied_by_policy, 1);
    assert_eq!(outcome.applied, 0);
    assert!(outcome.errors.iter().any(|e| e.contains("denied by policy")));
}

#[tokio::test]
async fn s4_replay_ordering_reconstructs_final_state() {
    let ctx = ready_ctx().await;

    // A pinned window keeps its persisted history across close (§4.5), so
    // w1's full command history — including the close in the middle —
    // survives into the command log for `replay_all` to reconstruct.
    ctx.pin_window("w1");

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
        let outcome = ctx.apply_batch(Batch::new(vec![step]), ApplyOptions::default()).await;
        assert_eq!(outcome.applied, 1, "every step applies cleanly the first time");
    }

    // Simulate a restart: nothing is replayed yet, only the command log
    // (which `replay_all` reads) has survived.
    let replay_outcome = ctx.replay_all().await.expect("replay succeeds");
    assert_eq!(replay_outcome.errors, Vec::<String>::new());

    let windows = ctx.window.list();
    assert_eq!(windows.iter().filter(|w| w.id == "w1").count(), 1, "replay never hoists the later create above the close");
    let doc = ctx.dom.snapshot("w1").expect("w1 has a document after replay");
    assert!(doc.contains("two"));
    assert!(!doc.contains("one"));
}

#[tokio::test]
async fn replay_blocks_concurrent_apply_batch_until_it_finishes() {
    let ctx = ready_ctx().await;
    ctx.apply_batch(Batch::new(vec![window_create("w1", "First")]), ApplyOptions::default())
        .await;

    ctx.replay_all().await.expect("replay succeeds");
    assert!(!ctx.is_replaying(), "replay flag clears once replay_all returns");

    // A batch arriving mid-replay would have queued instead of applying;
    // here we only assert the gate correctly reports "not replaying" once
    // finished, and that a follow-up batch still applies normally.
    let outcome = ctx.apply_batch(Batch::new(vec![window_create("w2", "Second")]), ApplyOptions::default()).await;
    assert_eq!(outcome.applied, 1);
}

#[tokio::test]
async fn s5_state_patch_is_a_no_op_when_value_is_unchanged() {
    let ctx = ready_ctx().await;
    let initial = json!({"a": {"x": 1}, "b": {"y": 2}});
    let set = Envelope::new(Op::StateSet(StateSetParams {
        scope: StateScope::Workspace,
        key: "data".into(),
        window_id: None,
        value: initial.clone(),
    }));
    ctx.apply_batch(Batch::new(vec![set]), ApplyOptions::default()).await;

    let patch = Envelope::new(Op::StatePatch(StatePatchParams {
        scope: StateScope::Workspace,
        key: "data".into(),
        window_id: None,
        ops: vec![PatchOp::Set {
            path: "a.x".into(),
            value: json!(1),
        }],
    }));
    let outcome = ctx.apply_batch(Batch::new(vec![patch]), ApplyOptions::default()).await;
    assert_eq!(outcome.applied, 0, "identical value is a structural no-op");

    let after = ctx.state.get(StateScope::Workspace, "data", &None).unwrap();
    assert_eq!(after, initial);
}

#[tokio::test]
async fn s6_structured_intent_spawns_clarifier_form() {
    let ctx = ready_ctx().await;
    let env = Envelope::new(Op::ApiCall(ApiCallParams {
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
    let outcome = ctx.apply_batch(Batch::new(vec![env]), ApplyOptions::default()).await;
    assert_eq!(outcome.applied, 1);

    let clarifier = ctx
        .window
        .list()
        .into_iter()
        .find(|w| w.id.starts_with("clarifier-"))
        .expect("clarifier window exists");
    let doc = ctx.dom.snapshot(&clarifier.id).expect("clarifier has a document");
    assert!(doc.contains("City"));
    assert!(doc.contains("data-command"));
}

#[tokio::test]
async fn invariant_batch_hash_is_order_sensitive_but_key_order_irrelevant() {
    let a = Batch::new(vec![window_create("w1", "A"), window_create("w2", "B")]);
    let b = Batch::new(vec![window_create("w2", "B"), window_create("w1", "A")]);
    assert_ne!(uicp_adapter::canonical::batch_hash(&a), uicp_adapter::canonical::batch_hash(&b));

    let c = Batch::new(vec![window_create("w1", "A"), window_create("w2", "B")]);
    assert_eq!(uicp_adapter::canonical::batch_hash(&a), uicp_adapter::canonical::batch_hash(&c));
}
