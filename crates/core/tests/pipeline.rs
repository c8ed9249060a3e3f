//! End-to-end pipeline scenarios driven through a scripted model layer.

use std::sync::{Arc, Mutex};

use mentat_config::AppConfig;
use mentat_core::{
    Controller, MessagingNexus, MutationStatus, PRIORITY_STANDARD, PRIORITY_URGENT,
};
use mentat_llm::{LlmProvider, MockProvider, ModelRouter};

/// Build a controller over a temp data dir with a scripted mock provider.
/// The semantic veto and ensemble are disabled so scripted replies map 1:1
/// onto deliberation calls.
fn controller_with_mock(dir: &std::path::Path) -> (Arc<Controller>, Arc<MockProvider>) {
    let mut config = AppConfig::default();
    config.system.data_dir = dir.join("data").to_string_lossy().to_string();
    config.system.workspace_dir = dir.join("workspace").to_string_lossy().to_string();
    config.system.semantic_veto = false;
    config.system.use_ensemble = false;
    config.missions.enabled = false;

    let mock = Arc::new(MockProvider::new("mock"));
    let router = Arc::new(ModelRouter::from_providers(
        vec![mock.clone() as Arc<dyn LlmProvider>],
        "mock",
    ));
    let controller = Controller::with_router(config, router).expect("controller builds");
    (Arc::new(controller), mock)
}

fn lite_action_reply(text: &str, skill: &str, params: serde_json::Value) -> String {
    serde_json::json!({
        "final_response": text,
        "action": { "skill_name": skill, "parameters": params },
        "confidence": 0.9
    })
    .to_string()
}

fn lite_text_reply(text: &str) -> String {
    serde_json::json!({ "final_response": text, "confidence": 0.9 }).to_string()
}

// ── Governor ─────────────────────────────────────────────────────────────────

#[tokio::test]
async fn shutdown_token_freezes_until_reawaken_phrase() {
    let dir = tempfile::tempdir().unwrap();
    let (controller, mock) = controller_with_mock(dir.path());

    let reply = controller.process_request("970317", None, &[]).await;
    assert!(reply.contains("Quiescent"));

    // While frozen: every request returns the fixed notice and no model runs.
    mock.push_reply("should never be consumed");
    let reply = controller.process_request("hello there", None, &[]).await;
    assert!(reply.starts_with("Status: Quiescent"));

    let reply = controller
        .process_request("wake up please", None, &[])
        .await;
    assert!(reply.starts_with("Status: Quiescent"), "near-miss phrases stay frozen");

    let reply = controller
        .process_request("mentat, reawaken - continuity priority alpha", None, &[])
        .await;
    assert!(reply.contains("Reawakened"));
}

#[tokio::test]
async fn destructive_pattern_is_vetoed_with_refusal_string() {
    let dir = tempfile::tempdir().unwrap();
    let (controller, _mock) = controller_with_mock(dir.path());

    let reply = controller
        .process_request("Delete my entire windows system directory right now", None, &[])
        .await;
    assert!(reply.contains("I cannot comply"));
}

// ── Reflex fast path ─────────────────────────────────────────────────────────

#[tokio::test]
async fn surface_command_executes_via_reflex_without_deliberation() {
    let dir = tempfile::tempdir().unwrap();
    let (controller, _mock) = controller_with_mock(dir.path());

    let reply = controller.process_request("open notepad", None, &[]).await;
    assert!(reply.contains("open_app"), "reflex dispatched the stub: {reply}");
    assert!(reply.contains("notepad"));

    // The stack was bypassed entirely: zero deliberation time this cycle.
    let deliberation = controller
        .cortex()
        .last_layer_duration(mentat_core::cortex::LAYER_DELIBERATION);
    assert!(deliberation.is_zero());
}

#[tokio::test]
async fn cached_reply_serves_second_identical_input() {
    let dir = tempfile::tempdir().unwrap();
    let (controller, mock) = controller_with_mock(dir.path());

    mock.push_reply(lite_text_reply("It is 14:02 right now."));
    let first = controller.process_request("tell me the current moment", None, &[]).await;
    assert!(first.contains("14:02"));

    // No reply queued: a second model call would come back "Acknowledged.";
    // the reflex cache must answer instead.
    let second = controller.process_request("tell me the current moment", None, &[]).await;
    assert_eq!(second, first);
}

// ── Confirmation flow ────────────────────────────────────────────────────────

#[tokio::test]
async fn medium_action_requires_confirmation_then_executes() {
    let dir = tempfile::tempdir().unwrap();
    let (controller, mock) = controller_with_mock(dir.path());

    mock.push_reply(lite_action_reply(
        "Creating the file.",
        "filesystem",
        serde_json::json!({"action": "write", "path": "report.txt", "content": "Hi"}),
    ));
    let reply = controller
        .process_request("create file report.txt with content Hi", None, &[])
        .await;
    assert!(
        reply.starts_with("Safety Check: This is a medium action"),
        "got: {reply}"
    );

    let reply = controller.process_request("yes", None, &[]).await;
    assert!(reply.starts_with("Done."), "got: {reply}");
    let written = dir.path().join("workspace").join("report.txt");
    assert_eq!(std::fs::read_to_string(written).unwrap(), "Hi");

    // A checkpoint was taken before the write and /restore lists it.
    let listing = controller.process_request("/restore", None, &[]).await;
    assert!(listing.contains("CHECKPOINTS"));
    assert!(listing.contains("filesystem"));
}

#[tokio::test]
async fn declined_confirmation_discards_the_pending_action() {
    let dir = tempfile::tempdir().unwrap();
    let (controller, mock) = controller_with_mock(dir.path());

    mock.push_reply(lite_action_reply(
        "Writing.",
        "filesystem",
        serde_json::json!({"action": "write", "path": "secret.txt", "content": "x"}),
    ));
    let reply = controller
        .process_request("create file secret.txt with content x", None, &[])
        .await;
    assert!(reply.starts_with("Safety Check:"));

    let reply = controller.process_request("maybe", None, &[]).await;
    assert!(reply.contains("confirm with yes"), "neither yes nor no re-prompts");

    let reply = controller.process_request("no", None, &[]).await;
    assert_eq!(reply, "Action cancelled.");
    assert!(!dir.path().join("workspace").join("secret.txt").exists());
}

// ── ReAct loop ───────────────────────────────────────────────────────────────

#[tokio::test]
async fn react_runs_tool_then_synthesizes_final_answer() {
    let dir = tempfile::tempdir().unwrap();
    let (controller, mock) = controller_with_mock(dir.path());

    // Step 1: the model asks for the clock; step 2: final text answer.
    mock.push_reply(lite_action_reply("Checking.", "clock", serde_json::json!({})));
    mock.push_reply(lite_text_reply("Right now the clock reads a fresh minute."));

    let reply = controller
        .process_request("give me an update on the current moment", None, &[])
        .await;
    assert!(reply.contains("clock reads"), "got: {reply}");
    assert!(reply.contains("[TRACE]"), "observations surface in the trace");
    assert!(!reply.to_lowercase().contains("processing..."));
}

#[tokio::test]
async fn unknown_skill_action_is_nullified_by_reflection() {
    let dir = tempfile::tempdir().unwrap();
    let (controller, mock) = controller_with_mock(dir.path());

    mock.push_reply(lite_action_reply(
        "Using my imaginary tool.",
        "teleporter",
        serde_json::json!({}),
    ));
    let reply = controller
        .process_request("please teleport my files somewhere", None, &[])
        .await;
    // Reflection nullified the action; the response pivoted to text.
    assert!(reply.contains("pivoted"), "got: {reply}");
}

#[tokio::test]
async fn placeholder_only_response_is_replaced() {
    let dir = tempfile::tempdir().unwrap();
    let (controller, mock) = controller_with_mock(dir.path());

    mock.push_reply(lite_text_reply("Processing..."));
    let reply = controller
        .process_request("summarize the meeting notes for me", None, &[])
        .await;
    assert!(!reply.to_lowercase().contains("processing..."), "got: {reply}");
    assert!(!reply.trim().is_empty());
}

// ── Reflex promotion through the evolution engine ────────────────────────────

#[tokio::test]
async fn repeated_confident_action_promotes_to_reflex() {
    let dir = tempfile::tempdir().unwrap();
    let (controller, mock) = controller_with_mock(dir.path());

    let input = "bring up my editor";
    for _ in 0..5 {
        mock.push_reply(lite_action_reply(
            "Opening the editor.",
            "system_control",
            serde_json::json!({"action": "open_app", "name": "editor"}),
        ));
        controller.process_request(input, None, &[]).await;
    }

    // The pattern was proposed, accumulated successes and auto-applied.
    let applied = controller.evolution().applied();
    assert!(
        applied
            .iter()
            .any(|m| m.status == MutationStatus::Applied && m.description.contains("bring up my editor")),
        "applied: {applied:?}"
    );

    // Subsequent identical input short-circuits through the learned pattern:
    // no scripted reply is consumed and the stub executes directly.
    let reply = controller.process_request(input, None, &[]).await;
    assert!(reply.contains("open_app"), "got: {reply}");
}

// ── Sessions ─────────────────────────────────────────────────────────────────

#[tokio::test]
async fn session_save_and_load_restore_the_trace() {
    let dir = tempfile::tempdir().unwrap();
    let (controller, mock) = controller_with_mock(dir.path());

    mock.push_reply(lite_text_reply("Noted."));
    controller.process_request("remember the blue folder", None, &[]).await;

    let reply = controller.process_request("/save checkpointed", None, &[]).await;
    assert!(reply.contains("Session saved"));

    mock.push_reply(lite_text_reply("Sure."));
    controller.process_request("now talk about something else", None, &[]).await;

    let reply = controller.process_request("/load checkpointed", None, &[]).await;
    assert!(reply.contains("Loaded session"));

    let trace = controller.memory().try_lock().unwrap().working.trace();
    assert!(trace.iter().any(|m| m.content.contains("blue folder")));
    assert!(!trace.iter().any(|m| m.content.contains("something else")));
}

// ── Slash surface ────────────────────────────────────────────────────────────

#[tokio::test]
async fn meta_commands_answer_without_cognition() {
    let dir = tempfile::tempdir().unwrap();
    let (controller, _mock) = controller_with_mock(dir.path());

    let reply = controller.process_request("/scorecard", None, &[]).await;
    assert!(reply.contains("INTELLIGENCE SCORECARD"));

    let reply = controller.process_request("/model", None, &[]).await;
    assert!(reply.contains("ACTIVE DEFAULT: mock"));

    let reply = controller.process_request("/evolve", None, &[]).await;
    assert!(reply.contains("stable"));

    let reply = controller.process_request("/missions", None, &[]).await;
    assert!(reply.contains("MISSIONS"));
}

// ── Nexus ordering ───────────────────────────────────────────────────────────

#[tokio::test]
async fn nexus_dispatches_urgent_before_earlier_standard() {
    let dir = tempfile::tempdir().unwrap();
    let (controller, mock) = controller_with_mock(dir.path());

    // First-processed request consumes "alpha".
    mock.push_reply(lite_text_reply("alpha"));
    mock.push_reply(lite_text_reply("beta"));

    let order: Arc<Mutex<Vec<(u8, String)>>> = Arc::new(Mutex::new(vec![]));
    let nexus = Arc::new(MessagingNexus::new(1));

    for (priority, text) in [
        (PRIORITY_STANDARD, "standard request please"),
        (PRIORITY_URGENT, "urgent request please now"),
    ] {
        let order = order.clone();
        nexus.ingest(
            "test",
            "user",
            text,
            Box::new(move |reply| {
                order.lock().unwrap().push((priority, reply));
            }),
            priority,
        );
    }

    let runner = tokio::spawn(nexus.clone().run(controller.clone(), None));
    tokio::time::timeout(std::time::Duration::from_secs(10), async {
        loop {
            if order.lock().unwrap().len() == 2 {
                break;
            }
            tokio::time::sleep(std::time::Duration::from_millis(20)).await;
        }
    })
    .await
    .expect("both callbacks fire");
    nexus.stop();
    runner.abort();

    let order = order.lock().unwrap();
    assert_eq!(order[0].0, PRIORITY_URGENT, "urgent dispatched first: {order:?}");
    assert!(order[0].1.contains("alpha"));
}

// ── Shutdown ─────────────────────────────────────────────────────────────────

#[tokio::test]
async fn shutdown_flushes_and_is_idempotent() {
    let dir = tempfile::tempdir().unwrap();
    let (controller, mock) = controller_with_mock(dir.path());

    mock.push_reply(lite_text_reply("Done thinking."));
    controller.process_request("ponder the garden for me", None, &[]).await;

    controller.shutdown().await;
    controller.shutdown().await;
}
