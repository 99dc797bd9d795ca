//! End-to-end engine runs against in-process stub agent and perception
//! services.

use axum::{
    extract::State,
    http::header,
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use playtest_common::AutomationPlan;
use playtest_controller::{ArtifactStore, Engine, PerceptionClient, RunOutcome, SutClient};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;

type ActionLog = Arc<Mutex<Vec<serde_json::Value>>>;

#[derive(Clone)]
struct AgentStub {
    actions: ActionLog,
    screenshot: Arc<Vec<u8>>,
}

async fn spawn_stub_agent() -> (String, ActionLog) {
    let img = image::RgbaImage::from_pixel(1920, 1080, image::Rgba([0, 0, 0, 255]));
    let mut buf = std::io::Cursor::new(Vec::new());
    img.write_to(&mut buf, image::ImageFormat::Png).unwrap();

    let stub = AgentStub {
        actions: Arc::new(Mutex::new(Vec::new())),
        screenshot: Arc::new(buf.into_inner()),
    };
    let actions = stub.actions.clone();

    let app = Router::new()
        .route(
            "/status",
            get(|| async { Json(serde_json::json!({"status": "running"})) }),
        )
        .route(
            "/screenshot",
            get(|State(stub): State<AgentStub>| async move {
                (
                    [(header::CONTENT_TYPE, "image/png")],
                    stub.screenshot.as_ref().clone(),
                )
                    .into_response()
            }),
        )
        .route(
            "/action",
            post(
                |State(stub): State<AgentStub>, Json(body): Json<serde_json::Value>| async move {
                    stub.actions.lock().unwrap().push(body.clone());
                    let action = body["type"].as_str().unwrap_or("unknown").to_string();
                    Json(serde_json::json!({"status": "success", "action": action}))
                },
            ),
        )
        .route(
            "/game_status",
            get(|| async {
                Json(serde_json::json!({
                    "status": "success",
                    "game_status": {
                        "subprocess_running": false,
                        "subprocess_pid": null,
                        "expected_process_name": null,
                        "actual_game_process": null
                    }
                }))
            }),
        )
        .with_state(stub);

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    (format!("http://{}", addr), actions)
}

#[derive(Clone)]
struct PerceptionStub {
    elements: Arc<serde_json::Value>,
    calls: Arc<AtomicUsize>,
    /// Return an empty detection list for the first N calls.
    empty_until: usize,
}

async fn spawn_stub_perception(
    elements: serde_json::Value,
    empty_until: usize,
) -> (String, Arc<AtomicUsize>) {
    let stub = PerceptionStub {
        elements: Arc::new(elements),
        calls: Arc::new(AtomicUsize::new(0)),
        empty_until,
    };
    let calls = stub.calls.clone();

    let app = Router::new()
        .route("/probe", get(|| async { Json(serde_json::json!({"ok": true})) }))
        .route(
            "/parse/",
            post(
                |State(stub): State<PerceptionStub>, Json(_body): Json<serde_json::Value>| async move {
                    let call = stub.calls.fetch_add(1, Ordering::SeqCst);
                    let list = if call < stub.empty_until {
                        serde_json::json!([])
                    } else {
                        stub.elements.as_ref().clone()
                    };
                    Json(serde_json::json!({
                        "parsed_content_list": list,
                        "latency": 0.01
                    }))
                },
            ),
        )
        .with_state(stub);

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    (format!("http://{}", addr), calls)
}

fn play_button() -> serde_json::Value {
    serde_json::json!([{
        "bbox": [0.4, 0.4, 0.5, 0.45],
        "interactivity": true,
        "type": "button",
        "content": "Play"
    }])
}

async fn build_engine(
    yaml: &str,
    agent_url: &str,
    perception_url: &str,
    cancel: CancellationToken,
) -> (Engine, tempfile::TempDir) {
    let plan = AutomationPlan::from_yaml(yaml).unwrap();
    let dir = tempfile::TempDir::new().unwrap();
    let artifacts = ArtifactStore::create(dir.path().join("run")).await.unwrap();
    let sut = SutClient::connect(agent_url).await.unwrap();
    let perception = PerceptionClient::connect(perception_url).await;
    (
        Engine::new(plan, sut, perception, artifacts, cancel),
        dir,
    )
}

const CLICK_THEN_WAIT: &str = r#"
metadata:
  game_name: "Stub Game"
steps:
  1:
    description: "Click play"
    find_and_click:
      type: any
      text: "Play"
    expected_delay: 0
  2:
    description: "Let it load"
    action: wait
    duration: 5
"#;

#[tokio::test]
async fn test_click_then_wait_run_completes() {
    let (agent_url, actions) = spawn_stub_agent().await;
    let (perception_url, _) = spawn_stub_perception(play_button(), 0).await;
    let (engine, _dir) = build_engine(
        CLICK_THEN_WAIT,
        &agent_url,
        &perception_url,
        CancellationToken::new(),
    )
    .await;

    let start = Instant::now();
    let outcome = engine.run().await.unwrap();
    assert_eq!(outcome, RunOutcome::Completed);
    // The wait step runs engine-side: the run takes at least 5 seconds.
    assert!(start.elapsed() >= Duration::from_secs(5));

    // Exactly one action reached the agent: a left click at the bbox
    // center of [0.4,0.4,0.5,0.45] on a 1920x1080 canvas.
    let log = actions.lock().unwrap();
    assert_eq!(log.len(), 1);
    assert_eq!(log[0]["type"], "click");
    assert_eq!(log[0]["x"], 864);
    assert_eq!(log[0]["y"], 459);
    assert_eq!(log[0]["button"], "left");
}

const FIND_MISSING: &str = r#"
metadata:
  game_name: "Stub Game"
steps:
  1:
    description: "Click a button that never appears"
    find_and_click:
      type: any
      text: "Play"
    expected_delay: 0
fallbacks:
  general:
    action: key
    key: "escape"
    expected_delay: 0
"#;

#[tokio::test]
async fn test_exhausted_retries_fail_the_run() {
    let (agent_url, actions) = spawn_stub_agent().await;
    // Perception never returns the target.
    let (perception_url, calls) = spawn_stub_perception(serde_json::json!([]), 0).await;
    let (engine, _dir) = build_engine(
        FIND_MISSING,
        &agent_url,
        &perception_url,
        CancellationToken::new(),
    )
    .await;

    let outcome = engine.run().await.unwrap();
    assert_eq!(outcome, RunOutcome::Failed { step: 1 });

    // Three attempts, with a fallback between attempts 1-2 and 2-3.
    assert_eq!(calls.load(Ordering::SeqCst), 3);
    let log = actions.lock().unwrap();
    let escapes: Vec<_> = log
        .iter()
        .filter(|a| a["type"] == "key" && a["key"] == "escape")
        .collect();
    assert_eq!(escapes.len(), 2);
    assert!(!log.iter().any(|a| a["type"] == "click"));
}

#[tokio::test]
async fn test_retries_below_bound_then_success_advances() {
    let (agent_url, actions) = spawn_stub_agent().await;
    // Target appears on the third detection.
    let (perception_url, _) = spawn_stub_perception(play_button(), 2).await;
    let (engine, _dir) = build_engine(
        FIND_MISSING,
        &agent_url,
        &perception_url,
        CancellationToken::new(),
    )
    .await;

    let outcome = engine.run().await.unwrap();
    assert_eq!(outcome, RunOutcome::Completed);

    let log = actions.lock().unwrap();
    let clicks = log.iter().filter(|a| a["type"] == "click").count();
    let escapes = log.iter().filter(|a| a["type"] == "key").count();
    assert_eq!(clicks, 1);
    assert_eq!(escapes, 2);
}

const LONG_WAIT: &str = r#"
metadata:
  game_name: "Stub Game"
steps:
  1:
    description: "Long wait"
    action: wait
    duration: 30
"#;

#[tokio::test]
async fn test_stop_signal_halts_wait_within_a_tick() {
    let (agent_url, _) = spawn_stub_agent().await;
    let (perception_url, _) = spawn_stub_perception(serde_json::json!([]), 0).await;
    let cancel = CancellationToken::new();
    let (engine, _dir) =
        build_engine(LONG_WAIT, &agent_url, &perception_url, cancel.clone()).await;

    let start = Instant::now();
    let run = tokio::spawn(async move { engine.run().await });
    tokio::time::sleep(Duration::from_millis(1500)).await;
    cancel.cancel();

    let outcome = run.await.unwrap().unwrap();
    assert_eq!(outcome, RunOutcome::Aborted);
    // Cancellation lands at the next 1s tick boundary, far short of 30s.
    assert!(start.elapsed() < Duration::from_secs(4));
}

#[tokio::test]
async fn test_connect_to_dead_agent_fails_fast() {
    // Bind a port and drop it so nothing is listening.
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);

    let err = SutClient::connect(&format!("http://{}", addr))
        .await
        .unwrap_err();
    assert!(err.is_connectivity(), "got {:?}", err);
}

#[tokio::test]
async fn test_verification_requires_all_targets() {
    const VERIFIED: &str = r#"
metadata:
  game_name: "Stub Game"
steps:
  1:
    description: "Click play and check both markers"
    find_and_click:
      type: any
      text: "Play"
    expected_delay: 0
    verify_success:
      - type: any
        text: "Play"
      - type: any
        text: "Loading"
fallbacks:
  general:
    action: key
    key: "escape"
    expected_delay: 0
"#;
    let (agent_url, _) = spawn_stub_agent().await;
    // Only "Play" ever appears, so the "Loading" verification fails.
    let (perception_url, _) = spawn_stub_perception(play_button(), 0).await;
    let (engine, _dir) = build_engine(
        VERIFIED,
        &agent_url,
        &perception_url,
        CancellationToken::new(),
    )
    .await;

    let outcome = engine.run().await.unwrap();
    assert_eq!(outcome, RunOutcome::Failed { step: 1 });
}
