#![cfg(feature = "ws-transport")]

use std::{
    collections::HashMap,
    net::SocketAddr,
    sync::{
        Arc, Mutex,
        atomic::{AtomicU32, Ordering},
    },
    time::Duration,
};

use axum::{
    Json, Router,
    extract::{
        Path, Query, State, WebSocketUpgrade,
        ws::{Message, WebSocket},
    },
    http::{HeaderMap, StatusCode, header::AUTHORIZATION},
    response::{IntoResponse, Response},
    routing::{get, post},
};
use serde_json::{Value, json};
use study_sync::{
    SyncConfig, SyncError, SyncSession,
    dto::progress::{ProgressStatus, ProgressUpdate},
    services::{backoff::BackoffPolicy, submission::QuizSession, unload::FlushOutcome},
    state::{connection::ConnectionState, events::ChannelEvent},
    transport::{StaticCredentials, TransportError},
};
use tokio::{net::TcpListener, time::timeout};

const TOKEN: &str = "secret";
const WAIT: Duration = Duration::from_secs(5);

#[derive(Clone, Default)]
struct Learning {
    posts: Arc<Mutex<Vec<(Option<String>, Value)>>>,
    failing_posts: Arc<AtomicU32>,
    quiz_calls: Arc<AtomicU32>,
}

impl Learning {
    fn posts(&self) -> Vec<(Option<String>, Value)> {
        self.posts.lock().unwrap().clone()
    }
}

fn router(state: Learning) -> Router {
    Router::new()
        .route("/api/v1/progress", get(overview).post(save_progress))
        .route("/api/v1/progress/{topic}", get(topic))
        .route("/api/v1/quiz/submit", post(submit_quiz))
        .route("/api/v1/ws/dashboard", get(dashboard))
        .with_state(state)
}

async fn overview() -> Json<Value> {
    Json(json!({
        "code": 20000,
        "message": "ok",
        "data": {
            "overall": { "progress": 30.0, "completedChapters": 3, "totalChapters": 10 },
            "next": { "topic": "types", "chapter": "slice", "status": "in_progress", "progress": 40.0 }
        }
    }))
}

async fn topic(Path(topic): Path<String>) -> Json<Value> {
    if topic == "missing" {
        return Json(json!({ "code": 40401, "message": "topic not found", "data": null }));
    }
    Json(json!({
        "code": 0,
        "data": { "chapters": [{ "topic": topic, "chapter": "slice", "status": "completed" }] }
    }))
}

async fn save_progress(
    State(state): State<Learning>,
    headers: HeaderMap,
    Json(body): Json<Value>,
) -> Response {
    let auth = headers
        .get(AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        .map(str::to_string);
    state.posts.lock().unwrap().push((auth, body));

    let failing = state
        .failing_posts
        .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
        .is_ok();
    if failing {
        return StatusCode::SERVICE_UNAVAILABLE.into_response();
    }
    Json(json!({ "code": 20000, "data": { "status": "ok" } })).into_response()
}

async fn submit_quiz(State(state): State<Learning>, Json(body): Json<Value>) -> Response {
    if state.quiz_calls.fetch_add(1, Ordering::SeqCst) > 0 {
        return StatusCode::CONFLICT.into_response();
    }
    let total = body["answers"].as_array().map_or(0, Vec::len);
    Json(json!({
        "code": 0,
        "data": { "score": 100, "total_questions": total, "correct_answers": total, "passed": true }
    }))
    .into_response()
}

async fn dashboard(ws: WebSocketUpgrade, Query(params): Query<HashMap<String, String>>) -> Response {
    if params.get("token").map(String::as_str) != Some(TOKEN) {
        return StatusCode::UNAUTHORIZED.into_response();
    }
    ws.on_upgrade(push_one_update)
}

async fn push_one_update(mut socket: WebSocket) {
    let event = json!({
        "event": "progress_updated",
        "data": {
            "userId": 1,
            "topicId": "types",
            "chapterId": "slice",
            "completed": true,
            "timestamp": "2025-03-01T10:00:00Z"
        }
    });
    if socket.send(Message::Text(event.to_string().into())).await.is_err() {
        return;
    }
    while let Some(Ok(message)) = socket.recv().await {
        if let Message::Close(_) = message {
            break;
        }
    }
}

async fn serve(state: Learning) -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, router(state)).await.unwrap();
    });
    addr
}

fn config(addr: SocketAddr) -> SyncConfig {
    let mut config = SyncConfig::default().with_api_base(&format!("http://{addr}"));
    config.write_retry.max_attempts = 3;
    config.write_retry.backoff =
        BackoffPolicy::new(Duration::from_millis(20), Duration::from_millis(200));
    config.realtime.max_reconnect_attempts = 1;
    config.realtime.backoff =
        BackoffPolicy::new(Duration::from_millis(20), Duration::from_millis(200));
    config
}

fn credentials(token: &str) -> Arc<StaticCredentials> {
    Arc::new(StaticCredentials::new(Some(token.to_string())))
}

#[tokio::test]
async fn reads_unwrap_the_envelope_and_normalize() {
    let addr = serve(Learning::default()).await;
    let (session, _beacon) = SyncSession::over_http(config(addr), credentials(TOKEN)).unwrap();
    let progress = session.progress();

    let snapshot = progress.overview().await.unwrap();
    assert_eq!(snapshot.overall.completed_chapters, 3);
    assert!(snapshot.topics.is_empty());
    let next = progress.next_chapter().await.unwrap().unwrap();
    assert_eq!(next.chapter, "slice");
    assert_eq!(next.status, ProgressStatus::InProgress);

    let detail = progress.topic("types").await.unwrap();
    assert_eq!(detail.summary.id, "types");
    assert_eq!(detail.chapters.len(), 1);
    assert_eq!(detail.chapters[0].status, ProgressStatus::Completed);

    let err = progress.topic("missing").await.unwrap_err();
    assert!(matches!(
        err,
        SyncError::Transport(TransportError::Rejected { code: 40401, .. })
    ));
}

#[tokio::test]
async fn write_retries_until_the_server_recovers() {
    let state = Learning::default();
    state.failing_posts.store(2, Ordering::SeqCst);
    let addr = serve(state.clone()).await;
    let (session, _beacon) = SyncSession::over_http(config(addr), credentials(TOKEN)).unwrap();

    let receipt = session
        .progress()
        .write(ProgressUpdate::new("variables", "storage").with_scroll_progress(42.0))
        .await
        .unwrap();
    assert_eq!(receipt.status, "ok");

    let posts = state.posts();
    assert_eq!(posts.len(), 3);
    for (auth, body) in &posts {
        assert_eq!(auth.as_deref(), Some("Bearer secret"));
        assert_eq!(body["chapter"], "storage");
        assert_eq!(body["scroll_progress"], 42.0);
    }
}

#[tokio::test]
async fn unload_beacon_reaches_the_server() {
    let state = Learning::default();
    let addr = serve(state.clone()).await;
    let (session, beacon) = SyncSession::over_http(config(addr), credentials(TOKEN)).unwrap();

    session
        .progress()
        .write(ProgressUpdate::new("types", "slice").with_scroll_progress(77.0))
        .await
        .unwrap();
    assert_eq!(session.unload().unwrap(), FlushOutcome::Beacon);
    assert_eq!(beacon.drain(WAIT).await, 1);

    let posts = state.posts();
    assert_eq!(posts.len(), 2);
    let (auth, body) = &posts[1];
    assert_eq!(auth.as_deref(), Some("Bearer secret"));
    assert_eq!(body["scroll_progress"], 77.0);
    assert_eq!(body["force_sync"], true);
}

#[tokio::test]
async fn second_quiz_submission_is_reported_as_duplicate() {
    let state = Learning::default();
    let addr = serve(state.clone()).await;
    let (session, _beacon) = SyncSession::over_http(config(addr), credentials(TOKEN)).unwrap();
    let quiz = session.quiz(QuizSession {
        session_id: "s-1".into(),
        topic: "types".into(),
        chapter: "slice".into(),
        question_count: 1,
    });
    quiz.select_answer(1, vec!["A".into()]);

    let result = quiz.submit().await.unwrap().unwrap();
    assert!(result.passed);
    assert_eq!(result.total_questions, 1);

    let err = quiz.submit().await.unwrap_err();
    assert!(matches!(err, SyncError::DuplicateSubmission { .. }));
    assert_eq!(state.quiz_calls.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn realtime_push_arrives_and_dispose_closes() {
    let addr = serve(Learning::default()).await;
    let (session, _beacon) = SyncSession::over_http(config(addr), credentials(TOKEN)).unwrap();
    let mut events = session.realtime().subscribe();

    session.start().unwrap();
    let update = timeout(WAIT, async {
        loop {
            if let ChannelEvent::ProgressUpdated(update) = events.recv().await.unwrap() {
                break update;
            }
        }
    })
    .await
    .unwrap();
    assert_eq!(update.topic_id, "types");
    assert!(update.completed);
    assert_eq!(session.realtime().state(), ConnectionState::Open);

    session.dispose();
    assert_eq!(session.realtime().state(), ConnectionState::Closed);
}

#[tokio::test]
async fn rejected_handshake_gives_up_after_the_reconnect_budget() {
    let addr = serve(Learning::default()).await;
    let (session, _beacon) = SyncSession::over_http(config(addr), credentials("wrong")).unwrap();
    let mut connection = session.realtime().watch_state();

    session.start().unwrap();
    timeout(WAIT, connection.wait_for(|state| *state == ConnectionState::Failed))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(session.realtime().reconnect_attempts(), 1);
}
