use super::*;
use std::{
    collections::VecDeque,
    sync::atomic::{AtomicUsize, Ordering as AtomicOrdering},
    time::Duration,
};

use async_trait::async_trait;
use axum::{
    extract::{
        ws::{Message as WsMessage, WebSocket, WebSocketUpgrade},
        Path, State,
    },
    response::Response,
    routing::get,
    Router,
};
use chrono::Utc;
use shared::{
    domain::{JobStage, PartialResult},
    protocol::{StatusError, StatusReport, SubmitJobRequest},
};
use tokio::{net::TcpListener, sync::Mutex};
use url::Url;

use crate::test_support::{assets_only, full_result, tx_only};

fn report(job_id: &str, stage: JobStage, partial: PartialResult) -> StatusReport {
    StatusReport {
        job_id: JobId::new(job_id),
        stage,
        partial,
        error: None,
        updated_at: Utc::now(),
    }
}

/// Serves scripted status reports; once the script runs out it keeps answering `generating`.
struct ScriptedStatusBackend {
    script: Mutex<VecDeque<Result<StatusReport, MintError>>>,
    fetches: AtomicUsize,
}

impl ScriptedStatusBackend {
    fn new(script: Vec<Result<StatusReport, MintError>>) -> Arc<Self> {
        Arc::new(Self {
            script: Mutex::new(script.into()),
            fetches: AtomicUsize::new(0),
        })
    }

    fn fetches(&self) -> usize {
        self.fetches.load(AtomicOrdering::SeqCst)
    }
}

#[async_trait]
impl JobBackend for ScriptedStatusBackend {
    async fn submit(&self, _request: SubmitJobRequest) -> Result<JobId, MintError> {
        Err(MintError::transport("submit is not scripted"))
    }

    async fn fetch_status(&self, job_id: &JobId) -> Result<StatusReport, MintError> {
        self.fetches.fetch_add(1, AtomicOrdering::SeqCst);
        match self.script.lock().await.pop_front() {
            Some(next) => next,
            None => Ok(report(
                job_id.as_str(),
                JobStage::Generating,
                PartialResult::default(),
            )),
        }
    }
}

async fn collect_until_terminal(
    rx: &mut mpsc::UnboundedReceiver<StatusEvent>,
) -> Vec<StatusEvent> {
    tokio::time::timeout(Duration::from_secs(5), async {
        let mut events = Vec::new();
        while let Some(event) = rx.recv().await {
            let terminal = event.stage.is_terminal();
            events.push(event);
            if terminal {
                break;
            }
        }
        events
    })
    .await
    .expect("terminal event within timeout")
}

async fn wait_released(handle: &ReleaseHandle) {
    tokio::time::timeout(Duration::from_secs(5), async {
        while !handle.is_released() {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("subscription released");
}

#[test]
fn detached_close_is_idempotent_and_sets_release_flag() {
    let mut subscription = Subscription::detached(JobId::new("job_1"), Generation(3));
    let handle = subscription.release_handle();
    assert!(!handle.is_released());
    assert_eq!(subscription.generation(), Generation(3));
    assert_eq!(subscription.job_id().as_str(), "job_1");

    subscription.close();
    subscription.close();
    assert!(subscription.is_closed());
    assert!(handle.is_released());
}

#[test]
fn dropping_a_subscription_releases_it() {
    let subscription = Subscription::detached(JobId::new("job_1"), Generation(1));
    let handle = subscription.release_handle();
    drop(subscription);
    assert!(handle.is_released());
}

#[tokio::test]
async fn closing_aborts_the_delivery_task() {
    let (done_tx, mut done_rx) = mpsc::unbounded_channel::<()>();
    let mut subscription = Subscription::spawn(JobId::new("job_1"), Generation(1), async move {
        tokio::time::sleep(Duration::from_secs(30)).await;
        let _ = done_tx.send(());
    });

    subscription.close();
    assert!(subscription.is_closed());
    // Sender dropped by the aborted task without ever sending.
    assert_eq!(done_rx.recv().await, None);
}

#[tokio::test]
async fn polling_delivers_until_terminal_then_stops() {
    let backend = ScriptedStatusBackend::new(vec![
        Err(MintError::transport("connection reset")),
        Ok(report("job_1", JobStage::Generating, PartialResult::default())),
        Ok(report("job_other", JobStage::Completed, full_result())),
        Ok(report("job_1", JobStage::Minting, assets_only())),
        Ok(report("job_1", JobStage::Completed, tx_only())),
    ]);
    let channel = PollingChannel::new(backend.clone(), Duration::from_millis(10));
    let (tx, mut rx) = mpsc::unbounded_channel();

    let subscription = channel.open(JobId::new("job_1"), Generation(7), tx);
    let events = collect_until_terminal(&mut rx).await;

    let stages: Vec<JobStage> = events.iter().map(|event| event.stage).collect();
    assert_eq!(
        stages,
        vec![JobStage::Generating, JobStage::Minting, JobStage::Completed]
    );
    assert!(events.iter().all(|event| event.generation == Generation(7)));
    assert_eq!(events[1].partial_result, Some(assets_only()));
    assert_eq!(events[2].partial_result, Some(tx_only()));

    wait_released(&subscription.release_handle()).await;
    let fetches = backend.fetches();
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(backend.fetches(), fetches);
}

#[tokio::test]
async fn closed_polling_subscription_stops_querying() {
    let backend = ScriptedStatusBackend::new(Vec::new());
    let channel = PollingChannel::new(backend.clone(), Duration::from_millis(10));
    let (tx, mut rx) = mpsc::unbounded_channel();

    let mut subscription = channel.open(JobId::new("job_1"), Generation(1), tx);
    let first = tokio::time::timeout(Duration::from_secs(5), rx.recv())
        .await
        .expect("first poll")
        .expect("event");
    assert_eq!(first.stage, JobStage::Generating);

    subscription.close();
    let fetches = backend.fetches();
    tokio::time::sleep(Duration::from_millis(60)).await;
    assert_eq!(backend.fetches(), fetches);
}

#[derive(Clone, Default)]
struct TopicState {
    connections: Arc<AtomicUsize>,
}

async fn handle_topic(
    ws: WebSocketUpgrade,
    Path(job_id): Path<String>,
    State(state): State<TopicState>,
) -> Response {
    ws.on_upgrade(move |socket| serve_topic(socket, job_id, state))
}

async fn serve_topic(mut socket: WebSocket, job_id: String, state: TopicState) {
    let connection = state.connections.fetch_add(1, AtomicOrdering::SeqCst);
    let frames = if connection == 0 {
        vec![report(&job_id, JobStage::Generating, PartialResult::default())]
    } else {
        // A reconnect replays the current state before moving on.
        vec![
            report(&job_id, JobStage::Generating, PartialResult::default()),
            report(&job_id, JobStage::Minting, assets_only()),
            report(&job_id, JobStage::Completed, tx_only()),
        ]
    };
    for frame in frames {
        let text = serde_json::to_string(&frame).expect("encode report");
        if socket.send(WsMessage::Text(text)).await.is_err() {
            return;
        }
    }
    if connection == 0 {
        let _ = socket.send(WsMessage::Close(None)).await;
        return;
    }
    while let Some(Ok(_)) = socket.recv().await {}
}

async fn spawn_topic_server() -> anyhow::Result<(Url, TopicState)> {
    std::env::set_var("NO_PROXY", "127.0.0.1,localhost");
    let listener = TcpListener::bind("127.0.0.1:0").await?;
    let addr = listener.local_addr()?;
    let state = TopicState::default();
    let app = Router::new()
        .route("/jobs/:id/events", get(handle_topic))
        .with_state(state.clone());
    tokio::spawn(async move {
        let _ = axum::serve(listener, app).await;
    });
    Ok((Url::parse(&format!("http://{addr}"))?, state))
}

#[test]
fn push_topic_url_follows_backend_scheme_and_path() {
    let secure = PushChannel::new(
        &Url::parse("https://mint.example/api").expect("url"),
        Duration::from_millis(10),
        1,
    )
    .expect("push channel");
    assert_eq!(
        secure
            .topic_url(&JobId::new("job_1"))
            .expect("topic url")
            .as_str(),
        "wss://mint.example/api/jobs/job_1/events"
    );

    let local = PushChannel::new(
        &Url::parse("http://127.0.0.1:8000").expect("url"),
        Duration::from_millis(10),
        1,
    )
    .expect("push channel");
    assert_eq!(
        local
            .topic_url(&JobId::new("job_2"))
            .expect("topic url")
            .as_str(),
        "ws://127.0.0.1:8000/jobs/job_2/events"
    );
}

#[test]
fn push_topic_url_keeps_job_id_in_one_segment() {
    let push = PushChannel::new(
        &Url::parse("http://127.0.0.1:8000/api/").expect("url"),
        Duration::from_millis(10),
        1,
    )
    .expect("push channel");
    assert_eq!(
        push.topic_url(&JobId::new("x/../y#z"))
            .expect("topic url")
            .as_str(),
        "ws://127.0.0.1:8000/api/jobs/x%2F..%2Fy%23z/events"
    );
}

#[test]
fn push_requires_http_backend() {
    let result = PushChannel::new(
        &Url::parse("ftp://mint.example").expect("url"),
        Duration::from_millis(10),
        1,
    );
    assert!(matches!(result, Err(MintError::Transport { .. })));
}

#[tokio::test]
async fn push_reconnects_after_drop_and_closes_on_terminal() {
    let (url, state) = spawn_topic_server().await.expect("spawn server");
    let channel = PushChannel::new(&url, Duration::from_millis(20), 3).expect("push channel");
    let (tx, mut rx) = mpsc::unbounded_channel();

    let subscription = channel.open(JobId::new("job_9"), Generation(2), tx);
    let events = collect_until_terminal(&mut rx).await;

    let stages: Vec<JobStage> = events.iter().map(|event| event.stage).collect();
    assert_eq!(
        stages,
        vec![
            JobStage::Generating,
            JobStage::Generating,
            JobStage::Minting,
            JobStage::Completed,
        ]
    );
    assert!(events.iter().all(|event| event.generation == Generation(2)));
    assert_eq!(state.connections.load(AtomicOrdering::SeqCst), 2);
    wait_released(&subscription.release_handle()).await;
}

#[tokio::test]
async fn push_gives_up_with_transport_failure() {
    std::env::set_var("NO_PROXY", "127.0.0.1,localhost");
    let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
    let addr = listener.local_addr().expect("addr");
    drop(listener);
    let url = Url::parse(&format!("http://{addr}")).expect("url");
    let channel = PushChannel::new(&url, Duration::from_millis(10), 2).expect("push channel");
    let (tx, mut rx) = mpsc::unbounded_channel();

    let subscription = channel.open(JobId::new("job_1"), Generation(4), tx);
    let events = collect_until_terminal(&mut rx).await;

    assert_eq!(events.len(), 1);
    assert_eq!(events[0].stage, JobStage::Failed);
    assert_eq!(events[0].generation, Generation(4));
    assert!(matches!(events[0].error, Some(StatusError::Transport(_))));
    wait_released(&subscription.release_handle()).await;
}

#[test]
fn channel_for_builds_configured_transport() {
    let backend = ScriptedStatusBackend::new(Vec::new());
    let mut settings = ClientSettings::default();
    assert!(channel_for(&settings, backend.clone()).is_ok());

    settings.transport = TransportKind::Push;
    assert!(channel_for(&settings, backend.clone()).is_ok());

    settings.backend_url = "ftp://mint.example".to_string();
    assert!(channel_for(&settings, backend.clone()).is_err());

    settings.backend_url = "not a url".to_string();
    assert!(matches!(
        channel_for(&settings, backend),
        Err(MintError::Transport { .. })
    ));
}
