//! In-process fakes of the remote collaborators, shared by the unit tests.

use std::{
    collections::HashMap,
    sync::{
        Arc, Mutex,
        atomic::{AtomicBool, AtomicU32, AtomicUsize, Ordering},
    },
    time::Duration,
};

use futures::future::BoxFuture;
use reqwest::StatusCode;
use tokio::{
    sync::mpsc,
    time::{Instant, sleep},
};
use tokio_stream::wrappers::UnboundedReceiverStream;
use url::Url;

use crate::{
    dto::{
        progress::{
            OverallProgress, ProgressPayload, RawProgressSnapshot, RawTopicProgress,
            TopicProgressSummary, WriteReceipt,
        },
        quiz::{QuizSubmitPayload, QuizSubmitResult},
    },
    transport::{
        Beacon, ProgressApi, TransportError, TransportResult,
        channel::{CloseInfo, Connection, Connector, Frame, Outgoing},
    },
};

/// Timer resolution slack allowed when comparing paused-clock durations.
const SLACK: Duration = Duration::from_millis(5);

/// Assert `actual` matches `expected` up to timer rounding.
#[track_caller]
pub fn assert_elapsed(actual: Duration, expected: Duration) {
    assert!(
        actual >= expected && actual <= expected + SLACK,
        "expected ~{expected:?}, got {actual:?}"
    );
}

#[derive(Default)]
struct ApiScript {
    post_failures: u32,
    quiz_status: Option<StatusCode>,
}

/// Scriptable [`ProgressApi`] recording every call.
#[derive(Default)]
pub struct FakeProgressApi {
    script: Mutex<ApiScript>,
    overview_calls: AtomicU32,
    topic_calls: Mutex<HashMap<String, u32>>,
    posts: Mutex<Vec<(Instant, ProgressPayload)>>,
    post_latency: Mutex<Duration>,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
    quiz_calls: AtomicU32,
    quiz_latency: Mutex<Duration>,
}

impl FakeProgressApi {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Fail the next `n` progress posts with a network error.
    pub fn fail_posts(&self, n: u32) {
        self.script.lock().unwrap().post_failures = n;
    }

    /// Make every post take `latency` before answering.
    pub fn set_post_latency(&self, latency: Duration) {
        *self.post_latency.lock().unwrap() = latency;
    }

    pub fn set_quiz_latency(&self, latency: Duration) {
        *self.quiz_latency.lock().unwrap() = latency;
    }

    /// Answer quiz submissions with `status` instead of a graded result.
    pub fn reject_quiz_with(&self, status: StatusCode) {
        self.script.lock().unwrap().quiz_status = Some(status);
    }

    pub fn overview_calls(&self) -> u32 {
        self.overview_calls.load(Ordering::SeqCst)
    }

    pub fn topic_calls(&self, topic: &str) -> u32 {
        self.topic_calls
            .lock()
            .unwrap()
            .get(topic)
            .copied()
            .unwrap_or_default()
    }

    pub fn posts(&self) -> Vec<(Instant, ProgressPayload)> {
        self.posts.lock().unwrap().clone()
    }

    pub fn max_concurrent_posts(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }

    pub fn quiz_calls(&self) -> u32 {
        self.quiz_calls.load(Ordering::SeqCst)
    }
}

impl ProgressApi for Arc<FakeProgressApi> {
    fn fetch_overview(&self) -> BoxFuture<'static, TransportResult<RawProgressSnapshot>> {
        self.overview_calls.fetch_add(1, Ordering::SeqCst);
        Box::pin(std::future::ready(Ok(RawProgressSnapshot {
            overall: Some(OverallProgress {
                completed_chapters: 3,
                total_chapters: 10,
                ..OverallProgress::default()
            }),
            topics: None,
            next: None,
        })))
    }

    fn fetch_topic(&self, topic: &str) -> BoxFuture<'static, TransportResult<RawTopicProgress>> {
        *self
            .topic_calls
            .lock()
            .unwrap()
            .entry(topic.to_string())
            .or_default() += 1;
        Box::pin(std::future::ready(Ok(RawTopicProgress {
            topic: Some(TopicProgressSummary::empty(topic)),
            chapters: None,
        })))
    }

    fn post_progress(
        &self,
        payload: ProgressPayload,
    ) -> BoxFuture<'static, TransportResult<WriteReceipt>> {
        let fake = self.clone();
        Box::pin(async move {
            fake.posts.lock().unwrap().push((Instant::now(), payload));
            let fail = {
                let mut script = fake.script.lock().unwrap();
                let fail = script.post_failures > 0;
                script.post_failures = script.post_failures.saturating_sub(1);
                fail
            };

            let active = fake.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
            fake.max_in_flight.fetch_max(active, Ordering::SeqCst);
            let latency = *fake.post_latency.lock().unwrap();
            if !latency.is_zero() {
                sleep(latency).await;
            }
            fake.in_flight.fetch_sub(1, Ordering::SeqCst);

            if fail {
                Err(TransportError::Network("connection reset".into()))
            } else {
                Ok(WriteReceipt {
                    status: "ok".into(),
                    ..WriteReceipt::default()
                })
            }
        })
    }

    fn submit_quiz(
        &self,
        payload: QuizSubmitPayload,
    ) -> BoxFuture<'static, TransportResult<QuizSubmitResult>> {
        let fake = self.clone();
        fake.quiz_calls.fetch_add(1, Ordering::SeqCst);
        Box::pin(async move {
            let latency = *fake.quiz_latency.lock().unwrap();
            if !latency.is_zero() {
                sleep(latency).await;
            }
            if let Some(status) = fake.script.lock().unwrap().quiz_status {
                return Err(TransportError::RequestStatus {
                    path: "/quiz/submit".into(),
                    status,
                });
            }
            let total = payload.answers.len() as u32;
            Ok(QuizSubmitResult {
                score: 100,
                total_questions: total,
                correct_answers: total,
                passed: true,
                details: Vec::new(),
            })
        })
    }

    fn progress_endpoint(&self) -> String {
        "http://fake.local/api/v1/progress".into()
    }
}

/// Beacon that records every queued body.
pub struct FakeBeacon {
    accept: bool,
    sent: Mutex<Vec<(String, String)>>,
}

impl FakeBeacon {
    pub fn accepting() -> Arc<Self> {
        Arc::new(Self {
            accept: true,
            sent: Mutex::default(),
        })
    }

    pub fn refusing() -> Arc<Self> {
        Arc::new(Self {
            accept: false,
            sent: Mutex::default(),
        })
    }

    pub fn sent(&self) -> Vec<(String, String)> {
        self.sent.lock().unwrap().clone()
    }
}

impl Beacon for Arc<FakeBeacon> {
    fn send(&self, url: &str, body: String) -> bool {
        if self.accept {
            self.sent.lock().unwrap().push((url.to_string(), body));
        }
        self.accept
    }
}

/// Server side of a connection accepted by [`FakeConnector`].
pub struct FakeSocket {
    pub url: Url,
    frames: mpsc::UnboundedSender<Frame>,
    pub outgoing: mpsc::UnboundedReceiver<Outgoing>,
}

impl FakeSocket {
    pub fn push_text(&self, text: &str) {
        let _ = self.frames.send(Frame::Text(text.to_string()));
    }

    pub fn push_error(&self, message: &str) {
        let _ = self.frames.send(Frame::Error(message.to_string()));
    }

    pub fn close(&self, code: u16) {
        let _ = self.frames.send(Frame::Close(CloseInfo::new(code, "")));
    }
}

/// Connector whose handshakes succeed instantly unless told to refuse.
pub struct FakeConnector {
    dials: Mutex<Vec<Instant>>,
    refusals: AtomicU32,
    refuse_all: AtomicBool,
    accepted: mpsc::UnboundedSender<FakeSocket>,
}

impl FakeConnector {
    /// Connector plus the receiving end yielding one [`FakeSocket`] per accepted dial.
    pub fn new() -> (Arc<Self>, mpsc::UnboundedReceiver<FakeSocket>) {
        let (accepted, sockets) = mpsc::unbounded_channel();
        let connector = Arc::new(Self {
            dials: Mutex::default(),
            refusals: AtomicU32::new(0),
            refuse_all: AtomicBool::new(false),
            accepted,
        });
        (connector, sockets)
    }

    /// Refuse the next `n` handshakes.
    pub fn refuse_next(&self, n: u32) {
        self.refusals.store(n, Ordering::SeqCst);
    }

    pub fn refuse_all(&self) {
        self.refuse_all.store(true, Ordering::SeqCst);
    }

    pub fn dials(&self) -> Vec<Instant> {
        self.dials.lock().unwrap().clone()
    }
}

impl Connector for Arc<FakeConnector> {
    fn connect(&self, url: Url) -> BoxFuture<'static, TransportResult<Connection>> {
        self.dials.lock().unwrap().push(Instant::now());

        let refused = self.refuse_all.load(Ordering::SeqCst)
            || self
                .refusals
                .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
                .is_ok();
        if refused {
            return Box::pin(std::future::ready(Err(TransportError::Handshake {
                url: url.to_string(),
                message: "connection refused".into(),
            })));
        }

        let (frames_tx, frames_rx) = mpsc::unbounded_channel();
        let (outgoing_tx, outgoing_rx) = mpsc::unbounded_channel();
        let _ = self.accepted.send(FakeSocket {
            url,
            frames: frames_tx,
            outgoing: outgoing_rx,
        });
        let frames = Box::pin(UnboundedReceiverStream::new(frames_rx));
        Box::pin(std::future::ready(Ok(Connection::new(frames, outgoing_tx))))
    }
}
