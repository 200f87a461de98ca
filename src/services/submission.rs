use std::{
    collections::BTreeMap,
    future::Future,
    sync::{
        Arc, Mutex, PoisonError,
        atomic::{AtomicBool, Ordering},
    },
};

use tokio::{sync::watch, time::Instant};
use tracing::{debug, info, warn};

use crate::{
    dto::quiz::{QuizAnswer, QuizSubmitPayload, QuizSubmitResult},
    error::SyncError,
    services::cache::{CacheKey, ReadCache},
    transport::ProgressApi,
};

/// Reentrancy lock for a one-shot scored action.
///
/// `locked` is the correctness lock, taken synchronously before the action's first suspension
/// point. `submitting` only mirrors it for UI consumers and must not be used for exclusion.
#[derive(Debug)]
pub struct SubmissionGuard {
    locked: AtomicBool,
    submitting: watch::Sender<bool>,
}

/// Proof that the guard is held. Dropping it releases the lock, on success, error or cancellation.
#[derive(Debug)]
pub struct SubmissionPermit<'a> {
    guard: &'a SubmissionGuard,
}

impl Drop for SubmissionPermit<'_> {
    fn drop(&mut self) {
        self.guard.locked.store(false, Ordering::Release);
        self.guard.submitting.send_replace(false);
    }
}

impl Default for SubmissionGuard {
    fn default() -> Self {
        Self::new()
    }
}

impl SubmissionGuard {
    /// Unlocked guard.
    pub fn new() -> Self {
        let (submitting, _receiver) = watch::channel(false);
        Self {
            locked: AtomicBool::new(false),
            submitting,
        }
    }

    /// Take the lock, or `None` if an action is already outstanding.
    pub fn try_acquire(&self) -> Option<SubmissionPermit<'_>> {
        self.locked
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()?;
        self.submitting.send_replace(true);
        Some(SubmissionPermit { guard: self })
    }

    /// Run `action` unless another one is outstanding, in which case resolve to `None` at once.
    ///
    /// The lock is taken when this method is called, not when the returned future is first
    /// polled, so two back-to-back calls can never both start `action`.
    pub fn run<F, Fut, T>(&self, action: F) -> impl Future<Output = Option<T>>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = T>,
    {
        let permit = self.try_acquire();
        async move {
            let _permit = permit?;
            Some(action().await)
        }
    }

    /// Whether an action is outstanding.
    pub fn is_locked(&self) -> bool {
        self.locked.load(Ordering::Acquire)
    }

    /// UI-facing indicator; lags behind the lock and is not a concurrency control.
    pub fn watch_submitting(&self) -> watch::Receiver<bool> {
        self.submitting.subscribe()
    }
}

/// Identity of a quiz attempt handed out by the server.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QuizSession {
    /// Server-issued session id; empty until the quiz is started.
    pub session_id: String,
    /// Topic of the quiz.
    pub topic: String,
    /// Chapter of the quiz.
    pub chapter: String,
    /// Questions in the quiz.
    pub question_count: usize,
}

/// Collects answers for one quiz session and submits them at most once at a time.
pub struct QuizSubmitter {
    session: QuizSession,
    api: Arc<dyn ProgressApi>,
    cache: Arc<ReadCache>,
    guard: SubmissionGuard,
    answers: Mutex<BTreeMap<u64, Vec<String>>>,
    started_at: Mutex<Instant>,
    result: Mutex<Option<QuizSubmitResult>>,
}

impl QuizSubmitter {
    /// Submitter for `session`; a successful submission invalidates `cache`.
    pub fn new(session: QuizSession, api: Arc<dyn ProgressApi>, cache: Arc<ReadCache>) -> Self {
        Self {
            session,
            api,
            cache,
            guard: SubmissionGuard::new(),
            answers: Mutex::default(),
            started_at: Mutex::new(Instant::now()),
            result: Mutex::default(),
        }
    }

    /// Session being answered.
    pub fn session(&self) -> &QuizSession {
        &self.session
    }

    /// Record (or replace) the choices for a question.
    pub fn select_answer(&self, question_id: u64, choices: Vec<String>) {
        self.answers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(question_id, choices);
    }

    /// Questions with a recorded answer.
    pub fn answered_count(&self) -> usize {
        self.answers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    /// Last graded result, if a submission succeeded.
    pub fn result(&self) -> Option<QuizSubmitResult> {
        self.result
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Clear answers and result and restart the clock.
    pub fn reset(&self) {
        self.answers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
        *self.result.lock().unwrap_or_else(PoisonError::into_inner) = None;
        *self
            .started_at
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = Instant::now();
    }

    /// Whether a submission is in flight.
    pub fn is_submitting(&self) -> bool {
        self.guard.is_locked()
    }

    /// UI indicator mirroring [`QuizSubmitter::is_submitting`].
    pub fn watch_submitting(&self) -> watch::Receiver<bool> {
        self.guard.watch_submitting()
    }

    /// Submit the collected answers.
    ///
    /// Resolves to `Ok(None)` without any request when the session has no id or no questions, or
    /// when a submission for this session is still outstanding. A server-side duplicate report
    /// surfaces as [`SyncError::DuplicateSubmission`].
    pub fn submit(&self) -> impl Future<Output = Result<Option<QuizSubmitResult>, SyncError>> + '_ {
        let ready = !self.session.session_id.is_empty() && self.session.question_count > 0;
        if !ready {
            debug!(session = %self.session.session_id, "quiz session not ready; nothing to submit");
        }
        let attempt = ready.then(|| {
            let payload = self.payload();
            self.guard.run(move || self.send(payload))
        });

        async move {
            let Some(attempt) = attempt else {
                return Ok(None);
            };
            match attempt.await {
                Some(result) => result.map(Some),
                None => {
                    debug!("quiz submission already in flight; ignoring");
                    Ok(None)
                }
            }
        }
    }

    fn payload(&self) -> QuizSubmitPayload {
        let started_at = *self
            .started_at
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        let answers = self
            .answers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .map(|(question_id, choices)| QuizAnswer {
                question_id: *question_id,
                user_answers: choices.clone(),
            })
            .collect();

        QuizSubmitPayload {
            session_id: self.session.session_id.clone(),
            topic: self.session.topic.clone(),
            chapter: self.session.chapter.clone(),
            duration_ms: u64::try_from(started_at.elapsed().as_millis()).unwrap_or(u64::MAX),
            answers,
        }
    }

    async fn send(&self, payload: QuizSubmitPayload) -> Result<QuizSubmitResult, SyncError> {
        let session_id = payload.session_id.clone();
        match self.api.submit_quiz(payload).await {
            Ok(result) => {
                info!(
                    session = %session_id,
                    score = result.score,
                    passed = result.passed,
                    "quiz submitted"
                );
                *self.result.lock().unwrap_or_else(PoisonError::into_inner) = Some(result.clone());
                self.cache.invalidate(&CacheKey::Overview);
                self.cache
                    .invalidate(&CacheKey::Topic(self.session.topic.clone()));
                Ok(result)
            }
            Err(err) if err.is_duplicate_submission() => {
                warn!(session = %session_id, "server reported a duplicate quiz submission");
                Err(SyncError::DuplicateSubmission { session_id })
            }
            Err(err) => {
                warn!(session = %session_id, error = %err, "quiz submission failed");
                Err(err.into())
            }
        }
    }
}
