use serde::{Deserialize, Serialize};

/// One observation of a user's engagement with a chapter.
///
/// Observations are complete overwrites: the server keeps the latest one per
/// `(topic, chapter)` and never merges deltas.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ProgressUpdate {
    /// Topic the chapter belongs to.
    pub topic: String,
    /// Chapter identifier.
    pub chapter: String,
    /// Seconds spent reading since the previous observation.
    pub read_duration: Option<u64>,
    /// Scroll percentage in `0..=100`.
    pub scroll_progress: Option<f64>,
    /// Opaque position marker used to restore the reading position.
    pub last_position: Option<String>,
    /// Score of the chapter quiz, if one was taken.
    pub quiz_score: Option<u32>,
    /// Whether the chapter quiz was passed.
    pub quiz_passed: Option<bool>,
    /// Estimated time needed to read the chapter.
    pub estimated_seconds: Option<u64>,
    /// Ask the server to persist immediately instead of batching.
    pub force_sync: bool,
}

impl ProgressUpdate {
    /// Start an observation for the given chapter with every optional field unset.
    pub fn new(topic: impl Into<String>, chapter: impl Into<String>) -> Self {
        Self {
            topic: topic.into(),
            chapter: chapter.into(),
            ..Self::default()
        }
    }

    /// Seconds read since the previous observation.
    pub fn with_read_duration(mut self, seconds: u64) -> Self {
        self.read_duration = Some(seconds);
        self
    }

    /// Percentage of the chapter scrolled through.
    pub fn with_scroll_progress(mut self, percent: f64) -> Self {
        self.scroll_progress = Some(percent);
        self
    }

    /// Opaque position blob restored on the next visit.
    pub fn with_last_position(mut self, position: impl Into<String>) -> Self {
        self.last_position = Some(position.into());
        self
    }

    /// Attach a quiz outcome.
    pub fn with_quiz_result(mut self, score: u32, passed: bool) -> Self {
        self.quiz_score = Some(score);
        self.quiz_passed = Some(passed);
        self
    }

    /// Estimated reading time in seconds.
    pub fn with_estimated_seconds(mut self, seconds: u64) -> Self {
        self.estimated_seconds = Some(seconds);
        self
    }

    /// Set or clear `force_sync`.
    pub fn with_force_sync(mut self, force: bool) -> Self {
        self.force_sync = force;
        self
    }

    /// Key used to serialize overlapping writes for the same chapter.
    pub fn key(&self) -> WriteKey {
        WriteKey {
            topic: self.topic.clone(),
            chapter: self.chapter.clone(),
        }
    }

    /// Wire representation with every optional field defaulted.
    pub fn to_payload(&self) -> ProgressPayload {
        ProgressPayload {
            topic: self.topic.clone(),
            chapter: self.chapter.clone(),
            read_duration: self.read_duration.unwrap_or(0),
            scroll_progress: self.scroll_progress.unwrap_or(0.0),
            last_position: self.last_position.clone().unwrap_or_default(),
            quiz_score: self.quiz_score.unwrap_or(0),
            quiz_passed: self.quiz_passed.unwrap_or(false),
            estimated_seconds: self.estimated_seconds.unwrap_or(0),
            force_sync: self.force_sync,
        }
    }
}

/// Identity of a chapter for write ordering purposes.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct WriteKey {
    /// Topic identifier.
    pub topic: String,
    /// Chapter identifier.
    pub chapter: String,
}

/// Body posted to the progress endpoint.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProgressPayload {
    /// Topic identifier.
    pub topic: String,
    /// Chapter identifier.
    pub chapter: String,
    /// Seconds read since the previous observation.
    pub read_duration: u64,
    /// Percentage scrolled, 0 to 100.
    pub scroll_progress: f64,
    /// Serialized reading position, empty when unknown.
    pub last_position: String,
    /// Quiz score, 0 when no quiz was taken.
    pub quiz_score: u32,
    /// Whether the quiz was passed.
    pub quiz_passed: bool,
    /// Estimated reading time in seconds.
    pub estimated_seconds: u64,
    /// Persist immediately.
    pub force_sync: bool,
}

/// Reading status of a single chapter.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProgressStatus {
    /// Chapter opened (or scrolled) but not finished.
    InProgress,
    /// Chapter read to the end.
    Completed,
    /// Chapter quiz passed.
    Tested,
    /// Never visited; also the fallback for statuses this client does not know.
    #[default]
    #[serde(other)]
    NotStarted,
}

/// Aggregated progress across every topic.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct OverallProgress {
    /// Overall completion percentage.
    pub progress: f64,
    /// Chapters completed across every topic.
    pub completed_chapters: u32,
    /// Chapters available across every topic.
    pub total_chapters: u32,
    /// Days with at least one study session.
    pub study_days: u32,
    /// Total study time in seconds.
    pub total_study_time: u64,
}

/// Per-topic progress summary as listed in the overview.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct TopicProgressSummary {
    /// Topic identifier.
    pub id: String,
    /// Display name.
    pub name: String,
    /// Share of the course this topic represents.
    pub weight: f64,
    /// Completion percentage.
    pub progress: f64,
    /// Chapters completed in this topic.
    pub completed_chapters: u32,
    /// Chapters available in this topic.
    pub total_chapters: u32,
    /// RFC 3339 time of the last visit.
    pub last_visit_at: Option<String>,
}

impl TopicProgressSummary {
    /// Summary used when the server omits the topic block entirely.
    pub fn empty(topic: &str) -> Self {
        Self {
            id: topic.to_string(),
            name: topic.to_string(),
            ..Self::default()
        }
    }
}

/// Progress of one chapter within a topic.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ChapterProgress {
    /// Topic identifier.
    pub topic: String,
    /// Chapter identifier.
    pub chapter: String,
    /// Reading status.
    pub status: ProgressStatus,
    /// Completion percentage reported by the server.
    pub percent: Option<f64>,
    /// Last reported scroll percentage.
    pub scroll_progress: Option<f64>,
    /// Total seconds read.
    pub read_duration: Option<u64>,
    /// Position to restore.
    pub last_position: Option<String>,
    /// RFC 3339 time of the last visit.
    pub last_visit_at: Option<String>,
    /// Best quiz score.
    pub quiz_score: Option<u32>,
    /// Whether the quiz was passed.
    pub quiz_passed: Option<bool>,
}

/// Hint pointing at the chapter the user should study next.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct NextChapterHint {
    /// Topic of the suggested chapter.
    pub topic: String,
    /// Suggested chapter.
    pub chapter: String,
    /// Its current status.
    pub status: ProgressStatus,
    /// Its completion percentage.
    pub progress: f64,
}

/// Normalized overall snapshot handed to callers.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ProgressSnapshot {
    /// Totals across every topic.
    pub overall: OverallProgress,
    /// Per-topic summaries.
    pub topics: Vec<TopicProgressSummary>,
    /// Chapter to study next, if the server suggests one.
    pub next: Option<NextChapterHint>,
}

/// Normalized per-topic detail handed to callers.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TopicProgressDetail {
    /// Topic totals.
    pub summary: TopicProgressSummary,
    /// Every chapter of the topic.
    pub chapters: Vec<ChapterProgress>,
}

/// Overview as returned by the server, where any block may be missing.
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct RawProgressSnapshot {
    /// Totals, absent when the user has no progress yet.
    pub overall: Option<OverallProgress>,
    /// Per-topic summaries.
    pub topics: Option<Vec<TopicProgressSummary>>,
    /// Suggested next chapter.
    pub next: Option<NextChapterHint>,
}

impl From<RawProgressSnapshot> for ProgressSnapshot {
    fn from(raw: RawProgressSnapshot) -> Self {
        Self {
            overall: raw.overall.unwrap_or_default(),
            topics: raw.topics.unwrap_or_default(),
            next: raw.next,
        }
    }
}

/// Topic detail as returned by the server.
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct RawTopicProgress {
    /// Topic totals.
    pub topic: Option<TopicProgressSummary>,
    /// Chapter entries.
    pub chapters: Option<Vec<ChapterProgress>>,
}

impl RawTopicProgress {
    /// Fill in the gaps left by the server for the requested topic.
    pub fn normalize(self, topic: &str) -> TopicProgressDetail {
        TopicProgressDetail {
            summary: self
                .topic
                .unwrap_or_else(|| TopicProgressSummary::empty(topic)),
            chapters: self.chapters.unwrap_or_default(),
        }
    }
}

/// Acknowledgement returned by the progress write endpoint.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default)]
pub struct WriteReceipt {
    /// Server status string, `ok` on success.
    pub status: String,
    /// Updated totals, when returned.
    pub overall: Option<OverallProgress>,
    /// Updated topic summary, when returned.
    pub topic: Option<TopicProgressSummary>,
}
