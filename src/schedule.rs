use crate::background_job::BackgroundJob;
use std::fmt;
use std::time::Duration;

/// A recurring job: enqueue one `job_type` job every `period`.
#[derive(Clone)]
pub struct ScheduleEntry {
    job_type: &'static str,
    period: Duration,
    max_attempts: i32,
    default_payload: fn() -> Result<Vec<u8>, serde_json::Error>,
}

impl ScheduleEntry {
    /// Entry for `J`, enqueued with `J::default()` as its payload.
    pub fn new<J: BackgroundJob + Default>(period: Duration) -> Self {
        Self {
            job_type: J::JOB_TYPE,
            period,
            max_attempts: J::MAX_ATTEMPTS,
            default_payload: || J::default().to_payload(),
        }
    }

    /// The job type this entry enqueues.
    pub const fn job_type(&self) -> &'static str {
        self.job_type
    }

    /// Time between two firings of this entry.
    pub const fn period(&self) -> Duration {
        self.period
    }

    /// Attempts each enqueued job gets.
    pub const fn max_attempts(&self) -> i32 {
        self.max_attempts
    }

    /// Serializes the payload of a freshly enqueued job.
    pub fn payload(&self) -> Result<Vec<u8>, serde_json::Error> {
        (self.default_payload)()
    }
}

impl fmt::Debug for ScheduleEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ScheduleEntry")
            .field("job_type", &self.job_type)
            .field("period", &self.period)
            .field("max_attempts", &self.max_attempts)
            .finish_non_exhaustive()
    }
}

/// The static, ordered list of recurring jobs.
///
/// An entry's position in the list identifies it for the lifetime of the scheduler.
#[derive(Debug, Clone, Default)]
pub struct Schedule {
    entries: Vec<ScheduleEntry>,
}

impl Schedule {
    /// An empty schedule.
    pub fn new() -> Self {
        Self::default()
    }

    /// Enqueue a `J` job every `period`.
    #[must_use]
    pub fn every<J: BackgroundJob + Default>(mut self, period: Duration) -> Self {
        self.entries.push(ScheduleEntry::new::<J>(period));
        self
    }

    /// All entries, in the order they were added.
    pub fn entries(&self) -> &[ScheduleEntry] {
        &self.entries
    }

    /// Whether the schedule has no entries.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
