//! JSON-lines protocol spoken on the daemon socket. One request per line,
//! one response per line, except `WatchJob` which streams.

use serde::{Deserialize, Serialize};

use crate::jobs::{JobRecord, JobStatus};
use crate::play::{PlayOutcome, PlayView};
use crate::policy::PolicyInfo;
use crate::runner::TrainingRequest;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum Request {
    // Training jobs
    StartTraining {
        #[serde(flatten)]
        request: TrainingRequest,
    },
    JobStatus {
        run_id: String,
    },
    /// Stream `Job` snapshots until the run is terminal, then `WatchEnd`.
    WatchJob {
        run_id: String,
        #[serde(default)]
        interval_ms: Option<u64>,
    },
    CancelJob {
        run_id: String,
    },
    CleanupJob {
        run_id: String,
    },
    ActiveJobs,
    ListPolicies,

    // Live play
    PlayReset {
        #[serde(default)]
        grid_size: Option<usize>,
        #[serde(default)]
        mode: Option<String>,
        #[serde(default)]
        seed: Option<u64>,
    },
    PlayStep {
        /// `up`/`down`/`left`/`right`; omitted to let the policy or the
        /// current heading decide.
        #[serde(default)]
        action: Option<String>,
    },
    PlayInteract {
        kind: String,
        x: i64,
        y: i64,
    },
    PlaySetMode {
        mode: String,
    },
    /// Steer with a trained policy, or `null` to return control.
    PlayLoadPolicy {
        #[serde(default)]
        run_id: Option<String>,
    },
    PlayState,
    PlayStart,
    PlayStop,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
#[allow(clippy::large_enum_variant)]
pub enum Response {
    TrainingStarted {
        run_id: String,
    },
    Job {
        #[serde(flatten)]
        job: JobRecord,
    },
    JobUnknown {
        run_id: String,
    },
    WatchEnd {
        run_id: String,
        #[serde(default)]
        status: Option<JobStatus>,
    },
    ActiveJobs {
        run_ids: Vec<String>,
    },
    Policies {
        policies: Vec<PolicyInfo>,
    },
    PlayState {
        #[serde(flatten)]
        view: PlayView,
    },
    PlayStep {
        outcome: PlayOutcome,
        state: PlayView,
    },
    Success {
        message: String,
    },
    Error {
        message: String,
    },
}

impl Response {
    pub fn error(message: impl std::fmt::Display) -> Self {
        Response::Error {
            message: message.to_string(),
        }
    }

    pub fn success(message: impl Into<String>) -> Self {
        Response::Success {
            message: message.into(),
        }
    }
}
