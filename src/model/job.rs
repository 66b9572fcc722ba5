use std::fmt;
use std::str::FromStr;

use chrono::{NaiveDateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use super::{
    CollectionInstanceId, HistoryId, ImplicitCollectionJobsId, InstanceId, JobId,
    PopulatedState, UserId,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobState {
    New,
    Resubmitted,
    Upload,
    Waiting,
    Queued,
    Running,
    Ok,
    Error,
    Failed,
    Paused,
    Deleting,
    Deleted,
    Stop,
    Stopped,
    Skipped,
}

impl JobState {
    pub fn as_str(self) -> &'static str {
        match self {
            JobState::New => "new",
            JobState::Resubmitted => "resubmitted",
            JobState::Upload => "upload",
            JobState::Waiting => "waiting",
            JobState::Queued => "queued",
            JobState::Running => "running",
            JobState::Ok => "ok",
            JobState::Error => "error",
            JobState::Failed => "failed",
            JobState::Paused => "paused",
            JobState::Deleting => "deleting",
            JobState::Deleted => "deleted",
            JobState::Stop => "stop",
            JobState::Stopped => "stopped",
            JobState::Skipped => "skipped",
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            JobState::Ok | JobState::Error | JobState::Deleted | JobState::Skipped
        )
    }

    /// Imported jobs never run again, so anything still in flight becomes an error.
    pub fn coerce_terminal(state: &str) -> JobState {
        match state.parse::<JobState>() {
            Ok(state) if state.is_terminal() => state,
            _ => JobState::Error,
        }
    }
}

impl fmt::Display for JobState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for JobState {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let state = match s {
            "new" => JobState::New,
            "resubmitted" => JobState::Resubmitted,
            "upload" => JobState::Upload,
            "waiting" => JobState::Waiting,
            "queued" => JobState::Queued,
            "running" => JobState::Running,
            "ok" => JobState::Ok,
            "error" => JobState::Error,
            "failed" => JobState::Failed,
            "paused" => JobState::Paused,
            "deleting" => JobState::Deleting,
            "deleted" => JobState::Deleted,
            "stop" => JobState::Stop,
            "stopped" => JobState::Stopped,
            "skipped" => JobState::Skipped,
            other => return Err(format!("unknown job state '{}'", other)),
        };
        Ok(state)
    }
}

/// Named job input/output pointing at a dataset instance. Legacy archives
/// produce unnamed outputs, stored with an empty name.
#[derive(Debug, Clone, PartialEq)]
pub struct JobDatasetAssociation {
    pub name: String,
    pub dataset: InstanceId,
}

#[derive(Debug, Clone, PartialEq)]
pub struct JobCollectionAssociation {
    pub name: String,
    pub collection: CollectionInstanceId,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Job {
    pub id: JobId,
    pub tool_id: String,
    pub tool_version: Option<String>,
    pub state: JobState,
    pub history: Option<HistoryId>,
    pub user: Option<UserId>,
    pub command_line: Option<String>,
    pub exit_code: Option<i32>,
    pub info: Option<String>,
    pub tool_stdout: Option<String>,
    pub tool_stderr: Option<String>,
    pub job_stdout: Option<String>,
    pub job_stderr: Option<String>,
    pub params: Map<String, Value>,
    pub create_time: NaiveDateTime,
    pub update_time: NaiveDateTime,
    pub input_datasets: Vec<JobDatasetAssociation>,
    pub output_datasets: Vec<JobDatasetAssociation>,
    pub input_collections: Vec<JobCollectionAssociation>,
    pub output_collections: Vec<JobCollectionAssociation>,
}

impl Job {
    pub fn new(tool_id: impl Into<String>) -> Self {
        let now = Utc::now().naive_utc();
        Self {
            id: JobId::default(),
            tool_id: tool_id.into(),
            tool_version: None,
            state: JobState::New,
            history: None,
            user: None,
            command_line: None,
            exit_code: None,
            info: None,
            tool_stdout: None,
            tool_stderr: None,
            job_stdout: None,
            job_stderr: None,
            params: Map::new(),
            create_time: now,
            update_time: now,
            input_datasets: Vec::new(),
            output_datasets: Vec::new(),
            input_collections: Vec::new(),
            output_collections: Vec::new(),
        }
    }

    /// Drop every input/output association, keeping all other fields.
    pub fn clear_associations(&mut self) {
        self.input_datasets.clear();
        self.output_datasets.clear();
        self.input_collections.clear();
        self.output_collections.clear();
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ImplicitCollectionJobsJob {
    pub order_index: u32,
    pub job: JobId,
}

/// The jobs that together produced the elements of one implicit collection.
#[derive(Debug, Clone, PartialEq)]
pub struct ImplicitCollectionJobs {
    pub id: ImplicitCollectionJobsId,
    pub populated_state: PopulatedState,
    pub jobs: Vec<ImplicitCollectionJobsJob>,
}

impl ImplicitCollectionJobs {
    pub fn new(populated_state: PopulatedState) -> Self {
        Self {
            id: ImplicitCollectionJobsId::default(),
            populated_state,
            jobs: Vec::new(),
        }
    }

    pub fn add_job(&mut self, job: JobId) {
        let order_index = self.jobs.len() as u32;
        self.jobs.push(ImplicitCollectionJobsJob { order_index, job });
    }
}
