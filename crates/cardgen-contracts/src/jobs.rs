use std::collections::HashMap;
use std::sync::{Mutex, PoisonError};

use chrono::{SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobKind {
    Single,
    Batch,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    Queued,
    Processing,
    Completed,
    Failed,
    Cancelled,
}

impl JobStatus {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            JobStatus::Completed | JobStatus::Failed | JobStatus::Cancelled
        )
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobRecord {
    pub id: String,
    pub kind: JobKind,
    pub status: JobStatus,
    pub progress: f64,
    pub created_at: String,
    pub updated_at: String,
    pub result: Option<Value>,
    pub error: Option<String>,
}

impl JobRecord {
    pub fn queued(kind: JobKind) -> Self {
        let now = now_utc_iso();
        Self {
            id: Uuid::new_v4().to_string(),
            kind,
            status: JobStatus::Queued,
            progress: 0.0,
            created_at: now.clone(),
            updated_at: now,
            result: None,
            error: None,
        }
    }

    pub fn touch(&mut self) {
        self.updated_at = now_utc_iso();
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct QueueStatus {
    pub queued: usize,
    pub processing: usize,
    pub completed: usize,
    pub failed: usize,
    pub cancelled: usize,
    pub total: usize,
}

/// Storage for job status records, injected into whatever owns job tracking.
pub trait JobRepository: Send + Sync {
    fn create(&self, record: JobRecord) -> anyhow::Result<()>;
    fn get(&self, id: &str) -> Option<JobRecord>;
    /// Applies `apply` to the stored record; returns the updated copy, or
    /// `None` when the id is unknown.
    fn update(&self, id: &str, apply: &mut dyn FnMut(&mut JobRecord)) -> Option<JobRecord>;
    fn list(&self) -> Vec<JobRecord>;

    fn queue_status(&self) -> QueueStatus {
        let mut status = QueueStatus::default();
        for record in self.list() {
            status.total += 1;
            match record.status {
                JobStatus::Queued => status.queued += 1,
                JobStatus::Processing => status.processing += 1,
                JobStatus::Completed => status.completed += 1,
                JobStatus::Failed => status.failed += 1,
                JobStatus::Cancelled => status.cancelled += 1,
            }
        }
        status
    }
}

#[derive(Debug, Default)]
pub struct InMemoryJobRepository {
    records: Mutex<HashMap<String, JobRecord>>,
}

impl InMemoryJobRepository {
    pub fn new() -> Self {
        Self::default()
    }
}

impl JobRepository for InMemoryJobRepository {
    fn create(&self, record: JobRecord) -> anyhow::Result<()> {
        let mut records = self.records.lock().unwrap_or_else(PoisonError::into_inner);
        if records.contains_key(&record.id) {
            anyhow::bail!("job {} already exists", record.id);
        }
        records.insert(record.id.clone(), record);
        Ok(())
    }

    fn get(&self, id: &str) -> Option<JobRecord> {
        let records = self.records.lock().unwrap_or_else(PoisonError::into_inner);
        records.get(id).cloned()
    }

    fn update(&self, id: &str, apply: &mut dyn FnMut(&mut JobRecord)) -> Option<JobRecord> {
        let mut records = self.records.lock().unwrap_or_else(PoisonError::into_inner);
        let record = records.get_mut(id)?;
        apply(record);
        record.touch();
        Some(record.clone())
    }

    fn list(&self) -> Vec<JobRecord> {
        let records = self.records.lock().unwrap_or_else(PoisonError::into_inner);
        let mut rows: Vec<JobRecord> = records.values().cloned().collect();
        rows.sort_by(|a, b| a.created_at.cmp(&b.created_at).then(a.id.cmp(&b.id)));
        rows
    }
}

fn now_utc_iso() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Micros, false)
}
