// SPDX-License-Identifier: MIT
// Copyright (c) 2026 GARM contributors

//! Forge jobs and the locking protocol that guards against two entities
//! racing to claim the same job (spec §3, I5).

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::GarmError;
use crate::ids::JobId;

/// Forge-reported job status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Queued,
    InProgress,
    Completed,
}

crate::simple_display! {
    JobStatus {
        Queued => "queued",
        InProgress => "in_progress",
        Completed => "completed",
    }
}

impl JobStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, JobStatus::Completed)
    }
}

/// Forge-reported job conclusion, populated once `status` is `Completed`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobConclusion {
    Success,
    Failure,
    Cancelled,
    Skipped,
}

crate::simple_display! {
    JobConclusion {
        Success => "success",
        Failure => "failure",
        Cancelled => "cancelled",
        Skipped => "skipped",
    }
}

/// Which kind of [`crate::entity::ForgeEntity`] a job is scoped to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum JobScope {
    Repository { entity_id: Uuid },
    Organization { entity_id: Uuid },
    Enterprise { entity_id: Uuid },
}

/// A forge CI job, locked by at most one entity at a time (I5).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Job {
    pub id: JobId,
    pub run_id: i64,
    pub status: JobStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub conclusion: Option<JobConclusion>,
    #[serde(default)]
    pub labels: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub locked_by: Option<Uuid>,
    pub scope: JobScope,
}

impl Job {
    /// Acquire the lock for `locker`. Fails if already locked by someone else
    /// (I5: a job may be locked by at most one entity at a time).
    pub fn lock(&mut self, locker: Uuid) -> Result<(), GarmError> {
        match self.locked_by {
            Some(existing) if existing != locker => {
                Err(GarmError::Conflict(format!("job {} already locked by {existing}", self.id)))
            }
            _ => {
                self.locked_by = Some(locker);
                Ok(())
            }
        }
    }

    /// Release the lock, but only if it's held by the caller attempting the
    /// release, or if the job has already reached a terminal state (I5).
    pub fn unlock(&mut self, locker: Uuid) -> Result<(), GarmError> {
        if self.status.is_terminal() {
            self.locked_by = None;
            return Ok(());
        }
        match self.locked_by {
            Some(existing) if existing == locker => {
                self.locked_by = None;
                Ok(())
            }
            Some(existing) => Err(GarmError::Conflict(format!(
                "job {} is locked by {existing}, not {locker}",
                self.id
            ))),
            None => Ok(()),
        }
    }

    /// Forcibly break the lock once the locking entity has proven via the
    /// forge API that the job is no longer queued (I5's second release
    /// condition), regardless of who holds it.
    pub fn break_lock_if_not_queued(&mut self) -> Result<(), GarmError> {
        if self.status == JobStatus::Queued {
            return Err(GarmError::Conflict(format!("job {} is still queued", self.id)));
        }
        self.locked_by = None;
        Ok(())
    }
}

#[cfg(test)]
#[path = "job_tests.rs"]
mod tests;
