use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::BTreeMap;
use std::fmt::Display;
use tracing::{info, warn};
use uuid::Uuid;

use crate::domain::EntityId;

#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum RunStatus {
    Finished,
    Failed,
}

/// Closed record of one training run.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct RunSummary {
    pub run_id: String,
    pub entity_id: EntityId,
    pub status: RunStatus,
    pub started_at: DateTime<Utc>,
    pub ended_at: DateTime<Utc>,
    pub params: BTreeMap<String, String>,
    pub metrics: BTreeMap<String, f64>,
}

/// Tracking state of one training run, passed explicitly through a cycle.
///
/// A context is closed exactly once, by `finish` or `fail`. One that is
/// dropped while still open (an early `?` return) is logged as failed.
#[derive(Debug)]
pub struct RunContext {
    run_id: String,
    entity_id: EntityId,
    started_at: DateTime<Utc>,
    params: BTreeMap<String, String>,
    metrics: BTreeMap<String, f64>,
    closed: bool,
}

impl RunContext {
    pub fn start(entity_id: EntityId) -> Self {
        Self {
            run_id: Uuid::new_v4().to_string(),
            entity_id,
            started_at: Utc::now(),
            params: BTreeMap::new(),
            metrics: BTreeMap::new(),
            closed: false,
        }
    }

    pub fn run_id(&self) -> &str {
        &self.run_id
    }

    pub fn log_param(&mut self, key: &str, value: impl Display) {
        self.params.insert(key.to_string(), value.to_string());
    }

    pub fn log_metric(&mut self, key: &str, value: f64) {
        self.metrics.insert(key.to_string(), value);
    }

    pub fn finish(self) -> RunSummary {
        self.close(RunStatus::Finished)
    }

    pub fn fail(self, reason: &str) -> RunSummary {
        warn!(run_id = %self.run_id, entity_id = %self.entity_id, reason, "run failed");
        self.close(RunStatus::Failed)
    }

    fn close(mut self, status: RunStatus) -> RunSummary {
        self.closed = true;
        let summary = RunSummary {
            run_id: std::mem::take(&mut self.run_id),
            entity_id: self.entity_id,
            status,
            started_at: self.started_at,
            ended_at: Utc::now(),
            params: std::mem::take(&mut self.params),
            metrics: std::mem::take(&mut self.metrics),
        };
        info!(
            run_id = %summary.run_id,
            entity_id = %summary.entity_id,
            status = ?summary.status,
            elapsed_ms = (summary.ended_at - summary.started_at).num_milliseconds(),
            "run closed"
        );
        summary
    }
}

impl Drop for RunContext {
    fn drop(&mut self) {
        if !self.closed {
            warn!(
                run_id = %self.run_id,
                entity_id = %self.entity_id,
                status = ?RunStatus::Failed,
                "run dropped before it was finished"
            );
        }
    }
}
