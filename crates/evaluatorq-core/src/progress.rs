//! Run progress as a single-writer state record.
//!
//! All writers go through [`ProgressTracker::update`], which applies the
//! change under the `watch` channel's lock. Renderers subscribe and read
//! snapshots.

use std::sync::Arc;

use serde::Serialize;
use tokio::sync::watch;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    #[default]
    Initializing,
    Fetching,
    Processing,
    Evaluating,
    Completed,
}

/// Snapshot of where a run is.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ProgressState {
    pub phase: Phase,
    pub total_data_points: Option<usize>,
    pub current_data_point: Option<usize>,
    pub current_job: Option<String>,
    pub current_evaluator: Option<String>,
    /// Data points whose pipeline has finished. Only ever increases.
    pub completed_data_points: usize,
}

/// A partial update; unset fields keep their current value.
#[derive(Debug, Clone, PartialEq)]
pub struct ProgressUpdate {
    pub phase: Phase,
    pub total_data_points: Option<usize>,
    pub current_data_point: Option<usize>,
    pub current_job: Option<String>,
    pub current_evaluator: Option<String>,
}

impl ProgressUpdate {
    pub fn phase(phase: Phase) -> Self {
        Self {
            phase,
            total_data_points: None,
            current_data_point: None,
            current_job: None,
            current_evaluator: None,
        }
    }

    pub fn total(mut self, total: usize) -> Self {
        self.total_data_points = Some(total);
        self
    }

    pub fn data_point(mut self, row: usize) -> Self {
        self.current_data_point = Some(row);
        self
    }

    pub fn job(mut self, name: impl Into<String>) -> Self {
        self.current_job = Some(name.into());
        self
    }

    pub fn evaluator(mut self, name: impl Into<String>) -> Self {
        self.current_evaluator = Some(name.into());
        self
    }
}

#[derive(Debug, Clone)]
pub struct ProgressTracker {
    tx: Arc<watch::Sender<ProgressState>>,
}

impl Default for ProgressTracker {
    fn default() -> Self {
        Self::new()
    }
}

impl ProgressTracker {
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(ProgressState::default());
        Self { tx: Arc::new(tx) }
    }

    pub fn subscribe(&self) -> watch::Receiver<ProgressState> {
        self.tx.subscribe()
    }

    pub fn snapshot(&self) -> ProgressState {
        self.tx.borrow().clone()
    }

    pub fn update(&self, update: ProgressUpdate) {
        self.tx.send_modify(|state| {
            state.phase = update.phase;
            if let Some(total) = update.total_data_points {
                state.total_data_points = Some(total);
            }
            if let Some(row) = update.current_data_point {
                state.current_data_point = Some(row);
            }
            if let Some(job) = update.current_job {
                state.current_job = Some(job);
            }
            if let Some(evaluator) = update.current_evaluator {
                state.current_evaluator = Some(evaluator);
            }
        });
    }

    /// Grow the known total by `n` (streaming sources discover points in pages).
    pub fn add_total(&self, n: usize) {
        self.tx.send_modify(|state| {
            state.total_data_points = Some(state.total_data_points.unwrap_or(0) + n);
        });
    }

    pub fn data_point_completed(&self) {
        self.tx.send_modify(|state| state.completed_data_points += 1);
    }

    pub fn complete(&self) {
        self.tx.send_modify(|state| {
            state.phase = Phase::Completed;
            state.current_job = None;
            state.current_evaluator = None;
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn partial_updates_keep_unset_fields() {
        let tracker = ProgressTracker::new();
        tracker.update(ProgressUpdate::phase(Phase::Processing).total(3).data_point(1));
        tracker.update(ProgressUpdate::phase(Phase::Evaluating).job("double").evaluator("exact"));

        let state = tracker.snapshot();
        assert_eq!(state.phase, Phase::Evaluating);
        assert_eq!(state.total_data_points, Some(3));
        assert_eq!(state.current_data_point, Some(1));
        assert_eq!(state.current_job.as_deref(), Some("double"));
    }

    #[tokio::test]
    async fn completion_counter_survives_concurrent_writers() {
        let tracker = ProgressTracker::new();
        let mut handles = Vec::new();
        for _ in 0..32 {
            let tracker = tracker.clone();
            handles.push(tokio::spawn(async move {
                tracker.add_total(1);
                tracker.data_point_completed();
            }));
        }
        for handle in handles {
            handle.await.unwrap();
        }
        let state = tracker.snapshot();
        assert_eq!(state.completed_data_points, 32);
        assert_eq!(state.total_data_points, Some(32));
    }

    #[tokio::test]
    async fn subscribers_see_completion() {
        let tracker = ProgressTracker::new();
        let mut rx = tracker.subscribe();
        tracker.complete();
        rx.changed().await.unwrap();
        assert_eq!(rx.borrow().phase, Phase::Completed);
    }
}
