//! Recording [`ProcessController`] stub used throughout the test suites.
//!
//! Tracks every `apply` call and, separately, every restart the config
//! content hash would have caused, so tests can assert both "apply was
//! invoked once" and "no extra restart happened".

use std::sync::Mutex;

use async_trait::async_trait;

use crate::error::{Error, Result};
use crate::model::{DesiredConfig, ProcessState};
use crate::process::ProcessController;

#[derive(Default)]
struct Recorded {
    state: Option<ProcessState>,
    applies: usize,
    applied_hashes: Vec<String>,
    restarts: u32,
    stops: u32,
    fail_applies: u32,
}

#[derive(Default)]
pub struct RecordingProcess {
    inner: Mutex<Recorded>,
}

impl RecordingProcess {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Recorded> {
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Make the next `count` apply calls fail their health check.
    pub fn fail_next_applies(&self, count: u32) {
        self.lock().fail_applies = count;
    }

    pub fn set_state(&self, state: ProcessState) {
        self.lock().state = Some(state);
    }

    pub fn apply_count(&self) -> usize {
        self.lock().applies
    }

    pub fn restart_count(&self) -> u32 {
        self.lock().restarts
    }

    pub fn stop_count(&self) -> u32 {
        self.lock().stops
    }

    pub fn last_applied_hash(&self) -> Option<String> {
        self.lock().applied_hashes.last().cloned()
    }
}

#[async_trait]
impl ProcessController for RecordingProcess {
    async fn apply(&self, config: &DesiredConfig) -> Result<ProcessState> {
        let hash = config.content_hash()?;
        let mut rec = self.lock();
        rec.applies += 1;

        if rec.fail_applies > 0 {
            rec.fail_applies -= 1;
            rec.state = Some(ProcessState::Degraded);
            return Err(Error::ProcessApplyFailed(
                "injected health-check failure".to_string(),
            ));
        }

        let restart = rec.applied_hashes.last() != Some(&hash)
            || !matches!(rec.state, Some(ProcessState::Running));
        if restart {
            rec.restarts += 1;
        }
        rec.applied_hashes.push(hash);
        rec.state = Some(ProcessState::Running);
        Ok(ProcessState::Running)
    }

    async fn health_check(&self) -> Result<ProcessState> {
        Ok(self.lock().state.unwrap_or(ProcessState::Stopped))
    }

    async fn stop(&self) -> Result<()> {
        let mut rec = self.lock();
        rec.stops += 1;
        rec.state = Some(ProcessState::Stopped);
        Ok(())
    }
}
