//! Background upgrade job
//!
//! The non-core upgrade batch can run on a dedicated `may` coroutine. The
//! coroutine reports its outcome over a channel so callers (and tests) can
//! wait for completion deterministically instead of polling status.

use crate::error::UpgradeError;
use crate::upgrade::{ModuleGuard, UpgradeReport};
use crossbeam_channel::{bounded, Receiver, TryRecvError};
use std::sync::Arc;

type JobResult = Result<UpgradeReport, UpgradeError>;

/// Handle to a running background upgrade
pub struct UpgradeJob {
    result_rx: Receiver<JobResult>,
    handle: Option<may::coroutine::JoinHandle<()>>,
    result: Option<JobResult>,
}

impl UpgradeJob {
    /// Spawn the worker coroutine
    ///
    /// # Errors
    ///
    /// Returns `UpgradeError::Spawn` if the coroutine cannot be created.
    pub(crate) fn spawn(guard: Arc<ModuleGuard>) -> Result<Self, UpgradeError> {
        let (result_tx, result_rx) = bounded(1);

        let builder = may::coroutine::Builder::new()
            .name("module-upgrade".to_owned())
            .stack_size(0x10_0000);
        let handle = may::go!(builder, move || {
            let report = guard.execute_batch();
            if result_tx.send(Ok(report)).is_err() {
                log::debug!("Background upgrade finished after its job handle was dropped");
            }
        })
        .map_err(UpgradeError::Spawn)?;

        Ok(Self {
            result_rx,
            handle: Some(handle),
            result: None,
        })
    }

    /// The outcome, if the job has finished
    pub fn try_result(&mut self) -> Option<&JobResult> {
        if self.result.is_none() {
            match self.result_rx.try_recv() {
                Ok(result) => self.result = Some(result),
                Err(TryRecvError::Empty) => return None,
                Err(TryRecvError::Disconnected) => self.result = Some(self.join_lost()),
            }
        }
        self.result.as_ref()
    }

    pub fn is_finished(&mut self) -> bool {
        self.try_result().is_some()
    }

    /// Block until the job finishes
    ///
    /// # Errors
    ///
    /// The batch's own error, or `UpgradeError::WorkerLost` if the worker
    /// stopped (for example by panicking) without reporting.
    pub fn wait(mut self) -> JobResult {
        if let Some(result) = self.result.take() {
            return result;
        }
        match self.result_rx.recv() {
            Ok(result) => {
                if let Some(handle) = self.handle.take() {
                    let _ = handle.join();
                }
                result
            }
            Err(_) => self.join_lost(),
        }
    }

    fn join_lost(&mut self) -> JobResult {
        if let Some(handle) = self.handle.take() {
            if handle.join().is_err() {
                log::error!("Background upgrade worker panicked");
            }
        }
        Err(UpgradeError::WorkerLost)
    }
}
