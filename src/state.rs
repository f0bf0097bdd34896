use std::collections::VecDeque;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use serde::Serialize;
use thiserror::Error;
use tokio::sync::{Mutex, watch};
use tokio::task::JoinHandle;

use crate::desktop::CancelFlag;
use crate::scanner::{RoundReport, Sorter};

const RECENT_MESSAGES: usize = 20;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RoundPhase {
    #[default]
    Idle,
    CheckingPreconditions,
    Scanning,
    Dispatching,
    Aborted,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct StatusSnapshot {
    pub phase: RoundPhase,
    /// Newest last.
    pub messages: VecDeque<String>,
    pub last_report: Option<RoundReport>,
}

/// One-way progress channel out of the core. Writers never block and never read back.
#[derive(Clone)]
pub struct StatusSink {
    tx: Arc<watch::Sender<StatusSnapshot>>,
}

impl StatusSink {
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(StatusSnapshot::default());
        Self { tx: Arc::new(tx) }
    }

    pub fn set_phase(&self, phase: RoundPhase) {
        self.tx.send_if_modified(|s| {
            let changed = s.phase != phase;
            s.phase = phase;
            changed
        });
    }

    pub fn message(&self, message: impl Into<String>) {
        let message = message.into();
        tracing::debug!("status: {message}");
        self.tx.send_modify(|s| {
            if s.messages.len() >= RECENT_MESSAGES {
                s.messages.pop_front();
            }
            s.messages.push_back(message);
        });
    }

    pub fn report(&self, report: RoundReport) {
        self.tx.send_modify(|s| s.last_report = Some(report));
    }

    pub fn snapshot(&self) -> StatusSnapshot {
        self.tx.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<StatusSnapshot> {
        self.tx.subscribe()
    }
}

impl Default for StatusSink {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum StartError {
    #[error("a round is already running")]
    AlreadyRunning,
}

/// The two entry points of the core: start one round, request cancellation.
pub struct Controller {
    sorter: Arc<Mutex<Sorter>>,
    running: Arc<AtomicBool>,
    cancel: CancelFlag,
    status: StatusSink,
}

/// Clears the running flag when the round task ends, panics included.
struct RunningGuard(Arc<AtomicBool>);

impl Drop for RunningGuard {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

impl Controller {
    pub fn new(sorter: Sorter) -> Self {
        let cancel = sorter.cancel_flag();
        let status = sorter.status().clone();
        Self {
            sorter: Arc::new(Mutex::new(sorter)),
            running: Arc::new(AtomicBool::new(false)),
            cancel,
            status,
        }
    }

    /// Spawn one round. At most one round runs at a time.
    pub fn start_round(&self) -> Result<JoinHandle<RoundReport>, StartError> {
        let mut sorter = Arc::clone(&self.sorter)
            .try_lock_owned()
            .map_err(|_| StartError::AlreadyRunning)?;
        self.cancel.reset();
        self.running.store(true, Ordering::Release);
        let running = RunningGuard(Arc::clone(&self.running));

        Ok(tokio::spawn(async move {
            let report = sorter.run_round().await;
            drop(sorter);
            drop(running);
            report
        }))
    }

    pub fn request_cancel(&self) {
        tracing::info!("cancellation requested");
        self.cancel.cancel();
    }

    /// True while a spawned round is in flight. Holding [`Controller::sorter`] does not count.
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    pub fn status(&self) -> StatusSnapshot {
        self.status.snapshot()
    }

    pub fn subscribe(&self) -> watch::Receiver<StatusSnapshot> {
        self.status.subscribe()
    }

    /// Exclusive access to the sorter between rounds, e.g. to replace the grid.
    pub async fn sorter(&self) -> tokio::sync::MutexGuard<'_, Sorter> {
        self.sorter.lock().await
    }
}
