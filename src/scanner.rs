use std::collections::BTreeSet;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::time::Instant;

use crate::acquire::{acquire, first_line};
use crate::classifier::Classifier;
use crate::config::{Config, GridGeometry, ms};
use crate::desktop::{CancelFlag, Desktop, FocusProbe, Gate};
use crate::dispatcher::{self, GroupOutcome, QueuedItem};
use crate::grid::{GridError, Point, slot_centers};
use crate::state::{RoundPhase, StatusSink};

const PROGRESS_EVERY: usize = 5;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RoundOutcome {
    /// Scanned and, if anything was queued, dispatched.
    Completed,
    /// Every slot is in the skip set.
    NothingToDo,
    NotFocused,
    NoGrid,
    /// Cancelled or lost focus while scanning or dispatching.
    Aborted,
}

#[derive(Debug, Clone, Serialize)]
pub struct RoundReport {
    pub started_at: DateTime<Utc>,
    pub outcome: RoundOutcome,
    pub candidates: usize,
    pub scanned: usize,
    pub queue: Vec<QueuedItem>,
    /// Skip set carried into the next round.
    pub skip_set: BTreeSet<usize>,
    pub clicked: BTreeSet<usize>,
    pub groups: Vec<GroupOutcome>,
    pub scan_secs: f64,
    pub dispatch_secs: f64,
}

impl RoundReport {
    fn new(outcome: RoundOutcome) -> Self {
        Self {
            started_at: Utc::now(),
            outcome,
            candidates: 0,
            scanned: 0,
            queue: Vec::new(),
            skip_set: BTreeSet::new(),
            clicked: BTreeSet::new(),
            groups: Vec::new(),
            scan_secs: 0.0,
            dispatch_secs: 0.0,
        }
    }
}

/// One JSON line per finished round in the round log.
#[derive(Serialize)]
struct RoundLogEntry<'a> {
    timestamp: String,
    outcome: RoundOutcome,
    candidates: usize,
    scanned: usize,
    queued: usize,
    skip_set: usize,
    clicked: &'a BTreeSet<usize>,
    groups: &'a [GroupOutcome],
    scan_secs: f64,
    dispatch_secs: f64,
}

fn log_round(path: &str, report: &RoundReport) {
    use std::fs::OpenOptions;
    use std::io::Write;

    let entry = RoundLogEntry {
        timestamp: report.started_at.to_rfc3339(),
        outcome: report.outcome,
        candidates: report.candidates,
        scanned: report.scanned,
        queued: report.queue.len(),
        skip_set: report.skip_set.len(),
        clicked: &report.clicked,
        groups: &report.groups,
        scan_secs: report.scan_secs,
        dispatch_secs: report.dispatch_secs,
    };

    let line = match serde_json::to_string(&entry) {
        Ok(l) => l,
        Err(e) => {
            tracing::warn!("failed to serialize round log entry: {e}");
            return;
        }
    };

    match OpenOptions::new().create(true).append(true).open(path) {
        Ok(mut f) => {
            if let Err(e) = writeln!(f, "{line}") {
                tracing::warn!("failed to write to {path}: {e}");
            }
        }
        Err(e) => {
            tracing::warn!("failed to open {path}: {e}");
        }
    }
}

/// Drives scan-and-sort rounds. Owns the skip set, the classifier (and so its cache)
/// and the slot grid; one round runs at a time through `&mut self`.
pub struct Sorter {
    desktop: Arc<dyn Desktop>,
    config: Config,
    grid: Vec<Point>,
    classifier: Classifier,
    skip: BTreeSet<usize>,
    focus: FocusProbe,
    cancel: CancelFlag,
    status: StatusSink,
}

impl Sorter {
    pub fn new(desktop: Arc<dyn Desktop>, config: Config, status: StatusSink) -> Self {
        let grid = match slot_centers(&config.inventory) {
            Ok(grid) => grid,
            Err(e) => {
                tracing::error!("invalid inventory geometry: {e}");
                Vec::new()
            }
        };
        let focus = FocusProbe::new(
            config.window_title.clone(),
            ms(config.timing.window_check_interval_ms),
        );

        Self {
            desktop,
            classifier: Classifier::new(&config.items),
            config,
            grid,
            skip: BTreeSet::new(),
            focus,
            cancel: CancelFlag::new(),
            status,
        }
    }

    pub fn cancel_flag(&self) -> CancelFlag {
        self.cancel.clone()
    }

    pub fn status(&self) -> &StatusSink {
        &self.status
    }

    pub fn grid(&self) -> &[Point] {
        &self.grid
    }

    pub fn skip_set(&self) -> &BTreeSet<usize> {
        &self.skip
    }

    pub fn classifier(&self) -> &Classifier {
        &self.classifier
    }

    /// Replace the slot grid. Slot indices change meaning, so the skip set is dropped.
    /// On error the current grid is kept.
    pub fn set_geometry(&mut self, geometry: GridGeometry) -> Result<(), GridError> {
        self.grid = slot_centers(&geometry)?;
        self.config.inventory = geometry;
        self.skip.clear();
        tracing::info!("inventory grid replaced: {} slots", self.grid.len());
        Ok(())
    }

    pub fn set_progressive_scan(&mut self, enabled: bool) {
        self.config.progressive_scan = enabled;
    }

    /// Run one round: preconditions, scan, dispatch. Never fails; the outcome is in
    /// the report, which is also published to the status sink.
    pub async fn run_round(&mut self) -> RoundReport {
        let report = self.round().await;

        self.status.set_phase(if report.outcome == RoundOutcome::Aborted {
            RoundPhase::Aborted
        } else {
            RoundPhase::Idle
        });
        tracing::info!(
            "round finished: {:?}, scanned {}/{}, queued {}, moved {}, skip set {} ({:.1}s scan, {:.1}s dispatch)",
            report.outcome,
            report.scanned,
            report.candidates,
            report.queue.len(),
            report.clicked.len(),
            report.skip_set.len(),
            report.scan_secs,
            report.dispatch_secs,
        );
        if let Some(path) = &self.config.round_log {
            log_round(path, &report);
        }
        self.status.report(report.clone());
        if report.outcome == RoundOutcome::Aborted {
            self.status.set_phase(RoundPhase::Idle);
        }
        report
    }

    /// Report for a round that ended before scanning anything.
    fn unchanged(&self, outcome: RoundOutcome) -> RoundReport {
        let mut report = RoundReport::new(outcome);
        report.skip_set = self.skip.clone();
        report
    }

    async fn round(&mut self) -> RoundReport {
        let handle = Arc::clone(&self.desktop);
        let desktop: &dyn Desktop = handle.as_ref();

        self.status.set_phase(RoundPhase::CheckingPreconditions);
        self.focus.invalidate();
        if !self.focus.is_focused(desktop).await {
            self.status.message("game window is not focused");
            return self.unchanged(RoundOutcome::NotFocused);
        }
        if self.grid.is_empty() {
            self.status.message("inventory grid is not configured");
            return self.unchanged(RoundOutcome::NoGrid);
        }

        let candidates: Vec<usize> = if self.config.progressive_scan {
            (0..self.grid.len()).filter(|i| !self.skip.contains(i)).collect()
        } else {
            self.skip.clear();
            (0..self.grid.len()).collect()
        };

        let mut report = RoundReport::new(RoundOutcome::Completed);
        report.candidates = candidates.len();
        if candidates.is_empty() {
            tracing::info!("all {} slots are in the skip set", self.grid.len());
            self.status.message("nothing to scan");
            return self.unchanged(RoundOutcome::NothingToDo);
        }

        self.status.set_phase(RoundPhase::Scanning);
        tracing::info!(
            "scanning {} of {} slots{}",
            candidates.len(),
            self.grid.len(),
            if self.config.progressive_scan { " (progressive)" } else { "" }
        );

        let mut gate = Gate {
            cancel: &self.cancel,
            focus: &mut self.focus,
        };
        let timing = &self.config.timing;
        let mut next_skip = BTreeSet::new();
        let mut queue = Vec::new();
        let scan_started = Instant::now();

        for (n, &slot) in candidates.iter().enumerate() {
            if !gate.should_continue(desktop).await {
                tracing::info!("scan interrupted at slot {slot}");
                report.outcome = RoundOutcome::Aborted;
                break;
            }
            if n % PROGRESS_EVERY == 0 {
                self.status.message(format!(
                    "scanning slot {}/{} ({}%)",
                    n + 1,
                    candidates.len(),
                    n * 100 / candidates.len()
                ));
            }

            let point = self.grid[slot];
            let text = acquire(desktop, timing, point).await;
            report.scanned += 1;

            if text.is_empty() {
                next_skip.insert(slot);
                continue;
            }

            let result = self.classifier.evaluate(&text);
            match result.destination {
                Some(destination) if result.flags.should_route => {
                    tracing::debug!("slot {slot}: '{}' -> {destination}", first_line(&result.flags.name));
                    queue.push(QueuedItem {
                        slot,
                        point,
                        destination,
                    });
                }
                _ => {
                    tracing::debug!("slot {slot}: '{}' stays", first_line(&result.flags.name));
                    next_skip.insert(slot);
                }
            }
        }
        report.scan_secs = scan_started.elapsed().as_secs_f64();

        if report.outcome != RoundOutcome::Aborted && !queue.is_empty() {
            self.status.set_phase(RoundPhase::Dispatching);
            self.status.message(format!("processing {} items", queue.len()));

            let dispatch_started = Instant::now();
            let outcome =
                dispatcher::dispatch(desktop, &self.config, &mut gate, &self.status, &queue).await;
            report.dispatch_secs = dispatch_started.elapsed().as_secs_f64();

            report.clicked = outcome.clicked;
            report.groups = outcome.groups;
            if outcome.interrupted {
                report.outcome = RoundOutcome::Aborted;
            }
        }

        self.skip = next_skip;
        report.skip_set = self.skip.clone();
        report.queue = queue;

        self.status.message(match report.outcome {
            RoundOutcome::Aborted => format!(
                "stopped: scanned {}, moved {}",
                report.scanned,
                report.clicked.len()
            ),
            _ => format!(
                "done: scanned {}, moved {}/{}",
                report.scanned,
                report.clicked.len(),
                report.queue.len()
            ),
        });
        report
    }
}
