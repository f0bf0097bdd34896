use std::collections::{BTreeMap, BTreeSet};

use serde::Serialize;
use thiserror::Error;
use tokio::time::sleep;

use crate::classifier::Destination;
use crate::config::{Config, Timing, ms};
use crate::desktop::{Desktop, Gate, InputError, Key};
use crate::grid::Point;
use crate::state::StatusSink;

/// One occupied slot waiting to be moved.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct QueuedItem {
    pub slot: usize,
    pub point: Point,
    pub destination: Destination,
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum TabError {
    #[error("no stash tab configured for {0}")]
    Unknown(&'static str),

    #[error("stash tab {0} is not calibrated")]
    Uncalibrated(&'static str),

    #[error(transparent)]
    Input(#[from] InputError),
}

/// Tracks which stash tab is open. Lives for one dispatch pass.
#[derive(Debug, Default)]
pub struct TabSelector {
    selected: Option<Destination>,
}

impl TabSelector {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn selected(&self) -> Option<Destination> {
        self.selected
    }

    /// Make `destination` the visible tab. A no-op when it already is, and for the
    /// affinity destination, which needs no tab at all.
    pub async fn select<D: Desktop + ?Sized>(
        &mut self,
        desktop: &D,
        config: &Config,
        destination: Destination,
    ) -> Result<(), TabError> {
        if !destination.needs_tab_switch() || self.selected == Some(destination) {
            return Ok(());
        }

        let label = destination.label();
        let tab = config.tab(label).ok_or(TabError::Unknown(label))?;
        if !tab.is_calibrated() {
            return Err(TabError::Uncalibrated(label));
        }

        // Whatever was open before is unknown from here on.
        self.selected = None;
        desktop.move_pointer(Point::new(tab.x, tab.y)).await?;
        sleep(ms(config.timing.tab_click_settle_ms)).await;
        desktop.left_click().await?;
        sleep(ms(config.timing.tab_switch_wait_ms)).await;

        tracing::debug!("selected tab {label} at ({},{})", tab.x, tab.y);
        self.selected = Some(destination);
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct GroupOutcome {
    pub destination: Destination,
    pub queued: usize,
    pub clicked: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct DispatchOutcome {
    /// Slots whose click sequence completed.
    pub clicked: BTreeSet<usize>,
    pub groups: Vec<GroupOutcome>,
    /// Stopped early by cancellation or focus loss.
    pub interrupted: bool,
}

/// Group `queue` by destination, affinity first and the rest by label, and move every
/// item with a modifier click. Returns the slots that were clicked successfully.
pub async fn dispatch<D: Desktop + ?Sized>(
    desktop: &D,
    config: &Config,
    gate: &mut Gate<'_>,
    status: &StatusSink,
    queue: &[QueuedItem],
) -> DispatchOutcome {
    let mut outcome = DispatchOutcome::default();
    let mut selector = TabSelector::new();

    for (destination, items) in group_queue(queue) {
        if !gate.should_continue(desktop).await {
            tracing::info!("dispatch interrupted before {destination}");
            outcome.interrupted = true;
            break;
        }

        status.message(format!("{} items -> {destination}", items.len()));
        let mut group = GroupOutcome {
            destination,
            queued: items.len(),
            clicked: 0,
            error: None,
        };

        if let Err(e) = selector.select(desktop, config, destination).await {
            tracing::error!("skipping {} item(s) for {destination}: {e}", items.len());
            status.message(format!("cannot move items to {destination}: {e}"));
            if matches!(e, TabError::Input(_)) {
                desktop.release_modifiers().await;
            }
            group.error = Some(e.to_string());
            outcome.groups.push(group);
            continue;
        }
        sleep(ms(config.timing.post_switch_wait_ms)).await;

        let interrupted =
            click_group(desktop, &config.timing, gate, &items, &mut group, &mut outcome.clicked)
                .await;
        tracing::info!("{destination}: {}/{} item(s) moved", group.clicked, group.queued);
        outcome.groups.push(group);

        if interrupted {
            outcome.interrupted = true;
            break;
        }
    }

    outcome
}

/// Returns true if the gate closed before all chunks ran.
async fn click_group<D: Desktop + ?Sized>(
    desktop: &D,
    timing: &Timing,
    gate: &mut Gate<'_>,
    items: &[QueuedItem],
    group: &mut GroupOutcome,
    clicked: &mut BTreeSet<usize>,
) -> bool {
    let chunks: Vec<&[QueuedItem]> = items.chunks(timing.chunk_size.max(1)).collect();
    let last = chunks.len().saturating_sub(1);

    for (i, chunk) in chunks.into_iter().enumerate() {
        if !gate.should_continue(desktop).await {
            tracing::info!("{}: interrupted after {} click(s)", group.destination, group.clicked);
            return true;
        }

        for item in chunk {
            match click_item(desktop, timing, item.point).await {
                Ok(()) => {
                    group.clicked += 1;
                    clicked.insert(item.slot);
                }
                Err(e) => {
                    tracing::warn!("slot {} click at {} failed: {e}", item.slot, item.point);
                    desktop.release_modifiers().await;
                }
            }
            sleep(ms(timing.between_clicks_ms)).await;
        }

        if i < last {
            sleep(ms(timing.between_chunks_ms)).await;
        }
    }
    false
}

async fn click_item<D: Desktop + ?Sized>(
    desktop: &D,
    timing: &Timing,
    at: Point,
) -> Result<(), InputError> {
    let step = ms(timing.modifier_step_ms);
    desktop.move_pointer(at).await?;
    desktop.key_down(Key::Control).await?;
    sleep(step).await;
    let click = desktop.left_click().await;
    sleep(step).await;
    desktop.key_up(Key::Control).await?;
    click?;
    sleep(ms(timing.post_click_wait_ms)).await;
    Ok(())
}

fn group_queue(queue: &[QueuedItem]) -> Vec<(Destination, Vec<QueuedItem>)> {
    let mut affinity = Vec::new();
    let mut by_label: BTreeMap<&'static str, (Destination, Vec<QueuedItem>)> = BTreeMap::new();

    for item in queue {
        if item.destination == Destination::Affinity {
            affinity.push(*item);
        } else {
            by_label
                .entry(item.destination.label())
                .or_insert_with(|| (item.destination, Vec::new()))
                .1
                .push(*item);
        }
    }

    let mut groups = Vec::with_capacity(by_label.len() + 1);
    if !affinity.is_empty() {
        groups.push((Destination::Affinity, affinity));
    }
    groups.extend(by_label.into_values());
    groups
}
