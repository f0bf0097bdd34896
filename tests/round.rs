mod common;

use std::collections::BTreeSet;
use std::sync::Arc;

use common::{CATALYSTS, Event, FakeDesktop, QUALITY_FLASK, RARE_RING, WISDOM_SCROLLS, config};
use stash_sorter::classifier::Destination;
use stash_sorter::config::{Config, GridGeometry};
use stash_sorter::grid::Point;
use stash_sorter::scanner::{RoundOutcome, Sorter};
use stash_sorter::state::{Controller, RoundPhase, StartError, StatusSink};

const SLOTS: [Point; 4] = [
    Point::new(5, 5),
    Point::new(15, 5),
    Point::new(5, 15),
    Point::new(15, 15),
];

fn sorter(fake: &FakeDesktop, config: Config) -> Sorter {
    Sorter::new(Arc::new(fake.clone()), config, StatusSink::new())
}

fn two_by_two() -> FakeDesktop {
    let fake = FakeDesktop::new();
    fake.put(SLOTS[1], RARE_RING);
    fake.put(SLOTS[2], WISDOM_SCROLLS);
    fake.put(SLOTS[3], CATALYSTS);
    fake
}

fn set(items: &[usize]) -> BTreeSet<usize> {
    items.iter().copied().collect()
}

#[tokio::test(start_paused = true)]
async fn test_two_by_two_round() {
    let fake = two_by_two();
    let mut sorter = sorter(&fake, config(2, 2));
    assert_eq!(sorter.grid(), SLOTS);

    let report = sorter.run_round().await;

    assert_eq!(report.outcome, RoundOutcome::Completed);
    let queue: Vec<_> = report.queue.iter().map(|q| (q.slot, q.destination)).collect();
    assert_eq!(
        queue,
        vec![(1, Destination::Rare), (3, Destination::CurrencyCatalyst)]
    );
    assert_eq!(report.skip_set, set(&[0, 2]));
    assert_eq!(sorter.skip_set(), &set(&[0, 2]));

    // CURRENCY_CATALYST is uncalibrated by default: only the rare ring moves.
    assert_eq!(report.clicked, set(&[1]));
    assert_eq!(report.groups.len(), 2);
    assert_eq!(report.groups[0].destination, Destination::CurrencyCatalyst);
    assert_eq!(report.groups[0].clicked, 0);
    assert!(report.groups[0].error.is_some());
    assert_eq!(report.groups[1].destination, Destination::Rare);
    assert_eq!(report.groups[1].clicked, 1);

    assert_eq!(
        fake.clicks(),
        vec![Event::Click(Point::new(1169, 153)), Event::CtrlClick(SLOTS[1])]
    );
    assert_eq!(fake.item(SLOTS[1]), None);
    assert_eq!(fake.item(SLOTS[3]).as_deref(), Some(CATALYSTS));
    assert!(!fake.ctrl_held());
}

#[tokio::test(start_paused = true)]
async fn test_skip_set_slots_are_not_acquired() {
    let fake = two_by_two();
    let mut sorter = sorter(&fake, config(2, 2));
    sorter.run_round().await;
    fake.clear_events();

    let report = sorter.run_round().await;

    assert_eq!(report.candidates, 2);
    assert_eq!(fake.copies_at(SLOTS[0]), 0);
    assert_eq!(fake.copies_at(SLOTS[2]), 0);
    assert_eq!(fake.copies_at(SLOTS[1]), 1);
    assert_eq!(fake.copies_at(SLOTS[3]), 1);
    assert!(!fake.events().contains(&Event::Move(SLOTS[0])));

    // Rebuilt from this round only: slot 1 was moved away and now reads empty,
    // slot 3 is still queued, and slots 0 and 2 come back as candidates.
    assert_eq!(report.skip_set, set(&[1]));
    assert_eq!(report.queue.len(), 1);
    assert_eq!(report.queue[0].slot, 3);
}

#[tokio::test(start_paused = true)]
async fn test_routable_item_without_destination_is_skipped() {
    let fake = FakeDesktop::new();
    fake.put(Point::new(15, 5), QUALITY_FLASK);
    let mut sorter = sorter(&fake, config(1, 2));

    let report = sorter.run_round().await;

    assert_eq!(report.outcome, RoundOutcome::Completed);
    assert!(report.queue.is_empty());
    assert_eq!(report.skip_set, set(&[0, 1]));
    assert!(fake.clicks().is_empty());
    assert_eq!(fake.item(Point::new(15, 5)).as_deref(), Some(QUALITY_FLASK));
}

#[tokio::test(start_paused = true)]
async fn test_cancel_after_first_slot() {
    let fake = FakeDesktop::new();
    for x in [15, 25, 35, 45] {
        fake.put(Point::new(x, 5), RARE_RING);
    }
    let mut sorter = sorter(&fake, config(1, 5));
    fake.cancel_after_copies(1, sorter.cancel_flag());

    let report = sorter.run_round().await;

    assert_eq!(report.outcome, RoundOutcome::Aborted);
    assert_eq!(report.scanned, 1);
    assert_eq!(report.skip_set, set(&[0]));
    assert_eq!(sorter.skip_set(), &set(&[0]));
    assert!(report.queue.is_empty());
    assert!(report.groups.is_empty());
    assert!(fake.clicks().is_empty());
    assert_eq!(sorter.status().snapshot().phase, RoundPhase::Idle);
}

#[tokio::test(start_paused = true)]
async fn test_cancel_keeps_routable_slots_out_of_skip_set() {
    let fake = FakeDesktop::new();
    fake.put(Point::new(5, 5), RARE_RING);
    let mut sorter = sorter(&fake, config(1, 3));
    fake.cancel_after_copies(2, sorter.cancel_flag());

    let report = sorter.run_round().await;

    assert_eq!(report.outcome, RoundOutcome::Aborted);
    assert_eq!(report.scanned, 2);
    assert_eq!(report.skip_set, set(&[1]));
    // Queued but never dispatched.
    assert_eq!(report.queue.len(), 1);
    assert!(fake.clicks().is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_focus_loss_aborts_like_cancellation() {
    let fake = FakeDesktop::new();
    let mut cfg = config(1, 4);
    cfg.timing.window_check_interval_ms = 0;
    let mut sorter = sorter(&fake, cfg);
    fake.unfocus_after_copies(2);

    let report = sorter.run_round().await;

    assert_eq!(report.outcome, RoundOutcome::Aborted);
    assert_eq!(report.scanned, 2);
    assert_eq!(report.skip_set, set(&[0, 1]));
}

#[tokio::test(start_paused = true)]
async fn test_not_focused_does_nothing() {
    let fake = two_by_two();
    fake.set_focused(false);
    let mut sorter = sorter(&fake, config(2, 2));

    let report = sorter.run_round().await;

    assert_eq!(report.outcome, RoundOutcome::NotFocused);
    assert!(fake.events().is_empty());
    assert!(
        sorter
            .status()
            .snapshot()
            .messages
            .iter()
            .any(|m| m.contains("not focused"))
    );
}

#[tokio::test(start_paused = true)]
async fn test_invalid_geometry_has_no_grid() {
    let fake = FakeDesktop::new();
    let mut sorter = sorter(&fake, config(0, 2));

    let report = sorter.run_round().await;

    assert_eq!(report.outcome, RoundOutcome::NoGrid);
    assert!(fake.events().is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_all_skipped_leaves_skip_set_unchanged() {
    let fake = FakeDesktop::new();
    let mut sorter = sorter(&fake, config(2, 2));

    let first = sorter.run_round().await;
    assert_eq!(first.skip_set, set(&[0, 1, 2, 3]));
    fake.clear_events();

    let second = sorter.run_round().await;
    assert_eq!(second.outcome, RoundOutcome::NothingToDo);
    assert_eq!(second.skip_set, set(&[0, 1, 2, 3]));
    assert_eq!(sorter.skip_set(), &set(&[0, 1, 2, 3]));
    assert!(fake.events().is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_progressive_disabled_scans_every_slot() {
    let fake = two_by_two();
    let mut sorter = sorter(&fake, config(2, 2));
    sorter.run_round().await;
    fake.clear_events();

    sorter.set_progressive_scan(false);
    let report = sorter.run_round().await;

    assert_eq!(report.candidates, 4);
    for slot in SLOTS {
        assert_eq!(fake.copies_at(slot), 1, "slot {slot}");
    }
}

#[tokio::test(start_paused = true)]
async fn test_set_geometry_clears_skip_set() {
    let fake = FakeDesktop::new();
    let mut sorter = sorter(&fake, config(2, 2));
    sorter.run_round().await;
    assert_eq!(sorter.skip_set().len(), 4);

    let bad = GridGeometry {
        rows: 0,
        ..GridGeometry::default()
    };
    assert!(sorter.set_geometry(bad).is_err());
    assert_eq!(sorter.grid().len(), 4);
    assert_eq!(sorter.skip_set().len(), 4);

    let geometry = GridGeometry {
        rows: 1,
        columns: 3,
        origin_x: 100,
        origin_y: 100,
        slot_width: 20,
        slot_height: 20,
    };
    sorter.set_geometry(geometry).unwrap();
    assert!(sorter.skip_set().is_empty());
    assert_eq!(
        sorter.grid(),
        [Point::new(110, 110), Point::new(130, 110), Point::new(150, 110)]
    );
}

#[tokio::test(start_paused = true)]
async fn test_progress_messages_every_five_slots() {
    let fake = FakeDesktop::new();
    let status = StatusSink::new();
    let mut sorter = Sorter::new(Arc::new(fake.clone()), config(1, 12), status.clone());

    sorter.run_round().await;

    let progress: Vec<String> = status
        .snapshot()
        .messages
        .into_iter()
        .filter(|m| m.starts_with("scanning slot"))
        .collect();
    assert_eq!(
        progress,
        vec![
            "scanning slot 1/12 (0%)",
            "scanning slot 6/12 (41%)",
            "scanning slot 11/12 (83%)",
        ]
    );
}

#[tokio::test(start_paused = true)]
async fn test_round_log_appends_one_line_per_round() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("rounds.jsonl");

    let fake = two_by_two();
    let mut cfg = config(2, 2);
    cfg.round_log = Some(path.to_str().unwrap().to_string());
    let mut sorter = sorter(&fake, cfg);

    sorter.run_round().await;
    sorter.run_round().await;

    let contents = std::fs::read_to_string(&path).unwrap();
    let lines: Vec<serde_json::Value> = contents
        .lines()
        .map(|l| serde_json::from_str(l).unwrap())
        .collect();
    assert_eq!(lines.len(), 2);
    assert_eq!(lines[0]["queued"], 2);
    assert_eq!(lines[0]["skip_set"], 2);
    assert_eq!(lines[1]["candidates"], 2);
}

#[tokio::test(start_paused = true)]
async fn test_controller_runs_one_round_at_a_time() {
    let fake = two_by_two();
    let controller = Controller::new(sorter(&fake, config(2, 2)));

    let handle = controller.start_round().unwrap();
    assert!(controller.is_running());
    assert_eq!(controller.start_round().unwrap_err(), StartError::AlreadyRunning);

    let report = handle.await.unwrap();
    assert_eq!(report.outcome, RoundOutcome::Completed);
    assert!(!controller.is_running());

    let status = controller.status();
    assert_eq!(status.phase, RoundPhase::Idle);
    assert_eq!(status.last_report.map(|r| r.clicked), Some(set(&[1])));

    // A stale cancellation does not leak into the next round.
    controller.request_cancel();
    let report = controller.start_round().unwrap().await.unwrap();
    assert_eq!(report.outcome, RoundOutcome::Completed);
    assert_eq!(controller.sorter().await.skip_set(), &set(&[1]));
}

#[tokio::test(start_paused = true)]
async fn test_controller_sorter_access_is_not_a_running_round() {
    let fake = two_by_two();
    let controller = Controller::new(sorter(&fake, config(2, 2)));

    let guard = controller.sorter().await;
    assert!(!controller.is_running());
    // The round lock is still taken, so no round can start meanwhile.
    assert_eq!(controller.start_round().unwrap_err(), StartError::AlreadyRunning);
    assert!(!controller.is_running());
    drop(guard);

    let handle = controller.start_round().unwrap();
    assert!(controller.is_running());
    handle.await.unwrap();
    assert!(!controller.is_running());
}

#[tokio::test(start_paused = true)]
async fn test_controller_cancel_stops_running_round() {
    let fake = FakeDesktop::new();
    for x in [5, 15, 25, 35, 45, 55] {
        fake.put(Point::new(x, 5), RARE_RING);
    }
    let controller = Controller::new(sorter(&fake, config(1, 6)));

    let handle = controller.start_round().unwrap();
    // Let the round get through a slot or two on the virtual clock.
    tokio::time::sleep(std::time::Duration::from_millis(400)).await;
    controller.request_cancel();

    let report = handle.await.unwrap();
    assert_eq!(report.outcome, RoundOutcome::Aborted);
    assert!(report.scanned < 6);
    assert!(fake.clicks().is_empty());
}
