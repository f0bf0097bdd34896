#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;

use stash_sorter::config::{Config, GridGeometry};
use stash_sorter::desktop::{CancelFlag, Desktop, InputError, Key};
use stash_sorter::grid::Point;

pub const RARE_RING: &str = "Rarity: Rare\nItem Class: Rings\nSome Ring";
pub const WISDOM_SCROLLS: &str =
    "Item Class: Stackable Currency\nRarity: Currency\nScroll of Wisdom\n--------\nStack Size: 5/40";
pub const CATALYSTS: &str =
    "Item Class: Stackable Currency\nRarity: Currency\nFlesh Catalyst\n--------\nStack Size: 3/20";
pub const JEWEL: &str = "Item Class: Jewels\nRarity: Rare\nGrim Spark\nRuby";
/// Routable by quality, but no tab takes flasks.
pub const QUALITY_FLASK: &str =
    "Item Class: Life Flasks\nRarity: Normal\nLesser Life Flask\n--------\nQuality: +5%";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Event {
    Move(Point),
    /// Plain click, e.g. on a stash tab.
    Click(Point),
    /// Click with Ctrl held: moves the item under the pointer.
    CtrlClick(Point),
    /// Copy gesture at the pointer.
    Copy(Point),
    CtrlUp,
}

#[derive(Default)]
struct Inner {
    items: HashMap<Point, String>,
    clipboard: String,
    pointer: Option<Point>,
    ctrl: bool,
    focused: bool,
    events: Vec<Event>,
    copies: usize,
    ctrl_clicks: usize,
    ctrl_attempts: usize,
    failing_ctrl_click: Option<usize>,
    cancel_after_copies: Option<(usize, CancelFlag)>,
    cancel_after_clicks: Option<(usize, CancelFlag)>,
    unfocus_after_copies: Option<usize>,
    failing_reads_after_copy: usize,
    pending_failures: usize,
    fail_moves: bool,
}

/// Scripted stand-in for the game client: items keyed by slot center, one
/// clipboard, one pointer.
#[derive(Clone, Default)]
pub struct FakeDesktop {
    inner: Arc<Mutex<Inner>>,
}

impl FakeDesktop {
    pub fn new() -> Self {
        let fake = Self::default();
        fake.inner.lock().unwrap().focused = true;
        fake
    }

    pub fn put(&self, at: Point, text: &str) {
        self.inner.lock().unwrap().items.insert(at, text.to_string());
    }

    pub fn item(&self, at: Point) -> Option<String> {
        self.inner.lock().unwrap().items.get(&at).cloned()
    }

    pub fn set_focused(&self, focused: bool) {
        self.inner.lock().unwrap().focused = focused;
    }

    pub fn cancel_after_copies(&self, copies: usize, flag: CancelFlag) {
        self.inner.lock().unwrap().cancel_after_copies = Some((copies, flag));
    }

    pub fn cancel_after_clicks(&self, clicks: usize, flag: CancelFlag) {
        self.inner.lock().unwrap().cancel_after_clicks = Some((clicks, flag));
    }

    pub fn unfocus_after_copies(&self, copies: usize) {
        self.inner.lock().unwrap().unfocus_after_copies = Some(copies);
    }

    /// Every copy gesture makes the following `n` clipboard reads fail.
    pub fn fail_reads_after_copy(&self, n: usize) {
        self.inner.lock().unwrap().failing_reads_after_copy = n;
    }

    /// The `n`th Ctrl-click (1-based) fails and leaves the item in place.
    pub fn fail_ctrl_click(&self, n: usize) {
        self.inner.lock().unwrap().failing_ctrl_click = Some(n);
    }

    pub fn fail_moves(&self, fail: bool) {
        self.inner.lock().unwrap().fail_moves = fail;
    }

    pub fn ctrl_held(&self) -> bool {
        self.inner.lock().unwrap().ctrl
    }

    pub fn events(&self) -> Vec<Event> {
        self.inner.lock().unwrap().events.clone()
    }

    pub fn clear_events(&self) {
        self.inner.lock().unwrap().events.clear();
    }

    pub fn copies_at(&self, at: Point) -> usize {
        self.events()
            .iter()
            .filter(|e| **e == Event::Copy(at))
            .count()
    }

    pub fn clicks(&self) -> Vec<Event> {
        self.events()
            .into_iter()
            .filter(|e| matches!(e, Event::Click(_) | Event::CtrlClick(_)))
            .collect()
    }
}

fn backend_error(action: &'static str) -> InputError {
    InputError::Action {
        action,
        reason: "scripted failure".into(),
    }
}

#[async_trait]
impl Desktop for FakeDesktop {
    async fn move_pointer(&self, to: Point) -> Result<(), InputError> {
        let mut inner = self.inner.lock().unwrap();
        if inner.fail_moves {
            return Err(backend_error("pointer move"));
        }
        inner.pointer = Some(to);
        inner.events.push(Event::Move(to));
        Ok(())
    }

    async fn left_click(&self) -> Result<(), InputError> {
        let mut inner = self.inner.lock().unwrap();
        let Some(at) = inner.pointer else {
            return Err(backend_error("click"));
        };

        if inner.ctrl {
            inner.ctrl_attempts += 1;
            if inner.failing_ctrl_click == Some(inner.ctrl_attempts) {
                return Err(backend_error("click"));
            }
            inner.items.remove(&at);
            inner.events.push(Event::CtrlClick(at));
            inner.ctrl_clicks += 1;
            if let Some((after, flag)) = &inner.cancel_after_clicks
                && inner.ctrl_clicks >= *after
            {
                flag.cancel();
            }
        } else {
            inner.events.push(Event::Click(at));
        }
        Ok(())
    }

    async fn key_down(&self, key: Key) -> Result<(), InputError> {
        if key == Key::Control {
            self.inner.lock().unwrap().ctrl = true;
        }
        Ok(())
    }

    async fn key_up(&self, key: Key) -> Result<(), InputError> {
        if key == Key::Control {
            let mut inner = self.inner.lock().unwrap();
            inner.ctrl = false;
            inner.events.push(Event::CtrlUp);
        }
        Ok(())
    }

    async fn key_click(&self, key: Key) -> Result<(), InputError> {
        let mut inner = self.inner.lock().unwrap();
        if key != Key::Char('c') || !inner.ctrl {
            return Ok(());
        }
        let Some(at) = inner.pointer else {
            return Ok(());
        };

        inner.events.push(Event::Copy(at));
        inner.copies += 1;
        if let Some(text) = inner.items.get(&at).cloned() {
            inner.clipboard = text;
        }
        inner.pending_failures = inner.failing_reads_after_copy;

        if let Some((after, flag)) = &inner.cancel_after_copies
            && inner.copies >= *after
        {
            flag.cancel();
        }
        let copies = inner.copies;
        if inner.unfocus_after_copies.is_some_and(|after| copies >= after) {
            inner.focused = false;
        }
        Ok(())
    }

    async fn read_clipboard(&self) -> Result<String, InputError> {
        let mut inner = self.inner.lock().unwrap();
        if inner.pending_failures > 0 {
            inner.pending_failures -= 1;
            return Err(backend_error("clipboard read"));
        }
        Ok(inner.clipboard.clone())
    }

    async fn write_clipboard(&self, text: &str) -> Result<(), InputError> {
        self.inner.lock().unwrap().clipboard = text.to_string();
        Ok(())
    }

    async fn foreground_title(&self) -> Result<Option<String>, InputError> {
        let focused = self.inner.lock().unwrap().focused;
        Ok(Some(if focused { "Path of Exile 2" } else { "Terminal" }.to_string()))
    }
}

/// Default config with a `rows` x `columns` grid of 10px slots at the origin.
pub fn config(rows: u32, columns: u32) -> Config {
    Config {
        inventory: GridGeometry {
            rows,
            columns,
            origin_x: 0,
            origin_y: 0,
            slot_width: 10,
            slot_height: 10,
        },
        ..Config::default()
    }
}
