use std::collections::BTreeMap;
use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    Read {
        path: String,
        source: std::io::Error,
    },

    #[error("failed to parse config file {path}: {source}")]
    Parse {
        path: String,
        source: serde_json::Error,
    },

    #[error("invalid value for {name}: {value}")]
    InvalidEnv { name: String, value: String },
}

/// Every wait of the scan/dispatch pipeline, in milliseconds.
///
/// These are empirically tuned against the game client; none of them is derived
/// from measured latency.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Timing {
    /// Pause before re-reading the clipboard after clearing it.
    pub clear_recheck_ms: u64,
    /// Pause after the second clear attempt.
    pub clear_retry_ms: u64,
    /// Hover settle after the pointer arrives on a slot.
    pub hover_settle_ms: u64,
    /// Pause between the steps of the copy gesture.
    pub key_step_ms: u64,
    /// Wait after the copy gesture before the first clipboard read.
    pub copy_settle_ms: u64,
    /// Wait before the second (empty-slot) read.
    pub empty_recheck_ms: u64,
    /// Extra settle after a successful capture so multi-line text finishes.
    pub capture_settle_ms: u64,
    /// Base interval of the slow clipboard poll.
    pub poll_base_ms: u64,
    /// Multiplicative growth of the slow poll interval.
    pub poll_growth: f64,
    /// Upper bound of the slow poll interval.
    pub poll_cap_ms: u64,
    /// Maximum total wait of the slow poll.
    pub poll_max_wait_ms: u64,
    /// Pause between moving onto a tab button and clicking it.
    pub tab_click_settle_ms: u64,
    /// Settle after a tab click before the tab counts as selected.
    pub tab_switch_wait_ms: u64,
    /// Settle after selecting a destination, before the first item click.
    pub post_switch_wait_ms: u64,
    /// Pause between modifier down, click and modifier up.
    pub modifier_step_ms: u64,
    /// Wait after each item click.
    pub post_click_wait_ms: u64,
    /// Additional pause after every click in a chunk.
    pub between_clicks_ms: u64,
    /// Pause between chunks.
    pub between_chunks_ms: u64,
    /// How long a foreground-window answer stays valid.
    pub window_check_interval_ms: u64,
    /// Items clicked per chunk.
    pub chunk_size: usize,
}

impl Default for Timing {
    fn default() -> Self {
        Self {
            clear_recheck_ms: 30,
            clear_retry_ms: 20,
            hover_settle_ms: 90,
            key_step_ms: 30,
            copy_settle_ms: 50,
            empty_recheck_ms: 60,
            capture_settle_ms: 30,
            poll_base_ms: 100,
            poll_growth: 1.2,
            poll_cap_ms: 100,
            poll_max_wait_ms: 500,
            tab_click_settle_ms: 50,
            tab_switch_wait_ms: 300,
            post_switch_wait_ms: 120,
            modifier_step_ms: 20,
            post_click_wait_ms: 100,
            between_clicks_ms: 60,
            between_chunks_ms: 120,
            window_check_interval_ms: 500,
            chunk_size: 4,
        }
    }
}

pub(crate) fn ms(value: u64) -> Duration {
    Duration::from_millis(value)
}

/// Inventory grid geometry: top-left corner of the first slot, slot size, row/column counts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct GridGeometry {
    pub rows: u32,
    pub columns: u32,
    pub origin_x: i32,
    pub origin_y: i32,
    pub slot_width: i32,
    pub slot_height: i32,
}

impl Default for GridGeometry {
    fn default() -> Self {
        Self {
            rows: 5,
            columns: 12,
            origin_x: 1600,
            origin_y: 876,
            slot_width: 75,
            slot_height: 75,
        }
    }
}

/// Click position of a stash tab button. (0, 0) means not calibrated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct TabPosition {
    pub x: i32,
    pub y: i32,
}

impl TabPosition {
    pub fn is_calibrated(&self) -> bool {
        !(self.x == 0 && self.y == 0)
    }
}

/// Base-name lists used by the classifier. Matching is case-insensitive.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ItemLists {
    pub ignore_bases: Vec<String>,
    pub chance_bases: Vec<String>,
    pub stackable_bases: Vec<String>,
    pub quest_items: Vec<String>,
}

impl Default for ItemLists {
    fn default() -> Self {
        Self {
            ignore_bases: strings(&["Scroll of Wisdom", "Portal Scroll"]),
            chance_bases: strings(&[
                "stellar amulet",
                "sapphire ring",
                "emerald ring",
                "ornate belt",
                "gold ring",
                "gold amulet",
                "heavy belt",
                "solar amulet",
            ]),
            stackable_bases: strings(&["catalyst", "essence", "oil"]),
            quest_items: strings(&["inscribed ultimatum", "djinn barya"]),
        }
    }
}

fn strings(items: &[&str]) -> Vec<String> {
    items.iter().map(|s| s.to_string()).collect()
}

fn default_tabs() -> BTreeMap<String, TabPosition> {
    [
        ("RARE", 1169, 153),
        ("RUNE", 1125, 1047),
        ("JEWEL", 1123, 714),
        ("QUALITY_SOCKET", 1146, 745),
        ("PRECURSOR_TABLET", 1193, 223),
        ("CHANCE_ITEMS", 0, 0),
        ("CURRENCY_CATALYST", 0, 0),
    ]
    .into_iter()
    .map(|(label, x, y)| (label.to_string(), TabPosition { x, y }))
    .collect()
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub timing: Timing,
    pub inventory: GridGeometry,
    pub stash_tabs: BTreeMap<String, TabPosition>,
    pub items: ItemLists,
    /// Substring of the game window title, matched case-insensitively.
    pub window_title: String,
    pub progressive_scan: bool,
    pub debug: bool,
    pub listen_addr: String,
    pub auth_token: Option<String>,
    /// Append one JSON line per finished round to this file.
    pub round_log: Option<String>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            timing: Timing::default(),
            inventory: GridGeometry::default(),
            stash_tabs: default_tabs(),
            items: ItemLists::default(),
            window_title: "Path of Exile".into(),
            progressive_scan: true,
            debug: false,
            listen_addr: "127.0.0.1:8091".into(),
            auth_token: None,
            round_log: None,
        }
    }
}

impl Config {
    /// Load the JSON file named by `SORTER_CONFIG` (default `sorter.json`), then apply
    /// environment overrides. A missing file yields the defaults.
    pub fn load() -> Result<Self, ConfigError> {
        let path = std::env::var("SORTER_CONFIG").unwrap_or_else(|_| "sorter.json".into());
        let mut config = Self::from_file(Path::new(&path))?;
        config.apply_env()?;
        Ok(config)
    }

    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            tracing::info!("config file {} not found, using defaults", path.display());
            return Ok(Self::default());
        }

        let contents = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.display().to_string(),
            source,
        })?;

        Self::from_json(&contents).map_err(|source| ConfigError::Parse {
            path: path.display().to_string(),
            source,
        })
    }

    /// Parse a (possibly partial) JSON document; absent keys keep their defaults and
    /// stash tabs given in the document override the default tab table entry by entry.
    pub fn from_json(contents: &str) -> Result<Self, serde_json::Error> {
        let mut config: Config = serde_json::from_str(contents)?;
        let mut tabs = default_tabs();
        tabs.append(&mut config.stash_tabs);
        config.stash_tabs = tabs;
        Ok(config)
    }

    fn apply_env(&mut self) -> Result<(), ConfigError> {
        if let Ok(addr) = std::env::var("SORTER_LISTEN_ADDR") {
            self.listen_addr = addr;
        }
        if let Ok(token) = std::env::var("SORTER_AUTH_TOKEN") {
            self.auth_token = Some(token).filter(|t| !t.is_empty());
        }
        if let Ok(title) = std::env::var("SORTER_WINDOW_TITLE") {
            self.window_title = title;
        }
        if let Ok(path) = std::env::var("SORTER_ROUND_LOG") {
            self.round_log = Some(path).filter(|p| !p.is_empty());
        }
        if let Some(debug) = bool_env("SORTER_DEBUG")? {
            self.debug = debug;
        }
        if let Some(progressive) = bool_env("SORTER_PROGRESSIVE_SCAN")? {
            self.progressive_scan = progressive;
        }
        Ok(())
    }

    pub fn tab(&self, label: &str) -> Option<TabPosition> {
        self.stash_tabs.get(label).copied()
    }
}

fn bool_env(name: &str) -> Result<Option<bool>, ConfigError> {
    match std::env::var(name) {
        Ok(value) => parse_bool(&value)
            .map(Some)
            .ok_or(ConfigError::InvalidEnv {
                name: name.into(),
                value,
            }),
        Err(_) => Ok(None),
    }
}

fn parse_bool(value: &str) -> Option<bool> {
    match value.trim() {
        "1" => Some(true),
        "0" => Some(false),
        v if v.eq_ignore_ascii_case("true") => Some(true),
        v if v.eq_ignore_ascii_case("false") => Some(false),
        _ => None,
    }
}
