//! Item text classification and destination routing.
//!
//! Item text is what the game puts on the clipboard, for example:
//!
//! ```text
//! Item Class: Stackable Currency
//! Rarity: Currency
//! Orb of Transmutation
//! --------
//! Stack Size: 12/40
//! ```
//!
//! `classify` extracts the few header fields routing needs and derives category
//! flags; `route` turns flags into a destination tab. Results are cached by an MD5
//! fingerprint of the normalized text.

use std::collections::HashMap;

use serde::Serialize;

use crate::config::ItemLists;

const CACHE_CAPACITY: usize = 1000;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Destination {
    /// Catch-all: a modifier click sends the item to its affinity tab, no tab switch.
    Affinity,
    PrecursorTablet,
    Jewel,
    Rune,
    CurrencyCatalyst,
    ChanceItems,
    Rare,
    QualitySocket,
}

impl Destination {
    /// Config key of the tab button for this destination.
    pub fn label(self) -> &'static str {
        match self {
            Destination::Affinity => "AFFINITY",
            Destination::PrecursorTablet => "PRECURSOR_TABLET",
            Destination::Jewel => "JEWEL",
            Destination::Rune => "RUNE",
            Destination::CurrencyCatalyst => "CURRENCY_CATALYST",
            Destination::ChanceItems => "CHANCE_ITEMS",
            Destination::Rare => "RARE",
            Destination::QualitySocket => "QUALITY_SOCKET",
        }
    }

    pub fn needs_tab_switch(self) -> bool {
        self != Destination::Affinity
    }
}

impl std::fmt::Display for Destination {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.label())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Rarity {
    Normal,
    Magic,
    Rare,
    Unique,
    Currency,
    #[default]
    Unknown,
}

impl Rarity {
    fn parse(value: &str) -> Self {
        match value {
            "normal" => Rarity::Normal,
            "magic" => Rarity::Magic,
            "rare" => Rarity::Rare,
            "unique" => Rarity::Unique,
            "currency" => Rarity::Currency,
            _ => Rarity::Unknown,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ItemFlags {
    pub rarity: Rarity,
    pub item_class: Option<String>,
    /// First name line, for logs.
    pub name: String,
    pub quality: bool,
    pub sockets: bool,
    pub stack_size: bool,
    pub jewel: bool,
    pub flask: bool,
    pub waystone: bool,
    pub tablet: bool,
    pub precursor_tablet: bool,
    pub omen: bool,
    pub rune: bool,
    pub quest_item: bool,
    pub chance_base: bool,
    pub stackable_currency: bool,
    pub currency: bool,
    pub ignored: bool,
    pub should_route: bool,
}

impl ItemFlags {
    fn is_rare_or_unique(&self) -> bool {
        matches!(self.rarity, Rarity::Rare | Rarity::Unique)
    }

    /// Categories that own a dedicated destination (or the affinity catch-all).
    fn has_dedicated_destination(&self) -> bool {
        self.precursor_tablet
            || self.omen
            || self.jewel
            || self.rune
            || self.quest_item
            || self.stackable_currency
            || self.currency
    }

    fn is_map_like(&self) -> bool {
        self.flask || self.waystone || self.tablet
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Classification {
    pub flags: ItemFlags,
    pub destination: Option<Destination>,
}

impl Classification {
    fn not_routable() -> Self {
        Self {
            flags: ItemFlags::default(),
            destination: None,
        }
    }
}

/// Lowercased header fields pulled from one pass over the item text.
#[derive(Debug, Default)]
struct Header {
    rarity: Option<String>,
    item_class: Option<String>,
    names: Vec<String>,
    quality: bool,
    sockets: bool,
    stack_size: bool,
}

impl Header {
    fn parse(text_lower: &str) -> Self {
        let mut header = Header::default();
        let mut in_first_block = true;

        for line in text_lower.lines().map(str::trim) {
            if line.starts_with("--------") {
                in_first_block = false;
            } else if let Some(value) = line.strip_prefix("rarity:") {
                header.rarity = Some(value.trim().to_string());
            } else if let Some(value) = line.strip_prefix("item class:") {
                header.item_class = Some(value.trim().to_string());
            } else if line.starts_with("quality:") {
                header.quality = true;
            } else if line.starts_with("sockets:") {
                header.sockets = true;
            } else if line.contains("stack size:") {
                header.stack_size = true;
            } else if in_first_block && !line.is_empty() {
                header.names.push(line.to_string());
            }
        }
        header
    }

    /// The display name: first name line of the header block.
    fn name(&self) -> &str {
        self.names.first().map(String::as_str).unwrap_or_default()
    }

    /// The declared base type: last name line of the header block (rare and unique
    /// items carry a generated name above it).
    fn base_type(&self) -> &str {
        self.names.last().map(String::as_str).unwrap_or_default()
    }
}

/// Maps item text to flags and a destination. Owns the fingerprint cache.
pub struct Classifier {
    lists: LowerLists,
    cache: HashMap<String, Classification>,
}

struct LowerLists {
    ignore_bases: Vec<String>,
    chance_bases: Vec<String>,
    stackable_bases: Vec<String>,
    quest_items: Vec<String>,
}

fn lower_all(items: &[String]) -> Vec<String> {
    items
        .iter()
        .map(|s| s.trim().to_lowercase())
        .filter(|s| !s.is_empty())
        .collect()
}

impl Classifier {
    pub fn new(lists: &ItemLists) -> Self {
        Self {
            lists: LowerLists {
                ignore_bases: lower_all(&lists.ignore_bases),
                chance_bases: lower_all(&lists.chance_bases),
                stackable_bases: lower_all(&lists.stackable_bases),
                quest_items: lower_all(&lists.quest_items),
            },
            cache: HashMap::new(),
        }
    }

    /// Classify and route `text`, consulting the cache first.
    pub fn evaluate(&mut self, text: &str) -> Classification {
        let normalized = normalize(text);
        if normalized.is_empty() {
            return Classification::not_routable();
        }

        let key = fingerprint(&normalized);
        if let Some(hit) = self.cache.get(&key) {
            return hit.clone();
        }

        let flags = self.classify(&normalized);
        let destination = route(&flags);
        if destination.is_none() && flags.should_route {
            tracing::debug!("item '{}' is routable but has no destination", flags.name);
        }

        let result = Classification { flags, destination };
        if self.cache.len() >= CACHE_CAPACITY {
            tracing::debug!("classification cache full, clearing {} entries", self.cache.len());
            self.cache.clear();
        }
        self.cache.insert(key, result.clone());
        result
    }

    pub fn cached_entries(&self) -> usize {
        self.cache.len()
    }

    pub fn clear_cache(&mut self) {
        self.cache.clear();
    }

    /// Derive category flags from item text. Pure given the configured lists.
    pub fn classify(&self, text: &str) -> ItemFlags {
        let text_lower = normalize(text).to_lowercase();
        if text_lower.is_empty() {
            return ItemFlags::default();
        }

        let header = Header::parse(&text_lower);
        let base_type = header.base_type();
        let name = header.name();

        let mut flags = ItemFlags {
            name: name.to_string(),
            ..ItemFlags::default()
        };

        if self.lists.ignore_bases.iter().any(|b| base_type.contains(b.as_str())) {
            flags.ignored = true;
            return flags;
        }

        flags.rarity = header.rarity.as_deref().map(Rarity::parse).unwrap_or_default();
        flags.item_class = header.item_class.clone();
        flags.quality = header.quality;
        flags.sockets = header.sockets;
        flags.stack_size = header.stack_size;

        let class = header.item_class.as_deref().unwrap_or_default();
        flags.jewel = class.contains("jewel");
        flags.flask = class.contains("flask");

        flags.chance_base = contains_any(&text_lower, &self.lists.chance_bases);
        flags.quest_item = contains_any(&text_lower, &self.lists.quest_items);
        flags.precursor_tablet = text_lower.contains("precursor tablet");
        flags.omen = class.contains("omen") || base_type.split_whitespace().any(|w| w == "omen");
        flags.waystone = class.contains("waystone") || base_type.contains("waystone");
        flags.tablet = class.contains("tablet") && !flags.precursor_tablet;

        let is_currency = flags.rarity == Rarity::Currency;
        flags.rune = is_currency && name.contains("rune");

        let stackable =
            header.stack_size || contains_any(base_type, &self.lists.stackable_bases);
        flags.stackable_currency = stackable && is_currency && !flags.rune;

        let currency_like = is_currency || class.contains("currency") || header.stack_size;
        flags.currency =
            currency_like && !flags.rune && !flags.stackable_currency && !flags.quest_item;

        flags.should_route = flags.precursor_tablet
            || flags.jewel
            || flags.rune
            || flags.waystone
            || flags.tablet
            || flags.flask
            || flags.is_rare_or_unique()
            || flags.quality
            || flags.sockets
            || flags.currency
            || (flags.chance_base && flags.rarity == Rarity::Normal)
            || flags.omen
            || flags.quest_item
            || flags.stackable_currency;

        flags
    }
}

/// Destination for a set of flags, by fixed priority. Pure.
pub fn route(flags: &ItemFlags) -> Option<Destination> {
    if !flags.should_route {
        return None;
    }

    if flags.quest_item || flags.precursor_tablet || flags.omen {
        return Some(Destination::PrecursorTablet);
    }
    if flags.jewel {
        return Some(Destination::Jewel);
    }
    if flags.rune {
        return Some(Destination::Rune);
    }
    if flags.stackable_currency {
        return Some(Destination::CurrencyCatalyst);
    }
    if flags.currency {
        return Some(Destination::Affinity);
    }

    let claimed = flags.has_dedicated_destination();

    if flags.rarity == Rarity::Normal && flags.chance_base && !claimed && !flags.is_map_like() {
        return Some(Destination::ChanceItems);
    }
    if flags.is_rare_or_unique() && !claimed {
        return Some(Destination::Rare);
    }
    if (flags.quality || flags.sockets)
        && !claimed
        && !flags.is_rare_or_unique()
        && !flags.is_map_like()
    {
        return Some(Destination::QualitySocket);
    }
    None
}

fn contains_any(haystack: &str, needles: &[String]) -> bool {
    needles.iter().any(|n| haystack.contains(n.as_str()))
}

/// Line endings unified and outer whitespace trimmed, so the same item copied
/// on different platforms fingerprints identically.
fn normalize(text: &str) -> String {
    text.replace("\r\n", "\n").trim().to_string()
}

fn fingerprint(normalized: &str) -> String {
    format!("{:x}", md5::compute(normalized.as_bytes()))
}
