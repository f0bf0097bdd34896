use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;
use tokio::time::Instant;

use crate::grid::Point;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum InputError {
    #[error("input backend unavailable: {0}")]
    Unavailable(String),

    #[error("{action} failed: {reason}")]
    Action { action: &'static str, reason: String },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Key {
    Control,
    Char(char),
}

/// The external resources the core drives: one pointer, one keyboard, one clipboard
/// register and the foreground-window query. All of them are shared with the game
/// client, so callers keep at most one action in flight, except for the clipboard
/// clear that overlaps a pointer move during slot acquisition.
#[async_trait]
pub trait Desktop: Send + Sync {
    async fn move_pointer(&self, to: Point) -> Result<(), InputError>;
    async fn left_click(&self) -> Result<(), InputError>;
    async fn key_down(&self, key: Key) -> Result<(), InputError>;
    async fn key_up(&self, key: Key) -> Result<(), InputError>;
    async fn key_click(&self, key: Key) -> Result<(), InputError>;

    /// Current clipboard text; an empty or non-text clipboard reads as "".
    async fn read_clipboard(&self) -> Result<String, InputError>;
    async fn write_clipboard(&self, text: &str) -> Result<(), InputError>;

    /// Title of the current foreground window, if there is one.
    async fn foreground_title(&self) -> Result<Option<String>, InputError>;

    /// Best-effort release of every modifier the core may hold.
    async fn release_modifiers(&self) {
        if let Err(e) = self.key_up(Key::Control).await {
            tracing::warn!("failed to release ctrl: {e}");
        }
    }
}

/// Cooperative stop signal shared between the control surface and the running round.
#[derive(Debug, Clone, Default)]
pub struct CancelFlag(Arc<AtomicBool>);

impl CancelFlag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn reset(&self) {
        self.0.store(false, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// "Is the game focused?" with the answer cached for a short interval, so the
/// per-slot checks do not hammer the window system.
#[derive(Debug)]
pub struct FocusProbe {
    title: String,
    interval: Duration,
    last: Option<(Instant, bool)>,
}

impl FocusProbe {
    pub fn new(title: impl Into<String>, interval: Duration) -> Self {
        Self {
            title: title.into().to_lowercase(),
            interval,
            last: None,
        }
    }

    pub async fn is_focused<D: Desktop + ?Sized>(&mut self, desktop: &D) -> bool {
        if let Some((at, result)) = self.last
            && at.elapsed() < self.interval
        {
            return result;
        }

        let result = match desktop.foreground_title().await {
            Ok(Some(title)) => title.to_lowercase().contains(&self.title),
            Ok(None) => false,
            Err(e) => {
                tracing::warn!("foreground window query failed: {e}");
                false
            }
        };
        self.last = Some((Instant::now(), result));
        result
    }

    pub fn invalidate(&mut self) {
        self.last = None;
    }
}

/// Continuation check used between slots, groups and chunks: not cancelled and
/// the game still in the foreground.
pub struct Gate<'a> {
    pub cancel: &'a CancelFlag,
    pub focus: &'a mut FocusProbe,
}

impl Gate<'_> {
    pub async fn should_continue<D: Desktop + ?Sized>(&mut self, desktop: &D) -> bool {
        !self.cancel.is_cancelled() && self.focus.is_focused(desktop).await
    }
}
