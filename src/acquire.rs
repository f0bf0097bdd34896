//! Slot text acquisition: hover a slot, press Ctrl+C and watch the clipboard.
//!
//! The game gives no signal when it has written the item text, so the only tool is
//! polling. Empty slots are the common case and get a two-read fast path.

use std::time::Duration;

use tokio::time::{Instant, sleep};

use crate::config::{Timing, ms};
use crate::desktop::{Desktop, InputError, Key};
use crate::grid::Point;

/// Return the item text of the slot at `at`, or "" for an empty slot. Never fails:
/// internal errors are logged, modifiers released and "" returned.
pub async fn acquire<D: Desktop + ?Sized>(desktop: &D, timing: &Timing, at: Point) -> String {
    let started = Instant::now();
    match try_acquire(desktop, timing, at).await {
        Ok(text) => {
            if text.is_empty() {
                tracing::debug!("slot {at}: empty after {:.3}s", started.elapsed().as_secs_f64());
            } else {
                tracing::debug!(
                    "slot {at}: '{}' after {:.3}s",
                    first_line(&text),
                    started.elapsed().as_secs_f64()
                );
            }
            text
        }
        Err(e) => {
            tracing::error!("slot {at}: text acquisition failed: {e}");
            desktop.release_modifiers().await;
            String::new()
        }
    }
}

async fn try_acquire<D: Desktop + ?Sized>(
    desktop: &D,
    timing: &Timing,
    at: Point,
) -> Result<String, InputError> {
    // Clipboard and pointer are disjoint resources: clear one while moving the other.
    let hover = async {
        desktop.move_pointer(at).await?;
        sleep(ms(timing.hover_settle_ms)).await;
        Ok::<_, InputError>(())
    };
    let (sentinel, hovered) = tokio::join!(clear_clipboard(desktop, timing), hover);
    let sentinel = sentinel?;
    hovered?;

    copy_gesture(desktop, timing).await?;
    sleep(ms(timing.copy_settle_ms)).await;

    let changed = |text: &str| !text.is_empty() && text != sentinel;

    let mut ambiguous = false;
    match desktop.read_clipboard().await {
        Ok(first) if changed(&first) => return settle_capture(desktop, timing, first, &changed).await,
        Ok(_) => {}
        Err(e) => {
            tracing::debug!("slot {at}: first clipboard read failed: {e}");
            ambiguous = true;
        }
    }

    sleep(ms(timing.empty_recheck_ms)).await;
    match desktop.read_clipboard().await {
        Ok(second) if changed(&second) => {
            return settle_capture(desktop, timing, second, &changed).await;
        }
        Ok(_) if !ambiguous => return Ok(String::new()),
        Ok(_) => {}
        Err(e) => tracing::debug!("slot {at}: second clipboard read failed: {e}"),
    }

    Ok(slow_poll(desktop, timing, at, &changed).await)
}

/// Clear the clipboard and return what it held before, re-checking once that the
/// clear actually took.
async fn clear_clipboard<D: Desktop + ?Sized>(
    desktop: &D,
    timing: &Timing,
) -> Result<String, InputError> {
    let sentinel = desktop.read_clipboard().await?;
    desktop.write_clipboard("").await?;
    sleep(ms(timing.clear_recheck_ms)).await;

    if !desktop.read_clipboard().await?.is_empty() {
        desktop.write_clipboard("").await?;
        sleep(ms(timing.clear_retry_ms)).await;
    }
    Ok(sentinel)
}

async fn copy_gesture<D: Desktop + ?Sized>(desktop: &D, timing: &Timing) -> Result<(), InputError> {
    let step = ms(timing.key_step_ms);
    desktop.key_down(Key::Control).await?;
    sleep(step).await;
    desktop.key_click(Key::Char('c')).await?;
    sleep(step).await;
    desktop.key_up(Key::Control).await
}

/// A capture was seen; give multi-line text a moment to finish and take the later
/// read if it is still a capture.
async fn settle_capture<D: Desktop + ?Sized>(
    desktop: &D,
    timing: &Timing,
    captured: String,
    changed: &impl Fn(&str) -> bool,
) -> Result<String, InputError> {
    sleep(ms(timing.capture_settle_ms)).await;
    match desktop.read_clipboard().await {
        Ok(later) if changed(&later) => Ok(later),
        _ => Ok(captured),
    }
}

/// Slow path with a growing poll interval, bounded by the maximum wait.
async fn slow_poll<D: Desktop + ?Sized>(
    desktop: &D,
    timing: &Timing,
    at: Point,
    changed: &impl Fn(&str) -> bool,
) -> String {
    let max_wait = ms(timing.poll_max_wait_ms);
    let cap = ms(timing.poll_cap_ms);
    let mut interval = ms(timing.poll_base_ms);
    let started = Instant::now();
    let mut attempts = 0u32;

    while started.elapsed() < max_wait {
        attempts += 1;
        sleep(interval).await;
        match desktop.read_clipboard().await {
            Ok(text) if changed(&text) => {
                tracing::debug!("slot {at}: captured after {attempts} slow poll(s)");
                return text;
            }
            Ok(_) => {}
            Err(e) => tracing::debug!("slot {at}: poll {attempts} failed: {e}"),
        }
        interval = next_interval(interval, timing.poll_growth, cap);
    }

    tracing::debug!("slot {at}: nothing captured after {attempts} slow poll(s)");
    // Not the sentinel: an unchanged clipboard still holds the previous slot's text.
    String::new()
}

fn next_interval(current: Duration, growth: f64, cap: Duration) -> Duration {
    Duration::try_from_secs_f64(current.as_secs_f64() * growth.max(1.0)).map_or(cap, |d| d.min(cap))
}

pub(crate) fn first_line(text: &str) -> String {
    let line = text.lines().next().unwrap_or_default().trim();
    if line.chars().count() > 50 {
        format!("{}...", line.chars().take(50).collect::<String>())
    } else {
        line.to_string()
    }
}
