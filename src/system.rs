//! Real desktop backend.
//!
//! `enigo` and `arboard` handles are not guaranteed to be `Send` on every platform, so
//! both live on one dedicated driver thread. Async callers send commands over a channel
//! and await the reply, which also serializes every pointer, keyboard and clipboard
//! action against the game client. The foreground-window query runs on the same
//! thread: Win32 `GetForegroundWindow` on Windows, `xdotool` elsewhere.

use std::sync::mpsc as std_mpsc;

use anyhow::{Context, Result};
use arboard::Clipboard;
use async_trait::async_trait;
use enigo::{Button, Coordinate, Direction, Enigo, Keyboard, Mouse, Settings};
use tokio::sync::{mpsc, oneshot};

use crate::desktop::{Desktop, InputError, Key};
use crate::grid::Point;

type Reply<T> = oneshot::Sender<Result<T, InputError>>;

enum Command {
    Move(Point, Reply<()>),
    Click(Reply<()>),
    Key(Key, Direction, Reply<()>),
    ReadClipboard(Reply<String>),
    WriteClipboard(String, Reply<()>),
    ForegroundTitle(Reply<Option<String>>),
}

pub struct SystemDesktop {
    tx: mpsc::UnboundedSender<Command>,
}

impl SystemDesktop {
    /// Start the driver thread and wait until the input and clipboard handles exist.
    pub fn launch() -> Result<Self> {
        let (tx, rx) = mpsc::unbounded_channel();
        let (ready_tx, ready_rx) = std_mpsc::channel();

        std::thread::Builder::new()
            .name("input-driver".into())
            .spawn(move || {
                let enigo = Enigo::new(&Settings::default())
                    .map_err(|e| format!("input simulator: {e}"));
                let clipboard = Clipboard::new().map_err(|e| format!("clipboard: {e}"));
                match (enigo, clipboard) {
                    (Ok(enigo), Ok(clipboard)) => {
                        let _ = ready_tx.send(Ok(()));
                        Driver { enigo, clipboard }.run(rx);
                    }
                    (Err(e), _) | (_, Err(e)) => {
                        let _ = ready_tx.send(Err(e));
                    }
                }
            })
            .context("failed to spawn input driver thread")?;

        ready_rx
            .recv()
            .context("input driver thread exited during startup")?
            .map_err(|e| anyhow::anyhow!(e))
            .context("failed to initialize desktop backend")?;

        tracing::info!("desktop backend ready");
        Ok(Self { tx })
    }

    async fn call<T>(&self, build: impl FnOnce(Reply<T>) -> Command) -> Result<T, InputError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.tx
            .send(build(reply_tx))
            .map_err(|_| InputError::Unavailable("input driver stopped".into()))?;
        reply_rx
            .await
            .map_err(|_| InputError::Unavailable("input driver dropped the request".into()))?
    }
}

#[async_trait]
impl Desktop for SystemDesktop {
    async fn move_pointer(&self, to: Point) -> Result<(), InputError> {
        self.call(|r| Command::Move(to, r)).await
    }

    async fn left_click(&self) -> Result<(), InputError> {
        self.call(Command::Click).await
    }

    async fn key_down(&self, key: Key) -> Result<(), InputError> {
        self.call(|r| Command::Key(key, Direction::Press, r)).await
    }

    async fn key_up(&self, key: Key) -> Result<(), InputError> {
        self.call(|r| Command::Key(key, Direction::Release, r)).await
    }

    async fn key_click(&self, key: Key) -> Result<(), InputError> {
        self.call(|r| Command::Key(key, Direction::Click, r)).await
    }

    async fn read_clipboard(&self) -> Result<String, InputError> {
        self.call(Command::ReadClipboard).await
    }

    async fn write_clipboard(&self, text: &str) -> Result<(), InputError> {
        let text = text.to_string();
        self.call(|r| Command::WriteClipboard(text, r)).await
    }

    async fn foreground_title(&self) -> Result<Option<String>, InputError> {
        self.call(Command::ForegroundTitle).await
    }
}

struct Driver {
    enigo: Enigo,
    clipboard: Clipboard,
}

impl Driver {
    fn run(mut self, mut rx: mpsc::UnboundedReceiver<Command>) {
        while let Some(command) = rx.blocking_recv() {
            match command {
                Command::Move(to, reply) => {
                    let result = self
                        .enigo
                        .move_mouse(to.x, to.y, Coordinate::Abs)
                        .map_err(|e| action_error("pointer move", e));
                    let _ = reply.send(result);
                }
                Command::Click(reply) => {
                    let result = self
                        .enigo
                        .button(Button::Left, Direction::Click)
                        .map_err(|e| action_error("click", e));
                    let _ = reply.send(result);
                }
                Command::Key(key, direction, reply) => {
                    let key = match key {
                        Key::Control => enigo::Key::Control,
                        Key::Char(c) => enigo::Key::Unicode(c),
                    };
                    let result = self
                        .enigo
                        .key(key, direction)
                        .map_err(|e| action_error("key event", e));
                    let _ = reply.send(result);
                }
                Command::ReadClipboard(reply) => {
                    let result = match self.clipboard.get_text() {
                        Ok(text) => Ok(text),
                        Err(arboard::Error::ContentNotAvailable) => Ok(String::new()),
                        Err(e) => Err(action_error("clipboard read", e)),
                    };
                    let _ = reply.send(result);
                }
                Command::WriteClipboard(text, reply) => {
                    let result = if text.is_empty() {
                        self.clipboard.clear()
                    } else {
                        self.clipboard.set_text(text)
                    }
                    .map_err(|e| action_error("clipboard write", e));
                    let _ = reply.send(result);
                }
                Command::ForegroundTitle(reply) => {
                    let _ = reply.send(foreground_title());
                }
            }
        }
        tracing::debug!("input driver channel closed, thread exiting");
    }
}

/// Title of the foreground window. No foreground window, or one without a title,
/// reads as `None`.
#[cfg(windows)]
fn foreground_title() -> Result<Option<String>, InputError> {
    use windows::Win32::UI::WindowsAndMessaging::{GetForegroundWindow, GetWindowTextW};

    let mut buf = [0u16; 512];
    // SAFETY: GetWindowTextW writes at most buf.len() code units into a buffer we own.
    let len = unsafe {
        let hwnd = GetForegroundWindow();
        if hwnd.0.is_null() {
            return Ok(None);
        }
        GetWindowTextW(hwnd, &mut buf)
    };
    Ok(utf16_title(&buf, len))
}

/// Title of the active X11 window via `xdotool`. A failing query (no GUI session, no
/// active window) reads as "no foreground window".
#[cfg(not(windows))]
fn foreground_title() -> Result<Option<String>, InputError> {
    let output = std::process::Command::new("xdotool")
        .args(["getactivewindow", "getwindowname"])
        .stdin(std::process::Stdio::null())
        .output()
        .map_err(|e| action_error("foreground window query", e))?;
    if !output.status.success() {
        return Ok(None);
    }

    Ok(text_title(&output.stdout))
}

#[cfg_attr(not(windows), allow(dead_code))]
fn utf16_title(buf: &[u16], len: i32) -> Option<String> {
    let len = usize::try_from(len).ok()?.min(buf.len());
    text_title(String::from_utf16_lossy(&buf[..len]).as_bytes())
}

fn text_title(raw: &[u8]) -> Option<String> {
    let title = String::from_utf8_lossy(raw).trim().to_string();
    Some(title).filter(|t| !t.is_empty())
}

fn action_error(action: &'static str, e: impl std::fmt::Display) -> InputError {
    InputError::Action {
        action,
        reason: e.to_string(),
    }
}
