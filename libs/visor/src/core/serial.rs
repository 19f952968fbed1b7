// Copyright (c) 2025 Jonathan Fontanez
// SPDX-License-Identifier: BUSL-1.1

//! Line-oriented command/response channels.
//!
//! The engine talks to the outside world over any number of [`TextChannel`]
//! objects: the 4-pin hardware serial port, the serial-over-USB port, or the
//! terminal the daemon was started in. Channels are polled from the loop
//! thread; a read never blocks. The stdio channel owns a reader thread and
//! hands completed lines over a crossbeam channel, so the loop-side poll is
//! a `try_recv`.

use crate::core::error::{Result, VisorError};
use std::fmt;
use std::io::{BufRead, Write};
use std::str::FromStr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Transport tag, used by the serial fan-out to pick destinations.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelKind {
    /// 4-pin connector hardware serial port.
    Hardware,
    /// Serial-over-USB port.
    Usb,
    /// Terminal stdin/stdout (host mode stand-in for the hardware port).
    Stdio,
}

/// Destination selector for the `serlog` / `serout` parameters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum SerPort {
    #[default]
    None,
    All,
    Hard,
    Usb,
}

impl SerPort {
    /// Whether a channel of the given kind is selected.
    ///
    /// `Hard` matches stdio channels too: in host mode the console stands in
    /// for the hardware serial port.
    pub fn selects(&self, kind: ChannelKind) -> bool {
        match self {
            Self::None => false,
            Self::All => true,
            Self::Hard => matches!(kind, ChannelKind::Hardware | ChannelKind::Stdio),
            Self::Usb => kind == ChannelKind::Usb,
        }
    }
}

impl FromStr for SerPort {
    type Err = VisorError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "None" => Ok(Self::None),
            "All" => Ok(Self::All),
            "Hard" => Ok(Self::Hard),
            "USB" => Ok(Self::Usb),
            _ => Err(VisorError::InvalidValue(format!(
                "'{s}' is not one of None|All|Hard|USB"
            ))),
        }
    }
}

impl fmt::Display for SerPort {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::None => "None",
            Self::All => "All",
            Self::Hard => "Hard",
            Self::Usb => "USB",
        })
    }
}

/// Bidirectional line-delimited command/response transport.
pub trait TextChannel: Send {
    fn kind(&self) -> ChannelKind;

    /// Return one complete line if available. Must never block.
    fn try_read_line(&mut self) -> Option<String>;

    /// Write one line; the channel appends its own line terminator.
    fn write_line(&mut self, line: &str) -> Result<()>;
}

/// Best-effort delivery of one line to every channel the selector picks.
///
/// A write failure on one channel is logged and skipped; it neither blocks
/// nor drops delivery to the remaining channels.
pub fn fan_out(channels: &mut [Box<dyn TextChannel>], port: SerPort, text: &str) {
    for chan in channels.iter_mut().filter(|c| port.selects(c.kind())) {
        if let Err(e) = chan.write_line(text) {
            tracing::warn!("Dropped serial message on {:?} channel: {e}", chan.kind());
        }
    }
}

/// Terminal-backed channel for running on a host computer.
///
/// A reader thread blocks on stdin and forwards completed lines; the thread
/// is detached on drop (it is parked in a blocking read) and exits on the
/// next line once the running flag clears.
pub struct StdioChannel {
    rx: crossbeam_channel::Receiver<String>,
    running: Arc<AtomicBool>,
}

impl StdioChannel {
    pub fn new() -> Self {
        let (tx, rx) = crossbeam_channel::unbounded();
        let running = Arc::new(AtomicBool::new(true));
        let thread_running = Arc::clone(&running);

        let spawned = std::thread::Builder::new()
            .name("visor-stdio".to_string())
            .spawn(move || {
                let stdin = std::io::stdin();
                let mut line = String::new();
                loop {
                    line.clear();
                    match stdin.lock().read_line(&mut line) {
                        Ok(0) => break, // EOF
                        Ok(_) => {
                            if !thread_running.load(Ordering::SeqCst) {
                                break;
                            }
                            let trimmed = line.trim_end_matches(['\r', '\n']).to_string();
                            if tx.send(trimmed).is_err() {
                                break;
                            }
                        }
                        Err(e) => {
                            tracing::warn!("stdin read failed: {e}");
                            break;
                        }
                    }
                }
            });
        if let Err(e) = spawned {
            tracing::warn!("Could not spawn the stdin reader thread: {e}");
        }

        Self { rx, running }
    }
}

impl Default for StdioChannel {
    fn default() -> Self {
        Self::new()
    }
}

impl TextChannel for StdioChannel {
    fn kind(&self) -> ChannelKind {
        ChannelKind::Stdio
    }

    fn try_read_line(&mut self) -> Option<String> {
        self.rx.try_recv().ok()
    }

    fn write_line(&mut self, line: &str) -> Result<()> {
        let stdout = std::io::stdout();
        let mut out = stdout.lock();
        out.write_all(line.as_bytes())?;
        out.write_all(b"\n")?;
        out.flush()?;
        Ok(())
    }
}

impl Drop for StdioChannel {
    fn drop(&mut self) {
        self.running.store(false, Ordering::SeqCst);
    }
}
