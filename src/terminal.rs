//! Host-side character I/O for the machine: a keyboard fed from stdin and a display on stdout.

use std::io::{self, prelude::*};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, Sender};
use std::thread;
use std::time::Duration;

use crossterm::event::{self, Event, KeyCode, KeyEvent, KeyModifiers};
use crossterm::terminal;
use tracing::{info, warn};

use crate::io::{Keyboard, StopSignal};

/// How often a blocked keyboard read wakes up to check for a stop request.
const STOP_CHECK_INTERVAL: Duration = Duration::from_millis(50);

/// Route SIGINT to `stop` so the run ends between instructions instead of killing the process.
pub fn stop_on_interrupt(stop: StopSignal) -> Result<(), ctrlc::Error> {
    ctrlc::set_handler(move || {
        info!("interrupt signal received");
        stop.request();
    })
}

/// Keeps the terminal in raw mode (no line buffering, no echo) for as long as it lives.
pub struct RawMode(());

impl RawMode {
    pub fn enable() -> io::Result<Self> {
        terminal::enable_raw_mode()?;
        Ok(RawMode(()))
    }
}

impl Drop for RawMode {
    fn drop(&mut self) {
        if let Err(e) = terminal::disable_raw_mode() {
            warn!("failed to restore terminal: {}", e);
        }
    }
}

/// Keyboard backed by a reader thread, so the machine can poll without blocking.
pub struct TerminalKeyboard {
    rx: Receiver<u8>,
    stop: StopSignal,
}

impl TerminalKeyboard {
    /// Start reading stdin in the background.
    ///
    /// With `interactive` set, stdin is read as terminal key events and `Ctrl+C` raises `stop`.
    /// Otherwise raw bytes are forwarded until end of input.
    pub fn spawn(interactive: bool, stop: StopSignal) -> io::Result<Self> {
        let (tx, rx) = mpsc::channel();
        let reader_stop = stop.clone();
        thread::Builder::new()
            .name("keyboard".to_string())
            .spawn(move || {
                if interactive {
                    read_keys(tx, reader_stop)
                } else {
                    read_bytes(tx)
                }
            })?;
        Ok(TerminalKeyboard { rx, stop })
    }
}

impl Keyboard for TerminalKeyboard {
    fn poll(&mut self) -> Option<u8> {
        self.rx.try_recv().ok()
    }

    fn read_char(&mut self) -> io::Result<u8> {
        loop {
            match self.rx.recv_timeout(STOP_CHECK_INTERVAL) {
                Ok(ch) => return Ok(ch),
                Err(RecvTimeoutError::Timeout) if !self.stop.is_requested() => continue,
                Err(RecvTimeoutError::Disconnected) if !self.stop.is_requested() => {
                    return Err(io::Error::new(
                        io::ErrorKind::UnexpectedEof,
                        "keyboard input closed",
                    ));
                }
                Err(_) => {
                    return Err(io::Error::new(io::ErrorKind::Interrupted, "stop requested"));
                }
            }
        }
    }
}

fn read_keys(tx: Sender<u8>, stop: StopSignal) {
    loop {
        let event = match event::read() {
            Ok(event) => event,
            Err(e) => {
                warn!("terminal read failed: {}", e);
                return;
            }
        };
        let Event::Key(KeyEvent { code, modifiers, .. }) = event else {
            continue;
        };

        if code == KeyCode::Char('c') && modifiers.contains(KeyModifiers::CONTROL) {
            info!("interrupt received");
            stop.request();
            return;
        }

        if let Some(ch) = key_to_byte(code, modifiers) {
            if tx.send(ch).is_err() {
                return;
            }
        }
    }
}

fn read_bytes(tx: Sender<u8>) {
    for byte in io::stdin().lock().bytes() {
        match byte {
            Ok(ch) => {
                if tx.send(ch).is_err() {
                    return;
                }
            }
            Err(e) => {
                warn!("stdin read failed: {}", e);
                return;
            }
        }
    }
}

/// The character a key press delivers to the program, if any.
fn key_to_byte(code: KeyCode, modifiers: KeyModifiers) -> Option<u8> {
    match code {
        KeyCode::Char(c) if c.is_ascii_alphabetic() && modifiers.contains(KeyModifiers::CONTROL) => {
            Some(c.to_ascii_lowercase() as u8 & 0x1F)
        }
        KeyCode::Char(c) if c.is_ascii() => Some(c as u8),
        KeyCode::Enter => Some(b'\n'),
        KeyCode::Tab => Some(b'\t'),
        KeyCode::Backspace => Some(0x08),
        KeyCode::Esc => Some(0x1B),
        _ => None,
    }
}

/// Display sink. In raw mode the terminal no longer returns the carriage on `\n`, so it is
/// written as `\r\n`.
pub struct TerminalOutput<W> {
    inner: W,
    raw: bool,
}

impl<W: Write> TerminalOutput<W> {
    pub fn new(inner: W, raw: bool) -> Self {
        TerminalOutput { inner, raw }
    }
}

impl<W: Write> Write for TerminalOutput<W> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        if !self.raw {
            return self.inner.write(buf);
        }

        let mut lines = buf.split(|&b| b == b'\n');
        if let Some(first) = lines.next() {
            self.inner.write_all(first)?;
        }
        for line in lines {
            self.inner.write_all(b"\r\n")?;
            self.inner.write_all(line)?;
        }
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        self.inner.flush()
    }
}
