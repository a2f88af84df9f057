use std::collections::VecDeque;
use std::io;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Source of keyboard characters for the machine.
///
/// Terminal setup (raw mode, echo) belongs to the implementor, not the machine.
pub trait Keyboard {
    /// Take the next pending character, if one is already available. Never blocks.
    fn poll(&mut self) -> Option<u8>;

    /// Block until a character is available and take it.
    fn read_char(&mut self) -> io::Result<u8>;
}

impl<K: Keyboard + ?Sized> Keyboard for Box<K> {
    fn poll(&mut self) -> Option<u8> {
        (**self).poll()
    }

    fn read_char(&mut self) -> io::Result<u8> {
        (**self).read_char()
    }
}

/// Pre-scripted input, handy for driving programs without a terminal.
impl Keyboard for VecDeque<u8> {
    fn poll(&mut self) -> Option<u8> {
        self.pop_front()
    }

    fn read_char(&mut self) -> io::Result<u8> {
        self.pop_front()
            .ok_or_else(|| io::Error::new(io::ErrorKind::UnexpectedEof, "keyboard input exhausted"))
    }
}

/// Cooperative cancellation shared between the run loop and whoever wants it to stop.
///
/// Set from any thread; the run loop checks it once per cycle before fetching.
#[derive(Debug, Clone, Default)]
pub struct StopSignal(Arc<AtomicBool>);

impl StopSignal {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn request(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_requested(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}
