use tracing::trace;

use crate::io::Keyboard;

pub const MEMORY_SIZE: usize = (u16::MAX as usize) + 1;

/// Keyboard status register. Bit 15 is set when a character is waiting in KBDR.
pub const KBSR: u16 = 0xFE00;
/// Keyboard data register.
pub const KBDR: u16 = 0xFE02;

/// Word-addressed RAM with the keyboard registers mapped in.
pub struct Memory<K> {
    memory: Box<[u16]>,
    keyboard: K,
}

impl<K: Keyboard> Memory<K> {
    pub fn new(keyboard: K) -> Self {
        Memory {
            memory: vec![0u16; MEMORY_SIZE].into_boxed_slice(),
            keyboard,
        }
    }

    /// Read a word the way the running program sees it.
    ///
    /// Reading KBSR polls the keyboard first: a pending character lands in KBDR and sets KBSR[15],
    /// otherwise KBSR reads as zero. Every other address is a plain load.
    pub fn read(&mut self, addr: u16) -> u16 {
        if addr == KBSR {
            match self.keyboard.poll() {
                Some(ch) => {
                    trace!("keyboard has {:#04x} pending", ch);
                    self.memory[KBSR as usize] = 1 << 15;
                    self.memory[KBDR as usize] = ch as u16;
                }
                None => self.memory[KBSR as usize] = 0,
            }
        }
        self.memory[addr as usize]
    }

    pub fn write(&mut self, addr: u16, value: u16) {
        self.memory[addr as usize] = value;
    }

    /// Read a word without triggering any device side effects.
    pub fn peek(&self, addr: u16) -> u16 {
        self.memory[addr as usize]
    }

    /// Copy `words` into memory starting at `origin`. The caller guarantees they fit.
    pub(crate) fn load(&mut self, origin: u16, words: &[u16]) {
        let start = origin as usize;
        self.memory[start..start + words.len()].copy_from_slice(words);
    }

    pub fn keyboard_mut(&mut self) -> &mut K {
        &mut self.keyboard
    }
}
