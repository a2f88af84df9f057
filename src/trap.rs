use std::io::Write;

use tracing::debug;

use crate::bit_twiddling::get_bits;
use crate::emulator::{Cpu, Register};
use crate::error::VmError;
use crate::io::Keyboard;
use crate::opcode::TrapVector;

pub const IN_PROMPT: &str = "Enter a character: ";
pub const HALT_NOTICE: &str = "halt\n";

impl<K: Keyboard, W: Write> Cpu<K, W> {
    /// Service a `TRAP` instruction directly in the host instead of jumping through the vector table.
    pub(crate) fn execute_trap(&mut self, instruction: u16) -> Result<(), VmError> {
        let vector = get_bits::<0, 7>(instruction) as u8;
        let trap = TrapVector::try_from_int(vector).ok_or(VmError::UnknownTrap {
            vector,
            pc: self.pc().wrapping_sub(1),
        })?;
        debug!("trap {:?}", trap);

        match trap {
            TrapVector::Getc => {
                self[Register::R0] = self.memory_mut().keyboard_mut().read_char()? as u16;
            }

            TrapVector::Out => {
                let ch = (self[Register::R0] & 0xFF) as u8;
                self.output.write_all(&[ch])?;
            }

            TrapVector::Puts => {
                let mut addr = self[Register::R0];
                loop {
                    let word = self.memory_mut().read(addr);
                    if word == 0 {
                        break;
                    }
                    self.output.write_all(&[(word & 0xFF) as u8])?;
                    addr = addr.wrapping_add(1);
                }
            }

            TrapVector::In => {
                self.output.write_all(IN_PROMPT.as_bytes())?;
                self.output.flush()?;
                self[Register::R0] = self.memory_mut().keyboard_mut().read_char()? as u16;
            }

            TrapVector::Putsp => {
                let mut addr = self[Register::R0];
                'words: loop {
                    let word = self.memory_mut().read(addr);
                    // low byte first
                    for ch in [(word & 0xFF) as u8, (word >> 8) as u8] {
                        if ch == 0 {
                            break 'words;
                        }
                        self.output.write_all(&[ch])?;
                    }
                    addr = addr.wrapping_add(1);
                }
            }

            TrapVector::Halt => {
                self.output.write_all(HALT_NOTICE.as_bytes())?;
                self.halted = true;
            }
        }

        self.output.flush()?;
        Ok(())
    }
}
