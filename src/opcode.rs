use crate::bit_twiddling::get_bits;

#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Opcode {
    Br = 0,
    Add = 1,
    Ld = 2,
    St = 3,
    Jsr = 4,
    And = 5,
    Ldr = 6,
    Str = 7,
    Rti = 8,
    Not = 9,
    Ldi = 10,
    Sti = 11,
    Jmp = 12, // also RET
    Reserved = 13,
    Lea = 14,
    Trap = 15,
}

impl Opcode {
    pub const fn from_int(i: u8) -> Self {
        match i & 0xF {
            0 => Opcode::Br,
            1 => Opcode::Add,
            2 => Opcode::Ld,
            3 => Opcode::St,
            4 => Opcode::Jsr,
            5 => Opcode::And,
            6 => Opcode::Ldr,
            7 => Opcode::Str,
            8 => Opcode::Rti,
            9 => Opcode::Not,
            10 => Opcode::Ldi,
            11 => Opcode::Sti,
            12 => Opcode::Jmp,
            13 => Opcode::Reserved,
            14 => Opcode::Lea,
            _ => Opcode::Trap,
        }
    }

    /// The opcode held in bits 15-12 of an instruction word.
    pub fn of(instruction: u16) -> Self {
        Self::from_int(get_bits::<12, 15>(instruction) as u8)
    }
}

/// Built-in I/O services reachable through `TRAP`.
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrapVector {
    /// Read one character into R0 without echo.
    Getc = 0x20,
    /// Write the low byte of R0.
    Out = 0x21,
    /// Write a string of one character per word.
    Puts = 0x22,
    /// Prompt, then read one character into R0.
    In = 0x23,
    /// Write a string of two characters per word.
    Putsp = 0x24,
    Halt = 0x25,
}

impl TrapVector {
    pub const fn try_from_int(i: u8) -> Option<Self> {
        match i {
            0x20 => Some(TrapVector::Getc),
            0x21 => Some(TrapVector::Out),
            0x22 => Some(TrapVector::Puts),
            0x23 => Some(TrapVector::In),
            0x24 => Some(TrapVector::Putsp),
            0x25 => Some(TrapVector::Halt),
            _ => None,
        }
    }
}
