use std::io;
use std::path::PathBuf;

use thiserror::Error;

use crate::opcode::Opcode;

/// Failures while reading a program image. Nothing has executed when one of these is returned.
#[derive(Debug, Error)]
pub enum LoadError {
    #[error("could not open image {}: {source}", path.display())]
    Open {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("image is missing its origin word")]
    MissingOrigin,
    #[error("failed to read image: {0}")]
    Read(#[source] io::Error),
    #[error("image of {words} words at origin {origin:#06x} runs past the end of memory")]
    TooLarge { origin: u16, words: usize },
}

/// Fatal conditions raised while executing instructions.
#[derive(Debug, Error)]
pub enum VmError {
    #[error("unimplemented opcode {opcode:?} at {pc:#06x}")]
    UnimplementedOpcode { opcode: Opcode, pc: u16 },
    #[error("unknown trap vector {vector:#04x} at {pc:#06x}")]
    UnknownTrap { vector: u8, pc: u16 },
    #[error("character I/O failed: {0}")]
    Io(#[from] io::Error),
}
