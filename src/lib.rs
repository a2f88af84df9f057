pub mod bit_twiddling;
pub mod emulator;
pub mod error;
pub mod io;
pub mod loader;
pub mod memory;
pub mod opcode;
pub mod terminal;
pub mod trap;
