use std::io::Write;
use std::ops::{Index, IndexMut};

use tracing::{info, trace};

use crate::bit_twiddling::*;
use crate::error::{LoadError, VmError};
use crate::io::{Keyboard, StopSignal};
use crate::loader::Image;
use crate::memory::Memory;
use crate::opcode::*;

/// Where execution begins, regardless of the loaded image's origin.
pub const PC_START: u16 = 0x3000;

/// Condition codes. Exactly one is held after any flag-defining instruction.
#[repr(u16)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Condition {
    Positive = 0b001,
    Zero = 0b010,
    Negative = 0b100,
}

impl Condition {
    pub fn of(value: u16) -> Self {
        if value == 0 {
            Condition::Zero
        } else if get_bits::<15, 15>(value) == 1 {
            Condition::Negative
        } else {
            Condition::Positive
        }
    }
}

/// Symbolic names for the register file: eight general-purpose registers, the program counter
/// and the condition register.
#[repr(usize)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Register {
    R0,
    R1,
    R2,
    R3,
    R4,
    R5,
    R6,
    R7,
    Pc,
    Cond,
}

impl Register {
    const COUNT: usize = 10;

    const GENERAL: [Register; 8] = [
        Register::R0,
        Register::R1,
        Register::R2,
        Register::R3,
        Register::R4,
        Register::R5,
        Register::R6,
        Register::R7,
    ];

    /// A general-purpose register from a 3-bit instruction field.
    pub fn general(n: u16) -> Self {
        Self::GENERAL[(n & 0b111) as usize]
    }
}

/// How a run ended without error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunOutcome {
    /// The program executed `TRAP HALT`.
    Halted,
    /// The stop signal was raised from outside.
    Stopped,
}

pub struct Cpu<K, W> {
    /// R0-R7, PC and COND
    registers: [u16; Register::COUNT],
    /// RAM, including the memory-mapped keyboard
    memory: Memory<K>,
    /// Display sink for trap output
    pub(crate) output: W,
    pub(crate) halted: bool,
    stop: StopSignal,
}

impl<K: Keyboard, W: Write> Cpu<K, W> {
    pub fn new(keyboard: K, output: W) -> Self {
        let mut registers = [0u16; Register::COUNT];
        registers[Register::Pc as usize] = PC_START;
        Cpu {
            registers,
            memory: Memory::new(keyboard),
            output,
            halted: false,
            stop: StopSignal::new(),
        }
    }

    /// Share an externally owned stop signal with this machine.
    pub fn with_stop_signal(mut self, stop: StopSignal) -> Self {
        self.stop = stop;
        self
    }

    pub fn stop_signal(&self) -> StopSignal {
        self.stop.clone()
    }

    pub fn load_image(&mut self, image: &Image) -> Result<(), LoadError> {
        image.check_fits()?;
        self.memory.load(image.origin, &image.words);
        Ok(())
    }

    pub fn memory(&self) -> &Memory<K> {
        &self.memory
    }

    pub fn memory_mut(&mut self) -> &mut Memory<K> {
        &mut self.memory
    }

    pub fn output(&self) -> &W {
        &self.output
    }

    pub fn into_output(self) -> W {
        self.output
    }

    pub fn pc(&self) -> u16 {
        self[Register::Pc]
    }

    /// The current condition code, or `None` before any flag-defining instruction has run.
    pub fn condition(&self) -> Option<Condition> {
        match self[Register::Cond] {
            0b001 => Some(Condition::Positive),
            0b010 => Some(Condition::Zero),
            0b100 => Some(Condition::Negative),
            _ => None,
        }
    }

    pub fn is_halted(&self) -> bool {
        self.halted
    }

    fn update_flags(&mut self, value: u16) {
        self[Register::Cond] = Condition::of(value) as u16;
    }

    fn get_reg_hi(&self, instruction: u16) -> u16 {
        self[Register::general(get_bits::<9, 11>(instruction))]
    }

    fn get_reg_lo(&self, instruction: u16) -> u16 {
        self[Register::general(get_bits::<6, 8>(instruction))]
    }

    fn pc_offset<const NUM_BITS: usize>(&self, instruction: u16) -> u16 {
        self.pc().wrapping_add(sign_extend::<NUM_BITS>(instruction))
    }

    pub fn execute_instruction<const OP: u8>(&mut self, instruction: u16) -> Result<(), VmError> {
        let opcode = Opcode::from_int(OP);

        match opcode {
            Opcode::Add
            | Opcode::And
            | Opcode::Ld
            | Opcode::Ldi
            | Opcode::Ldr
            | Opcode::Lea
            | Opcode::Not => {
                let result = match opcode {
                    Opcode::Add | Opcode::And => {
                        let src_value_2 = if get_bits::<5, 5>(instruction) == 1 {
                            // immediate mode
                            sign_extend::<5>(instruction)
                        } else {
                            self[Register::general(get_bits::<0, 2>(instruction))]
                        };

                        match opcode {
                            Opcode::Add => self.get_reg_lo(instruction).wrapping_add(src_value_2),
                            Opcode::And => self.get_reg_lo(instruction) & src_value_2,
                            _ => unreachable!(),
                        }
                    }

                    Opcode::Ld | Opcode::Ldi | Opcode::Lea => {
                        let addr = self.pc_offset::<9>(instruction);

                        match opcode {
                            // load effective address: just return the address
                            Opcode::Lea => addr,
                            Opcode::Ld => self.memory.read(addr),
                            Opcode::Ldi => {
                                let indirect_addr = self.memory.read(addr);
                                self.memory.read(indirect_addr)
                            }
                            _ => unreachable!(),
                        }
                    }

                    Opcode::Ldr => {
                        let offset = sign_extend::<6>(instruction);
                        let addr = self.get_reg_lo(instruction).wrapping_add(offset);
                        self.memory.read(addr)
                    }

                    Opcode::Not => !self.get_reg_lo(instruction),

                    _ => unreachable!(),
                };

                self[Register::general(get_bits::<9, 11>(instruction))] = result;
                self.update_flags(result);
            }

            Opcode::Br => {
                let nzp = get_bits::<9, 11>(instruction);
                if nzp & self[Register::Cond] != 0 {
                    self[Register::Pc] = self.pc_offset::<9>(instruction);
                }
            }

            // RET is JMP R7
            Opcode::Jmp => {
                self[Register::Pc] = self.get_reg_lo(instruction);
            }

            Opcode::Jsr => {
                let old_pc = self.pc();

                self[Register::Pc] = if get_bits::<11, 11>(instruction) == 1 {
                    // JSR: PC-relative
                    self.pc_offset::<11>(instruction)
                } else {
                    // JSRR: absolute
                    self.get_reg_lo(instruction)
                };

                // Set R7 *after* reading the base register, which may itself be R7
                self[Register::R7] = old_pc;
            }

            Opcode::St | Opcode::Sti => {
                let mut addr = self.pc_offset::<9>(instruction);

                // read address from memory if indirect store
                if let Opcode::Sti = opcode {
                    addr = self.memory.read(addr);
                }

                let value = self.get_reg_hi(instruction);
                self.memory.write(addr, value);
            }

            Opcode::Str => {
                let offset = sign_extend::<6>(instruction);
                let addr = self.get_reg_lo(instruction).wrapping_add(offset);
                let value = self.get_reg_hi(instruction);
                self.memory.write(addr, value);
            }

            Opcode::Rti | Opcode::Reserved => {
                return Err(VmError::UnimplementedOpcode {
                    opcode,
                    pc: self.pc().wrapping_sub(1),
                });
            }

            Opcode::Trap => self.execute_trap(instruction)?,
        }

        Ok(())
    }

    /// Fetch, decode and execute a single instruction.
    pub fn step(&mut self) -> Result<(), VmError> {
        let pc = self.pc();
        let instruction = self.memory.read(pc);
        self[Register::Pc] = pc.wrapping_add(1);
        let op = get_bits::<12, 15>(instruction);
        trace!("{:#06x}: {:#06x} ({:?})", pc, instruction, Opcode::of(instruction));
        match op {
            0 => self.execute_instruction::<0>(instruction),
            1 => self.execute_instruction::<1>(instruction),
            2 => self.execute_instruction::<2>(instruction),
            3 => self.execute_instruction::<3>(instruction),
            4 => self.execute_instruction::<4>(instruction),
            5 => self.execute_instruction::<5>(instruction),
            6 => self.execute_instruction::<6>(instruction),
            7 => self.execute_instruction::<7>(instruction),
            8 => self.execute_instruction::<8>(instruction),
            9 => self.execute_instruction::<9>(instruction),
            10 => self.execute_instruction::<10>(instruction),
            11 => self.execute_instruction::<11>(instruction),
            12 => self.execute_instruction::<12>(instruction),
            13 => self.execute_instruction::<13>(instruction),
            14 => self.execute_instruction::<14>(instruction),
            15 => self.execute_instruction::<15>(instruction),
            _ => unreachable!(),
        }
    }

    /// Run until the program halts or the stop signal is raised.
    ///
    /// The stop signal is only looked at between instructions. A blocking keyboard read that fails
    /// because a stop was requested counts as a stop, not an error.
    pub fn run(&mut self) -> Result<RunOutcome, VmError> {
        while !self.halted {
            if self.stop.is_requested() {
                info!("stop requested at {:#06x}", self.pc());
                return Ok(RunOutcome::Stopped);
            }

            match self.step() {
                Ok(()) => {}
                Err(VmError::Io(e)) if self.stop.is_requested() => {
                    info!("keyboard read interrupted by stop request: {}", e);
                    return Ok(RunOutcome::Stopped);
                }
                Err(e) => return Err(e),
            }
        }

        info!("machine halted at {:#06x}", self.pc());
        Ok(RunOutcome::Halted)
    }
}

impl<K, W> Index<Register> for Cpu<K, W> {
    type Output = u16;

    fn index(&self, reg: Register) -> &u16 {
        &self.registers[reg as usize]
    }
}

impl<K, W> IndexMut<Register> for Cpu<K, W> {
    fn index_mut(&mut self, reg: Register) -> &mut u16 {
        &mut self.registers[reg as usize]
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unusual_byte_groupings)]
    use std::collections::VecDeque;

    use test_log::test;

    use super::*;

    type TestCpu = Cpu<VecDeque<u8>, Vec<u8>>;

    fn cpu() -> TestCpu {
        Cpu::new(VecDeque::new(), Vec::new())
    }

    /// Place `program` at the start address and execute it one instruction at a time.
    fn exec(cpu: &mut TestCpu, program: &[u16]) {
        cpu.load_image(&Image {
            origin: PC_START,
            words: program.to_vec(),
        })
        .unwrap();
        for _ in program {
            cpu.step().unwrap();
        }
    }

    #[test]
    fn condition_of_value() {
        assert_eq!(Condition::of(0), Condition::Zero);
        assert_eq!(Condition::of(1), Condition::Positive);
        assert_eq!(Condition::of(0x7FFF), Condition::Positive);
        assert_eq!(Condition::of(0x8000), Condition::Negative);
        assert_eq!(Condition::of(0xFFFF), Condition::Negative);
    }

    #[test]
    fn exactly_one_flag_after_update() {
        let mut cpu = cpu();
        for v in [0u16, 1, 0x4000, 0x8000, 0xFFFF] {
            cpu.update_flags(v);
            assert_eq!(cpu[Register::Cond].count_ones(), 1);
        }
    }

    #[test]
    fn fresh_machine_state() {
        let cpu = cpu();
        assert_eq!(cpu.pc(), PC_START);
        assert_eq!(cpu.condition(), None);
        for r in Register::GENERAL {
            assert_eq!(cpu[r], 0);
        }
    }

    #[test]
    fn add_immediate_twice() {
        let mut cpu = cpu();
        //        ADD  R0  R0 I #1
        exec(&mut cpu, &[0b0001_000_000_1_00001, 0b0001_000_000_1_00001]);
        assert_eq!(cpu[Register::R0], 2);
        assert_eq!(cpu.condition(), Some(Condition::Positive));
        assert_eq!(cpu.pc(), PC_START + 2);
    }

    #[test]
    fn add_register_wraps() {
        let mut cpu = cpu();
        cpu[Register::R1] = 0xFFFF;
        cpu[Register::R2] = 2;
        //        ADD  R3  R1 R --  R2
        exec(&mut cpu, &[0b0001_011_001_0_00_010]);
        assert_eq!(cpu[Register::R3], 1);
        assert_eq!(cpu.condition(), Some(Condition::Positive));
    }

    #[test]
    fn add_negative_immediate() {
        let mut cpu = cpu();
        cpu[Register::R1] = 5;
        //        ADD  R0  R1 I  -7
        exec(&mut cpu, &[0b0001_000_001_1_11001]);
        assert_eq!(cpu[Register::R0] as i16, -2);
        assert_eq!(cpu.condition(), Some(Condition::Negative));
    }

    #[test]
    fn and_with_zero_clears() {
        let mut cpu = cpu();
        cpu[Register::R1] = 0xABCD;
        //        AND  R1  R1 I #0
        exec(&mut cpu, &[0b0101_001_001_1_00000]);
        assert_eq!(cpu[Register::R1], 0);
        assert_eq!(cpu.condition(), Some(Condition::Zero));
    }

    #[test]
    fn and_register() {
        let mut cpu = cpu();
        cpu[Register::R2] = 0xFF0F;
        cpu[Register::R3] = 0x0FF0;
        //        AND  R4  R2 R --  R3
        exec(&mut cpu, &[0b0101_100_010_0_00_011]);
        assert_eq!(cpu[Register::R4], 0x0F00);
    }

    #[test]
    fn not_complements() {
        let mut cpu = cpu();
        cpu[Register::R5] = 0x00FF;
        //        NOT  R6  R5 111111
        exec(&mut cpu, &[0b1001_110_101_111111]);
        assert_eq!(cpu[Register::R6], 0xFF00);
        assert_eq!(cpu.condition(), Some(Condition::Negative));
    }

    #[test]
    fn ld_is_pc_relative_after_increment() {
        let mut cpu = cpu();
        cpu.memory_mut().write(PC_START + 3, 0x1234);
        //        LD   R2  +2
        exec(&mut cpu, &[0b0010_010_000000010]);
        assert_eq!(cpu[Register::R2], 0x1234);
        assert_eq!(cpu.condition(), Some(Condition::Positive));
    }

    #[test]
    fn ldi_dereferences_twice() {
        let mut cpu = cpu();
        cpu.memory_mut().write(PC_START + 1, 0x4000);
        cpu.memory_mut().write(0x4000, 0x8001);
        //        LDI  R1  +0
        exec(&mut cpu, &[0b1010_001_000000000]);
        assert_eq!(cpu[Register::R1], 0x8001);
        assert_eq!(cpu.condition(), Some(Condition::Negative));
    }

    #[test]
    fn ldr_negative_offset() {
        let mut cpu = cpu();
        cpu.memory_mut().write(0x4FFF, 0);
        cpu[Register::R3] = 0x5000;
        //        LDR  R0  R3  -1
        exec(&mut cpu, &[0b0110_000_011_111111]);
        assert_eq!(cpu[Register::R0], 0);
        assert_eq!(cpu.condition(), Some(Condition::Zero));
    }

    #[test]
    fn lea_loads_address_and_sets_flags() {
        let mut cpu = cpu();
        //        LEA  R0  -2
        exec(&mut cpu, &[0b1110_000_111111110]);
        assert_eq!(cpu[Register::R0], PC_START - 1);
        assert_eq!(cpu.condition(), Some(Condition::Positive));
    }

    #[test]
    fn stores() {
        let mut cpu = cpu();
        cpu[Register::R1] = 0xAAAA;
        cpu[Register::R2] = 0x6000;
        exec(
            &mut cpu,
            &[
                0b0011_001_000000100, // ST   R1  +4  -> [0x3005]
                0b1011_001_000000011, // STI  R1  +3  -> [[0x3005]]
                0b0111_001_010_000001, // STR  R1  R2  +1
            ],
        );
        assert_eq!(cpu.memory().peek(PC_START + 5), 0xAAAA);
        assert_eq!(cpu.memory().peek(0xAAAA), 0xAAAA);
        assert_eq!(cpu.memory().peek(0x6001), 0xAAAA);
        // stores leave the condition register alone
        assert_eq!(cpu.condition(), None);
    }

    #[test]
    fn branch_taken_only_on_matching_flag() {
        let mut cpu = cpu();
        exec(
            &mut cpu,
            &[
                0b0101_000_000_1_00000, // AND  R0  R0  #0    ; Z
                0b0000_101_000000101,   // BRnp +5            ; not taken
                0b0000_010_000000011,   // BRz  +3            ; taken
            ],
        );
        assert_eq!(cpu.pc(), PC_START + 3 + 3);
    }

    #[test]
    fn branch_never_taken_before_first_flag() {
        let mut cpu = cpu();
        //        BRnzp +5
        exec(&mut cpu, &[0b0000_111_000000101]);
        assert_eq!(cpu.pc(), PC_START + 1);
    }

    #[test]
    fn jmp_and_ret() {
        let mut cpu = cpu();
        cpu[Register::R7] = 0x4444;
        //        JMP  R7 (RET)
        exec(&mut cpu, &[0b1100_000_111_000000]);
        assert_eq!(cpu.pc(), 0x4444);
    }

    #[test]
    fn jsr_saves_return_address() {
        let mut cpu = cpu();
        //        JSR  -16
        exec(&mut cpu, &[0b0100_1_11111110000]);
        assert_eq!(cpu[Register::R7], PC_START + 1);
        assert_eq!(cpu.pc(), PC_START + 1 - 16);
    }

    #[test]
    fn jsrr_through_r7() {
        let mut cpu = cpu();
        cpu[Register::R7] = 0x5000;
        //        JSRR R7
        exec(&mut cpu, &[0b0100_0_00_111_000000]);
        assert_eq!(cpu.pc(), 0x5000);
        assert_eq!(cpu[Register::R7], PC_START + 1);
    }

    #[test]
    fn pc_wraps_at_top_of_memory() {
        let mut cpu = cpu();
        cpu[Register::Pc] = 0xFFFF;
        cpu.memory_mut().write(0xFFFF, 0b0001_000_000_1_00001);
        cpu.step().unwrap();
        assert_eq!(cpu.pc(), 0x0000);
        assert_eq!(cpu[Register::R0], 1);
    }

    #[test]
    fn rti_and_reserved_are_fatal() {
        for (word, expected) in [(0x8000u16, Opcode::Rti), (0xD000, Opcode::Reserved)] {
            let mut cpu = cpu();
            cpu.memory_mut().write(PC_START, word);
            match cpu.step() {
                Err(VmError::UnimplementedOpcode { opcode, pc }) => {
                    assert_eq!(opcode, expected);
                    assert_eq!(pc, PC_START);
                }
                other => panic!("expected unimplemented opcode, got {:?}", other),
            }
        }
    }

    #[test]
    fn oversized_image_is_rejected_without_touching_memory() {
        let mut cpu = cpu();
        let err = cpu
            .load_image(&Image {
                origin: 0xFFFF,
                words: vec![1, 2],
            })
            .unwrap_err();
        assert!(matches!(
            err,
            LoadError::TooLarge {
                origin: 0xFFFF,
                words: 2
            }
        ));
        assert_eq!(cpu.memory().peek(0xFFFF), 0);
        assert_eq!(cpu.memory().peek(0x0000), 0);
    }

    #[test]
    fn image_ending_at_top_of_memory_loads() {
        let mut cpu = cpu();
        cpu.load_image(&Image {
            origin: 0xFFFE,
            words: vec![1, 2],
        })
        .unwrap();
        assert_eq!(cpu.memory().peek(0xFFFF), 2);
    }

    #[test]
    fn stop_before_first_fetch() {
        let mut cpu = cpu();
        cpu.memory_mut().write(PC_START, 0b0001_000_000_1_00001);
        cpu.stop_signal().request();
        assert_eq!(cpu.run().unwrap(), RunOutcome::Stopped);
        assert_eq!(cpu.pc(), PC_START);
        assert_eq!(cpu[Register::R0], 0);
    }
}
