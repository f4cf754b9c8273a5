//! Simulating and executing LC-3 machine code.
//!
//! This module is focused on executing loaded machine code (see
//! [`crate::loader`] for getting it into memory).
//!
//! This module consists of:
//! - [`Simulator`]: The struct that runs the fetch-decode-execute loop.
//! - [`mem`]: The module handling memory and the register file.
//! - [`io`]: The module handling memory-mapped IO devices.
//! - [`os`]: The module holding the supervisor ROM image.
//! - [`debug`]: The module holding breakpoints and the interactive debugger.

pub mod debug;
pub mod io;
pub mod mem;
pub mod os;

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use rand::rngs::StdRng;
use rand::SeedableRng;
use tracing::debug;

use crate::ast::reg_consts::{R6, R7};
use crate::ast::sim::SimInstr;
use crate::ast::ImmOrReg;
use crate::loader::ObjImage;
use io::*;

use self::mem::{Mem, MemAccessCtx, RegFile};
use self::os::{EXC_ACV, EXC_ILL, EXC_PRIV, EXC_TABLE};

/// Errors that can occur during simulation.
///
/// The three architectural faults never escape [`Simulator::run`]: when one
/// is raised by an executing instruction, the simulator delivers it through
/// the exception vector table and execution continues in the corresponding
/// supervisor handler. They appear in this enum because the memory and
/// decode layers report them as ordinary `Result`s.
#[derive(Debug, PartialEq, Eq)]
pub enum SimErr {
    /// The reserved opcode `0b1101` was decoded.
    IllegalOpcode,
    /// RTI was executed in user mode.
    PrivilegeViolation,
    /// A privileged address was accessed in user mode.
    AccessViolation,
}
impl std::fmt::Display for SimErr {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SimErr::IllegalOpcode      => f.write_str("illegal opcode"),
            SimErr::PrivilegeViolation => f.write_str("privilege violation"),
            SimErr::AccessViolation    => f.write_str("access violation"),
        }
    }
}
impl std::error::Error for SimErr {}

/// Executes machine code.
#[derive(Debug)]
pub struct Simulator {
    /// The simulator's memory.
    ///
    /// Note that this is held in the heap, as it is too large for the stack.
    pub mem: Mem,

    /// The simulator's register file.
    pub reg_file: RegFile,

    /// The program counter.
    pub pc: u16,

    /// The processor status register. See [`PSR`] for more details.
    psr: PSR,

    /// Saved stack pointer (the one currently not in use).
    ///
    /// In user mode this is the supervisor stack pointer; in supervisor mode
    /// it is the user stack pointer. It is exchanged with R6 on every mode
    /// transition.
    saved_sp: u16,

    /// The number of instructions successfully run since this `Simulator` was initialized.
    ///
    /// This can be set to 0 to reset the counter.
    pub instructions_run: u64,

    /// Machine control.
    /// If unset, the program stops.
    ///
    /// This is publicly accessible via a reference through [`Simulator::mcr`],
    /// and memory-mapped at `xFFFE` for the code being executed (which is how
    /// the HALT service stops the machine).
    mcr: Arc<AtomicBool>,
}

impl Simulator {
    /// Creates a new simulator with the supervisor ROM loaded, but without a
    /// loaded user program.
    ///
    /// Execution begins in supervisor mode at the OS bootstrap; the
    /// bootstrap drops to the user program registered with
    /// [`Simulator::set_entry`].
    ///
    /// Note that this will not load working IO, so the IO traps (`GETC`,
    /// `OUT`, ...) will hang on their status registers. The only trap
    /// assured to function without IO is `HALT`. To initialize the IO, use
    /// [`Simulator::open_io`].
    pub fn new() -> Self {
        let mut sim = Self {
            mem: Mem::new(),
            reg_file: RegFile::new(),
            pc: os::BOOT,
            psr: PSR::new(),
            saved_sp: 0,
            instructions_run: 0,
            mcr: Arc::default(),
        };

        sim.mem.io.mcr = Arc::clone(&sim.mcr); // share so HALT can stop the loop
        sim.mem.copy_block(0x0000, os::rom());
        sim
    }

    /// Sets and initializes the IO handler.
    pub fn open_io<IO: Into<SimIO>>(&mut self, io: IO) {
        self.mem.io.inner = io.into();
    }

    /// Closes the IO handler, waiting for it to close.
    pub fn close_io(&mut self) {
        std::mem::take(&mut self.mem.io.inner).close();
    }

    /// Loads an object image into this simulator's memory.
    pub fn load_obj(&mut self, obj: &ObjImage) {
        self.mem.copy_block(obj.origin(), obj.words());
    }

    /// Registers `entry` as the user program's entry point.
    ///
    /// The address is stored in the ROM word the OS bootstrap reads the user
    /// PC from, so it takes effect when the bootstrap's RTI executes.
    pub fn set_entry(&mut self, entry: u16) {
        self.mem.set_raw(os::USER_PC_SLOT, entry);
    }

    /// Fills R0-R7 with random values, as `--randomize` requests.
    pub fn randomize_regs(&mut self) {
        let mut rng = StdRng::from_entropy();
        self.reg_file.randomize(&mut rng);
    }

    /// Gets a reference to the PSR.
    pub fn psr(&self) -> &PSR {
        // This is not mutable because editing the PSR can desynchronize
        // the stack pointers if privilege is tampered with.
        &self.psr
    }

    /// Gets a reference to the MCR.
    pub fn mcr(&self) -> &Arc<AtomicBool> {
        // The mcr field is not exposed because that allows someone to swap
        // the MCR with another AtomicBool, which would desynchronize the
        // simulator's MCR from the IO layer's.
        &self.mcr
    }

    /// Sets the condition codes using the provided result.
    fn set_cc(&mut self, result: u16) {
        match (result as i16).cmp(&0) {
            std::cmp::Ordering::Less    => self.psr.set_cc(0b100),
            std::cmp::Ordering::Equal   => self.psr.set_cc(0b010),
            std::cmp::Ordering::Greater => self.psr.set_cc(0b001),
        }
    }

    /// Computes the default memory access context,
    /// which are the default flags to use (see [`Mem::read`] and [`Mem::write`]).
    pub fn default_mem_ctx(&self) -> MemAccessCtx {
        MemAccessCtx { privileged: self.psr.privileged() }
    }

    /// Simulates a read made by an executing instruction.
    ///
    /// This is [`Mem::read`] plus the memory-mapped PSR: the PSR lives in
    /// the CPU rather than the memory array, so reads of `xFFFC` are served
    /// from it directly.
    fn read_mem(&mut self, addr: u16) -> Result<u16, SimErr> {
        match addr {
            io::PSR if self.psr.privileged() => Ok(self.psr.0),
            _ => self.mem.read(addr, self.default_mem_ctx()),
        }
    }

    /// Simulates a write made by an executing instruction.
    ///
    /// Like [`Simulator::read_mem`], writes to `xFFFC` update the CPU's PSR.
    fn write_mem(&mut self, addr: u16, data: u16) -> Result<(), SimErr> {
        match addr {
            io::PSR if self.psr.privileged() => {
                self.psr = PSR(data);
                Ok(())
            },
            _ => self.mem.write(addr, data, self.default_mem_ctx()),
        }
    }

    /// Trap and exception dispatch.
    ///
    /// `vect_addr` is the address of the vector table entry to jump through:
    /// `x0000`-`x00FF` for traps, `x0100`-`x01FF` for exceptions.
    ///
    /// If the machine is in user mode, R6 is exchanged with the saved
    /// supervisor stack pointer and the mode bit is cleared. The old PSR and
    /// the return PC are pushed onto the supervisor stack, and the PC is
    /// loaded from the vector table entry.
    fn dispatch(&mut self, vect_addr: u16) -> Result<(), SimErr> {
        debug!("dispatching through vector table entry x{vect_addr:03X}");

        let old_psr = self.psr.0;
        let old_pc = self.pc;

        if !self.psr.privileged() {
            std::mem::swap(&mut self.saved_sp, &mut self.reg_file[R6]);
            self.psr.set_privileged(true);
        }

        let sp = self.reg_file[R6];
        self.reg_file[R6] = sp.wrapping_sub(2);
        self.write_mem(sp.wrapping_sub(1), old_psr)?;
        self.write_mem(sp.wrapping_sub(2), old_pc)?;

        self.pc = self.read_mem(vect_addr)?;
        Ok(())
    }

    /// Delivers an exception through the exception vector table.
    fn raise_exception(&mut self, code: u8) -> Result<(), SimErr> {
        self.dispatch(EXC_TABLE + u16::from(code))
    }

    /// Fetches, decodes, and executes one instruction, reporting
    /// architectural faults as errors.
    ///
    /// A fault aborts the instruction before any of its memory effects
    /// commit; [`Simulator::step`] then delivers it through the vector
    /// table.
    fn step_inner(&mut self) -> Result<(), SimErr> {
        // Fetch is a raw read: it is not ACV-checked and does not trigger
        // IO effects.
        let word = self.mem.get_raw(self.pc);
        self.pc = self.pc.wrapping_add(1);

        let instr = SimInstr::decode(word)?;

        match instr {
            SimInstr::BR(cc, off) => {
                if cc & self.psr.cc() != 0 {
                    self.pc = self.pc.wrapping_add_signed(off.get());
                }
            },
            SimInstr::ADD(dr, sr1, sr2) => {
                let val1 = self.reg_file[sr1];
                let val2 = match sr2 {
                    ImmOrReg::Imm(i2) => i2.get() as u16,
                    ImmOrReg::Reg(r2) => self.reg_file[r2],
                };

                let result = val1.wrapping_add(val2);
                self.reg_file[dr] = result;
                self.set_cc(result);
            },
            SimInstr::LD(dr, off) => {
                let ea = self.pc.wrapping_add_signed(off.get());
                let val = self.read_mem(ea)?;
                self.reg_file[dr] = val;
                self.set_cc(val);
            },
            SimInstr::ST(sr, off) => {
                let ea = self.pc.wrapping_add_signed(off.get());
                self.write_mem(ea, self.reg_file[sr])?;
            },
            SimInstr::JSR(op) => {
                // Note: the target is read before R7 is set,
                // so JSRR R7 jumps to the address that was in R7.
                let addr = match op {
                    ImmOrReg::Imm(off) => self.pc.wrapping_add_signed(off.get()),
                    ImmOrReg::Reg(br)  => self.reg_file[br],
                };

                self.reg_file[R7] = self.pc;
                self.pc = addr;
            },
            SimInstr::AND(dr, sr1, sr2) => {
                let val1 = self.reg_file[sr1];
                let val2 = match sr2 {
                    ImmOrReg::Imm(i2) => i2.get() as u16,
                    ImmOrReg::Reg(r2) => self.reg_file[r2],
                };

                let result = val1 & val2;
                self.reg_file[dr] = result;
                self.set_cc(result);
            },
            SimInstr::LDR(dr, br, off) => {
                let ea = self.reg_file[br].wrapping_add_signed(off.get());
                let val = self.read_mem(ea)?;
                self.reg_file[dr] = val;
                self.set_cc(val);
            },
            SimInstr::STR(sr, br, off) => {
                let ea = self.reg_file[br].wrapping_add_signed(off.get());
                self.write_mem(ea, self.reg_file[sr])?;
            },
            SimInstr::RTI => {
                if !self.psr.privileged() {
                    return Err(SimErr::PrivilegeViolation);
                }

                // Pop PC and PSR from the supervisor stack.
                let sp = self.reg_file[R6];
                let pc = self.read_mem(sp)?;
                let psr = self.read_mem(sp.wrapping_add(1))?;
                self.reg_file[R6] = sp.wrapping_add(2);

                self.pc = pc;
                self.psr = PSR(psr);

                if !self.psr.privileged() {
                    std::mem::swap(&mut self.saved_sp, &mut self.reg_file[R6]);
                }
            },
            SimInstr::NOT(dr, sr) => {
                let result = !self.reg_file[sr];
                self.reg_file[dr] = result;
                self.set_cc(result);
            },
            SimInstr::LDI(dr, off) => {
                let shifted_pc = self.pc.wrapping_add_signed(off.get());
                let ea = self.read_mem(shifted_pc)?;
                let val = self.read_mem(ea)?;
                self.reg_file[dr] = val;
                self.set_cc(val);
            },
            SimInstr::STI(sr, off) => {
                let shifted_pc = self.pc.wrapping_add_signed(off.get());
                let ea = self.read_mem(shifted_pc)?;
                self.write_mem(ea, self.reg_file[sr])?;
            },
            SimInstr::JMP(br) => {
                self.pc = self.reg_file[br];
            },
            SimInstr::LEA(dr, off) => {
                let ea = self.pc.wrapping_add_signed(off.get());
                self.reg_file[dr] = ea;
                self.set_cc(ea);
            },
            SimInstr::TRAP(vect) => {
                self.dispatch(os::TRAP_TABLE + vect.get())?;
            },
        }

        Ok(())
    }

    /// Simulates one step, executing one instruction.
    ///
    /// Architectural faults raised by the instruction are delivered through
    /// the exception vector table here; the faulting instruction commits no
    /// memory effect.
    fn step(&mut self) -> Result<(), SimErr> {
        let result = self.step_inner();

        self.mem.io.bump_mcc();
        self.instructions_run = self.instructions_run.wrapping_add(1);

        match result {
            Err(SimErr::AccessViolation)    => self.raise_exception(EXC_ACV),
            Err(SimErr::PrivilegeViolation) => self.raise_exception(EXC_PRIV),
            Err(SimErr::IllegalOpcode)      => self.raise_exception(EXC_ILL),
            Ok(()) => Ok(()),
        }
    }

    /// Simulates one step, executing one instruction.
    pub fn step_in(&mut self) -> Result<(), SimErr> {
        self.step()
    }

    /// Runs until the tripwire condition returns false or the clock is
    /// stopped.
    ///
    /// The tripwire is consulted before every instruction; the debugger uses
    /// it to interpose between iterations of the loop.
    pub fn run_while(&mut self, mut tripwire: impl FnMut(&mut Simulator) -> bool) -> Result<(), SimErr> {
        self.mcr.store(true, Ordering::Relaxed);

        // event loop
        // run until:
        // 1. the MCR is set to false
        // 2. the tripwire condition returns false
        let result = {
            let mut r = Ok(());
            while self.mcr.load(Ordering::Relaxed) && tripwire(self) {
                if let e @ Err(_) = self.step() {
                    r = e;
                    break;
                }
            }
            r
        };

        self.mcr.store(false, Ordering::Release);
        result
    }

    /// Executes the program until the clock is stopped.
    pub fn run(&mut self) -> Result<(), SimErr> {
        self.run_while(|_| true)
    }

    /// Executes the program with a limit on how many steps to execute.
    pub fn run_with_limit(&mut self, max_steps: u64) -> Result<(), SimErr> {
        let i = self.instructions_run;
        self.run_while(|sim| sim.instructions_run.wrapping_sub(i) < max_steps)
    }
}
impl Default for Simulator {
    fn default() -> Self {
        Self::new()
    }
}

/// A wrapper over `u16` in order to facilitate the PSR.
///
/// The word is encoded as the following:
/// - `PSR[15]`:    Privilege mode (0 = supervisor, 1 = user)
/// - `PSR[0..3]`:  Condition codes
#[allow(clippy::upper_case_acronyms)]
#[repr(transparent)]
pub struct PSR(pub u16);

impl PSR {
    /// Creates the boot-time PSR: supervisor mode, no condition code set
    /// yet.
    ///
    /// The first register-writing instruction (the bootstrap's first `LD`)
    /// establishes the condition codes; the initial *user* PSR (`x8002`) is
    /// a ROM constant pushed by the bootstrap, not this value.
    pub fn new() -> Self {
        PSR(0x0000)
    }

    /// Checks whether the simulator is in privileged mode.
    /// - `true` = supervisor mode
    /// - `false` = user mode
    pub fn privileged(&self) -> bool {
        (self.0 >> 15) == 0
    }
    /// Checks the condition code of the simulator.
    pub fn cc(&self) -> u8 {
        (self.0 & 0b111) as u8
    }
    /// Sets whether the simulator is in privileged mode.
    pub fn set_privileged(&mut self, privl: bool) {
        self.0 &= 0x7FFF;
        self.0 |= u16::from(!privl) << 15;
    }
    /// Sets the condition code of the simulator.
    pub fn set_cc(&mut self, cc: u8) {
        self.0 &= 0xFFF8;
        self.0 |= u16::from(cc);
    }
}
impl Default for PSR {
    fn default() -> Self {
        Self::new()
    }
}
impl std::fmt::Debug for PSR {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        use std::fmt::Write;
        struct CC(u8);

        impl std::fmt::Debug for CC {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                if self.0 & 0b100 != 0 { f.write_char('N')?; };
                if self.0 & 0b010 != 0 { f.write_char('Z')?; };
                if self.0 & 0b001 != 0 { f.write_char('P')?; };
                Ok(())
            }
        }

        f.debug_struct("PSR")
            .field("privileged", &self.privileged())
            .field("cc", &CC(self.cc()))
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::Ordering;

    use crate::ast::reg_consts::*;

    use super::io::{BufferedIO, MCC};
    use super::mem::MemAccessCtx;
    use super::Simulator;

    const ENTRY: u16 = 0x3000;

    /// A simulator that has booted to the entry of the given user program.
    fn booted(program: &[u16]) -> Simulator {
        let mut sim = Simulator::new();
        sim.mem.copy_block(ENTRY, program);
        sim.set_entry(ENTRY);
        sim.run_while(|s| s.pc != ENTRY).unwrap();
        sim
    }

    fn output_of(io: &BufferedIO) -> String {
        String::from_utf8_lossy(&io.get_output().read().unwrap()).into_owned()
    }

    #[test]
    fn bootstrap_drops_to_user_mode() {
        let sim = booted(&[0xF025]);
        assert_eq!(sim.pc, ENTRY);
        assert_eq!(sim.psr().0, 0x8002, "user mode, Z set");
    }

    #[test]
    fn add_immediate() {
        // ADD R1, R0, #-3
        let mut sim = booted(&[0x123D]);
        sim.reg_file[R0] = 10;

        sim.step_in().unwrap();
        assert_eq!(sim.reg_file[R1], 7);
        assert_eq!(sim.psr().cc(), 0b001);
        assert_eq!(sim.pc, 0x3001);
    }

    #[test]
    fn add_register_wraps() {
        // ADD R2, R0, R1
        let mut sim = booted(&[0x1401]);
        sim.reg_file[R0] = 0xFFFF;
        sim.reg_file[R1] = 3;

        sim.step_in().unwrap();
        assert_eq!(sim.reg_file[R2], 2);
        assert_eq!(sim.psr().cc(), 0b001);
    }

    #[test]
    fn ld_positive_offset() {
        // LD R2, #2 ; effective address x3003
        let mut sim = booted(&[0x2402, 0x0000, 0x0000, 0xABCD]);

        sim.step_in().unwrap();
        assert_eq!(sim.reg_file[R2], 0xABCD);
        assert_eq!(sim.psr().cc(), 0b100);
    }

    #[test]
    fn and_not_lea_set_cc() {
        // AND R0, R0, #0 ; NOT R1, R0 ; LEA R2, #-4
        let mut sim = booted(&[0x5020, 0x923F, 0xE5FC]);
        sim.reg_file[R0] = 0x1234;

        sim.step_in().unwrap();
        assert_eq!(sim.reg_file[R0], 0);
        assert_eq!(sim.psr().cc(), 0b010);

        sim.step_in().unwrap();
        assert_eq!(sim.reg_file[R1], 0xFFFF);
        assert_eq!(sim.psr().cc(), 0b100);

        sim.step_in().unwrap();
        assert_eq!(sim.reg_file[R2], 0x3000 - 1);
        assert_eq!(sim.psr().cc(), 0b001);
    }

    #[test]
    fn br_taken_and_not_taken() {
        // AND R0, R0, #0 (sets Z) ; BRn #5 ; BRz #2
        let mut sim = booted(&[0x5020, 0x0805, 0x0402]);

        sim.step_in().unwrap();
        sim.step_in().unwrap();
        assert_eq!(sim.pc, 0x3002, "BRn not taken on Z");
        sim.step_in().unwrap();
        assert_eq!(sim.pc, 0x3005, "BRz taken");
    }

    #[test]
    fn jsr_and_jsrr() {
        // JSR #2 ; . ; . ; JMP R7
        let mut sim = booted(&[0x4802, 0x0000, 0x0000, 0xC1C0]);

        sim.step_in().unwrap();
        assert_eq!(sim.pc, 0x3003);
        assert_eq!(sim.reg_file[R7], 0x3001);

        // RET
        sim.step_in().unwrap();
        assert_eq!(sim.pc, 0x3001);

        // JSRR R3
        let mut sim = booted(&[0x40C0]);
        sim.reg_file[R3] = 0x3500;
        sim.step_in().unwrap();
        assert_eq!(sim.pc, 0x3500);
        assert_eq!(sim.reg_file[R7], 0x3001);

        // JSRR R7 jumps to the address that was in R7
        let mut sim = booted(&[0x41C0]);
        sim.reg_file[R7] = 0x3600;
        sim.step_in().unwrap();
        assert_eq!(sim.pc, 0x3600);
        assert_eq!(sim.reg_file[R7], 0x3001);
    }

    #[test]
    fn str_and_ldr() {
        // STR R2, R1, #1 ; LDR R3, R1, #1
        let mut sim = booted(&[0x7441, 0x6641]);
        sim.reg_file[R1] = 0x4000;
        sim.reg_file[R2] = 0x5A5A;

        sim.step_in().unwrap();
        assert_eq!(sim.mem.get_raw(0x4001), 0x5A5A);
        sim.step_in().unwrap();
        assert_eq!(sim.reg_file[R3], 0x5A5A);
    }

    #[test]
    fn halt_stops_the_clock() {
        let io = BufferedIO::new();
        let mut sim = Simulator::new();
        sim.open_io(io.clone());
        sim.mem.copy_block(ENTRY, &[0xF025]);
        sim.set_entry(ENTRY);

        sim.run().unwrap();

        assert!(!sim.mcr().load(Ordering::Relaxed));
        assert_eq!(output_of(&io), "\n\nHalting!\n\n");
        assert!(sim.psr().privileged(), "halts inside the supervisor handler");
    }

    #[test]
    fn puts_writes_string_then_halts() {
        // LEA R0, #2 ; PUTS ; HALT ; "Hi"
        let io = BufferedIO::new();
        let mut sim = Simulator::new();
        sim.open_io(io.clone());
        sim.mem.copy_block(ENTRY, &[0xE002, 0xF022, 0xF025, 0x0048, 0x0069, 0x0000]);
        sim.set_entry(ENTRY);

        sim.run().unwrap();
        assert_eq!(output_of(&io), "Hi\n\nHalting!\n\n");
    }

    #[test]
    fn putsp_writes_packed_string() {
        // LEA R0, #2 ; PUTSP ; HALT ; "ab" packed
        let io = BufferedIO::new();
        let mut sim = Simulator::new();
        sim.open_io(io.clone());
        sim.mem.copy_block(ENTRY, &[0xE002, 0xF024, 0xF025, 0x6261, 0x0000]);
        sim.set_entry(ENTRY);

        sim.run().unwrap();
        assert_eq!(output_of(&io), "ab\n\nHalting!\n\n");
    }

    #[test]
    fn getc_reads_input() {
        // GETC ; HALT
        let io = BufferedIO::with_input("A");
        let mut sim = Simulator::new();
        sim.open_io(io.clone());
        sim.mem.copy_block(ENTRY, &[0xF020, 0xF025]);
        sim.set_entry(ENTRY);

        // run the boot and the whole GETC trap, up to the HALT
        sim.run_while(|s| s.pc != ENTRY + 1).unwrap();
        assert_eq!(sim.reg_file[R0], u16::from(b'A'));
    }

    #[test]
    fn trap_rti_round_trip() {
        // custom trap x30 whose handler is a bare RTI
        let mut sim = booted(&[0xF030]);
        sim.mem.set_raw(0x0030, 0x0400);
        sim.mem.set_raw(0x0400, 0x8000);

        let user_psr = sim.psr().0;
        let user_sp = sim.reg_file[R6];

        sim.step_in().unwrap();
        assert_eq!(sim.pc, 0x0400);
        assert!(sim.psr().privileged());

        sim.step_in().unwrap();
        assert_eq!(sim.pc, 0x3001, "PC restored to just after the TRAP");
        assert_eq!(sim.psr().0, user_psr, "PSR restored");
        assert_eq!(sim.reg_file[R6], user_sp, "user stack pointer restored");
    }

    #[test]
    fn rti_in_user_mode_raises_priv() {
        let io = BufferedIO::new();
        let mut sim = Simulator::new();
        sim.open_io(io.clone());
        sim.mem.copy_block(ENTRY, &[0x8000]);
        sim.set_entry(ENTRY);

        sim.run().unwrap();
        assert!(output_of(&io).contains("Privilege mode exception!"));
        assert!(output_of(&io).contains("Halting!"));
    }

    #[test]
    fn illegal_opcode_raises_ill() {
        let io = BufferedIO::new();
        let mut sim = Simulator::new();
        sim.open_io(io.clone());
        sim.mem.copy_block(ENTRY, &[0xD000]);
        sim.set_entry(ENTRY);

        sim.run().unwrap();
        assert!(output_of(&io).contains("Illegal instruction exception!"));
    }

    #[test]
    fn user_store_below_user_space_is_acv() {
        // STI R0, #-2 ; pointer word would be x2FFF, below user space
        let mut sim = booted(&[0xB1FE]);
        sim.reg_file[R0] = 0xBEEF;
        let old = sim.mem.get_raw(0x0000);

        sim.step_in().unwrap();
        assert_eq!(sim.pc, sim.mem.get_raw(0x0102), "vectored through x102");
        assert!(sim.psr().privileged());
        assert_eq!(sim.mem.get_raw(0x0000), old, "store did not commit");
        assert_eq!(sim.mem.get_raw(0x2FFF), 0, "store did not commit");
    }

    #[test]
    fn acv_handler_prints_banner() {
        let io = BufferedIO::new();
        let mut sim = Simulator::new();
        sim.open_io(io.clone());
        // ST R0, #-2 ; effective address x2FFF
        sim.mem.copy_block(ENTRY, &[0x31FE]);
        sim.set_entry(ENTRY);

        sim.run().unwrap();
        assert!(output_of(&io).contains("Access Violation Exception!"));
    }

    #[test]
    fn ldi_checks_both_addresses() {
        // LDI R0, #1 ; pointer at x3002 targets xFE0A (device space)
        let mut sim = booted(&[0xA001, 0x0000, 0xFE0A]);

        sim.step_in().unwrap();
        assert_eq!(sim.pc, sim.mem.get_raw(0x0102), "dereferenced address is also checked");
    }

    #[test]
    fn supervisor_may_access_everything() {
        // runs entirely in supervisor mode: the boot path itself stores to
        // the supervisor stack below x3000 and reads the ROM
        let mut sim = Simulator::new();
        sim.set_entry(ENTRY);
        sim.mem.copy_block(ENTRY, &[0xF025]);
        assert!(sim.run_with_limit(100).is_ok());
    }

    #[test]
    fn mcc_counts_instructions() {
        const SUPERVISOR: MemAccessCtx = MemAccessCtx { privileged: true };

        let mut sim = booted(&[0x1020, 0x1020, 0xF025]);
        let before = sim.mem.read(MCC, SUPERVISOR).unwrap();

        sim.step_in().unwrap();
        sim.step_in().unwrap();
        let after = sim.mem.read(MCC, SUPERVISOR).unwrap();
        assert_eq!(after.wrapping_sub(before), 2);
    }

    #[test]
    fn bad_trap_prints_banner() {
        let io = BufferedIO::new();
        let mut sim = Simulator::new();
        sim.open_io(io.clone());
        sim.mem.copy_block(ENTRY, &[0xF0FF]);
        sim.set_entry(ENTRY);

        sim.run().unwrap();
        assert!(output_of(&io).contains("Bad Trap Executed!"));
    }

    #[test]
    fn run_with_limit_stops() {
        // BRnzp #-1 spins forever
        let mut sim = booted(&[0x0FFF]);
        let start = sim.instructions_run;
        sim.run_with_limit(25).unwrap();
        assert_eq!(sim.instructions_run - start, 25);
    }

    #[test]
    fn trap_enters_supervisor_stack() {
        let mut sim = booted(&[0xF030]);
        sim.mem.set_raw(0x0030, 0x0400);
        sim.mem.set_raw(0x0400, 0x8000);
        let user_sp = sim.reg_file[R6];

        sim.step_in().unwrap();
        // supervisor stack holds return PC then PSR
        let ssp = sim.reg_file[R6];
        assert_eq!(sim.mem.get_raw(ssp), 0x3001);
        assert_eq!(sim.mem.get_raw(ssp.wrapping_add(1)), 0x8002);
        assert_ne!(ssp, user_sp);
    }
}
