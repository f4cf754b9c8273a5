//! The built-in supervisor ROM.
//!
//! The ROM occupies `x0000` through `x031F` and is written into memory once
//! when a [`Simulator`] is constructed. It consists of three parts:
//!
//! - the **trap vector table** (`x0000`-`x00FF`): every slot points at the
//!   "bad trap" handler except the six standard services,
//! - the **exception vector table** (`x0100`-`x01FF`): slots for the
//!   privilege-mode, illegal-instruction, and access-violation exceptions,
//!   with every other slot pointing at the "bad interrupt" handler,
//! - the **handlers** (`x0200`-`x031F`): hand-assembled LC-3 routines,
//!   entered through the vectors and (for the service traps) ending in RTI.
//!
//! The handler addresses are part of the machine's contract: user programs
//! observe them in R7 and in the vector tables, so they are fixed here as
//! named constants and the image builder asserts its layout against them.
//!
//! [`Simulator`]: super::Simulator

use std::sync::OnceLock;

use crate::ast::reg_consts::*;
use crate::ast::sim::SimInstr;
use crate::ast::{CondCode, IOffset, ImmOrReg, Reg, TrapVect8};

use super::io::{DDR, DSR, KBDR, KBSR, MCR};

/// Base address of the trap vector table.
pub const TRAP_TABLE: u16 = 0x0000;
/// Base address of the interrupt/exception vector table.
pub const EXC_TABLE: u16 = 0x0100;

/// Exception code for a privilege-mode violation (RTI in user mode).
pub const EXC_PRIV: u8 = 0x00;
/// Exception code for an illegal opcode.
pub const EXC_ILL: u8 = 0x01;
/// Exception code for an access control violation.
pub const EXC_ACV: u8 = 0x02;

/// Address of the OS bootstrap, where execution begins.
///
/// The bootstrap sets up the supervisor stack, pushes the initial user PSR
/// (`x8002`) and the user program's entry point, and drops to user mode
/// with an RTI.
pub const BOOT: u16 = 0x0230;
/// Address of the ROM word holding the user program's entry point.
///
/// The loader stores the last object file's origin here; the bootstrap's
/// RTI transfers control to it.
pub const USER_PC_SLOT: u16 = 0x023A;
/// One past the last address occupied by the ROM image.
pub const ROM_END: u16 = 0x0320;

const BAD_TRAP: u16 = 0x0200;
const HALT_HANDLER: u16 = 0x021A;
const PUTS_HANDLER: u16 = 0x023B;
const OUT_HANDLER: u16 = 0x024A;
const GETC_HANDLER: u16 = 0x0254;
const IN_HANDLER: u16 = 0x025A;
const PUTSP_HANDLER: u16 = 0x027A;
const PRIV_HANDLER: u16 = 0x02A9;
const ILL_HANDLER: u16 = 0x02CA;
const ACV_HANDLER: u16 = 0x02F0;
const BAD_INT: u16 = 0x0313;

/// The supervisor ROM image, addresses `x0000` to [`ROM_END`].
pub fn rom() -> &'static [u16; ROM_END as usize] {
    static ROM: OnceLock<[u16; ROM_END as usize]> = OnceLock::new();
    ROM.get_or_init(build_rom)
}

// Builder shorthands, one per mnemonic the handlers use.
fn addi(dr: Reg, sr: Reg, imm: i16) -> SimInstr {
    SimInstr::ADD(dr, sr, ImmOrReg::Imm(IOffset::new_trunc(imm)))
}
fn addr(dr: Reg, sr1: Reg, sr2: Reg) -> SimInstr {
    SimInstr::ADD(dr, sr1, ImmOrReg::Reg(sr2))
}
fn andi(dr: Reg, sr: Reg, imm: i16) -> SimInstr {
    SimInstr::AND(dr, sr, ImmOrReg::Imm(IOffset::new_trunc(imm)))
}
fn andr(dr: Reg, sr1: Reg, sr2: Reg) -> SimInstr {
    SimInstr::AND(dr, sr1, ImmOrReg::Reg(sr2))
}
fn br(cc: CondCode, off: i16) -> SimInstr {
    SimInstr::BR(cc, IOffset::new_trunc(off))
}
fn ld(dr: Reg, off: i16) -> SimInstr {
    SimInstr::LD(dr, IOffset::new_trunc(off))
}
fn ldi(dr: Reg, off: i16) -> SimInstr {
    SimInstr::LDI(dr, IOffset::new_trunc(off))
}
fn ldr(dr: Reg, base: Reg, off: i16) -> SimInstr {
    SimInstr::LDR(dr, base, IOffset::new_trunc(off))
}
fn lea(dr: Reg, off: i16) -> SimInstr {
    SimInstr::LEA(dr, IOffset::new_trunc(off))
}
fn sti(sr: Reg, off: i16) -> SimInstr {
    SimInstr::STI(sr, IOffset::new_trunc(off))
}
fn str_r(sr: Reg, base: Reg, off: i16) -> SimInstr {
    SimInstr::STR(sr, base, IOffset::new_trunc(off))
}
fn trap(vect: u16) -> SimInstr {
    SimInstr::TRAP(TrapVect8::new_trunc(vect))
}

/// Sequential writer over the ROM image.
///
/// Handlers are emitted in address order; `expect` pins each handler's start
/// to its published constant so a miscounted body is caught immediately.
struct RomWriter {
    image: [u16; ROM_END as usize],
    at: usize,
}
impl RomWriter {
    fn expect(&self, addr: u16) {
        assert_eq!(self.at, usize::from(addr), "handler layout drifted");
    }
    fn word(&mut self, w: u16) {
        self.image[self.at] = w;
        self.at += 1;
    }
    fn instr(&mut self, i: SimInstr) {
        self.word(i.encode());
    }
    /// A zero-terminated string, one character per word (PUTS layout).
    fn zstring(&mut self, s: &str) {
        for b in s.bytes() {
            self.word(b.into());
        }
        self.word(0);
    }
    /// A zero-terminated string, two characters per word, low byte first
    /// (PUTSP layout).
    fn packed_zstring(&mut self, s: &str) {
        for pair in s.as_bytes().chunks(2) {
            let lo = u16::from(pair[0]);
            let hi = pair.get(1).copied().map_or(0, u16::from);
            self.word(lo | (hi << 8));
        }
        self.word(0);
    }
}

fn build_rom() -> [u16; ROM_END as usize] {
    let mut image = [0u16; ROM_END as usize];

    // Trap vector table: everything is a bad trap except the six services.
    image[..0x100].fill(BAD_TRAP);
    image[0x20] = GETC_HANDLER;
    image[0x21] = OUT_HANDLER;
    image[0x22] = PUTS_HANDLER;
    image[0x23] = IN_HANDLER;
    image[0x24] = PUTSP_HANDLER;
    image[0x25] = HALT_HANDLER;

    // Exception vector table.
    image[0x100..0x200].fill(BAD_INT);
    image[usize::from(EXC_TABLE) + usize::from(EXC_PRIV)] = PRIV_HANDLER;
    image[usize::from(EXC_TABLE) + usize::from(EXC_ILL)] = ILL_HANDLER;
    image[usize::from(EXC_TABLE) + usize::from(EXC_ACV)] = ACV_HANDLER;

    let mut w = RomWriter { image, at: usize::from(BAD_TRAP) };

    // Bad trap: print the banner, then halt.
    w.expect(BAD_TRAP);
    w.instr(lea(R0, 2));
    w.instr(trap(0x22));
    w.instr(trap(0x25));
    w.zstring("\n\nBad Trap Executed!\n\n");

    // HALT: print the banner, then clear MCR[15] against the x7FFF mask
    // until the clock stops.
    w.expect(HALT_HANDLER);
    w.instr(lea(R0, 8));
    w.instr(trap(0x22));
    w.instr(ldi(R0, 4)); // MCR
    w.instr(ld(R1, 4));  // x7FFF
    w.instr(andr(R0, R0, R1));
    w.instr(sti(R0, 1)); // MCR
    w.instr(br(0b111, -5));
    w.word(MCR);
    w.word(0x7FFF);
    w.zstring("\n\nHalting!\n\n");

    // OS bootstrap: R6 <- supervisor stack base, push user PSR and user PC,
    // RTI into the user program.
    w.expect(BOOT);
    w.instr(ld(R6, 8));
    w.instr(ld(R0, 6)); // user PSR
    w.instr(addi(R6, R6, -1));
    w.instr(str_r(R0, R6, 0));
    w.instr(ld(R0, 5)); // user PC
    w.instr(addi(R6, R6, -1));
    w.instr(str_r(R0, R6, 0));
    w.instr(SimInstr::RTI);
    w.word(0x8002); // initial user PSR (user mode, Z set)
    w.word(0x3000); // supervisor stack base
    w.expect(USER_PC_SLOT);
    w.word(0x3000); // user program entry, patched by the loader

    // PUTS: write the zero-terminated string at R0 through OUT.
    w.expect(PUTS_HANDLER);
    w.instr(addi(R6, R6, -1));
    w.instr(str_r(R0, R6, 0));
    w.instr(addi(R6, R6, -1));
    w.instr(str_r(R1, R6, 0));
    w.instr(addi(R1, R0, 0));
    w.instr(ldr(R0, R1, 0));
    w.instr(br(0b010, 3));
    w.instr(trap(0x21));
    w.instr(addi(R1, R1, 1));
    w.instr(br(0b111, -5));
    w.instr(ldr(R1, R6, 0));
    w.instr(addi(R6, R6, 1));
    w.instr(ldr(R0, R6, 0));
    w.instr(addi(R6, R6, 1));
    w.instr(SimInstr::RTI);

    // OUT: spin until the display is ready, then store R0 to the DDR.
    w.expect(OUT_HANDLER);
    w.instr(addi(R6, R6, -1));
    w.instr(str_r(R1, R6, 0));
    w.instr(ldi(R1, 5)); // DSR
    w.instr(br(0b011, -2));
    w.instr(sti(R0, 4)); // DDR
    w.instr(ldr(R1, R6, 0));
    w.instr(addi(R6, R6, 1));
    w.instr(SimInstr::RTI);
    w.word(DSR);
    w.word(DDR);

    // GETC: spin until a key is ready, then load it into R0.
    w.expect(GETC_HANDLER);
    w.instr(ldi(R0, 3)); // KBSR
    w.instr(br(0b011, -2));
    w.instr(ldi(R0, 2)); // KBDR
    w.instr(SimInstr::RTI);
    w.word(KBSR);
    w.word(KBDR);

    // IN: prompt, GETC, echo, newline.
    w.expect(IN_HANDLER);
    w.instr(lea(R0, 11));
    w.instr(trap(0x22));
    w.instr(trap(0x20));
    w.instr(trap(0x21));
    w.instr(addi(R6, R6, -1));
    w.instr(str_r(R0, R6, 0));
    w.instr(andi(R0, R0, 0));
    w.instr(addi(R0, R0, 10)); // '\n'
    w.instr(trap(0x21));
    w.instr(ldr(R0, R6, 0));
    w.instr(addi(R6, R6, 1));
    w.instr(SimInstr::RTI);
    w.zstring("Enter a Character: ");

    // PUTSP: write a packed string at R0, low byte then high byte per word,
    // until a full zero word. The high byte is recovered with a repeated-
    // subtraction loop against -x100 (no shift instruction on this machine).
    w.expect(PUTSP_HANDLER);
    w.instr(addi(R6, R6, -1));
    w.instr(str_r(R0, R6, 0));
    w.instr(addi(R6, R6, -1));
    w.instr(str_r(R1, R6, 0));
    w.instr(addi(R6, R6, -1));
    w.instr(str_r(R2, R6, 0));
    w.instr(addi(R6, R6, -1));
    w.instr(str_r(R3, R6, 0));
    w.instr(addi(R6, R6, -1));
    w.instr(str_r(R4, R6, 0));
    w.instr(addi(R6, R6, -1));
    w.instr(str_r(R5, R6, 0));
    w.instr(addi(R1, R0, 0));
    w.instr(ld(R4, 0x20)); // -x100
    w.instr(ld(R2, 0x1D)); // x00FF
    w.instr(ldr(R0, R1, 0));
    w.instr(br(0b010, 14)); // zero word: restore and return
    w.instr(andr(R0, R0, R2));
    w.instr(trap(0x21));
    w.instr(ld(R2, 0x19)); // xFF00
    w.instr(ldr(R5, R1, 0));
    w.instr(andr(R5, R5, R2));
    w.instr(br(0b010, 6)); // no high byte: next word
    w.instr(andi(R0, R0, 0));
    w.instr(addr(R5, R5, R4));
    w.instr(addi(R0, R0, 1));
    w.instr(addr(R3, R5, R4));
    w.instr(br(0b011, -4));
    w.instr(trap(0x21));
    w.instr(addi(R1, R1, 1));
    w.instr(br(0b111, -0x11));
    w.instr(ldr(R5, R6, 0));
    w.instr(addi(R6, R6, 1));
    w.instr(ldr(R4, R6, 0));
    w.instr(addi(R6, R6, 1));
    w.instr(ldr(R3, R6, 0));
    w.instr(addi(R6, R6, 1));
    w.instr(ldr(R2, R6, 0));
    w.instr(addi(R6, R6, 1));
    w.instr(ldr(R1, R6, 0));
    w.instr(addi(R6, R6, 1));
    w.instr(ldr(R0, R6, 0));
    w.instr(addi(R6, R6, 1));
    w.instr(SimInstr::RTI);
    w.word(0x00FF);
    w.word(0xFF00);
    w.word(0xFF00);

    // Exception handlers: print a diagnostic and halt.
    w.expect(PRIV_HANDLER);
    w.instr(lea(R0, 2));
    w.instr(trap(0x22));
    w.instr(trap(0x25));
    w.zstring("\n\nPrivilege mode exception!\n\n");

    w.expect(ILL_HANDLER);
    w.instr(lea(R0, 2));
    w.instr(trap(0x22));
    w.instr(trap(0x25));
    w.zstring("\n\nIllegal instruction exception!\n\n");

    w.expect(ACV_HANDLER);
    w.instr(lea(R0, 2));
    w.instr(trap(0x22));
    w.instr(trap(0x25));
    w.zstring("\n\nAccess Violation Exception!\n\n");

    // Bad interrupt: the banner is packed, exercising PUTSP's
    // two-characters-per-word contract.
    w.expect(BAD_INT);
    w.instr(lea(R0, 2));
    w.instr(trap(0x24));
    w.instr(trap(0x25));
    w.packed_zstring("\n\nBad Interrupt!\n\n");
    w.expect(ROM_END);

    w.image
}

#[cfg(test)]
mod tests {
    use crate::ast::sim::SimInstr;

    use super::*;

    #[test]
    fn trap_vectors() {
        let rom = rom();
        assert_eq!(rom[0x20], GETC_HANDLER);
        assert_eq!(rom[0x21], OUT_HANDLER);
        assert_eq!(rom[0x22], PUTS_HANDLER);
        assert_eq!(rom[0x23], IN_HANDLER);
        assert_eq!(rom[0x24], PUTSP_HANDLER);
        assert_eq!(rom[0x25], HALT_HANDLER);
        assert_eq!(rom[0x00], BAD_TRAP);
        assert_eq!(rom[0x26], BAD_TRAP);
        assert_eq!(rom[0xFF], BAD_TRAP);
    }

    #[test]
    fn exception_vectors() {
        let rom = rom();
        assert_eq!(rom[0x100], PRIV_HANDLER);
        assert_eq!(rom[0x101], ILL_HANDLER);
        assert_eq!(rom[0x102], ACV_HANDLER);
        assert_eq!(rom[0x103], BAD_INT);
        assert_eq!(rom[0x1FF], BAD_INT);
    }

    #[test]
    fn bootstrap_constants() {
        let rom = rom();
        assert_eq!(rom[0x0238], 0x8002, "initial user PSR");
        assert_eq!(rom[0x0239], 0x3000, "supervisor stack base");
        assert_eq!(rom[usize::from(USER_PC_SLOT)], 0x3000, "default entry");
        assert_eq!(rom[usize::from(BOOT) + 7], SimInstr::RTI.encode());
    }

    #[test]
    fn halt_handler_targets_mcr() {
        let rom = rom();
        assert_eq!(rom[0x0221], MCR);
        assert_eq!(rom[0x0222], 0x7FFF);
    }

    #[test]
    fn device_pointers() {
        let rom = rom();
        assert_eq!(rom[0x0252], DSR);
        assert_eq!(rom[0x0253], DDR);
        assert_eq!(rom[0x0258], KBSR);
        assert_eq!(rom[0x0259], KBDR);
    }

    fn rom_zstring(at: u16) -> String {
        rom()[usize::from(at)..].iter()
            .take_while(|&&w| w != 0)
            .map(|&w| char::from(w as u8))
            .collect()
    }

    #[test]
    fn banners() {
        assert_eq!(rom_zstring(0x0203), "\n\nBad Trap Executed!\n\n");
        assert_eq!(rom_zstring(0x0223), "\n\nHalting!\n\n");
        assert_eq!(rom_zstring(0x0266), "Enter a Character: ");
        assert_eq!(rom_zstring(0x02AC), "\n\nPrivilege mode exception!\n\n");
        assert_eq!(rom_zstring(0x02CD), "\n\nIllegal instruction exception!\n\n");
        assert_eq!(rom_zstring(0x02F3), "\n\nAccess Violation Exception!\n\n");
    }

    #[test]
    fn bad_interrupt_banner_is_packed() {
        let rom = rom();
        let mut s = String::new();
        for &w in &rom[0x0316..] {
            if w == 0 { break; }
            s.push(char::from(w as u8));
            if w >> 8 != 0 { s.push(char::from((w >> 8) as u8)); }
        }
        assert_eq!(s, "\n\nBad Interrupt!\n\n");
    }

    #[test]
    fn handlers_decode() {
        // every handler entry point begins with a real instruction
        for entry in [BAD_TRAP, HALT_HANDLER, BOOT, PUTS_HANDLER, OUT_HANDLER,
                      GETC_HANDLER, IN_HANDLER, PUTSP_HANDLER, PRIV_HANDLER,
                      ILL_HANDLER, ACV_HANDLER, BAD_INT] {
            assert!(SimInstr::decode(rom()[usize::from(entry)]).is_ok(), "x{entry:04X}");
        }
    }
}
