//! Breakpoints and the interactive debugger.
//!
//! The debugger interposes between iterations of the execution loop (via
//! [`Simulator::run_while`]'s tripwire) and pauses it at breakpoints. While
//! paused, it reads commands from stdin: stepping, stepping over subroutine
//! and trap calls, inspecting and mutating registers and memory, decoding
//! instructions, and managing the breakpoint list.
//!
//! ```no_run
//! use lc3sim::sim::Simulator;
//! use lc3sim::sim::debug::Debugger;
//!
//! let mut sim = Simulator::new();
//! // ... load a program with entry x3000 ...
//! let mut dbg = Debugger::new(0x3000);
//! dbg.run(&mut sim).unwrap(); // pauses when control reaches x3000
//! ```

use std::io::{self, BufRead, Write as _};

use crate::ast::reg_consts::*;
use crate::ast::sim::disassemble;
use crate::ast::Reg;

use super::{SimErr, Simulator};

/// The most breakpoints that can be set at once.
pub const MAX_BREAKPOINTS: usize = 64;

/// A bounded list of PC breakpoints.
///
/// Breakpoints are plain addresses: the debugger pauses when the PC is about
/// to execute one of them. The list remembers insertion order so the most
/// recently added breakpoint can be popped.
#[derive(Debug, Clone, Default)]
pub struct BreakpointList {
    inner: Vec<u16>,
}

impl BreakpointList {
    /// Creates an empty breakpoint list.
    pub fn new() -> Self {
        Default::default()
    }

    /// Counts the number of set breakpoints.
    pub fn len(&self) -> usize {
        self.inner.len()
    }
    /// Checks if no breakpoints are set.
    pub fn is_empty(&self) -> bool {
        self.inner.is_empty()
    }
    /// Checks whether a breakpoint is set at the given address.
    pub fn contains(&self, addr: u16) -> bool {
        self.inner.contains(&addr)
    }

    /// Sets a breakpoint at the given address.
    ///
    /// Fails (returning `false`) if the list is full. Setting an
    /// already-set breakpoint succeeds without duplicating it.
    pub fn push(&mut self, addr: u16) -> bool {
        if self.contains(addr) { return true; }
        if self.inner.len() >= MAX_BREAKPOINTS { return false; }
        self.inner.push(addr);
        true
    }

    /// Removes the breakpoint at the given address, returning whether one
    /// was set there.
    pub fn remove(&mut self, addr: u16) -> bool {
        match self.inner.iter().position(|&a| a == addr) {
            Some(i) => {
                self.inner.remove(i);
                true
            },
            None => false,
        }
    }

    /// Removes and returns the most recently added breakpoint.
    pub fn pop(&mut self) -> Option<u16> {
        self.inner.pop()
    }

    /// Removes all breakpoints.
    pub fn clear(&mut self) {
        self.inner.clear()
    }

    /// Iterates over the breakpoints in insertion order.
    pub fn iter(&self) -> std::slice::Iter<'_, u16> {
        self.inner.iter()
    }
}

/// Whether a command releases execution or keeps the REPL reading.
enum Action {
    /// Keep prompting.
    Stay,
    /// Let the machine run (one step, or freely if `cont` was set).
    Release,
}

/// The interactive debugger.
///
/// Constructed with the user program's entry point, where an automatic
/// breakpoint is placed: the machine boots through the supervisor ROM
/// unimpeded and pauses the first time control reaches user code.
pub struct Debugger {
    /// The breakpoints currently set.
    pub breakpoints: BreakpointList,
    /// Whether the machine is running freely (until a breakpoint).
    cont: bool,
    /// One-shot breakpoint used by `next` to run over a subroutine or trap.
    one_shot: Option<u16>,
    /// The last command line, replayed on an empty input line.
    last: String,
    /// Set once `quit` has been requested.
    quit: bool,
}

impl Debugger {
    /// Creates a debugger with an automatic breakpoint at `entry`.
    pub fn new(entry: u16) -> Self {
        let mut breakpoints = BreakpointList::new();
        breakpoints.push(entry);
        Self {
            breakpoints,
            cont: true,
            one_shot: None,
            last: String::new(),
            quit: false,
        }
    }

    /// Whether the user has quit the debugger.
    pub fn quit_requested(&self) -> bool {
        self.quit
    }

    /// Runs the simulator under this debugger until the clock stops or the
    /// user quits.
    pub fn run(&mut self, sim: &mut Simulator) -> Result<(), SimErr> {
        sim.run_while(|sim| self.tick(sim))
    }

    /// The tripwire consulted before each executed instruction.
    ///
    /// Returns whether execution should proceed; `false` stops the loop
    /// (the user quit).
    pub fn tick(&mut self, sim: &mut Simulator) -> bool {
        match self.should_pause(sim) {
            true  => self.repl(sim),
            false => true,
        }
    }

    /// Updates the step state against the current PC and decides whether to
    /// pause.
    fn should_pause(&mut self, sim: &Simulator) -> bool {
        if self.one_shot == Some(sim.pc) {
            self.one_shot = None;
        }
        if self.breakpoints.contains(sim.pc) {
            self.cont = false;
        }
        // a pending step-over runs through breakpoints
        self.one_shot.is_none() && !self.cont
    }

    /// Prompts until a command releases execution. Returns `false` if the
    /// user quit.
    fn repl(&mut self, sim: &mut Simulator) -> bool {
        println!("instr: {}", disassemble(sim.mem.get_raw(sim.pc)));
        dump_registers(sim);

        let mut line = String::new();
        loop {
            print!(">>> ");
            let _ = io::stdout().flush();

            line.clear();
            match io::stdin().lock().read_line(&mut line) {
                Ok(0) | Err(_) => {
                    // EOF quits like `q`
                    self.quit = true;
                    return false;
                },
                Ok(_) => {},
            }

            let cmd = match line.trim() {
                "" => self.last.clone(),
                l => l.to_string(),
            };
            if let Action::Release = self.exec_line(sim, &cmd) {
                return !self.quit;
            }
        }
    }

    /// Executes one command line.
    fn exec_line(&mut self, sim: &mut Simulator, line: &str) -> Action {
        let mut tokens = line.split_whitespace();
        let Some(cmd) = tokens.next() else {
            println!("Invalid parameter!");
            return Action::Stay;
        };

        match cmd {
            "s" | "step" => {
                self.last = line.to_string();
                Action::Release
            },
            "c" | "continue" => {
                self.last = line.to_string();
                self.cont = true;
                Action::Release
            },
            "n" | "next" => {
                self.last = line.to_string();
                // run over subroutine and trap calls in one step
                let opcode = sim.mem.get_raw(sim.pc) >> 12;
                if opcode == 0b0100 || opcode == 0b1111 {
                    self.one_shot = Some(sim.pc.wrapping_add(1));
                }
                Action::Release
            },
            "q" | "quit" | "exit" => {
                self.quit = true;
                Action::Release
            },
            "clear" => {
                print!("\x1b[1;1H\x1b[2J");
                let _ = io::stdout().flush();
                Action::Stay
            },
            "h" | "help" => {
                print_help(tokens.next());
                Action::Stay
            },
            "read" => {
                let Some(addr) = tokens.next().and_then(parse_hex) else {
                    println!("Invalid parameter!");
                    return Action::Stay;
                };
                println!("memory[{:#x}]={:#x}", addr, sim.mem.get_raw(addr));
                self.last = line.to_string();
                Action::Stay
            },
            "write" => {
                let addr = tokens.next().and_then(parse_hex);
                let val = tokens.next().and_then(parse_hex);
                let (Some(addr), Some(val)) = (addr, val) else {
                    println!("Invalid parameter!");
                    return Action::Stay;
                };
                sim.mem.set_raw(addr, val);
                println!("memory[{addr:#x}]={val:#x}");
                self.last = line.to_string();
                Action::Stay
            },
            "decode" => {
                let addr = match tokens.next() {
                    Some("PC") => Some(sim.pc),
                    Some(tok) => parse_hex(tok),
                    None => None,
                };
                let Some(addr) = addr else {
                    println!("Invalid parameter!");
                    return Action::Stay;
                };
                println!("instr: {}", disassemble(sim.mem.get_raw(addr)));
                self.last = line.to_string();
                Action::Stay
            },
            "decode-i" => {
                let Some(word) = tokens.next().and_then(parse_hex) else {
                    println!("Invalid parameter!");
                    return Action::Stay;
                };
                println!("instr: {}", disassemble(word));
                Action::Stay
            },
            "goto" => {
                let Some(addr) = tokens.next().and_then(parse_hex) else {
                    println!("Invalid parameter!");
                    return Action::Stay;
                };
                sim.pc = addr;
                self.last = line.to_string();
                Action::Release
            },
            "reg" => {
                self.exec_reg(sim, line, tokens)
            },
            "break" => {
                self.exec_break(line, tokens)
            },
            _ => {
                println!("invalid command: {line}");
                Action::Stay
            },
        }
    }

    fn exec_reg<'a>(&mut self, sim: &mut Simulator, line: &str, mut tokens: impl Iterator<Item = &'a str>) -> Action {
        match tokens.next() {
            Some("list") | Some("show") => {
                dump_registers(sim);
            },
            Some("clear") => {
                sim.reg_file.clear();
            },
            Some("set") => {
                let reg = tokens.next().and_then(parse_reg);
                let val = tokens.next().and_then(parse_hex);
                let (Some(reg), Some(val)) = (reg, val) else {
                    println!("Invalid parameter!");
                    return Action::Stay;
                };
                sim.reg_file[reg] = val;
            },
            _ => {
                println!("Invalid parameter!");
                return Action::Stay;
            },
        }
        self.last = line.to_string();
        Action::Stay
    }

    fn exec_break<'a>(&mut self, line: &str, mut tokens: impl Iterator<Item = &'a str>) -> Action {
        match tokens.next() {
            Some("add") | Some("push") => {
                let Some(addr) = tokens.next().and_then(parse_hex) else {
                    println!("Invalid parameter!");
                    return Action::Stay;
                };
                if self.breakpoints.contains(addr) {
                    println!("breakpoint already set at {addr:#x}");
                } else if self.breakpoints.push(addr) {
                    println!("breakpoint set at {addr:#x}");
                } else {
                    println!("breakpoint limit reached!");
                }
            },
            Some("rm") | Some("remove") => {
                let Some(addr) = tokens.next().and_then(parse_hex) else {
                    println!("Invalid parameter!");
                    return Action::Stay;
                };
                match self.breakpoints.remove(addr) {
                    true  => println!("breakpoint removed at {addr:#x}"),
                    false => println!("breakpoint not found!"),
                }
            },
            Some("pop") => {
                match self.breakpoints.pop() {
                    Some(addr) => println!("breakpoint removed at {addr:#x}"),
                    None => println!("no breakpoints available to remove!"),
                }
            },
            Some("list") | Some("show") => {
                for (i, addr) in self.breakpoints.iter().enumerate() {
                    println!("breakpoint[{i}] = {addr:#x}");
                }
            },
            Some("clear") => {
                self.breakpoints.clear();
            },
            _ => {
                println!("Invalid parameter!");
                return Action::Stay;
            },
        }
        self.last = line.to_string();
        Action::Stay
    }
}

/// Prints R0-R7, then PSR, PC, and the word at the PC.
pub fn dump_registers(sim: &Simulator) {
    let r = &sim.reg_file;
    println!(
        "R0={:#x} R1={:#x} R2={:#x} R3={:#x} R4={:#x} R5={:#x} R6={:#x} R7={:#x}",
        r[R0], r[R1], r[R2], r[R3], r[R4], r[R5], r[R6], r[R7],
    );
    println!("PSR={:#x} PC={:#x} IR={:#x}\n", sim.psr().0, sim.pc, sim.mem.get_raw(sim.pc));
}

/// Parses a hex address/value, with or without a `0x`/`x` prefix.
fn parse_hex(tok: &str) -> Option<u16> {
    let digits = tok
        .strip_prefix("0x")
        .or_else(|| tok.strip_prefix("0X"))
        .or_else(|| tok.strip_prefix('x'))
        .unwrap_or(tok);
    u16::from_str_radix(digits, 16).ok()
}

/// Parses an `R0`-`R7` register name.
fn parse_reg(tok: &str) -> Option<Reg> {
    let no = tok.strip_prefix(['R', 'r'])?.parse::<u8>().ok()?;
    Reg::try_from(no).ok()
}

fn print_help(topic: Option<&str>) {
    match topic {
        Some("break") => {
            println!("Breakpoint management commands:");
            println!();
            println!("Note: one breakpoint is automatically placed at the program entry!");
            println!();
            println!("break add <address>: Adds a breakpoint at an address");
            println!("break list: Lists all breakpoints");
            println!("break remove <address>: Removes the breakpoint at an address");
            println!("break pop: Removes the most recently added breakpoint");
            println!("break clear: Removes all breakpoints");
        },
        Some("reg") => {
            println!("Register management commands:");
            println!();
            println!("reg set R# <value>: Sets a register to a value");
            println!("reg list: Lists all registers");
            println!("reg clear: Zeroes all registers");
        },
        _ => {
            println!("help: Prints this menu");
            println!("step: Steps forward one instruction");
            println!("continue: Continues execution until a breakpoint");
            println!("next: Like step, but runs over subroutine and trap calls");
            println!("break ...: Family of breakpoint management commands (see `help break`)");
            println!("reg ...: Family of register management commands (see `help reg`)");
            println!("quit: Quits the emulator");
            println!("read <address>: Reads a memory address");
            println!("write <address> <value>: Writes a value to a memory address");
            println!("decode <address|PC>: Translates the word at an address into an instruction");
            println!("decode-i <word>: Translates its parameter into an instruction");
            println!("goto <address>: Sets the PC to an address");
            println!("    NOTE: the PSR and stack pointers are not switched unless RTI is executed!");
            println!("An empty line repeats the last command.");
        },
    }
}
