//! A cycle-level LC-3 emulator.
//!
//! This crate implements the LC-3 machine model down to its supervisor ROM:
//! a 16-bit address space with memory-mapped IO, eight general registers,
//! condition codes, the user/supervisor privilege split, and trap/exception
//! dispatch through the vector tables at `x0000` and `x0100`. The standard
//! trap services (`GETC`, `OUT`, `PUTS`, `IN`, `PUTSP`, `HALT`) and the
//! exception handlers are not reimplemented in Rust; they are hand-assembled
//! LC-3 routines baked into memory at startup, and the machine executes them
//! like any other code.
//!
//! # Usage
//!
//! Programs are loaded from big-endian object images and run until the
//! machine-control register's clock bit is cleared (which is what the HALT
//! trap service does):
//!
//! ```no_run
//! use lc3sim::loader::ObjImage;
//! use lc3sim::sim::Simulator;
//! use lc3sim::sim::io::BufferedIO;
//!
//! let obj = ObjImage::read_file("program.obj".as_ref()).unwrap();
//!
//! let mut sim = Simulator::new();
//! let io = BufferedIO::new();
//! sim.open_io(io.clone());
//! sim.load_obj(&obj);
//! sim.set_entry(obj.origin());
//! sim.run().unwrap();
//!
//! print!("{}", String::from_utf8_lossy(&io.get_output().read().unwrap()));
//! ```
//!
//! For stepping, breakpoints, and the interactive debugger, see the
//! [`sim::debug`] module.
#![warn(missing_docs)]

pub mod ast;
pub mod loader;
pub mod sim;
