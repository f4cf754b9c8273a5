//! Command-line entry point for the emulator.

use std::path::PathBuf;
use std::process::ExitCode;

use clap::Parser;
use tracing::{error, warn};
use tracing_subscriber::filter::EnvFilter;
use tracing_subscriber::prelude::*;

use lc3sim::loader::ObjImage;
use lc3sim::sim::debug::{self, Debugger};
use lc3sim::sim::io::{BiChannelIO, BufferedIO};
use lc3sim::sim::Simulator;

/// A cycle-level LC-3 emulator.
#[derive(Parser)]
#[command(version, about, after_help = "NOTE: The last object file is assumed to be the main program!")]
struct Opt {
    /// Object files to load; the last one is the main program
    #[arg(value_name = "PROGRAM")]
    programs: Vec<PathBuf>,

    /// Enable the interactive debugger, breaking at the program entry
    #[arg(long)]
    debug: bool,

    /// Fill R0-R7 with random values before running
    #[arg(long)]
    randomize: bool,

    /// Suppress the output buffer dump and banners
    #[arg(long)]
    silent: bool,

    /// Provide STR as the keyboard input stream
    #[arg(long, value_name = "STR")]
    input: Option<String>,

    /// Memory addresses (hex) to print after the machine halts
    #[arg(long, value_name = "A1,A2,...", value_delimiter = ',', value_parser = parse_hex)]
    dump: Vec<u16>,

    /// ADDR,VALUE pairs (hex) to write into memory before running
    #[arg(long, value_name = "A,V,...", value_delimiter = ',', value_parser = parse_hex)]
    memory: Vec<u16>,
}

fn parse_hex(tok: &str) -> Result<u16, String> {
    let digits = tok
        .strip_prefix("0x")
        .or_else(|| tok.strip_prefix("0X"))
        .or_else(|| tok.strip_prefix('x'))
        .unwrap_or(tok);
    u16::from_str_radix(digits, 16)
        .map_err(|_| format!("`{tok}` is not a 16-bit hex value"))
}

fn main() -> ExitCode {
    let opt = Opt::parse();

    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(tracing_subscriber::fmt::layer().without_time().with_target(false))
        .init();

    run(opt)
}

fn run(opt: Opt) -> ExitCode {
    let Some((main_path, aux_paths)) = opt.programs.split_last() else {
        error!("No program specified!");
        return ExitCode::FAILURE;
    };
    if opt.memory.len() % 2 != 0 {
        error!("--memory takes ADDR,VALUE pairs (got an odd number of values)");
        return ExitCode::FAILURE;
    }

    let mut sim = Simulator::new();

    // Auxiliary files just deposit data; a broken one is not fatal.
    for path in aux_paths {
        match ObjImage::read_file(path) {
            Ok(obj) => sim.load_obj(&obj),
            Err(e) => warn!("Failed to load {}: {e}", path.display()),
        }
    }

    // The main program decides the user PC.
    let main_obj = match ObjImage::read_file(main_path) {
        Ok(obj) => obj,
        Err(e) => {
            error!("Failed to load {}: {e}", main_path.display());
            return ExitCode::FAILURE;
        },
    };
    sim.load_obj(&main_obj);
    sim.set_entry(main_obj.origin());

    if opt.randomize {
        sim.randomize_regs();
    }
    for pair in opt.memory.chunks_exact(2) {
        sim.mem.set_raw(pair[0], pair[1]);
    }

    // With an input string (or under the debugger, which owns stdin), the
    // console runs against buffers and the captured output is dumped after
    // the machine halts. Otherwise the console is wired to this terminal.
    let buffered = if let Some(input) = &opt.input {
        let io = BufferedIO::with_input(input);
        sim.open_io(io.clone());
        Some(io)
    } else if opt.debug {
        let io = BufferedIO::new();
        sim.open_io(io.clone());
        Some(io)
    } else {
        sim.open_io(BiChannelIO::stdio());
        None
    };

    let mut debugger = opt.debug.then(|| Debugger::new(main_obj.origin()));
    let result = match &mut debugger {
        Some(dbg) => dbg.run(&mut sim),
        None => sim.run(),
    };
    sim.close_io();

    if let Err(e) = result {
        error!("{e}");
        return ExitCode::FAILURE;
    }
    if debugger.as_ref().is_some_and(Debugger::quit_requested) {
        return ExitCode::SUCCESS;
    }

    if !opt.silent {
        if let Some(io) = &buffered {
            let out = io.get_output().read().unwrap_or_else(|e| e.into_inner());
            println!(" --- buffer begin ---\n{}\n --- buffer end --- \n", String::from_utf8_lossy(&out));
        }
    }
    if debugger.is_some() {
        debug::dump_registers(&sim);
    }
    for &addr in &opt.dump {
        println!("memory[{:#x}]={:#x}", addr, sim.mem.get_raw(addr));
    }
    if !opt.silent {
        println!("\n\nThe clock was disabled!\n");
    }

    ExitCode::SUCCESS
}
