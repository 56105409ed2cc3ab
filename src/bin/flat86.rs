use flat86::cpu::state::REGISTER_NAMES;
use flat86::cpu::{Flags, Interpreter, State};
use flat86::io::SerialConsole;
use flat86::memory::{FlatMemory, VirtualMemory};

use log::info;
use structopt::StructOpt;
use termcolor::{Color, ColorChoice, ColorSpec, StandardStream, WriteColor};
use std::error::Error;
use std::io::{self, Write};
use std::num::ParseIntError;
use std::path::PathBuf;
use std::str::FromStr;
use std::{fs, process};

/// Parse a number that might be hexadecimal.
fn parse_hex(src: &str) -> Result<u32, ParseIntError> {
    if src.starts_with("0x") || src.starts_with("0X") {
        u32::from_str_radix(&src[2..], 16)
    } else {
        u32::from_str(src)
    }
}

/// Splits `NAME=VALUE`.
fn split_assignment(src: &str) -> Result<(&str, u32), String> {
    let mut parts = src.splitn(2, '=');
    let name = parts.next().unwrap_or("");
    let value = parts.next().ok_or_else(|| format!("expected `NAME=VALUE`, got `{}`", src))?;
    let value = parse_hex(value).map_err(|e| format!("invalid value in `{}`: {}", src, e))?;
    Ok((name, value))
}

/// A register seed, `--reg ecx=0x400`.
#[derive(Debug, Copy, Clone)]
struct RegSeed {
    index: u8,
    value: u32,
}

impl FromStr for RegSeed {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (name, value) = split_assignment(s)?;
        let name = name.to_ascii_lowercase();
        let index = REGISTER_NAMES
            .iter()
            .position(|reg| *reg == name)
            .ok_or_else(|| format!("unknown register `{}`", name))?;
        Ok(RegSeed { index: index as u8, value })
    }
}

/// A memory seed, `--poke 0x12F8F8=0x12F880`.
#[derive(Debug, Copy, Clone)]
struct Poke {
    addr: u32,
    value: u32,
}

impl FromStr for Poke {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (addr, value) = split_assignment(s)?;
        let addr = parse_hex(addr).map_err(|e| format!("invalid address in `{}`: {}", s, e))?;
        Ok(Poke { addr, value })
    }
}

#[derive(Debug, StructOpt)]
#[structopt(name = "flat86", about = "Runs a raw x86 binary in a flat 32-bit address space.")]
struct Opt {
    /// Path to the raw binary image.
    #[structopt(parse(from_os_str))]
    path: PathBuf,

    /// Address the image is loaded at (can also be a hexadecimal value
    /// starting with `0x`).
    #[structopt(long = "origin", default_value = "0x401000", parse(try_from_str = parse_hex))]
    origin: u32,

    /// Address of the first instruction. Defaults to the load address.
    #[structopt(long = "entry", parse(try_from_str = parse_hex))]
    entry: Option<u32>,

    /// Initial stack pointer.
    #[structopt(long = "esp", default_value = "0x7C00", parse(try_from_str = parse_hex))]
    esp: u32,

    /// Sets a register before running, e.g. `--reg edx=0xF53E944B`. Can be
    /// given multiple times.
    #[structopt(long = "reg", number_of_values = 1)]
    regs: Vec<RegSeed>,

    /// Writes a dword to memory before running, e.g.
    /// `--poke 0x12F8F8=0x12F880`. Can be given multiple times.
    #[structopt(long = "poke", number_of_values = 1)]
    pokes: Vec<Poke>,

    /// Stops when `eip` reaches this address.
    #[structopt(long = "until", parse(try_from_str = parse_hex))]
    until: Option<u32>,

    /// Stops after this many instructions.
    #[structopt(long = "max-steps")]
    max_steps: Option<u64>,

    /// End of the stack, used for the stack dump. Defaults to the initial
    /// stack pointer.
    #[structopt(long = "stack-base", parse(try_from_str = parse_hex))]
    stack_base: Option<u32>,

    /// Memory size in bytes (10 MiB by default).
    #[structopt(long = "memory", default_value = "0xA00000", parse(try_from_str = parse_hex))]
    memory: u32,

    /// Log every executed instruction.
    #[structopt(long = "trace")]
    trace: bool,
}

/// Maximum number of stack slots to dump.
const STACK_DUMP_LIMIT: u32 = 64;

struct Dumper {
    out: StandardStream,
}

impl Dumper {
    fn new() -> Self {
        Self {
            out: StandardStream::stdout(ColorChoice::Auto),
        }
    }

    fn heading(&mut self, title: &str) -> io::Result<()> {
        self.out.set_color(ColorSpec::new().set_bold(true))?;
        writeln!(self.out, "[{}]", title)?;
        self.out.reset()
    }

    fn value(&mut self, name: &str, value: u32) -> io::Result<()> {
        self.out.set_color(ColorSpec::new().set_fg(Some(Color::Cyan)))?;
        write!(self.out, "{:>3}", name)?;
        self.out.reset()?;
        writeln!(self.out, " = {:08X}", value)
    }

    fn registers(&mut self, state: &State) -> io::Result<()> {
        self.heading("REGISTERS")?;
        for (index, name) in REGISTER_NAMES.iter().enumerate() {
            self.value(&name.to_uppercase(), state.reg32(index as u8))?;
        }
        self.value("EIP", state.eip())?;
        writeln!(self.out)?;

        self.heading("FLAGS")?;
        let flags = [
            ("C", Flags::CF),
            ("P", Flags::PF),
            ("A", Flags::AF),
            ("Z", Flags::ZF),
            ("S", Flags::SF),
            ("T", Flags::TF),
            ("D", Flags::DF),
            ("O", Flags::OF),
        ];
        for (name, flag) in flags.iter() {
            let set = state.flag(*flag);
            let color = if set { Color::Green } else { Color::Red };
            self.out.set_color(ColorSpec::new().set_fg(Some(color)))?;
            write!(self.out, "{}: {} ", name, set as u8)?;
        }
        self.out.reset()?;
        writeln!(self.out)?;
        writeln!(self.out)
    }

    fn stack<M: VirtualMemory>(&mut self, mem: &M, esp: u32, base: u32) -> io::Result<()> {
        self.heading("STACK")?;
        let mut sp = esp;
        let mut slots = 0;
        while sp < base && slots < STACK_DUMP_LIMIT {
            match mem.read32(sp) {
                Ok(value) => writeln!(self.out, "{:08X}: {:08X}", sp, value)?,
                Err(e) => {
                    writeln!(self.out, "{:08X}: ({})", sp, e)?;
                    break;
                }
            }
            sp = sp.wrapping_add(4);
            slots += 1;
        }
        if sp < base {
            writeln!(self.out, "...")?;
        }
        Ok(())
    }
}

fn run(opt: Opt) -> Result<(), Box<dyn Error>> {
    let image = fs::read(&opt.path)?;
    let mut mem = FlatMemory::new(opt.memory);
    mem.load_image(opt.origin, &image)?;
    info!("loaded {} bytes at {:#010X}", image.len(), opt.origin);

    for poke in &opt.pokes {
        mem.write32(poke.addr, poke.value)?;
    }

    let entry = opt.entry.unwrap_or(opt.origin);
    let mut state = State::new(entry, opt.esp);
    for seed in &opt.regs {
        state.set_reg32(seed.index, seed.value);
    }

    let console = SerialConsole::new(io::stdin(), io::stdout());
    let mut interpreter = Interpreter::new(mem, state, Box::new(console));

    let until = opt.until;
    let max_steps = opt.max_steps;
    let mut steps = 0u64;
    let result = interpreter.run_until(|machine| {
        let eip = machine.state().eip();
        if eip == 0 {
            info!("end of program");
            return true;
        }
        if Some(eip) == until {
            info!("reached {:#010X}", eip);
            return true;
        }
        if Some(steps) == max_steps {
            info!("stopping after {} instructions", steps);
            return true;
        }
        steps += 1;
        false
    });

    let mut dumper = Dumper::new();
    dumper.registers(interpreter.state())?;
    let esp = interpreter.state().esp();
    dumper.stack(interpreter.mem(), esp, opt.stack_base.unwrap_or(opt.esp))?;

    let count = result?;
    info!("executed {} instructions", count);
    Ok(())
}

fn main() {
    let opt = Opt::from_args();

    // `info!` and higher by default, everything with `--trace`
    let level = if opt.trace {
        log::LevelFilter::Trace
    } else {
        log::LevelFilter::Info
    };
    env_logger::Builder::from_default_env()
        .filter(None, level)
        .init();

    match run(opt) {
        Ok(()) => {}
        Err(e) => {
            eprintln!("exiting due to error: {}", e);
            process::exit(1);
        }
    }
}
