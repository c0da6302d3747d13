//! Runs an assembled image.
//!
//! # Usage
//! ```text
//! bvm <image> [OPTIONS]
//! ```
//!
//! # Arguments
//! - `image`: Image file produced by the assembler
//!
//! # Options
//! - `--trace`: Print the registers and the next instruction before every step
//! - `--memory <MiB>`: Arena size in MiB (defaults to 32)
//! - `--verbose`: Enable debug logging

use bvm::error;
use bvm::utils::log::{self, Level};
use bvm::virtual_machine::debugger::{Tracer, run_traced};
use bvm::virtual_machine::errors::VMError;
use bvm::virtual_machine::image::Image;
use bvm::virtual_machine::vm::{DEFAULT_MEMORY_SIZE, Machine};
use std::env;
use std::process;
use termcolor::{ColorChoice, StandardStream};

const MIB: usize = 1024 * 1024;

fn main() {
    let args: Vec<String> = env::args().collect();

    if args.len() < 2 || args[1] == "--help" || args[1] == "-h" {
        print_usage(&args[0]);
        process::exit(if args.len() < 2 { 1 } else { 0 });
    }

    let image_path = &args[1];
    let mut trace = false;
    let mut memory_size = DEFAULT_MEMORY_SIZE;

    let mut i = 2;
    while i < args.len() {
        match args[i].as_str() {
            "--trace" | "-t" => {
                trace = true;
                i += 1;
            }
            k @ ("--memory" | "-m") => {
                i += 1;
                if i >= args.len() {
                    error!("{k} requires an argument");
                    process::exit(1);
                }
                memory_size = match args[i].parse::<usize>().ok().and_then(|m| m.checked_mul(MIB))
                {
                    Some(size) if size > 0 => size,
                    _ => {
                        error!("Invalid memory size: '{}' is not a positive number of MiB", args[i]);
                        process::exit(1);
                    }
                };
                i += 1;
            }
            "--verbose" | "-v" => {
                log::set_level(Level::Debug);
                i += 1;
            }
            other => {
                error!("Unexpected argument: {}\n", other);
                print_usage(&args[0]);
                process::exit(1);
            }
        }
    }

    if let Err(e) = run(image_path, memory_size, trace) {
        error!("{e}");
        process::exit(1);
    }
}

fn run(image_path: &str, memory_size: usize, trace: bool) -> Result<(), VMError> {
    let image = Image::read_file(image_path)?;
    let mut machine = Machine::load(&image, memory_size)?;
    if trace {
        let mut tracer = Tracer::new(StandardStream::stdout(ColorChoice::Auto));
        run_traced(&mut machine, &mut tracer)
    } else {
        machine.run()
    }
}

fn print_usage(program: &str) {
    eprintln!("Usage: {program} <image> [OPTIONS]");
    eprintln!();
    eprintln!("Options:");
    eprintln!("  -t, --trace          Print registers and the next instruction before every step");
    eprintln!("  -m, --memory <MiB>   Arena size in MiB (default 32)");
    eprintln!("  -v, --verbose        Enable debug logging");
}
