//! Assembly to image compiler CLI.
//!
//! # Usage
//! ```text
//! assembler <input.asm> [OPTIONS]
//! ```
//!
//! # Options
//! - `-o, --output <file>`: Output file path (defaults to `b.out`)
//! - `-v, --verbose`: Enable debug logging
//!
//! # Examples
//! ```text
//! assembler program.asm
//! assembler program.asm -o program.out
//! ```

use bvm::utils::log::{self, Level};
use bvm::virtual_machine::assembler::assemble_file;
use bvm::{error, info, warn};
use std::env;
use std::path::Path;
use std::process;

const DEFAULT_OUTPUT: &str = "b.out";

fn main() {
    let args: Vec<String> = env::args().collect();

    if args.len() < 2 || args[1] == "--help" || args[1] == "-h" {
        print_usage(&args[0]);
        process::exit(if args.len() < 2 { 1 } else { 0 });
    }

    let input_path = &args[1];
    let mut output_path = DEFAULT_OUTPUT.to_string();

    let mut i = 2;
    while i < args.len() {
        match args[i].as_str() {
            k @ ("--output" | "-o") => {
                i += 1;
                if i >= args.len() {
                    error!("{k} requires an argument");
                    process::exit(1);
                }
                output_path = args[i].clone();
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

    if !Path::new(input_path).exists() {
        error!("Input file does not exist: {}", input_path);
        process::exit(1);
    }

    // Diagnostics are logged by the assembler itself.
    let image = match assemble_file(input_path) {
        Ok(image) => image,
        Err(_) => process::exit(1),
    };

    if image.is_empty() {
        warn!("{} contains no instructions; the image cannot be run", input_path);
    }

    if let Err(e) = image.write_file(&output_path) {
        error!("Failed to write output file: {}", e);
        process::exit(1);
    }

    info!(
        "Assembled {} -> {} ({} bytes)",
        input_path,
        output_path,
        image.len()
    );
}

fn print_usage(program: &str) {
    eprintln!("Usage: {program} <input.asm> [OPTIONS]");
    eprintln!();
    eprintln!("Options:");
    eprintln!("  -o, --output <file>  Output file path (default {DEFAULT_OUTPUT})");
    eprintln!("  -v, --verbose        Enable debug logging");
}
