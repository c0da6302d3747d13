//! Image disassembler CLI.
//!
//! # Usage
//! ```text
//! disassembler <image> [--source]
//! ```
//!
//! Prints an address listing with raw bytes, or with `--source` plain source
//! text that assembles back to the same image.

use bvm::error;
use bvm::virtual_machine::disassembler::{disassemble, listing};
use bvm::virtual_machine::image::Image;
use std::env;
use std::process;

fn main() {
    let args: Vec<String> = env::args().collect();

    if args.len() < 2 || args[1] == "--help" || args[1] == "-h" {
        eprintln!("Usage: {} <image> [--source]", args[0]);
        process::exit(if args.len() < 2 { 1 } else { 0 });
    }

    let source = match args.get(2).map(String::as_str) {
        None => false,
        Some("--source" | "-s") => true,
        Some(other) => {
            error!("Unexpected argument: {other}");
            process::exit(1);
        }
    };

    let text = Image::read_file(&args[1]).and_then(|image| {
        if source {
            disassemble(&image)
        } else {
            listing(&image)
        }
    });

    match text {
        Ok(text) => print!("{text}"),
        Err(e) => {
            error!("{e}");
            process::exit(1);
        }
    }
}
