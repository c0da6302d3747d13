//! A small 64-bit register machine.
//!
//! Source text is assembled into an [`image::Image`], which the
//! [`vm::Machine`] executes directly out of a flat memory arena.
//!
//! # Architecture
//!
//! - **Registers**: `r0`..`r5` general purpose, plus `rip`, `rsp`, `rflag` and `rmem`
//! - **Memory**: one zeroed arena; the image sits at address 0 and the stack
//!   grows down from the end
//! - **Instruction format**: 8-byte header followed by one 8-byte payload per operand
//! - **Operands**: immediates, registers, memory addresses and indexed
//!   expressions `base*mult±reg±offset`
//!
//! # Modules
//!
//! - [`assembler`]: Two-pass assembler with compiler-style diagnostics
//! - [`debugger`]: Step tracer printing registers and the next instruction
//! - [`disassembler`]: Image to source text and address listings
//! - [`errors`]: Assembly, decoding and execution error types
//! - [`image`]: Executable image format and file I/O
//! - [`instruction`]: Instruction encoding and zero-copy decoding
//! - [`isa`]: Instruction set definition and opcode tables
//! - [`operand`]: Operand type tags, registers and indexed addressing
//! - [`vm`]: The execution engine

pub mod assembler;
pub mod debugger;
pub mod disassembler;
pub mod errors;
pub mod image;
pub mod instruction;
pub mod isa;
#[cfg(test)]
mod isa_static_check;
pub mod operand;
pub mod vm;
