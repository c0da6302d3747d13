//! bvm: assembler, image format and interpreter for a small 64-bit register machine.

pub mod types;
pub mod utils;
pub mod virtual_machine;
