//! Image to source text.
//!
//! [`disassemble`] produces source that assembles back to an identical image:
//! jump targets are written as resolved code offsets and a `start:` label is
//! placed at a non-zero entry point. [`listing`] adds addresses and raw bytes.

use crate::virtual_machine::assembler::ENTRY_LABEL;
use crate::virtual_machine::errors::VMError;
use crate::virtual_machine::image::{HEADER_LEN, Image};
use crate::virtual_machine::instruction::{Instruction, InstructionView};
use crate::virtual_machine::isa::OperandSize;
use crate::virtual_machine::operand::Operand;
use std::fmt::Write;

pub fn format_operand(operand: &Operand) -> String {
    operand.to_string()
}

/// Formats one instruction in source syntax, e.g. `mov b2 [r0+8], 5`.
pub fn format_instruction(instruction: &Instruction) -> String {
    let mut text = instruction.opcode.mnemonic().to_string();
    if instruction.size != OperandSize::B8 {
        text.push(' ');
        text.push_str(instruction.size.qualifier());
    }
    for (i, operand) in instruction.operands.iter().enumerate() {
        text.push_str(if i == 0 { " " } else { ", " });
        text.push_str(&format_operand(operand));
    }
    text
}

/// Decodes every instruction of the code section with its code offset.
pub fn decode_code(code: &[u8]) -> Result<Vec<(u64, InstructionView<'_>)>, VMError> {
    let mut out = Vec::new();
    let mut offset = 0u64;
    while (offset as usize) < code.len() {
        let view = InstructionView::new(code, offset)?;
        offset += view.len() as u64;
        out.push((view.offset(), view));
    }
    Ok(out)
}

/// Renders the image as assemblable source.
pub fn disassemble(image: &Image) -> Result<String, VMError> {
    let instructions = decode_code(&image.code)?;
    if image.entry != 0 && !instructions.iter().any(|(offset, _)| *offset == image.entry) {
        return Err(VMError::InvalidImage {
            reason: format!(
                "entry point {} is not on an instruction boundary",
                image.entry
            ),
        });
    }

    let mut text = String::new();
    for (offset, view) in instructions {
        if image.entry != 0 && offset == image.entry {
            let _ = writeln!(text, "{ENTRY_LABEL}:");
        }
        let _ = writeln!(text, "    {}", format_instruction(&view.to_instruction()?));
    }
    Ok(text)
}

fn hex_bytes(bytes: &[u8]) -> String {
    let mut out = String::with_capacity(bytes.len() * 3);
    for (i, b) in bytes.iter().enumerate() {
        if i > 0 {
            out.push(' ');
        }
        let _ = write!(out, "{b:02x}");
    }
    out
}

/// Renders the image with arena addresses and raw instruction bytes.
pub fn listing(image: &Image) -> Result<String, VMError> {
    let mut text = String::new();
    let _ = writeln!(
        text,
        "# {} bytes of code, entry at {:#06x}",
        image.code.len(),
        image.entry_address()
    );
    for (offset, view) in decode_code(&image.code)? {
        let address = HEADER_LEN as u64 + offset;
        let marker = if offset == image.entry { '>' } else { ' ' };
        let _ = writeln!(
            text,
            "{marker}{address:#06x}  {:<71}  {}",
            hex_bytes(view.bytes()),
            format_instruction(&view.to_instruction()?)
        );
    }
    Ok(text)
}
