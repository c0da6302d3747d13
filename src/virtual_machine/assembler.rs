//! Assembly language parser and image builder.
//!
//! Converts mnemonic source text into an executable [`Image`].
//!
//! # Syntax
//!
//! ```text
//! label:
//!     mnemonic [b1|b2|b4|b8] operand1, operand2   # optional comment
//! ```
//!
//! - Mnemonics are lowercase (`mov`, `add`, `jge`, ...)
//! - An optional size qualifier after the mnemonic sets the operand width (default `b8`)
//! - Registers: `r0`..`r5`, `rip`, `rsp`, `rflag`, `rmem`
//! - Integers: decimal or `0x` hex, with an optional leading `-`
//! - `[x]` dereferences `x` as a memory address
//! - Indexed addressing: `r0*2+r1-4` (multiplier, second register, offset are optional)
//! - Jumps and calls take a label name (or an already resolved code offset)
//! - `#` starts a comment; commas between operands are optional
//! - Execution starts at the `start` label, or at the first instruction without one
//!
//! # Passes
//!
//! 1. Tokenize and parse every line, assigning labels the running byte offset
//!    and recording jump/call operands as fix-ups.
//! 2. Resolve every fix-up against the label table.
//! 3. Encode the instructions in program order behind the image header.

use crate::types::encoding::Encode;
use crate::virtual_machine::errors::VMError;
use crate::virtual_machine::image::Image;
use crate::virtual_machine::instruction::Instruction;
use crate::virtual_machine::isa::{Opcode, OperandRole, OperandSize};
use crate::virtual_machine::operand::{
    ComplexOperand, IndexTerm, Operand, OperandValue, Register,
};
use crate::{debug, error};
use std::collections::HashMap;
use std::fmt::Write;
use std::fs;
use std::path::Path;

const COMMENT_CHAR: char = '#';
const LABEL_SUFFIX: char = ':';
const REGISTER_PREFIX: char = 'r';
/// Label marking the entry point.
pub const ENTRY_LABEL: &str = "start";

/// Return the line/column/message triple for located assembly errors.
fn assembly_error_location(err: &VMError) -> Option<(usize, usize, String)> {
    match err {
        VMError::AssemblyError {
            line,
            offset,
            source,
        } => Some((*line, *offset, source.to_string())),
        _ => None,
    }
}

/// Formats a compiler-style diagnostic for assembly failures.
fn render_assembly_diagnostic(
    file: &str,
    source: &str,
    line: usize,
    offset: usize,
    message: &str,
) -> String {
    let mut diag = String::new();
    let _ = writeln!(diag, "error: {message}");
    let _ = writeln!(diag, " --> {file}:{line}:{offset}");

    if let Some(raw_line) = source.lines().nth(line.saturating_sub(1)) {
        let line_text = raw_line.trim_end_matches('\r');
        let underline = " ".repeat(offset.saturating_sub(1));
        let _ = writeln!(diag, "  |");
        let _ = writeln!(diag, "{:>4} | {}", line, line_text);
        let _ = writeln!(diag, "  | {}^", underline);
    }

    diag
}

/// Logs a diagnostic for an assembly error.
fn log_assembly_error(file: &str, source: &str, err: &VMError) {
    if let Some((line, offset, message)) = assembly_error_location(err) {
        error!(
            "{}",
            render_assembly_diagnostic(file, source, line, offset, &message).trim_end()
        );
    } else {
        error!("{err}");
    }
}

/// Label table built during the first pass.
pub struct AsmContext {
    /// Label definitions mapping names to code offsets.
    pub(crate) labels: HashMap<String, u64>,
}

impl AsmContext {
    pub fn new() -> Self {
        Self {
            labels: HashMap::new(),
        }
    }

    /// Registers a label at the given code offset.
    pub(crate) fn define_label(&mut self, name: String, offset: u64) -> Result<(), VMError> {
        if self.labels.contains_key(&name) {
            return Err(VMError::DuplicateLabel { label: name });
        }
        self.labels.insert(name, offset);
        Ok(())
    }

    /// Resolves a label to its code offset.
    pub(crate) fn resolve_label(&self, name: &str) -> Result<u64, VMError> {
        self.labels
            .get(name)
            .copied()
            .ok_or(VMError::UndefinedLabel {
                label: name.to_string(),
            })
    }
}

impl Default for AsmContext {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Debug, Clone)]
struct Token<'a> {
    text: &'a str,
    /// 1-based column offset in the line.
    offset: usize,
}

/// Tokenize a single line of assembly.
///
/// Rules:
/// - `#` starts a comment
/// - commas and whitespace separate tokens
/// - whitespace inside `[...]` does not split, so `[r0 + 8]` is one token
fn tokenize(line: &str) -> Vec<Token<'_>> {
    let mut out = Vec::with_capacity(4);

    let mut start: Option<usize> = None;
    let mut depth = 0usize;

    for (i, c) in line.char_indices() {
        if c == COMMENT_CHAR {
            break;
        }
        let separator = depth == 0 && (c == ',' || c.is_whitespace());
        if separator {
            if let Some(s) = start.take() {
                out.push(Token {
                    text: &line[s..i],
                    offset: s + 1,
                });
            }
            continue;
        }
        match c {
            '[' => depth += 1,
            ']' => depth = depth.saturating_sub(1),
            _ => {}
        }
        if start.is_none() {
            start = Some(i);
        }
    }

    if let Some(s) = start {
        let end = line.find(COMMENT_CHAR).unwrap_or(line.len());
        let text = line[s..end].trim_end();
        if !text.is_empty() {
            out.push(Token {
                text,
                offset: s + 1,
            });
        }
    }

    out
}

/// Checks if a token is a label definition (ends with `:`).
fn is_label_def(tok: &str) -> bool {
    tok.ends_with(LABEL_SUFFIX) && tok.len() > 1
}

/// Extracts the label name from a label definition token.
fn label_name(tok: &str) -> &str {
    &tok[..tok.len() - 1]
}

/// Checks whether a token has the shape of a size qualifier (`b` + digits).
fn looks_like_size_qualifier(tok: &str) -> bool {
    let mut chars = tok.chars();
    matches!(chars.next(), Some('b' | 'B'))
        && tok.len() > 1
        && chars.all(|c| c.is_ascii_digit())
}

/// Parses an integer literal: decimal or `0x` hex, optional leading `-`.
///
/// Negative values are stored as their two's complement.
pub(crate) fn parse_integer(tok: &str) -> Option<u64> {
    let (negative, digits) = match tok.strip_prefix('-') {
        Some(rest) => (true, rest),
        None => (false, tok),
    };
    let magnitude = match digits
        .strip_prefix("0x")
        .or_else(|| digits.strip_prefix("0X"))
    {
        Some(hex) if !hex.is_empty() => u64::from_str_radix(hex, 16).ok()?,
        Some(_) => return None,
        None if !digits.is_empty() && digits.bytes().all(|b| b.is_ascii_digit()) => {
            digits.parse::<u64>().ok()?
        }
        None => return None,
    };
    if negative {
        if magnitude > 1 << 63 {
            return None;
        }
        Some(magnitude.wrapping_neg())
    } else {
        Some(magnitude)
    }
}

/// Parses a register name like `r0` or `rsp`.
pub(crate) fn parse_register(tok: &str) -> Result<Register, VMError> {
    Register::from_name(tok).ok_or_else(|| VMError::UnknownRegister {
        token: tok.to_string(),
    })
}

fn malformed(tok: &str, reason: &'static str) -> VMError {
    VMError::MalformedOperand {
        token: tok.to_string(),
        reason,
    }
}

/// Parses a register expression: `base[*mult][±reg][±offset]`.
///
/// Splits on `+`, `-` and `*`; each term takes the operator before it as its
/// sign. A bare register yields [`OperandValue::Register`], anything more a
/// [`ComplexOperand`].
fn parse_register_expression(expr: &str, tok: &str) -> Result<OperandValue, VMError> {
    let mut terms: Vec<(Option<char>, &str)> = Vec::new();
    let mut op = None;
    let mut start = 0;
    for (i, c) in expr.char_indices() {
        if matches!(c, '+' | '-' | '*') {
            terms.push((op, &expr[start..i]));
            op = Some(c);
            start = i + 1;
        }
    }
    terms.push((op, &expr[start..]));

    let base = parse_register(terms[0].1)?;
    let mut complex = ComplexOperand::new(base);
    let mut seen_multiplier = false;
    let mut seen_offset = false;

    for &(sign, term) in &terms[1..] {
        if term.is_empty() {
            return Err(malformed(tok, "missing term after operator"));
        }
        match sign {
            Some('*') => {
                if seen_multiplier {
                    return Err(malformed(tok, "multiplier given twice"));
                }
                if term.starts_with(REGISTER_PREFIX) {
                    return Err(malformed(tok, "multiplier must be an integer"));
                }
                let value = parse_integer(term)
                    .and_then(|v| u8::try_from(v).ok())
                    .ok_or_else(|| malformed(tok, "multiplier must fit in 8 bits"))?;
                complex.multiplier = value;
                seen_multiplier = true;
            }
            Some(sign) if term.starts_with(REGISTER_PREFIX) => {
                if complex.index.is_some() {
                    return Err(malformed(tok, "more than one index register"));
                }
                let reg = parse_register(term)?;
                complex.index = Some(if sign == '-' {
                    IndexTerm::Sub(reg)
                } else {
                    IndexTerm::Add(reg)
                });
            }
            Some(sign) => {
                if seen_offset {
                    return Err(malformed(tok, "offset given twice"));
                }
                let magnitude = parse_integer(term)
                    .ok_or_else(|| malformed(tok, "offset must be an integer"))?
                    as i128;
                let value = if sign == '-' { -magnitude } else { magnitude };
                complex.offset = i32::try_from(value)
                    .map_err(|_| malformed(tok, "offset must fit in 32 bits"))?;
                seen_offset = true;
            }
            None => return Err(malformed(tok, "unexpected term")),
        }
    }

    if complex.is_indexed() {
        Ok(OperandValue::Complex(complex))
    } else {
        Ok(OperandValue::Register(base))
    }
}

/// Parses a data operand (anything but a jump target).
pub(crate) fn parse_operand(tok: &str) -> Result<Operand, VMError> {
    let (address, body) = match tok.strip_prefix('[') {
        Some(rest) => {
            let inner = rest
                .strip_suffix(']')
                .ok_or_else(|| malformed(tok, "missing closing bracket"))?;
            (true, inner)
        }
        None if tok.contains(']') => return Err(malformed(tok, "missing opening bracket")),
        None => (false, tok),
    };
    let expr: String = body.chars().filter(|c| !c.is_whitespace()).collect();
    if expr.is_empty() {
        return Err(malformed(tok, "empty operand"));
    }
    if expr.contains('[') || expr.contains(']') {
        return Err(malformed(tok, "nested brackets"));
    }

    let value = if expr.starts_with(REGISTER_PREFIX) {
        parse_register_expression(&expr, tok)?
    } else {
        OperandValue::Immediate(
            parse_integer(&expr).ok_or_else(|| malformed(tok, "expected an integer or register"))?,
        )
    };
    Ok(Operand { value, address })
}

/// Label reference to patch once every label is known.
struct Fixup {
    /// Index of the instruction in program order.
    index: usize,
    slot: usize,
    label: String,
    line: usize,
    offset: usize,
}

/// Parses one instruction line.
///
/// Returns the instruction, with jump targets still unresolved, and the
/// fix-ups it needs as `(slot, label, column)`.
fn parse_instruction<'a>(
    tokens: &[Token<'a>],
) -> Result<(Instruction, Vec<(usize, &'a str, usize)>), VMError> {
    let head = &tokens[0];
    let opcode = Opcode::from_mnemonic(head.text)
        .ok_or_else(|| {
            VMError::UnknownMnemonic {
                name: head.text.to_string(),
            }
        })
        .map_err(|e| e.at(0, head.offset))?;

    let mut rest = &tokens[1..];
    let mut size = OperandSize::default();
    // With one operand too few, a leading qualifier-shaped token is still the
    // size unless it could be a jump label.
    let qualifier_slot = rest.len() == opcode.arity() + 1
        || (rest.len() == opcode.arity() && !opcode.takes_label());
    if let Some(first) = rest.first() {
        if qualifier_slot && looks_like_size_qualifier(first.text) {
            size = OperandSize::from_qualifier(first.text)
                .ok_or_else(|| VMError::InvalidSizeQualifier {
                    token: first.text.to_string(),
                })
                .map_err(|e| e.at(0, first.offset))?;
            rest = &rest[1..];
        }
    }

    if rest.len() != opcode.arity() {
        return Err(VMError::OperandCountMismatch {
            instruction: opcode.mnemonic().to_string(),
            expected: opcode.arity(),
            actual: rest.len(),
        }
        .at(0, head.offset));
    }

    let mut operands = Vec::with_capacity(rest.len());
    let mut fixups = Vec::new();
    for (slot, (tok, role)) in rest.iter().zip(opcode.roles()).enumerate() {
        let operand = match role {
            OperandRole::Target => match parse_integer(tok.text) {
                Some(target) => Operand::immediate(target),
                None => {
                    if tok.text.contains(['[', ']']) {
                        return Err(malformed(tok.text, "jump target must be a label")
                            .at(0, tok.offset));
                    }
                    fixups.push((slot, tok.text, tok.offset));
                    Operand::immediate(0)
                }
            },
            OperandRole::Place => {
                let operand = parse_operand(tok.text).map_err(|e| e.at(0, tok.offset))?;
                if !operand.is_memory() && matches!(operand.value, OperandValue::Immediate(_)) {
                    return Err(malformed(tok.text, "destination cannot be an immediate")
                        .at(0, tok.offset));
                }
                operand
            }
            OperandRole::Value => parse_operand(tok.text).map_err(|e| e.at(0, tok.offset))?,
        };
        operands.push(operand);
    }

    Ok((Instruction::new(opcode, size, operands)?, fixups))
}

/// Replaces the placeholder line number of a located error.
fn on_line(err: VMError, line: usize) -> VMError {
    match err {
        VMError::AssemblyError { offset, source, .. } => VMError::AssemblyError {
            line,
            offset,
            source,
        },
        other => other.at(line, 1),
    }
}

/// Runs the assembly passes over preprocessed source.
fn assemble_lines(source: &str) -> Result<Image, VMError> {
    let mut ctx = AsmContext::new();
    let mut instructions: Vec<Instruction> = Vec::new();
    let mut fixups: Vec<Fixup> = Vec::new();
    let mut code_len = 0u64;

    // First pass: parse lines, place labels, collect fix-ups
    for (line_no, line) in source.lines().enumerate() {
        let line_no = line_no + 1;
        let tokens = tokenize(line);
        if tokens.is_empty() {
            continue;
        }

        let mut instr_tokens = &tokens[..];
        if is_label_def(tokens[0].text) {
            let name = label_name(tokens[0].text);
            // A numeric name would be read back as a raw code offset.
            if parse_integer(name).is_some() {
                return Err(malformed(name, "label name cannot be an integer")
                    .at(line_no, tokens[0].offset));
            }
            ctx.define_label(name.to_string(), code_len)
                .map_err(|e| e.at(line_no, tokens[0].offset))?;
            instr_tokens = &tokens[1..];
        }
        if instr_tokens.is_empty() {
            continue;
        }

        let (instruction, refs) =
            parse_instruction(instr_tokens).map_err(|e| on_line(e, line_no))?;
        for (slot, label, offset) in refs {
            fixups.push(Fixup {
                index: instructions.len(),
                slot,
                label: label.to_string(),
                line: line_no,
                offset,
            });
        }
        code_len += instruction.encoded_length() as u64;
        instructions.push(instruction);
    }

    // Second pass: resolve jump and call targets
    for fixup in &fixups {
        let target = ctx
            .resolve_label(&fixup.label)
            .map_err(|e| e.at(fixup.line, fixup.offset))?;
        instructions[fixup.index].operands[fixup.slot] = Operand::immediate(target);
    }

    // Third pass: emit
    let mut code = Vec::with_capacity(code_len as usize);
    for instruction in &instructions {
        instruction.encode(&mut code);
    }
    let entry = ctx.resolve_label(ENTRY_LABEL).unwrap_or(0);

    debug!(
        "assembled {} instructions ({} bytes), {} labels, entry at {}",
        instructions.len(),
        code.len(),
        ctx.labels.len(),
        entry
    );
    Ok(Image::new(code, entry))
}

/// Assembles a full source string into an image.
///
/// Errors carry the 1-based line and column of the offending token; no
/// partial image is ever produced.
pub fn assemble_source(source: &str) -> Result<Image, VMError> {
    assemble_source_with_name(source, "<source>")
}

/// Assembles source with an associated filename for error diagnostics.
///
/// Logs a compiler-style diagnostic on failure.
pub fn assemble_source_with_name(source: &str, source_name: &str) -> Result<Image, VMError> {
    let result = assemble_lines(source);
    if let Err(err) = &result {
        log_assembly_error(source_name, source, err);
    }
    result
}

/// Convenience: assemble directly from a file path.
pub fn assemble_file<P: AsRef<Path>>(path: P) -> Result<Image, VMError> {
    let path_ref = path.as_ref();
    let source = fs::read_to_string(path_ref).map_err(|e| VMError::IoError {
        path: path_ref.display().to_string(),
        source: e,
    })?;
    assemble_source_with_name(&source, &path_ref.display().to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::virtual_machine::image::HEADER_LEN;

    fn texts<'a>(tokens: &[Token<'a>]) -> Vec<&'a str> {
        tokens.iter().map(|t| t.text).collect()
    }

    #[test]
    fn tokenize_separators_and_comments() {
        let tokens = tokenize("  mov r0, 5   # set r0");
        assert_eq!(texts(&tokens), ["mov", "r0", "5"]);
        assert_eq!(tokens[0].offset, 3);
        assert_eq!(tokens[1].offset, 7);
        assert_eq!(tokens[2].offset, 11);
        assert!(tokenize("# only a comment").is_empty());
        assert!(tokenize("   ").is_empty());
    }

    #[test]
    fn tokenize_keeps_bracket_spaces() {
        let tokens = tokenize("mov [r0 * 2 + r1 - 4], 7");
        assert_eq!(texts(&tokens), ["mov", "[r0 * 2 + r1 - 4]", "7"]);
    }

    #[test]
    fn parse_integer_forms() {
        assert_eq!(parse_integer("42"), Some(42));
        assert_eq!(parse_integer("0x2A"), Some(42));
        assert_eq!(parse_integer("-1"), Some(u64::MAX));
        assert_eq!(parse_integer("-0x10"), Some(16u64.wrapping_neg()));
        assert_eq!(parse_integer("18446744073709551615"), Some(u64::MAX));
        assert_eq!(parse_integer("-9223372036854775808"), Some(1 << 63));
        assert_eq!(parse_integer("-9223372036854775809"), None);
        assert_eq!(parse_integer("0x"), None);
        assert_eq!(parse_integer("12a"), None);
        assert_eq!(parse_integer("loop"), None);
        assert_eq!(parse_integer(""), None);
    }

    #[test]
    fn parse_operand_kinds() {
        assert_eq!(parse_operand("5").unwrap(), Operand::immediate(5));
        assert_eq!(
            parse_operand("rsp").unwrap(),
            Operand::register(Register::Rsp)
        );
        let addr = parse_operand("[0x100]").unwrap();
        assert!(addr.address);
        assert_eq!(addr.value, OperandValue::Immediate(0x100));
        let reg_addr = parse_operand("[r2]").unwrap();
        assert_eq!(reg_addr.value, OperandValue::Register(Register::R2));
        assert!(reg_addr.address);
    }

    #[test]
    fn parse_complex_operand() {
        let op = parse_operand("[r0*2+r1-4]").unwrap();
        assert_eq!(
            op.value,
            OperandValue::Complex(ComplexOperand {
                base: Register::R0,
                multiplier: 2,
                index: Some(IndexTerm::Add(Register::R1)),
                offset: -4,
            })
        );
        let sub = parse_operand("r3-r4+8").unwrap();
        assert!(!sub.address);
        assert_eq!(
            sub.value,
            OperandValue::Complex(ComplexOperand {
                base: Register::R3,
                multiplier: 1,
                index: Some(IndexTerm::Sub(Register::R4)),
                offset: 8,
            })
        );
        let neg = parse_operand("[rsp-2147483648]").unwrap();
        assert!(matches!(neg.value, OperandValue::Complex(c) if c.offset == i32::MIN));
    }

    #[test]
    fn parse_operand_errors() {
        assert!(matches!(
            parse_operand("r9"),
            Err(VMError::UnknownRegister { token }) if token == "r9"
        ));
        assert!(matches!(
            parse_operand("[r0"),
            Err(VMError::MalformedOperand { .. })
        ));
        assert!(matches!(
            parse_operand("r0*256"),
            Err(VMError::MalformedOperand { .. })
        ));
        assert!(matches!(
            parse_operand("r0+2147483648"),
            Err(VMError::MalformedOperand { .. })
        ));
        assert!(matches!(
            parse_operand("r0+r1+r2"),
            Err(VMError::MalformedOperand { .. })
        ));
        assert!(matches!(
            parse_operand("r0+"),
            Err(VMError::MalformedOperand { .. })
        ));
        assert!(matches!(
            parse_operand("[]"),
            Err(VMError::MalformedOperand { .. })
        ));
        assert!(matches!(
            parse_operand("foo"),
            Err(VMError::MalformedOperand { .. })
        ));
    }

    #[test]
    fn assemble_empty_source() {
        let image = assemble_source("").unwrap();
        assert!(image.code.is_empty());
        assert_eq!(image.entry, 0);
    }

    #[test]
    fn assemble_comments_and_blank_lines() {
        let image = assemble_source("# header\n\n   \nexit # done\n").unwrap();
        assert_eq!(image.code, vec![3, 8, 0, 0, 0, 0, 0, 0]);
    }

    #[test]
    fn assemble_single_instruction() {
        let image = assemble_source("mov r0 5").unwrap();
        assert_eq!(image.code.len(), 24);
        assert_eq!(image.code[0], Opcode::Mov as u8);
        assert_eq!(image.to_bytes().len(), HEADER_LEN + 24);
    }

    #[test]
    fn assemble_size_qualifier() {
        let image = assemble_source("mov B2 r0 5\npush b1 7").unwrap();
        assert_eq!(image.code[1], 2);
        assert_eq!(image.code[24 + 1], 1);
        let err = assemble_source("mov b3 r0 5").unwrap_err();
        assert!(matches!(
            err,
            VMError::AssemblyError { line: 1, offset: 5, .. }
        ));
        assert!(matches!(err.root(), VMError::InvalidSizeQualifier { .. }));
    }

    #[test]
    fn size_qualifier_with_missing_operand() {
        let err = assemble_source("mov b2 r0").unwrap_err();
        assert!(matches!(
            err.root(),
            VMError::OperandCountMismatch {
                expected: 2,
                actual: 1,
                ..
            }
        ));
        let err = assemble_source("push b4").unwrap_err();
        assert!(matches!(
            err.root(),
            VMError::OperandCountMismatch {
                expected: 1,
                actual: 0,
                ..
            }
        ));
    }

    #[test]
    fn size_qualifier_shaped_label() {
        let image = assemble_source("jmp b1\nb1:\nexit").unwrap();
        assert_eq!(image.code[0], Opcode::Jmp as u8);
        assert_eq!(image.code[1], 8);
        assert_eq!(&image.code[8..16], &16u64.to_le_bytes());
    }

    #[test]
    fn assemble_invalid_instruction() {
        let err = assemble_source("exit\n  jump end").unwrap_err();
        assert!(matches!(
            err,
            VMError::AssemblyError { line: 2, offset: 3, .. }
        ));
        assert!(matches!(err.root(), VMError::UnknownMnemonic { name } if name == "jump"));
    }

    #[test]
    fn assemble_wrong_arity() {
        let err = assemble_source("add r0").unwrap_err();
        assert!(matches!(
            err.root(),
            VMError::OperandCountMismatch {
                expected: 2,
                actual: 1,
                ..
            }
        ));
        assert!(assemble_source("exit 1 2").is_err());
    }

    #[test]
    fn immediate_destination_rejected() {
        let err = assemble_source("mov 5 r0").unwrap_err();
        assert!(matches!(
            err,
            VMError::AssemblyError { line: 1, offset: 5, .. }
        ));
        assert!(assemble_source("mov [5] r0").is_ok());
    }

    #[test]
    fn forward_and_backward_labels() {
        let src = "top:\n  jmp end\n  jmp top\nend:\n  exit\n";
        let image = assemble_source(src).unwrap();
        // jmp end at 0, jmp top at 16, exit at 32
        assert_eq!(&image.code[8..16], &32u64.to_le_bytes());
        assert_eq!(&image.code[24..32], &0u64.to_le_bytes());
    }

    #[test]
    fn label_and_instruction_on_one_line() {
        let image = assemble_source("jmp end\nend: exit").unwrap();
        assert_eq!(&image.code[8..16], &16u64.to_le_bytes());
    }

    #[test]
    fn numeric_jump_target() {
        let image = assemble_source("call 0x10\nexit").unwrap();
        assert_eq!(&image.code[8..16], &16u64.to_le_bytes());
    }

    #[test]
    fn entry_point_from_start_label() {
        assert_eq!(assemble_source("exit").unwrap().entry, 0);
        let image = assemble_source("f:\n ret\nstart:\n call f\n exit").unwrap();
        assert_eq!(image.entry, 8);
    }

    #[test]
    fn duplicate_label_error() {
        let err = assemble_source("a:\nexit\na:\nexit").unwrap_err();
        assert!(matches!(err, VMError::AssemblyError { line: 3, .. }));
        assert!(matches!(err.root(), VMError::DuplicateLabel { label } if label == "a"));
    }

    #[test]
    fn numeric_label_name_rejected() {
        let err = assemble_source("jmp 10\nmov r0 1\nexit\n10:\nmov r0 2\nexit").unwrap_err();
        assert!(matches!(
            err,
            VMError::AssemblyError { line: 4, offset: 1, .. }
        ));
        assert!(matches!(err.root(), VMError::MalformedOperand { token, .. } if token == "10"));
        for source in ["0x20: exit", "-1:\nexit"] {
            assert!(matches!(
                assemble_source(source).unwrap_err().root(),
                VMError::MalformedOperand { .. }
            ));
        }
        assert!(assemble_source("l10:\nexit").is_ok());
    }

    #[test]
    fn undefined_label_error() {
        let err = assemble_source("exit\ncall nowhere").unwrap_err();
        assert!(matches!(
            err,
            VMError::AssemblyError { line: 2, offset: 6, .. }
        ));
        assert!(matches!(err.root(), VMError::UndefinedLabel { label } if label == "nowhere"));
    }

    #[test]
    fn jump_target_in_brackets_rejected() {
        let err = assemble_source("jmp [r0]").unwrap_err();
        assert!(matches!(err.root(), VMError::MalformedOperand { .. }));
    }

    #[test]
    fn diagnostic_points_at_column() {
        let diag = render_assembly_diagnostic("prog.asm", "exit\n  jump end\n", 2, 3, "boom");
        let lines: Vec<&str> = diag.lines().collect();
        assert_eq!(lines[0], "error: boom");
        assert_eq!(lines[1], " --> prog.asm:2:3");
        assert_eq!(lines[3], "   2 |   jump end");
        assert_eq!(lines[4], "  |   ^");
    }

    #[test]
    fn assemble_file_missing() {
        assert!(matches!(
            assemble_file("/nonexistent/bvm/prog.asm"),
            Err(VMError::IoError { .. })
        ));
    }
}
