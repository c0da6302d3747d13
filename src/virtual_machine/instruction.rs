//! Instruction codec.
//!
//! # Encoding
//!
//! ```text
//! [opcode, size, type0, type1, 0, 0, 0, 0] [payload0: u64 LE] [payload1: u64 LE]
//! ```
//!
//! The header is always 8 bytes; one payload follows per operand, so the
//! length of an instruction depends on its opcode alone. Unused type bytes are 0.

use crate::types::encoding::{Encode, EncodeSink, u64_at};
use crate::virtual_machine::errors::VMError;
use crate::virtual_machine::isa::{
    INSTRUCTION_HEADER_LEN, MAX_OPERANDS, OPERAND_LEN, Opcode, OperandSize,
};
use crate::virtual_machine::operand::{Operand, OperandType};

/// Owned instruction record.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Instruction {
    pub opcode: Opcode,
    pub size: OperandSize,
    pub operands: Vec<Operand>,
}

impl Instruction {
    /// Builds an instruction, checking the operand count against the opcode.
    pub fn new(
        opcode: Opcode,
        size: OperandSize,
        operands: Vec<Operand>,
    ) -> Result<Self, VMError> {
        if operands.len() != opcode.arity() {
            return Err(VMError::OperandCountMismatch {
                instruction: opcode.mnemonic().to_string(),
                expected: opcode.arity(),
                actual: operands.len(),
            });
        }
        Ok(Self {
            opcode,
            size,
            operands,
        })
    }

    pub fn encoded_length(&self) -> usize {
        self.opcode.encoded_length()
    }

    /// Decodes the instruction at the start of `bytes`.
    pub fn decode(bytes: &[u8]) -> Result<Self, VMError> {
        InstructionView::new(bytes, 0)?.to_instruction()
    }
}

impl Encode for Instruction {
    fn encode<S: EncodeSink>(&self, out: &mut S) {
        let mut header = [0u8; INSTRUCTION_HEADER_LEN];
        header[0] = self.opcode as u8;
        header[1] = self.size as u8;
        for (slot, operand) in self.operands.iter().take(MAX_OPERANDS).enumerate() {
            header[2 + slot] = operand.type_tag();
        }
        header.encode(out);
        for operand in &self.operands {
            operand.encode(out);
        }
    }
}

/// Zero-copy view of one encoded instruction inside a larger buffer.
///
/// Construction validates the opcode, the size byte and that the full
/// encoded length is in bounds, so accessors never fail on length.
#[derive(Copy, Clone, Debug)]
pub struct InstructionView<'a> {
    bytes: &'a [u8],
    offset: u64,
    opcode: Opcode,
    size: OperandSize,
}

impl<'a> InstructionView<'a> {
    pub fn new(memory: &'a [u8], offset: u64) -> Result<Self, VMError> {
        let start = usize::try_from(offset).unwrap_or(usize::MAX);
        let available = memory.len().saturating_sub(start);
        if available < INSTRUCTION_HEADER_LEN {
            return Err(VMError::TruncatedInstruction {
                offset,
                requested: INSTRUCTION_HEADER_LEN,
                available,
            });
        }
        let opcode = Opcode::try_from(memory[start]).map_err(|e| e.at_address(offset))?;
        let size = OperandSize::try_from(memory[start + 1]).map_err(|e| e.at_address(offset))?;
        let len = opcode.encoded_length();
        if available < len {
            return Err(VMError::TruncatedInstruction {
                offset,
                requested: len,
                available,
            });
        }
        Ok(Self {
            bytes: &memory[start..start + len],
            offset,
            opcode,
            size,
        })
    }

    pub fn opcode(&self) -> Opcode {
        self.opcode
    }

    pub fn size(&self) -> OperandSize {
        self.size
    }

    /// Address of the first byte of the instruction.
    pub fn offset(&self) -> u64 {
        self.offset
    }

    /// The raw encoded bytes.
    pub fn bytes(&self) -> &'a [u8] {
        self.bytes
    }

    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    /// Type tag of operand `slot`. Slots beyond the arity read as 0.
    pub fn type_tag(&self, slot: usize) -> OperandType {
        if slot < self.opcode.arity() {
            self.bytes[2 + slot]
        } else {
            0
        }
    }

    /// Raw payload of operand `slot`.
    pub fn payload(&self, slot: usize) -> u64 {
        u64_at(self.bytes, INSTRUCTION_HEADER_LEN + slot * OPERAND_LEN).unwrap_or(0)
    }

    /// Decodes operand `slot`.
    pub fn operand(&self, slot: usize) -> Result<Operand, VMError> {
        Operand::decode(self.type_tag(slot), self.payload(slot))
            .map_err(|e| e.at_address(self.offset))
    }

    pub fn to_instruction(&self) -> Result<Instruction, VMError> {
        let operands = (0..self.opcode.arity())
            .map(|slot| self.operand(slot))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Instruction {
            opcode: self.opcode,
            size: self.size,
            operands,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::virtual_machine::operand::{
        ComplexOperand, IndexTerm, OPERAND_IMMEDIATE, OPERAND_LITERAL, OperandValue, Register,
    };

    fn mov_r0_5() -> Instruction {
        Instruction::new(
            Opcode::Mov,
            OperandSize::B8,
            vec![Operand::register(Register::R0), Operand::immediate(5)],
        )
        .unwrap()
    }

    #[test]
    fn encode_layout() {
        let bytes = mov_r0_5().to_vec();
        assert_eq!(bytes.len(), 24);
        assert_eq!(&bytes[..8], &[4, 8, 2 | 4, 1 | 4, 0, 0, 0, 0]);
        assert_eq!(&bytes[8..16], &0u64.to_le_bytes());
        assert_eq!(&bytes[16..24], &5u64.to_le_bytes());
    }

    #[test]
    fn encoded_length_matches_bytes() {
        let exit = Instruction::new(Opcode::Exit, OperandSize::B8, vec![]).unwrap();
        assert_eq!(exit.to_vec(), vec![3, 8, 0, 0, 0, 0, 0, 0]);
        assert_eq!(mov_r0_5().to_vec().len(), mov_r0_5().encoded_length());
    }

    #[test]
    fn new_checks_arity() {
        let err = Instruction::new(Opcode::Add, OperandSize::B8, vec![Operand::immediate(1)])
            .unwrap_err();
        assert!(matches!(
            err,
            VMError::OperandCountMismatch {
                expected: 2,
                actual: 1,
                ..
            }
        ));
    }

    #[test]
    fn decode_inverts_encode() {
        let complex = Operand {
            value: OperandValue::Complex(ComplexOperand {
                base: Register::R2,
                multiplier: 4,
                index: Some(IndexTerm::Sub(Register::R3)),
                offset: 12,
            }),
            address: true,
        };
        let samples = [
            mov_r0_5(),
            Instruction::new(Opcode::Push, OperandSize::B2, vec![complex]).unwrap(),
            Instruction::new(Opcode::Ret, OperandSize::B8, vec![]).unwrap(),
            Instruction::new(Opcode::Jge, OperandSize::B8, vec![Operand::immediate(48)]).unwrap(),
        ];
        for instr in samples {
            assert_eq!(Instruction::decode(&instr.to_vec()).unwrap(), instr);
        }
    }

    #[test]
    fn view_is_bounded_to_instruction() {
        let mut memory = vec![0xAA; 4];
        memory.extend(mov_r0_5().to_vec());
        memory.extend([0xBB; 4]);
        let view = InstructionView::new(&memory, 4).unwrap();
        assert_eq!(view.opcode(), Opcode::Mov);
        assert_eq!(view.len(), 24);
        assert_eq!(view.offset(), 4);
        assert_eq!(view.payload(1), 5);
        assert_eq!(view.type_tag(1), OPERAND_IMMEDIATE | OPERAND_LITERAL);
        assert_eq!(view.to_instruction().unwrap(), mov_r0_5());
    }

    #[test]
    fn view_unknown_opcode() {
        let memory = [0xFFu8, 8, 0, 0, 0, 0, 0, 0];
        assert!(matches!(
            InstructionView::new(&memory, 0),
            Err(VMError::UnrecognizedOpcode {
                opcode: 0xFF,
                offset: 0
            })
        ));
    }

    #[test]
    fn view_invalid_size() {
        let memory = [3u8, 3, 0, 0, 0, 0, 0, 0];
        assert!(matches!(
            InstructionView::new(&memory, 0),
            Err(VMError::InvalidOperandSize { size: 3, .. })
        ));
    }

    #[test]
    fn view_truncated() {
        let bytes = mov_r0_5().to_vec();
        assert!(matches!(
            InstructionView::new(&bytes[..20], 0),
            Err(VMError::TruncatedInstruction {
                requested: 24,
                available: 20,
                ..
            })
        ));
        assert!(matches!(
            InstructionView::new(&bytes, 100),
            Err(VMError::TruncatedInstruction { available: 0, .. })
        ));
    }

    #[test]
    fn view_operand_error_carries_address() {
        let mut bytes = mov_r0_5().to_vec();
        bytes[8] = 77;
        let view = InstructionView::new(&bytes, 0).unwrap();
        assert!(matches!(
            view.operand(0),
            Err(VMError::InvalidRegister { id: 77, offset: 0 })
        ));
    }
}
