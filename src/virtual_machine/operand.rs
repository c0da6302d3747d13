//! Operand encoding.
//!
//! Every operand is an 8-byte little-endian payload plus a one-byte type tag
//! stored in the instruction header. The tag is a bitset:
//!
//! | bit | meaning |
//! |---|---|
//! | [`OPERAND_IMMEDIATE`] | payload is a raw 64-bit value |
//! | [`OPERAND_REGISTER`] | payload names a register (or a complex expression) |
//! | [`OPERAND_LITERAL`] | use the value itself |
//! | [`OPERAND_ADDRESS`] | use the value as a memory address |
//! | [`OPERAND_COMPLEX`] | payload is a packed [`ComplexOperand`] |

use crate::types::encoding::{Encode, EncodeSink};
use crate::virtual_machine::errors::VMError;
use std::fmt;

/// Operand type tag bitset.
pub type OperandType = u8;

pub const OPERAND_IMMEDIATE: OperandType = 1 << 0;
pub const OPERAND_REGISTER: OperandType = 1 << 1;
pub const OPERAND_LITERAL: OperandType = 1 << 2;
pub const OPERAND_ADDRESS: OperandType = 1 << 3;
pub const OPERAND_COMPLEX: OperandType = 1 << 4;

/// Register file layout. The discriminant is the encoded register id.
#[repr(u8)]
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash)]
pub enum Register {
    R0 = 0,
    R1 = 1,
    R2 = 2,
    R3 = 3,
    R4 = 4,
    R5 = 5,
    /// Instruction pointer (absolute arena address).
    Rip = 6,
    /// Stack pointer; the stack grows down from the end of the arena.
    Rsp = 7,
    /// Result of the last `cmp`, read as a signed value by conditional jumps.
    Rflag = 8,
    /// First free, 8-byte aligned address after the loaded image.
    Rmem = 9,
}

/// Number of registers in the register file.
pub const REGISTER_COUNT: usize = 10;

impl Register {
    pub const ALL: [Register; REGISTER_COUNT] = [
        Register::R0,
        Register::R1,
        Register::R2,
        Register::R3,
        Register::R4,
        Register::R5,
        Register::Rip,
        Register::Rsp,
        Register::Rflag,
        Register::Rmem,
    ];

    /// Assembly name of the register.
    pub const fn name(&self) -> &'static str {
        match self {
            Register::R0 => "r0",
            Register::R1 => "r1",
            Register::R2 => "r2",
            Register::R3 => "r3",
            Register::R4 => "r4",
            Register::R5 => "r5",
            Register::Rip => "rip",
            Register::Rsp => "rsp",
            Register::Rflag => "rflag",
            Register::Rmem => "rmem",
        }
    }

    pub fn from_name(name: &str) -> Option<Register> {
        Register::ALL.into_iter().find(|r| r.name() == name)
    }

    pub const fn id(&self) -> u8 {
        *self as u8
    }
}

impl TryFrom<u8> for Register {
    type Error = VMError;

    fn try_from(id: u8) -> Result<Self, Self::Error> {
        Register::ALL
            .get(id as usize)
            .copied()
            .ok_or(VMError::InvalidRegister { id, offset: 0 })
    }
}

impl fmt::Display for Register {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Second register term of a complex operand.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum IndexTerm {
    Add(Register),
    Sub(Register),
}

const SIGN_NONE: u8 = 0;
const SIGN_ADD: u8 = 1;
const SIGN_SUB: u8 = 2;

/// Indexed addressing expression `base * multiplier ± index + offset`.
///
/// Packed into an operand payload as:
///
/// | byte | field |
/// |---|---|
/// | 0 | base register id |
/// | 1 | multiplier |
/// | 2 | index sign: 0 none, 1 add, 2 subtract |
/// | 3 | index register id (0 when absent) |
/// | 4..8 | offset, `i32` little-endian |
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct ComplexOperand {
    pub base: Register,
    pub multiplier: u8,
    pub index: Option<IndexTerm>,
    pub offset: i32,
}

impl ComplexOperand {
    /// A bare `base` expression with default multiplier and offset.
    pub const fn new(base: Register) -> Self {
        Self {
            base,
            multiplier: 1,
            index: None,
            offset: 0,
        }
    }

    /// True when any part differs from the plain-register defaults.
    pub const fn is_indexed(&self) -> bool {
        self.multiplier != 1 || self.index.is_some() || self.offset != 0
    }

    pub fn pack(&self) -> u64 {
        let (sign, index) = match self.index {
            None => (SIGN_NONE, 0),
            Some(IndexTerm::Add(r)) => (SIGN_ADD, r.id()),
            Some(IndexTerm::Sub(r)) => (SIGN_SUB, r.id()),
        };
        let mut bytes = [0u8; 8];
        bytes[0] = self.base.id();
        bytes[1] = self.multiplier;
        bytes[2] = sign;
        bytes[3] = index;
        bytes[4..8].copy_from_slice(&self.offset.to_le_bytes());
        u64::from_le_bytes(bytes)
    }

    /// Inverse of [`pack`](Self::pack).
    ///
    /// Fails with [`VMError::InvalidRegister`] when a register byte names no
    /// register. A sign byte other than add or subtract means no index term.
    pub fn unpack(payload: u64) -> Result<Self, VMError> {
        let bytes = payload.to_le_bytes();
        let base = Register::try_from(bytes[0])?;
        let index = match bytes[2] {
            SIGN_ADD => Some(IndexTerm::Add(Register::try_from(bytes[3])?)),
            SIGN_SUB => Some(IndexTerm::Sub(Register::try_from(bytes[3])?)),
            _ => None,
        };
        Ok(Self {
            base,
            multiplier: bytes[1],
            index,
            offset: i32::from_le_bytes([bytes[4], bytes[5], bytes[6], bytes[7]]),
        })
    }

    /// Computes the effective address from register values.
    ///
    /// Wrapping 64-bit arithmetic; the offset is sign-extended.
    pub fn effective_address(&self, reg: impl Fn(Register) -> u64) -> u64 {
        let mut addr = reg(self.base).wrapping_mul(self.multiplier as u64);
        match self.index {
            Some(IndexTerm::Add(r)) => addr = addr.wrapping_add(reg(r)),
            Some(IndexTerm::Sub(r)) => addr = addr.wrapping_sub(reg(r)),
            None => {}
        }
        addr.wrapping_add(self.offset as i64 as u64)
    }
}

impl fmt::Display for ComplexOperand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.base)?;
        if self.multiplier != 1 {
            write!(f, "*{}", self.multiplier)?;
        }
        match self.index {
            Some(IndexTerm::Add(r)) => write!(f, "+{r}")?,
            Some(IndexTerm::Sub(r)) => write!(f, "-{r}")?,
            None => {}
        }
        if self.offset > 0 {
            write!(f, "+{}", self.offset)?;
        } else if self.offset < 0 {
            write!(f, "-{}", self.offset.unsigned_abs())?;
        }
        Ok(())
    }
}

/// What an operand payload holds.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum OperandValue {
    Immediate(u64),
    Register(Register),
    Complex(ComplexOperand),
}

/// A decoded operand: its value and whether it is dereferenced.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct Operand {
    pub value: OperandValue,
    /// Written in brackets; the value is used as a memory address.
    pub address: bool,
}

impl Operand {
    pub const fn immediate(value: u64) -> Self {
        Self {
            value: OperandValue::Immediate(value),
            address: false,
        }
    }

    pub const fn register(reg: Register) -> Self {
        Self {
            value: OperandValue::Register(reg),
            address: false,
        }
    }

    /// Type tag byte for the instruction header.
    pub const fn type_tag(&self) -> OperandType {
        let kind = match self.value {
            OperandValue::Immediate(_) => OPERAND_IMMEDIATE,
            OperandValue::Register(_) => OPERAND_REGISTER,
            OperandValue::Complex(_) => OPERAND_REGISTER | OPERAND_COMPLEX,
        };
        kind | if self.address {
            OPERAND_ADDRESS
        } else {
            OPERAND_LITERAL
        }
    }

    /// Raw 64-bit payload.
    pub fn payload(&self) -> u64 {
        match self.value {
            OperandValue::Immediate(v) => v,
            OperandValue::Register(r) => r.id() as u64,
            OperandValue::Complex(c) => c.pack(),
        }
    }

    /// Decodes a payload according to its type tag.
    ///
    /// `REGISTER` takes precedence over `IMMEDIATE`; `COMPLEX` only applies
    /// together with `REGISTER`. Register operands use the low payload byte.
    pub fn decode(tag: OperandType, payload: u64) -> Result<Operand, VMError> {
        let value = if tag & OPERAND_REGISTER != 0 {
            if tag & OPERAND_COMPLEX != 0 {
                OperandValue::Complex(ComplexOperand::unpack(payload)?)
            } else {
                OperandValue::Register(Register::try_from(payload as u8)?)
            }
        } else if tag & OPERAND_IMMEDIATE != 0 {
            OperandValue::Immediate(payload)
        } else {
            return Err(VMError::InvalidOperandType { tag, offset: 0 });
        };
        Ok(Operand {
            value,
            address: tag & OPERAND_ADDRESS != 0,
        })
    }

    /// True when the operand denotes a memory location rather than a value.
    pub const fn is_memory(&self) -> bool {
        self.address || matches!(self.value, OperandValue::Complex(_))
    }
}

impl Encode for Operand {
    fn encode<S: EncodeSink>(&self, out: &mut S) {
        self.payload().encode(out);
    }
}

impl fmt::Display for Operand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.address {
            f.write_str("[")?;
        }
        match self.value {
            OperandValue::Immediate(v) => write!(f, "{v}")?,
            OperandValue::Register(r) => write!(f, "{r}")?,
            OperandValue::Complex(c) => write!(f, "{c}")?,
        }
        if self.address {
            f.write_str("]")?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn register_ids_and_names() {
        for (i, r) in Register::ALL.iter().enumerate() {
            assert_eq!(r.id() as usize, i);
            assert_eq!(Register::try_from(i as u8).unwrap(), *r);
            assert_eq!(Register::from_name(r.name()), Some(*r));
        }
        assert_eq!(Register::Rmem.id(), 9);
        assert!(matches!(
            Register::try_from(10),
            Err(VMError::InvalidRegister { id: 10, .. })
        ));
        assert_eq!(Register::from_name("r6"), None);
    }

    #[test]
    fn complex_pack_layout() {
        let c = ComplexOperand {
            base: Register::R0,
            multiplier: 2,
            index: Some(IndexTerm::Sub(Register::R1)),
            offset: -4,
        };
        let bytes = c.pack().to_le_bytes();
        assert_eq!(bytes, [0, 2, 2, 1, 0xFC, 0xFF, 0xFF, 0xFF]);
        assert_eq!(ComplexOperand::unpack(c.pack()).unwrap(), c);
    }

    #[test]
    fn complex_default_pack() {
        let c = ComplexOperand::new(Register::R3);
        assert!(!c.is_indexed());
        assert_eq!(c.pack().to_le_bytes(), [3, 1, 0, 0, 0, 0, 0, 0]);
    }

    #[test]
    fn complex_unpack_rejects_bad_register() {
        let payload = u64::from_le_bytes([0, 1, 1, 42, 0, 0, 0, 0]);
        assert!(matches!(
            ComplexOperand::unpack(payload),
            Err(VMError::InvalidRegister { id: 42, .. })
        ));
    }

    #[test]
    fn effective_address_wraps() {
        let c = ComplexOperand {
            base: Register::R0,
            multiplier: 2,
            index: Some(IndexTerm::Add(Register::R1)),
            offset: -4,
        };
        let regs = |r: Register| match r {
            Register::R0 => 100,
            Register::R1 => 10,
            _ => 0,
        };
        assert_eq!(c.effective_address(regs), 206);

        let under = ComplexOperand {
            offset: -1,
            ..ComplexOperand::new(Register::R2)
        };
        assert_eq!(under.effective_address(|_| 0), u64::MAX);
    }

    #[test]
    fn type_tags() {
        assert_eq!(
            Operand::immediate(5).type_tag(),
            OPERAND_IMMEDIATE | OPERAND_LITERAL
        );
        let addr = Operand {
            value: OperandValue::Register(Register::R0),
            address: true,
        };
        assert_eq!(addr.type_tag(), OPERAND_REGISTER | OPERAND_ADDRESS);
        let complex = Operand {
            value: OperandValue::Complex(ComplexOperand::new(Register::R0)),
            address: false,
        };
        assert_eq!(
            complex.type_tag(),
            OPERAND_REGISTER | OPERAND_COMPLEX | OPERAND_LITERAL
        );
        assert!(complex.is_memory());
    }

    #[test]
    fn decode_matches_encode() {
        let op = Operand {
            value: OperandValue::Complex(ComplexOperand {
                base: Register::Rsp,
                multiplier: 1,
                index: None,
                offset: 16,
            }),
            address: true,
        };
        assert_eq!(Operand::decode(op.type_tag(), op.payload()).unwrap(), op);
        assert_eq!(op.to_vec(), op.payload().to_le_bytes());
    }

    #[test]
    fn decode_rejects_untyped_tag() {
        assert!(matches!(
            Operand::decode(OPERAND_LITERAL, 0),
            Err(VMError::InvalidOperandType { tag: 4, .. })
        ));
        assert!(Operand::decode(0, 0).is_err());
    }

    #[test]
    fn display_source_syntax() {
        let c = ComplexOperand {
            base: Register::R0,
            multiplier: 2,
            index: Some(IndexTerm::Add(Register::R1)),
            offset: -4,
        };
        let op = Operand {
            value: OperandValue::Complex(c),
            address: true,
        };
        assert_eq!(op.to_string(), "[r0*2+r1-4]");
        assert_eq!(Operand::immediate(7).to_string(), "7");
        assert_eq!(Operand::register(Register::Rflag).to_string(), "rflag");
        let min = ComplexOperand {
            offset: i32::MIN,
            ..ComplexOperand::new(Register::R1)
        };
        assert_eq!(min.to_string(), "r1-2147483648");
    }
}
