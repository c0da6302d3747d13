//! Instruction Set Architecture (ISA) definitions.
//!
//! The [`for_each_instruction!`](crate::for_each_instruction) macro holds the
//! canonical opcode list and invokes a callback macro for code generation, so
//! the opcode byte, mnemonic, arity and operand roles live in exactly one place.
//!
//! This module generates:
//! - The [`Opcode`] enum with its byte mapping
//! - `TryFrom<u8>` for decoding opcode bytes
//! - Static per-opcode tables: mnemonic, arity, encoded length, jump-target flag
//!
//! # Operand roles
//!
//! - `Value`: read only
//! - `Place`: read and/or written, must resolve to a register or memory
//! - `Target`: code offset of a jump or call, written as a label in source
//!
//! # Encoding
//!
//! Every instruction is an 8-byte header followed by one 8-byte payload per
//! operand, see [`instruction`](super::instruction).

use crate::virtual_machine::errors::VMError;

/// Size of the fixed instruction header (opcode, size, type tags, padding).
pub const INSTRUCTION_HEADER_LEN: usize = 8;
/// Size of one encoded operand payload.
pub const OPERAND_LEN: usize = 8;
/// Maximum number of operands any instruction takes.
pub const MAX_OPERANDS: usize = 2;

/// Invokes a callback macro with the complete instruction definition list.
#[macro_export]
macro_rules! for_each_instruction {
    ($callback:ident) => {
        $callback! {
            // =========================
            // Stack and control flow
            // =========================
            /// PUSH src ; rsp -= size ; mem[rsp] = src
            Push = 0x00, "push" => [src: Value],
            /// POP dst ; dst = mem[rsp] ; rsp += size
            Pop = 0x01, "pop" => [dst: Place],
            /// JMP target ; rip = target
            Jmp = 0x02, "jmp" => [target: Target],
            /// EXIT ; halt the machine
            Exit = 0x03, "exit" => [],
            /// MOV dst, src ; dst = src
            Mov = 0x04, "mov" => [dst: Place, src: Value],
            /// CALL target ; push rip ; rip = target
            Call = 0x05, "call" => [target: Target],
            /// RET ; pop rip
            Ret = 0x06, "ret" => [],
            // =========================
            // Integer arithmetic
            // =========================
            /// ADD dst, src ; dst = dst + src
            Add = 0x07, "add" => [dst: Place, src: Value],
            /// SUB dst, src ; dst = dst - src
            Sub = 0x08, "sub" => [dst: Place, src: Value],
            /// MUL dst, src ; dst = dst * src
            Mul = 0x09, "mul" => [dst: Place, src: Value],
            /// DIV dst, src ; dst = dst / src (fault on division by zero)
            Div = 0x0A, "div" => [dst: Place, src: Value],
            /// MOD dst, src ; dst = dst % src (fault on division by zero)
            Mod = 0x0B, "mod" => [dst: Place, src: Value],
            /// INC dst ; dst = dst + 1
            Inc = 0x0C, "inc" => [dst: Place],
            /// DEC dst ; dst = dst - 1
            Dec = 0x0D, "dec" => [dst: Place],
            // =========================
            // Comparison and branches
            // =========================
            /// CMP a, b ; rflag = a - b (signed)
            Cmp = 0x0E, "cmp" => [lhs: Value, rhs: Value],
            /// JE target ; jump if rflag == 0
            Je = 0x0F, "je" => [target: Target],
            /// JNE target ; jump if rflag != 0
            Jne = 0x10, "jne" => [target: Target],
            /// JL target ; jump if rflag < 0
            Jl = 0x11, "jl" => [target: Target],
            /// JG target ; jump if rflag > 0
            Jg = 0x12, "jg" => [target: Target],
            /// JLE target ; jump if rflag <= 0
            Jle = 0x13, "jle" => [target: Target],
            /// JGE target ; jump if rflag >= 0
            Jge = 0x14, "jge" => [target: Target],
            // =========================
            // Diagnostics
            // =========================
            /// PRINT src ; write src as an unsigned decimal line
            Print = 0x15, "print" => [src: Value],
        }
    };
}

/// Role an operand slot plays for its instruction.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum OperandRole {
    /// Read only.
    Value,
    /// Destination; must not be a bare immediate.
    Place,
    /// Jump or call target, resolved from a label.
    Target,
}

#[macro_export]
macro_rules! define_opcodes {
    (
        $(
            $(#[$doc:meta])*
            $name:ident = $opcode:expr, $mnemonic:literal => [
                $( $field:ident : $role:ident ),* $(,)?
            ]
        ),* $(,)?
    ) => {
        #[repr(u8)]
        #[derive(Copy, Clone, Debug, Eq, PartialEq, Hash)]
        pub enum Opcode {
            $(
                $(#[$doc])*
                $name = $opcode,
            )*
        }

        impl TryFrom<u8> for Opcode {
            type Error = VMError;

            fn try_from(value: u8) -> Result<Self, Self::Error> {
                match value {
                    $( $opcode => Ok(Opcode::$name), )*
                    _ => Err(VMError::UnrecognizedOpcode {
                        opcode: value,
                        offset: 0,
                    }),
                }
            }
        }

        impl Opcode {
            /// Every opcode, in byte order.
            pub const ALL: &'static [Opcode] = &[ $( Opcode::$name ),* ];

            /// Returns the assembly mnemonic for this opcode.
            pub const fn mnemonic(&self) -> &'static str {
                match self {
                    $( Opcode::$name => $mnemonic, )*
                }
            }

            /// Looks up an opcode by its (case-sensitive) mnemonic.
            pub fn from_mnemonic(name: &str) -> Option<Opcode> {
                match name {
                    $( $mnemonic => Some(Opcode::$name), )*
                    _ => None,
                }
            }

            /// Number of operands this opcode takes.
            pub const fn arity(&self) -> usize {
                match self {
                    $( Opcode::$name => define_opcodes!(@count $( $field ),*), )*
                }
            }

            /// Roles of the operand slots, in order.
            pub const fn roles(&self) -> &'static [OperandRole] {
                match self {
                    $( Opcode::$name => &[ $( OperandRole::$role ),* ], )*
                }
            }
        }
    };

    (@count $( $x:ident ),* ) => {
        <[()]>::len(&[ $( define_opcodes!(@unit $x) ),* ])
    };

    (@unit $x:ident) => { () };
}

for_each_instruction!(define_opcodes);

impl Opcode {
    /// Encoded length of any instruction with this opcode.
    pub const fn encoded_length(&self) -> usize {
        INSTRUCTION_HEADER_LEN + self.arity() * OPERAND_LEN
    }

    /// True for `jmp`, `call` and the conditional jumps, whose operand is a label.
    pub const fn takes_label(&self) -> bool {
        matches!(self.roles().first(), Some(OperandRole::Target))
    }
}

/// Encoded length of an instruction, computed from its opcode alone.
pub const fn encoded_length(opcode: Opcode) -> usize {
    opcode.encoded_length()
}

/// Width of the values an instruction moves or computes.
#[repr(u8)]
#[derive(Copy, Clone, Debug, Default, Eq, PartialEq)]
pub enum OperandSize {
    B1 = 1,
    B2 = 2,
    B4 = 4,
    #[default]
    B8 = 8,
}

impl OperandSize {
    /// Number of bytes moved.
    pub const fn bytes(&self) -> usize {
        *self as usize
    }

    /// Mask selecting the low `bytes()` bytes of a word.
    pub const fn mask(&self) -> u64 {
        match self {
            OperandSize::B8 => u64::MAX,
            other => (1u64 << (other.bytes() * 8)) - 1,
        }
    }

    /// Sign-extends the low `bytes()` bytes of `value` to 64 bits.
    pub const fn sign_extend(&self, value: u64) -> i64 {
        let shift = 64 - self.bytes() as u32 * 8;
        ((value << shift) as i64) >> shift
    }

    /// Assembly qualifier, e.g. `b4`.
    pub const fn qualifier(&self) -> &'static str {
        match self {
            OperandSize::B1 => "b1",
            OperandSize::B2 => "b2",
            OperandSize::B4 => "b4",
            OperandSize::B8 => "b8",
        }
    }

    /// Parses a qualifier token (`b1`, `B2`, ...).
    pub fn from_qualifier(token: &str) -> Option<OperandSize> {
        match token.to_ascii_lowercase().as_str() {
            "b1" => Some(OperandSize::B1),
            "b2" => Some(OperandSize::B2),
            "b4" => Some(OperandSize::B4),
            "b8" => Some(OperandSize::B8),
            _ => None,
        }
    }
}

impl TryFrom<u8> for OperandSize {
    type Error = VMError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            1 => Ok(OperandSize::B1),
            2 => Ok(OperandSize::B2),
            4 => Ok(OperandSize::B4),
            8 => Ok(OperandSize::B8),
            _ => Err(VMError::InvalidOperandSize {
                size: value,
                offset: 0,
            }),
        }
    }
}
