use crate::types::encoding::DecodeError;

/// Errors raised while assembling source text, loading an image, or executing it.
///
/// Every variant is terminal for the operation that produced it; nothing is retried.
#[derive(Debug, thiserror::Error)]
pub enum VMError {
    // =========================
    // Assembly
    // =========================
    /// Unrecognized instruction mnemonic.
    #[error("unknown instruction '{name}'")]
    UnknownMnemonic { name: String },
    /// Token starts with the register prefix but names no register.
    #[error("unknown register '{token}'")]
    UnknownRegister { token: String },
    /// Operand text that does not follow the operand grammar.
    #[error("malformed operand '{token}': {reason}")]
    MalformedOperand { token: String, reason: &'static str },
    /// Size qualifier other than `b1`, `b2`, `b4` or `b8`.
    #[error("invalid size qualifier '{token}' (expected b1, b2, b4 or b8)")]
    InvalidSizeQualifier { token: String },
    /// Wrong number of operands for an instruction.
    #[error("operand count mismatch for '{instruction}': expected {expected}, got {actual}")]
    OperandCountMismatch {
        instruction: String,
        expected: usize,
        actual: usize,
    },
    /// Label defined more than once.
    #[error("duplicate label '{label}'")]
    DuplicateLabel { label: String },
    /// Jump or call to a label that is never declared.
    #[error("undefined label '{label}'")]
    UndefinedLabel { label: String },
    /// Any of the above, located in the source.
    #[error("line {line}:{offset}: {source}")]
    AssemblyError {
        line: usize,
        offset: usize,
        source: Box<VMError>,
    },

    // =========================
    // Decoding and execution
    // =========================
    /// Opcode byte outside the instruction set.
    #[error("unrecognized opcode 0x{opcode:02x} at address {offset}")]
    UnrecognizedOpcode { opcode: u8, offset: u64 },
    /// Size byte outside {1, 2, 4, 8}.
    #[error("invalid operand size {size} at address {offset}")]
    InvalidOperandSize { size: u8, offset: u64 },
    /// Operand type tag that is neither immediate nor register.
    #[error("invalid operand type 0x{tag:02x} at address {offset}")]
    InvalidOperandType { tag: u8, offset: u64 },
    /// Register id outside the register file.
    #[error("invalid register id {id} at address {offset}")]
    InvalidRegister { id: u8, offset: u64 },
    /// Instruction runs past the end of memory.
    #[error("truncated instruction at address {offset}: need {requested} bytes, {available} available")]
    TruncatedInstruction {
        offset: u64,
        requested: usize,
        available: usize,
    },
    /// Memory access outside the arena.
    #[error("memory access of {size} bytes at address {address} is outside the {len}-byte arena")]
    MemoryOutOfBounds { address: u64, size: usize, len: usize },
    /// Instruction tries to store into an immediate operand.
    #[error("write to immediate operand at address {offset}")]
    ImmediateWrite { offset: u64 },
    /// Division or modulo by zero.
    #[error("division by zero at address {offset}")]
    DivisionByZero { offset: u64 },

    // =========================
    // Images and files
    // =========================
    /// Image bytes that do not form a loadable program.
    #[error("invalid image: {reason}")]
    InvalidImage { reason: String },
    /// File could not be read or written.
    #[error("io error on {path}: {source}")]
    IoError {
        path: String,
        source: std::io::Error,
    },
}

impl VMError {
    /// Wraps `self` with its source location, unless it already carries one.
    pub fn at(self, line: usize, offset: usize) -> VMError {
        match self {
            located @ VMError::AssemblyError { .. } => located,
            other => VMError::AssemblyError {
                line,
                offset,
                source: Box::new(other),
            },
        }
    }

    /// Stamps the address of the offending instruction onto decode errors.
    pub fn at_address(self, address: u64) -> VMError {
        match self {
            VMError::UnrecognizedOpcode { opcode, .. } => VMError::UnrecognizedOpcode {
                opcode,
                offset: address,
            },
            VMError::InvalidOperandSize { size, .. } => VMError::InvalidOperandSize {
                size,
                offset: address,
            },
            VMError::InvalidOperandType { tag, .. } => VMError::InvalidOperandType {
                tag,
                offset: address,
            },
            VMError::InvalidRegister { id, .. } => VMError::InvalidRegister {
                id,
                offset: address,
            },
            other => other,
        }
    }

    /// Returns the innermost error, skipping location wrappers.
    pub fn root(&self) -> &VMError {
        match self {
            VMError::AssemblyError { source, .. } => source.root(),
            other => other,
        }
    }
}

impl From<DecodeError> for VMError {
    fn from(err: DecodeError) -> Self {
        let reason = match err {
            DecodeError::UnexpectedEof => "truncated",
            DecodeError::TrailingBytes => "trailing bytes",
        };
        VMError::InvalidImage {
            reason: reason.to_string(),
        }
    }
}
