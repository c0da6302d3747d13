use crate::virtual_machine::isa::OperandSize;
use crate::virtual_machine::operand::{REGISTER_COUNT, Register};

/// Register file: ten 64-bit registers indexed by [`Register`].
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct Registers {
    regs: [u64; REGISTER_COUNT],
}

impl Registers {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, reg: Register) -> u64 {
        self.regs[reg.id() as usize]
    }

    pub fn set(&mut self, reg: Register, value: u64) {
        self.regs[reg.id() as usize] = value;
    }

    /// Replaces only the low `size` bytes of `reg`; the upper bytes are kept.
    pub fn write_sized(&mut self, reg: Register, value: u64, size: OperandSize) {
        let mask = size.mask();
        let slot = &mut self.regs[reg.id() as usize];
        *slot = (*slot & !mask) | (value & mask);
    }

    /// Copy of every register value, in id order.
    pub fn snapshot(&self) -> [u64; REGISTER_COUNT] {
        self.regs
    }

    /// Iterates `(register, value)` pairs in id order.
    pub fn iter(&self) -> impl Iterator<Item = (Register, u64)> + '_ {
        Register::ALL.iter().map(|r| (*r, self.get(*r)))
    }
}
