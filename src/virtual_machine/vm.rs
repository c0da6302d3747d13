//! Execution engine.
//!
//! The machine runs an [`Image`] directly out of a flat memory arena with ten
//! 64-bit registers. All arithmetic wraps.
//!
//! # Memory layout
//!
//! ```text
//! 0            16                 rmem                 rsp ... arena end
//! [ header ][ code ][ pad ][ free ............ stack (grows down) ]
//! ```
//!
//! # Cycle
//!
//! 1. Decode the instruction at `rip` in place ([`InstructionView`])
//! 2. Advance `rip` past it
//! 3. Resolve operands to [`Location`]s
//! 4. Dispatch on the opcode

mod memory;
mod registers;

pub use memory::Memory;
pub use registers::Registers;

use crate::debug;
use crate::virtual_machine::errors::VMError;
use crate::virtual_machine::image::{HEADER_LEN, Image};
use crate::virtual_machine::instruction::InstructionView;
use crate::virtual_machine::isa::{MAX_OPERANDS, Opcode, OperandSize};
use crate::virtual_machine::operand::{Operand, OperandValue, Register};
use std::io::{self, Stdout, Write};

/// Arena size used when none is given.
pub const DEFAULT_MEMORY_SIZE: usize = 32 * 1024 * 1024;
/// Width of return addresses and jump targets.
const WORD: OperandSize = OperandSize::B8;

/// Outcome of a single [`Machine::step`].
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum Step {
    Continue,
    Halt,
}

/// Resolved operand: where a value is read from or written to.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
enum Location {
    Register(Register),
    Memory(u64),
    /// Read-only literal.
    Immediate(u64),
}

/// Rounds `value` up to the next multiple of `align` (a power of two).
const fn align_up(value: u64, align: u64) -> u64 {
    (value + align - 1) & !(align - 1)
}

/// True when a conditional jump is taken for the given `rflag`.
fn jump_taken(opcode: Opcode, flag: i64) -> bool {
    match opcode {
        Opcode::Je => flag == 0,
        Opcode::Jne => flag != 0,
        Opcode::Jl => flag < 0,
        Opcode::Jg => flag > 0,
        Opcode::Jle => flag <= 0,
        Opcode::Jge => flag >= 0,
        _ => false,
    }
}

/// Register machine executing one loaded image.
///
/// `print` output goes to `W` (stdout by default).
pub struct Machine<W: Write = Stdout> {
    registers: Registers,
    memory: Memory,
    out: W,
    /// Instructions completed so far.
    steps: u64,
}

impl Machine {
    /// Loads `image` into a fresh arena of `memory_size` bytes, printing to stdout.
    pub fn load(image: &Image, memory_size: usize) -> Result<Self, VMError> {
        Machine::with_output(image, memory_size, io::stdout())
    }
}

impl<W: Write> Machine<W> {
    /// Loads `image` into a fresh arena of `memory_size` bytes.
    ///
    /// The image must have a non-empty code section, an entry point inside it,
    /// and fit in the arena.
    pub fn with_output(image: &Image, memory_size: usize, out: W) -> Result<Self, VMError> {
        if image.code.is_empty() {
            return Err(VMError::InvalidImage {
                reason: "empty code section".to_string(),
            });
        }
        if image.entry >= image.code.len() as u64 {
            return Err(VMError::InvalidImage {
                reason: format!(
                    "entry point {} is outside the {}-byte code section",
                    image.entry,
                    image.code.len()
                ),
            });
        }
        if image.len() > memory_size {
            return Err(VMError::InvalidImage {
                reason: format!(
                    "{}-byte image does not fit in {memory_size} bytes of memory",
                    image.len()
                ),
            });
        }

        let mut memory = Memory::new(memory_size);
        memory.store(0, &image.to_bytes())?;

        let mut registers = Registers::new();
        registers.set(Register::Rip, image.entry_address());
        registers.set(Register::Rsp, memory_size as u64);
        registers.set(Register::Rmem, align_up(image.len() as u64, 8));

        debug!(
            "loaded {}-byte image: entry {:#x}, memory {} bytes, rmem {:#x}",
            image.len(),
            image.entry_address(),
            memory_size,
            registers.get(Register::Rmem)
        );

        Ok(Self {
            registers,
            memory,
            out,
            steps: 0,
        })
    }

    pub fn registers(&self) -> &Registers {
        &self.registers
    }

    pub fn register(&self, reg: Register) -> u64 {
        self.registers.get(reg)
    }

    pub fn memory(&self) -> &Memory {
        &self.memory
    }

    pub fn into_output(self) -> W {
        self.out
    }

    /// Number of instructions executed so far.
    pub fn steps(&self) -> u64 {
        self.steps
    }

    /// Decodes the instruction at `rip` without executing it.
    pub fn current_instruction(&self) -> Result<InstructionView<'_>, VMError> {
        InstructionView::new(self.memory.as_slice(), self.registers.get(Register::Rip))
    }

    /// True when the instruction at `rip` is a conditional jump that will be taken.
    pub fn will_jump(&self) -> bool {
        match self.current_instruction() {
            Ok(view) => jump_taken(view.opcode(), self.registers.get(Register::Rflag) as i64),
            Err(_) => false,
        }
    }

    /// Runs until `exit`.
    pub fn run(&mut self) -> Result<(), VMError> {
        while self.step()? == Step::Continue {}
        debug!("halted after {} instructions", self.steps);
        Ok(())
    }

    /// Executes exactly one instruction.
    pub fn step(&mut self) -> Result<Step, VMError> {
        let at = self.registers.get(Register::Rip);
        let (opcode, size, locations) = {
            let view = InstructionView::new(self.memory.as_slice(), at)?;
            let opcode = view.opcode();
            self.registers
                .set(Register::Rip, at.wrapping_add(opcode.encoded_length() as u64));

            let mut locations = [Location::Immediate(0); MAX_OPERANDS];
            for (slot, location) in locations.iter_mut().take(opcode.arity()).enumerate() {
                *location = self.resolve(&view.operand(slot)?);
            }
            (opcode, view.size(), locations)
        };

        let step = self.exec(opcode, size, &locations, at)?;
        self.steps += 1;
        Ok(step)
    }

    /// Maps a decoded operand to the location it denotes.
    fn resolve(&self, operand: &Operand) -> Location {
        match operand.value {
            OperandValue::Complex(c) => {
                Location::Memory(c.effective_address(|r| self.registers.get(r)))
            }
            OperandValue::Register(r) if operand.address => {
                Location::Memory(self.registers.get(r))
            }
            OperandValue::Register(r) => Location::Register(r),
            OperandValue::Immediate(v) if operand.address => Location::Memory(v),
            OperandValue::Immediate(v) => Location::Immediate(v),
        }
    }

    fn read(&self, location: Location, size: OperandSize) -> Result<u64, VMError> {
        match location {
            Location::Register(r) => Ok(self.registers.get(r) & size.mask()),
            Location::Memory(address) => self.memory.read(address, size.bytes()),
            Location::Immediate(v) => Ok(v & size.mask()),
        }
    }

    fn write(
        &mut self,
        location: Location,
        value: u64,
        size: OperandSize,
        at: u64,
    ) -> Result<(), VMError> {
        match location {
            Location::Register(r) => {
                self.registers.write_sized(r, value, size);
                Ok(())
            }
            Location::Memory(address) => self.memory.write(address, value, size.bytes()),
            Location::Immediate(_) => Err(VMError::ImmediateWrite { offset: at }),
        }
    }

    /// Executes a single decoded instruction. `rip` already points past it.
    fn exec(
        &mut self,
        opcode: Opcode,
        size: OperandSize,
        ops: &[Location; MAX_OPERANDS],
        at: u64,
    ) -> Result<Step, VMError> {
        let [a, b] = *ops;
        match opcode {
            Opcode::Push => self.op_push(size, a),
            Opcode::Pop => self.op_pop(size, a, at),
            Opcode::Mov => self.op_mov(size, a, b, at),
            Opcode::Jmp => self.op_jump(a),
            Opcode::Je | Opcode::Jne | Opcode::Jl | Opcode::Jg | Opcode::Jle | Opcode::Jge => {
                if jump_taken(opcode, self.registers.get(Register::Rflag) as i64) {
                    self.op_jump(a)
                } else {
                    Ok(())
                }
            }
            Opcode::Call => self.op_call(a),
            Opcode::Ret => self.op_ret(),
            Opcode::Add => self.op_binary(size, a, b, at, |x, y| Ok(x.wrapping_add(y))),
            Opcode::Sub => self.op_binary(size, a, b, at, |x, y| Ok(x.wrapping_sub(y))),
            Opcode::Mul => self.op_binary(size, a, b, at, |x, y| Ok(x.wrapping_mul(y))),
            Opcode::Div => self.op_binary(size, a, b, at, |x, y| {
                x.checked_div(y)
                    .ok_or(VMError::DivisionByZero { offset: at })
            }),
            Opcode::Mod => self.op_binary(size, a, b, at, |x, y| {
                x.checked_rem(y)
                    .ok_or(VMError::DivisionByZero { offset: at })
            }),
            Opcode::Inc => self.op_binary(size, a, Location::Immediate(1), at, |x, y| {
                Ok(x.wrapping_add(y))
            }),
            Opcode::Dec => self.op_binary(size, a, Location::Immediate(1), at, |x, y| {
                Ok(x.wrapping_sub(y))
            }),
            Opcode::Cmp => self.op_cmp(size, a, b),
            Opcode::Print => self.op_print(size, a),
            Opcode::Exit => return Ok(Step::Halt),
        }?;
        Ok(Step::Continue)
    }

    fn op_mov(
        &mut self,
        size: OperandSize,
        dst: Location,
        src: Location,
        at: u64,
    ) -> Result<(), VMError> {
        let value = self.read(src, size)?;
        self.write(dst, value, size, at)
    }

    fn op_push(&mut self, size: OperandSize, src: Location) -> Result<(), VMError> {
        let value = self.read(src, size)?;
        let rsp = self
            .registers
            .get(Register::Rsp)
            .wrapping_sub(size.bytes() as u64);
        self.memory.write(rsp, value, size.bytes())?;
        self.registers.set(Register::Rsp, rsp);
        Ok(())
    }

    fn op_pop(&mut self, size: OperandSize, dst: Location, at: u64) -> Result<(), VMError> {
        let rsp = self.registers.get(Register::Rsp);
        let value = self.memory.read(rsp, size.bytes())?;
        self.registers
            .set(Register::Rsp, rsp.wrapping_add(size.bytes() as u64));
        self.write(dst, value, size, at)
    }

    fn op_jump(&mut self, target: Location) -> Result<(), VMError> {
        let target = self.read(target, WORD)?;
        self.registers
            .set(Register::Rip, target.wrapping_add(HEADER_LEN as u64));
        Ok(())
    }

    fn op_call(&mut self, target: Location) -> Result<(), VMError> {
        let return_address = self.registers.get(Register::Rip);
        self.op_push(WORD, Location::Immediate(return_address))?;
        self.op_jump(target)
    }

    fn op_ret(&mut self) -> Result<(), VMError> {
        let rsp = self.registers.get(Register::Rsp);
        let return_address = self.memory.read(rsp, WORD.bytes())?;
        self.registers
            .set(Register::Rsp, rsp.wrapping_add(WORD.bytes() as u64));
        self.registers.set(Register::Rip, return_address);
        Ok(())
    }

    /// `dst := f(dst, src)`; nothing is written when `f` fails.
    fn op_binary(
        &mut self,
        size: OperandSize,
        dst: Location,
        src: Location,
        at: u64,
        f: impl Fn(u64, u64) -> Result<u64, VMError>,
    ) -> Result<(), VMError> {
        let lhs = self.read(dst, size)?;
        let rhs = self.read(src, size)?;
        let result = f(lhs, rhs)?;
        self.write(dst, result, size, at)
    }

    fn op_cmp(&mut self, size: OperandSize, lhs: Location, rhs: Location) -> Result<(), VMError> {
        let diff = self.read(lhs, size)?.wrapping_sub(self.read(rhs, size)?);
        self.registers
            .set(Register::Rflag, size.sign_extend(diff) as u64);
        Ok(())
    }

    fn op_print(&mut self, size: OperandSize, src: Location) -> Result<(), VMError> {
        let value = self.read(src, size)?;
        writeln!(self.out, "{value}").map_err(|source| VMError::IoError {
            path: "<output>".to_string(),
            source,
        })
    }
}
