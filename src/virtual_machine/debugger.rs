//! Non-interactive execution tracer.
//!
//! Before every step the [`Tracer`] prints the register file, highlighting
//! registers that changed since the previous step, followed by the address,
//! raw bytes and disassembly of the instruction about to run.

use crate::virtual_machine::disassembler::format_instruction;
use crate::virtual_machine::errors::VMError;
use crate::virtual_machine::operand::{REGISTER_COUNT, Register};
use crate::virtual_machine::vm::{Machine, Step};
use std::io::{self, Write};
use termcolor::{Color, ColorSpec, WriteColor};

pub struct Tracer<T: WriteColor> {
    out: T,
    previous: Option<[u64; REGISTER_COUNT]>,
}

impl<T: WriteColor> Tracer<T> {
    pub fn new(out: T) -> Self {
        Self {
            out,
            previous: None,
        }
    }

    pub fn into_inner(self) -> T {
        self.out
    }

    /// Prints the machine state ahead of its next step.
    pub fn trace<W: Write>(&mut self, machine: &Machine<W>) -> io::Result<()> {
        let current = machine.registers().snapshot();
        let mut changed = ColorSpec::new();
        changed.set_fg(Some(Color::Green)).set_bold(true);

        for (i, reg) in Register::ALL.iter().enumerate() {
            if i > 0 {
                write!(self.out, "  ")?;
            }
            let highlight = self.previous.is_some_and(|prev| prev[i] != current[i]);
            if highlight {
                self.out.set_color(&changed)?;
            }
            write!(self.out, "{}={:#x}", reg.name(), current[i])?;
            if highlight {
                self.out.reset()?;
            }
        }
        writeln!(self.out)?;
        self.previous = Some(current);

        let rip = machine.register(Register::Rip);
        match machine
            .current_instruction()
            .and_then(|view| Ok((view, view.to_instruction()?)))
        {
            Ok((view, instruction)) => {
                write!(self.out, "{rip:#06x}:")?;
                for byte in view.bytes() {
                    write!(self.out, " {byte:02x}")?;
                }
                write!(self.out, "  {}", format_instruction(&instruction))?;
                if machine.will_jump() {
                    self.out
                        .set_color(ColorSpec::new().set_fg(Some(Color::Yellow)))?;
                    write!(self.out, " (will jump)")?;
                    self.out.reset()?;
                }
                writeln!(self.out)
            }
            Err(err) => {
                self.out
                    .set_color(ColorSpec::new().set_fg(Some(Color::Red)).set_bold(true))?;
                write!(self.out, "{rip:#06x}: <{err}>")?;
                self.out.reset()?;
                writeln!(self.out)
            }
        }
    }
}

/// Runs `machine` to halt, tracing before every step.
pub fn run_traced<W: Write, T: WriteColor>(
    machine: &mut Machine<W>,
    tracer: &mut Tracer<T>,
) -> Result<(), VMError> {
    loop {
        tracer.trace(machine).map_err(|source| VMError::IoError {
            path: "<trace>".to_string(),
            source,
        })?;
        if machine.step()? == Step::Halt {
            return Ok(());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::utils::test_utils::utils::load_source;
    use termcolor::Buffer;

    fn trace_text(source: &str) -> String {
        let mut machine = load_source(source).unwrap();
        let mut tracer = Tracer::new(Buffer::no_color());
        run_traced(&mut machine, &mut tracer).unwrap();
        String::from_utf8(tracer.into_inner().into_inner()).unwrap()
    }

    #[test]
    fn traces_every_step() {
        let text = trace_text("mov r0 5\nexit");
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines.len(), 4);
        assert!(lines[0].starts_with("r0=0x0  r1=0x0"));
        assert!(lines[0].contains("rip=0x10"));
        assert!(lines[1].starts_with("0x0010: 04 08 06 05"));
        assert!(lines[1].ends_with("  mov r0, 5"));
        assert!(lines[2].starts_with("r0=0x5"));
        assert!(lines[3].ends_with("exit"));
    }

    #[test]
    fn marks_taken_jumps() {
        let text = trace_text("cmp 1 1\nje end\nend:\nexit");
        assert!(text.contains("je 40 (will jump)"));
        let not_taken = trace_text("cmp 1 2\nje end\nend:\nexit");
        assert!(!not_taken.contains("(will jump)"));
    }

    #[test]
    fn reports_undecodable_instruction() {
        let mut machine = load_source("mov r0 1").unwrap();
        let mut tracer = Tracer::new(Buffer::no_color());
        assert!(run_traced(&mut machine, &mut tracer).is_err());
        let text = String::from_utf8(tracer.into_inner().into_inner()).unwrap();
        assert!(text.contains("0x0028: <invalid operand size 0"));
    }
}
