use colored::{ColoredString, Colorize};
use itertools::Itertools;

use crate::{
    frontend::intern::Symbol,
    index::Index,
    middle::ssa::{
        Block, BlockId, FunctionBody, Instruction, InstructionLocation, Literal, Module, Operand,
    },
};

/// Removes the colours from printed IR, leaving text the reader accepts
pub fn plain(printed: &str) -> String {
    strip_ansi_escapes::strip_str(printed)
}

fn variable(symbol: Symbol) -> ColoredString {
    symbol.value().yellow()
}

fn variables(symbols: &[Symbol]) -> String {
    symbols.iter().map(|s| variable(*s)).join(", ")
}

fn block(id: BlockId) -> ColoredString {
    id.to_string().bright_red()
}

fn destinations(f: &mut std::fmt::Formatter<'_>, symbols: &[Symbol]) -> std::fmt::Result {
    match symbols {
        [] => Ok(()),
        [single] => write!(f, "{} = ", variable(*single)),
        many => write!(f, "[{}] = ", variables(many)),
    }
}

impl core::fmt::Display for Module {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        for (i, function) in self.functions.iter().enumerate() {
            if i != 0 {
                writeln!(f)?;
            }

            write!(f, "{function}")?;
        }

        Ok(())
    }
}

impl FunctionBody {
    /// `function [y] = name(a: int32, b)`
    pub fn fmt_header(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} ", "function".magenta())?;

        if !self.outputs.is_empty() {
            write!(f, "[{}] = ", variables(&self.outputs))?;
        }

        let parameters = self
            .parameters
            .iter()
            .map(|p| match &p.ty {
                Some(ty) => format!("{}: {ty}", variable(p.name)),
                None => variable(p.name).to_string(),
            })
            .join(", ");

        writeln!(f, "{}({parameters})", self.name.value().blue())
    }

    pub fn fmt_blocks(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        for (id, b) in self.blocks.enumerate() {
            writeln!(f, "{}:", block(id))?;
            write!(f, "{b}")?;
        }

        Ok(())
    }
}

impl core::fmt::Display for FunctionBody {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        self.fmt_header(f)?;
        self.fmt_blocks(f)?;
        writeln!(f, "{}", "end".magenta())
    }
}

impl core::fmt::Display for Block {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        for instruction in &self.instructions {
            writeln!(f, "    {instruction}")?;
        }

        Ok(())
    }
}

impl core::fmt::Display for Instruction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Instruction::Assign {
                destination,
                source,
            } => write!(f, "{} = {source}", variable(*destination)),
            Instruction::Undefined { destination } => {
                write!(f, "{} = {}", variable(*destination), "!undefined".cyan())
            }
            Instruction::Call {
                destinations: outputs,
                function,
                arguments,
            }
            | Instruction::TypedCall {
                destinations: outputs,
                instance: function,
                arguments,
                ..
            } => {
                destinations(f, outputs)?;
                write!(
                    f,
                    "{} {}({})",
                    "call".cyan(),
                    function.value().blue(),
                    variables(arguments)
                )
            }
            Instruction::Branch {
                condition,
                then_block,
                else_block,
                end_block,
            } => write!(
                f,
                "{} {}, {}, {}, {}",
                "branch".cyan(),
                variable(*condition),
                block(*then_block),
                block(*else_block),
                block(*end_block)
            ),
            Instruction::For {
                induction,
                start,
                interval,
                end,
                body,
                exit,
            } => write!(
                f,
                "{} {} = {}, {}, {}, {}, {}",
                "for".cyan(),
                variable(*induction),
                variable(*start),
                variable(*interval),
                variable(*end),
                block(*body),
                block(*exit)
            ),
            Instruction::While { body, exit } => {
                write!(f, "{} {}, {}", "while".cyan(), block(*body), block(*exit))
            }
            Instruction::Break => write!(f, "{}", "break".cyan()),
            Instruction::Continue => write!(f, "{}", "continue".cyan()),
            Instruction::Phi {
                destination,
                sources,
            } => write!(
                f,
                "{} = {} {}",
                variable(*destination),
                "phi".bright_green(),
                sources
                    .iter()
                    .map(|(b, s)| format!("{}:{}", block(*b), variable(*s)))
                    .join(", ")
            ),
            Instruction::MatrixGet {
                destination,
                matrix,
                indices,
            } => write!(
                f,
                "{} = {} {}({})",
                variable(*destination),
                "get".cyan(),
                variable(*matrix),
                variables(indices)
            ),
            Instruction::SimpleGet {
                destination,
                matrix,
                indices,
            } => write!(
                f,
                "{} = {} {}({})",
                variable(*destination),
                "simple_get".cyan(),
                variable(*matrix),
                variables(indices)
            ),
            Instruction::MatrixSet {
                destination,
                matrix,
                indices,
                value,
            } => write!(
                f,
                "{} = {} {}({}), {}",
                variable(*destination),
                "set".cyan(),
                variable(*matrix),
                variables(indices),
                variable(*value)
            ),
            Instruction::SimpleSet {
                destination,
                matrix,
                indices,
                value,
            } => write!(
                f,
                "{} = {} {}({}), {}",
                variable(*destination),
                "simple_set".cyan(),
                variable(*matrix),
                variables(indices),
                variable(*value)
            ),
            Instruction::End {
                destination,
                matrix,
                index,
                num_indices,
            } => write!(
                f,
                "{} = {} {}, {}, {}",
                variable(*destination),
                "end".cyan(),
                variable(*matrix),
                index.to_string().purple(),
                num_indices.to_string().purple()
            ),
            Instruction::ValidateTrue { condition } => {
                write!(f, "{} {}", "validate_true".cyan(), variable(*condition))
            }
        }
    }
}

impl core::fmt::Display for Operand {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Operand::Variable(symbol) => write!(f, "{}", variable(*symbol)),
            Operand::Literal(literal) => write!(f, "{}", literal.to_string().purple()),
        }
    }
}

impl core::fmt::Display for Literal {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Literal::Integer(value) => write!(f, "{value}"),
            // Keep the decimal point so the literal reads back as a float
            Literal::Float(value) if value.is_finite() && value.fract() == 0.0 => {
                write!(f, "{value:.1}")
            }
            Literal::Float(value) => write!(f, "{value}"),
        }
    }
}

impl core::fmt::Display for BlockId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "#{}", self.index())
    }
}

impl core::fmt::Display for InstructionLocation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}", self.block, self.offset)
    }
}
