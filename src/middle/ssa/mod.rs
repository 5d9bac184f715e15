//! SSA (Static Single Assignment) form of a function body. Control flow is
//! structured: a block ends with at most one instruction that owns other
//! blocks (branch, for, while), and the continuation of a structured
//! construct is itself an owned block. Every variable is defined by exactly
//! one instruction, values flowing together are merged by `phi` instructions
//! at the top of join and loop body blocks.

use std::collections::BTreeMap;

use hashbrown::{HashMap, HashSet};
use thiserror::Error;

use crate::{
    frontend::intern::Symbol,
    index::{IndexVec, simple_index},
    middle::ty::{FunctionType, VariableType},
};

pub mod edit;
pub mod pretty_print;

#[derive(Debug, Clone, PartialEq, Error)]
pub enum IrError {
    #[error("block {block} is referenced at {location} but does not exist")]
    MissingBlock {
        block: BlockId,
        location: InstructionLocation,
    },
    #[error("block {block} is owned by both {first} and {second}")]
    BlockOwnedTwice {
        block: BlockId,
        first: InstructionLocation,
        second: InstructionLocation,
    },
    #[error("the entry block can not be owned by {location}")]
    EntryBlockOwned { location: InstructionLocation },
    #[error("block {block} is unreachable")]
    UnreachableBlock { block: BlockId },
    #[error("variable {variable} is defined at both {first} and {second}")]
    DuplicateDefinition {
        variable: Symbol,
        first: InstructionLocation,
        second: InstructionLocation,
    },
    #[error("parameter {variable} is redefined at {location}")]
    ParameterRedefined {
        variable: Symbol,
        location: InstructionLocation,
    },
    #[error("control flow instruction at {location} is not the last of its block")]
    MisplacedEnding { location: InstructionLocation },
}

#[derive(Debug, Clone, Default)]
pub struct Module {
    pub functions: Vec<FunctionBody>,
}

impl Module {
    pub fn function(&self, name: Symbol) -> Option<&FunctionBody> {
        self.functions.iter().find(|f| f.name == name)
    }

    pub fn validate(&self) -> Result<(), IrError> {
        self.functions.iter().try_for_each(FunctionBody::validate)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Parameter {
    pub name: Symbol,
    /// Declared type, used when the caller does not supply one
    pub ty: Option<VariableType>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct FunctionBody {
    pub name: Symbol,
    pub parameters: Vec<Parameter>,
    /// Variables holding the returned values, in order
    pub outputs: Vec<Symbol>,
    pub blocks: IndexVec<BlockId, Block>,
    next_temporary: usize,
}

simple_index! {
    /// Identifies a block within its function body. Block 0 is the entry.
    pub struct BlockId;
}

impl BlockId {
    pub const ENTRY: Self = Self(0);
}

/// Position of an instruction in a function body
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct InstructionLocation {
    pub block: BlockId,
    pub offset: usize,
}

impl InstructionLocation {
    pub fn new(block: BlockId, offset: usize) -> Self {
        Self { block, offset }
    }
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct Block {
    pub instructions: Vec<Instruction>,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Literal {
    Integer(i64),
    Float(f64),
}

impl Literal {
    pub fn value(&self) -> f64 {
        match self {
            Literal::Integer(value) => *value as f64,
            Literal::Float(value) => *value,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Operand {
    Variable(Symbol),
    Literal(Literal),
}

#[derive(Debug, Clone, PartialEq)]
pub enum Instruction {
    /// x = y
    /// x = 1.5
    Assign {
        destination: Symbol,
        source: Operand,
    },
    /// x = !undefined
    ///
    /// Declares a variable without a value. It stays untyped.
    Undefined { destination: Symbol },
    /// [a, b] = call f(x, y)
    ///
    /// Call which has not been resolved to a concrete instance yet
    Call {
        destinations: Vec<Symbol>,
        function: Symbol,
        arguments: Vec<Symbol>,
    },
    /// Call to a resolved instance such as `plus_ii`
    TypedCall {
        destinations: Vec<Symbol>,
        instance: Symbol,
        function_type: FunctionType,
        arguments: Vec<Symbol>,
    },
    /// branch c, #1, #2, #3
    Branch {
        condition: Symbol,
        then_block: BlockId,
        else_block: BlockId,
        end_block: BlockId,
    },
    /// for i = start, interval, end, #body, #exit
    ///
    /// Counted loop. Phis at the top of the body merge the values coming from
    /// the block holding this instruction with the values at the end of the
    /// body.
    For {
        induction: Symbol,
        start: Symbol,
        interval: Symbol,
        end: Symbol,
        body: BlockId,
        exit: BlockId,
    },
    /// while #body, #exit
    ///
    /// Loop left through `break`
    While { body: BlockId, exit: BlockId },
    Break,
    Continue,
    /// x = phi #0:a, #1:b
    Phi {
        destination: Symbol,
        sources: BTreeMap<BlockId, Symbol>,
    },
    /// x = get A(i, j)
    ///
    /// Bounds-checked element or range read
    MatrixGet {
        destination: Symbol,
        matrix: Symbol,
        indices: Vec<Symbol>,
    },
    /// x = simple_get A(i, j)
    ///
    /// Element read whose indices are known to be in bounds
    SimpleGet {
        destination: Symbol,
        matrix: Symbol,
        indices: Vec<Symbol>,
    },
    /// B = set A(i, j), v
    ///
    /// Element write which grows the array when needed
    MatrixSet {
        destination: Symbol,
        matrix: Symbol,
        indices: Vec<Symbol>,
        value: Symbol,
    },
    /// B = simple_set A(i, j), v
    ///
    /// Element write into storage which is known to be large enough
    SimpleSet {
        destination: Symbol,
        matrix: Symbol,
        indices: Vec<Symbol>,
        value: Symbol,
    },
    /// x = end A, 0, 2
    ///
    /// Value of `end` at index position `index` of an access with
    /// `num_indices` indices
    End {
        destination: Symbol,
        matrix: Symbol,
        index: usize,
        num_indices: usize,
    },
    /// validate_true c
    ///
    /// Aborts execution when the condition is false
    ValidateTrue { condition: Symbol },
}

impl Instruction {
    pub fn outputs(&self) -> Vec<Symbol> {
        match self {
            Instruction::Assign { destination, .. }
            | Instruction::Undefined { destination }
            | Instruction::Phi { destination, .. }
            | Instruction::MatrixGet { destination, .. }
            | Instruction::SimpleGet { destination, .. }
            | Instruction::MatrixSet { destination, .. }
            | Instruction::SimpleSet { destination, .. }
            | Instruction::End { destination, .. } => vec![*destination],
            Instruction::Call { destinations, .. } | Instruction::TypedCall { destinations, .. } => {
                destinations.clone()
            }
            Instruction::For { induction, .. } => vec![*induction],
            Instruction::Branch { .. }
            | Instruction::While { .. }
            | Instruction::Break
            | Instruction::Continue
            | Instruction::ValidateTrue { .. } => Vec::new(),
        }
    }

    pub fn inputs(&self) -> Vec<Symbol> {
        match self {
            Instruction::Assign {
                source: Operand::Variable(source),
                ..
            } => vec![*source],
            Instruction::Assign { .. }
            | Instruction::Undefined { .. }
            | Instruction::While { .. }
            | Instruction::Break
            | Instruction::Continue => Vec::new(),
            Instruction::Call { arguments, .. } | Instruction::TypedCall { arguments, .. } => {
                arguments.clone()
            }
            Instruction::Branch { condition, .. } | Instruction::ValidateTrue { condition } => {
                vec![*condition]
            }
            Instruction::For {
                start,
                interval,
                end,
                ..
            } => vec![*start, *interval, *end],
            Instruction::Phi { sources, .. } => sources.values().copied().collect(),
            Instruction::MatrixGet {
                matrix, indices, ..
            }
            | Instruction::SimpleGet {
                matrix, indices, ..
            } => std::iter::once(*matrix)
                .chain(indices.iter().copied())
                .collect(),
            Instruction::MatrixSet {
                matrix,
                indices,
                value,
                ..
            }
            | Instruction::SimpleSet {
                matrix,
                indices,
                value,
                ..
            } => std::iter::once(*matrix)
                .chain(indices.iter().copied())
                .chain(std::iter::once(*value))
                .collect(),
            Instruction::End { matrix, .. } => vec![*matrix],
        }
    }

    /// Whether the instruction does something besides defining its outputs.
    /// Instructions without side effects may be removed when their outputs
    /// are unused, or recomputed elsewhere.
    pub fn has_side_effects(&self) -> bool {
        match self {
            Instruction::Assign { .. }
            | Instruction::Undefined { .. }
            | Instruction::Phi { .. }
            | Instruction::SimpleGet { .. }
            | Instruction::End { .. } => false,
            Instruction::TypedCall { function_type, .. } => !function_type.pure,
            Instruction::Call { .. }
            | Instruction::Branch { .. }
            | Instruction::For { .. }
            | Instruction::While { .. }
            | Instruction::Break
            | Instruction::Continue
            | Instruction::MatrixGet { .. }
            | Instruction::MatrixSet { .. }
            | Instruction::SimpleSet { .. }
            | Instruction::ValidateTrue { .. } => true,
        }
    }

    /// Control flow instructions which must terminate their block
    pub fn is_ending(&self) -> bool {
        matches!(
            self,
            Instruction::Branch { .. }
                | Instruction::For { .. }
                | Instruction::While { .. }
                | Instruction::Break
                | Instruction::Continue
        )
    }

    /// Blocks whose execution is controlled by this instruction, the
    /// continuation last
    pub fn owned_blocks(&self) -> Vec<BlockId> {
        match self {
            Instruction::Branch {
                then_block,
                else_block,
                end_block,
                ..
            } => vec![*then_block, *else_block, *end_block],
            Instruction::For { body, exit, .. } | Instruction::While { body, exit } => {
                vec![*body, *exit]
            }
            _ => Vec::new(),
        }
    }

    /// Block where execution continues after the structured construct
    pub fn continuation(&self) -> Option<BlockId> {
        match self {
            Instruction::Branch { end_block, .. } => Some(*end_block),
            Instruction::For { exit, .. } | Instruction::While { exit, .. } => Some(*exit),
            _ => None,
        }
    }

    /// Substitutes every variable, input or output, found in `renames`
    pub fn rename_variables(&mut self, renames: &HashMap<Symbol, Symbol>) {
        let rename = |symbol: &mut Symbol| {
            if let Some(new) = renames.get(symbol) {
                *symbol = *new;
            }
        };

        match self {
            Instruction::Assign {
                destination,
                source,
            } => {
                rename(destination);
                if let Operand::Variable(source) = source {
                    rename(source);
                }
            }
            Instruction::Undefined { destination } => rename(destination),
            Instruction::Call {
                destinations,
                arguments,
                ..
            }
            | Instruction::TypedCall {
                destinations,
                arguments,
                ..
            } => {
                destinations.iter_mut().for_each(rename);
                arguments.iter_mut().for_each(rename);
            }
            Instruction::Branch { condition, .. } | Instruction::ValidateTrue { condition } => {
                rename(condition)
            }
            Instruction::For {
                induction,
                start,
                interval,
                end,
                ..
            } => {
                rename(induction);
                rename(start);
                rename(interval);
                rename(end);
            }
            Instruction::While { .. } | Instruction::Break | Instruction::Continue => {}
            Instruction::Phi {
                destination,
                sources,
            } => {
                rename(destination);
                sources.values_mut().for_each(rename);
            }
            Instruction::MatrixGet {
                destination,
                matrix,
                indices,
            }
            | Instruction::SimpleGet {
                destination,
                matrix,
                indices,
            } => {
                rename(destination);
                rename(matrix);
                indices.iter_mut().for_each(rename);
            }
            Instruction::MatrixSet {
                destination,
                matrix,
                indices,
                value,
            }
            | Instruction::SimpleSet {
                destination,
                matrix,
                indices,
                value,
            } => {
                rename(destination);
                rename(matrix);
                indices.iter_mut().for_each(rename);
                rename(value);
            }
            Instruction::End {
                destination,
                matrix,
                ..
            } => {
                rename(destination);
                rename(matrix);
            }
        }
    }

    /// Substitutes variables only where they are read
    pub fn rename_inputs(&mut self, renames: &HashMap<Symbol, Symbol>) {
        let outputs = self.outputs();
        let filtered = renames
            .iter()
            .filter(|(from, _)| !outputs.contains(from))
            .map(|(from, to)| (*from, *to))
            .collect::<HashMap<_, _>>();

        self.rename_variables(&filtered);
    }
}

impl Block {
    pub fn push(&mut self, instruction: Instruction) {
        self.instructions.push(instruction);
    }

    pub fn insert(&mut self, offset: usize, instruction: Instruction) {
        self.instructions.insert(offset, instruction);
    }

    pub fn replace(&mut self, offset: usize, instruction: Instruction) -> Instruction {
        std::mem::replace(&mut self.instructions[offset], instruction)
    }

    pub fn remove(&mut self, offset: usize) -> Instruction {
        self.instructions.remove(offset)
    }

    pub fn ending_instruction(&self) -> Option<&Instruction> {
        self.instructions.last().filter(|i| i.is_ending())
    }

    /// Offset where instructions executing right before control leaves the
    /// block must be inserted
    pub fn ending_offset(&self) -> usize {
        match self.ending_instruction() {
            Some(_) => self.instructions.len() - 1,
            None => self.instructions.len(),
        }
    }

    pub fn owned_blocks(&self) -> Vec<BlockId> {
        self.ending_instruction()
            .map(Instruction::owned_blocks)
            .unwrap_or_default()
    }
}

impl FunctionBody {
    pub fn new(name: Symbol, parameters: Vec<Parameter>, outputs: Vec<Symbol>) -> Self {
        Self {
            name,
            parameters,
            outputs,
            blocks: IndexVec::new(),
            next_temporary: 1,
        }
    }

    pub fn add_block(&mut self) -> BlockId {
        self.blocks.push(Block::default())
    }

    pub fn block(&self, id: BlockId) -> &Block {
        &self.blocks[id]
    }

    pub fn block_mut(&mut self, id: BlockId) -> &mut Block {
        &mut self.blocks[id]
    }

    pub fn instruction(&self, location: InstructionLocation) -> Option<&Instruction> {
        self.blocks
            .get(location.block)
            .and_then(|b| b.instructions.get(location.offset))
    }

    /// Every instruction of the body with its location, in block order
    pub fn instructions(&self) -> impl Iterator<Item = (InstructionLocation, &Instruction)> {
        self.blocks.enumerate().flat_map(|(block, b)| {
            b.instructions
                .iter()
                .enumerate()
                .map(move |(offset, i)| (InstructionLocation::new(block, offset), i))
        })
    }

    pub fn parameter_names(&self) -> impl Iterator<Item = Symbol> + '_ {
        self.parameters.iter().map(|p| p.name)
    }

    /// Every variable named by a parameter, an output or an instruction
    pub fn variables(&self) -> HashSet<Symbol> {
        let mut variables = self
            .parameter_names()
            .chain(self.outputs.iter().copied())
            .collect::<HashSet<_>>();

        for (_, instruction) in self.instructions() {
            variables.extend(instruction.outputs());
            variables.extend(instruction.inputs());
        }

        variables
    }

    /// Creates a fresh variable named `$semantics$N`
    pub fn make_temporary(&mut self, semantics: &str) -> Symbol {
        let existing = self.variables();

        loop {
            let candidate = Symbol::new(&format!("${semantics}${}", self.next_temporary));
            self.next_temporary += 1;

            if !existing.contains(&candidate) {
                return candidate;
            }
        }
    }

    /// Last block of the chain of continuations starting at `block`. Control
    /// leaving `block` leaves the function or the enclosing construct from
    /// there.
    pub fn block_end(&self, mut block: BlockId) -> BlockId {
        while let Some(next) = self
            .block(block)
            .ending_instruction()
            .and_then(Instruction::continuation)
        {
            block = next;
        }

        block
    }

    /// `block` and every block transitively owned by it
    pub fn contained_blocks(&self, block: BlockId) -> Vec<BlockId> {
        let mut blocks = vec![block];
        let mut index = 0;

        while let Some(current) = blocks.get(index).copied() {
            blocks.extend(self.block(current).owned_blocks());
            index += 1;
        }

        blocks
    }

    /// Variables defined in `block` or any block it contains
    pub fn declared_in_contained_blocks(&self, block: BlockId) -> HashSet<Symbol> {
        self.contained_blocks(block)
            .into_iter()
            .flat_map(|b| self.block(b).instructions.iter().flat_map(Instruction::outputs))
            .collect()
    }

    pub fn find_declaration(&self, variable: Symbol) -> Option<InstructionLocation> {
        self.instructions()
            .find(|(_, i)| i.outputs().contains(&variable))
            .map(|(location, _)| location)
    }

    /// Block holding the structured instruction which owns `block`
    pub fn owner_of(&self, block: BlockId) -> Option<BlockId> {
        self.blocks
            .enumerate()
            .find(|(_, b)| b.owned_blocks().contains(&block))
            .map(|(id, _)| id)
    }

    /// Makes every phi which merges a value coming from `from` take it from
    /// `to` instead
    pub fn redirect_phi_sources(&mut self, from: BlockId, to: BlockId) {
        for block in self.blocks.iter_mut() {
            for instruction in &mut block.instructions {
                if let Instruction::Phi { sources, .. } = instruction {
                    if let Some(source) = sources.remove(&from) {
                        sources.insert(to, source);
                    }
                }
            }
        }
    }

    /// Applies `renames` to every instruction and to the output list
    pub fn rename_variables(&mut self, renames: &HashMap<Symbol, Symbol>) {
        for block in self.blocks.iter_mut() {
            for instruction in &mut block.instructions {
                instruction.rename_variables(renames);
            }
        }

        for output in &mut self.outputs {
            if let Some(new) = renames.get(output) {
                *output = *new;
            }
        }
    }

    /// Checks that the structured control flow forms a tree rooted at the
    /// entry block and that every variable is defined once
    pub fn validate(&self) -> Result<(), IrError> {
        let mut owners = HashMap::<BlockId, InstructionLocation>::new();
        let mut definitions = HashMap::<Symbol, InstructionLocation>::new();
        let parameters = self.parameter_names().collect::<HashSet<_>>();

        for (location, instruction) in self.instructions() {
            let block_length = self.block(location.block).instructions.len();
            if instruction.is_ending() && location.offset + 1 != block_length {
                return Err(IrError::MisplacedEnding { location });
            }

            for owned in instruction.owned_blocks() {
                if self.blocks.get(owned).is_none() {
                    return Err(IrError::MissingBlock {
                        block: owned,
                        location,
                    });
                }

                if owned == BlockId::ENTRY {
                    return Err(IrError::EntryBlockOwned { location });
                }

                if let Some(first) = owners.insert(owned, location) {
                    return Err(IrError::BlockOwnedTwice {
                        block: owned,
                        first,
                        second: location,
                    });
                }
            }

            if let Instruction::Phi { sources, .. } = instruction {
                if let Some(missing) = sources.keys().find(|b| self.blocks.get(**b).is_none()) {
                    return Err(IrError::MissingBlock {
                        block: *missing,
                        location,
                    });
                }
            }

            for output in instruction.outputs() {
                if parameters.contains(&output) {
                    return Err(IrError::ParameterRedefined {
                        variable: output,
                        location,
                    });
                }

                if let Some(first) = definitions.insert(output, location) {
                    return Err(IrError::DuplicateDefinition {
                        variable: output,
                        first,
                        second: location,
                    });
                }
            }
        }

        let reachable = self.contained_blocks(BlockId::ENTRY);
        if let Some(unreachable) = self.blocks.indices().find(|b| !reachable.contains(b)) {
            return Err(IrError::UnreachableBlock { block: unreachable });
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;
    use crate::index::Index;

    fn sym(name: &str) -> Symbol {
        Symbol::new(name)
    }

    fn counted_loop() -> FunctionBody {
        let mut body = FunctionBody::new(
            sym("f"),
            vec![Parameter {
                name: sym("n$1"),
                ty: None,
            }],
            vec![sym("y$ret")],
        );
        let entry = body.add_block();
        let loop_body = body.add_block();
        let exit = body.add_block();

        body.block_mut(entry).push(Instruction::Assign {
            destination: sym("$one$1"),
            source: Operand::Literal(Literal::Integer(1)),
        });
        body.block_mut(entry).push(Instruction::For {
            induction: sym("i$1"),
            start: sym("$one$1"),
            interval: sym("$one$1"),
            end: sym("n$1"),
            body: loop_body,
            exit,
        });
        body.block_mut(loop_body).push(Instruction::Assign {
            destination: sym("x$1"),
            source: Operand::Variable(sym("i$1")),
        });
        body.block_mut(exit).push(Instruction::Assign {
            destination: sym("y$ret"),
            source: Operand::Variable(sym("n$1")),
        });

        body
    }

    #[test]
    fn instruction_contract() {
        let set = Instruction::MatrixSet {
            destination: sym("y$3"),
            matrix: sym("y$2"),
            indices: vec![sym("i$1")],
            value: sym("v$1"),
        };

        assert_eq!(set.outputs(), vec![sym("y$3")]);
        assert_eq!(set.inputs(), vec![sym("y$2"), sym("i$1"), sym("v$1")]);
        assert!(set.has_side_effects());

        let get = Instruction::SimpleGet {
            destination: sym("x$1"),
            matrix: sym("A$1"),
            indices: vec![sym("i$1")],
        };
        assert!(!get.has_side_effects());
    }

    #[test]
    fn renaming_reaches_every_operand() {
        let mut set = Instruction::MatrixSet {
            destination: sym("y$3"),
            matrix: sym("y$2"),
            indices: vec![sym("y$2")],
            value: sym("y$2"),
        };
        let renames = HashMap::from([(sym("y$2"), sym("z$1")), (sym("y$3"), sym("z$2"))]);

        let mut inputs_only = set.clone();
        set.rename_variables(&renames);
        inputs_only.rename_inputs(&renames);

        assert_eq!(set.outputs(), vec![sym("z$2")]);
        assert_eq!(set.inputs(), vec![sym("z$1"); 3]);
        assert_eq!(inputs_only.outputs(), vec![sym("y$3")]);
    }

    #[test]
    fn block_editing() {
        let mut block = Block::default();
        block.push(Instruction::Break);
        assert_eq!(block.ending_offset(), 0);

        block.insert(
            0,
            Instruction::Undefined {
                destination: sym("a$1"),
            },
        );
        assert_eq!(block.ending_offset(), 1);

        let old = block.replace(
            0,
            Instruction::Undefined {
                destination: sym("b$1"),
            },
        );
        assert_eq!(old.outputs(), vec![sym("a$1")]);
        assert_eq!(block.remove(1), Instruction::Break);
        assert!(block.ending_instruction().is_none());
    }

    #[test]
    fn structure_queries() {
        let body = counted_loop();

        assert_eq!(body.validate(), Ok(()));
        assert_eq!(body.block_end(BlockId::ENTRY), BlockId::new(2));
        assert_eq!(body.owner_of(BlockId::new(1)), Some(BlockId::ENTRY));
        assert_eq!(
            body.declared_in_contained_blocks(BlockId::new(1)),
            HashSet::from([sym("x$1")])
        );
        assert_eq!(
            body.find_declaration(sym("i$1")),
            Some(InstructionLocation::new(BlockId::ENTRY, 1))
        );
    }

    #[test]
    fn phi_sources_follow_a_split_block() {
        let mut body = counted_loop();
        body.block_mut(BlockId::new(2)).instructions.insert(
            0,
            Instruction::Phi {
                destination: sym("x$2"),
                sources: BTreeMap::from([(BlockId::ENTRY, sym("n$1")), (BlockId::new(1), sym("x$1"))]),
            },
        );

        body.redirect_phi_sources(BlockId::ENTRY, BlockId::new(3));

        let Instruction::Phi { sources, .. } = &body.block(BlockId::new(2)).instructions[0] else {
            panic!("expected the phi to stay first");
        };
        assert_eq!(
            sources.keys().copied().collect::<Vec<_>>(),
            [BlockId::new(1), BlockId::new(3)]
        );
    }

    #[test]
    fn temporaries_are_fresh() {
        let mut body = counted_loop();

        let first = body.make_temporary("one");
        let second = body.make_temporary("one");

        assert_ne!(first, sym("$one$1"));
        assert_ne!(first, second);
        assert_eq!(first.base_name(), "one");
    }

    #[test]
    fn validation_failures() {
        let mut body = counted_loop();
        body.block_mut(BlockId::new(2)).push(Instruction::Assign {
            destination: sym("x$1"),
            source: Operand::Literal(Literal::Float(0.5)),
        });
        assert!(matches!(
            body.validate(),
            Err(IrError::DuplicateDefinition { .. })
        ));

        let mut body = counted_loop();
        body.add_block();
        assert_eq!(
            body.validate(),
            Err(IrError::UnreachableBlock {
                block: BlockId::new(3)
            })
        );

        let mut body = counted_loop();
        body.block_mut(BlockId::ENTRY).push(Instruction::Continue);
        assert!(matches!(
            body.validate(),
            Err(IrError::MisplacedEnding { .. })
        ));
    }
}
