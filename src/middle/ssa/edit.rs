use std::collections::BTreeMap;

use crate::middle::ssa::{BlockId, FunctionBody, Instruction, InstructionLocation};

/// Instruction edits recorded against locations of an unmodified body and
/// applied together. Locations stay meaningful while edits are queued, so a
/// traversal can record rewrites without invalidating its own iteration.
#[derive(Debug, Default, Clone)]
pub struct EditQueue {
    replacements: BTreeMap<InstructionLocation, Vec<Instruction>>,
    insertions: BTreeMap<InstructionLocation, Vec<Instruction>>,
}

impl EditQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        self.replacements.is_empty() && self.insertions.is_empty()
    }

    /// Replaces the instruction at `location` with `instructions`. A later
    /// replacement of the same location wins.
    pub fn replace(&mut self, location: InstructionLocation, instructions: Vec<Instruction>) {
        self.replacements.insert(location, instructions);
    }

    pub fn replace_with(&mut self, location: InstructionLocation, instruction: Instruction) {
        self.replace(location, vec![instruction]);
    }

    pub fn remove(&mut self, location: InstructionLocation) {
        self.replace(location, Vec::new());
    }

    /// Inserts `instructions` before the instruction at `location`. The offset
    /// may be the length of the block to append.
    pub fn insert_before(&mut self, location: InstructionLocation, instructions: Vec<Instruction>) {
        self.insertions
            .entry(location)
            .or_default()
            .extend(instructions);
    }

    /// Drops every edit recorded against one of `blocks`
    pub fn discard_in(&mut self, blocks: &[BlockId]) {
        self.replacements.retain(|l, _| !blocks.contains(&l.block));
        self.insertions.retain(|l, _| !blocks.contains(&l.block));
    }

    pub fn apply(self, body: &mut FunctionBody) {
        let Self {
            mut replacements,
            mut insertions,
        } = self;

        let mut locations = replacements
            .keys()
            .chain(insertions.keys())
            .copied()
            .collect::<Vec<_>>();
        locations.sort();
        locations.dedup();

        // Back to front so pending offsets in the same block stay valid
        for location in locations.into_iter().rev() {
            let block = body.block_mut(location.block);

            if let Some(replacement) = replacements.remove(&location) {
                block
                    .instructions
                    .splice(location.offset..location.offset + 1, replacement);
            }

            if let Some(inserted) = insertions.remove(&location) {
                block
                    .instructions
                    .splice(location.offset..location.offset, inserted);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;
    use crate::{
        frontend::intern::Symbol,
        middle::ssa::{Literal, Operand},
    };

    fn assign(name: &str, value: i64) -> Instruction {
        Instruction::Assign {
            destination: Symbol::new(name),
            source: Operand::Literal(Literal::Integer(value)),
        }
    }

    #[test]
    fn edits_use_original_offsets() {
        let mut body = FunctionBody::new(Symbol::new("f"), Vec::new(), Vec::new());
        let entry = body.add_block();
        for (i, name) in ["a", "b", "c"].iter().enumerate() {
            body.block_mut(entry).push(assign(name, i as i64));
        }

        let mut queue = EditQueue::new();
        queue.insert_before(InstructionLocation::new(entry, 0), vec![assign("start", 0)]);
        queue.replace(
            InstructionLocation::new(entry, 1),
            vec![assign("b1", 1), assign("b2", 2)],
        );
        queue.remove(InstructionLocation::new(entry, 2));
        queue.insert_before(InstructionLocation::new(entry, 2), vec![assign("before_c", 3)]);
        queue.insert_before(InstructionLocation::new(entry, 3), vec![assign("tail", 4)]);
        assert!(!queue.is_empty());

        queue.apply(&mut body);

        let names = body
            .block(BlockId::ENTRY)
            .instructions
            .iter()
            .flat_map(Instruction::outputs)
            .map(|s| s.value())
            .collect::<Vec<_>>();

        assert_eq!(names, ["start", "a", "b1", "b2", "before_c", "tail"]);
    }
}
