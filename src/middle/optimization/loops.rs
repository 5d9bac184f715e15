//! Structure of the counted loops of a function body.

use hashbrown::HashSet;

use crate::{
    frontend::intern::Symbol,
    middle::{
        inference::context::TypeMap,
        ssa::{BlockId, FunctionBody, Instruction, InstructionLocation},
    },
};

/// A `for` instruction and the loops enclosing it
#[derive(Debug, Clone, PartialEq)]
pub struct ForLoop {
    /// Block ending with the `for` instruction
    pub container: BlockId,
    pub induction: Symbol,
    pub start: Symbol,
    pub interval: Symbol,
    pub end: Symbol,
    pub body: BlockId,
    pub exit: BlockId,
    /// Containers of the enclosing `for` loops, innermost first. The chain
    /// stops at an enclosing `while`.
    pub nesting: Vec<BlockId>,
}

impl ForLoop {
    pub fn location(&self, body: &FunctionBody) -> InstructionLocation {
        InstructionLocation::new(self.container, body.block(self.container).ending_offset())
    }

    /// This loop followed by its enclosing loops
    pub fn maximum_nesting(&self) -> Vec<BlockId> {
        std::iter::once(self.container)
            .chain(self.nesting.iter().copied())
            .collect()
    }
}

pub fn for_loop_in(body: &FunctionBody, container: BlockId) -> Option<ForLoop> {
    let Some(Instruction::For {
        induction,
        start,
        interval,
        end,
        body: loop_body,
        exit,
    }) = body.block(container).ending_instruction()
    else {
        return None;
    };

    Some(ForLoop {
        container,
        induction: *induction,
        start: *start,
        interval: *interval,
        end: *end,
        body: *loop_body,
        exit: *exit,
        nesting: Vec::new(),
    })
}

/// Every `for` loop of `body`, each enclosing loop listed before the loops
/// it contains
pub fn for_loops(body: &FunctionBody) -> Vec<ForLoop> {
    let mut loops = Vec::new();
    let mut pending = vec![(BlockId::ENTRY, Vec::<BlockId>::new())];

    while let Some((block, nesting)) = pending.pop() {
        match body.block(block).ending_instruction() {
            Some(Instruction::For {
                body: loop_body,
                exit,
                ..
            }) => {
                if let Some(mut found) = for_loop_in(body, block) {
                    found.nesting = nesting.iter().rev().copied().collect();
                    loops.push(found);
                }

                let mut inner = nesting.clone();
                inner.push(block);

                pending.push((*exit, nesting));
                pending.push((*loop_body, inner));
            }
            Some(Instruction::While {
                body: loop_body,
                exit,
            }) => {
                pending.push((*exit, nesting));
                pending.push((*loop_body, Vec::new()));
            }
            Some(ending) => {
                for owned in ending.owned_blocks().into_iter().rev() {
                    pending.push((owned, nesting.clone()));
                }
            }
            None => {}
        }
    }

    loops
}

/// End values and induction variables of the loops ending `containers`
pub fn sizes_and_iterations(body: &FunctionBody, containers: &[BlockId]) -> (Vec<Symbol>, Vec<Symbol>) {
    containers
        .iter()
        .filter_map(|container| for_loop_in(body, *container))
        .map(|found| (found.end, found.induction))
        .unzip()
}

pub fn is_constant_one(types: &TypeMap, variable: Symbol) -> bool {
    types.get(variable).and_then(|ty| ty.constant()) == Some(1.0)
}

/// A value carried across the iterations of a loop: the value entering the
/// loop, the value at the top of the body, the value at the end of the body
/// and the value after the loop
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct LoopVariable {
    pub before_loop: Symbol,
    pub loop_start: Symbol,
    pub loop_end: Symbol,
    pub after_loop: Option<Symbol>,
}

impl std::fmt::Display for LoopVariable {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "[{}, {}, {}",
            self.before_loop, self.loop_start, self.loop_end
        )?;

        match self.after_loop {
            Some(after) => write!(f, ", {after}]"),
            None => write!(f, "]"),
        }
    }
}

/// `(before loop, merged)` for phis merging exactly the value entering the
/// loop and the value at the end of the body
fn two_way_phis(
    body: &FunctionBody,
    block: BlockId,
    container: BlockId,
    loop_end: BlockId,
) -> Vec<(Symbol, Symbol, Symbol)> {
    body.block(block)
        .instructions
        .iter()
        .filter_map(|instruction| {
            let Instruction::Phi {
                destination,
                sources,
            } = instruction
            else {
                return None;
            };

            if sources.len() != 2 {
                return None;
            }

            Some((*sources.get(&container)?, *destination, *sources.get(&loop_end)?))
        })
        .collect()
}

/// Variables of the loop ending `found.container` following the pattern
/// `start = phi #container:before, #end:last` in the body, optionally paired
/// with `after = phi #container:before, #end:last` in the exit block
pub fn conventional_variables(body: &FunctionBody, found: &ForLoop) -> Vec<LoopVariable> {
    let loop_end = body.block_end(found.body);
    let starts = two_way_phis(body, found.body, found.container, loop_end);
    let afters = two_way_phis(body, found.exit, found.container, loop_end);

    let mut used = HashSet::new();
    let mut variables = Vec::new();

    for (before, after, last) in afters {
        let Some(position) = starts
            .iter()
            .position(|(b, _, l)| *b == before && *l == last)
        else {
            continue;
        };

        if !used.insert(position) {
            continue;
        }

        variables.push(LoopVariable {
            before_loop: before,
            loop_start: starts[position].1,
            loop_end: last,
            after_loop: Some(after),
        });
    }

    for (position, (before, start, last)) in starts.iter().enumerate() {
        if !used.contains(&position) {
            variables.push(LoopVariable {
                before_loop: *before,
                loop_start: *start,
                loop_end: *last,
                after_loop: None,
            });
        }
    }

    variables
}

/// Conventional variables of a loop without `break` or `continue` whose
/// phis all belong to conventional variables. Empty for other loops.
pub fn analyze_standard_loop(body: &FunctionBody, found: &ForLoop) -> Vec<LoopVariable> {
    let variables = conventional_variables(body, found);

    let is_phi_of = |instruction: &Instruction, matches: &dyn Fn(&LoopVariable, Symbol) -> bool| {
        let Instruction::Phi { destination, .. } = instruction else {
            return true;
        };

        variables.iter().any(|v| matches(v, *destination))
    };

    if !body
        .block(found.body)
        .instructions
        .iter()
        .all(|i| is_phi_of(i, &|v, d| v.loop_start == d))
    {
        return Vec::new();
    }

    if !body
        .block(found.exit)
        .instructions
        .iter()
        .all(|i| is_phi_of(i, &|v, d| v.after_loop == Some(d)))
    {
        return Vec::new();
    }

    let mut pending = vec![found.body];
    while let Some(block) = pending.pop() {
        for instruction in &body.block(block).instructions {
            match instruction {
                Instruction::Break | Instruction::Continue => return Vec::new(),
                Instruction::For { exit, .. } | Instruction::While { exit, .. } => {
                    pending.push(*exit);
                }
                other => pending.extend(other.owned_blocks()),
            }
        }
    }

    variables
}
