//! Recomputation of the largest index an access reaches in a loop nest.
//!
//! The indices of an access inside a loop nest are computed from the
//! induction variables by pure instructions of the loop bodies. Copying
//! those instructions before the outermost loop, with every induction
//! variable replaced by the end value of its loop, yields the last index the
//! nest visits.

use std::collections::VecDeque;

use hashbrown::{HashMap, HashSet};

use crate::{
    frontend::intern::Symbol,
    middle::{
        inference::context::TypeMap,
        optimization::{
            Ineligible,
            builder::InstructionBuilder,
            growth::GrowthOracle,
            loops::{ForLoop, LoopVariable},
            usage::UsageMap,
        },
        ssa::{FunctionBody, Instruction, InstructionLocation},
    },
};

/// Instructions computing a set of indices from the induction variables of
/// a loop nest
#[derive(Debug, Clone, PartialEq)]
pub struct Extraction {
    /// Outermost loop body first, in body order
    pub instructions: Vec<Instruction>,
    /// Values the instructions read from outside of the nest, the end values
    /// of the loops included
    pub external: Vec<Symbol>,
}

/// Collects the instructions of the bodies of `nesting` (innermost first)
/// that `indices` depend on. Phis and instructions with side effects are
/// never collected, values they define count as external.
pub fn verify_instructions_to_inject(
    body: &FunctionBody,
    nesting: &[ForLoop],
    indices: &[Symbol],
) -> Extraction {
    let mut declarations = HashMap::<Symbol, InstructionLocation>::new();
    for found in nesting {
        for (offset, instruction) in body.block(found.body).instructions.iter().enumerate() {
            if matches!(instruction, Instruction::Phi { .. }) || instruction.has_side_effects() {
                continue;
            }

            for output in instruction.outputs() {
                declarations.insert(output, InstructionLocation::new(found.body, offset));
            }
        }
    }

    let sizes = nesting
        .iter()
        .map(|found| (found.induction, found.end))
        .collect::<HashMap<_, _>>();

    let mut visited = HashSet::new();
    let mut needed = HashSet::new();
    let mut external = Vec::new();
    let mut pending = indices.iter().copied().collect::<VecDeque<_>>();

    while let Some(variable) = pending.pop_front() {
        if !visited.insert(variable) {
            continue;
        }

        let outside = match (sizes.get(&variable), declarations.get(&variable)) {
            (Some(size), _) => *size,
            (None, Some(location)) => {
                needed.insert(*location);

                if let Some(instruction) = body.instruction(*location) {
                    pending.extend(instruction.inputs());
                }

                continue;
            }
            (None, None) => variable,
        };

        if !external.contains(&outside) {
            external.push(outside);
        }
    }

    let instructions = nesting
        .iter()
        .rev()
        .flat_map(|found| {
            body.block(found.body)
                .instructions
                .iter()
                .enumerate()
                .filter(|(offset, _)| needed.contains(&InstructionLocation::new(found.body, *offset)))
                .map(|(_, instruction)| instruction.clone())
                .collect::<Vec<_>>()
        })
        .collect();

    Extraction {
        instructions,
        external,
    }
}

/// Rejects values read by the hoisted instructions that are only computed
/// inside the outermost loop
pub fn check_sizes_declarations_valid(
    body: &FunctionBody,
    outermost: &ForLoop,
    external: &[Symbol],
) -> Result<(), Ineligible> {
    let declared = body.declared_in_contained_blocks(outermost.body);

    match external.iter().find(|v| declared.contains(*v)) {
        Some(variable) => Err(Ineligible::new(format!(
            "`{variable}` is computed inside the loop at {}",
            outermost.container
        ))),
        None => Ok(()),
    }
}

/// Checks that the indices never shrink while the nest runs and are never
/// below 1, so the values at the last iterations bound every access
pub fn check_indices_grow_with_iterations(
    types: &TypeMap,
    nesting: &[ForLoop],
    extraction: &Extraction,
    indices: &[Symbol],
) -> Result<(), Ineligible> {
    let mut oracle = GrowthOracle::new(types);

    for found in nesting {
        oracle.add_iteration(found.induction);
    }

    for variable in &extraction.external {
        oracle.add_external(*variable);
    }

    for instruction in &extraction.instructions {
        oracle.add_instruction(instruction);
    }

    if oracle.grows_with_iterations(indices) {
        Ok(())
    } else {
        Err(Ineligible::new("indices are not known to grow with the iterations"))
    }
}

/// Adds the hoisted instructions to `builder`, each output renamed to a
/// `$max_` temporary and each induction variable replaced by the end value
/// of its loop. Returns the values of the indices at the last iterations.
pub fn inject_instructions(
    builder: &mut InstructionBuilder,
    nesting: &[ForLoop],
    extraction: &Extraction,
    indices: &[Symbol],
) -> Result<Vec<Symbol>, Ineligible> {
    let mut renames = HashMap::new();

    for found in nesting {
        let iteration = builder.variable_type(found.induction);
        let size = builder.variable_type(found.end);

        match (iteration, size) {
            (Some(iteration), Some(size)) if iteration.loosely_equals(&size) => {}
            _ => {
                return Err(Ineligible::new(format!(
                    "`{}` and `{}` have different types",
                    found.induction, found.end
                )));
            }
        }

        renames.insert(found.induction, found.end);
    }

    for instruction in &extraction.instructions {
        for output in instruction.outputs() {
            let ty = builder
                .variable_type(output)
                .ok_or_else(|| Ineligible::new(format!("`{output}` has no type")))?;
            let temporary = builder.temporary(&format!("max_{}", output.base_name()), ty);

            renames.insert(output, temporary);
        }

        let mut copy = instruction.clone();
        copy.rename_variables(&renames);
        builder.push(copy);
    }

    Ok(indices
        .iter()
        .map(|index| renames.get(index).copied().unwrap_or(*index))
        .collect())
}

/// A variable grown in place is read once at the top of the body (twice
/// when an inner loop also reads it), once when entering the loop and once
/// at the end of the body, plus once more each when the loop has an exit
/// value
pub fn check_usage_counts(usage: &UsageMap, variable: &LoopVariable, innermost: bool) -> bool {
    let start_uses = if innermost { 1 } else { 2 };
    let boundary_uses = if variable.after_loop.is_some() { 2 } else { 1 };

    usage.usage_count(variable.loop_start) == start_uses
        && usage.usage_count(variable.before_loop) == boundary_uses
        && usage.usage_count(variable.loop_end) == boundary_uses
}

/// The values of a loop variable all share one representation. The value
/// before the loop may still be untyped.
pub fn check_type_compatibility(types: &TypeMap, variable: &LoopVariable) -> bool {
    let Some(reference) = types.get(variable.loop_start) else {
        return false;
    };
    let same = |name: Symbol| types.get(name).is_some_and(|ty| ty.loosely_equals(reference));

    types
        .get(variable.before_loop)
        .is_none_or(|ty| ty.loosely_equals(reference))
        && same(variable.loop_end)
        && variable.after_loop.is_none_or(same)
}

/// The variable of an enclosing loop whose body starts with the value
/// `current` enters with, and ends with the value `current` exits with
pub fn find_matching_variable(
    types: &TypeMap,
    usage: &UsageMap,
    candidates: &[LoopVariable],
    current: &LoopVariable,
) -> Option<LoopVariable> {
    let after = current.after_loop?;
    let reference = types.get(current.loop_start)?;

    candidates
        .iter()
        .find(|candidate| {
            candidate.loop_start == current.before_loop
                && candidate.loop_end == after
                && check_usage_counts(usage, candidate, false)
                && check_type_compatibility(types, candidate)
                && types
                    .get(candidate.loop_start)
                    .is_some_and(|ty| ty.loosely_equals(reference))
        })
        .copied()
}

#[cfg(test)]
mod tests {
    use indoc::indoc;
    use pretty_assertions::assert_eq;

    use super::*;
    use crate::{
        frontend::{SourceFile, parser::Parser},
        middle::{
            inference::{Session, TypedInstance},
            optimization::loops::{analyze_standard_loop, for_loops},
            ssa::pretty_print::plain,
        },
        options::CompilerOptions,
    };

    fn infer(source: &str) -> TypedInstance {
        let module = Parser::parse_module(&SourceFile::from_memory(source)).unwrap();
        let mut session = Session::new(&module, CompilerOptions::without_passes());

        session
            .infer_function(module.functions[0].name, None)
            .unwrap()
            .as_ref()
            .clone()
    }

    fn sym(name: &str) -> Symbol {
        Symbol::new(name)
    }

    const NESTED_READ: &str = indoc! {"
        function [s] = f(A: double[?, ?], n: int32, m: int32)
        #0:
            s0 = 0
            one = 1
            for i = one, one, n, #1, #2
        #1:
            s1 = phi #0:s0, #4:s4
            k = call plus(i, one)
            for j = one, one, m, #3, #4
        #2:
            s = phi #0:s0, #4:s4
        #3:
            s2 = phi #1:s1, #3:s3
            x = get A(k, j)
            s3 = call plus(s2, x)
        #4:
            s4 = phi #1:s1, #3:s3
        end
    "};

    fn nesting(instance: &TypedInstance) -> Vec<ForLoop> {
        let loops = for_loops(&instance.body);
        vec![loops[1].clone(), loops[0].clone()]
    }

    #[test]
    fn collects_dependencies_across_the_nest() {
        let instance = infer(NESTED_READ);
        let nesting = nesting(&instance);

        let extraction = verify_instructions_to_inject(&instance.body, &nesting, &[sym("k"), sym("j")]);

        assert_eq!(extraction.instructions.len(), 1);
        assert_eq!(extraction.instructions[0].outputs(), [sym("k")]);
        assert_eq!(extraction.external, [sym("m"), sym("n"), sym("one")]);

        assert!(check_sizes_declarations_valid(&instance.body, &nesting[1], &extraction.external).is_ok());
        assert!(
            check_indices_grow_with_iterations(&instance.types, &nesting, &extraction, &[sym("k"), sym("j")])
                .is_ok()
        );
    }

    #[test]
    fn values_computed_inside_the_outer_loop_are_rejected() {
        let instance = infer(NESTED_READ);
        let nesting = nesting(&instance);

        // Only the inner loop: `k` comes from the outer body
        let extraction = verify_instructions_to_inject(&instance.body, &nesting[..1], &[sym("k"), sym("j")]);

        assert!(extraction.instructions.is_empty());
        assert_eq!(extraction.external, [sym("k"), sym("m")]);
        assert!(check_sizes_declarations_valid(&instance.body, &nesting[1], &extraction.external).is_err());
    }

    #[test]
    fn injected_instructions_use_loop_ends() {
        let mut instance = infer(NESTED_READ);
        let nesting = nesting(&instance);
        let extraction = verify_instructions_to_inject(&instance.body, &nesting, &[sym("k"), sym("j")]);

        let mut builder = InstructionBuilder::new(&mut instance, &CompilerOptions::default());
        let values = inject_instructions(&mut builder, &nesting, &extraction, &[sym("k"), sym("j")]).unwrap();
        let instructions = builder.finish();

        assert_eq!(values, [sym("$max_k$1"), sym("m")]);
        assert_eq!(instructions.len(), 1);
        assert_eq!(
            plain(&instructions[0].to_string()),
            "$max_k$1 = call plus_ii(n, one)"
        );
        assert_eq!(instance.types.get(sym("$max_k$1")), instance.types.get(sym("k")));
    }

    #[test]
    fn loop_variable_matching() {
        let instance = infer(indoc! {"
            function [y] = f(n: int32, m: int32)
            #0:
                y0 = !undefined
                one = 1
                for i = one, one, n, #1, #2
            #1:
                y1 = phi #0:y0, #4:y4
                for j = one, one, m, #3, #4
            #2:
                y = phi #0:y0, #4:y4
            #3:
                y2 = phi #1:y1, #3:y3
                y3 = set y2(i, j), i
            #4:
                y4 = phi #1:y1, #3:y3
            end
        "});
        let loops = for_loops(&instance.body);
        let usage = UsageMap::build(&instance.body);
        let outer = analyze_standard_loop(&instance.body, &loops[0]);
        let inner = analyze_standard_loop(&instance.body, &loops[1]);

        assert!(check_usage_counts(&usage, &inner[0], true));
        assert!(check_type_compatibility(&instance.types, &inner[0]));
        assert!(check_usage_counts(&usage, &outer[0], false));
        assert_eq!(
            find_matching_variable(&instance.types, &usage, &outer, &inner[0]),
            Some(outer[0])
        );
    }
}
