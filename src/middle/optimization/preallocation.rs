//! Allocation of arrays grown element by element in counted loops.
//!
//! A loop nest writing `y(i, j) = v` on every iteration grows `y` by
//! reallocation. When the indices only grow with the iterations, the size
//! reached by the last iteration is known before the nest starts: the array
//! is allocated (or its storage reserved) once, and the writes become
//! unchecked `simple_set`s.

use hashbrown::{HashMap, HashSet};
use itertools::Itertools;
use tracing::{debug, trace};

use crate::{
    frontend::intern::Symbol,
    middle::{
        inference::TypedInstance,
        optimization::{
            Ineligible,
            builder::InstructionBuilder,
            index_extraction::{
                check_indices_grow_with_iterations, check_sizes_declarations_valid,
                check_type_compatibility, check_usage_counts, find_matching_variable,
                inject_instructions, verify_instructions_to_inject,
            },
            loops::{ForLoop, LoopVariable, analyze_standard_loop, for_loop_in, for_loops, is_constant_one},
            usage::UsageMap,
        },
        ssa::{BlockId, FunctionBody, Instruction, InstructionLocation, edit::EditQueue},
    },
    options::CompilerOptions,
};

pub fn preallocate_matrices(instance: &mut TypedInstance, options: &CompilerOptions) {
    while preallocate_next(instance, options) {}
}

/// The loops of a nest, innermost first, with the variable each of them
/// carries for the grown array
type Chain = Vec<(ForLoop, LoopVariable)>;

fn is_unit_stride(instance: &TypedInstance, found: &ForLoop) -> bool {
    is_constant_one(&instance.types, found.start) && is_constant_one(&instance.types, found.interval)
}

/// Preallocates the first grown array found, innermost loops first and
/// deepest nests first. Returns whether an array was preallocated.
fn preallocate_next(instance: &mut TypedInstance, options: &CompilerOptions) -> bool {
    let undefined = instance
        .body
        .instructions()
        .filter_map(|(_, instruction)| match instruction {
            Instruction::Undefined { destination } => Some(*destination),
            _ => None,
        })
        .collect::<HashSet<_>>();

    let loops = for_loops(&instance.body);
    let variables = loops
        .iter()
        .map(|found| {
            let variables = analyze_standard_loop(&instance.body, found)
                .into_iter()
                .filter(|v| check_type_compatibility(&instance.types, v))
                .collect_vec();

            (found.container, variables)
        })
        .collect::<HashMap<BlockId, Vec<LoopVariable>>>();
    let usage = UsageMap::build(&instance.body);

    for found in loops.iter().rev() {
        if !is_unit_stride(instance, found) {
            trace!("loop at {} does not count from 1 by 1", found.container);
            continue;
        }

        for variable in variables.get(&found.container).into_iter().flatten() {
            if !instance.types.contains(variable.before_loop) && !undefined.contains(&variable.before_loop) {
                trace!("{variable} in the loop at {} may be unset before it", found.container);
                continue;
            }

            if !check_usage_counts(&usage, variable, true) {
                trace!("{variable} in the loop at {} is read elsewhere", found.container);
                continue;
            }

            let chain = matching_chain(instance, &variables, &usage, found, *variable);

            for depth in (1..=chain.len()).rev() {
                match grow_in_place(instance, options, &chain[..depth], &undefined) {
                    Ok(()) => return true,
                    Err(reason) => trace!(
                        "{variable} is not preallocated before the loop at {}: {reason}",
                        chain[depth - 1].0.container
                    ),
                }
            }
        }
    }

    false
}

/// Follows `variable` through the enclosing loops for as long as each of
/// them carries it unchanged around the inner loop
fn matching_chain(
    instance: &TypedInstance,
    variables: &HashMap<BlockId, Vec<LoopVariable>>,
    usage: &UsageMap,
    found: &ForLoop,
    variable: LoopVariable,
) -> Chain {
    let mut chain = vec![(found.clone(), variable)];

    for container in &found.nesting {
        let Some(outer) = for_loop_in(&instance.body, *container) else {
            break;
        };

        if !is_unit_stride(instance, &outer) {
            break;
        }

        let Some((_, current)) = chain.last() else {
            break;
        };
        let candidates = variables.get(container).map(Vec::as_slice).unwrap_or_default();

        let Some(matching) = find_matching_variable(&instance.types, usage, candidates, current) else {
            break;
        };

        chain.push((outer, matching));
    }

    chain
}

#[derive(Debug, Clone)]
struct Write {
    location: InstructionLocation,
    indices: Vec<Symbol>,
}

/// The write producing the value at the end of the body from the value at
/// the top of the body, in the body block or the blocks following it
fn find_write(body: &FunctionBody, found: &ForLoop, variable: &LoopVariable) -> Result<Write, Ineligible> {
    let mut block = Some(found.body);

    while let Some(current) = block {
        for (offset, instruction) in body.block(current).instructions.iter().enumerate() {
            if let Instruction::MatrixSet {
                destination,
                matrix,
                indices,
                ..
            } = instruction
            {
                if *matrix == variable.loop_start && *destination == variable.loop_end {
                    return Ok(Write {
                        location: InstructionLocation::new(current, offset),
                        indices: indices.clone(),
                    });
                }
            }
        }

        block = body
            .block(current)
            .ending_instruction()
            .and_then(Instruction::continuation);
    }

    Err(Ineligible::new(format!(
        "no write turns `{}` into `{}`",
        variable.loop_start, variable.loop_end
    )))
}

fn into_simple_set(instruction: Instruction) -> Instruction {
    match instruction {
        Instruction::MatrixSet {
            destination,
            matrix,
            indices,
            value,
        } => Instruction::SimpleSet {
            destination,
            matrix,
            indices,
            value,
        },
        other => other,
    }
}

fn grow_in_place(
    instance: &mut TypedInstance,
    options: &CompilerOptions,
    chain: &[(ForLoop, LoopVariable)],
    undefined: &HashSet<Symbol>,
) -> Result<(), Ineligible> {
    let (Some((innermost, inner_variable)), Some((outermost, outer_variable))) = (chain.first(), chain.last())
    else {
        return Err(Ineligible::new("no loop to allocate before"));
    };
    let nesting = chain.iter().map(|(found, _)| found.clone()).collect_vec();

    let write = find_write(&instance.body, innermost, inner_variable)?;
    let extraction = verify_instructions_to_inject(&instance.body, &nesting, &write.indices);

    check_sizes_declarations_valid(&instance.body, outermost, &extraction.external)?;
    check_indices_grow_with_iterations(&instance.types, &nesting, &extraction, &write.indices)?;

    let before = outer_variable.before_loop;
    let start_type = instance
        .types
        .get(outer_variable.loop_start)
        .cloned()
        .ok_or_else(|| Ineligible::new(format!("`{}` has no type", outer_variable.loop_start)))?;

    let declaration = match instance.types.get(before) {
        Some(ty) if ty.is_matrix() => None,
        Some(ty) => return Err(Ineligible::new(format!("`{before}` is a {ty}, not an array"))),
        None if undefined.contains(&before) => Some(
            instance
                .body
                .find_declaration(before)
                .ok_or_else(|| Ineligible::new(format!("`{before}` is never declared")))?,
        ),
        None => return Err(Ineligible::new(format!("`{before}` may be unset"))),
    };

    let for_location = outermost.location(&instance.body);
    let mut builder = InstructionBuilder::new(instance, options);
    let sizes = inject_instructions(&mut builder, &nesting, &extraction, &write.indices)?;
    let mut edits = EditQueue::new();

    match declaration {
        Some(declaration) => {
            let mut dims = sizes;
            if dims.len() == 1 {
                dims.insert(0, builder.integer("one", 1));
            }

            builder.call_with_output("new_array_from_dims", before, &dims, start_type)?;
            edits.remove(declaration);
            edits.insert_before(for_location, builder.finish());

            debug!("allocated `{before}` before the loop at {}", outermost.container);
        }
        None => {
            let reserved = builder.temporary(before.base_name(), start_type.clone());
            let arguments = std::iter::once(before).chain(sizes).collect_vec();

            builder.call_with_output("reserve_capacity", reserved, &arguments, start_type)?;
            let instructions = builder.finish();

            rename_uses(&mut instance.body, before, reserved);
            edits.insert_before(for_location, instructions);

            debug!(
                "reserved storage for `{before}` as `{reserved}` before the loop at {}",
                outermost.container
            );
        }
    }

    if let Some(write_instruction) = instance.body.instruction(write.location).cloned() {
        edits.replace_with(write.location, into_simple_set(write_instruction));
    }

    edits.apply(&mut instance.body);

    Ok(())
}

/// Makes every reader of `variable` read `replacement` instead, leaving the
/// definition of `variable` in place
fn rename_uses(body: &mut FunctionBody, variable: Symbol, replacement: Symbol) {
    body.rename_variables(&HashMap::from([(variable, replacement)]));

    if let Some(location) = body.find_declaration(replacement) {
        body.block_mut(location.block).instructions[location.offset]
            .rename_variables(&HashMap::from([(replacement, variable)]));
    }
}

#[cfg(test)]
mod tests {
    use indoc::indoc;
    use insta::assert_snapshot;
    use pretty_assertions::assert_eq;

    use super::*;
    use crate::{
        frontend::{SourceFile, parser::Parser},
        middle::{inference::Session, optimization::PassKind, ssa::pretty_print::plain},
    };

    fn optimize(source: &str) -> TypedInstance {
        let module = Parser::parse_module(&SourceFile::from_memory(source)).unwrap();
        let options = CompilerOptions {
            passes: vec![PassKind::MatrixPreallocation],
            ..Default::default()
        };
        let mut session = Session::new(&module, options);

        session
            .infer_function(module.functions[0].name, None)
            .unwrap()
            .as_ref()
            .clone()
    }

    #[test]
    fn undefined_arrays_are_allocated() {
        let instance = optimize(indoc! {"
            function [y] = f(n: int32)
            #0:
                y0 = !undefined
                one = 1
                for i = one, one, n, #1, #2
            #1:
                y1 = phi #0:y0, #1:y2
                y2 = set y1(i), i
            #2:
                y = phi #0:y0, #1:y2
            end
        "});

        assert_snapshot!(plain(&instance.body.to_string()), @r"
        function [y] = f(n: int32)
        #0:
            one = 1
            $one$1 = 1
            y0 = call new_array_from_dims_ii($one$1, n)
            for i = one, one, n, #1, #2
        #1:
            y1 = phi #0:y0, #1:y2
            y2 = simple_set y1(i), i
        #2:
            y = phi #0:y0, #1:y2
        end
        ");

        assert_eq!(
            instance.variable_type(Symbol::new("y0")),
            instance.variable_type(Symbol::new("y1"))
        );
    }

    #[test]
    fn existing_arrays_reserve_storage() {
        let instance = optimize(indoc! {"
            function [y] = f(A: double[1, ?], n: int32)
            #0:
                one = 1
                for i = one, one, n, #1, #2
            #1:
                y1 = phi #0:A, #1:y2
                y2 = set y1(i), i
            #2:
                y = phi #0:A, #1:y2
            end
        "});

        assert_snapshot!(plain(&instance.body.to_string()), @r"
        function [y] = f(A: double[1, ?], n: int32)
        #0:
            one = 1
            $A$1 = call reserve_capacity_md_ri(A, n)
            for i = one, one, n, #1, #2
        #1:
            y1 = phi #0:$A$1, #1:y2
            y2 = simple_set y1(i), i
        #2:
            y = phi #0:$A$1, #1:y2
        end
        ");

        assert_eq!(
            instance.variable_type(Symbol::new("$A$1")),
            instance.variable_type(Symbol::new("y1"))
        );
    }

    #[test]
    fn reserved_locals_keep_their_definition() {
        let instance = optimize(indoc! {"
            function [y] = f(n: int32)
            #0:
                one = 1
                y0 = call zeros(one, n)
                for i = one, one, n, #1, #2
            #1:
                y1 = phi #0:y0, #1:y2
                y2 = set y1(i), i
            #2:
                y = phi #0:y0, #1:y2
            end
        "});
        let printed = plain(&instance.body.to_string());

        assert!(printed.contains("y0 = call zeros_ii(one, n)"));
        assert!(printed.contains("$y0$1 = call reserve_capacity_md_ri(y0, n)"));
        assert!(printed.contains("y1 = phi #0:$y0$1, #1:y2"));
    }

    #[test]
    fn nests_are_allocated_with_every_extent() {
        let instance = optimize(indoc! {"
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
        let printed = plain(&instance.body.to_string());

        assert!(printed.contains("y0 = call new_array_from_dims_ii(n, m)"));
        assert!(printed.contains("y3 = simple_set y2(i, j), i"));
        assert!(!printed.contains("!undefined"));
    }

    #[test]
    fn loops_not_counting_from_one_keep_growing() {
        let instance = optimize(indoc! {"
            function [y] = f(n: int32)
            #0:
                y0 = !undefined
                one = 1
                two = 2
                for i = two, one, n, #1, #2
            #1:
                y1 = phi #0:y0, #1:y2
                y2 = set y1(i), i
            #2:
                y = phi #0:y0, #1:y2
            end
        "});
        let printed = plain(&instance.body.to_string());

        assert!(printed.contains("y2 = set y1(i), i"));
        assert!(printed.contains("y0 = !undefined"));
    }
}
