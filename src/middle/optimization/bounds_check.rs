//! Hoisting of the bounds checks of array reads out of counted loops.
//!
//! A read `x = get A(i, j)` in the body of a loop nest whose indices only
//! grow with the iterations is in bounds for every iteration if it is in
//! bounds for the last one. The pass checks that once before the nest and
//! turns the read into an unchecked `simple_get`.

use itertools::Itertools;
use tracing::{debug, trace};

use crate::{
    frontend::intern::Symbol,
    middle::{
        inference::TypedInstance,
        optimization::{
            Ineligible,
            builder::InstructionBuilder,
            end_elimination::{lower_end, lower_ends_of_unknown_rank},
            index_extraction::{
                check_indices_grow_with_iterations, check_sizes_declarations_valid,
                inject_instructions, verify_instructions_to_inject,
            },
            loops::{ForLoop, for_loop_in, for_loops, is_constant_one},
        },
        ssa::{Instruction, InstructionLocation, edit::EditQueue},
        ty::VariableType,
    },
    options::CompilerOptions,
};

pub fn move_bounds_checks(instance: &mut TypedInstance, options: &CompilerOptions) {
    while move_next_bounds_check(instance, options) {}
}

#[derive(Debug, Clone)]
struct Read {
    location: InstructionLocation,
    destination: Symbol,
    matrix: Symbol,
    indices: Vec<Symbol>,
}

/// Rewrites the first read that can be checked before its loop nest,
/// innermost loops first and deepest nests first. Returns whether a read
/// was rewritten.
fn move_next_bounds_check(instance: &mut TypedInstance, options: &CompilerOptions) -> bool {
    let loops = for_loops(&instance.body);

    for found in loops.iter().rev() {
        let nesting = unit_stride_nesting(instance, found);
        if nesting.is_empty() {
            trace!("loop at {} does not count from 1 by 1", found.container);
            continue;
        }

        let reads = reads_in(instance, found);

        for depth in (1..=nesting.len()).rev() {
            for read in &reads {
                match hoist_check(instance, options, &nesting[..depth], read) {
                    Ok(()) => return true,
                    Err(reason) => trace!(
                        "bounds check at {} stays in the loop at {}: {reason}",
                        read.location,
                        nesting[depth - 1].container
                    ),
                }
            }
        }
    }

    false
}

/// `found` and the enclosing loops, innermost first, up to the first one
/// not stepping from 1 by 1
fn unit_stride_nesting(instance: &TypedInstance, found: &ForLoop) -> Vec<ForLoop> {
    found
        .maximum_nesting()
        .into_iter()
        .map_while(|container| for_loop_in(&instance.body, container))
        .take_while(|l| is_constant_one(&instance.types, l.start) && is_constant_one(&instance.types, l.interval))
        .collect()
}

fn reads_in(instance: &TypedInstance, found: &ForLoop) -> Vec<Read> {
    instance
        .body
        .block(found.body)
        .instructions
        .iter()
        .enumerate()
        .filter_map(|(offset, instruction)| match instruction {
            Instruction::MatrixGet {
                destination,
                matrix,
                indices,
            } => Some(Read {
                location: InstructionLocation::new(found.body, offset),
                destination: *destination,
                matrix: *matrix,
                indices: indices.clone(),
            }),
            _ => None,
        })
        .collect_vec()
}

fn hoist_check(
    instance: &mut TypedInstance,
    options: &CompilerOptions,
    nesting: &[ForLoop],
    read: &Read,
) -> Result<(), Ineligible> {
    let Some(outermost) = nesting.last() else {
        return Err(Ineligible::new("no loop to hoist out of"));
    };

    let to_check = std::iter::once(read.matrix)
        .chain(read.indices.iter().copied())
        .collect_vec();
    let extraction = verify_instructions_to_inject(&instance.body, nesting, &to_check);

    check_sizes_declarations_valid(&instance.body, outermost, &extraction.external)?;
    check_indices_grow_with_iterations(&instance.types, nesting, &extraction, &read.indices)?;

    let for_location = outermost.location(&instance.body);
    let mut builder = InstructionBuilder::new(instance, options);
    let last_indices = inject_instructions(&mut builder, nesting, &extraction, &read.indices)?;
    let num_indices = last_indices.len();
    let mut unknown_rank = Vec::new();

    for (position, index) in last_indices.into_iter().enumerate() {
        let size = if num_indices == 1 {
            builder.call("numel", "size", &[read.matrix])?
        } else {
            let size = builder.temporary("size", VariableType::int());

            if let Err(reason) = lower_end(&mut builder, size, read.matrix, position, num_indices) {
                trace!("deferring `end` for the check of `{}`: {reason}", read.matrix);
                builder.push(Instruction::End {
                    destination: size,
                    matrix: read.matrix,
                    index: position,
                    num_indices,
                });
                unknown_rank.push(size);
            }

            size
        };

        let sufficient = builder.call("ge", "is_size_sufficient", &[size, index])?;
        builder.push(Instruction::ValidateTrue {
            condition: sufficient,
        });
    }

    let mut edits = EditQueue::new();
    edits.insert_before(for_location, builder.finish());
    edits.replace_with(
        read.location,
        Instruction::SimpleGet {
            destination: read.destination,
            matrix: read.matrix,
            indices: read.indices.clone(),
        },
    );
    edits.apply(&mut instance.body);
    lower_ends_of_unknown_rank(instance, options, &unknown_rank);

    debug!(
        "checked `{}` before the loop at {} instead of at {}",
        read.matrix, outermost.container, read.location
    );

    Ok(())
}

#[cfg(test)]
mod tests {
    use indoc::indoc;
    use insta::assert_snapshot;

    use super::*;
    use crate::{
        frontend::{SourceFile, parser::Parser},
        middle::{inference::Session, optimization::PassKind, ssa::pretty_print::plain},
    };

    fn optimized(source: &str) -> String {
        let module = Parser::parse_module(&SourceFile::from_memory(source)).unwrap();
        let options = CompilerOptions {
            passes: vec![PassKind::BoundsCheckMotion],
            ..Default::default()
        };
        let mut session = Session::new(&module, options);
        let instance = session
            .infer_function(module.functions[0].name, None)
            .unwrap();

        plain(&instance.body.to_string())
    }

    #[test]
    fn element_count_is_checked_once() {
        assert_snapshot!(optimized(indoc! {"
            function [s] = f(A: double[1, ?], n: int32)
            #0:
                s0 = 0
                one = 1
                for i = one, one, n, #1, #2
            #1:
                s1 = phi #0:s0, #1:s2
                x = get A(i)
                s2 = call plus(s1, x)
            #2:
                s = phi #0:s0, #1:s2
            end
        "}), @r"
        function [s] = f(A: double[1, ?], n: int32)
        #0:
            s0 = 0
            one = 1
            $size$1 = call numel_md_r(A)
            $is_size_sufficient$2 = call ge_ii($size$1, n)
            validate_true $is_size_sufficient$2
            for i = one, one, n, #1, #2
        #1:
            s1 = phi #0:s0, #1:s2
            x = simple_get A(i)
            s2 = call plus_dd(s1, x)
        #2:
            s = phi #0:s0, #1:s2
        end
        ");
    }

    #[test]
    fn shifted_indices_are_recomputed_from_the_loop_end() {
        let printed = optimized(indoc! {"
            function [s] = f(A: double[1, ?], n: int32)
            #0:
                s0 = 0
                one = 1
                for i = one, one, n, #1, #2
            #1:
                s1 = phi #0:s0, #1:s2
                k = call plus(i, one)
                x = get A(k)
                s2 = call plus(s1, x)
            #2:
                s = phi #0:s0, #1:s2
            end
        "});

        assert!(printed.contains("$max_k$1 = call plus_ii(n, one)"));
        assert!(printed.contains("call ge_ii($size$2, $max_k$1)"));
        assert!(printed.contains("x = simple_get A(k)"));
    }

    #[test]
    fn indices_which_may_be_zero_keep_their_check() {
        let printed = optimized(indoc! {"
            function [s] = f(A: double[1, ?], n: int32)
            #0:
                s0 = 0
                one = 1
                for i = one, one, n, #1, #2
            #1:
                s1 = phi #0:s0, #1:s2
                k = call minus(i, one)
                x = get A(k)
                s2 = call plus(s1, x)
            #2:
                s = phi #0:s0, #1:s2
            end
        "});

        assert!(printed.contains("x = get A(k)"));
        assert!(!printed.contains("validate_true"));
    }

    #[test]
    fn arrays_written_in_the_loop_keep_their_check() {
        let printed = optimized(indoc! {"
            function [B] = f(A: double[1, ?], n: int32)
            #0:
                one = 1
                for i = one, one, n, #1, #2
            #1:
                B1 = phi #0:A, #1:B2
                x = get B1(i)
                B2 = set B1(i), x
            #2:
                B = phi #0:A, #1:B2
            end
        "});

        assert!(printed.contains("x = get B1(i)"));
    }

    #[test]
    fn nested_reads_check_each_dimension() {
        let printed = optimized(indoc! {"
            function [s] = f(A: double[?, ?], n: int32, m: int32)
            #0:
                s0 = 0
                one = 1
                for i = one, one, n, #1, #2
            #1:
                s1 = phi #0:s0, #4:s4
                for j = one, one, m, #3, #4
            #2:
                s = phi #0:s0, #4:s4
            #3:
                s2 = phi #1:s1, #3:s3
                x = get A(i, j)
                s3 = call plus(s2, x)
            #4:
                s4 = phi #1:s1, #3:s3
            end
        "});

        let entry = printed
            .split("#1:")
            .next()
            .unwrap();

        assert!(entry.contains("call size_md_2i(A, $dim_1$"));
        assert!(entry.contains("call size_md_2i(A, $dim_2$"));
        assert_eq!(entry.matches("validate_true").count(), 2);
        assert!(printed.contains("x = simple_get A(i, j)"));
    }

    #[test]
    fn arrays_of_unknown_rank_fold_trailing_dimensions_in_a_loop() {
        let printed = optimized(indoc! {"
            function [s] = f(A: double[*], n: int32, m: int32)
            #0:
                s0 = 0
                one = 1
                for i = one, one, n, #1, #2
            #1:
                s1 = phi #0:s0, #4:s4
                for j = one, one, m, #3, #4
            #2:
                s = phi #0:s0, #4:s4
            #3:
                s2 = phi #1:s1, #3:s3
                x = get A(i, j)
                s3 = call plus(s2, x)
            #4:
                s4 = phi #1:s1, #3:s3
            end
        "});

        assert!(printed.contains("call ndims_md(A)"));
        assert!(printed.contains("s1 = phi #4:s4, #6:s0"));
        assert!(printed.contains("s = phi #4:s4, #6:s0"));
        assert_eq!(printed.matches("validate_true").count(), 2);
        assert!(!printed.contains(" end A"));
        assert!(printed.contains("x = simple_get A(i, j)"));
    }
}
