use std::collections::BTreeMap;

use itertools::Itertools;
use tracing::{debug, trace};

use crate::{
    frontend::intern::Symbol,
    middle::{
        inference::TypedInstance,
        optimization::{Ineligible, builder::InstructionBuilder},
        ssa::{Instruction, InstructionLocation, Literal, Operand, edit::EditQueue},
        ty::VariableType,
    },
    options::CompilerOptions,
};

/// Replaces the `end` instructions left after inference with queries on the
/// runtime shape of the array. An `end` on an array of unknown rank becomes
/// a loop over its dimensions.
pub fn eliminate_ends(instance: &mut TypedInstance, options: &CompilerOptions) {
    let ends = instance
        .body
        .instructions()
        .filter_map(|(location, instruction)| match instruction {
            Instruction::End {
                destination,
                matrix,
                index,
                num_indices,
            } => Some((location, *destination, *matrix, *index, *num_indices)),
            _ => None,
        })
        .collect_vec();

    let mut edits = EditQueue::new();
    let mut unknown_rank = Vec::new();

    for (location, destination, matrix, index, num_indices) in ends {
        let mut builder = InstructionBuilder::new(instance, options);

        match lower_end(&mut builder, destination, matrix, index, num_indices) {
            Ok(()) => {
                debug!("lowered `end` at {location}");
                edits.replace(location, builder.finish());
            }
            Err(_) if has_unknown_rank(&builder, matrix) => unknown_rank.push(destination),
            Err(reason) => trace!("keeping `end` at {location}: {reason}"),
        }
    }

    edits.apply(&mut instance.body);
    lower_ends_of_unknown_rank(instance, options, &unknown_rank);
}

fn has_unknown_rank(builder: &InstructionBuilder, matrix: Symbol) -> bool {
    builder
        .variable_type(matrix)
        .is_some_and(|ty| ty.is_matrix() && ty.shape().raw_num_dims().is_none())
}

/// Lowers the `end` instructions defining `destinations` with a loop over
/// the dimensions of their array. Each one splits the block holding it.
pub fn lower_ends_of_unknown_rank(
    instance: &mut TypedInstance,
    options: &CompilerOptions,
    destinations: &[Symbol],
) {
    for destination in destinations {
        let Some(location) = instance.body.find_declaration(*destination) else {
            continue;
        };

        match lower_end_over_dims(instance, options, location) {
            Ok(()) => debug!("lowered `end` at {location} with a loop over the dimensions"),
            Err(reason) => trace!("keeping `end` at {location}: {reason}"),
        }
    }
}

/// Computes the trailing extent product of an array of unknown rank as
///
/// ```text
///     $size$1 = 1
///     for $iter$2 = index + 1, 1, ndims(A), #body, #exit
/// #body:
///     $size$3 = phi #block:$size$1, #body:$size$5
///     $dim$4 = call size(A, $iter$2)
///     $size$5 = call times($size$3, $dim$4)
/// #exit:
///     x = phi #block:$size$1, #body:$size$5
/// ```
///
/// The instructions following the `end` move to the exit block.
fn lower_end_over_dims(
    instance: &mut TypedInstance,
    options: &CompilerOptions,
    location: InstructionLocation,
) -> Result<(), Ineligible> {
    let Some(Instruction::End {
        destination,
        matrix,
        index,
        ..
    }) = instance.body.instruction(location).cloned()
    else {
        return Err(Ineligible::new("not an `end`"));
    };

    let mut builder = InstructionBuilder::new(instance, options);
    let start = builder.integer("start", index as i64 + 1);
    let step = builder.integer("step", 1);
    let ndims = builder.call("ndims", "ndims", &[matrix])?;
    let initial = builder.integer("size", 1);
    let head = builder.take_instructions();

    let induction = builder.temporary("iter", VariableType::int());
    let carried = builder.temporary("size", VariableType::int());
    let extent = builder.temporary("dim", VariableType::int());
    builder.call_into("size", extent, &[matrix, induction])?;
    let product = builder.call("times", "size", &[carried, extent])?;
    let loop_instructions = builder.finish();

    let body = &mut instance.body;
    let block = location.block;
    let loop_block = body.add_block();
    let exit_block = body.add_block();

    let tail = body
        .block_mut(block)
        .instructions
        .split_off(location.offset)
        .into_iter()
        .skip(1)
        .collect_vec();
    body.redirect_phi_sources(block, exit_block);

    let sources = BTreeMap::from([(block, initial), (loop_block, product)]);

    let split = &mut body.block_mut(block).instructions;
    split.extend(head);
    split.push(Instruction::For {
        induction,
        start,
        interval: step,
        end: ndims,
        body: loop_block,
        exit: exit_block,
    });

    let looped = &mut body.block_mut(loop_block).instructions;
    looped.push(Instruction::Phi {
        destination: carried,
        sources: sources.clone(),
    });
    looped.extend(loop_instructions);

    let exit = &mut body.block_mut(exit_block).instructions;
    exit.push(Instruction::Phi {
        destination,
        sources,
    });
    exit.extend(tail);

    Ok(())
}

/// Computes into `destination` the value of `end` at position `index` of an
/// access to `matrix` with `num_indices` indices
pub fn lower_end(
    builder: &mut InstructionBuilder,
    destination: Symbol,
    matrix: Symbol,
    index: usize,
    num_indices: usize,
) -> Result<(), Ineligible> {
    let ty = builder
        .variable_type(matrix)
        .ok_or_else(|| Ineligible::new(format!("`{matrix}` has no type")))?;

    if !ty.is_matrix() {
        builder.assign_literal(destination, Literal::Integer(1));
        return Ok(());
    }

    if num_indices == 1 {
        return builder.call_into("numel", destination, &[matrix]);
    }

    let total_dims = ty.shape().raw_num_dims();

    if index + 1 < num_indices || total_dims == Some(num_indices) {
        let dim = builder.integer(&format!("dim_{}", index + 1), index as i64 + 1);
        return builder.call_into("size", destination, &[matrix, dim]);
    }

    let Some(total_dims) = total_dims else {
        return Err(Ineligible::new(format!("rank of `{matrix}` is unknown")));
    };

    if num_indices > total_dims {
        builder.assign_literal(destination, Literal::Integer(1));
        return Ok(());
    }

    // Last index of fewer indices than dimensions spans the trailing ones
    let mut extents = Vec::new();
    for dim in index..total_dims {
        let dim = builder.integer(&format!("dim_{}", dim + 1), dim as i64 + 1);
        extents.push(builder.call("size", "size", &[matrix, dim])?);
    }

    let Some((&first, rest)) = extents.split_first() else {
        return Err(Ineligible::new("no trailing dimension"));
    };

    let mut product = first;
    for (position, extent) in rest.iter().enumerate() {
        if position + 1 == rest.len() {
            return builder.call_into("times", destination, &[product, *extent]);
        }

        product = builder.call("times", "end_product", &[product, *extent])?;
    }

    builder.push(Instruction::Assign {
        destination,
        source: Operand::Variable(product),
    });

    Ok(())
}
