//! Typing of indexed array reads, indexed array writes and `end` inside an
//! index list.

use thiserror::Error;
use tracing::warn;

use crate::middle::{
    inference::ErrorTag,
    shape::Shape,
    ty::{TypeKind, VariableType},
};

#[derive(Debug, Clone, PartialEq, Error)]
pub enum AccessError {
    #[error("indexing a value of type {0} is not supported")]
    UnsupportedMatrix(String),
    #[error("assigning a value of type {value} into a value of type {matrix} is not supported")]
    UnsupportedAssignment { matrix: String, value: String },
    #[error("index {position} is past the last dimension of {matrix} and equal to {value} instead of 1")]
    SurplusIndex {
        position: usize,
        matrix: String,
        value: f64,
    },
    #[error("array is created by writing at index {0}, which is not positive")]
    NonPositiveIndex(f64),
}

impl AccessError {
    pub fn tag(&self) -> ErrorTag {
        match self {
            AccessError::UnsupportedMatrix(_) | AccessError::UnsupportedAssignment { .. } => {
                ErrorTag::NotYetImplemented
            }
            AccessError::SurplusIndex { .. } | AccessError::NonPositiveIndex(_) => {
                ErrorTag::CorrectnessError
            }
        }
    }
}

fn is_complex(ty: &VariableType) -> bool {
    matches!(ty.kind(), TypeKind::Complex(_))
}

/// Positive integral constant held by `index`
fn constant_index(index: &VariableType) -> Option<usize> {
    let value = index.constant()?;

    (value.fract() == 0.0 && value >= 1.0).then_some(value as usize)
}

fn is_constant_one(index: &VariableType) -> bool {
    index.constant() == Some(1.0)
}

/// Position of the last index which is not the constant 1, or 0
fn last_relevant_index(indices: &[VariableType]) -> usize {
    indices
        .iter()
        .rposition(|index| !is_constant_one(index))
        .unwrap_or(0)
}

/// Type of `matrix(indices...)`
pub fn get_type(matrix: &VariableType, indices: &[VariableType]) -> Result<VariableType, AccessError> {
    if is_complex(matrix) {
        return Err(AccessError::UnsupportedMatrix(matrix.to_string()));
    }

    if indices.is_empty() {
        return Ok(matrix.clone());
    }

    if !matrix.is_matrix() {
        return match indices {
            [index] if index.is_scalar() => Ok(matrix.clone()),
            _ => Err(AccessError::UnsupportedMatrix(matrix.to_string())),
        };
    }

    let shape = matrix.shape();

    if let Some(raw) = shape.raw_num_dims() {
        if indices.len() > 1 {
            for (position, index) in indices.iter().enumerate().skip(raw) {
                match index.constant() {
                    Some(value) if value == 1.0 => {}
                    Some(value) => {
                        return Err(AccessError::SurplusIndex {
                            position,
                            matrix: matrix.to_string(),
                            value,
                        });
                    }
                    None => warn!(
                        "index {position} of an access to {matrix} is past its last dimension, \
                         the access fails at run time unless it is 1"
                    ),
                }
            }
        }
    }

    if indices.iter().all(VariableType::is_scalar) {
        return Ok(VariableType::scalar(matrix.element_kind()));
    }

    Ok(multiple_get_type(matrix, &shape, indices))
}

/// Read of a range of elements, at least one index being an array
fn multiple_get_type(matrix: &VariableType, shape: &Shape, indices: &[VariableType]) -> VariableType {
    let result = match indices {
        [index] => {
            let index_shape = index.shape();

            if shape.is_known_row() && index_shape.is_known_row() {
                Shape::row()
            } else if shape.is_known_column() && index_shape.is_known_column() {
                Shape::column()
            } else if index_shape.is_known_1d() {
                Shape::new_1d()
            } else {
                Shape::undefined()
            }
        }
        indices => Shape::from_dims(indices.iter().map(|index| {
            if index.is_scalar() {
                Some(1)
            } else {
                index.shape().num_elements().ok()
            }
        })),
    };

    matrix.with_shape(result).with_weak(false)
}

/// Type of the array written by `matrix(indices...) = value`. `matrix` is
/// `None` when the array has no type yet, as for a variable introduced by
/// `!undefined`.
pub fn set_type(
    matrix: Option<&VariableType>,
    indices: &[VariableType],
    value: &VariableType,
) -> Result<VariableType, AccessError> {
    let Some(matrix) = matrix else {
        return undefined_set_type(indices, value);
    };

    if !matrix.is_matrix() || is_complex(value) {
        return Err(AccessError::UnsupportedAssignment {
            matrix: matrix.to_string(),
            value: value.to_string(),
        });
    }

    let shape = matrix.shape();
    let element = matrix.element_kind();
    let raw = shape.raw_num_dims().unwrap_or(0);
    let last_relevant = last_relevant_index(indices);

    if !indices.iter().all(VariableType::is_scalar) {
        let grown = if raw > 0 {
            Shape::with_dims(raw.max(last_relevant + 1))
        } else {
            Shape::undefined()
        };

        return Ok(VariableType::dynamic_matrix(element, grown));
    }

    if !value.is_scalar() {
        return Ok(matrix.clone());
    }

    if is_known_in_range(&shape, indices) {
        return Ok(matrix.clone());
    }

    let grown = if last_relevant == 0 {
        if raw == 2 && shape.extent(0) == Some(1) {
            Shape::row()
        } else if shape.is_known_1d() {
            Shape::new_1d()
        } else {
            Shape::with_dims(raw)
        }
    } else if last_relevant < raw {
        Shape::with_dims(raw)
    } else if raw > 0 {
        Shape::with_dims(last_relevant + 1)
    } else {
        Shape::undefined()
    };

    Ok(VariableType::dynamic_matrix(element, grown))
}

/// Single constant index into a vector of known length, not past its end
fn is_known_in_range(shape: &Shape, indices: &[VariableType]) -> bool {
    let [index] = indices else {
        return false;
    };

    if shape.is_known_empty() || !shape.is_fully_defined() {
        return false;
    }

    if shape.raw_num_dims().is_none_or(|raw| raw > 2) {
        return false;
    }

    if shape.extent(0) != Some(1) && shape.extent(1) != Some(1) {
        return false;
    }

    match (constant_index(index), shape.num_elements()) {
        (Some(position), Ok(count)) => position <= count,
        _ => false,
    }
}

fn undefined_set_type(indices: &[VariableType], value: &VariableType) -> Result<VariableType, AccessError> {
    if !value.is_scalar() {
        return Err(AccessError::UnsupportedAssignment {
            matrix: "an undefined array".to_owned(),
            value: value.to_string(),
        });
    }

    let shape = match indices {
        [] => Shape::undefined(),
        [index] => match (index.constant(), constant_index(index)) {
            (_, Some(columns)) if index.is_scalar() => Shape::row_of(columns),
            (Some(value), None) if value <= 0.0 => return Err(AccessError::NonPositiveIndex(value)),
            (Some(value), None) => {
                warn!("array is created by writing at index {value}, which is not an integer");
                Shape::row()
            }
            _ => Shape::row(),
        },
        indices => Shape::with_dims(indices.len()),
    };

    Ok(VariableType::dynamic_matrix(value.element_kind(), shape))
}

/// Value of `end` at `index` of an access with `num_indices` indices, when it
/// is known at compile time
pub fn end_value(matrix: &VariableType, index: usize, num_indices: usize) -> Option<usize> {
    if !matrix.is_matrix() {
        return Some(1);
    }

    let shape = matrix.shape();
    let raw = shape.raw_num_dims()?;

    if num_indices == 1 {
        return shape.num_elements().ok();
    }

    if index >= raw {
        warn!("`end` at index {index} is past the last dimension of {matrix}, assuming 1");
        return Some(1);
    }

    if index + 1 < num_indices || num_indices == raw {
        return shape.extent(index);
    }

    (index..raw).try_fold(1usize, |acc, dim| acc.checked_mul(shape.extent(dim)?))
}
