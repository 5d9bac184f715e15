//! Merging of the types of values which flow into the same variable.

use crate::middle::{
    shape::Shape,
    ty::{TypeKind, VariableType},
};

/// Smallest type describing values of both `a` and `b`, `None` if the two
/// can not share a representation
pub fn combine_types(a: &VariableType, b: &VariableType) -> Option<VariableType> {
    let weak = a.is_weak() && b.is_weak();

    let combined = match (a.kind(), b.kind()) {
        (
            TypeKind::Scalar {
                kind: kind_a,
                constant: constant_a,
            },
            TypeKind::Scalar {
                kind: kind_b,
                constant: constant_b,
            },
        ) => {
            let kind = kind_a.widen(*kind_b);
            let constant = match (constant_a, constant_b) {
                (Some(x), Some(y)) if kind.coerce_constant(*x) == kind.coerce_constant(*y) => {
                    Some(*x)
                }
                _ => None,
            };

            match constant {
                Some(value) => VariableType::scalar_constant(kind, value),
                None => VariableType::scalar(kind),
            }
        }
        (TypeKind::Complex(_), TypeKind::Complex(_) | TypeKind::Scalar { .. })
        | (TypeKind::Scalar { .. }, TypeKind::Complex(_)) => {
            VariableType::complex(a.element_kind().widen(b.element_kind()))
        }
        (TypeKind::Complex(_), _) | (_, TypeKind::Complex(_)) => return None,
        (TypeKind::Scalar { .. }, _) => combine_matrices(&as_matrix(a), b),
        (_, TypeKind::Scalar { .. }) => combine_matrices(a, &as_matrix(b)),
        _ => combine_matrices(a, b),
    };

    Some(combined.with_weak(weak))
}

/// Folds [`combine_types`] over every type
pub fn combine_all<'a>(types: impl IntoIterator<Item = &'a VariableType>) -> Option<VariableType> {
    let mut types = types.into_iter();
    let first = types.next()?.clone();

    types.try_fold(first, |merged, ty| combine_types(&merged, ty))
}

fn as_matrix(scalar: &VariableType) -> VariableType {
    VariableType::dynamic_matrix(scalar.element_kind(), Shape::scalar())
}

fn combine_matrices(a: &VariableType, b: &VariableType) -> VariableType {
    let element = a.element_kind().widen(b.element_kind());
    let (shape_a, shape_b) = (a.shape(), b.shape());

    if shape_a.raw_num_dims() != shape_b.raw_num_dims() {
        return VariableType::dynamic_matrix(element, Shape::undefined());
    }

    if let (TypeKind::StaticMatrix { .. }, TypeKind::StaticMatrix { .. }) = (a.kind(), b.kind()) {
        if shape_a.dims() == shape_b.dims() {
            if let Ok(ty) = VariableType::static_matrix(element, shape_a.without_values()) {
                return ty;
            }
        }
    }

    VariableType::dynamic_matrix(element, shape_a.combine(&shape_b))
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;
    use crate::middle::scalar::ScalarKind;

    #[test]
    fn scalars_widen_and_keep_equal_constants() {
        let three = VariableType::int_constant(3);

        assert_eq!(combine_types(&three, &three), Some(three.clone()));
        assert_eq!(
            combine_types(&three, &VariableType::int_constant(4)),
            Some(VariableType::int())
        );
        assert_eq!(
            combine_types(&three, &VariableType::double()),
            Some(VariableType::double())
        );
    }

    #[test]
    fn weakness_requires_both() {
        let weak = VariableType::int().with_weak(true);

        assert!(combine_types(&weak, &weak).unwrap().is_weak());
        assert!(!combine_types(&weak, &VariableType::int()).unwrap().is_weak());
    }

    #[test]
    fn matrices() {
        let row = VariableType::dynamic_matrix(ScalarKind::Int32, Shape::row_of(3));
        let longer = VariableType::dynamic_matrix(ScalarKind::Double, Shape::row_of(5));
        let cube = VariableType::dynamic_matrix(ScalarKind::Int32, Shape::with_dims(3));

        assert_eq!(
            combine_types(&row, &longer),
            Some(VariableType::dynamic_matrix(ScalarKind::Double, Shape::row()))
        );
        assert_eq!(
            combine_types(&row, &cube),
            Some(VariableType::dynamic_matrix(
                ScalarKind::Int32,
                Shape::undefined()
            ))
        );
    }

    #[test]
    fn equal_static_shapes_stay_static() {
        let shape = Shape::from_literal_dims(&[2, 2]);
        let a = VariableType::static_matrix(ScalarKind::Int32, shape.clone()).unwrap();
        let b = VariableType::static_matrix(ScalarKind::Double, shape.clone()).unwrap();

        assert_eq!(
            combine_types(&a, &b),
            VariableType::static_matrix(ScalarKind::Double, shape).ok()
        );
    }

    #[test]
    fn scalars_join_matrices_as_singletons() {
        let column = VariableType::dynamic_matrix(ScalarKind::Double, Shape::column_of(4));

        assert_eq!(
            combine_types(&VariableType::int(), &column),
            Some(VariableType::dynamic_matrix(
                ScalarKind::Double,
                Shape::column()
            ))
        );
    }

    #[test]
    fn complex_values() {
        let complex = VariableType::complex(ScalarKind::Single);

        assert_eq!(
            combine_types(&complex, &VariableType::double()),
            Some(VariableType::complex(ScalarKind::Double))
        );
        assert_eq!(
            combine_types(
                &complex,
                &VariableType::dynamic_matrix(ScalarKind::Double, Shape::row())
            ),
            None
        );
    }

    #[test]
    fn folding() {
        let types = [
            VariableType::int_constant(1),
            VariableType::int_constant(1),
            VariableType::scalar(ScalarKind::Int8),
        ];

        assert_eq!(combine_all(&types), Some(VariableType::int()));
        assert_eq!(combine_all(std::iter::empty()), None);
    }
}
