//! Shape lattice for array values.
//!
//! A [`Shape`] records what is statically known about the extents of an
//! array: possibly nothing (undefined), possibly only its rank, possibly every
//! extent and even the element values. Shapes are canonicalized on
//! construction so that structurally different descriptions of the same
//! knowledge compare equal:
//!
//!   - at least 2 dimensions are stored (`[3]` becomes `[3, 1]`)
//!   - trailing singleton dimensions after the second are dropped
//!     (`[2, 3, 1, 1]` becomes `[2, 3]`)
//!
//! [`Shape::combine`] is the join of the lattice: it returns the most specific
//! shape that describes every value described by either input.

use itertools::Itertools;
use thiserror::Error;
use tracing::info;

#[derive(Debug, Clone, PartialEq, Error)]
pub enum ShapeError {
    #[error("shape of the array is undefined")]
    Undefined,
    #[error("dimension {dim} of shape {shape} is undefined")]
    UndefinedDimension { dim: usize, shape: String },
    #[error("dimension {dim} of shape {shape} is not known because the array is empty")]
    KnownEmpty { dim: usize, shape: String },
    #[error("dimension {dim} exceeds the rank of shape {shape}")]
    OutOfRange { dim: usize, shape: String },
    #[error("element count of shape {shape} does not fit in a machine word")]
    ElementCountOverflow { shape: String },
    #[error("shape {shape} has {expected} elements but {found} values were given")]
    ValueCountMismatch {
        shape: String,
        expected: usize,
        found: usize,
    },
}

/// Classification derived from the stored dimensions
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ShapeClass {
    Undefined,
    /// All dimensions are 1
    Scalar,
    /// `[1, N]` with `N` not known to be 1
    Row,
    /// `[N, 1]` with `N` not known to be 1
    Column,
    Matrix,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Shape {
    /// Extents, `None` meaning unknown. Empty means the rank itself is
    /// unknown.
    dims: Vec<Option<usize>>,
    /// Element values in column-major order, only when every extent is known
    values: Vec<f64>,
    /// Known to be a row or column, without knowing which
    force_1d: bool,
    /// Two unknown extents which are known to be equal
    square: bool,
}

impl Shape {
    fn build(dims: Vec<Option<usize>>, force_1d: bool, square: bool) -> Self {
        if dims.len() == 1 {
            info!("creating shape with a single dimension, assuming column vector");
        }

        Self {
            dims: canonicalize(dims),
            values: Vec::new(),
            force_1d,
            square,
        }
    }

    pub fn undefined() -> Self {
        Self::build(Vec::new(), false, false)
    }

    pub fn scalar() -> Self {
        Self::from_literal_dims(&[1, 1])
    }

    /// `[1, ?]`
    pub fn row() -> Self {
        Self::build(vec![Some(1), None], false, false)
    }

    pub fn row_of(columns: usize) -> Self {
        Self::from_literal_dims(&[1, columns])
    }

    /// `[?, 1]`
    pub fn column() -> Self {
        Self::build(vec![None, Some(1)], false, false)
    }

    pub fn column_of(rows: usize) -> Self {
        Self::from_literal_dims(&[rows, 1])
    }

    /// A vector known to be either a row or a column
    pub fn new_1d() -> Self {
        Self::build(vec![None, None], true, false)
    }

    /// `[0, 0]`
    pub fn empty() -> Self {
        Self::from_literal_dims(&[0, 0])
    }

    /// A square matrix whose side is unknown
    pub fn undefined_square() -> Self {
        Self::build(vec![None, None], false, true)
    }

    /// Rank `n` with every extent unknown. A rank of 0 gives an undefined
    /// shape.
    pub fn with_dims(n: usize) -> Self {
        Self::build(vec![None; n], false, false)
    }

    pub fn from_dims(dims: impl IntoIterator<Item = Option<usize>>) -> Self {
        Self::build(dims.into_iter().collect(), false, false)
    }

    pub fn from_literal_dims(dims: &[usize]) -> Self {
        Self::from_dims(dims.iter().copied().map(Some))
    }

    /// Fully defined shape carrying its element values
    pub fn with_values(dims: &[usize], values: Vec<f64>) -> Result<Self, ShapeError> {
        let mut shape = Self::from_literal_dims(dims);
        let expected = shape.num_elements()?;

        if expected != values.len() {
            return Err(ShapeError::ValueCountMismatch {
                shape: shape.to_string(),
                expected,
                found: values.len(),
            });
        }

        shape.values = values;
        Ok(shape)
    }

    pub fn class(&self) -> ShapeClass {
        match self.dims.as_slice() {
            [] => ShapeClass::Undefined,
            [Some(1), second] if *second != Some(1) => ShapeClass::Row,
            [first, Some(1)] if *first != Some(1) => ShapeClass::Column,
            dims if dims.iter().all(|d| *d == Some(1)) => ShapeClass::Scalar,
            _ => ShapeClass::Matrix,
        }
    }

    pub fn is_undefined(&self) -> bool {
        self.dims.is_empty()
    }

    pub fn is_scalar(&self) -> bool {
        self.class() == ShapeClass::Scalar
    }

    /// Number of dimensions with vectors counted as 1 and scalars as 0.
    /// `None` if the rank is unknown.
    pub fn num_dims(&self) -> Option<usize> {
        match self.class() {
            ShapeClass::Undefined => None,
            ShapeClass::Scalar => Some(0),
            ShapeClass::Row | ShapeClass::Column => Some(1),
            ShapeClass::Matrix => Some(self.dims.len()),
        }
    }

    /// Number of stored dimensions (always at least 2 when defined)
    pub fn raw_num_dims(&self) -> Option<usize> {
        (!self.dims.is_empty()).then_some(self.dims.len())
    }

    pub fn dims(&self) -> &[Option<usize>] {
        &self.dims
    }

    /// Extent of dimension `dim`, `None` if unknown. Positions past the stored
    /// rank are singletons.
    pub fn extent(&self, dim: usize) -> Option<usize> {
        match self.dims.get(dim) {
            Some(extent) => *extent,
            None if self.is_undefined() => None,
            None => Some(1),
        }
    }

    /// Known extent of dimension `dim`
    pub fn dim(&self, dim: usize) -> Result<usize, ShapeError> {
        if self.is_undefined() {
            return Err(ShapeError::Undefined);
        }

        if self.is_known_empty() {
            return match self.dims.get(dim) {
                Some(Some(0)) => Ok(0),
                _ => Err(ShapeError::KnownEmpty {
                    dim,
                    shape: self.to_string(),
                }),
            };
        }

        match self.dims.get(dim) {
            Some(Some(extent)) => Ok(*extent),
            Some(None) => Err(ShapeError::UndefinedDimension {
                dim,
                shape: self.to_string(),
            }),
            None => Err(ShapeError::OutOfRange {
                dim,
                shape: self.to_string(),
            }),
        }
    }

    /// Total element count. Fails unless the shape is fully defined.
    pub fn num_elements(&self) -> Result<usize, ShapeError> {
        if self.is_undefined() {
            return Err(ShapeError::Undefined);
        }

        self.dims
            .iter()
            .enumerate()
            .try_fold(1usize, |acc, (dim, extent)| match extent {
                Some(extent) => acc
                    .checked_mul(*extent)
                    .ok_or_else(|| ShapeError::ElementCountOverflow {
                        shape: self.to_string(),
                    }),
                None => Err(ShapeError::UndefinedDimension {
                    dim,
                    shape: self.to_string(),
                }),
            })
    }

    pub fn is_fully_defined(&self) -> bool {
        !self.is_undefined() && self.dims.iter().all(Option::is_some)
    }

    /// Any dimension is known to be 0
    pub fn is_known_empty(&self) -> bool {
        self.dims.contains(&Some(0))
    }

    pub fn is_known_row(&self) -> bool {
        self.dims.len() == 2 && self.dims[0] == Some(1)
    }

    pub fn is_known_column(&self) -> bool {
        !self.is_undefined() && self.dims[1..].iter().all(|d| *d == Some(1))
    }

    pub fn is_known_1d(&self) -> bool {
        self.force_1d || self.is_known_row() || self.is_known_column()
    }

    /// Known to have at least one non-singleton dimension and no empty one
    /// before it
    pub fn is_known_multi_dimensional(&self) -> bool {
        for dim in self.dims.iter().flatten() {
            if *dim == 0 {
                return false;
            }
            if *dim > 1 {
                return true;
            }
        }

        false
    }

    pub fn is_square(&self) -> bool {
        if self.square {
            return true;
        }

        matches!(self.dims.as_slice(), [Some(a), Some(b)] if a == b && *a > 0)
    }

    pub fn values(&self) -> &[f64] {
        &self.values
    }

    pub fn has_values(&self) -> bool {
        !self.values.is_empty()
    }

    pub fn without_values(&self) -> Self {
        Self {
            values: Vec::new(),
            ..self.clone()
        }
    }

    /// Join of two shapes
    pub fn combine(&self, other: &Shape) -> Shape {
        if self.is_undefined() || other.is_undefined() {
            return Shape::undefined();
        }

        if self == other {
            return self.clone();
        }

        if self.is_scalar() && other.is_scalar() {
            return Shape::scalar();
        }

        if self.is_known_row() && other.is_known_row() {
            return Shape::row();
        }

        if self.is_known_column() && other.is_known_column() {
            return Shape::column();
        }

        if self.is_known_1d() && other.is_known_1d() {
            return Shape::new_1d();
        }

        if self.dims.len() == other.dims.len() {
            return Shape::with_dims(self.dims.len());
        }

        Shape::undefined()
    }
}

fn canonicalize(mut dims: Vec<Option<usize>>) -> Vec<Option<usize>> {
    if dims.is_empty() {
        return dims;
    }

    while dims.len() < 2 {
        dims.push(Some(1));
    }

    let last_not_one = dims
        .iter()
        .rposition(|d| *d != Some(1))
        .unwrap_or(1)
        .max(1);
    dims.truncate(last_not_one + 1);

    dims
}

impl core::fmt::Display for Shape {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.is_undefined() {
            return write!(f, "[*]");
        }

        if self.force_1d {
            return write!(f, "[1d]");
        }

        if self.square {
            return write!(f, "[square]");
        }

        write!(
            f,
            "[{}]",
            self.dims
                .iter()
                .map(|d| d.map_or_else(|| "?".to_owned(), |d| d.to_string()))
                .join(", ")
        )?;

        if self.has_values() {
            write!(f, " {{{}}}", self.values.iter().join(", "))?;
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    fn samples() -> Vec<Shape> {
        vec![
            Shape::undefined(),
            Shape::scalar(),
            Shape::row(),
            Shape::row_of(3),
            Shape::column(),
            Shape::column_of(4),
            Shape::new_1d(),
            Shape::empty(),
            Shape::with_dims(2),
            Shape::with_dims(3),
            Shape::from_literal_dims(&[2, 3]),
            Shape::from_literal_dims(&[2, 3, 4]),
            Shape::from_dims([Some(2), None, Some(4)]),
            Shape::undefined_square(),
        ]
    }

    #[test]
    fn literal_dims_round_trip() {
        let shape = Shape::from_literal_dims(&[2, 3]);

        assert_eq!(shape.dim(0), Ok(2));
        assert_eq!(shape.dim(1), Ok(3));
        assert_eq!(shape.num_dims(), Some(2));
        assert_eq!(shape.num_elements(), Ok(6));
    }

    #[test]
    fn canonical_form() {
        assert_eq!(
            Shape::from_literal_dims(&[2, 3, 1, 1]),
            Shape::from_literal_dims(&[2, 3])
        );
        assert_eq!(Shape::from_literal_dims(&[3]), Shape::column_of(3));
        assert_eq!(Shape::from_literal_dims(&[1, 1, 1]), Shape::scalar());
        assert_eq!(Shape::with_dims(0), Shape::undefined());
        assert_eq!(Shape::from_literal_dims(&[2, 1, 3]).dims().len(), 3);
    }

    #[test]
    fn classification() {
        assert_eq!(Shape::undefined().num_dims(), None);
        assert_eq!(Shape::scalar().num_dims(), Some(0));
        assert_eq!(Shape::row().num_dims(), Some(1));
        assert_eq!(Shape::column_of(5).num_dims(), Some(1));
        assert_eq!(Shape::with_dims(3).num_dims(), Some(3));

        assert!(Shape::scalar().is_known_row());
        assert!(Shape::scalar().is_known_column());
        assert!(Shape::new_1d().is_known_1d());
        assert!(!Shape::with_dims(2).is_known_1d());
        assert!(Shape::from_dims([None, Some(0)]).is_known_empty());
        assert!(Shape::from_literal_dims(&[2, 2]).is_square());
        assert!(Shape::undefined_square().is_square());
        assert!(!Shape::from_literal_dims(&[0, 0]).is_square());
        assert!(Shape::from_literal_dims(&[1, 3]).is_known_multi_dimensional());
        assert!(!Shape::from_literal_dims(&[0, 3]).is_known_multi_dimensional());
    }

    #[test]
    fn element_count_requires_full_definition() {
        assert_eq!(Shape::undefined().num_elements(), Err(ShapeError::Undefined));
        assert!(matches!(
            Shape::row().num_elements(),
            Err(ShapeError::UndefinedDimension { dim: 1, .. })
        ));
        assert_eq!(Shape::empty().num_elements(), Ok(0));
    }

    #[test]
    fn element_count_overflow_is_an_error() {
        let huge = Shape::from_literal_dims(&[1 << 32, 1 << 32]);

        assert!(matches!(
            huge.num_elements(),
            Err(ShapeError::ElementCountOverflow { .. })
        ));
        assert!(!huge.is_known_empty());
    }

    #[test]
    fn dim_queries() {
        let shape = Shape::from_dims([Some(2), None]);
        assert!(matches!(
            shape.dim(1),
            Err(ShapeError::UndefinedDimension { dim: 1, .. })
        ));
        assert!(matches!(shape.dim(2), Err(ShapeError::OutOfRange { dim: 2, .. })));
        assert_eq!(shape.extent(2), Some(1));
        assert_eq!(shape.extent(1), None);

        let empty = Shape::from_dims([Some(0), None]);
        assert_eq!(empty.dim(0), Ok(0));
        assert!(matches!(empty.dim(1), Err(ShapeError::KnownEmpty { dim: 1, .. })));
    }

    #[test]
    fn values_must_match_element_count() {
        let shape = Shape::with_values(&[1, 3], vec![1.0, 2.0, 3.0]).unwrap();
        assert!(shape.has_values());
        assert!(!shape.without_values().has_values());

        assert!(matches!(
            Shape::with_values(&[2, 2], vec![1.0]),
            Err(ShapeError::ValueCountMismatch {
                expected: 4,
                found: 1,
                ..
            })
        ));
    }

    #[test]
    fn combine_specific_cases() {
        assert_eq!(Shape::row_of(3).combine(&Shape::row_of(4)), Shape::row());
        assert_eq!(
            Shape::column_of(3).combine(&Shape::column()),
            Shape::column()
        );
        assert_eq!(Shape::row_of(3).combine(&Shape::column_of(3)), Shape::new_1d());
        assert_eq!(
            Shape::from_literal_dims(&[2, 3]).combine(&Shape::from_literal_dims(&[4, 5])),
            Shape::with_dims(2)
        );
        assert_eq!(
            Shape::from_literal_dims(&[2, 3]).combine(&Shape::from_literal_dims(&[2, 3, 4])),
            Shape::undefined()
        );

        let with_values = Shape::with_values(&[1, 1], vec![3.0]).unwrap();
        assert_eq!(with_values.combine(&Shape::scalar()), Shape::scalar());
    }

    #[test]
    fn combine_is_a_join() {
        for a in samples() {
            assert_eq!(a.combine(&a), a, "idempotence of {a}");
            assert_eq!(
                a.combine(&Shape::undefined()),
                Shape::undefined(),
                "undefined absorbs {a}"
            );

            for b in samples() {
                assert_eq!(a.combine(&b), b.combine(&a), "commutativity of {a} and {b}");
            }
        }
    }

    #[test]
    fn combine_is_associative_on_vectors() {
        let vectors = [
            Shape::scalar(),
            Shape::row_of(2),
            Shape::row(),
            Shape::column_of(3),
            Shape::column(),
            Shape::new_1d(),
        ];

        for a in &vectors {
            for b in &vectors {
                for c in &vectors {
                    assert_eq!(
                        a.combine(b).combine(c),
                        a.combine(&b.combine(c)),
                        "associativity of {a}, {b}, {c}"
                    );
                }
            }
        }
    }
}
