//! Built-in functions callable from any module.
//!
//! Every entry of the table derives the output types of a call from its
//! argument types, or declines the call. Resolution never touches the IR, the
//! caller turns the result into a typed call.

use hashbrown::HashMap;
use itertools::Itertools;
use once_cell::sync::Lazy;

use crate::{
    frontend::intern::Symbol,
    middle::{
        inference::mangle,
        scalar::ScalarKind,
        shape::Shape,
        ty::{FunctionType, TypeKind, VariableType},
    },
};

/// A call site as seen by an overload resolver
#[derive(Debug, Clone, Copy)]
pub struct CallRequest<'a> {
    pub function: Symbol,
    pub arguments: &'a [VariableType],
    /// Number of destinations at the call site
    pub num_outputs: usize,
    pub propagate_constants: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ResolvedCall {
    pub instance: Symbol,
    pub function_type: FunctionType,
}

struct SystemFunction {
    resolve: fn(&CallRequest) -> Option<Vec<VariableType>>,
    pure: bool,
}

impl SystemFunction {
    fn pure(resolve: fn(&CallRequest) -> Option<Vec<VariableType>>) -> Self {
        Self {
            resolve,
            pure: true,
        }
    }

    fn impure(resolve: fn(&CallRequest) -> Option<Vec<VariableType>>) -> Self {
        Self {
            resolve,
            pure: false,
        }
    }
}

static SYSTEM_FUNCTIONS: Lazy<HashMap<&'static str, SystemFunction>> = Lazy::new(|| {
    HashMap::from([
        ("plus", SystemFunction::pure(|r| arithmetic(r, |a, b| a + b))),
        ("minus", SystemFunction::pure(|r| arithmetic(r, |a, b| a - b))),
        ("times", SystemFunction::pure(|r| arithmetic(r, |a, b| a * b))),
        ("rdivide", SystemFunction::pure(|r| arithmetic(r, |a, b| a / b))),
        ("uminus", SystemFunction::pure(unary_minus)),
        ("lt", SystemFunction::pure(|r| comparison(r, |a, b| a < b))),
        ("le", SystemFunction::pure(|r| comparison(r, |a, b| a <= b))),
        ("gt", SystemFunction::pure(|r| comparison(r, |a, b| a > b))),
        ("ge", SystemFunction::pure(|r| comparison(r, |a, b| a >= b))),
        ("eq", SystemFunction::pure(|r| comparison(r, |a, b| a == b))),
        ("ne", SystemFunction::pure(|r| comparison(r, |a, b| a != b))),
        ("and", SystemFunction::pure(|r| comparison(r, |a, b| a != 0.0 && b != 0.0))),
        ("or", SystemFunction::pure(|r| comparison(r, |a, b| a != 0.0 || b != 0.0))),
        ("not", SystemFunction::pure(logical_not)),
        ("max", SystemFunction::pure(|r| extremum(r, f64::max))),
        ("min", SystemFunction::pure(|r| extremum(r, f64::min))),
        ("numel", SystemFunction::pure(numel)),
        ("ndims", SystemFunction::pure(ndims)),
        ("size", SystemFunction::pure(size)),
        ("zeros", SystemFunction::pure(|r| filled(r, 0.0))),
        ("ones", SystemFunction::pure(|r| filled(r, 1.0))),
        ("new_array_from_dims", SystemFunction::pure(new_array_from_dims)),
        ("reserve_capacity", SystemFunction::impure(reserve_capacity)),
        ("disp", SystemFunction::impure(display)),
    ])
});

pub fn is_system_function(name: Symbol) -> bool {
    SYSTEM_FUNCTIONS.contains_key(name.value())
}

/// Finds the overload of a system function matching `request`. The error
/// names the function and the argument types.
pub fn resolve_system_call(request: &CallRequest) -> Result<ResolvedCall, String> {
    let no_overload = || {
        format!(
            "no overload of `{}` accepts ({})",
            request.function,
            request.arguments.iter().join(", ")
        )
    };

    let function = SYSTEM_FUNCTIONS
        .get(request.function.value())
        .ok_or_else(no_overload)?;
    let outputs = (function.resolve)(request).ok_or_else(no_overload)?;

    if request.num_outputs > outputs.len() {
        return Err(format!(
            "`{}` returns {} values but {} were requested",
            request.function,
            outputs.len(),
            request.num_outputs
        ));
    }

    let inputs = request
        .arguments
        .iter()
        .map(VariableType::without_constant)
        .collect::<Vec<_>>();
    let outputs = outputs
        .into_iter()
        .map(|output| output.with_weak(false))
        .collect();

    Ok(ResolvedCall {
        instance: mangle(request.function, &inputs),
        function_type: FunctionType::new(inputs, outputs, function.pure),
    })
}

/// Element kind of the result of an arithmetic operation. Logical operands
/// are promoted to double.
fn arithmetic_kind(a: ScalarKind, b: ScalarKind) -> ScalarKind {
    match a.widen(b) {
        ScalarKind::Logical => ScalarKind::Double,
        kind => kind,
    }
}

/// Shape of an elementwise operation, `None` when the operands can not be
/// broadcast together
fn elementwise_shape(a: &VariableType, b: &VariableType) -> Option<Shape> {
    match (a.is_matrix(), b.is_matrix()) {
        (false, false) => Some(Shape::scalar()),
        (true, false) => Some(a.shape()),
        (false, true) => Some(b.shape()),
        (true, true) => {
            let (shape_a, shape_b) = (a.shape(), b.shape());

            if shape_a.is_scalar() {
                Some(shape_b)
            } else if shape_b.is_scalar() {
                Some(shape_a)
            } else if shape_a.raw_num_dims() != shape_b.raw_num_dims()
                && shape_a.is_fully_defined()
                && shape_b.is_fully_defined()
            {
                None
            } else {
                Some(shape_a.combine(&shape_b))
            }
        }
    }
}

fn binary_operands<'a>(request: &CallRequest<'a>) -> Option<(&'a VariableType, &'a VariableType)> {
    match request.arguments {
        [a, b] => Some((a, b)),
        _ => None,
    }
}

fn fold(request: &CallRequest, a: &VariableType, b: &VariableType) -> Option<(f64, f64)> {
    if !request.propagate_constants {
        return None;
    }

    Some((a.constant()?, b.constant()?))
}

fn array_result(
    operands: [&VariableType; 2],
    element: ScalarKind,
    shape: Shape,
) -> VariableType {
    let both_static = operands
        .iter()
        .all(|ty| !ty.is_matrix() || matches!(ty.kind(), TypeKind::StaticMatrix { .. }));

    if both_static && shape.is_fully_defined() {
        if let Ok(ty) = VariableType::static_matrix(element, shape.clone()) {
            return ty;
        }
    }

    VariableType::dynamic_matrix(element, shape)
}

fn arithmetic(request: &CallRequest, operation: fn(f64, f64) -> f64) -> Option<Vec<VariableType>> {
    let (a, b) = binary_operands(request)?;

    if matches!(a.kind(), TypeKind::Complex(_)) || matches!(b.kind(), TypeKind::Complex(_)) {
        if a.is_matrix() || b.is_matrix() {
            return None;
        }

        let kind = arithmetic_kind(a.element_kind(), b.element_kind());
        return Some(vec![VariableType::complex(kind)]);
    }

    let kind = arithmetic_kind(a.element_kind(), b.element_kind());

    if a.is_scalar() && b.is_scalar() {
        let folded = fold(request, a, b)
            .map(|(x, y)| operation(x, y))
            .filter(|v| v.is_finite());

        return Some(vec![match folded {
            Some(value) => VariableType::scalar_constant(kind, value),
            None => VariableType::scalar(kind),
        }]);
    }

    let shape = elementwise_shape(a, b)?;
    Some(vec![array_result([a, b], kind, shape)])
}

fn unary_minus(request: &CallRequest) -> Option<Vec<VariableType>> {
    let [operand] = request.arguments else {
        return None;
    };

    let kind = arithmetic_kind(operand.element_kind(), operand.element_kind());
    let negated = operand.with_element_kind(kind);

    Some(vec![match operand.constant() {
        Some(value) if request.propagate_constants => negated.with_constant(Some(-value)),
        _ => negated.without_constant(),
    }])
}

fn comparison(request: &CallRequest, operation: fn(f64, f64) -> bool) -> Option<Vec<VariableType>> {
    let (a, b) = binary_operands(request)?;

    if matches!(a.kind(), TypeKind::Complex(_)) || matches!(b.kind(), TypeKind::Complex(_)) {
        return None;
    }

    if a.is_scalar() && b.is_scalar() {
        return Some(vec![match fold(request, a, b) {
            Some((x, y)) => {
                VariableType::scalar_constant(ScalarKind::Logical, operation(x, y) as u8 as f64)
            }
            None => VariableType::logical(),
        }]);
    }

    let shape = elementwise_shape(a, b)?;
    Some(vec![array_result([a, b], ScalarKind::Logical, shape)])
}

fn logical_not(request: &CallRequest) -> Option<Vec<VariableType>> {
    let [operand] = request.arguments else {
        return None;
    };

    if matches!(operand.kind(), TypeKind::Complex(_)) {
        return None;
    }

    let negated = operand.with_element_kind(ScalarKind::Logical);

    Some(vec![match operand.constant() {
        Some(value) if request.propagate_constants => {
            negated.with_constant(Some((value == 0.0) as u8 as f64))
        }
        _ => negated.without_constant(),
    }])
}

fn extremum(request: &CallRequest, operation: fn(f64, f64) -> f64) -> Option<Vec<VariableType>> {
    let (a, b) = binary_operands(request)?;

    if !a.is_scalar() || !b.is_scalar() {
        return None;
    }

    let kind = a.element_kind().widen(b.element_kind());

    Some(vec![match fold(request, a, b) {
        Some((x, y)) => VariableType::scalar_constant(kind, operation(x, y)),
        None => VariableType::scalar(kind),
    }])
}

fn known_count(value: Option<usize>, request: &CallRequest) -> VariableType {
    match value {
        Some(value) if request.propagate_constants => match i64::try_from(value) {
            Ok(value) => VariableType::int_constant(value),
            Err(_) => VariableType::int(),
        },
        _ => VariableType::int(),
    }
}

fn numel(request: &CallRequest) -> Option<Vec<VariableType>> {
    let [operand] = request.arguments else {
        return None;
    };

    Some(vec![known_count(operand.shape().num_elements().ok(), request)])
}

fn ndims(request: &CallRequest) -> Option<Vec<VariableType>> {
    let [operand] = request.arguments else {
        return None;
    };

    Some(vec![known_count(operand.shape().raw_num_dims(), request)])
}

/// Product of the extents of dimensions `from..to`
fn extent_product(shape: &Shape, from: usize, to: usize) -> Option<usize> {
    (from..to).try_fold(1usize, |acc, dim| acc.checked_mul(shape.extent(dim)?))
}

fn size(request: &CallRequest) -> Option<Vec<VariableType>> {
    match request.arguments {
        [matrix, dim] => {
            if !dim.is_scalar() {
                return None;
            }

            let extent = dim
                .constant()
                .filter(|d| *d >= 1.0)
                .and_then(|d| matrix.shape().extent(d as usize - 1));

            Some(vec![known_count(extent, request)])
        }
        [matrix] if request.num_outputs <= 1 => {
            let shape = matrix.shape();

            let result = match shape.raw_num_dims() {
                Some(raw) => {
                    let extents = shape.dims().iter().copied().collect::<Option<Vec<_>>>();

                    match extents {
                        Some(extents) if request.propagate_constants => Shape::with_values(
                            &[1, raw],
                            extents.into_iter().map(|e| e as f64).collect(),
                        )
                        .ok()?,
                        _ => Shape::row_of(raw),
                    }
                }
                None => Shape::row(),
            };

            Some(vec![VariableType::dynamic_matrix(ScalarKind::Int32, result)])
        }
        [matrix] => {
            let shape = matrix.shape();
            let count = request.num_outputs;

            let mut outputs = (0..count - 1)
                .map(|dim| known_count(shape.extent(dim), request))
                .collect::<Vec<_>>();

            let rest = shape
                .raw_num_dims()
                .and_then(|raw| extent_product(&shape, count - 1, raw.max(count)));
            outputs.push(known_count(rest, request));

            Some(outputs)
        }
        _ => None,
    }
}

/// Extents given as scalar arguments, unknown where the argument is not a
/// known constant
fn requested_dims(arguments: &[VariableType]) -> Option<Vec<Option<usize>>> {
    arguments
        .iter()
        .map(|argument| {
            argument.is_scalar().then(|| {
                argument
                    .constant()
                    .filter(|c| *c >= 0.0)
                    .map(|c| c as usize)
            })
        })
        .collect()
}

fn filled(request: &CallRequest, value: f64) -> Option<Vec<VariableType>> {
    let dims = requested_dims(request.arguments)?;

    let shape = match dims.as_slice() {
        [] => return Some(vec![VariableType::scalar_constant(ScalarKind::Double, value)]),
        [Some(n)] => Shape::from_literal_dims(&[*n, *n]),
        [None] => Shape::undefined_square(),
        dims => Shape::from_dims(dims.iter().copied()),
    };

    Some(vec![VariableType::dynamic_matrix(ScalarKind::Double, shape)])
}

fn new_array_from_dims(request: &CallRequest) -> Option<Vec<VariableType>> {
    let dims = requested_dims(request.arguments)?;

    if dims.is_empty() {
        return None;
    }

    Some(vec![VariableType::dynamic_matrix(
        ScalarKind::Double,
        Shape::from_dims(dims),
    )])
}

/// `reserve_capacity(A, d1, ..., dn)` grows the storage of `A` to hold the
/// given extents, keeping its contents
fn reserve_capacity(request: &CallRequest) -> Option<Vec<VariableType>> {
    let (matrix, dims) = request.arguments.split_first()?;

    if !matrix.is_matrix() || dims.is_empty() || !dims.iter().all(VariableType::is_scalar) {
        return None;
    }

    Some(vec![matrix.clone()])
}

fn display(request: &CallRequest) -> Option<Vec<VariableType>> {
    match request.arguments {
        [_] => Some(Vec::new()),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;
    use crate::middle::ssa::pretty_print::plain;

    fn resolve(function: &str, arguments: &[VariableType]) -> Result<ResolvedCall, String> {
        resolve_with_outputs(function, arguments, 1)
    }

    fn resolve_with_outputs(
        function: &str,
        arguments: &[VariableType],
        num_outputs: usize,
    ) -> Result<ResolvedCall, String> {
        resolve_system_call(&CallRequest {
            function: Symbol::new(function),
            arguments,
            num_outputs,
            propagate_constants: true,
        })
    }

    fn output(function: &str, arguments: &[VariableType]) -> VariableType {
        resolve(function, arguments).unwrap().function_type.outputs[0].clone()
    }

    #[test]
    fn arithmetic_widens_and_folds() {
        let sum = resolve(
            "plus",
            &[VariableType::int_constant(1), VariableType::int_constant(2)],
        )
        .unwrap();

        assert_eq!(sum.instance, Symbol::new("plus_ii"));
        assert_eq!(sum.function_type.inputs, [VariableType::int(), VariableType::int()]);
        assert_eq!(sum.function_type.outputs, [VariableType::int_constant(3)]);
        assert!(sum.function_type.pure);

        assert_eq!(
            output("times", &[VariableType::int(), VariableType::double()]),
            VariableType::double()
        );
        assert_eq!(
            output("minus", &[VariableType::logical(), VariableType::logical()]),
            VariableType::double()
        );
    }

    #[test]
    fn folding_can_be_disabled() {
        let arguments = [VariableType::int_constant(1), VariableType::int_constant(2)];
        let resolved = resolve_system_call(&CallRequest {
            function: Symbol::new("plus"),
            arguments: &arguments,
            num_outputs: 1,
            propagate_constants: false,
        })
        .unwrap();

        assert_eq!(resolved.function_type.outputs, [VariableType::int()]);
    }

    #[test]
    fn division_by_zero_is_not_folded() {
        assert_eq!(
            output(
                "rdivide",
                &[VariableType::int_constant(1), VariableType::int_constant(0)]
            ),
            VariableType::int()
        );
    }

    #[test]
    fn elementwise_with_matrices() {
        let row = VariableType::dynamic_matrix(ScalarKind::Double, Shape::row());

        assert_eq!(output("plus", &[row.clone(), VariableType::int()]), row);
        assert_eq!(
            output("lt", &[VariableType::double(), row]),
            VariableType::dynamic_matrix(ScalarKind::Logical, Shape::row())
        );
    }

    #[test]
    fn comparisons_and_logic() {
        assert_eq!(
            output(
                "le",
                &[VariableType::int_constant(1), VariableType::int_constant(2)]
            ),
            VariableType::scalar_constant(ScalarKind::Logical, 1.0)
        );
        assert_eq!(
            output("not", &[VariableType::int_constant(0)]),
            VariableType::scalar_constant(ScalarKind::Logical, 1.0)
        );
        assert_eq!(
            output("and", &[VariableType::logical(), VariableType::logical()]),
            VariableType::logical()
        );
    }

    #[test]
    fn shape_queries() {
        let matrix = VariableType::dynamic_matrix(
            ScalarKind::Double,
            Shape::from_dims([Some(2), None, Some(4)]),
        );

        assert_eq!(output("numel", &[matrix.clone()]), VariableType::int());
        assert_eq!(output("ndims", &[matrix.clone()]), VariableType::int_constant(3));
        assert_eq!(
            output("size", &[matrix.clone(), VariableType::int_constant(3)]),
            VariableType::int_constant(4)
        );
        assert_eq!(
            output("size", &[matrix.clone()]),
            VariableType::dynamic_matrix(ScalarKind::Int32, Shape::row_of(3))
        );

        let outputs = resolve_with_outputs("size", &[matrix], 2)
            .unwrap()
            .function_type
            .outputs;
        assert_eq!(outputs, [VariableType::int_constant(2), VariableType::int()]);
    }

    #[test]
    fn size_with_trailing_fold() {
        let cube =
            VariableType::dynamic_matrix(ScalarKind::Double, Shape::from_literal_dims(&[2, 3, 4]));

        let outputs = resolve_with_outputs("size", &[cube], 2)
            .unwrap()
            .function_type
            .outputs;
        assert_eq!(
            outputs,
            [VariableType::int_constant(2), VariableType::int_constant(12)]
        );
    }

    #[test]
    fn counts_overflowing_a_word_are_unknown() {
        let huge = VariableType::dynamic_matrix(
            ScalarKind::Double,
            Shape::from_literal_dims(&[2, 1 << 32, 1 << 32]),
        );

        assert_eq!(output("numel", &[huge.clone()]), VariableType::int());
        assert_eq!(output("ndims", &[huge.clone()]), VariableType::int_constant(3));

        let outputs = resolve_with_outputs("size", &[huge], 2)
            .unwrap()
            .function_type
            .outputs;
        assert_eq!(outputs, [VariableType::int_constant(2), VariableType::int()]);

        let ten_billion = VariableType::int_constant(10_000_000_000);
        let square = output("zeros", &[ten_billion.clone(), ten_billion]);
        assert_eq!(square.shape(), Shape::from_literal_dims(&[10_000_000_000, 10_000_000_000]));
        assert_eq!(output("numel", &[square]), VariableType::int());
    }

    #[test]
    fn constructors() {
        assert_eq!(
            output("zeros", &[]),
            VariableType::scalar_constant(ScalarKind::Double, 0.0)
        );
        assert_eq!(
            output("ones", &[VariableType::int_constant(3)]),
            VariableType::dynamic_matrix(ScalarKind::Double, Shape::from_literal_dims(&[3, 3]))
        );
        assert_eq!(
            output("zeros", &[VariableType::int()]),
            VariableType::dynamic_matrix(ScalarKind::Double, Shape::undefined_square())
        );
        assert_eq!(
            output(
                "new_array_from_dims",
                &[VariableType::int_constant(1), VariableType::int()]
            ),
            VariableType::dynamic_matrix(ScalarKind::Double, Shape::row())
        );
    }

    #[test]
    fn impure_functions() {
        let shown = resolve_with_outputs("disp", &[VariableType::double()], 0).unwrap();

        assert!(!shown.function_type.pure);
        assert!(shown.function_type.outputs.is_empty());
    }

    #[test]
    fn failures_name_the_call() {
        assert_eq!(
            resolve("max", &[VariableType::int()]).map_err(|e| plain(&e)),
            Err("no overload of `max` accepts (int32)".to_owned())
        );
        assert!(resolve("frobnicate", &[]).is_err());
        assert!(resolve_with_outputs("numel", &[VariableType::int()], 2).is_err());
        assert!(is_system_function(Symbol::new("zeros")));
        assert!(!is_system_function(Symbol::new("f")));
    }
}
