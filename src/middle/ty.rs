use std::rc::Rc;

use colored::Colorize;
use thiserror::Error;

use crate::middle::{
    scalar::ScalarKind,
    shape::{Shape, ShapeClass, ShapeError},
};

#[derive(Debug, Clone, PartialEq, Error)]
pub enum TypeError {
    #[error("operation `{operation}` is not supported by type {ty}")]
    Unsupported { operation: &'static str, ty: String },
    #[error(transparent)]
    Shape(#[from] ShapeError),
}

/// Static type of one SSA value. Descriptors are persistent: every
/// `with_*` method returns a new descriptor and the original is shared
/// untouched by whatever IR nodes already refer to it.
#[derive(Clone, PartialEq)]
pub struct VariableType(Rc<TypeData>);

#[derive(Debug, Clone, PartialEq)]
struct TypeData {
    kind: TypeKind,
    /// Value may not be written after its definition
    immutable: bool,
    /// Type was guessed from a literal rather than proven
    weak: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub enum TypeKind {
    /// int32, double (1.5)
    ///
    /// A single number, possibly with a known value
    Scalar {
        kind: ScalarKind,
        constant: Option<f64>,
    },
    /// complex<double>
    ///
    /// A pair of real and imaginary parts, passed by output pointer
    Complex(ScalarKind),
    /// double[1, ?]
    ///
    /// Heap allocated array that may be resized
    DynamicMatrix { element: ScalarKind, shape: Shape },
    /// static double[2, 3]
    ///
    /// Array of fixed, fully known shape with inline storage
    StaticMatrix { element: ScalarKind, shape: Shape },
}

impl VariableType {
    fn from_kind(kind: TypeKind) -> Self {
        Self(Rc::new(TypeData {
            kind,
            immutable: false,
            weak: false,
        }))
    }

    pub fn scalar(kind: ScalarKind) -> Self {
        Self::from_kind(TypeKind::Scalar {
            kind,
            constant: None,
        })
    }

    pub fn scalar_constant(kind: ScalarKind, value: f64) -> Self {
        Self::from_kind(TypeKind::Scalar {
            kind,
            constant: Some(kind.coerce_constant(value)),
        })
    }

    pub fn int() -> Self {
        Self::scalar(ScalarKind::Int32)
    }

    pub fn int_constant(value: i64) -> Self {
        Self::scalar_constant(ScalarKind::Int32, value as f64)
    }

    pub fn double() -> Self {
        Self::scalar(ScalarKind::Double)
    }

    pub fn logical() -> Self {
        Self::scalar(ScalarKind::Logical)
    }

    pub fn complex(kind: ScalarKind) -> Self {
        Self::from_kind(TypeKind::Complex(kind))
    }

    pub fn dynamic_matrix(element: ScalarKind, shape: Shape) -> Self {
        Self::from_kind(TypeKind::DynamicMatrix { element, shape })
    }

    /// Fixed-size array. The shape must be fully defined.
    pub fn static_matrix(element: ScalarKind, shape: Shape) -> Result<Self, TypeError> {
        shape.num_elements()?;

        Ok(Self::from_kind(TypeKind::StaticMatrix { element, shape }))
    }

    pub fn kind(&self) -> &TypeKind {
        &self.0.kind
    }

    pub fn is_immutable(&self) -> bool {
        self.0.immutable
    }

    pub fn is_weak(&self) -> bool {
        self.0.weak
    }

    pub fn with_immutable(&self, immutable: bool) -> Self {
        Self(Rc::new(TypeData {
            immutable,
            ..(*self.0).clone()
        }))
    }

    pub fn with_weak(&self, weak: bool) -> Self {
        Self(Rc::new(TypeData {
            weak,
            ..(*self.0).clone()
        }))
    }

    fn with_kind(&self, kind: TypeKind) -> Self {
        Self(Rc::new(TypeData {
            kind,
            immutable: self.0.immutable,
            weak: self.0.weak,
        }))
    }

    pub fn is_scalar(&self) -> bool {
        matches!(self.kind(), TypeKind::Scalar { .. })
    }

    pub fn is_matrix(&self) -> bool {
        matches!(
            self.kind(),
            TypeKind::DynamicMatrix { .. } | TypeKind::StaticMatrix { .. }
        )
    }

    /// Scalar kind of the value, or of the elements for arrays
    pub fn element_kind(&self) -> ScalarKind {
        match self.kind() {
            TypeKind::Scalar { kind, .. } | TypeKind::Complex(kind) => *kind,
            TypeKind::DynamicMatrix { element, .. } | TypeKind::StaticMatrix { element, .. } => {
                *element
            }
        }
    }

    pub fn constant(&self) -> Option<f64> {
        match self.kind() {
            TypeKind::Scalar { constant, .. } => *constant,
            _ => None,
        }
    }

    /// Returns a copy with the given constant. Only scalars carry constants,
    /// other types are returned unchanged.
    pub fn with_constant(&self, value: Option<f64>) -> Self {
        match self.kind() {
            TypeKind::Scalar { kind, .. } => self.with_kind(TypeKind::Scalar {
                kind: *kind,
                constant: value.map(|v| kind.coerce_constant(v)),
            }),
            _ => self.clone(),
        }
    }

    pub fn without_constant(&self) -> Self {
        if self.constant().is_none() {
            return self.clone();
        }

        self.with_constant(None)
    }

    /// Shape of the value, scalars having the scalar shape
    pub fn shape(&self) -> Shape {
        match self.kind() {
            TypeKind::Scalar { .. } | TypeKind::Complex(_) => Shape::scalar(),
            TypeKind::DynamicMatrix { shape, .. } | TypeKind::StaticMatrix { shape, .. } => {
                shape.clone()
            }
        }
    }

    /// Returns an array type with the given shape. Static arrays whose new
    /// shape is not fully defined become dynamic.
    pub fn with_shape(&self, shape: Shape) -> Self {
        match self.kind() {
            TypeKind::StaticMatrix { element, .. } if shape.is_fully_defined() => {
                self.with_kind(TypeKind::StaticMatrix {
                    element: *element,
                    shape,
                })
            }
            _ => self.with_kind(TypeKind::DynamicMatrix {
                element: self.element_kind(),
                shape,
            }),
        }
    }

    /// Returns a copy with a different element or scalar kind
    pub fn with_element_kind(&self, element: ScalarKind) -> Self {
        match self.kind() {
            TypeKind::Scalar { constant, .. } => self.with_kind(TypeKind::Scalar {
                kind: element,
                constant: constant.map(|v| element.coerce_constant(v)),
            }),
            TypeKind::Complex(_) => self.with_kind(TypeKind::Complex(element)),
            TypeKind::DynamicMatrix { shape, .. } => self.with_kind(TypeKind::DynamicMatrix {
                element,
                shape: shape.clone(),
            }),
            TypeKind::StaticMatrix { shape, .. } => self.with_kind(TypeKind::StaticMatrix {
                element,
                shape: shape.clone(),
            }),
        }
    }

    pub fn num_elements(&self) -> Result<usize, TypeError> {
        Ok(self.shape().num_elements()?)
    }

    /// Whether a value of this type can be the return value of a generated
    /// function, instead of being written through an output pointer
    pub fn is_returnable(&self) -> bool {
        matches!(self.kind(), TypeKind::Scalar { .. })
    }

    pub fn uses_dynamic_allocation(&self) -> bool {
        matches!(self.kind(), TypeKind::DynamicMatrix { .. })
    }

    pub fn can_be_copied_by_assignment(&self) -> bool {
        matches!(self.kind(), TypeKind::Scalar { .. } | TypeKind::Complex(_))
    }

    /// Short identifier used to mangle the names of generated instances. Two
    /// types with the same kind and shape classification share an id
    /// regardless of their constants.
    pub fn small_id(&self) -> String {
        match self.kind() {
            TypeKind::Scalar { kind, .. } => kind.small_id().to_owned(),
            TypeKind::Complex(kind) => format!("c{}", kind.small_id()),
            TypeKind::DynamicMatrix { element, shape } => {
                let class = match shape.class() {
                    ShapeClass::Undefined => String::new(),
                    ShapeClass::Scalar => "_s".to_owned(),
                    ShapeClass::Row => "_r".to_owned(),
                    ShapeClass::Column => "_c".to_owned(),
                    ShapeClass::Matrix => format!("_{}", shape.dims().len()),
                };

                format!("m{}{class}", element.small_id())
            }
            TypeKind::StaticMatrix { element, shape } => {
                let dims = shape
                    .dims()
                    .iter()
                    .map(|d| d.unwrap_or_default().to_string())
                    .collect::<Vec<_>>()
                    .join("x");

                format!("t{}_{dims}", element.small_id())
            }
        }
    }

    /// The assign/free capability of this type, if values need an explicit
    /// copy and release protocol
    pub fn memory_protocol(&self) -> Option<&'static dyn MemoryProtocol> {
        match self.kind() {
            TypeKind::DynamicMatrix { .. } => Some(&HeapArrayProtocol),
            TypeKind::StaticMatrix { .. } => Some(&InlineArrayProtocol),
            TypeKind::Scalar { .. } | TypeKind::Complex(_) => None,
        }
    }

    pub fn assign_function(&self) -> Result<ProtocolFunction, TypeError> {
        self.memory_protocol()
            .ok_or_else(|| self.unsupported("assign"))?
            .assign(self)
    }

    pub fn free_function(&self) -> Result<ProtocolFunction, TypeError> {
        self.memory_protocol()
            .ok_or_else(|| self.unsupported("free"))?
            .free(self)
    }

    fn unsupported(&self, operation: &'static str) -> TypeError {
        TypeError::Unsupported {
            operation,
            ty: self.to_string(),
        }
    }

    /// Equality ignoring constants and flags
    pub fn loosely_equals(&self, other: &VariableType) -> bool {
        self.without_constant().kind() == other.without_constant().kind()
    }
}

/// Signature of a resolved function instance
#[derive(Debug, Clone, PartialEq)]
pub struct FunctionType {
    pub inputs: Vec<VariableType>,
    pub outputs: Vec<VariableType>,
    /// Calls can be removed or moved without observable effect
    pub pure: bool,
}

impl FunctionType {
    pub fn new(inputs: Vec<VariableType>, outputs: Vec<VariableType>, pure: bool) -> Self {
        Self {
            inputs,
            outputs,
            pure,
        }
    }
}

/// Generated function implementing part of a type's memory protocol
#[derive(Debug, Clone, PartialEq)]
pub struct ProtocolFunction {
    pub name: String,
    pub inputs: Vec<VariableType>,
    pub outputs: Vec<VariableType>,
}

/// Copy and release operations of types which can not be handled by plain
/// assignment
pub trait MemoryProtocol {
    fn assign(&self, ty: &VariableType) -> Result<ProtocolFunction, TypeError>;

    fn free(&self, ty: &VariableType) -> Result<ProtocolFunction, TypeError>;
}

struct HeapArrayProtocol;

impl MemoryProtocol for HeapArrayProtocol {
    fn assign(&self, ty: &VariableType) -> Result<ProtocolFunction, TypeError> {
        Ok(ProtocolFunction {
            name: format!("copy_{}", ty.small_id()),
            inputs: vec![ty.clone()],
            outputs: vec![ty.clone()],
        })
    }

    fn free(&self, ty: &VariableType) -> Result<ProtocolFunction, TypeError> {
        Ok(ProtocolFunction {
            name: format!("free_{}", ty.small_id()),
            inputs: vec![ty.clone()],
            outputs: Vec::new(),
        })
    }
}

struct InlineArrayProtocol;

impl MemoryProtocol for InlineArrayProtocol {
    fn assign(&self, ty: &VariableType) -> Result<ProtocolFunction, TypeError> {
        Ok(ProtocolFunction {
            name: format!("copy_{}", ty.small_id()),
            inputs: vec![ty.clone()],
            outputs: vec![ty.clone()],
        })
    }

    // Inline storage is released with its owner
    fn free(&self, ty: &VariableType) -> Result<ProtocolFunction, TypeError> {
        Err(ty.unsupported("free"))
    }
}

impl core::ops::Deref for VariableType {
    type Target = TypeKind;

    fn deref(&self) -> &Self::Target {
        &self.0.kind
    }
}

impl core::fmt::Debug for VariableType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VariableType")
            .field("kind", &self.0.kind)
            .field("immutable", &self.0.immutable)
            .field("weak", &self.0.weak)
            .finish()
    }
}

impl core::fmt::Display for VariableType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.kind() {
            TypeKind::Scalar {
                kind,
                constant: Some(value),
            } => write!(f, "{} ({})", kind.to_string().green(), value),
            TypeKind::Scalar {
                kind,
                constant: None,
            } => write!(f, "{}", kind.to_string().green()),
            TypeKind::Complex(kind) => write!(f, "{}<{kind}>", "complex".green()),
            TypeKind::DynamicMatrix { element, shape } => {
                write!(f, "{}{shape}", element.to_string().green())
            }
            TypeKind::StaticMatrix { element, shape } => {
                write!(f, "static {}{shape}", element.to_string().green())
            }
        }
    }
}
