use strum::{EnumIter, EnumString};

/// Numeric class of a scalar value or of the elements of an array
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, EnumString, EnumIter)]
#[strum(serialize_all = "lowercase")]
pub enum ScalarKind {
    Logical,
    Int8,
    UInt8,
    Int16,
    UInt16,
    #[strum(serialize = "int32", serialize = "int")]
    Int32,
    UInt32,
    Int64,
    UInt64,
    Single,
    Double,
}

impl core::fmt::Display for ScalarKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ScalarKind::Logical => write!(f, "logical"),
            ScalarKind::Int8 => write!(f, "int8"),
            ScalarKind::UInt8 => write!(f, "uint8"),
            ScalarKind::Int16 => write!(f, "int16"),
            ScalarKind::UInt16 => write!(f, "uint16"),
            ScalarKind::Int32 => write!(f, "int32"),
            ScalarKind::UInt32 => write!(f, "uint32"),
            ScalarKind::Int64 => write!(f, "int64"),
            ScalarKind::UInt64 => write!(f, "uint64"),
            ScalarKind::Single => write!(f, "single"),
            ScalarKind::Double => write!(f, "double"),
        }
    }
}

impl ScalarKind {
    pub fn is_float(&self) -> bool {
        matches!(self, ScalarKind::Single | ScalarKind::Double)
    }

    pub fn is_signed(&self) -> bool {
        matches!(
            self,
            ScalarKind::Int8
                | ScalarKind::Int16
                | ScalarKind::Int32
                | ScalarKind::Int64
                | ScalarKind::Single
                | ScalarKind::Double
        )
    }

    pub fn bits(&self) -> u32 {
        match self {
            ScalarKind::Logical => 1,
            ScalarKind::Int8 | ScalarKind::UInt8 => 8,
            ScalarKind::Int16 | ScalarKind::UInt16 => 16,
            ScalarKind::Int32 | ScalarKind::UInt32 | ScalarKind::Single => 32,
            ScalarKind::Int64 | ScalarKind::UInt64 | ScalarKind::Double => 64,
        }
    }

    /// Short code used when mangling instance names
    pub fn small_id(&self) -> &'static str {
        match self {
            ScalarKind::Logical => "l",
            ScalarKind::Int8 => "i8",
            ScalarKind::UInt8 => "u8",
            ScalarKind::Int16 => "i16",
            ScalarKind::UInt16 => "u16",
            ScalarKind::Int32 => "i",
            ScalarKind::UInt32 => "u32",
            ScalarKind::Int64 => "i64",
            ScalarKind::UInt64 => "u64",
            ScalarKind::Single => "s",
            ScalarKind::Double => "d",
        }
    }

    fn signed_integer_of(bits: u32) -> ScalarKind {
        match bits {
            0..=8 => ScalarKind::Int8,
            9..=16 => ScalarKind::Int16,
            17..=32 => ScalarKind::Int32,
            _ => ScalarKind::Int64,
        }
    }

    /// Smallest kind able to represent values of both kinds. Floating point
    /// dominates integers, wider dominates narrower, and mixing signedness
    /// picks a signed kind wide enough for the unsigned operand (capped at 64
    /// bits).
    pub fn widen(self, other: ScalarKind) -> ScalarKind {
        if self == other {
            return self;
        }

        match (self, other) {
            (ScalarKind::Logical, kind) | (kind, ScalarKind::Logical) => kind,
            (ScalarKind::Double, _) | (_, ScalarKind::Double) => ScalarKind::Double,
            (ScalarKind::Single, _) | (_, ScalarKind::Single) => ScalarKind::Single,
            (a, b) if a.is_signed() == b.is_signed() => {
                if a.bits() >= b.bits() {
                    a
                } else {
                    b
                }
            }
            (a, b) => {
                let (signed, unsigned) = if a.is_signed() { (a, b) } else { (b, a) };

                if signed.bits() > unsigned.bits() {
                    signed
                } else {
                    Self::signed_integer_of(unsigned.bits() * 2)
                }
            }
        }
    }

    /// Normalizes a constant to what a value of this kind can hold
    pub fn coerce_constant(&self, value: f64) -> f64 {
        match self {
            ScalarKind::Logical => {
                if value != 0.0 {
                    1.0
                } else {
                    0.0
                }
            }
            ScalarKind::Single => value as f32 as f64,
            ScalarKind::Double => value,
            _ => value.round(),
        }
    }
}
