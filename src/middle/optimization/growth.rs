//! Monotonicity facts about the values computed in a loop nest.
//!
//! Hoisting an access out of a loop nest replaces each induction variable by
//! the end value of its loop. The result bounds every index the nest visits
//! only if each index never decreases as the induction variables increase,
//! and the hoisted value only proves the access in bounds if no index can be
//! smaller than 1.

use hashbrown::HashMap;

use crate::{
    frontend::intern::Symbol,
    middle::{
        inference::{context::TypeMap, mangle},
        ssa::{Instruction, Operand},
        ty::FunctionType,
    },
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Trend {
    Constant,
    NonDecreasing,
    NonIncreasing,
    Unknown,
}

impl Trend {
    fn negate(self) -> Self {
        match self {
            Trend::NonDecreasing => Trend::NonIncreasing,
            Trend::NonIncreasing => Trend::NonDecreasing,
            other => other,
        }
    }

    /// Trend of `a + b`
    fn sum(self, other: Self) -> Self {
        match (self, other) {
            (Trend::Constant, trend) | (trend, Trend::Constant) => trend,
            (a, b) if a == b => a,
            _ => Trend::Unknown,
        }
    }

    /// Trend of `max(a, b)` and `min(a, b)`
    fn extremum(self, other: Self) -> Self {
        self.sum(other)
    }
}

/// How a value evolves across iterations, and a lower bound on it
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Growth {
    pub trend: Trend,
    pub floor: Option<f64>,
}

impl Growth {
    pub const UNKNOWN: Self = Self {
        trend: Trend::Unknown,
        floor: None,
    };

    pub fn constant(value: Option<f64>) -> Self {
        Self {
            trend: Trend::Constant,
            floor: value,
        }
    }

    /// Whether the value is a valid index that never shrinks
    pub fn is_growing_index(&self) -> bool {
        matches!(self.trend, Trend::Constant | Trend::NonDecreasing)
            && self.floor.is_some_and(|floor| floor >= 1.0)
    }
}

#[derive(Debug)]
pub struct GrowthOracle<'a> {
    types: &'a TypeMap,
    facts: HashMap<Symbol, Growth>,
}

impl<'a> GrowthOracle<'a> {
    pub fn new(types: &'a TypeMap) -> Self {
        Self {
            types,
            facts: HashMap::new(),
        }
    }

    /// Induction variable of a loop starting at 1 and stepping by 1
    pub fn add_iteration(&mut self, variable: Symbol) {
        self.facts.insert(
            variable,
            Growth {
                trend: Trend::NonDecreasing,
                floor: Some(1.0),
            },
        );
    }

    /// Variable defined outside of the loop nest
    pub fn add_external(&mut self, variable: Symbol) {
        let value = self.exact_value(variable);
        self.facts.insert(variable, Growth::constant(value));
    }

    /// Derives facts for the outputs of an instruction whose inputs were
    /// added before
    pub fn add_instruction(&mut self, instruction: &Instruction) {
        let growth = match instruction {
            Instruction::Assign {
                source: Operand::Variable(source),
                ..
            } => self.growth_of(*source),
            Instruction::Assign {
                source: Operand::Literal(literal),
                ..
            } => Growth::constant(Some(literal.value())),
            Instruction::TypedCall {
                instance,
                function_type,
                arguments,
                ..
            } => match arithmetic_function(*instance, function_type) {
                Some(function) => self.call(function, arguments),
                None => Growth::UNKNOWN,
            },
            _ => Growth::UNKNOWN,
        };

        for output in instruction.outputs() {
            self.facts.insert(output, growth);
        }
    }

    pub fn growth_of(&self, variable: Symbol) -> Growth {
        match self.facts.get(&variable) {
            Some(growth) => *growth,
            None => match self.exact_value(variable) {
                Some(value) => Growth::constant(Some(value)),
                None => Growth::UNKNOWN,
            },
        }
    }

    /// Whether every index is a valid index that never shrinks
    pub fn grows_with_iterations(&self, indices: &[Symbol]) -> bool {
        indices.iter().all(|i| self.growth_of(*i).is_growing_index())
    }

    fn exact_value(&self, variable: Symbol) -> Option<f64> {
        self.types.get(variable).and_then(|ty| ty.constant())
    }

    fn call(&self, function: &str, arguments: &[Symbol]) -> Growth {
        let [a, b] = arguments else {
            return Growth::UNKNOWN;
        };
        let (ga, gb) = (self.growth_of(*a), self.growth_of(*b));

        match function {
            "plus" => Growth {
                trend: ga.trend.sum(gb.trend),
                floor: ga.floor.zip(gb.floor).map(|(x, y)| x + y),
            },
            "minus" => Growth {
                trend: ga.trend.sum(gb.trend.negate()),
                floor: ga
                    .floor
                    .zip(self.exact_value(*b))
                    .map(|(x, y)| x - y),
            },
            "times" => match (self.exact_value(*a), self.exact_value(*b)) {
                (_, Some(factor)) => scale(ga, factor),
                (Some(factor), _) => scale(gb, factor),
                _ => Growth::UNKNOWN,
            },
            "max" => Growth {
                trend: ga.trend.extremum(gb.trend),
                floor: match (ga.floor, gb.floor) {
                    (Some(x), Some(y)) => Some(x.max(y)),
                    (floor, None) | (None, floor) => floor,
                },
            },
            "min" => Growth {
                trend: ga.trend.extremum(gb.trend),
                floor: ga.floor.zip(gb.floor).map(|(x, y)| x.min(y)),
            },
            _ => Growth::UNKNOWN,
        }
    }
}

/// System function behind a resolved instance, among those whose growth is
/// understood
fn arithmetic_function(instance: Symbol, function_type: &FunctionType) -> Option<&'static str> {
    ["plus", "minus", "times", "max", "min"]
        .into_iter()
        .find(|function| mangle(Symbol::new(function), &function_type.inputs) == instance)
}

fn scale(growth: Growth, factor: f64) -> Growth {
    if factor == 0.0 {
        return Growth::constant(Some(0.0));
    }

    if factor > 0.0 {
        Growth {
            trend: growth.trend,
            floor: growth.floor.map(|floor| floor * factor),
        }
    } else {
        Growth {
            trend: growth.trend.negate(),
            floor: None,
        }
    }
}
