//! Type inference over SSA function bodies.
//!
//! A [`Session`] specializes functions of a module for concrete argument
//! types. Each specialization walks the structured control flow from the
//! entry block, deriving the type of every defined variable from the types of
//! its inputs with one rule per instruction variant. Loop bodies are
//! re-inferred until the types merged at the top of the body stop changing.
//! While walking, rules may queue rewrites (resolved calls, constant `end`
//! values) which are applied once the body is fully typed.

use std::rc::Rc;

use hashbrown::HashMap;
use itertools::Itertools;
use strum::EnumString;
use thiserror::Error;
use tracing::{debug, instrument};

use crate::{
    frontend::intern::Symbol,
    middle::{
        inference::context::{InferenceContext, TypeMap},
        optimization::perform_post_inference_optimizations,
        ssa::{BlockId, FunctionBody, Instruction, InstructionLocation, Module},
        ty::{FunctionType, ProtocolFunction, TypeError, VariableType},
    },
    options::CompilerOptions,
};

pub mod combine;
pub mod context;
pub mod functions;
pub mod matrix;
pub mod rules;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, strum::Display, EnumString)]
#[strum(serialize_all = "snake_case")]
pub enum ErrorTag {
    NotYetImplemented,
    TypeInferenceFailure,
    CorrectnessError,
    SpecializationFailure,
    NonConvergence,
    Reassignment,
    Lattice,
}

#[derive(Debug, Clone, PartialEq, Error)]
#[error(
    "{tag} in {function}{}: {message}",
    .location.map(|l| format!(" at {l}")).unwrap_or_default()
)]
pub struct InferenceError {
    pub function: Symbol,
    pub location: Option<InstructionLocation>,
    pub tag: ErrorTag,
    pub message: String,
    /// Compiler source position which raised the error, empty unless the
    /// `error-backtrace` feature is enabled
    pub origin: &'static str,
}

macro_rules! inference_error {
    ($function:expr, $location:expr, $tag:ident, $($message:tt)+) => {
        $crate::middle::inference::inference_error!(
            $function,
            $location,
            tag = $crate::middle::inference::ErrorTag::$tag,
            $($message)+
        )
    };
    ($function:expr, $location:expr, tag = $tag:expr, $($message:tt)+) => {
        $crate::middle::inference::InferenceError {
            function: $function,
            location: $location,
            tag: $tag,
            message: format!($($message)+),
            origin: if cfg!(feature = "error-backtrace") {
                concat!(module_path!(), " (", file!(), ":", line!(), ")")
            } else {
                ""
            },
        }
    };
}

pub(crate) use inference_error;

/// A function body specialized for one list of argument types, with the
/// type of every variable it defines
#[derive(Debug, Clone)]
pub struct TypedInstance {
    /// Mangled name, such as `f_i`
    pub name: Symbol,
    pub body: FunctionBody,
    pub types: TypeMap,
    pub function_type: FunctionType,
}

impl TypedInstance {
    pub fn variable_type(&self, name: Symbol) -> Option<&VariableType> {
        self.types.get(name)
    }

    /// Memory release calls needed at the end of the instance for the
    /// heap-backed values it creates and does not return
    pub fn cleanup_functions(&self) -> Result<Vec<ProtocolFunction>, TypeError> {
        self.types
            .iter()
            .filter(|(name, ty)| ty.uses_dynamic_allocation() && !self.body.outputs.contains(name))
            .sorted_by_key(|(name, _)| name.value())
            .map(|(_, ty)| ty.free_function())
            .collect()
    }
}

/// Lifecycle of one specialization
#[derive(Debug, Clone)]
pub enum InstanceState {
    Untyped,
    Inferring,
    Typed(Rc<TypedInstance>),
    Failed(InferenceError),
}

/// Specializes the functions of one module. Instances are cached by mangled
/// name, so every distinct signature is inferred once.
#[derive(Debug)]
pub struct Session<'module> {
    module: &'module Module,
    options: CompilerOptions,
    instances: HashMap<Symbol, InstanceState>,
}

/// `plus` called with `(int32, double)` becomes `plus_id`
pub fn mangle(function: Symbol, arguments: &[VariableType]) -> Symbol {
    if arguments.is_empty() {
        return function;
    }

    Symbol::new(&format!(
        "{function}_{}",
        arguments.iter().map(VariableType::small_id).join("")
    ))
}

impl<'module> Session<'module> {
    pub fn new(module: &'module Module, options: CompilerOptions) -> Self {
        Self {
            module,
            options,
            instances: HashMap::new(),
        }
    }

    pub fn module(&self) -> &'module Module {
        self.module
    }

    pub fn options(&self) -> &CompilerOptions {
        &self.options
    }

    pub fn instance_state(&self, instance: Symbol) -> Option<&InstanceState> {
        self.instances.get(&instance)
    }

    /// Every successfully typed instance
    pub fn typed_instances(&self) -> impl Iterator<Item = &Rc<TypedInstance>> {
        self.instances.values().filter_map(|state| match state {
            InstanceState::Typed(instance) => Some(instance),
            _ => None,
        })
    }

    /// Specializes `function` for `arguments`, or for the declared parameter
    /// types when no arguments are given. Argument constants are dropped so
    /// one instance serves every call with the same signature. The passes of
    /// the options run on the instance once it is typed.
    #[instrument(skip_all, fields(function = %function))]
    pub fn infer_function(
        &mut self,
        function: Symbol,
        arguments: Option<Vec<VariableType>>,
    ) -> Result<Rc<TypedInstance>, InferenceError> {
        let Some(body) = self.module.function(function) else {
            return Err(inference_error!(
                function,
                None,
                SpecializationFailure,
                "function `{function}` is not defined"
            ));
        };

        let arguments = match arguments {
            Some(arguments) => arguments,
            None => body
                .parameters
                .iter()
                .map(|p| {
                    p.ty.clone().ok_or_else(|| {
                        inference_error!(
                            function,
                            None,
                            TypeInferenceFailure,
                            "parameter `{}` has no declared type",
                            p.name
                        )
                    })
                })
                .collect::<Result<Vec<_>, _>>()?,
        };

        if arguments.len() != body.parameters.len() {
            return Err(inference_error!(
                function,
                None,
                SpecializationFailure,
                "`{function}` takes {} arguments but {} were given",
                body.parameters.len(),
                arguments.len()
            ));
        }

        let arguments = arguments
            .iter()
            .map(VariableType::without_constant)
            .collect::<Vec<_>>();
        let name = mangle(function, &arguments);

        match self.instances.get(&name) {
            Some(InstanceState::Typed(instance)) => return Ok(instance.clone()),
            Some(InstanceState::Failed(error)) => return Err(error.clone()),
            Some(InstanceState::Inferring) => {
                return Err(inference_error!(
                    function,
                    None,
                    SpecializationFailure,
                    "`{name}` is already being inferred, recursive calls are not supported"
                ));
            }
            Some(InstanceState::Untyped) | None => {}
        }

        self.instances.insert(name, InstanceState::Untyped);
        body.validate().map_err(|e| {
            inference_error!(function, None, CorrectnessError, "malformed function body: {e}")
        })?;

        self.instances.insert(name, InstanceState::Inferring);
        debug!("inferring {name}");

        match self.infer_instance(body, name, arguments) {
            Ok(mut instance) => {
                perform_post_inference_optimizations(&mut instance, &self.options);
                instance.function_type.pure = is_pure(&instance.body);

                let instance = Rc::new(instance);
                self.instances
                    .insert(name, InstanceState::Typed(instance.clone()));
                Ok(instance)
            }
            Err(error) => {
                self.instances
                    .insert(name, InstanceState::Failed(error.clone()));
                Err(error)
            }
        }
    }

    fn infer_instance(
        &mut self,
        body: &FunctionBody,
        name: Symbol,
        arguments: Vec<VariableType>,
    ) -> Result<TypedInstance, InferenceError> {
        let mut context = InferenceContext::new(self, body.name);

        for (parameter, ty) in body.parameters.iter().zip(&arguments) {
            context.seed_parameter(parameter.name, ty.clone())?;
        }

        context.infer_block(body, BlockId::ENTRY)?;

        let (edits, types) = context.finish();
        let mut body = body.clone();
        edits.apply(&mut body);

        let outputs = body
            .outputs
            .iter()
            .map(|output| {
                types.get(*output).cloned().ok_or_else(|| {
                    inference_error!(
                        body.name,
                        None,
                        TypeInferenceFailure,
                        "output `{output}` is never assigned a type"
                    )
                })
            })
            .collect::<Result<Vec<_>, _>>()?;

        Ok(TypedInstance {
            name,
            function_type: FunctionType::new(arguments, outputs, is_pure(&body)),
            body,
            types,
        })
    }
}

impl core::fmt::Display for TypedInstance {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let typed = |name: &Symbol| match self.types.get(*name) {
            Some(ty) => format!("{name}: {ty}"),
            None => name.to_string(),
        };

        writeln!(
            f,
            "function [{}] = {}({})",
            self.body.outputs.iter().map(typed).join(", "),
            self.name,
            self.body.parameter_names().map(|p| typed(&p)).join(", ")
        )?;
        self.body.fmt_blocks(f)?;
        writeln!(f, "end")?;

        for (name, ty) in self.types.iter().sorted_by_key(|(name, _)| name.value()) {
            writeln!(f, "// {name}: {ty}")?;
        }

        Ok(())
    }
}

fn is_pure(body: &FunctionBody) -> bool {
    body.instructions()
        .all(|(_, i)| i.is_ending() || !i.has_side_effects())
}

/// Instructions in `body` whose type could not be derived. Only variables
/// declared by `!undefined` are expected here.
pub fn untyped_outputs(instance: &TypedInstance) -> Vec<(InstructionLocation, Symbol)> {
    instance
        .body
        .instructions()
        .flat_map(|(location, instruction)| {
            instruction
                .outputs()
                .into_iter()
                .filter(|o| instance.types.get(*o).is_none())
                .filter(|_| !matches!(instruction, Instruction::Undefined { .. }))
                .map(move |o| (location, o))
                .collect::<Vec<_>>()
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use indoc::indoc;
    use pretty_assertions::assert_eq;

    use super::*;
    use crate::frontend::{SourceFile, parser::Parser};

    const GROWING_ROW: &str = indoc! {"
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
    "};

    fn infer(source: &str, options: CompilerOptions) -> Rc<TypedInstance> {
        let module = Parser::parse_module(&SourceFile::from_memory(source)).unwrap();
        let mut session = Session::new(&module, options);

        session.infer_function(Symbol::new("f"), None).unwrap()
    }

    #[test]
    fn only_undefined_values_stay_untyped() {
        let instance = infer(GROWING_ROW, CompilerOptions::without_passes());

        assert!(untyped_outputs(&instance).is_empty());
        assert!(instance.variable_type(Symbol::new("y0")).is_none());
    }

    #[test]
    fn local_arrays_are_released() {
        let instance = infer(GROWING_ROW, CompilerOptions::default());
        let cleanup = instance.cleanup_functions().unwrap();

        // y0, y1 and y2 are locals, y is returned
        assert_eq!(cleanup.len(), 3);
        assert!(cleanup.iter().all(|f| f.name.starts_with("free_") && f.outputs.is_empty()));
    }

    #[test]
    fn scalar_instances_need_no_cleanup() {
        let instance = infer(
            indoc! {"
                function [y] = f(x: double)
                #0:
                    two = 2
                    y = call times(x, two)
                end
            "},
            CompilerOptions::default(),
        );

        assert_eq!(instance.cleanup_functions(), Ok(Vec::new()));
        assert!(instance.function_type.pure);
        assert_eq!(instance.name, Symbol::new("f_d"));
    }
}
