use hashbrown::HashMap;

use crate::{
    frontend::intern::Symbol,
    middle::{
        inference::{
            InferenceError, Session,
            functions::{self, CallRequest, ResolvedCall},
            inference_error,
        },
        ssa::{BlockId, Instruction, InstructionLocation, edit::EditQueue},
        ty::VariableType,
    },
    options::CompilerOptions,
};

/// Types of the variables of one function. Entries are only added, except
/// when a loop body is explicitly unassigned before being inferred again.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TypeMap {
    types: HashMap<Symbol, VariableType>,
}

impl TypeMap {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, name: Symbol) -> Option<&VariableType> {
        self.types.get(&name)
    }

    pub fn contains(&self, name: Symbol) -> bool {
        self.types.contains_key(&name)
    }

    /// Records the type of `name`, returning the existing type if the name
    /// is already typed
    pub fn insert(&mut self, name: Symbol, ty: VariableType) -> Result<(), VariableType> {
        match self.types.get(&name) {
            Some(existing) => Err(existing.clone()),
            None => {
                self.types.insert(name, ty);
                Ok(())
            }
        }
    }

    /// Replaces the type of `name`. Only rewrites of a fully inferred body
    /// change existing entries.
    pub fn set(&mut self, name: Symbol, ty: VariableType) -> Option<VariableType> {
        self.types.insert(name, ty)
    }

    pub fn remove(&mut self, name: Symbol) -> Option<VariableType> {
        self.types.remove(&name)
    }

    pub fn iter(&self) -> impl Iterator<Item = (Symbol, &VariableType)> {
        self.types.iter().map(|(name, ty)| (*name, ty))
    }

    pub fn len(&self) -> usize {
        self.types.len()
    }

    pub fn is_empty(&self) -> bool {
        self.types.is_empty()
    }
}

/// State of the inference of one function body
#[derive(Debug)]
pub struct InferenceContext<'session, 'module> {
    session: &'session mut Session<'module>,
    function: Symbol,
    types: TypeMap,
    /// Types fixed for loop-carried variables after a round of re-inference
    /// showed they widen
    overrides: HashMap<Symbol, VariableType>,
    edits: EditQueue,
}

impl<'session, 'module> InferenceContext<'session, 'module> {
    pub fn new(session: &'session mut Session<'module>, function: Symbol) -> Self {
        Self {
            session,
            function,
            types: TypeMap::new(),
            overrides: HashMap::new(),
            edits: EditQueue::new(),
        }
    }

    pub fn function(&self) -> Symbol {
        self.function
    }

    pub fn options(&self) -> &CompilerOptions {
        self.session.options()
    }

    pub fn variable_type(&self, name: Symbol) -> Option<&VariableType> {
        self.types.get(name)
    }

    pub fn require_type(
        &self,
        location: InstructionLocation,
        name: Symbol,
    ) -> Result<VariableType, InferenceError> {
        self.types.get(name).cloned().ok_or_else(|| {
            inference_error!(
                self.function,
                Some(location),
                TypeInferenceFailure,
                "variable `{name}` is used before it has a type"
            )
        })
    }

    pub fn seed_parameter(&mut self, name: Symbol, ty: VariableType) -> Result<(), InferenceError> {
        self.types.insert(name, ty).map_err(|_| {
            inference_error!(
                self.function,
                None,
                Reassignment,
                "parameter `{name}` is declared twice"
            )
        })
    }

    /// Records the type of a newly defined variable. A pinned loop-carried
    /// type takes precedence over `ty`.
    pub fn add_variable(
        &mut self,
        location: InstructionLocation,
        name: Symbol,
        ty: VariableType,
    ) -> Result<(), InferenceError> {
        let ty = self.overrides.get(&name).cloned().unwrap_or(ty);

        self.types.insert(name, ty).map_err(|existing| {
            inference_error!(
                self.function,
                Some(location),
                Reassignment,
                "variable `{name}` already has type {existing}"
            )
        })
    }

    pub fn unassign(&mut self, name: Symbol) {
        self.types.remove(name);
    }

    pub fn pinned_type(&self, name: Symbol) -> Option<&VariableType> {
        self.overrides.get(&name)
    }

    pub fn pin(&mut self, name: Symbol, ty: VariableType) {
        self.overrides.insert(name, ty);
    }

    pub fn queue_replacement(&mut self, location: InstructionLocation, instruction: Instruction) {
        self.edits.replace_with(location, instruction);
    }

    pub fn discard_edits_in(&mut self, blocks: &[BlockId]) {
        self.edits.discard_in(blocks);
    }

    /// Resolves a call against the functions of the module, then against the
    /// system functions
    pub fn resolve_call(
        &mut self,
        location: InstructionLocation,
        function: Symbol,
        arguments: &[VariableType],
        num_outputs: usize,
    ) -> Result<ResolvedCall, InferenceError> {
        if self.session.module().function(function).is_some() {
            let instance = self
                .session
                .infer_function(function, Some(arguments.to_vec()))
                .map_err(|e| InferenceError {
                    location: Some(location),
                    function: self.function,
                    message: format!("while specializing `{function}`: {}", e.message),
                    ..e
                })?;

            return Ok(ResolvedCall {
                instance: instance.name,
                function_type: instance.function_type.clone(),
            });
        }

        let request = CallRequest {
            function,
            arguments,
            num_outputs,
            propagate_constants: self.options().propagate_constants,
        };

        functions::resolve_system_call(&request).map_err(|reason| {
            inference_error!(self.function, Some(location), TypeInferenceFailure, "{reason}")
        })
    }

    pub fn finish(self) -> (EditQueue, TypeMap) {
        (self.edits, self.types)
    }
}
