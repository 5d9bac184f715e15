//! Typed instructions for rewrites of an inferred body.

use tracing::trace;

use crate::{
    frontend::intern::Symbol,
    middle::{
        inference::{
            TypedInstance,
            functions::{CallRequest, ResolvedCall, resolve_system_call},
            rules::literal_type,
        },
        optimization::Ineligible,
        ssa::{FunctionBody, Instruction, Literal, Operand},
        ty::VariableType,
    },
    options::CompilerOptions,
};

/// Accumulates instructions to insert into an instance. Types of the
/// variables created along the way are only recorded by [`Self::finish`],
/// so an abandoned builder leaves the type map untouched.
#[derive(Debug)]
pub struct InstructionBuilder<'a> {
    instance: &'a mut TypedInstance,
    propagate_constants: bool,
    instructions: Vec<Instruction>,
    pending_types: Vec<(Symbol, VariableType)>,
}

impl<'a> InstructionBuilder<'a> {
    pub fn new(instance: &'a mut TypedInstance, options: &CompilerOptions) -> Self {
        Self {
            instance,
            propagate_constants: options.propagate_constants,
            instructions: Vec::new(),
            pending_types: Vec::new(),
        }
    }

    pub fn body(&self) -> &FunctionBody {
        &self.instance.body
    }

    pub fn variable_type(&self, name: Symbol) -> Option<VariableType> {
        self.pending_types
            .iter()
            .rev()
            .find(|(pending, _)| *pending == name)
            .map(|(_, ty)| ty.clone())
            .or_else(|| self.instance.types.get(name).cloned())
    }

    /// Records the type of an existing variable which has none yet
    pub fn declare(&mut self, name: Symbol, ty: VariableType) {
        if self.variable_type(name).is_none() {
            self.pending_types.push((name, ty));
        }
    }

    pub fn temporary(&mut self, semantics: &str, ty: VariableType) -> Symbol {
        let name = self.instance.body.make_temporary(semantics);
        self.pending_types.push((name, ty));

        name
    }

    pub fn push(&mut self, instruction: Instruction) {
        self.instructions.push(instruction);
    }

    /// `$semantics$N = value`
    pub fn integer(&mut self, semantics: &str, value: i64) -> Symbol {
        let literal = Literal::Integer(value);
        let destination = self.temporary(semantics, literal_type(literal));
        self.assign_literal(destination, literal);

        destination
    }

    pub fn assign_literal(&mut self, destination: Symbol, literal: Literal) {
        self.declare(destination, literal_type(literal));
        self.push(Instruction::Assign {
            destination,
            source: Operand::Literal(literal),
        });
    }

    /// Calls a system function, storing its first output in a new temporary
    pub fn call(
        &mut self,
        function: &str,
        semantics: &str,
        arguments: &[Symbol],
    ) -> Result<Symbol, Ineligible> {
        let resolved = self.resolve(function, arguments, 1)?;
        let output = resolved
            .function_type
            .outputs
            .first()
            .cloned()
            .ok_or_else(|| Ineligible::new(format!("`{function}` returns nothing")))?;

        let destination = self.temporary(semantics, output);
        self.push_call(vec![destination], arguments, resolved);

        Ok(destination)
    }

    /// Calls a system function, storing its first output in `destination`.
    /// The destination keeps its type if it has one.
    pub fn call_into(
        &mut self,
        function: &str,
        destination: Symbol,
        arguments: &[Symbol],
    ) -> Result<(), Ineligible> {
        let resolved = self.resolve(function, arguments, 1)?;
        self.push_call(vec![destination], arguments, resolved);

        Ok(())
    }

    /// Calls a system function whose output is declared as `output` rather
    /// than derived from the arguments
    pub fn call_with_output(
        &mut self,
        function: &str,
        destination: Symbol,
        arguments: &[Symbol],
        output: VariableType,
    ) -> Result<(), Ineligible> {
        let mut resolved = self.resolve(function, arguments, 1)?;
        resolved.function_type.outputs = vec![output];
        self.push_call(vec![destination], arguments, resolved);

        Ok(())
    }

    fn resolve(
        &self,
        function: &str,
        arguments: &[Symbol],
        num_outputs: usize,
    ) -> Result<ResolvedCall, Ineligible> {
        let argument_types = arguments
            .iter()
            .map(|argument| {
                self.variable_type(*argument)
                    .ok_or_else(|| Ineligible::new(format!("`{argument}` has no type")))
            })
            .collect::<Result<Vec<_>, _>>()?;

        resolve_system_call(&CallRequest {
            function: Symbol::new(function),
            arguments: &argument_types,
            num_outputs,
            propagate_constants: self.propagate_constants,
        })
        .map_err(Ineligible::new)
    }

    fn push_call(&mut self, destinations: Vec<Symbol>, arguments: &[Symbol], resolved: ResolvedCall) {
        for (destination, ty) in destinations.iter().zip(&resolved.function_type.outputs) {
            self.declare(*destination, ty.clone());
        }

        self.push(Instruction::TypedCall {
            destinations,
            instance: resolved.instance,
            function_type: resolved.function_type,
            arguments: arguments.to_vec(),
        });
    }

    /// Hands out the instructions built so far. Types stay pending until
    /// [`Self::finish`].
    pub fn take_instructions(&mut self) -> Vec<Instruction> {
        std::mem::take(&mut self.instructions)
    }

    /// Records the types of the created variables and hands out the
    /// instructions
    pub fn finish(self) -> Vec<Instruction> {
        for (name, ty) in self.pending_types {
            trace!("{name}: {ty}");
            self.instance.types.set(name, ty);
        }

        self.instructions
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;
    use crate::middle::{
        inference::context::TypeMap, scalar::ScalarKind, shape::Shape, ty::FunctionType,
    };

    fn instance() -> TypedInstance {
        let mut body = FunctionBody::new(Symbol::new("f"), Vec::new(), Vec::new());
        body.add_block();

        let mut types = TypeMap::new();
        types
            .insert(
                Symbol::new("A"),
                VariableType::dynamic_matrix(ScalarKind::Double, Shape::row()),
            )
            .unwrap();

        TypedInstance {
            name: Symbol::new("f"),
            body,
            types,
            function_type: FunctionType::new(Vec::new(), Vec::new(), true),
        }
    }

    #[test]
    fn types_are_recorded_on_finish() {
        let mut instance = instance();
        let mut builder = InstructionBuilder::new(&mut instance, &CompilerOptions::default());

        let count = builder
            .call("numel", "numel", &[Symbol::new("A")])
            .unwrap();
        let one = builder.integer("one", 1);
        let check = builder.call("ge", "check", &[count, one]).unwrap();

        assert_eq!(builder.variable_type(count), Some(VariableType::int()));
        let instructions = builder.finish();

        assert_eq!(instructions.len(), 3);
        assert_eq!(instance.types.get(check), Some(&VariableType::logical()));
        assert_eq!(
            instance.types.get(one),
            Some(&VariableType::int_constant(1).with_weak(true))
        );
    }

    #[test]
    fn abandoned_builders_leave_no_types() {
        let mut instance = instance();
        let types = instance.types.clone();

        let mut builder = InstructionBuilder::new(&mut instance, &CompilerOptions::default());
        builder.integer("one", 1);
        let error = builder
            .call("numel", "numel", &[Symbol::new("missing")])
            .unwrap_err();
        drop(builder);

        assert_eq!(error.to_string(), "`missing` has no type");
        assert_eq!(instance.types, types);
    }

    #[test]
    fn declared_outputs_override_resolution() {
        let mut instance = instance();
        let mut builder = InstructionBuilder::new(&mut instance, &CompilerOptions::default());
        let n = builder.integer("n", 4);
        let one = builder.integer("one", 1);
        let row = VariableType::dynamic_matrix(ScalarKind::Int32, Shape::row());

        builder
            .call_with_output("new_array_from_dims", Symbol::new("y"), &[one, n], row.clone())
            .unwrap();
        let instructions = builder.finish();

        let Instruction::TypedCall { function_type, .. } = &instructions[2] else {
            panic!("expected a typed call, got {:?}", instructions[2]);
        };
        assert_eq!(function_type.outputs, [row.clone()]);
        assert_eq!(instance.types.get(Symbol::new("y")), Some(&row));
    }
}
