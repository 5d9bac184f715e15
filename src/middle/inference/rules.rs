//! One inference rule per instruction variant.

use std::collections::BTreeMap;

use tracing::{debug, trace, warn};

use crate::{
    frontend::intern::Symbol,
    middle::{
        inference::{
            InferenceError,
            combine::{combine_all, combine_types},
            context::InferenceContext,
            inference_error, matrix,
        },
        scalar::ScalarKind,
        ssa::{BlockId, FunctionBody, Instruction, InstructionLocation, Literal, Operand},
        ty::VariableType,
    },
};

/// Type of a literal operand. Integers fitting in 32 bits are `int32`,
/// every other number is a `double`.
pub fn literal_type(literal: Literal) -> VariableType {
    let ty = match literal {
        Literal::Integer(value) if i32::try_from(value).is_ok() => VariableType::int_constant(value),
        literal => VariableType::scalar_constant(ScalarKind::Double, literal.value()),
    };

    ty.with_weak(true)
}

/// Type of a `for` induction variable stepping from `start` by `interval`
pub fn induction_type(start: &VariableType, interval: &VariableType) -> Option<VariableType> {
    let stepped = VariableType::scalar(start.element_kind().widen(interval.element_kind()));

    Some(combine_types(&start.without_constant(), &stepped)?.with_weak(false))
}

impl InferenceContext<'_, '_> {
    /// Infers every instruction of `block` in order, recursing into the blocks
    /// owned by its ending instruction
    pub fn infer_block(&mut self, body: &FunctionBody, block: BlockId) -> Result<(), InferenceError> {
        for (offset, instruction) in body.block(block).instructions.iter().enumerate() {
            self.infer_instruction(body, InstructionLocation::new(block, offset), instruction)?;
        }

        Ok(())
    }

    fn require_all(
        &self,
        location: InstructionLocation,
        names: &[Symbol],
    ) -> Result<Vec<VariableType>, InferenceError> {
        names
            .iter()
            .map(|name| self.require_type(location, *name))
            .collect()
    }

    fn infer_instruction(
        &mut self,
        body: &FunctionBody,
        location: InstructionLocation,
        instruction: &Instruction,
    ) -> Result<(), InferenceError> {
        match instruction {
            Instruction::Assign {
                destination,
                source,
            } => {
                let ty = match source {
                    Operand::Variable(source) => self.require_type(location, *source)?,
                    Operand::Literal(literal) => literal_type(*literal),
                };

                self.add_variable(location, *destination, ty)
            }
            Instruction::Undefined { .. } | Instruction::Break | Instruction::Continue => Ok(()),
            Instruction::Call {
                destinations,
                function,
                arguments,
            } => {
                let argument_types = self.require_all(location, arguments)?;
                let resolved =
                    self.resolve_call(location, *function, &argument_types, destinations.len())?;

                let outputs = &resolved.function_type.outputs;
                if destinations.len() > outputs.len() {
                    return Err(inference_error!(
                        self.function(),
                        Some(location),
                        TypeInferenceFailure,
                        "`{function}` returns {} values but {} were requested",
                        outputs.len(),
                        destinations.len()
                    ));
                }

                for (destination, ty) in destinations.iter().zip(outputs) {
                    self.add_variable(location, *destination, ty.clone())?;
                }

                self.queue_replacement(
                    location,
                    Instruction::TypedCall {
                        destinations: destinations.clone(),
                        instance: resolved.instance,
                        function_type: resolved.function_type,
                        arguments: arguments.clone(),
                    },
                );

                Ok(())
            }
            Instruction::TypedCall {
                destinations,
                function_type,
                arguments,
                ..
            } => {
                self.require_all(location, arguments)?;

                for (destination, ty) in destinations.iter().zip(&function_type.outputs) {
                    self.add_variable(location, *destination, ty.clone())?;
                }

                Ok(())
            }
            Instruction::Branch {
                condition,
                then_block,
                else_block,
                end_block,
            } => {
                self.require_type(location, *condition)?;

                self.infer_block(body, *then_block)?;
                self.infer_block(body, *else_block)?;
                self.infer_block(body, *end_block)
            }
            Instruction::For {
                induction,
                start,
                interval,
                end,
                body: loop_body,
                exit,
            } => {
                let start_type = self.require_type(location, *start)?;
                let interval_type = self.require_type(location, *interval)?;
                let end_type = self.require_type(location, *end)?;

                if !start_type.is_scalar() || !interval_type.is_scalar() || !end_type.is_scalar() {
                    return Err(inference_error!(
                        self.function(),
                        Some(location),
                        NotYetImplemented,
                        "loops over the columns of an array are not supported"
                    ));
                }

                match interval_type.constant() {
                    Some(step) if step != 0.0 => {}
                    _ => warn!(
                        "interval `{interval}` of loop at {location} has no known sign, assuming \
                         an increasing loop"
                    ),
                }

                let Some(ty) = induction_type(&start_type, &interval_type) else {
                    return Err(inference_error!(
                        self.function(),
                        Some(location),
                        TypeInferenceFailure,
                        "no type describes both {start_type} and {interval_type}"
                    ));
                };
                self.add_variable(location, *induction, ty)?;

                self.infer_loop(body, location, *loop_body)?;
                self.infer_block(body, *exit)
            }
            Instruction::While {
                body: loop_body,
                exit,
            } => {
                self.infer_loop(body, location, *loop_body)?;
                self.infer_block(body, *exit)
            }
            Instruction::Phi {
                destination,
                sources,
            } => {
                let ty = match self.pinned_type(*destination) {
                    Some(pinned) => Some(pinned.clone()),
                    None => self.merge_sources(location, sources)?,
                };

                match ty {
                    Some(ty) => self.add_variable(location, *destination, ty),
                    None => {
                        trace!("no source of `{destination}` is typed yet");
                        Ok(())
                    }
                }
            }
            Instruction::MatrixGet {
                destination,
                matrix,
                indices,
            }
            | Instruction::SimpleGet {
                destination,
                matrix,
                indices,
            } => {
                let matrix_type = self.require_type(location, *matrix)?;
                let index_types = self.require_all(location, indices)?;

                let ty = matrix::get_type(&matrix_type, &index_types).map_err(|e| {
                    inference_error!(self.function(), Some(location), tag = e.tag(), "{e}")
                })?;

                self.add_variable(location, *destination, ty)
            }
            Instruction::MatrixSet {
                destination,
                matrix,
                indices,
                value,
            } => {
                let index_types = self.require_all(location, indices)?;
                let value_type = self.require_type(location, *value)?;
                let matrix_type = self.variable_type(*matrix).cloned();

                let ty = matrix::set_type(matrix_type.as_ref(), &index_types, &value_type)
                    .map_err(|e| {
                        inference_error!(self.function(), Some(location), tag = e.tag(), "{e}")
                    })?;

                self.add_variable(location, *destination, ty)
            }
            Instruction::SimpleSet {
                destination,
                matrix,
                indices,
                value,
            } => {
                let ty = self.require_type(location, *matrix)?;
                self.require_all(location, indices)?;
                self.require_type(location, *value)?;

                self.add_variable(location, *destination, ty)
            }
            Instruction::End {
                destination,
                matrix,
                index,
                num_indices,
            } => {
                let matrix_type = self.require_type(location, *matrix)?;

                let value = matrix::end_value(&matrix_type, *index, *num_indices)
                    .and_then(|value| i64::try_from(value).ok());

                match value {
                    Some(value) => {
                        self.add_variable(location, *destination, VariableType::int_constant(value))?;
                        self.queue_replacement(
                            location,
                            Instruction::Assign {
                                destination: *destination,
                                source: Operand::Literal(Literal::Integer(value)),
                            },
                        );

                        Ok(())
                    }
                    None => self.add_variable(location, *destination, VariableType::int()),
                }
            }
            Instruction::ValidateTrue { condition } => {
                self.require_type(location, *condition).map(|_| ())
            }
        }
    }

    /// Merge of the typed sources of a phi. The constant is dropped when some
    /// source is not typed yet, since it may hold any value of the type.
    fn merge_sources(
        &self,
        location: InstructionLocation,
        sources: &BTreeMap<BlockId, Symbol>,
    ) -> Result<Option<VariableType>, InferenceError> {
        let typed = sources
            .values()
            .filter_map(|source| self.variable_type(*source))
            .collect::<Vec<_>>();

        if typed.is_empty() {
            return Ok(None);
        }

        let Some(merged) = combine_all(typed.iter().copied()) else {
            return Err(inference_error!(
                self.function(),
                Some(location),
                TypeInferenceFailure,
                "values of types {} can not be merged",
                itertools::join(&typed, ", ")
            ));
        };

        if typed.len() < sources.len() {
            return Ok(Some(merged.without_constant()));
        }

        Ok(Some(merged))
    }

    /// Widens the pinned type of the loop-carried `destination` to cover
    /// `merged`. Returns whether the pin changed.
    fn widen_pin(
        &mut self,
        location: InstructionLocation,
        destination: Symbol,
        merged: VariableType,
    ) -> Result<bool, InferenceError> {
        let pinned = match self.pinned_type(destination) {
            Some(previous) => combine_types(previous, &merged).ok_or_else(|| {
                inference_error!(
                    self.function(),
                    Some(location),
                    TypeInferenceFailure,
                    "`{destination}` is both {previous} and {merged}"
                )
            })?,
            None => merged,
        };

        if self.pinned_type(destination) == Some(&pinned) {
            return Ok(false);
        }

        trace!("loop-carried `{destination}` widens to {pinned}");
        self.pin(destination, pinned);

        Ok(true)
    }

    /// Infers `loop_body` until the types merged by the phis at its top are
    /// stable. Between rounds every variable of the body is unassigned and
    /// the merged types are pinned, so the next round starts from them.
    fn infer_loop(
        &mut self,
        body: &FunctionBody,
        location: InstructionLocation,
        loop_body: BlockId,
    ) -> Result<(), InferenceError> {
        let phis = body.block(loop_body).instructions.iter().enumerate().filter_map(
            |(offset, instruction)| match instruction {
                Instruction::Phi {
                    destination,
                    sources,
                } => Some((InstructionLocation::new(loop_body, offset), *destination, sources)),
                _ => None,
            },
        );
        let phis = phis.collect::<Vec<_>>();

        let contained = body.contained_blocks(loop_body);
        let declared = body.declared_in_contained_blocks(loop_body);
        let max_rounds = self.options().max_inference_passes;

        for round in 1..=max_rounds {
            debug!("inferring loop body {loop_body} of {}, round {round}", self.function());
            self.infer_block(body, loop_body)?;

            let mut changed = false;
            for (phi_location, destination, sources) in &phis {
                let merged = self.merge_sources(*phi_location, sources)?;
                let current = self.variable_type(*destination).cloned();

                let Some(merged) = merged else {
                    continue;
                };

                if current.as_ref() == Some(&merged) {
                    continue;
                }

                if self.widen_pin(*phi_location, *destination, merged)? {
                    changed = true;
                }
            }

            if !changed {
                return Ok(());
            }

            for name in &declared {
                self.unassign(*name);
            }
            self.discard_edits_in(&contained);
        }

        Err(inference_error!(
            self.function(),
            Some(location),
            NonConvergence,
            "types of the loop body did not stabilize after {max_rounds} rounds"
        ))
    }
}

#[cfg(test)]
mod tests {
    use indoc::indoc;
    use pretty_assertions::assert_eq;

    use super::*;
    use crate::{
        frontend::{SourceFile, parser::Parser},
        index::Index,
        middle::{
            inference::{ErrorTag, Session, TypedInstance},
            shape::Shape,
            ssa::Module,
        },
        options::CompilerOptions,
    };

    fn module(source: &str) -> Module {
        Parser::parse_module(&SourceFile::from_memory(source)).unwrap()
    }

    fn infer(module: &Module, function: &str) -> Result<std::rc::Rc<TypedInstance>, InferenceError> {
        Session::new(module, CompilerOptions::without_passes())
            .infer_function(Symbol::new(function), None)
    }

    fn type_of(instance: &TypedInstance, name: &str) -> VariableType {
        instance.variable_type(Symbol::new(name)).unwrap().clone()
    }

    #[test]
    fn literals() {
        assert_eq!(
            literal_type(Literal::Integer(3)),
            VariableType::int_constant(3).with_weak(true)
        );
        assert_eq!(
            literal_type(Literal::Integer(1 << 40)),
            VariableType::scalar_constant(ScalarKind::Double, (1i64 << 40) as f64).with_weak(true)
        );
        assert_eq!(
            literal_type(Literal::Float(0.5)),
            VariableType::scalar_constant(ScalarKind::Double, 0.5).with_weak(true)
        );
    }

    #[test]
    fn narrower_merge_keeps_the_pin() {
        let module = Module::default();
        let mut session = Session::new(&module, CompilerOptions::without_passes());
        let mut context = InferenceContext::new(&mut session, Symbol::new("f"));
        let location = InstructionLocation::new(BlockId::new(1), 0);
        let carried = Symbol::new("s1");

        assert!(context.widen_pin(location, carried, VariableType::int_constant(0)).unwrap());
        assert!(context.widen_pin(location, carried, VariableType::int()).unwrap());
        assert!(!context.widen_pin(location, carried, VariableType::int_constant(7)).unwrap());
        assert!(!context.widen_pin(location, carried, VariableType::int()).unwrap());
        assert_eq!(context.pinned_type(carried), Some(&VariableType::int()));
    }

    #[test]
    fn induction_types() {
        let int = VariableType::int();
        let double = VariableType::double();

        assert_eq!(induction_type(&int, &int), Some(int.clone()));
        assert_eq!(induction_type(&int, &double), Some(double.clone()));
        assert_eq!(induction_type(&double, &int), Some(double.clone()));
        assert_eq!(
            induction_type(&VariableType::int_constant(1), &VariableType::int_constant(1)),
            Some(int)
        );
    }

    #[test]
    fn straight_line_calls_fold_constants() {
        let module = module(indoc! {"
            function [y] = f()
            #0:
                a = 2
                b = 3
                y = call plus(a, b)
            end
        "});

        let instance = infer(&module, "f").unwrap();

        assert_eq!(type_of(&instance, "y"), VariableType::int_constant(5));
        assert!(matches!(
            instance.body.block(BlockId::ENTRY).instructions[2],
            Instruction::TypedCall { .. }
        ));
    }

    #[test]
    fn branches_merge_at_the_join() {
        let module = module(indoc! {"
            function [y] = f(c: logical)
            #0:
                branch c, #1, #2, #3
            #1:
                a = 1
            #2:
                b = 2.5
            #3:
                y = phi #1:a, #2:b
            end
        "});

        let instance = infer(&module, "f").unwrap();

        assert_eq!(type_of(&instance, "y"), VariableType::double().with_weak(true));
    }

    #[test]
    fn loop_carried_values_lose_their_constant() {
        let module = module(indoc! {"
            function [s] = f(n: int32)
            #0:
                s0 = 0
                one = 1
                for i = one, one, n, #1, #2
            #1:
                s1 = phi #0:s0, #1:s2
                s2 = call plus(s1, i)
            #2:
                s = phi #0:s0, #1:s2
            end
        "});

        let instance = infer(&module, "f").unwrap();

        assert_eq!(type_of(&instance, "i"), VariableType::int());
        assert_eq!(type_of(&instance, "s1"), VariableType::int());
        assert_eq!(type_of(&instance, "s"), VariableType::int());
    }

    #[test]
    fn growing_array_in_loop() {
        let module = module(indoc! {"
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
        "});

        let instance = infer(&module, "f").unwrap();
        let row = VariableType::dynamic_matrix(ScalarKind::Int32, Shape::row());

        assert_eq!(type_of(&instance, "y1"), row);
        assert_eq!(type_of(&instance, "y"), row);
        assert_eq!(instance.function_type.outputs, [row]);
    }

    #[test]
    fn end_is_replaced_by_its_value() {
        let module = module(indoc! {"
            function [x] = f(A: double[3, 4])
            #0:
                last = end A, 1, 2
                one = 1
                x = get A(one, last)
            end
        "});

        let instance = infer(&module, "f").unwrap();

        assert_eq!(type_of(&instance, "last"), VariableType::int_constant(4));
        assert_eq!(
            instance.body.block(BlockId::ENTRY).instructions[0],
            Instruction::Assign {
                destination: Symbol::new("last"),
                source: Operand::Literal(Literal::Integer(4)),
            }
        );
    }

    #[test]
    fn too_many_outputs() {
        let module = module(indoc! {"
            function [a, b] = f(x: double)
            #0:
                [a, b] = call numel(x)
            end
        "});

        let error = infer(&module, "f").unwrap_err();

        assert_eq!(error.tag, ErrorTag::TypeInferenceFailure);
        assert_eq!(error.location, Some(InstructionLocation::new(BlockId::ENTRY, 0)));
    }

    #[test]
    fn unknown_function() {
        let module = module(indoc! {"
            function [a] = f(x: double)
            #0:
                a = call frobnicate(x)
            end
        "});

        let error = infer(&module, "f").unwrap_err();

        assert_eq!(error.tag, ErrorTag::TypeInferenceFailure);
        assert!(error.message.contains("frobnicate"));
    }

    #[test]
    fn reassignment_is_rejected() {
        let module = module(indoc! {"
            function [a] = f()
            #0:
                a = 1
                a = 2
            end
        "});

        let mut session = Session::new(&module, CompilerOptions::without_passes());
        let error = session
            .infer_function(Symbol::new("f"), None)
            .unwrap_err();

        assert_eq!(error.tag, ErrorTag::CorrectnessError);
    }

    #[test]
    fn widening_loops_need_enough_rounds() {
        let module = module(indoc! {"
            function [s] = f(n: int32)
            #0:
                s0 = 0
                one = 1
                half = 0.5
                for i = one, one, n, #1, #2
            #1:
                s1 = phi #0:s0, #1:s2
                s2 = call plus(s1, half)
            #2:
                s = phi #0:s0, #1:s2
            end
        "});

        let instance = infer(&module, "f").unwrap();
        assert_eq!(type_of(&instance, "s"), VariableType::double());

        let options = CompilerOptions {
            max_inference_passes: 1,
            ..CompilerOptions::without_passes()
        };
        let error = Session::new(&module, options)
            .infer_function(Symbol::new("f"), None)
            .unwrap_err();

        assert_eq!(error.tag, ErrorTag::NonConvergence);
        assert_eq!(error.location, Some(InstructionLocation::new(BlockId::ENTRY, 3)));
    }

    #[test]
    fn user_functions_are_specialized() {
        let module = module(indoc! {"
            function [y] = double_it(x)
            #0:
                two = 2
                y = call times(x, two)
            end

            function [r] = main(a: int32, b: double)
            #0:
                p = call double_it(a)
                q = call double_it(b)
                r = call plus(p, q)
            end
        "});

        let mut session = Session::new(&module, CompilerOptions::without_passes());
        let instance = session.infer_function(Symbol::new("main"), None).unwrap();

        assert_eq!(type_of(&instance, "p"), VariableType::int());
        assert_eq!(type_of(&instance, "r"), VariableType::double());
        assert!(session.instance_state(Symbol::new("double_it_i")).is_some());
        assert!(session.instance_state(Symbol::new("double_it_d")).is_some());
    }

    #[test]
    fn recursion_is_not_supported() {
        let module = module(indoc! {"
            function [y] = f(x: int32)
            #0:
                y = call f(x)
            end
        "});

        let error = infer(&module, "f").unwrap_err();

        assert_eq!(error.tag, ErrorTag::SpecializationFailure);
    }
}
