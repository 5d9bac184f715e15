use strum::IntoEnumIterator;

use crate::middle::optimization::PassKind;

#[derive(Debug, Clone, PartialEq)]
pub struct CompilerOptions {
    /// Upper bound on the rounds of re-inference of one loop body before the
    /// loop-carried types are required to be stable
    pub max_inference_passes: usize,
    /// Post-inference passes, run in order
    pub passes: Vec<PassKind>,
    /// Fold system function calls whose operands are all known constants
    pub propagate_constants: bool,
}

impl Default for CompilerOptions {
    fn default() -> Self {
        Self {
            max_inference_passes: 16,
            passes: PassKind::iter().collect(),
            propagate_constants: true,
        }
    }
}

impl CompilerOptions {
    pub fn without_passes() -> Self {
        Self {
            passes: Vec::new(),
            ..Default::default()
        }
    }
}
