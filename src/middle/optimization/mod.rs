//! Rewrites of typed instances which rely on the inferred types.

use strum::{Display, EnumIter, EnumString};
use thiserror::Error;
use tracing::{debug, instrument};

use crate::{middle::inference::TypedInstance, options::CompilerOptions};

pub mod bounds_check;
pub mod builder;
pub mod end_elimination;
pub mod growth;
pub mod index_extraction;
pub mod loops;
pub mod preallocation;
pub mod usage;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display, EnumString, EnumIter)]
#[strum(serialize_all = "snake_case")]
pub enum PassKind {
    EndElimination,
    BoundsCheckMotion,
    MatrixPreallocation,
}

/// Why a candidate was left alone. Never leaves the pass that produced it.
#[derive(Debug, Clone, PartialEq, Error)]
#[error("{0}")]
pub struct Ineligible(String);

impl Ineligible {
    pub fn new(reason: impl Into<String>) -> Self {
        Self(reason.into())
    }
}

/// Runs the passes enabled in `options` over `instance`, in order. Passes
/// only rewrite what they can prove safe and never fail.
#[instrument(skip_all, fields(instance = %instance.name))]
pub fn perform_post_inference_optimizations(instance: &mut TypedInstance, options: &CompilerOptions) {
    for pass in &options.passes {
        debug!("running {pass}");

        match pass {
            PassKind::EndElimination => end_elimination::eliminate_ends(instance, options),
            PassKind::BoundsCheckMotion => bounds_check::move_bounds_checks(instance, options),
            PassKind::MatrixPreallocation => preallocation::preallocate_matrices(instance, options),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::str::FromStr;

    use strum::IntoEnumIterator;

    use super::*;

    #[test]
    fn pass_names() {
        assert_eq!(
            PassKind::iter().map(|p| p.to_string()).collect::<Vec<_>>(),
            ["end_elimination", "bounds_check_motion", "matrix_preallocation"]
        );
        assert_eq!(
            PassKind::from_str("bounds_check_motion"),
            Ok(PassKind::BoundsCheckMotion)
        );
        assert!(PassKind::from_str("inline").is_err());
    }
}
