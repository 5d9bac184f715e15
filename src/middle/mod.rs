//! Types are attached to the SSA bodies here. Inference specializes every
//! reachable function for the types it is called with, then the optimization
//! passes rewrite the typed instances using what inference proved.

pub mod inference;
pub mod optimization;
pub mod scalar;
pub mod shape;
pub mod ssa;
pub mod ty;
