use thiserror::Error;

use crate::{
    frontend::parser::ParseError,
    middle::{inference::InferenceError, ssa::IrError},
};

#[derive(Debug, Error)]
pub enum CompileError {
    #[error("could not read `{path}`: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error(transparent)]
    Parse(#[from] ParseError),
    #[error(transparent)]
    Ir(#[from] IrError),
    #[error(transparent)]
    Inference(#[from] InferenceError),
    #[error("the module defines no function")]
    EmptyModule,
}
