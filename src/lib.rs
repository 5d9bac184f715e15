//! Typed SSA core of an ahead-of-time compiler for a MATLAB-like array
//! language.
//!
//! Untyped function bodies are read from their textual form, specialized for
//! the argument types they are called with, and optimized using the inferred
//! types. See [`compile`] for the whole flow.

use std::rc::Rc;

use tracing::info;

use crate::{
    frontend::{SourceFile, intern::Symbol, parser::Parser},
    middle::{inference::Session, ssa::Module, ty::VariableType},
    options::CompilerOptions,
};

pub mod error;
pub mod frontend;
pub mod index;
pub mod middle;
pub mod options;

pub use error::CompileError;
pub use middle::inference::TypedInstance;

/// Entry point of a compilation. Without a name the first function of the
/// module is used, and without argument types its declared parameter types.
#[derive(Debug, Clone, Default)]
pub struct EntryPoint {
    pub function: Option<String>,
    pub arguments: Option<Vec<VariableType>>,
}

/// Parses `source`, validates its bodies and specializes the entry point and
/// every function it reaches. Instances are returned by mangled name, the
/// entry instance first.
pub fn compile(
    source: &SourceFile,
    entry: &EntryPoint,
    options: &CompilerOptions,
) -> Result<Vec<Rc<TypedInstance>>, CompileError> {
    let module = Parser::parse_module(source)?;
    module.validate()?;

    compile_module(&module, entry, options)
}

pub fn compile_module(
    module: &Module,
    entry: &EntryPoint,
    options: &CompilerOptions,
) -> Result<Vec<Rc<TypedInstance>>, CompileError> {
    let function = match &entry.function {
        Some(name) => Symbol::new(name),
        None => module
            .functions
            .first()
            .map(|f| f.name)
            .ok_or(CompileError::EmptyModule)?,
    };

    let mut session = Session::new(module, options.clone());
    let root = session.infer_function(function, entry.arguments.clone())?;

    let mut instances = vec![root.clone()];
    let mut callees = session
        .typed_instances()
        .filter(|instance| instance.name != root.name)
        .cloned()
        .collect::<Vec<_>>();
    callees.sort_by_key(|instance| instance.name.value());
    instances.extend(callees);

    info!("specialized {} instance(s) from `{function}`", instances.len());

    Ok(instances)
}

/// Reads and compiles the IR file at `path`
pub fn compile_file(
    path: &std::path::Path,
    entry: &EntryPoint,
    options: &CompilerOptions,
) -> Result<Vec<Rc<TypedInstance>>, CompileError> {
    let source = SourceFile::open(path).map_err(|source| CompileError::Io {
        path: path.display().to_string(),
        source,
    })?;

    compile(&source, entry, options)
}
