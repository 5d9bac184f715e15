use std::{path::PathBuf, str::FromStr};

use arrayc::{
    CompileError, EntryPoint, compile_file,
    frontend::{
        SourceFile,
        parser::{ParseError, Parser},
    },
    middle::{optimization::PassKind, ssa::pretty_print::plain, ty::VariableType},
    options::CompilerOptions,
};
use clap::{CommandFactory, Parser as ClapParser, error::ErrorKind};
use colored::Colorize;
use tracing_subscriber::EnvFilter;

#[derive(Debug, ClapParser)]
#[command(version, about, long_about = None)]
pub struct Args {
    /// Files holding untyped SSA function bodies
    source_files: Vec<PathBuf>,

    /// Function to specialize, the first of each file by default
    #[arg(long)]
    function: Option<String>,

    /// Type of the next parameter of the entry function, such as `int32` or
    /// `double[1, ?]`. The declared parameter types are used when omitted.
    #[arg(long = "arg-type")]
    arg_types: Vec<String>,

    /// Post-inference pass to run, in the order given. Every pass runs by
    /// default.
    #[arg(long = "pass", value_parser = PassKind::from_str)]
    passes: Vec<PassKind>,

    #[arg(long, conflicts_with = "passes")]
    no_passes: bool,

    #[arg(long, default_value_t = CompilerOptions::default().max_inference_passes)]
    max_inference_passes: usize,

    /// Print without colours
    #[arg(long)]
    plain: bool,

    /// Log filter used when `RUST_LOG` is not set
    #[arg(long, default_value = "warn")]
    log_level: String,
}

impl Args {
    fn options(&self) -> CompilerOptions {
        let passes = if self.no_passes {
            Vec::new()
        } else if self.passes.is_empty() {
            CompilerOptions::default().passes
        } else {
            self.passes.clone()
        };

        CompilerOptions {
            max_inference_passes: self.max_inference_passes,
            passes,
            ..Default::default()
        }
    }

    fn entry_point(&self) -> Result<EntryPoint, ParseError> {
        let arguments = self
            .arg_types
            .iter()
            .map(|ty| Parser::parse_type_annotation(&SourceFile::from_memory(ty.as_str())))
            .collect::<Result<Vec<VariableType>, _>>()?;

        Ok(EntryPoint {
            function: self.function.clone(),
            arguments: (!arguments.is_empty()).then_some(arguments),
        })
    }
}

fn report_error(error: &CompileError) {
    eprintln!("{}: {error}", "error".red());
}

fn main() {
    let args = Args::parse();

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&args.log_level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    if args.source_files.is_empty() {
        Args::command()
            .error(ErrorKind::MissingRequiredArgument, "Missing source files!")
            .exit();
    }

    for source_file in &args.source_files {
        if !source_file.is_file() {
            Args::command()
                .error(
                    ErrorKind::InvalidValue,
                    format!("Input path '{}' is not a file!", source_file.display()),
                )
                .exit()
        }
    }

    let options = args.options();
    let entry = match args.entry_point() {
        Ok(entry) => entry,
        Err(error) => Args::command()
            .error(ErrorKind::InvalidValue, format!("invalid argument type: {error}"))
            .exit(),
    };
    let mut failed = false;

    for source_file in &args.source_files {
        match compile_file(source_file, &entry, &options) {
            Ok(instances) => {
                for instance in instances {
                    let printed = instance.to_string();

                    if args.plain {
                        println!("{}", plain(&printed));
                    } else {
                        println!("{printed}");
                    }
                }
            }
            Err(error) => {
                report_error(&error);
                failed = true;
            }
        }
    }

    if failed {
        std::process::exit(1);
    }
}
