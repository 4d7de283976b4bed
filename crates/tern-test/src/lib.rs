//! Test support for the Tern compiler
//!
//! A small JavaScript-subset front end that produces the analyzed AST and
//! declaration table the compiler consumes, and a reference interpreter for
//! the bytecode it emits. Together they let tests go from source text to
//! observable program behavior.

pub mod lexer;
pub mod parser;
pub mod resolve;
pub mod value;
pub mod vm;

pub use parser::{ParseError, ParseResult};
pub use vm::{run_module, RunOutput, Vm, VmError, VmLimits, VmResult};

use tern_ast::{DeclTable, Program};
use tern_compiler::{CompileError, CompileOutput, Compiler, CompilerOptions};
use thiserror::Error;

/// Any failure between source text and a finished run
#[derive(Debug, Error)]
pub enum HarnessError {
    #[error(transparent)]
    Parse(#[from] ParseError),

    #[error(transparent)]
    Compile(#[from] CompileError),

    #[error(transparent)]
    Vm(#[from] VmError),
}

/// Install a `RUST_LOG`-driven subscriber once per test binary
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

/// Parse and resolve `source`
pub fn parse_program(source: &str) -> ParseResult<(Program, DeclTable)> {
    let (mut program, mut decls) = parser::parse(source)?;
    resolve::resolve(&mut program, &mut decls);
    Ok((program, decls))
}

/// Compile `source` with `options`, verifying every stage
pub fn compile_source(source: &str, options: &CompilerOptions) -> Result<CompileOutput, HarnessError> {
    let (program, decls) = parse_program(source)?;
    let options = CompilerOptions {
        verify: true,
        ..options.clone()
    };
    Ok(Compiler::new(options).compile(&program, &decls)?)
}

/// Compile and run `source`
pub fn run_source(source: &str, options: &CompilerOptions) -> Result<RunOutput, HarnessError> {
    let output = compile_source(source, options)?;
    Ok(run_module(&output.bytecode)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn run(source: &str) -> RunOutput {
        init_tracing();
        run_source(source, &CompilerOptions::default()).unwrap()
    }

    #[test]
    fn test_hello() {
        assert_eq!(run("print('hello', 1 + 2);").output, vec!["hello 3"]);
    }

    #[test]
    fn test_closure_counter() {
        let out = run("function counter() { let n = 0; return () => ++n; }
             var c = counter(); c(); c(); print(c());");
        assert_eq!(out.output, vec!["3"]);
    }

    #[test]
    fn test_uncaught_throw() {
        let out = run("print(1); throw new TypeError('bad');");
        assert_eq!(out.output, vec!["1"]);
        assert_eq!(out.uncaught.as_deref(), Some("TypeError: bad"));
    }

    #[test]
    fn test_parse_errors_surface() {
        let err = run_source("let = 1;", &CompilerOptions::default()).unwrap_err();
        assert!(matches!(err, HarnessError::Parse(_)));
    }

    #[test]
    fn test_const_assignment_is_static_error() {
        let err = run_source("const c = 1; c = 2;", &CompilerOptions::default()).unwrap_err();
        assert!(matches!(err, HarnessError::Compile(CompileError::StaticError { .. })));
    }

    #[test]
    fn test_generators_are_unsupported() {
        let err = run_source("function* g() {}", &CompilerOptions::default()).unwrap_err();
        assert!(matches!(err, HarnessError::Compile(CompileError::Unsupported { .. })));
    }
}
