//! Every optimization configuration must preserve observable behavior

mod common;

use pretty_assertions::assert_eq;
use tern_compiler::CompilerOptions;
use tern_test::{init_tracing, run_source, RunOutput};

fn run(name: &str, config: &str, source: &str, options: &CompilerOptions) -> RunOutput {
    run_source(source, options).unwrap_or_else(|err| panic!("{} under {}: {}", name, config, err))
}

#[test]
fn test_corpus_matches_expected_output() {
    init_tracing();
    for case in common::CORPUS {
        let out = run(case.name, "full", case.source, &CompilerOptions::default());
        assert_eq!(out.output, case.output, "{}", case.name);
        assert_eq!(out.uncaught.as_deref(), case.uncaught, "{}", case.name);
    }
}

#[test]
fn test_configurations_agree() {
    init_tracing();
    let configs = common::configurations();
    for case in common::CORPUS {
        let baseline = run(case.name, "none", case.source, &CompilerOptions::unoptimized());
        for (config, options) in &configs {
            let out = run(case.name, config, case.source, options);
            assert_eq!(out, baseline, "{} under {}", case.name, config);
        }
    }
}

#[test]
fn test_parallel_compilation_is_equivalent() {
    init_tracing();
    let parallel = CompilerOptions {
        parallel: true,
        ..Default::default()
    };
    for case in common::CORPUS {
        let sequential = tern_test::compile_source(case.source, &CompilerOptions::default()).unwrap();
        let concurrent = tern_test::compile_source(case.source, &parallel).unwrap();
        assert_eq!(sequential.bytecode.functions.len(), concurrent.bytecode.functions.len());
        for (a, b) in sequential.bytecode.functions.iter().zip(&concurrent.bytecode.functions) {
            assert_eq!(a.instrs.len(), b.instrs.len(), "{}: {}", case.name, a.display_name());
            assert_eq!(a.register_count, b.register_count);
            assert_eq!(a.exception_table, b.exception_table);
        }
    }
}
