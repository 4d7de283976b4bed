//! End-to-end checks on what the pipeline does to whole programs

mod common;

use pretty_assertions::assert_eq;
use tern_compiler::bytecode::{BytecodeFunction, Constant, Instr};
use tern_compiler::ir::{InstrId, InstrKind, IrFunction, IrModule, Literal, Operand, ScopeId};
use tern_compiler::verify::verify_module;
use tern_compiler::{Compiler, CompilerOptions, PrettyPrint};
use tern_test::{compile_source, init_tracing, parse_program, run_source};

fn bytecode_function<'a>(functions: &'a [BytecodeFunction], name: &str) -> &'a BytecodeFunction {
    functions
        .iter()
        .find(|f| f.name.as_deref() == Some(name))
        .unwrap_or_else(|| panic!("no function named {}", name))
}

fn ir_function<'a>(module: &'a IrModule, name: &str) -> &'a IrFunction {
    module
        .functions
        .iter()
        .find(|f| f.name.as_deref() == Some(name))
        .unwrap_or_else(|| panic!("no function named {}", name))
}

fn verified_options() -> CompilerOptions {
    CompilerOptions {
        verify: true,
        ..Default::default()
    }
}

#[test]
fn test_leaf_function_has_no_environment() {
    init_tracing();
    let output = compile_source("function add(a, b) { return a + b; } add(2, 3);", &CompilerOptions::default()).unwrap();
    let add = bytecode_function(&output.bytecode.functions, "add");
    for instr in &add.instrs {
        assert!(
            !matches!(
                instr,
                Instr::CreateEnv { .. }
                    | Instr::GetParentEnv { .. }
                    | Instr::ResolveEnv { .. }
                    | Instr::LoadFrame { .. }
                    | Instr::StoreFrame { .. }
            ),
            "unexpected {} in add",
            instr
        );
    }
    assert_eq!(add.environment, None);
    assert!(output.bytecode.functions[0]
        .instrs
        .iter()
        .any(|i| matches!(i, Instr::Call { .. })));
}

#[test]
fn test_constant_expression_folds() {
    init_tracing();
    let output = compile_source("print(2 + 3);", &CompilerOptions::default()).unwrap();
    let main = &output.bytecode.functions[0];
    assert!(main
        .instrs
        .iter()
        .any(|i| matches!(i, Instr::LoadConst { value: Constant::Number(n), .. } if *n == 5.0)));
    assert!(!main
        .instrs
        .iter()
        .any(|i| matches!(i, Instr::Binary { .. } | Instr::BinaryN { .. })));
    assert_eq!(run_source("print(2 + 3);", &CompilerOptions::default()).unwrap().output, vec!["5"]);
}

#[test]
fn test_optimization_is_idempotent() {
    init_tracing();
    let source = "
        function sum(n) { var t = 0; for (var i = 0; i < n; i++) { t += i * 2; } return t; }
        function greet(who) { let msg = 'hi ' + who; return () => msg; }
        print(sum(10), greet('there')());
    ";
    let (program, decls) = parse_program(source).unwrap();
    let compiler = Compiler::new(verified_options());
    let mut module = compiler.build_ir(&program, &decls).unwrap();
    compiler.optimize(&mut module).unwrap();
    let first = module.pretty_print();

    let stats = compiler.optimize(&mut module).unwrap();
    assert_eq!(module.pretty_print(), first);
    assert_eq!(stats.changes, Vec::<&str>::new());
}

#[test]
fn test_optimized_ir_verifies() {
    init_tracing();
    for case in common::CORPUS {
        let output = compile_source(case.source, &CompilerOptions::default()).unwrap();
        if let Err(err) = verify_module(&output.ir, "final") {
            panic!("{}: {}", case.name, err);
        }
    }
}

#[test]
fn test_unoptimized_ir_verifies() {
    init_tracing();
    for case in common::CORPUS {
        let (program, decls) = parse_program(case.source).unwrap();
        let module = Compiler::new(verified_options()).build_ir(&program, &decls).unwrap();
        if let Err(err) = verify_module(&module, "lower") {
            panic!("{}: {}", case.name, err);
        }
    }
}

#[test]
fn test_handler_observed_stores_survive() {
    init_tracing();
    let source = "
        function risky() { throw 1; }
        function f() {
            var x;
            try { x = 1; risky(); x = 2; } catch (e) { print(x); }
        }
        f();
    ";
    let out = run_source(source, &CompilerOptions::default()).unwrap();
    assert_eq!(out.output, vec!["1"]);

    let output = compile_source(source, &CompilerOptions::default()).unwrap();
    let f = ir_function(&output.ir, "f");
    let stored: Vec<f64> = f
        .instr_ids()
        .into_iter()
        .filter(|id| matches!(f.instr(*id).kind, InstrKind::StoreStack))
        .filter_map(|id| match f.instr(id).operand(1) {
            Some(Operand::Literal(Literal::Number(n))) => Some(*n),
            _ => None,
        })
        .collect();
    assert!(stored.contains(&1.0), "store of 1 removed: {:?}", stored);
    assert!(stored.contains(&2.0), "store of 2 removed: {:?}", stored);
}

#[test]
fn test_recursive_inlining_is_bounded() {
    init_tracing();
    let source = "
        function wrapper(n) {
            function fact(k) { return k <= 1 ? 1 : k * fact(k - 1); }
            function twice(x) { return fact(x) + fact(x); }
            return twice(n);
        }
        print(wrapper(5));
    ";
    let options = CompilerOptions::default();
    let output = compile_source(source, &options).unwrap();
    for func in &output.ir.functions {
        for id in func.instr_ids() {
            let InstrKind::Call { chain } = &func.instr(id).kind else {
                continue;
            };
            assert!(chain.len() <= options.max_inline_depth, "chain too deep in {}: {:?}", func.display_name(), chain);
            let mut seen = chain.clone();
            seen.sort();
            seen.dedup();
            assert_eq!(seen.len(), chain.len(), "repeated function in chain {:?}", chain);
        }
    }
    assert_eq!(run_source(source, &options).unwrap().output, vec!["240"]);
}

#[test]
fn test_inliner_respects_depth_limit() {
    init_tracing();
    let source = "
        function outer() {
            function a(x) { return b(x) + 1; }
            function b(x) { return c(x) + 1; }
            function c(x) { return x + 1; }
            return a(1);
        }
        print(outer());
    ";
    for depth in 0..3 {
        let options = CompilerOptions {
            max_inline_depth: depth,
            ..Default::default()
        };
        let output = compile_source(source, &options).unwrap();
        for func in &output.ir.functions {
            for id in func.instr_ids() {
                if let InstrKind::Call { chain } = &func.instr(id).kind {
                    assert!(chain.len() <= depth);
                }
            }
        }
        assert_eq!(run_source(source, &options).unwrap().output, vec!["4"]);
    }
}

#[test]
fn test_disabled_passes_do_not_run() {
    init_tracing();
    let options = CompilerOptions::default().disable_pass("inline").disable_pass("cse");
    let output = compile_source(common::CORPUS[4].source, &options).unwrap();
    assert!(!output.stats.changes.contains(&"inline"));
    assert!(!output.stats.changes.contains(&"cse"));

    let output = compile_source(common::CORPUS[4].source, &CompilerOptions::unoptimized()).unwrap();
    assert_eq!(output.stats.iterations, 0);
    assert!(output.stats.changes.is_empty());
}

#[test]
fn test_debug_info_maps_every_instruction() {
    init_tracing();
    let options = CompilerOptions {
        debug_info: true,
        ..Default::default()
    };
    let output = compile_source("var x = 1;\nfunction f(y) {\n  return y * x;\n}\nprint(f(2));", &options).unwrap();
    for func in &output.bytecode.functions {
        assert_eq!(func.debug.len(), func.instrs.len(), "{}", func.display_name());
    }
    let output = compile_source("print(1);", &CompilerOptions::default()).unwrap();
    assert!(output.bytecode.functions[0].debug.is_empty());
}

#[test]
fn test_strings_are_interned_once() {
    init_tracing();
    let output = compile_source(
        "var a = 'same'; var b = 'same'; function f() { return 'same'; } print(a, b, f());",
        &CompilerOptions::unoptimized(),
    )
    .unwrap();
    let count = output.bytecode.strings.iter().filter(|s| s.as_str() == "same").count();
    assert_eq!(count, 1);
}

fn created_scopes(func: &IrFunction) -> Vec<(InstrId, ScopeId)> {
    func.instr_ids()
        .into_iter()
        .filter_map(|id| match func.instr(id).kind {
            InstrKind::CreateScope(scope) => Some((id, scope)),
            _ => None,
        })
        .collect()
}

#[test]
fn test_block_environment_created_per_entry() {
    init_tracing();
    let source = "
        function outer() {
            var fs = [], i = 0;
            while (i < 2) { let j = i; fs[i] = function inner() { return j; }; i++; }
            return fs;
        }
        var fs = outer();
        print(fs[0](), fs[1]());
    ";
    let (program, decls) = parse_program(source).unwrap();
    let module = Compiler::new(verified_options()).build_ir(&program, &decls).unwrap();
    verify_module(&module, "lower").unwrap();

    let outer = ir_function(&module, "outer");
    assert_eq!(outer.scope, None);
    let created = created_scopes(outer);
    assert_eq!(created.len(), 1);
    let (create, scope) = created[0];
    assert_ne!(outer.instr(create).block(), outer.entry);
    assert_eq!(ir_function(&module, "inner").parent_scope, Some(scope));
    let names: Vec<&str> = module
        .scope(scope)
        .variables
        .iter()
        .map(|v| module.variable(*v).name.as_str())
        .collect();
    assert_eq!(names, vec!["j"]);

    assert_eq!(run_source(source, &CompilerOptions::default()).unwrap().output, vec!["0 1"]);
}

#[test]
fn test_for_let_head_copied_per_iteration() {
    init_tracing();
    let source = "
        function outer() {
            var fs = [];
            for (let k = 0; k < 3; k++) { fs[k] = function inner() { return k; }; }
            return fs;
        }
        var fs = outer();
        print(fs[0](), fs[1](), fs[2]());
    ";
    let (program, decls) = parse_program(source).unwrap();
    let module = Compiler::new(verified_options()).build_ir(&program, &decls).unwrap();
    let outer = ir_function(&module, "outer");
    let created = created_scopes(outer);
    assert_eq!(created.len(), 2);
    assert_eq!(created[0].1, created[1].1);
    assert_eq!(ir_function(&module, "inner").parent_scope, Some(created[0].1));

    for options in [CompilerOptions::default(), CompilerOptions::unoptimized()] {
        assert_eq!(run_source(source, &options).unwrap().output, vec!["0 1 2"]);
    }
}

#[test]
fn test_arrow_reads_this_from_environment() {
    init_tracing();
    let source = "
        var o = { v: 7, m: function m() { return () => this.v; } };
        print(o.m()());
    ";
    let (program, decls) = parse_program(source).unwrap();
    let module = Compiler::new(verified_options()).build_ir(&program, &decls).unwrap();
    let m = ir_function(&module, "m");
    let scope = m.scope.expect("m keeps `this` in an environment");
    assert!(module
        .scope(scope)
        .variables
        .iter()
        .any(|v| module.variable(*v).name == "this"));

    let arrow = module
        .functions
        .iter()
        .find(|f| f.parent_scope == Some(scope))
        .unwrap();
    let kinds: Vec<&InstrKind> = arrow.instr_ids().into_iter().map(|id| &arrow.instr(id).kind).collect();
    assert!(kinds.iter().any(|k| matches!(k, InstrKind::LoadFrame(_))));
    for id in arrow.instr_ids() {
        assert!(!arrow.instr(id).operands().contains(&Operand::Param(0)));
    }

    assert_eq!(run_source(source, &CompilerOptions::default()).unwrap().output, vec!["7"]);
}

#[test]
fn test_typeof_unresolved_name_does_not_throw() {
    init_tracing();
    let source = "print(typeof nope); print(nope);";
    let (program, decls) = parse_program(source).unwrap();
    let module = Compiler::new(verified_options()).build_ir(&program, &decls).unwrap();
    let main = &module.functions[0];
    let kinds: Vec<&InstrKind> = main.instr_ids().into_iter().map(|id| &main.instr(id).kind).collect();
    assert!(kinds.iter().any(|k| matches!(k, InstrKind::TryLoadGlobal(name) if name == "nope")));
    assert!(kinds.iter().any(|k| matches!(k, InstrKind::LoadGlobal(name) if name == "nope")));

    let out = run_source(source, &CompilerOptions::default()).unwrap();
    assert_eq!(out.output, vec!["undefined"]);
    assert_eq!(out.uncaught.as_deref(), Some("ReferenceError: nope is not defined"));
}
