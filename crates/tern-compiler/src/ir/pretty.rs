//! Pretty-printing for IR
//!
//! Provides human-readable output for debugging IR structures. The format
//! is stable, so tests compare printed IR directly.

use super::function::IrFunction;
use super::instr::InstrKind;
use super::module::IrModule;
use super::value::InstrId;
use std::fmt::Write;

/// Trait for pretty-printing IR constructs
pub trait PrettyPrint {
    fn pretty_print(&self) -> String;
}

impl PrettyPrint for IrModule {
    fn pretty_print(&self) -> String {
        let mut output = String::new();
        let _ = writeln!(output, "; module {}", self.name);

        for scope in self.live_scopes() {
            let names: Vec<&str> = scope
                .variables
                .iter()
                .map(|v| self.variable(*v).name.as_str())
                .collect();
            let parent = scope
                .parent
                .map_or_else(|| "none".to_string(), |p| p.to_string());
            let _ = writeln!(
                output,
                "; {} ({}) parent {}: [{}]",
                scope.id,
                scope.function,
                parent,
                names.join(", ")
            );
        }
        let _ = writeln!(output);

        for func in &self.functions {
            output.push_str(&func.pretty_print());
            let _ = writeln!(output);
        }

        output
    }
}

impl PrettyPrint for IrFunction {
    fn pretty_print(&self) -> String {
        let mut output = String::new();

        let params: Vec<String> = (1..=self.param_count)
            .map(|i| format!("$arg{}: {}", i - 1, self.param_types[i as usize]))
            .collect();
        let _ = write!(
            output,
            "function {} {}({}) -> {}",
            self.id,
            self.display_name(),
            params.join(", "),
            self.return_type
        );
        if let Some(scope) = self.scope {
            let _ = write!(output, " scope {}", scope);
        }
        if let Some(parent) = self.parent_scope {
            let _ = write!(output, " parent {}", parent);
        }
        let _ = writeln!(output);

        for block in self.blocks() {
            let _ = write!(output, "{}", block.id);
            if let Some(label) = &block.label {
                let _ = write!(output, " {}", label);
            }
            let _ = write!(output, ":");
            if let Some(handler) = block.handler {
                let _ = write!(output, " ; handler {}", handler);
            }
            let _ = writeln!(output);
            for id in block.instrs() {
                let _ = writeln!(output, "  {}", format_instr(self, *id));
            }
        }

        output
    }
}

/// Render one instruction, e.g. `%3: number = binary + %1, 2`
pub fn format_instr(func: &IrFunction, id: InstrId) -> String {
    let instr = func.instr(id);
    let mut text = String::new();
    if instr.kind.has_result() {
        let _ = write!(text, "{}: {} = ", id, instr.ty);
    }
    text.push_str(instr.kind.name());

    let ops: Vec<String> = instr.operands().iter().map(|o| o.to_string()).collect();
    match &instr.kind {
        InstrKind::Binary(op) => {
            let _ = write!(text, " {} {}", op.symbol(), ops.join(", "));
        }
        InstrKind::Unary(op) => {
            let _ = write!(text, " {} {}", op.name(), ops.join(", "));
        }
        InstrKind::Phi(blocks) => {
            let entries: Vec<String> = blocks
                .iter()
                .zip(ops.iter())
                .map(|(b, o)| format!("[{}: {}]", b, o))
                .collect();
            let _ = write!(text, " {}", entries.join(", "));
        }
        InstrKind::AllocStack(name)
        | InstrKind::LoadGlobal(name)
        | InstrKind::TryLoadGlobal(name)
        | InstrKind::StoreGlobal(name)
        | InstrKind::DeclareGlobal(name) => {
            let _ = write!(text, " {:?}", name);
            if !ops.is_empty() {
                let _ = write!(text, ", {}", ops.join(", "));
            }
        }
        InstrKind::CreateScope(scope) | InstrKind::ResolveScope(scope) => {
            let _ = write!(text, " {}", scope);
            if !ops.is_empty() {
                let _ = write!(text, ", {}", ops.join(", "));
            }
        }
        InstrKind::LoadFrame(var) | InstrKind::StoreFrame(var) => {
            let _ = write!(text, " {}, {}", var, ops.join(", "));
        }
        InstrKind::CreateClosure(f) => {
            let _ = write!(text, " {}", f);
            if !ops.is_empty() {
                let _ = write!(text, ", {}", ops.join(", "));
            }
        }
        InstrKind::Call { chain } => {
            let _ = write!(text, " {}", ops.join(", "));
            if !chain.is_empty() {
                let names: Vec<String> = chain.iter().map(|f| f.to_string()).collect();
                let _ = write!(text, " ; inlined {}", names.join(" > "));
            }
        }
        InstrKind::LoadConst(lit) => {
            let _ = write!(text, " {}", lit);
        }
        InstrKind::LoadParam(index) => {
            let _ = write!(text, " {}", index);
        }
        InstrKind::Branch(target) => {
            let _ = write!(text, " {}", target);
        }
        InstrKind::CondBranch {
            then_block,
            else_block,
        } => {
            let _ = write!(text, " {}, {}, {}", ops.join(", "), then_block, else_block);
        }
        InstrKind::Switch { cases, default } => {
            let arms: Vec<String> = cases
                .iter()
                .map(|(lit, b)| format!("[{}: {}]", lit, b))
                .collect();
            let _ = write!(
                text,
                " {}, {}, default {}",
                ops.join(", "),
                arms.join(", "),
                default
            );
        }
        InstrKind::TryStart { body, catch } => {
            let _ = write!(text, " {}, catch {}", body, catch);
        }
        InstrKind::TryEnd { next } => {
            let _ = write!(text, " {}", next);
        }
        _ => {
            if !ops.is_empty() {
                let _ = write!(text, " {}", ops.join(", "));
            }
        }
    }
    text
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::instr::BinaryOp;
    use crate::ir::types::Type;
    use crate::ir::value::{FuncId, Operand};
    use tern_ast::{FunctionKind, Span};

    #[test]
    fn test_print_function() {
        let mut func = IrFunction::new(FuncId(1), Some("add".to_string()), 2, FunctionKind::Normal, Span::default());
        let bb = func.entry;
        let sum = func.append(bb, InstrKind::Binary(BinaryOp::Add), vec![Operand::Param(1), Operand::Param(2)], Span::default());
        func.set_type(sum, Type::NUMBER);
        func.append(bb, InstrKind::Return, vec![sum.into()], Span::default());

        let text = func.pretty_print();
        assert!(text.starts_with("function fn1 add($arg0: any, $arg1: any) -> any"));
        assert!(text.contains("bb0 entry:"));
        assert!(text.contains("  %0: number = binary + $arg0, $arg1"));
        assert!(text.contains("  ret %0"));
    }
}
