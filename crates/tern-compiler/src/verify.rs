//! IR verifier
//!
//! Structural checks run after construction and after every pass that
//! reports a change (when verification is enabled). A failure is a
//! compiler bug and aborts the module.

use crate::analysis::DomTree;
use crate::error::{CompileError, CompileResult};
use crate::ir::{env_scope, InstrId, InstrKind, IrFunction, IrModule, Operand, Type};
use rustc_hash::FxHashMap;

/// Verify every function; the error names the offending function and `pass`
pub fn verify_module(module: &IrModule, pass: &str) -> CompileResult<()> {
    for func in &module.functions {
        verify_function(module, func)
            .map_err(|message| CompileError::internal(func.display_name(), pass, message))?;
    }
    Ok(())
}

/// Verify one function
pub fn verify_function(module: &IrModule, func: &IrFunction) -> Result<(), String> {
    check_structure(func)?;
    check_users(func)?;
    let (cfg, dom) = DomTree::compute(func);
    check_phis(func, &cfg)?;
    check_dominance(func, &dom)?;
    check_environments(module, func)?;
    if module.types_inferred {
        check_types(func)?;
    }
    Ok(())
}

fn check_structure(func: &IrFunction) -> Result<(), String> {
    if func.get_block(func.entry).is_none() {
        return Err(format!("entry block {} does not exist", func.entry));
    }
    for block in func.blocks() {
        let instrs = block.instrs();
        let Some(&last) = instrs.last() else {
            return Err(format!("block {} is empty", block.id));
        };
        if !func.instr(last).kind.is_terminator() {
            return Err(format!("block {} is not terminated", block.id));
        }
        let mut seen_non_phi = false;
        for (i, &id) in instrs.iter().enumerate() {
            let instr = func.instr(id);
            if !instr.is_alive() {
                return Err(format!("block {} lists erased instruction {}", block.id, id));
            }
            if instr.block() != block.id {
                return Err(format!("{} is in {} but records {}", id, block.id, instr.block()));
            }
            if instr.kind.is_terminator() && i + 1 != instrs.len() {
                return Err(format!("terminator {} in the middle of {}", id, block.id));
            }
            if instr.kind.is_phi() {
                if seen_non_phi {
                    return Err(format!("phi {} after a non-phi in {}", id, block.id));
                }
            } else {
                seen_non_phi = true;
            }
            if matches!(instr.kind, InstrKind::CatchValue) && i != 0 {
                return Err(format!("catch {} is not first in {}", id, block.id));
            }
            for op in instr.operands() {
                match op {
                    Operand::Instr(def) => {
                        let def_instr = func.instr(*def);
                        if !def_instr.is_alive() {
                            return Err(format!("{} uses erased {}", id, def));
                        }
                        if !def_instr.kind.has_result() {
                            return Err(format!("{} uses {} which has no result", id, def));
                        }
                    }
                    Operand::Param(p) if *p > func.param_count => {
                        return Err(format!("{} uses parameter {} of {}", id, p, func.param_count));
                    }
                    _ => {}
                }
            }
        }
        for succ in func.successors(block.id) {
            if func.get_block(succ).is_none() {
                return Err(format!("{} branches to removed block {}", block.id, succ));
            }
        }
        if let Some(handler) = block.handler {
            if func.get_block(handler).is_none() {
                return Err(format!("{} is guarded by removed block {}", block.id, handler));
            }
        }
    }
    Ok(())
}

fn check_users(func: &IrFunction) -> Result<(), String> {
    let mut expected: FxHashMap<(InstrId, InstrId), usize> = FxHashMap::default();
    for id in func.instr_ids() {
        for op in func.instr(id).operands() {
            if let Operand::Instr(def) = op {
                *expected.entry((*def, id)).or_default() += 1;
            }
        }
    }
    let mut actual: FxHashMap<(InstrId, InstrId), usize> = FxHashMap::default();
    for def in func.instr_ids() {
        for user in func.instr(def).users() {
            *actual.entry((def, *user)).or_default() += 1;
        }
    }
    if expected != actual {
        for (key, count) in &expected {
            if actual.get(key) != Some(count) {
                return Err(format!("user list of {} is out of date for {}", key.0, key.1));
            }
        }
        return Err("user lists record uses that no longer exist".to_string());
    }
    Ok(())
}

fn check_phis(func: &IrFunction, cfg: &crate::analysis::Cfg) -> Result<(), String> {
    for block in func.blocks() {
        let mut preds: Vec<_> = cfg.preds(block.id).to_vec();
        preds.sort();
        preds.dedup();
        for phi in func.phis(block.id) {
            let instr = func.instr(phi);
            let mut blocks: Vec<_> = instr.phi_blocks().unwrap_or(&[]).to_vec();
            if blocks.len() != instr.operands().len() {
                return Err(format!("phi {} has mismatched operand and block lists", phi));
            }
            blocks.sort();
            if blocks != preds {
                return Err(format!(
                    "phi {} in {} does not list exactly its predecessors",
                    phi, block.id
                ));
            }
        }
    }
    Ok(())
}

fn check_dominance(func: &IrFunction, dom: &DomTree) -> Result<(), String> {
    for block in func.blocks() {
        if !dom.is_reachable(block.id) {
            continue;
        }
        for (index, &id) in block.instrs().iter().enumerate() {
            let instr = func.instr(id);
            if let Some(blocks) = instr.phi_blocks() {
                for (pred, op) in blocks.iter().zip(instr.operands()) {
                    if let Operand::Instr(def) = op {
                        let def_block = func.instr(*def).block();
                        if dom.is_reachable(*pred) && !dom.dominates(def_block, *pred) {
                            return Err(format!(
                                "phi {} operand {} does not dominate the edge from {}",
                                id, def, pred
                            ));
                        }
                    }
                }
                continue;
            }
            for op in instr.operands() {
                let Operand::Instr(def) = op else { continue };
                let def_block = func.instr(*def).block();
                let ok = if def_block == block.id {
                    func.position(*def).is_some_and(|p| p < index)
                } else {
                    dom.dominates(def_block, block.id)
                };
                if !ok {
                    return Err(format!("{} is used by {} before it is defined", def, id));
                }
            }
        }
    }
    Ok(())
}

fn check_environments(module: &IrModule, func: &IrFunction) -> Result<(), String> {
    for id in func.instr_ids() {
        let instr = func.instr(id);
        match &instr.kind {
            InstrKind::LoadFrame(var) | InstrKind::StoreFrame(var) => {
                let Some(variable) = module.variables.get(var.index()) else {
                    return Err(format!("{} names unknown {}", id, var));
                };
                if !variable.is_alive() {
                    return Err(format!("{} accesses removed {}", id, var));
                }
                let env = instr.operand(0).and_then(|op| env_scope(func, op));
                if env != Some(variable.scope) {
                    return Err(format!(
                        "{} accesses {} of {} through an environment of {:?}",
                        id, var, variable.scope, env
                    ));
                }
            }
            InstrKind::ResolveScope(target) => {
                let start = instr.operand(0).and_then(|op| env_scope(func, op));
                let reachable = start.is_some_and(|s| module.scope_hops(s, *target).is_some());
                if !reachable {
                    return Err(format!("{} cannot reach {} from {:?}", id, target, start));
                }
            }
            InstrKind::CreateScope(scope) => {
                let desc = module.scope(*scope);
                if !desc.is_alive() {
                    return Err(format!("{} creates removed {}", id, scope));
                }
                let parent = instr.operand(0).and_then(|op| env_scope(func, op));
                if parent != desc.parent {
                    return Err(format!(
                        "{} creates {} under {:?}, layout expects {:?}",
                        id, scope, parent, desc.parent
                    ));
                }
            }
            InstrKind::CreateClosure(target) => {
                let Some(callee) = module.get_function(*target) else {
                    return Err(format!("{} creates unknown {}", id, target));
                };
                let env = instr.operand(0).and_then(|op| env_scope(func, op));
                if env != callee.parent_scope {
                    return Err(format!(
                        "{} captures {:?} but {} expects {:?}",
                        id, env, target, callee.parent_scope
                    ));
                }
            }
            InstrKind::GetParentScope if func.parent_scope.is_none() => {
                return Err(format!("{} reads a parent environment {} does not have", id, func.id));
            }
            _ => {}
        }
    }
    Ok(())
}

fn check_types(func: &IrFunction) -> Result<(), String> {
    for id in func.instr_ids() {
        let instr = func.instr(id);
        match &instr.kind {
            InstrKind::Phi(_) | InstrKind::Mov => {
                for op in instr.operands() {
                    let ty = func.operand_type(op);
                    if !instr.ty.contains(ty) {
                        return Err(format!(
                            "{} has type {} but operand {} is {}",
                            id, instr.ty, op, ty
                        ));
                    }
                }
            }
            InstrKind::LoadConst(lit) if instr.ty != lit.ty() => {
                return Err(format!("{} loads {} but has type {}", id, lit, instr.ty));
            }
            InstrKind::CreateScope(_) | InstrKind::GetParentScope | InstrKind::ResolveScope(_)
                if instr.ty != Type::ENVIRONMENT =>
            {
                return Err(format!("environment {} has type {}", id, instr.ty));
            }
            _ => {}
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::{BinaryOp, FuncId, FunctionBuilder, Literal};
    use tern_ast::{FunctionKind, Span};

    fn module_with(func: IrFunction) -> IrModule {
        let mut module = IrModule::new("test");
        module.functions.push(func);
        module
    }

    fn new_func() -> IrFunction {
        IrFunction::new(FuncId(0), Some("f".into()), 1, FunctionKind::Normal, Span::default())
    }

    #[test]
    fn test_valid_function_passes() {
        let mut func = new_func();
        let mut b = FunctionBuilder::new(&mut func);
        let sum = b.binary(BinaryOp::Add, Operand::Param(1), Operand::number(1.0));
        b.ret(sum);
        let module = module_with(func);
        assert_eq!(verify_function(&module, &module.functions[0]), Ok(()));
    }

    #[test]
    fn test_detects_missing_terminator() {
        let mut func = new_func();
        let mut b = FunctionBuilder::new(&mut func);
        b.binary(BinaryOp::Add, Operand::Param(1), Operand::number(1.0));
        let module = module_with(func);
        let err = verify_function(&module, &module.functions[0]).unwrap_err();
        assert!(err.contains("not terminated"));
    }

    #[test]
    fn test_detects_use_before_def() {
        let mut func = new_func();
        let entry = func.entry;
        let s = Span::default();
        let a = func.append(entry, InstrKind::Binary(BinaryOp::Add), vec![Operand::Param(1), Operand::number(1.0)], s);
        let b = func.append(entry, InstrKind::Unary(crate::ir::UnaryOp::Neg), vec![Operand::Param(1)], s);
        func.append(entry, InstrKind::Return, vec![a.into()], s);
        // make %0 use %1, which comes later
        func.set_operand(a, 0, b.into());
        let module = module_with(func);
        let err = verify_function(&module, &module.functions[0]).unwrap_err();
        assert!(err.contains("before it is defined"));
    }

    #[test]
    fn test_detects_non_dominating_operand() {
        let mut func = new_func();
        let s = Span::default();
        let entry = func.entry;
        let left = func.create_block("left");
        let right = func.create_block("right");
        let join = func.create_block("join");
        func.append(entry, InstrKind::CondBranch { then_block: left, else_block: right }, vec![Operand::Param(1)], s);
        let x = func.append(left, InstrKind::Unary(crate::ir::UnaryOp::Neg), vec![Operand::Param(1)], s);
        func.append(left, InstrKind::Branch(join), vec![], s);
        func.append(right, InstrKind::Branch(join), vec![], s);
        func.append(join, InstrKind::Return, vec![x.into()], s);
        let module = module_with(func);
        let err = verify_function(&module, &module.functions[0]).unwrap_err();
        assert!(err.contains("before it is defined"));
    }

    #[test]
    fn test_detects_phi_predecessor_mismatch() {
        let mut func = new_func();
        let s = Span::default();
        let entry = func.entry;
        let join = func.create_block("join");
        func.append(entry, InstrKind::Branch(join), vec![], s);
        let phi = func.append(join, InstrKind::Phi(vec![entry, join]), vec![Operand::number(1.0), Operand::number(2.0)], s);
        func.append(join, InstrKind::Return, vec![phi.into()], s);
        let module = module_with(func);
        let err = verify_function(&module, &module.functions[0]).unwrap_err();
        assert!(err.contains("predecessors"));
    }

    #[test]
    fn test_detects_wrong_environment() {
        let mut module = IrModule::new("test");
        let scope = module.add_scope(None, FuncId(0));
        let other = module.add_scope(None, FuncId(0));
        let var = module.add_variable(scope, "x", false);
        let mut func = new_func();
        func.scope = Some(other);
        let mut b = FunctionBuilder::new(&mut func);
        let env = b.create_scope(other, None);
        b.store_frame(var, env, Operand::Literal(Literal::Null));
        b.ret(Operand::undefined());
        module.functions.push(func);
        let err = verify_module(&module, "test-pass").unwrap_err();
        assert!(err.is_internal());
        assert!(err.to_string().contains("test-pass"));
    }
}
