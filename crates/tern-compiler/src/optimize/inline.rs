//! Inlining of direct closure calls
//!
//! A call whose callee operand is a `CreateClosure` of a small function
//! without exception regions is replaced by a copy of the callee's blocks.
//! The copied calls remember every function inlined on the way to them, so
//! recursion through inlining stops at the first repeated function.

use super::dce::remove_unreachable_blocks;
use super::{OptPass, PassContext};
use crate::analysis::Cfg;
use crate::infer::direct_callee;
use crate::ir::{BlockId, FuncId, InstrId, InstrKind, IrFunction, IrModule, Literal, Operand};
use rustc_hash::FxHashMap;
use tern_ast::FunctionKind;
use tracing::{debug, trace};

pub struct Inliner;

impl OptPass for Inliner {
    fn name(&self) -> &'static str {
        "inline"
    }

    fn run(&self, module: &mut IrModule, ctx: &PassContext<'_>) -> bool {
        let options = ctx.options;
        let mut inlined = 0usize;
        for index in 0..module.functions.len() {
            let caller = FuncId(index as u32);
            while let Some(site) = find_site(module, caller, options.inline_size_budget, options.max_inline_depth) {
                let callee = module.function(site.callee).clone();
                inline_call(module.function_mut(caller), &site, &callee);
                inlined += 1;
            }
        }
        if inlined > 0 {
            debug!(inlined, "inlined call sites");
        }
        inlined > 0
    }
}

/// A call chosen for inlining
struct CallSite {
    call: InstrId,
    callee: FuncId,
    chain: Vec<FuncId>,
}

fn find_site(module: &IrModule, caller: FuncId, budget: usize, max_depth: usize) -> Option<CallSite> {
    let func = module.function(caller);
    func.instr_ids().into_iter().find_map(|id| {
        let instr = func.instr(id);
        let InstrKind::Call { chain } = &instr.kind else {
            return None;
        };
        let callee = direct_callee(func, instr.operand(0))?;
        let target = module.get_function(callee)?;
        let eligible = callee != caller
            && !chain.contains(&callee)
            && chain.len() < max_depth
            && matches!(target.kind, FunctionKind::Normal | FunctionKind::Arrow)
            && target.instr_count() <= budget
            && !target.has_try()
            && Cfg::new(target).preds(target.entry).is_empty()
            && inner_chains_fit(target, caller, chain, max_depth);
        eligible.then(|| CallSite {
            call: id,
            callee,
            chain: chain.clone(),
        })
    })
}

/// Calls copied out of `target` extend their chains with `chain + [target]`;
/// the result must stay within depth and free of repeats
fn inner_chains_fit(target: &IrFunction, caller: FuncId, chain: &[FuncId], max_depth: usize) -> bool {
    target.instr_ids().into_iter().all(|id| match &target.instr(id).kind {
        InstrKind::Call { chain: inner } => {
            chain.len() + 1 + inner.len() <= max_depth
                && !inner.iter().any(|f| *f == target.id || *f == caller || chain.contains(f))
        }
        _ => true,
    })
}

/// Replace `site.call` in `func` with a copy of `callee`
fn inline_call(func: &mut IrFunction, site: &CallSite, callee: &IrFunction) {
    let call = func.instr(site.call);
    let block = call.block();
    let span = call.span;
    let operands = call.operands().to_vec();
    let env = operands
        .first()
        .and_then(Operand::as_instr)
        .and_then(|closure| func.instr(closure).operand(0).cloned())
        .unwrap_or_else(Operand::undefined);
    let this = operands.get(1).cloned().unwrap_or_else(Operand::undefined);
    let args = operands.get(2..).unwrap_or(&[]);
    let map_param = |index: u32| match index {
        0 => this.clone(),
        i => args
            .get(i as usize - 1)
            .cloned()
            .unwrap_or(Operand::Literal(Literal::Undefined)),
    };

    // Everything after the call moves to the continuation
    let handler = func.block(block).handler;
    let cont = func.create_block("inline.cont");
    func.block_mut(cont).handler = handler;
    let position = func.position(site.call).map_or(0, |p| p + 1);
    func.split_tail(block, position, cont);

    let cfg = Cfg::new(callee);
    let mut blocks: FxHashMap<BlockId, BlockId> = FxHashMap::default();
    for &old in cfg.rpo() {
        let label = callee.block(old).label.as_deref().unwrap_or("inline");
        let new = func.create_block(label);
        func.block_mut(new).handler = handler;
        blocks.insert(old, new);
    }

    let mut chain = site.chain.clone();
    chain.push(site.callee);
    let mut values: FxHashMap<InstrId, Operand> = FxHashMap::default();
    let mut phis: Vec<(InstrId, InstrId)> = Vec::new();
    let mut returns: Vec<(BlockId, Operand)> = Vec::new();

    for &old_block in cfg.rpo() {
        let new_block = blocks[&old_block];
        for &id in callee.block(old_block).instrs() {
            let instr = callee.instr(id);
            let map = |op: &Operand| match op {
                Operand::Instr(def) => values.get(def).cloned().unwrap_or_else(Operand::undefined),
                Operand::Param(i) => map_param(*i),
                Operand::Literal(_) => op.clone(),
            };
            match &instr.kind {
                InstrKind::GetParentScope => {
                    values.insert(id, env.clone());
                }
                InstrKind::Return => {
                    let value = instr.operand(0).map(map).unwrap_or_else(Operand::undefined);
                    func.append(new_block, InstrKind::Branch(cont), vec![], instr.span);
                    returns.push((new_block, value));
                }
                InstrKind::Phi(_) => {
                    let phi = func.append(new_block, InstrKind::Phi(Vec::new()), vec![], instr.span);
                    values.insert(id, phi.into());
                    phis.push((id, phi));
                }
                InstrKind::AllocStack(name) => {
                    let entry = func.entry;
                    let index = func
                        .block(entry)
                        .instrs()
                        .iter()
                        .take_while(|i| matches!(func.instr(**i).kind, InstrKind::AllocStack(_)))
                        .count();
                    let slot = func.insert(entry, index, InstrKind::AllocStack(name.clone()), vec![], instr.span);
                    values.insert(id, slot.into());
                }
                kind => {
                    let mut kind = match kind {
                        InstrKind::Call { chain: inner } => InstrKind::Call {
                            chain: chain.iter().chain(inner).copied().collect(),
                        },
                        other => other.clone(),
                    };
                    kind.map_targets(|b| blocks.get(&b).copied().unwrap_or(b));
                    let operands = instr.operands().iter().map(map).collect();
                    let new = func.append(new_block, kind, operands, instr.span);
                    values.insert(id, new.into());
                }
            }
        }
    }

    // Phi entries can name values defined later in the copy
    for (old, new) in phis {
        let instr = callee.instr(old);
        let incoming = instr.phi_blocks().unwrap_or(&[]).iter().zip(instr.operands());
        for (pred, value) in incoming {
            let Some(&pred) = blocks.get(pred) else {
                continue;
            };
            let value = match value {
                Operand::Instr(def) => values.get(def).cloned().unwrap_or_else(Operand::undefined),
                Operand::Param(i) => map_param(*i),
                Operand::Literal(_) => value.clone(),
            };
            func.add_phi_entry(new, pred, value);
        }
    }

    let result = match returns.as_slice() {
        [] => Operand::undefined(),
        [(_, value)] => value.clone(),
        _ => {
            let phi = func.insert(cont, 0, InstrKind::Phi(Vec::new()), vec![], span);
            for (pred, value) in &returns {
                func.add_phi_entry(phi, *pred, value.clone());
            }
            phi.into()
        }
    };
    func.replace_all_uses(site.call, result);
    func.erase(site.call);
    func.append(block, InstrKind::Branch(blocks[&callee.entry]), vec![], span);
    remove_unreachable_blocks(func);

    trace!(
        caller = func.display_name(),
        callee = callee.display_name(),
        depth = chain.len(),
        "inlined call"
    );
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::CompilerOptions;
    use crate::ir::{BinaryOp, FunctionBuilder};
    use crate::verify::verify_module;
    use tern_ast::Span;

    fn calls(func: &IrFunction) -> Vec<Vec<FuncId>> {
        func.instr_ids()
            .into_iter()
            .filter_map(|id| match &func.instr(id).kind {
                InstrKind::Call { chain } => Some(chain.clone()),
                _ => None,
            })
            .collect()
    }

    fn add_function() -> IrFunction {
        let mut add = IrFunction::new(FuncId(1), Some("add".into()), 2, FunctionKind::Normal, Span::default());
        let mut b = FunctionBuilder::new(&mut add);
        let sum = b.binary(BinaryOp::Add, Operand::Param(1), Operand::Param(2));
        b.ret(sum);
        add
    }

    #[test]
    fn test_inlines_direct_call() {
        let mut module = IrModule::new("test");
        let mut main = IrFunction::new(FuncId(0), None, 0, FunctionKind::Normal, Span::default());
        {
            let mut b = FunctionBuilder::new(&mut main);
            let add = b.create_closure(FuncId(1), None);
            let result = b.call(add, Operand::undefined(), vec![Operand::number(2.0)]);
            b.ret(result);
        }
        module.functions.push(main);
        module.functions.push(add_function());

        let options = CompilerOptions::default();
        assert!(Inliner.run(&mut module, &PassContext { options: &options }));
        let main = module.function(FuncId(0));
        assert!(calls(main).is_empty());
        let add = main
            .instr_ids()
            .into_iter()
            .find(|id| matches!(main.instr(*id).kind, InstrKind::Binary(BinaryOp::Add)))
            .unwrap();
        // The missing second argument becomes undefined
        assert_eq!(
            main.instr(add).operands(),
            &[Operand::number(2.0), Operand::undefined()]
        );
        verify_module(&module, "inline").unwrap();
    }

    #[test]
    fn test_multiple_returns_merge_through_phi() {
        let mut module = IrModule::new("test");
        let mut main = IrFunction::new(FuncId(0), None, 0, FunctionKind::Normal, Span::default());
        {
            let mut b = FunctionBuilder::new(&mut main);
            let pick = b.create_closure(FuncId(1), None);
            let result = b.call(pick, Operand::undefined(), vec![Operand::Literal(Literal::Bool(true))]);
            b.ret(result);
        }
        let mut pick = IrFunction::new(FuncId(1), Some("pick".into()), 1, FunctionKind::Normal, Span::default());
        {
            let mut b = FunctionBuilder::new(&mut pick);
            let yes = b.create_block("yes");
            let no = b.create_block("no");
            b.cond_branch(Operand::Param(1), yes, no);
            b.switch_to_block(yes);
            b.ret(Operand::number(1.0));
            b.switch_to_block(no);
            b.ret(Operand::number(2.0));
        }
        module.functions.push(main);
        module.functions.push(pick);

        let options = CompilerOptions::default();
        Inliner.run(&mut module, &PassContext { options: &options });
        let main = module.function(FuncId(0));
        let phis: Vec<InstrId> = main
            .instr_ids()
            .into_iter()
            .filter(|id| main.instr(*id).kind.is_phi())
            .collect();
        assert_eq!(phis.len(), 1);
        assert_eq!(main.instr(phis[0]).operands().len(), 2);
        verify_module(&module, "inline").unwrap();
    }

    #[test]
    fn test_self_recursion_is_not_inlined_into_itself() {
        let mut module = IrModule::new("test");
        let mut main = IrFunction::new(FuncId(0), None, 0, FunctionKind::Normal, Span::default());
        {
            let mut b = FunctionBuilder::new(&mut main);
            let f = b.create_closure(FuncId(1), None);
            let result = b.call(f, Operand::undefined(), vec![]);
            b.ret(result);
        }
        let mut rec = IrFunction::new(FuncId(1), Some("rec".into()), 0, FunctionKind::Normal, Span::default());
        {
            let mut b = FunctionBuilder::new(&mut rec);
            let f = b.create_closure(FuncId(1), None);
            let result = b.call(f, Operand::undefined(), vec![]);
            b.ret(result);
        }
        module.functions.push(main);
        module.functions.push(rec);

        let options = CompilerOptions::default();
        let ctx = PassContext { options: &options };
        assert!(Inliner.run(&mut module, &ctx));
        assert!(!Inliner.run(&mut module, &ctx));
        assert_eq!(calls(module.function(FuncId(0))), vec![vec![FuncId(1)]]);
        assert_eq!(calls(module.function(FuncId(1))), vec![Vec::<FuncId>::new()]);
    }

    #[test]
    fn test_budget_blocks_large_callee() {
        let mut module = IrModule::new("test");
        let mut main = IrFunction::new(FuncId(0), None, 0, FunctionKind::Normal, Span::default());
        {
            let mut b = FunctionBuilder::new(&mut main);
            let add = b.create_closure(FuncId(1), None);
            let result = b.call(add, Operand::undefined(), vec![]);
            b.ret(result);
        }
        module.functions.push(main);
        module.functions.push(add_function());

        let options = CompilerOptions {
            inline_size_budget: 1,
            ..Default::default()
        };
        assert!(!Inliner.run(&mut module, &PassContext { options: &options }));
    }
}
