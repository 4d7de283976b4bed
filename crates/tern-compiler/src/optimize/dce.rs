//! Dead code and dead store elimination

use super::{for_each_function, Condition, OptPass, PassContext, NO_UNREACHABLE_BLOCKS};
use crate::analysis::Cfg;
use crate::ir::{BlockId, InstrId, InstrKind, IrFunction, IrModule, Operand, VarId};
use rustc_hash::{FxHashMap, FxHashSet};
use tracing::trace;

/// Removes unreachable blocks, unused pure instructions and useless stores
pub struct DeadCodeElimination;

impl OptPass for DeadCodeElimination {
    fn name(&self) -> &'static str {
        "dce"
    }

    fn postconditions(&self) -> &'static [Condition] {
        &[NO_UNREACHABLE_BLOCKS]
    }

    fn run(&self, module: &mut IrModule, ctx: &PassContext<'_>) -> bool {
        let loaded = loaded_variables(module);
        for_each_function(&mut module.functions, ctx.parallel(), |func| {
            let mut changed = remove_unreachable_blocks(func);
            changed |= remove_dead_stores(func, &loaded);
            changed |= remove_dead_instructions(func);
            changed
        })
    }
}

/// Environment variables some instruction in the module reads
fn loaded_variables(module: &IrModule) -> FxHashSet<VarId> {
    module
        .functions
        .iter()
        .flat_map(|func| {
            func.instr_ids().into_iter().filter_map(|id| match func.instr(id).kind {
                InstrKind::LoadFrame(var) => Some(var),
                _ => None,
            })
        })
        .collect()
}

/// Delete blocks the entry cannot reach and prune their phi entries.
/// Returns whether anything was removed.
pub fn remove_unreachable_blocks(func: &mut IrFunction) -> bool {
    let cfg = Cfg::new(func);
    let dead: Vec<BlockId> = func
        .blocks()
        .map(|b| b.id)
        .filter(|b| !cfg.is_reachable(*b))
        .collect();
    if dead.is_empty() {
        return false;
    }
    for &block in &dead {
        for succ in func.successors(block) {
            if !cfg.is_reachable(succ) {
                continue;
            }
            for phi in func.phis(succ) {
                func.remove_phi_entry(phi, block);
            }
        }
    }
    for &block in &dead {
        func.remove_block(block);
    }
    trace!(function = func.display_name(), removed = dead.len(), "removed unreachable blocks");
    true
}

/// A storage location a store writes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
enum Location {
    Stack(InstrId),
    Frame(VarId),
}

fn store_location(func: &IrFunction, id: InstrId) -> Option<Location> {
    let instr = func.instr(id);
    match instr.kind {
        InstrKind::StoreStack => instr.operand(0)?.as_instr().map(Location::Stack),
        InstrKind::StoreFrame(var) => Some(Location::Frame(var)),
        _ => None,
    }
}

fn remove_dead_stores(func: &mut IrFunction, loaded: &FxHashSet<VarId>) -> bool {
    let mut dead: FxHashSet<InstrId> = FxHashSet::default();

    for id in func.instr_ids() {
        let instr = func.instr(id);
        match instr.kind {
            // Never read anywhere in the module
            InstrKind::StoreFrame(var) if !loaded.contains(&var) => {
                dead.insert(id);
            }
            // A slot nobody loads: drop its stores, the slot follows below
            InstrKind::AllocStack(_) => {
                let users = instr.users();
                let has_load = users
                    .iter()
                    .any(|u| matches!(func.instr(*u).kind, InstrKind::LoadStack));
                let stores_only = users.iter().all(|u| {
                    matches!(func.instr(*u).kind, InstrKind::StoreStack)
                        && func.instr(*u).operand(0) == Some(&Operand::Instr(id))
                });
                if !has_load && stores_only {
                    dead.extend(users.iter().copied());
                }
            }
            _ => {}
        }
    }

    // Stores overwritten later in the same block
    for block in func.block_ids() {
        let guarded = func.block(block).is_guarded();
        let mut pending: FxHashMap<Location, (InstrId, Option<Operand>)> = FxHashMap::default();
        for &id in func.block(block).instrs() {
            let instr = func.instr(id);
            if let Some(location) = store_location(func, id) {
                let env = match location {
                    Location::Frame(_) => instr.operand(0).cloned(),
                    Location::Stack(_) => None,
                };
                if let Some((previous, previous_env)) = pending.get(&location) {
                    // A different environment value may be a different instance
                    if *previous_env == env {
                        dead.insert(*previous);
                    }
                }
                pending.insert(location, (id, env));
                continue;
            }
            match instr.kind {
                InstrKind::LoadStack => {
                    if let Some(slot) = instr.operand(0).and_then(Operand::as_instr) {
                        pending.remove(&Location::Stack(slot));
                    }
                }
                InstrKind::LoadFrame(var) => {
                    pending.remove(&Location::Frame(var));
                }
                _ => {
                    let runs_code = func.may_execute_code(id);
                    let throws = func.may_throw(id);
                    if runs_code || throws {
                        // Callers and closures can observe environments
                        pending.retain(|location, _| matches!(location, Location::Stack(_)));
                    }
                    if throws && guarded {
                        // The handler may read any slot
                        pending.clear();
                    }
                }
            }
        }
    }

    if dead.is_empty() {
        return false;
    }
    let mut dead: Vec<InstrId> = dead.into_iter().collect();
    dead.sort();
    for id in &dead {
        func.erase(*id);
    }
    trace!(function = func.display_name(), removed = dead.len(), "removed dead stores");
    true
}

/// Mark everything reachable from side-effecting roots through operands;
/// erase the rest
fn remove_dead_instructions(func: &mut IrFunction) -> bool {
    let ids = func.instr_ids();
    let mut live: FxHashSet<InstrId> = FxHashSet::default();
    let mut worklist: Vec<InstrId> = ids
        .iter()
        .copied()
        .filter(|id| func.has_side_effects(*id))
        .collect();
    while let Some(id) = worklist.pop() {
        if !live.insert(id) {
            continue;
        }
        for op in func.instr(id).operands() {
            if let Operand::Instr(def) = op {
                if !live.contains(def) {
                    worklist.push(*def);
                }
            }
        }
    }

    let dead: Vec<InstrId> = ids.into_iter().filter(|id| !live.contains(id)).collect();
    if dead.is_empty() {
        return false;
    }
    // Drop uses first so dead cycles do not keep each other registered
    for &id in &dead {
        func.set_operands(id, Vec::new());
    }
    for &id in &dead {
        func.erase(id);
    }
    trace!(function = func.display_name(), removed = dead.len(), "removed dead instructions");
    true
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::CompilerOptions;
    use crate::ir::{BinaryOp, FuncId, FunctionBuilder, Literal};
    use tern_ast::{FunctionKind, Span};

    fn run(func: IrFunction) -> (IrModule, bool) {
        let mut module = IrModule::new("test");
        module.functions.push(func);
        crate::infer::infer_module(&mut module);
        let options = CompilerOptions::default();
        let changed = DeadCodeElimination.run(&mut module, &PassContext { options: &options });
        (module, changed)
    }

    fn new_func() -> IrFunction {
        IrFunction::new(FuncId(0), None, 1, FunctionKind::Normal, Span::default())
    }

    #[test]
    fn test_unused_pure_values_are_removed() {
        let mut func = new_func();
        {
            let mut b = FunctionBuilder::new(&mut func);
            let a = b.binary(BinaryOp::Add, Operand::number(1.0), Operand::number(2.0));
            b.binary(BinaryOp::Mul, a, Operand::number(3.0));
            b.ret(Operand::undefined());
        }
        let (module, changed) = run(func);
        assert!(changed);
        assert_eq!(module.function(FuncId(0)).instr_count(), 1);
    }

    #[test]
    fn test_calls_are_kept() {
        let mut func = new_func();
        {
            let mut b = FunctionBuilder::new(&mut func);
            b.call(Operand::Param(1), Operand::undefined(), vec![]);
            b.ret(Operand::undefined());
        }
        let (module, changed) = run(func);
        assert!(!changed);
        assert_eq!(module.function(FuncId(0)).instr_count(), 2);
    }

    #[test]
    fn test_never_loaded_slot_is_removed() {
        let mut func = new_func();
        {
            let mut b = FunctionBuilder::new(&mut func);
            let slot = b.alloc_stack("x");
            b.store_stack(slot, Operand::number(1.0));
            b.ret(Operand::undefined());
        }
        let (module, _) = run(func);
        assert_eq!(module.function(FuncId(0)).instr_count(), 1);
    }

    #[test]
    fn test_overwritten_store_is_removed_unless_guarded_throw_intervenes() {
        let mut func = new_func();
        let first = {
            let mut b = FunctionBuilder::new(&mut func);
            let slot = b.alloc_stack("x");
            b.store_stack(slot, Operand::number(1.0));
            let first = b.func().block(b.current_block()).instrs().last().copied().unwrap();
            b.store_stack(slot, Operand::number(2.0));
            let v = b.load_stack(slot);
            b.ret(v);
            first
        };
        let (module, changed) = run(func);
        assert!(changed);
        assert!(!module.function(FuncId(0)).instr(first).is_alive());
    }

    #[test]
    fn test_store_before_call_in_guarded_block_is_kept() {
        let mut func = new_func();
        let first = {
            let mut b = FunctionBuilder::new(&mut func);
            let slot = b.alloc_stack("x");
            let catch = b.create_block("catch");
            b.set_handler(Some(catch));
            let body = b.create_block("body");
            b.terminate(InstrKind::TryStart { body, catch }, vec![]);

            b.switch_to_block(body);
            b.store_stack(slot, Operand::number(1.0));
            let first = b.func().block(body).instrs().last().copied().unwrap();
            b.call(Operand::Param(1), Operand::undefined(), vec![]);
            b.store_stack(slot, Operand::number(2.0));
            b.ret(Operand::undefined());

            b.set_handler(None);
            b.switch_to_block(catch);
            b.emit(InstrKind::CatchValue, vec![]);
            let v = b.load_stack(slot);
            b.ret(v);
            first
        };
        let (module, _) = run(func);
        assert!(module.function(FuncId(0)).instr(first).is_alive());
    }

    #[test]
    fn test_unreachable_blocks_prune_phis() {
        let mut func = new_func();
        let (join, phi) = {
            let mut b = FunctionBuilder::new(&mut func);
            let join = b.create_block("join");
            let orphan = b.create_block("orphan");
            let entry = b.current_block();
            b.branch(join);
            b.switch_to_block(orphan);
            b.branch(join);
            b.switch_to_block(join);
            let phi = b.phi(
                join,
                vec![
                    (entry, Operand::number(1.0)),
                    (orphan, Operand::Literal(Literal::Null)),
                ],
            );
            b.ret(phi.into());
            (join, phi)
        };
        let (module, changed) = run(func);
        assert!(changed);
        let func = module.function(FuncId(0));
        assert_eq!(func.block_count(), 2);
        assert_eq!(func.instr(phi).operands().len(), 1);
        assert_eq!(func.phis(join).len(), 1);
    }
}
