//! Redundancy elimination
//!
//! Global value numbering scoped by the dominator tree, followed by
//! block-local forwarding of stack and environment loads.

use super::{for_each_function, Condition, OptPass, PassContext, TYPES_INFERRED};
use crate::analysis::DomTree;
use crate::ir::{BlockId, InstrId, InstrKind, IrFunction, IrModule, Operand, VarId};
use rustc_hash::FxHashMap;
use tracing::trace;

pub struct CommonSubexpressionElimination;

impl OptPass for CommonSubexpressionElimination {
    fn name(&self) -> &'static str {
        "cse"
    }

    fn preconditions(&self) -> &'static [Condition] {
        &[TYPES_INFERRED]
    }

    fn run(&self, module: &mut IrModule, ctx: &PassContext<'_>) -> bool {
        for_each_function(&mut module.functions, ctx.parallel(), |func| {
            let numbered = number_values(func);
            let forwarded = forward_loads(func);
            numbered | forwarded
        })
    }
}

type ValueKey = (InstrKind, Vec<Operand>);

fn value_key(func: &IrFunction, id: InstrId) -> Option<ValueKey> {
    let instr = func.instr(id);
    let eligible = matches!(instr.kind, InstrKind::ThrowIfEmpty)
        || instr.kind.is_value_numberable(&func.operand_types(id));
    eligible.then(|| (instr.kind.clone(), instr.operands().to_vec()))
}

enum Visit {
    Enter(BlockId),
    Exit(Vec<ValueKey>),
}

fn number_values(func: &mut IrFunction) -> bool {
    let (_, dom) = DomTree::compute(func);
    let mut table: FxHashMap<ValueKey, InstrId> = FxHashMap::default();
    let mut replaced = 0usize;
    let mut stack = vec![Visit::Enter(func.entry)];

    while let Some(visit) = stack.pop() {
        let block = match visit {
            Visit::Enter(block) => block,
            Visit::Exit(keys) => {
                for key in keys {
                    table.remove(&key);
                }
                continue;
            }
        };
        let mut added = Vec::new();
        for id in func.block(block).instrs().to_vec() {
            let Some(key) = value_key(func, id) else {
                continue;
            };
            match table.get(&key) {
                Some(&existing) => {
                    func.replace_all_uses(id, Operand::Instr(existing));
                    func.erase(id);
                    replaced += 1;
                }
                None => {
                    table.insert(key.clone(), id);
                    added.push(key);
                }
            }
        }
        stack.push(Visit::Exit(added));
        for &child in dom.children(block).iter().rev() {
            stack.push(Visit::Enter(child));
        }
    }

    if replaced > 0 {
        trace!(function = func.display_name(), replaced, "value numbering");
    }
    replaced > 0
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
enum Location {
    Stack(InstrId),
    Frame(VarId, Operand),
}

fn forward_loads(func: &mut IrFunction) -> bool {
    let mut forwarded = 0usize;
    for block in func.block_ids() {
        let mut known: FxHashMap<Location, Operand> = FxHashMap::default();
        for id in func.block(block).instrs().to_vec() {
            let instr = func.instr(id);
            let slot = || instr.operand(0).and_then(Operand::as_instr);
            match instr.kind {
                InstrKind::StoreStack => {
                    if let (Some(slot), Some(value)) = (slot(), instr.operand(1)) {
                        known.insert(Location::Stack(slot), value.clone());
                    }
                }
                InstrKind::StoreFrame(var) => {
                    // Another environment value may alias the same instance
                    known.retain(|loc, _| !matches!(loc, Location::Frame(v, _) if *v == var));
                    if let (Some(env), Some(value)) = (instr.operand(0), instr.operand(1)) {
                        known.insert(Location::Frame(var, env.clone()), value.clone());
                    }
                }
                InstrKind::LoadStack | InstrKind::LoadFrame(_) => {
                    let location = match instr.kind {
                        InstrKind::LoadFrame(var) => {
                            instr.operand(0).map(|env| Location::Frame(var, env.clone()))
                        }
                        _ => slot().map(Location::Stack),
                    };
                    let Some(location) = location else { continue };
                    match known.get(&location) {
                        Some(value) => {
                            let value = value.clone();
                            func.replace_all_uses(id, value);
                            func.erase(id);
                            forwarded += 1;
                        }
                        None => {
                            known.insert(location, Operand::Instr(id));
                        }
                    }
                }
                _ => {
                    if func.may_execute_code(id) {
                        known.retain(|loc, _| matches!(loc, Location::Stack(_)));
                    }
                }
            }
        }
    }
    if forwarded > 0 {
        trace!(function = func.display_name(), forwarded, "load forwarding");
    }
    forwarded > 0
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::CompilerOptions;
    use crate::ir::{BinaryOp, FuncId, FunctionBuilder, UnaryOp};
    use tern_ast::{FunctionKind, Span};

    fn optimize(func: IrFunction) -> (IrModule, bool) {
        let mut module = IrModule::new("test");
        module.functions.push(func);
        crate::infer::infer_module(&mut module);
        let options = CompilerOptions::default();
        let changed =
            CommonSubexpressionElimination.run(&mut module, &PassContext { options: &options });
        (module, changed)
    }

    fn new_func() -> IrFunction {
        IrFunction::new(FuncId(0), None, 2, FunctionKind::Normal, Span::default())
    }

    #[test]
    fn test_duplicate_pure_value_in_dominated_block() {
        let mut func = new_func();
        let (first, ret_block) = {
            let mut b = FunctionBuilder::new(&mut func);
            let x = b.unary(UnaryOp::Plus, Operand::Param(1));
            let first = b.binary(BinaryOp::Mul, x.clone(), x.clone());
            let next = b.create_block("next");
            b.branch(next);
            b.switch_to_block(next);
            let second = b.binary(BinaryOp::Mul, x.clone(), x);
            let sum = b.binary(BinaryOp::Add, first.clone(), second);
            b.ret(sum);
            (first, next)
        };
        let (module, changed) = optimize(func);
        assert!(changed);
        let func = module.function(FuncId(0));
        let add = func.block(ret_block).instrs()[0];
        assert_eq!(func.instr(add).operands(), &[first.clone(), first]);
    }

    #[test]
    fn test_sibling_blocks_do_not_share_values() {
        let mut func = new_func();
        {
            let mut b = FunctionBuilder::new(&mut func);
            let x = b.unary(UnaryOp::Plus, Operand::Param(1));
            let left = b.create_block("left");
            let right = b.create_block("right");
            b.cond_branch(Operand::Param(2), left, right);
            b.switch_to_block(left);
            let l = b.binary(BinaryOp::Mul, x.clone(), x.clone());
            b.ret(l);
            b.switch_to_block(right);
            let r = b.binary(BinaryOp::Mul, x.clone(), x);
            b.ret(r);
        }
        let (_, changed) = optimize(func);
        assert!(!changed);
    }

    #[test]
    fn test_calls_are_not_numbered() {
        let mut func = new_func();
        {
            let mut b = FunctionBuilder::new(&mut func);
            let a = b.call(Operand::Param(1), Operand::undefined(), vec![]);
            let c = b.call(Operand::Param(1), Operand::undefined(), vec![]);
            let sum = b.binary(BinaryOp::StrictEq, a, c);
            b.ret(sum);
        }
        let (_, changed) = optimize(func);
        assert!(!changed);
    }

    #[test]
    fn test_stack_load_forwarded_from_store() {
        let mut func = new_func();
        {
            let mut b = FunctionBuilder::new(&mut func);
            let slot = b.alloc_stack("x");
            b.store_stack(slot, Operand::Param(1));
            let v = b.load_stack(slot);
            b.ret(v);
        }
        let (module, changed) = optimize(func);
        assert!(changed);
        let func = module.function(FuncId(0));
        let ret = func.terminator(func.entry).unwrap();
        assert_eq!(func.instr(ret).operands(), &[Operand::Param(1)]);
    }
}
