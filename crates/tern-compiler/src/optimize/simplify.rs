//! Constant folding and simplification
//!
//! Instruction rewrites are local: each one replaces an instruction by an
//! existing operand or a literal. Branch folding rewrites terminators and
//! then drops whatever became unreachable.

use super::dce::remove_unreachable_blocks;
use super::{for_each_function, Condition, OptPass, PassContext, NO_TRIVIAL_PHIS, TYPES_INFERRED};
use crate::infer::TypeInference;
use crate::ir::js;
use crate::ir::{
    env_scope, BinaryOp, BlockId, InstrId, InstrKind, IrFunction, IrModule, Literal, Operand, Type,
    UnaryOp,
};
use parking_lot::Mutex;
use tracing::trace;

pub struct Simplify;

impl OptPass for Simplify {
    fn name(&self) -> &'static str {
        "simplify"
    }

    fn preconditions(&self) -> &'static [Condition] {
        &[TYPES_INFERRED]
    }

    fn postconditions(&self) -> &'static [Condition] {
        &[NO_TRIVIAL_PHIS]
    }

    fn run(&self, module: &mut IrModule, ctx: &PassContext<'_>) -> bool {
        let touched = Mutex::new(Vec::new());
        let changed = for_each_function(&mut module.functions, ctx.parallel(), |func| {
            let mut local = Vec::new();
            let changed = simplify_function(func, &mut local);
            if changed {
                touched.lock().push((func.id, local));
            }
            changed
        });
        // Refine types locally so later passes of this round see them
        let mut inference = TypeInference::new();
        for (func, ids) in touched.into_inner() {
            inference.rerun(module, func, &ids);
        }
        changed
    }
}

/// Simplify one function to a local fixed point. Users of rewritten values
/// are collected in `touched`.
pub fn simplify_function(func: &mut IrFunction, touched: &mut Vec<InstrId>) -> bool {
    let mut changed = false;
    loop {
        let mut progress = false;
        for id in func.instr_ids() {
            if !func.instr(id).is_alive() {
                continue;
            }
            if let Some(replacement) = simplify_instr(func, id) {
                trace!(
                    function = func.display_name(),
                    instr = %id,
                    kind = func.instr(id).kind.name(),
                    replacement = %replacement,
                    "simplified"
                );
                touched.extend(func.instr(id).users().iter().copied());
                func.replace_all_uses(id, replacement);
                func.erase(id);
                progress = true;
            }
        }
        for block in func.block_ids() {
            if func.get_block(block).is_some_and(|b| b.is_alive()) {
                progress |= fold_terminator(func, block);
            }
        }
        progress |= remove_unreachable_blocks(func);
        if !progress {
            break;
        }
        changed = true;
    }
    touched.retain(|id| func.instr(*id).is_alive());
    changed
}

/// The single value a phi merges, ignoring self-references
pub fn trivial_phi_value(func: &IrFunction, id: InstrId) -> Option<Operand> {
    let instr = func.instr(id);
    if !instr.kind.is_phi() {
        return None;
    }
    let this = Operand::Instr(id);
    let mut value: Option<&Operand> = None;
    for op in instr.operands() {
        if *op == this {
            continue;
        }
        match value {
            None => value = Some(op),
            Some(v) if v == op => {}
            Some(_) => return None,
        }
    }
    value.cloned()
}

fn literal(func: &IrFunction, op: Option<&Operand>) -> Option<Literal> {
    match op? {
        Operand::Literal(lit) => Some(lit.clone()),
        Operand::Instr(id) => match &func.instr(*id).kind {
            InstrKind::LoadConst(lit) => Some(lit.clone()),
            _ => None,
        },
        Operand::Param(_) => None,
    }
}

fn is_number(func: &IrFunction, op: &Operand, value: f64) -> bool {
    matches!(literal(func, Some(op)), Some(Literal::Number(n)) if n == value && n.is_sign_positive())
}

/// Defined by an operator whose result is an int32 Number
fn is_int32(func: &IrFunction, op: &Operand) -> bool {
    let Some(id) = op.as_instr() else {
        return matches!(op, Operand::Literal(Literal::Number(n)) if *n == js::to_int32(*n) as f64 && !(*n == 0.0 && n.is_sign_negative()));
    };
    let instr = func.instr(id);
    instr.ty.is_only(Type::NUMBER)
        && matches!(&instr.kind, InstrKind::Binary(op) if op.is_int32_producer())
}

fn simplify_instr(func: &IrFunction, id: InstrId) -> Option<Operand> {
    let instr = func.instr(id);
    let operand = |i: usize| instr.operand(i);
    let ty = |i: usize| operand(i).map_or(Type::ANY, |op| func.operand_type(op));

    match &instr.kind {
        InstrKind::Mov => operand(0).cloned(),
        InstrKind::Phi(_) => trivial_phi_value(func, id),
        InstrKind::ThrowIfEmpty => {
            let value = operand(0)?;
            let empty = match literal(func, Some(value)) {
                Some(lit) => matches!(lit, Literal::Empty),
                None => ty(0).is_empty() || ty(0).may_be(Type::EMPTY),
            };
            (!empty).then(|| value.clone())
        }
        InstrKind::ResolveScope(target) => {
            let start = operand(0)?;
            (env_scope(func, start) == Some(*target)).then(|| start.clone())
        }
        InstrKind::Binary(op) => {
            let (lhs, rhs) = (operand(0)?, operand(1)?);
            if let (Some(a), Some(b)) = (literal(func, Some(lhs)), literal(func, Some(rhs))) {
                if let Some(result) = js::eval_binary(*op, &a, &b) {
                    return Some(Operand::Literal(result));
                }
            }
            simplify_binary(func, *op, lhs, rhs, ty(0), ty(1))
        }
        InstrKind::Unary(op) => {
            let value = operand(0)?;
            if let Some(lit) = literal(func, Some(value)) {
                if let Some(result) = js::eval_unary(*op, &lit) {
                    return Some(Operand::Literal(result));
                }
            }
            match op {
                UnaryOp::TypeOf => ty(0)
                    .typeof_name()
                    .map(|name| Operand::Literal(Literal::String(name.to_string()))),
                // !!b on a boolean
                UnaryOp::Not => {
                    let inner = func.instr(value.as_instr()?);
                    match inner.kind {
                        InstrKind::Unary(UnaryOp::Not) => {
                            let original = inner.operand(0)?;
                            func.operand_type(original)
                                .is_only(Type::BOOLEAN)
                                .then(|| original.clone())
                        }
                        _ => None,
                    }
                }
                UnaryOp::ToNumeric if ty(0).is_only(Type::NUMBER) => Some(value.clone()),
                _ => None,
            }
        }
        _ => None,
    }
}

fn simplify_binary(
    func: &IrFunction,
    op: BinaryOp,
    lhs: &Operand,
    rhs: &Operand,
    lhs_ty: Type,
    rhs_ty: Type,
) -> Option<Operand> {
    let number = Type::NUMBER;
    match op {
        BinaryOp::Mul if lhs_ty.is_only(number) && is_number(func, rhs, 1.0) => Some(lhs.clone()),
        BinaryOp::Mul if rhs_ty.is_only(number) && is_number(func, lhs, 1.0) => Some(rhs.clone()),
        BinaryOp::Sub if lhs_ty.is_only(number) && is_number(func, rhs, 0.0) => Some(lhs.clone()),
        BinaryOp::BitOr if is_int32(func, lhs) && is_number(func, rhs, 0.0) => Some(lhs.clone()),
        BinaryOp::BitOr if is_int32(func, rhs) && is_number(func, lhs, 0.0) => Some(rhs.clone()),
        BinaryOp::StrictEq | BinaryOp::StrictNotEq => {
            let disjoint = !lhs_ty.is_empty() && !rhs_ty.is_empty() && !lhs_ty.may_be(rhs_ty);
            disjoint.then(|| Operand::Literal(Literal::Bool(op == BinaryOp::StrictNotEq)))
        }
        _ => None,
    }
}

/// Fold a conditional terminator whose outcome is known
fn fold_terminator(func: &mut IrFunction, block: BlockId) -> bool {
    let Some(term) = func.terminator(block) else {
        return false;
    };
    let instr = func.instr(term);
    let taken = match &instr.kind {
        InstrKind::CondBranch {
            then_block,
            else_block,
        } => {
            let cond = instr.operand(0);
            let known = match literal(func, cond) {
                Some(lit) => Some(js::to_boolean(&lit)),
                None => cond.and_then(|c| func.operand_type(c).known_truthiness()),
            };
            match known {
                Some(true) => *then_block,
                Some(false) => *else_block,
                None if then_block == else_block => *then_block,
                None => return false,
            }
        }
        InstrKind::Switch { cases, default } => {
            let Some(value) = literal(func, instr.operand(0)) else {
                return false;
            };
            cases
                .iter()
                .find(|(case, _)| js::strict_equals(case, &value))
                .map_or(*default, |(_, target)| *target)
        }
        _ => return false,
    };

    for succ in func.successors(block) {
        if succ != taken {
            for phi in func.phis(succ) {
                func.remove_phi_entry(phi, block);
            }
        }
    }
    func.set_terminator(block, InstrKind::Branch(taken), vec![]);
    trace!(function = func.display_name(), block = %block, target = %taken, "folded branch");
    true
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::CompilerOptions;
    use crate::ir::{FuncId, FunctionBuilder};
    use tern_ast::{FunctionKind, Span};

    fn optimize(func: IrFunction) -> IrModule {
        let mut module = IrModule::new("test");
        module.functions.push(func);
        crate::infer::infer_module(&mut module);
        let options = CompilerOptions::default();
        Simplify.run(&mut module, &PassContext { options: &options });
        module
    }

    fn new_func(params: u32) -> IrFunction {
        IrFunction::new(FuncId(0), None, params, FunctionKind::Normal, Span::default())
    }

    fn returned(module: &IrModule) -> Operand {
        let func = module.function(FuncId(0));
        let ret = func
            .instr_ids()
            .into_iter()
            .find(|id| matches!(func.instr(*id).kind, InstrKind::Return))
            .unwrap();
        func.instr(ret).operand(0).cloned().unwrap()
    }

    #[test]
    fn test_folds_arithmetic_chain() {
        let mut func = new_func(0);
        {
            let mut b = FunctionBuilder::new(&mut func);
            let sum = b.binary(BinaryOp::Add, Operand::number(2.0), Operand::number(3.0));
            let product = b.binary(BinaryOp::Mul, sum, Operand::number(4.0));
            b.ret(product);
        }
        let module = optimize(func);
        assert_eq!(returned(&module), Operand::number(20.0));
    }

    #[test]
    fn test_string_concatenation_folds() {
        let mut func = new_func(0);
        {
            let mut b = FunctionBuilder::new(&mut func);
            let s = b.binary(BinaryOp::Add, Operand::string("a"), Operand::number(1.0));
            b.ret(s);
        }
        assert_eq!(returned(&optimize(func)), Operand::string("a1"));
    }

    #[test]
    fn test_mixed_bigint_number_is_not_folded() {
        let mut func = new_func(0);
        {
            let mut b = FunctionBuilder::new(&mut func);
            let big = Operand::Literal(Literal::BigInt(1.into()));
            let s = b.binary(BinaryOp::Add, big, Operand::number(1.0));
            b.ret(s);
        }
        assert!(returned(&optimize(func)).as_instr().is_some());
    }

    #[test]
    fn test_or_zero_on_int32_is_removed() {
        let mut func = new_func(2);
        let and = {
            let mut b = FunctionBuilder::new(&mut func);
            let x = b.unary(UnaryOp::Plus, Operand::Param(1));
            let y = b.unary(UnaryOp::Plus, Operand::Param(2));
            let and = b.binary(BinaryOp::BitAnd, x, y);
            let or = b.binary(BinaryOp::BitOr, and.clone(), Operand::number(0.0));
            b.ret(or);
            and
        };
        assert_eq!(returned(&optimize(func)), and);
    }

    #[test]
    fn test_typeof_known_type_and_disjoint_equality() {
        let mut func = new_func(1);
        {
            let mut b = FunctionBuilder::new(&mut func);
            let n = b.unary(UnaryOp::Plus, Operand::Param(1));
            let t = b.unary(UnaryOp::TypeOf, n.clone());
            let eq = b.binary(BinaryOp::StrictEq, n, t);
            b.ret(eq);
        }
        assert_eq!(returned(&optimize(func)), Operand::Literal(Literal::Bool(false)));
    }

    #[test]
    fn test_constant_branch_is_folded() {
        let mut func = new_func(0);
        {
            let mut b = FunctionBuilder::new(&mut func);
            let then_block = b.create_block("then");
            let else_block = b.create_block("else");
            let cond = b.binary(BinaryOp::Lt, Operand::number(1.0), Operand::number(2.0));
            b.cond_branch(cond, then_block, else_block);
            b.switch_to_block(then_block);
            b.ret(Operand::number(1.0));
            b.switch_to_block(else_block);
            b.ret(Operand::number(2.0));
        }
        let module = optimize(func);
        assert_eq!(module.function(FuncId(0)).block_count(), 2);
        assert_eq!(returned(&module), Operand::number(1.0));
    }

    #[test]
    fn test_throw_if_empty_removed_for_initialized_value() {
        let mut func = new_func(1);
        {
            let mut b = FunctionBuilder::new(&mut func);
            let checked = b.emit(InstrKind::ThrowIfEmpty, vec![Operand::Param(1)]);
            b.ret(checked.into());
        }
        assert_eq!(returned(&optimize(func)), Operand::Param(1));
    }

    #[test]
    fn test_throw_if_empty_kept_for_empty_literal() {
        let mut func = new_func(0);
        {
            let mut b = FunctionBuilder::new(&mut func);
            let checked = b.emit(InstrKind::ThrowIfEmpty, vec![Operand::Literal(Literal::Empty)]);
            b.ret(checked.into());
        }
        assert!(returned(&optimize(func)).as_instr().is_some());
    }
}
