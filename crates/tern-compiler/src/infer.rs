//! Type inference
//!
//! Optimistic fixed-point iteration: every result starts at bottom and only
//! grows. Within a function a worklist re-visits the users of any
//! instruction whose type changed. Facts that cross function boundaries
//! (environment variables, parameters of non-escaping closures, return
//! types) are recomputed between rounds until the whole module is stable.

use crate::ir::{BinaryOp, FuncId, InstrId, InstrKind, IrFunction, IrModule, Operand, Type, UnaryOp};
use rustc_hash::FxHashSet;
use std::collections::VecDeque;
use tracing::{debug, trace};

/// Module-wide facts consumed by the per-function solver
#[derive(Debug, Clone, PartialEq, Eq)]
struct Facts {
    /// Union of every `StoreFrame` to each variable
    frames: Vec<Type>,
    /// Parameter types (`this` first) per function
    params: Vec<Vec<Type>>,
    returns: Vec<Type>,
}

#[derive(Debug, Default)]
pub struct TypeInference {
    rounds: usize,
}

impl TypeInference {
    pub fn new() -> Self {
        Self::default()
    }

    /// Rounds the last run needed to reach a fixed point
    pub fn rounds(&self) -> usize {
        self.rounds
    }

    /// Infer every type in the module from scratch
    pub fn run(&mut self, module: &mut IrModule) {
        for func in &mut module.functions {
            for id in func.instr_ids() {
                func.set_type(id, Type::none());
            }
        }
        let mut facts = initial_facts(module);
        apply_facts(module, &facts);
        self.rounds = 0;
        loop {
            self.rounds += 1;
            for func in &mut module.functions {
                let seeds = func.instr_ids();
                solve(func, &facts, seeds);
            }
            let next = collect_facts(module, &facts);
            if next == facts {
                break;
            }
            facts = next;
            apply_facts(module, &facts);
        }
        module.types_inferred = true;
        debug!(rounds = self.rounds, "type inference reached fixed point");
    }

    /// Re-solve `changed` and everything that transitively uses it
    pub fn rerun(&mut self, module: &mut IrModule, func: FuncId, changed: &[InstrId]) {
        let facts = current_facts(module);
        let function = module.function_mut(func);

        let mut reset = FxHashSet::default();
        let mut stack: Vec<InstrId> = changed
            .iter()
            .copied()
            .filter(|id| function.instr(*id).is_alive())
            .collect();
        while let Some(id) = stack.pop() {
            if !reset.insert(id) {
                continue;
            }
            stack.extend(function.instr(id).users().iter().copied());
            // Loads observe stores through the slot, not through users
            if matches!(function.instr(id).kind, InstrKind::StoreStack) {
                stack.extend(slot_loads(function, id));
            }
        }
        for id in &reset {
            function.set_type(*id, Type::none());
        }
        let mut seeds: Vec<InstrId> = reset.into_iter().collect();
        seeds.sort();
        trace!(function = function.display_name(), count = seeds.len(), "re-inferring");
        solve(function, &facts, seeds);
    }
}

/// Convenience entry for a full inference run
pub fn infer_module(module: &mut IrModule) {
    TypeInference::new().run(module);
}

fn initial_facts(module: &IrModule) -> Facts {
    let escaping = escaping_functions(module);
    Facts {
        frames: vec![Type::none(); module.variables.len()],
        params: module
            .functions
            .iter()
            .map(|f| {
                let ty = if escaping.contains(&f.id) {
                    Type::ANY
                } else {
                    Type::none()
                };
                vec![ty; f.param_count as usize + 1]
            })
            .collect(),
        returns: vec![Type::none(); module.functions.len()],
    }
}

/// Facts as currently recorded on the module
fn current_facts(module: &IrModule) -> Facts {
    let mut facts = Facts {
        frames: vec![Type::none(); module.variables.len()],
        params: module.functions.iter().map(|f| f.param_types.clone()).collect(),
        returns: module.functions.iter().map(|f| f.return_type).collect(),
    };
    for func in &module.functions {
        record_frame_stores(func, &mut facts.frames);
    }
    facts
}

fn apply_facts(module: &mut IrModule, facts: &Facts) {
    for func in &mut module.functions {
        let index = func.id.index();
        func.param_types = facts.params[index].clone();
        func.return_type = facts.returns[index];
    }
}

fn record_frame_stores(func: &IrFunction, frames: &mut [Type]) {
    for id in func.instr_ids() {
        let instr = func.instr(id);
        if let InstrKind::StoreFrame(var) = instr.kind {
            if let (Some(slot), Some(value)) = (frames.get_mut(var.index()), instr.operand(1)) {
                *slot |= func.operand_type(value);
            }
        }
    }
}

fn collect_facts(module: &IrModule, previous: &Facts) -> Facts {
    let escaping = escaping_functions(module);
    let mut facts = Facts {
        frames: vec![Type::none(); module.variables.len()],
        params: previous.params.clone(),
        returns: vec![Type::none(); module.functions.len()],
    };

    for func in &module.functions {
        record_frame_stores(func, &mut facts.frames);
        for id in func.instr_ids() {
            let instr = func.instr(id);
            match &instr.kind {
                InstrKind::Return => {
                    if let Some(value) = instr.operand(0) {
                        facts.returns[func.id.index()] |= func.operand_type(value);
                    }
                }
                InstrKind::Call { .. } => {
                    let Some(callee) = direct_callee(func, instr.operand(0)) else {
                        continue;
                    };
                    if escaping.contains(&callee) {
                        continue;
                    }
                    let Some(params) = facts.params.get_mut(callee.index()) else {
                        continue;
                    };
                    for (index, slot) in params.iter_mut().enumerate() {
                        // operand 1 is `this`, formals follow
                        *slot |= instr
                            .operand(index + 1)
                            .map_or(Type::UNDEFINED, |op| func.operand_type(op));
                    }
                }
                _ => {}
            }
        }
    }
    facts
}

/// The function a `CreateClosure` operand builds
pub(crate) fn direct_callee(func: &IrFunction, callee: Option<&Operand>) -> Option<FuncId> {
    let id = callee?.as_instr()?;
    match func.instr(id).kind {
        InstrKind::CreateClosure(target) => Some(target),
        _ => None,
    }
}

/// Functions whose closures flow anywhere other than the callee position of
/// a direct call. Their parameters can hold anything.
pub(crate) fn escaping_functions(module: &IrModule) -> FxHashSet<FuncId> {
    let mut escaping = FxHashSet::default();
    escaping.insert(FuncId(0));
    for func in &module.functions {
        for id in func.instr_ids() {
            let InstrKind::CreateClosure(target) = func.instr(id).kind else {
                continue;
            };
            let closure = Operand::Instr(id);
            let direct_only = func.instr(id).users().iter().all(|user| {
                let user = func.instr(*user);
                matches!(user.kind, InstrKind::Call { .. })
                    && user.operand(0) == Some(&closure)
                    && !user.operands()[1..].contains(&closure)
            });
            if !direct_only {
                escaping.insert(target);
            }
        }
    }
    escaping
}

/// `LoadStack`s of the slot a store writes
fn slot_loads(func: &IrFunction, store: InstrId) -> Vec<InstrId> {
    let Some(slot) = func.instr(store).operand(0).and_then(Operand::as_instr) else {
        return Vec::new();
    };
    func.instr(slot)
        .users()
        .iter()
        .copied()
        .filter(|u| matches!(func.instr(*u).kind, InstrKind::LoadStack))
        .collect()
}

fn solve(func: &mut IrFunction, facts: &Facts, seeds: Vec<InstrId>) {
    let mut queued: FxHashSet<InstrId> = seeds.iter().copied().collect();
    let mut worklist: VecDeque<InstrId> = seeds.into();
    while let Some(id) = worklist.pop_front() {
        queued.remove(&id);
        if !func.instr(id).is_alive() {
            continue;
        }
        if matches!(func.instr(id).kind, InstrKind::StoreStack) {
            for load in slot_loads(func, id) {
                if queued.insert(load) {
                    worklist.push_back(load);
                }
            }
            continue;
        }
        let old = func.instr(id).ty;
        let new = old | transfer(func, id, facts);
        if new != old {
            func.set_type(id, new);
            for user in func.instr(id).users().to_vec() {
                if queued.insert(user) {
                    worklist.push_back(user);
                }
            }
        }
    }
}

fn numeric_result(lhs: Type, rhs: Type) -> Type {
    let mut ty = Type::none();
    if lhs.may_be_bigint_like() && rhs.may_be_bigint_like() {
        ty |= Type::BIGINT;
    }
    if !(lhs.is_only(Type::BIGINT) && rhs.is_only(Type::BIGINT)) {
        ty |= Type::NUMBER;
    }
    ty
}

fn numeric_of(value: Type) -> Type {
    let mut ty = Type::none();
    if value.may_be_bigint_like() {
        ty |= Type::BIGINT;
    }
    if !value.is_only(Type::BIGINT) {
        ty |= Type::NUMBER;
    }
    ty
}

pub(crate) fn binary_result(op: BinaryOp, lhs: Type, rhs: Type) -> Type {
    if lhs.is_empty() || rhs.is_empty() {
        return Type::none();
    }
    if op.is_comparison() {
        return Type::BOOLEAN;
    }
    match op {
        BinaryOp::Add => {
            if lhs.is_only(Type::STRING) || rhs.is_only(Type::STRING) {
                return Type::STRING;
            }
            let mut ty = numeric_result(lhs, rhs);
            if lhs.may_be_string_like() || rhs.may_be_string_like() {
                ty |= Type::STRING;
            }
            ty
        }
        BinaryOp::UShr => Type::NUMBER,
        _ => numeric_result(lhs, rhs),
    }
}

pub(crate) fn unary_result(op: UnaryOp, value: Type) -> Type {
    if value.is_empty() {
        return Type::none();
    }
    match op {
        UnaryOp::Not => Type::BOOLEAN,
        UnaryOp::TypeOf => Type::STRING,
        UnaryOp::Void => Type::UNDEFINED,
        UnaryOp::Plus => Type::NUMBER,
        UnaryOp::Neg | UnaryOp::BitNot | UnaryOp::Inc | UnaryOp::Dec | UnaryOp::ToNumeric => {
            numeric_of(value)
        }
    }
}

fn transfer(func: &IrFunction, id: InstrId, facts: &Facts) -> Type {
    let instr = func.instr(id);
    let operand = |index: usize| {
        instr
            .operand(index)
            .map_or(Type::none(), |op| func.operand_type(op))
    };
    match &instr.kind {
        InstrKind::Mov => operand(0),
        InstrKind::Phi(_) => instr
            .operands()
            .iter()
            .fold(Type::none(), |acc, op| acc | func.operand_type(op)),
        InstrKind::Binary(op) => binary_result(*op, operand(0), operand(1)),
        InstrKind::Unary(op) => unary_result(*op, operand(0)),
        InstrKind::ThrowIfEmpty => operand(0) - Type::EMPTY,
        InstrKind::CatchValue => Type::ANY,
        InstrKind::LoadStack => {
            let stores = instr
                .operand(0)
                .and_then(Operand::as_instr)
                .map(|slot| func.instr(slot).users().to_vec())
                .unwrap_or_default();
            stores
                .into_iter()
                .map(|u| func.instr(u))
                .filter(|u| matches!(u.kind, InstrKind::StoreStack))
                .fold(Type::UNDEFINED, |acc, store| {
                    acc | store.operand(1).map_or(Type::none(), |v| func.operand_type(v))
                })
        }
        InstrKind::CreateScope(_) | InstrKind::GetParentScope | InstrKind::ResolveScope(_) => {
            Type::ENVIRONMENT
        }
        InstrKind::LoadFrame(var) => {
            Type::UNDEFINED | facts.frames.get(var.index()).copied().unwrap_or(Type::ANY)
        }
        InstrKind::CreateClosure(_) => Type::CLOSURE,
        InstrKind::LoadGlobal(_) | InstrKind::TryLoadGlobal(_) | InstrKind::LoadProperty => Type::ANY,
        InstrKind::DeleteProperty => Type::BOOLEAN,
        InstrKind::AllocObject | InstrKind::AllocArray => Type::OBJECT,
        InstrKind::Call { .. } => match direct_callee(func, instr.operand(0)) {
            Some(callee) => facts.returns.get(callee.index()).copied().unwrap_or(Type::ANY),
            None => Type::ANY,
        },
        InstrKind::Construct => Type::OBJECT | Type::CLOSURE,
        InstrKind::LoadConst(literal) => literal.ty(),
        InstrKind::LoadParam(index) => func.operand_type(&Operand::Param(*index)),
        _ => Type::none(),
    }
}
