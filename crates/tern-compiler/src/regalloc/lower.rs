//! Preparation of SSA for allocation
//!
//! Literal and parameter operands become instructions of their own so that
//! every operand is a value with a live range, and edges from a branching
//! block into a block with phis get a block of their own to hold the phi
//! moves.

use crate::ir::{InstrId, InstrKind, IrFunction, Literal, Operand};

/// Is operand `index` of `kind` a property name kept as an immediate?
pub fn is_property_key(kind: &InstrKind, index: usize, op: &Operand) -> bool {
    index == 1
        && matches!(
            kind,
            InstrKind::LoadProperty | InstrKind::StoreProperty | InstrKind::DeleteProperty
        )
        && matches!(op, Operand::Literal(Literal::String(_)))
}

/// Split critical edges, then materialize literals and parameters
pub fn prepare(func: &mut IrFunction) {
    split_critical_edges(func);
    materialize_operands(func);
}

fn split_critical_edges(func: &mut IrFunction) {
    for block in func.block_ids() {
        let mut succs = func.successors(block);
        succs.sort();
        succs.dedup();
        if succs.len() < 2 {
            continue;
        }
        let span = func
            .terminator(block)
            .map(|t| func.instr(t).span)
            .unwrap_or_default();
        for succ in succs {
            let phis = func.phis(succ);
            if phis.is_empty() {
                continue;
            }
            let edge = func.create_block("edge");
            func.block_mut(edge).handler = func.block(succ).handler;
            func.retarget(block, succ, edge);
            func.append(edge, InstrKind::Branch(succ), vec![], span);
            for phi in phis {
                func.replace_phi_block(phi, block, edge);
            }
        }
    }
}

fn materialize_operands(func: &mut IrFunction) {
    for id in func.instr_ids() {
        let operands = func.instr(id).operands().to_vec();
        for (index, op) in operands.iter().enumerate() {
            let kind = match op {
                Operand::Literal(lit) if !is_property_key(&func.instr(id).kind, index, op) => {
                    InstrKind::LoadConst(lit.clone())
                }
                Operand::Param(p) => InstrKind::LoadParam(*p),
                _ => continue,
            };
            let ty = match (&kind, op) {
                (InstrKind::LoadConst(lit), _) => lit.ty(),
                (_, param) => func.operand_type(param),
            };
            let value = place(func, id, index, kind);
            func.set_type(value, ty);
            func.set_operand(id, index, value.into());
        }
    }
}

/// Insert `kind` where operand `index` of `user` is evaluated
fn place(func: &mut IrFunction, user: InstrId, index: usize, kind: InstrKind) -> InstrId {
    let instr = func.instr(user);
    let span = instr.span;
    let pred = instr
        .phi_blocks()
        .and_then(|blocks| blocks.get(index).copied());
    match pred {
        Some(pred) => func.insert_before_terminator(pred, kind, vec![], span),
        None => func.insert_before(user, kind, vec![]),
    }
}
