//! Liveness and live intervals
//!
//! Blocks are laid out in reverse post-order and every instruction gets an
//! even program point. The odd point after a block's last instruction is
//! where phi moves for its successor happen.

use crate::analysis::Cfg;
use crate::ir::{BlockId, InstrId, InstrKind, IrFunction, Operand};
use rustc_hash::{FxHashMap, FxHashSet};

/// Does `id` define a value that needs a location?
pub fn is_value(func: &IrFunction, id: InstrId) -> bool {
    let kind = &func.instr(id).kind;
    kind.has_result() && !matches!(kind, InstrKind::AllocStack(_))
}

fn value_operand(func: &IrFunction, op: &Operand) -> Option<InstrId> {
    op.as_instr().filter(|id| is_value(func, *id))
}

/// Program points of a linearized function
#[derive(Debug, Clone)]
pub struct Numbering {
    pub order: Vec<BlockId>,
    positions: FxHashMap<InstrId, u32>,
    ranges: FxHashMap<BlockId, (u32, u32)>,
    /// Points of instructions that clobber caller-saved registers
    pub calls: Vec<u32>,
}

impl Numbering {
    pub fn new(func: &IrFunction, cfg: &Cfg) -> Self {
        let order = cfg.rpo().to_vec();
        let mut positions = FxHashMap::default();
        let mut ranges = FxHashMap::default();
        let mut calls = Vec::new();
        let mut pos = 0u32;
        for &block in &order {
            let start = pos;
            for &id in func.block(block).instrs() {
                positions.insert(id, pos);
                if func.instr(id).kind.is_call() {
                    calls.push(pos);
                }
                pos += 2;
            }
            ranges.insert(block, (start, pos.saturating_sub(1).max(start)));
        }
        Numbering {
            order,
            positions,
            ranges,
            calls,
        }
    }

    pub fn position(&self, id: InstrId) -> Option<u32> {
        self.positions.get(&id).copied()
    }

    /// First and last point of a block
    pub fn range(&self, block: BlockId) -> Option<(u32, u32)> {
        self.ranges.get(&block).copied()
    }
}

/// Per-block live sets
#[derive(Debug, Clone)]
pub struct Liveness {
    live_in: Vec<FxHashSet<InstrId>>,
    live_out: Vec<FxHashSet<InstrId>>,
}

impl Liveness {
    /// Backward dataflow to a fixed point. A guarded block's live-out set
    /// includes everything live into its handler.
    pub fn compute(func: &IrFunction, cfg: &Cfg) -> Self {
        let n = func.block_capacity();
        let mut upward: Vec<FxHashSet<InstrId>> = vec![FxHashSet::default(); n];
        let mut defs: Vec<FxHashSet<InstrId>> = vec![FxHashSet::default(); n];
        let mut phi_uses: Vec<FxHashSet<InstrId>> = vec![FxHashSet::default(); n];

        for &block in cfg.rpo() {
            let b = block.index();
            for &id in func.block(block).instrs() {
                let instr = func.instr(id);
                if let Some(blocks) = instr.phi_blocks() {
                    for (pred, op) in blocks.iter().zip(instr.operands()) {
                        if let Some(v) = value_operand(func, op) {
                            phi_uses[pred.index()].insert(v);
                        }
                    }
                } else {
                    for op in instr.operands() {
                        if let Some(v) = value_operand(func, op) {
                            if !defs[b].contains(&v) {
                                upward[b].insert(v);
                            }
                        }
                    }
                }
                if is_value(func, id) {
                    defs[b].insert(id);
                }
            }
        }

        let mut live_in: Vec<FxHashSet<InstrId>> = vec![FxHashSet::default(); n];
        let mut live_out: Vec<FxHashSet<InstrId>> = vec![FxHashSet::default(); n];
        let mut changed = true;
        while changed {
            changed = false;
            for &block in cfg.rpo().iter().rev() {
                let b = block.index();
                let mut out = phi_uses[b].clone();
                let targets = cfg.succs(block).iter().copied().chain(cfg.handler(block));
                for succ in targets {
                    let phis = func.phis(succ);
                    out.extend(live_in[succ.index()].iter().filter(|v| !phis.contains(*v)));
                }
                let mut inn = upward[b].clone();
                inn.extend(out.iter().filter(|v| !defs[b].contains(*v)));
                if out.len() != live_out[b].len() || inn.len() != live_in[b].len() {
                    changed = true;
                }
                live_out[b] = out;
                live_in[b] = inn;
            }
        }
        Liveness { live_in, live_out }
    }

    pub fn live_in(&self, block: BlockId) -> &FxHashSet<InstrId> {
        &self.live_in[block.index()]
    }

    pub fn live_out(&self, block: BlockId) -> &FxHashSet<InstrId> {
        &self.live_out[block.index()]
    }
}

/// Conservative live range of one value
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Interval {
    pub value: InstrId,
    pub start: u32,
    pub end: u32,
    /// Sorted program points reading the value
    pub uses: Vec<u32>,
    /// Live across an instruction that clobbers caller-saved registers
    pub crosses_call: bool,
    /// Live into a loop header along a back edge
    pub loop_carried: bool,
}

impl Interval {
    fn new(value: InstrId, pos: u32) -> Self {
        Interval {
            value,
            start: pos,
            end: pos,
            uses: Vec::new(),
            crosses_call: false,
            loop_carried: false,
        }
    }

    fn extend(&mut self, pos: u32) {
        self.start = self.start.min(pos);
        self.end = self.end.max(pos);
    }

    pub fn overlaps(&self, other: &Interval) -> bool {
        self.start <= other.end && other.start <= self.end
    }

    pub fn next_use_after(&self, pos: u32) -> Option<u32> {
        self.uses.iter().copied().find(|u| *u >= pos)
    }
}

/// One interval per value, sorted by start point
pub fn build_intervals(func: &IrFunction, cfg: &Cfg, numbering: &Numbering, liveness: &Liveness) -> Vec<Interval> {
    let mut intervals: FxHashMap<InstrId, Interval> = FxHashMap::default();
    let mut touch = |v: InstrId, pos: u32| {
        intervals
            .entry(v)
            .and_modify(|i| i.extend(pos))
            .or_insert_with(|| Interval::new(v, pos));
    };
    let mut uses: FxHashMap<InstrId, Vec<u32>> = FxHashMap::default();

    for &block in &numbering.order {
        let Some((start, end)) = numbering.range(block) else {
            continue;
        };
        for &v in liveness.live_in(block) {
            touch(v, start);
        }
        for &v in liveness.live_out(block) {
            touch(v, end);
        }
        for &id in func.block(block).instrs() {
            let Some(pos) = numbering.position(id) else {
                continue;
            };
            if is_value(func, id) {
                touch(id, pos);
            }
            let instr = func.instr(id);
            match instr.phi_blocks() {
                Some(blocks) => {
                    // Phi moves write the result at the end of each predecessor
                    for (pred, op) in blocks.iter().zip(instr.operands()) {
                        let Some((_, pred_end)) = numbering.range(*pred) else {
                            continue;
                        };
                        touch(id, pred_end);
                        if let Some(v) = value_operand(func, op) {
                            touch(v, pred_end);
                            uses.entry(v).or_default().push(pred_end);
                        }
                    }
                }
                None => {
                    for op in instr.operands() {
                        if let Some(v) = value_operand(func, op) {
                            touch(v, pos);
                            uses.entry(v).or_default().push(pos);
                        }
                    }
                }
            }
        }
    }

    let carried: FxHashSet<InstrId> = cfg
        .back_edges()
        .iter()
        .flat_map(|(_, header)| liveness.live_in(*header).iter().copied())
        .collect();

    let mut result: Vec<Interval> = intervals
        .into_values()
        .map(|mut interval| {
            let mut points = uses.remove(&interval.value).unwrap_or_default();
            points.sort_unstable();
            interval.uses = points;
            interval.crosses_call = numbering
                .calls
                .iter()
                .any(|c| interval.start < *c && *c < interval.end);
            interval.loop_carried = carried.contains(&interval.value);
            interval
        })
        .collect();
    result.sort_by_key(|i| (i.start, i.value));
    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::{BinaryOp, FuncId, FunctionBuilder};
    use tern_ast::{FunctionKind, Span};

    fn analyze(func: &IrFunction) -> (Cfg, Numbering, Liveness) {
        let cfg = Cfg::new(func);
        let numbering = Numbering::new(func, &cfg);
        let liveness = Liveness::compute(func, &cfg);
        (cfg, numbering, liveness)
    }

    #[test]
    fn test_value_live_across_blocks() {
        let mut func = IrFunction::new(FuncId(0), None, 0, FunctionKind::Normal, Span::default());
        let (a, next) = {
            let mut b = FunctionBuilder::new(&mut func);
            let a = b.emit(InstrKind::LoadConst(crate::ir::Literal::Number(1.0)), vec![]);
            let next = b.create_block("next");
            b.branch(next);
            b.switch_to_block(next);
            b.ret(a.into());
            (a, next)
        };
        let (cfg, numbering, liveness) = analyze(&func);
        assert!(liveness.live_out(func.entry).contains(&a));
        assert!(liveness.live_in(next).contains(&a));
        let intervals = build_intervals(&func, &cfg, &numbering, &liveness);
        assert_eq!(intervals.len(), 1);
        assert_eq!(intervals[0].start, 0);
        assert_eq!(intervals[0].uses, vec![numbering.position(func.terminator(next).unwrap()).unwrap()]);
    }

    #[test]
    fn test_value_used_after_call_crosses_it() {
        let mut func = IrFunction::new(FuncId(0), None, 0, FunctionKind::Normal, Span::default());
        let (x, f) = {
            let mut b = FunctionBuilder::new(&mut func);
            let x = b.emit(InstrKind::LoadParam(0), vec![]);
            let f = b.emit(InstrKind::LoadGlobal("f".into()), vec![]);
            let r = b.call(f.into(), x.into(), vec![]);
            let sum = b.binary(BinaryOp::Add, x.into(), r);
            b.ret(sum);
            (x, f)
        };
        let (cfg, numbering, liveness) = analyze(&func);
        let intervals = build_intervals(&func, &cfg, &numbering, &liveness);
        let get = |v| intervals.iter().find(|i| i.value == v).unwrap();
        assert!(get(x).crosses_call);
        assert!(!get(f).crosses_call);
    }

    #[test]
    fn test_loop_carried_value() {
        let mut func = IrFunction::new(FuncId(0), None, 0, FunctionKind::Normal, Span::default());
        let s = Span::default();
        let entry = func.entry;
        let header = func.create_block("header");
        let exit = func.create_block("exit");
        let v = func.append(entry, InstrKind::LoadParam(1), vec![], s);
        func.append(entry, InstrKind::Branch(header), vec![], s);
        func.append(
            header,
            InstrKind::CondBranch {
                then_block: header,
                else_block: exit,
            },
            vec![v.into()],
            s,
        );
        func.append(exit, InstrKind::Return, vec![v.into()], s);
        let (cfg, numbering, liveness) = analyze(&func);
        let intervals = build_intervals(&func, &cfg, &numbering, &liveness);
        assert!(intervals[0].loop_carried);
    }
}
