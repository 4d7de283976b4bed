//! Register allocation
//!
//! Lowers optimized SSA to LIR over a bounded register file:
//!
//! 1. literals and parameters are materialized, critical edges split
//! 2. blocks are laid out in reverse post-order and numbered
//! 3. liveness is solved and one conservative interval built per value
//! 4. linear scan assigns registers, spilling under pressure
//! 5. phis become parallel moves at the end of each predecessor
//!
//! The top [`SCRATCH_REGISTERS`] registers are never allocated. They carry
//! reloads of spilled operands, spilled results and the temporaries of
//! move sequences.

pub mod linear_scan;
pub mod lir;
pub mod liveness;
pub mod lower;
pub mod moves;

pub use linear_scan::LinearScan;
pub use lir::{LirBlock, LirFunction, LirInstr, LirOp, LirOperand, Loc};
pub use liveness::{Interval, Liveness, Numbering};

use crate::analysis::Cfg;
use crate::config::CompilerOptions;
use crate::error::{CompileError, CompileResult};
use crate::ir::{env_scope, BlockId, InstrId, InstrKind, IrFunction, IrModule, Literal, Operand};
use liveness::{build_intervals, is_value};
use lower::{is_property_key, prepare};
use moves::{push_move, sequentialize};
use rustc_hash::{FxHashMap, FxHashSet};
use tracing::debug;

/// Registers reserved at the top of the register file
pub const SCRATCH_REGISTERS: u16 = 3;

/// Where every value of a function lives
#[derive(Debug, Clone)]
pub struct Allocation {
    pub locations: FxHashMap<InstrId, Loc>,
    /// Stack slot of every `AllocStack`
    pub slots: FxHashMap<InstrId, u32>,
    pub intervals: Vec<Interval>,
    pub allocatable: u16,
    pub caller_saved: u16,
    pub stack_slots: u32,
}

impl Allocation {
    pub fn location(&self, value: InstrId) -> Option<Loc> {
        self.locations.get(&value).copied()
    }

    pub fn spill_count(&self) -> usize {
        self.locations.values().filter(|loc| loc.is_stack()).count()
    }

    /// Check that every value has exactly one location, that no two values
    /// live at the same time share a register and that values live across
    /// a call stay out of the caller-saved registers.
    pub fn verify(&self) -> Result<(), String> {
        let mut seen = FxHashSet::default();
        for interval in &self.intervals {
            if !seen.insert(interval.value) {
                return Err(format!("value {} has more than one interval", interval.value));
            }
            let Some(loc) = self.location(interval.value) else {
                return Err(format!("value {} has no location", interval.value));
            };
            if let Loc::Reg(reg) = loc {
                if reg >= self.allocatable {
                    return Err(format!("value {} was given scratch register {}", interval.value, loc));
                }
                if interval.crosses_call && reg < self.caller_saved {
                    return Err(format!(
                        "value {} lives across a call in caller-saved register {}",
                        interval.value, loc
                    ));
                }
            }
        }
        if self.locations.len() != self.intervals.len() {
            return Err("locations assigned to values without a live range".to_string());
        }

        let mut slots: FxHashSet<u32> = self.slots.values().copied().collect();
        let mut by_start: Vec<&Interval> = self.intervals.iter().collect();
        by_start.sort_by_key(|i| (i.start, i.value));
        let mut busy: FxHashMap<u16, (u32, InstrId)> = FxHashMap::default();
        for interval in by_start {
            match self.location(interval.value) {
                Some(Loc::Reg(reg)) => {
                    if let Some(&(end, other)) = busy.get(&reg) {
                        if interval.start <= end {
                            return Err(format!(
                                "values {} and {} share r{} while both are live",
                                other, interval.value, reg
                            ));
                        }
                    }
                    let end = busy.get(&reg).map_or(interval.end, |(end, _)| (*end).max(interval.end));
                    busy.insert(reg, (end, interval.value));
                }
                Some(Loc::Stack(slot)) => {
                    if !slots.insert(slot) {
                        return Err(format!("stack slot {} is shared by value {}", slot, interval.value));
                    }
                }
                None => {}
            }
        }
        Ok(())
    }
}

/// Allocate registers for one function of `module`
pub fn allocate(module: &IrModule, func: &IrFunction, options: &CompilerOptions) -> CompileResult<(LirFunction, Allocation)> {
    let mut func = func.clone();
    prepare(&mut func);

    let cfg = Cfg::new(&func);
    let numbering = Numbering::new(&func, &cfg);
    let liveness = Liveness::compute(&func, &cfg);
    let intervals = build_intervals(&func, &cfg, &numbering, &liveness);

    let slots: FxHashMap<InstrId, u32> = func
        .instr_ids()
        .into_iter()
        .filter(|id| matches!(func.instr(*id).kind, InstrKind::AllocStack(_)))
        .enumerate()
        .map(|(slot, id)| (id, slot as u32))
        .collect();

    let allocatable = options.allocatable_registers();
    let scan = LinearScan::new(allocatable, options.caller_saved_registers).run(&intervals, slots.len() as u32);
    let allocation = Allocation {
        stack_slots: slots.len() as u32 + scan.spill_slots,
        locations: scan.locations,
        slots,
        intervals,
        allocatable,
        caller_saved: options.caller_saved_registers,
    };

    let rewriter = Rewriter {
        module,
        func: &func,
        allocation: &allocation,
        scratch: allocatable,
    };
    let lir = rewriter.run(&numbering.order)?;
    debug!(
        function = func.display_name(),
        values = allocation.intervals.len(),
        spilled = allocation.spill_count(),
        registers = lir.register_count,
        "allocated registers"
    );
    Ok((lir, allocation))
}

/// Builds LIR from allocated SSA
struct Rewriter<'a> {
    module: &'a IrModule,
    func: &'a IrFunction,
    allocation: &'a Allocation,
    /// First scratch register
    scratch: u16,
}

impl Rewriter<'_> {
    fn scratch(&self, k: u16) -> Loc {
        Loc::Reg(self.scratch + k)
    }

    fn error(&self, message: String) -> CompileError {
        CompileError::internal(self.func.display_name(), "regalloc", message)
    }

    fn loc(&self, op: &Operand) -> CompileResult<Loc> {
        op.as_instr()
            .and_then(|v| self.allocation.location(v))
            .ok_or_else(|| self.error(format!("operand {} has no location", op)))
    }

    fn slot(&self, op: Option<&Operand>) -> CompileResult<Loc> {
        op.and_then(Operand::as_instr)
            .and_then(|slot| self.allocation.slots.get(&slot))
            .map(|slot| Loc::Stack(*slot))
            .ok_or_else(|| self.error("stack access without a slot".to_string()))
    }

    fn run(&self, order: &[BlockId]) -> CompileResult<LirFunction> {
        let func = self.func;
        let via = self.scratch(1);
        let mut blocks = Vec::with_capacity(order.len());
        for &block in order {
            let mut out = Vec::new();
            for &id in func.block(block).instrs() {
                let instr = func.instr(id);
                match &instr.kind {
                    InstrKind::Phi(_) | InstrKind::AllocStack(_) => {}
                    InstrKind::LoadStack => {
                        let slot = self.slot(instr.operand(0))?;
                        let dst = self.loc(&Operand::Instr(id))?;
                        push_move(&mut out, dst, slot, via);
                    }
                    InstrKind::StoreStack => {
                        let slot = self.slot(instr.operand(0))?;
                        let value = instr
                            .operand(1)
                            .ok_or_else(|| self.error(format!("{} stores nothing", id)))?;
                        let src = self.loc(value)?;
                        push_move(&mut out, slot, src, via);
                    }
                    kind => {
                        if kind.is_terminator() {
                            self.phi_moves(block, &mut out)?;
                        }
                        self.op(id, &mut out)?;
                    }
                }
            }
            blocks.push(LirBlock {
                id: block,
                handler: func.block(block).handler,
                instrs: out,
            });
        }

        let mut lir = LirFunction {
            id: func.id,
            name: func.name.clone(),
            param_count: func.param_count,
            kind: func.kind,
            scope: func.scope,
            blocks,
            register_count: 0,
            stack_slots: self.allocation.stack_slots,
            span: func.span,
        };
        lir.register_count = lir
            .locations()
            .filter_map(|loc| match loc {
                Loc::Reg(r) => Some(r + 1),
                Loc::Stack(_) => None,
            })
            .max()
            .unwrap_or(0);
        Ok(lir)
    }

    /// Moves realizing the phis of `block`'s successors
    fn phi_moves(&self, block: BlockId, out: &mut Vec<LirInstr>) -> CompileResult<()> {
        let func = self.func;
        let mut succs = func.successors(block);
        succs.dedup();
        let mut moves = Vec::new();
        for succ in succs {
            for phi in func.phis(succ) {
                if let Some(value) = func.phi_incoming(phi, block) {
                    moves.push((self.loc(&Operand::Instr(phi))?, self.loc(value)?));
                }
            }
        }
        sequentialize(&moves, self.scratch(0), self.scratch(1), out);
        Ok(())
    }

    fn op(&self, id: InstrId, out: &mut Vec<LirInstr>) -> CompileResult<()> {
        let func = self.func;
        let instr = func.instr(id);
        // Operands past this index are read straight from their location
        let fixed = match instr.kind {
            InstrKind::Call { .. } => 2,
            InstrKind::Construct => 1,
            InstrKind::AllocArray => 0,
            _ => usize::MAX,
        };

        let mut args = Vec::with_capacity(instr.operands().len());
        let mut reloads = 0u16;
        for (index, op) in instr.operands().iter().enumerate() {
            if is_property_key(&instr.kind, index, op) {
                if let Operand::Literal(Literal::String(key)) = op {
                    args.push(LirOperand::Key(key.clone()));
                    continue;
                }
            }
            let loc = self.loc(op)?;
            if index < fixed && loc.is_stack() {
                let reg = self.scratch(reloads);
                reloads += 1;
                out.push(LirInstr::Move { dst: reg, src: loc });
                args.push(LirOperand::Loc(reg));
            } else {
                args.push(LirOperand::Loc(loc));
            }
        }

        let (dst, spill) = if is_value(func, id) {
            match self.loc(&Operand::Instr(id))? {
                loc @ Loc::Stack(_) => (Some(self.scratch(0)), Some(loc)),
                loc => (Some(loc), None),
            }
        } else {
            (None, None)
        };

        let hops = match &instr.kind {
            InstrKind::ResolveScope(target) => instr
                .operand(0)
                .and_then(|env| env_scope(func, env))
                .and_then(|from| self.module.scope_hops(from, *target)),
            _ => None,
        };

        out.push(LirInstr::Op(LirOp {
            kind: instr.kind.clone(),
            dst,
            args,
            arg_types: func.operand_types(id),
            hops,
            span: instr.span,
        }));
        if let Some(slot) = spill {
            out.push(LirInstr::Move {
                dst: slot,
                src: self.scratch(0),
            });
        }
        Ok(())
    }
}
