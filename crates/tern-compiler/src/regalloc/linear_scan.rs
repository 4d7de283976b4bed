//! Linear scan over live intervals
//!
//! Intervals are visited by start point. An interval crossing a call never
//! receives one of the caller-saved registers. When no register is free the
//! interval with the furthest next use is spilled, loop-carried intervals
//! last; a spilled value keeps one stack slot for its whole lifetime.

use super::lir::Loc;
use super::liveness::Interval;
use crate::ir::InstrId;
use rustc_hash::FxHashMap;
use tracing::trace;

/// Register assignment for one function
#[derive(Debug)]
pub struct ScanResult {
    pub locations: FxHashMap<InstrId, Loc>,
    /// Spill slots handed out, starting at the first free slot
    pub spill_slots: u32,
}

pub struct LinearScan {
    allocatable: u16,
    caller_saved: u16,
}

impl LinearScan {
    pub fn new(allocatable: u16, caller_saved: u16) -> Self {
        LinearScan {
            allocatable,
            caller_saved: caller_saved.min(allocatable),
        }
    }

    /// Assign locations; spill slots are numbered from `first_slot`
    pub fn run(&self, intervals: &[Interval], first_slot: u32) -> ScanResult {
        let mut order: Vec<usize> = (0..intervals.len()).collect();
        order.sort_by_key(|&i| (intervals[i].start, intervals[i].value));

        let mut locations: FxHashMap<InstrId, Loc> = FxHashMap::default();
        let mut free = vec![true; self.allocatable as usize];
        let mut active: Vec<(usize, u16)> = Vec::new();
        let mut next_slot = first_slot;

        for i in order {
            let current = &intervals[i];
            // An interval ending at the point another starts still holds its
            // register there: an instruction may write its result before it
            // has read every operand, so a last use and a definition at the
            // same point must not share a register.
            active.retain(|&(j, reg)| {
                let expired = intervals[j].end < current.start;
                if expired {
                    free[reg as usize] = true;
                }
                !expired
            });

            let lowest = if current.crosses_call { self.caller_saved } else { 0 };
            if let Some(reg) = (lowest..self.allocatable).find(|r| free[*r as usize]) {
                free[reg as usize] = false;
                active.push((i, reg));
                locations.insert(current.value, Loc::Reg(reg));
                continue;
            }

            // Furthest next use loses its register; loop-carried values last
            let spill_key = |j: usize| {
                let interval = &intervals[j];
                (
                    !interval.loop_carried,
                    interval.next_use_after(current.start).unwrap_or(u32::MAX),
                )
            };
            let victim = active
                .iter()
                .filter(|(_, reg)| *reg >= lowest)
                .map(|&(j, _)| j)
                .chain(std::iter::once(i))
                .max_by_key(|&j| spill_key(j))
                .unwrap_or(i);

            let slot = Loc::Stack(next_slot);
            next_slot += 1;
            if victim == i {
                locations.insert(current.value, slot);
                trace!(value = %current.value, %slot, "spilled");
                continue;
            }
            if let Some(pos) = active.iter().position(|(j, _)| *j == victim) {
                let (_, reg) = active.swap_remove(pos);
                locations.insert(intervals[victim].value, slot);
                locations.insert(current.value, Loc::Reg(reg));
                active.push((i, reg));
                trace!(value = %intervals[victim].value, %slot, "spilled for a later interval");
            }
        }

        ScanResult {
            locations,
            spill_slots: next_slot - first_slot,
        }
    }
}
