//! Sequentializing parallel moves

use super::lir::{LirInstr, Loc};

/// Emit `dst = src`, going through `via` when both sides are stack slots
pub fn push_move(out: &mut Vec<LirInstr>, dst: Loc, src: Loc, via: Loc) {
    if dst == src {
        return;
    }
    if dst.is_stack() && src.is_stack() {
        out.push(LirInstr::Move { dst: via, src });
        out.push(LirInstr::Move { dst, src: via });
    } else {
        out.push(LirInstr::Move { dst, src });
    }
}

/// Emit moves with the effect of performing every `(dst, src)` pair at
/// once. Cycles are broken through `temp`; `via` carries stack-to-stack
/// copies. Destinations must be distinct.
pub fn sequentialize(moves: &[(Loc, Loc)], temp: Loc, via: Loc, out: &mut Vec<LirInstr>) {
    let mut pending: Vec<(Loc, Loc)> = moves.iter().copied().filter(|(d, s)| d != s).collect();
    while !pending.is_empty() {
        let ready = pending
            .iter()
            .position(|(dst, _)| !pending.iter().any(|(_, src)| src == dst));
        match ready {
            Some(index) => {
                let (dst, src) = pending.remove(index);
                push_move(out, dst, src, via);
            }
            None => {
                // Every destination is still needed as a source
                let (_, src) = pending[0];
                push_move(out, temp, src, via);
                for m in pending.iter_mut() {
                    if m.1 == src {
                        m.1 = temp;
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rustc_hash::FxHashMap;

    /// Run moves over a register/slot file and return the final contents
    fn simulate(instrs: &[LirInstr], initial: &[(Loc, i32)]) -> FxHashMap<Loc, i32> {
        let mut state: FxHashMap<Loc, i32> = initial.iter().copied().collect();
        for instr in instrs {
            if let LirInstr::Move { dst, src } = instr {
                let value = state.get(src).copied().unwrap_or(-1);
                state.insert(*dst, value);
            }
        }
        state
    }

    const TEMP: Loc = Loc::Reg(10);
    const VIA: Loc = Loc::Reg(11);

    #[test]
    fn test_chain_is_ordered() {
        // r0 <- r1, r1 <- r2
        let moves = [(Loc::Reg(0), Loc::Reg(1)), (Loc::Reg(1), Loc::Reg(2))];
        let mut out = Vec::new();
        sequentialize(&moves, TEMP, VIA, &mut out);
        let state = simulate(&out, &[(Loc::Reg(1), 1), (Loc::Reg(2), 2)]);
        assert_eq!(state[&Loc::Reg(0)], 1);
        assert_eq!(state[&Loc::Reg(1)], 2);
        assert_eq!(out.len(), 2);
    }

    #[test]
    fn test_swap_uses_temp() {
        let moves = [(Loc::Reg(0), Loc::Reg(1)), (Loc::Reg(1), Loc::Reg(0))];
        let mut out = Vec::new();
        sequentialize(&moves, TEMP, VIA, &mut out);
        let state = simulate(&out, &[(Loc::Reg(0), 7), (Loc::Reg(1), 9)]);
        assert_eq!(state[&Loc::Reg(0)], 9);
        assert_eq!(state[&Loc::Reg(1)], 7);
    }

    #[test]
    fn test_stack_to_stack_goes_through_register() {
        let moves = [(Loc::Stack(0), Loc::Stack(1)), (Loc::Stack(1), Loc::Stack(0))];
        let mut out = Vec::new();
        sequentialize(&moves, TEMP, VIA, &mut out);
        for instr in &out {
            if let LirInstr::Move { dst, src } = instr {
                assert!(!(dst.is_stack() && src.is_stack()));
            }
        }
        let state = simulate(&out, &[(Loc::Stack(0), 1), (Loc::Stack(1), 2)]);
        assert_eq!(state[&Loc::Stack(0)], 2);
        assert_eq!(state[&Loc::Stack(1)], 1);
    }
}
