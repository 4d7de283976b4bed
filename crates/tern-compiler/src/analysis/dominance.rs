//! Dominator tree and dominance frontiers
//!
//! Cooper, Harvey & Kennedy's iterative algorithm over the reverse
//! post-order of the normal-flow CFG. Unreachable blocks have no
//! dominator and dominate nothing.

use super::cfg::Cfg;
use crate::ir::{BlockId, IrFunction};
use rustc_hash::FxHashSet;

#[derive(Debug, Clone)]
pub struct DomTree {
    idom: Vec<Option<BlockId>>,
    children: Vec<Vec<BlockId>>,
    rpo_index: Vec<Option<usize>>,
    entry: BlockId,
}

impl DomTree {
    pub fn new(cfg: &Cfg) -> Self {
        let n = cfg.block_capacity();
        let entry = cfg.entry();
        let mut idom: Vec<Option<BlockId>> = vec![None; n];
        idom[entry.index()] = Some(entry);

        let rpo_index: Vec<Option<usize>> = (0..n).map(|i| cfg.rpo_index(BlockId(i as u32))).collect();
        let intersect = |idom: &Vec<Option<BlockId>>, mut a: BlockId, mut b: BlockId| -> BlockId {
            while a != b {
                while rpo_index[a.index()] > rpo_index[b.index()] {
                    a = idom[a.index()].unwrap_or(entry);
                }
                while rpo_index[b.index()] > rpo_index[a.index()] {
                    b = idom[b.index()].unwrap_or(entry);
                }
            }
            a
        };

        let mut changed = true;
        while changed {
            changed = false;
            for &block in cfg.rpo().iter().skip(1) {
                let mut new_idom: Option<BlockId> = None;
                for &pred in cfg.preds(block) {
                    if idom[pred.index()].is_none() {
                        continue;
                    }
                    new_idom = Some(match new_idom {
                        None => pred,
                        Some(current) => intersect(&idom, pred, current),
                    });
                }
                if new_idom.is_some() && idom[block.index()] != new_idom {
                    idom[block.index()] = new_idom;
                    changed = true;
                }
            }
        }

        let mut children = vec![Vec::new(); n];
        for &block in cfg.rpo().iter().skip(1) {
            if let Some(parent) = idom[block.index()] {
                children[parent.index()].push(block);
            }
        }

        DomTree {
            idom,
            children,
            rpo_index,
            entry,
        }
    }

    pub fn compute(func: &IrFunction) -> (Cfg, DomTree) {
        let cfg = Cfg::new(func);
        let dom = DomTree::new(&cfg);
        (cfg, dom)
    }

    /// Immediate dominator; `None` for the entry and unreachable blocks
    pub fn idom(&self, block: BlockId) -> Option<BlockId> {
        if block == self.entry {
            return None;
        }
        self.idom.get(block.index()).copied().flatten()
    }

    pub fn children(&self, block: BlockId) -> &[BlockId] {
        &self.children[block.index()]
    }

    pub fn is_reachable(&self, block: BlockId) -> bool {
        self.rpo_index.get(block.index()).copied().flatten().is_some()
    }

    /// Does `a` dominate `b`? Every block dominates itself.
    pub fn dominates(&self, a: BlockId, b: BlockId) -> bool {
        if !self.is_reachable(a) || !self.is_reachable(b) {
            return false;
        }
        let mut current = b;
        loop {
            if current == a {
                return true;
            }
            match self.idom(current) {
                Some(parent) => current = parent,
                None => return false,
            }
        }
    }

    /// Dominator-tree pre-order starting at the entry
    pub fn preorder(&self) -> Vec<BlockId> {
        let mut order = Vec::new();
        let mut stack = vec![self.entry];
        while let Some(b) = stack.pop() {
            order.push(b);
            stack.extend(self.children(b).iter().rev().copied());
        }
        order
    }

    /// Dominance frontier of every block
    pub fn frontiers(&self, cfg: &Cfg) -> Vec<Vec<BlockId>> {
        let mut df: Vec<Vec<BlockId>> = vec![Vec::new(); self.idom.len()];
        for &block in cfg.rpo() {
            let preds = cfg.reachable_preds(block);
            if preds.len() < 2 {
                continue;
            }
            let Some(block_idom) = self.idom(block) else {
                continue;
            };
            for pred in preds {
                let mut runner = pred;
                while runner != block_idom {
                    if !df[runner.index()].contains(&block) {
                        df[runner.index()].push(block);
                    }
                    match self.idom(runner) {
                        Some(next) => runner = next,
                        None => break,
                    }
                }
            }
        }
        df
    }

    /// Iterated dominance frontier of a set of blocks
    pub fn iterated_frontier(&self, frontiers: &[Vec<BlockId>], defs: &[BlockId]) -> Vec<BlockId> {
        let mut result: Vec<BlockId> = Vec::new();
        let mut seen: FxHashSet<BlockId> = FxHashSet::default();
        let mut work: Vec<BlockId> = defs.to_vec();
        while let Some(b) = work.pop() {
            for &f in &frontiers[b.index()] {
                if seen.insert(f) {
                    result.push(f);
                    work.push(f);
                }
            }
        }
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::{FuncId, InstrKind, Operand};
    use tern_ast::{FunctionKind, Span};

    /// entry -> (left | right) -> join
    fn make_diamond() -> (IrFunction, [BlockId; 4]) {
        let mut func = IrFunction::new(FuncId(0), None, 1, FunctionKind::Normal, Span::default());
        let s = Span::default();
        let entry = func.entry;
        let left = func.create_block("left");
        let right = func.create_block("right");
        let join = func.create_block("join");
        func.append(
            entry,
            InstrKind::CondBranch {
                then_block: left,
                else_block: right,
            },
            vec![Operand::Param(1)],
            s,
        );
        func.append(left, InstrKind::Branch(join), vec![], s);
        func.append(right, InstrKind::Branch(join), vec![], s);
        func.append(join, InstrKind::Return, vec![Operand::undefined()], s);
        (func, [entry, left, right, join])
    }

    #[test]
    fn test_diamond_idoms() {
        let (func, [entry, left, right, join]) = make_diamond();
        let (_, dom) = DomTree::compute(&func);
        assert_eq!(dom.idom(entry), None);
        assert_eq!(dom.idom(left), Some(entry));
        assert_eq!(dom.idom(right), Some(entry));
        assert_eq!(dom.idom(join), Some(entry));
        assert!(dom.dominates(entry, join));
        assert!(!dom.dominates(left, join));
    }

    #[test]
    fn test_diamond_frontiers() {
        let (func, [entry, left, right, join]) = make_diamond();
        let (cfg, dom) = DomTree::compute(&func);
        let df = dom.frontiers(&cfg);
        assert_eq!(df[left.index()], vec![join]);
        assert_eq!(df[right.index()], vec![join]);
        assert!(df[entry.index()].is_empty());
        assert_eq!(dom.iterated_frontier(&df, &[left]), vec![join]);
    }

    #[test]
    fn test_preorder_starts_at_entry() {
        let (func, [entry, ..]) = make_diamond();
        let (_, dom) = DomTree::compute(&func);
        let order = dom.preorder();
        assert_eq!(order[0], entry);
        assert_eq!(order.len(), 4);
    }
}
