//! Control-flow graph of an IR function
//!
//! Successor lists come from terminators (normal edges) and from block
//! handlers (exceptional edges: any instruction of a guarded block may
//! transfer to its catch block). Orderings and reachability follow normal
//! edges; a catch block is always reachable through its `TryStart`.

use crate::ir::{BlockId, IrFunction};

/// How control reaches a successor
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EdgeKind {
    Normal,
    Exceptional,
}

#[derive(Debug, Clone)]
pub struct Cfg {
    entry: BlockId,
    succs: Vec<Vec<BlockId>>,
    preds: Vec<Vec<BlockId>>,
    handlers: Vec<Option<BlockId>>,
    /// Reverse post-order of the reachable blocks
    rpo: Vec<BlockId>,
    rpo_index: Vec<Option<usize>>,
    back_edges: Vec<(BlockId, BlockId)>,
}

impl Cfg {
    pub fn new(func: &IrFunction) -> Self {
        let n = func.block_capacity();
        let mut succs = vec![Vec::new(); n];
        let mut preds = vec![Vec::new(); n];
        let mut handlers = vec![None; n];
        for block in func.blocks() {
            handlers[block.id.index()] = block.handler;
            for succ in func.successors(block.id) {
                succs[block.id.index()].push(succ);
                preds[succ.index()].push(block.id);
            }
        }

        // Iterative DFS for post-order and back edges
        let mut post = Vec::new();
        let mut state = vec![0u8; n]; // 0 = new, 1 = on stack, 2 = done
        let mut back_edges = Vec::new();
        let mut stack: Vec<(BlockId, usize)> = vec![(func.entry, 0)];
        state[func.entry.index()] = 1;
        while let Some((block, next)) = stack.pop() {
            if let Some(&succ) = succs[block.index()].get(next) {
                stack.push((block, next + 1));
                match state[succ.index()] {
                    0 => {
                        state[succ.index()] = 1;
                        stack.push((succ, 0));
                    }
                    1 => back_edges.push((block, succ)),
                    _ => {}
                }
            } else {
                state[block.index()] = 2;
                post.push(block);
            }
        }
        post.reverse();
        let mut rpo_index = vec![None; n];
        for (i, b) in post.iter().enumerate() {
            rpo_index[b.index()] = Some(i);
        }

        Cfg {
            entry: func.entry,
            succs,
            preds,
            handlers,
            rpo: post,
            rpo_index,
            back_edges,
        }
    }

    pub fn entry(&self) -> BlockId {
        self.entry
    }

    /// Size of the function's block arena when the CFG was built
    pub fn block_capacity(&self) -> usize {
        self.succs.len()
    }

    /// Normal successors
    pub fn succs(&self, block: BlockId) -> &[BlockId] {
        &self.succs[block.index()]
    }

    /// Normal predecessors (including unreachable ones)
    pub fn preds(&self, block: BlockId) -> &[BlockId] {
        &self.preds[block.index()]
    }

    /// Predecessors that are themselves reachable
    pub fn reachable_preds(&self, block: BlockId) -> Vec<BlockId> {
        self.preds(block)
            .iter()
            .copied()
            .filter(|p| self.is_reachable(*p))
            .collect()
    }

    /// Every outgoing edge, exceptional ones included
    pub fn edges(&self, block: BlockId) -> Vec<(BlockId, EdgeKind)> {
        let mut edges: Vec<(BlockId, EdgeKind)> = self
            .succs(block)
            .iter()
            .map(|s| (*s, EdgeKind::Normal))
            .collect();
        if let Some(handler) = self.handlers[block.index()] {
            edges.push((handler, EdgeKind::Exceptional));
        }
        edges
    }

    pub fn handler(&self, block: BlockId) -> Option<BlockId> {
        self.handlers[block.index()]
    }

    pub fn rpo(&self) -> &[BlockId] {
        &self.rpo
    }

    pub fn rpo_index(&self, block: BlockId) -> Option<usize> {
        self.rpo_index.get(block.index()).copied().flatten()
    }

    pub fn is_reachable(&self, block: BlockId) -> bool {
        self.rpo_index(block).is_some()
    }

    /// Edges `(latch, header)` closing a cycle in the DFS
    pub fn back_edges(&self) -> &[(BlockId, BlockId)] {
        &self.back_edges
    }

    /// Blocks reachable from `start` (inclusive) along normal edges
    pub fn reachable_from(&self, start: BlockId) -> Vec<bool> {
        let mut seen = vec![false; self.succs.len()];
        let mut work = vec![start];
        while let Some(b) = work.pop() {
            if std::mem::replace(&mut seen[b.index()], true) {
                continue;
            }
            work.extend(self.succs(b).iter().copied());
        }
        seen
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::{FuncId, InstrKind, Operand};
    use tern_ast::{FunctionKind, Span};

    /// entry -> header -> body -> header, header -> exit
    fn make_loop() -> (IrFunction, [BlockId; 4]) {
        let mut func = IrFunction::new(FuncId(0), None, 1, FunctionKind::Normal, Span::default());
        let entry = func.entry;
        let header = func.create_block("header");
        let body = func.create_block("body");
        let exit = func.create_block("exit");
        let s = Span::default();
        func.append(entry, InstrKind::Branch(header), vec![], s);
        func.append(
            header,
            InstrKind::CondBranch {
                then_block: body,
                else_block: exit,
            },
            vec![Operand::Param(1)],
            s,
        );
        func.append(body, InstrKind::Branch(header), vec![], s);
        func.append(exit, InstrKind::Return, vec![Operand::undefined()], s);
        (func, [entry, header, body, exit])
    }

    #[test]
    fn test_rpo_and_preds() {
        let (func, [entry, header, body, exit]) = make_loop();
        let cfg = Cfg::new(&func);
        assert_eq!(cfg.rpo()[0], entry);
        assert!(cfg.rpo_index(header) < cfg.rpo_index(body));
        assert!(cfg.rpo_index(header) < cfg.rpo_index(exit));
        assert_eq!(cfg.preds(header), &[entry, body]);
    }

    #[test]
    fn test_back_edges() {
        let (func, [_, header, body, _]) = make_loop();
        let cfg = Cfg::new(&func);
        assert_eq!(cfg.back_edges(), &[(body, header)]);
    }

    #[test]
    fn test_unreachable_block() {
        let (mut func, _) = make_loop();
        let orphan = func.create_block("orphan");
        func.append(orphan, InstrKind::Unreachable, vec![], Span::default());
        let cfg = Cfg::new(&func);
        assert!(!cfg.is_reachable(orphan));
    }

    #[test]
    fn test_exceptional_edges() {
        let (mut func, [_, _, body, exit]) = make_loop();
        func.block_mut(body).handler = Some(exit);
        let cfg = Cfg::new(&func);
        assert!(cfg.edges(body).contains(&(exit, EdgeKind::Exceptional)));
    }
}
