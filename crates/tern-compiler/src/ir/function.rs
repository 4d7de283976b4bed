//! IR functions
//!
//! A function owns two arenas, one of instructions and one of blocks.
//! Operands refer to instructions by index and every instruction keeps the
//! reverse list of its users. All edits go through the methods here so the
//! two directions never disagree.

use super::block::BasicBlock;
use super::instr::{InstrKind, Instruction};
use super::types::Type;
use super::value::{BlockId, FuncId, InstrId, Operand, ScopeId};
use tern_ast::{FunctionKind, Span};

#[derive(Debug, Clone)]
pub struct IrFunction {
    pub id: FuncId,
    /// Source name; `None` for anonymous functions
    pub name: Option<String>,
    /// Number of formal parameters (excluding `this`)
    pub param_count: u32,
    pub kind: FunctionKind,
    /// Environment layout this function creates, if any
    pub scope: Option<ScopeId>,
    /// Environment layout captured by closures of this function
    pub parent_scope: Option<ScopeId>,
    pub span: Span,
    pub entry: BlockId,
    /// Types of `this` followed by each formal parameter
    pub param_types: Vec<Type>,
    pub return_type: Type,
    instrs: Vec<Instruction>,
    blocks: Vec<BasicBlock>,
}

impl IrFunction {
    /// Create a function with an empty entry block
    pub fn new(id: FuncId, name: Option<String>, param_count: u32, kind: FunctionKind, span: Span) -> Self {
        let mut func = Self {
            id,
            name,
            param_count,
            kind,
            scope: None,
            parent_scope: None,
            span,
            entry: BlockId(0),
            param_types: vec![Type::ANY; param_count as usize + 1],
            return_type: Type::ANY,
            instrs: Vec::new(),
            blocks: Vec::new(),
        };
        func.entry = func.create_block("entry");
        func
    }

    /// Name for diagnostics
    pub fn display_name(&self) -> &str {
        self.name.as_deref().unwrap_or("<anonymous>")
    }

    // ===== Blocks =====

    pub fn create_block(&mut self, label: &str) -> BlockId {
        let id = BlockId(self.blocks.len() as u32);
        self.blocks.push(BasicBlock::with_label(id, label));
        id
    }

    /// Panics on an id from another function; ids are only minted here
    pub fn block(&self, id: BlockId) -> &BasicBlock {
        &self.blocks[id.index()]
    }

    pub fn block_mut(&mut self, id: BlockId) -> &mut BasicBlock {
        &mut self.blocks[id.index()]
    }

    pub fn get_block(&self, id: BlockId) -> Option<&BasicBlock> {
        self.blocks.get(id.index()).filter(|b| b.alive)
    }

    /// Live blocks in creation order
    pub fn blocks(&self) -> impl Iterator<Item = &BasicBlock> {
        self.blocks.iter().filter(|b| b.alive)
    }

    pub fn block_ids(&self) -> Vec<BlockId> {
        self.blocks().map(|b| b.id).collect()
    }

    pub fn block_count(&self) -> usize {
        self.blocks().count()
    }

    /// Size of the block arena (live and removed)
    pub fn block_capacity(&self) -> usize {
        self.blocks.len()
    }

    pub fn terminator(&self, block: BlockId) -> Option<InstrId> {
        let last = *self.block(block).instrs.last()?;
        self.instr(last).kind.is_terminator().then_some(last)
    }

    pub fn is_terminated(&self, block: BlockId) -> bool {
        self.terminator(block).is_some()
    }

    /// Normal-flow successors
    pub fn successors(&self, block: BlockId) -> Vec<BlockId> {
        self.terminator(block)
            .map(|t| self.instr(t).kind.successors())
            .unwrap_or_default()
    }

    /// Phi instructions at the head of `block`
    pub fn phis(&self, block: BlockId) -> Vec<InstrId> {
        self.block(block)
            .instrs
            .iter()
            .copied()
            .take_while(|id| self.instr(*id).kind.is_phi())
            .collect()
    }

    /// Remove a block and every instruction in it
    pub fn remove_block(&mut self, block: BlockId) {
        let instrs: Vec<InstrId> = self.block(block).instrs.iter().rev().copied().collect();
        for id in instrs {
            self.erase(id);
        }
        let b = self.block_mut(block);
        b.alive = false;
        b.instrs.clear();
    }

    /// Redirect the edges `block -> from` to `block -> to`
    pub fn retarget(&mut self, block: BlockId, from: BlockId, to: BlockId) {
        if let Some(term) = self.terminator(block) {
            self.instrs[term.index()].kind.retarget(from, to);
        }
    }

    /// Move the instructions of `block` from `index` on to the end of
    /// `dest`. Phis of the moved terminator's successors are updated to
    /// name `dest` as their predecessor.
    pub fn split_tail(&mut self, block: BlockId, index: usize, dest: BlockId) {
        let tail: Vec<InstrId> = self.blocks[block.index()].instrs.split_off(index);
        for id in &tail {
            self.instrs[id.index()].block = dest;
        }
        self.blocks[dest.index()].instrs.extend(tail);
        for succ in self.successors(dest) {
            for phi in self.phis(succ) {
                self.replace_phi_block(phi, block, dest);
            }
        }
    }

    // ===== Instructions =====

    pub fn instr(&self, id: InstrId) -> &Instruction {
        &self.instrs[id.index()]
    }

    pub fn kind_mut(&mut self, id: InstrId) -> &mut InstrKind {
        &mut self.instrs[id.index()].kind
    }

    pub fn set_type(&mut self, id: InstrId, ty: Type) {
        self.instrs[id.index()].ty = ty;
    }

    pub fn set_span(&mut self, id: InstrId, span: Span) {
        self.instrs[id.index()].span = span;
    }

    /// Size of the instruction arena (live and erased)
    pub fn instr_capacity(&self) -> usize {
        self.instrs.len()
    }

    /// Live instructions in block order
    pub fn instr_ids(&self) -> Vec<InstrId> {
        self.blocks()
            .flat_map(|b| b.instrs.iter().copied())
            .collect()
    }

    pub fn instr_count(&self) -> usize {
        self.blocks().map(|b| b.len()).sum()
    }

    /// Position of an instruction within its block
    pub fn position(&self, id: InstrId) -> Option<usize> {
        let block = self.instr(id).block;
        self.block(block).instrs.iter().position(|i| *i == id)
    }

    fn make(&mut self, block: BlockId, kind: InstrKind, operands: Vec<Operand>, span: Span) -> InstrId {
        let id = InstrId(self.instrs.len() as u32);
        for op in &operands {
            if let Operand::Instr(def) = op {
                self.instrs[def.index()].users.push(id);
            }
        }
        self.instrs.push(Instruction {
            kind,
            operands,
            ty: Type::ANY,
            span,
            block,
            users: Vec::new(),
            alive: true,
        });
        id
    }

    /// Append an instruction to the end of `block`
    pub fn append(&mut self, block: BlockId, kind: InstrKind, operands: Vec<Operand>, span: Span) -> InstrId {
        let id = self.make(block, kind, operands, span);
        self.blocks[block.index()].instrs.push(id);
        id
    }

    /// Insert an instruction at `index` in `block`
    pub fn insert(&mut self, block: BlockId, index: usize, kind: InstrKind, operands: Vec<Operand>, span: Span) -> InstrId {
        let id = self.make(block, kind, operands, span);
        self.blocks[block.index()].instrs.insert(index, id);
        id
    }

    /// Insert an instruction immediately before `anchor`
    pub fn insert_before(&mut self, anchor: InstrId, kind: InstrKind, operands: Vec<Operand>) -> InstrId {
        let block = self.instr(anchor).block;
        let span = self.instr(anchor).span;
        let index = self.position(anchor).unwrap_or(0);
        self.insert(block, index, kind, operands, span)
    }

    /// Insert an instruction immediately after `anchor`
    pub fn insert_after(&mut self, anchor: InstrId, kind: InstrKind, operands: Vec<Operand>) -> InstrId {
        let block = self.instr(anchor).block;
        let span = self.instr(anchor).span;
        let index = self.position(anchor).map_or(0, |i| i + 1);
        self.insert(block, index, kind, operands, span)
    }

    /// Insert an instruction just before the terminator of `block`
    pub fn insert_before_terminator(&mut self, block: BlockId, kind: InstrKind, operands: Vec<Operand>, span: Span) -> InstrId {
        let index = match self.terminator(block) {
            Some(_) => self.block(block).len() - 1,
            None => self.block(block).len(),
        };
        self.insert(block, index, kind, operands, span)
    }

    fn drop_use(&mut self, def: InstrId, user: InstrId) {
        let users = &mut self.instrs[def.index()].users;
        if let Some(pos) = users.iter().position(|u| *u == user) {
            users.swap_remove(pos);
        }
    }

    pub fn set_operand(&mut self, id: InstrId, index: usize, op: Operand) {
        if let Operand::Instr(old) = self.instrs[id.index()].operands[index] {
            self.drop_use(old, id);
        }
        if let Operand::Instr(def) = op {
            self.instrs[def.index()].users.push(id);
        }
        self.instrs[id.index()].operands[index] = op;
    }

    pub fn set_operands(&mut self, id: InstrId, operands: Vec<Operand>) {
        let old = std::mem::take(&mut self.instrs[id.index()].operands);
        for op in old {
            if let Operand::Instr(def) = op {
                self.drop_use(def, id);
            }
        }
        for op in &operands {
            if let Operand::Instr(def) = op {
                self.instrs[def.index()].users.push(id);
            }
        }
        self.instrs[id.index()].operands = operands;
    }

    /// Rewrite every use of `old` to `new`; returns the number of uses changed
    pub fn replace_all_uses(&mut self, old: InstrId, new: Operand) -> usize {
        if new == Operand::Instr(old) {
            return 0;
        }
        let users = std::mem::take(&mut self.instrs[old.index()].users);
        let mut changed = 0;
        for user in users {
            let operands = &mut self.instrs[user.index()].operands;
            if let Some(slot) = operands.iter_mut().find(|o| **o == Operand::Instr(old)) {
                *slot = new.clone();
                changed += 1;
            }
            if let Operand::Instr(def) = new {
                self.instrs[def.index()].users.push(user);
            }
        }
        changed
    }

    /// Remove an instruction from its block and drop its operand uses.
    /// Remaining users must be erased or rewritten by the caller.
    pub fn erase(&mut self, id: InstrId) {
        if !self.instrs[id.index()].alive {
            return;
        }
        let operands = std::mem::take(&mut self.instrs[id.index()].operands);
        for op in operands {
            if let Operand::Instr(def) = op {
                self.drop_use(def, id);
            }
        }
        let block = self.instrs[id.index()].block;
        self.blocks[block.index()].instrs.retain(|i| *i != id);
        let instr = &mut self.instrs[id.index()];
        instr.alive = false;
        instr.users.clear();
    }

    /// Replace a terminator's kind, dropping its operands
    pub fn set_terminator(&mut self, block: BlockId, kind: InstrKind, operands: Vec<Operand>) -> InstrId {
        let span = match self.terminator(block) {
            Some(old) => {
                let span = self.instr(old).span;
                self.erase(old);
                span
            }
            None => Span::default(),
        };
        self.append(block, kind, operands, span)
    }

    // ===== Phis =====

    pub fn add_phi_entry(&mut self, phi: InstrId, block: BlockId, value: Operand) {
        if let InstrKind::Phi(blocks) = &mut self.instrs[phi.index()].kind {
            blocks.push(block);
        }
        if let Operand::Instr(def) = value {
            self.instrs[def.index()].users.push(phi);
        }
        self.instrs[phi.index()].operands.push(value);
    }

    /// Drop every entry of `phi` flowing in from `block`
    pub fn remove_phi_entry(&mut self, phi: InstrId, block: BlockId) {
        let (blocks, operands) = match &self.instrs[phi.index()].kind {
            InstrKind::Phi(blocks) => {
                let mut kept_blocks = Vec::new();
                let mut kept_ops = Vec::new();
                for (b, op) in blocks.iter().zip(self.instrs[phi.index()].operands.iter()) {
                    if *b != block {
                        kept_blocks.push(*b);
                        kept_ops.push(op.clone());
                    }
                }
                (kept_blocks, kept_ops)
            }
            _ => return,
        };
        self.instrs[phi.index()].kind = InstrKind::Phi(blocks);
        self.set_operands(phi, operands);
    }

    pub fn replace_phi_block(&mut self, phi: InstrId, old: BlockId, new: BlockId) {
        if let InstrKind::Phi(blocks) = &mut self.instrs[phi.index()].kind {
            for b in blocks.iter_mut() {
                if *b == old {
                    *b = new;
                }
            }
        }
    }

    /// Incoming value of `phi` along the edge from `block`
    pub fn phi_incoming(&self, phi: InstrId, block: BlockId) -> Option<&Operand> {
        let instr = self.instr(phi);
        let blocks = instr.phi_blocks()?;
        let index = blocks.iter().position(|b| *b == block)?;
        instr.operands.get(index)
    }

    // ===== Types =====

    pub fn operand_type(&self, op: &Operand) -> Type {
        match op {
            Operand::Instr(id) => self.instr(*id).ty,
            Operand::Param(i) => self.param_types.get(*i as usize).copied().unwrap_or(Type::ANY),
            Operand::Literal(lit) => lit.ty(),
        }
    }

    pub fn operand_types(&self, id: InstrId) -> Vec<Type> {
        self.instr(id)
            .operands
            .iter()
            .map(|op| self.operand_type(op))
            .collect()
    }

    pub fn has_side_effects(&self, id: InstrId) -> bool {
        self.instr(id).kind.has_side_effects(&self.operand_types(id))
    }

    pub fn may_throw(&self, id: InstrId) -> bool {
        self.instr(id).kind.may_throw(&self.operand_types(id))
    }

    pub fn may_execute_code(&self, id: InstrId) -> bool {
        self.instr(id).kind.may_execute_code(&self.operand_types(id))
    }

    /// Does any block start a `try` region?
    pub fn has_try(&self) -> bool {
        self.blocks().any(|b| {
            self.terminator(b.id)
                .is_some_and(|t| matches!(self.instr(t).kind, InstrKind::TryStart { .. }))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::instr::BinaryOp;
    use crate::ir::value::Literal;

    fn make_func() -> IrFunction {
        IrFunction::new(FuncId(0), Some("test".to_string()), 2, FunctionKind::Normal, Span::default())
    }

    #[test]
    fn test_function_new() {
        let func = make_func();
        assert_eq!(func.display_name(), "test");
        assert_eq!(func.block_count(), 1);
        assert_eq!(func.param_types.len(), 3);
        assert!(!func.is_terminated(func.entry));
    }

    #[test]
    fn test_users_track_operands() {
        let mut func = make_func();
        let bb = func.entry;
        let a = func.append(bb, InstrKind::Binary(BinaryOp::Add), vec![Operand::Param(1), Operand::Param(2)], Span::default());
        let b = func.append(bb, InstrKind::Binary(BinaryOp::Mul), vec![a.into(), a.into()], Span::default());
        func.append(bb, InstrKind::Return, vec![b.into()], Span::default());
        assert_eq!(func.instr(a).users(), &[b, b]);

        func.replace_all_uses(a, Operand::number(3.0));
        assert!(func.instr(a).users().is_empty());
        assert_eq!(func.instr(b).operands()[1], Operand::number(3.0));
    }

    #[test]
    fn test_erase_drops_uses() {
        let mut func = make_func();
        let bb = func.entry;
        let a = func.append(bb, InstrKind::Unary(crate::ir::instr::UnaryOp::Neg), vec![Operand::Param(1)], Span::default());
        let b = func.append(bb, InstrKind::Mov, vec![a.into()], Span::default());
        func.erase(b);
        assert!(!func.instr(b).is_alive());
        assert!(func.instr(a).users().is_empty());
        assert_eq!(func.block(bb).instrs(), &[a]);
    }

    #[test]
    fn test_split_tail_updates_phis() {
        let mut func = make_func();
        let entry = func.entry;
        let exit = func.create_block("exit");
        let call = func.append(entry, InstrKind::Call { chain: vec![] }, vec![Operand::Param(1), Operand::undefined()], Span::default());
        func.append(entry, InstrKind::Branch(exit), vec![], Span::default());
        let phi = func.append(exit, InstrKind::Phi(vec![entry]), vec![call.into()], Span::default());
        func.append(exit, InstrKind::Return, vec![phi.into()], Span::default());

        let cont = func.create_block("cont");
        func.split_tail(entry, 1, cont);
        assert_eq!(func.successors(cont), vec![exit]);
        assert!(!func.is_terminated(entry));
        assert_eq!(func.instr(phi).phi_blocks(), Some(&[cont][..]));
    }

    #[test]
    fn test_remove_phi_entry() {
        let mut func = make_func();
        let a = func.create_block("a");
        let b = func.create_block("b");
        let join = func.create_block("join");
        let x = func.append(a, InstrKind::LoadConst(Literal::Number(1.0)), vec![], Span::default());
        let phi = func.append(join, InstrKind::Phi(vec![a, b]), vec![x.into(), Operand::number(2.0)], Span::default());
        func.remove_phi_entry(phi, a);
        assert_eq!(func.instr(phi).phi_blocks(), Some(&[b][..]));
        assert_eq!(func.instr(phi).operands(), &[Operand::number(2.0)]);
        assert!(func.instr(x).users().is_empty());
    }
}
