//! IR builder helpers
//!
//! A cursor over an [`IrFunction`] used by AST lowering and by tests that
//! construct IR by hand.

use super::function::IrFunction;
use super::instr::{BinaryOp, InstrKind, UnaryOp};
use super::value::{BlockId, FuncId, InstrId, Operand, ScopeId, VarId};
use tern_ast::Span;

/// Builder that simplifies IR construction
pub struct FunctionBuilder<'a> {
    func: &'a mut IrFunction,
    current_block: BlockId,
    /// Handler assigned to blocks created from now on
    handler: Option<BlockId>,
    span: Span,
}

impl<'a> FunctionBuilder<'a> {
    /// Create a builder positioned at the end of the entry block
    pub fn new(func: &'a mut IrFunction) -> Self {
        let entry = func.entry;
        FunctionBuilder {
            func,
            current_block: entry,
            handler: None,
            span: Span::default(),
        }
    }

    pub fn func(&self) -> &IrFunction {
        self.func
    }

    pub fn func_mut(&mut self) -> &mut IrFunction {
        self.func
    }

    /// Switch to emitting into a different block
    pub fn switch_to_block(&mut self, block: BlockId) {
        self.current_block = block;
    }

    pub fn current_block(&self) -> BlockId {
        self.current_block
    }

    /// Span attached to instructions emitted from now on
    pub fn set_span(&mut self, span: Span) {
        self.span = span;
    }

    pub fn span(&self) -> Span {
        self.span
    }

    pub fn handler(&self) -> Option<BlockId> {
        self.handler
    }

    pub fn set_handler(&mut self, handler: Option<BlockId>) {
        self.handler = handler;
    }

    /// Create a block guarded by the current handler
    pub fn create_block(&mut self, label: &str) -> BlockId {
        let block = self.func.create_block(label);
        self.func.block_mut(block).handler = self.handler;
        block
    }

    pub fn is_terminated(&self) -> bool {
        self.func.is_terminated(self.current_block)
    }

    /// Emit an instruction into the current block. Code following a
    /// terminator lands in a fresh block with no predecessors.
    pub fn emit(&mut self, kind: InstrKind, operands: Vec<Operand>) -> InstrId {
        if self.is_terminated() {
            let dead = self.create_block("dead");
            self.current_block = dead;
        }
        self.func.append(self.current_block, kind, operands, self.span)
    }

    /// Emit a terminator unless the block already has one
    pub fn terminate(&mut self, kind: InstrKind, operands: Vec<Operand>) {
        if !self.is_terminated() {
            self.func.append(self.current_block, kind, operands, self.span);
        }
    }

    // ===== Values =====

    pub fn binary(&mut self, op: BinaryOp, lhs: Operand, rhs: Operand) -> Operand {
        self.emit(InstrKind::Binary(op), vec![lhs, rhs]).into()
    }

    pub fn unary(&mut self, op: UnaryOp, value: Operand) -> Operand {
        self.emit(InstrKind::Unary(op), vec![value]).into()
    }

    /// Create a phi in `block`; entries are added as predecessors appear
    pub fn phi(&mut self, block: BlockId, entries: Vec<(BlockId, Operand)>) -> InstrId {
        let (blocks, values): (Vec<BlockId>, Vec<Operand>) = entries.into_iter().unzip();
        let index = self.func.phis(block).len();
        self.func.insert(block, index, InstrKind::Phi(blocks), values, self.span)
    }

    // ===== Storage =====

    /// Allocate a stack slot at the top of the entry block
    pub fn alloc_stack(&mut self, name: &str) -> InstrId {
        let entry = self.func.entry;
        let index = self
            .func
            .block(entry)
            .instrs()
            .iter()
            .take_while(|id| matches!(self.func.instr(**id).kind, InstrKind::AllocStack(_)))
            .count();
        self.func.insert(entry, index, InstrKind::AllocStack(name.to_string()), vec![], self.span)
    }

    pub fn load_stack(&mut self, slot: InstrId) -> Operand {
        self.emit(InstrKind::LoadStack, vec![slot.into()]).into()
    }

    pub fn store_stack(&mut self, slot: InstrId, value: Operand) {
        self.emit(InstrKind::StoreStack, vec![slot.into(), value]);
    }

    pub fn create_scope(&mut self, scope: ScopeId, parent: Option<Operand>) -> Operand {
        self.emit(InstrKind::CreateScope(scope), parent.into_iter().collect()).into()
    }

    pub fn load_frame(&mut self, var: VarId, env: Operand) -> Operand {
        self.emit(InstrKind::LoadFrame(var), vec![env]).into()
    }

    pub fn store_frame(&mut self, var: VarId, env: Operand, value: Operand) {
        self.emit(InstrKind::StoreFrame(var), vec![env, value]);
    }

    pub fn create_closure(&mut self, func: FuncId, env: Option<Operand>) -> Operand {
        self.emit(InstrKind::CreateClosure(func), env.into_iter().collect()).into()
    }

    pub fn call(&mut self, callee: Operand, this: Operand, args: Vec<Operand>) -> Operand {
        let mut operands = vec![callee, this];
        operands.extend(args);
        self.emit(InstrKind::Call { chain: Vec::new() }, operands).into()
    }

    // ===== Control flow =====

    pub fn branch(&mut self, target: BlockId) {
        self.terminate(InstrKind::Branch(target), vec![]);
    }

    pub fn cond_branch(&mut self, cond: Operand, then_block: BlockId, else_block: BlockId) {
        self.terminate(
            InstrKind::CondBranch {
                then_block,
                else_block,
            },
            vec![cond],
        );
    }

    pub fn ret(&mut self, value: Operand) {
        self.terminate(InstrKind::Return, vec![value]);
    }

    pub fn throw(&mut self, value: Operand) {
        self.terminate(InstrKind::Throw, vec![value]);
    }
}
