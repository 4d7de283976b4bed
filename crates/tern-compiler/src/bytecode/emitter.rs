//! LIR → bytecode
//!
//! Blocks are emitted in allocation order. Jumps to blocks not yet placed
//! are recorded and patched once every block position is known; a jump to
//! the block that immediately follows is dropped.

use super::opcode::{Constant, Instr};
use super::{BytecodeFunction, DebugEntry, EnvLayout, ExceptionEntry, SlotInfo};
use crate::constants::ConstantTable;
use crate::error::{CompileError, CompileResult};
use crate::ir::{js, BlockId, InstrKind, IrModule, Literal, ScopeId, Type};
use crate::regalloc::{LirFunction, LirInstr, LirOp, LirOperand, Loc};
use rustc_hash::FxHashMap;
use tracing::debug;

/// Dense numbering of the live environment layouts of a module
#[derive(Debug, Clone, Default)]
pub struct LayoutTable {
    index: FxHashMap<ScopeId, u32>,
    pub layouts: Vec<EnvLayout>,
}

impl LayoutTable {
    pub fn new(module: &IrModule) -> Self {
        let index: FxHashMap<ScopeId, u32> = module
            .live_scopes()
            .enumerate()
            .map(|(i, scope)| (scope.id, i as u32))
            .collect();

        // Environments start out undefined; every store widens the slot
        let mut slot_types: FxHashMap<crate::ir::VarId, Type> = FxHashMap::default();
        for func in &module.functions {
            for id in func.instr_ids() {
                let instr = func.instr(id);
                if let InstrKind::StoreFrame(var) = instr.kind {
                    let ty = instr.operand(1).map_or(Type::ANY, |op| func.operand_type(op));
                    *slot_types.entry(var).or_insert(Type::UNDEFINED) |= ty;
                }
            }
        }

        let layouts = module
            .live_scopes()
            .map(|scope| EnvLayout {
                parent: scope.parent.and_then(|p| index.get(&p).copied()),
                slots: scope
                    .variables
                    .iter()
                    .map(|var| SlotInfo {
                        name: module.variable(*var).name.clone(),
                        ty: slot_types.get(var).copied().unwrap_or(Type::UNDEFINED),
                    })
                    .collect(),
            })
            .collect();
        LayoutTable { index, layouts }
    }

    pub fn layout(&self, scope: ScopeId) -> Option<u32> {
        self.index.get(&scope).copied()
    }
}

/// Emits the functions of one module
pub struct Emitter<'a> {
    module: &'a IrModule,
    constants: &'a ConstantTable,
    layouts: &'a LayoutTable,
    debug_info: bool,
}

/// Per-function emission state
struct FuncCtx {
    instrs: Vec<Instr>,
    debug: Vec<DebugEntry>,
    /// Block start positions (instruction index)
    block_positions: FxHashMap<BlockId, u32>,
    /// Pending jump patches: (instruction position, target block)
    pending_jumps: Vec<(u32, BlockId)>,
    /// Switch case patches: (instruction position, case index or default, target block)
    pending_cases: Vec<(u32, Option<usize>, BlockId)>,
    line: u32,
    column: u32,
}

impl FuncCtx {
    fn position(&self) -> u32 {
        self.instrs.len() as u32
    }

    fn push(&mut self, instr: Instr) -> u32 {
        let pos = self.position();
        self.instrs.push(instr);
        self.debug.push(DebugEntry {
            line: self.line,
            column: self.column,
        });
        pos
    }

    fn record_block(&mut self, block: BlockId) {
        let pos = self.position();
        self.block_positions.insert(block, pos);
    }

    fn record_jump(&mut self, pos: u32, target: BlockId) {
        self.pending_jumps.push((pos, target));
    }

    fn target(&self, block: BlockId) -> Option<u32> {
        self.block_positions.get(&block).copied()
    }

    fn patch_all(&mut self) -> Result<(), String> {
        for &(pos, block) in &self.pending_jumps {
            let target = self.target(block).ok_or_else(|| format!("jump to unplaced block {}", block))?;
            match self.instrs.get_mut(pos as usize) {
                Some(Instr::Jump { target: t })
                | Some(Instr::JumpIfTrue { target: t, .. })
                | Some(Instr::JumpIfFalse { target: t, .. }) => *t = target,
                _ => return Err(format!("no jump at {}", pos)),
            }
        }
        for &(pos, case, block) in &self.pending_cases {
            let target = self.target(block).ok_or_else(|| format!("switch to unplaced block {}", block))?;
            match (self.instrs.get_mut(pos as usize), case) {
                (Some(Instr::Switch { cases, .. }), Some(i)) if i < cases.len() => cases[i].1 = target,
                (Some(Instr::Switch { default, .. }), None) => *default = target,
                _ => return Err(format!("no switch at {}", pos)),
            }
        }
        Ok(())
    }
}

impl<'a> Emitter<'a> {
    pub fn new(module: &'a IrModule, constants: &'a ConstantTable, layouts: &'a LayoutTable, debug_info: bool) -> Self {
        Self {
            module,
            constants,
            layouts,
            debug_info,
        }
    }

    fn error(&self, lir: &LirFunction, message: impl Into<String>) -> CompileError {
        CompileError::internal(lir.name.as_deref().unwrap_or("<anonymous>"), "emit", message)
    }

    pub fn emit_function(&self, lir: &LirFunction) -> CompileResult<BytecodeFunction> {
        let mut ctx = FuncCtx {
            instrs: Vec::with_capacity(lir.instr_count()),
            debug: Vec::new(),
            block_positions: FxHashMap::default(),
            pending_jumps: Vec::new(),
            pending_cases: Vec::new(),
            line: lir.span.line,
            column: lir.span.column,
        };

        let mut ranges: Vec<(u32, u32, BlockId)> = Vec::new();
        for (index, block) in lir.blocks.iter().enumerate() {
            ctx.record_block(block.id);
            let start = ctx.position();
            let next = lir.blocks.get(index + 1).map(|b| b.id);
            for instr in &block.instrs {
                match instr {
                    LirInstr::Move { dst, src } => {
                        if dst != src {
                            ctx.push(Instr::Mov { dst: *dst, src: *src });
                        }
                    }
                    LirInstr::Op(op) => {
                        if op.span != tern_ast::Span::default() {
                            ctx.line = op.span.line;
                            ctx.column = op.span.column;
                        }
                        self.emit_op(lir, &mut ctx, op, next)?;
                    }
                }
            }
            let end = ctx.position();
            if let Some(handler) = block.handler {
                if start < end {
                    ranges.push((start, end, handler));
                }
            }
        }

        ctx.patch_all().map_err(|message| self.error(lir, message))?;

        let mut exception_table: Vec<ExceptionEntry> = Vec::new();
        for (start, end, handler) in ranges {
            let handler = ctx
                .target(handler)
                .ok_or_else(|| self.error(lir, format!("handler {} was not emitted", handler)))?;
            match exception_table.last_mut() {
                Some(last) if last.end == start && last.handler == handler => last.end = end,
                _ => exception_table.push(ExceptionEntry { start, end, handler }),
            }
        }

        let environment = match lir.scope {
            Some(scope) => Some(
                self.layouts
                    .layout(scope)
                    .ok_or_else(|| self.error(lir, format!("function creates dead layout {}", scope)))?,
            ),
            None => None,
        };

        debug!(
            function = lir.name.as_deref().unwrap_or("<anonymous>"),
            instrs = ctx.instrs.len(),
            "emitted bytecode"
        );
        Ok(BytecodeFunction {
            name: lir.name.clone(),
            param_count: lir.param_count,
            kind: lir.kind,
            instrs: ctx.instrs,
            register_count: lir.register_count,
            stack_size: lir.stack_slots,
            exception_table,
            environment,
            debug: if self.debug_info { ctx.debug } else { Vec::new() },
        })
    }

    fn constant(&self, lit: &Literal) -> Constant {
        match lit {
            Literal::Undefined => Constant::Undefined,
            Literal::Null => Constant::Null,
            Literal::Empty => Constant::Empty,
            Literal::Bool(b) => Constant::Bool(*b),
            Literal::Number(n) => Constant::Number(*n),
            Literal::String(s) => Constant::String(self.constants.intern_string(s)),
            Literal::BigInt(n) => Constant::BigInt(self.constants.intern_bigint(n)),
        }
    }

    fn emit_op(&self, lir: &LirFunction, ctx: &mut FuncCtx, op: &LirOp, next: Option<BlockId>) -> CompileResult<()> {
        let arg = |i: usize| -> CompileResult<Loc> {
            match op.args.get(i) {
                Some(LirOperand::Loc(loc)) => Ok(*loc),
                _ => Err(self.error(lir, format!("{} is missing operand {}", op.kind.name(), i))),
            }
        };
        let rest = |from: usize| -> CompileResult<Vec<Loc>> { (from..op.args.len()).map(&arg).collect() };
        let dst = || op.dst.ok_or_else(|| self.error(lir, format!("{} has no destination", op.kind.name())));
        let key = |i: usize| match op.args.get(i) {
            Some(LirOperand::Key(key)) => Some(self.constants.intern_string(key)),
            _ => None,
        };

        let instr = match &op.kind {
            InstrKind::LoadConst(lit) => Instr::LoadConst {
                dst: dst()?,
                value: self.constant(lit),
            },
            InstrKind::LoadParam(index) => Instr::LoadParam {
                dst: dst()?,
                index: *index,
            },
            InstrKind::Mov => Instr::Mov {
                dst: dst()?,
                src: arg(0)?,
            },
            InstrKind::Binary(bin) => {
                let numeric = bin.is_arithmetic() && op.arg_types.iter().all(|ty| ty.is_only(Type::NUMBER));
                let (dst, lhs, rhs) = (dst()?, arg(0)?, arg(1)?);
                if numeric && op.arg_types.len() == 2 {
                    Instr::BinaryN { op: *bin, dst, lhs, rhs }
                } else {
                    Instr::Binary { op: *bin, dst, lhs, rhs }
                }
            }
            InstrKind::Unary(un) => Instr::Unary {
                op: *un,
                dst: dst()?,
                src: arg(0)?,
            },
            InstrKind::ThrowIfEmpty => Instr::CheckInit {
                dst: dst()?,
                src: arg(0)?,
            },
            InstrKind::CatchValue => Instr::CatchValue { dst: dst()? },

            InstrKind::CreateScope(scope) => Instr::CreateEnv {
                dst: dst()?,
                layout: self
                    .layouts
                    .layout(*scope)
                    .ok_or_else(|| self.error(lir, format!("environment of dead layout {}", scope)))?,
                parent: if op.args.is_empty() { None } else { Some(arg(0)?) },
            },
            InstrKind::GetParentScope => Instr::GetParentEnv { dst: dst()? },
            InstrKind::ResolveScope(scope) => {
                let hops = op
                    .hops
                    .ok_or_else(|| self.error(lir, format!("cannot reach layout {} from operand", scope)))?;
                let (dst, env) = (dst()?, arg(0)?);
                if hops == 0 {
                    Instr::Mov { dst, src: env }
                } else {
                    Instr::ResolveEnv { dst, env, hops }
                }
            }
            InstrKind::LoadFrame(var) => Instr::LoadFrame {
                dst: dst()?,
                env: arg(0)?,
                slot: self.slot(lir, *var)?,
            },
            InstrKind::StoreFrame(var) => Instr::StoreFrame {
                env: arg(0)?,
                slot: self.slot(lir, *var)?,
                src: arg(1)?,
            },
            InstrKind::CreateClosure(func) => Instr::CreateClosure {
                dst: dst()?,
                func: func.0,
                env: if op.args.is_empty() { None } else { Some(arg(0)?) },
            },

            InstrKind::LoadGlobal(name) => Instr::LoadGlobal {
                dst: dst()?,
                name: self.constants.intern_string(name),
            },
            InstrKind::TryLoadGlobal(name) => Instr::TryLoadGlobal {
                dst: dst()?,
                name: self.constants.intern_string(name),
            },
            InstrKind::StoreGlobal(name) => Instr::StoreGlobal {
                name: self.constants.intern_string(name),
                src: arg(0)?,
            },
            InstrKind::DeclareGlobal(name) => Instr::DeclareGlobal {
                name: self.constants.intern_string(name),
            },

            InstrKind::LoadProperty => match key(1) {
                Some(key) => Instr::GetById {
                    dst: dst()?,
                    obj: arg(0)?,
                    key,
                },
                None => Instr::GetByVal {
                    dst: dst()?,
                    obj: arg(0)?,
                    key: arg(1)?,
                },
            },
            InstrKind::StoreProperty => match key(1) {
                Some(key) => Instr::PutById {
                    obj: arg(0)?,
                    key,
                    src: arg(2)?,
                },
                None => Instr::PutByVal {
                    obj: arg(0)?,
                    key: arg(1)?,
                    src: arg(2)?,
                },
            },
            InstrKind::DeleteProperty => match key(1) {
                Some(key) => Instr::DeleteById {
                    dst: dst()?,
                    obj: arg(0)?,
                    key,
                },
                None => Instr::DeleteByVal {
                    dst: dst()?,
                    obj: arg(0)?,
                    key: arg(1)?,
                },
            },
            InstrKind::AllocObject => Instr::NewObject { dst: dst()? },
            InstrKind::AllocArray => Instr::NewArray {
                dst: dst()?,
                elements: rest(0)?,
            },

            InstrKind::Call { .. } => Instr::Call {
                dst: dst()?,
                callee: arg(0)?,
                this: arg(1)?,
                args: rest(2)?,
            },
            InstrKind::Construct => Instr::Construct {
                dst: dst()?,
                callee: arg(0)?,
                args: rest(1)?,
            },

            InstrKind::Branch(target) | InstrKind::TryEnd { next: target } => {
                self.jump(ctx, *target, next);
                return Ok(());
            }
            InstrKind::TryStart { body, .. } => {
                // The handler is reached through the exception table only
                self.jump(ctx, *body, next);
                return Ok(());
            }
            InstrKind::CondBranch { then_block, else_block } => {
                let cond = arg(0)?;
                if Some(*then_block) == next {
                    let pos = ctx.push(Instr::JumpIfFalse { cond, target: 0 });
                    ctx.record_jump(pos, *else_block);
                } else {
                    let pos = ctx.push(Instr::JumpIfTrue { cond, target: 0 });
                    ctx.record_jump(pos, *then_block);
                    self.jump(ctx, *else_block, next);
                }
                return Ok(());
            }
            InstrKind::Switch { cases, default } => {
                let value = arg(0)?;
                // A later case equal to an earlier one can never be taken
                let mut kept: Vec<(&Literal, BlockId)> = Vec::with_capacity(cases.len());
                for (lit, target) in cases {
                    if !kept.iter().any(|(seen, _)| js::strict_equals(seen, lit)) {
                        kept.push((lit, *target));
                    }
                }
                let pos = ctx.push(Instr::Switch {
                    value,
                    cases: kept.iter().map(|(lit, _)| (self.constant(lit), 0)).collect(),
                    default: 0,
                });
                for (i, (_, target)) in kept.iter().enumerate() {
                    ctx.pending_cases.push((pos, Some(i), *target));
                }
                ctx.pending_cases.push((pos, None, *default));
                return Ok(());
            }
            InstrKind::Return => Instr::Return { src: arg(0)? },
            InstrKind::Throw => Instr::Throw { src: arg(0)? },
            InstrKind::Unreachable => Instr::Unreachable,

            InstrKind::Phi(_) | InstrKind::AllocStack(_) | InstrKind::LoadStack | InstrKind::StoreStack => {
                return Err(self.error(lir, format!("{} survived register allocation", op.kind.name())));
            }
        };
        ctx.push(instr);
        Ok(())
    }

    fn jump(&self, ctx: &mut FuncCtx, target: BlockId, next: Option<BlockId>) {
        if Some(target) != next {
            let pos = ctx.push(Instr::Jump { target: 0 });
            ctx.record_jump(pos, target);
        }
    }

    fn slot(&self, lir: &LirFunction, var: crate::ir::VarId) -> CompileResult<u32> {
        self.module
            .slot_of(var)
            .filter(|_| self.module.variable(var).is_alive())
            .ok_or_else(|| self.error(lir, format!("variable {} has no slot", var)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::CompilerOptions;
    use crate::infer::infer_module;
    use crate::ir::{BinaryOp, FuncId, FunctionBuilder, IrFunction, Operand};
    use crate::regalloc::allocate;
    use tern_ast::{FunctionKind, Span};

    fn emit(module: &IrModule, debug_info: bool) -> (Vec<BytecodeFunction>, ConstantTable) {
        let options = CompilerOptions::default();
        let constants = ConstantTable::new();
        let layouts = LayoutTable::new(module);
        let emitter = Emitter::new(module, &constants, &layouts, debug_info);
        let functions = module
            .functions
            .iter()
            .map(|func| {
                let (lir, _) = allocate(module, func, &options).unwrap();
                emitter.emit_function(&lir).unwrap()
            })
            .collect();
        (functions, constants)
    }

    #[test]
    fn test_numeric_add_uses_specialized_form() {
        let mut module = IrModule::new("test");
        let mut func = IrFunction::new(FuncId(0), None, 0, FunctionKind::Normal, Span::default());
        {
            let mut b = FunctionBuilder::new(&mut func);
            let x = b.emit(InstrKind::LoadGlobal("x".into()), vec![]);
            let num = b.binary(BinaryOp::Add, Operand::number(1.0), Operand::number(2.0));
            let any = b.binary(BinaryOp::Add, x.into(), num);
            b.ret(any);
        }
        module.functions.push(func);
        infer_module(&mut module);

        let (functions, _) = emit(&module, false);
        let instrs = &functions[0].instrs;
        assert_eq!(instrs.iter().filter(|i| matches!(i, Instr::BinaryN { .. })).count(), 1);
        assert_eq!(instrs.iter().filter(|i| matches!(i, Instr::Binary { .. })).count(), 1);
        assert!(functions[0].debug.is_empty());
    }

    #[test]
    fn test_jumps_are_patched_and_fallthrough_dropped() {
        let mut module = IrModule::new("test");
        let mut func = IrFunction::new(FuncId(0), None, 1, FunctionKind::Normal, Span::default());
        {
            let mut b = FunctionBuilder::new(&mut func);
            let p = b.emit(InstrKind::LoadParam(1), vec![]);
            let then_block = b.create_block("then");
            let else_block = b.create_block("else");
            b.cond_branch(p.into(), then_block, else_block);
            b.switch_to_block(then_block);
            b.ret(Operand::number(1.0));
            b.switch_to_block(else_block);
            b.ret(Operand::number(2.0));
        }
        module.functions.push(func);
        infer_module(&mut module);

        let (functions, _) = emit(&module, true);
        let instrs = &functions[0].instrs;
        let (pos, target) = instrs
            .iter()
            .enumerate()
            .find_map(|(pos, i)| match i {
                Instr::JumpIfTrue { target, .. } | Instr::JumpIfFalse { target, .. } => Some((pos, *target)),
                _ => None,
            })
            .unwrap();
        assert!(target as usize > pos + 1);
        assert!(matches!(instrs[target as usize - 1], Instr::Return { .. }));
        assert!(!instrs.iter().any(|i| matches!(i, Instr::Jump { .. })));
        assert_eq!(functions[0].debug.len(), instrs.len());
    }

    #[test]
    fn test_guarded_blocks_produce_exception_table() {
        let mut module = IrModule::new("test");
        let mut func = IrFunction::new(FuncId(0), None, 0, FunctionKind::Normal, Span::default());
        {
            let mut b = FunctionBuilder::new(&mut func);
            let catch = b.create_block("catch");
            b.set_handler(Some(catch));
            let body = b.create_block("try");
            b.set_handler(None);
            b.terminate(InstrKind::TryStart { body, catch }, vec![]);
            b.switch_to_block(body);
            let f = b.emit(InstrKind::LoadGlobal("risky".into()), vec![]);
            let r = b.call(f.into(), Operand::undefined(), vec![]);
            b.ret(r);
            b.switch_to_block(catch);
            let e = b.emit(InstrKind::CatchValue, vec![]);
            b.ret(e.into());
        }
        module.functions.push(func);
        infer_module(&mut module);

        let (functions, constants) = emit(&module, false);
        let func = &functions[0];
        assert_eq!(func.exception_table.len(), 1);
        let entry = func.exception_table[0];
        assert!(matches!(func.instrs[entry.handler as usize], Instr::CatchValue { .. }));
        assert!(func
            .instrs
            .iter()
            .enumerate()
            .any(|(pc, i)| matches!(i, Instr::Call { .. }) && func.handler_for(pc as u32) == Some(entry.handler)));
        assert_eq!(constants.string(0).as_deref(), Some("risky"));
    }

    #[test]
    fn test_duplicate_switch_case_keeps_first() {
        let mut module = IrModule::new("test");
        let mut func = IrFunction::new(FuncId(0), None, 1, FunctionKind::Normal, Span::default());
        {
            let mut b = FunctionBuilder::new(&mut func);
            let p = b.emit(InstrKind::LoadParam(1), vec![]);
            let first = b.create_block("first");
            let second = b.create_block("second");
            let default = b.create_block("default");
            b.terminate(
                InstrKind::Switch {
                    cases: vec![(Literal::Number(1.0), first), (Literal::Number(1.0), second)],
                    default,
                },
                vec![p.into()],
            );
            for (block, value) in [(first, 1.0), (second, 2.0), (default, 3.0)] {
                b.switch_to_block(block);
                b.ret(Operand::number(value));
            }
        }
        module.functions.push(func);
        infer_module(&mut module);

        let (functions, _) = emit(&module, false);
        let instrs = &functions[0].instrs;
        let Some(Instr::Switch { cases, .. }) = instrs.iter().find(|i| matches!(i, Instr::Switch { .. })) else {
            panic!("no switch emitted");
        };
        assert_eq!(cases.len(), 1);
        assert!(matches!(
            &instrs[cases[0].1 as usize],
            Instr::LoadConst {
                value: Constant::Number(n),
                ..
            } if *n == 1.0
        ));
    }

    #[test]
    fn test_layout_slot_types_union_stores() {
        let mut module = IrModule::new("test");
        let scope = module.add_scope(None, FuncId(0));
        let x = module.add_variable(scope, "x", false);
        let mut func = IrFunction::new(FuncId(0), None, 0, FunctionKind::Normal, Span::default());
        func.scope = Some(scope);
        {
            let mut b = FunctionBuilder::new(&mut func);
            let env = b.create_scope(scope, None);
            b.store_frame(x, env.clone(), Operand::number(1.0));
            b.store_frame(x, env, Operand::string("s"));
            b.ret(Operand::undefined());
        }
        module.functions.push(func);
        infer_module(&mut module);

        let layouts = LayoutTable::new(&module);
        assert_eq!(layouts.layouts.len(), 1);
        let slot = &layouts.layouts[0].slots[0];
        assert_eq!(slot.name, "x");
        assert_eq!(slot.ty, Type::UNDEFINED | Type::NUMBER | Type::STRING);
    }
}
