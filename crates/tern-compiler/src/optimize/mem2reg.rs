//! Scalar promotion
//!
//! Two steps. Environment variables that only their declaring function
//! touches, always through the environment it created, are demoted to
//! stack slots. Stack slots whose every use is a plain load or store are
//! then rewritten into SSA values: phis go at the iterated dominance
//! frontier of the stores and a dominator-tree walk renames the loads.
//!
//! A slot stored in a guarded block and loaded anywhere reachable from that
//! block's handler stays in memory: the handler can observe any of the
//! intermediate stores, which plain SSA renaming cannot express.

use super::dce::remove_unreachable_blocks;
use super::{for_each_function, OptPass, PassContext};
use crate::analysis::{Cfg, DomTree};
use crate::ir::{BlockId, FuncId, InstrId, InstrKind, IrFunction, IrModule, Literal, Operand, ScopeId, VarId};
use rustc_hash::{FxHashMap, FxHashSet};
use tracing::{debug, trace};

pub struct ScalarPromotion;

impl OptPass for ScalarPromotion {
    fn name(&self) -> &'static str {
        "mem2reg"
    }

    fn run(&self, module: &mut IrModule, ctx: &PassContext<'_>) -> bool {
        let demoted = demote_environment_variables(module);
        let promoted = for_each_function(&mut module.functions, ctx.parallel(), promote_function);
        demoted | promoted
    }
}

// ===== Environment demotion =====

#[derive(Default)]
struct VarAccess {
    /// (function, instruction) of every LoadFrame/StoreFrame
    sites: Vec<(FuncId, InstrId)>,
    /// Every access goes straight through a `CreateScope` result
    direct: bool,
    /// The `CreateScope` instructions used
    envs: FxHashSet<(FuncId, InstrId)>,
}

fn demote_environment_variables(module: &mut IrModule) -> bool {
    // How many instances of each layout exist
    let mut creations: FxHashMap<ScopeId, usize> = FxHashMap::default();
    let mut accesses: FxHashMap<VarId, VarAccess> = FxHashMap::default();
    for func in &module.functions {
        for id in func.instr_ids() {
            let instr = func.instr(id);
            match instr.kind {
                InstrKind::CreateScope(scope) => *creations.entry(scope).or_default() += 1,
                InstrKind::LoadFrame(var) | InstrKind::StoreFrame(var) => {
                    let access = accesses.entry(var).or_insert_with(|| VarAccess {
                        direct: true,
                        ..Default::default()
                    });
                    access.sites.push((func.id, id));
                    let env = instr.operand(0).and_then(Operand::as_instr).filter(|env| {
                        matches!(func.instr(*env).kind, InstrKind::CreateScope(s) if s == module.variable(var).scope)
                    });
                    match env {
                        Some(env) => {
                            access.envs.insert((func.id, env));
                        }
                        None => access.direct = false,
                    }
                }
                _ => {}
            }
        }
    }

    let mut demoted = 0usize;
    let mut vars: Vec<VarId> = accesses.keys().copied().collect();
    vars.sort();
    for var in vars {
        let access = &accesses[&var];
        let scope = module.variable(var).scope;
        if !access.direct
            || access.envs.len() != 1
            || creations.get(&scope).copied() != Some(1)
        {
            continue;
        }
        let Some(&(func_id, env)) = access.envs.iter().next() else {
            continue;
        };
        let name = module.variable(var).name.clone();
        let func = module.function_mut(func_id);
        demote(func, env, &name, &access.sites);
        module.remove_variable(var);
        demoted += 1;
        trace!(function = module.function(func_id).display_name(), variable = %name, "demoted environment variable");
    }
    if demoted > 0 {
        debug!(demoted, "environment variables demoted to stack slots");
    }
    demoted > 0
}

fn demote(func: &mut IrFunction, env: InstrId, name: &str, sites: &[(FuncId, InstrId)]) {
    let entry = func.entry;
    let index = func
        .block(entry)
        .instrs()
        .iter()
        .take_while(|id| matches!(func.instr(**id).kind, InstrKind::AllocStack(_)))
        .count();
    let span = func.instr(env).span;
    let slot = func.insert(entry, index, InstrKind::AllocStack(name.to_string()), vec![], span);
    // Environment slots start out undefined
    func.insert_after(env, InstrKind::StoreStack, vec![slot.into(), Operand::undefined()]);

    for &(_, site) in sites {
        match func.instr(site).kind {
            InstrKind::LoadFrame(_) => {
                let load = func.insert_before(site, InstrKind::LoadStack, vec![slot.into()]);
                func.replace_all_uses(site, load.into());
                func.erase(site);
            }
            _ => {
                let value = func
                    .instr(site)
                    .operand(1)
                    .cloned()
                    .unwrap_or_else(Operand::undefined);
                func.insert_before(site, InstrKind::StoreStack, vec![slot.into(), value]);
                func.erase(site);
            }
        }
    }
}

// ===== SSA promotion =====

/// Slots whose every use is a direct load or store of the slot itself
fn promotable_slots(func: &IrFunction) -> Vec<InstrId> {
    func.instr_ids()
        .into_iter()
        .filter(|id| matches!(func.instr(*id).kind, InstrKind::AllocStack(_)))
        .filter(|slot| {
            let this = Operand::Instr(*slot);
            func.instr(*slot).users().iter().all(|user| {
                let user = func.instr(*user);
                match user.kind {
                    InstrKind::LoadStack => true,
                    InstrKind::StoreStack => {
                        user.operand(0) == Some(&this) && user.operand(1) != Some(&this)
                    }
                    _ => false,
                }
            })
        })
        .collect()
}

/// Blocks reachable from `start` along normal and exceptional edges
fn reachable_with_handlers(cfg: &Cfg, start: BlockId) -> FxHashSet<BlockId> {
    let mut seen = FxHashSet::default();
    let mut work = vec![start];
    while let Some(block) = work.pop() {
        if seen.insert(block) {
            work.extend(cfg.edges(block).into_iter().map(|(succ, _)| succ));
        }
    }
    seen
}

/// Is some intermediate store observable from a catch handler?
fn observed_by_handler(
    func: &IrFunction,
    cfg: &Cfg,
    slot: InstrId,
    cache: &mut FxHashMap<BlockId, FxHashSet<BlockId>>,
) -> bool {
    let users = func.instr(slot).users();
    let loads: Vec<BlockId> = users
        .iter()
        .filter(|u| matches!(func.instr(**u).kind, InstrKind::LoadStack))
        .map(|u| func.instr(*u).block())
        .collect();
    users
        .iter()
        .filter(|u| matches!(func.instr(**u).kind, InstrKind::StoreStack))
        .filter_map(|u| func.block(func.instr(*u).block()).handler)
        .any(|handler| {
            let reach = cache
                .entry(handler)
                .or_insert_with(|| reachable_with_handlers(cfg, handler));
            loads.iter().any(|b| reach.contains(b))
        })
}

fn promote_function(func: &mut IrFunction) -> bool {
    let changed = remove_unreachable_blocks(func);
    let (cfg, dom) = DomTree::compute(func);

    let mut cache = FxHashMap::default();
    let mut slots: Vec<InstrId> = promotable_slots(func)
        .into_iter()
        .filter(|slot| !observed_by_handler(func, &cfg, *slot, &mut cache))
        .collect();
    if slots.is_empty() {
        return changed;
    }
    slots.sort();
    let index: FxHashMap<InstrId, usize> = slots.iter().enumerate().map(|(i, s)| (*s, i)).collect();

    // Phi placement
    let frontiers = dom.frontiers(&cfg);
    let mut phis: FxHashMap<(BlockId, usize), InstrId> = FxHashMap::default();
    for (k, &slot) in slots.iter().enumerate() {
        let mut defs: Vec<BlockId> = func
            .instr(slot)
            .users()
            .iter()
            .filter(|u| matches!(func.instr(**u).kind, InstrKind::StoreStack))
            .map(|u| func.instr(*u).block())
            .collect();
        defs.sort();
        defs.dedup();
        for block in dom.iterated_frontier(&frontiers, &defs) {
            let span = func.instr(slot).span;
            let position = func.phis(block).len();
            let phi = func.insert(block, position, InstrKind::Phi(Vec::new()), vec![], span);
            phis.insert((block, k), phi);
        }
    }

    // Renaming over the dominator tree
    let mut stack: Vec<(BlockId, Vec<Operand>)> =
        vec![(func.entry, vec![Operand::Literal(Literal::Undefined); slots.len()])];
    while let Some((block, mut current)) = stack.pop() {
        for (k, value) in current.iter_mut().enumerate() {
            if let Some(phi) = phis.get(&(block, k)) {
                *value = Operand::Instr(*phi);
            }
        }
        for id in func.block(block).instrs().to_vec() {
            let instr = func.instr(id);
            let slot = instr.operand(0).and_then(Operand::as_instr);
            let Some(&k) = slot.and_then(|s| index.get(&s)) else {
                continue;
            };
            let is_load = matches!(instr.kind, InstrKind::LoadStack);
            let stored = instr.operand(1).cloned();
            if is_load {
                func.replace_all_uses(id, current[k].clone());
            } else if let Some(value) = stored {
                current[k] = value;
            }
            func.erase(id);
        }
        let mut succs = func.successors(block);
        succs.sort();
        succs.dedup();
        for succ in succs {
            for (k, value) in current.iter().enumerate() {
                if let Some(&phi) = phis.get(&(succ, k)) {
                    func.add_phi_entry(phi, block, value.clone());
                }
            }
        }
        for &child in dom.children(block) {
            stack.push((child, current.clone()));
        }
    }

    for slot in &slots {
        func.erase(*slot);
    }
    trace!(function = func.display_name(), promoted = slots.len(), "promoted stack slots");
    true
}
