//! Environment lowering
//!
//! Removes environments nobody uses and splices layouts that lost all of
//! their variables out of the static chain.

use super::{Condition, OptPass, PassContext, NO_DEAD_SCOPES};
use crate::ir::{env_scope, FuncId, InstrId, InstrKind, IrModule, Operand, ScopeId};
use tracing::{debug, trace};

pub struct EnvironmentLowering;

impl OptPass for EnvironmentLowering {
    fn name(&self) -> &'static str {
        "env-lower"
    }

    fn postconditions(&self) -> &'static [Condition] {
        &[NO_DEAD_SCOPES]
    }

    fn run(&self, module: &mut IrModule, _ctx: &PassContext<'_>) -> bool {
        let mut bypassed = 0usize;
        let empty: Vec<ScopeId> = module
            .live_scopes()
            .filter(|scope| scope.variables.is_empty())
            .map(|scope| scope.id)
            .collect();
        for scope in empty {
            if bypass_scope(module, scope) {
                bypassed += 1;
            }
        }

        let mut removed = 0usize;
        for func in module.functions.iter_mut() {
            loop {
                let dead: Vec<InstrId> = func
                    .instr_ids()
                    .into_iter()
                    .filter(|id| {
                        let instr = func.instr(*id);
                        matches!(instr.kind, InstrKind::CreateScope(_)) && !instr.has_users()
                    })
                    .collect();
                if dead.is_empty() {
                    break;
                }
                removed += dead.len();
                for id in dead {
                    func.erase(id);
                }
            }
        }

        if bypassed + removed > 0 {
            debug!(bypassed, removed, "lowered environments");
        }
        bypassed + removed > 0
    }
}

/// Every instruction in the module producing an environment of `scope`
fn env_values(module: &IrModule, scope: ScopeId) -> Vec<(FuncId, InstrId)> {
    module
        .functions
        .iter()
        .flat_map(|func| {
            func.instr_ids()
                .into_iter()
                .filter(move |id| {
                    func.instr(*id).kind.has_result()
                        && env_scope(func, &Operand::Instr(*id)) == Some(scope)
                })
                .map(move |id| (func.id, id))
        })
        .collect()
}

/// Redirect every use of an environment of `scope` to its parent and remove
/// the layout. Returns false, changing nothing, when some use cannot be
/// redirected.
fn bypass_scope(module: &mut IrModule, scope: ScopeId) -> bool {
    let parent = module.scope(scope).parent;
    let values = env_values(module, scope);

    let redirectable = values.iter().all(|&(func_id, id)| {
        let func = module.function(func_id);
        match parent {
            // The chain continues through the creating instruction's operand
            Some(_) => {
                !matches!(func.instr(id).kind, InstrKind::CreateScope(_))
                    || func.instr(id).operand(0).is_some()
            }
            // With nothing above, the environment may only be handed on
            None => func.instr(id).users().iter().all(|user| {
                matches!(
                    func.instr(*user).kind,
                    InstrKind::CreateClosure(_) | InstrKind::CreateScope(_)
                ) || values.contains(&(func_id, *user))
            }),
        }
    });
    if !redirectable {
        return false;
    }

    for &(func_id, id) in &values {
        let func = module.function_mut(func_id);
        match (parent, func.instr(id).kind.clone()) {
            (Some(_), InstrKind::CreateScope(_)) => {
                if let Some(outer) = func.instr(id).operand(0).cloned() {
                    func.replace_all_uses(id, outer);
                    func.erase(id);
                }
            }
            (Some(parent), InstrKind::ResolveScope(_)) => {
                *func.kind_mut(id) = InstrKind::ResolveScope(parent);
            }
            (Some(_), _) => {}
            (None, _) => {
                for user in func.instr(id).users().to_vec() {
                    if matches!(
                        func.instr(user).kind,
                        InstrKind::CreateClosure(_) | InstrKind::CreateScope(_)
                    ) {
                        func.set_operands(user, Vec::new());
                    }
                }
            }
        }
    }
    if parent.is_none() {
        for &(func_id, id) in &values {
            module.function_mut(func_id).erase(id);
        }
    }

    module.remove_scope(scope);
    trace!(scope = %scope, ?parent, "bypassed empty environment");
    true
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::CompilerOptions;
    use crate::ir::{FunctionBuilder, IrFunction};
    use crate::verify::verify_module;
    use tern_ast::{FunctionKind, Span};

    fn run(module: &mut IrModule) -> bool {
        let options = CompilerOptions::default();
        EnvironmentLowering.run(module, &PassContext { options: &options })
    }

    fn has_create_scope(module: &IrModule, func: FuncId) -> bool {
        let func = module.function(func);
        func.instr_ids()
            .into_iter()
            .any(|id| matches!(func.instr(id).kind, InstrKind::CreateScope(_)))
    }

    #[test]
    fn test_unused_environment_is_removed() {
        let mut module = IrModule::new("test");
        let scope = module.add_scope(None, FuncId(0));
        module.add_variable(scope, "x", false);
        let mut main = IrFunction::new(FuncId(0), None, 0, FunctionKind::Normal, Span::default());
        main.scope = Some(scope);
        {
            let mut b = FunctionBuilder::new(&mut main);
            b.create_scope(scope, None);
            b.ret(Operand::undefined());
        }
        module.functions.push(main);
        assert!(run(&mut module));
        assert!(!has_create_scope(&module, FuncId(0)));
        // The layout still has a variable
        assert!(module.scope(scope).is_alive());
    }

    #[test]
    fn test_empty_middle_scope_is_bypassed() {
        // outer { x } -> middle {} -> inner closure reading x
        let mut module = IrModule::new("test");
        let outer = module.add_scope(None, FuncId(0));
        let x = module.add_variable(outer, "x", false);
        let middle = module.add_scope(Some(outer), FuncId(1));

        let mut main = IrFunction::new(FuncId(0), None, 0, FunctionKind::Normal, Span::default());
        main.scope = Some(outer);
        {
            let mut b = FunctionBuilder::new(&mut main);
            let env = b.create_scope(outer, None);
            b.store_frame(x, env.clone(), Operand::number(1.0));
            let f = b.create_closure(FuncId(1), Some(env));
            b.ret(f);
        }
        let mut mid = IrFunction::new(FuncId(1), None, 0, FunctionKind::Normal, Span::default());
        mid.scope = Some(middle);
        mid.parent_scope = Some(outer);
        {
            let mut b = FunctionBuilder::new(&mut mid);
            let parent = b.emit(InstrKind::GetParentScope, vec![]);
            let env = b.create_scope(middle, Some(parent.into()));
            let g = b.create_closure(FuncId(2), Some(env));
            b.ret(g);
        }
        let mut inner = IrFunction::new(FuncId(2), None, 0, FunctionKind::Normal, Span::default());
        inner.parent_scope = Some(middle);
        {
            let mut b = FunctionBuilder::new(&mut inner);
            let parent = b.emit(InstrKind::GetParentScope, vec![]);
            let env = b.emit(InstrKind::ResolveScope(outer), vec![parent.into()]);
            let v = b.load_frame(x, env.into());
            b.ret(v);
        }
        module.functions.extend([main, mid, inner]);

        assert!(run(&mut module));
        assert!(!module.scope(middle).is_alive());
        assert_eq!(module.function(FuncId(2)).parent_scope, Some(outer));
        assert_eq!(module.function(FuncId(1)).scope, None);
        assert!(!has_create_scope(&module, FuncId(1)));
        verify_module(&module, "env-lower").unwrap();
    }

    #[test]
    fn test_empty_root_scope_drops_closure_environment() {
        let mut module = IrModule::new("test");
        let scope = module.add_scope(None, FuncId(0));
        let mut main = IrFunction::new(FuncId(0), None, 0, FunctionKind::Normal, Span::default());
        main.scope = Some(scope);
        {
            let mut b = FunctionBuilder::new(&mut main);
            let env = b.create_scope(scope, None);
            let f = b.create_closure(FuncId(1), Some(env));
            b.ret(f);
        }
        let mut inner = IrFunction::new(FuncId(1), None, 0, FunctionKind::Normal, Span::default());
        inner.parent_scope = Some(scope);
        FunctionBuilder::new(&mut inner).ret(Operand::undefined());
        module.functions.extend([main, inner]);

        assert!(run(&mut module));
        assert_eq!(module.function(FuncId(1)).parent_scope, None);
        let main = module.function(FuncId(0));
        let closure = main
            .instr_ids()
            .into_iter()
            .find(|id| matches!(main.instr(*id).kind, InstrKind::CreateClosure(_)))
            .unwrap();
        assert!(main.instr(closure).operands().is_empty());
        verify_module(&module, "env-lower").unwrap();
    }
}
