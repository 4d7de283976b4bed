//! Reference interpreter for bytecode modules
//!
//! Executes a [`BytecodeModule`] the way a production engine would, with
//! one twist: every caller-saved register is poisoned after a call, so code
//! that keeps a value live across a call in the wrong register fails loudly
//! instead of reading stale data.

use crate::value::{
    delete_property, get_property, has_property, set_property, EnvRef, Environment, ErrorKind, Native, Object,
    ObjectKind, ObjectRef, Value,
};
use rustc_hash::FxHashMap;
use std::cell::RefCell;
use std::rc::Rc;
use tern_compiler::bytecode::{BytecodeFunction, BytecodeModule, Constant, Instr};
use tern_compiler::ir::{js, BinaryOp, Literal, UnaryOp};
use tern_compiler::Loc;
use thiserror::Error;
use tracing::{debug, trace};

/// Failures of the interpreter itself; JavaScript exceptions are values
#[derive(Debug, Clone, PartialEq, Error)]
pub enum VmError {
    /// The bytecode broke an invariant the compiler guarantees
    #[error("Internal error in '{function}' at {pc}: {message}")]
    Internal { function: String, pc: usize, message: String },

    #[error("Stack overflow")]
    StackOverflow,

    #[error("Instruction budget exhausted")]
    OutOfFuel,
}

pub type VmResult<T> = Result<T, VmError>;

/// Interpreter limits
#[derive(Debug, Clone, Copy)]
pub struct VmLimits {
    pub max_call_depth: usize,
    /// Instructions to execute before giving up
    pub fuel: u64,
}

impl Default for VmLimits {
    fn default() -> Self {
        Self {
            max_call_depth: 256,
            fuel: 5_000_000,
        }
    }
}

/// What running a program produced
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunOutput {
    /// One entry per `print` call
    pub output: Vec<String>,
    /// The uncaught exception, as `print` would show it
    pub uncaught: Option<String>,
}

/// Abrupt completion of an instruction
enum Abrupt {
    Throw(Value),
    Fatal(VmError),
}

impl From<VmError> for Abrupt {
    fn from(err: VmError) -> Self {
        Abrupt::Fatal(err)
    }
}

type Flow<T> = Result<T, Abrupt>;

struct Frame<'m> {
    func: &'m BytecodeFunction,
    registers: Vec<Value>,
    stack: Vec<Value>,
    this: Value,
    args: Vec<Value>,
    env: Option<EnvRef>,
    /// Exception being handled
    exception: Option<Value>,
    pc: usize,
}

pub struct Vm<'m> {
    module: &'m BytecodeModule,
    limits: VmLimits,
    globals: FxHashMap<String, Value>,
    /// `prototype` objects of the built-in error constructors
    error_protos: FxHashMap<&'static str, ObjectRef>,
    output: Vec<String>,
    depth: usize,
    fuel: u64,
}

impl<'m> Vm<'m> {
    pub fn new(module: &'m BytecodeModule) -> Self {
        Self::with_limits(module, VmLimits::default())
    }

    pub fn with_limits(module: &'m BytecodeModule, limits: VmLimits) -> Self {
        let mut vm = Vm {
            module,
            limits,
            globals: FxHashMap::default(),
            error_protos: FxHashMap::default(),
            output: Vec::new(),
            depth: 0,
            fuel: limits.fuel,
        };
        vm.install_builtins();
        vm
    }

    fn install_builtins(&mut self) {
        let print = Object::new(ObjectKind::Native(Native::Print), None);
        self.globals.insert("print".to_string(), Value::Object(print));
        for kind in ErrorKind::ALL {
            let proto = Object::new(ObjectKind::Plain, None);
            set_property(&proto, "name", Value::string(kind.name()));
            set_property(&proto, "message", Value::string(""));
            let ctor = Object::new(ObjectKind::Native(Native::ErrorConstructor(kind)), None);
            set_property(&ctor, "prototype", Value::Object(proto.clone()));
            self.error_protos.insert(kind.name(), proto);
            self.globals.insert(kind.name().to_string(), Value::Object(ctor));
        }
        self.globals.insert("NaN".to_string(), Value::Number(f64::NAN));
        self.globals.insert("Infinity".to_string(), Value::Number(f64::INFINITY));
    }

    /// Run function 0 to completion
    pub fn run(mut self) -> VmResult<RunOutput> {
        let main = self.function(0)?;
        debug!(module = %self.module.name, "running module");
        let uncaught = match self.call_bytecode(main, Value::Undefined, Vec::new(), None) {
            Ok(_) => None,
            Err(Abrupt::Throw(value)) => Some(value.display()),
            Err(Abrupt::Fatal(err)) => return Err(err),
        };
        Ok(RunOutput {
            output: self.output,
            uncaught,
        })
    }

    fn function(&self, index: u32) -> VmResult<&'m BytecodeFunction> {
        self.module
            .functions
            .get(index as usize)
            .ok_or_else(|| VmError::Internal {
                function: self.module.name.clone(),
                pc: 0,
                message: format!("no function #{}", index),
            })
    }

    fn error(&self, kind: ErrorKind, message: impl Into<String>) -> Abrupt {
        let proto = self.error_protos.get(kind.name()).cloned();
        let error = Object::new(ObjectKind::Plain, proto);
        set_property(&error, "message", Value::string(message.into()));
        Abrupt::Throw(Value::Object(error))
    }

    // ========================================================================
    // Calls
    // ========================================================================

    fn call_value(&mut self, callee: &Value, this: Value, args: Vec<Value>) -> Flow<Value> {
        let Some(object) = callee.as_object() else {
            return Err(self.error(ErrorKind::TypeError, format!("{} is not a function", callee.display())));
        };
        let target = match &object.borrow().kind {
            ObjectKind::Closure { func, env } => Ok((*func, env.clone())),
            ObjectKind::Native(native) => Err(Some(*native)),
            _ => Err(None),
        };
        match target {
            Ok((func, env)) => {
                let func = self.function(func)?;
                self.call_bytecode(func, this, args, env)
            }
            Err(Some(native)) => self.call_native(native, args),
            Err(None) => Err(self.error(ErrorKind::TypeError, "object is not a function")),
        }
    }

    fn construct(&mut self, callee: &Value, args: Vec<Value>) -> Flow<Value> {
        let constructible = callee.as_object().is_some_and(|obj| match &obj.borrow().kind {
            ObjectKind::Closure { func, .. } => self
                .module
                .functions
                .get(*func as usize)
                .is_some_and(|f| f.kind != tern_ast::FunctionKind::Arrow),
            ObjectKind::Native(Native::ErrorConstructor(_)) => true,
            _ => false,
        });
        let Some(ctor) = callee.as_object().filter(|_| constructible) else {
            return Err(self.error(ErrorKind::TypeError, format!("{} is not a constructor", callee.display())));
        };
        let proto = get_property(ctor, "prototype").and_then(|p| p.as_object().cloned());
        if let ObjectKind::Native(native) = ctor.borrow().kind {
            return self.call_native(native, args);
        }
        let instance = Value::Object(Object::new(ObjectKind::Plain, proto));
        let result = self.call_value(callee, instance.clone(), args)?;
        Ok(if result.as_object().is_some() { result } else { instance })
    }

    fn call_native(&mut self, native: Native, args: Vec<Value>) -> Flow<Value> {
        match native {
            Native::Print => {
                let line = args.iter().map(Value::display).collect::<Vec<_>>().join(" ");
                trace!(%line, "print");
                self.output.push(line);
                Ok(Value::Undefined)
            }
            Native::ErrorConstructor(kind) => {
                let message = args.first().map(Value::display).unwrap_or_default();
                match self.error(kind, message) {
                    Abrupt::Throw(error) => Ok(error),
                    fatal => Err(fatal),
                }
            }
        }
    }

    fn call_bytecode(
        &mut self,
        func: &'m BytecodeFunction,
        this: Value,
        args: Vec<Value>,
        env: Option<EnvRef>,
    ) -> Flow<Value> {
        if self.depth >= self.limits.max_call_depth {
            return Err(VmError::StackOverflow.into());
        }
        self.depth += 1;
        let mut frame = Frame {
            func,
            registers: vec![Value::Undefined; self.module.register_file as usize],
            stack: vec![Value::Undefined; func.stack_size as usize],
            this,
            args,
            env,
            exception: None,
            pc: 0,
        };
        let result = self.execute(&mut frame);
        self.depth -= 1;
        result
    }

    // ========================================================================
    // Execution
    // ========================================================================

    fn execute(&mut self, frame: &mut Frame<'m>) -> Flow<Value> {
        loop {
            if self.fuel == 0 {
                return Err(VmError::OutOfFuel.into());
            }
            self.fuel -= 1;
            let pc = frame.pc;
            match self.step(frame) {
                Ok(Some(value)) => return Ok(value),
                Ok(None) => {}
                Err(Abrupt::Throw(value)) => match frame.func.handler_for(pc as u32) {
                    Some(handler) => {
                        frame.exception = Some(value);
                        frame.pc = handler as usize;
                    }
                    None => return Err(Abrupt::Throw(value)),
                },
                Err(fatal) => return Err(fatal),
            }
        }
    }

    fn internal(&self, frame: &Frame<'m>, message: impl Into<String>) -> Abrupt {
        Abrupt::Fatal(VmError::Internal {
            function: frame.func.display_name().to_string(),
            pc: frame.pc,
            message: message.into(),
        })
    }

    fn read(&self, frame: &Frame<'m>, loc: Loc) -> Flow<Value> {
        let value = match loc {
            Loc::Reg(r) => frame.registers.get(r as usize),
            Loc::Stack(s) => frame.stack.get(s as usize),
        };
        match value {
            Some(Value::Clobbered) => Err(self.internal(frame, format!("read of clobbered register {}", loc))),
            Some(value) => Ok(value.clone()),
            None => Err(self.internal(frame, format!("{} out of range", loc))),
        }
    }

    fn write(&self, frame: &mut Frame<'m>, loc: Loc, value: Value) -> Flow<()> {
        let slot = match loc {
            Loc::Reg(r) => frame.registers.get_mut(r as usize),
            Loc::Stack(s) => frame.stack.get_mut(s as usize),
        };
        match slot {
            Some(slot) => {
                *slot = value;
                Ok(())
            }
            None => Err(self.internal(frame, format!("{} out of range", loc))),
        }
    }

    fn read_all(&self, frame: &Frame<'m>, locs: &[Loc]) -> Flow<Vec<Value>> {
        locs.iter().map(|loc| self.read(frame, *loc)).collect()
    }

    fn string(&self, frame: &Frame<'m>, index: u32) -> Flow<&'m str> {
        self.module
            .string(index)
            .ok_or_else(|| self.internal(frame, format!("string #{} out of range", index)))
    }

    fn env(&self, frame: &Frame<'m>, loc: Loc) -> Flow<EnvRef> {
        match self.read(frame, loc)? {
            Value::Env(env) => Ok(env),
            other => Err(self.internal(frame, format!("{} holds {:?}, not an environment", loc, other))),
        }
    }

    fn constant(&self, frame: &Frame<'m>, constant: &Constant) -> Flow<Value> {
        Ok(match constant {
            Constant::Undefined => Value::Undefined,
            Constant::Null => Value::Null,
            Constant::Empty => Value::Empty,
            Constant::Bool(b) => Value::Bool(*b),
            Constant::Number(n) => Value::Number(*n),
            Constant::String(i) => Value::string(self.string(frame, *i)?),
            Constant::BigInt(i) => match self.module.bigints.get(*i as usize) {
                Some(b) => Value::BigInt(Rc::new(b.clone())),
                None => return Err(self.internal(frame, format!("bigint #{} out of range", i))),
            },
        })
    }

    /// Execute one instruction; `Some` when the function returned
    fn step(&mut self, frame: &mut Frame<'m>) -> Flow<Option<Value>> {
        let func = frame.func;
        let Some(instr) = func.instrs.get(frame.pc) else {
            return Err(self.internal(frame, "fell off the end of the function"));
        };
        frame.pc += 1;
        match instr {
            Instr::LoadConst { dst, value } => {
                let value = self.constant(frame, value)?;
                self.write(frame, *dst, value)?;
            }
            Instr::LoadParam { dst, index } => {
                let value = match *index {
                    0 => frame.this.clone(),
                    i => frame.args.get(i as usize - 1).cloned().unwrap_or(Value::Undefined),
                };
                self.write(frame, *dst, value)?;
            }
            Instr::Mov { dst, src } => {
                let value = self.read(frame, *src)?;
                self.write(frame, *dst, value)?;
            }
            Instr::Binary { op, dst, lhs, rhs } => {
                let a = self.read(frame, *lhs)?;
                let b = self.read(frame, *rhs)?;
                let value = self.binary(*op, &a, &b)?;
                self.write(frame, *dst, value)?;
            }
            Instr::BinaryN { op, dst, lhs, rhs } => {
                let (Value::Number(_), Value::Number(_)) = (self.read(frame, *lhs)?, self.read(frame, *rhs)?) else {
                    return Err(self.internal(frame, "numeric instruction on a non-number operand"));
                };
                let a = self.read(frame, *lhs)?;
                let b = self.read(frame, *rhs)?;
                let value = self.binary(*op, &a, &b)?;
                self.write(frame, *dst, value)?;
            }
            Instr::Unary { op, dst, src } => {
                let value = self.read(frame, *src)?;
                let result = self.unary(*op, &value)?;
                self.write(frame, *dst, result)?;
            }
            Instr::CheckInit { dst, src } => {
                let value = self.read(frame, *src)?;
                if matches!(value, Value::Empty) {
                    return Err(self.error(ErrorKind::ReferenceError, "Cannot access variable before initialization"));
                }
                self.write(frame, *dst, value)?;
            }

            Instr::CreateEnv { dst, layout, parent } => {
                let Some(layout) = self.module.layouts.get(*layout as usize) else {
                    return Err(self.internal(frame, format!("layout #{} out of range", layout)));
                };
                let parent = match parent {
                    Some(loc) => Some(self.env(frame, *loc)?),
                    None => None,
                };
                let env = Environment {
                    slots: vec![Value::Undefined; layout.slots.len()],
                    parent,
                };
                self.write(frame, *dst, Value::Env(Rc::new(RefCell::new(env))))?;
            }
            Instr::GetParentEnv { dst } => {
                let Some(env) = frame.env.clone() else {
                    return Err(self.internal(frame, "function has no captured environment"));
                };
                self.write(frame, *dst, Value::Env(env))?;
            }
            Instr::ResolveEnv { dst, env, hops } => {
                let mut current = self.env(frame, *env)?;
                for _ in 0..*hops {
                    let parent = current.borrow().parent.clone();
                    current = match parent {
                        Some(parent) => parent,
                        None => return Err(self.internal(frame, "environment chain too short")),
                    };
                }
                self.write(frame, *dst, Value::Env(current))?;
            }
            Instr::LoadFrame { dst, env, slot } => {
                let env = self.env(frame, *env)?;
                let value = env.borrow().slots.get(*slot as usize).cloned();
                match value {
                    Some(value) => self.write(frame, *dst, value)?,
                    None => return Err(self.internal(frame, format!("environment slot {} out of range", slot))),
                }
            }
            Instr::StoreFrame { env, slot, src } => {
                let env = self.env(frame, *env)?;
                let value = self.read(frame, *src)?;
                let mut env = env.borrow_mut();
                match env.slots.get_mut(*slot as usize) {
                    Some(target) => *target = value,
                    None => return Err(self.internal(frame, format!("environment slot {} out of range", slot))),
                }
            }
            Instr::CreateClosure { dst, func: index, env } => {
                let env = match env {
                    Some(loc) => Some(self.env(frame, *loc)?),
                    None => None,
                };
                let target = self.function(*index)?;
                let closure = Object::new(ObjectKind::Closure { func: *index, env }, None);
                if target.kind != tern_ast::FunctionKind::Arrow {
                    let proto = Object::new(ObjectKind::Plain, None);
                    set_property(&closure, "prototype", Value::Object(proto));
                }
                self.write(frame, *dst, Value::Object(closure))?;
            }

            Instr::LoadGlobal { dst, name } => {
                let name = self.string(frame, *name)?;
                let Some(value) = self.globals.get(name).cloned() else {
                    return Err(self.error(ErrorKind::ReferenceError, format!("{} is not defined", name)));
                };
                self.write(frame, *dst, value)?;
            }
            Instr::TryLoadGlobal { dst, name } => {
                let name = self.string(frame, *name)?;
                let value = self.globals.get(name).cloned().unwrap_or(Value::Undefined);
                self.write(frame, *dst, value)?;
            }
            Instr::StoreGlobal { name, src } => {
                let name = self.string(frame, *name)?;
                let value = self.read(frame, *src)?;
                self.globals.insert(name.to_string(), value);
            }
            Instr::DeclareGlobal { name } => {
                let name = self.string(frame, *name)?;
                self.globals.entry(name.to_string()).or_insert(Value::Undefined);
            }

            Instr::NewObject { dst } => {
                let object = Object::new(ObjectKind::Plain, None);
                self.write(frame, *dst, Value::Object(object))?;
            }
            Instr::NewArray { dst, elements } => {
                let elements = self.read_all(frame, elements)?;
                let array = Object::new(ObjectKind::Array(elements), None);
                self.write(frame, *dst, Value::Object(array))?;
            }
            Instr::GetById { dst, obj, key } => {
                let object = self.read(frame, *obj)?;
                let key = self.string(frame, *key)?;
                let value = self.get(&object, key)?;
                self.write(frame, *dst, value)?;
            }
            Instr::GetByVal { dst, obj, key } => {
                let object = self.read(frame, *obj)?;
                let key = self.read(frame, *key)?.to_property_key();
                let value = self.get(&object, &key)?;
                self.write(frame, *dst, value)?;
            }
            Instr::PutById { obj, key, src } => {
                let object = self.read(frame, *obj)?;
                let key = self.string(frame, *key)?;
                let value = self.read(frame, *src)?;
                self.put(&object, key, value)?;
            }
            Instr::PutByVal { obj, key, src } => {
                let object = self.read(frame, *obj)?;
                let key = self.read(frame, *key)?.to_property_key();
                let value = self.read(frame, *src)?;
                self.put(&object, &key, value)?;
            }
            Instr::DeleteById { dst, obj, key } => {
                let object = self.read(frame, *obj)?;
                let key = self.string(frame, *key)?;
                let result = self.delete(&object, key)?;
                self.write(frame, *dst, result)?;
            }
            Instr::DeleteByVal { dst, obj, key } => {
                let object = self.read(frame, *obj)?;
                let key = self.read(frame, *key)?.to_property_key();
                let result = self.delete(&object, &key)?;
                self.write(frame, *dst, result)?;
            }

            Instr::Call { dst, callee, this, args } => {
                let callee = self.read(frame, *callee)?;
                let this = self.read(frame, *this)?;
                let args = self.read_all(frame, args)?;
                let result = self.call_value(&callee, this, args);
                self.clobber(frame);
                self.write(frame, *dst, result?)?;
            }
            Instr::Construct { dst, callee, args } => {
                let callee = self.read(frame, *callee)?;
                let args = self.read_all(frame, args)?;
                let result = self.construct(&callee, args);
                self.clobber(frame);
                self.write(frame, *dst, result?)?;
            }
            Instr::CatchValue { dst } => {
                let value = frame.exception.clone().unwrap_or(Value::Undefined);
                self.write(frame, *dst, value)?;
            }

            Instr::Jump { target } => frame.pc = *target as usize,
            Instr::JumpIfTrue { cond, target } => {
                if self.read(frame, *cond)?.truthy() {
                    frame.pc = *target as usize;
                }
            }
            Instr::JumpIfFalse { cond, target } => {
                if !self.read(frame, *cond)?.truthy() {
                    frame.pc = *target as usize;
                }
            }
            Instr::Switch { value, cases, default } => {
                let value = self.read(frame, *value)?;
                let mut target = *default;
                for (constant, case_target) in cases {
                    if self.constant(frame, constant)?.strict_equals(&value) {
                        target = *case_target;
                        break;
                    }
                }
                frame.pc = target as usize;
            }
            Instr::Return { src } => return Ok(Some(self.read(frame, *src)?)),
            Instr::Throw { src } => return Err(Abrupt::Throw(self.read(frame, *src)?)),
            Instr::Unreachable => return Err(self.internal(frame, "reached unreachable code")),
        }
        Ok(None)
    }

    /// Poison the registers a call may clobber
    fn clobber(&self, frame: &mut Frame<'m>) {
        let count = (self.module.caller_saved as usize).min(frame.registers.len());
        for register in &mut frame.registers[..count] {
            *register = Value::Clobbered;
        }
    }

    // ========================================================================
    // Operators
    // ========================================================================

    fn binary(&self, op: BinaryOp, a: &Value, b: &Value) -> Flow<Value> {
        match op {
            BinaryOp::StrictEq => return Ok(Value::Bool(a.strict_equals(b))),
            BinaryOp::StrictNotEq => return Ok(Value::Bool(!a.strict_equals(b))),
            BinaryOp::Eq => return Ok(Value::Bool(a.loose_equals(b))),
            BinaryOp::NotEq => return Ok(Value::Bool(!a.loose_equals(b))),
            BinaryOp::InstanceOf => return self.instance_of(a, b),
            BinaryOp::In => {
                let Some(object) = b.as_object() else {
                    return Err(self.error(ErrorKind::TypeError, "Cannot use 'in' operator on a primitive"));
                };
                return Ok(Value::Bool(has_property(object, &a.to_property_key())));
            }
            _ => {}
        }
        let (x, y) = (a.to_primitive(), b.to_primitive());
        match js::eval_binary(op, &x, &y) {
            Some(result) => Ok(Value::from_literal(result)),
            None if matches!(x, Literal::BigInt(_)) && matches!(y, Literal::BigInt(_)) => {
                Err(self.error(ErrorKind::RangeError, "BigInt operation out of range"))
            }
            None => Err(self.error(ErrorKind::TypeError, "Cannot mix BigInt and other types")),
        }
    }

    fn instance_of(&self, value: &Value, ctor: &Value) -> Flow<Value> {
        let Some(ctor) = ctor.as_object().filter(|c| c.borrow().is_callable()) else {
            return Err(self.error(ErrorKind::TypeError, "Right-hand side of 'instanceof' is not callable"));
        };
        let Some(Value::Object(proto)) = get_property(ctor, "prototype") else {
            return Ok(Value::Bool(false));
        };
        let mut current = value.as_object().and_then(|o| o.borrow().proto.clone());
        while let Some(object) = current {
            if Rc::ptr_eq(&object, &proto) {
                return Ok(Value::Bool(true));
            }
            current = object.borrow().proto.clone();
        }
        Ok(Value::Bool(false))
    }

    fn unary(&self, op: UnaryOp, value: &Value) -> Flow<Value> {
        match op {
            UnaryOp::TypeOf => return Ok(Value::string(value.type_of())),
            UnaryOp::Not => return Ok(Value::Bool(!value.truthy())),
            UnaryOp::Void => return Ok(Value::Undefined),
            _ => {}
        }
        match js::eval_unary(op, &value.to_primitive()) {
            Some(result) => Ok(Value::from_literal(result)),
            None => Err(self.error(ErrorKind::TypeError, "Cannot convert a BigInt value to a number")),
        }
    }

    fn get(&self, object: &Value, key: &str) -> Flow<Value> {
        match object {
            Value::Object(obj) => Ok(get_property(obj, key).unwrap_or(Value::Undefined)),
            Value::String(s) => Ok(if key == "length" {
                Value::Number(s.encode_utf16().count() as f64)
            } else {
                key.parse::<usize>()
                    .ok()
                    .and_then(|i| s.chars().nth(i))
                    .map(|c| Value::string(c.to_string()))
                    .unwrap_or(Value::Undefined)
            }),
            Value::Undefined | Value::Null => Err(self.error(
                ErrorKind::TypeError,
                format!("Cannot read properties of {} (reading '{}')", object.display(), key),
            )),
            _ => Ok(Value::Undefined),
        }
    }

    fn put(&self, object: &Value, key: &str, value: Value) -> Flow<()> {
        match object {
            Value::Object(obj) => {
                set_property(obj, key, value);
                Ok(())
            }
            Value::Undefined | Value::Null => Err(self.error(
                ErrorKind::TypeError,
                format!("Cannot set properties of {} (setting '{}')", object.display(), key),
            )),
            _ => Ok(()),
        }
    }

    fn delete(&self, object: &Value, key: &str) -> Flow<Value> {
        match object {
            Value::Object(obj) => Ok(Value::Bool(delete_property(obj, key))),
            Value::Undefined | Value::Null => Err(self.error(
                ErrorKind::TypeError,
                format!("Cannot convert {} to object", object.display()),
            )),
            _ => Ok(Value::Bool(true)),
        }
    }
}

/// Run a module with default limits
pub fn run_module(module: &BytecodeModule) -> VmResult<RunOutput> {
    Vm::new(module).run()
}
