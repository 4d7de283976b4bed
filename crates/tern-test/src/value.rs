//! Runtime values of the reference interpreter

use num_bigint::BigInt;
use rustc_hash::FxHashMap;
use std::cell::RefCell;
use std::fmt;
use std::rc::Rc;
use tern_compiler::ir::js;
use tern_compiler::ir::Literal;

pub type ObjectRef = Rc<RefCell<Object>>;
pub type EnvRef = Rc<RefCell<Environment>>;

#[derive(Clone)]
pub enum Value {
    Undefined,
    Null,
    /// Uninitialized `let`/`const` binding
    Empty,
    Bool(bool),
    Number(f64),
    String(Rc<str>),
    BigInt(Rc<BigInt>),
    Object(ObjectRef),
    Env(EnvRef),
    /// Contents of a caller-saved register after a call
    Clobbered,
}

/// Built-in functions
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Native {
    Print,
    /// `Error` and its subclasses, by name
    ErrorConstructor(ErrorKind),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Error,
    TypeError,
    ReferenceError,
    RangeError,
}

impl ErrorKind {
    pub const ALL: [ErrorKind; 4] = [
        ErrorKind::Error,
        ErrorKind::TypeError,
        ErrorKind::ReferenceError,
        ErrorKind::RangeError,
    ];

    pub fn name(self) -> &'static str {
        match self {
            ErrorKind::Error => "Error",
            ErrorKind::TypeError => "TypeError",
            ErrorKind::ReferenceError => "ReferenceError",
            ErrorKind::RangeError => "RangeError",
        }
    }
}

pub enum ObjectKind {
    Plain,
    Array(Vec<Value>),
    Closure { func: u32, env: Option<EnvRef> },
    Native(Native),
}

pub struct Object {
    pub kind: ObjectKind,
    pub properties: FxHashMap<String, Value>,
    pub proto: Option<ObjectRef>,
}

impl Object {
    pub fn new(kind: ObjectKind, proto: Option<ObjectRef>) -> ObjectRef {
        Rc::new(RefCell::new(Object {
            kind,
            properties: FxHashMap::default(),
            proto,
        }))
    }

    pub fn is_callable(&self) -> bool {
        matches!(self.kind, ObjectKind::Closure { .. } | ObjectKind::Native(_))
    }
}

/// A closure environment record
pub struct Environment {
    pub slots: Vec<Value>,
    pub parent: Option<EnvRef>,
}

/// Own or inherited property lookup
pub fn get_property(object: &ObjectRef, key: &str) -> Option<Value> {
    let obj = object.borrow();
    if let ObjectKind::Array(elements) = &obj.kind {
        if key == "length" {
            return Some(Value::Number(elements.len() as f64));
        }
        if let Some(index) = array_index(key) {
            return Some(elements.get(index).cloned().unwrap_or(Value::Undefined));
        }
    }
    if let Some(value) = obj.properties.get(key) {
        return Some(value.clone());
    }
    let proto = obj.proto.clone()?;
    drop(obj);
    get_property(&proto, key)
}

pub fn has_property(object: &ObjectRef, key: &str) -> bool {
    {
        let obj = object.borrow();
        if let ObjectKind::Array(elements) = &obj.kind {
            if key == "length" || array_index(key).is_some_and(|i| i < elements.len()) {
                return true;
            }
        }
        if obj.properties.contains_key(key) {
            return true;
        }
    }
    let proto = object.borrow().proto.clone();
    proto.is_some_and(|p| has_property(&p, key))
}

pub fn set_property(object: &ObjectRef, key: &str, value: Value) {
    let mut obj = object.borrow_mut();
    if let ObjectKind::Array(elements) = &mut obj.kind {
        if let Some(index) = array_index(key) {
            if index >= elements.len() {
                elements.resize(index + 1, Value::Undefined);
            }
            elements[index] = value;
            return;
        }
    }
    obj.properties.insert(key.to_string(), value);
}

pub fn delete_property(object: &ObjectRef, key: &str) -> bool {
    let mut obj = object.borrow_mut();
    if let ObjectKind::Array(elements) = &mut obj.kind {
        if let Some(index) = array_index(key) {
            if let Some(slot) = elements.get_mut(index) {
                *slot = Value::Undefined;
            }
            return true;
        }
    }
    obj.properties.remove(key);
    true
}

/// Canonical array index of a property key
fn array_index(key: &str) -> Option<usize> {
    if key.is_empty() || (key.len() > 1 && key.starts_with('0')) {
        return None;
    }
    if !key.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    key.parse().ok()
}

impl Value {
    pub fn string(s: impl Into<Rc<str>>) -> Self {
        Value::String(s.into())
    }

    pub fn from_literal(lit: Literal) -> Self {
        match lit {
            Literal::Undefined => Value::Undefined,
            Literal::Null => Value::Null,
            Literal::Empty => Value::Empty,
            Literal::Bool(b) => Value::Bool(b),
            Literal::Number(n) => Value::Number(n),
            Literal::String(s) => Value::string(s),
            Literal::BigInt(b) => Value::BigInt(Rc::new(b)),
        }
    }

    /// The primitive as a literal; `None` for objects and internal values
    pub fn to_literal(&self) -> Option<Literal> {
        Some(match self {
            Value::Undefined => Literal::Undefined,
            Value::Null => Literal::Null,
            Value::Empty => Literal::Empty,
            Value::Bool(b) => Literal::Bool(*b),
            Value::Number(n) => Literal::Number(*n),
            Value::String(s) => Literal::String(s.to_string()),
            Value::BigInt(b) => Literal::BigInt((**b).clone()),
            Value::Object(_) | Value::Env(_) | Value::Clobbered => return None,
        })
    }

    /// `ToPrimitive`, without calling user code
    pub fn to_primitive(&self) -> Literal {
        match self.to_literal() {
            Some(lit) => lit,
            None => Literal::String(self.display()),
        }
    }

    pub fn truthy(&self) -> bool {
        match self {
            Value::Object(_) | Value::Env(_) => true,
            Value::Clobbered => false,
            other => other.to_literal().is_some_and(|lit| js::to_boolean(&lit)),
        }
    }

    pub fn type_of(&self) -> &'static str {
        match self {
            Value::Object(obj) if obj.borrow().is_callable() => "function",
            Value::Object(_) | Value::Env(_) | Value::Clobbered => "object",
            other => other.to_literal().map(|lit| js::typeof_literal(&lit)).unwrap_or("undefined"),
        }
    }

    pub fn as_object(&self) -> Option<&ObjectRef> {
        match self {
            Value::Object(obj) => Some(obj),
            _ => None,
        }
    }

    /// `ToPropertyKey`
    pub fn to_property_key(&self) -> String {
        match self {
            Value::String(s) => s.to_string(),
            other => other.display(),
        }
    }

    /// `IsStrictlyEqual` including object identity
    pub fn strict_equals(&self, other: &Value) -> bool {
        match (self, other) {
            (Value::Object(a), Value::Object(b)) => Rc::ptr_eq(a, b),
            (Value::Object(_), _) | (_, Value::Object(_)) => false,
            _ => match (self.to_literal(), other.to_literal()) {
                (Some(a), Some(b)) => js::strict_equals(&a, &b),
                _ => false,
            },
        }
    }

    /// `IsLooselyEqual`; objects compare against primitives by their
    /// primitive value
    pub fn loose_equals(&self, other: &Value) -> bool {
        match (self, other) {
            (Value::Object(a), Value::Object(b)) => Rc::ptr_eq(a, b),
            (Value::Object(_), Value::Undefined | Value::Null) | (Value::Undefined | Value::Null, Value::Object(_)) => {
                false
            }
            _ => js::loose_equals(&self.to_primitive(), &other.to_primitive()).unwrap_or(false),
        }
    }

    /// What `print` shows, and the string form of objects
    pub fn display(&self) -> String {
        match self {
            Value::Object(obj) => display_object(obj),
            Value::Env(_) => "[environment]".to_string(),
            Value::Clobbered => "<clobbered>".to_string(),
            Value::Empty => "<empty>".to_string(),
            other => other
                .to_literal()
                .and_then(|lit| js::to_js_string(&lit))
                .unwrap_or_default(),
        }
    }
}

fn display_object(object: &ObjectRef) -> String {
    {
        let obj = object.borrow();
        match &obj.kind {
            ObjectKind::Array(elements) => {
                return elements
                    .iter()
                    .map(|e| match e {
                        Value::Undefined | Value::Null => String::new(),
                        other => other.display(),
                    })
                    .collect::<Vec<_>>()
                    .join(",")
            }
            ObjectKind::Closure { .. } | ObjectKind::Native(_) => return "function".to_string(),
            ObjectKind::Plain => {}
        }
    }
    // Error instances inherit `name` from their constructor's prototype
    match (get_property(object, "name"), get_property(object, "message")) {
        (Some(name), Some(message)) => {
            let message = message.display();
            if message.is_empty() {
                name.display()
            } else {
                format!("{}: {}", name.display(), message)
            }
        }
        _ => "[object Object]".to_string(),
    }
}

impl fmt::Debug for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::String(s) => write!(f, "{:?}", s),
            other => write!(f, "{}", other.display()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_array_properties() {
        let array = Object::new(ObjectKind::Array(vec![Value::Number(1.0)]), None);
        set_property(&array, "2", Value::Number(3.0));
        assert_eq!(get_property(&array, "length").map(|v| v.display()), Some("3".to_string()));
        assert_eq!(Value::Object(array.clone()).display(), "1,,3");
        assert!(has_property(&array, "0"));
        assert!(!has_property(&array, "01"));
    }

    #[test]
    fn test_prototype_lookup() {
        let proto = Object::new(ObjectKind::Plain, None);
        set_property(&proto, "name", Value::string("TypeError"));
        let error = Object::new(ObjectKind::Plain, Some(proto));
        set_property(&error, "message", Value::string("bad"));
        assert_eq!(Value::Object(error).display(), "TypeError: bad");
    }

    #[test]
    fn test_equality() {
        let a = Object::new(ObjectKind::Plain, None);
        let b = Object::new(ObjectKind::Plain, None);
        assert!(Value::Object(a.clone()).strict_equals(&Value::Object(a.clone())));
        assert!(!Value::Object(a.clone()).strict_equals(&Value::Object(b)));
        assert!(Value::Number(1.0).loose_equals(&Value::string("1")));
        assert!(!Value::Object(a).loose_equals(&Value::Null));
        assert!(Value::Null.loose_equals(&Value::Undefined));
    }

    #[test]
    fn test_typeof_and_truthiness() {
        let f = Object::new(ObjectKind::Native(Native::Print), None);
        assert_eq!(Value::Object(f).type_of(), "function");
        assert_eq!(Value::Null.type_of(), "object");
        assert!(!Value::string("").truthy());
        assert!(Value::Object(Object::new(ObjectKind::Plain, None)).truthy());
    }
}
