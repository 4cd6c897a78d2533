//! Script values.
//!
//! A [`Value`] is the tagged union every stack slot, variable and property
//! holds. Variables live in shared [`Slot`]s so that a [`Value::VariableRef`]
//! can alias them; objects own their property slots and are deep-copied on
//! clone, while natives and references alias.

use std::cell::RefCell;
use std::cmp::Ordering;
use std::collections::BTreeMap;
use std::fmt;
use std::rc::Rc;

use crate::native::{same_handle, NativeHandle};

pub type Slot = Rc<RefCell<Value>>;

pub fn new_slot(value: Value) -> Slot {
    Rc::new(RefCell::new(value))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, strum::Display, strum::IntoStaticStr)]
pub enum ValueType {
    Null,
    Bool,
    Int,
    Float,
    String,
    Object,
    Native,
    VariableRef,
}

/// A named variable: its slot and whether it was defined `const`.
#[derive(Debug, Clone)]
pub struct Variable {
    pub slot: Slot,
    pub constant: bool,
}

impl Variable {
    pub fn new(value: Value, constant: bool) -> Self {
        Self { slot: new_slot(value), constant }
    }

    pub fn value(&self) -> Value {
        self.slot.borrow().clone()
    }
}

/// Property container of an object value. Keys are case-sensitive.
#[derive(Debug, Default)]
pub struct ObjectMap {
    props: BTreeMap<String, Variable>,
}

impl Clone for ObjectMap {
    fn clone(&self) -> Self {
        let props = self
            .props
            .iter()
            .map(|(k, v)| (k.clone(), Variable::new(v.value(), v.constant)))
            .collect();
        Self { props }
    }
}

impl ObjectMap {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, name: &str) -> Option<&Variable> {
        self.props.get(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.props.contains_key(name)
    }

    /// Assigns `value`, reusing the existing slot so references observe it.
    pub fn set(&mut self, name: &str, value: Value, constant: bool) -> Variable {
        match self.props.get_mut(name) {
            Some(var) => {
                *var.slot.borrow_mut() = value;
                var.constant = constant;
                var.clone()
            }
            None => {
                let var = Variable::new(value, constant);
                self.props.insert(name.to_owned(), var.clone());
                var
            }
        }
    }

    pub fn remove(&mut self, name: &str) -> Option<Variable> {
        self.props.remove(name)
    }

    pub fn len(&self) -> usize {
        self.props.len()
    }

    pub fn is_empty(&self) -> bool {
        self.props.is_empty()
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.props.keys().map(String::as_str)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &Variable)> {
        self.props.iter().map(|(k, v)| (k.as_str(), v))
    }
}

/// Handle to a host object held by a value.
#[derive(Debug, Clone)]
pub struct NativeRef {
    pub handle: NativeHandle,
    /// Persistent natives outlive the value; the host owns them.
    pub persistent: bool,
}

#[derive(Debug, Clone, Default)]
pub enum Value {
    #[default]
    Null,
    Bool(bool),
    Int(i32),
    Float(f64),
    String(String),
    Object(ObjectMap),
    Native(NativeRef),
    VariableRef(Slot),
}

impl Value {
    pub fn native(handle: NativeHandle) -> Self {
        Value::Native(NativeRef { handle, persistent: false })
    }

    pub fn value_type(&self) -> ValueType {
        match self {
            Value::Null => ValueType::Null,
            Value::Bool(_) => ValueType::Bool,
            Value::Int(_) => ValueType::Int,
            Value::Float(_) => ValueType::Float,
            Value::String(_) => ValueType::String,
            Value::Object(_) => ValueType::Object,
            Value::Native(_) => ValueType::Native,
            Value::VariableRef(_) => ValueType::VariableRef,
        }
    }

    /// Type of the value after following references.
    pub fn resolved_type(&self) -> ValueType {
        self.with_resolved(Value::value_type)
    }

    /// Runs `f` on the value a reference points at, or on `self`.
    pub fn with_resolved<R>(&self, f: impl FnOnce(&Value) -> R) -> R {
        match self {
            Value::VariableRef(slot) => slot.borrow().with_resolved(f),
            other => f(other),
        }
    }

    /// The value as it gets stored into a variable: references are
    /// followed, everything else is kept.
    pub fn into_stored(self) -> Value {
        match self {
            Value::VariableRef(slot) => slot.borrow().clone().into_stored(),
            other => other,
        }
    }

    pub fn is_null(&self) -> bool {
        self.with_resolved(|v| matches!(v, Value::Null))
    }

    pub fn is_string(&self) -> bool {
        self.with_resolved(|v| matches!(v, Value::String(_)))
    }

    pub fn is_native(&self) -> bool {
        self.with_resolved(|v| matches!(v, Value::Native(_)))
    }

    pub fn is_object(&self) -> bool {
        self.with_resolved(|v| matches!(v, Value::Object(_)))
    }

    pub fn set_null(&mut self) {
        *self = Value::Null;
    }

    pub fn set_bool(&mut self, v: bool) {
        *self = Value::Bool(v);
    }

    pub fn set_int(&mut self, v: i32) {
        *self = Value::Int(v);
    }

    pub fn set_float(&mut self, v: f64) {
        *self = Value::Float(v);
    }

    pub fn set_string(&mut self, v: impl Into<String>) {
        *self = Value::String(v.into());
    }

    pub fn set_reference(&mut self, slot: Slot) {
        *self = Value::VariableRef(slot);
    }

    pub fn set_native(&mut self, handle: NativeHandle, persistent: bool) {
        *self = Value::Native(NativeRef { handle, persistent });
    }

    pub fn set_object(&mut self) {
        *self = Value::Object(ObjectMap::new());
    }

    pub fn native_handle(&self) -> Option<NativeHandle> {
        self.with_resolved(|v| match v {
            Value::Native(n) => Some(n.handle.clone()),
            _ => None,
        })
    }

    pub fn get_bool(&self) -> bool {
        match self {
            Value::Null => false,
            Value::Bool(b) => *b,
            Value::Int(i) => *i != 0,
            Value::Float(f) => *f != 0.0,
            Value::String(s) => {
                s == "1" || s.eq_ignore_ascii_case("yes") || s.eq_ignore_ascii_case("true")
            }
            Value::Object(_) => true,
            Value::Native(n) => n.handle.try_borrow().map(|o| o.to_bool()).unwrap_or(true),
            Value::VariableRef(slot) => slot.borrow().get_bool(),
        }
    }

    pub fn get_int(&self) -> i32 {
        match self {
            Value::Null | Value::Object(_) => 0,
            Value::Bool(b) => i32::from(*b),
            Value::Int(i) => *i,
            Value::Float(f) => *f as i32,
            Value::String(s) => leading_int(s),
            Value::Native(n) => n.handle.try_borrow().map(|o| o.to_int()).unwrap_or(0),
            Value::VariableRef(slot) => slot.borrow().get_int(),
        }
    }

    pub fn get_float(&self) -> f64 {
        match self {
            Value::Null | Value::Object(_) => 0.0,
            Value::Bool(b) => f64::from(u8::from(*b)),
            Value::Int(i) => f64::from(*i),
            Value::Float(f) => *f,
            Value::String(s) => leading_float(s),
            Value::Native(n) => n.handle.try_borrow().map(|o| o.to_float()).unwrap_or(0.0),
            Value::VariableRef(slot) => slot.borrow().get_float(),
        }
    }

    pub fn get_string(&self) -> String {
        match self {
            Value::Null => String::new(),
            Value::Bool(b) => String::from(if *b { "yes" } else { "no" }),
            Value::Int(i) => i.to_string(),
            Value::Float(f) => format!("{f:.6}"),
            Value::String(s) => s.clone(),
            Value::Object(_) => "[object]".to_owned(),
            Value::Native(n) => match n.handle.try_borrow() {
                Ok(o) => o.to_script_string(),
                Err(_) => "[native object]".to_owned(),
            },
            Value::VariableRef(slot) => slot.borrow().get_string(),
        }
    }

    /// Reads a property. Tags without properties yield Null.
    pub fn get_property(&self, name: &str) -> Value {
        match self {
            Value::VariableRef(slot) => slot.borrow().get_property(name),
            Value::Native(n) => match n.handle.try_borrow() {
                Ok(obj) => obj.get_property(name).unwrap_or_default(),
                Err(_) => Value::Null,
            },
            Value::Object(map) => map.get(name).map(Variable::value).unwrap_or_default(),
            Value::String(s) if name == "Length" => {
                Value::Int(i32::try_from(s.chars().count()).unwrap_or(i32::MAX))
            }
            _ => Value::Null,
        }
    }

    /// Writes a property. Plain values turn into objects first. Returns false
    /// when a native refused the write.
    pub fn set_property(&mut self, name: &str, value: Value) -> bool {
        let value = value.into_stored();
        match self {
            Value::VariableRef(slot) => {
                let slot = Rc::clone(slot);
                let mut target = slot.borrow_mut();
                target.set_property(name, value)
            }
            Value::Native(n) => match n.handle.try_borrow_mut() {
                Ok(mut obj) => obj.set_property(name, &value),
                Err(_) => false,
            },
            Value::Object(map) => {
                map.set(name, value, false);
                true
            }
            other => {
                let mut map = ObjectMap::new();
                map.set(name, value, false);
                *other = Value::Object(map);
                true
            }
        }
    }

    /// Loose comparison used by the relational opcodes.
    pub fn compare(a: &Value, b: &Value) -> Ordering {
        a.with_resolved(|a| b.with_resolved(|b| compare_resolved(a, b)))
    }

    /// Like [`Value::compare`], but values of different types never compare equal.
    pub fn compare_strict(a: &Value, b: &Value) -> Ordering {
        if a.resolved_type() != b.resolved_type() {
            return Ordering::Less;
        }
        Value::compare(a, b)
    }
}

fn compare_resolved(a: &Value, b: &Value) -> Ordering {
    match (a, b) {
        (Value::Native(x), Value::Native(y)) => {
            if same_handle(&x.handle, &y.handle) {
                Ordering::Equal
            } else {
                Ordering::Less
            }
        }
        (Value::Native(_), _) | (_, Value::Native(_)) => Ordering::Less,
        (Value::Null, Value::Null) => Ordering::Equal,
        (Value::Null, _) => Ordering::Less,
        (_, Value::Null) => Ordering::Greater,
        (Value::String(_), _) | (_, Value::String(_)) => a.get_string().cmp(&b.get_string()),
        (Value::Object(_), Value::Object(_)) => Ordering::Less,
        (Value::Float(x), Value::Float(y)) => x.partial_cmp(y).unwrap_or(Ordering::Less),
        _ => a.get_int().cmp(&b.get_int()),
    }
}

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Value::Bool(v)
    }
}

impl From<i32> for Value {
    fn from(v: i32) -> Self {
        Value::Int(v)
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Value::Float(v)
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Value::String(v.to_owned())
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Value::String(v)
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.get_string())
    }
}

/// `atoi`: optional whitespace and sign, then as many digits as there are.
pub fn leading_int(s: &str) -> i32 {
    let t = s.trim_start();
    let (neg, digits) = match t.as_bytes().first() {
        Some(b'-') => (true, &t[1..]),
        Some(b'+') => (false, &t[1..]),
        _ => (false, t),
    };
    let mut acc: i64 = 0;
    for b in digits.bytes().take_while(u8::is_ascii_digit) {
        acc = (acc * 10 + i64::from(b - b'0')).min(i64::from(u32::MAX));
    }
    let acc = if neg { -acc } else { acc };
    acc.clamp(i64::from(i32::MIN), i64::from(i32::MAX)) as i32
}

/// `atof`: the longest prefix that parses as a float, else 0.
pub fn leading_float(s: &str) -> f64 {
    let t = s.trim_start();
    let bytes = t.as_bytes();
    let mut end = 0;
    let mut seen_digit = false;
    let mut seen_dot = false;
    let mut seen_exp = false;
    let mut i = 0;
    while i < bytes.len() {
        match bytes[i] {
            b'+' | b'-' if i == 0 => {}
            b'+' | b'-' if seen_exp && matches!(bytes[i - 1], b'e' | b'E') => {}
            b'0'..=b'9' => {
                seen_digit = true;
                end = i + 1;
            }
            b'.' if !seen_dot && !seen_exp => {
                seen_dot = true;
                if seen_digit {
                    end = i + 1;
                }
            }
            b'e' | b'E' if seen_digit && !seen_exp => seen_exp = true,
            _ => break,
        }
        i += 1;
    }
    t[..end].parse().unwrap_or(0.0)
}

/// The engine-wide and per-script global variable tables. Clones share the
/// same table; threads hold a clone of their parent's.
#[derive(Debug, Clone, Default)]
pub struct Globals(Rc<RefCell<ObjectMap>>);

impl Globals {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, name: &str) -> Option<Variable> {
        self.0.borrow().get(name).cloned()
    }

    pub fn value(&self, name: &str) -> Option<Value> {
        self.get(name).map(|v| v.value())
    }

    pub fn contains(&self, name: &str) -> bool {
        self.0.borrow().contains(name)
    }

    /// Assigns a value, keeping the variable's const flag.
    pub fn set(&self, name: &str, value: Value) -> Variable {
        let constant = self.get(name).is_some_and(|v| v.constant);
        self.0.borrow_mut().set(name, value, constant)
    }

    /// Defines (or resets) a variable to Null.
    pub fn define(&self, name: &str, constant: bool) -> Variable {
        self.0.borrow_mut().set(name, Value::Null, constant)
    }

    pub fn shares_with(&self, other: &Globals) -> bool {
        Rc::ptr_eq(&self.0, &other.0)
    }

    pub fn names(&self) -> Vec<String> {
        self.0.borrow().names().map(str::to_owned).collect()
    }

    pub fn len(&self) -> usize {
        self.0.borrow().len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.borrow().is_empty()
    }
}
