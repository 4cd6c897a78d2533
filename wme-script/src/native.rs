//! Bridge to host objects (sprites, entities, windows...).

use std::cell::RefCell;
use std::fmt;
use std::rc::Rc;

use crate::host::CallContext;
use crate::script::ScriptId;
use crate::value::Value;

pub type NativeHandle = Rc<RefCell<dyn NativeObject>>;

/// Wraps a host object into a handle scripts can hold.
pub fn native<T: NativeObject + 'static>(obj: T) -> NativeHandle {
    Rc::new(RefCell::new(obj))
}

/// Identity comparison of two handles.
pub fn same_handle(a: &NativeHandle, b: &NativeHandle) -> bool {
    Rc::as_ptr(a).cast::<()>() == Rc::as_ptr(b).cast::<()>()
}

/// Capabilities a host object exposes to scripts.
///
/// Everything except [`NativeObject::class_name`] has a default, so a host
/// object only implements what it actually supports.
pub trait NativeObject: fmt::Debug {
    fn class_name(&self) -> &str;

    /// `None` reads as Null.
    fn get_property(&self, _name: &str) -> Option<Value> {
        None
    }

    /// Returns false when the property cannot be written.
    fn set_property(&mut self, _name: &str, _value: &Value) -> bool {
        false
    }

    /// Handles `name` called on this object. Arguments are on the operand
    /// stack (count on top, see [`crate::Stack::correct_params`]); a handler
    /// that returns `Ok(true)` must push exactly one result. `Ok(false)`
    /// lets the next resolver try.
    fn call_method(&mut self, _call: &mut CallContext<'_, '_>, _name: &str) -> anyhow::Result<bool> {
        Ok(false)
    }

    /// Scripts attached to this object, searched for bytecode methods.
    fn scripts(&self) -> Vec<ScriptId> {
        Vec::new()
    }

    /// Scripts waiting on this object resume once it is ready.
    fn is_ready(&self) -> bool {
        true
    }

    /// Scripts waiting on an invalid object are finished.
    fn is_valid(&self) -> bool {
        true
    }

    fn to_script_string(&self) -> String {
        format!("[native object {}]", self.class_name())
    }

    fn to_int(&self) -> i32 {
        0
    }

    fn to_float(&self) -> f64 {
        0.0
    }

    fn to_bool(&self) -> bool {
        true
    }
}
