use crate::error::VmError;
use crate::native::NativeHandle;
use crate::value::Value;

/// Growable value stack. Slots above `sp` are kept (cleared) so pushes reuse
/// them.
#[derive(Debug, Clone)]
pub struct Stack {
    values: Vec<Value>,
    sp: isize,
}

impl Default for Stack {
    fn default() -> Self {
        Self::new()
    }
}

impl Stack {
    pub fn new() -> Self {
        Self { values: Vec::new(), sp: -1 }
    }

    /// Index of the top element, `-1` when empty.
    #[inline]
    pub fn sp(&self) -> isize {
        self.sp
    }

    #[inline]
    pub fn len(&self) -> usize {
        (self.sp + 1) as usize
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.sp < 0
    }

    pub fn push(&mut self, value: Value) {
        self.sp += 1;
        let sp = self.sp as usize;
        if sp < self.values.len() {
            self.values[sp] = value;
        } else {
            self.values.push(value);
        }
    }

    pub fn pop(&mut self) -> Result<Value, VmError> {
        if self.sp < 0 {
            return Err(VmError::StackUnderflow);
        }
        let value = std::mem::take(&mut self.values[self.sp as usize]);
        self.sp -= 1;
        Ok(value)
    }

    pub fn top(&self) -> Option<&Value> {
        self.at(0)
    }

    pub fn top_mut(&mut self) -> Option<&mut Value> {
        self.at_mut(0)
    }

    /// Element `index` positions below the top.
    pub fn at(&self, index: usize) -> Option<&Value> {
        let i = self.sp - index as isize;
        if i < 0 {
            return None;
        }
        self.values.get(i as usize)
    }

    pub fn at_mut(&mut self, index: usize) -> Option<&mut Value> {
        let i = self.sp - index as isize;
        if i < 0 {
            return None;
        }
        self.values.get_mut(i as usize)
    }

    /// Normalizes a call's argument window to `expected` arguments.
    ///
    /// Pops the argument count pushed above the arguments. Surplus arguments
    /// are dropped from the bottom of the window (the last `expected` pushed
    /// survive); missing ones are filled with Null at the bottom.
    pub fn correct_params(&mut self, expected: usize) -> Result<(), VmError> {
        let mut n = usize::try_from(self.pop()?.get_int()).unwrap_or(0);
        if n > self.len() {
            return Err(VmError::StackUnderflow);
        }

        while n > expected {
            let index = (self.sp - expected as isize) as usize;
            self.values.remove(index);
            self.sp -= 1;
            n -= 1;
        }

        while n < expected {
            let index = (self.sp - n as isize + 1) as usize;
            self.values.insert(index, Value::Null);
            self.sp += 1;
            n += 1;
            if self.values.len() > self.len() {
                self.values.pop();
            }
        }
        Ok(())
    }

    pub fn push_null(&mut self) {
        self.push(Value::Null);
    }

    pub fn push_int(&mut self, v: i32) {
        self.push(Value::Int(v));
    }

    pub fn push_bool(&mut self, v: bool) {
        self.push(Value::Bool(v));
    }

    pub fn push_float(&mut self, v: f64) {
        self.push(Value::Float(v));
    }

    pub fn push_string(&mut self, v: impl Into<String>) {
        self.push(Value::String(v.into()));
    }

    pub fn push_native(&mut self, handle: NativeHandle) {
        self.push(Value::native(handle));
    }

    /// Drops every element; capacity is kept.
    pub fn clear(&mut self) {
        for v in &mut self.values {
            *v = Value::Null;
        }
        self.sp = -1;
    }

    /// Pops down to `len` elements; does nothing when already shorter.
    pub fn truncate(&mut self, len: usize) {
        while self.len() > len {
            self.values[self.sp as usize] = Value::Null;
            self.sp -= 1;
        }
    }

    /// Live elements, bottom first.
    pub fn iter(&self) -> impl Iterator<Item = &Value> {
        self.values.iter().take(self.len())
    }
}
