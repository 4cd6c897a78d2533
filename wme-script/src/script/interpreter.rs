use std::cmp::Ordering;

use crate::builtins;
use crate::error::VmError;
use crate::host::{CallContext, Clock, ExecEnv, ScriptHost};
use crate::image::{ByteCursor, CursorError, Opcode};
use crate::value::{ObjectMap, Value};

use super::{dispatch, Script, ScriptState};

impl Script {
    fn fault(&self, _err: CursorError) -> VmError {
        VmError::IpOutOfRange { ip: self.ip, len: self.image.bytes().len() as u32 }
    }

    fn fetch<T>(&mut self, read: impl FnOnce(&mut ByteCursor<'_>) -> Result<T, CursorError>) -> Result<T, VmError> {
        let mut cursor = ByteCursor::at(self.image.bytes(), self.ip as usize);
        match read(&mut cursor) {
            Ok(v) => {
                self.ip = cursor.pos() as u32;
                Ok(v)
            }
            Err(e) => Err(self.fault(e)),
        }
    }

    fn fetch_u32(&mut self) -> Result<u32, VmError> {
        self.fetch(|c| c.read_u32())
    }

    fn fetch_string(&mut self) -> Result<String, VmError> {
        let raw = self.fetch(|c| c.read_cstring().map(<[u8]>::to_vec))?;
        Ok(self.image.decode_text(&raw))
    }

    fn fetch_symbol(&mut self) -> Result<String, VmError> {
        let index = self.fetch_u32()?;
        self.image
            .symbol(index)
            .map(str::to_owned)
            .ok_or(VmError::BadSymbol { index })
    }

    fn pop_operands(&mut self) -> Result<(Value, Value), VmError> {
        let rhs = self.stack.pop()?.into_stored();
        let lhs = self.stack.pop()?.into_stored();
        Ok((lhs, rhs))
    }

    fn finish_body(&mut self) {
        self.state = if self.thread {
            ScriptState::ThreadFinished
        } else if self.image.has_handlers() {
            ScriptState::Persistent
        } else {
            ScriptState::Finished
        };
    }

    /// Executes one instruction.
    ///
    /// Recoverable errors are reported and execution continues; the returned
    /// error is a fault the caller must contain.
    pub(crate) fn step(&mut self, host: &mut dyn ScriptHost, env: &mut ExecEnv<'_>) -> Result<Opcode, VmError> {
        let at = self.ip;
        let raw = self.fetch_u32()?;
        let Some(op) = Opcode::from_code(self.opcodes.decode(raw)) else {
            return Err(VmError::InvalidOpcode { opcode: raw, ip: at });
        };
        if env.config.debug.trace_instructions {
            log::trace!("{} {:08X}: {}", self.id, at, op);
        }

        match op {
            Opcode::DefVar => {
                let name = self.fetch_symbol()?;
                match self.scope_stack.top_mut() {
                    Some(scope) => {
                        scope.set_property(&name, Value::Null);
                    }
                    None => {
                        self.globals.define(&name, false);
                    }
                }
            }

            Opcode::DefGlobVar | Opcode::DefConstVar => {
                let name = self.fetch_symbol()?;
                if !env.engine_globals.contains(&name) {
                    env.engine_globals.define(&name, op == Opcode::DefConstVar);
                }
            }

            Opcode::Ret => {
                if !self.scope_stack.is_empty() && !self.call_stack.is_empty() {
                    self.scope_stack.pop()?;
                    self.ip = self.call_stack.pop()?.get_int() as u32;
                } else {
                    self.finish_body();
                }
            }

            Opcode::RetEvent => self.state = ScriptState::Finished,

            Opcode::Call => {
                let target = self.fetch_u32()?;
                self.call_stack.push_int(self.ip as i32);
                self.ip = target;
            }

            Opcode::CallByExp => {
                let name = self.stack.pop()?.get_string();
                let target = self.stack.pop()?.into_stored();
                dispatch::call_method(self, host, env, target, &name)?;
            }

            Opcode::ExternalCall => {
                let name = self.fetch_symbol()?;
                self.external_call(host, env, &name)?;
            }

            Opcode::Scope => self.scope_stack.push(Value::Object(ObjectMap::new())),

            Opcode::CorrectStack => {
                let n = self.fetch_u32()?;
                self.stack.correct_params(n as usize)?;
            }

            Opcode::CreateObject => self.stack.push(Value::Object(ObjectMap::new())),

            Opcode::PopEmpty => {
                self.stack.pop()?;
            }

            Opcode::PushVar => {
                let name = self.fetch_symbol()?;
                let var = self.get_var(&name, env.engine_globals);
                self.stack.push(var.value());
            }

            Opcode::PushVarRef => {
                let name = self.fetch_symbol()?;
                let var = self.get_var(&name, env.engine_globals);
                self.stack.push(Value::VariableRef(var.slot));
            }

            Opcode::PopVar => {
                let name = self.fetch_symbol()?;
                let var = self.get_var(&name, env.engine_globals);
                let value = self.stack.pop()?.into_stored();
                if var.constant {
                    self.runtime_error(env.reports, format!("Cannot assign to constant '{name}'."));
                } else {
                    *var.slot.borrow_mut() = value;
                }
            }

            Opcode::PushVarThis => {
                let this = self.this_stack.top().cloned().unwrap_or_default();
                self.stack.push(this);
            }

            Opcode::PushInt => {
                let v = self.fetch(|c| c.read_i32())?;
                self.stack.push_int(v);
            }

            Opcode::PushBool => {
                let v = self.fetch_u32()?;
                self.stack.push_bool(v != 0);
            }

            Opcode::PushFloat => {
                let v = self.fetch(|c| c.read_f64())?;
                self.stack.push_float(v);
            }

            Opcode::PushString => {
                let s = self.fetch_string()?;
                self.stack.push_string(s);
            }

            Opcode::PushNull => self.stack.push_null(),

            Opcode::PushThisFromStack => {
                let top = self.stack.top().cloned().unwrap_or_default();
                self.this_stack.push(top);
            }

            Opcode::PushThis => {
                let name = self.fetch_symbol()?;
                let var = self.get_var(&name, env.engine_globals);
                self.this_stack.push(Value::VariableRef(var.slot));
            }

            Opcode::PopThis => {
                self.this_stack.pop()?;
            }

            Opcode::PushByExp => {
                let name = self.stack.pop()?.get_string();
                let object = self.stack.pop()?;
                self.stack.push(object.get_property(&name));
            }

            Opcode::PopByExp => {
                let name = self.stack.pop()?.get_string();
                let mut target = self.stack.pop()?;
                let value = self.stack.pop()?;
                target.set_property(&name, value);
            }

            Opcode::Jmp => self.ip = self.fetch_u32()?,

            Opcode::JmpFalse => {
                let target = self.fetch_u32()?;
                if !self.stack.pop()?.get_bool() {
                    self.ip = target;
                }
            }

            Opcode::Add => {
                let (a, b) = self.pop_operands()?;
                let result = if a.is_null() || b.is_null() {
                    Value::Null
                } else if a.is_string() || b.is_string() {
                    Value::String(a.get_string() + &b.get_string())
                } else {
                    arith(&a, &b, i32::wrapping_add, |x, y| x + y)
                };
                self.stack.push(result);
            }

            Opcode::Sub | Opcode::Mul => {
                let (a, b) = self.pop_operands()?;
                let result = if a.is_null() || b.is_null() {
                    Value::Null
                } else if op == Opcode::Sub {
                    arith(&a, &b, i32::wrapping_sub, |x, y| x - y)
                } else {
                    arith(&a, &b, i32::wrapping_mul, |x, y| x * y)
                };
                self.stack.push(result);
            }

            Opcode::Div => {
                let (a, b) = self.pop_operands()?;
                let divisor = b.get_float();
                if divisor == 0.0 {
                    self.runtime_error(env.reports, "Division by zero.");
                }
                let result = if a.is_null() || b.is_null() || divisor == 0.0 {
                    Value::Null
                } else {
                    Value::Float(a.get_float() / divisor)
                };
                self.stack.push(result);
            }

            Opcode::Modulo => {
                let (a, b) = self.pop_operands()?;
                let divisor = b.get_int();
                if divisor == 0 {
                    self.runtime_error(env.reports, "Division by zero.");
                }
                let result = if a.is_null() || b.is_null() || divisor == 0 {
                    Value::Null
                } else {
                    Value::Int(a.get_int().wrapping_rem(divisor))
                };
                self.stack.push(result);
            }

            Opcode::Not => {
                let v = self.stack.pop()?;
                self.stack.push_bool(v.is_null() || !v.get_bool());
            }

            Opcode::And => {
                let (a, b) = self.pop_operands()?;
                self.stack.push_bool(a.get_bool() && b.get_bool());
            }

            Opcode::Or => {
                let (a, b) = self.pop_operands()?;
                self.stack.push_bool(a.get_bool() || b.get_bool());
            }

            Opcode::CmpEq
            | Opcode::CmpNe
            | Opcode::CmpL
            | Opcode::CmpG
            | Opcode::CmpLe
            | Opcode::CmpGe
            | Opcode::CmpStrictEq
            | Opcode::CmpStrictNe => {
                let (a, b) = self.pop_operands()?;
                let result = match op {
                    Opcode::CmpEq => Value::compare(&a, &b) == Ordering::Equal,
                    Opcode::CmpNe => Value::compare(&a, &b) != Ordering::Equal,
                    Opcode::CmpL => Value::compare(&a, &b) == Ordering::Less,
                    Opcode::CmpG => Value::compare(&a, &b) == Ordering::Greater,
                    Opcode::CmpLe => Value::compare(&a, &b) != Ordering::Greater,
                    Opcode::CmpGe => Value::compare(&a, &b) != Ordering::Less,
                    Opcode::CmpStrictEq => Value::compare_strict(&a, &b) == Ordering::Equal,
                    _ => Value::compare_strict(&a, &b) != Ordering::Equal,
                };
                self.stack.push_bool(result);
            }

            Opcode::DbgLine => self.current_line = self.fetch_u32()?,

            Opcode::PopReg1 => self.reg1 = self.stack.pop()?.into_stored(),

            Opcode::PushReg1 => self.stack.push(self.reg1.clone()),
        }

        Ok(op)
    }

    fn external_call(&mut self, host: &mut dyn ScriptHost, env: &mut ExecEnv<'_>, name: &str) -> Result<(), VmError> {
        let clock = Clock::read(host);
        let base = self.call_window_base();

        if let Some(function) = self.image.external(name).cloned() {
            let handled = {
                let mut call = CallContext::new(self, env, clock);
                host.foreign_call(&mut call, &function)
            };
            return match handled {
                Ok(true) => Ok(()),
                Ok(false) => self.failed_call(env, format!("External function '{}' ({}) is not available.", name, function.library)),
                Err(e) => self.abandon_call(env, base, e, |e| format!("External function '{name}' failed: {e:#}")),
            };
        }

        let handled = {
            let mut call = CallContext::new(self, env, clock);
            match host.external_call(&mut call, name) {
                Ok(false) => builtins::call(&mut call, name),
                other => other,
            }
        };
        match handled {
            Ok(true) => Ok(()),
            Ok(false) => self.failed_call(env, format!("Call to undefined function '{name}'. Ignored.")),
            Err(e) => self.abandon_call(env, base, e, |e| format!("Function '{name}' failed: {e:#}")),
        }
    }

    /// Stack length below the argument window of the call about to run.
    pub(super) fn call_window_base(&self) -> usize {
        let count = self.stack.top().map_or(0, Value::get_int).max(0) as usize;
        self.stack.len().saturating_sub(count + 1)
    }

    /// Handles a call whose handler returned an error. Script faults raised
    /// inside the handler stay faults; anything else is reported, the stack
    /// is cut back to `base` and Null is pushed as the result.
    pub(super) fn abandon_call(
        &mut self,
        env: &mut ExecEnv<'_>,
        base: usize,
        error: anyhow::Error,
        message: impl FnOnce(&anyhow::Error) -> String,
    ) -> Result<(), VmError> {
        let error = match error.downcast::<VmError>() {
            Ok(fault) => return Err(fault),
            Err(error) => error,
        };
        self.runtime_error(env.reports, message(&error));
        self.stack.truncate(base);
        self.stack.push_null();
        Ok(())
    }

    /// Discards the argument window, reports, and pushes Null as the result.
    pub(super) fn failed_call(&mut self, env: &mut ExecEnv<'_>, message: String) -> Result<(), VmError> {
        self.stack.correct_params(0)?;
        self.runtime_error(env.reports, message);
        self.stack.push_null();
        Ok(())
    }
}

fn arith(a: &Value, b: &Value, int_op: fn(i32, i32) -> i32, float_op: fn(f64, f64) -> f64) -> Value {
    match (a, b) {
        (Value::Int(x), Value::Int(y)) => Value::Int(int_op(*x, *y)),
        _ => Value::Float(float_op(a.get_float(), b.get_float())),
    }
}
