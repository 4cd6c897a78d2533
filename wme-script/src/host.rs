//! The boundary between the interpreter and the game engine.

use std::collections::HashMap;

use crate::config::EngineConfig;
use crate::error::{ScriptErrorReport, VmError};
use crate::image::ExternalFunction;
use crate::native::NativeHandle;
use crate::script::{Script, ScriptEntry, ScriptId};
use crate::stack::Stack;
use crate::value::{Globals, Value};

/// Services the engine provides to running scripts.
pub trait ScriptHost {
    /// Engine-level external function. Return `Ok(true)` after pushing the
    /// result, `Ok(false)` to let the built-in externals try.
    fn external_call(&mut self, _call: &mut CallContext<'_, '_>, _name: &str) -> anyhow::Result<bool> {
        Ok(false)
    }

    /// Function from a library declared in the script's externals table.
    fn foreign_call(
        &mut self,
        _call: &mut CallContext<'_, '_>,
        _function: &ExternalFunction,
    ) -> anyhow::Result<bool> {
        Ok(false)
    }

    /// Wall-clock milliseconds; keeps running while the game is frozen.
    fn live_time(&self) -> u64;

    /// Game milliseconds; stops while the game is frozen.
    fn game_time(&self) -> u64 {
        self.live_time()
    }

    fn is_frozen(&self) -> bool {
        false
    }

    /// User-facing notice for script errors.
    fn on_runtime_error(&mut self, _report: &ScriptErrorReport) {}
}

/// Clock readings taken when an instruction starts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Clock {
    pub live: u64,
    pub game: u64,
    pub frozen: bool,
}

impl Clock {
    pub fn read(host: &dyn ScriptHost) -> Self {
        Self { live: host.live_time(), game: host.game_time(), frozen: host.is_frozen() }
    }

    /// The clock sleeping scripts are measured against.
    pub fn sleep_time(&self, frozen: bool) -> u64 {
        if frozen {
            self.live
        } else {
            self.game
        }
    }
}

/// Work a script asks of the registry; applied after the current instruction.
#[derive(Debug, Clone)]
pub(crate) enum SchedulerRequest {
    /// Finish every script waiting on `handle` other than `except`.
    FinishWaiters { handle: NativeHandle, except: ScriptId },
    Finish { script: ScriptId, including_threads: bool },
    ApplyEvent { script: ScriptId, event: String, unbreakable: bool },
}

pub(crate) type ScriptDirectory = HashMap<ScriptId, ScriptEntry>;

/// Registry state a script may touch while it executes.
pub(crate) struct ExecEnv<'e> {
    pub engine_globals: &'e Globals,
    pub directory: &'e ScriptDirectory,
    pub config: &'e EngineConfig,
    pub next_id: &'e mut u32,
    pub spawned: &'e mut Vec<Script>,
    pub requests: &'e mut Vec<SchedulerRequest>,
    pub reports: &'e mut Vec<ScriptErrorReport>,
}

impl ExecEnv<'_> {
    pub fn allocate_id(&mut self) -> ScriptId {
        let id = ScriptId(*self.next_id);
        *self.next_id += 1;
        id
    }
}

/// What an external function or native method sees of the calling script.
pub struct CallContext<'a, 'e> {
    script: &'a mut Script,
    env: &'a mut ExecEnv<'e>,
    clock: Clock,
}

impl<'a, 'e> CallContext<'a, 'e> {
    pub(crate) fn new(script: &'a mut Script, env: &'a mut ExecEnv<'e>, clock: Clock) -> Self {
        Self { script, env, clock }
    }

    pub fn script_id(&self) -> ScriptId {
        self.script.id()
    }

    pub fn filename(&self) -> &str {
        self.script.filename()
    }

    pub fn line(&self) -> u32 {
        self.script.current_line()
    }

    pub fn clock(&self) -> Clock {
        self.clock
    }

    pub fn is_unbreakable(&self) -> bool {
        self.script.is_unbreakable()
    }

    pub fn owner(&self) -> Option<NativeHandle> {
        self.script.owner().cloned()
    }

    pub fn stack(&mut self) -> &mut Stack {
        self.script.stack_mut()
    }

    /// Current `this` object of the caller.
    pub fn this_value(&self) -> Option<Value> {
        self.script.this_stack().top().map(|v| v.clone().into_stored())
    }

    /// Normalizes the argument window to `n` and pops the arguments, first
    /// argument first.
    pub fn args(&mut self, n: usize) -> Result<Vec<Value>, VmError> {
        let stack = self.script.stack_mut();
        stack.correct_params(n)?;
        (0..n).map(|_| stack.pop().map(Value::into_stored)).collect()
    }

    pub fn push_return(&mut self, value: Value) {
        self.script.stack_mut().push(value);
    }

    pub fn engine_globals(&self) -> &Globals {
        self.env.engine_globals
    }

    pub fn script_globals(&self) -> &Globals {
        self.script.globals()
    }

    pub fn runtime_error(&mut self, message: impl Into<String>) {
        self.script.runtime_error(self.env.reports, message);
    }

    /// Suspends the caller for `ms` milliseconds.
    pub fn sleep(&mut self, ms: u32) {
        if !self.script.sleep(ms, self.clock) {
            self.runtime_error("Script cannot be interrupted.");
        }
    }

    /// Suspends the caller until `handle` is ready.
    pub fn wait_for(&mut self, handle: NativeHandle) {
        if !self.script.wait_for(handle) {
            self.runtime_error("Script cannot be interrupted.");
        }
    }

    /// Like [`CallContext::wait_for`], finishing every other script waiting on
    /// the same object first.
    pub fn wait_for_exclusive(&mut self, handle: NativeHandle) {
        if self.script.is_unbreakable() {
            self.runtime_error("Script cannot be interrupted.");
            return;
        }
        self.env.requests.push(SchedulerRequest::FinishWaiters {
            handle: handle.clone(),
            except: self.script.id(),
        });
        self.script.wait_for(handle);
    }

    pub fn set_time_slice(&mut self, ms: u32) {
        self.script.set_time_slice(ms);
    }

    /// Ends the calling script once the instruction completes.
    pub fn finish_script(&mut self, including_threads: bool) {
        self.env.requests.push(SchedulerRequest::Finish {
            script: self.script.id(),
            including_threads,
        });
    }

    /// Runs event handler `event` of `script` in a new thread.
    pub fn apply_event(&mut self, script: ScriptId, event: &str, unbreakable: bool) {
        self.env.requests.push(SchedulerRequest::ApplyEvent {
            script,
            event: event.to_owned(),
            unbreakable,
        });
    }
}
