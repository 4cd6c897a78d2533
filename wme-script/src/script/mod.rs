//! Script instances and their state machine.

mod dispatch;
mod interpreter;

use std::fmt;
use std::rc::Rc;

use serde::Serialize;

use crate::error::{ScriptErrorReport, VmError};
use crate::host::Clock;
use crate::image::{OpcodeMap, ScriptImage};
use crate::native::{same_handle, NativeHandle};
use crate::stack::Stack;
use crate::value::{Globals, Value, Variable};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct ScriptId(pub u32);

impl fmt::Display for ScriptId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, strum::Display)]
pub enum ScriptState {
    Running,
    /// Waiting for a native object to become ready.
    Waiting,
    /// Waiting for a method thread to return.
    WaitingOnScript,
    Sleeping,
    Paused,
    ThreadFinished,
    Finished,
    /// Main body done; event and method handlers stay callable.
    Persistent,
    Error,
}

impl ScriptState {
    pub fn is_terminal(self) -> bool {
        matches!(self, ScriptState::Finished | ScriptState::ThreadFinished | ScriptState::Error)
    }
}

/// What a suspended script waits for.
#[derive(Debug, Clone)]
pub enum WaitTarget {
    Object(NativeHandle),
    Script(ScriptId),
    Until { time: u64, frozen: bool },
}

/// Everything a thread inherits from the script it runs code of.
#[derive(Debug, Clone)]
pub struct ScriptEntry {
    pub id: ScriptId,
    pub filename: String,
    pub image: Rc<ScriptImage>,
    pub opcodes: OpcodeMap,
    pub globals: Globals,
    pub owner: Option<NativeHandle>,
}

/// One interpreter instance: a top-level script or a thread of one.
#[derive(Debug)]
pub struct Script {
    id: ScriptId,
    filename: String,
    image: Rc<ScriptImage>,
    opcodes: OpcodeMap,
    ip: u32,
    state: ScriptState,
    stack: Stack,
    scope_stack: Stack,
    call_stack: Stack,
    this_stack: Stack,
    globals: Globals,
    reg1: Value,
    owner: Option<NativeHandle>,
    parent: Option<ScriptId>,
    thread: bool,
    method_thread: bool,
    thread_event: Option<String>,
    unbreakable: bool,
    time_slice: u32,
    wait: Option<WaitTarget>,
    paused_from: Option<ScriptState>,
    current_line: u32,
}

impl Script {
    pub fn new(id: ScriptId, image: Rc<ScriptImage>, opcodes: OpcodeMap, owner: Option<NativeHandle>) -> Self {
        Self {
            id,
            filename: image.filename().to_owned(),
            ip: image.code_start(),
            image,
            opcodes,
            state: ScriptState::Running,
            stack: Stack::new(),
            scope_stack: Stack::new(),
            call_stack: Stack::new(),
            this_stack: Stack::new(),
            globals: Globals::new(),
            reg1: Value::Null,
            owner,
            parent: None,
            thread: false,
            method_thread: false,
            thread_event: None,
            unbreakable: false,
            time_slice: 0,
            wait: None,
            paused_from: None,
            current_line: 0,
        }
    }

    /// A thread running `source`'s code from `entry`, sharing its image and
    /// globals.
    pub fn create_thread(id: ScriptId, source: &ScriptEntry, entry: u32, event: &str) -> Self {
        let mut thread = Self::new(id, Rc::clone(&source.image), source.opcodes.clone(), source.owner.clone());
        thread.filename = source.filename.clone();
        thread.globals = source.globals.clone();
        thread.ip = entry;
        thread.parent = Some(source.id);
        thread.thread = true;
        thread.thread_event = Some(event.to_owned());
        thread
    }

    /// A thread running method `method` of `source`; `None` when the image
    /// has no such method.
    pub fn create_method_thread(id: ScriptId, source: &ScriptEntry, method: &str) -> Option<Self> {
        let entry = source.image.method_pos(method)?;
        let mut thread = Self::create_thread(id, source, entry, method);
        thread.method_thread = true;
        Some(thread)
    }

    /// Moves the caller's argument window, count included, onto this
    /// thread's operand stack.
    pub fn copy_parameters(&mut self, caller: &mut Stack) -> Result<(), VmError> {
        let n = usize::try_from(caller.pop()?.get_int()).unwrap_or(0);
        if n > caller.len() {
            return Err(VmError::StackUnderflow);
        }
        for i in (0..n).rev() {
            self.stack.push(caller.at(i).cloned().unwrap_or_default());
        }
        self.stack.push_int(n as i32);
        for _ in 0..n {
            caller.pop()?;
        }
        Ok(())
    }

    /// The data threads of this script inherit.
    pub fn entry(&self) -> ScriptEntry {
        ScriptEntry {
            id: self.id,
            filename: self.filename.clone(),
            image: Rc::clone(&self.image),
            opcodes: self.opcodes.clone(),
            globals: self.globals.clone(),
            owner: self.owner.clone(),
        }
    }

    pub fn id(&self) -> ScriptId {
        self.id
    }

    pub fn filename(&self) -> &str {
        &self.filename
    }

    pub fn image(&self) -> &Rc<ScriptImage> {
        &self.image
    }

    pub fn ip(&self) -> u32 {
        self.ip
    }

    pub fn state(&self) -> ScriptState {
        self.state
    }

    pub(crate) fn set_state(&mut self, state: ScriptState) {
        self.state = state;
    }

    pub fn current_line(&self) -> u32 {
        self.current_line
    }

    pub fn stack(&self) -> &Stack {
        &self.stack
    }

    pub fn stack_mut(&mut self) -> &mut Stack {
        &mut self.stack
    }

    pub fn scope_stack(&self) -> &Stack {
        &self.scope_stack
    }

    pub fn call_stack(&self) -> &Stack {
        &self.call_stack
    }

    pub fn this_stack(&self) -> &Stack {
        &self.this_stack
    }

    /// Depth of nested `CALL`s, `-1` at top level.
    pub fn call_depth(&self) -> i32 {
        self.call_stack.sp() as i32
    }

    pub fn globals(&self) -> &Globals {
        &self.globals
    }

    pub fn reg1(&self) -> &Value {
        &self.reg1
    }

    pub fn owner(&self) -> Option<&NativeHandle> {
        self.owner.as_ref()
    }

    pub fn parent(&self) -> Option<ScriptId> {
        self.parent
    }

    pub fn is_thread(&self) -> bool {
        self.thread
    }

    pub fn is_method_thread(&self) -> bool {
        self.method_thread
    }

    /// Event or method name a thread was created for.
    pub fn thread_event(&self) -> Option<&str> {
        self.thread_event.as_deref()
    }

    pub fn is_unbreakable(&self) -> bool {
        self.unbreakable
    }

    pub fn set_unbreakable(&mut self, unbreakable: bool) {
        self.unbreakable = unbreakable;
    }

    pub fn time_slice(&self) -> u32 {
        self.time_slice
    }

    pub fn set_time_slice(&mut self, ms: u32) {
        self.time_slice = ms;
    }

    pub fn wait_target(&self) -> Option<&WaitTarget> {
        self.wait.as_ref()
    }

    pub fn is_waiting_on(&self, handle: &NativeHandle) -> bool {
        self.state == ScriptState::Waiting
            && matches!(&self.wait, Some(WaitTarget::Object(h)) if same_handle(h, handle))
    }

    /// Suspends for `ms` milliseconds of game time (live time while the game
    /// is frozen). Returns false for unbreakable scripts.
    pub fn sleep(&mut self, ms: u32, clock: Clock) -> bool {
        if self.unbreakable {
            return false;
        }
        self.state = ScriptState::Sleeping;
        self.wait = Some(WaitTarget::Until {
            time: clock.sleep_time(clock.frozen) + u64::from(ms),
            frozen: clock.frozen,
        });
        true
    }

    /// Suspends until `handle` is ready. Returns false for unbreakable scripts.
    pub fn wait_for(&mut self, handle: NativeHandle) -> bool {
        if self.unbreakable {
            return false;
        }
        self.state = ScriptState::Waiting;
        self.wait = Some(WaitTarget::Object(handle));
        true
    }

    pub(crate) fn wait_for_script(&mut self, thread: ScriptId) {
        self.state = ScriptState::WaitingOnScript;
        self.wait = Some(WaitTarget::Script(thread));
    }

    /// Back to Running, pushing `result` for a finished method call.
    pub(crate) fn resume(&mut self, result: Option<Value>) {
        if let Some(value) = result {
            self.stack.push(value);
        }
        self.wait = None;
        self.state = ScriptState::Running;
    }

    pub fn pause(&mut self) {
        if self.state != ScriptState::Paused {
            self.paused_from = Some(self.state);
            self.state = ScriptState::Paused;
        }
    }

    pub fn resume_paused(&mut self) {
        if self.state == ScriptState::Paused {
            self.state = self.paused_from.take().unwrap_or(ScriptState::Running);
        }
    }

    pub fn finish(&mut self) {
        self.state = ScriptState::Finished;
        self.wait = None;
    }

    /// Read-only variable lookup: top scope, script globals, engine globals.
    pub fn lookup_var(&self, name: &str, engine_globals: &Globals) -> Option<Variable> {
        if let Some(Value::Object(scope)) = self.scope_stack.top() {
            if let Some(var) = scope.get(name) {
                return Some(var.clone());
            }
        }
        self.globals.get(name).or_else(|| engine_globals.get(name))
    }

    /// Variable lookup that defines a Null script global on a miss.
    pub(crate) fn get_var(&self, name: &str, engine_globals: &Globals) -> Variable {
        match self.lookup_var(name, engine_globals) {
            Some(var) => var,
            None => {
                log::warn!(
                    "Variable '{}' is inaccessible in the current block. Consider changing the script. (script: {}, line: {})",
                    name,
                    self.filename,
                    self.current_line
                );
                self.globals.define(name, false)
            }
        }
    }

    pub(crate) fn runtime_error(&self, reports: &mut Vec<ScriptErrorReport>, message: impl Into<String>) {
        let report = ScriptErrorReport {
            script: self.id,
            filename: self.filename.clone(),
            line: self.current_line,
            message: message.into(),
            fatal: false,
        };
        log::warn!("{report}");
        reports.push(report);
    }

    pub(crate) fn fatal_report(&self, error: &VmError) -> ScriptErrorReport {
        ScriptErrorReport {
            script: self.id,
            filename: self.filename.clone(),
            line: self.current_line,
            message: error.to_string(),
            fatal: true,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::image::{ImageBuilder, LoadOptions, Opcode};
    use pretty_assertions::assert_eq;

    fn image() -> Rc<ScriptImage> {
        let mut b = ImageBuilder::new();
        b.op(Opcode::Ret);
        let m = b.here();
        b.op(Opcode::Ret);
        b.method("Open", m);
        Rc::new(ScriptImage::load(b.build().unwrap(), "door.script", &LoadOptions::default()).unwrap())
    }

    #[test]
    fn threads_alias_globals_and_image() {
        let main = Script::new(ScriptId(1), image(), OpcodeMap::standard(), None);
        main.globals().define("x", false);
        let t = Script::create_method_thread(ScriptId(2), &main.entry(), "open").unwrap();
        assert!(t.is_thread() && t.is_method_thread());
        assert_eq!(t.parent(), Some(ScriptId(1)));
        assert!(t.globals().shares_with(main.globals()));
        assert!(Rc::ptr_eq(t.image(), main.image()));
        assert_eq!(t.ip(), main.image().method_pos("Open").unwrap());
        assert_eq!(t.thread_event(), Some("open"));
        assert!(Script::create_method_thread(ScriptId(3), &main.entry(), "Close").is_none());
    }

    #[test]
    fn copy_parameters_keeps_order() {
        let main = Script::new(ScriptId(1), image(), OpcodeMap::standard(), None);
        let mut t = Script::create_method_thread(ScriptId(2), &main.entry(), "Open").unwrap();
        let mut caller = Stack::new();
        caller.push_string("below");
        caller.push_string("b");
        caller.push_string("a");
        caller.push_int(2);
        t.copy_parameters(&mut caller).unwrap();
        let copied: Vec<String> = t.stack().iter().map(Value::get_string).collect();
        assert_eq!(copied, vec!["b", "a", "2"]);
        assert_eq!(caller.len(), 1);
        assert_eq!(caller.top().map(Value::get_string).as_deref(), Some("below"));
    }

    #[test]
    fn unbreakable_rejects_suspension() {
        let mut s = Script::new(ScriptId(1), image(), OpcodeMap::standard(), None);
        s.set_unbreakable(true);
        assert!(!s.sleep(100, Clock::default()));
        assert_eq!(s.state(), ScriptState::Running);
        s.set_unbreakable(false);
        assert!(s.sleep(100, Clock { live: 5, game: 50, frozen: false }));
        assert!(matches!(s.wait_target(), Some(WaitTarget::Until { time: 150, frozen: false })));
    }

    #[test]
    fn pause_remembers_state() {
        let mut s = Script::new(ScriptId(1), image(), OpcodeMap::standard(), None);
        s.sleep(10, Clock::default());
        s.pause();
        s.pause();
        assert_eq!(s.state(), ScriptState::Paused);
        s.resume_paused();
        assert_eq!(s.state(), ScriptState::Sleeping);
    }
}
