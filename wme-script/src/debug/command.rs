//! Debugger commands on the registry.

use std::fmt;

use crate::registry::Registry;
use crate::script::Script;
use crate::value::Value;

use super::{Breakpoint, Debugger, ScriptMonitor, StopInfo, Watch};

#[derive(Debug, Clone, Copy, PartialEq, Eq, strum::Display)]
pub enum ErrorLevel {
    Notice,
    Warning,
    Error,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, strum::Display)]
pub enum ErrorCode {
    NotAllowed,
    NoSuchBytecode,
    NoSuchBreakpoint,
    NoSuchWatch,
    NoSuchVariable,
    DuplicateBreakpoint,
    ParseError,
    SourcePathNotSet,
    NoSuchSource,
    WrongType,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DebuggerError {
    pub level: ErrorLevel,
    pub code: ErrorCode,
    pub context: Option<String>,
}

impl fmt::Display for DebuggerError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.level, self.code)?;
        if let Some(context) = &self.context {
            write!(f, " ({context})")?;
        }
        Ok(())
    }
}

impl std::error::Error for DebuggerError {}

impl DebuggerError {
    fn new(level: ErrorLevel, code: ErrorCode, context: impl Into<String>) -> Self {
        Self { level, code, context: Some(context.into()) }
    }

    fn not_allowed(context: &str) -> Self {
        Self::new(ErrorLevel::Error, ErrorCode::NotAllowed, context)
    }
}

/// Parses a literal typed at the debugger prompt.
pub fn parse_literal(text: &str) -> Result<Value, DebuggerError> {
    let text = text.trim();
    let parse_error = || DebuggerError::new(ErrorLevel::Error, ErrorCode::ParseError, text);
    match text {
        "" => Err(parse_error()),
        "null" => Ok(Value::Null),
        "true" => Ok(Value::Bool(true)),
        "false" => Ok(Value::Bool(false)),
        _ => {
            if let Some(inner) = text.strip_prefix('"') {
                return inner
                    .strip_suffix('"')
                    .map(|s| Value::String(s.to_owned()))
                    .ok_or_else(parse_error);
            }
            if let Ok(int) = text.parse::<i32>() {
                return Ok(Value::Int(int));
            }
            if let Ok(float) = text.parse::<f64>() {
                return Ok(Value::Float(float));
            }
            Err(parse_error())
        }
    }
}

/// Source lines around the line a script stopped at.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceListing {
    pub filename: String,
    pub current_line: u32,
    pub first_line: u32,
    pub lines: Vec<String>,
}

impl fmt::Display for SourceListing {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (n, text) in (self.first_line..).zip(&self.lines) {
            let marker = if n == self.current_line { "->" } else { "  " };
            writeln!(f, "{marker}{n:>5}  {text}")?;
        }
        Ok(())
    }
}

impl Registry {
    pub fn attach_debugger(&mut self, monitor: Box<dyn ScriptMonitor>) {
        self.debugger = Some(Debugger::new(self.config().debug.clone(), monitor));
    }

    pub fn detach_debugger(&mut self) -> Option<Debugger> {
        self.debugger.take()
    }

    pub fn debugger(&self) -> Option<&Debugger> {
        self.debugger.as_ref()
    }

    pub fn stop_info(&self) -> Option<&StopInfo> {
        self.debugger.as_ref().and_then(Debugger::stop_info)
    }

    pub fn breakpoints(&self) -> &[Breakpoint] {
        self.debugger.as_ref().map_or(&[][..], Debugger::breakpoints)
    }

    pub fn watches(&self) -> &[Watch] {
        self.debugger.as_ref().map_or(&[][..], Debugger::watches)
    }

    fn debugger_mut(&mut self) -> Result<&mut Debugger, DebuggerError> {
        self.debugger
            .as_mut()
            .ok_or_else(|| DebuggerError::not_allowed("no debugger attached"))
    }

    /// The script the debugger stopped in.
    fn stopped_script(&self) -> Result<&Script, DebuggerError> {
        let stop = self
            .stop_info()
            .ok_or_else(|| DebuggerError::not_allowed("not stopped"))?;
        self.script(stop.script)
            .ok_or_else(|| DebuggerError::not_allowed("stopped script is gone"))
    }

    pub fn add_breakpoint(&mut self, filename: &str, line: u32) -> Result<u32, DebuggerError> {
        if !self.script_exists(filename) {
            return Err(DebuggerError::new(ErrorLevel::Error, ErrorCode::NoSuchBytecode, filename));
        }
        let debugger = self.debugger_mut()?;
        if debugger
            .breakpoints
            .iter()
            .any(|bp| bp.line == line && bp.filename.eq_ignore_ascii_case(filename))
        {
            return Err(DebuggerError::new(
                ErrorLevel::Warning,
                ErrorCode::DuplicateBreakpoint,
                format!("{filename}:{line}"),
            ));
        }
        let id = debugger.allocate_id();
        debugger.breakpoints.push(Breakpoint {
            id,
            filename: filename.to_owned(),
            line,
            enabled: true,
            hits: 0,
        });
        Ok(id)
    }

    fn breakpoint_mut(&mut self, id: u32) -> Result<&mut Breakpoint, DebuggerError> {
        self.debugger_mut()?
            .breakpoints
            .iter_mut()
            .find(|bp| bp.id == id)
            .ok_or_else(|| DebuggerError::new(ErrorLevel::Error, ErrorCode::NoSuchBreakpoint, id.to_string()))
    }

    pub fn remove_breakpoint(&mut self, id: u32) -> Result<(), DebuggerError> {
        self.breakpoint_mut(id)?;
        self.debugger_mut()?.breakpoints.retain(|bp| bp.id != id);
        Ok(())
    }

    pub fn enable_breakpoint(&mut self, id: u32) -> Result<(), DebuggerError> {
        self.breakpoint_mut(id)?.enabled = true;
        Ok(())
    }

    pub fn disable_breakpoint(&mut self, id: u32) -> Result<(), DebuggerError> {
        self.breakpoint_mut(id)?.enabled = false;
        Ok(())
    }

    pub fn add_watch(&mut self, filename: &str, symbol: &str) -> Result<u32, DebuggerError> {
        if !self.script_exists(filename) {
            return Err(DebuggerError::new(ErrorLevel::Error, ErrorCode::NoSuchBytecode, filename));
        }
        let debugger = self.debugger_mut()?;
        let id = debugger.allocate_id();
        debugger.watches.push(Watch {
            id,
            filename: filename.to_owned(),
            symbol: symbol.to_owned(),
            enabled: true,
            hits: 0,
            baselines: Default::default(),
        });
        Ok(id)
    }

    fn watch_mut(&mut self, id: u32) -> Result<&mut Watch, DebuggerError> {
        self.debugger_mut()?
            .watches
            .iter_mut()
            .find(|w| w.id == id)
            .ok_or_else(|| DebuggerError::new(ErrorLevel::Error, ErrorCode::NoSuchWatch, id.to_string()))
    }

    pub fn remove_watch(&mut self, id: u32) -> Result<(), DebuggerError> {
        self.watch_mut(id)?;
        self.debugger_mut()?.watches.retain(|w| w.id != id);
        Ok(())
    }

    pub fn enable_watch(&mut self, id: u32) -> Result<(), DebuggerError> {
        self.watch_mut(id)?.enabled = true;
        Ok(())
    }

    /// Disabling forgets the baselines; the next observation starts over.
    pub fn disable_watch(&mut self, id: u32) -> Result<(), DebuggerError> {
        let watch = self.watch_mut(id)?;
        watch.enabled = false;
        watch.baselines.clear();
        Ok(())
    }

    /// Resumes and breaks at the next line at the current call depth or above.
    pub fn step(&mut self) -> Result<(), DebuggerError> {
        let depth = self.stopped_script()?.call_depth();
        self.debugger_mut()?.resume(Some(depth));
        Ok(())
    }

    /// Resumes and breaks once the current function has returned.
    pub fn step_finish(&mut self) -> Result<(), DebuggerError> {
        let depth = self.stopped_script()?.call_depth();
        self.debugger_mut()?.resume(Some(depth - 1));
        Ok(())
    }

    /// Resumes without stepping.
    pub fn step_continue(&mut self) -> Result<(), DebuggerError> {
        self.debugger_mut()?.resume(None);
        Ok(())
    }

    /// Value of `name` as the stopped script sees it.
    pub fn read_value(&self, name: &str) -> Result<Value, DebuggerError> {
        let script = self.stopped_script()?;
        script
            .lookup_var(name, self.globals())
            .map(|var| var.value().into_stored())
            .ok_or_else(|| DebuggerError::new(ErrorLevel::Warning, ErrorCode::NoSuchVariable, name))
    }

    /// Assigns a parsed literal to `name` in the stopped script's scope.
    pub fn set_value(&mut self, name: &str, literal: &str) -> Result<(), DebuggerError> {
        let value = parse_literal(literal)?;
        let script = self.stopped_script()?;
        let var = script
            .lookup_var(name, self.globals())
            .ok_or_else(|| DebuggerError::new(ErrorLevel::Warning, ErrorCode::NoSuchVariable, name))?;
        if var.constant {
            return Err(DebuggerError::not_allowed("constant"));
        }

        let mut slot = var.slot;
        loop {
            let next = match &*slot.borrow() {
                Value::VariableRef(inner) => inner.clone(),
                Value::Object(_) | Value::Native(_) => {
                    return Err(DebuggerError::new(ErrorLevel::Error, ErrorCode::WrongType, name));
                }
                _ => break,
            };
            slot = next;
        }
        *slot.borrow_mut() = value;
        Ok(())
    }

    /// Source lines around the stopped script's current line.
    pub fn source_listing(&self) -> Result<SourceListing, DebuggerError> {
        let script = self.stopped_script()?;
        let config = self.config();
        let root = config.debug.source_root.as_ref().ok_or(DebuggerError {
            level: ErrorLevel::Error,
            code: ErrorCode::SourcePathNotSet,
            context: None,
        })?;

        let path = root.join(script.filename().replace('\\', "/"));
        let bytes = std::fs::read(&path)
            .map_err(|e| DebuggerError::new(ErrorLevel::Error, ErrorCode::NoSuchSource, format!("{path:?}: {e}")))?;
        let text = script.image().decode_text(&bytes);

        let current = script.current_line();
        let context = config.debug.listing_context;
        let first = current.saturating_sub(context).max(1);
        let last = current.saturating_add(context);
        let lines = (1u32..)
            .zip(text.lines())
            .filter(|(n, _)| (first..=last).contains(n))
            .map(|(_, l)| l.to_owned())
            .collect();
        Ok(SourceListing {
            filename: script.filename().to_owned(),
            current_line: current,
            first_line: first,
            lines,
        })
    }
}
