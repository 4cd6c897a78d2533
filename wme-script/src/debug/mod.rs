//! Breakpoints, watches and stepping. The debugger only observes: it is
//! consulted after each `DBG_LINE` and can stop the registry's tick loop, but
//! never changes script state.

mod command;

use std::collections::HashMap;

use serde::Serialize;

pub use command::{parse_literal, DebuggerError, ErrorCode, ErrorLevel, SourceListing};

use crate::config::DebugConfig;
use crate::error::ScriptErrorReport;
use crate::script::{Script, ScriptId};
use crate::value::{Globals, ValueType};

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Breakpoint {
    pub id: u32,
    pub filename: String,
    pub line: u32,
    pub enabled: bool,
    pub hits: u32,
}

/// What a watch saw last: the resolved type and its string form, or nothing
/// when the variable did not exist.
type Snapshot = Option<(ValueType, String)>;

#[derive(Debug, Clone, Serialize)]
pub struct Watch {
    pub id: u32,
    pub filename: String,
    pub symbol: String,
    pub enabled: bool,
    pub hits: u32,
    #[serde(skip)]
    baselines: HashMap<ScriptId, Snapshot>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum StopReason {
    Breakpoint(u32),
    Watch(u32),
    Step,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StopInfo {
    pub script: ScriptId,
    pub filename: String,
    pub line: u32,
    pub reason: StopReason,
}

/// Receives debugger notifications.
pub trait ScriptMonitor {
    fn on_break(&mut self, _stop: &StopInfo) {}

    fn on_runtime_error(&mut self, _report: &ScriptErrorReport) {}

    fn on_script_removed(&mut self, _script: ScriptId) {}
}

/// A monitor that ignores everything.
pub struct SilentMonitor;

impl ScriptMonitor for SilentMonitor {}

pub struct Debugger {
    config: DebugConfig,
    monitor: Box<dyn ScriptMonitor>,
    breakpoints: Vec<Breakpoint>,
    watches: Vec<Watch>,
    next_id: u32,
    /// Break at the next line whose call depth is at or below this.
    step_depth: Option<i32>,
    stop: Option<StopInfo>,
}

impl Debugger {
    pub fn new(config: DebugConfig, monitor: Box<dyn ScriptMonitor>) -> Self {
        Self {
            config,
            monitor,
            breakpoints: Vec::new(),
            watches: Vec::new(),
            next_id: 1,
            step_depth: None,
            stop: None,
        }
    }

    pub fn config(&self) -> &DebugConfig {
        &self.config
    }

    pub fn is_stopped(&self) -> bool {
        self.stop.is_some()
    }

    pub fn stop_info(&self) -> Option<&StopInfo> {
        self.stop.as_ref()
    }

    pub fn breakpoints(&self) -> &[Breakpoint] {
        &self.breakpoints
    }

    pub fn watches(&self) -> &[Watch] {
        &self.watches
    }

    pub fn step_depth(&self) -> Option<i32> {
        self.step_depth
    }

    fn allocate_id(&mut self) -> u32 {
        let id = self.next_id;
        self.next_id += 1;
        id
    }

    /// Consulted after `script` executed a `DBG_LINE`.
    pub(crate) fn after_line(&mut self, script: &Script, engine_globals: &Globals) {
        let filename = script.filename();
        let line = script.current_line();

        if let Some(bp) = self
            .breakpoints
            .iter_mut()
            .find(|bp| bp.enabled && bp.line == line && bp.filename.eq_ignore_ascii_case(filename))
        {
            bp.hits += 1;
            let reason = StopReason::Breakpoint(bp.id);
            self.stop_at(script, reason);
            return;
        }

        let mut changed = None;
        for watch in self
            .watches
            .iter_mut()
            .filter(|w| w.enabled && w.filename.eq_ignore_ascii_case(filename))
        {
            let current: Snapshot = script
                .lookup_var(&watch.symbol, engine_globals)
                .map(|var| var.value().with_resolved(|v| (v.value_type(), v.get_string())));
            match watch.baselines.insert(script.id(), current.clone()) {
                Some(previous) if previous != current => {
                    watch.hits += 1;
                    changed.get_or_insert(watch.id);
                }
                _ => {}
            }
        }
        if let Some(id) = changed {
            self.stop_at(script, StopReason::Watch(id));
            return;
        }

        if self.step_depth.is_some_and(|depth| script.call_depth() <= depth) {
            self.stop_at(script, StopReason::Step);
        }
    }

    fn stop_at(&mut self, script: &Script, reason: StopReason) {
        let stop = StopInfo {
            script: script.id(),
            filename: script.filename().to_owned(),
            line: script.current_line(),
            reason,
        };
        log::debug!("debugger: {} stopped at {}:{} ({:?})", stop.script, stop.filename, stop.line, reason);
        self.monitor.on_break(&stop);
        self.stop = Some(stop);
    }

    pub(crate) fn resume(&mut self, step_depth: Option<i32>) {
        self.step_depth = step_depth;
        self.stop = None;
    }

    pub(crate) fn on_runtime_error(&mut self, report: &ScriptErrorReport) {
        self.monitor.on_runtime_error(report);
    }

    pub(crate) fn on_script_removed(&mut self, script: ScriptId) {
        for watch in &mut self.watches {
            watch.baselines.remove(&script);
        }
        if self.stop.as_ref().is_some_and(|s| s.script == script) {
            self.stop = None;
        }
        self.monitor.on_script_removed(script);
    }
}
