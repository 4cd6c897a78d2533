//! The script registry: owns every live script and advances them once per
//! engine tick.

mod cache;
mod loader;

use std::collections::HashSet;
use std::rc::Rc;

pub use cache::ScriptCache;
pub use loader::{DirectoryLoader, MemoryLoader, ScriptLoader};

use crate::config::{ConfigError, EngineConfig};
use crate::debug::Debugger;
use crate::error::{RegistryError, ScriptErrorReport};
use crate::host::{Clock, ExecEnv, SchedulerRequest, ScriptDirectory, ScriptHost};
use crate::image::{LoadError, Opcode, OpcodeMap, ScriptImage};
use crate::native::NativeHandle;
use crate::script::{Script, ScriptId, ScriptState, WaitTarget};
use crate::value::{Globals, Value};

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct TickStats {
    pub instructions: usize,
    pub removed: usize,
    /// The tick ended early at a debugger break.
    pub stopped: bool,
}

pub struct Registry {
    config: EngineConfig,
    opcodes: OpcodeMap,
    scripts: Vec<Script>,
    directory: ScriptDirectory,
    globals: Globals,
    cache: ScriptCache,
    loader: Option<Box<dyn ScriptLoader>>,
    next_id: u32,
    pub(crate) debugger: Option<Debugger>,
}

impl Default for Registry {
    fn default() -> Self {
        Self::with_opcodes(EngineConfig::default(), OpcodeMap::standard())
    }
}

impl Registry {
    pub fn new(config: EngineConfig) -> Result<Self, ConfigError> {
        let opcodes = OpcodeMap::for_dialect(&config.dialect)?;
        Ok(Self::with_opcodes(config, opcodes))
    }

    fn with_opcodes(config: EngineConfig, opcodes: OpcodeMap) -> Self {
        Self {
            cache: ScriptCache::new(config.max_cached_scripts),
            config,
            opcodes,
            scripts: Vec::new(),
            directory: ScriptDirectory::new(),
            globals: Globals::new(),
            loader: None,
            next_id: 1,
            debugger: None,
        }
    }

    pub fn set_loader(&mut self, loader: Box<dyn ScriptLoader>) {
        self.loader = Some(loader);
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Engine-wide globals.
    pub fn globals(&self) -> &Globals {
        &self.globals
    }

    pub fn len(&self) -> usize {
        self.scripts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.scripts.is_empty()
    }

    pub fn ids(&self) -> Vec<ScriptId> {
        self.scripts.iter().map(Script::id).collect()
    }

    pub fn scripts(&self) -> impl Iterator<Item = &Script> {
        self.scripts.iter()
    }

    pub(crate) fn index_of(&self, id: ScriptId) -> Option<usize> {
        self.scripts.iter().position(|s| s.id() == id)
    }

    pub fn script(&self, id: ScriptId) -> Option<&Script> {
        self.scripts.iter().find(|s| s.id() == id)
    }

    pub fn script_mut(&mut self, id: ScriptId) -> Option<&mut Script> {
        self.scripts.iter_mut().find(|s| s.id() == id)
    }

    fn allocate_id(&mut self) -> ScriptId {
        let id = ScriptId(self.next_id);
        self.next_id += 1;
        id
    }

    /// Starts a top-level script running `image`.
    pub fn add_image(&mut self, image: Rc<ScriptImage>, owner: Option<NativeHandle>) -> ScriptId {
        let id = self.allocate_id();
        let script = Script::new(id, image, self.opcodes.clone(), owner);
        log::debug!("script {} started: '{}'", id, script.filename());
        self.directory.insert(id, script.entry());
        self.scripts.push(script);
        id
    }

    /// Loads `bytes` and starts it. A failed load leaves the registry as it was.
    pub fn load(
        &mut self,
        bytes: impl Into<Vec<u8>>,
        filename: &str,
        owner: Option<NativeHandle>,
    ) -> Result<ScriptId, LoadError> {
        let image = Rc::new(ScriptImage::load(bytes, filename, &self.config.load_options())?);
        self.cache.insert(Rc::clone(&image));
        Ok(self.add_image(image, owner))
    }

    /// Compiled image of `filename`, from the cache or the loader.
    pub fn image(&mut self, filename: &str) -> Result<Rc<ScriptImage>, RegistryError> {
        if let Some(image) = self.cache.get(filename) {
            return Ok(image);
        }
        let loader = self
            .loader
            .as_mut()
            .ok_or_else(|| RegistryError::NoLoader(filename.to_owned()))?;
        let bytes = loader.read(filename).map_err(|source| RegistryError::Read {
            filename: filename.to_owned(),
            source,
        })?;
        let image = Rc::new(ScriptImage::load(bytes, filename, &self.config.load_options())?);
        self.cache.insert(Rc::clone(&image));
        Ok(image)
    }

    pub fn run_script(&mut self, filename: &str, owner: Option<NativeHandle>) -> Result<ScriptId, RegistryError> {
        let image = self.image(filename)?;
        Ok(self.add_image(image, owner))
    }

    pub fn clear_cache(&mut self) {
        self.cache.clear();
    }

    /// Whether `filename` is known, cached or through the loader.
    pub fn script_exists(&self, filename: &str) -> bool {
        self.cache.contains(filename)
            || self.scripts.iter().any(|s| s.filename().eq_ignore_ascii_case(filename))
            || self.loader.as_ref().is_some_and(|l| l.exists(filename))
    }

    /// Whether a live top-level script runs `filename`.
    pub fn is_running(&self, filename: &str) -> bool {
        self.scripts.iter().any(|s| {
            !s.is_thread() && !s.state().is_terminal() && s.filename().eq_ignore_ascii_case(filename)
        })
    }

    /// Runs event handler `event` of script `id` in a new thread.
    pub fn apply_event(&mut self, id: ScriptId, event: &str, unbreakable: bool) -> Option<ScriptId> {
        let index = self.index_of(id)?;
        let script = &self.scripts[index];
        if script.is_thread() || matches!(script.state(), ScriptState::Finished | ScriptState::Error) {
            return None;
        }
        let entry = script.image().event_pos(event)?;
        let source = script.entry();
        let thread_id = self.allocate_id();
        let mut thread = Script::create_thread(thread_id, &source, entry, event);
        thread.set_unbreakable(unbreakable);
        log::debug!("script {} handles event '{}' in thread {}", id, event, thread_id);
        self.scripts.push(thread);
        Some(thread_id)
    }

    /// Finishes a script; with `including_threads`, its threads too.
    pub fn finish(&mut self, id: ScriptId, including_threads: bool) {
        let Some(index) = self.index_of(id) else {
            return;
        };
        let script = &mut self.scripts[index];
        if script.state() == ScriptState::Finished {
            return;
        }
        script.finish();
        if !including_threads {
            return;
        }
        let filename = script.filename().to_owned();
        let threads: Vec<ScriptId> = self
            .scripts
            .iter()
            .filter(|s| {
                s.is_thread() && s.parent() == Some(id) && s.filename().eq_ignore_ascii_case(&filename)
            })
            .map(Script::id)
            .collect();
        for thread in threads {
            self.finish(thread, true);
        }
    }

    pub fn pause(&mut self, id: ScriptId) {
        if let Some(script) = self.script_mut(id) {
            script.pause();
        }
    }

    pub fn resume(&mut self, id: ScriptId) {
        if let Some(script) = self.script_mut(id) {
            script.resume_paused();
        }
    }

    /// Finishes every script waiting on `handle`, e.g. when the object goes away.
    pub fn reset_object(&mut self, handle: &NativeHandle) {
        let waiting: Vec<(ScriptId, bool)> = self
            .scripts
            .iter()
            .filter(|s| s.is_waiting_on(handle))
            .map(|s| (s.id(), s.is_thread()))
            .collect();
        for (id, thread) in waiting {
            self.release_waiters(id);
            self.finish(id, !thread);
        }
    }

    /// Finishes every script waiting for thread `id` to return.
    pub fn release_waiters(&mut self, id: ScriptId) {
        let waiters: Vec<ScriptId> = self
            .scripts
            .iter()
            .filter(|s| {
                s.state() == ScriptState::WaitingOnScript
                    && matches!(s.wait_target(), Some(WaitTarget::Script(t)) if *t == id)
            })
            .map(Script::id)
            .collect();
        for waiter in waiters {
            self.finish(waiter, false);
        }
    }

    pub fn is_stopped(&self) -> bool {
        self.debugger.as_ref().is_some_and(Debugger::is_stopped)
    }

    /// Advances every script by one engine tick.
    pub fn tick(&mut self, host: &mut dyn ScriptHost) -> TickStats {
        let mut stats = TickStats::default();
        if self.is_stopped() {
            stats.stopped = true;
            return stats;
        }

        self.update_states(Clock::read(host));

        let mut index = 0;
        while index < self.scripts.len() {
            if self.is_stopped() {
                stats.stopped = true;
                break;
            }
            if self.scripts[index].state() == ScriptState::Running {
                stats.instructions += self.run_slice(index, host);
            }
            index += 1;
        }

        stats.removed = self.sweep();
        stats
    }

    fn update_states(&mut self, clock: Clock) {
        for index in 0..self.scripts.len() {
            let script = &self.scripts[index];
            match (script.state(), script.wait_target().cloned()) {
                (ScriptState::Waiting, Some(WaitTarget::Object(handle))) => {
                    let (valid, ready) = match handle.try_borrow() {
                        Ok(object) => (object.is_valid(), object.is_ready()),
                        Err(_) => (true, false),
                    };
                    if !valid {
                        let id = script.id();
                        self.finish(id, false);
                    } else if ready {
                        self.scripts[index].resume(None);
                    }
                }
                (ScriptState::Sleeping, Some(WaitTarget::Until { time, frozen })) => {
                    if clock.sleep_time(frozen) >= time {
                        self.scripts[index].resume(None);
                    }
                }
                (ScriptState::WaitingOnScript, Some(WaitTarget::Script(thread))) => {
                    match self.index_of(thread) {
                        None => self.scripts[index].resume(Some(Value::Null)),
                        Some(t) => match self.scripts[t].state() {
                            ScriptState::Error => self.scripts[index].resume(Some(Value::Null)),
                            ScriptState::ThreadFinished => {
                                let result = self.scripts[t].stack_mut().pop().unwrap_or_default();
                                self.scripts[t].finish();
                                self.scripts[index].resume(Some(result));
                            }
                            _ => {}
                        },
                    }
                }
                _ => {}
            }
        }
    }

    fn run_slice(&mut self, index: usize, host: &mut dyn ScriptHost) -> usize {
        let budget = self.config.max_ops_per_tick;
        let slice = u64::from(self.scripts[index].time_slice());
        let start = host.live_time();
        let mut ops = 0;
        while self.scripts[index].state() == ScriptState::Running && !self.is_stopped() {
            if budget > 0 && ops >= budget {
                log::debug!("script {} yields after {} instructions", self.scripts[index].id(), ops);
                break;
            }
            if slice > 0 && host.live_time().saturating_sub(start) >= slice {
                break;
            }
            self.execute(index, host);
            ops += 1;
            if self.config.single_step {
                break;
            }
        }
        ops
    }

    /// Executes one instruction of the script at `index` and applies what it
    /// asked of the registry.
    fn execute(&mut self, index: usize, host: &mut dyn ScriptHost) -> Option<Opcode> {
        let mut spawned = Vec::new();
        let mut requests = Vec::new();
        let mut reports = Vec::new();
        let result = {
            let mut env = ExecEnv {
                engine_globals: &self.globals,
                directory: &self.directory,
                config: &self.config,
                next_id: &mut self.next_id,
                spawned: &mut spawned,
                requests: &mut requests,
                reports: &mut reports,
            };
            self.scripts[index].step(host, &mut env)
        };

        let executed = match result {
            Ok(op) => Some(op),
            Err(err) => {
                let script = &mut self.scripts[index];
                let report = script.fatal_report(&err);
                log::error!("{report}");
                script.set_state(err.terminal_state());
                reports.push(report);
                None
            }
        };

        for thread in spawned {
            log::debug!("thread {} of '{}' started", thread.id(), thread.filename());
            self.scripts.push(thread);
        }
        self.deliver_reports(reports, host);
        for request in requests {
            self.apply_request(request);
        }

        if executed == Some(Opcode::DbgLine) {
            if let Some(debugger) = self.debugger.as_mut() {
                debugger.after_line(&self.scripts[index], &self.globals);
            }
        }
        executed
    }

    fn deliver_reports(&mut self, reports: Vec<ScriptErrorReport>, host: &mut dyn ScriptHost) {
        for report in reports {
            if let Some(debugger) = self.debugger.as_mut() {
                debugger.on_runtime_error(&report);
            }
            if !self.config.suppress_script_errors {
                host.on_runtime_error(&report);
            }
        }
    }

    fn apply_request(&mut self, request: SchedulerRequest) {
        match request {
            SchedulerRequest::FinishWaiters { handle, except } => {
                let waiting: Vec<(ScriptId, bool)> = self
                    .scripts
                    .iter()
                    .filter(|s| s.id() != except && s.is_waiting_on(&handle))
                    .map(|s| (s.id(), s.is_thread()))
                    .collect();
                for (id, thread) in waiting {
                    self.finish(id, !thread);
                }
            }
            SchedulerRequest::Finish { script, including_threads } => self.finish(script, including_threads),
            SchedulerRequest::ApplyEvent { script, event, unbreakable } => {
                self.apply_event(script, &event, unbreakable);
            }
        }
    }

    /// Executes one instruction of a running script outside the tick loop.
    pub fn step_script(&mut self, id: ScriptId, host: &mut dyn ScriptHost) -> Option<Opcode> {
        let index = self.index_of(id)?;
        if self.scripts[index].state() != ScriptState::Running {
            return None;
        }
        self.execute(index, host)
    }

    /// Removes finished scripts and method threads whose result nobody waits for.
    fn sweep(&mut self) -> usize {
        let awaited: HashSet<ScriptId> = self
            .scripts
            .iter()
            .filter(|s| s.state() == ScriptState::WaitingOnScript)
            .filter_map(|s| match s.wait_target() {
                Some(WaitTarget::Script(t)) => Some(*t),
                _ => None,
            })
            .collect();

        let mut removed = Vec::new();
        self.scripts.retain(|s| {
            let dead = match s.state() {
                ScriptState::Finished | ScriptState::Error => true,
                ScriptState::ThreadFinished => !awaited.contains(&s.id()),
                _ => false,
            };
            if dead {
                removed.push(s.id());
            }
            !dead
        });

        for id in &removed {
            self.directory.remove(id);
            if let Some(debugger) = self.debugger.as_mut() {
                debugger.on_script_removed(*id);
            }
            log::debug!("script {id} removed");
        }
        removed.len()
    }
}
