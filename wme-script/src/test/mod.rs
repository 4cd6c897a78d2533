//! Developer-facing utilities for the WME script VM.
//!
//! This is a module (not `src/bin/...`) so unit tests, integration tests and
//! the tools crates can share the hosts below.

use std::path::Path;

use anyhow::{Context, Result};

use crate::config::EngineConfig;
use crate::error::ScriptErrorReport;
use crate::host::ScriptHost;
use crate::registry::{Registry, TickStats};

/// A host with a clock that never moves and no externals.
#[derive(Default)]
pub struct NullHost;

impl ScriptHost for NullHost {
    fn live_time(&self) -> u64 {
        0
    }
}

/// A host whose clocks are advanced by hand and which records every
/// runtime error it is shown.
#[derive(Default)]
pub struct ManualHost {
    pub live: u64,
    pub game: u64,
    pub frozen: bool,
    pub errors: Vec<ScriptErrorReport>,
}

impl ManualHost {
    pub fn new() -> Self {
        Self::default()
    }

    /// Moves the live clock, and the game clock unless frozen.
    pub fn advance(&mut self, ms: u64) {
        self.live += ms;
        if !self.frozen {
            self.game += ms;
        }
    }
}

impl ScriptHost for ManualHost {
    fn live_time(&self) -> u64 {
        self.live
    }

    fn game_time(&self) -> u64 {
        self.game
    }

    fn is_frozen(&self) -> bool {
        self.frozen
    }

    fn on_runtime_error(&mut self, report: &ScriptErrorReport) {
        self.errors.push(report.clone());
    }
}

/// Loads a compiled script and ticks the registry until it empties or
/// `max_ticks` pass, advancing the clock 16ms per tick.
pub fn run_file_for_smoke(path: impl AsRef<Path>, max_ticks: usize) -> Result<(TickStats, ManualHost)> {
    let path = path.as_ref();
    let bytes = std::fs::read(path).with_context(|| format!("read {path:?}"))?;
    let mut registry = Registry::new(EngineConfig::default())?;
    registry.load(bytes, &path.to_string_lossy(), None)?;

    let mut host = ManualHost::new();
    let mut total = TickStats::default();
    for _ in 0..max_ticks {
        if registry.is_empty() {
            break;
        }
        let stats = registry.tick(&mut host);
        total.instructions += stats.instructions;
        total.removed += stats.removed;
        host.advance(16);
    }
    Ok((total, host))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::image::{ImageBuilder, Opcode};

    #[test]
    fn smoke_runs_a_compiled_file() -> Result<()> {
        let mut b = ImageBuilder::new();
        b.push_int(100).call_external("Sleep", 1).op(Opcode::PopEmpty);
        b.op(Opcode::Ret);
        let path = std::env::temp_dir().join(format!("wme-smoke-{}.script", std::process::id()));
        std::fs::write(&path, b.build()?)?;

        let (stats, host) = run_file_for_smoke(&path, 1_000)?;
        let _ = std::fs::remove_file(&path);
        assert_eq!(stats.removed, 1);
        assert!(host.errors.is_empty());
        assert!(host.live >= 100 && host.live < 200);
        Ok(())
    }

    #[test]
    fn frozen_game_clock_stands_still() {
        let mut host = ManualHost::new();
        host.advance(10);
        host.frozen = true;
        host.advance(5);
        assert_eq!((host.live, host.game), (15, 10));
    }
}
