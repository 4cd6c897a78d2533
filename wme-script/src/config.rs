use std::{fs::File, io::Read, path::Path, path::PathBuf};

use log::LevelFilter;
use serde::{Deserialize, Serialize};
use wme_nls::Encoding;

use crate::image::{Dialect, LoadOptions, OpcodeMapError, MIN_SCRIPT_VERSION};

#[derive(thiserror::Error, Debug)]
pub enum ConfigError {
    #[error("cannot read engine configuration")]
    Io(#[from] std::io::Error),

    #[error("malformed engine configuration")]
    Json(#[from] serde_json::Error),

    #[error("invalid opcode dialect")]
    Dialect(#[from] OpcodeMapError),
}

/// Logger configuration used by the tools and hosts.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct LoggerConfig {
    /// Level for the interpreter's own modules.
    pub script_level_filter: LevelFilter,
    pub level_filter: LevelFilter,
}

impl Default for LoggerConfig {
    fn default() -> Self {
        Self { script_level_filter: LevelFilter::Info, level_filter: LevelFilter::Warn }
    }
}

/// Settings of an attached debugger.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(default)]
pub struct DebugConfig {
    /// Log every executed instruction at trace level.
    pub trace_instructions: bool,
    /// Directory holding script sources, for listings.
    pub source_root: Option<PathBuf>,
    /// Lines shown above and below the current line in a listing.
    pub listing_context: u32,
}

impl Default for DebugConfig {
    fn default() -> Self {
        Self { trace_instructions: false, source_root: None, listing_context: 5 }
    }
}

/// Interpreter and scheduler configuration.
/// Use [`EngineConfigBuilder`] to build it from code.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(default)]
pub struct EngineConfig {
    /// Instructions one script may run per tick before it is forced to yield.
    /// Zero disables the cap.
    pub max_ops_per_tick: usize,
    /// Run one instruction per script per tick.
    pub single_step: bool,
    /// Keep recoverable script errors out of the host's error notice.
    pub suppress_script_errors: bool,
    pub min_bytecode_version: u32,
    pub max_cached_scripts: usize,
    pub dialect: Dialect,
    pub encoding: Encoding,
    pub debug: DebugConfig,
    pub logger: LoggerConfig,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            max_ops_per_tick: 2000,
            single_step: false,
            suppress_script_errors: false,
            min_bytecode_version: MIN_SCRIPT_VERSION,
            max_cached_scripts: 20,
            dialect: Dialect::Standard,
            encoding: Encoding::Utf8,
            debug: DebugConfig::default(),
            logger: LoggerConfig::default(),
        }
    }
}

impl EngineConfig {
    pub fn from_json_str(text: &str) -> Result<Self, ConfigError> {
        Ok(serde_json::from_str(text)?)
    }

    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let mut file = File::open(path)?;
        let mut bytes = Vec::new();
        file.read_to_end(&mut bytes)?;
        Ok(serde_json::from_slice(&bytes)?)
    }

    pub fn load_options(&self) -> LoadOptions {
        LoadOptions { min_version: self.min_bytecode_version, encoding: self.encoding }
    }
}

/// Convenience builder for [`EngineConfig`].
#[derive(Default)]
pub struct EngineConfigBuilder {
    config: EngineConfig,
}

impl EngineConfigBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_max_ops_per_tick(mut self, ops: usize) -> Self {
        self.config.max_ops_per_tick = ops;
        self
    }

    pub fn with_single_step(mut self, single_step: bool) -> Self {
        self.config.single_step = single_step;
        self
    }

    pub fn with_suppressed_script_errors(mut self, suppress: bool) -> Self {
        self.config.suppress_script_errors = suppress;
        self
    }

    pub fn with_min_bytecode_version(mut self, version: u32) -> Self {
        self.config.min_bytecode_version = version;
        self
    }

    pub fn with_max_cached_scripts(mut self, count: usize) -> Self {
        self.config.max_cached_scripts = count;
        self
    }

    pub fn with_dialect(mut self, dialect: Dialect) -> Self {
        self.config.dialect = dialect;
        self
    }

    pub fn with_encoding(mut self, encoding: Encoding) -> Self {
        self.config.encoding = encoding;
        self
    }

    pub fn with_debug_config(mut self, debug: DebugConfig) -> Self {
        self.config.debug = debug;
        self
    }

    pub fn with_logger_config(mut self, logger: LoggerConfig) -> Self {
        self.config.logger = logger;
        self
    }

    /// Retrieves the configuration built.
    pub fn get(self) -> EngineConfig {
        self.config
    }
}
