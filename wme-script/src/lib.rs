//! wme-script
//!
//! Bytecode VM for compiled Wintermute (WME) scripts: the image loader,
//! the per-script interpreter, cooperative threads for events and methods,
//! the registry that ticks every live script, and a debugger overlay.
//!
//! The engine stays outside: natives implement [`NativeObject`], and
//! external functions, clocks and error display go through [`ScriptHost`].

mod builtins;
pub mod config;
pub mod debug;
pub mod error;
pub mod host;
pub mod image;
pub mod native;
pub mod registry;
pub mod script;
pub mod stack;
pub mod value;

/// Local developer utilities (kept as a module, not a binary).
pub mod test;

pub use config::{DebugConfig, EngineConfig, EngineConfigBuilder, LoggerConfig};
pub use debug::{Breakpoint, Debugger, DebuggerError, ScriptMonitor, StopInfo, StopReason, Watch};
pub use error::{RegistryError, ScriptErrorReport, VmError};
pub use host::{CallContext, Clock, ScriptHost};
pub use image::{ImageBuilder, LoadError, LoadOptions, Opcode, OpcodeMap, ScriptImage};
pub use native::{native, NativeHandle, NativeObject};
pub use registry::{Registry, TickStats};
pub use script::{Script, ScriptEntry, ScriptId, ScriptState, WaitTarget};
pub use stack::Stack;
pub use value::{Globals, ObjectMap, Value, ValueType, Variable};
