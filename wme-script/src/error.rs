use crate::image::LoadError;
use crate::script::ScriptState;

/// Faults that stop a script. The registry contains them: the faulting script
/// changes state and every other script keeps running.
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum VmError {
    #[error("Fatal: invalid instruction 0x{opcode:X} at IP 0x{ip:X}")]
    InvalidOpcode { opcode: u32, ip: u32 },

    #[error("script stack corruption detected (stack underflow)")]
    StackUnderflow,

    #[error("instruction pointer out of range: IP 0x{ip:X}, image size 0x{len:X}")]
    IpOutOfRange { ip: u32, len: u32 },

    #[error("symbol index {index} is out of range")]
    BadSymbol { index: u32 },
}

impl VmError {
    /// State the faulting script is moved to.
    pub fn terminal_state(&self) -> ScriptState {
        match self {
            VmError::InvalidOpcode { .. } => ScriptState::Finished,
            _ => ScriptState::Error,
        }
    }
}

#[derive(thiserror::Error, Debug)]
pub enum RegistryError {
    #[error("no script loader is attached, cannot load '{0}'")]
    NoLoader(String),

    #[error("error reading script '{filename}'")]
    Read {
        filename: String,
        #[source]
        source: anyhow::Error,
    },

    #[error(transparent)]
    Load(#[from] LoadError),
}

/// A recoverable (or, with `fatal`, contained) script error, as passed to
/// [`crate::ScriptHost::on_runtime_error`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScriptErrorReport {
    pub script: crate::ScriptId,
    pub filename: String,
    pub line: u32,
    pub message: String,
    pub fatal: bool,
}

impl std::fmt::Display for ScriptErrorReport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "Runtime error. Script '{}', line {}: {}",
            self.filename, self.line, self.message
        )
    }
}
