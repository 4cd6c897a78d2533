//! Compiled script images.
//!
//! Layout: a 32-byte header of eight little-endian words, the instruction
//! stream, then the symbol, function, event, externals and method tables the
//! header points at.

mod builder;
mod cursor;
mod listing;
mod opcode;

use std::fmt;

use serde::{Deserialize, Serialize};
use wme_nls::{Decoder, Encoding, TextDecoder};

pub use builder::{BuildError, ImageBuilder, Label};
pub use cursor::{ByteCursor, CursorError};
pub use listing::{
    decode_instructions, AssembleError, DecodedInstruction, EntryPoint, Listing, ListingInstruction,
    OperandValue,
};
pub use opcode::{Dialect, Opcode, OpcodeMap, OpcodeMapError, OperandKind, OPCODE_COUNT};

pub const SCRIPT_MAGIC: u32 = 0xDEC0_ADDE;
pub const SCRIPT_VERSION: u32 = 0x0102;
/// First version carrying the externals table.
pub const EXTERNALS_VERSION: u32 = 0x0101;
pub const MIN_SCRIPT_VERSION: u32 = 0x0100;
pub const HEADER_SIZE: usize = 32;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ScriptHeader {
    pub magic: u32,
    pub version: u32,
    pub code_start: u32,
    pub func_table: u32,
    pub symbol_table: u32,
    pub event_table: u32,
    pub externals_table: u32,
    pub method_table: u32,
}

impl ScriptHeader {
    fn read(cursor: &mut ByteCursor<'_>) -> Result<Self, CursorError> {
        Ok(Self {
            magic: cursor.read_u32()?,
            version: cursor.read_u32()?,
            code_start: cursor.read_u32()?,
            func_table: cursor.read_u32()?,
            symbol_table: cursor.read_u32()?,
            event_table: cursor.read_u32()?,
            externals_table: cursor.read_u32()?,
            method_table: cursor.read_u32()?,
        })
    }

    pub(crate) fn to_bytes(self) -> [u8; HEADER_SIZE] {
        let words = [
            self.magic,
            self.version,
            self.code_start,
            self.func_table,
            self.symbol_table,
            self.event_table,
            self.externals_table,
            self.method_table,
        ];
        let mut out = [0u8; HEADER_SIZE];
        for (chunk, word) in out.chunks_exact_mut(4).zip(words) {
            chunk.copy_from_slice(&word.to_le_bytes());
        }
        out
    }

    pub fn has_externals(&self) -> bool {
        self.version >= EXTERNALS_VERSION
    }
}

/// Named entry point in the function, event or method table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TableEntry {
    pub offset: u32,
    pub name: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum CallConvention {
    Stdcall,
    Cdecl,
    Thiscall,
    Unknown(u32),
}

impl From<u32> for CallConvention {
    fn from(v: u32) -> Self {
        match v {
            0 => CallConvention::Stdcall,
            1 => CallConvention::Cdecl,
            2 => CallConvention::Thiscall,
            other => CallConvention::Unknown(other),
        }
    }
}

impl From<CallConvention> for u32 {
    fn from(v: CallConvention) -> Self {
        match v {
            CallConvention::Stdcall => 0,
            CallConvention::Cdecl => 1,
            CallConvention::Thiscall => 2,
            CallConvention::Unknown(other) => other,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ExternalType {
    Void,
    Bool,
    Long,
    Byte,
    String,
    Float,
    Double,
    MemBuffer,
    Unknown(u32),
}

impl From<u32> for ExternalType {
    fn from(v: u32) -> Self {
        match v {
            0 => ExternalType::Void,
            1 => ExternalType::Bool,
            2 => ExternalType::Long,
            3 => ExternalType::Byte,
            4 => ExternalType::String,
            5 => ExternalType::Float,
            6 => ExternalType::Double,
            7 => ExternalType::MemBuffer,
            other => ExternalType::Unknown(other),
        }
    }
}

impl From<ExternalType> for u32 {
    fn from(v: ExternalType) -> Self {
        match v {
            ExternalType::Void => 0,
            ExternalType::Bool => 1,
            ExternalType::Long => 2,
            ExternalType::Byte => 3,
            ExternalType::String => 4,
            ExternalType::Float => 5,
            ExternalType::Double => 6,
            ExternalType::MemBuffer => 7,
            ExternalType::Unknown(other) => other,
        }
    }
}

/// A foreign library function declared by the script.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExternalFunction {
    pub library: String,
    pub name: String,
    pub call: CallConvention,
    pub returns: ExternalType,
    #[serde(default)]
    pub params: Vec<ExternalType>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LoadOptions {
    pub min_version: u32,
    pub encoding: Encoding,
}

impl Default for LoadOptions {
    fn default() -> Self {
        Self { min_version: MIN_SCRIPT_VERSION, encoding: Encoding::Utf8 }
    }
}

#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum LoadError {
    #[error("'{filename}' is not a valid compiled script (magic 0x{found:08X})")]
    BadMagic { filename: String, found: u32 },

    #[error(
        "'{filename}' was compiled by a newer compiler (version {}, supported up to {})",
        version_text(.version), version_text(.max)
    )]
    VersionTooNew { filename: String, version: u32, max: u32 },

    #[error(
        "'{filename}' was compiled by an older compiler (version {}, at least {} required)",
        version_text(.version), version_text(.min)
    )]
    VersionTooOld { filename: String, version: u32, min: u32 },

    #[error("'{filename}' names symbol {index}, past the end of the file")]
    BadSymbolIndex { filename: String, index: u32 },

    #[error("'{filename}' is truncated")]
    Truncated {
        filename: String,
        #[source]
        source: CursorError,
    },
}

fn version_text(v: &u32) -> String {
    format!("{}.{:02}", v >> 8, v & 0xFF)
}

/// An immutable compiled program, shared by a script and its threads.
pub struct ScriptImage {
    filename: String,
    bytes: Vec<u8>,
    header: ScriptHeader,
    symbols: Vec<Option<String>>,
    functions: Vec<TableEntry>,
    events: Vec<TableEntry>,
    methods: Vec<TableEntry>,
    externals: Vec<ExternalFunction>,
    decoder: Decoder,
}

impl fmt::Debug for ScriptImage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ScriptImage")
            .field("filename", &self.filename)
            .field("version", &format_args!("0x{:04X}", self.header.version))
            .field("size", &self.bytes.len())
            .field("functions", &self.functions.len())
            .field("events", &self.events.len())
            .field("methods", &self.methods.len())
            .finish()
    }
}

impl ScriptImage {
    pub fn load(
        bytes: impl Into<Vec<u8>>,
        filename: &str,
        opts: &LoadOptions,
    ) -> Result<Self, LoadError> {
        let bytes = bytes.into();
        let truncated = |source| LoadError::Truncated { filename: filename.to_owned(), source };

        let mut cursor = ByteCursor::new(&bytes);
        let header = ScriptHeader::read(&mut cursor).map_err(truncated)?;
        if header.magic != SCRIPT_MAGIC {
            return Err(LoadError::BadMagic { filename: filename.to_owned(), found: header.magic });
        }
        if header.version > SCRIPT_VERSION {
            return Err(LoadError::VersionTooNew {
                filename: filename.to_owned(),
                version: header.version,
                max: SCRIPT_VERSION,
            });
        }
        if header.version < opts.min_version {
            return Err(LoadError::VersionTooOld {
                filename: filename.to_owned(),
                version: header.version,
                min: opts.min_version,
            });
        }

        let decoder = Decoder::new(opts.encoding);
        let mut symbols: Vec<Option<String>> = Vec::new();
        for (index, name) in read_symbols(&bytes, header.symbol_table, &decoder).map_err(truncated)? {
            // Each entry takes at least five bytes, so no real index reaches the file size.
            let slot = index as usize;
            if slot >= bytes.len() {
                return Err(LoadError::BadSymbolIndex { filename: filename.to_owned(), index });
            }
            if slot >= symbols.len() {
                symbols.resize(slot + 1, None);
            }
            symbols[slot] = Some(name);
        }
        let functions = read_entries(&bytes, header.func_table, &decoder).map_err(truncated)?;
        let events = read_entries(&bytes, header.event_table, &decoder).map_err(truncated)?;
        let externals = if header.has_externals() {
            read_externals(&bytes, header.externals_table, &decoder).map_err(truncated)?
        } else {
            Vec::new()
        };
        let methods = read_entries(&bytes, header.method_table, &decoder).map_err(truncated)?;

        Ok(Self {
            filename: filename.to_owned(),
            bytes,
            header,
            symbols,
            functions,
            events,
            methods,
            externals,
            decoder,
        })
    }

    pub fn filename(&self) -> &str {
        &self.filename
    }

    pub fn bytes(&self) -> &[u8] {
        &self.bytes
    }

    pub fn header(&self) -> &ScriptHeader {
        &self.header
    }

    pub fn version(&self) -> u32 {
        self.header.version
    }

    pub fn code_start(&self) -> u32 {
        self.header.code_start
    }

    /// End of the instruction stream: the first table after the code.
    pub fn code_end(&self) -> u32 {
        let h = &self.header;
        let mut tables = vec![h.func_table, h.symbol_table, h.event_table, h.method_table];
        if h.has_externals() {
            tables.push(h.externals_table);
        }
        tables
            .into_iter()
            .filter(|&t| t >= h.code_start)
            .min()
            .unwrap_or(self.bytes.len() as u32)
            .min(self.bytes.len() as u32)
    }

    pub fn symbol(&self, index: u32) -> Option<&str> {
        self.symbols.get(index as usize)?.as_deref()
    }

    pub fn symbols(&self) -> impl Iterator<Item = (u32, &str)> {
        self.symbols
            .iter()
            .enumerate()
            .filter_map(|(i, s)| Some((i as u32, s.as_deref()?)))
    }

    pub fn functions(&self) -> &[TableEntry] {
        &self.functions
    }

    pub fn events(&self) -> &[TableEntry] {
        &self.events
    }

    pub fn methods(&self) -> &[TableEntry] {
        &self.methods
    }

    pub fn externals(&self) -> &[ExternalFunction] {
        &self.externals
    }

    pub fn function_pos(&self, name: &str) -> Option<u32> {
        find_entry(&self.functions, name)
    }

    pub fn event_pos(&self, name: &str) -> Option<u32> {
        find_entry(&self.events, name)
    }

    pub fn method_pos(&self, name: &str) -> Option<u32> {
        find_entry(&self.methods, name)
    }

    pub fn external(&self, name: &str) -> Option<&ExternalFunction> {
        self.externals.iter().find(|e| e.name == name)
    }

    /// Scripts with handlers stay alive after their main body returns.
    pub fn has_handlers(&self) -> bool {
        !self.events.is_empty() || !self.methods.is_empty()
    }

    pub fn decode_text(&self, raw: &[u8]) -> String {
        self.decoder.decode(raw).into_owned()
    }

    pub fn encoding(&self) -> Encoding {
        self.decoder.encoding()
    }
}

fn find_entry(entries: &[TableEntry], name: &str) -> Option<u32> {
    entries
        .iter()
        .find(|e| e.name.eq_ignore_ascii_case(name))
        .map(|e| e.offset)
}

fn read_text(cursor: &mut ByteCursor<'_>, decoder: &Decoder) -> Result<String, CursorError> {
    Ok(decoder.decode(cursor.read_cstring()?).into_owned())
}

fn read_symbols(bytes: &[u8], offset: u32, decoder: &Decoder) -> Result<Vec<(u32, String)>, CursorError> {
    let mut cursor = ByteCursor::at(bytes, offset as usize);
    let count = cursor.read_u32()?;
    let mut out = Vec::new();
    for _ in 0..count {
        let index = cursor.read_u32()?;
        let name = read_text(&mut cursor, decoder)?;
        out.push((index, name));
    }
    Ok(out)
}

fn read_entries(bytes: &[u8], offset: u32, decoder: &Decoder) -> Result<Vec<TableEntry>, CursorError> {
    let mut cursor = ByteCursor::at(bytes, offset as usize);
    let count = cursor.read_u32()?;
    let mut out = Vec::new();
    for _ in 0..count {
        let offset = cursor.read_u32()?;
        let name = read_text(&mut cursor, decoder)?;
        out.push(TableEntry { offset, name });
    }
    Ok(out)
}

fn read_externals(
    bytes: &[u8],
    offset: u32,
    decoder: &Decoder,
) -> Result<Vec<ExternalFunction>, CursorError> {
    let mut cursor = ByteCursor::at(bytes, offset as usize);
    let count = cursor.read_u32()?;
    let mut out = Vec::new();
    for _ in 0..count {
        let library = read_text(&mut cursor, decoder)?;
        let name = read_text(&mut cursor, decoder)?;
        let call = CallConvention::from(cursor.read_u32()?);
        let returns = ExternalType::from(cursor.read_u32()?);
        let nparams = cursor.read_u32()?;
        let params = (0..nparams)
            .map(|_| cursor.read_u32().map(ExternalType::from))
            .collect::<Result<Vec<_>, _>>()?;
        out.push(ExternalFunction { library, name, call, returns, params });
    }
    Ok(out)
}
