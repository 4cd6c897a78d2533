//! Textual model of an image, shared by the assembler and disassembler.

use std::collections::{BTreeSet, HashMap};
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use wme_nls::Encoding;

use super::{
    BuildError, ByteCursor, CursorError, ExternalFunction, ImageBuilder, Label, Opcode, OpcodeMap,
    OperandKind, ScriptImage, SCRIPT_VERSION,
};

#[derive(Debug, Clone, PartialEq)]
pub enum OperandValue {
    None,
    Symbol(u32),
    Address(u32),
    Int(i32),
    UInt(u32),
    Float(f64),
    String(String),
}

#[derive(Debug, Clone, PartialEq)]
pub struct DecodedInstruction {
    pub address: u32,
    pub raw: u32,
    /// `None` for a code the opcode map does not know.
    pub opcode: Option<Opcode>,
    pub operand: OperandValue,
}

/// Decodes the instruction stream. Decoding stops at the end of the code or
/// at the first unknown opcode, which is included.
pub fn decode_instructions(
    image: &ScriptImage,
    map: &OpcodeMap,
) -> Result<Vec<DecodedInstruction>, CursorError> {
    let end = image.code_end() as usize;
    let mut cursor = ByteCursor::at(image.bytes(), image.code_start() as usize);
    let mut out = Vec::new();
    while cursor.pos() < end {
        let address = cursor.pos() as u32;
        let raw = cursor.read_u32()?;
        let opcode = Opcode::from_code(map.decode(raw));
        let operand = match opcode.map(Opcode::operand) {
            None | Some(OperandKind::None) => OperandValue::None,
            Some(OperandKind::Symbol) => OperandValue::Symbol(cursor.read_u32()?),
            Some(OperandKind::Address) => OperandValue::Address(cursor.read_u32()?),
            Some(OperandKind::Int) => OperandValue::Int(cursor.read_i32()?),
            Some(OperandKind::UInt) => OperandValue::UInt(cursor.read_u32()?),
            Some(OperandKind::Float) => OperandValue::Float(cursor.read_f64()?),
            Some(OperandKind::String) => OperandValue::String(image.decode_text(cursor.read_cstring()?)),
        };
        out.push(DecodedInstruction { address, raw, opcode, operand });
        if opcode.is_none() {
            break;
        }
    }
    Ok(out)
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntryPoint {
    pub name: String,
    pub label: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ListingInstruction {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub address: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,
    pub mnemonic: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub operand: Option<String>,
}

/// Whole-image listing: tables refer to code through labels.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Listing {
    pub filename: String,
    pub version: u32,
    #[serde(default)]
    pub encoding: Encoding,
    #[serde(default)]
    pub functions: Vec<EntryPoint>,
    #[serde(default)]
    pub events: Vec<EntryPoint>,
    #[serde(default)]
    pub methods: Vec<EntryPoint>,
    #[serde(default)]
    pub externals: Vec<ExternalFunction>,
    pub code: Vec<ListingInstruction>,
}

#[derive(thiserror::Error, Debug, Clone, PartialEq)]
pub enum AssembleError {
    #[error("unknown mnemonic '{0}'")]
    UnknownMnemonic(String),

    #[error("{mnemonic} needs an operand")]
    MissingOperand { mnemonic: String },

    #[error("bad operand '{operand}' for {mnemonic}")]
    BadOperand { mnemonic: String, operand: String },

    #[error("label '{0}' is not defined")]
    UnknownLabel(String),

    #[error(transparent)]
    Build(#[from] BuildError),
}

fn label_name(addr: u32) -> String {
    format!("loc_{addr:08X}")
}

impl Listing {
    pub fn from_image(image: &ScriptImage, map: &OpcodeMap) -> Result<Self, CursorError> {
        let insts = decode_instructions(image, map)?;

        let mut targets: BTreeSet<u32> = BTreeSet::new();
        for table in [image.functions(), image.events(), image.methods()] {
            targets.extend(table.iter().map(|e| e.offset));
        }
        for inst in &insts {
            if let OperandValue::Address(addr) = inst.operand {
                targets.insert(addr);
            }
        }
        let known: BTreeSet<u32> = insts.iter().map(|i| i.address).collect();
        let labelled = |addr: u32| known.contains(&addr).then(|| label_name(addr));

        let entries = |table: &[super::TableEntry]| {
            table
                .iter()
                .map(|e| EntryPoint {
                    name: e.name.clone(),
                    label: labelled(e.offset).unwrap_or_else(|| format!("0x{:X}", e.offset)),
                })
                .collect::<Vec<_>>()
        };

        let code = insts
            .iter()
            .map(|inst| {
                let mnemonic = match inst.opcode {
                    Some(op) => op.to_string(),
                    None => format!("DB 0x{:08X}", inst.raw),
                };
                let operand = match &inst.operand {
                    OperandValue::None => None,
                    OperandValue::Symbol(i) => {
                        Some(image.symbol(*i).map_or_else(|| format!("#{i}"), str::to_owned))
                    }
                    OperandValue::Address(a) => {
                        Some(labelled(*a).unwrap_or_else(|| format!("0x{a:X}")))
                    }
                    OperandValue::Int(v) => Some(v.to_string()),
                    OperandValue::UInt(v) => Some(v.to_string()),
                    OperandValue::Float(v) => Some(format!("{v:?}")),
                    OperandValue::String(s) => Some(s.clone()),
                };
                ListingInstruction {
                    address: Some(inst.address),
                    label: targets.contains(&inst.address).then(|| label_name(inst.address)),
                    mnemonic,
                    operand,
                }
            })
            .collect();

        Ok(Self {
            filename: image.filename().to_owned(),
            version: image.version(),
            encoding: image.encoding(),
            functions: entries(image.functions()),
            events: entries(image.events()),
            methods: entries(image.methods()),
            externals: image.externals().to_vec(),
            code,
        })
    }

    /// Builds the binary image. Instruction addresses in the listing are
    /// informational and get recomputed.
    pub fn assemble(&self, map: &OpcodeMap) -> Result<Vec<u8>, AssembleError> {
        let mut b = ImageBuilder::new()
            .with_version(self.version)
            .with_encoding(self.encoding)
            .with_opcode_map(map.clone());
        let mut labels: HashMap<String, Label> = HashMap::new();
        let mut bound: BTreeSet<String> = BTreeSet::new();

        fn label_for(b: &mut ImageBuilder, labels: &mut HashMap<String, Label>, name: &str) -> Label {
            *labels.entry(name.to_owned()).or_insert_with(|| b.label())
        }

        for inst in &self.code {
            if let Some(name) = &inst.label {
                let label = label_for(&mut b, &mut labels, name);
                b.bind(label);
                bound.insert(name.clone());
            }
            let op = Opcode::from_str(inst.mnemonic.trim())
                .map_err(|_| AssembleError::UnknownMnemonic(inst.mnemonic.clone()))?;
            let bad = || AssembleError::BadOperand {
                mnemonic: inst.mnemonic.clone(),
                operand: inst.operand.clone().unwrap_or_default(),
            };
            let operand = || {
                inst.operand
                    .as_deref()
                    .ok_or_else(|| AssembleError::MissingOperand { mnemonic: inst.mnemonic.clone() })
            };
            match op.operand() {
                OperandKind::None => {
                    b.op(op);
                }
                OperandKind::Symbol => {
                    b.op_symbol(op, operand()?);
                }
                OperandKind::Address => {
                    let text = operand()?.trim();
                    match parse_hex(text) {
                        Some(addr) => {
                            b.op_u32(op, addr);
                        }
                        None => {
                            let label = label_for(&mut b, &mut labels, text);
                            b.op_label(op, label);
                        }
                    }
                }
                OperandKind::Int => {
                    let v = operand()?.trim().parse::<i32>().map_err(|_| bad())?;
                    b.push_int(v);
                }
                OperandKind::UInt => {
                    let v = operand()?.trim().parse::<u32>().map_err(|_| bad())?;
                    b.op_u32(op, v);
                }
                OperandKind::Float => {
                    let v = operand()?.trim().parse::<f64>().map_err(|_| bad())?;
                    b.push_float(v);
                }
                OperandKind::String => {
                    b.push_string(operand()?);
                }
            }
        }

        let mut entry = |b: &mut ImageBuilder, e: &EntryPoint| {
            if !bound.contains(&e.label) {
                return Err(AssembleError::UnknownLabel(e.label.clone()));
            }
            Ok(label_for(b, &mut labels, &e.label))
        };
        for e in &self.functions {
            let label = entry(&mut b, e)?;
            b.function(&e.name, label);
        }
        for e in &self.events {
            let label = entry(&mut b, e)?;
            b.event(&e.name, label);
        }
        for e in &self.methods {
            let label = entry(&mut b, e)?;
            b.method(&e.name, label);
        }
        for ext in &self.externals {
            b.external(ext.clone());
        }

        if let Some(name) = labels.keys().find(|name| !bound.contains(*name)) {
            return Err(AssembleError::UnknownLabel(name.clone()));
        }
        Ok(b.build()?)
    }

    pub fn new(filename: &str) -> Self {
        Self {
            filename: filename.to_owned(),
            version: SCRIPT_VERSION,
            encoding: Encoding::default(),
            functions: Vec::new(),
            events: Vec::new(),
            methods: Vec::new(),
            externals: Vec::new(),
            code: Vec::new(),
        }
    }
}

fn parse_hex(text: &str) -> Option<u32> {
    let digits = text.strip_prefix("0x").or_else(|| text.strip_prefix("0X"))?;
    u32::from_str_radix(digits, 16).ok()
}

impl fmt::Display for Listing {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "; {} (version {}.{:02})", self.filename, self.version >> 8, self.version & 0xFF)?;
        for (kind, table) in [("function", &self.functions), ("event", &self.events), ("method", &self.methods)] {
            for e in table {
                writeln!(f, "; {kind} {} -> {}", e.name, e.label)?;
            }
        }
        for ext in &self.externals {
            writeln!(f, "; external {}!{} {:?}", ext.library, ext.name, ext.call)?;
        }
        for inst in &self.code {
            if let Some(label) = &inst.label {
                writeln!(f, "{label}:")?;
            }
            let addr = inst.address.map(|a| format!("{a:08X}")).unwrap_or_default();
            match &inst.operand {
                Some(op) if inst.mnemonic == Opcode::PushString.to_string() => {
                    writeln!(f, "  {addr:8}  {:<22} {op:?}", inst.mnemonic)?
                }
                Some(op) => writeln!(f, "  {addr:8}  {:<22} {op}", inst.mnemonic)?,
                None => writeln!(f, "  {addr:8}  {}", inst.mnemonic)?,
            }
        }
        Ok(())
    }
}
