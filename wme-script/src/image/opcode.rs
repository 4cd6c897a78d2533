use std::rc::Rc;

use num_derive::{FromPrimitive, ToPrimitive};
use num_traits::FromPrimitive;
use serde::{Deserialize, Serialize};

pub const OPCODE_COUNT: usize = 47;

#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    FromPrimitive,
    ToPrimitive,
    strum::Display,
    strum::EnumString,
    strum::IntoStaticStr,
    strum::EnumIter,
)]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE")]
#[repr(u32)]
pub enum Opcode {
    DefVar = 0,
    DefGlobVar,
    Ret,
    RetEvent,
    Call,
    CallByExp,
    ExternalCall,
    Scope,
    CorrectStack,
    CreateObject,
    PopEmpty,
    PushVar,
    PushVarRef,
    PopVar,
    PushVarThis,
    PushInt,
    PushBool,
    PushFloat,
    PushString,
    PushNull,
    PushThisFromStack,
    PushThis,
    PopThis,
    PushByExp,
    PopByExp,
    Jmp,
    JmpFalse,
    Add,
    Sub,
    Mul,
    Div,
    Modulo,
    Not,
    And,
    Or,
    CmpEq,
    CmpNe,
    CmpL,
    CmpG,
    CmpLe,
    CmpGe,
    CmpStrictEq,
    CmpStrictNe,
    DbgLine,
    #[strum(serialize = "POP_REG1")]
    PopReg1,
    #[strum(serialize = "PUSH_REG1")]
    PushReg1,
    DefConstVar,
}

/// Operand that follows an opcode word in the instruction stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OperandKind {
    None,
    /// Index into the symbol table.
    Symbol,
    /// Absolute code address.
    Address,
    Int,
    UInt,
    Float,
    /// NUL-terminated text.
    String,
}

impl Opcode {
    pub fn from_code(code: u32) -> Option<Self> {
        Self::from_u32(code)
    }

    pub fn code(self) -> u32 {
        self as u32
    }

    pub fn operand(self) -> OperandKind {
        use Opcode::*;
        match self {
            DefVar | DefGlobVar | DefConstVar | ExternalCall | PushVar | PushVarRef | PopVar
            | PushThis => OperandKind::Symbol,
            Call | Jmp | JmpFalse => OperandKind::Address,
            PushInt => OperandKind::Int,
            CorrectStack | PushBool | DbgLine => OperandKind::UInt,
            PushFloat => OperandKind::Float,
            PushString => OperandKind::String,
            _ => OperandKind::None,
        }
    }
}

/// Instruction numbering of the bytecode a game ships with.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Dialect {
    #[default]
    Standard,
    /// `table[raw] = standard opcode`; must be a permutation of all opcodes.
    Custom(Vec<u32>),
}

#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum OpcodeMapError {
    #[error("opcode table has {found} entries, expected {expected}")]
    WrongLength { found: usize, expected: usize },

    #[error("opcode table maps raw code {raw} to {code}, which is not an opcode")]
    OutOfRange { raw: usize, code: u32 },

    #[error("opcode table maps more than one raw code to {code}")]
    Duplicate { code: u32 },
}

/// Raw-to-standard opcode lookup, fixed per script at creation.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct OpcodeMap {
    table: Option<Rc<[u32]>>,
}

impl OpcodeMap {
    pub fn standard() -> Self {
        Self { table: None }
    }

    pub fn from_table(table: &[u32]) -> Result<Self, OpcodeMapError> {
        if table.len() != OPCODE_COUNT {
            return Err(OpcodeMapError::WrongLength { found: table.len(), expected: OPCODE_COUNT });
        }
        let mut seen = [false; OPCODE_COUNT];
        for (raw, &code) in table.iter().enumerate() {
            let slot = seen
                .get_mut(code as usize)
                .ok_or(OpcodeMapError::OutOfRange { raw, code })?;
            if *slot {
                return Err(OpcodeMapError::Duplicate { code });
            }
            *slot = true;
        }
        Ok(Self { table: Some(table.into()) })
    }

    pub fn for_dialect(dialect: &Dialect) -> Result<Self, OpcodeMapError> {
        match dialect {
            Dialect::Standard => Ok(Self::standard()),
            Dialect::Custom(table) => Self::from_table(table),
        }
    }

    pub fn is_standard(&self) -> bool {
        self.table.is_none()
    }

    /// Raw code read from the image to the standard numbering. Codes outside
    /// the table pass through and decode as unknown.
    #[inline]
    pub fn decode(&self, raw: u32) -> u32 {
        match &self.table {
            None => raw,
            Some(t) => t.get(raw as usize).copied().unwrap_or(raw),
        }
    }

    /// Inverse of [`OpcodeMap::decode`] for a known opcode.
    pub fn encode(&self, op: Opcode) -> u32 {
        match &self.table {
            None => op.code(),
            Some(t) => t
                .iter()
                .position(|&c| c == op.code())
                .map_or(op.code(), |raw| raw as u32),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use std::str::FromStr;
    use strum::IntoEnumIterator;

    #[test]
    fn numbering_and_names() {
        assert_eq!(Opcode::iter().count(), OPCODE_COUNT);
        for (i, op) in Opcode::iter().enumerate() {
            assert_eq!(op.code() as usize, i);
            assert_eq!(Opcode::from_code(i as u32), Some(op));
        }
        assert_eq!(Opcode::from_code(47), None);
        assert_eq!(Opcode::CallByExp.to_string(), "CALL_BY_EXP");
        assert_eq!(Opcode::PushReg1.to_string(), "PUSH_REG1");
        assert_eq!(Opcode::from_str("CMP_STRICT_NE").ok(), Some(Opcode::CmpStrictNe));
        assert_eq!(Opcode::DefConstVar.code(), 46);
        assert_eq!(Opcode::DbgLine.code(), 43);
    }

    #[test]
    fn custom_table_validation() {
        let mut table: Vec<u32> = (0..OPCODE_COUNT as u32).collect();
        table.swap(15, 16);
        let map = OpcodeMap::from_table(&table).unwrap();
        assert_eq!(map.decode(15), Opcode::PushBool.code());
        assert_eq!(map.encode(Opcode::PushInt), 16);
        assert_eq!(map.decode(100), 100);

        table[0] = 16;
        assert_eq!(OpcodeMap::from_table(&table), Err(OpcodeMapError::Duplicate { code: 16 }));
        assert!(matches!(
            OpcodeMap::from_table(&table[..10]),
            Err(OpcodeMapError::WrongLength { found: 10, .. })
        ));
        table[0] = 99;
        assert_eq!(
            OpcodeMap::from_table(&table),
            Err(OpcodeMapError::OutOfRange { raw: 0, code: 99 })
        );
    }
}
