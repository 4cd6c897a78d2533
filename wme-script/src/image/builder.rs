use wme_nls::{Decoder, Encoding};

use super::{
    ExternalFunction, Opcode, OpcodeMap, ScriptHeader, EXTERNALS_VERSION, HEADER_SIZE, SCRIPT_MAGIC,
    SCRIPT_VERSION,
};

/// A code position, possibly not bound yet.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Label(usize);

#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum BuildError {
    #[error("label {0} is used but never bound")]
    UnboundLabel(usize),
}

/// Emits compiled script images: header, code with resolved jump targets and
/// the lookup tables.
#[derive(Debug, Clone)]
pub struct ImageBuilder {
    version: u32,
    encoder: Decoder,
    opcodes: OpcodeMap,
    code: Vec<u8>,
    symbols: Vec<String>,
    functions: Vec<(String, Label)>,
    events: Vec<(String, Label)>,
    methods: Vec<(String, Label)>,
    externals: Vec<ExternalFunction>,
    labels: Vec<Option<u32>>,
    fixups: Vec<(usize, Label)>,
}

impl Default for ImageBuilder {
    fn default() -> Self {
        Self::new()
    }
}

fn put_u32(out: &mut Vec<u8>, v: u32) {
    out.extend_from_slice(&v.to_le_bytes());
}

impl ImageBuilder {
    pub fn new() -> Self {
        Self {
            version: SCRIPT_VERSION,
            encoder: Decoder::default(),
            opcodes: OpcodeMap::standard(),
            code: Vec::new(),
            symbols: Vec::new(),
            functions: Vec::new(),
            events: Vec::new(),
            methods: Vec::new(),
            externals: Vec::new(),
            labels: Vec::new(),
            fixups: Vec::new(),
        }
    }

    pub fn with_version(mut self, version: u32) -> Self {
        self.version = version;
        self
    }

    pub fn with_encoding(mut self, encoding: Encoding) -> Self {
        self.encoder = Decoder::new(encoding);
        self
    }

    /// Opcodes are written in the numbering of `map`.
    pub fn with_opcode_map(mut self, map: OpcodeMap) -> Self {
        self.opcodes = map;
        self
    }

    /// Absolute address of the next emitted byte.
    pub fn address(&self) -> u32 {
        (HEADER_SIZE + self.code.len()) as u32
    }

    pub fn label(&mut self) -> Label {
        self.labels.push(None);
        Label(self.labels.len() - 1)
    }

    pub fn bind(&mut self, label: Label) -> &mut Self {
        let addr = self.address();
        if let Some(slot) = self.labels.get_mut(label.0) {
            *slot = Some(addr);
        }
        self
    }

    /// A label bound to the current address.
    pub fn here(&mut self) -> Label {
        let label = self.label();
        self.bind(label);
        label
    }

    /// Index of `name` in the symbol table, adding it if needed.
    pub fn symbol(&mut self, name: &str) -> u32 {
        let index = match self.symbols.iter().position(|s| s == name) {
            Some(i) => i,
            None => {
                self.symbols.push(name.to_owned());
                self.symbols.len() - 1
            }
        };
        index as u32
    }

    pub fn raw_u32(&mut self, word: u32) -> &mut Self {
        put_u32(&mut self.code, word);
        self
    }

    pub fn raw_f64(&mut self, v: f64) -> &mut Self {
        self.code.extend_from_slice(&v.to_le_bytes());
        self
    }

    pub fn raw_string(&mut self, s: &str) -> &mut Self {
        let bytes = self.encoder.encode_cstr(s);
        self.code.extend_from_slice(&bytes);
        self
    }

    pub fn op(&mut self, op: Opcode) -> &mut Self {
        let raw = self.opcodes.encode(op);
        self.raw_u32(raw)
    }

    pub fn op_symbol(&mut self, op: Opcode, name: &str) -> &mut Self {
        let index = self.symbol(name);
        self.op(op).raw_u32(index)
    }

    pub fn op_label(&mut self, op: Opcode, label: Label) -> &mut Self {
        self.op(op);
        self.fixups.push((self.code.len(), label));
        self.raw_u32(0)
    }

    pub fn op_u32(&mut self, op: Opcode, v: u32) -> &mut Self {
        self.op(op).raw_u32(v)
    }

    pub fn push_int(&mut self, v: i32) -> &mut Self {
        self.op_u32(Opcode::PushInt, v as u32)
    }

    pub fn push_bool(&mut self, v: bool) -> &mut Self {
        self.op_u32(Opcode::PushBool, u32::from(v))
    }

    pub fn push_float(&mut self, v: f64) -> &mut Self {
        self.op(Opcode::PushFloat).raw_f64(v)
    }

    pub fn push_string(&mut self, s: &str) -> &mut Self {
        self.op(Opcode::PushString).raw_string(s)
    }

    pub fn push_null(&mut self) -> &mut Self {
        self.op(Opcode::PushNull)
    }

    pub fn line(&mut self, line: u32) -> &mut Self {
        self.op_u32(Opcode::DbgLine, line)
    }

    pub fn def_var(&mut self, name: &str) -> &mut Self {
        self.op_symbol(Opcode::DefVar, name)
    }

    pub fn push_var(&mut self, name: &str) -> &mut Self {
        self.op_symbol(Opcode::PushVar, name)
    }

    pub fn pop_var(&mut self, name: &str) -> &mut Self {
        self.op_symbol(Opcode::PopVar, name)
    }

    pub fn jmp(&mut self, target: Label) -> &mut Self {
        self.op_label(Opcode::Jmp, target)
    }

    pub fn jmp_false(&mut self, target: Label) -> &mut Self {
        self.op_label(Opcode::JmpFalse, target)
    }

    pub fn call(&mut self, target: Label) -> &mut Self {
        self.op_label(Opcode::Call, target)
    }

    pub fn correct_stack(&mut self, n: u32) -> &mut Self {
        self.op_u32(Opcode::CorrectStack, n)
    }

    /// Pushes the argument count (arguments already pushed) and calls the
    /// external function `name`.
    pub fn call_external(&mut self, name: &str, argc: u32) -> &mut Self {
        self.push_int(argc as i32).op_symbol(Opcode::ExternalCall, name)
    }

    pub fn function(&mut self, name: &str, at: Label) -> &mut Self {
        self.functions.push((name.to_owned(), at));
        self
    }

    pub fn event(&mut self, name: &str, at: Label) -> &mut Self {
        self.events.push((name.to_owned(), at));
        self
    }

    pub fn method(&mut self, name: &str, at: Label) -> &mut Self {
        self.methods.push((name.to_owned(), at));
        self
    }

    pub fn external(&mut self, function: ExternalFunction) -> &mut Self {
        self.externals.push(function);
        self
    }

    fn resolve(&self, label: Label) -> Result<u32, BuildError> {
        self.labels
            .get(label.0)
            .copied()
            .flatten()
            .ok_or(BuildError::UnboundLabel(label.0))
    }

    fn put_text(&self, out: &mut Vec<u8>, s: &str) {
        out.extend_from_slice(&self.encoder.encode_cstr(s));
    }

    fn put_entries(&self, out: &mut Vec<u8>, entries: &[(String, Label)]) -> Result<(), BuildError> {
        put_u32(out, entries.len() as u32);
        for (name, label) in entries {
            put_u32(out, self.resolve(*label)?);
            self.put_text(out, name);
        }
        Ok(())
    }

    pub fn build(&self) -> Result<Vec<u8>, BuildError> {
        let mut code = self.code.clone();
        for &(pos, label) in &self.fixups {
            let addr = self.resolve(label)?;
            code[pos..pos + 4].copy_from_slice(&addr.to_le_bytes());
        }

        let mut out = vec![0u8; HEADER_SIZE];
        out.extend_from_slice(&code);

        let mut header = ScriptHeader {
            magic: SCRIPT_MAGIC,
            version: self.version,
            code_start: HEADER_SIZE as u32,
            ..ScriptHeader::default()
        };

        header.symbol_table = out.len() as u32;
        put_u32(&mut out, self.symbols.len() as u32);
        for (i, name) in self.symbols.iter().enumerate() {
            put_u32(&mut out, i as u32);
            self.put_text(&mut out, name);
        }

        header.func_table = out.len() as u32;
        self.put_entries(&mut out, &self.functions)?;

        header.event_table = out.len() as u32;
        self.put_entries(&mut out, &self.events)?;

        if self.version >= EXTERNALS_VERSION {
            header.externals_table = out.len() as u32;
            put_u32(&mut out, self.externals.len() as u32);
            for ext in &self.externals {
                self.put_text(&mut out, &ext.library);
                self.put_text(&mut out, &ext.name);
                put_u32(&mut out, ext.call.into());
                put_u32(&mut out, ext.returns.into());
                put_u32(&mut out, ext.params.len() as u32);
                for &p in &ext.params {
                    put_u32(&mut out, p.into());
                }
            }
        }

        header.method_table = out.len() as u32;
        self.put_entries(&mut out, &self.methods)?;

        out[..HEADER_SIZE].copy_from_slice(&header.to_bytes());
        Ok(out)
    }
}
