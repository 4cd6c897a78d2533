use encoding_rs::{
    Encoding as RsEncoding, BIG5, EUC_KR, GBK, SHIFT_JIS, UTF_8, WINDOWS_1250, WINDOWS_1251,
    WINDOWS_1252, WINDOWS_1253, WINDOWS_1254, WINDOWS_1255, WINDOWS_1256, WINDOWS_1257,
};
use serde::{Deserialize, Serialize};
use std::borrow::Cow;

pub trait TextDecoder {
    fn decode<'a>(&self, bytes: &'a [u8]) -> Cow<'a, str>;

    /// Decode C-style string: stop at the first NUL (0x00).
    fn decode_cstr<'a>(&self, bytes: &'a [u8]) -> Cow<'a, str> {
        let end = bytes.iter().position(|&b| b == 0).unwrap_or(bytes.len());
        self.decode(&bytes[..end])
    }
}

/// Text encoding of string literals inside compiled scripts.
///
/// Unicode games store UTF-8; older titles store the ANSI code page that
/// matches the game's charset setting.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Encoding {
    #[default]
    Utf8,
    /// Central European.
    Windows1250,
    /// Cyrillic.
    Windows1251,
    /// Western European.
    Windows1252,
    Windows1253,
    Windows1254,
    Windows1255,
    Windows1256,
    Windows1257,
    ShiftJis,
    Gbk,
    Korean,
    Big5,
}

impl Encoding {
    #[inline]
    pub fn as_encoding_rs(self) -> &'static RsEncoding {
        match self {
            Encoding::Utf8 => UTF_8,
            Encoding::Windows1250 => WINDOWS_1250,
            Encoding::Windows1251 => WINDOWS_1251,
            Encoding::Windows1252 => WINDOWS_1252,
            Encoding::Windows1253 => WINDOWS_1253,
            Encoding::Windows1254 => WINDOWS_1254,
            Encoding::Windows1255 => WINDOWS_1255,
            Encoding::Windows1256 => WINDOWS_1256,
            Encoding::Windows1257 => WINDOWS_1257,
            Encoding::ShiftJis => SHIFT_JIS,
            Encoding::Gbk => GBK,
            Encoding::Korean => EUC_KR,
            Encoding::Big5 => BIG5,
        }
    }

    /// Map a Windows code page number to an encoding.
    pub fn from_code_page(cp: u32) -> Option<Self> {
        Some(match cp {
            65001 => Encoding::Utf8,
            1250 => Encoding::Windows1250,
            1251 => Encoding::Windows1251,
            1252 => Encoding::Windows1252,
            1253 => Encoding::Windows1253,
            1254 => Encoding::Windows1254,
            1255 => Encoding::Windows1255,
            1256 => Encoding::Windows1256,
            1257 => Encoding::Windows1257,
            932 => Encoding::ShiftJis,
            936 => Encoding::Gbk,
            949 => Encoding::Korean,
            950 => Encoding::Big5,
            _ => return None,
        })
    }
}

/// A simple decoder bound to one encoding.
#[derive(Debug, Clone, Copy, Default)]
pub struct Decoder {
    enc: Encoding,
}

impl Decoder {
    #[inline]
    pub fn new(enc: Encoding) -> Self {
        Self { enc }
    }

    #[inline]
    pub fn encoding(&self) -> Encoding {
        self.enc
    }

    /// Encode a Rust string to bytes using the selected encoding.
    /// This is "best effort": unrepresentable chars will be replaced.
    pub fn encode<'a>(&self, s: &'a str) -> Cow<'a, [u8]> {
        let enc = self.enc.as_encoding_rs();
        let (cow, _had_errors, _) = enc.encode(s);
        cow
    }

    /// Same as encode(), but always returns an owned Vec<u8>.
    pub fn encode_owned(&self, s: &str) -> Vec<u8> {
        self.encode(s).into_owned()
    }

    /// Encode as a NUL-terminated blob, the form string operands take in bytecode.
    pub fn encode_cstr(&self, s: &str) -> Vec<u8> {
        let mut out = self.encode_owned(s);
        out.push(0);
        out
    }
}

impl TextDecoder for Decoder {
    fn decode<'a>(&self, bytes: &'a [u8]) -> Cow<'a, str> {
        match self.enc {
            Encoding::Utf8 => match std::str::from_utf8(bytes) {
                Ok(s) => Cow::Borrowed(s),
                Err(_) => Cow::Owned(String::from_utf8_lossy(bytes).into_owned()),
            },
            _ => {
                let enc = self.enc.as_encoding_rs();
                let (cow, _had_errors, _) = enc.decode(bytes);
                cow
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn utf8_decode_cstr() {
        let d = Decoder::new(Encoding::Utf8);
        let bytes = b"hello\0world";
        assert_eq!(d.decode_cstr(bytes), "hello");
    }

    #[test]
    fn windows_1252_accents() {
        let d = Decoder::new(Encoding::Windows1252);
        assert_eq!(d.decode(&[0x63, 0x61, 0x66, 0xE9]), "café");
        assert_eq!(d.encode_cstr("café"), vec![0x63, 0x61, 0x66, 0xE9, 0x00]);
    }

    #[test]
    fn code_page_lookup() {
        assert_eq!(Encoding::from_code_page(1251), Some(Encoding::Windows1251));
        assert_eq!(Encoding::from_code_page(65001), Some(Encoding::Utf8));
        assert_eq!(Encoding::from_code_page(437), None);
    }
}
