//! Utilities to decode/encode matter tlv
//!
//! Only what secure channel payloads need: context tagged integers, booleans, strings,
//! octet strings and containers. Decoder accepts all tag forms, non context tags are reported as tag 0.

use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use std::io::{Cursor, Read, Write};

use crate::error::{CodecError, Result};

/// Buffer to encode matter tlv. Create buffer, write elements then use data member which contains encoded tlv.
/// ```
/// # use matcom::tlv;
/// # fn main() -> std::io::Result<()> {
/// let mut tlv = tlv::TlvBuffer::new();
/// tlv.write_anon_struct()?;
/// tlv.write_uint16(2, 1000)?;
/// tlv.write_octetstring(1, &[1, 2, 3])?;
/// tlv.write_struct_end()?;
/// // now tlv.data contains encoded tlv buffer
/// # Ok(())
/// # }
/// ```
pub struct TlvBuffer {
    pub data: Vec<u8>,
}

const TYPE_INT_1: u8 = 0;
const TYPE_INT_2: u8 = 1;
const TYPE_INT_4: u8 = 2;
const TYPE_INT_8: u8 = 3;
const TYPE_UINT_1: u8 = 4;
const TYPE_UINT_2: u8 = 5;
const TYPE_UINT_4: u8 = 6;
const TYPE_UINT_8: u8 = 7;
const TYPE_BOOL_FALSE: u8 = 8;
const TYPE_BOOL_TRUE: u8 = 9;
const TYPE_UTF8_L1: u8 = 0xc;
const TYPE_UTF8_L8: u8 = 0xf;
const TYPE_OCTET_STRING_L1: u8 = 0x10;
const TYPE_OCTET_STRING_L2: u8 = 0x11;
const TYPE_OCTET_STRING_L8: u8 = 0x13;
const TYPE_NULL: u8 = 0x14;
const TYPE_STRUCT: u8 = 0x15;
const TYPE_ARRAY: u8 = 0x16;
const TYPE_LIST: u8 = 0x17;
const TYPE_END_CONTAINER: u8 = 0x18;

const CTRL_CTX_L1: u8 = 1 << 5;

/// size of tag for each of 8 tag control values
const TAG_SIZES: [usize; 8] = [0, 1, 2, 4, 2, 4, 6, 8];

const MAX_DEPTH: usize = 32;

impl TlvBuffer {
    pub fn new() -> Self {
        Self {
            data: Vec::with_capacity(256),
        }
    }
    pub fn write_anon_struct(&mut self) -> std::io::Result<()> {
        self.data.write_u8(TYPE_STRUCT)
    }
    pub fn write_struct(&mut self, tag: u8) -> std::io::Result<()> {
        self.data.write_u8(CTRL_CTX_L1 | TYPE_STRUCT)?;
        self.data.write_u8(tag)
    }
    pub fn write_array(&mut self, tag: u8) -> std::io::Result<()> {
        self.data.write_u8(CTRL_CTX_L1 | TYPE_ARRAY)?;
        self.data.write_u8(tag)
    }
    pub fn write_struct_end(&mut self) -> std::io::Result<()> {
        self.data.write_u8(TYPE_END_CONTAINER)
    }
    pub fn write_string(&mut self, tag: u8, data: &str) -> std::io::Result<()> {
        let bytes = data.as_bytes();
        if bytes.len() > 0xff {
            return Err(std::io::Error::new(
                std::io::ErrorKind::InvalidInput,
                "string longer than 255 bytes",
            ));
        }
        self.data.write_u8(CTRL_CTX_L1 | TYPE_UTF8_L1)?;
        self.data.write_u8(tag)?;
        self.data.write_u8(bytes.len() as u8)?;
        self.data.write_all(bytes)
    }
    pub fn write_octetstring(&mut self, tag: u8, data: &[u8]) -> std::io::Result<()> {
        if data.len() > 0xffff {
            return Err(std::io::Error::new(
                std::io::ErrorKind::InvalidInput,
                "octet string longer than 65535 bytes",
            ));
        }
        if data.len() > 0xff {
            self.data.write_u8(CTRL_CTX_L1 | TYPE_OCTET_STRING_L2)?;
            self.data.write_u8(tag)?;
            self.data.write_u16::<LittleEndian>(data.len() as u16)?;
        } else {
            self.data.write_u8(CTRL_CTX_L1 | TYPE_OCTET_STRING_L1)?;
            self.data.write_u8(tag)?;
            self.data.write_u8(data.len() as u8)?;
        }
        self.data.write_all(data)
    }
    pub fn write_int8(&mut self, tag: u8, value: i8) -> std::io::Result<()> {
        self.data.write_u8(CTRL_CTX_L1 | TYPE_INT_1)?;
        self.data.write_u8(tag)?;
        self.data.write_i8(value)
    }
    pub fn write_uint8(&mut self, tag: u8, value: u8) -> std::io::Result<()> {
        self.data.write_u8(CTRL_CTX_L1 | TYPE_UINT_1)?;
        self.data.write_u8(tag)?;
        self.data.write_u8(value)
    }
    pub fn write_uint16(&mut self, tag: u8, value: u16) -> std::io::Result<()> {
        self.data.write_u8(CTRL_CTX_L1 | TYPE_UINT_2)?;
        self.data.write_u8(tag)?;
        self.data.write_u16::<LittleEndian>(value)
    }
    pub fn write_uint32(&mut self, tag: u8, value: u32) -> std::io::Result<()> {
        self.data.write_u8(CTRL_CTX_L1 | TYPE_UINT_4)?;
        self.data.write_u8(tag)?;
        self.data.write_u32::<LittleEndian>(value)
    }
    pub fn write_uint64(&mut self, tag: u8, value: u64) -> std::io::Result<()> {
        self.data.write_u8(CTRL_CTX_L1 | TYPE_UINT_8)?;
        self.data.write_u8(tag)?;
        self.data.write_u64::<LittleEndian>(value)
    }
    pub fn write_bool(&mut self, tag: u8, value: bool) -> std::io::Result<()> {
        if value {
            self.data.write_u8(CTRL_CTX_L1 | TYPE_BOOL_TRUE)?;
        } else {
            self.data.write_u8(CTRL_CTX_L1 | TYPE_BOOL_FALSE)?;
        }
        self.data.write_u8(tag)
    }
}

impl Default for TlvBuffer {
    fn default() -> Self {
        Self::new()
    }
}

/// Enum containing data of decoded tlv element
#[derive(Debug, Clone, PartialEq)]
pub enum TlvItemValue {
    Int(u64),
    SignedInt(i64),
    Bool(bool),
    String(String),
    OctetString(Vec<u8>),
    List(Vec<TlvItem>),
    Nil(),
}

/// Decoded tlv element returned by [decode_tlv]
#[derive(Debug, Clone, PartialEq)]
pub struct TlvItem {
    pub tag: u8,
    pub value: TlvItemValue,
}

impl TlvItem {
    /// Walk path of context tags through nested containers.
    pub fn get(&self, tag: &[u8]) -> Option<&TlvItemValue> {
        match tag.split_first() {
            None => Some(&self.value),
            Some((first, rest)) => match &self.value {
                TlvItemValue::List(lst) => lst.iter().find(|l| l.tag == *first)?.get(rest),
                _ => None,
            },
        }
    }
    pub fn get_int(&self, tag: &[u8]) -> Option<u64> {
        match self.get(tag) {
            Some(TlvItemValue::Int(i)) => Some(*i),
            Some(TlvItemValue::SignedInt(i)) => u64::try_from(*i).ok(),
            _ => None,
        }
    }
    pub fn get_u16(&self, tag: &[u8]) -> Option<u16> {
        self.get_int(tag).and_then(|i| u16::try_from(i).ok())
    }
    pub fn get_u32(&self, tag: &[u8]) -> Option<u32> {
        self.get_int(tag).and_then(|i| u32::try_from(i).ok())
    }
    pub fn get_bool(&self, tag: &[u8]) -> Option<bool> {
        if let Some(TlvItemValue::Bool(b)) = self.get(tag) {
            Some(*b)
        } else {
            None
        }
    }
    pub fn get_octet_string(&self, tag: &[u8]) -> Option<&[u8]> {
        if let Some(TlvItemValue::OctetString(o)) = self.get(tag) {
            Some(o)
        } else {
            None
        }
    }
    pub fn get_string(&self, tag: &[u8]) -> Option<&str> {
        if let Some(TlvItemValue::String(s)) = self.get(tag) {
            Some(s)
        } else {
            None
        }
    }
}

fn truncated(_: std::io::Error) -> CodecError {
    CodecError::InvalidTlv("truncated element".to_owned())
}

fn read_tag(tagctrl: u8, cursor: &mut Cursor<&[u8]>) -> Result<u8> {
    let size = TAG_SIZES[(tagctrl & 7) as usize];
    if size == 1 {
        return cursor.read_u8().map_err(truncated);
    }
    let mut skip = [0u8; 8];
    cursor.read_exact(&mut skip[..size]).map_err(truncated)?;
    Ok(0)
}

fn read_len(cursor: &mut Cursor<&[u8]>, width: u8) -> Result<usize> {
    let len = match width {
        0 => cursor.read_u8().map_err(truncated)? as u64,
        1 => cursor.read_u16::<LittleEndian>().map_err(truncated)? as u64,
        2 => cursor.read_u32::<LittleEndian>().map_err(truncated)? as u64,
        _ => cursor.read_u64::<LittleEndian>().map_err(truncated)?,
    };
    let remaining = cursor.get_ref().len() as u64 - cursor.position();
    if len > remaining {
        return Err(CodecError::InvalidTlv(format!(
            "element length {} exceeds remaining {} bytes",
            len, remaining
        )));
    }
    Ok(len as usize)
}

fn read_bytes(cursor: &mut Cursor<&[u8]>, width: u8) -> Result<Vec<u8>> {
    let len = read_len(cursor, width)?;
    let mut value = vec![0; len];
    cursor.read_exact(&mut value).map_err(truncated)?;
    Ok(value)
}

/// Decode elements until end of container (or end of data at top level).
fn decode(cursor: &mut Cursor<&[u8]>, container: &mut Vec<TlvItem>, depth: usize) -> Result<()> {
    if depth > MAX_DEPTH {
        return Err(CodecError::InvalidTlv(format!("nesting deeper than {}", MAX_DEPTH)));
    }
    while cursor.position() < cursor.get_ref().len() as u64 {
        let fb = cursor.read_u8().map_err(truncated)?;
        let tp = fb & 0x1f;
        let tagctrl = fb >> 5;
        if tp == TYPE_END_CONTAINER {
            if depth == 0 {
                return Err(CodecError::InvalidTlv("unexpected end of container".to_owned()));
            }
            return Ok(());
        }
        let tag = read_tag(tagctrl, cursor)?;
        let value = match tp {
            TYPE_INT_1 => TlvItemValue::SignedInt(cursor.read_i8().map_err(truncated)? as i64),
            TYPE_INT_2 => TlvItemValue::SignedInt(cursor.read_i16::<LittleEndian>().map_err(truncated)? as i64),
            TYPE_INT_4 => TlvItemValue::SignedInt(cursor.read_i32::<LittleEndian>().map_err(truncated)? as i64),
            TYPE_INT_8 => TlvItemValue::SignedInt(cursor.read_i64::<LittleEndian>().map_err(truncated)?),
            TYPE_UINT_1 => TlvItemValue::Int(cursor.read_u8().map_err(truncated)? as u64),
            TYPE_UINT_2 => TlvItemValue::Int(cursor.read_u16::<LittleEndian>().map_err(truncated)? as u64),
            TYPE_UINT_4 => TlvItemValue::Int(cursor.read_u32::<LittleEndian>().map_err(truncated)? as u64),
            TYPE_UINT_8 => TlvItemValue::Int(cursor.read_u64::<LittleEndian>().map_err(truncated)?),
            TYPE_BOOL_FALSE => TlvItemValue::Bool(false),
            TYPE_BOOL_TRUE => TlvItemValue::Bool(true),
            TYPE_UTF8_L1..=TYPE_UTF8_L8 => {
                let raw = read_bytes(cursor, tp - TYPE_UTF8_L1)?;
                let s = String::from_utf8(raw)
                    .map_err(|_| CodecError::InvalidTlv("string is not utf8".to_owned()))?;
                TlvItemValue::String(s)
            }
            TYPE_OCTET_STRING_L1..=TYPE_OCTET_STRING_L8 => {
                TlvItemValue::OctetString(read_bytes(cursor, tp - TYPE_OCTET_STRING_L1)?)
            }
            TYPE_NULL => TlvItemValue::Nil(),
            TYPE_STRUCT | TYPE_ARRAY | TYPE_LIST => {
                let mut c2 = Vec::new();
                decode(cursor, &mut c2, depth + 1)?;
                TlvItemValue::List(c2)
            }
            _ => return Err(CodecError::InvalidTlv(format!("unknown tlv type 0x{:x}", tp))),
        };
        container.push(TlvItem { tag, value });
    }
    if depth > 0 {
        return Err(CodecError::InvalidTlv("container not terminated".to_owned()));
    }
    Ok(())
}

/// decode raw buffer with tlv data
pub fn decode_tlv(data: &[u8]) -> Result<TlvItem> {
    let mut container = Vec::new();
    let mut cursor = Cursor::new(data);
    decode(&mut cursor, &mut container, 0)?;
    if container.len() == 1 {
        container
            .pop()
            .ok_or_else(|| CodecError::InvalidTlv("no data found".to_owned()))
    } else {
        Ok(TlvItem {
            tag: 0,
            value: TlvItemValue::List(container),
        })
    }
}
