//! Binary entry format.
//!
//! An entry is a 32-bit little-endian header word, an optional 64-bit
//! timestamp, and `length` bytes of fields:
//!
//! ```text
//! header word
//!   bits 0-1   arity      0 empty, 1 literal only, 2 format + params
//!   bits 2-4   severity   0..=6
//!   bit  5     overflow   entry was served by the heap fallback
//!   bit  6     timestamp  a u64 (ns since UNIX epoch) follows
//!   bits 7-31  length     exact field bytes after header and timestamp
//!
//! field = tag byte + payload
//!   bits 0-3   kind       see `Kind`
//!   bits 4-5   width      payload width 1/2/4/8 bytes; bool value in bit 4
//!   bits 6-7   presentation
//! ```
//!
//! Integers, literal ids and string lengths are written in the smallest of
//! 1/2/4/8 bytes that holds them (signed values: the smallest width whose
//! sign extension restores them). Floats are always 4 or 8 bytes, booleans
//! have no payload. The payload size is a function of the tag byte alone.

use std::fmt;

use crate::error::DecodeError;
use crate::loggable::Loggable;
use crate::severity::Severity;
use crate::string_registry::{get_string, Literal};

pub const HEADER_SIZE: usize = 4;
pub const TIMESTAMP_SIZE: usize = 8;
/// Largest field area a header can describe.
pub const MAX_LENGTH: usize = (1 << 25) - 1;

const ARITY_MASK: u32 = 0b11;
const SEVERITY_SHIFT: u32 = 2;
const SEVERITY_MASK: u32 = 0b111;
const OVERFLOW_BIT: u32 = 1 << 5;
const TIMESTAMP_BIT: u32 = 1 << 6;
const LENGTH_SHIFT: u32 = 7;

const KIND_MASK: u8 = 0x0f;
const WIDTH_SHIFT: u8 = 4;
const WIDTH_MASK: u8 = 0b11;
const PRESENTATION_SHIFT: u8 = 6;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum Arity {
    Empty = 0,
    Literal = 1,
    Format = 2,
}

impl Arity {
    fn from_bits(bits: u8) -> Result<Arity, DecodeError> {
        match bits {
            0 => Ok(Arity::Empty),
            1 => Ok(Arity::Literal),
            2 => Ok(Arity::Format),
            other => Err(DecodeError::InvalidArity(other)),
        }
    }
}

/// What the producer supplies for the header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HeaderData {
    pub severity: Severity,
    pub arity: Arity,
    pub overflow: bool,
    pub timestamp: Option<u64>,
}

impl HeaderData {
    pub fn new(severity: Severity, arity: Arity) -> Self {
        Self {
            severity,
            arity,
            overflow: false,
            timestamp: None,
        }
    }

    /// Header word plus timestamp, in bytes.
    pub fn size(&self) -> usize {
        HEADER_SIZE + if self.timestamp.is_some() { TIMESTAMP_SIZE } else { 0 }
    }
}

/// A decoded header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Header {
    pub severity: Severity,
    pub arity: Arity,
    pub overflow: bool,
    pub timestamp: Option<u64>,
    /// Field bytes following the header.
    pub length: usize,
}

/// Packs a header word. `None` if `length` does not fit or the severity is
/// not a wire value.
pub fn pack_header(data: &HeaderData, length: usize) -> Option<u32> {
    if length > MAX_LENGTH || data.severity >= Severity::Invalid {
        return None;
    }
    let mut word = data.arity as u32 | (data.severity.bits() as u32) << SEVERITY_SHIFT;
    if data.overflow {
        word |= OVERFLOW_BIT;
    }
    if data.timestamp.is_some() {
        word |= TIMESTAMP_BIT;
    }
    Some(word | (length as u32) << LENGTH_SHIFT)
}

/// Unpacks a header word; the timestamp, if flagged, is read separately.
fn unpack_header(word: u32) -> Result<(Header, bool), DecodeError> {
    let severity_bits = ((word >> SEVERITY_SHIFT) & SEVERITY_MASK) as u8;
    let severity =
        Severity::from_bits(severity_bits).ok_or(DecodeError::InvalidSeverity(severity_bits))?;
    let header = Header {
        severity,
        arity: Arity::from_bits((word & ARITY_MASK) as u8)?,
        overflow: word & OVERFLOW_BIT != 0,
        timestamp: None,
        length: (word >> LENGTH_SHIFT) as usize,
    };
    Ok((header, word & TIMESTAMP_BIT != 0))
}

/// Field kinds, the low nibble of the tag byte.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum Kind {
    Raw = 0,
    U8 = 1,
    U16 = 2,
    U32 = 3,
    U64 = 4,
    I8 = 5,
    I16 = 6,
    I32 = 7,
    I64 = 8,
    F32 = 9,
    F64 = 10,
    Bool = 11,
    Literal = 12,
    Str = 13,
    Bytes = 14,
}

/// How a numeric field is rendered.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[repr(u8)]
pub enum Presentation {
    #[default]
    Normal = 0,
    Hex = 1,
    /// Integers: zero padded to the type's widest decimal. Floats: fixed
    /// point with six decimals.
    FixedWidth = 2,
}

impl Presentation {
    fn from_bits(bits: u8) -> Option<Presentation> {
        match bits {
            0 => Some(Presentation::Normal),
            1 => Some(Presentation::Hex),
            2 => Some(Presentation::FixedWidth),
            _ => None,
        }
    }
}

#[inline]
pub fn tag(kind: Kind, width_code: u8, presentation: Presentation) -> u8 {
    kind as u8 | (width_code & WIDTH_MASK) << WIDTH_SHIFT | (presentation as u8) << PRESENTATION_SHIFT
}

#[inline]
const fn width_bytes(code: u8) -> usize {
    1 << code
}

/// Width code of the smallest unsigned representation of `value`.
#[inline]
pub const fn unsigned_width(value: u64) -> u8 {
    if value <= u8::MAX as u64 {
        0
    } else if value <= u16::MAX as u64 {
        1
    } else if value <= u32::MAX as u64 {
        2
    } else {
        3
    }
}

/// Width code of the smallest two's complement representation of `value`.
#[inline]
pub const fn signed_width(value: i64) -> u8 {
    if value >= i8::MIN as i64 && value <= i8::MAX as i64 {
        0
    } else if value >= i16::MIN as i64 && value <= i16::MAX as i64 {
        1
    } else if value >= i32::MIN as i64 && value <= i32::MAX as i64 {
        2
    } else {
        3
    }
}

#[inline]
pub const fn unsigned_len(value: u64) -> usize {
    1 + width_bytes(unsigned_width(value))
}

#[inline]
pub const fn signed_len(value: i64) -> usize {
    1 + width_bytes(signed_width(value))
}

#[inline]
pub const fn len_prefixed_len(bytes: usize) -> usize {
    unsigned_len(bytes as u64) + bytes
}

pub const F32_LEN: usize = 1 + 4;
pub const F64_LEN: usize = 1 + 8;
pub const BOOL_LEN: usize = 1;

/// Bounded cursor over an entry buffer. Never writes past the end: a write
/// that does not fit sets the overflow flag and every later write is ignored.
pub struct Writer<'a> {
    buf: &'a mut [u8],
    pos: usize,
    overflow: bool,
}

impl<'a> Writer<'a> {
    pub fn new(buf: &'a mut [u8]) -> Self {
        Self {
            buf,
            pos: 0,
            overflow: false,
        }
    }

    pub fn position(&self) -> usize {
        self.pos
    }

    pub fn overflowed(&self) -> bool {
        self.overflow
    }

    #[inline]
    fn put(&mut self, bytes: &[u8]) {
        if self.overflow {
            return;
        }
        match self.buf.get_mut(self.pos..self.pos + bytes.len()) {
            Some(dst) => {
                dst.copy_from_slice(bytes);
                self.pos += bytes.len();
            }
            None => self.overflow = true,
        }
    }

    #[inline]
    fn put_width(&mut self, value: u64, code: u8) {
        self.put(&value.to_le_bytes()[..width_bytes(code)]);
    }

    pub(crate) fn write_unsigned(&mut self, kind: Kind, value: u64, presentation: Presentation) {
        let code = unsigned_width(value);
        self.put(&[tag(kind, code, presentation)]);
        self.put_width(value, code);
    }

    pub(crate) fn write_signed(&mut self, kind: Kind, value: i64, presentation: Presentation) {
        let code = signed_width(value);
        self.put(&[tag(kind, code, presentation)]);
        self.put_width(value as u64, code);
    }

    pub(crate) fn write_f32(&mut self, value: f32, presentation: Presentation) {
        self.put(&[tag(Kind::F32, 2, presentation)]);
        self.put(&value.to_le_bytes());
    }

    pub(crate) fn write_f64(&mut self, value: f64, presentation: Presentation) {
        self.put(&[tag(Kind::F64, 3, presentation)]);
        self.put(&value.to_le_bytes());
    }

    pub(crate) fn write_bool(&mut self, value: bool) {
        self.put(&[tag(Kind::Bool, value as u8, Presentation::Normal)]);
    }

    pub(crate) fn write_literal(&mut self, literal: Literal) {
        self.write_unsigned(Kind::Literal, literal.id() as u64, Presentation::Normal);
    }

    pub(crate) fn write_str(&mut self, value: &str) {
        self.write_len_prefixed(Kind::Str, value.as_bytes());
    }

    pub(crate) fn write_bytes(&mut self, value: &[u8]) {
        self.write_len_prefixed(Kind::Bytes, value);
    }

    fn write_len_prefixed(&mut self, kind: Kind, bytes: &[u8]) {
        self.write_unsigned(kind, bytes.len() as u64, Presentation::Normal);
        self.put(bytes);
    }
}

/// Bytes needed to encode an entry with these fields.
pub fn encoded_len(header: &HeaderData, fields: &[&dyn Loggable]) -> usize {
    header.size() + fields_len(fields)
}

fn fields_len(fields: &[&dyn Loggable]) -> usize {
    fields.iter().map(|f| f.encoded_len()).sum()
}

/// Encodes header and fields into `buf`, returning the bytes written. Returns
/// 0, possibly after a partial write the caller must discard, if `buf` is too
/// small or the fields do not fit a header.
pub fn encode(buf: &mut [u8], header: &HeaderData, fields: &[&dyn Loggable]) -> usize {
    let length = fields_len(fields);
    let Some(word) = pack_header(header, length) else {
        return 0;
    };
    let total = header.size() + length;
    if total > buf.len() {
        return 0;
    }

    let mut writer = Writer::new(buf);
    writer.put(&word.to_le_bytes());
    if let Some(ts) = header.timestamp {
        writer.put(&ts.to_le_bytes());
    }
    for field in fields {
        field.encode(&mut writer);
    }

    // A field whose `encoded_len` lies would leave the header length wrong.
    if writer.overflowed() || writer.position() != total {
        return 0;
    }
    total
}

/// A decoded field value. Borrowed strings and byte streams point into the
/// entry buffer.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Value<'a> {
    Raw(u64),
    U8(u8),
    U16(u16),
    U32(u32),
    U64(u64),
    I8(i8),
    I16(i16),
    I32(i32),
    I64(i64),
    F32(f32),
    F64(f64),
    Bool(bool),
    Literal(&'static str),
    Str(&'a str),
    Bytes(&'a [u8]),
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Field<'a> {
    pub value: Value<'a>,
    pub presentation: Presentation,
}

impl fmt::Display for Field<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        use Presentation::*;
        let presentation = self.presentation;

        macro_rules! int {
            ($v:expr, $width:expr) => {
                match presentation {
                    Hex => write!(f, "{:#x}", $v),
                    FixedWidth => write!(f, "{:0w$}", $v, w = $width),
                    Normal => write!(f, "{}", $v),
                }
            };
        }

        match self.value {
            Value::Raw(v) => write!(f, "{:#018x}", v),
            Value::U8(v) => int!(v, 3),
            Value::U16(v) => int!(v, 5),
            Value::U32(v) => int!(v, 10),
            Value::U64(v) => int!(v, 20),
            // signed widths include the sign
            Value::I8(v) => int!(v, 4),
            Value::I16(v) => int!(v, 6),
            Value::I32(v) => int!(v, 11),
            Value::I64(v) => int!(v, 20),
            Value::F32(v) if presentation == FixedWidth => write!(f, "{:.6}", v),
            Value::F64(v) if presentation == FixedWidth => write!(f, "{:.6}", v),
            Value::F32(v) => write!(f, "{}", v),
            Value::F64(v) => write!(f, "{}", v),
            Value::Bool(v) => write!(f, "{}", v),
            Value::Literal(s) => f.write_str(s),
            Value::Str(s) => f.write_str(s),
            Value::Bytes(bytes) => {
                for b in bytes {
                    write!(f, "{:02x}", b)?;
                }
                Ok(())
            }
        }
    }
}

struct Reader<'a> {
    buf: &'a [u8],
    pos: usize,
    // offset of `buf` inside the entry, for error reports
    base: usize,
}

impl<'a> Reader<'a> {
    fn new(buf: &'a [u8], base: usize) -> Self {
        Self { buf, pos: 0, base }
    }

    fn is_done(&self) -> bool {
        self.pos >= self.buf.len()
    }

    fn finish(&mut self) {
        self.pos = self.buf.len();
    }

    fn take(&mut self, n: usize) -> Result<&'a [u8], DecodeError> {
        let bytes = self
            .pos
            .checked_add(n)
            .and_then(|end| self.buf.get(self.pos..end))
            .ok_or(DecodeError::Truncated {
                offset: self.base + self.pos,
                needed: n,
                available: self.buf.len().saturating_sub(self.pos),
            })?;
        self.pos += n;
        Ok(bytes)
    }

    fn array<const N: usize>(&mut self) -> Result<[u8; N], DecodeError> {
        let mut out = [0u8; N];
        out.copy_from_slice(self.take(N)?);
        Ok(out)
    }

    fn unsigned(&mut self, code: u8) -> Result<u64, DecodeError> {
        let n = width_bytes(code);
        let mut out = [0u8; 8];
        out[..n].copy_from_slice(self.take(n)?);
        Ok(u64::from_le_bytes(out))
    }

    fn signed(&mut self, code: u8) -> Result<i64, DecodeError> {
        let shift = 64 - 8 * width_bytes(code) as u32;
        Ok(((self.unsigned(code)? << shift) as i64) >> shift)
    }
}

fn narrow<T: TryFrom<u64>>(value: u64, tag: u8) -> Result<T, DecodeError> {
    T::try_from(value).map_err(|_| DecodeError::InvalidTag(tag))
}

fn narrow_signed<T: TryFrom<i64>>(value: i64, tag: u8) -> Result<T, DecodeError> {
    T::try_from(value).map_err(|_| DecodeError::InvalidTag(tag))
}

/// Lazy iterator over the fields of one entry. Yields at most one error and
/// then stops.
pub struct Fields<'a> {
    reader: Reader<'a>,
}

impl<'a> Fields<'a> {
    fn read_field(&mut self) -> Result<Field<'a>, DecodeError> {
        let tag = self.reader.take(1)?[0];
        let code = (tag >> WIDTH_SHIFT) & WIDTH_MASK;
        let presentation =
            Presentation::from_bits(tag >> PRESENTATION_SHIFT).ok_or(DecodeError::InvalidTag(tag))?;
        let r = &mut self.reader;

        let value = match tag & KIND_MASK {
            0 => Value::Raw(r.unsigned(code)?),
            1 => Value::U8(narrow(r.unsigned(code)?, tag)?),
            2 => Value::U16(narrow(r.unsigned(code)?, tag)?),
            3 => Value::U32(narrow(r.unsigned(code)?, tag)?),
            4 => Value::U64(r.unsigned(code)?),
            5 => Value::I8(narrow_signed(r.signed(code)?, tag)?),
            6 => Value::I16(narrow_signed(r.signed(code)?, tag)?),
            7 => Value::I32(narrow_signed(r.signed(code)?, tag)?),
            8 => Value::I64(r.signed(code)?),
            9 if code == 2 => Value::F32(f32::from_le_bytes(r.array()?)),
            10 if code == 3 => Value::F64(f64::from_le_bytes(r.array()?)),
            11 => Value::Bool(code & 1 != 0),
            12 => {
                let id: u32 = narrow(r.unsigned(code)?, tag)?;
                Value::Literal(get_string(id).ok_or(DecodeError::UnknownLiteral(id))?)
            }
            13 => {
                let len: usize = narrow(r.unsigned(code)?, tag)?;
                let bytes = r.take(len)?;
                Value::Str(std::str::from_utf8(bytes).map_err(|_| DecodeError::InvalidUtf8)?)
            }
            14 => {
                let len: usize = narrow(r.unsigned(code)?, tag)?;
                Value::Bytes(r.take(len)?)
            }
            _ => return Err(DecodeError::InvalidTag(tag)),
        };
        Ok(Field {
            value,
            presentation,
        })
    }
}

impl<'a> Iterator for Fields<'a> {
    type Item = Result<Field<'a>, DecodeError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.reader.is_done() {
            return None;
        }
        let field = self.read_field();
        if field.is_err() {
            self.reader.finish();
        }
        Some(field)
    }
}

/// Decodes the header and returns an iterator over exactly `length` bytes of
/// fields. Bytes after the entry are ignored.
pub fn decode(buf: &[u8]) -> Result<(Header, Fields<'_>), DecodeError> {
    let mut reader = Reader::new(buf, 0);
    let word = u32::from_le_bytes(reader.array()?);
    let (mut header, has_timestamp) = unpack_header(word)?;
    if has_timestamp {
        header.timestamp = Some(u64::from_le_bytes(reader.array()?));
    }
    let base = reader.pos;
    let body = reader.take(header.length)?;
    Ok((
        header,
        Fields {
            reader: Reader::new(body, base),
        },
    ))
}
