//! Frame Codec
//!
//! Encodes an operation plus optional parameter into the scratch buffer, and
//! decodes a complete frame back out of it. See `SPEC_FULL.md` §4.2 and §6.1
//! for the exact byte layouts.

use crate::buffer::FrameBuffer;
use crate::error::{LysError, Result};
use crate::types::{self, Op, Tag, ARRAY_DATA_OFFSET, DATA_OFFSET, MAX_MSG_LEN};

/// A parameter value. Scalars are inline; strings and arrays borrow their
/// payload bytes — from caller-supplied storage when encoding, or from the
/// scratch buffer when decoding. A decoded view is only valid until the next
/// encode or decode call touches the buffer it borrows from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParamValue<'a> {
    U32(u32),
    I32(i32),
    U8(u8),
    I8(i8),
    Bool(bool),
    /// 1..=MAX_STRING_LEN raw bytes.
    Str(&'a [u8]),
    /// A scalar-tagged array: `tag` is the item type, `bytes` the
    /// concatenated item payload (`bytes.len()` is a multiple of
    /// `size_of(tag)`).
    Array { tag: Tag, bytes: &'a [u8] },
}

impl<'a> ParamValue<'a> {
    pub fn tag(&self) -> Tag {
        match self {
            ParamValue::U32(_) => Tag::U32,
            ParamValue::I32(_) => Tag::I32,
            ParamValue::U8(_) => Tag::U8,
            ParamValue::I8(_) => Tag::I8,
            ParamValue::Bool(_) => Tag::Bool,
            ParamValue::Str(_) => Tag::String,
            ParamValue::Array { .. } => Tag::Array,
        }
    }

    /// Number of items in an array value (undefined for non-arrays).
    pub fn array_len(&self) -> usize {
        match self {
            ParamValue::Array { tag, bytes } => {
                let size = types::size_of(*tag).unwrap_or(1);
                bytes.len() / size
            }
            _ => 0,
        }
    }
}

/// Stateless encoder/decoder pair operating on a caller-owned `FrameBuffer`.
#[derive(Debug, Default)]
pub struct Codec;

impl Codec {
    pub fn new() -> Self {
        Self
    }

    /// Encode `op` (plus `param` for PARAM/LOG) into `buf`. On success `buf`
    /// holds exactly the encoded frame.
    pub fn encode(&self, buf: &mut FrameBuffer, op: Op, param: Option<ParamValue>) -> Result<()> {
        buf.clear();

        if op.is_simple() {
            if param.is_some() {
                return Err(LysError::InvalidParam(format!(
                    "{op:?} does not carry a parameter"
                )));
            }
            let raw = buf.raw_mut();
            raw[0] = 2;
            raw[1] = op.as_byte();
            buf.set_len(2);
            return Ok(());
        }

        if !op.carries_param() {
            return Err(LysError::InvalidParam(format!("{op:?} is not a valid op")));
        }

        let param = param.ok_or_else(|| {
            LysError::InvalidParam(format!("{op:?} requires a parameter"))
        })?;

        let total_len = Self::write_param(buf, op, &param)?;
        buf.raw_mut()[0] = total_len as u8;
        buf.set_len(total_len);
        Ok(())
    }

    fn write_param(buf: &mut FrameBuffer, op: Op, param: &ParamValue) -> Result<usize> {
        match param {
            ParamValue::Str(bytes) => Self::write_string(buf, op, bytes),
            ParamValue::Array { tag, bytes } => Self::write_array(buf, op, *tag, bytes),
            scalar => Self::write_scalar(buf, op, *scalar),
        }
    }

    fn write_scalar(buf: &mut FrameBuffer, op: Op, value: ParamValue) -> Result<usize> {
        let tag = value.tag();
        let size = types::size_of(tag).expect("scalar tags have a fixed size");
        let total_len = DATA_OFFSET + size;
        if total_len > MAX_MSG_LEN {
            return Err(LysError::InvalidParam("scalar frame exceeds MAX_MSG_LEN".into()));
        }

        let raw = buf.raw_mut();
        raw[1] = op.as_byte();
        raw[2] = tag.as_byte();
        let payload = &mut raw[DATA_OFFSET..DATA_OFFSET + size];
        match value {
            ParamValue::U32(v) => payload.copy_from_slice(&v.to_ne_bytes()),
            ParamValue::I32(v) => payload.copy_from_slice(&v.to_ne_bytes()),
            ParamValue::U8(v) => payload.copy_from_slice(&v.to_ne_bytes()),
            ParamValue::I8(v) => payload.copy_from_slice(&v.to_ne_bytes()),
            ParamValue::Bool(v) => payload[0] = u8::from(v),
            _ => unreachable!("write_scalar only called with scalar values"),
        }
        Ok(total_len)
    }

    fn write_string(buf: &mut FrameBuffer, op: Op, bytes: &[u8]) -> Result<usize> {
        let len = bytes.len();
        if len == 0 {
            return Err(LysError::InvalidParam("string parameter cannot be empty".into()));
        }
        if DATA_OFFSET + len > MAX_MSG_LEN {
            return Err(LysError::InvalidParam("string parameter too long".into()));
        }

        let raw = buf.raw_mut();
        raw[1] = op.as_byte();
        raw[2] = Tag::String.as_byte();
        raw[DATA_OFFSET..DATA_OFFSET + len].copy_from_slice(bytes);
        Ok(DATA_OFFSET + len)
    }

    fn write_array(buf: &mut FrameBuffer, op: Op, inner_tag: Tag, bytes: &[u8]) -> Result<usize> {
        if !inner_tag.is_scalar() {
            return Err(LysError::InvalidParam(
                "array items must be a scalar tag; nested arrays and strings are not allowed"
                    .into(),
            ));
        }
        let item_size = types::size_of(inner_tag).expect("scalar tags have a fixed size");
        if bytes.is_empty() || bytes.len() % item_size != 0 {
            return Err(LysError::InvalidParam(
                "array payload must hold at least one whole item".into(),
            ));
        }
        if ARRAY_DATA_OFFSET + bytes.len() > MAX_MSG_LEN {
            return Err(LysError::InvalidParam("array parameter too long".into()));
        }

        let raw = buf.raw_mut();
        raw[1] = op.as_byte();
        raw[2] = Tag::Array.as_byte();
        raw[3] = inner_tag.as_byte();
        raw[ARRAY_DATA_OFFSET..ARRAY_DATA_OFFSET + bytes.len()].copy_from_slice(bytes);
        Ok(ARRAY_DATA_OFFSET + bytes.len())
    }

    /// Decode the complete frame currently held in `buf`.
    ///
    /// # Panics
    ///
    /// Never panics, but the caller must ensure `buf.is_frame_complete()`
    /// holds; an incomplete buffer produces nonsensical (but never
    /// out-of-bounds) results.
    pub fn decode<'a>(&self, buf: &'a FrameBuffer) -> Result<(Op, Option<ParamValue<'a>>)> {
        let frame = buf.as_slice();
        let declared_len = buf.declared_len().unwrap_or(0);
        let frame = &frame[..declared_len.min(frame.len())];

        if frame.len() < 2 {
            return Err(LysError::InvalidParam("frame shorter than header".into()));
        }

        let op = Op::from_byte(frame[1])?;

        if op.is_simple() {
            return Ok((op, None));
        }
        if !op.carries_param() {
            return Err(LysError::InvalidParam(format!("{op:?} is not a valid op")));
        }

        if frame.len() < 3 {
            return Err(LysError::InvalidParam("param frame missing tag byte".into()));
        }
        let tag = Tag::from_byte(frame[2])?;

        let param = match tag {
            Tag::Array => Self::parse_array(frame)?,
            Tag::String => Self::parse_string(frame)?,
            scalar => Self::parse_scalar(frame, scalar)?,
        };

        Ok((op, Some(param)))
    }

    fn parse_array(frame: &[u8]) -> Result<ParamValue> {
        if frame.len() < ARRAY_DATA_OFFSET {
            return Err(LysError::InvalidParam("array frame missing inner tag".into()));
        }
        let inner_tag = Tag::from_byte(frame[3])?;
        let item_size = types::size_of(inner_tag)
            .ok_or_else(|| LysError::InvalidParam("array inner tag must be a fixed size".into()))?;

        let data = &frame[ARRAY_DATA_OFFSET..];
        if data.is_empty() || data.len() % item_size != 0 {
            return Err(LysError::InvalidParam(
                "array data length is not a positive multiple of the item size".into(),
            ));
        }

        Ok(ParamValue::Array {
            tag: inner_tag,
            bytes: data,
        })
    }

    fn parse_string(frame: &[u8]) -> Result<ParamValue> {
        let data = &frame[DATA_OFFSET..];
        if data.is_empty() {
            return Err(LysError::InvalidParam("string payload cannot be empty".into()));
        }
        Ok(ParamValue::Str(data))
    }

    fn parse_scalar<'a>(frame: &'a [u8], tag: Tag) -> Result<ParamValue<'a>> {
        let expected = types::size_of(tag).expect("non-array, non-string tags are scalar");
        let data = &frame[DATA_OFFSET..];
        if data.len() != expected {
            return Err(LysError::InvalidParam(format!(
                "{tag:?} payload must be exactly {expected} bytes, got {}",
                data.len()
            )));
        }
        Ok(match tag {
            Tag::U32 => ParamValue::U32(u32::from_ne_bytes(data.try_into().unwrap())),
            Tag::I32 => ParamValue::I32(i32::from_ne_bytes(data.try_into().unwrap())),
            Tag::U8 => ParamValue::U8(data[0]),
            Tag::I8 => ParamValue::I8(data[0] as i8),
            Tag::Bool => ParamValue::Bool(data[0] != 0),
            Tag::String | Tag::Array => unreachable!("handled by dedicated parsers"),
        })
    }
}
