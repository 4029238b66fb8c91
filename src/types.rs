//! The closed enumerations and fixed sizes that make up the Lys data model.
//!
//! Every ordinal here is part of the wire format (see `codec`) and must not
//! be renumbered without breaking every device and host that speaks Lys.

use crate::error::{LysError, Result};

/// Largest frame that fits in the scratch buffer, including the LEN byte.
pub const MAX_MSG_LEN: usize = 64;
/// Largest string payload (bytes), independent of frame overhead.
pub const MAX_STRING_LEN: usize = 64;
/// Largest concatenated array payload (bytes), independent of frame overhead.
pub const MAX_ARRAY_LEN: usize = 64;

/// Offset of a scalar/string's payload within a PARAM or LOG frame.
pub const DATA_OFFSET: usize = 3;
/// Offset of an array's item data within a PARAM or LOG frame (past the
/// inner-tag byte at offset 3).
pub const ARRAY_DATA_OFFSET: usize = 4;

const _: () = assert!(MAX_MSG_LEN <= 255, "frame length must fit in a u8");

/// Parameter type tag. Ordinals are wire format, see `SPEC_FULL.md` §6.1.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum Tag {
    U32 = 0,
    I32 = 1,
    U8 = 2,
    I8 = 3,
    Bool = 4,
    String = 5,
    Array = 6,
}

impl Tag {
    pub fn from_byte(byte: u8) -> Result<Self> {
        match byte {
            0 => Ok(Tag::U32),
            1 => Ok(Tag::I32),
            2 => Ok(Tag::U8),
            3 => Ok(Tag::I8),
            4 => Ok(Tag::Bool),
            5 => Ok(Tag::String),
            6 => Ok(Tag::Array),
            other => Err(LysError::InvalidParam(format!("unknown tag byte {other}"))),
        }
    }

    pub const fn as_byte(self) -> u8 {
        self as u8
    }

    /// True for U32, I32, U8, I8, BOOL: the tags an array may hold.
    pub fn is_scalar(self) -> bool {
        matches!(self, Tag::U32 | Tag::I32 | Tag::U8 | Tag::I8 | Tag::Bool)
    }
}

/// The wire size of a tag: fixed for scalars, `None` (variable) for
/// STRING/ARRAY.
pub fn size_of(tag: Tag) -> Option<usize> {
    match tag {
        Tag::U32 => Some(4),
        Tag::I32 => Some(4),
        Tag::U8 => Some(1),
        Tag::I8 => Some(1),
        Tag::Bool => Some(1),
        Tag::String | Tag::Array => None,
    }
}

/// Operation code. Ordinals are wire format, see `SPEC_FULL.md` §6.1.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum Op {
    Unknown = 0,
    Init = 1,
    Start = 2,
    Result = 3,
    Finished = 4,
    Param = 5,
    Ack = 6,
    Log = 7,
}

impl Op {
    pub fn from_byte(byte: u8) -> Result<Self> {
        match byte {
            0 => Ok(Op::Unknown),
            1 => Ok(Op::Init),
            2 => Ok(Op::Start),
            3 => Ok(Op::Result),
            4 => Ok(Op::Finished),
            5 => Ok(Op::Param),
            6 => Ok(Op::Ack),
            7 => Ok(Op::Log),
            other => Err(LysError::InvalidParam(format!("unknown op byte {other}"))),
        }
    }

    pub const fn as_byte(self) -> u8 {
        self as u8
    }

    /// True for ops that carry no parameter (emit as a bare `[LEN, OP]` frame).
    pub fn is_simple(self) -> bool {
        matches!(
            self,
            Op::Unknown | Op::Init | Op::Start | Op::Result | Op::Finished | Op::Ack
        )
    }

    /// True for ops whose frame must carry a parameter.
    pub fn carries_param(self) -> bool {
        matches!(self, Op::Param | Op::Log)
    }
}

/// Session state. See `SPEC_FULL.md` §4.4.4 for the transition table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum State {
    Unknown,
    WaitForStart,
    Running,
    Result,
    Finished,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tag_round_trips_every_ordinal() {
        for byte in 0..=6u8 {
            let tag = Tag::from_byte(byte).unwrap();
            assert_eq!(tag.as_byte(), byte);
        }
    }

    #[test]
    fn tag_rejects_unknown_byte() {
        assert!(Tag::from_byte(7).is_err());
        assert!(Tag::from_byte(255).is_err());
    }

    #[test]
    fn op_round_trips_every_ordinal() {
        for byte in 0..=7u8 {
            let op = Op::from_byte(byte).unwrap();
            assert_eq!(op.as_byte(), byte);
        }
    }

    #[test]
    fn op_rejects_unknown_byte() {
        assert!(Op::from_byte(8).is_err());
    }

    #[test]
    fn size_table_matches_spec() {
        assert_eq!(size_of(Tag::U32), Some(4));
        assert_eq!(size_of(Tag::I32), Some(4));
        assert_eq!(size_of(Tag::U8), Some(1));
        assert_eq!(size_of(Tag::I8), Some(1));
        assert_eq!(size_of(Tag::Bool), Some(1));
        assert_eq!(size_of(Tag::String), None);
        assert_eq!(size_of(Tag::Array), None);
    }

    #[test]
    fn only_scalars_are_scalar() {
        assert!(Tag::U32.is_scalar());
        assert!(Tag::Bool.is_scalar());
        assert!(!Tag::String.is_scalar());
        assert!(!Tag::Array.is_scalar());
    }
}
