//! Lys: Host/Device Synchronization Protocol
//!
//! A framing, typed-parameter codec, and session state machine for a
//! blocking, unframed, ordered, lossless byte transport between a host and
//! an embedded device (originally a Segger RTT channel to an nRF5 target).
//! See `SPEC_FULL.md` for the full protocol description.

pub mod buffer;
pub mod codec;
pub mod engine;
pub mod error;
pub mod transport;
pub mod types;

pub use buffer::FrameBuffer;
pub use codec::{Codec, ParamValue};
pub use engine::{ParamSlot, SessionEngine};
pub use error::{LysError, Result};
pub use transport::{LoopbackHalf, LoopbackTransport, StdIoTransport, Transport};
pub use types::{Op, State, Tag};
