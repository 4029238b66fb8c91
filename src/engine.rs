//! Session Engine
//!
//! Owns the state machine, the scratch buffer, and the sticky-error flag.
//! Every public operation is atomic: on entry it reads state, and on exit it
//! has either advanced state legally or set the sticky error and reverted
//! state to `Unknown`. See `SPEC_FULL.md` §4.4 and §4.4.4.

use log::{debug, error, info, warn};

use crate::buffer::FrameBuffer;
use crate::codec::{Codec, ParamValue};
use crate::error::{LysError, Result};
use crate::transport::{self, Transport};
use crate::types::{self, Op, State, Tag, MAX_ARRAY_LEN, MAX_STRING_LEN};

/// `[LEN=2, OP=ACK]`, sent from its own fixed buffer rather than the shared
/// scratch buffer: acking a received PARAM/LOG frame must not clobber the
/// decoded parameter view before the caller has read it.
const ACK_FRAME: [u8; 2] = [2, Op::Ack.as_byte()];

/// Where a received parameter's value is copied to by `params_receive`.
/// Scalars are simple out-references; strings and arrays carry both the
/// destination storage and an output length/count, since the wire value's
/// size is not known until it arrives.
pub enum ParamSlot<'a> {
    U32(&'a mut u32),
    I32(&'a mut i32),
    U8(&'a mut u8),
    I8(&'a mut i8),
    Bool(&'a mut bool),
    Str {
        storage: &'a mut [u8],
        len: &'a mut usize,
    },
    Array {
        tag: Tag,
        storage: &'a mut [u8],
        count: &'a mut usize,
    },
}

impl<'a> ParamSlot<'a> {
    fn expected_tag(&self) -> Tag {
        match self {
            ParamSlot::U32(_) => Tag::U32,
            ParamSlot::I32(_) => Tag::I32,
            ParamSlot::U8(_) => Tag::U8,
            ParamSlot::I8(_) => Tag::I8,
            ParamSlot::Bool(_) => Tag::Bool,
            ParamSlot::Str { .. } => Tag::String,
            ParamSlot::Array { .. } => Tag::Array,
        }
    }

    fn copy_from(&mut self, value: ParamValue) -> Result<()> {
        match (self, value) {
            (ParamSlot::U32(dst), ParamValue::U32(v)) => **dst = v,
            (ParamSlot::I32(dst), ParamValue::I32(v)) => **dst = v,
            (ParamSlot::U8(dst), ParamValue::U8(v)) => **dst = v,
            (ParamSlot::I8(dst), ParamValue::I8(v)) => **dst = v,
            (ParamSlot::Bool(dst), ParamValue::Bool(v)) => **dst = v,
            (ParamSlot::Str { storage, len }, ParamValue::Str(bytes)) => {
                string_copy(&mut **storage, &mut **len, bytes)?
            }
            (ParamSlot::Array { tag, storage, count }, ParamValue::Array { tag: got, bytes }) => {
                if *tag != got {
                    return Err(LysError::InvalidParam(format!(
                        "expected array of {tag:?}, got array of {got:?}"
                    )));
                }
                array_copy(*tag, &mut **storage, &mut **count, bytes)?
            }
            _ => return Err(LysError::InvalidParam("received param does not match expected type".into())),
        }
        Ok(())
    }
}

/// 1 ≤ `src.len()` ≤ MAX_STRING_LEN, per §4.4.3.
fn string_copy(dst: &mut [u8], dst_len: &mut usize, src: &[u8]) -> Result<()> {
    if src.is_empty() || src.len() > MAX_STRING_LEN {
        return Err(LysError::InvalidParam(format!(
            "string length {} out of range 1..={MAX_STRING_LEN}",
            src.len()
        )));
    }
    if src.len() > dst.len() {
        return Err(LysError::InvalidParam("destination storage too small for string".into()));
    }
    dst[..src.len()].copy_from_slice(src);
    *dst_len = src.len();
    Ok(())
}

/// Inner tag must be a scalar with a fixed nonzero size; `N * size` ≤
/// MAX_ARRAY_LEN, per §4.4.3.
fn array_copy(tag: Tag, dst: &mut [u8], dst_count: &mut usize, src: &[u8]) -> Result<()> {
    let item_size = types::size_of(tag)
        .ok_or_else(|| LysError::InvalidParam("array item tag must have a fixed size".into()))?;
    if src.is_empty() || src.len() % item_size != 0 {
        return Err(LysError::InvalidParam("array payload is not a whole number of items".into()));
    }
    if src.len() > MAX_ARRAY_LEN {
        return Err(LysError::InvalidParam("array payload exceeds MAX_ARRAY_LEN".into()));
    }
    if src.len() > dst.len() {
        return Err(LysError::InvalidParam("destination storage too small for array".into()));
    }
    dst[..src.len()].copy_from_slice(src);
    *dst_count = src.len() / item_size;
    Ok(())
}

/// The device-side protocol engine: one owned value combining the scratch
/// buffer, session state, sticky-error flag, and the transport it drives.
/// See the "process-wide mutable state" design note in `SPEC_FULL.md` §9.
pub struct SessionEngine<T: Transport> {
    transport: T,
    buf: FrameBuffer,
    codec: Codec,
    state: State,
    error: bool,
}

impl<T: Transport> SessionEngine<T> {
    pub fn new(transport: T) -> Self {
        let mut engine = Self {
            transport,
            buf: FrameBuffer::new(),
            codec: Codec::new(),
            state: State::Unknown,
            error: false,
        };
        engine.initialize();
        engine
    }

    /// Reset the scratch buffer, state, and sticky error. May be called at
    /// any time, including repeatedly.
    pub fn initialize(&mut self) {
        self.buf.clear();
        self.state = State::Unknown;
        self.error = false;
        debug!("engine initialized");
    }

    pub fn state(&self) -> State {
        self.state
    }

    pub fn has_error(&self) -> bool {
        self.error
    }

    fn fail(state: &mut State, error: &mut bool, err: LysError) -> LysError {
        *error = true;
        *state = State::Unknown;
        error!("fatal protocol error: {err}");
        err
    }

    /// Encode `op`/`param`, send it, and block until the peer's ACK arrives.
    /// Encoding failures are pure argument validation and are returned
    /// as-is, without touching state or the sticky error (§7). Once bytes
    /// have gone out on the wire, any further failure is fatal.
    fn send_and_await_ack(&mut self, op: Op, param: Option<ParamValue>) -> Result<()> {
        self.codec.encode(&mut self.buf, op, param)?;
        transport::send_all(&mut self.transport, self.buf.as_slice())
            .map_err(|e| Self::fail(&mut self.state, &mut self.error, e))?;
        self.await_ack()
    }

    fn await_ack(&mut self) -> Result<()> {
        // Safe to clear: receive_frame never reads past the frame it is
        // asked to complete, so the buffer never holds leftover bytes from
        // a following frame.
        self.buf.clear();
        transport::receive_frame(&mut self.transport, &mut self.buf)
            .map_err(|e| Self::fail(&mut self.state, &mut self.error, e))?;
        let (op, _) = self
            .codec
            .decode(&self.buf)
            .map_err(|e| Self::fail(&mut self.state, &mut self.error, e))?;
        if op != Op::Ack {
            return Err(Self::fail(
                &mut self.state,
                &mut self.error,
                LysError::InvalidState(format!("expected ACK, got {op:?}")),
            ));
        }
        Ok(())
    }

    /// Block until the next PARAM or START frame arrives, ACKing it on
    /// receipt. Implicitly sends INIT/awaits its ACK first if the engine is
    /// freshly initialized. See §4.4.1.
    pub fn param_wait(&mut self) -> Result<(Option<ParamValue<'_>>, bool)> {
        if self.state == State::Unknown && !self.error {
            self.send_and_await_ack(Op::Init, None)?;
            self.state = State::WaitForStart;
            info!("state -> WaitForStart (INIT acked)");
        }

        if self.state != State::WaitForStart {
            return Err(LysError::InvalidState(format!(
                "param_wait requires WaitForStart, engine is in {:?}",
                self.state
            )));
        }

        // Safe to clear: receive_frame never reads past the frame it is
        // asked to complete, so the buffer never holds leftover bytes from
        // a following frame.
        self.buf.clear();
        transport::receive_frame(&mut self.transport, &mut self.buf)
            .map_err(|e| Self::fail(&mut self.state, &mut self.error, e))?;
        let (op, param) = self
            .codec
            .decode(&self.buf)
            .map_err(|e| Self::fail(&mut self.state, &mut self.error, e))?;

        transport::send_all(&mut self.transport, &ACK_FRAME)
            .map_err(|e| Self::fail(&mut self.state, &mut self.error, e))?;

        match op {
            Op::Param => Ok((param, true)),
            Op::Start => {
                self.state = State::Running;
                info!("state -> Running (START received)");
                Ok((None, false))
            }
            other => Err(Self::fail(
                &mut self.state,
                &mut self.error,
                LysError::InvalidState(format!("unexpected op {other:?} while waiting for PARAM/START")),
            )),
        }
    }

    /// Receive exactly `slots.len()` parameters in order, then require the
    /// host to send START. A tag mismatch or premature START is a local
    /// InvalidParam (non-fatal); an extra PARAM after the list is exhausted
    /// is fatal InvalidState. See §4.4.1 and boundary scenarios 3-4 in §8.
    pub fn params_receive(&mut self, slots: &mut [ParamSlot]) -> Result<()> {
        for slot in slots.iter_mut() {
            let expected = slot.expected_tag();
            let (param, more) = self.param_wait()?;
            if !more {
                return Err(LysError::InvalidParam(
                    "fewer parameters received than expected before START".into(),
                ));
            }
            let param = param.expect("more_params_flag true implies a decoded param view");
            if param.tag() != expected {
                return Err(LysError::InvalidParam(format!(
                    "expected {expected:?}, got {:?}",
                    param.tag()
                )));
            }
            slot.copy_from(param)?;
        }

        let (_, more) = self.param_wait()?;
        if more {
            return Err(Self::fail(
                &mut self.state,
                &mut self.error,
                LysError::InvalidState("extra parameter received after the expected list".into()),
            ));
        }
        Ok(())
    }

    /// Send one result parameter. Transitions RUNNING -> RESULT on first
    /// call. Requires RESULT state.
    pub fn param_send(&mut self, param: ParamValue) -> Result<()> {
        if self.state == State::Running {
            self.send_and_await_ack(Op::Result, None)?;
            self.state = State::Result;
            info!("state -> Result (RESULT acked)");
        }

        if self.state != State::Result {
            return Err(LysError::InvalidState(format!(
                "param_send requires Running or Result, engine is in {:?}",
                self.state
            )));
        }

        self.send_and_await_ack(Op::Param, Some(param))
    }

    /// Send each result parameter in order, then finish the session.
    pub fn results_send(&mut self, params: &[ParamValue]) -> Result<()> {
        for param in params {
            self.param_send(*param)?;
        }
        self.finish()
    }

    /// Notify the host there are no more result parameters. Transitions
    /// RUNNING -> RESULT (like `param_send`) if called directly from
    /// RUNNING. State remains RESULT afterward; see the FINISHED design
    /// note in §9.
    pub fn finish(&mut self) -> Result<()> {
        if self.state == State::Running {
            self.send_and_await_ack(Op::Result, None)?;
            self.state = State::Result;
            info!("state -> Result (RESULT acked)");
        }

        if self.state != State::Result {
            return Err(LysError::InvalidState(format!(
                "finish requires Running or Result, engine is in {:?}",
                self.state
            )));
        }

        self.send_and_await_ack(Op::Finished, None)
    }

    /// Unconditionally mark the session failed and tell the host via an
    /// UNKNOWN frame. Intended to be callable repeatedly from a post-failure
    /// loop; blocking on its ACK is acceptable even against a stuck host.
    pub fn error_send(&mut self) -> Result<()> {
        self.error = true;
        self.state = State::Unknown;
        warn!("error_send: notifying host of a fatal local error");
        self.send_and_await_ack(Op::Unknown, None)
    }

    /// Send a log string. Forbidden (InvalidState) during WaitForStart and
    /// Result. NOTE: as in the original device firmware, this blocks
    /// indefinitely if the host has closed its side of the transport — see
    /// the "Blocking log_send" design note in §9.
    pub fn log_send(&mut self, text: &[u8]) -> Result<()> {
        if matches!(self.state, State::WaitForStart | State::Result) {
            return Err(LysError::InvalidState(format!(
                "log_send is not allowed during {:?}",
                self.state
            )));
        }
        self.send_and_await_ack(Op::Log, Some(ParamValue::Str(text)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::LoopbackTransport;

    fn encode(op: Op, param: Option<ParamValue>) -> Vec<u8> {
        let codec = Codec::new();
        let mut buf = FrameBuffer::new();
        codec.encode(&mut buf, op, param).unwrap();
        buf.as_slice().to_vec()
    }

    #[test]
    fn init_handshake_emits_two_byte_frame() {
        let (mut host, device) = LoopbackTransport::pair();
        host.write(&encode(Op::Ack, None)).unwrap();
        host.write(&encode(Op::Start, None)).unwrap();

        let mut engine = SessionEngine::new(device);
        let (param, more) = engine.param_wait().unwrap();
        assert!(param.is_none());
        assert!(!more);
        assert_eq!(engine.state(), State::Running);

        let mut sent = [0u8; 64];
        let n = host.read(&mut sent).unwrap();
        assert_eq!(&sent[..n], &[2, Op::Init.as_byte(), 2, Op::Ack.as_byte()]);
    }

    #[test]
    fn params_receive_two_scalars_then_start() {
        let (mut host, device) = LoopbackTransport::pair();
        host.write(&encode(Op::Ack, None)).unwrap(); // INIT ack
        host.write(&encode(Op::Param, Some(ParamValue::U32(42)))).unwrap();
        host.write(&encode(Op::Param, Some(ParamValue::U8(7)))).unwrap();
        host.write(&encode(Op::Start, None)).unwrap();

        let mut engine = SessionEngine::new(device);
        let mut num_loops = 0u32;
        let mut delay_type = 0u8;
        {
            let mut slots = [ParamSlot::U32(&mut num_loops), ParamSlot::U8(&mut delay_type)];
            engine.params_receive(&mut slots).unwrap();
        }

        assert_eq!(num_loops, 42);
        assert_eq!(delay_type, 7);
        assert_eq!(engine.state(), State::Running);
        assert!(!engine.has_error());
    }

    #[test]
    fn type_mismatch_is_local_invalid_param() {
        let (mut host, device) = LoopbackTransport::pair();
        host.write(&encode(Op::Ack, None)).unwrap();
        host.write(&encode(Op::Param, Some(ParamValue::I32(-1)))).unwrap();

        let mut engine = SessionEngine::new(device);
        let mut a = 0u32;
        let mut b = 0u8;
        let mut slots = [ParamSlot::U32(&mut a), ParamSlot::U8(&mut b)];
        let err = engine.params_receive(&mut slots).unwrap_err();
        assert!(matches!(err, LysError::InvalidParam(_)));
        assert_eq!(engine.state(), State::WaitForStart);
        assert!(!engine.has_error());
    }

    #[test]
    fn extra_param_after_list_is_fatal_invalid_state() {
        let (mut host, device) = LoopbackTransport::pair();
        host.write(&encode(Op::Ack, None)).unwrap();
        host.write(&encode(Op::Param, Some(ParamValue::U32(1)))).unwrap();
        host.write(&encode(Op::Param, Some(ParamValue::U32(2)))).unwrap();

        let mut engine = SessionEngine::new(device);
        let mut a = 0u32;
        let mut slots = [ParamSlot::U32(&mut a)];
        let err = engine.params_receive(&mut slots).unwrap_err();
        assert!(matches!(err, LysError::InvalidState(_)));
        assert_eq!(engine.state(), State::Unknown);
        assert!(engine.has_error());
    }

    #[test]
    fn result_round_trip_emits_result_param_finished() {
        let (mut host, device) = LoopbackTransport::pair();
        host.write(&encode(Op::Ack, None)).unwrap(); // INIT ack
        host.write(&encode(Op::Start, None)).unwrap(); // go straight to RUNNING
        host.write(&encode(Op::Ack, None)).unwrap(); // RESULT ack
        host.write(&encode(Op::Ack, None)).unwrap(); // PARAM ack
        host.write(&encode(Op::Ack, None)).unwrap(); // FINISHED ack

        let mut engine = SessionEngine::new(device);
        engine.params_receive(&mut []).unwrap();
        assert_eq!(engine.state(), State::Running);

        engine.param_send(ParamValue::U32(99)).unwrap();
        assert_eq!(engine.state(), State::Result);
        engine.finish().unwrap();

        let mut sent = [0u8; 64];
        let mut all = Vec::new();
        loop {
            let n = host.read(&mut sent).unwrap();
            if n == 0 {
                break;
            }
            all.extend_from_slice(&sent[..n]);
        }
        let expected = [
            encode(Op::Init, None),
            encode(Op::Result, None),
            encode(Op::Param, Some(ParamValue::U32(99))),
            encode(Op::Finished, None),
        ]
        .concat();
        assert_eq!(all, expected);
    }

    #[test]
    fn log_send_forbidden_during_wait_for_start_and_result() {
        let (mut host, device) = LoopbackTransport::pair();
        host.write(&encode(Op::Ack, None)).unwrap(); // INIT ack
        host.write(&encode(Op::Param, Some(ParamValue::U32(5)))).unwrap();
        host.write(&encode(Op::Ack, None)).unwrap(); // RESULT ack
        host.write(&encode(Op::Ack, None)).unwrap(); // PARAM ack

        let mut engine = SessionEngine::new(device);
        let (_param, more) = engine.param_wait().unwrap();
        assert!(more);
        assert_eq!(engine.state(), State::WaitForStart);
        assert!(matches!(engine.log_send(b"hi"), Err(LysError::InvalidState(_))));

        // Force into RESULT without going through params_receive/START by
        // driving state via a fresh engine instead: reuse this one isn't
        // possible since it's mid WAIT_FOR_START. Build a second engine.
        let (mut host2, device2) = LoopbackTransport::pair();
        host2.write(&encode(Op::Ack, None)).unwrap();
        host2.write(&encode(Op::Start, None)).unwrap();
        host2.write(&encode(Op::Ack, None)).unwrap();
        let mut engine2 = SessionEngine::new(device2);
        engine2.params_receive(&mut []).unwrap();
        engine2.param_send(ParamValue::U32(1)).unwrap();
        assert_eq!(engine2.state(), State::Result);
        assert!(matches!(engine2.log_send(b"hi"), Err(LysError::InvalidState(_))));
    }

    #[test]
    fn string_copy_rejects_empty_and_oversized() {
        let mut dst = [0u8; MAX_STRING_LEN];
        let mut len = 0usize;
        assert!(string_copy(&mut dst, &mut len, b"").is_err());
        let too_long = vec![b'a'; MAX_STRING_LEN + 1];
        assert!(string_copy(&mut dst, &mut len, &too_long).is_err());
        assert!(string_copy(&mut dst, &mut len, b"ok").is_ok());
        assert_eq!(len, 2);
        assert_eq!(&dst[..2], b"ok");
    }

    #[test]
    fn array_copy_rejects_partial_items_and_overflow() {
        let mut dst = [0u8; MAX_ARRAY_LEN];
        let mut count = 0usize;
        assert!(array_copy(Tag::U32, &mut dst, &mut count, &[1, 2, 3]).is_err());
        assert!(array_copy(Tag::U32, &mut dst, &mut count, &[0u8; MAX_ARRAY_LEN + 4]).is_err());
        assert!(array_copy(Tag::U8, &mut dst, &mut count, &[1, 2, 3, 4]).is_ok());
        assert_eq!(count, 4);
    }
}
