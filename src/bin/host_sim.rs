//! Host-side simulator: a stand-in for the real host-side Lys client. It
//! connects to a running `lys-device-demo`, drives the input side of the
//! handshake (INIT, the demo's two input parameters, START), then prints
//! every LOG and result PARAM frame the device emits until FINISHED. Mirrors
//! the teacher's habit of shipping a small hand-driven wire exerciser
//! alongside the library (`src/bin/test_frame.rs`), generalized here to play
//! the opposite side of a real handshake rather than firing one frame.

use std::net::TcpStream;

use clap::Parser;
use log::{info, warn};

use lys::codec::{Codec, ParamValue};
use lys::transport::{self, StdIoTransport};
use lys::types::Op;
use lys::{FrameBuffer, LysError, Result};

/// Lys host-side simulator
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Enable debug logging
    #[arg(short, long)]
    debug: bool,

    /// Device address to connect to
    #[arg(short, long, default_value = "127.0.0.1:7777")]
    connect: String,

    /// Value for the demo's num_loops input parameter
    #[arg(long, default_value_t = 5)]
    num_loops: u32,

    /// Value for the demo's blink_delay_type input parameter
    #[arg(long, default_value_t = 2)]
    blink_delay_type: u8,
}

fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let filter = if args.debug { "debug" } else { "info" };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(filter)).init();

    let stream = TcpStream::connect(&args.connect)?;
    info!("connected to device at {}", args.connect);
    let mut transport = StdIoTransport::new(stream);
    let codec = Codec::new();
    let mut buf = FrameBuffer::new();

    recv_expect(&codec, &mut transport, &mut buf, Op::Init)?;
    ack(&mut transport)?;
    info!("received INIT, acked");

    send_and_await_ack(
        &codec,
        &mut transport,
        &mut buf,
        Op::Param,
        Some(ParamValue::U32(args.num_loops)),
    )?;
    info!("sent num_loops={}", args.num_loops);

    send_and_await_ack(
        &codec,
        &mut transport,
        &mut buf,
        Op::Param,
        Some(ParamValue::U8(args.blink_delay_type)),
    )?;
    info!("sent blink_delay_type={}", args.blink_delay_type);

    send_and_await_ack(&codec, &mut transport, &mut buf, Op::Start, None)?;
    info!("sent START, device is now running");

    loop {
        buf.clear();
        transport::receive_frame(&mut transport, &mut buf)?;
        let (op, param) = codec.decode(&buf)?;
        ack(&mut transport)?;

        match op {
            Op::Log => {
                if let Some(ParamValue::Str(text)) = param {
                    info!("device log: {}", String::from_utf8_lossy(text));
                } else {
                    warn!("LOG frame without a string payload");
                }
            }
            Op::Result => {
                info!("device is now emitting results");
            }
            Op::Param => {
                info!("result param: {param:?}");
            }
            Op::Finished => {
                info!("device finished");
                break;
            }
            Op::Unknown => {
                warn!("device reported a fatal local error via UNKNOWN");
                break;
            }
            other => {
                warn!("unexpected op {other:?} from device");
                break;
            }
        }
    }

    Ok(())
}

fn recv_expect(
    codec: &Codec,
    transport: &mut StdIoTransport<TcpStream>,
    buf: &mut FrameBuffer,
    expected: Op,
) -> Result<()> {
    buf.clear();
    transport::receive_frame(transport, buf)?;
    let (op, _) = codec.decode(buf)?;
    if op != expected {
        return Err(LysError::InvalidState(format!(
            "expected {expected:?}, got {op:?}"
        )));
    }
    Ok(())
}

fn ack(transport: &mut StdIoTransport<TcpStream>) -> Result<()> {
    transport::send_all(transport, &[2, Op::Ack.as_byte()])
}

fn send_and_await_ack(
    codec: &Codec,
    transport: &mut StdIoTransport<TcpStream>,
    buf: &mut FrameBuffer,
    op: Op,
    param: Option<ParamValue>,
) -> Result<()> {
    codec.encode(buf, op, param)?;
    transport::send_all(transport, buf.as_slice())?;
    buf.clear();
    transport::receive_frame(transport, buf)?;
    let (reply_op, _) = codec.decode(buf)?;
    if reply_op != Op::Ack {
        return Err(LysError::InvalidState(format!(
            "expected ACK after {op:?}, got {reply_op:?}"
        )));
    }
    Ok(())
}
