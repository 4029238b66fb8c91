//! Device-side demo: a stand-in for the original nRF5 `main.c` LED-blink
//! application. It accepts one TCP connection standing in for the RTT
//! channel, receives two input parameters (a loop count and a delay-type
//! selector), "blinks" by logging once per loop, and reports back the
//! product of the two inputs as its single result parameter.

use std::net::{SocketAddr, TcpListener};

use clap::Parser;
use log::{info, warn};

use lys::{LysError, ParamSlot, SessionEngine, StdIoTransport};

/// Lys device-side demo application
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Enable debug logging
    #[arg(short, long)]
    debug: bool,

    /// Address to listen on for the host connection
    #[arg(short, long, default_value = "127.0.0.1:7777")]
    listen: SocketAddr,
}

fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let filter = if args.debug { "debug" } else { "info" };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(filter)).init();

    let listener = TcpListener::bind(args.listen)?;
    info!("device demo listening on {}", args.listen);

    let (stream, peer) = listener.accept()?;
    info!("host connected from {peer}");

    let transport = StdIoTransport::new(stream);
    let mut engine = SessionEngine::new(transport);

    let mut num_loops: u32 = 0;
    let mut blink_delay_type: u8 = 0;
    {
        let mut slots = [ParamSlot::U32(&mut num_loops), ParamSlot::U8(&mut blink_delay_type)];
        if let Err(err) = engine.params_receive(&mut slots) {
            warn!("failed to receive input parameters: {err}");
            return report_and_exit(engine, err);
        }
    }

    info!("received num_loops={num_loops} blink_delay_type={blink_delay_type}");
    for i in 0..num_loops {
        info!("blink {}/{num_loops} (delay type {blink_delay_type})", i + 1);
    }

    let result = num_loops.wrapping_mul(blink_delay_type as u32);
    info!("computed result={result}");

    if let Err(err) = engine.results_send(&[lys::ParamValue::U32(result)]) {
        warn!("failed to send results: {err}");
        return report_and_exit(engine, err);
    }

    info!("session finished");
    Ok(())
}

/// Mirrors the original firmware's `while (true) { lys_error_send(); }`
/// failure loop, bounded here so the demo process still exits.
fn report_and_exit<T: lys::Transport>(mut engine: SessionEngine<T>, err: LysError) -> anyhow::Result<()> {
    for attempt in 0..3 {
        match engine.error_send() {
            Ok(()) => break,
            Err(e) => warn!("error_send attempt {attempt} failed: {e}"),
        }
    }
    Err(err.into())
}
