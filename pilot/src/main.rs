use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use structopt::StructOpt;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

mod axis;
mod decoder;
mod input;
mod lifecycle;
mod link;
mod radio;
mod session;
mod sim;
mod symbol;

use axis::{Limits, RollReference};
use lifecycle::{LifecycleManager, SessionHandle};
use link::{LinkConfig, LinkUri};
use session::{CommandSlot, Session, SessionContext, Timing};
use symbol::Symbol;

#[derive(Debug, thiserror::Error)]
enum Error {
    #[error(transparent)]
    Input(#[from] input::Error),

    #[error(transparent)]
    Link(#[from] link::Error),

    #[error("flight session panicked: {0}")]
    Session(#[from] tokio::task::JoinError),
}

#[derive(StructOpt, Debug)]
#[structopt(name = "pilot", about = "Flies a quadcopter from gesture commands")]
struct Opts {
    /// nrf24l01 USB stick
    #[structopt(
        short = "d",
        long,
        parse(from_os_str),
        default_value = "/dev/ttyUSB_nrf24l01"
    )]
    device: PathBuf,

    /// Radio channel to probe, may be repeated
    #[structopt(short = "c", long = "channel", default_value = "50")]
    channels: Vec<u8>,

    /// Fly the simulated vehicle
    #[structopt(short = "o", long)]
    offline: bool,

    /// Connect to this vehicle instead of scanning (radio://<channel> or sim://)
    #[structopt(short = "u", long)]
    uri: Option<LinkUri>,

    /// Named pipe (or snapshot file) written by the gesture relay
    #[structopt(
        short = "i",
        long,
        parse(from_os_str),
        default_value = "/tmp/gesture.pipe"
    )]
    input: PathBuf,

    /// Milliseconds between two control steps, 0 for no delay
    #[structopt(long, default_value = "20")]
    tick_ms: u64,

    /// Milliseconds to let the last setpoint drain before closing the link
    #[structopt(long, default_value = "100")]
    grace_ms: u64,

    /// Value the roll limits are compared against (thrust|roll)
    #[structopt(long, default_value = "thrust")]
    roll_reference: RollReference,
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let opts = Opts::from_args();
    info!("Opts: {opts:?}");

    if let Err(e) = run(opts).await {
        error!("{e}");
        std::process::exit(1);
    }
}

async fn run(opts: Opts) -> Result<(), Error> {
    let config = LinkConfig {
        device: opts.device,
        channels: opts.channels,
        offline: opts.offline,
    };
    let timing = Timing {
        tick: Duration::from_millis(opts.tick_ms),
        grace: Duration::from_millis(opts.grace_ms),
    };
    let limits = Limits {
        roll_reference: opts.roll_reference,
        ..Default::default()
    };

    let available = match opts.uri {
        Some(uri) => vec![uri],
        None => {
            println!("Scanning interfaces for vehicles...");
            link::scan(&config).await
        }
    };
    println!("Vehicles found:");
    for uri in &available {
        println!("{uri}");
    }
    let Some(uri) = available.into_iter().next() else {
        println!("No vehicles found, cannot fly");
        return Ok(());
    };

    // the snapshot file is polled at the control cadence
    let poll = timing.tick.max(Duration::from_millis(1));
    let source = input::open(&opts.input, poll).await?;

    let (link, events) = link::open(&uri, &config);
    let session = Session::new(SessionContext::new(link), source, limits, timing);

    let slot = session.context().slot.clone();
    let flying = session.context().flying.clone();
    tokio::spawn(async move {
        let mut presses = 0;
        while tokio::signal::ctrl_c().await.is_ok() {
            presses += 1;
            match interrupt(&slot, &flying, presses) {
                Interrupt::Land => warn!("Interrupted, landing (Ctrl-C again to quit)"),
                Interrupt::Exit => {
                    warn!("Interrupted, exiting");
                    std::process::exit(130);
                }
            }
        }
    });

    let manager = LifecycleManager::new(uri, session);
    match manager.run(events).await {
        Some(session) => finish(session).await,
        None => Ok(()),
    }
}

async fn finish(session: SessionHandle) -> Result<(), Error> {
    session.await??;
    Ok(())
}

#[derive(Debug, PartialEq, Eq)]
enum Interrupt {
    Land,
    Exit,
}

/// Ctrl-C lands a flying vehicle. Without a flight, or on a repeated press,
/// the process exits.
fn interrupt(slot: &CommandSlot, flying: &AtomicBool, presses: usize) -> Interrupt {
    if presses > 1 || !flying.load(Ordering::SeqCst) {
        return Interrupt::Exit;
    }
    slot.publish(Symbol::Stop);
    Interrupt::Land
}
