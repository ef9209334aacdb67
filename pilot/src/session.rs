use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use protocol::Setpoint;
use tokio::time::{interval, sleep, Interval, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::axis::{AxisState, Limits};
use crate::input::{self, SymbolStream};
use crate::link::{self, LinkHandle};
use crate::symbol::Symbol;

/// Latest command published by the input pump.
///
/// Holds a single symbol, never a queue: a newer publish overwrites one the
/// control loop has not seen yet.
#[derive(Debug, Clone)]
pub struct CommandSlot(Arc<Mutex<Symbol>>);

impl CommandSlot {
    pub fn new() -> Self {
        CommandSlot(Arc::new(Mutex::new(Symbol::Idle)))
    }

    pub fn publish(&self, symbol: Symbol) {
        *self.0.lock().unwrap_or_else(PoisonError::into_inner) = symbol;
    }

    pub fn latest(&self) -> Symbol {
        *self.0.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Default for CommandSlot {
    fn default() -> Self {
        Self::new()
    }
}

/// State shared by the control loop and the input pump of one flight.
#[derive(Debug, Clone)]
pub struct SessionContext {
    pub slot: CommandSlot,
    pub link: LinkHandle,
    pub shutdown: CancellationToken,
    /// Set while the control loop runs.
    pub flying: Arc<AtomicBool>,
}

impl SessionContext {
    pub fn new(link: LinkHandle) -> Self {
        SessionContext {
            slot: CommandSlot::new(),
            link,
            shutdown: CancellationToken::new(),
            flying: Arc::new(AtomicBool::new(false)),
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct Timing {
    /// Delay between two control steps. Zero runs the loop as fast as the
    /// link accepts setpoints.
    pub tick: Duration,
    /// Time given to the link to flush the neutral setpoint before closing.
    pub grace: Duration,
}

impl Default for Timing {
    fn default() -> Self {
        Timing {
            tick: Duration::from_millis(20),
            grace: Duration::from_millis(100),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    Running,
    Stopping,
    Stopped,
}

/// One flight: the control loop plus the input pump it spawns.
pub struct Session {
    ctx: SessionContext,
    source: SymbolStream,
    limits: Limits,
    timing: Timing,
}

impl Session {
    pub fn new(ctx: SessionContext, source: SymbolStream, limits: Limits, timing: Timing) -> Self {
        Session {
            ctx,
            source,
            limits,
            timing,
        }
    }

    pub fn context(&self) -> &SessionContext {
        &self.ctx
    }

    /// Control loop.
    ///
    /// Streams setpoints derived from the latest command until the stop
    /// symbol is seen, then lands the vehicle and closes the link. A failed
    /// transmission ends the session with an error.
    pub async fn run(self) -> Result<(), link::Error> {
        let Session {
            ctx,
            source,
            limits,
            timing,
        } = self;

        let pump = tokio::spawn({
            let slot = ctx.slot.clone();
            let shutdown = ctx.shutdown.clone();
            async move {
                match input::pump(source, slot, shutdown).await {
                    Ok(stats) => debug!(
                        "Input pump finished after {} reads, {} published",
                        stats.reads, stats.published
                    ),
                    // the control loop keeps going; stop must come from elsewhere
                    Err(e) => error!("Input pump failed: {e}"),
                }
            }
        });

        ctx.flying.store(true, Ordering::SeqCst);
        let mut ticker = ticker(timing.tick);
        let mut state = AxisState::default();
        let mut phase = Phase::Running;
        let mut result = Ok(());

        while phase != Phase::Stopped {
            phase = match phase {
                Phase::Running => {
                    let symbol = ctx.slot.latest();
                    if symbol == Symbol::Stop {
                        info!("Stop requested, landing");
                        Phase::Stopping
                    } else if let Err(e) = step(&ctx.link, &mut state, symbol, &limits).await {
                        error!("Transmission failed: {e}");
                        result = Err(e);
                        Phase::Stopped
                    } else {
                        match ticker.as_mut() {
                            Some(ticker) => {
                                ticker.tick().await;
                            }
                            None => tokio::task::yield_now().await,
                        }
                        Phase::Running
                    }
                }
                Phase::Stopping => {
                    state = AxisState::default();
                    result = land(&ctx.link, &state, timing.grace).await;
                    Phase::Stopped
                }
                Phase::Stopped => Phase::Stopped,
            };
        }

        ctx.flying.store(false, Ordering::SeqCst);
        ctx.shutdown.cancel();
        if let Err(e) = pump.await {
            warn!("Input pump task did not finish cleanly: {e}");
        }
        result
    }
}

fn ticker(tick: Duration) -> Option<Interval> {
    if tick.is_zero() {
        return None;
    }
    let mut ticker = interval(tick);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    Some(ticker)
}

/// One control step: report the current state, apply the command, report
/// the result.
async fn step(
    link: &LinkHandle,
    state: &mut AxisState,
    symbol: Symbol,
    limits: &Limits,
) -> Result<(), link::Error> {
    link.send_setpoint(Setpoint::from(&*state)).await?;
    *state = state.apply(symbol, limits);
    link.send_setpoint(Setpoint::from(&*state)).await
}

/// Sends the neutral setpoint, lets it drain from the link queue, then
/// closes the link.
async fn land(link: &LinkHandle, neutral: &AxisState, grace: Duration) -> Result<(), link::Error> {
    link.send_setpoint(Setpoint::from(neutral)).await?;
    sleep(grace).await;
    link.close().await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::link::LinkEvent;
    use crate::sim::{Recorder, SimVehicle, Transmission};
    use futures::stream::{self, StreamExt};
    use tokio::sync::mpsc;
    use tokio::time::Instant;

    fn session_with(
        vehicle: SimVehicle,
        source: SymbolStream,
    ) -> (Session, Recorder, mpsc::Receiver<LinkEvent>) {
        let recorder = Recorder::default();
        let (link, events) = vehicle.with_recorder(recorder.clone()).spawn();
        let session = Session::new(
            SessionContext::new(link),
            source,
            Limits::default(),
            Timing::default(),
        );
        (session, recorder, events)
    }

    /// Waits until the simulated vehicle has processed everything.
    async fn finished(mut events: mpsc::Receiver<LinkEvent>) {
        while events.recv().await.is_some() {}
    }

    fn symbols(text: &str) -> SymbolStream {
        let items: Vec<_> = text.chars().map(|c| Ok(Symbol::from(c))).collect();
        stream::iter(items).chain(stream::pending()).boxed()
    }

    #[test]
    fn slot_holds_only_the_latest_symbol() {
        let slot = CommandSlot::new();
        assert_eq!(slot.latest(), Symbol::Idle);
        slot.publish(Symbol::Hover);
        slot.publish(Symbol::Up);
        assert_eq!(slot.latest(), Symbol::Up);
    }

    #[test]
    fn slot_reads_are_never_torn() {
        let slot = CommandSlot::new();
        let alphabet = [Symbol::Hover, Symbol::RollLeft, Symbol::Unknown('z')];
        let writer = {
            let slot = slot.clone();
            std::thread::spawn(move || {
                for i in 0..10_000 {
                    slot.publish(alphabet[i % alphabet.len()]);
                }
            })
        };
        for _ in 0..10_000 {
            let seen = slot.latest();
            assert!(seen == Symbol::Idle || alphabet.contains(&seen));
        }
        writer.join().unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn stop_first_only_sends_neutral_then_closes() {
        let (session, recorder, events) = session_with(SimVehicle::new(), symbols("s"));

        session.run().await.unwrap();
        finished(events).await;

        let transmissions = recorder.transmissions();
        assert_eq!(transmissions.last(), Some(&Transmission::Close));
        assert!(recorder.setpoints().iter().all(Setpoint::is_neutral));
        assert!(matches!(
            transmissions[transmissions.len() - 2],
            Transmission::Setpoint(setpoint) if setpoint.is_neutral()
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn stop_lands_after_flying() {
        let (session, recorder, events) = session_with(SimVehicle::new(), symbols(""));
        let slot = session.context().slot.clone();
        let handle = tokio::spawn(session.run());

        slot.publish(Symbol::Hover);
        sleep(Duration::from_millis(200)).await;
        slot.publish(Symbol::Stop);
        handle.await.unwrap().unwrap();
        finished(events).await;

        let setpoints = recorder.setpoints();
        assert!(setpoints.iter().any(|s| s.thrust > 0));
        assert!(setpoints.last().unwrap().is_neutral());
        assert_eq!(recorder.transmissions().last(), Some(&Transmission::Close));
    }

    #[tokio::test]
    async fn each_step_sends_state_before_and_after() {
        let recorder = Recorder::default();
        let (link, _events) = SimVehicle::new().with_recorder(recorder.clone()).spawn();
        let limits = Limits::default();
        let mut state = AxisState {
            thrust: 500,
            ..Default::default()
        };

        step(&link, &mut state, Symbol::Unknown('z'), &limits).await.unwrap();
        step(&link, &mut state, Symbol::Hover, &limits).await.unwrap();
        link.close().await.unwrap();
        while recorder.transmissions().last() != Some(&Transmission::Close) {
            tokio::task::yield_now().await;
        }

        let thrust: Vec<u16> = recorder.setpoints().iter().map(|s| s.thrust).collect();
        assert_eq!(thrust, vec![500, 500, 500, 600]);
        assert_eq!(state.thrust, 600);
    }

    #[tokio::test(start_paused = true)]
    async fn stop_terminates_within_tick_and_grace() {
        let (session, recorder, events) = session_with(SimVehicle::new(), symbols(""));
        let flying = session.context().flying.clone();
        let slot = session.context().slot.clone();
        assert!(!flying.load(Ordering::SeqCst));
        let handle = tokio::spawn(session.run());

        slot.publish(Symbol::YawLeft);
        sleep(Duration::from_millis(55)).await;

        assert!(flying.load(Ordering::SeqCst));
        let published = Instant::now();
        slot.publish(Symbol::Stop);
        handle.await.unwrap().unwrap();

        let timing = Timing::default();
        assert!(published.elapsed() <= timing.tick + timing.grace);
        assert!(!flying.load(Ordering::SeqCst));
        finished(events).await;
        assert_eq!(recorder.transmissions().last(), Some(&Transmission::Close));
    }

    #[tokio::test(start_paused = true)]
    async fn transmission_failure_ends_the_session() {
        let (session, _recorder, _events) =
            session_with(SimVehicle::new().lose_after(3), symbols("h"));

        let result = session.run().await;

        assert!(matches!(result, Err(link::Error::Disconnected)));
    }

    #[tokio::test(start_paused = true)]
    async fn pump_failure_leaves_the_loop_running_until_stop() {
        let bad = std::str::from_utf8(&[0xff]).unwrap_err();
        let source = stream::iter(vec![Ok(Symbol::Up), Err(input::Error::Decode(bad))]).boxed();
        let (session, recorder, events) = session_with(SimVehicle::new(), source);
        let slot = session.context().slot.clone();
        let handle = tokio::spawn(session.run());

        sleep(Duration::from_millis(100)).await;
        assert!(!handle.is_finished());

        slot.publish(Symbol::Stop);
        handle.await.unwrap().unwrap();
        finished(events).await;
        assert!(recorder.setpoints().last().unwrap().is_neutral());
    }

    #[tokio::test(start_paused = true)]
    async fn zero_tick_still_stops() {
        let recorder = Recorder::default();
        let (link, events) = SimVehicle::new().with_recorder(recorder.clone()).spawn();
        let timing = Timing {
            tick: Duration::ZERO,
            ..Default::default()
        };
        let session = Session::new(SessionContext::new(link), symbols("hs"), Limits::default(), timing);

        session.run().await.unwrap();
        finished(events).await;

        assert_eq!(recorder.transmissions().last(), Some(&Transmission::Close));
    }
}
