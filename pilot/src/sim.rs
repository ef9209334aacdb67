//! Simulated vehicle.
//!
//! Accepts every setpoint without a radio attached. Used by `--offline`
//! and as the vehicle in tests, where it can record what it received,
//! refuse the connection, or drop the link mid-flight.

use std::sync::{Arc, Mutex, PoisonError};

use protocol::Setpoint;
use tokio::sync::mpsc;
use tracing::{info, trace, warn};

use crate::link::{self, LinkEvent, LinkHandle, LinkRequest};

/// What the simulated vehicle received, in order.
#[derive(Debug, Clone, PartialEq)]
pub enum Transmission {
    Setpoint(Setpoint),
    Close,
}

#[derive(Debug, Clone, Default)]
pub struct Recorder(Arc<Mutex<Vec<Transmission>>>);

impl Recorder {
    fn push(&self, transmission: Transmission) {
        self.0
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(transmission);
    }
}

#[cfg(test)]
impl Recorder {
    pub fn transmissions(&self) -> Vec<Transmission> {
        self.0
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn setpoints(&self) -> Vec<Setpoint> {
        self.transmissions()
            .into_iter()
            .filter_map(|t| match t {
                Transmission::Setpoint(setpoint) => Some(setpoint),
                Transmission::Close => None,
            })
            .collect()
    }
}

#[derive(Debug, Default)]
pub struct SimVehicle {
    recorder: Option<Recorder>,
    refuse: Option<String>,
    lose_after: Option<usize>,
}

impl SimVehicle {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn spawn(self) -> (LinkHandle, mpsc::Receiver<LinkEvent>) {
        let (handle, requests, events_tx, events) = link::channel();
        tokio::spawn(self.run(requests, events_tx));
        (handle, events)
    }

    async fn run(self, mut requests: mpsc::Receiver<LinkRequest>, events: mpsc::Sender<LinkEvent>) {
        if let Some(reason) = self.refuse {
            drop(requests);
            _ = events.send(LinkEvent::ConnectionFailed(reason)).await;
            _ = events.send(LinkEvent::Disconnected).await;
            return;
        }
        _ = events.send(LinkEvent::Connected).await;

        let mut received = 0;
        while let Some(request) = requests.recv().await {
            match request {
                LinkRequest::Setpoint(setpoint) => {
                    trace!("Simulated vehicle got {setpoint:?}");
                    if let Some(recorder) = &self.recorder {
                        recorder.push(Transmission::Setpoint(setpoint));
                    }
                    received += 1;
                    if self.lose_after == Some(received) {
                        warn!("Simulated vehicle out of range");
                        _ = events
                            .send(LinkEvent::ConnectionLost("out of range".to_owned()))
                            .await;
                        break;
                    }
                }
                LinkRequest::Close => {
                    info!("Closing simulated link");
                    if let Some(recorder) = &self.recorder {
                        recorder.push(Transmission::Close);
                    }
                    break;
                }
            }
        }

        drop(requests);
        _ = events.send(LinkEvent::Disconnected).await;
    }
}

#[cfg(test)]
impl SimVehicle {
    pub fn with_recorder(mut self, recorder: Recorder) -> Self {
        self.recorder = Some(recorder);
        self
    }

    /// Fail the connection attempt with `reason`.
    pub fn refuse(mut self, reason: &str) -> Self {
        self.refuse = Some(reason.to_owned());
        self
    }

    /// Drop the link after `count` setpoints.
    pub fn lose_after(mut self, count: usize) -> Self {
        self.lose_after = Some(count);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn drain(mut events: mpsc::Receiver<LinkEvent>) -> Vec<LinkEvent> {
        let mut seen = Vec::new();
        while let Some(event) = events.recv().await {
            seen.push(event);
        }
        seen
    }

    #[tokio::test]
    async fn records_setpoints_until_closed() {
        let recorder = Recorder::default();
        let (link, events) = SimVehicle::new().with_recorder(recorder.clone()).spawn();

        let setpoint = Setpoint {
            thrust: 100,
            ..Setpoint::NEUTRAL
        };
        link.send_setpoint(setpoint).await.unwrap();
        link.close().await.unwrap();

        assert_eq!(
            drain(events).await,
            vec![LinkEvent::Connected, LinkEvent::Disconnected]
        );
        assert_eq!(
            recorder.transmissions(),
            vec![Transmission::Setpoint(setpoint), Transmission::Close]
        );
    }

    #[tokio::test]
    async fn refused_connection() {
        let (link, events) = SimVehicle::new().refuse("no ack").spawn();
        assert_eq!(
            drain(events).await,
            vec![
                LinkEvent::ConnectionFailed("no ack".to_owned()),
                LinkEvent::Disconnected
            ]
        );
        assert!(link.send_setpoint(Setpoint::NEUTRAL).await.is_err());
    }

    #[tokio::test]
    async fn lost_connection() {
        let (link, events) = SimVehicle::new().lose_after(2).spawn();
        link.send_setpoint(Setpoint::NEUTRAL).await.unwrap();
        link.send_setpoint(Setpoint::NEUTRAL).await.unwrap();
        assert_eq!(
            drain(events).await,
            vec![
                LinkEvent::Connected,
                LinkEvent::ConnectionLost("out of range".to_owned()),
                LinkEvent::Disconnected
            ]
        );
        assert!(link.send_setpoint(Setpoint::NEUTRAL).await.is_err());
    }
}
