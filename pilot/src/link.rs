use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

use protocol::Setpoint;
use tokio::sync::mpsc;
use tracing::{debug, info};

use crate::{radio, sim};

const QUEUE_LEN: usize = 32;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("vehicle link is closed")]
    Disconnected,

    #[error("invalid link uri `{0}` (expected radio://<channel> or sim://)")]
    InvalidUri(String),
}

/// Address of a vehicle as returned by [`scan`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LinkUri {
    Radio { channel: u8 },
    Sim,
}

impl fmt::Display for LinkUri {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LinkUri::Radio { channel } => write!(f, "radio://{channel}"),
            LinkUri::Sim => f.write_str("sim://"),
        }
    }
}

impl FromStr for LinkUri {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || Error::InvalidUri(s.to_owned());
        match s.split_once("://") {
            Some(("sim", "")) => Ok(LinkUri::Sim),
            Some(("radio", channel)) => channel
                .parse()
                .map(|channel| LinkUri::Radio { channel })
                .map_err(|_| invalid()),
            _ => Err(invalid()),
        }
    }
}

#[derive(Debug, Clone)]
pub struct LinkConfig {
    /// nrf24l01 USB stick.
    pub device: PathBuf,
    /// Radio channels probed by [`scan`].
    pub channels: Vec<u8>,
    /// Fly the simulated vehicle instead of the radio.
    pub offline: bool,
}

/// Lifecycle notifications from a link driver.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LinkEvent {
    Connected,
    /// Sent whenever a driver stops, whatever the cause.
    Disconnected,
    ConnectionFailed(String),
    ConnectionLost(String),
}

#[derive(Debug, Clone, PartialEq)]
pub enum LinkRequest {
    Setpoint(Setpoint),
    Close,
}

/// Sending half of a vehicle link.
///
/// Requests are queued to the driver task; a successful send only means the
/// request was queued, not that it reached the vehicle.
#[derive(Debug, Clone)]
pub struct LinkHandle {
    requests: mpsc::Sender<LinkRequest>,
}

impl LinkHandle {
    pub fn new(requests: mpsc::Sender<LinkRequest>) -> Self {
        LinkHandle { requests }
    }

    pub async fn send_setpoint(&self, setpoint: Setpoint) -> Result<(), Error> {
        self.requests
            .send(LinkRequest::Setpoint(setpoint))
            .await
            .map_err(|_| Error::Disconnected)
    }

    pub async fn close(&self) -> Result<(), Error> {
        self.requests
            .send(LinkRequest::Close)
            .await
            .map_err(|_| Error::Disconnected)
    }
}

/// Creates the request and event queues shared by a handle and a driver.
pub fn channel() -> (
    LinkHandle,
    mpsc::Receiver<LinkRequest>,
    mpsc::Sender<LinkEvent>,
    mpsc::Receiver<LinkEvent>,
) {
    let (request_tx, request_rx) = mpsc::channel(QUEUE_LEN);
    let (event_tx, event_rx) = mpsc::channel(QUEUE_LEN);
    (LinkHandle::new(request_tx), request_rx, event_tx, event_rx)
}

/// Starts connecting to `uri`. Progress is reported on the returned events.
pub fn open(uri: &LinkUri, config: &LinkConfig) -> (LinkHandle, mpsc::Receiver<LinkEvent>) {
    info!("Connecting to {uri}");
    match uri {
        LinkUri::Radio { channel: radio_channel } => {
            let (handle, requests, events_tx, events) = channel();
            tokio::spawn(radio::run(
                config.device.clone(),
                *radio_channel,
                requests,
                events_tx,
            ));
            (handle, events)
        }
        LinkUri::Sim => sim::SimVehicle::new().spawn(),
    }
}

/// Lists reachable vehicles, in probe order.
pub async fn scan(config: &LinkConfig) -> Vec<LinkUri> {
    if config.offline {
        debug!("Offline, only the simulated vehicle is available");
        return vec![LinkUri::Sim];
    }
    radio::scan(&config.device, &config.channels)
        .await
        .into_iter()
        .map(|channel| LinkUri::Radio { channel })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_uris() {
        assert_eq!("sim://".parse::<LinkUri>().unwrap(), LinkUri::Sim);
        assert_eq!(
            "radio://50".parse::<LinkUri>().unwrap(),
            LinkUri::Radio { channel: 50 }
        );
        for invalid in ["radio://", "radio://300", "usb://0", "sim://1", "50"] {
            assert!(matches!(
                invalid.parse::<LinkUri>(),
                Err(Error::InvalidUri(uri)) if uri == invalid
            ));
        }
    }

    #[test]
    fn display_round_trips() {
        for uri in [LinkUri::Sim, LinkUri::Radio { channel: 125 }] {
            assert_eq!(uri.to_string().parse::<LinkUri>().unwrap(), uri);
        }
    }

    #[tokio::test]
    async fn offline_scan_finds_the_simulator() {
        let config = LinkConfig {
            device: PathBuf::from("/dev/null"),
            channels: vec![50],
            offline: true,
        };
        assert_eq!(scan(&config).await, vec![LinkUri::Sim]);
    }

    #[tokio::test]
    async fn sending_to_a_stopped_driver_fails() {
        let (handle, requests, _events_tx, _events) = channel();
        drop(requests);
        assert!(matches!(
            handle.send_setpoint(Setpoint::NEUTRAL).await,
            Err(Error::Disconnected)
        ));
        assert!(matches!(handle.close().await, Err(Error::Disconnected)));
    }
}
