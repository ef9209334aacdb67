use std::path::{Path, PathBuf};

use minicbor::{CborLen, Encode};
use nrf24l01_stick_driver::{Configuration, CrcMode, DataRate, Receiver, MAX_PAYLOAD_LEN, NRF24L01};
use protocol::{Setpoint, Status};
use tokio::sync::mpsc;
use tracing::{debug, error, info, trace, warn};

use crate::link::{LinkEvent, LinkRequest};

// "Drone"
const PIPE_ADDRESS: [u8; 5] = [0x44u8, 0x72u8, 0x6fu8, 0x6eu8, 0x65u8];

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("interface error: {0:?}")]
    Interface(#[from] nrf24l01_stick_driver::Error),

    #[error("setpoint encoding error: {0}")]
    Encode(#[from] minicbor::encode::Error<minicbor::encode::write::EndOfSlice>),

    #[error("setpoint does not fit into a radio payload ({0} bytes)")]
    PayloadTooLarge(usize),
}

pub struct Radio {
    receiver: Receiver,
}

impl Radio {
    pub async fn open(device: &Path, channel: u8) -> Result<Self, Error> {
        let mut config = Configuration::default();
        config.channel = channel;
        config.rate = DataRate::R2Mbps;
        config.power = 3;
        config.crc = Some(CrcMode::OneByte);
        config.auto_retransmit_delay_count = Some((250, 3));

        let mut nrf24l01 = NRF24L01::open_default(config, &device.to_string_lossy()).await?;
        // data is received via ACK payloads -> no need to set any receive addresses
        nrf24l01
            .set_receive_addr(None, None, None, None, None)
            .await?;
        let receiver = nrf24l01.receive().await?;

        Ok(Radio { receiver })
    }

    pub async fn send(&mut self, setpoint: &Setpoint) -> Result<(), Error> {
        trace!("Sending: {setpoint:?}");

        let mut buf = [0u8; MAX_PAYLOAD_LEN];
        let payload = encode(setpoint, &mut buf)?;

        match self
            .receiver
            .send((&PIPE_ADDRESS[..]).into(), payload)
            .await?
        {
            Some(ack_payload) => {
                let data = ack_payload.payload;
                let status: Result<Status, minicbor::decode::Error> = minicbor::decode(&data[..]);
                match status {
                    Ok(status) => debug!(
                        "roll={}, pitch={}, battery={}",
                        status.roll, status.pitch, status.battery
                    ),
                    Err(e) => warn!("failed to decode status: {e}"),
                }
            }
            None => trace!("Did not receive ACK payload."),
        }

        Ok(())
    }
}

/// CBOR-encodes `value` into `buf`, returning the bytes to transmit.
fn encode<'b, T>(value: &T, buf: &'b mut [u8; MAX_PAYLOAD_LEN]) -> Result<&'b [u8], Error>
where
    T: Encode<()> + CborLen<()> + ?Sized,
{
    let size = minicbor::len(value);
    if size > MAX_PAYLOAD_LEN {
        return Err(Error::PayloadTooLarge(size));
    }
    minicbor::encode(value, buf.as_mut())?;
    Ok(&buf[..size])
}

/// The vehicle end of a radio link.
trait Transceiver {
    async fn transmit(&mut self, setpoint: &Setpoint) -> Result<(), Error>;

    /// Waits for a packet the vehicle sent on its own.
    async fn listen(&mut self);
}

impl Transceiver for Radio {
    async fn transmit(&mut self, setpoint: &Setpoint) -> Result<(), Error> {
        self.send(setpoint).await
    }

    async fn listen(&mut self) {
        match self.receiver.receive().await {
            Ok(packet) => debug!("Received {:?} from {}", packet.payload, packet.pipe),
            Err(e) => warn!("could not receive packet: {e:?}"),
        }
    }
}

/// Radio link driver.
///
/// The link counts as connected once a neutral setpoint has been
/// acknowledged by the vehicle.
pub async fn run(
    device: PathBuf,
    channel: u8,
    requests: mpsc::Receiver<LinkRequest>,
    events: mpsc::Sender<LinkEvent>,
) {
    let opened = Radio::open(&device, channel).await;
    drive(opened, requests, events).await;
}

/// Handshakes over `opened`, then forwards link requests until the link is
/// closed or a send fails. Always ends with `Disconnected`.
async fn drive<T: Transceiver>(
    opened: Result<T, Error>,
    mut requests: mpsc::Receiver<LinkRequest>,
    events: mpsc::Sender<LinkEvent>,
) {
    let connected = async {
        let mut link = opened?;
        link.transmit(&Setpoint::NEUTRAL).await?;
        Ok::<_, Error>(link)
    }
    .await;

    match connected {
        Ok(mut link) => {
            _ = events.send(LinkEvent::Connected).await;
            loop {
                tokio::select! {
                    _ = link.listen() => {}
                    request = requests.recv() => match request {
                        Some(LinkRequest::Setpoint(setpoint)) => {
                            if let Err(e) = link.transmit(&setpoint).await {
                                error!("could not send: {e}");
                                _ = events.send(LinkEvent::ConnectionLost(e.to_string())).await;
                                break;
                            }
                        }
                        Some(LinkRequest::Close) | None => {
                            info!("Closing radio link");
                            break;
                        }
                    },
                }
            }
        }
        Err(e) => {
            _ = events.send(LinkEvent::ConnectionFailed(e.to_string())).await;
        }
    }

    drop(requests);
    _ = events.send(LinkEvent::Disconnected).await;
}

/// Probes each channel with a neutral setpoint and returns those where a
/// vehicle acknowledged it.
pub async fn scan(device: &Path, channels: &[u8]) -> Vec<u8> {
    let mut found = Vec::new();
    for &channel in channels {
        let probe = async {
            let mut radio = Radio::open(device, channel).await?;
            radio.send(&Setpoint::NEUTRAL).await
        };
        match probe.await {
            Ok(()) => found.push(channel),
            Err(e) => debug!("No vehicle on channel {channel}: {e}"),
        }
    }
    found
}
