use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

use crate::link::{self, LinkEvent, LinkUri};
use crate::session::Session;

pub type SessionHandle = JoinHandle<Result<(), link::Error>>;

/// Starts the flight session once the vehicle link is up.
///
/// There is no reconnect: a failed or lost link is reported and the
/// manager waits for the link driver to finish.
pub struct LifecycleManager {
    uri: LinkUri,
    pending: Option<Session>,
    active: Option<SessionHandle>,
}

impl LifecycleManager {
    pub fn new(uri: LinkUri, session: Session) -> Self {
        LifecycleManager {
            uri,
            pending: Some(session),
            active: None,
        }
    }

    pub fn handle(&mut self, event: LinkEvent) {
        match event {
            LinkEvent::Connected => match self.pending.take() {
                Some(session) => {
                    info!("Connected to {}", self.uri);
                    self.active = Some(tokio::spawn(session.run()));
                }
                None => warn!("{} reported connected twice, ignoring", self.uri),
            },
            LinkEvent::Disconnected => info!("Disconnected from {}", self.uri),
            LinkEvent::ConnectionFailed(reason) => {
                error!("Connection to {} failed: {reason}", self.uri)
            }
            LinkEvent::ConnectionLost(reason) => {
                error!("Connection to {} lost: {reason}", self.uri)
            }
        }
    }

    /// Dispatches link events until the driver stops. Returns the session
    /// if one was started.
    pub async fn run(mut self, mut events: mpsc::Receiver<LinkEvent>) -> Option<SessionHandle> {
        while let Some(event) = events.recv().await {
            self.handle(event);
        }
        self.active
    }
}
