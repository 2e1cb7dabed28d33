use crate::error::{Result, WebackError};
use crate::types::RobotStatus;
use tokio::sync::broadcast;

/// Change pushed to subscribers of a session
#[derive(Debug, Clone)]
pub enum SessionUpdate {
    /// Robot status differs from the previous snapshot
    Status(Box<RobotStatus>),

    /// A new map was decoded and installed
    Map,
}

/// Receiver for session updates
pub struct UpdateReceiver {
    rx: broadcast::Receiver<SessionUpdate>,
}

impl UpdateReceiver {
    pub(crate) fn new(rx: broadcast::Receiver<SessionUpdate>) -> Self {
        Self { rx }
    }

    /// Receive the next update
    ///
    /// Fails with `ConnectionClosed` once the session is gone.
    pub async fn recv(&mut self) -> Result<SessionUpdate> {
        loop {
            match self.rx.recv().await {
                Ok(update) => return Ok(update),
                Err(broadcast::error::RecvError::Closed) => return Err(WebackError::ConnectionClosed),
                Err(broadcast::error::RecvError::Lagged(n)) => {
                    tracing::warn!("Update receiver lagged by {} messages", n);
                }
            }
        }
    }

    /// Try to receive an update without blocking
    ///
    /// Returns `None` if no update is waiting.
    pub fn try_recv(&mut self) -> Result<Option<SessionUpdate>> {
        loop {
            match self.rx.try_recv() {
                Ok(update) => return Ok(Some(update)),
                Err(broadcast::error::TryRecvError::Empty) => return Ok(None),
                Err(broadcast::error::TryRecvError::Closed) => return Err(WebackError::ConnectionClosed),
                Err(broadcast::error::TryRecvError::Lagged(n)) => {
                    tracing::warn!("Update receiver lagged by {} messages", n);
                }
            }
        }
    }
}
