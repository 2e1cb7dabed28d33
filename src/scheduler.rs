use crate::connection::SocketSession;
use crate::protocol::OutboundEnvelope;
use crate::types::{LinkState, RobotStatus};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

/// Poll interval while the robot is away from its dock
pub const ACTIVE_REFRESH_INTERVAL: Duration = Duration::from_secs(5);

/// Poll interval while the robot is charging or docked
pub const IDLE_REFRESH_INTERVAL: Duration = Duration::from_secs(120);

/// Poll interval matching a status snapshot
pub fn refresh_interval_for(status: &RobotStatus) -> Duration {
    if status.is_docked() {
        IDLE_REFRESH_INTERVAL
    } else {
        ACTIVE_REFRESH_INTERVAL
    }
}

/// Background loop keeping one robot's link and status fresh
///
/// Each cycle reconnects if needed, sends a keep-alive sync and sleeps for
/// the session's refresh interval. A shorter interval set while sleeping
/// takes effect immediately. Cancelling the loop closes the socket.
pub struct RefreshScheduler {
    cancel: CancellationToken,
    task: Option<JoinHandle<()>>,
}

impl RefreshScheduler {
    pub fn spawn(session: Arc<SocketSession>, keep_alive: OutboundEnvelope) -> Self {
        let cancel = CancellationToken::new();
        let task = tokio::spawn(run(session, keep_alive, cancel.clone()));
        Self {
            cancel,
            task: Some(task),
        }
    }

    /// Ask the loop to stop without waiting for it
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Stop the loop and wait until the socket is closed
    pub async fn shutdown(mut self) {
        self.cancel.cancel();
        if let Some(task) = self.task.take() {
            if let Err(e) = task.await {
                tracing::warn!("Refresh loop ended abnormally: {}", e);
            }
        }
    }
}

impl Drop for RefreshScheduler {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

async fn run(session: Arc<SocketSession>, keep_alive: OutboundEnvelope, cancel: CancellationToken) {
    tracing::debug!("Refresh loop started for {}", keep_alive.thing_name());
    let mut interval_rx = session.watch_refresh_interval();

    'refresh: while !cancel.is_cancelled() {
        let cycle = async {
            if session.link_state() != LinkState::Connected {
                if let Err(e) = session.connect().await {
                    tracing::warn!("Refresh connect failed: {}", e);
                }
            }
            if let Err(e) = session.publish(&keep_alive).await {
                tracing::warn!("Refresh poll failed: {}", e);
            }
        };
        tokio::select! {
            _ = cancel.cancelled() => break 'refresh,
            _ = cycle => {}
        }

        let started = Instant::now();
        loop {
            let deadline = started + *interval_rx.borrow_and_update();
            tokio::select! {
                _ = cancel.cancelled() => break 'refresh,
                _ = tokio::time::sleep_until(deadline) => break,
                changed = interval_rx.changed() => {
                    if changed.is_err() {
                        break 'refresh;
                    }
                }
            }
        }
    }

    session.force_close();
    tracing::debug!("Refresh loop stopped for {}", keep_alive.thing_name());
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::WorkingState;

    fn with_state(state: Option<WorkingState>) -> RobotStatus {
        RobotStatus {
            working_status: state,
            ..RobotStatus::default()
        }
    }

    #[test]
    fn docked_states_poll_slowly() {
        for state in [
            WorkingState::Charging,
            WorkingState::PileCharging,
            WorkingState::DirCharging,
            WorkingState::ChargeDone,
        ] {
            assert_eq!(refresh_interval_for(&with_state(Some(state))), IDLE_REFRESH_INTERVAL);
        }
    }

    #[test]
    fn everything_else_polls_fast() {
        for state in [
            Some(WorkingState::AutoClean),
            Some(WorkingState::BackCharging),
            Some(WorkingState::Idle),
            Some(WorkingState::Other("Mystery".into())),
            None,
        ] {
            assert_eq!(refresh_interval_for(&with_state(state)), ACTIVE_REFRESH_INTERVAL);
        }
    }
}
