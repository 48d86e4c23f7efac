use crate::error::{NadError, Result};
use crate::types::DeviceState;
use std::sync::Arc;
use tokio::sync::broadcast;

/// State update published after each debounced change
#[derive(Debug, Clone)]
pub enum StateUpdate {
    /// Full snapshot after one or more status lines
    Changed(Arc<DeviceState>),

    /// Connection dropped; all known state was cleared
    Disconnected,
}

/// Receiver for state updates
pub struct StateReceiver {
    rx: broadcast::Receiver<StateUpdate>,
}

impl StateReceiver {
    pub(crate) fn new(rx: broadcast::Receiver<StateUpdate>) -> Self {
        Self { rx }
    }

    /// Receive the next state update
    ///
    /// Fails with [`NadError::ConnectionClosed`] once the client is dropped.
    /// A receiver that falls behind skips ahead to the newest updates.
    pub async fn recv(&mut self) -> Result<StateUpdate> {
        loop {
            match self.rx.recv().await {
                Ok(update) => return Ok(update),
                Err(broadcast::error::RecvError::Closed) => return Err(NadError::ConnectionClosed),
                Err(broadcast::error::RecvError::Lagged(n)) => {
                    tracing::warn!("State receiver lagged by {} updates", n);
                }
            }
        }
    }

    /// Try to receive a state update without blocking
    ///
    /// Returns `None` if no update is available.
    pub fn try_recv(&mut self) -> Result<Option<StateUpdate>> {
        loop {
            match self.rx.try_recv() {
                Ok(update) => return Ok(Some(update)),
                Err(broadcast::error::TryRecvError::Empty) => return Ok(None),
                Err(broadcast::error::TryRecvError::Closed) => return Err(NadError::ConnectionClosed),
                Err(broadcast::error::TryRecvError::Lagged(n)) => {
                    tracing::warn!("State receiver lagged by {} updates", n);
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn skips_ahead_when_lagged() {
        let (tx, rx) = broadcast::channel(2);
        let mut receiver = StateReceiver::new(rx);

        for _ in 0..3 {
            tx.send(StateUpdate::Changed(Arc::new(DeviceState::new()))).unwrap();
        }
        tx.send(StateUpdate::Disconnected).unwrap();

        assert!(matches!(receiver.recv().await.unwrap(), StateUpdate::Changed(_)));
        assert!(matches!(receiver.recv().await.unwrap(), StateUpdate::Disconnected));
        assert!(receiver.try_recv().unwrap().is_none());
    }

    #[tokio::test]
    async fn closed_when_sender_dropped() {
        let (tx, rx) = broadcast::channel::<StateUpdate>(4);
        let mut receiver = StateReceiver::new(rx);
        drop(tx);

        assert!(matches!(receiver.recv().await, Err(NadError::ConnectionClosed)));
        assert!(matches!(receiver.try_recv(), Err(NadError::ConnectionClosed)));
    }
}
