use crate::connection::{run_session, Connector, SessionEnd, Shared};
use crate::error::{NadError, Result};
use crate::types::SessionState;
use tokio::time::{sleep, timeout};
use tokio_util::sync::CancellationToken;

/// Keep a session to the receiver alive until it is closed or stopped.
///
/// Transport failures are retried after `reconnect_interval`. A stream the
/// receiver closes ends the loop with `Ok`; `stop` ends it with
/// [`NadError::Cancelled`] unless the receiver closes in response.
pub(crate) async fn run_loop<C: Connector>(
    connector: &C,
    shared: &Shared,
    stop: &CancellationToken,
) -> Result<()> {
    let peer = connector.peer();
    let interval = shared.config.reconnect_interval;
    let mut attempt: u32 = 0;

    loop {
        attempt += 1;
        shared.link.set_state(SessionState::Connecting);
        tracing::info!(addr = %peer, attempt, "Connecting");

        let connected = tokio::select! {
            biased;
            _ = stop.cancelled() => {
                shared.link.set_state(SessionState::Closed);
                return Err(NadError::Cancelled);
            }
            result = timeout(shared.config.connect_timeout, connector.connect()) => match result {
                Ok(Ok(stream)) => Ok(stream),
                Ok(Err(e)) => Err(NadError::Io(e)),
                Err(_) => Err(NadError::Timeout),
            },
        };

        let outcome = match connected {
            Ok(stream) => {
                tracing::info!(addr = %peer, "Connected");
                attempt = 0;
                run_session(stream, shared, stop, connector.supports_half_close()).await
            }
            Err(e) => Err(e),
        };

        match outcome {
            Ok(SessionEnd::Eof) => {
                // the receiver closed on purpose, don't reconnect
                shared.link.set_state(SessionState::Closed);
                tracing::info!(addr = %peer, "Connection closed by receiver");
                return Ok(());
            }
            Ok(SessionEnd::Cancelled) => {
                shared.link.set_state(SessionState::Closed);
                tracing::debug!(addr = %peer, "Force disconnect");
                return Err(NadError::Cancelled);
            }
            Err(e) if e.is_recoverable() => {
                shared.link.set_state(SessionState::Failed);
                tracing::warn!(
                    addr = %peer,
                    error = %e,
                    attempt,
                    "Disconnected, reconnecting in {:?}",
                    interval
                );

                tokio::select! {
                    biased;
                    _ = stop.cancelled() => {
                        shared.link.set_state(SessionState::Closed);
                        return Err(NadError::Cancelled);
                    }
                    _ = sleep(interval) => {}
                }
            }
            Err(e) => {
                shared.link.set_state(SessionState::Failed);
                tracing::error!(addr = %peer, error = %e, "Connection failed");
                return Err(e);
            }
        }
    }
}
