//! One connection to the receiver.
//!
//! A session task owns both halves of the transport and the device state.
//! Callers reach it only through [`Link`], which queues outbound lines while
//! the session is open and drops them otherwise.

use crate::commands::{Grammar, CMD_MAIN};
use crate::config::ClientConfig;
use crate::error::{NadError, Result};
use crate::protocol::{self, LineCodec};
use crate::state::{Notifier, StateAggregator};
use crate::types::{Operator, SessionState};
use futures_util::{SinkExt, StreamExt};
use std::future::Future;
use std::io;
use parking_lot::Mutex;
use std::sync::Arc;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpStream;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::time::{sleep_until, Instant};
use tokio_util::codec::{FramedRead, FramedWrite};
use tokio_util::sync::CancellationToken;

/// Opens transport streams to the receiver
pub trait Connector: Send + Sync + 'static {
    type Stream: AsyncRead + AsyncWrite + Send + Unpin + 'static;

    fn connect(&self) -> impl Future<Output = io::Result<Self::Stream>> + Send;

    /// Peer description for logs
    fn peer(&self) -> String;

    /// Whether the stream can signal end-of-output while still reading
    fn supports_half_close(&self) -> bool {
        true
    }
}

/// TCP transport to the receiver's control port
#[derive(Debug, Clone)]
pub struct TcpConnector {
    addr: String,
}

impl TcpConnector {
    pub fn new(addr: impl Into<String>) -> Self {
        Self { addr: addr.into() }
    }
}

impl Connector for TcpConnector {
    type Stream = TcpStream;

    fn connect(&self) -> impl Future<Output = io::Result<TcpStream>> + Send {
        let addr = self.addr.clone();
        async move {
            let stream = TcpStream::connect(&addr).await?;

            // Commands are tiny and latency-sensitive
            if let Err(e) = stream.set_nodelay(true) {
                tracing::warn!(addr = %addr, error = %e, "Failed to set TCP_NODELAY");
            }

            Ok(stream)
        }
    }

    fn peer(&self) -> String {
        self.addr.clone()
    }
}

/// A line waiting to be written by the session task
pub(crate) struct Outbound {
    line: String,
    reply: oneshot::Sender<Result<()>>,
}

/// Caller-side handle on whichever session is currently open
pub(crate) struct Link {
    outbound: Mutex<Option<mpsc::UnboundedSender<Outbound>>>,
    state: watch::Sender<SessionState>,
}

impl Link {
    pub fn new() -> Self {
        let (state, _) = watch::channel(SessionState::Closed);
        Self {
            outbound: Mutex::new(None),
            state,
        }
    }

    pub fn state(&self) -> SessionState {
        *self.state.borrow()
    }

    pub fn watch_state(&self) -> watch::Receiver<SessionState> {
        self.state.subscribe()
    }

    pub fn set_state(&self, state: SessionState) {
        let previous = self.state.send_replace(state);
        if previous != state {
            tracing::debug!(from = ?previous, to = ?state, "Session state");
        }
    }

    fn attach(&self, tx: mpsc::UnboundedSender<Outbound>) {
        *self.outbound.lock() = Some(tx);
    }

    fn detach(&self) {
        self.outbound.lock().take();
    }

    /// Write a line on the open session.
    ///
    /// Without an open session the line is dropped and `Ok` returned.
    pub async fn send(&self, line: String) -> Result<()> {
        let reply_rx = {
            let outbound = self.outbound.lock();
            let Some(tx) = outbound.as_ref() else {
                tracing::debug!("Not connected, dropping: {}", line);
                return Ok(());
            };

            let (reply, reply_rx) = oneshot::channel();
            if tx.send(Outbound { line, reply }).is_err() {
                return Ok(());
            }
            reply_rx
        };

        reply_rx.await.unwrap_or(Err(NadError::ConnectionClosed))
    }
}

/// Everything a session needs besides its stream
pub(crate) struct Shared {
    pub link: Link,
    pub notifier: Arc<Notifier>,
    pub grammar: &'static Grammar,
    pub config: ClientConfig,
}

/// How a session that did not fail came to an end
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum SessionEnd {
    /// The receiver closed the stream
    Eof,
    /// Stopped by the caller without the receiver closing
    Cancelled,
}

/// Run one session over an established stream until it ends.
///
/// The device state is cleared, and observers told, on every way out.
pub(crate) async fn run_session<S>(
    stream: S,
    shared: &Shared,
    stop: &CancellationToken,
    half_close: bool,
) -> Result<SessionEnd>
where
    S: AsyncRead + AsyncWrite + Send + Unpin,
{
    let (read_half, write_half) = tokio::io::split(stream);
    let mut reader = FramedRead::new(read_half, LineCodec::new());
    let mut writer = FramedWrite::new(write_half, LineCodec::new());
    let (tx, mut outbound) = mpsc::unbounded_channel();
    let mut aggregator = StateAggregator::new(shared.notifier.clone(), shared.config.state_changed_delay);

    shared.link.attach(tx);
    shared.link.set_state(SessionState::Open);

    let result = drive(
        &mut reader,
        &mut writer,
        &mut outbound,
        &mut aggregator,
        shared,
        stop,
        half_close,
    )
    .await;

    shared.link.detach();
    aggregator.clear();
    result
}

async fn drive<R, W>(
    reader: &mut FramedRead<R, LineCodec>,
    writer: &mut FramedWrite<W, LineCodec>,
    outbound: &mut mpsc::UnboundedReceiver<Outbound>,
    aggregator: &mut StateAggregator,
    shared: &Shared,
    stop: &CancellationToken,
    half_close: bool,
) -> Result<SessionEnd>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    // get state after connecting
    let seed = shared.grammar.validate(CMD_MAIN, Operator::Query, None)?;
    writer.send(protocol::encode(&seed)).await?;

    let mut close_deadline: Option<Instant> = None;

    loop {
        let publish_at = aggregator.deadline();

        tokio::select! {
            biased;
            _ = stop.cancelled(), if close_deadline.is_none() => {
                if !half_close {
                    tracing::debug!("Disconnect: force");
                    return Ok(SessionEnd::Cancelled);
                }
                // send EOF, let the receiver close its side
                tracing::debug!("Disconnect: writing EOF");
                shared.link.set_state(SessionState::Closing);
                writer.close().await?;
                close_deadline = Some(Instant::now() + shared.config.disconnect_timeout);
            }
            _ = sleep_until(close_deadline.unwrap_or_else(Instant::now)), if close_deadline.is_some() => {
                tracing::warn!("Receiver did not close the connection, dropping it");
                return Ok(SessionEnd::Cancelled);
            }
            _ = sleep_until(publish_at.unwrap_or_else(Instant::now)), if publish_at.is_some() => {
                aggregator.fire();
            }
            Some(request) = outbound.recv(), if close_deadline.is_none() => {
                tracing::debug!("Sending: {}", request.line);
                if let Err(e) = writer.send(request.line).await {
                    let _ = request
                        .reply
                        .send(Err(io::Error::new(e.kind(), e.to_string()).into()));
                    return Err(e.into());
                }
                let _ = request.reply.send(Ok(()));
            }
            frame = reader.next() => match frame {
                Some(Ok(line)) => handle_line(aggregator, shared.grammar, &line),
                Some(Err(e)) => return Err(e.into()),
                None => {
                    tracing::info!("EOF reached");
                    return Ok(SessionEnd::Eof);
                }
            },
        }
    }
}

fn handle_line(aggregator: &mut StateAggregator, grammar: &Grammar, line: &str) {
    tracing::debug!("Received data {}", line);

    match protocol::decode(line, grammar) {
        Ok((key, value)) => aggregator.apply(key, value),
        Err(e) => tracing::warn!(error = %e, "Dropping status line"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::NotificationKind;
    use crate::testing::{counting_callback, test_shared};
    use std::time::Duration;
    use tokio::io::{duplex, split, AsyncBufReadExt, AsyncWriteExt, BufReader};

    #[tokio::test(start_paused = true)]
    async fn seeds_state_and_coalesces_burst() {
        let shared = test_shared();
        let calls = counting_callback(&shared);
        let stop = CancellationToken::new();
        let mut waiter = shared.notifier.waiter();
        let (client, device) = duplex(1024);

        let device_side = async {
            let (rd, mut wr) = split(device);
            let mut lines = BufReader::new(rd).lines();
            assert_eq!(lines.next_line().await.unwrap().as_deref(), Some("Main?"));

            wr.write_all(b"Main.Power=On\nMain.Mute=On\nMain.Volume=-40\nMain.Source=TV\n")
                .await
                .unwrap();

            waiter.changed().await.unwrap();
            let notification = waiter.borrow_and_update().clone();
            assert_eq!(notification.kind, NotificationKind::Changed);
            assert_eq!(notification.state.power(), Some(true));
            assert_eq!(notification.state.mute(), Some(false));
            assert_eq!(notification.state.volume(), Some(-40.0));
            assert_eq!(notification.state.source(), Some("TV"));

            tokio::time::sleep(Duration::from_secs(1)).await;
            assert_eq!(calls.load(std::sync::atomic::Ordering::SeqCst), 1);
        };

        let (end, ()) = tokio::join!(run_session(client, &shared, &stop, true), device_side);

        // the device side dropped its stream when done
        assert_eq!(end.unwrap(), SessionEnd::Eof);
        assert_eq!(calls.load(std::sync::atomic::Ordering::SeqCst), 2);
        assert!(shared.notifier.latest().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn bad_lines_do_not_end_the_session() {
        let shared = test_shared();
        let stop = CancellationToken::new();
        let mut waiter = shared.notifier.waiter();
        let (client, device) = duplex(1024);

        let device_side = async move {
            let (rd, mut wr) = split(device);
            let mut lines = BufReader::new(rd).lines();
            lines.next_line().await.unwrap();

            wr.write_all(b"garbage\nZone2.Power=On\nMain.Volume=loud\nMain.Power=Off\n")
                .await
                .unwrap();
            waiter.changed().await.unwrap();
            let state = waiter.borrow_and_update().state.clone();
            assert_eq!(state.power(), Some(false));
            assert_eq!(state.len(), 1);
        };

        let (end, ()) = tokio::join!(run_session(client, &shared, &stop, true), device_side);
        assert_eq!(end.unwrap(), SessionEnd::Eof);
    }

    #[tokio::test(start_paused = true)]
    async fn outbound_lines_reach_the_device() {
        let shared = test_shared();
        let stop = CancellationToken::new();
        let (client, device) = duplex(1024);

        let device_side = async {
            let (rd, _wr) = split(device);
            let mut lines = BufReader::new(rd).lines();
            assert_eq!(lines.next_line().await.unwrap().as_deref(), Some("Main?"));

            shared.link.send("Main.Power=On".to_string()).await.unwrap();
            assert_eq!(lines.next_line().await.unwrap().as_deref(), Some("Main.Power=On"));
        };

        let (end, ()) = tokio::join!(run_session(client, &shared, &stop, true), device_side);
        assert_eq!(end.unwrap(), SessionEnd::Eof);

        // detached once the session is over
        shared.link.send("Main.Power=Off".to_string()).await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn graceful_disconnect_half_closes() {
        let shared = test_shared();
        let stop = CancellationToken::new();
        let (client, device) = duplex(1024);

        let device_side = async {
            let (rd, _wr) = split(device);
            let mut lines = BufReader::new(rd).lines();
            lines.next_line().await.unwrap();

            stop.cancel();
            assert_eq!(lines.next_line().await.unwrap(), None);
            assert_eq!(shared.link.state(), SessionState::Closing);
        };

        let (end, ()) = tokio::join!(run_session(client, &shared, &stop, true), device_side);
        assert_eq!(end.unwrap(), SessionEnd::Eof);
    }

    #[tokio::test(start_paused = true)]
    async fn disconnect_gives_up_on_silent_device() {
        let shared = test_shared();
        let stop = CancellationToken::new();
        let (client, device) = duplex(1024);

        let device_side = async {
            let (rd, wr) = split(device);
            let mut lines = BufReader::new(rd).lines();
            lines.next_line().await.unwrap();
            stop.cancel();
            assert_eq!(lines.next_line().await.unwrap(), None);
            // keep our side open past the grace period
            tokio::time::sleep(Duration::from_secs(60)).await;
            drop(wr);
        };

        let started = Instant::now();
        let (end, ()) = tokio::join!(
            async {
                let end = run_session(client, &shared, &stop, true).await;
                assert!(started.elapsed() >= shared.config.disconnect_timeout);
                assert!(started.elapsed() < shared.config.disconnect_timeout * 2);
                end
            },
            device_side
        );
        assert_eq!(end.unwrap(), SessionEnd::Cancelled);
        assert!(shared.notifier.latest().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn forced_disconnect_without_half_close() {
        let shared = test_shared();
        let stop = CancellationToken::new();
        let (client, device) = duplex(1024);

        let device_side = async {
            let (rd, _wr) = split(device);
            let mut lines = BufReader::new(rd).lines();
            lines.next_line().await.unwrap();
            stop.cancel();
        };

        let (end, ()) = tokio::join!(run_session(client, &shared, &stop, false), device_side);
        assert_eq!(end.unwrap(), SessionEnd::Cancelled);
    }
}
