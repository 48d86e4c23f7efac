use crate::commands::{
    Grammar, CMD_AUTO_SENSE, CMD_AUTO_STANDBY, CMD_BASS_EQ, CMD_BRIGHTNESS, CMD_CONTROL_STANDBY,
    CMD_MAIN, CMD_MUTE, CMD_POWER, CMD_SOURCE, CMD_VOLUME,
};
use crate::config::ClientConfig;
use crate::connection::{Connector, Link, Shared, TcpConnector};
use crate::error::{NadError, Result};
use crate::protocol;
use crate::state::{Notification, NotificationKind, Notifier};
use crate::subscription::StateReceiver;
use crate::supervisor;
use crate::types::{DeviceState, Operator, SessionState, Value};
use parking_lot::Mutex;
use std::sync::Arc;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

/// Client for a NAD receiver on the streaming TCP protocol
///
/// The client keeps one connection to the receiver alive, reconnecting after
/// transport failures, and mirrors the receiver's settings as they are
/// reported. Commands sent while no connection is open are dropped.
///
/// Cloning is cheap; all clones share the same connection.
pub struct NadClient<C: Connector = TcpConnector> {
    inner: Arc<Inner<C>>,
}

struct Inner<C> {
    connector: C,
    shared: Shared,
    /// Stop token of the current run; replaced only when a run starts
    stop: Mutex<CancellationToken>,
    running: watch::Sender<bool>,
    /// Status waiter shared by concurrent `status()` calls
    waiter: Mutex<Option<watch::Receiver<Notification>>>,
}

impl<C: Connector> Clone for NadClient<C> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

impl NadClient<TcpConnector> {
    /// Create a client for the receiver named in `config`
    ///
    /// Nothing is connected until [`run`](Self::run) or
    /// [`connect`](Self::connect) is called.
    ///
    /// # Example
    ///
    /// ```no_run
    /// use nad_receiver::{ClientConfig, NadClient};
    ///
    /// #[tokio::main]
    /// async fn main() -> Result<(), Box<dyn std::error::Error>> {
    ///     let client = NadClient::new(ClientConfig::new("192.168.1.121"));
    ///     let connection = client.connect();
    ///
    ///     let state = client.status().await?;
    ///     println!("Volume: {:?} dB", state.volume());
    ///     client.set_volume(-30.0).await?;
    ///
    ///     client.disconnect().await;
    ///     let _ = connection.await?;
    ///     Ok(())
    /// }
    /// ```
    pub fn new(config: ClientConfig) -> Self {
        let connector = TcpConnector::new(config.addr());
        Self::with_connector(connector, config)
    }
}

impl<C: Connector> NadClient<C> {
    /// Create a client over a custom transport
    pub fn with_connector(connector: C, config: ClientConfig) -> Self {
        Self {
            inner: Arc::new(Inner {
                connector,
                shared: Shared {
                    link: Link::new(),
                    notifier: Arc::new(Notifier::new()),
                    grammar: Grammar::c338(),
                    config,
                },
                stop: Mutex::new(CancellationToken::new()),
                running: watch::channel(false).0,
                waiter: Mutex::new(None),
            }),
        }
    }

    /// Get the connection settings
    pub fn config(&self) -> &ClientConfig {
        &self.inner.shared.config
    }

    /// Register the callback invoked with every state snapshot
    ///
    /// Called after each debounced change and once with an empty snapshot
    /// when the connection drops. Replaces any earlier callback. The callback
    /// runs on the connection task and should return quickly.
    pub fn on_state_changed<F>(&self, callback: F)
    where
        F: Fn(&DeviceState) + Send + Sync + 'static,
    {
        self.inner.shared.notifier.set_callback(Some(Arc::new(callback)));
    }

    /// Remove the state change callback
    pub fn clear_state_callback(&self) {
        self.inner.shared.notifier.set_callback(None);
    }

    /// Subscribe to state updates
    ///
    /// Multiple subscriptions can be active simultaneously.
    pub fn subscribe(&self) -> StateReceiver {
        StateReceiver::new(self.inner.shared.notifier.subscribe())
    }

    /// Last published snapshot, without talking to the receiver
    pub fn state(&self) -> DeviceState {
        (*self.inner.shared.notifier.latest()).clone()
    }

    /// Get the state of the current session
    pub fn session_state(&self) -> SessionState {
        self.inner.shared.link.state()
    }

    /// Run the connection loop until the receiver closes the connection or
    /// [`disconnect`](Self::disconnect) is called
    ///
    /// Transport failures are retried every `reconnect_interval`. Returns
    /// `Ok(())` when the receiver closed the stream and
    /// [`NadError::Cancelled`] when the loop was stopped without that.
    pub async fn run(&self) -> Result<()> {
        let (_running, stop) = self.start()?;
        supervisor::run_loop(&self.inner.connector, &self.inner.shared, &stop).await
    }

    /// Spawn [`run`](Self::run) on the current runtime
    ///
    /// The run is registered before this returns, so a following
    /// [`disconnect`](Self::disconnect) always stops it.
    pub fn connect(&self) -> JoinHandle<Result<()>> {
        let started = self.start();
        let inner = self.inner.clone();
        tokio::spawn(async move {
            let (_running, stop) = started?;
            supervisor::run_loop(&inner.connector, &inner.shared, &stop).await
        })
    }

    /// Mark a run as live and hand out its stop token
    fn start(&self) -> Result<(RunningGuard<C>, CancellationToken)> {
        let mut stop = self.inner.stop.lock();
        if *self.inner.running.borrow() {
            return Err(NadError::AlreadyRunning);
        }
        self.inner.running.send_replace(true);
        *stop = CancellationToken::new();
        Ok((RunningGuard(self.inner.clone()), stop.clone()))
    }

    /// Disconnect from the receiver and stop reconnecting
    ///
    /// The write side is closed first so the receiver can end the session
    /// cleanly; if it does not within `disconnect_timeout` the connection is
    /// dropped. Returns once the connection loop has exited.
    pub async fn disconnect(&self) {
        tracing::debug!("Disconnecting from {}", self.inner.connector.peer());

        let mut running = self.inner.running.subscribe();
        self.inner.stop.lock().cancel();

        let _ = running.wait_for(|running| !running).await;
    }

    /// Validate and send any command from the command table
    pub async fn exec_command(
        &self,
        key: &str,
        operator: Operator,
        value: Option<Value>,
    ) -> Result<()> {
        let command = self.inner.shared.grammar.validate(key, operator, value)?;
        self.inner.shared.link.send(protocol::encode(&command)).await
    }

    /// Ask the receiver for its state and wait for the next snapshot
    ///
    /// Concurrent calls share one query and resolve together. While
    /// disconnected nothing is sent and the call waits for the next
    /// connection to report in, so callers should apply their own timeout.
    /// Fails with [`NadError::ConnectionClosed`] if the connection drops first.
    pub async fn status(&self) -> Result<DeviceState> {
        let (mut waiter, armed) = self.waiter();

        if armed {
            self.exec_command(CMD_MAIN, Operator::Query, None).await?;
        }

        // not guaranteed to get the matching response, so wait for the next state change
        waiter
            .changed()
            .await
            .map_err(|_| NadError::ConnectionClosed)?;

        let notification = waiter.borrow_and_update().clone();
        match notification.kind {
            NotificationKind::Disconnected => Err(NadError::ConnectionClosed),
            _ => Ok((*notification.state).clone()),
        }
    }

    /// The pending status waiter, or a fresh one; `true` if fresh
    fn waiter(&self) -> (watch::Receiver<Notification>, bool) {
        let mut slot = self.inner.waiter.lock();

        if let Some(pending) = slot.as_ref() {
            if matches!(pending.has_changed(), Ok(false)) {
                return (pending.clone(), false);
            }
        }

        let waiter = self.inner.shared.notifier.waiter();
        *slot = Some(waiter.clone());
        (waiter, true)
    }

    /// Turn the receiver on
    pub async fn power_on(&self) -> Result<()> {
        self.exec_command(CMD_POWER, Operator::Assign, Some(Value::Bool(true)))
            .await
    }

    /// Put the receiver in standby
    pub async fn power_off(&self) -> Result<()> {
        self.exec_command(CMD_POWER, Operator::Assign, Some(Value::Bool(false)))
            .await
    }

    /// Set the volume in dB, -80 to 0
    pub async fn set_volume(&self, volume: f64) -> Result<()> {
        self.exec_command(CMD_VOLUME, Operator::Assign, Some(Value::Float(volume)))
            .await
    }

    /// Step the volume up
    pub async fn volume_up(&self) -> Result<()> {
        self.exec_command(CMD_VOLUME, Operator::Increment, None).await
    }

    /// Step the volume down
    pub async fn volume_down(&self) -> Result<()> {
        self.exec_command(CMD_VOLUME, Operator::Decrement, None).await
    }

    /// Set mute on
    pub async fn mute(&self) -> Result<()> {
        self.exec_command(CMD_MUTE, Operator::Assign, Some(Value::Bool(true)))
            .await
    }

    /// Set mute off
    pub async fn unmute(&self) -> Result<()> {
        self.exec_command(CMD_MUTE, Operator::Assign, Some(Value::Bool(false)))
            .await
    }

    /// Select one of [`available_sources`](Self::available_sources)
    pub async fn select_source(&self, source: &str) -> Result<()> {
        self.exec_command(CMD_SOURCE, Operator::Assign, Some(Value::from(source)))
            .await
    }

    /// Front panel brightness, 0 to 3
    pub async fn set_brightness(&self, level: u8) -> Result<()> {
        self.exec_command(CMD_BRIGHTNESS, Operator::Assign, Some(Value::from(level)))
            .await
    }

    /// Set bass EQ on or off
    pub async fn set_bass_eq(&self, on: bool) -> Result<()> {
        self.exec_command(CMD_BASS_EQ, Operator::Assign, Some(Value::Bool(on)))
            .await
    }

    /// Set auto standby on or off
    pub async fn set_auto_standby(&self, on: bool) -> Result<()> {
        self.exec_command(CMD_AUTO_STANDBY, Operator::Assign, Some(Value::Bool(on)))
            .await
    }

    /// Set control standby on or off
    pub async fn set_control_standby(&self, on: bool) -> Result<()> {
        self.exec_command(CMD_CONTROL_STANDBY, Operator::Assign, Some(Value::Bool(on)))
            .await
    }

    /// Set auto sense on or off
    pub async fn set_auto_sense(&self, on: bool) -> Result<()> {
        self.exec_command(CMD_AUTO_SENSE, Operator::Assign, Some(Value::Bool(on)))
            .await
    }

    /// Sources the receiver can switch to
    pub fn available_sources(&self) -> Vec<&'static str> {
        self.inner
            .shared
            .grammar
            .get(CMD_SOURCE)
            .and_then(|spec| spec.choices())
            .map(<[&str]>::to_vec)
            .unwrap_or_default()
    }
}

/// Clears the running flag when a run ends, however it ends
struct RunningGuard<C>(Arc<Inner<C>>);

impl<C> Drop for RunningGuard<C> {
    fn drop(&mut self) {
        self.0.running.send_replace(false);
    }
}
