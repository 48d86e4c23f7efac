//! Test doubles for the transport and shared session plumbing.

use crate::commands::Grammar;
use crate::config::ClientConfig;
use crate::connection::{Connector, Link, Shared};
use crate::state::Notifier;
use crate::types::DeviceState;
use std::collections::VecDeque;
use std::future::Future;
use std::io;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use tokio::io::DuplexStream;
use tokio::time::Instant;

pub(crate) fn test_config() -> ClientConfig {
    ClientConfig::new("receiver.test")
}

pub(crate) fn test_shared() -> Shared {
    Shared {
        link: Link::new(),
        notifier: Arc::new(Notifier::new()),
        grammar: Grammar::c338(),
        config: test_config(),
    }
}

/// Register a callback that counts publications
pub(crate) fn counting_callback(shared: &Shared) -> Arc<AtomicUsize> {
    let calls = Arc::new(AtomicUsize::new(0));
    let counter = calls.clone();
    shared.notifier.set_callback(Some(Arc::new(move |_: &DeviceState| {
        counter.fetch_add(1, Ordering::SeqCst);
    })));
    calls
}

/// One scripted answer to a connection attempt
pub(crate) enum Step {
    Refuse,
    /// Never completes
    Stall,
    Accept(DuplexStream),
}

/// Connector that plays back a script of refusals and in-memory streams.
///
/// Once the script runs out every attempt is refused.
pub(crate) struct ScriptedConnector {
    steps: Mutex<VecDeque<Step>>,
    attempts: Arc<Mutex<Vec<Instant>>>,
    half_close: bool,
}

impl ScriptedConnector {
    pub fn new(steps: impl IntoIterator<Item = Step>) -> Self {
        Self {
            steps: Mutex::new(steps.into_iter().collect()),
            attempts: Arc::new(Mutex::new(Vec::new())),
            half_close: true,
        }
    }

    pub fn without_half_close(mut self) -> Self {
        self.half_close = false;
        self
    }

    /// When each connection attempt was made
    pub fn attempts(&self) -> Arc<Mutex<Vec<Instant>>> {
        self.attempts.clone()
    }
}

impl Connector for ScriptedConnector {
    type Stream = DuplexStream;

    fn connect(&self) -> impl Future<Output = io::Result<DuplexStream>> + Send {
        self.attempts.lock().unwrap().push(Instant::now());
        let step = self.steps.lock().unwrap().pop_front();
        async move {
            match step {
                Some(Step::Accept(stream)) => Ok(stream),
                Some(Step::Stall) => std::future::pending().await,
                Some(Step::Refuse) | None => Err(io::ErrorKind::ConnectionRefused.into()),
            }
        }
    }

    fn peer(&self) -> String {
        "scripted".to_string()
    }

    fn supports_half_close(&self) -> bool {
        self.half_close
    }
}
