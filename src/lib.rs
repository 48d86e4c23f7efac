//! Rust library for controlling NAD receivers over the streaming TCP protocol
//!
//! NAD receivers of the C338 family accept line-based commands on TCP port
//! 30001 and report every setting change as a `Main.<Setting>=<Value>` line.
//! This library keeps a connection to the receiver alive and provides:
//!
//! - Power, volume, mute and source control
//! - Validation of commands against the receiver's command table
//! - A mirrored device state, debounced so bursts of status lines produce one
//!   notification
//! - State change callbacks and subscriptions
//! - Automatic reconnection after transport failures
//!
//! # Quick Start
//!
//! ```no_run
//! use nad_receiver::{ClientConfig, NadClient};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let client = NadClient::new(ClientConfig::new("192.168.1.121"));
//!
//!     client.on_state_changed(|state| {
//!         println!("Power: {:?}, volume: {:?}", state.power(), state.volume());
//!     });
//!
//!     let connection = client.connect();
//!
//!     let state = client.status().await?;
//!     if state.power() != Some(true) {
//!         client.power_on().await?;
//!     }
//!     client.select_source("Phono").await?;
//!
//!     client.disconnect().await;
//!     let _ = connection.await?;
//!     Ok(())
//! }
//! ```
//!
//! # Architecture
//!
//! - **Client**: The public facade, command verbs and status queries
//! - **Supervisor**: Reconnect loop around sessions
//! - **Connection**: One session, owning the stream and the device state
//! - **State**: Debounced state aggregation and notification fan-out
//! - **Commands**: The receiver's command table and validation
//! - **Protocol**: Line framing and status line decoding

mod client;
mod commands;
mod config;
mod connection;
mod error;
mod protocol;
mod state;
mod subscription;
mod supervisor;
mod types;

#[cfg(test)]
mod testing;

// Public exports
pub use client::NadClient;
pub use commands::{
    Command, CommandSpec, Grammar, ValueDomain, ValueType, CMD_ANALOG_GAIN, CMD_AUTO_SENSE,
    CMD_AUTO_STANDBY, CMD_BASS_EQ, CMD_BRIGHTNESS, CMD_CONTROL_STANDBY, CMD_MAIN, CMD_MODEL,
    CMD_MUTE, CMD_POWER, CMD_SOURCE, CMD_VERSION, CMD_VOLUME, MSG_OFF, MSG_ON,
};
pub use config::{ClientConfig, DEFAULT_PORT};
pub use connection::{Connector, TcpConnector};
pub use error::{GrammarError, NadError, ProtocolError, Result, ValidationError};
pub use protocol::{
    decode, encode, split_line, LineCodec, StatusLine, LINE_TERMINATOR, MAX_LINE_LENGTH,
};
pub use state::StateCallback;
pub use subscription::{StateReceiver, StateUpdate};
pub use types::{DeviceState, Operator, SessionState, Value};
