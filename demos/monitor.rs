use nad_receiver::{ClientConfig, NadClient};
use std::time::Duration;
use tracing::Level;

/// Polls a receiver once a second and logs every state change.
///
/// Usage: `cargo run --example monitor -- <host> [port]`
#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt().with_max_level(Level::DEBUG).init();

    let mut args = std::env::args().skip(1);
    let host = args.next().unwrap_or_else(|| "192.168.1.121".to_string());
    let mut config = ClientConfig::new(host);
    if let Some(port) = args.next() {
        config = config.with_port(port.parse()?);
    }

    let client = NadClient::new(config);
    client.on_state_changed(|state| {
        if state.is_empty() {
            println!("Disconnected");
        } else {
            println!(
                "Power: {:?}  Volume: {:?} dB  Mute: {:?}  Source: {:?}",
                state.power(),
                state.volume(),
                state.mute(),
                state.source()
            );
        }
    });

    let connection = client.connect();

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => break,
            result = tokio::time::timeout(Duration::from_secs(5), client.status()) => match result {
                Ok(Ok(_)) => {}
                Ok(Err(e)) => println!("Status failed: {}", e),
                Err(_) => println!("No status yet"),
            },
        }
        tokio::time::sleep(Duration::from_secs(1)).await;
    }

    client.disconnect().await;
    if let Err(e) = connection.await? {
        println!("Connection ended: {}", e);
    }

    Ok(())
}
