use std::time::Duration;

/// TCP port of the C338-family control protocol
pub const DEFAULT_PORT: u16 = 30001;

/// Connection settings for one receiver.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Host name or IP address of the receiver
    pub host: String,

    /// Control port. Default: 30001.
    pub port: u16,

    /// Pause between reconnect attempts after a transport failure. Default: 10s.
    pub reconnect_interval: Duration,

    /// Quiet period that coalesces status lines into one notification. Default: 100ms.
    pub state_changed_delay: Duration,

    /// Upper bound on establishing the TCP connection. Default: 5s.
    pub connect_timeout: Duration,

    /// How long a graceful disconnect waits for the receiver to close its
    /// side before the session is dropped. Default: 5s.
    pub disconnect_timeout: Duration,
}

impl ClientConfig {
    pub fn new(host: impl Into<String>) -> Self {
        Self {
            host: host.into(),
            port: DEFAULT_PORT,
            reconnect_interval: Duration::from_secs(10),
            state_changed_delay: Duration::from_millis(100),
            connect_timeout: Duration::from_secs(5),
            disconnect_timeout: Duration::from_secs(5),
        }
    }

    pub fn with_port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    pub fn with_reconnect_interval(mut self, interval: Duration) -> Self {
        self.reconnect_interval = interval;
        self
    }

    pub fn with_state_changed_delay(mut self, delay: Duration) -> Self {
        self.state_changed_delay = delay;
        self
    }

    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    pub fn with_disconnect_timeout(mut self, timeout: Duration) -> Self {
        self.disconnect_timeout = timeout;
        self
    }

    /// `host:port` string for connecting
    pub fn addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}
