use std::time::Duration;

pub const DEFAULT_PORT: u16 = 54321;
pub const DEFAULT_NAME_ATTEMPTS: usize = 3;
pub const DEFAULT_MAX_NAME_LEN: usize = 32;
pub const DEFAULT_MAX_FRAME_LEN: usize = 4096;
pub const DEFAULT_OUTBOUND_QUEUE: usize = 256;
pub const DEFAULT_WRITE_TIMEOUT: Duration = Duration::from_secs(10);
/// Longest line a client accepts from the server. Relayed text carries a
/// name prefix and rosters grow with the number of users, so this sits well
/// above the server's inbound frame limit.
pub const DEFAULT_MAX_INCOMING_LEN: usize = 1 << 20;

/// Server configuration, assembled with a builder and validated at build time.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub addr: String,
    pub port: u16,
    pub max_name_attempts: usize,
    pub max_name_len: usize,
    pub max_frame_len: usize,
    /// Drop a peer that sends nothing for this long. `None` keeps connections
    /// open until a read or write actually fails.
    pub idle_timeout: Option<Duration>,
    /// Lines queued per client before it counts as unreachable.
    pub outbound_queue: usize,
    /// A single socket write stuck longer than this ends the connection.
    pub write_timeout: Duration,
}

pub struct ServerConfigBuilder {
    addr: String,
    port: u16,
    max_name_attempts: usize,
    max_name_len: usize,
    max_frame_len: usize,
    idle_timeout: Option<Duration>,
    outbound_queue: usize,
    write_timeout: Duration,
}

impl ServerConfig {
    pub fn builder() -> ServerConfigBuilder {
        ServerConfigBuilder {
            addr: "0.0.0.0".to_string(),
            port: DEFAULT_PORT,
            max_name_attempts: DEFAULT_NAME_ATTEMPTS,
            max_name_len: DEFAULT_MAX_NAME_LEN,
            max_frame_len: DEFAULT_MAX_FRAME_LEN,
            idle_timeout: None,
            outbound_queue: DEFAULT_OUTBOUND_QUEUE,
            write_timeout: DEFAULT_WRITE_TIMEOUT,
        }
    }

    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.addr, self.port)
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self::builder().build()
    }
}

impl ServerConfigBuilder {
    pub fn addr(mut self, addr: impl Into<String>) -> Self {
        self.addr = addr.into();
        self
    }

    pub fn port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    pub fn max_name_attempts(mut self, attempts: usize) -> Self {
        self.max_name_attempts = attempts;
        self
    }

    pub fn max_name_len(mut self, len: usize) -> Self {
        self.max_name_len = len;
        self
    }

    pub fn max_frame_len(mut self, len: usize) -> Self {
        self.max_frame_len = len;
        self
    }

    pub fn idle_timeout(mut self, timeout: Duration) -> Self {
        self.idle_timeout = Some(timeout);
        self
    }

    pub fn outbound_queue(mut self, lines: usize) -> Self {
        self.outbound_queue = lines;
        self
    }

    pub fn write_timeout(mut self, timeout: Duration) -> Self {
        self.write_timeout = timeout;
        self
    }

    /// Zero limits would make every handshake fail, so they are raised to 1.
    /// A frame must at least fit a name.
    pub fn build(self) -> ServerConfig {
        let max_name_len = self.max_name_len.max(1);
        ServerConfig {
            addr: self.addr,
            port: self.port,
            max_name_attempts: self.max_name_attempts.max(1),
            max_name_len,
            max_frame_len: self.max_frame_len.max(max_name_len),
            idle_timeout: self.idle_timeout.filter(|t| !t.is_zero()),
            outbound_queue: self.outbound_queue.max(1),
            write_timeout: if self.write_timeout.is_zero() {
                DEFAULT_WRITE_TIMEOUT
            } else {
                self.write_timeout
            },
        }
    }
}

/// Where a client connects and how many names it may try.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    pub server_addr: String,
    pub max_name_attempts: usize,
    /// The server's inbound frame limit; longer outgoing text is refused
    /// locally instead of getting the connection dropped.
    pub max_frame_len: usize,
    pub max_incoming_len: usize,
}

impl ClientConfig {
    pub fn new(server_addr: impl Into<String>) -> Self {
        Self {
            server_addr: server_addr.into(),
            max_name_attempts: DEFAULT_NAME_ATTEMPTS,
            max_frame_len: DEFAULT_MAX_FRAME_LEN,
            max_incoming_len: DEFAULT_MAX_INCOMING_LEN,
        }
    }

    pub fn max_name_attempts(mut self, attempts: usize) -> Self {
        self.max_name_attempts = attempts.max(1);
        self
    }

    pub fn max_frame_len(mut self, len: usize) -> Self {
        self.max_frame_len = len.max(1);
        self
    }
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self::new(format!("127.0.0.1:{DEFAULT_PORT}"))
    }
}
