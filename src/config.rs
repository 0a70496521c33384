//! Configuration values the engine consumes from the broker model.

/// Broker-wide settings.
#[derive(Clone, Debug)]
pub struct BrokerConfig {
    /// Product name advertised in `Connection.Start`.
    pub product: String,
    /// Release version advertised in `Connection.Start`.
    pub version: String,
    /// Build identifier advertised in `Connection.Start`.
    pub build: String,
    /// Broker instance name advertised in `Connection.Start`.
    pub instance_name: String,
    /// Cap on channels per connection, offered in `Connection.Tune`.
    pub session_count_limit: u16,
    /// Heartbeat period in seconds offered in `Connection.Tune`; zero
    /// disables heartbeats.
    pub heart_beat_delay: u16,
    /// Default for closing the connection when a mandatory message has no
    /// route; clients may override per connection.
    pub close_when_no_route: bool,
    /// Whether the broker will gzip-bridge message content at all.
    pub message_compression_enabled: bool,
    /// Whether the virtual-host properties node is advertised.
    pub virtualhost_properties_node_enabled: bool,
    /// Transport buffer size; the default max frame size is derived from
    /// it.
    pub network_buffer_size: u32,
}

impl Default for BrokerConfig {
    fn default() -> Self {
        Self {
            product: "ferrumq".to_owned(),
            version: env!("CARGO_PKG_VERSION").to_owned(),
            build: "release".to_owned(),
            instance_name: "default".to_owned(),
            session_count_limit: 256,
            heart_beat_delay: 60,
            close_when_no_route: true,
            message_compression_enabled: true,
            virtualhost_properties_node_enabled: true,
            // 64 KiB of payload plus frame overhead.
            network_buffer_size: 65544,
        }
    }
}

/// Per-port settings.
#[derive(Clone, Debug)]
pub struct PortConfig {
    /// TCP port number.
    pub port: u16,
    /// Largest message accepted on this port; zero means unlimited.
    pub max_message_size: u32,
    /// Connection cap; zero means unlimited.
    pub max_open_connections: u32,
    /// Percentage of the cap at which a one-shot warning fires.
    pub open_connections_warn_percent: u32,
    /// Octets of binary payload included in frame debug logging.
    pub debug_binary_data_length: usize,
    /// Client versions (full match) that receive `Queue.Delete-Ok`
    /// regardless of `nowait`.
    pub send_queue_delete_ok_regardless_client_ver_regexp: String,
    /// Body size above which outbound content is deflated for capable
    /// clients; zero or negative semantics disable via the engine.
    pub message_compression_threshold: usize,
}

impl Default for PortConfig {
    fn default() -> Self {
        Self {
            port: 5672,
            max_message_size: 0,
            max_open_connections: 0,
            open_connections_warn_percent: 80,
            debug_binary_data_length: 80,
            send_queue_delete_ok_regardless_client_ver_regexp: String::new(),
            message_compression_threshold: 102_400,
        }
    }
}
