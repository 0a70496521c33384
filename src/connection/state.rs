//! The connection state machine and handshake handlers.
//!
//! State progresses only along the handshake edges; any method arriving
//! out of state is answered with
//! `Connection.Close(COMMAND_INVALID, "Command Invalid", 0)` and causes no
//! transition.

use log::debug;

use crate::auth::AuthOutcome;
use crate::error::{EngineError, ErrorCode};
use crate::frame::{ProtocolInitiation, ProtocolVersion, MIN_FRAME_SIZE};
use crate::methods::{
    ConnectionMethod,
    ConnectionOpen,
    ConnectionStartOk,
    ConnectionTuneOk,
    MethodRegistry,
};
use crate::vhost::VirtualHostState;
use crate::wire::{FieldTable, ShortStr};

use super::{AmqpConnection, HEARTBEAT_TIMEOUT_FACTOR};

/// Handshake progress of a connection.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ConnectionState {
    Init,
    AwaitStartOk,
    AwaitSecureOk,
    AwaitTuneOk,
    AwaitOpen,
    Open,
}

// Client-properties keys, as written by 0-8/0-9 clients.
const CLIENT_PRODUCT: &str = "product";
const CLIENT_VERSION: &str = "version";
const CLIENT_ID: &str = "clientName";
const CLIENT_PID: &str = "process";
const CLIENT_CLOSE_WHEN_NO_ROUTE: &str = "qpid.close_when_no_route";
const CLIENT_COMPRESSION_SUPPORTED: &str = "qpid.message_compression_supported";

impl AmqpConnection {
    /// Verify the engine is in `required`; on mismatch reply
    /// `COMMAND_INVALID` and report `false` so the handler returns without
    /// acting.
    pub(crate) fn assert_state(
        &mut self,
        required: ConnectionState,
    ) -> Result<bool, EngineError> {
        if self.state == required {
            return Ok(true);
        }
        self.send_connection_close(ErrorCode::CommandInvalid, "Command Invalid", 0)?;
        Ok(false)
    }

    pub(crate) fn connection_method_received(
        &mut self,
        method: ConnectionMethod,
    ) -> Result<(), EngineError> {
        match method {
            ConnectionMethod::StartOk(body) => self.receive_connection_start_ok(body),
            ConnectionMethod::SecureOk(body) => self.receive_connection_secure_ok(&body.response),
            ConnectionMethod::TuneOk(body) => self.receive_connection_tune_ok(body),
            ConnectionMethod::Open(body) => self.receive_connection_open(&body),
            ConnectionMethod::Close(body) => {
                self.receive_connection_close(body.reply_code, body.reply_text.as_str())
            }
            ConnectionMethod::CloseOk => self.receive_connection_close_ok(),
        }
    }

    pub(crate) fn protocol_initiation_received(&mut self, pi: ProtocolInitiation) {
        debug!("RECV ProtocolHeader [{}]", pi.version);
        if !pi.version.is_supported() {
            debug!(
                "received unsupported protocol initiation for protocol version: {}",
                pi.version
            );
            self.write_protocol_header(ProtocolVersion::latest_supported());
            self.flush();
            self.network.close();
            return;
        }

        self.set_protocol_version(pi.version);

        let mechanisms = self.authenticator.mechanisms().join(" ");
        let locales = "en_US";
        let server_properties = self.server_properties();

        let frame = self.registry().connection_start_frame(
            &server_properties,
            mechanisms.as_bytes(),
            locales.as_bytes(),
        );
        self.write_frame(&frame);
        self.state = ConnectionState::AwaitStartOk;
        self.flush();
    }

    fn write_protocol_header(&self, version: ProtocolVersion) {
        let header = ProtocolInitiation::new(version).to_bytes();
        let mut writer = self.shared.writer.lock().expect("frame writer poisoned");
        writer.sender.send(bytes::Bytes::copy_from_slice(&header));
    }

    fn set_protocol_version(&mut self, version: ProtocolVersion) {
        *self.shared.registry.lock().expect("registry poisoned") = MethodRegistry::new(version);
    }

    fn server_properties(&self) -> FieldTable {
        let mut properties = FieldTable::new();
        properties.insert_string("product", &self.broker.product);
        properties.insert_string("version", &self.broker.version);
        properties.insert_string("qpid.build", &self.broker.build);
        properties.insert_string("qpid.instance_name", &self.broker.instance_name);
        properties.insert_string(
            "qpid.close_when_no_route",
            &self.close_when_no_route.to_string(),
        );
        properties.insert_string(
            "qpid.message_compression_supported",
            &self.broker.message_compression_enabled.to_string(),
        );
        properties.insert_string("qpid.confirmed_publish_supported", "true");
        properties.insert_string(
            "qpid.virtualhost_properties_supported",
            &self.broker.virtualhost_properties_node_enabled.to_string(),
        );
        properties
    }

    fn receive_connection_start_ok(&mut self, body: ConnectionStartOk) -> Result<(), EngineError> {
        debug!(
            "RECV ConnectionStartOk[ mechanism: {} locale: {} response: ******** ]",
            body.mechanism, body.locale
        );
        if !self.assert_state(ConnectionState::AwaitStartOk)? {
            return Ok(());
        }

        let local_fqdn = self.network.local_address();
        match self
            .authenticator
            .create_sasl_server(body.mechanism.as_str(), &local_fqdn)
        {
            Err(_) => self.send_connection_close(
                ErrorCode::ResourceError,
                &format!("Unable to create SASL Server:{}", body.mechanism),
                0,
            ),
            Ok(mut sasl) => {
                self.set_client_properties(&body.client_properties);
                let outcome = sasl.step(&body.response);
                self.sasl = Some(sasl);
                self.handle_auth_outcome(outcome)
            }
        }
    }

    pub(crate) fn receive_connection_secure_ok(
        &mut self,
        response: &[u8],
    ) -> Result<(), EngineError> {
        debug!("RECV ConnectionSecureOk[ response: ******** ]");
        if !self.assert_state(ConnectionState::AwaitSecureOk)? {
            return Ok(());
        }
        let Some(mut sasl) = self.sasl.take() else {
            return self.send_connection_close(
                ErrorCode::InternalError,
                "No SASL context set up in connection",
                0,
            );
        };
        let outcome = sasl.step(response);
        self.sasl = Some(sasl);
        self.handle_auth_outcome(outcome)
    }

    fn handle_auth_outcome(&mut self, outcome: AuthOutcome) -> Result<(), EngineError> {
        match outcome {
            AuthOutcome::Failure(reason) => {
                debug!("authentication failed: {reason}");
                let result = self.send_connection_close(ErrorCode::NotAllowed, "Authentication failed", 0);
                self.dispose_sasl_server();
                result
            }
            AuthOutcome::Success(principal) => {
                debug!("connected as: {}", principal.name);
                self.security.set_principal(principal);
                self.dispose_sasl_server();

                let frame_max = self.default_max_frame_size();
                let frame = self.registry().connection_tune_frame(
                    self.broker.session_count_limit,
                    frame_max,
                    self.broker.heart_beat_delay,
                );
                self.write_frame(&frame);
                self.state = ConnectionState::AwaitTuneOk;
                Ok(())
            }
            AuthOutcome::Challenge(challenge) => {
                let frame = self.registry().connection_secure_frame(&challenge);
                self.write_frame(&frame);
                self.state = ConnectionState::AwaitSecureOk;
                Ok(())
            }
        }
    }

    /// Drop the SASL context. The slot is taken exactly once; a second
    /// call observes `None` and does nothing.
    fn dispose_sasl_server(&mut self) {
        drop(self.sasl.take());
    }

    fn set_client_properties(&mut self, properties: &FieldTable) {
        if let Some(value) = properties.get_string(CLIENT_CLOSE_WHEN_NO_ROUTE) {
            self.close_when_no_route = value == "true";
            debug!("client set closeWhenNoRoute={} ", self.close_when_no_route);
        }
        if let Some(value) = properties.get_string(CLIENT_COMPRESSION_SUPPORTED) {
            let supported = value == "true" && self.broker.message_compression_enabled;
            self.shared
                .compression_supported
                .store(supported, std::sync::atomic::Ordering::Release);
            debug!("client set compressionSupported={supported}");
        }

        let product = properties.get_string(CLIENT_PRODUCT);
        let version = properties.get_string(CLIENT_VERSION);

        // Older queue clients block on Queue.Delete-Ok even with nowait
        // set; detect them by product and version so channels can send the
        // response regardless.
        let might_be_legacy_client = product.as_deref().is_some_and(|p| {
            let lower = p.to_lowercase();
            lower.contains("qpid") || lower == "unknown"
        });
        let send_regardless = might_be_legacy_client
            && version
                .as_deref()
                .map_or(true, |v| self.client_version_regex_matches(v));
        self.shared
            .send_queue_delete_ok_regardless
            .store(send_regardless, std::sync::atomic::Ordering::Release);
        if send_regardless {
            debug!("peer is an older client, queue delete-ok response will be sent regardless");
        }

        self.client_product = product;
        self.client_version = version;
        self.client_pid = properties.get_string(CLIENT_PID);
        self.client_id = Some(
            properties
                .get_string(CLIENT_ID)
                .unwrap_or_else(|| format!("generated-{:016x}", self.connection_id())),
        );
    }

    fn client_version_regex_matches(&self, version: &str) -> bool {
        self.client_ver_regex
            .as_ref()
            .is_some_and(|re| re.is_match(version))
    }

    fn receive_connection_tune_ok(&mut self, body: ConnectionTuneOk) -> Result<(), EngineError> {
        debug!(
            "RECV ConnectionTuneOk[ channelMax: {} frameMax: {} heartbeat: {} ]",
            body.channel_max, body.frame_max, body.heartbeat
        );
        if !self.assert_state(ConnectionState::AwaitTuneOk)? {
            return Ok(());
        }

        self.init_heartbeats(body.heartbeat);

        let broker_frame_max = self.default_max_frame_size();
        if body.frame_max > broker_frame_max {
            return self.send_connection_close(
                ErrorCode::SyntaxError,
                &format!(
                    "Attempt to set max frame size to {} greater than the broker will allow: {}",
                    body.frame_max, broker_frame_max
                ),
                0,
            );
        }
        if body.frame_max > 0 && body.frame_max < MIN_FRAME_SIZE {
            return self.send_connection_close(
                ErrorCode::SyntaxError,
                &format!(
                    "Attempt to set max frame size to {} which is smaller than the specification defined minimum: {}",
                    body.frame_max, MIN_FRAME_SIZE
                ),
                0,
            );
        }

        let frame_max = if body.frame_max == 0 {
            broker_frame_max
        } else {
            body.frame_max
        };
        self.set_max_frame_size(frame_max);

        // Zero means no implied limit beyond the protocol's own 0xFFFF.
        self.max_channels = if body.channel_max == 0 {
            u16::MAX
        } else {
            body.channel_max
        };
        self.heartbeat_delay = body.heartbeat;
        self.state = ConnectionState::AwaitOpen;
        Ok(())
    }

    fn init_heartbeats(&mut self, delay: u16) {
        if delay > 0 {
            self.network
                .set_max_write_idle(Some(std::time::Duration::from_secs(u64::from(delay))));
            self.network.set_max_read_idle(Some(std::time::Duration::from_secs(
                u64::from(delay) * u64::from(HEARTBEAT_TIMEOUT_FACTOR),
            )));
        } else {
            self.network.set_max_write_idle(None);
            self.network.set_max_read_idle(None);
        }
    }

    fn receive_connection_open(&mut self, body: &ConnectionOpen) -> Result<(), EngineError> {
        debug!(
            "RECV ConnectionOpen[ virtualHost: {} capabilities: {} insist: {} ]",
            body.virtual_host, body.capabilities, body.insist
        );
        if !self.assert_state(ConnectionState::AwaitOpen)? {
            return Ok(());
        }

        let requested = body.virtual_host.as_str();
        let name = requested.strip_prefix('/').unwrap_or(requested);

        let Some(virtual_host) = self.vhosts.virtual_host(name) else {
            return self.send_connection_close(
                ErrorCode::NotFound,
                &format!("Unknown virtual host: '{requested}'"),
                0,
            );
        };

        if virtual_host.state() != VirtualHostState::Active {
            if let Some(redirect_host) = virtual_host.redirect_host() {
                let frame = self
                    .registry()
                    .connection_redirect_frame(&ShortStr::truncated(&redirect_host));
                return self.send_connection_close_frame(0, frame);
            }
            return self.send_connection_close(
                ErrorCode::ConnectionForced,
                &format!("Virtual host '{}' is not active", virtual_host.name()),
                0,
            );
        }

        self.security.set_virtual_host(virtual_host.name());
        if let Err(refusal) = virtual_host.authorise_create_connection(&self.security) {
            return self.send_connection_close(ErrorCode::AccessRefused, &refusal.0, 0);
        }

        virtual_host.connection_registered(self.connection_id());
        self.virtual_host = Some(virtual_host);

        let frame = self
            .registry()
            .connection_open_ok_frame(&body.virtual_host);
        self.write_frame(&frame);
        self.state = ConnectionState::Open;

        let principal = self
            .security
            .principal()
            .map_or("?", |p| p.name.as_str())
            .to_owned();
        self.events.connection_open(
            &self.network.remote_address(),
            &principal,
            self.security.virtual_host().unwrap_or("?"),
        );
        Ok(())
    }
}
