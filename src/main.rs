//! Demo broker binary: accepts AMQP connections with PLAIN guest/guest
//! authentication and a single always-active virtual host.

mod cli;

use std::collections::HashMap;
use std::sync::Arc;

use bytes::Bytes;
use clap::Parser;
use log::debug;

use ferrumq::auth::StaticAuthenticator;
use ferrumq::channel::{Channel, ChannelFactory};
use ferrumq::connection::EngineHandle;
use ferrumq::error::{EngineError, ErrorCode};
use ferrumq::message::ContentHeaderBody;
use ferrumq::methods::ChannelMethod;
use ferrumq::server::{run_until_interrupted, AmqpServer};
use ferrumq::vhost::{AccessRefused, VirtualHost, VirtualHostRegistry, VirtualHostState};
use ferrumq::{BrokerConfig, PortConfig, SecurityContext};

/// A channel that acknowledges lifecycle traffic and logs the rest.
///
/// The demo broker has no routing fabric behind it; the point is to
/// exercise the connection engine against real clients.
struct SinkChannel {
    id: u16,
    closing: bool,
}

impl Channel for SinkChannel {
    fn id(&self) -> u16 {
        self.id
    }

    fn receive_method(&mut self, method: ChannelMethod) -> Result<(), EngineError> {
        debug!("channel {} ignoring {method:?}", self.id);
        Ok(())
    }

    fn receive_content_header(&mut self, header: ContentHeaderBody) -> Result<(), EngineError> {
        debug!("channel {} content header, body size {}", self.id, header.body_size);
        Ok(())
    }

    fn receive_content_body(&mut self, payload: Bytes) -> Result<(), EngineError> {
        debug!("channel {} content body, {} octets", self.id, payload.len());
        Ok(())
    }

    fn receive_complete(&mut self) -> Result<(), EngineError> {
        Ok(())
    }

    fn close(&mut self, _cause: Option<ErrorCode>, _message: &str) {
        self.closing = true;
    }

    fn block(&mut self) {}

    fn unblock(&mut self) {}

    fn transport_state_changed(&mut self) {}

    fn process_pending(&mut self) -> bool {
        false
    }

    fn is_closing(&self) -> bool {
        self.closing
    }
}

struct SinkChannelFactory;

impl ChannelFactory for SinkChannelFactory {
    fn create(&self, _engine: EngineHandle, channel_id: u16) -> Box<dyn Channel> {
        Box::new(SinkChannel {
            id: channel_id,
            closing: false,
        })
    }
}

struct DefaultVirtualHost;

impl VirtualHost for DefaultVirtualHost {
    fn name(&self) -> &str {
        "default"
    }

    fn state(&self) -> VirtualHostState {
        VirtualHostState::Active
    }

    fn authorise_create_connection(&self, _security: &SecurityContext) -> Result<(), AccessRefused> {
        Ok(())
    }
}

struct DefaultRegistry(Arc<DefaultVirtualHost>);

impl VirtualHostRegistry for DefaultRegistry {
    fn virtual_host(&self, name: &str) -> Option<Arc<dyn VirtualHost>> {
        // "/" arrives stripped to "".
        (name.is_empty() || name == "default").then(|| Arc::clone(&self.0) as Arc<dyn VirtualHost>)
    }
}

#[tokio::main]
async fn main() -> std::io::Result<()> {
    env_logger::init();
    let cli = cli::Cli::parse();

    let broker = BrokerConfig {
        heart_beat_delay: cli.heartbeat,
        ..BrokerConfig::default()
    };
    let port = PortConfig {
        port: cli.port,
        max_open_connections: cli.max_connections,
        ..PortConfig::default()
    };

    let mut users = HashMap::new();
    users.insert("guest".to_owned(), "guest".to_owned());
    let mut authenticator = StaticAuthenticator::new(users);
    if cli.allow_anonymous {
        authenticator = authenticator.with_anonymous();
    }

    let server = AmqpServer::new(
        broker,
        port,
        Arc::new(authenticator),
        Arc::new(DefaultRegistry(Arc::new(DefaultVirtualHost))),
        Arc::new(SinkChannelFactory),
    );
    run_until_interrupted(server, &cli.bind).await
}
