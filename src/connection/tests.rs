use bytes::BufMut;
use rstest::rstest;

use crate::config::{BrokerConfig, PortConfig};
use crate::error::ErrorCode;
use crate::frame::FrameType;
use crate::methods::{ChannelMethod, ConnectionMethod, MethodKind, MethodRegistry};
use crate::test_helpers::{
    client_channel_open,
    client_method,
    client_open,
    client_start_ok,
    client_tune_ok,
    fixture,
    fixture_with,
    fixture_with_factory,
    perform_handshake,
    EngineFixture,
    ScriptedChannelFactory,
};
use crate::wire::FieldTable;

use super::{ConnectionState, CLOSE_OK_TIMEOUT};

fn decode_connection_close(fixture: &EngineFixture) -> crate::methods::ConnectionClose {
    let registry = MethodRegistry::new(crate::frame::ProtocolVersion::V0_9_1);
    let close = fixture
        .sender
        .frames()
        .into_iter()
        .filter(|f| f.frame_type == FrameType::Method)
        .filter_map(|f| registry.decode(f.payload).ok())
        .find_map(|m| match m.kind {
            MethodKind::Connection(ConnectionMethod::Close(body)) => Some(body),
            _ => None,
        });
    close.expect("a Connection.Close frame should have been written")
}

fn handshake_to_await_tune_ok(fixture: &mut EngineFixture) {
    fixture
        .engine
        .received(b"AMQP\x00\x00\x09\x01")
        .expect("protocol header");
    fixture
        .engine
        .received(&client_start_ok(&FieldTable::new()))
        .expect("start-ok");
}

#[test]
fn protocol_header_produces_connection_start() {
    let mut fixture = fixture();
    fixture
        .engine
        .received(b"AMQP\x00\x00\x09\x01")
        .expect("protocol header");

    assert_eq!(fixture.engine.state(), ConnectionState::AwaitStartOk);
    assert_eq!(fixture.sender.method_opcodes(), vec![(10, 10)]);

    let frames = fixture.sender.frames();
    let payload = &frames[0].payload;
    // class, method, then version major/minor
    assert_eq!(payload[4], 0);
    assert_eq!(payload[5], 9);
    assert!(fixture.sender.flushes() > 0);
}

#[test]
fn start_advertises_server_properties_and_mechanisms() {
    let mut fixture = fixture();
    fixture
        .engine
        .received(b"AMQP\x00\x00\x09\x01")
        .expect("protocol header");

    let raw = fixture.sender.raw();
    let text = String::from_utf8_lossy(&raw);
    for key in [
        "product",
        "version",
        "qpid.build",
        "qpid.instance_name",
        "qpid.close_when_no_route",
        "qpid.message_compression_supported",
        "qpid.confirmed_publish_supported",
        "qpid.virtualhost_properties_supported",
    ] {
        assert!(text.contains(key), "Connection.Start should advertise {key}");
    }
    assert!(text.contains("PLAIN"));
    assert!(text.contains("en_US"));
}

#[test]
fn good_credentials_produce_tune_with_broker_limits() {
    let mut fixture = fixture();
    handshake_to_await_tune_ok(&mut fixture);

    assert_eq!(fixture.engine.state(), ConnectionState::AwaitTuneOk);
    let opcodes = fixture.sender.method_opcodes();
    assert_eq!(opcodes.last(), Some(&(10, 30)));

    let tune = fixture
        .sender
        .frames()
        .into_iter()
        .filter(|f| f.frame_type == FrameType::Method)
        .last()
        .expect("tune frame");
    let args = &tune.payload[4..];
    assert_eq!(u16::from_be_bytes([args[0], args[1]]), 256);
    assert_eq!(u32::from_be_bytes([args[2], args[3], args[4], args[5]]), 65536);
    assert_eq!(u16::from_be_bytes([args[6], args[7]]), 60);
}

#[test]
fn bad_credentials_close_with_not_allowed() {
    let mut fixture = fixture();
    fixture
        .engine
        .received(b"AMQP\x00\x00\x09\x01")
        .expect("protocol header");
    let start_ok = client_method(0, 10, 11, |buf| {
        FieldTable::new().encode(buf);
        crate::wire::put_short_string(buf, &crate::wire::ShortStr::new("PLAIN").unwrap());
        crate::wire::put_long_string(buf, b"\0guest\0wrong");
        crate::wire::put_short_string(buf, &crate::wire::ShortStr::new("en_US").unwrap());
    });
    fixture.engine.received(&start_ok).expect("start-ok");

    let close = decode_connection_close(&fixture);
    assert_eq!(close.reply_code, ErrorCode::NotAllowed.code());
    assert_eq!(close.reply_text.as_str(), "Authentication failed");
    // The failing method reference is Connection.Start-Ok.
    assert_eq!((close.class_id, close.method_id), (10, 11));
}

#[test]
fn unknown_mechanism_closes_with_resource_error() {
    let mut fixture = fixture();
    fixture
        .engine
        .received(b"AMQP\x00\x00\x09\x01")
        .expect("protocol header");
    let start_ok = client_method(0, 10, 11, |buf| {
        FieldTable::new().encode(buf);
        crate::wire::put_short_string(buf, &crate::wire::ShortStr::new("GSSAPI").unwrap());
        crate::wire::put_long_string(buf, b"");
        crate::wire::put_short_string(buf, &crate::wire::ShortStr::new("en_US").unwrap());
    });
    fixture.engine.received(&start_ok).expect("start-ok");

    let close = decode_connection_close(&fixture);
    assert_eq!(close.reply_code, ErrorCode::ResourceError.code());
    assert_eq!(close.reply_text.as_str(), "Unable to create SASL Server:GSSAPI");
}

#[rstest]
#[case::tune_ok_before_start_ok(client_tune_ok(0, 0, 0))]
#[case::open_before_start_ok(client_open("/"))]
#[case::channel_open_before_open(client_channel_open(1))]
fn out_of_state_methods_close_with_command_invalid(#[case] frame: Vec<u8>) {
    let mut fixture = fixture();
    fixture
        .engine
        .received(b"AMQP\x00\x00\x09\x01")
        .expect("protocol header");
    let state_before = fixture.engine.state();
    fixture.engine.received(&frame).expect("dispatch");

    let close = decode_connection_close(&fixture);
    assert_eq!(close.reply_code, ErrorCode::CommandInvalid.code());
    assert_eq!(close.reply_text.as_str(), "Command Invalid");
    assert_eq!(fixture.engine.state(), state_before);
}

#[test]
fn tune_ok_zero_values_take_broker_defaults() {
    let mut fixture = fixture();
    handshake_to_await_tune_ok(&mut fixture);
    fixture
        .engine
        .received(&client_tune_ok(0, 0, 0))
        .expect("tune-ok");

    assert_eq!(fixture.engine.state(), ConnectionState::AwaitOpen);
    assert_eq!(fixture.engine.max_channels(), u16::MAX);
    assert_eq!(fixture.engine.handle().max_frame_size(), 65536);
    // Heartbeat zero disarms both idle timers.
    assert_eq!(fixture.network.read_idle(), None);
    assert_eq!(fixture.network.write_idle(), None);
}

#[test]
fn tune_ok_installs_heartbeat_timers() {
    let mut fixture = fixture();
    handshake_to_await_tune_ok(&mut fixture);
    fixture
        .engine
        .received(&client_tune_ok(256, 65536, 60))
        .expect("tune-ok");

    assert_eq!(
        fixture.network.write_idle(),
        Some(std::time::Duration::from_secs(60))
    );
    assert_eq!(
        fixture.network.read_idle(),
        Some(std::time::Duration::from_secs(120))
    );
}

#[test]
fn tune_ok_frame_max_above_broker_limit_is_a_syntax_error() {
    let mut fixture = fixture();
    handshake_to_await_tune_ok(&mut fixture);
    fixture
        .engine
        .received(&client_tune_ok(0, 1 << 24, 0))
        .expect("tune-ok");

    let close = decode_connection_close(&fixture);
    assert_eq!(close.reply_code, ErrorCode::SyntaxError.code());
    assert!(close
        .reply_text
        .as_str()
        .starts_with("Attempt to set max frame size to 16777216 greater than the broker will allow"));
    assert_ne!(fixture.engine.state(), ConnectionState::AwaitOpen);
}

#[test]
fn open_on_stopped_vhost_without_redirect_closes_connection_forced() {
    use crate::test_helpers::{FakeVirtualHost, FakeVirtualHostRegistry};
    use crate::vhost::VirtualHostState;

    let mut stopped = FakeVirtualHost::active("stopped");
    stopped.state = VirtualHostState::Stopped;
    let registry = FakeVirtualHostRegistry::default().with(stopped);

    let mut fixture = fixture();
    fixture.engine.vhosts = std::sync::Arc::new(registry);
    handshake_to_await_tune_ok(&mut fixture);
    fixture
        .engine
        .received(&client_tune_ok(256, 65536, 0))
        .expect("tune-ok");
    fixture
        .engine
        .received(&client_open("/stopped"))
        .expect("open");

    let close = decode_connection_close(&fixture);
    assert_eq!(close.reply_code, ErrorCode::ConnectionForced.code());
    assert_eq!(close.reply_text.as_str(), "Virtual host 'stopped' is not active");
}

#[test]
fn open_on_stopped_vhost_with_redirect_writes_redirect() {
    use crate::test_helpers::{FakeVirtualHost, FakeVirtualHostRegistry};
    use crate::vhost::VirtualHostState;

    let mut moving = FakeVirtualHost::active("moving");
    moving.state = VirtualHostState::Stopped;
    moving.redirect = Some("other-broker:5672".to_owned());
    let registry = FakeVirtualHostRegistry::default().with(moving);

    let mut fixture = fixture();
    fixture.engine.vhosts = std::sync::Arc::new(registry);
    handshake_to_await_tune_ok(&mut fixture);
    fixture
        .engine
        .received(&client_tune_ok(256, 65536, 0))
        .expect("tune-ok");
    fixture
        .engine
        .received(&client_open("/moving"))
        .expect("open");

    assert!(fixture.sender.method_opcodes().contains(&(10, 42)));
    assert!(fixture.engine.is_closing());
}

#[test]
fn access_refusal_closes_with_access_refused() {
    use crate::test_helpers::{FakeVirtualHost, FakeVirtualHostRegistry};

    let mut private = FakeVirtualHost::active("private");
    private.refuse = Some("Connection refused".to_owned());
    let registry = FakeVirtualHostRegistry::default().with(private);

    let mut fixture = fixture();
    fixture.engine.vhosts = std::sync::Arc::new(registry);
    handshake_to_await_tune_ok(&mut fixture);
    fixture
        .engine
        .received(&client_tune_ok(256, 65536, 0))
        .expect("tune-ok");
    fixture
        .engine
        .received(&client_open("/private"))
        .expect("open");

    let close = decode_connection_close(&fixture);
    assert_eq!(close.reply_code, ErrorCode::AccessRefused.code());
    assert_eq!(close.reply_text.as_str(), "Connection refused");
}

#[test]
fn channel_open_registers_and_replies_open_ok() {
    let mut fixture = fixture();
    perform_handshake(&mut fixture);
    fixture
        .engine
        .received(&client_channel_open(1))
        .expect("channel open");

    assert_eq!(fixture.channels.created(), 1);
    assert_eq!(fixture.sender.method_opcodes(), vec![(20, 11)]);
}

#[test]
fn channel_method_forwards_in_wire_order_with_single_complete() {
    let factory = ScriptedChannelFactory::default();
    let mut fixture = fixture_with_factory(
        BrokerConfig::default(),
        PortConfig::default(),
        factory.clone(),
    );
    perform_handshake(&mut fixture);
    fixture
        .engine
        .received(&client_channel_open(1))
        .expect("channel open");
    fixture
        .engine
        .received(&client_channel_open(2))
        .expect("channel open");

    // One buffer carrying three methods: two for channel 1, one for 2.
    let mut buffer = Vec::new();
    buffer.extend(client_method(1, 60, 80, |buf| buf.put_u64(1))); // ack
    buffer.extend(client_method(2, 90, 10, |_| {})); // tx.select
    buffer.extend(client_method(1, 90, 20, |_| {})); // tx.commit
    fixture.engine.received(&buffer).expect("methods");

    let log1 = factory.log(1).expect("channel 1 log");
    let log2 = factory.log(2).expect("channel 2 log");
    {
        let log1 = log1.lock().unwrap();
        assert_eq!(log1.methods.len(), 2);
        assert_eq!(log1.complete_calls, 1);
        match &log1.methods[0] {
            ChannelMethod::Raw(raw) => assert_eq!((raw.class_id, raw.method_id), (60, 80)),
            other => panic!("unexpected: {other:?}"),
        }
    }
    let log2 = log2.lock().unwrap();
    assert_eq!(log2.methods.len(), 1);
    assert_eq!(log2.complete_calls, 1);
}

#[test]
fn unknown_channel_method_closes_with_channel_error() {
    let mut fixture = fixture();
    perform_handshake(&mut fixture);
    fixture
        .engine
        .received(&client_method(7, 90, 10, |_| {}))
        .expect("method");

    let close = decode_connection_close(&fixture);
    assert_eq!(close.reply_code, ErrorCode::ChannelError.code());
    assert_eq!(close.reply_text.as_str(), "Unknown channel id: 7");
    // Recorded at dispatch time: tx.select.
    assert_eq!((close.class_id, close.method_id), (90, 10));
}

#[test]
fn peer_channel_close_removes_channel_and_replies_close_ok() {
    let factory = ScriptedChannelFactory::default();
    let mut fixture = fixture_with_factory(
        BrokerConfig::default(),
        PortConfig::default(),
        factory.clone(),
    );
    perform_handshake(&mut fixture);
    fixture
        .engine
        .received(&client_channel_open(1))
        .expect("channel open");
    fixture.sender.clear();

    let close = client_method(1, 20, 40, |buf| {
        buf.put_u16(200);
        crate::wire::put_short_string(buf, &crate::wire::ShortStr::new("bye").unwrap());
        buf.put_u16(0);
        buf.put_u16(0);
    });
    fixture.engine.received(&close).expect("channel close");

    assert_eq!(fixture.sender.method_opcodes(), vec![(20, 41)]);
    let log = factory.log(1).expect("log");
    assert!(log.lock().unwrap().closed.is_some());

    // The id can be reused now.
    fixture
        .engine
        .received(&client_channel_open(1))
        .expect("reopen");
    assert_eq!(fixture.channels.created(), 2);
}

#[test]
fn broker_side_channel_close_awaits_close_ok() {
    let mut fixture = fixture();
    perform_handshake(&mut fixture);
    fixture
        .engine
        .received(&client_channel_open(1))
        .expect("channel open");
    fixture.sender.clear();

    fixture
        .engine
        .close_channel_with_error(1, ErrorCode::NotAllowed, "not yours");
    assert_eq!(fixture.sender.method_opcodes(), vec![(20, 40)]);
    assert!(fixture.engine.channels.awaiting_close_ok(1));

    // Re-opening while awaiting Close-Ok is a channel error.
    fixture
        .engine
        .received(&client_channel_open(1))
        .expect("reopen attempt");
    let close = decode_connection_close(&fixture);
    assert_eq!(close.reply_code, ErrorCode::ChannelError.code());
    assert_eq!(close.reply_text.as_str(), "Channel 1 already exists");
}

#[test]
fn channel_close_ok_clears_the_closing_entry() {
    let mut fixture = fixture();
    perform_handshake(&mut fixture);
    fixture
        .engine
        .received(&client_channel_open(1))
        .expect("channel open");
    fixture
        .engine
        .close_channel_with_error(1, ErrorCode::NotAllowed, "not yours");
    assert!(fixture.engine.channels.awaiting_close_ok(1));

    fixture
        .engine
        .received(&client_method(1, 20, 41, |_| {}))
        .expect("close-ok");
    assert!(!fixture.engine.channels.awaiting_close_ok(1));
}

#[test]
fn overdue_close_ok_forces_the_network_closed() {
    let mut fixture = fixture();
    perform_handshake(&mut fixture);
    fixture
        .engine
        .received(&client_channel_open(1))
        .expect("channel open");
    fixture
        .engine
        .close_channel_with_error(1, ErrorCode::NotAllowed, "not yours");

    let now = std::time::Instant::now();
    fixture.engine.tick(now);
    assert!(!fixture.network.is_closed());

    fixture.engine.tick(now + CLOSE_OK_TIMEOUT + std::time::Duration::from_secs(1));
    assert!(fixture.network.is_closed());
}

#[test]
fn peer_connection_close_completes_channels_and_replies_once() {
    let factory = ScriptedChannelFactory::default();
    let mut fixture = fixture_with_factory(
        BrokerConfig::default(),
        PortConfig::default(),
        factory.clone(),
    );
    perform_handshake(&mut fixture);
    fixture
        .engine
        .received(&client_channel_open(1))
        .expect("channel open");
    fixture.sender.clear();

    let close_frame = client_method(0, 10, 50, |buf| {
        buf.put_u16(200);
        crate::wire::put_short_string(buf, &crate::wire::ShortStr::new("goodbye").unwrap());
        buf.put_u16(0);
        buf.put_u16(0);
    });
    fixture.engine.received(&close_frame).expect("close");
    fixture.engine.received(&close_frame).expect("repeat close");

    let close_oks = fixture
        .sender
        .method_opcodes()
        .into_iter()
        .filter(|op| *op == (10, 51))
        .count();
    assert_eq!(close_oks, 1);
    assert!(fixture.network.is_closed());
    assert!(factory.log(1).unwrap().lock().unwrap().closed.is_some());
}

#[test]
fn engine_initiated_close_is_once_only() {
    let mut fixture = fixture();
    perform_handshake(&mut fixture);
    fixture.sender.clear();

    fixture
        .engine
        .send_connection_close(ErrorCode::InternalError, "boom", 0)
        .expect("close");
    fixture
        .engine
        .send_connection_close(ErrorCode::InternalError, "boom again", 0)
        .expect("second close");

    assert_eq!(fixture.sender.method_opcodes(), vec![(10, 50)]);
    assert_eq!(
        fixture.network.forced_close_after(),
        Some(CLOSE_OK_TIMEOUT)
    );
}

#[test]
fn connection_close_ok_from_peer_closes_the_network() {
    let mut fixture = fixture();
    perform_handshake(&mut fixture);
    fixture
        .engine
        .send_connection_close(ErrorCode::InternalError, "boom", 0)
        .expect("close");

    fixture
        .engine
        .received(&client_method(0, 10, 51, |_| {}))
        .expect("close-ok");
    assert!(fixture.network.is_closed());
}

#[test]
fn channel_traffic_is_dropped_while_closing() {
    let factory = ScriptedChannelFactory::default();
    let mut fixture = fixture_with_factory(
        BrokerConfig::default(),
        PortConfig::default(),
        factory.clone(),
    );
    perform_handshake(&mut fixture);
    fixture
        .engine
        .received(&client_channel_open(1))
        .expect("channel open");
    fixture
        .engine
        .send_connection_close(ErrorCode::InternalError, "boom", 0)
        .expect("close");

    fixture
        .engine
        .received(&client_method(1, 90, 10, |_| {}))
        .expect("late method");
    // The channel was torn down by the close; no method reached it.
    let log = factory.log(1).unwrap();
    assert!(log.lock().unwrap().methods.is_empty());
}

#[test]
fn forced_close_deregisters_the_virtual_host() {
    use crate::test_helpers::{FakeVirtualHost, FakeVirtualHostRegistry};

    let host = FakeVirtualHost::active("");
    let registrations = std::sync::Arc::clone(&host.registrations);
    let registry = FakeVirtualHostRegistry::default().with(host);

    let mut fixture = fixture();
    fixture.engine.vhosts = std::sync::Arc::new(registry);
    perform_handshake(&mut fixture);
    assert_eq!(registrations.load(std::sync::atomic::Ordering::Acquire), 1);

    fixture.engine.closed();
    assert_eq!(registrations.load(std::sync::atomic::Ordering::Acquire), 0);
}

#[test]
fn block_propagates_to_existing_and_future_channels() {
    let factory = ScriptedChannelFactory::default();
    let mut fixture = fixture_with_factory(
        BrokerConfig::default(),
        PortConfig::default(),
        factory.clone(),
    );
    perform_handshake(&mut fixture);
    fixture
        .engine
        .received(&client_channel_open(1))
        .expect("channel open");

    fixture.engine.block();
    assert!(factory.log(1).unwrap().lock().unwrap().blocked);

    // A channel born while blocked starts blocked.
    fixture
        .engine
        .received(&client_channel_open(2))
        .expect("channel open");
    assert!(factory.log(2).unwrap().lock().unwrap().blocked);

    fixture.engine.unblock();
    assert!(!factory.log(1).unwrap().lock().unwrap().blocked);
    assert!(!factory.log(2).unwrap().lock().unwrap().blocked);
}

#[test]
fn transport_block_notifies_channels_only_on_change() {
    let factory = ScriptedChannelFactory::default();
    let mut fixture = fixture_with_factory(
        BrokerConfig::default(),
        PortConfig::default(),
        factory.clone(),
    );
    perform_handshake(&mut fixture);
    fixture
        .engine
        .received(&client_channel_open(1))
        .expect("channel open");

    fixture.engine.set_transport_blocked_for_writing(true);
    fixture.engine.set_transport_blocked_for_writing(true);
    fixture.engine.set_transport_blocked_for_writing(false);

    let log = factory.log(1).unwrap();
    assert_eq!(log.lock().unwrap().transport_changes, 2);
}

#[test]
fn writer_idle_emits_a_heartbeat_frame() {
    let mut fixture = fixture();
    perform_handshake(&mut fixture);
    fixture.engine.writer_idle();

    let frames = fixture.sender.frames();
    assert_eq!(frames.len(), 1);
    assert_eq!(frames[0].frame_type, FrameType::Heartbeat);
    assert!(frames[0].payload.is_empty());
}

#[test]
fn reader_idle_closes_the_network() {
    let mut fixture = fixture();
    perform_handshake(&mut fixture);
    fixture.engine.reader_idle();
    assert!(fixture.network.is_closed());
}

#[test]
fn inbound_heartbeats_are_accepted_quietly() {
    let mut fixture = fixture();
    perform_handshake(&mut fixture);
    let heartbeat = crate::test_helpers::client_frame(&crate::frame::Frame::heartbeat());
    fixture.engine.received(&heartbeat).expect("heartbeat");
    assert!(fixture.sender.frames().is_empty());
}

#[test]
fn defer_flush_batches_output_until_explicit_flush() {
    let mut fixture = fixture();
    perform_handshake(&mut fixture);
    let flushes_before = fixture.sender.flushes();

    fixture.engine.set_defer_flush(true);
    fixture.engine.writer_idle();
    fixture.engine.writer_idle();
    assert_eq!(fixture.sender.flushes(), flushes_before);

    fixture.engine.handle().flush();
    assert_eq!(fixture.sender.flushes(), flushes_before + 1);
}

#[rstest]
#[case::qpid_matching_version("qpid", Some("0.28"), true)]
#[case::unknown_product("unknown", Some("0.28"), true)]
#[case::qpid_no_version("qpid java client", None, true)]
#[case::qpid_new_version("qpid", Some("6.0"), false)]
#[case::other_product("rabbit", Some("0.28"), false)]
fn legacy_client_detection_drives_queue_delete_ok(
    #[case] product: &str,
    #[case] version: Option<&str>,
    #[case] expected: bool,
) {
    let port = PortConfig {
        send_queue_delete_ok_regardless_client_ver_regexp: "0\\..*".to_owned(),
        ..PortConfig::default()
    };
    let mut fixture = fixture_with(BrokerConfig::default(), port);
    fixture
        .engine
        .received(b"AMQP\x00\x00\x09\x01")
        .expect("protocol header");

    let mut properties = FieldTable::new();
    properties.insert_string("product", product);
    if let Some(version) = version {
        properties.insert_string("version", version);
    }
    fixture
        .engine
        .received(&client_start_ok(&properties))
        .expect("start-ok");

    assert_eq!(
        fixture.engine.handle().send_queue_delete_ok_regardless(),
        expected
    );
}

#[test]
fn client_compression_property_enables_bridging() {
    let mut fixture = fixture();
    fixture
        .engine
        .received(b"AMQP\x00\x00\x09\x01")
        .expect("protocol header");
    let mut properties = FieldTable::new();
    properties.insert_string("qpid.message_compression_supported", "true");
    fixture
        .engine
        .received(&client_start_ok(&properties))
        .expect("start-ok");

    assert!(fixture.engine.handle().is_compression_supported());
}

#[test]
fn compression_property_is_ignored_when_broker_disables_it() {
    let broker = BrokerConfig {
        message_compression_enabled: false,
        ..BrokerConfig::default()
    };
    let mut fixture = fixture_with(broker, PortConfig::default());
    fixture
        .engine
        .received(b"AMQP\x00\x00\x09\x01")
        .expect("protocol header");
    let mut properties = FieldTable::new();
    properties.insert_string("qpid.message_compression_supported", "true");
    fixture
        .engine
        .received(&client_start_ok(&properties))
        .expect("start-ok");

    assert!(!fixture.engine.handle().is_compression_supported());
}

#[test]
fn process_pending_round_robins_channels_then_drains_tasks() {
    let factory = ScriptedChannelFactory::default().with_pending_budget(2);
    let mut fixture = fixture_with_factory(
        BrokerConfig::default(),
        PortConfig::default(),
        factory.clone(),
    );
    perform_handshake(&mut fixture);
    fixture
        .engine
        .received(&client_channel_open(1))
        .expect("channel open");
    fixture
        .engine
        .received(&client_channel_open(2))
        .expect("channel open");

    let ran = std::sync::Arc::new(std::sync::atomic::AtomicBool::new(false));
    {
        let ran = std::sync::Arc::clone(&ran);
        fixture.engine.handle().enqueue(move |_engine| {
            ran.store(true, std::sync::atomic::Ordering::Release);
        });
    }

    let mut pass = fixture.engine.begin_process_pending();
    let mut rounds = 0;
    while fixture.engine.process_next(&mut pass) {
        rounds += 1;
        assert!(rounds < 64, "pending pass should terminate");
    }

    // Two channels at two units each, plus the async task.
    assert_eq!(rounds, 5);
    assert_eq!(factory.log(1).unwrap().lock().unwrap().pending_runs, 2);
    assert_eq!(factory.log(2).unwrap().lock().unwrap().pending_runs, 2);
    assert!(ran.load(std::sync::atomic::Ordering::Acquire));
}

#[test]
fn process_pending_is_empty_off_the_io_thread() {
    let factory = ScriptedChannelFactory::default().with_pending_budget(1);
    let mut fixture = fixture_with_factory(
        BrokerConfig::default(),
        PortConfig::default(),
        factory.clone(),
    );
    perform_handshake(&mut fixture);
    fixture
        .engine
        .received(&client_channel_open(1))
        .expect("channel open");

    // On the I/O thread the pass sees the channel's pending work.
    let pass = fixture.engine.begin_process_pending();
    assert!(fixture.engine.has_pending(&pass));
    drop(pass);

    // Any other thread gets an empty pass.
    let engine = fixture.engine;
    std::thread::spawn(move || {
        let pass = engine.begin_process_pending();
        assert!(!engine.has_pending(&pass));
    })
    .join()
    .expect("off-thread check should succeed");
}

#[test]
fn work_notifier_is_level_triggered_and_calls_the_listener() {
    let fixture = fixture();
    let handle = fixture.engine.handle();

    let wakes = std::sync::Arc::new(std::sync::atomic::AtomicUsize::new(0));
    {
        let wakes = std::sync::Arc::clone(&wakes);
        handle.set_work_listener(move || {
            wakes.fetch_add(1, std::sync::atomic::Ordering::AcqRel);
        });
    }

    assert!(!handle.has_work());
    handle.notify_work();
    handle.notify_work();
    assert!(handle.has_work());
    assert_eq!(wakes.load(std::sync::atomic::Ordering::Acquire), 2);

    handle.clear_work();
    assert!(!handle.has_work());
}

#[test]
fn async_connection_close_runs_on_the_pending_pass() {
    let mut fixture = fixture();
    perform_handshake(&mut fixture);
    fixture.sender.clear();

    fixture
        .engine
        .handle()
        .send_connection_close_async(ErrorCode::ConnectionForced, "management close".to_owned());
    assert!(fixture.engine.handle().has_work());

    let mut pass = fixture.engine.begin_process_pending();
    while fixture.engine.process_next(&mut pass) {}

    let close = decode_connection_close(&fixture);
    assert_eq!(close.reply_code, ErrorCode::ConnectionForced.code());
    assert_eq!(close.reply_text.as_str(), "management close");
}
