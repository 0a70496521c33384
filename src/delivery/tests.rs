use bytes::Bytes;
use rstest::rstest;

use super::compression::{deflate_if_possible, inflate_if_possible};
use super::*;
use crate::config::{BrokerConfig, PortConfig};
use crate::frame::FrameType;
use crate::message::{BasicProperties, ContentHeaderBody, MessageMetadata, MessagePublishInfo};
use crate::test_helpers::{client_open, client_start_ok, client_tune_ok, fixture_with, EngineFixture};
use crate::wire::{FieldTable, ShortStr};

fn delivery_fixture(compression: bool, threshold: usize, frame_max: u32) -> EngineFixture {
    let port = PortConfig {
        message_compression_threshold: threshold,
        ..PortConfig::default()
    };
    let mut fixture = fixture_with(BrokerConfig::default(), port);
    fixture
        .engine
        .received(b"AMQP\x00\x00\x09\x01")
        .expect("protocol header");
    let mut properties = FieldTable::new();
    if compression {
        properties.insert_string("qpid.message_compression_supported", "true");
    }
    fixture
        .engine
        .received(&client_start_ok(&properties))
        .expect("start-ok");
    fixture
        .engine
        .received(&client_tune_ok(0, frame_max, 0))
        .expect("tune-ok");
    fixture.engine.received(&client_open("/")).expect("open");
    fixture.sender.clear();
    fixture
}

fn message(content: &[u8], encoding: Option<&str>) -> OutboundMessage {
    let properties = BasicProperties {
        content_encoding: encoding.map(|e| ShortStr::new(e).expect("encoding fits")),
        ..BasicProperties::default()
    };
    OutboundMessage {
        metadata: MessageMetadata::new(
            MessagePublishInfo {
                exchange: ShortStr::new("amq.direct").expect("literal"),
                routing_key: ShortStr::new("key").expect("literal"),
                mandatory: false,
                immediate: false,
            },
            ContentHeaderBody::new(properties, content.len() as u64),
            1_500_000_000_000,
        ),
        content: Bytes::copy_from_slice(content),
    }
}

fn decode_header(frame: &crate::frame::Frame) -> ContentHeaderBody {
    assert_eq!(frame.frame_type, FrameType::ContentHeader);
    let mut payload = frame.payload.clone();
    ContentHeaderBody::decode(&mut payload).expect("header should decode")
}

fn consumer() -> ShortStr {
    ShortStr::new("ctag-1").expect("literal")
}

#[test]
fn empty_body_is_a_method_header_pair() {
    let fixture = delivery_fixture(false, 100, 65536);
    let encoder = DeliveryEncoder::new(fixture.engine.handle());

    let written = encoder.write_deliver(
        &message(b"", None),
        DeliveryProperties::default(),
        1,
        7,
        &consumer(),
    );

    assert_eq!(written, 0);
    let frames = fixture.sender.frames();
    assert_eq!(frames.len(), 2);
    assert_eq!(frames[0].frame_type, FrameType::Method);
    assert_eq!(frames[1].frame_type, FrameType::ContentHeader);
}

#[rstest]
#[case::single_chunk(100, 1)]
#[case::exactly_one_frame(4088, 1)]
#[case::one_octet_over(4089, 2)]
#[case::many_chunks(10_000, 3)]
fn body_is_chunked_to_the_negotiated_frame_size(
    #[case] body_size: usize,
    #[case] expected_chunks: usize,
) {
    let fixture = delivery_fixture(false, usize::MAX, 4096);
    let encoder = DeliveryEncoder::new(fixture.engine.handle());
    let content = vec![0xAB_u8; body_size];

    let written = encoder.write_deliver(
        &message(&content, None),
        DeliveryProperties::default(),
        1,
        1,
        &consumer(),
    );
    assert_eq!(written, body_size as u64);

    let frames = fixture.sender.frames();
    let bodies: Vec<_> = frames
        .iter()
        .filter(|f| f.frame_type == FrameType::ContentBody)
        .collect();
    assert_eq!(bodies.len(), expected_chunks);
    // Every chunk fits the negotiated limit and the payload survives intact.
    let max_body = 4096 - crate::frame::FRAME_OVERHEAD;
    assert!(bodies.iter().all(|f| f.payload.len() <= max_body));
    let total: usize = bodies.iter().map(|f| f.payload.len()).sum();
    assert_eq!(total, body_size);
    let rebuilt: Vec<u8> = bodies.iter().flat_map(|f| f.payload.iter().copied()).collect();
    assert_eq!(rebuilt, content);

    // The leading frames stay method-then-header on the same channel.
    assert_eq!(frames[0].frame_type, FrameType::Method);
    assert_eq!(frames[1].frame_type, FrameType::ContentHeader);
    assert!(frames.iter().all(|f| f.channel == 1));
}

#[test]
fn gzip_content_is_inflated_for_clients_without_compression() {
    let fixture = delivery_fixture(false, 100, 65536);
    let encoder = DeliveryEncoder::new(fixture.engine.handle());

    let stored = deflate_if_possible(&Bytes::from_static(b"Hello")).expect("deflate");
    let written = encoder.write_deliver(
        &message(&stored, Some("gzip")),
        DeliveryProperties::default(),
        1,
        1,
        &consumer(),
    );

    let frames = fixture.sender.frames();
    let header = decode_header(&frames[1]);
    assert_eq!(header.properties.content_encoding, None);
    assert_eq!(header.body_size, 5);
    assert_eq!(written, 5);

    let body = frames
        .iter()
        .find(|f| f.frame_type == FrameType::ContentBody)
        .expect("body frame");
    assert_eq!(body.payload.as_ref(), b"Hello");
}

#[test]
fn large_plain_content_is_deflated_for_capable_clients() {
    let fixture = delivery_fixture(true, 10, 65536);
    let encoder = DeliveryEncoder::new(fixture.engine.handle());
    let content = b"a highly compressible payload ".repeat(64);

    let written = encoder.write_deliver(
        &message(&content, None),
        DeliveryProperties::default(),
        1,
        1,
        &consumer(),
    );

    let frames = fixture.sender.frames();
    let header = decode_header(&frames[1]);
    assert_eq!(
        header.properties.content_encoding.as_ref().map(ShortStr::as_str),
        Some("gzip")
    );
    assert!(header.body_size < content.len() as u64);
    assert_eq!(written, header.body_size);

    // Exactly one gzip layer: a single inflate restores the original.
    let body: Vec<u8> = frames
        .iter()
        .filter(|f| f.frame_type == FrameType::ContentBody)
        .flat_map(|f| f.payload.iter().copied())
        .collect();
    let inflated = inflate_if_possible(&Bytes::from(body)).expect("inflate");
    assert_eq!(inflated.as_ref(), content.as_slice());
}

#[test]
fn stored_gzip_is_never_compressed_twice() {
    let fixture = delivery_fixture(true, 10, 65536);
    let encoder = DeliveryEncoder::new(fixture.engine.handle());

    let stored = deflate_if_possible(&Bytes::from_static(b"Hello")).expect("deflate");
    encoder.write_deliver(
        &message(&stored, Some("gzip")),
        DeliveryProperties::default(),
        1,
        1,
        &consumer(),
    );

    let frames = fixture.sender.frames();
    let header = decode_header(&frames[1]);
    assert_eq!(
        header.properties.content_encoding.as_ref().map(ShortStr::as_str),
        Some("gzip")
    );
    let body: Vec<u8> = frames
        .iter()
        .filter(|f| f.frame_type == FrameType::ContentBody)
        .flat_map(|f| f.payload.iter().copied())
        .collect();
    // Sent exactly as stored.
    assert_eq!(body, stored.as_ref());
}

#[test]
fn content_below_the_threshold_travels_unchanged() {
    let fixture = delivery_fixture(true, 1_000, 65536);
    let encoder = DeliveryEncoder::new(fixture.engine.handle());

    encoder.write_deliver(
        &message(b"small", None),
        DeliveryProperties::default(),
        1,
        1,
        &consumer(),
    );

    let header = decode_header(&fixture.sender.frames()[1]);
    assert_eq!(header.properties.content_encoding, None);
}

#[test]
fn undecodable_gzip_content_is_sent_as_stored() {
    let fixture = delivery_fixture(false, 100, 65536);
    let encoder = DeliveryEncoder::new(fixture.engine.handle());

    // Claims gzip but is not.
    let written = encoder.write_deliver(
        &message(b"not actually gzip", Some("gzip")),
        DeliveryProperties::default(),
        1,
        1,
        &consumer(),
    );

    assert_eq!(written, 17);
    let frames = fixture.sender.frames();
    let header = decode_header(&frames[1]);
    assert_eq!(
        header.properties.content_encoding.as_ref().map(ShortStr::as_str),
        Some("gzip")
    );
    let body = frames
        .iter()
        .find(|f| f.frame_type == FrameType::ContentBody)
        .expect("body frame");
    assert_eq!(body.payload.as_ref(), b"not actually gzip");
}

#[test]
fn get_ok_and_return_carry_the_publish_facts() {
    let fixture = delivery_fixture(false, 100, 65536);
    let encoder = DeliveryEncoder::new(fixture.engine.handle());
    let msg = message(b"payload", None);

    encoder.write_get_ok(&msg, DeliveryProperties { redelivered: true }, 2, 9, 41);
    encoder.write_return(&msg, 2, 312, &ShortStr::new("NO_ROUTE").expect("literal"));

    let opcodes = fixture.sender.method_opcodes();
    assert_eq!(opcodes, vec![(60, 71), (60, 50)]);
}

#[test]
fn consumer_auto_close_confirm_writes_cancel_ok() {
    let fixture = delivery_fixture(false, 100, 65536);
    let encoder = DeliveryEncoder::new(fixture.engine.handle());

    encoder.confirm_consumer_auto_close(3, &consumer());
    assert_eq!(fixture.sender.method_opcodes(), vec![(60, 31)]);
    assert_eq!(fixture.sender.frames()[0].channel, 3);
}

#[test]
fn composite_delivery_reaches_the_sender_in_one_offer() {
    let fixture = delivery_fixture(false, 100, 65536);
    let encoder = DeliveryEncoder::new(fixture.engine.handle());

    encoder.write_deliver(
        &message(b"one buffer", None),
        DeliveryProperties::default(),
        1,
        1,
        &consumer(),
    );
    assert_eq!(fixture.sender.send_count(), 1);
}
