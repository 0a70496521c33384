//! Outbound delivery scenarios, including gzip bridging.

use bytes::Bytes;
use ferrumq::delivery::compression::deflate_if_possible;
use ferrumq::delivery::{DeliveryEncoder, DeliveryProperties, OutboundMessage};
use ferrumq::frame::{FrameType, FRAME_OVERHEAD};
use ferrumq::message::{BasicProperties, ContentHeaderBody, MessageMetadata, MessagePublishInfo};
use ferrumq::test_helpers::{
    client_open,
    client_start_ok,
    client_tune_ok,
    fixture,
    EngineFixture,
};
use ferrumq::wire::{FieldTable, ShortStr};
use proptest::prelude::*;

fn open_fixture(frame_max: u32) -> EngineFixture {
    let mut fixture = fixture();
    fixture
        .engine
        .received(b"AMQP\x00\x00\x09\x01")
        .expect("protocol header");
    fixture
        .engine
        .received(&client_start_ok(&FieldTable::new()))
        .expect("start-ok");
    fixture
        .engine
        .received(&client_tune_ok(0, frame_max, 0))
        .expect("tune-ok");
    fixture.engine.received(&client_open("/")).expect("open");
    fixture.sender.clear();
    fixture
}

fn stored(content: &[u8], encoding: Option<&str>) -> OutboundMessage {
    let properties = BasicProperties {
        content_encoding: encoding.map(|e| ShortStr::new(e).expect("encoding")),
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
            0,
        ),
        content: Bytes::copy_from_slice(content),
    }
}

#[test]
fn gzip_bridging_delivers_plain_text_to_legacy_clients() {
    // The client did not advertise compression support; the stored
    // message is gzip("Hello").
    let fixture = open_fixture(65536);
    let encoder = DeliveryEncoder::new(fixture.engine.handle());
    let compressed = deflate_if_possible(&Bytes::from_static(b"Hello")).expect("deflate");

    encoder.write_deliver(
        &stored(&compressed, Some("gzip")),
        DeliveryProperties::default(),
        1,
        1,
        &ShortStr::new("ctag").expect("literal"),
    );

    let frames = fixture.sender.frames();
    assert_eq!(frames[0].frame_type, FrameType::Method);

    let mut header_payload = frames[1].payload.clone();
    let header = ContentHeaderBody::decode(&mut header_payload).expect("header");
    assert_eq!(header.properties.content_encoding, None);

    let body: Vec<u8> = frames
        .iter()
        .filter(|f| f.frame_type == FrameType::ContentBody)
        .flat_map(|f| f.payload.iter().copied())
        .collect();
    assert_eq!(body, b"Hello");
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(32))]

    // Chunking law: ceil(body / (frame_max - overhead)) frames whose
    // payloads sum to the body size.
    #[test]
    fn chunk_count_and_sizes_obey_the_law(
        body_size in 1_usize..40_000,
        frame_max in prop_oneof![Just(4096_u32), Just(8192), Just(65536)],
    ) {
        let fixture = open_fixture(frame_max);
        let encoder = DeliveryEncoder::new(fixture.engine.handle());
        let content = vec![0x42_u8; body_size];

        encoder.write_deliver(
            &stored(&content, None),
            DeliveryProperties::default(),
            1,
            1,
            &ShortStr::new("ctag").expect("literal"),
        );

        let max_body = frame_max as usize - FRAME_OVERHEAD;
        let bodies: Vec<_> = fixture
            .sender
            .frames()
            .into_iter()
            .filter(|f| f.frame_type == FrameType::ContentBody)
            .collect();
        prop_assert_eq!(bodies.len(), body_size.div_ceil(max_body));
        let total: usize = bodies.iter().map(|f| f.payload.len()).sum();
        prop_assert_eq!(total, body_size);
        prop_assert!(bodies.iter().all(|f| f.payload.len() <= max_body));
    }
}
