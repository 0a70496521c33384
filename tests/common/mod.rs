//! Helpers shared by the integration scenarios.
#![allow(dead_code)]

use ferrumq::frame::{FrameType, ProtocolVersion};
use ferrumq::methods::{ConnectionClose, MethodKind, MethodRegistry};
use ferrumq::test_helpers::EngineFixture;

/// Find the `Connection.Close` frame the engine wrote, if any.
#[must_use]
pub fn connection_close(fixture: &EngineFixture) -> Option<ConnectionClose> {
    let registry = MethodRegistry::new(ProtocolVersion::V0_9_1);
    fixture
        .sender
        .frames()
        .into_iter()
        .filter(|f| f.frame_type == FrameType::Method)
        .filter_map(|f| registry.decode(f.payload).ok())
        .find_map(|m| match m.kind {
            MethodKind::Connection(ferrumq::methods::ConnectionMethod::Close(body)) => Some(body),
            _ => None,
        })
}

/// Like [`connection_close`], but panics when no close was written.
#[must_use]
pub fn expect_connection_close(fixture: &EngineFixture) -> ConnectionClose {
    connection_close(fixture).expect("a Connection.Close frame should have been written")
}
