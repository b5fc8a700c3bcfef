//! Property tests: parse(serialize(frame)) gives the frame back.

use osmium_stomp::codec::serialize;
use osmium_stomp::parser::FrameParser;
use osmium_stomp::{Frame, ProtocolVersion};
use proptest::collection::{btree_map, vec};
use proptest::prelude::*;

fn command() -> impl Strategy<Value = &'static str> {
    prop_oneof![Just("SEND"), Just("MESSAGE"), Just("SUBSCRIBE"), Just("ERROR")]
}

fn frame(value: &'static str) -> impl Strategy<Value = Frame> {
    (
        command(),
        btree_map("x-[a-z]{1,8}", value, 0..6),
        proptest::option::of(vec(any::<u8>(), 0..64)),
    )
        .prop_map(|(cmd, headers, body)| {
            let mut f = Frame::new(cmd).with_headers(headers);
            f.body = body;
            f
        })
}

fn parse_one(version: ProtocolVersion, bytes: &[u8]) -> Frame {
    let mut parser = FrameParser::new(version);
    let mut frames = parser.feed(bytes).expect("parse");
    assert_eq!(frames.len(), 1);
    frames.remove(0)
}

fn assert_round_trip(version: ProtocolVersion, f: &Frame) {
    let wire = serialize(version, f);
    let back = parse_one(version, &wire);
    assert_eq!(back.command, f.command);
    assert_eq!(back.body, f.body);
    for (k, v) in f.headers.iter() {
        assert_eq!(back.get_header(k), Some(v));
    }
    if let Some(body) = &f.body {
        assert_eq!(back.content_length(), Some(body.len()));
    }
    // A second pass is stable.
    assert_eq!(serialize(version, &back), wire);
}

proptest! {
    #[test]
    fn round_trip_1_1(f in frame("[ -~\n\\\\:]{0,24}")) {
        assert_round_trip(ProtocolVersion::V1_1, &f);
    }

    #[test]
    fn round_trip_1_0(f in frame("[ -~]{0,24}")) {
        assert_round_trip(ProtocolVersion::V1_0, &f);
    }

    #[test]
    fn split_point_does_not_matter(f in frame("[ -~\n]{0,16}"), split in 0usize..512) {
        let wire = serialize(ProtocolVersion::V1_1, &f);
        let at = split % (wire.len() + 1);
        let mut parser = FrameParser::new(ProtocolVersion::V1_1);
        let mut frames = parser.feed(&wire[..at]).unwrap();
        frames.extend(parser.feed(&wire[at..]).unwrap());
        prop_assert_eq!(frames.len(), 1);
        prop_assert_eq!(&frames[0], &parse_one(ProtocolVersion::V1_1, &wire));
    }
}
