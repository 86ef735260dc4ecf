use bytes::BytesMut;
use proptest::prelude::*;
use serde::{Deserialize, Serialize};
use tavern_protocol::{
	Ack, ClientEvent, DEFAULT_MAX_FRAME_SIZE, Envelope, FramingError, ServerEvent, decode_frame, encode_frame,
	encode_frame_default, encode_frame_into, frame_len_from_payload_len, try_decode_frame_from_buffer,
};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct TestMsg {
	s: String,
	n: u32,
}

#[test]
fn encode_decode_roundtrip_slice() {
	let msg = TestMsg {
		s: "hello".to_string(),
		n: 42,
	};

	let frame = encode_frame(&msg, DEFAULT_MAX_FRAME_SIZE).expect("encode_frame");
	let (decoded, consumed) = decode_frame::<TestMsg>(&frame, DEFAULT_MAX_FRAME_SIZE).expect("decode_frame");

	assert_eq!(consumed, frame.len());
	assert_eq!(decoded, msg);
}

#[test]
fn encode_frame_default_matches_explicit_default_limit() {
	let msg = TestMsg {
		s: "abc".to_string(),
		n: 7,
	};

	let a = encode_frame_default(&msg).expect("encode_frame_default");
	let b = encode_frame(&msg, DEFAULT_MAX_FRAME_SIZE).expect("encode_frame");

	assert_eq!(a, b);
}

#[test]
fn encode_frame_into_appends_prefix_and_payload() {
	let msg = TestMsg {
		s: "x".to_string(),
		n: 1,
	};

	let mut buf = BytesMut::new();
	encode_frame_into(&mut buf, &msg, DEFAULT_MAX_FRAME_SIZE).expect("encode_frame_into");

	let payload_len = u32::from_be_bytes([buf[0], buf[1], buf[2], buf[3]]) as usize;
	assert_eq!(buf.len(), frame_len_from_payload_len(payload_len));
}

#[test]
fn envelope_roundtrip_through_frame() {
	let env = Envelope {
		version: 1,
		request_id: "req-7".to_string(),
		event: ClientEvent::SendMessage {
			room_id: tavern_domain::RoomId(3),
			content: "bonjour".to_string(),
		},
	};

	let frame = encode_frame_default(&env).expect("encode");
	let (decoded, _) = decode_frame::<Envelope<ClientEvent>>(&frame, DEFAULT_MAX_FRAME_SIZE).expect("decode");
	assert_eq!(decoded, env);
}

#[test]
fn ack_envelope_keeps_request_id() {
	let env = Envelope {
		version: 1,
		request_id: "req-9".to_string(),
		event: ServerEvent::Ack(Ack::error("must be administrator")),
	};

	let frame = encode_frame_default(&env).expect("encode");
	let (decoded, _) = decode_frame::<Envelope<ServerEvent>>(&frame, DEFAULT_MAX_FRAME_SIZE).expect("decode");
	assert_eq!(decoded.request_id, "req-9");
	assert_eq!(decoded.event, ServerEvent::Ack(Ack::error("must be administrator")));
}

#[test]
fn decode_rejects_oversized_length_prefix() {
	let mut frame = Vec::new();
	frame.extend_from_slice(&((DEFAULT_MAX_FRAME_SIZE as u32) + 1).to_be_bytes());
	frame.extend_from_slice(b"{}");

	let err = decode_frame::<TestMsg>(&frame, DEFAULT_MAX_FRAME_SIZE).unwrap_err();
	match err {
		FramingError::FrameTooLarge { .. } => {}
		other => panic!("unexpected error: {other:?}"),
	}
}

proptest! {
	/// Arbitrary junk never panics the incremental decoder; it either
	/// yields a frame, asks for more bytes, or reports an error.
	#[test]
	fn try_decode_never_panics_on_junk(bytes in proptest::collection::vec(any::<u8>(), 0..512)) {
		let mut buf = BytesMut::from(&bytes[..]);
		let _ = try_decode_frame_from_buffer::<TestMsg>(&mut buf, 256);
	}

	#[test]
	fn roundtrip_survives_any_content(s in ".{0,200}", n in any::<u32>()) {
		let msg = TestMsg { s, n };
		let frame = encode_frame_default(&msg).expect("encode");
		let (decoded, consumed) = decode_frame::<TestMsg>(&frame, DEFAULT_MAX_FRAME_SIZE).expect("decode");
		prop_assert_eq!(consumed, frame.len());
		prop_assert_eq!(decoded, msg);
	}
}
