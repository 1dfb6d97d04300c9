//! Exercises the envelope + framing codecs together the way a real
//! unframing splitter -> decoder pipeline would: frame, verify, then
//! decode the unwrapped payload back into a message.

use heka_codec::{decode_message, encode_message, framing, Signer};
use heka_core::{Field, FieldValue, Message};

fn sample_message() -> Message {
    let mut m = Message::new();
    m.r#type = "LogstreamerInput".into();
    m.logger = "syslog".into();
    m.severity = 3;
    m.payload = "disk usage at 92%".into();
    m.hostname = "db-3".into();
    m.add_field(Field::new("disk_pct", vec![FieldValue::Float64(92.1)]).with_representation("pct"));
    m
}

#[test]
fn framed_and_signed_message_round_trips_through_both_codecs() {
    let message = sample_message();
    let encoded = encode_message(&message);

    let signer = Signer {
        name: "uplink".into(),
        key_version: 1,
        key: b"shared-secret".to_vec(),
    };
    let framed = framing::encode_frame(&encoded, Some(&signer)).unwrap();

    let (consumed, frame) = framing::parse_frame(&framed).unwrap().unwrap();
    assert_eq!(consumed, framed.len());

    let (payload, verified_signer) = framing::unframe(&frame, &[signer]).unwrap();
    assert_eq!(verified_signer, "uplink");

    let decoded = decode_message(&payload).unwrap();
    assert_eq!(decoded, message);
}

#[test]
fn two_frames_back_to_back_are_each_parsed_independently() {
    let a = encode_message(&sample_message());
    let mut second = sample_message();
    second.payload = "recovered".into();
    let b = encode_message(&second);

    let mut stream = framing::encode_frame(&a, None).unwrap();
    stream.extend_from_slice(&framing::encode_frame(&b, None).unwrap());

    let (consumed_a, frame_a) = framing::parse_frame(&stream).unwrap().unwrap();
    assert!(!frame_a.is_signed());
    assert_eq!(decode_message(&frame_a.payload).unwrap().payload, "disk usage at 92%");

    let (consumed_b, frame_b) = framing::parse_frame(&stream[consumed_a..]).unwrap().unwrap();
    assert_eq!(consumed_a + consumed_b, stream.len());
    assert_eq!(decode_message(&frame_b.payload).unwrap().payload, "recovered");
}
