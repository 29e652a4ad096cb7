//! Atom, message and bundle codec tests

use oscine_core::codec::{decode_arguments, encode_atom, Reader};
use oscine_core::{
    type_tag_string, Atom, Bundle, CodecError, Color, DecodeConfig, Message, Midi, Packet,
    ParseError, Timestamp, DEFAULT_MAX_ARRAY_DEPTH,
};
use bytes::BytesMut;

fn every_atom_kind() -> Vec<Atom> {
    vec![
        Atom::Int(-7),
        Atom::Long(i64::MIN),
        Atom::Float(0.25),
        Atom::Double(-1e300),
        Atom::from("hello"),
        Atom::from(""),
        Atom::Symbol("sym".to_string()),
        Atom::Blob(vec![]),
        Atom::Blob(vec![1, 2, 3]),
        Atom::Char('λ'),
        Atom::Color(Color::new(255, 128, 0, 64)),
        Atom::Midi(Midi::new(0, 0x90, 60, 127)),
        Atom::Time(Timestamp::new(3_900_000_000, 12345)),
        Atom::Time(Timestamp::IMMEDIATE),
        Atom::Bool(true),
        Atom::Bool(false),
        Atom::Nil,
        Atom::Infinitum,
        Atom::Array(vec![]),
        Atom::Array(vec![Atom::Int(1), Atom::Array(vec![Atom::from("nested")])]),
    ]
}

#[test]
fn test_every_atom_survives_a_message() {
    let args = every_atom_kind();
    let msg = Message::new("/all/types", args.clone()).unwrap();
    let encoded = msg.encode().expect("encode failed");
    assert_eq!(encoded.len() % 4, 0);
    assert_eq!(encoded.len(), msg.encoded_len());

    let decoded = Message::decode(&encoded).expect("decode failed");
    assert_eq!(decoded.args(), &args[..]);
}

#[test]
fn test_type_tag_string_for_every_kind() {
    assert_eq!(
        type_tag_string(&every_atom_kind()),
        ",ihfdsssbbcrmttTFNI[][i[s]]"
    );
}

#[test]
fn test_padded_content_is_prefix() {
    for text in ["", "a", "ab", "abc", "abcd", "abcde"] {
        let mut buf = BytesMut::new();
        encode_atom(&mut buf, &Atom::from(text)).unwrap();
        assert_eq!(buf.len() % 4, 0);
        assert!(buf.len() > text.len());
        assert!(buf.starts_with(text.as_bytes()));
        assert!(buf[text.len()..].iter().all(|&b| b == 0));
    }

    for len in 0..9 {
        let data: Vec<u8> = (1..=len as u8).collect();
        let mut buf = BytesMut::new();
        encode_atom(&mut buf, &Atom::Blob(data.clone())).unwrap();
        assert_eq!((buf.len() - 4) % 4, 0);
        assert_eq!(&buf[4..4 + len], &data[..]);
    }
}

#[test]
fn test_big_endian_numbers() {
    let mut buf = BytesMut::new();
    encode_atom(&mut buf, &Atom::Int(0x0102_0304)).unwrap();
    encode_atom(&mut buf, &Atom::Long(0x0102_0304_0506_0708)).unwrap();
    assert_eq!(&buf[..], &[1, 2, 3, 4, 1, 2, 3, 4, 5, 6, 7, 8]);
}

#[test]
fn test_blob_truncated() {
    // length word says 8, only 4 bytes follow
    let mut bytes = 8i32.to_be_bytes().to_vec();
    bytes.extend_from_slice(&[1, 2, 3, 4]);
    let mut reader = Reader::new(&bytes);
    let err = decode_arguments(&mut reader, "b", 0, DEFAULT_MAX_ARRAY_DEPTH).unwrap_err();
    assert!(matches!(err, CodecError::Truncated { what: "blob", .. }));
}

#[test]
fn test_blob_missing_padding() {
    let mut bytes = 3i32.to_be_bytes().to_vec();
    bytes.extend_from_slice(&[1, 2, 3]);
    let mut reader = Reader::new(&bytes);
    let err = decode_arguments(&mut reader, "b", 0, DEFAULT_MAX_ARRAY_DEPTH).unwrap_err();
    assert!(matches!(err, CodecError::Misaligned { what: "blob", .. }));
}

#[test]
fn test_unknown_tag_reports_offset() {
    // "/a\0\0" ",x\0\0"
    let err = Message::decode(b"/a\0\0,x\0\0").unwrap_err();
    assert_eq!(
        err,
        ParseError::Codec(CodecError::UnknownTypeTag { tag: 'x', offset: 5 })
    );
}

#[test]
fn test_bundle_of_everything_roundtrip() {
    let packet: Packet = Bundle::builder(Timestamp::new(3_800_000_000, 1 << 31))
        .message(Message::new("/a", every_atom_kind()).unwrap())
        .bundle(
            Bundle::builder(Timestamp::IMMEDIATE)
                .message(Message::new("/b", vec![]).unwrap())
                .bundle(Bundle::immediate())
                .build(),
        )
        .build()
        .into();

    let bytes = packet.encode().unwrap();
    assert_eq!(&bytes[..8], b"#bundle\0");
    assert_eq!(Packet::decode(&bytes).unwrap(), packet);
}

#[test]
fn test_crafted_deep_nesting_is_rejected() {
    // 10,000 nested bundle headers; each claims the rest of the buffer
    let levels = 10_000usize;
    let mut bytes = Vec::with_capacity(levels * 20);
    for level in 0..levels {
        bytes.extend_from_slice(b"#bundle\0");
        bytes.extend_from_slice(&[0, 0, 0, 0, 0, 0, 0, 1]);
        if level + 1 < levels {
            let remaining = (levels - level - 1) * 20 - 4;
            bytes.extend_from_slice(&(remaining as u32).to_be_bytes());
        }
    }

    assert_eq!(
        Packet::decode(&bytes).unwrap_err(),
        ParseError::DepthExceeded { limit: 64 }
    );
}

fn deeply_nested_array_message(levels: usize) -> Vec<u8> {
    let mut bytes = b"/a\0\0,".to_vec();
    bytes.extend(std::iter::repeat(b'[').take(levels));
    bytes.extend(std::iter::repeat(b']').take(levels));
    bytes.push(0);
    while bytes.len() % 4 != 0 {
        bytes.push(0);
    }
    bytes
}

#[test]
fn test_crafted_deep_arrays_are_rejected() {
    let bytes = deeply_nested_array_message(32_700);

    // first '[' sits right after the ',' at offset 4
    assert_eq!(
        Packet::decode(&bytes).unwrap_err(),
        ParseError::Codec(CodecError::ArrayTooDeep {
            limit: DEFAULT_MAX_ARRAY_DEPTH,
            offset: 5 + DEFAULT_MAX_ARRAY_DEPTH,
        })
    );

    let unbounded = DecodeConfig {
        max_array_depth: usize::MAX,
        ..Default::default()
    };
    assert!(matches!(
        Packet::decode_with(&bytes, &unbounded).unwrap_err(),
        ParseError::Codec(CodecError::ArrayTooDeep { limit: 256, .. })
    ));
}

#[test]
fn test_arrays_within_limit_decode() {
    let bytes = deeply_nested_array_message(DEFAULT_MAX_ARRAY_DEPTH);
    let message = Message::decode(&bytes).unwrap();

    let mut depth = 0;
    let mut current = message.args();
    while let [Atom::Array(inner)] = current {
        depth += 1;
        current = inner;
    }
    assert_eq!(depth, DEFAULT_MAX_ARRAY_DEPTH);
    assert!(current.is_empty());
}
