#![allow(missing_docs)]

use gravec::{registry, ClassSpec, Gravec, GravecError, ObjectDecoder, ObjectEncoder, Value};

const REC_FINGERPRINT: u64 = 0x0102_0304_0506_0708;

fn rec_class() -> std::sync::Arc<gravec::registry::RuntimeClass> {
    registry::register(
        ClassSpec::new("wire.Rec")
            .fingerprint(REC_FINGERPRINT)
            .field_int("x")
            .field_string("name"),
    )
    .unwrap()
}

fn rec_instance(x: i32, name: &str) -> Value {
    let mut inst = rec_class().new_instance();
    inst.set("x", Value::Int(x)).unwrap();
    inst.set("name", Value::string(name)).unwrap();
    Value::object(inst)
}

/// The full expected stream for `{x: 42, name: "abc"}`.
fn expected_rec_stream() -> Vec<u8> {
    let mut b = Vec::new();
    b.extend_from_slice(&[0xAC, 0xED, 0x00, 0x05]); // header
    b.push(0x73); // OBJECT
    b.push(0x72); // CLASSDESC
    b.extend_from_slice(&[0x00, 0x08]);
    b.extend_from_slice(b"wire.Rec");
    b.extend_from_slice(&REC_FINGERPRINT.to_be_bytes());
    b.push(0x02); // flags: default field encoding
    b.extend_from_slice(&[0x00, 0x02]); // two fields, primitives first
    b.push(b'I');
    b.extend_from_slice(&[0x00, 0x01]);
    b.push(b'x');
    b.push(b'L');
    b.extend_from_slice(&[0x00, 0x04]);
    b.extend_from_slice(b"name");
    b.push(0x74); // type name travels as a string record
    b.extend_from_slice(&[0x00, 0x08]);
    b.extend_from_slice(b"Lstring;");
    b.push(0x78); // ENDBLOCKDATA closes the annotation region
    b.push(0x70); // no superclass
    b.extend_from_slice(&[0x00, 0x00, 0x00, 0x2A]); // x = 42
    b.push(0x74); // STRING
    b.extend_from_slice(&[0x00, 0x03]);
    b.extend_from_slice(b"abc");
    b
}

#[test]
fn two_field_composite_has_exact_wire_bytes() {
    let bytes = Gravec::to_bytes(&rec_instance(42, "abc")).unwrap();
    assert_eq!(bytes, expected_rec_stream());
}

#[test]
fn exact_wire_bytes_decode_back() {
    rec_class();
    let back = Gravec::from_bytes(&expected_rec_stream()).unwrap();
    let Value::Object(obj) = back else {
        panic!("expected an object");
    };
    let obj = obj.borrow();
    assert!(matches!(obj.get("x").unwrap(), Value::Int(42)));
    assert!(matches!(obj.get("name").unwrap(), Value::Str(s) if &*s == "abc"));
}

#[test]
fn field_data_is_read_in_the_wire_descriptor_layout() {
    const EVOLVED_FINGERPRINT: u64 = 0x00DE_FACE_D00D_0001;
    // The local class knows only `a`; the stream came from a peer
    // whose revision also carries `b` and `note` under the same pinned
    // fingerprint. The extra fields must be parsed per the wire layout
    // and dropped, not misread into local slots.
    registry::register(
        ClassSpec::new("wire.Evolved")
            .fingerprint(EVOLVED_FINGERPRINT)
            .field_int("a"),
    )
    .unwrap();

    let mut bytes = vec![0xAC, 0xED, 0x00, 0x05];
    bytes.push(0x73); // OBJECT
    bytes.push(0x72); // CLASSDESC
    bytes.extend_from_slice(&[0x00, 0x0C]);
    bytes.extend_from_slice(b"wire.Evolved");
    bytes.extend_from_slice(&EVOLVED_FINGERPRINT.to_be_bytes());
    bytes.push(0x02); // flags: default field encoding
    bytes.extend_from_slice(&[0x00, 0x03]); // three fields on the wire
    bytes.push(b'I');
    bytes.extend_from_slice(&[0x00, 0x01, b'a']);
    bytes.push(b'I');
    bytes.extend_from_slice(&[0x00, 0x01, b'b']);
    bytes.push(b'L');
    bytes.extend_from_slice(&[0x00, 0x04]);
    bytes.extend_from_slice(b"note");
    bytes.push(0x74);
    bytes.extend_from_slice(&[0x00, 0x08]);
    bytes.extend_from_slice(b"Lstring;");
    bytes.push(0x78); // ENDBLOCKDATA closes the annotation region
    bytes.push(0x70); // no superclass
    bytes.extend_from_slice(&[0x00, 0x00, 0x00, 0x07]); // a = 7
    bytes.extend_from_slice(&[0x00, 0x00, 0x00, 0x63]); // b = 99, unknown locally
    bytes.push(0x74); // note = "hi", unknown locally
    bytes.extend_from_slice(&[0x00, 0x02]);
    bytes.extend_from_slice(b"hi");

    let back = Gravec::from_bytes(&bytes).unwrap();
    let Value::Object(obj) = back else {
        panic!("expected an object");
    };
    let obj = obj.borrow();
    assert!(matches!(obj.get("a").unwrap(), Value::Int(7)));
    assert!(obj.get("b").is_err());
}

#[test]
fn bad_magic_is_rejected() {
    let err = Gravec::from_bytes(&[0xCA, 0xFE, 0x00, 0x05]).unwrap_err();
    assert!(matches!(err, GravecError::StreamCorrupted(_)));
}

#[test]
fn wrong_version_is_rejected() {
    let err = Gravec::from_bytes(&[0xAC, 0xED, 0x00, 0x09]).unwrap_err();
    assert!(matches!(err, GravecError::StreamCorrupted(_)));
}

#[test]
fn unknown_marker_is_stream_corruption() {
    let err = Gravec::from_bytes(&[0xAC, 0xED, 0x00, 0x05, 0x6F]).unwrap_err();
    assert!(matches!(err, GravecError::StreamCorrupted(_)));
}

#[test]
fn back_reference_to_unknown_handle_is_stream_corruption() {
    let mut bytes = vec![0xAC, 0xED, 0x00, 0x05, 0x71];
    bytes.extend_from_slice(&0x007E_0000u32.to_be_bytes());
    let err = Gravec::from_bytes(&bytes).unwrap_err();
    assert!(matches!(err, GravecError::StreamCorrupted(_)));
}

#[test]
fn fingerprint_mismatch_is_invalid_class() {
    rec_class();
    let mut bytes = expected_rec_stream();
    // Header (4) + OBJECT + CLASSDESC + length-prefixed name (10) puts
    // the fingerprint at offset 16.
    bytes[20] ^= 0xFF;
    let err = Gravec::from_bytes(&bytes).unwrap_err();
    assert!(matches!(err, GravecError::InvalidClass(_)));
}

#[test]
fn unknown_class_name_is_class_not_found() {
    rec_class();
    let mut bytes = expected_rec_stream();
    // Last byte of the class name.
    bytes[15] = b'x';
    let err = Gravec::from_bytes(&bytes).unwrap_err();
    assert!(matches!(err, GravecError::ClassNotFound(_)));
}

#[test]
fn truncated_stream_is_an_error() {
    rec_class();
    let bytes = expected_rec_stream();
    assert!(Gravec::from_bytes(&bytes[..bytes.len() - 2]).is_err());
}

#[test]
fn reset_reassigns_handles() {
    let node = rec_instance(1, "n");
    let mut encoder = ObjectEncoder::new(Vec::new()).unwrap();
    encoder.encode(&node).unwrap();
    encoder.reset().unwrap();
    encoder.encode(&node).unwrap();
    let bytes = encoder.into_inner().unwrap();

    let mut decoder = ObjectDecoder::new(bytes.as_slice()).unwrap();
    let first = decoder.decode().unwrap();
    let second = decoder.decode().unwrap();
    assert!(
        !first.identity_eq(&second),
        "a reset must force a full re-encode, not a back-reference"
    );
}

#[test]
fn without_reset_a_reencode_collapses_to_a_back_reference() {
    let node = rec_instance(2, "m");
    let mut encoder = ObjectEncoder::new(Vec::new()).unwrap();
    encoder.encode(&node).unwrap();
    let full_len = {
        let mut probe = ObjectEncoder::new(Vec::new()).unwrap();
        probe.encode(&node).unwrap();
        probe.into_inner().unwrap().len()
    };
    encoder.encode(&node).unwrap();
    let bytes = encoder.into_inner().unwrap();
    // Marker byte plus a 4-byte handle.
    assert_eq!(bytes.len(), full_len + 5);

    let mut decoder = ObjectDecoder::new(bytes.as_slice()).unwrap();
    let first = decoder.decode().unwrap();
    let second = decoder.decode().unwrap();
    assert!(first.identity_eq(&second));
}

#[test]
fn embedded_nul_travels_as_modified_utf() {
    let class = registry::register(
        ClassSpec::new("wire.NulHolder").field_string("text"),
    )
    .unwrap();
    let mut inst = class.new_instance();
    inst.set("text", Value::string("a\0b")).unwrap();

    let bytes = Gravec::to_bytes(&Value::object(inst)).unwrap();
    // The NUL must appear as the two-byte sequence C0 80, never as a
    // literal zero inside the string payload.
    let payload = bytes
        .windows(2)
        .any(|w| w == [0xC0, 0x80]);
    assert!(payload);

    let back = Gravec::from_bytes(&bytes).unwrap();
    let Value::Object(obj) = back else {
        panic!("expected an object");
    };
    assert!(matches!(obj.borrow().get("text").unwrap(), Value::Str(s) if &*s == "a\0b"));
}
