use async_binary_logger::protocol::{decode, encode, encoded_len, Arity, HeaderData, Value};
use async_binary_logger::{Bytes, DecodeError, FixedWidth, Hex, Literal, Loggable, Raw, Severity};

fn round_trip(header: HeaderData, fields: &[&dyn Loggable]) -> Vec<Value<'static>> {
    let len = encoded_len(&header, fields);
    let mut buf = vec![0u8; len];
    assert_eq!(encode(&mut buf, &header, fields), len);

    let buf: &'static [u8] = Box::leak(buf.into_boxed_slice());
    let (decoded, fields) = decode(buf).unwrap();
    assert_eq!(decoded.severity, header.severity);
    assert_eq!(decoded.arity, header.arity);
    assert_eq!(decoded.timestamp, header.timestamp);
    assert_eq!(decoded.length, len - header.size());
    fields.map(|f| f.unwrap().value).collect()
}

fn values(fields: &[&dyn Loggable]) -> Vec<Value<'static>> {
    round_trip(HeaderData::new(Severity::Notice, Arity::Format), fields)
}

#[test]
fn test_empty_entry() {
    let header = HeaderData::new(Severity::Debug, Arity::Empty);
    assert_eq!(encoded_len(&header, &[]), 4);
    assert!(round_trip(header, &[]).is_empty());
}

#[test]
fn test_integer_boundaries() {
    assert_eq!(
        values(&[&0u8, &u8::MAX, &0u16, &u16::MAX, &u32::MAX, &u64::MAX]),
        vec![
            Value::U8(0),
            Value::U8(u8::MAX),
            Value::U16(0),
            Value::U16(u16::MAX),
            Value::U32(u32::MAX),
            Value::U64(u64::MAX),
        ]
    );
    assert_eq!(
        values(&[&i8::MIN, &i8::MAX, &i16::MIN, &i32::MIN, &i64::MIN, &i64::MAX, &-1i64]),
        vec![
            Value::I8(i8::MIN),
            Value::I8(i8::MAX),
            Value::I16(i16::MIN),
            Value::I32(i32::MIN),
            Value::I64(i64::MIN),
            Value::I64(i64::MAX),
            Value::I64(-1),
        ]
    );
}

#[test]
fn test_float_specials() {
    let decoded = values(&[
        &0.0f32,
        &-0.0f64,
        &f32::INFINITY,
        &f64::NEG_INFINITY,
        &f32::MIN_POSITIVE,
        &f64::MAX,
        &f64::NAN,
    ]);
    assert_eq!(decoded[..6], [
        Value::F32(0.0),
        Value::F64(-0.0),
        Value::F32(f32::INFINITY),
        Value::F64(f64::NEG_INFINITY),
        Value::F32(f32::MIN_POSITIVE),
        Value::F64(f64::MAX),
    ]);
    assert!(matches!(decoded[1], Value::F64(v) if v.is_sign_negative()));
    assert!(matches!(decoded[6], Value::F64(v) if v.is_nan()));
}

#[test]
fn test_strings_and_bytes() {
    let long = "z".repeat(70_000);
    let decoded = values(&[&"", &"ascii", &"多字节", &Bytes(&[]), &Bytes(&[0, 255]), &long]);
    assert_eq!(decoded[..5], [
        Value::Str(""),
        Value::Str("ascii"),
        Value::Str("多字节"),
        Value::Bytes(&[]),
        Value::Bytes(&[0, 255]),
    ]);
    assert!(matches!(decoded[5], Value::Str(s) if s.len() == 70_000));
}

#[test]
fn test_literals_and_wrappers() {
    let literal = Literal::new("literal {} travels as id");
    let decoded = values(&[&literal, &true, &false, &Hex(0u8), &FixedWidth(9i32), &Raw(u64::MAX)]);
    assert_eq!(
        decoded,
        vec![
            Value::Literal("literal {} travels as id"),
            Value::Bool(true),
            Value::Bool(false),
            Value::U8(0),
            Value::I32(9),
            Value::Raw(u64::MAX),
        ]
    );
}

#[test]
fn test_presentation_survives() {
    let header = HeaderData::new(Severity::Error, Arity::Format);
    let fields: [&dyn Loggable; 3] = [&Hex(0xabu8), &FixedWidth(7u32), &FixedWidth(1.25f32)];
    let mut buf = vec![0u8; encoded_len(&header, &fields)];
    let n = encode(&mut buf, &header, &fields);

    let (_, fields) = decode(&buf[..n]).unwrap();
    let rendered: Vec<String> = fields.map(|f| f.unwrap().to_string()).collect();
    assert_eq!(rendered, vec!["0xab", "0000000007", "1.250000"]);
}

#[test]
fn test_timestamp_and_flags() {
    let header = HeaderData {
        severity: Severity::Critical,
        arity: Arity::Literal,
        overflow: true,
        timestamp: Some(u64::MAX),
    };
    let len = encoded_len(&header, &[&"x"]);
    let mut buf = vec![0u8; len];
    encode(&mut buf, &header, &[&"x"]);
    let (decoded, _) = decode(&buf).unwrap();
    assert!(decoded.overflow);
    assert_eq!(decoded.timestamp, Some(u64::MAX));
}

#[test]
fn test_encode_never_exceeds_buffer() {
    let header = HeaderData::new(Severity::Warning, Arity::Format);
    let fields: [&dyn Loggable; 2] = [&"0123456789", &42u64];
    let needed = encoded_len(&header, &fields);

    let mut buf = vec![0xAAu8; needed + 8];
    assert_eq!(encode(&mut buf[..needed - 1], &header, &fields), 0);
    assert!(buf[needed - 1..].iter().all(|b| *b == 0xAA));
    assert_eq!(encode(&mut buf, &header, &fields), needed);
}

#[test]
fn test_truncated_entry_is_reported() {
    let header = HeaderData::new(Severity::Notice, Arity::Format);
    let mut buf = vec![0u8; 64];
    let n = encode(&mut buf, &header, &[&"truncate me"]);

    // Cut inside the field area: the header claims more than is there.
    assert!(matches!(
        decode(&buf[..n - 3]),
        Err(DecodeError::Truncated { .. })
    ));
    // Trailing bytes past the entry are ignored.
    let (decoded, fields) = decode(&buf).unwrap();
    assert_eq!(decoded.length, n - 4);
    assert_eq!(fields.count(), 1);
}
