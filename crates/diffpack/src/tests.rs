use crate::*;

fn encode(value: &Value) -> Vec<u8> {
    let mut enc = Encoder::new();
    encode_value(&mut enc, value).expect("encode");
    enc.into_bytes().expect("scopes closed")
}

fn decode(bytes: &[u8]) -> Value {
    let mut dec = Decoder::new(bytes);
    let value = decode_value(&mut dec).expect("decode");
    assert_eq!(dec.remaining(), 0);
    value
}

// ============================================================================
//  SCALARS AND BLOBS
// ============================================================================

#[test]
fn test_scalar_sequence() -> Result<()> {
    let mut enc = Encoder::new();
    enc.bool(true)?;
    enc.i8(-128)?;
    enc.i16(i16::MAX)?;
    enc.i32(-7)?;
    enc.i64(i64::MIN)?;
    enc.u64(u64::MAX)?;
    enc.f64(1.5)?;
    enc.char('é')?;
    enc.str("hello")?;
    enc.bytes(&[1, 2, 3])?;

    let bytes = enc.into_bytes()?;
    let mut dec = Decoder::new(&bytes);
    assert!(dec.bool()?);
    assert_eq!(dec.i8()?, -128);
    assert_eq!(dec.i16()?, i16::MAX);
    assert_eq!(dec.i32()?, -7);
    assert_eq!(dec.i64()?, i64::MIN);
    assert_eq!(dec.u64()?, u64::MAX);
    assert_eq!(dec.f64()?, 1.5);
    assert_eq!(dec.char()?, 'é');
    assert_eq!(dec.str()?, "hello");
    assert_eq!(dec.bytes()?, &[1, 2, 3]);
    assert_eq!(dec.remaining(), 0);
    Ok(())
}

#[test]
fn test_wrong_tag_is_reported() -> Result<()> {
    let mut enc = Encoder::new();
    enc.i32(1)?;
    let bytes = enc.into_bytes()?;

    let err = Decoder::new(&bytes).i64().unwrap_err();
    assert_eq!(err, Error::UnexpectedTag { expected: Tag::I64, found: Tag::I32 });
    Ok(())
}

#[test]
fn test_truncated_input() {
    let mut enc = Encoder::new();
    enc.str("truncated").unwrap();
    let bytes = enc.into_bytes().unwrap();

    let err = Decoder::new(&bytes[..bytes.len() - 2]).str().unwrap_err();
    assert_eq!(err, Error::UnexpectedEnd);
}

#[test]
fn test_invalid_tag_byte() {
    let err = Decoder::new(&[0xEE]).peek_tag().unwrap_err();
    assert_eq!(err, Error::InvalidTag(0xEE));
}

// ============================================================================
//  SCOPE DISCIPLINE
// ============================================================================

#[test]
fn test_map_rejects_bare_items() {
    let mut enc = Encoder::new();
    enc.map_begin().unwrap();
    assert_eq!(enc.i32(1).unwrap_err(), Error::InvalidMapEntry);
}

#[test]
fn test_entry_takes_exactly_one_item() {
    let mut enc = Encoder::new();
    enc.entry_begin("k").unwrap();
    assert_eq!(enc.entry_end().unwrap_err(), Error::EmptyEntry);

    enc.i32(1).unwrap();
    assert_eq!(enc.i32(2).unwrap_err(), Error::TooManyItems);
    enc.entry_end().unwrap();
    enc.into_bytes().unwrap();
}

#[test]
fn test_unclosed_scope_cannot_finish() {
    let mut enc = Encoder::new();
    enc.list_begin().unwrap();
    assert_eq!(enc.into_bytes().unwrap_err(), Error::ScopeStillOpen);
}

#[test]
fn test_mismatched_close() {
    let mut enc = Encoder::new();
    enc.list_begin().unwrap();
    assert_eq!(
        enc.map_end().unwrap_err(),
        Error::ScopeMismatch { expected: Scope::Map, actual: Scope::List }
    );
    assert_eq!(Encoder::new().list_end().unwrap_err(), Error::ScopeUnderflow);
}

#[test]
fn test_unknown_map_entries_can_be_skipped() -> Result<()> {
    let mut enc = Encoder::new();
    enc.map_begin()?;
    enc.entry_begin("extra")?;
    enc.list_begin()?;
    enc.str("ignored")?;
    enc.list_end()?;
    enc.entry_end()?;
    enc.entry_begin("seq")?;
    enc.u64(9)?;
    enc.entry_end()?;
    enc.map_end()?;
    let bytes = enc.into_bytes()?;

    let mut map = Decoder::new(&bytes).map()?;
    let mut seq = None;
    while let Some((key, mut val)) = map.next()? {
        match key {
            "seq" => seq = Some(val.u64()?),
            _ => val.skip()?,
        }
    }
    assert_eq!(seq, Some(9));
    Ok(())
}

// ============================================================================
//  VALUES
// ============================================================================

#[test]
fn test_object_with_nested_array() {
    let value = Value::Object(
        Object::new("com.example.Order")
            .with("id", 42i64)
            .with("note", Value::Null)
            .with("lines", Array::new("java.lang.String", vec!["a".into(), "b".into()])),
    );

    let decoded = decode(&encode(&value));
    assert_eq!(decoded, value);

    let order = decoded.as_object().unwrap();
    assert_eq!(order.field("id"), Some(&Value::Long(42)));
    assert_eq!(order.field("missing"), None);
}

#[test]
fn test_type_names_follow_jvm_naming() {
    assert_eq!(Value::Int(1).type_name().as_deref(), Some("int"));
    assert_eq!(Value::from("x").type_name().as_deref(), Some("java.lang.String"));
    assert_eq!(Value::Null.type_name(), None);

    let ints = Value::Array(Array::new("int", vec![]));
    assert_eq!(ints.type_name().as_deref(), Some("[I"));

    let strings = Array::new("java.lang.String", vec![]);
    assert_eq!(strings.type_name(), "[Ljava.lang.String;");

    let grid = Array::new("[I", vec![]);
    assert_eq!(grid.type_name(), "[[I");
}

#[test]
fn test_set_replaces_existing_field() {
    let mut bean = Object::new("Bean").with("a", "x");
    bean.set("a", "y");
    assert_eq!(bean.fields.len(), 1);
    assert_eq!(bean.field("a"), Some(&Value::from("y")));
}

#[test]
fn test_recursion_limit() {
    let mut value = Value::Int(0);
    for _ in 0..(value::MAX_DEPTH + 2) {
        value = Value::Array(Array::new("java.lang.Object", vec![value]));
    }

    let mut enc = Encoder::new();
    assert_eq!(encode_value(&mut enc, &value).unwrap_err(), Error::RecursionLimitExceeded);
}

#[test]
fn test_json_shape_is_tagged() {
    let json = serde_json::to_string(&Value::Int(3)).unwrap();
    assert_eq!(json, r#"{"type":"Int","value":3}"#);
    let back: Value = serde_json::from_str(&json).unwrap();
    assert_eq!(back, Value::Int(3));
}

#[test]
fn test_json_keeps_non_finite_floats() {
    let json = serde_json::to_string(&Value::Double(f64::NEG_INFINITY)).unwrap();
    assert_eq!(json, r#"{"type":"Double","value":"-Infinity"}"#);
    assert_eq!(serde_json::from_str::<Value>(&json).unwrap(), Value::Double(f64::NEG_INFINITY));

    let back: Value = serde_json::from_str(r#"{"type":"Float","value":"NaN"}"#).unwrap();
    assert!(matches!(back, Value::Float(v) if v.is_nan()));
    assert!(serde_json::from_str::<Value>(r#"{"type":"Double","value":"lots"}"#).is_err());
}
