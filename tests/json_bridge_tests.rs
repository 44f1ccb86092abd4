//! Streaming JSON Bridge Boundary Tests
//!
//! Payload, array, and nesting limits enforced through the engine's
//! configured limits, plus tolerant-read and union-encoding behavior.

use constellation::ast::builders::*;
use constellation::cvalue::{decode_json, CType, CValue, JsonBridgeError, JsonLimits};
use constellation::{Engine, EngineConfig};

#[test]
fn engine_decodes_inputs_against_declared_types() -> anyhow::Result<()> {
    let engine = Engine::with_defaults(EngineConfig::default());
    let program = program()
        .input(
            "user",
            record_ty([("name", named("String")), ("age", named("Int"))]),
        )
        .output("user")
        .build();
    let image = engine
        .compile(&program)
        .map_err(|errors| anyhow::anyhow!("compile failed: {errors:?}"))?;

    let decoded =
        engine.decode_json_input(&image, "user", br#"{"name": "ada", "age": 36, "extra": true}"#)?;
    assert_eq!(decoded.field("name"), Some(&CValue::CString("ada".into())));
    assert_eq!(decoded.field("age"), Some(&CValue::CInt(36)));
    // Unknown fields are skipped
    assert_eq!(decoded.field("extra"), None);

    let unknown = engine.decode_json_input(&image, "ghost", b"1");
    assert!(unknown.is_err());
    Ok(())
}

#[test]
fn engine_limits_come_from_config() {
    let mut config = EngineConfig::default();
    config.json.max_payload_bytes = 8;
    let engine = Engine::with_defaults(config);
    let program = program()
        .input("xs", list_ty(named("Int")))
        .output("xs")
        .build();
    let image = engine.compile(&program).expect("compile");

    let err = engine
        .decode_json_input(&image, "xs", b"[1,2,3,4,5,6]")
        .expect_err("payload too large");
    assert!(matches!(err, JsonBridgeError::PayloadTooLarge { .. }));
}

#[test]
fn distinct_error_kinds_for_each_limit() {
    let limits = JsonLimits {
        max_payload_bytes: 1024,
        max_array_elements: 2,
        max_nesting_depth: 2,
    };

    let array_err = decode_json(b"[1,2,3]", &CType::list(CType::Int), &limits)
        .expect_err("array limit");
    assert_eq!(array_err, JsonBridgeError::ArrayLimitExceeded { limit: 2 });

    let nested_ty = CType::list(CType::list(CType::list(CType::Int)));
    let nesting_err = decode_json(b"[[[1]]]", &nested_ty, &limits).expect_err("nesting limit");
    assert_eq!(nesting_err, JsonBridgeError::NestingLimitExceeded { limit: 2 });

    let tight = JsonLimits {
        max_payload_bytes: 2,
        ..limits
    };
    let payload_err = decode_json(b"[1]", &CType::list(CType::Int), &tight)
        .expect_err("payload limit");
    assert!(matches!(payload_err, JsonBridgeError::PayloadTooLarge { size: 3, limit: 2 }));
}

#[test]
fn union_decoding_requires_tag_before_value() {
    let ty = CType::union([("ok", CType::Int), ("err", CType::String)]);
    let limits = JsonLimits::default();

    let ok = decode_json(br#"{"tag": "ok", "value": 3}"#, &ty, &limits).expect("decode");
    match ok {
        CValue::CUnion { tag, payload, .. } => {
            assert_eq!(tag, "ok");
            assert_eq!(*payload, CValue::CInt(3));
        }
        other => panic!("expected union, got {other:?}"),
    }

    assert!(decode_json(br#"{"value": 3, "tag": "ok"}"#, &ty, &limits).is_err());
    assert!(decode_json(br#"{"tag": "nope", "value": 3}"#, &ty, &limits).is_err());
}

#[test]
fn nested_records_within_limits_decode_fully() {
    let ty = CType::product([(
        "outer",
        CType::product([(
            "inner",
            CType::list(CType::product([("n", CType::Int)])),
        )]),
    )]);
    let payload = br#"{"outer": {"inner": [{"n": 1}, {"n": 2}]}}"#;
    let decoded = decode_json(payload, &ty, &JsonLimits::default()).expect("decode");

    let inner = decoded
        .field("outer")
        .and_then(|o| o.field("inner"))
        .expect("inner list");
    match inner {
        CValue::CList { elements, .. } => assert_eq!(elements.len(), 2),
        other => panic!("expected list, got {other:?}"),
    }
}
