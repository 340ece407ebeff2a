// SPDX-License-Identifier: MIT OR Apache-2.0
//! Property tests: `decode(encode(v)) == v` for generated value trees in
//! both encodings.

use bigdecimal::BigDecimal;
use chrono::{DateTime, NaiveDate, NaiveTime};
use courier_core::value::{CurrencyAmount, Map, Value};
use courier_serde::{JsonSerializer, MsgpackSerializer, Serializer};
use proptest::collection::{btree_map, vec};
use proptest::prelude::*;

fn leaf() -> impl Strategy<Value = Value> {
    prop_oneof![
        Just(Value::Null),
        any::<bool>().prop_map(Value::Bool),
        any::<i64>().prop_map(Value::Int),
        prop_oneof![proptest::num::f64::NORMAL, Just(0.0_f64)].prop_map(Value::Float),
        "[ -~]{0,16}".prop_map(Value::String),
        vec(any::<u8>(), 0..24).prop_map(Value::Bytes),
        (0_i64..4_102_444_800_000_000).prop_map(|us| {
            Value::Datetime(DateTime::from_timestamp_micros(us).unwrap())
        }),
        (1970_i32..2100, 1_u32..13, 1_u32..29).prop_map(|(y, m, d)| {
            Value::Date(NaiveDate::from_ymd_opt(y, m, d).unwrap())
        }),
        (0_u32..24, 0_u32..60, 0_u32..60, 0_u32..1_000_000).prop_map(|(h, m, s, us)| {
            Value::Time(NaiveTime::from_hms_micro_opt(h, m, s, us).unwrap())
        }),
        any::<i64>().prop_map(|i| Value::Decimal(BigDecimal::from(i))),
        ("[A-Z]{3}", any::<i64>())
            .prop_map(|(code, minor)| Value::Currency(CurrencyAmount::new(code, minor))),
    ]
}

fn tree() -> impl Strategy<Value = Value> {
    leaf().prop_recursive(3, 24, 6, |inner| {
        prop_oneof![
            vec(inner.clone(), 0..6).prop_map(Value::List),
            btree_map("[a-z]{1,8}", inner, 0..6)
                .prop_map(|m| Value::Map(m.into_iter().collect::<Map>())),
        ]
    })
}

fn body() -> impl Strategy<Value = Value> {
    btree_map("[a-z]{1,8}", tree(), 0..6)
        .prop_map(|m| Value::Map(m.into_iter().collect::<Map>()))
}

proptest! {
    #[test]
    fn msgpack_round_trips(value in body()) {
        let s = MsgpackSerializer;
        let back = s.decode(&s.encode(&value).unwrap()).unwrap();
        prop_assert_eq!(back, value);
    }

    #[test]
    fn json_round_trips(value in body()) {
        let s = JsonSerializer;
        let back = s.decode(&s.encode(&value).unwrap()).unwrap();
        prop_assert_eq!(back, value);
    }
}
