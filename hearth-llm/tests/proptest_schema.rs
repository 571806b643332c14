//! Property-Based Tests for reply parsing and shape checking

use proptest::prelude::*;
use serde_json::{Map, Value};

use hearth_llm::schema::{ExemptLayers, MAX_LAYER, check_shape, parse_reply};

// ---------------------------------------------------------------------------
// Strategy helpers
// ---------------------------------------------------------------------------

fn arb_leaf() -> impl Strategy<Value = Value> {
    prop_oneof![
        Just(Value::Null),
        any::<bool>().prop_map(Value::Bool),
        any::<i32>().prop_map(Value::from),
        "[a-z ]{0,12}".prop_map(Value::String),
    ]
}

fn arb_value() -> impl Strategy<Value = Value> {
    arb_leaf().prop_recursive(4, 32, 4, |inner| {
        prop_oneof![
            prop::collection::vec(inner.clone(), 0..4).prop_map(Value::Array),
            prop::collection::btree_map("[a-z]{1,6}", inner, 0..4)
                .prop_map(|m| Value::Object(m.into_iter().collect::<Map<_, _>>())),
        ]
    })
}

fn arb_object() -> impl Strategy<Value = Value> {
    prop::collection::btree_map("[a-z]{1,6}", arb_value(), 1..5)
        .prop_map(|m| Value::Object(m.into_iter().collect::<Map<_, _>>()))
}

fn arb_exempt() -> impl Strategy<Value = ExemptLayers> {
    prop_oneof![
        Just(ExemptLayers::strict()),
        Just(ExemptLayers::standard()),
        Just(ExemptLayers::reflective()),
        prop::collection::vec(0u8..20, 0..6).prop_map(|l| ExemptLayers::from_layers(&l)),
    ]
}

// ---------------------------------------------------------------------------
// Properties
// ---------------------------------------------------------------------------

proptest! {
    #[test]
    fn an_example_always_matches_itself(example in arb_object(), exempt in arb_exempt()) {
        prop_assert!(check_shape(&example, &example, exempt).is_ok());
    }

    #[test]
    fn extra_top_level_keys_never_hurt(
        example in arb_object(),
        extra in arb_value(),
        exempt in arb_exempt(),
    ) {
        let mut reply = example.clone();
        if let Value::Object(map) = &mut reply {
            map.insert("zz_extra_key".into(), extra);
        }
        prop_assert!(check_shape(&example, &reply, exempt).is_ok());
    }

    #[test]
    fn a_dropped_top_level_key_is_caught_unless_exempt(example in arb_object(), exempt in arb_exempt()) {
        let mut reply = example.clone();
        let dropped = reply.as_object().and_then(|m| m.keys().next().cloned());
        if let (Some(key), Value::Object(map)) = (dropped, &mut reply) {
            map.remove(&key);
            let result = check_shape(&example, &reply, exempt);
            prop_assert_eq!(result.is_ok(), exempt.is_exempt(0));
        }
    }

    #[test]
    fn fenced_and_bare_replies_parse_alike(object in arb_object(), chatter in "[A-Za-z !.]{0,20}") {
        let bare = object.to_string();
        let fenced = format!("{chatter}\n```json\n{bare}\n```\n{chatter}");
        let from_bare = parse_reply(&bare).expect("bare object parses");
        let from_fence = parse_reply(&fenced).expect("fenced object parses");
        prop_assert_eq!(&from_bare, &object);
        prop_assert_eq!(from_fence, from_bare);
    }

    #[test]
    fn exempt_layers_keep_only_valid_layers(layers in prop::collection::vec(0u8..32, 0..10)) {
        let exempt = ExemptLayers::from_layers(&layers);
        let mut expected: Vec<u8> = layers.into_iter().filter(|l| *l <= MAX_LAYER).collect();
        expected.sort_unstable();
        expected.dedup();
        prop_assert_eq!(exempt.layers(), expected);
    }
}
