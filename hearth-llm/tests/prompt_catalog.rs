//! Prompt catalog golden set.
//!
//! Each case renders one built-in prompt for a concrete character and checks
//! what must and must not survive into the text sent to the model. The
//! example replies are then run back through the shape checker, so a
//! template edit that breaks its own example fails here.

use hearth_llm::schema::{check_shape, parse_reply};
use hearth_llm::{PromptBook, PromptKind};

/// A golden test case for prompt rendering.
struct GoldenCase {
    name: &'static str,
    kind: PromptKind,
    vars: Vec<(&'static str, &'static str)>,
    must_contain: Vec<&'static str>,
    must_not_contain: Vec<&'static str>,
}

fn character_vars() -> Vec<(&'static str, &'static str)> {
    vec![
        ("name", "Mira"),
        ("bio", "Mira bakes bread and gossips."),
        ("goal", "open a second bakery"),
        ("state", "PLAN"),
        ("description", "deciding what to do today"),
        ("date", "day 2, 08:00"),
        ("building", "Bakery"),
        ("money", "42"),
        ("emotion", "content"),
    ]
}

fn golden_cases() -> Vec<GoldenCase> {
    vec![
        GoldenCase {
            name: "baker_plans_her_morning",
            kind: PromptKind::Plan,
            vars: vec![("perception", "a queue outside the shop")],
            must_contain: vec!["Mira", "Bakery", "42 gold", "a queue outside the shop", "BestPlan"],
            must_not_contain: vec!["{perception}", "{date}"],
        },
        GoldenCase {
            name: "baker_acts_without_a_plan",
            kind: PromptKind::Act,
            vars: vec![("candidates", "- MOVE: Market\n- CHATINIT: Tom")],
            must_contain: vec!["no plan yet", "CHATINIT: Tom", "act_obj"],
            must_not_contain: vec!["{BestPlan}"],
        },
        GoldenCase {
            name: "baker_opens_a_chat",
            kind: PromptKind::ChatInit,
            vars: vec![("act_obj", "Tom")],
            must_contain: vec!["talk to Tom", "init_conversation"],
            must_not_contain: vec!["someone nearby"],
        },
        GoldenCase {
            name: "baker_feels_after_a_chat",
            kind: PromptKind::Emotion,
            vars: vec![("interaction_summary", "Tom paid back his debt")],
            must_contain: vec!["Tom paid back his debt", "pleasure"],
            must_not_contain: vec!["nothing much happened"],
        },
        GoldenCase {
            name: "baker_estimates_a_price",
            kind: PromptKind::Estimate,
            vars: vec![],
            must_contain: vec!["the item", "expected_price"],
            must_not_contain: vec!["{item}"],
        },
    ]
}

#[test]
fn golden_prompts_render_without_unresolved_vars() {
    let book = PromptBook::builtin();
    for case in golden_cases() {
        let spec = book.get(case.kind).expect("builtin spec");
        let rendered = spec
            .render(|key| {
                case.vars
                    .iter()
                    .chain(character_vars().iter())
                    .find(|(k, _)| *k == key)
                    .map(|(_, v)| (*v).to_string())
            })
            .unwrap_or_else(|e| panic!("{}: {e}", case.name));
        let text = format!("{}\n{}", rendered.system, rendered.user);
        for needle in &case.must_contain {
            assert!(text.contains(needle), "{}: missing {needle:?}", case.name);
        }
        for needle in &case.must_not_contain {
            assert!(!text.contains(needle), "{}: unexpected {needle:?}", case.name);
        }
    }
}

#[test]
fn unknown_placeholder_names_the_prompt() {
    let book = PromptBook::builtin();
    let spec = book.get(PromptKind::Plan).expect("plan");
    let err = spec.render(|_| None).expect_err("persona fields are required");
    let message = err.to_string();
    assert!(message.contains("plan"), "{message}");
    assert!(message.contains("{name}"), "{message}");
}

#[test]
fn every_example_passes_its_own_shape_check() {
    let book = PromptBook::builtin();
    for kind in PromptKind::ALL {
        let spec = book.get(kind).expect("builtin spec");
        let reply = parse_reply(&spec.example.to_string()).expect("example is an object");
        check_shape(&spec.example, &reply, spec.exempt)
            .unwrap_or_else(|e| panic!("{kind}: {e}"));
    }
}

#[test]
fn system_prompts_keep_the_character_in_role() {
    let book = PromptBook::builtin();
    for kind in PromptKind::ALL {
        let spec = book.get(kind).expect("builtin spec");
        assert!(spec.system.contains("{name}"), "{kind} system prompt lost the persona");
        assert!(spec.system.contains("JSON"), "{kind} system prompt lost the output rule");
    }
}
