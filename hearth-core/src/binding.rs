//! Strict prompt binding.
//!
//! A placeholder is answered by the first source that knows it:
//!
//! 1. the chain context (explicit call arguments),
//! 2. the state's attributes,
//! 3. the character's attributes,
//! 4. working memory,
//! 5. the prompt spec's own defaults.
//!
//! A placeholder no source can answer is a configuration bug and surfaces as
//! [`EngineError::TemplateBinding`].

use hearth_llm::{LlmError, PromptKind, RenderedPrompt};

use crate::chain::ChainContext;
use crate::error::{EngineError, Result};
use crate::state::Turn;
use crate::working_memory::value_text;

/// Look `key` up in sources 1 to 4.
#[must_use]
pub fn lookup(turn: &Turn<'_>, ctx: &ChainContext, key: &str) -> Option<String> {
    ctx.get(key)
        .map(value_text)
        .or_else(|| turn.core.attribute(key))
        .or_else(|| turn.character.attribute(key))
        .or_else(|| turn.character.memory.text(key))
}

/// Render the prompt of `kind` for the running state.
///
/// # Errors
///
/// Returns [`EngineError::NotFound`] if the prompt is not registered and
/// [`EngineError::TemplateBinding`] if a placeholder stays unbound.
pub fn render(turn: &Turn<'_>, ctx: &ChainContext, kind: PromptKind) -> Result<RenderedPrompt> {
    let spec = turn.services.registry.prompt(kind)?;
    spec.render(|key| lookup(turn, ctx, key)).map_err(|e| match e {
        LlmError::UnboundPlaceholder { placeholder, prompt } => EngineError::TemplateBinding {
            placeholder,
            prompt,
            state: turn.core.tag,
        },
        other => EngineError::Llm(other),
    })
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use hearth_llm::{PromptSpec, ScriptedBackend};
    use serde_json::json;

    use super::*;
    use crate::chain::Partial;
    use crate::character::Character;
    use crate::config::EngineConfig;
    use crate::registry::Registry;
    use crate::services::Services;
    use crate::state::StateCore;
    use crate::types::StateTag;

    const PROBE: &str = r#"
system = "I am {name}."
user = "{first} {second} {third} {fourth} {fifth}"
example = '{"ok": true}'
[defaults]
first = "default"
second = "default"
third = "default"
fourth = "default"
fifth = "default"
"#;

    fn services(spec: &str) -> Services {
        let mut builder = Registry::builder();
        builder.register_prompt(PromptSpec::from_toml(PromptKind::Critic, spec).expect("critic spec"));
        Services::new(builder.build(), Arc::new(ScriptedBackend::new()))
    }

    #[test]
    fn sources_are_consulted_in_priority_order() {
        let services = services(PROBE);
        let config = EngineConfig::default();
        let mut core = StateCore::new(StateTag::Critic, &[StateTag::Plan], 10);
        core.attributes.insert("first".into(), json!("state"));
        core.attributes.insert("second".into(), json!("state"));
        let mut character = Character::new("Mira", "1");
        character.profile.insert("second".into(), "character".into());
        character.profile.insert("third".into(), "character".into());
        character.memory.store("third", "memory");
        character.memory.store("fourth", "memory");

        let mut seed = Partial::new();
        seed.insert("first".into(), json!("context"));
        let ctx = ChainContext::new(seed);
        let turn = Turn {
            core: &mut core,
            character: &mut character,
            services: &services,
            config: &config,
        };
        let rendered = render(&turn, &ctx, PromptKind::Critic).expect("render");
        assert_eq!(rendered.system, "I am Mira.");
        assert!(rendered.user.starts_with("context state character memory default"));
    }

    #[test]
    fn unbound_placeholder_names_prompt_and_state() {
        let services = services(
            r#"
user = "Tell me about {mystery}."
example = '{"ok": true}'
"#,
        );
        let config = EngineConfig::default();
        let mut core = StateCore::new(StateTag::Critic, &[StateTag::Plan], 10);
        let mut character = Character::new("Mira", "1");
        let turn = Turn {
            core: &mut core,
            character: &mut character,
            services: &services,
            config: &config,
        };
        match render(&turn, &ChainContext::default(), PromptKind::Critic) {
            Err(EngineError::TemplateBinding { placeholder, prompt, state }) => {
                assert_eq!(placeholder, "mystery");
                assert_eq!(prompt, "critic");
                assert_eq!(state, StateTag::Critic);
            }
            other => panic!("unexpected {other:?}"),
        }
    }
}
