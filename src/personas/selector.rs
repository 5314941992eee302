use parking_lot::Mutex;
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;
use std::sync::Arc;

use super::catalog::{Persona, PersonaCatalog};
use crate::sessions::{ConversationConfig, SessionError};

/// Picks the persona that backs a new conversation.
///
/// Priority: an explicit persona in the config, then `character_id` resolved
/// through the catalog, then (scenarios only) a uniform pick from
/// `characters_present`, then the catalog default.
pub struct CharacterSelector {
    catalog: Arc<dyn PersonaCatalog>,
    rng: Mutex<StdRng>,
}

impl CharacterSelector {
    pub fn new(catalog: Arc<dyn PersonaCatalog>) -> Self {
        Self {
            catalog,
            rng: Mutex::new(StdRng::from_entropy()),
        }
    }

    /// Deterministic selector for reproducible picks.
    pub fn with_seed(catalog: Arc<dyn PersonaCatalog>, seed: u64) -> Self {
        Self {
            catalog,
            rng: Mutex::new(StdRng::seed_from_u64(seed)),
        }
    }

    pub fn catalog(&self) -> &Arc<dyn PersonaCatalog> {
        &self.catalog
    }

    pub fn select(&self, config: &ConversationConfig) -> Result<Persona, SessionError> {
        if let Some(character) = config.character() {
            return Ok(character.clone());
        }

        if let Some(id) = config.character_id() {
            return self.resolve(id);
        }

        if let ConversationConfig::Scenario(scenario) = config {
            let present = &scenario.scenario.characters_present;
            let picked = {
                let mut rng = self.rng.lock();
                present.choose(&mut *rng).cloned()
            };
            if let Some(id) = picked {
                tracing::debug!(
                    scenario = %scenario.scenario.id,
                    character = %id,
                    "Picked scenario character at random"
                );
                return self.resolve(&id);
            }
        }

        Ok(self.catalog.default_persona())
    }

    fn resolve(&self, id: &str) -> Result<Persona, SessionError> {
        self.catalog
            .resolve(id)
            .ok_or_else(|| SessionError::InvalidConfig(format!("unknown character '{id}'")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::personas::{StaticPersonaCatalog, DEFAULT_PERSONA_ID};
    use crate::sessions::{LessonLevel, ScenarioConfig, ScenarioInfo};
    use std::collections::HashSet;

    fn selector(seed: u64) -> CharacterSelector {
        CharacterSelector::with_seed(Arc::new(StaticPersonaCatalog::builtin()), seed)
    }

    fn cafe(present: &[&str]) -> ScenarioConfig {
        ScenarioConfig {
            scenario: ScenarioInfo {
                id: "coffee_shop".into(),
                name: "Coffee Shop".into(),
                characters_present: present.iter().map(|s| (*s).to_string()).collect(),
                ..ScenarioInfo::default()
            },
            character: None,
            character_id: None,
            mission: None,
        }
    }

    #[test]
    fn explicit_persona_is_used_verbatim() {
        let sel = selector(1);
        let custom = Persona {
            id: "custom".into(),
            name: "Custom".into(),
            kind: "curious".into(),
            description: String::new(),
            persona: String::new(),
            behavioral_rules: Vec::new(),
        };
        let mut config = cafe(&["quiet_observer"]);
        config.character = Some(custom.clone());
        config.character_id = Some("bubbly_nervous".into());

        let picked = sel.select(&ConversationConfig::Scenario(config)).unwrap();
        assert_eq!(picked, custom);
    }

    #[test]
    fn character_id_resolves_through_catalog() {
        let sel = selector(1);
        let mut config = cafe(&["quiet_observer"]);
        config.character_id = Some("self_centered".into());

        let picked = sel.select(&ConversationConfig::Scenario(config)).unwrap();
        assert_eq!(picked.id, "self_centered");
    }

    #[test]
    fn unknown_character_id_is_invalid_config() {
        let sel = selector(1);
        let mut config = cafe(&[]);
        config.character_id = Some("ghost".into());

        let err = sel.select(&ConversationConfig::Scenario(config)).unwrap_err();
        assert!(matches!(err, SessionError::InvalidConfig(_)));
    }

    #[test]
    fn scenario_pick_stays_within_characters_present() {
        let sel = selector(7);
        let present = ["quiet_observer", "laid_back_guy", "curious_questioner"];
        let mut seen = HashSet::new();
        for _ in 0..50 {
            let picked = sel
                .select(&ConversationConfig::Scenario(cafe(&present)))
                .unwrap();
            assert!(present.contains(&picked.id.as_str()));
            seen.insert(picked.id);
        }
        assert!(seen.len() > 1, "random pick should vary over 50 draws");
    }

    #[test]
    fn same_seed_gives_same_sequence() {
        let a = selector(42);
        let b = selector(42);
        let present = ["quiet_observer", "laid_back_guy", "bubbly_nervous"];
        for _ in 0..10 {
            let x = a.select(&ConversationConfig::Scenario(cafe(&present))).unwrap();
            let y = b.select(&ConversationConfig::Scenario(cafe(&present))).unwrap();
            assert_eq!(x.id, y.id);
        }
    }

    #[test]
    fn lesson_without_character_falls_back_to_default() {
        let sel = selector(1);
        let picked = sel
            .select(&ConversationConfig::lesson("basic_weaving", LessonLevel::Bronze))
            .unwrap();
        assert_eq!(picked.id, DEFAULT_PERSONA_ID);
    }

    #[test]
    fn empty_scenario_cast_falls_back_to_default() {
        let sel = selector(1);
        let picked = sel.select(&ConversationConfig::Scenario(cafe(&[]))).unwrap();
        assert_eq!(picked.id, DEFAULT_PERSONA_ID);
    }
}
