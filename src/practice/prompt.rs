use std::fmt::Write;

use crate::personas::Persona;
use crate::sessions::ConversationConfig;

const RESPONSE_FORMAT: &str = "\
RESPONSE FORMAT:
- Start with an emotional reaction in *asterisks*: *smiles*, *looks confused*, *rolls eyes*, etc.
- Then give your spoken response
- Example: \"*raises eyebrow* Are you serious right now?\"
- Keep responses natural and appropriately short for your personality

IMPORTANT: Stay true to your character. React authentically - be uncomfortable if someone is \
creepy, bored if they're uninteresting, engaged if they're compelling.";

/// System prompt for the persona inside the given lesson or scenario.
pub fn build_system_prompt(persona: &Persona, config: &ConversationConfig) -> String {
    let mut prompt = format!(
        "You are {}, a {} personality.",
        persona.name,
        persona.kind.replace('_', " ")
    );
    if !persona.persona.trim().is_empty() {
        let _ = write!(prompt, " {}", persona.persona.trim());
    }

    if !persona.behavioral_rules.is_empty() {
        prompt.push_str("\n\nBEHAVIORAL RULES:");
        for rule in &persona.behavioral_rules {
            let _ = write!(prompt, "\n- {rule}");
        }
    }

    match config {
        ConversationConfig::Lesson(lesson) => {
            let _ = write!(
                prompt,
                "\n\nLESSON CONTEXT:\n- You're helping someone practice: {} ({} level)",
                lesson.display_title(),
                lesson.level.as_str()
            );
            if let Some(objective) = lesson.learning_objective.as_deref() {
                let _ = write!(prompt, "\n- Learning objective: {objective}");
            }
            prompt.push_str(
                "\n- Your role: conversation partner\n- Behavior: Help them practice this skill",
            );
        }
        ConversationConfig::Scenario(scenario) => {
            let info = &scenario.scenario;
            let _ = write!(prompt, "\n\nSCENARIO CONTEXT:\n- Setting: {}", info.name);
            if !info.description.is_empty() {
                let _ = write!(prompt, " - {}", info.description);
            }
            if !info.mood.is_empty() {
                let _ = write!(prompt, "\n- Mood: {}", info.mood);
            }
            if !info.time_of_day.is_empty() {
                let _ = write!(prompt, "\n- Time: {}", info.time_of_day);
            }
            if !info.social_norms.is_empty() {
                let _ = write!(prompt, "\n- Social norms: {}", info.social_norms.join(", "));
            }
            if let Some(mission) = &scenario.mission {
                let goal = if mission.description.is_empty() {
                    &mission.name
                } else {
                    &mission.description
                };
                let _ = write!(prompt, "\n- Mission: The user is trying to {goal}");
            }
        }
    }

    prompt.push_str("\n\n");
    prompt.push_str(RESPONSE_FORMAT);
    prompt
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::personas::{PersonaCatalog, StaticPersonaCatalog};
    use crate::sessions::{LessonLevel, Mission, ScenarioConfig, ScenarioInfo};

    fn maya() -> Persona {
        StaticPersonaCatalog::builtin().resolve("quiet_observer").unwrap()
    }

    #[test]
    fn lesson_prompt_names_lesson_and_level() {
        let prompt = build_system_prompt(
            &maya(),
            &ConversationConfig::lesson("active_listening", LessonLevel::Silver),
        );
        assert!(prompt.starts_with("You are Maya, a quiet observer personality."));
        assert!(prompt.contains("practice: active listening (silver level)"));
        assert!(prompt.contains("RESPONSE FORMAT:"));
        assert!(!prompt.contains("SCENARIO CONTEXT"));
    }

    #[test]
    fn scenario_prompt_includes_setting_and_mission() {
        let config = ConversationConfig::Scenario(ScenarioConfig {
            scenario: ScenarioInfo {
                id: "coffee_shop".into(),
                name: "Coffee Shop".into(),
                description: "A busy cafe".into(),
                mood: "relaxed".into(),
                social_norms: vec!["keep it short".into(), "smile".into()],
                ..ScenarioInfo::default()
            },
            character: None,
            character_id: None,
            mission: Some(Mission {
                id: "get_contact_info".into(),
                name: "Get their number".into(),
                description: "get the other person's contact info".into(),
                success_criteria: Vec::new(),
            }),
        });
        let prompt = build_system_prompt(&maya(), &config);
        assert!(prompt.contains("- Setting: Coffee Shop - A busy cafe"));
        assert!(prompt.contains("- Mood: relaxed"));
        assert!(prompt.contains("- Social norms: keep it short, smile"));
        assert!(prompt.contains("trying to get the other person's contact info"));
        assert!(!prompt.contains("- Time:"));
    }

    #[test]
    fn prompt_is_deterministic() {
        let config = ConversationConfig::lesson("small_talk", LessonLevel::Bronze);
        assert_eq!(
            build_system_prompt(&maya(), &config),
            build_system_prompt(&maya(), &config)
        );
    }
}
