//! Persona records and the catalog that resolves them by id.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;

/// Id of the persona used when nothing else selects one.
pub const DEFAULT_PERSONA_ID: &str = "practice_partner";

/// A fixed personality profile that shapes generated replies.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Persona {
    pub id: String,
    pub name: String,
    /// Personality archetype, e.g. `quiet_observer` or `practice_partner`.
    /// Drives fallback lines and prompt tone.
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default)]
    pub description: String,
    /// One-paragraph persona summary used in system prompts.
    #[serde(default)]
    pub persona: String,
    #[serde(default)]
    pub behavioral_rules: Vec<String>,
}

/// Resolves persona ids to full persona records.
pub trait PersonaCatalog: Send + Sync {
    fn resolve(&self, id: &str) -> Option<Persona>;

    /// The persona used when no other rule selects one.
    fn default_persona(&self) -> Persona;

    fn list(&self) -> Vec<Persona>;

    fn name(&self) -> &str;
}

/// Catalog held entirely in memory, keyed by persona id.
#[derive(Debug, Clone)]
pub struct StaticPersonaCatalog {
    personas: BTreeMap<String, Persona>,
}

impl StaticPersonaCatalog {
    /// Build a catalog from explicit personas. The default persona is
    /// always present: if `personas` does not contain it, the built-in one is
    /// added.
    pub fn new(personas: impl IntoIterator<Item = Persona>) -> Self {
        let mut map: BTreeMap<String, Persona> =
            personas.into_iter().map(|p| (p.id.clone(), p)).collect();
        map.entry(DEFAULT_PERSONA_ID.to_string())
            .or_insert_with(builtin_practice_partner);
        Self { personas: map }
    }

    /// The built-in cast.
    pub fn builtin() -> Self {
        Self::new(builtin_personas())
    }

    /// Load a `characters.json` style file: a JSON object mapping persona
    /// id to persona record. Entries without an `id` field take their key.
    pub fn from_json_str(raw: &str) -> Result<Self> {
        let entries: BTreeMap<String, serde_json::Value> =
            serde_json::from_str(raw).context("Persona catalog must be a JSON object")?;

        let mut personas = Vec::with_capacity(entries.len());
        for (key, mut value) in entries {
            if let Some(obj) = value.as_object_mut() {
                obj.entry("id")
                    .or_insert_with(|| serde_json::Value::String(key.clone()));
            }
            let persona: Persona = serde_json::from_value(value)
                .with_context(|| format!("Invalid persona entry '{key}'"))?;
            personas.push(persona);
        }

        Ok(Self::new(personas))
    }

    pub async fn from_json_file(path: &Path) -> Result<Self> {
        let raw = tokio::fs::read_to_string(path)
            .await
            .with_context(|| format!("Failed to read persona catalog {}", path.display()))?;
        Self::from_json_str(&raw)
    }

    pub fn len(&self) -> usize {
        self.personas.len()
    }

    pub fn is_empty(&self) -> bool {
        self.personas.is_empty()
    }
}

impl Default for StaticPersonaCatalog {
    fn default() -> Self {
        Self::builtin()
    }
}

impl PersonaCatalog for StaticPersonaCatalog {
    fn resolve(&self, id: &str) -> Option<Persona> {
        self.personas.get(id).cloned()
    }

    fn default_persona(&self) -> Persona {
        self.personas
            .get(DEFAULT_PERSONA_ID)
            .cloned()
            .unwrap_or_else(builtin_practice_partner)
    }

    fn list(&self) -> Vec<Persona> {
        self.personas.values().cloned().collect()
    }

    fn name(&self) -> &str {
        "static"
    }
}

fn persona(
    id: &str,
    name: &str,
    kind: &str,
    description: &str,
    summary: &str,
    rules: &[&str],
) -> Persona {
    Persona {
        id: id.to_string(),
        name: name.to_string(),
        kind: kind.to_string(),
        description: description.to_string(),
        persona: summary.to_string(),
        behavioral_rules: rules.iter().map(|r| (*r).to_string()).collect(),
    }
}

fn builtin_practice_partner() -> Persona {
    persona(
        DEFAULT_PERSONA_ID,
        "Sam",
        "practice_partner",
        "A friendly partner for drilling a single skill.",
        "Patient, encouraging and genuinely interested in helping you practice.",
        &[
            "Responds warmly to any honest attempt",
            "Gives the user room to try the technique again",
            "Keeps replies short so the user does most of the talking",
        ],
    )
}

fn builtin_personas() -> Vec<Persona> {
    vec![
        builtin_practice_partner(),
        persona(
            "quiet_observer",
            "Maya",
            "quiet_observer",
            "Reserved, notices details, warms up slowly.",
            "Thoughtful and introverted; prefers depth over small talk.",
            &[
                "Gives short answers until the user shows real interest",
                "Opens up when asked specific questions",
                "Gets uncomfortable with loud or pushy openers",
            ],
        ),
        persona(
            "laid_back_guy",
            "Jake",
            "laid_back",
            "Easygoing and hard to impress.",
            "Relaxed, dry humour, allergic to trying too hard.",
            &[
                "Matches the user's energy rather than raising it",
                "Loses interest in rehearsed lines",
                "Laughs at self-deprecating jokes",
            ],
        ),
        persona(
            "bubbly_nervous",
            "Lily",
            "bubbly_nervous",
            "Enthusiastic but a little anxious around new people.",
            "Warm, talkative when comfortable, rambles when nervous.",
            &[
                "Over-explains when put on the spot",
                "Relaxes when the user is reassuring",
                "Loves being asked about her hobbies",
            ],
        ),
        persona(
            "self_centered",
            "Derek",
            "self_centered",
            "Steers every topic back to himself.",
            "Confident, likes an audience, rarely asks questions.",
            &[
                "Relates everything to his own experiences",
                "Respects people who hold their ground",
                "Gets bored when not the focus",
            ],
        ),
        persona(
            "curious_questioner",
            "Priya",
            "curious",
            "Asks a lot of questions and expects real answers.",
            "Inquisitive, direct, rewards specific and personal answers.",
            &[
                "Follows up on vague answers",
                "Shares when the user shares",
                "Dislikes evasive replies",
            ],
        ),
    ]
}
