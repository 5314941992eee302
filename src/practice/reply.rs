//! Post-processing of generated persona replies.
//!
//! Generators are asked to open with a stage direction such as
//! `*raises eyebrow*`. The direction is stripped from the visible text and
//! read for a mood and a coarse character state.

use regex::Regex;
use serde::{Deserialize, Serialize};
use std::sync::OnceLock;

fn stage_direction() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\*([^*]*)\*").expect("stage direction pattern is valid"))
}

fn whitespace() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\s+").expect("whitespace pattern is valid"))
}

/// Facial mood read from stage directions.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum Mood {
    Neutral,
    Happy,
    Grinning,
    Laughing,
    Excited,
    Thinking,
    Curious,
    Impressed,
    Surprised,
    Amused,
    Relieved,
    EyeRoll,
    Skeptical,
    Unimpressed,
    Annoyed,
    Frustrated,
    Grimacing,
    Anxious,
    Confused,
    Sleepy,
    Sad,
}

impl Mood {
    pub fn emoji(self) -> &'static str {
        match self {
            Self::Neutral => "😐",
            Self::Happy => "😊",
            Self::Grinning => "😁",
            Self::Laughing => "😄",
            Self::Excited => "😃",
            Self::Thinking => "🤔",
            Self::Curious => "🧐",
            Self::Impressed => "😮",
            Self::Surprised => "😲",
            Self::Amused => "😏",
            Self::Relieved => "😌",
            Self::EyeRoll => "🙄",
            Self::Skeptical => "🤨",
            Self::Unimpressed => "😑",
            Self::Annoyed => "😤",
            Self::Frustrated => "😠",
            Self::Grimacing => "😬",
            Self::Anxious => "😰",
            Self::Confused => "😕",
            Self::Sleepy => "😴",
            Self::Sad => "😔",
        }
    }
}

const MOOD_KEYWORDS: &[(&str, Mood)] = &[
    ("smile", Mood::Happy),
    ("grin", Mood::Grinning),
    ("laugh", Mood::Laughing),
    ("excited", Mood::Excited),
    ("happy", Mood::Happy),
    ("interested", Mood::Thinking),
    ("curious", Mood::Curious),
    ("impressed", Mood::Impressed),
    ("surprised", Mood::Surprised),
    ("amused", Mood::Amused),
    ("lights up", Mood::Happy),
    ("nod", Mood::Relieved),
    ("roll", Mood::EyeRoll),
    ("eyebrow", Mood::Skeptical),
    ("unimpressed", Mood::Unimpressed),
    ("annoyed", Mood::Annoyed),
    ("frustrated", Mood::Frustrated),
    ("uncomfortable", Mood::Grimacing),
    ("nervous", Mood::Anxious),
    ("confused", Mood::Confused),
    ("suspicious", Mood::Thinking),
    ("bored", Mood::Sleepy),
    ("dismissive", Mood::EyeRoll),
    ("skeptical", Mood::Skeptical),
    ("scoff", Mood::Annoyed),
    ("sigh", Mood::Sad),
    ("lean forward", Mood::Thinking),
    ("step back", Mood::Grimacing),
    ("cross arms", Mood::Annoyed),
    ("look away", Mood::Unimpressed),
    ("check phone", Mood::Sleepy),
];

/// How the persona is reacting to the user overall.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum CharacterState {
    Uncomfortable,
    Excited,
    Bored,
    Confused,
    Neutral,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProcessedReply {
    /// Visible text without stage directions.
    pub text: String,
    pub mood: Mood,
    pub state: CharacterState,
}

/// Clean a raw reply and read its mood.
///
/// When nothing but stage directions is left, the raw text is kept so the
/// user still sees a turn.
pub fn process_reply(raw: &str) -> ProcessedReply {
    let stripped = stage_direction().replace_all(raw, "");
    let collapsed = whitespace().replace_all(stripped.trim(), " ");
    let mut text = strip_quotes(collapsed.trim()).to_string();
    if text.is_empty() {
        text = raw.trim().to_string();
    }

    ProcessedReply {
        text,
        mood: read_mood(raw),
        state: read_state(raw),
    }
}

fn strip_quotes(text: &str) -> &str {
    if text.len() >= 2 && text.starts_with('"') && text.ends_with('"') {
        &text[1..text.len() - 1]
    } else {
        text
    }
}

/// Mood from the stage directions only; longer keywords win.
pub fn read_mood(raw: &str) -> Mood {
    let actions: Vec<String> = stage_direction()
        .captures_iter(raw)
        .filter_map(|c| c.get(1).map(|m| m.as_str().to_lowercase()))
        .collect();
    if actions.is_empty() {
        return Mood::Neutral;
    }
    let actions = actions.join(" ");

    MOOD_KEYWORDS
        .iter()
        .filter(|(keyword, _)| actions.contains(*keyword))
        .fold(None::<(&str, Mood)>, |best, (keyword, mood)| match best {
            Some((current, _)) if current.len() >= keyword.len() => best,
            _ => Some((*keyword, *mood)),
        })
        .map_or(Mood::Neutral, |(_, mood)| mood)
}

/// Coarse state from the whole reply, directions and speech alike.
pub fn read_state(raw: &str) -> CharacterState {
    let lower = raw.to_lowercase();
    let has = |needles: &[&str]| needles.iter().any(|n| lower.contains(n));

    if has(&["uncomfortable", "step back"]) {
        CharacterState::Uncomfortable
    } else if has(&["excited", "light up"]) {
        CharacterState::Excited
    } else if has(&["bored", "check phone"]) {
        CharacterState::Bored
    } else if has(&["confused", "pause"]) {
        CharacterState::Confused
    } else {
        CharacterState::Neutral
    }
}
