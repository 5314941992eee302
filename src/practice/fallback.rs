//! Canned persona lines: openers and replies used when generation fails.

use rand::seq::SliceRandom;
use rand::Rng;

use crate::personas::Persona;

const LESSON_FALLBACK: &str = "I had trouble processing that. Can you try rephrasing?";
const GENERIC_FALLBACK: &str = "Sorry, I didn't understand that.";

/// Short in-character reactions by persona type.
pub fn type_lines(kind: &str) -> &'static [&'static str] {
    match kind {
        "quiet_observer" => &["Hmm.", "I see.", "Interesting."],
        "laid_back" => &["Cool.", "Yeah, fair.", "Alright."],
        "bubbly_nervous" => &["Oh wow!", "Really?", "That's interesting!"],
        "self_centered" => &["That reminds me of...", "I've done that too."],
        "curious" => &["Tell me more.", "How so?", "Really?"],
        _ => &[
            "Good try! Keep practicing.",
            "Let's try that again.",
            "You're doing well!",
        ],
    }
}

/// Reply appended to a lesson when the generator fails.
pub fn lesson_fallback() -> &'static str {
    LESSON_FALLBACK
}

/// Reply appended to a scenario when the generator fails. Known cast
/// members have a fixed line; anyone else gets a random line for their type.
pub fn scenario_fallback<R: Rng + ?Sized>(persona: &Persona, rng: &mut R) -> String {
    let fixed = match persona.id.as_str() {
        "quiet_observer" => Some("*looks confused* Sorry, what?"),
        "laid_back_guy" => Some("*shrugs* Didn't catch that."),
        "bubbly_nervous" => Some("*laughs nervously* Um, sorry, can you say that again?"),
        "self_centered" => Some("*distracted* What was that?"),
        "curious_questioner" => Some("*tilts head* Could you repeat that?"),
        _ => None,
    };
    if let Some(line) = fixed {
        return line.to_string();
    }
    type_lines(&persona.kind)
        .choose(rng)
        .map_or_else(|| GENERIC_FALLBACK.to_string(), |line| (*line).to_string())
}

/// Opening line for a scenario, wrapping one of its conversation starters.
pub fn scenario_opener(persona: &Persona, starter: &str) -> String {
    let gesture = match persona.id.as_str() {
        "quiet_observer" => "*glances up briefly*",
        "laid_back_guy" => "*relaxed* Hey.",
        "bubbly_nervous" => "*smiles nervously* Hi!",
        "self_centered" => "*confident*",
        "curious_questioner" => "*looks interested*",
        _ => "*notices you*",
    };
    format!("{gesture} {starter}")
}

/// Opening line for a lesson.
pub fn lesson_opener<R: Rng + ?Sized>(persona: &Persona, title: &str, rng: &mut R) -> String {
    let lower = title.to_lowercase();
    match rng.gen_range(0..3) {
        0 => format!(
            "Hi! I'm {}, and I'm here to help you practice {lower}. Ready to get started?",
            persona.name
        ),
        1 => format!("Welcome to {title} practice! I'll help you work on this skill. Let's begin!"),
        _ => format!("Hey there! Time to practice {lower}. I'll be your practice partner today."),
    }
}
