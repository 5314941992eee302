//! Mission tracking and end-of-conversation performance review.

use serde::{Deserialize, Serialize};

use crate::sessions::{ConversationStats, Mission, Role, Turn};

/// How far the user is toward a scenario mission.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MissionProgress {
    pub mission_id: String,
    pub criteria: Vec<String>,
    pub completed: bool,
    /// 0..=100; capped at 90 until the mission is actually completed.
    pub progress: u8,
}

fn mission_keywords(mission_id: &str) -> &'static [&'static str] {
    match mission_id {
        "get_contact_info" => &["number", "contact", "reach you"],
        "make_plans" => &["want to", "should we", "let's"],
        "give_compliment" => &["love", "great", "nice", "awesome"],
        _ => &[],
    }
}

/// Keyword heuristic over the user's turns. Missions without known keywords
/// can only make partial progress.
pub fn mission_progress(mission: &Mission, history: &[Turn]) -> MissionProgress {
    let keywords = mission_keywords(&mission.id);
    let user_turns: Vec<String> = history
        .iter()
        .filter(|t| t.role == Role::User)
        .map(|t| t.content.to_lowercase())
        .collect();

    let completed = user_turns
        .iter()
        .any(|text| keywords.iter().any(|k| text.contains(k)));
    let progress = if completed {
        100
    } else {
        u8::try_from((user_turns.len() * 20).min(90)).unwrap_or(90)
    };

    MissionProgress {
        mission_id: mission.id.clone(),
        criteria: mission.success_criteria.clone(),
        completed,
        progress,
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Rating {
    Excellent,
    Good,
    Fair,
    NeedsImprovement,
}

impl Rating {
    pub fn from_score(score: u32) -> Self {
        match score {
            80.. => Self::Excellent,
            60..=79 => Self::Good,
            40..=59 => Self::Fair,
            _ => Self::NeedsImprovement,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Excellent => "excellent",
            Self::Good => "good",
            Self::Fair => "fair",
            Self::NeedsImprovement => "needs_improvement",
        }
    }
}

/// Coaching summary produced when a conversation ends.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PerformanceReview {
    pub rating: Rating,
    pub score: u32,
    pub strengths: Vec<String>,
    pub suggestions: Vec<String>,
    pub feedback: String,
    pub mission: Option<MissionProgress>,
}

/// Score out of 100 from length of the exchange, detail of the user's
/// messages, time spent (3 to 10 minutes is ideal) and mission completion.
pub fn score(stats: &ConversationStats, mission_completed: bool) -> u32 {
    let mut score = match stats.message_count {
        10.. => 40,
        6..=9 => 30,
        3..=5 => 20,
        _ => 10,
    };
    score += match stats.average_user_message_length {
        30.. => 30,
        15..=29 => 20,
        5..=14 => 10,
        _ => 0,
    };
    score += match stats.duration_secs {
        180..=600 => 20,
        60.. => 10,
        _ => 0,
    };
    if mission_completed {
        score += 10;
    }
    score
}

fn question_count(history: &[Turn]) -> usize {
    history
        .iter()
        .filter(|t| t.role == Role::User && t.content.contains('?'))
        .count()
}

pub fn review(
    stats: &ConversationStats,
    history: &[Turn],
    mission: Option<&Mission>,
) -> PerformanceReview {
    let mission = mission.map(|m| mission_progress(m, history));
    let mission_completed = mission.as_ref().is_some_and(|m| m.completed);
    let questions = question_count(history);
    let avg = stats.average_user_message_length;

    let mut strengths = Vec::new();
    if stats.message_count >= 8 {
        strengths.push("Maintained conversation well".to_string());
    }
    if avg > 25 {
        strengths.push("Provided detailed, thoughtful responses".to_string());
    }
    if questions >= 2 {
        strengths.push("Asked engaging questions".to_string());
    }
    if mission_completed {
        strengths.push("Successfully completed mission objective".to_string());
    }
    if strengths.is_empty() {
        strengths.push("Participated in conversation practice".to_string());
    }

    let mut suggestions = Vec::new();
    if stats.message_count < 6 {
        suggestions.push("Try to keep conversations going longer".to_string());
    }
    if avg < 15 {
        suggestions.push("Add more detail to your responses".to_string());
    }
    if questions < 2 {
        suggestions.push("Ask more questions to show interest".to_string());
    }
    if mission.is_some() && !mission_completed {
        suggestions.push("Focus on completing the mission objective".to_string());
    }
    if suggestions.is_empty() {
        suggestions.push("Keep practicing to improve your skills".to_string());
    }

    let mut feedback = "Great conversation practice!".to_string();
    if stats.message_count >= 8 {
        feedback.push_str(" You kept the conversation going well.");
    }
    if avg > 20 {
        feedback.push_str(" Your responses were detailed and engaging.");
    }
    if mission_completed {
        feedback.push_str(" Mission completed successfully!");
    }

    let score = score(stats, mission_completed);
    PerformanceReview {
        rating: Rating::from_score(score),
        score,
        strengths,
        suggestions,
        feedback,
        mission,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn turns(lines: &[(Role, &str)]) -> Vec<Turn> {
        lines
            .iter()
            .map(|(role, content)| Turn {
                role: *role,
                content: (*content).to_string(),
                timestamp: Utc::now(),
            })
            .collect()
    }

    fn stats(messages: u64, avg: u64, duration_secs: i64) -> ConversationStats {
        ConversationStats {
            duration_secs,
            message_count: messages,
            user_message_count: 0,
            ai_message_count: 0,
            average_user_message_length: avg,
            start_time: Utc::now(),
            last_activity: Utc::now(),
            character: "Maya".into(),
        }
    }

    fn mission(id: &str) -> Mission {
        Mission {
            id: id.into(),
            name: id.replace('_', " "),
            description: String::new(),
            success_criteria: vec!["ask politely".into()],
        }
    }

    #[test]
    fn contact_mission_completes_on_keyword() {
        let history = turns(&[
            (Role::User, "Nice weather today"),
            (Role::Assistant, "*smiles* It is."),
            (Role::User, "How can I reach you later?"),
        ]);
        let progress = mission_progress(&mission("get_contact_info"), &history);
        assert!(progress.completed);
        assert_eq!(progress.progress, 100);
        assert_eq!(progress.criteria, vec!["ask politely".to_string()]);
    }

    #[test]
    fn incomplete_mission_progress_is_capped() {
        let one = turns(&[(Role::User, "hello")]);
        assert_eq!(mission_progress(&mission("make_plans"), &one).progress, 20);

        let many: Vec<Turn> = (0..7)
            .flat_map(|_| turns(&[(Role::User, "hmm"), (Role::Assistant, "Should we go?")]))
            .collect();
        let progress = mission_progress(&mission("make_plans"), &many);
        assert!(!progress.completed, "assistant turns must not count");
        assert_eq!(progress.progress, 90);
    }

    #[test]
    fn unknown_mission_never_completes() {
        let history = turns(&[(Role::User, "I love this, let's exchange numbers")]);
        assert!(!mission_progress(&mission("win_debate"), &history).completed);
    }

    #[test]
    fn score_bands() {
        assert_eq!(score(&stats(10, 30, 300), true), 100);
        assert_eq!(score(&stats(6, 15, 60), false), 60);
        assert_eq!(score(&stats(2, 4, 30), false), 10);
        assert_eq!(score(&stats(3, 5, 660), false), 40);
    }

    #[test]
    fn rating_thresholds() {
        assert_eq!(Rating::from_score(80), Rating::Excellent);
        assert_eq!(Rating::from_score(79), Rating::Good);
        assert_eq!(Rating::from_score(40), Rating::Fair);
        assert_eq!(Rating::from_score(39), Rating::NeedsImprovement);
        assert_eq!(Rating::NeedsImprovement.as_str(), "needs_improvement");
    }

    #[test]
    fn short_session_gets_default_strength_and_suggestions() {
        let history = turns(&[(Role::User, "hi"), (Role::Assistant, "Hey.")]);
        let review = review(&stats(2, 2, 20), &history, Some(&mission("give_compliment")));

        assert_eq!(review.strengths, vec!["Participated in conversation practice"]);
        assert_eq!(
            review.suggestions,
            vec![
                "Try to keep conversations going longer",
                "Add more detail to your responses",
                "Ask more questions to show interest",
                "Focus on completing the mission objective",
            ]
        );
        assert_eq!(review.rating, Rating::NeedsImprovement);
        assert_eq!(review.feedback, "Great conversation practice!");
    }

    #[test]
    fn strong_session_collects_strengths() {
        let history = turns(&[
            (Role::User, "What do you usually do on weekends around here?"),
            (Role::User, "That sounds like a great way to unwind, honestly?"),
        ]);
        let review = review(&stats(12, 32, 400), &history, Some(&mission("give_compliment")));

        assert!(review.strengths.contains(&"Maintained conversation well".to_string()));
        assert!(review.strengths.contains(&"Asked engaging questions".to_string()));
        assert!(review
            .strengths
            .contains(&"Successfully completed mission objective".to_string()));
        assert_eq!(review.suggestions, vec!["Keep practicing to improve your skills"]);
        assert_eq!(review.rating, Rating::Excellent);
        assert!(review.feedback.contains("Mission completed successfully!"));
    }
}
