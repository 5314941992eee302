use chrono::{DateTime, Utc};

use super::traits::{ConversationRecord, ConversationStats, ConversationSummary, Role, Turn};
use crate::personas::Persona;

/// Derive stats from the record as it is right now.
///
/// Duration runs to `end_time` once the conversation is completed, otherwise
/// to `now`.
pub fn compute_stats(record: &ConversationRecord, now: DateTime<Utc>) -> ConversationStats {
    derive(
        &record.history,
        record.message_count,
        record.start_time,
        record.end_time.unwrap_or(now),
        record.last_activity,
        &record.character,
    )
}

/// Same numbers from an end-of-conversation snapshot, which stays usable
/// after the record itself is gone.
pub fn summary_stats(summary: &ConversationSummary) -> ConversationStats {
    derive(
        &summary.history,
        summary.message_count,
        summary.start_time,
        summary.end_time.unwrap_or(summary.last_activity),
        summary.last_activity,
        &summary.character,
    )
}

fn derive(
    history: &[Turn],
    message_count: u64,
    start_time: DateTime<Utc>,
    until: DateTime<Utc>,
    last_activity: DateTime<Utc>,
    character: &Persona,
) -> ConversationStats {
    let duration_ms = (until - start_time).num_milliseconds().max(0);

    let mut user_count = 0usize;
    let mut ai_count = 0usize;
    let mut user_chars = 0usize;
    for turn in history {
        match turn.role {
            Role::User => {
                user_count += 1;
                user_chars += turn.content.chars().count();
            }
            Role::Assistant => ai_count += 1,
        }
    }

    ConversationStats {
        duration_secs: rounded_div(duration_ms, 1000),
        message_count,
        user_message_count: user_count,
        ai_message_count: ai_count,
        average_user_message_length: average_length(user_chars, user_count),
        start_time,
        last_activity,
        character: if character.name.trim().is_empty() {
            character.id.clone()
        } else {
            character.name.clone()
        },
    }
}

/// Rounded mean, 0 when there is nothing to average.
pub fn average_length(total_chars: usize, count: usize) -> u64 {
    if count == 0 {
        return 0;
    }
    let total = total_chars as u64;
    let count = count as u64;
    (total * 2 + count) / (count * 2)
}

fn rounded_div(value: i64, by: i64) -> i64 {
    (value + by / 2) / by
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::personas::StaticPersonaCatalog;
    use crate::personas::PersonaCatalog;
    use crate::sessions::traits::{
        ConversationConfig, ConversationId, ConversationKind, ConversationStatus, LessonLevel,
        Turn,
    };
    use crate::security::SubjectId;
    use chrono::Duration;
    use std::collections::HashMap;

    fn record_with(turns: &[(Role, &str)]) -> ConversationRecord {
        let start = Utc::now();
        ConversationRecord {
            id: ConversationId::new("lesson_test"),
            subject_id: SubjectId::new("s1"),
            kind: ConversationKind::Lesson,
            config: ConversationConfig::lesson("basic_weaving", LessonLevel::Bronze),
            character: StaticPersonaCatalog::builtin().default_persona(),
            history: turns
                .iter()
                .map(|(role, content)| Turn {
                    role: *role,
                    content: (*content).to_string(),
                    timestamp: start,
                })
                .collect(),
            message_count: turns.len() as u64,
            start_time: start,
            last_activity: start,
            end_time: None,
            duration_ms: None,
            status: ConversationStatus::Active,
            metadata: HashMap::new(),
            removal_due: None,
        }
    }

    #[test]
    fn average_user_length_is_rounded_mean() {
        let record = record_with(&[
            (Role::User, "hello"),
            (Role::Assistant, "hey there"),
            (Role::User, "fifteen chars!!"),
            (Role::User, "ten chars!"),
        ]);
        let stats = compute_stats(&record, record.start_time);
        assert_eq!(stats.user_message_count, 3);
        assert_eq!(stats.ai_message_count, 1);
        assert_eq!(stats.average_user_message_length, 10);
        assert_eq!(stats.message_count, 4);
    }

    #[test]
    fn no_user_messages_means_zero_average() {
        let record = record_with(&[(Role::Assistant, "*waves* hi")]);
        let stats = compute_stats(&record, record.start_time);
        assert_eq!(stats.user_message_count, 0);
        assert_eq!(stats.average_user_message_length, 0);
    }

    #[test]
    fn duration_uses_end_time_when_present() {
        let mut record = record_with(&[]);
        record.end_time = Some(record.start_time + Duration::seconds(42));
        let much_later = record.start_time + Duration::hours(3);
        assert_eq!(compute_stats(&record, much_later).duration_secs, 42);
    }

    #[test]
    fn duration_rounds_to_nearest_second() {
        let record = record_with(&[]);
        let now = record.start_time + Duration::milliseconds(2_600);
        assert_eq!(compute_stats(&record, now).duration_secs, 3);
    }

    #[test]
    fn length_counts_characters_not_bytes() {
        let record = record_with(&[(Role::User, "héllo")]);
        assert_eq!(
            compute_stats(&record, record.start_time).average_user_message_length,
            5
        );
    }

    #[test]
    fn character_falls_back_to_id_when_name_blank() {
        let mut record = record_with(&[]);
        record.character.name = String::new();
        assert_eq!(
            compute_stats(&record, record.start_time).character,
            record.character.id
        );
    }

    #[test]
    fn summary_stats_match_record_stats_after_end() {
        let mut record = record_with(&[(Role::User, "hey you"), (Role::Assistant, "hi")]);
        let end = record.start_time + Duration::seconds(90);
        record.end_time = Some(end);
        record.last_activity = end;

        let summary = ConversationSummary::from(&record);
        assert_eq!(summary_stats(&summary), compute_stats(&record, end));
        assert_eq!(summary_stats(&summary).duration_secs, 90);
    }

    #[test]
    fn average_length_rounds_half_up() {
        assert_eq!(average_length(5, 2), 3);
        assert_eq!(average_length(4, 3), 1);
        assert_eq!(average_length(0, 0), 0);
    }
}
