//! End-to-end flows through the public API with a manual clock.

use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use chrono::Duration;
use rehearsal::infra::reaper::run_once;
use rehearsal::infra::{Clock, ManualClock, Sweeper};
use rehearsal::personas::{CharacterSelector, StaticPersonaCatalog};
use rehearsal::practice::{
    PracticeError, PracticeService, PracticeSettings, ReplyGenerator, FALLBACK_WARNING,
};
use rehearsal::security::{
    RatePolicy, RateLimiter, SessionIdentity, SubjectId, ACTION_CONVERSATION_START,
    ACTION_MESSAGE,
};
use rehearsal::sessions::{
    ConversationConfig, ConversationId, ConversationStatus, ConversationStore, HistoryTurn,
    InMemoryConversationStore, LessonLevel, Role, ScenarioConfig, ScenarioInfo, StoreSettings,
};

struct Harness {
    clock: Arc<ManualClock>,
    store: Arc<InMemoryConversationStore>,
    limiter: Arc<RateLimiter>,
}

impl Harness {
    fn new() -> Self {
        let clock = Arc::new(ManualClock::starting_now());
        let store = Arc::new(InMemoryConversationStore::new(
            CharacterSelector::with_seed(Arc::new(StaticPersonaCatalog::builtin()), 3),
            clock.clone(),
            StoreSettings {
                idle_timeout: Duration::hours(2),
                retention: Duration::hours(24),
                end_grace: Duration::seconds(5),
                default_history_limit: 20,
            },
        ));
        let limiter = Arc::new(RateLimiter::new(
            [
                (ACTION_MESSAGE, RatePolicy::new(3, Duration::minutes(1))),
                (ACTION_CONVERSATION_START, RatePolicy::new(5, Duration::hours(1))),
            ],
            clock.clone(),
        ));
        Self {
            clock,
            store,
            limiter,
        }
    }

    fn service(&self, generator: Arc<dyn ReplyGenerator>) -> PracticeService {
        PracticeService::new(
            self.store.clone(),
            self.limiter.clone(),
            generator,
            PracticeSettings {
                generation_timeout: std::time::Duration::from_millis(100),
                ..PracticeSettings::default()
            },
        )
        .with_seed(11)
    }
}

struct Echo;

#[async_trait]
impl ReplyGenerator for Echo {
    async fn generate(
        &self,
        _system_prompt: &str,
        history: &[HistoryTurn],
        user_message: &str,
    ) -> Result<String> {
        Ok(format!("*nods* ({}) {user_message}", history.len()))
    }

    fn name(&self) -> &str {
        "echo"
    }
}

struct Broken;

#[async_trait]
impl ReplyGenerator for Broken {
    async fn generate(&self, _: &str, _: &[HistoryTurn], _: &str) -> Result<String> {
        anyhow::bail!("connection refused")
    }

    fn name(&self) -> &str {
        "broken"
    }
}

fn weaving() -> ConversationConfig {
    ConversationConfig::lesson("basic_weaving", LessonLevel::Bronze)
}

#[test]
fn lesson_walkthrough_records_turns_in_order() {
    let h = Harness::new();
    let s1 = SubjectId::new("s1");
    let id = h.store.start(&s1, weaving()).unwrap();

    assert!(h.store.add_message(&id, Role::User, "hi"));
    assert!(h.store.add_message(&id, Role::Assistant, "hello"));
    assert_eq!(
        h.store.history(&id, Some(10)),
        vec![
            HistoryTurn::new(Role::User, "hi"),
            HistoryTurn::new(Role::Assistant, "hello"),
        ]
    );
    assert_eq!(h.store.stats(&id).unwrap().message_count, 2);
}

#[test]
fn conversations_are_isolated_per_subject() {
    let h = Harness::new();
    let a = SubjectId::new("subject_a");
    let b = SubjectId::new("subject_b");
    let c1 = h.store.start(&a, weaving()).unwrap();
    let c2 = h.store.start(&b, weaving()).unwrap();

    assert_ne!(c1, c2);
    let record = h.store.get(&c1).unwrap();
    assert!(record.is_owned_by(&a));
    assert!(!record.is_owned_by(&b));
    assert_eq!(h.store.list_for_subject(&b).len(), 1);
}

#[test]
fn history_window_keeps_call_order() {
    let h = Harness::new();
    let id = h.store.start(&SubjectId::new("s"), weaving()).unwrap();
    for i in 0..8 {
        let role = if i % 2 == 0 { Role::User } else { Role::Assistant };
        h.store.add_message(&id, role, &format!("turn {i}"));
    }

    let last3: Vec<String> = h
        .store
        .history(&id, Some(3))
        .into_iter()
        .map(|t| t.content)
        .collect();
    assert_eq!(last3, ["turn 5", "turn 6", "turn 7"]);
    assert!(h.store.history(&id, Some(0)).is_empty());
}

#[test]
fn character_binding_is_stable() {
    let h = Harness::new();
    let config = ConversationConfig::Scenario(ScenarioConfig {
        scenario: ScenarioInfo {
            id: "party".into(),
            name: "House Party".into(),
            characters_present: vec![
                "quiet_observer".into(),
                "bubbly_nervous".into(),
                "self_centered".into(),
            ],
            ..ScenarioInfo::default()
        },
        character: None,
        character_id: None,
        mission: None,
    });
    let id = h.store.start(&SubjectId::new("s"), config).unwrap();
    let first = h.store.get(&id).unwrap().character;
    for _ in 0..5 {
        assert_eq!(h.store.get(&id).unwrap().character, first);
    }
}

#[test]
fn unknown_ids_are_reported_not_raised() {
    let h = Harness::new();
    let missing = ConversationId::from("lesson_nobody_0");
    assert!(!h.store.add_message(&missing, Role::User, "hello?"));
    assert!(h.store.history(&missing, None).is_empty());
    assert!(h.store.stats(&missing).is_none());
    assert!(h.store.end(&missing).is_none());
}

#[test]
fn reaper_abandons_then_removes_idle_conversations() {
    let h = Harness::new();
    let id = h.store.start(&SubjectId::new("s"), weaving()).unwrap();
    let sweepers = vec![
        h.store.clone() as Arc<dyn Sweeper>,
        h.limiter.clone() as Arc<dyn Sweeper>,
    ];

    h.clock.advance(Duration::hours(2) + Duration::seconds(1));
    run_once(&sweepers);
    assert_eq!(h.store.get(&id).unwrap().status, ConversationStatus::Abandoned);

    h.clock.advance(Duration::hours(22));
    let result = run_once(&sweepers);
    assert!(h.store.get(&id).is_none());
    let (name, report) = &result.reports[0];
    assert_eq!(name, "conversations");
    assert_eq!(report.removed, 1);
    assert_eq!(report.remaining, 0);
}

#[test]
fn average_user_length_is_the_rounded_mean() {
    let h = Harness::new();
    let id = h.store.start(&SubjectId::new("s"), weaving()).unwrap();
    assert_eq!(h.store.stats(&id).unwrap().average_user_message_length, 0);

    for text in ["abcde", "abcdefghijklmno", "abcdefghij"] {
        h.store.add_message(&id, Role::User, text);
        h.store.add_message(&id, Role::Assistant, "ok");
    }
    let stats = h.store.stats(&id).unwrap();
    assert_eq!(stats.average_user_message_length, 10);
    assert_eq!(stats.user_message_count, 3);
    assert_eq!(stats.ai_message_count, 3);
}

#[test]
fn two_per_second_rate_limit() {
    let clock = Arc::new(ManualClock::starting_now());
    let limiter = RateLimiter::new(
        [("x", RatePolicy::new(2, Duration::seconds(1)))],
        clock.clone(),
    );
    let s = SubjectId::new("s");
    let first_event = clock.now();

    let one = limiter.check(&s, "x");
    assert!(one.allowed);
    assert_eq!(one.remaining, Some(1));
    clock.advance(Duration::milliseconds(100));
    assert_eq!(limiter.check(&s, "x").remaining, Some(0));

    let denied = limiter.check(&s, "x");
    assert!(!denied.allowed);
    assert_eq!(denied.reset_time, Some(first_event + Duration::seconds(1)));

    clock.advance(Duration::milliseconds(900));
    assert!(limiter.check(&s, "x").allowed);
}

#[tokio::test]
async fn practice_loop_from_request_headers_to_review() {
    let h = Harness::new();
    let service = h.service(Arc::new(Echo));

    let mut headers = axum::http::HeaderMap::new();
    headers.insert("user-agent", "Mozilla/5.0".parse().unwrap());
    headers.insert("accept-language", "en-GB".parse().unwrap());
    let identity = SessionIdentity::new(false);
    let remote = "203.0.113.9:4431".parse().ok();
    let subject = identity.resolve_or_fallback(&headers, remote);
    assert_eq!(subject, identity.resolve_or_fallback(&headers, remote));

    let started = service.start(&subject, weaving()).unwrap();
    let id = started.conversation_id;
    assert!(started.opener.is_some());

    let reply = service.send(&subject, &id, "Where do I start?").await.unwrap();
    assert_eq!(reply.reply, "(1) Where do I start?");
    h.clock.advance(Duration::minutes(4));
    let reply = service.send(&subject, &id, "And after that?").await.unwrap();
    assert_eq!(reply.reply, "(3) And after that?");

    let ended = service.end(&subject, &id).await.unwrap();
    assert_eq!(ended.summary.status, ConversationStatus::Completed);
    assert_eq!(ended.stats.message_count, 5);
    assert_eq!(ended.stats.duration_secs, 240);
    assert!(ended
        .review
        .strengths
        .contains(&"Asked engaging questions".to_string()));

    // ended conversations linger for the grace period, then vanish
    assert!(service.conversation(&subject, &id).is_ok());
    h.clock.advance(Duration::seconds(6));
    assert!(matches!(
        service.conversation(&subject, &id),
        Err(PracticeError::NotFound(_))
    ));
}

#[tokio::test]
async fn message_rate_limit_applies_across_conversations() {
    let h = Harness::new();
    let service = h.service(Arc::new(Echo));
    let subject = SubjectId::new("chatty");
    let first = service.start(&subject, weaving()).unwrap().conversation_id;
    let second = service.start(&subject, weaving()).unwrap().conversation_id;

    service.send(&subject, &first, "one").await.unwrap();
    service.send(&subject, &second, "two").await.unwrap();
    service.send(&subject, &first, "three").await.unwrap();
    let err = service.send(&subject, &second, "four").await.unwrap_err();
    assert!(matches!(err, PracticeError::RateLimited { .. }));

    h.clock.advance(Duration::minutes(1));
    assert!(service.send(&subject, &second, "five").await.is_ok());
}

#[tokio::test]
async fn broken_generator_still_answers_every_turn() {
    let h = Harness::new();
    let service = h.service(Arc::new(Broken));
    let subject = SubjectId::new("s");
    let id = service.start(&subject, weaving()).unwrap().conversation_id;

    for text in ["hello", "anyone there?"] {
        let reply = service.send(&subject, &id, text).await.unwrap();
        assert!(reply.fallback_used);
        assert_eq!(reply.warning.as_deref(), Some(FALLBACK_WARNING));
    }

    let history = h.store.history(&id, None);
    let roles: Vec<Role> = history.iter().map(|t| t.role).collect();
    assert_eq!(
        roles,
        [
            Role::Assistant,
            Role::User,
            Role::Assistant,
            Role::User,
            Role::Assistant
        ]
    );
    let record = h.store.get(&id).unwrap();
    assert_eq!(record.status, ConversationStatus::Active);
    assert!(record.metadata["last_upstream_failure"].contains("connection refused"));
}
