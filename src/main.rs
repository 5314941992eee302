#![warn(clippy::all, clippy::pedantic)]
#![allow(
    clippy::assigning_clones,
    clippy::bool_to_int_with_if,
    clippy::case_sensitive_file_extension_comparisons,
    clippy::cast_possible_wrap,
    clippy::doc_markdown,
    clippy::field_reassign_with_default,
    clippy::float_cmp,
    clippy::implicit_clone,
    clippy::items_after_statements,
    clippy::map_unwrap_or,
    clippy::manual_let_else,
    clippy::missing_errors_doc,
    clippy::missing_panics_doc,
    clippy::module_name_repetitions,
    clippy::needless_pass_by_value,
    clippy::needless_raw_string_hashes,
    clippy::redundant_closure_for_method_calls,
    clippy::similar_names,
    clippy::single_match_else,
    clippy::struct_field_names,
    clippy::too_many_lines,
    clippy::uninlined_format_args,
    clippy::unused_self,
    clippy::cast_precision_loss,
    clippy::unnecessary_cast,
    clippy::unnecessary_lazy_evaluations,
    clippy::unnecessary_literal_bound,
    clippy::unnecessary_map_or,
    clippy::unnecessary_wraps,
    dead_code
)]

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::info;

use rehearsal::config::Config;
use rehearsal::infra::{create_clock, start_reaper, Sweeper};
use rehearsal::observability::init_logging;
use rehearsal::personas::create_catalog;
use rehearsal::practice::{
    create_practice_service, OfflineGenerator, PracticeError, PracticeService,
};
use rehearsal::security::{random_subject, RateLimiter, SubjectId};
use rehearsal::sessions::{
    create_conversation_store, ConversationConfig, ConversationId, LessonLevel,
};

/// `rehearsal` - practice conversations with simulated people.
#[derive(Parser, Debug)]
#[command(name = "rehearsal")]
#[command(version)]
#[command(about = "Practice conversations with simulated people.", long_about = None)]
struct Cli {
    /// Directory holding config.toml (defaults to ~/.rehearsal)
    #[arg(long, global = true)]
    config_dir: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Start an interactive practice conversation
    #[command(long_about = "\
Start an interactive practice conversation.

Replies come from the offline generator, so no network access is needed. \
Type /stats for live metrics, /pause and /resume to hold the conversation, \
and /end (or Ctrl-D) to finish and get a review.

Examples:
  rehearsal chat lesson small_talk
  rehearsal chat lesson active_listening --level silver -c quiet_observer
  rehearsal chat scenario ./coffee_shop.json")]
    Chat {
        #[command(subcommand)]
        mode: ChatMode,
    },

    /// List the personas available to conversations
    Personas,

    /// Show the effective configuration
    Status,
}

#[derive(Subcommand, Debug)]
enum ChatMode {
    /// Drill a single skill with a practice partner
    Lesson {
        /// Lesson identifier, e.g. small_talk
        lesson_id: String,

        /// Difficulty tier (bronze, silver, gold)
        #[arg(short, long, default_value = "bronze")]
        level: LessonLevel,

        /// Human readable lesson title
        #[arg(long)]
        title: Option<String>,

        /// Persona id to practice with
        #[arg(short, long)]
        character: Option<String>,
    },

    /// Play through a social setting described by a JSON file
    Scenario {
        /// JSON file with `scenario` and optional `mission`
        file: PathBuf,

        /// Persona id to meet, instead of a random member of the cast
        #[arg(short, long)]
        character: Option<String>,
    },
}

impl ChatMode {
    async fn into_config(self) -> Result<ConversationConfig> {
        let (kind, fields) = match self {
            Self::Lesson {
                lesson_id,
                level,
                title,
                character,
            } => (
                "lesson",
                serde_json::json!({
                    "lesson_id": lesson_id,
                    "level": level,
                    "title": title,
                    "character_id": character,
                }),
            ),
            Self::Scenario { file, character } => {
                let mut fields = read_scenario_file(&file).await?;
                if let Some(character) = character {
                    fields["character_id"] = serde_json::Value::String(character);
                }
                ("scenario", fields)
            }
        };
        Ok(ConversationConfig::from_kind(kind, fields)?)
    }
}

async fn read_scenario_file(path: &Path) -> Result<serde_json::Value> {
    let raw = tokio::fs::read_to_string(path)
        .await
        .with_context(|| format!("Failed to read scenario file {}", path.display()))?;
    let value: serde_json::Value = serde_json::from_str(&raw)
        .with_context(|| format!("Failed to parse scenario file {}", path.display()))?;
    if !value.is_object() {
        bail!("Scenario file {} must contain a JSON object", path.display());
    }
    Ok(value)
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    if let Some(config_dir) = &cli.config_dir {
        if config_dir.as_os_str().is_empty() {
            bail!("--config-dir cannot be empty");
        }
    }

    let config = Config::load_or_init(cli.config_dir.as_deref()).await?;
    init_logging(&config.observability)?;

    match cli.command {
        Commands::Chat { mode } => run_chat(config, mode).await,
        Commands::Personas => {
            let catalog_path = config.personas.resolved_catalog_path();
            let catalog = create_catalog(catalog_path.as_deref()).await?;
            let mut personas = catalog.list();
            personas.sort_by(|a, b| a.id.cmp(&b.id));
            println!("Personas ({} catalog):", catalog.name());
            for persona in personas {
                println!("  {:<20} {:<8} {}", persona.id, persona.name, persona.description);
            }
            Ok(())
        }
        Commands::Status => {
            println!("Rehearsal Status");
            println!();
            println!("Version:          {}", env!("CARGO_PKG_VERSION"));
            println!("Config:           {}", config.config_path.display());
            println!();
            println!("Sessions:");
            println!("  Reap interval:  {}s", config.sessions.reap_interval_secs);
            println!("  Idle timeout:   {}s", config.sessions.idle_timeout_secs);
            println!("  Retention:      {}s", config.sessions.retention_secs);
            println!("  End grace:      {}s", config.sessions.end_grace_secs);
            println!("  History limit:  {}", config.sessions.default_history_limit);
            println!();
            println!("Rate limits:");
            for (action, policy) in &config.rate_limits {
                println!(
                    "  {action:<18} {} per {}s",
                    policy.limit, policy.window_secs
                );
            }
            println!();
            println!("Generation timeout: {}s", config.generation.timeout_secs);
            println!(
                "Trust forwarded:    {}",
                if config.identity.trust_forwarded_headers {
                    "yes"
                } else {
                    "no"
                }
            );
            println!(
                "Persona catalog:    {}",
                config
                    .personas
                    .resolved_catalog_path()
                    .map_or_else(|| "(built-in)".to_string(), |p| p.display().to_string())
            );
            Ok(())
        }
    }
}

async fn run_chat(config: Config, mode: ChatMode) -> Result<()> {
    let conversation = mode.into_config().await?;

    let clock = create_clock();
    let catalog = create_catalog(config.personas.resolved_catalog_path().as_deref()).await?;
    let store = create_conversation_store(&config.sessions, catalog, clock.clone());
    let limiter = Arc::new(RateLimiter::from_config(&config.rate_limits, clock));
    let reaper = start_reaper(
        Duration::from_secs(config.sessions.reap_interval_secs),
        vec![
            store.clone() as Arc<dyn Sweeper>,
            limiter.clone() as Arc<dyn Sweeper>,
        ],
    );

    let service = create_practice_service(
        &config,
        store,
        limiter,
        Arc::new(OfflineGenerator::new()),
    );
    let subject = random_subject();
    info!(subject = %subject, "Starting practice session");

    let result = converse(&service, &subject, conversation).await;
    reaper.shutdown().await;
    result
}

async fn converse(
    service: &PracticeService,
    subject: &SubjectId,
    conversation: ConversationConfig,
) -> Result<()> {
    let started = service.start(subject, conversation)?;
    let id = started.conversation_id;
    let name = started.character.name;
    println!("Talking with {name} ({})", started.character.description);
    println!();
    if let Some(opener) = started.opener {
        println!("{name}: {opener}");
    }

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        let line = tokio::select! {
            line = lines.next_line() => line.context("Failed to read from stdin")?,
            _ = tokio::signal::ctrl_c() => None,
        };
        let Some(line) = line else { break };

        match line.trim() {
            "" => continue,
            "/end" | "/quit" => break,
            "/stats" => print_stats(service, subject, &id),
            "/pause" => report(service.pause(subject, &id).map(|()| "Paused.")),
            "/resume" => report(service.resume(subject, &id).map(|()| "Resumed.")),
            message => match service.send(subject, &id, message).await {
                Ok(reply) => {
                    println!("{} {name}: {}", reply.mood.emoji(), reply.reply);
                    if let Some(warning) = reply.warning {
                        println!("  ({warning})");
                    }
                    if let Some(mission) = reply.mission {
                        println!("  mission {}: {}%", mission.mission_id, mission.progress);
                    }
                }
                Err(e) => report::<&str>(Err(e)),
            },
        }
    }

    let ended = service.end(subject, &id).await?;
    println!();
    println!(
        "Review: {} ({}/100)",
        ended.review.rating.as_str(),
        ended.review.score
    );
    println!("{}", ended.review.feedback);
    for strength in &ended.review.strengths {
        println!("  + {strength}");
    }
    for suggestion in &ended.review.suggestions {
        println!("  - {suggestion}");
    }
    println!(
        "{} messages over {}s",
        ended.stats.message_count, ended.stats.duration_secs
    );
    Ok(())
}

fn report<T: std::fmt::Display>(result: Result<T, PracticeError>) {
    match result {
        Ok(message) => println!("{message}"),
        Err(e) => eprintln!("error: {e}"),
    }
}

fn print_stats(service: &PracticeService, subject: &SubjectId, id: &ConversationId) {
    match service.stats(subject, id) {
        Ok(stats) => println!(
            "{} messages ({} yours), avg {} chars, {}s so far",
            stats.message_count,
            stats.user_message_count,
            stats.average_user_message_length,
            stats.duration_secs
        ),
        Err(e) => eprintln!("error: {e}"),
    }
}
