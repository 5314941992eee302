use anyhow::Result;
use async_trait::async_trait;
use parking_lot::Mutex;
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;

use super::traits::ReplyGenerator;
use crate::sessions::HistoryTurn;

const QUESTION_REPLIES: &[&str] = &[
    "*thinks for a moment* Good question. What made you ask?",
    "*tilts head* Hmm, I'd have to think about that. What about you?",
    "*smiles* Honestly? It depends. How would you answer it?",
];

const STATEMENT_REPLIES: &[&str] = &[
    "*nods* Tell me more about that.",
    "*leans forward* Oh? How so?",
    "*smiles* That's interesting. What happened next?",
    "*raises eyebrow* Really? I wouldn't have guessed.",
];

/// Generator that needs no network: picks a plausible stock reaction.
///
/// Used by the CLI so the conversation loop can be exercised end to end.
pub struct OfflineGenerator {
    rng: Mutex<StdRng>,
}

impl OfflineGenerator {
    pub fn new() -> Self {
        Self {
            rng: Mutex::new(StdRng::from_entropy()),
        }
    }

    pub fn with_seed(seed: u64) -> Self {
        Self {
            rng: Mutex::new(StdRng::seed_from_u64(seed)),
        }
    }
}

impl Default for OfflineGenerator {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ReplyGenerator for OfflineGenerator {
    async fn generate(
        &self,
        _system_prompt: &str,
        _history: &[HistoryTurn],
        user_message: &str,
    ) -> Result<String> {
        let pool = if user_message.trim_end().ends_with('?') {
            QUESTION_REPLIES
        } else {
            STATEMENT_REPLIES
        };
        let mut rng = self.rng.lock();
        pool.choose(&mut *rng)
            .map(|line| (*line).to_string())
            .ok_or_else(|| anyhow::anyhow!("no stock replies available"))
    }

    fn name(&self) -> &str {
        "offline"
    }
}
