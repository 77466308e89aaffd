use std::collections::BTreeMap;
use std::time::Duration;

use crate::db::Repository;
use crate::error::{AppError, Result};
use crate::models::Question;
use crate::telegram::TelegramClient;

/// Hard limit of the delivery platform for one text message.
pub const MAX_MESSAGE_LEN: usize = 4096;

// Pause after this many outbound messages to stay under the platform's
// rate limit. Counted across the whole cycle, not per subscriber.
const PACING_EVERY: u64 = 30;
const PACING_PAUSE: Duration = Duration::from_secs(1);

pub fn format_question_line(question: &Question) -> String {
    format!("Question: {}, link: {}\n", question.title, question.link)
}

/// Pack lines into chunks, flushing before a line would push the chunk to
/// `max_len` or beyond. Concatenating the chunks reproduces the input lines
/// in order. A single line at or over the limit still becomes its own chunk.
pub fn chunk_lines<I>(lines: I, max_len: usize) -> Vec<String>
where
    I: IntoIterator<Item = String>,
{
    let mut chunks = Vec::new();
    let mut current = String::new();

    for line in lines {
        if !current.is_empty() && current.len() + line.len() >= max_len {
            chunks.push(std::mem::take(&mut current));
        }
        current.push_str(&line);
    }
    if !current.is_empty() {
        chunks.push(current);
    }
    chunks
}

pub struct Dispatcher {
    telegram: TelegramClient,
}

impl Dispatcher {
    pub fn new(telegram: TelegramClient) -> Self {
        Self { telegram }
    }

    /// Deliver each subscriber's matched questions as size-bounded messages.
    ///
    /// `sent` is the cycle-wide outbound counter driving the pacing pause.
    /// An unreachable recipient loses all their subscriptions and delivery
    /// moves on to the next subscriber; any other send error aborts and is
    /// handled by the scheduler's fault containment.
    pub async fn deliver(
        &self,
        repo: &Repository,
        queued: &BTreeMap<i64, Vec<Question>>,
        sent: &mut u64,
    ) -> Result<()> {
        for (&chat_id, questions) in queued {
            let lines = questions.iter().map(format_question_line);
            let chunks = chunk_lines(lines, MAX_MESSAGE_LEN);

            for chunk in chunks {
                match self.telegram.send_message(chat_id, &chunk).await {
                    Ok(()) => {
                        *sent += 1;
                        if *sent % PACING_EVERY == 0 {
                            tracing::info!("Sent {} messages, pausing", sent);
                            tokio::time::sleep(PACING_PAUSE).await;
                        }
                    }
                    Err(AppError::RecipientUnreachable(_)) => {
                        let removed = repo.delete_subscriptions_for_chat(chat_id).await?;
                        tracing::warn!(
                            "Chat {} is unreachable, removed its {} subscriptions",
                            chat_id,
                            removed
                        );
                        break;
                    }
                    Err(e) => return Err(e),
                }
            }
        }
        Ok(())
    }
}
