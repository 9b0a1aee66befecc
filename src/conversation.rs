//! Per-chat conversation history, stored in Redis with a rolling window.
//!
//! History powers follow-up questions ("the 9th one", "that customer") by
//! feeding recent Q&A turns into the SQL prompt. Like the TableInfo cache it
//! is best-effort: storage failures are logged and never fail a request.

use tracing::{debug, warn};

use crate::cache::{conversation_key, RedisCache};
use crate::catalog::{ConversationEntry, VizType};

pub const MAX_HISTORY_LENGTH: usize = 20;
pub const CONVERSATION_TTL_SECONDS: u64 = 2_592_000; // 30 days

const ANSWER_SUMMARY_CHARS: usize = 200;
const MAX_STORED_DATA_ROWS: usize = 100;

/// Conversation store bound to the shared Redis handle.
#[derive(Clone)]
pub struct ConversationStore {
    cache: RedisCache,
}

impl ConversationStore {
    pub fn new(cache: RedisCache) -> Self {
        Self { cache }
    }

    /// Append one Q&A turn, truncating the answer and capping stored data so
    /// entries stay small enough to replay into prompts.
    pub async fn add_to_history(
        &self,
        chat_id: i32,
        question: &str,
        answer: &str,
        columns: Option<Vec<String>>,
        data: Option<Vec<serde_json::Value>>,
        viz_type: Option<VizType>,
    ) {
        let entry = ConversationEntry {
            question: question.to_string(),
            answer: summarize_answer(answer),
            viz_type,
            columns,
            data: data.map(|rows| {
                if rows.len() > MAX_STORED_DATA_ROWS {
                    rows[..MAX_STORED_DATA_ROWS].to_vec()
                } else {
                    rows
                }
            }),
        };

        let mut history = self.get_history(chat_id).await;
        history.push(entry);
        let history = trim_history(history);

        let key = conversation_key(chat_id);
        match serde_json::to_string(&history) {
            Ok(serialized) => {
                self.cache
                    .set_ex(&key, &serialized, CONVERSATION_TTL_SECONDS)
                    .await;
                debug!(
                    "Added to history for chat {}. Length: {}",
                    chat_id,
                    history.len()
                );
            }
            Err(e) => warn!("Failed to serialize history for chat {}: {}", chat_id, e),
        }
    }

    pub async fn get_history(&self, chat_id: i32) -> Vec<ConversationEntry> {
        let Some(raw) = self.cache.get(&conversation_key(chat_id)).await else {
            return Vec::new();
        };
        match serde_json::from_str(&raw) {
            Ok(history) => history,
            Err(e) => {
                warn!("Discarding malformed history for chat {}: {}", chat_id, e);
                Vec::new()
            }
        }
    }

    pub async fn clear_history(&self, chat_id: i32) {
        self.cache.delete(&conversation_key(chat_id)).await;
        debug!("Cleared history for chat {}", chat_id);
    }

    /// Last stored turn that carried result data, for follow-up chart
    /// requests that reuse the previous query's rows.
    pub async fn last_result(&self, chat_id: i32) -> Option<ConversationEntry> {
        self.get_history(chat_id)
            .await
            .into_iter()
            .rev()
            .find(|entry| entry.data.is_some() && entry.columns.is_some())
    }

    pub async fn format_history_for_prompt(&self, chat_id: i32) -> String {
        format_history(&self.get_history(chat_id).await)
    }
}

fn summarize_answer(answer: &str) -> String {
    if answer.chars().count() > ANSWER_SUMMARY_CHARS {
        let truncated: String = answer.chars().take(ANSWER_SUMMARY_CHARS).collect();
        format!("{}...", truncated)
    } else {
        answer.to_string()
    }
}

/// Keep only the newest `MAX_HISTORY_LENGTH` entries.
fn trim_history(mut history: Vec<ConversationEntry>) -> Vec<ConversationEntry> {
    if history.len() > MAX_HISTORY_LENGTH {
        history.drain(..history.len() - MAX_HISTORY_LENGTH);
    }
    history
}

fn truncate(text: &str, max_chars: usize) -> String {
    if text.chars().count() > max_chars {
        let head: String = text.chars().take(max_chars).collect();
        format!("{}...", head)
    } else {
        text.to_string()
    }
}

/// Render history as a prompt section: older turns as brief background, the
/// newest turn in full as the current context.
fn format_history(history: &[ConversationEntry]) -> String {
    let Some((current, background)) = history.split_last() else {
        return String::new();
    };

    let mut formatted = String::new();
    if !background.is_empty() {
        formatted.push_str(
            "\nBACKGROUND CONTEXT (older conversation, for general reference only):\n",
        );
        for (i, item) in background.iter().enumerate() {
            formatted.push_str(&format!(
                "  {}. Q: {}\n     A: {}\n",
                i + 1,
                truncate(&item.question, 80),
                truncate(&item.answer, 500)
            ));
        }
    }

    formatted.push_str(&format!(
        "\nCURRENT CONTEXT (use this for follow-up questions like \"the 9th one\", \
         \"that customer\", \"more details\"):\nQ: {}\nA: {}\n",
        current.question, current.answer
    ));
    formatted
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(question: &str, answer: &str) -> ConversationEntry {
        ConversationEntry {
            question: question.to_string(),
            answer: answer.to_string(),
            viz_type: None,
            columns: None,
            data: None,
        }
    }

    #[test]
    fn history_window_keeps_newest_entries() {
        let history: Vec<ConversationEntry> =
            (0..25).map(|i| entry(&format!("q{}", i), "a")).collect();
        let trimmed = trim_history(history);
        assert_eq!(trimmed.len(), MAX_HISTORY_LENGTH);
        assert_eq!(trimmed[0].question, "q5");
        assert_eq!(trimmed.last().unwrap().question, "q24");
    }

    #[test]
    fn long_answers_are_summarized() {
        let long = "x".repeat(300);
        let summary = summarize_answer(&long);
        assert_eq!(summary.chars().count(), ANSWER_SUMMARY_CHARS + 3);
        assert!(summary.ends_with("..."));

        assert_eq!(summarize_answer("short"), "short");
    }

    #[test]
    fn empty_history_formats_to_nothing() {
        assert_eq!(format_history(&[]), "");
    }

    #[test]
    fn single_entry_has_only_current_context() {
        let formatted = format_history(&[entry("total sales?", "₹12.5 L")]);
        assert!(formatted.contains("CURRENT CONTEXT"));
        assert!(!formatted.contains("BACKGROUND CONTEXT"));
        assert!(formatted.contains("Q: total sales?"));
    }

    #[test]
    fn older_entries_become_background() {
        let formatted = format_history(&[
            entry("first question", "first answer"),
            entry("second question", "second answer"),
        ]);
        assert!(formatted.contains("BACKGROUND CONTEXT"));
        assert!(formatted.contains("1. Q: first question"));
        let current_pos = formatted.find("CURRENT CONTEXT").unwrap();
        assert!(formatted[current_pos..].contains("Q: second question"));
    }

    #[tokio::test]
    async fn disabled_store_degrades_to_empty_history() {
        let store = ConversationStore::new(RedisCache::disabled());
        store.add_to_history(1, "q", "a", None, None, None).await;
        assert!(store.get_history(1).await.is_empty());
        assert!(store.last_result(1).await.is_none());
        assert_eq!(store.format_history_for_prompt(1).await, "");
    }
}
