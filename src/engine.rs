//! Engine facade wiring the catalog store, executor, cache, conversation
//! history, and LLM client into the ingestion and question-answering
//! pipelines. The transport layer talks only to this type.

use futures::StreamExt;
use serde::Serialize;
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tracing::{info, warn};

use crate::cache::RedisCache;
use crate::catalog::{AskOutcome, ChatMessage, ChatThread, Dataset, GeneratedQuery, VizType};
use crate::config::Settings;
use crate::conversation::ConversationStore;
use crate::database::{DatabaseManager, GLOBAL_SYSTEM_PROMPT_KEY};
use crate::error::EngineError;
use crate::executor::QueryExecutor;
use crate::ingest;
use crate::llm::{LlmClient, DEFAULT_SYSTEM_PROMPT};
use crate::prompts::{build_answer_prompt, build_sql_prompt};
use crate::registry::DatasetRegistry;
use crate::selector::select_table;
use crate::sql_guard::validate_and_fix;
use crate::table_info::get_table_info;
use crate::viz::classify;

const CHAT_TITLE_MAX_CHARS: usize = 50;

/// One frame of a streaming answer. Metadata arrives first, then tokens,
/// then completion; a mid-stream failure is its own terminal frame.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Frame {
    Metadata {
        table_used: String,
        generated_sql: String,
        columns: Vec<String>,
        data: Vec<serde_json::Value>,
        row_count: usize,
        viz_type: VizType,
    },
    Token {
        content: String,
    },
    Complete {
        answer: String,
    },
    Error {
        error: String,
    },
}

#[derive(Debug, Clone, Serialize)]
pub struct HealthStatus {
    pub database: bool,
    pub cache: bool,
    pub dataset_count: usize,
}

#[derive(Clone)]
pub struct QueryEngine {
    db: DatabaseManager,
    executor: QueryExecutor,
    registry: DatasetRegistry,
    cache: RedisCache,
    conversations: ConversationStore,
    llm: LlmClient,
}

impl QueryEngine {
    pub async fn new(settings: &Settings) -> Result<Self, EngineError> {
        info!(
            database_url = %settings.masked_database_url(),
            model = %settings.llm_model,
            "Starting query engine"
        );

        let db = DatabaseManager::new(&settings.database_url, settings.db_pool_size).await?;
        let executor = QueryExecutor::new(&settings.database_url, settings.db_pool_size)?;
        let cache = RedisCache::connect(settings.redis_url.as_deref()).await;
        let conversations = ConversationStore::new(cache.clone());
        let llm = LlmClient::new(
            &settings.llm_base_url,
            &settings.llm_api_key,
            &settings.llm_model,
        )?;

        let registry = DatasetRegistry::new();
        registry.refresh(&db).await?;

        Ok(Self {
            db,
            executor,
            registry,
            cache,
            conversations,
            llm,
        })
    }

    pub async fn health_check(&self) -> HealthStatus {
        HealthStatus {
            database: self.db.health_check().await.is_ok(),
            cache: self.cache.ping().await,
            dataset_count: self.registry.snapshot().await.len(),
        }
    }

    // Dataset lifecycle

    pub async fn ingest_file(
        &self,
        content: &[u8],
        filename: &str,
    ) -> Result<Dataset, EngineError> {
        ingest::ingest_file(&self.executor, &self.db, &self.registry, content, filename).await
    }

    pub async fn list_datasets(&self) -> Vec<Dataset> {
        self.registry.snapshot().await
    }

    pub async fn sync_datasets(&self) -> Result<usize, EngineError> {
        ingest::sync_datasets(&self.executor, &self.db, &self.registry, &self.cache).await
    }

    pub async fn delete_dataset(&self, dataset_id: i32) -> Result<(), EngineError> {
        ingest::delete_dataset(
            &self.executor,
            &self.db,
            &self.registry,
            &self.cache,
            dataset_id,
        )
        .await
    }

    // Question answering

    /// Answer a question end to end: pick a table, generate and validate SQL,
    /// execute it, synthesize an answer, and classify the visualization.
    pub async fn ask(
        &self,
        question: &str,
        dataset_id: Option<i32>,
        chat_id: Option<i32>,
    ) -> Result<AskOutcome, EngineError> {
        let query = self.run_query_stage(question, dataset_id, chat_id).await?;

        let answer_prompt = build_answer_prompt(question, &query.rows);
        let system_prompt = self.resolve_system_prompt(chat_id).await;
        let answer = self.llm.complete(&answer_prompt, &system_prompt).await?;

        let outcome = into_outcome(query, answer);
        self.record_history(chat_id, question, &outcome).await;
        Ok(outcome)
    }

    /// Streaming variant: the query stage runs up front, then the answer is
    /// forwarded token by token. History is written only after the stream
    /// finishes so a severed consumer leaves no partial entry.
    pub async fn ask_stream(
        &self,
        question: &str,
        dataset_id: Option<i32>,
        chat_id: Option<i32>,
    ) -> Result<ReceiverStream<Frame>, EngineError> {
        let query = self.run_query_stage(question, dataset_id, chat_id).await?;

        let answer_prompt = build_answer_prompt(question, &query.rows);
        let system_prompt = self.resolve_system_prompt(chat_id).await;
        let mut token_stream = self
            .llm
            .complete_stream(&answer_prompt, &system_prompt)
            .await?;

        let (tx, rx) = mpsc::channel::<Frame>(64);
        let engine = self.clone();

        tokio::spawn(async move {
            let viz_type = classify(&query.question, &query.columns, query.row_count);
            let metadata = Frame::Metadata {
                table_used: query.table_used.clone(),
                generated_sql: query.validated_sql.clone(),
                columns: query.columns.clone(),
                data: query.rows.clone(),
                row_count: query.row_count,
                viz_type,
            };
            if tx.send(metadata).await.is_err() {
                return;
            }

            let mut answer = String::new();
            while let Some(token) = token_stream.next().await {
                match token {
                    Ok(token) => {
                        answer.push_str(&token);
                        if tx.send(Frame::Token { content: token }).await.is_err() {
                            return;
                        }
                    }
                    Err(e) => {
                        warn!("Answer stream failed: {}", e);
                        let _ = tx
                            .send(Frame::Error {
                                error: e.to_string(),
                            })
                            .await;
                        return;
                    }
                }
            }

            let question = query.question.clone();
            let outcome = into_outcome(query, answer.clone());
            engine.record_history(chat_id, &question, &outcome).await;
            let _ = tx.send(Frame::Complete { answer }).await;
        });

        Ok(ReceiverStream::new(rx))
    }

    /// Shared first half of `ask`/`ask_stream`: everything up to and
    /// including query execution.
    async fn run_query_stage(
        &self,
        question: &str,
        dataset_id: Option<i32>,
        chat_id: Option<i32>,
    ) -> Result<GeneratedQuery, EngineError> {
        let datasets = self.registry.snapshot().await;
        let selection = select_table(&self.llm, question, &datasets, dataset_id).await?;
        info!(
            table_used = %selection.table_name,
            method = ?selection.method,
            "Table selected"
        );

        let info = get_table_info(&self.executor, &self.cache, &selection.table_name).await?;
        let history = match chat_id {
            Some(chat) => self.conversations.format_history_for_prompt(chat).await,
            None => String::new(),
        };

        let sql_prompt = build_sql_prompt(question, &selection.table_name, &info, &history);
        let raw_sql = self.llm.complete(&sql_prompt, DEFAULT_SYSTEM_PROMPT).await?;
        let validated_sql = validate_and_fix(&raw_sql)?;

        let result = self.executor.run_select(&validated_sql).await?;
        let rows = result.to_json_rows();

        info!(
            table_used = %selection.table_name,
            row_count = result.rows.len(),
            "Query executed"
        );

        Ok(GeneratedQuery {
            question: question.to_string(),
            table_used: selection.table_name,
            raw_sql,
            validated_sql,
            columns: result.columns,
            row_count: result.rows.len(),
            rows,
        })
    }

    async fn record_history(&self, chat_id: Option<i32>, question: &str, outcome: &AskOutcome) {
        let Some(chat) = chat_id else {
            return;
        };
        self.conversations
            .add_to_history(
                chat,
                question,
                &outcome.answer,
                Some(outcome.columns.clone()),
                Some(outcome.data.clone()),
                Some(outcome.viz_type),
            )
            .await;
    }

    /// Chat-level system prompt, falling back to the global setting, then
    /// the built-in default. Lookup failures degrade to the default.
    async fn resolve_system_prompt(&self, chat_id: Option<i32>) -> String {
        if let Some(chat) = chat_id {
            match self.db.get_chat(chat).await {
                Ok(Some(thread)) => {
                    if let Some(prompt) = thread.system_prompt {
                        if !prompt.is_empty() {
                            return prompt;
                        }
                    }
                }
                Ok(None) => {}
                Err(e) => warn!("Failed to load chat {}: {}", chat, e),
            }
        }
        match self.db.get_setting(GLOBAL_SYSTEM_PROMPT_KEY).await {
            Ok(Some(prompt)) if !prompt.is_empty() => prompt,
            Ok(_) => DEFAULT_SYSTEM_PROMPT.to_string(),
            Err(e) => {
                warn!("Failed to load global system prompt: {}", e);
                DEFAULT_SYSTEM_PROMPT.to_string()
            }
        }
    }

    // Chat threads

    pub async fn create_chat(
        &self,
        title: Option<&str>,
        dataset_id: Option<i32>,
        system_prompt: Option<&str>,
    ) -> Result<ChatThread, EngineError> {
        self.db
            .create_chat(title.unwrap_or("New Chat"), dataset_id, system_prompt)
            .await
    }

    pub async fn list_chats(&self, limit: i64) -> Result<Vec<ChatThread>, EngineError> {
        self.db.list_chats(limit).await
    }

    pub async fn get_chat(&self, chat_id: i32) -> Result<Option<ChatThread>, EngineError> {
        self.db.get_chat(chat_id).await
    }

    pub async fn update_chat_title(&self, chat_id: i32, title: &str) -> Result<bool, EngineError> {
        self.db.update_chat_title(chat_id, title).await
    }

    pub async fn update_chat_system_prompt(
        &self,
        chat_id: i32,
        prompt: &str,
    ) -> Result<bool, EngineError> {
        self.db.update_chat_system_prompt(chat_id, prompt).await
    }

    /// Delete a thread along with its Redis-backed history.
    pub async fn delete_chat(&self, chat_id: i32) -> Result<bool, EngineError> {
        let deleted = self.db.delete_chat(chat_id).await?;
        if deleted {
            self.conversations.clear_history(chat_id).await;
        }
        Ok(deleted)
    }

    pub async fn add_message(
        &self,
        chat_id: i32,
        role: &str,
        content: &str,
        metadata: Option<&serde_json::Value>,
    ) -> Result<ChatMessage, EngineError> {
        self.db.add_message(chat_id, role, content, metadata).await
    }

    pub async fn get_messages(
        &self,
        chat_id: i32,
        limit: i64,
    ) -> Result<Vec<ChatMessage>, EngineError> {
        self.db.get_messages(chat_id, limit).await
    }

    /// Derive a thread title from its first question.
    pub async fn auto_generate_title(
        &self,
        chat_id: i32,
        first_question: &str,
    ) -> Result<String, EngineError> {
        let title = derive_title(first_question);
        self.db.update_chat_title(chat_id, &title).await?;
        Ok(title)
    }

    // Settings

    pub async fn get_global_system_prompt(&self) -> Result<Option<String>, EngineError> {
        self.db.get_setting(GLOBAL_SYSTEM_PROMPT_KEY).await
    }

    pub async fn set_global_system_prompt(&self, prompt: &str) -> Result<(), EngineError> {
        self.db.set_setting(GLOBAL_SYSTEM_PROMPT_KEY, prompt).await
    }
}

/// Finish a query stage result: classify the visualization and attach the
/// synthesized answer. Only the validated SQL survives into the response.
fn into_outcome(query: GeneratedQuery, answer: String) -> AskOutcome {
    let viz_type = classify(&query.question, &query.columns, query.row_count);
    AskOutcome {
        table_used: query.table_used,
        generated_sql: query.validated_sql,
        answer,
        columns: query.columns,
        row_count: query.row_count,
        data: query.rows,
        viz_type,
    }
}

fn derive_title(first_question: &str) -> String {
    let trimmed = first_question.trim();
    if trimmed.chars().count() > CHAT_TITLE_MAX_CHARS {
        let head: String = trimmed.chars().take(CHAT_TITLE_MAX_CHARS).collect();
        format!("{}...", head.trim_end())
    } else {
        trimmed.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn titles_truncate_at_fifty_chars() {
        assert_eq!(derive_title("total sales"), "total sales");

        let long = "what were the total sales for every region in the last fiscal year";
        let title = derive_title(long);
        assert!(title.ends_with("..."));
        assert!(title.chars().count() <= CHAT_TITLE_MAX_CHARS + 3);
    }

    #[test]
    fn outcome_keeps_validated_sql_and_classifies_viz() {
        let query = GeneratedQuery {
            question: "show a bar chart of sales by region".into(),
            table_used: "dataset_ab12cd34".into(),
            raw_sql: "```sql\nSELECT region, SUM(amount) AS total FROM dataset_ab12cd34 GROUP BY region\n```".into(),
            validated_sql: "SELECT region, SUM(amount) AS total FROM dataset_ab12cd34 GROUP BY region".into(),
            columns: vec!["region".into(), "total".into()],
            rows: vec![
                serde_json::json!({"region": "west", "total": "120"}),
                serde_json::json!({"region": "east", "total": "80"}),
            ],
            row_count: 2,
        };
        let outcome = into_outcome(query, "The west region leads.".into());
        assert_eq!(outcome.viz_type, VizType::Bar);
        assert!(!outcome.generated_sql.contains("```"));
        assert_eq!(outcome.row_count, 2);
    }

    #[test]
    fn frames_serialize_with_type_tags() {
        let token = Frame::Token {
            content: "SELECT".into(),
        };
        let json = serde_json::to_value(&token).unwrap();
        assert_eq!(json["type"], "token");
        assert_eq!(json["content"], "SELECT");

        let complete = Frame::Complete {
            answer: "done".into(),
        };
        let json = serde_json::to_value(&complete).unwrap();
        assert_eq!(json["type"], "complete");
    }
}
