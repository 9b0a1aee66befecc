use chrono::Utc;
use diesel::prelude::*;
use diesel_async::{
    pooled_connection::{deadpool::Pool, AsyncDieselConnectionManager},
    AsyncPgConnection, RunQueryDsl,
};
use diesel_migrations::{embed_migrations, EmbeddedMigrations, MigrationHarness};
use std::collections::HashMap;
use tracing::info;

use crate::catalog::{ChatMessage, ChatThread, Dataset, FileType};
use crate::error::EngineError;
use crate::models::*;
use crate::schema::*;

pub const MIGRATIONS: EmbeddedMigrations = embed_migrations!("migrations");

pub const GLOBAL_SYSTEM_PROMPT_KEY: &str = "global_system_prompt";

/// Catalog store: dataset metadata, chat threads, messages, and settings.
/// Ingested data tables live in the same database but are managed with
/// dynamic SQL by the executor, not through here.
#[derive(Clone)]
pub struct DatabaseManager {
    pool: Pool<AsyncPgConnection>,
}

impl DatabaseManager {
    pub async fn new(database_url: &str, pool_size: usize) -> Result<Self, EngineError> {
        let config = AsyncDieselConnectionManager::<AsyncPgConnection>::new(database_url);
        let pool = Pool::builder(config)
            .max_size(pool_size)
            .build()
            .map_err(|e| EngineError::Config {
                message: format!("Failed to create database pool: {}", e),
            })?;

        let manager = Self { pool };
        manager.run_migrations(database_url).await?;

        Ok(manager)
    }

    pub async fn run_migrations(&self, database_url: &str) -> Result<(), EngineError> {
        use diesel::Connection;
        use diesel::PgConnection;

        // diesel_migrations has no async support yet, so migrations run on a
        // one-off synchronous connection.
        let mut connection =
            PgConnection::establish(database_url).map_err(|e| EngineError::Config {
                message: format!("Failed to establish connection for migrations: {}", e),
            })?;

        connection
            .run_pending_migrations(MIGRATIONS)
            .map_err(|e| EngineError::Config {
                message: format!("Failed to run migrations: {}", e),
            })?;

        Ok(())
    }

    async fn conn(
        &self,
    ) -> Result<
        diesel_async::pooled_connection::deadpool::Object<AsyncPgConnection>,
        EngineError,
    > {
        self.pool.get().await.map_err(|e| EngineError::Internal {
            message: format!("Failed to get database connection: {}", e),
        })
    }

    pub async fn health_check(&self) -> Result<(), EngineError> {
        let mut conn = self.conn().await?;
        diesel::sql_query("SELECT 1")
            .execute(&mut conn)
            .await
            .map_err(|e| EngineError::Internal {
                message: format!("Database health check failed: {}", e),
            })?;
        Ok(())
    }

    /// Insert or replace the metadata row for one ingested table.
    pub async fn upsert_dataset_metadata(
        &self,
        table: &str,
        file: &str,
        file_type: FileType,
        column_names: &[String],
        rows: i64,
    ) -> Result<Dataset, EngineError> {
        info!(table_name = table, row_count = rows, "Saving dataset metadata");
        let mut conn = self.conn().await?;

        let columns_json = serde_json::to_value(column_names)?;
        let new_metadata = NewDatasetMetadata {
            table_name: table,
            file_name: file,
            file_type: file_type.as_str(),
            column_names: &columns_json,
            row_count: rows,
            created_at: Utc::now(),
        };

        let model: DatasetMetadataModel = diesel::insert_into(dataset_metadata::table)
            .values(&new_metadata)
            .on_conflict(dataset_metadata::table_name)
            .do_update()
            .set((
                dataset_metadata::file_name.eq(file),
                dataset_metadata::file_type.eq(file_type.as_str()),
                dataset_metadata::column_names.eq(&columns_json),
                dataset_metadata::row_count.eq(rows),
            ))
            .get_result(&mut conn)
            .await?;

        Ok(model.into())
    }

    pub async fn list_dataset_metadata(&self) -> Result<Vec<Dataset>, EngineError> {
        use crate::schema::dataset_metadata::dsl::*;

        let mut conn = self.conn().await?;
        let entries = dataset_metadata
            .order(id.asc())
            .get_results::<DatasetMetadataModel>(&mut conn)
            .await?;

        Ok(entries.into_iter().map(|m| m.into()).collect())
    }

    pub async fn delete_dataset_metadata(&self, table: &str) -> Result<bool, EngineError> {
        use crate::schema::dataset_metadata::dsl::*;

        let mut conn = self.conn().await?;
        let deleted = diesel::delete(dataset_metadata.filter(table_name.eq(table)))
            .execute(&mut conn)
            .await?;

        Ok(deleted > 0)
    }

    pub async fn create_chat(
        &self,
        title: &str,
        dataset: Option<i32>,
        prompt: Option<&str>,
    ) -> Result<ChatThread, EngineError> {
        let mut conn = self.conn().await?;
        let now = Utc::now();
        let new_chat = NewChat {
            title,
            dataset_id: dataset,
            system_prompt: prompt,
            created_at: now,
            updated_at: now,
        };

        let model: ChatModel = diesel::insert_into(chats::table)
            .values(&new_chat)
            .get_result(&mut conn)
            .await?;

        Ok(model.into_thread(0))
    }

    pub async fn list_chats(&self, limit: i64) -> Result<Vec<ChatThread>, EngineError> {
        let mut conn = self.conn().await?;

        let chat_models = chats::table
            .order(chats::updated_at.desc())
            .limit(limit)
            .get_results::<ChatModel>(&mut conn)
            .await?;

        let counts: Vec<(i32, i64)> = messages::table
            .group_by(messages::chat_id)
            .select((messages::chat_id, diesel::dsl::count(messages::id)))
            .load(&mut conn)
            .await?;
        let counts: HashMap<i32, i64> = counts.into_iter().collect();

        Ok(chat_models
            .into_iter()
            .map(|c| {
                let count = counts.get(&c.id).copied().unwrap_or(0);
                c.into_thread(count)
            })
            .collect())
    }

    pub async fn get_chat(&self, chat: i32) -> Result<Option<ChatThread>, EngineError> {
        let mut conn = self.conn().await?;

        let model = chats::table
            .filter(chats::id.eq(chat))
            .get_result::<ChatModel>(&mut conn)
            .await
            .optional()?;
        let Some(model) = model else {
            return Ok(None);
        };

        let count: i64 = messages::table
            .filter(messages::chat_id.eq(chat))
            .count()
            .get_result(&mut conn)
            .await?;

        Ok(Some(model.into_thread(count)))
    }

    pub async fn update_chat_title(&self, chat: i32, new_title: &str) -> Result<bool, EngineError> {
        let mut conn = self.conn().await?;
        let updated = diesel::update(chats::table.filter(chats::id.eq(chat)))
            .set((chats::title.eq(new_title), chats::updated_at.eq(Utc::now())))
            .execute(&mut conn)
            .await?;
        Ok(updated > 0)
    }

    pub async fn update_chat_system_prompt(
        &self,
        chat: i32,
        prompt: &str,
    ) -> Result<bool, EngineError> {
        let mut conn = self.conn().await?;
        let updated = diesel::update(chats::table.filter(chats::id.eq(chat)))
            .set((
                chats::system_prompt.eq(prompt),
                chats::updated_at.eq(Utc::now()),
            ))
            .execute(&mut conn)
            .await?;
        Ok(updated > 0)
    }

    pub async fn delete_chat(&self, chat: i32) -> Result<bool, EngineError> {
        let mut conn = self.conn().await?;
        diesel::delete(messages::table.filter(messages::chat_id.eq(chat)))
            .execute(&mut conn)
            .await?;
        let deleted = diesel::delete(chats::table.filter(chats::id.eq(chat)))
            .execute(&mut conn)
            .await?;
        if deleted > 0 {
            info!(chat_id = chat, "Deleted chat");
        }
        Ok(deleted > 0)
    }

    /// Append a message and bump the thread's updated timestamp.
    pub async fn add_message(
        &self,
        chat: i32,
        role: &str,
        content: &str,
        metadata: Option<&serde_json::Value>,
    ) -> Result<ChatMessage, EngineError> {
        let mut conn = self.conn().await?;

        let new_message = NewMessage {
            chat_id: chat,
            role,
            content,
            metadata,
            created_at: Utc::now(),
        };
        let model: MessageModel = diesel::insert_into(messages::table)
            .values(&new_message)
            .get_result(&mut conn)
            .await?;

        diesel::update(chats::table.filter(chats::id.eq(chat)))
            .set(chats::updated_at.eq(Utc::now()))
            .execute(&mut conn)
            .await?;

        Ok(model.into())
    }

    pub async fn get_messages(
        &self,
        chat: i32,
        limit: i64,
    ) -> Result<Vec<ChatMessage>, EngineError> {
        let mut conn = self.conn().await?;
        let models = messages::table
            .filter(messages::chat_id.eq(chat))
            .order(messages::created_at.asc())
            .limit(limit)
            .get_results::<MessageModel>(&mut conn)
            .await?;
        Ok(models.into_iter().map(|m| m.into()).collect())
    }

    pub async fn get_setting(&self, setting_key: &str) -> Result<Option<String>, EngineError> {
        use crate::schema::app_settings::dsl::*;

        let mut conn = self.conn().await?;
        let model = app_settings
            .filter(key.eq(setting_key))
            .get_result::<AppSettingModel>(&mut conn)
            .await
            .optional()?;
        Ok(model.map(|m| m.value))
    }

    pub async fn set_setting(
        &self,
        setting_key: &str,
        setting_value: &str,
    ) -> Result<(), EngineError> {
        let mut conn = self.conn().await?;
        let new_setting = NewAppSetting {
            key: setting_key,
            value: setting_value,
            updated_at: Utc::now(),
        };
        diesel::insert_into(app_settings::table)
            .values(&new_setting)
            .on_conflict(app_settings::key)
            .do_update()
            .set((
                app_settings::value.eq(setting_value),
                app_settings::updated_at.eq(Utc::now()),
            ))
            .execute(&mut conn)
            .await?;
        Ok(())
    }
}
