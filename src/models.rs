use chrono::{DateTime, Utc};
use diesel::prelude::*;

use crate::catalog::{ChatMessage, ChatThread, Dataset, FileType};
use crate::schema::{app_settings, chats, dataset_metadata, messages};

#[derive(Queryable, Selectable, Identifiable, Debug, Clone)]
#[diesel(table_name = dataset_metadata)]
pub struct DatasetMetadataModel {
    pub id: i32,
    pub table_name: String,
    pub file_name: String,
    pub file_type: String,
    pub column_names: serde_json::Value,
    pub row_count: i64,
    pub created_at: DateTime<Utc>,
}

#[derive(Insertable)]
#[diesel(table_name = dataset_metadata)]
pub struct NewDatasetMetadata<'a> {
    pub table_name: &'a str,
    pub file_name: &'a str,
    pub file_type: &'a str,
    pub column_names: &'a serde_json::Value,
    pub row_count: i64,
    pub created_at: DateTime<Utc>,
}

#[derive(Queryable, Selectable, Identifiable, Debug, Clone)]
#[diesel(table_name = chats)]
pub struct ChatModel {
    pub id: i32,
    pub title: String,
    pub dataset_id: Option<i32>,
    pub system_prompt: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Insertable)]
#[diesel(table_name = chats)]
pub struct NewChat<'a> {
    pub title: &'a str,
    pub dataset_id: Option<i32>,
    pub system_prompt: Option<&'a str>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Queryable, Selectable, Identifiable, Associations, Debug, Clone)]
#[diesel(table_name = messages)]
#[diesel(belongs_to(ChatModel, foreign_key = chat_id))]
pub struct MessageModel {
    pub id: i32,
    pub chat_id: i32,
    pub role: String,
    pub content: String,
    pub metadata: Option<serde_json::Value>,
    pub created_at: DateTime<Utc>,
}

#[derive(Insertable)]
#[diesel(table_name = messages)]
pub struct NewMessage<'a> {
    pub chat_id: i32,
    pub role: &'a str,
    pub content: &'a str,
    pub metadata: Option<&'a serde_json::Value>,
    pub created_at: DateTime<Utc>,
}

#[derive(Queryable, Selectable, Identifiable, Debug, Clone)]
#[diesel(table_name = app_settings)]
#[diesel(primary_key(key))]
pub struct AppSettingModel {
    pub key: String,
    pub value: String,
    pub updated_at: DateTime<Utc>,
}

#[derive(Insertable)]
#[diesel(table_name = app_settings)]
pub struct NewAppSetting<'a> {
    pub key: &'a str,
    pub value: &'a str,
    pub updated_at: DateTime<Utc>,
}

impl From<DatasetMetadataModel> for Dataset {
    fn from(model: DatasetMetadataModel) -> Self {
        let columns: Vec<String> = serde_json::from_value(model.column_names).unwrap_or_default();
        Dataset {
            id: model.id,
            table_name: model.table_name,
            file_name: model.file_name,
            file_type: FileType::parse(&model.file_type),
            columns,
            row_count: model.row_count,
            created_at: model.created_at,
        }
    }
}

impl ChatModel {
    pub fn into_thread(self, message_count: i64) -> ChatThread {
        ChatThread {
            id: self.id,
            title: self.title,
            dataset_id: self.dataset_id,
            system_prompt: self.system_prompt,
            created_at: self.created_at,
            updated_at: self.updated_at,
            message_count,
        }
    }
}

impl From<MessageModel> for ChatMessage {
    fn from(model: MessageModel) -> Self {
        ChatMessage {
            id: model.id,
            chat_id: model.chat_id,
            role: model.role,
            content: model.content,
            metadata: model.metadata,
            created_at: model.created_at,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn metadata_model_maps_column_names_into_dataset() {
        let model = DatasetMetadataModel {
            id: 1,
            table_name: "dataset_ab12cd34".into(),
            file_name: "sales.csv".into(),
            file_type: "csv".into(),
            column_names: serde_json::json!(["region", "amount"]),
            row_count: 2,
            created_at: Utc::now(),
        };
        let dataset: Dataset = model.into();
        assert_eq!(dataset.columns, vec!["region", "amount"]);
        assert_eq!(dataset.file_type, FileType::Csv);
    }
}
