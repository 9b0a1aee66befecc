//! Choosing which dataset answers a question.
//!
//! Explicit dataset ids are honored strictly; otherwise a single dataset is
//! used directly, and with several the LLM picks from a schema summary. LLM
//! failures fall back to the first dataset, and the chosen method rides along
//! in the result so callers can log how the decision was made.

use serde::Deserialize;
use tracing::{info, warn};

use crate::catalog::Dataset;
use crate::error::EngineError;
use crate::llm::{LlmClient, DEFAULT_SYSTEM_PROMPT};
use crate::prompts::build_table_selection_prompt;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SelectionMethod {
    Explicit,
    SoleDataset,
    LlmChoice,
    /// The LLM call failed or returned an unknown table.
    FallbackFirst,
}

#[derive(Debug, Clone)]
pub struct Selection {
    pub table_name: String,
    pub method: SelectionMethod,
}

#[derive(Debug, Deserialize)]
struct TableChoice {
    table_name: String,
}

pub async fn select_table(
    llm: &LlmClient,
    question: &str,
    datasets: &[Dataset],
    dataset_id: Option<i32>,
) -> Result<Selection, EngineError> {
    if datasets.is_empty() {
        return Err(EngineError::NoDatasets);
    }

    if let Some(id) = dataset_id {
        let dataset = datasets.iter().find(|d| d.id == id).ok_or_else(|| {
            EngineError::DatasetNotFound {
                dataset_id: id.to_string(),
            }
        })?;
        info!(
            "Selected table '{}' for dataset_id {}",
            dataset.table_name, id
        );
        return Ok(Selection {
            table_name: dataset.table_name.clone(),
            method: SelectionMethod::Explicit,
        });
    }

    if datasets.len() == 1 {
        info!("Auto-selected single table: {}", datasets[0].table_name);
        return Ok(Selection {
            table_name: datasets[0].table_name.clone(),
            method: SelectionMethod::SoleDataset,
        });
    }

    info!("Auto-detecting table using LLM");
    match llm_choice(llm, question, datasets).await {
        Ok(table_name) => {
            info!("LLM selected table: {}", table_name);
            Ok(Selection {
                table_name,
                method: SelectionMethod::LlmChoice,
            })
        }
        Err(e) => {
            warn!("Schema selection failed, using first dataset: {}", e);
            Ok(Selection {
                table_name: datasets[0].table_name.clone(),
                method: SelectionMethod::FallbackFirst,
            })
        }
    }
}

async fn llm_choice(
    llm: &LlmClient,
    question: &str,
    datasets: &[Dataset],
) -> Result<String, EngineError> {
    let prompt = build_table_selection_prompt(question, datasets);
    let response = llm.complete(&prompt, DEFAULT_SYSTEM_PROMPT).await?;

    let cleaned = clean_json_response(&response);
    let choice: TableChoice =
        serde_json::from_str(&cleaned).map_err(|e| EngineError::Llm {
            message: format!("Table selection returned invalid JSON: {}", e),
        })?;

    if !datasets.iter().any(|d| d.table_name == choice.table_name) {
        return Err(EngineError::Llm {
            message: format!("Table selection returned unknown table: {}", choice.table_name),
        });
    }
    Ok(choice.table_name)
}

fn clean_json_response(response: &str) -> String {
    response
        .replace("```json", "")
        .replace("```", "")
        .trim()
        .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::FileType;
    use chrono::Utc;

    fn dataset(id: i32, table: &str) -> Dataset {
        Dataset {
            id,
            table_name: table.to_string(),
            file_name: format!("{}.csv", table),
            file_type: FileType::Csv,
            columns: vec!["a".into()],
            row_count: 1,
            created_at: Utc::now(),
        }
    }

    fn client() -> LlmClient {
        LlmClient::new("http://localhost:1", "key", "gpt-4o").unwrap()
    }

    #[tokio::test]
    async fn empty_registry_is_an_error() {
        let err = select_table(&client(), "q", &[], None).await.unwrap_err();
        assert!(matches!(err, EngineError::NoDatasets));
    }

    #[tokio::test]
    async fn explicit_id_must_exist() {
        let datasets = vec![dataset(1, "dataset_a")];
        let err = select_table(&client(), "q", &datasets, Some(9))
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::DatasetNotFound { .. }));

        let selection = select_table(&client(), "q", &datasets, Some(1))
            .await
            .unwrap();
        assert_eq!(selection.table_name, "dataset_a");
        assert_eq!(selection.method, SelectionMethod::Explicit);
    }

    #[tokio::test]
    async fn single_dataset_skips_the_llm() {
        let datasets = vec![dataset(1, "dataset_a")];
        let selection = select_table(&client(), "q", &datasets, None).await.unwrap();
        assert_eq!(selection.method, SelectionMethod::SoleDataset);
    }

    #[tokio::test]
    async fn llm_failure_falls_back_to_first_dataset() {
        // Unreachable endpoint forces the fallback path.
        let datasets = vec![dataset(1, "dataset_a"), dataset(2, "dataset_b")];
        let selection = select_table(&client(), "q", &datasets, None).await.unwrap();
        assert_eq!(selection.table_name, "dataset_a");
        assert_eq!(selection.method, SelectionMethod::FallbackFirst);
    }

    #[test]
    fn json_fences_are_stripped() {
        let raw = "```json\n{\"table_name\": \"dataset_a\"}\n```";
        let cleaned = clean_json_response(raw);
        let choice: TableChoice = serde_json::from_str(&cleaned).unwrap();
        assert_eq!(choice.table_name, "dataset_a");
    }
}
