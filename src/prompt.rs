use serde::Serialize;
use thiserror::Error;

use crate::dataset::TabularDataset;

/// Fixed instruction sent with every request: persona, output rules and the
/// chart JSON contract.
pub const SYSTEM_INSTRUCTION: &str = r#"You are a professional and insightful business analyst chatbot. Your task is to analyze the provided CSV data to answer the user's question.
- First, provide a clear, concise, and actionable insight based on the user's question. Format your response using markdown for readability (e.g., use bullet points for lists).
- If the user's query can be better understood with a visualization (like 'show me a chart of sales per region'), then after your textual response, add a special separator on a new line: '||CHART_DATA||'.
- Immediately following the separator, provide a single, valid JSON object for the chart. Do not include any other text or markdown formatting around the JSON.
- The chart JSON must have 'type' ('bar', 'line', or 'pie'), 'title', and 'data' (an array of objects with 'name' and 'value').
- If a chart is not relevant, do not include the separator or the JSON object.
- Base all your answers and chart data strictly on the provided dataset. Do not make up information.
- If the question cannot be answered with the given data, state that clearly in your textual response.
- Crucially, do not repeat or show the raw data from the CSV in your response. Your answer should present only the final answer, logic, or insights derived from the data."#;

#[derive(Debug, Error)]
pub enum PromptError {
    #[error("cannot build a prompt from an empty dataset")]
    EmptyDataset,
}

/// Everything a backend needs to answer one question.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ChatRequest {
    pub question: String,
    pub system_instruction: String,
    /// The dataset rendered as CSV text.
    pub dataset_csv: String,
    /// User-turn prompt with the dataset embedded verbatim.
    pub prompt: String,
}

pub fn build_request(dataset: &TabularDataset, question: &str) -> Result<ChatRequest, PromptError> {
    if dataset.is_empty() {
        return Err(PromptError::EmptyDataset);
    }

    let dataset_csv = dataset.to_csv_string();
    let prompt = format!(
        "Here is the data in CSV format:\n\n```csv\n{dataset_csv}\n```\n\nNow, please answer the following question: {question}"
    );

    Ok(ChatRequest {
        question: question.to_string(),
        system_instruction: SYSTEM_INSTRUCTION.to_string(),
        dataset_csv,
        prompt,
    })
}
