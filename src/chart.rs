//! Chart specifications returned by the assistant after the chart separator.
//!
//! Wire format:
//! `{"type": "bar"|"line"|"pie", "title": "...", "data": [{"name": "...", "value": 1}]}`

use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChartKind {
    Bar,
    Line,
    Pie,
}

impl ChartKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ChartKind::Bar => "bar",
            ChartKind::Line => "line",
            ChartKind::Pie => "pie",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SeriesPoint {
    pub name: String,
    pub value: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChartSpec {
    #[serde(rename = "type")]
    pub kind: ChartKind,
    pub title: String,
    #[serde(rename = "data")]
    pub series: Vec<SeriesPoint>,
}

#[derive(Debug, Error)]
#[error("chart payload is not a valid chart specification: {source}")]
pub struct ChartDecodeError {
    #[source]
    source: serde_json::Error,
}

impl ChartSpec {
    /// Decodes the raw text collected after the separator.
    ///
    /// Surrounding whitespace and one wrapping markdown code fence are
    /// ignored, since models add them despite being told not to.
    pub fn decode(raw: &str) -> Result<Self, ChartDecodeError> {
        serde_json::from_str(strip_code_fence(raw))
            .map_err(|source| ChartDecodeError { source })
    }
}

fn strip_code_fence(raw: &str) -> &str {
    let trimmed = raw.trim();
    let Some(rest) = trimmed.strip_prefix("```") else {
        return trimmed;
    };
    let Some(body) = rest.strip_suffix("```") else {
        return trimmed;
    };
    // drop the info string ("json") on the opening fence line
    match body.find('\n') {
        Some(newline) => body[newline + 1..].trim(),
        None => body.trim(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decode_bar_chart() {
        let chart =
            ChartSpec::decode(r#"{"type":"bar","title":"Sales","data":[{"name":"A","value":1}]}"#)
                .unwrap();
        assert_eq!(
            chart,
            ChartSpec {
                kind: ChartKind::Bar,
                title: "Sales".to_string(),
                series: vec![SeriesPoint {
                    name: "A".to_string(),
                    value: 1.0
                }],
            }
        );
    }

    #[test]
    fn test_decode_tolerates_whitespace_and_fence() {
        let raw = "\n```json\n{\"type\":\"pie\",\"title\":\"Share\",\"data\":[]}\n```\n";
        let chart = ChartSpec::decode(raw).unwrap();
        assert_eq!(chart.kind, ChartKind::Pie);
        assert!(chart.series.is_empty());
    }

    #[test]
    fn test_decode_rejects_unknown_kind() {
        let err = ChartSpec::decode(r#"{"type":"scatter","title":"x","data":[]}"#);
        assert!(err.is_err());
    }

    #[test]
    fn test_decode_rejects_truncated_json() {
        assert!(ChartSpec::decode(r#"{"type":"line","title":"T","data":[{"na"#).is_err());
    }

    #[test]
    fn test_serializes_wire_field_names() {
        let chart = ChartSpec {
            kind: ChartKind::Line,
            title: "T".into(),
            series: vec![],
        };
        let value = serde_json::to_value(&chart).unwrap();
        assert_eq!(value["type"], "line");
        assert!(value.get("data").is_some());
    }
}
