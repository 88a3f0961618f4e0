//! Plain-text rendering for the terminal commands: data preview tables,
//! charts and an incremental transcript printer.

use std::collections::HashSet;
use std::fmt::Write as _;

use crate::assembler::CHART_SEPARATOR;
use crate::chart::{ChartKind, ChartSpec};
use crate::conversation::{MessageId, MessageStatus, Sender, TranscriptSnapshot};
use crate::dataset::DatasetPreview;

const BAR_WIDTH: usize = 40;
const LABEL_WIDTH_MAX: usize = 24;

pub fn render_preview(preview: &DatasetPreview) -> String {
    let mut widths: Vec<usize> = preview.headers.iter().map(|h| h.chars().count()).collect();
    for row in &preview.rows {
        for (i, cell) in row.iter().enumerate() {
            if let Some(w) = widths.get_mut(i) {
                *w = (*w).max(cell.chars().count());
            }
        }
    }

    let line = |cells: &[String]| -> String {
        cells
            .iter()
            .zip(&widths)
            .map(|(cell, w)| format!("{cell:<w$}"))
            .collect::<Vec<_>>()
            .join(" | ")
            .trim_end()
            .to_string()
    };

    let mut out = String::new();
    let _ = writeln!(out, "Data Preview ({})", preview.caption());
    let _ = writeln!(out, "{}", line(&preview.headers));
    let _ = writeln!(
        out,
        "{}",
        widths
            .iter()
            .map(|w| "-".repeat(*w))
            .collect::<Vec<_>>()
            .join("-+-")
    );
    for row in &preview.rows {
        let _ = writeln!(out, "{}", line(row));
    }
    out
}

pub fn render_chart(chart: &ChartSpec) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "[{} chart] {}", chart.kind.as_str(), chart.title);
    if chart.series.is_empty() {
        let _ = writeln!(out, "  (no data)");
        return out;
    }

    let label_width = chart
        .series
        .iter()
        .map(|p| p.name.chars().count())
        .max()
        .unwrap_or(0)
        .min(LABEL_WIDTH_MAX);

    match chart.kind {
        ChartKind::Bar => {
            let max = chart
                .series
                .iter()
                .map(|p| p.value.abs())
                .fold(0.0_f64, f64::max);
            for point in &chart.series {
                let len = scaled(point.value.abs(), max, BAR_WIDTH);
                let _ = writeln!(
                    out,
                    "  {:<label_width$} | {} {}",
                    truncate(&point.name, label_width),
                    "█".repeat(len),
                    format_value(point.value)
                );
            }
        }
        ChartKind::Line => {
            let min = chart.series.iter().map(|p| p.value).fold(f64::INFINITY, f64::min);
            let max = chart
                .series
                .iter()
                .map(|p| p.value)
                .fold(f64::NEG_INFINITY, f64::max);
            for point in &chart.series {
                let offset = scaled(point.value - min, max - min, BAR_WIDTH - 1);
                let _ = writeln!(
                    out,
                    "  {:<label_width$} |{}●{} {}",
                    truncate(&point.name, label_width),
                    " ".repeat(offset),
                    " ".repeat(BAR_WIDTH - 1 - offset),
                    format_value(point.value)
                );
            }
        }
        ChartKind::Pie => {
            let total: f64 = chart.series.iter().map(|p| p.value.max(0.0)).sum();
            for point in &chart.series {
                let share = if total > 0.0 {
                    point.value.max(0.0) / total
                } else {
                    0.0
                };
                let _ = writeln!(
                    out,
                    "  {:<label_width$} | {:>5.1}% {}",
                    truncate(&point.name, label_width),
                    share * 100.0,
                    "■".repeat(scaled(share, 1.0, BAR_WIDTH / 2))
                );
            }
        }
    }
    out
}

fn scaled(value: f64, max: f64, width: usize) -> usize {
    if max <= 0.0 || !value.is_finite() {
        return 0;
    }
    ((value / max) * width as f64).round().clamp(0.0, width as f64) as usize
}

fn truncate(s: &str, width: usize) -> String {
    if s.chars().count() <= width {
        s.to_string()
    } else {
        let mut t: String = s.chars().take(width.saturating_sub(1)).collect();
        t.push('…');
        t
    }
}

pub fn format_value(v: f64) -> String {
    if v.fract() == 0.0 && v.abs() < 1e15 {
        format!("{}", v as i64)
    } else {
        format!("{v:.2}")
    }
}

/// Turns successive transcript snapshots into terminal output.
///
/// Streaming text is printed as it grows, except for a trailing piece that
/// may turn out to be a chart separator. When the reply is finalized only
/// the part not yet shown is printed, followed by the chart if there is one.
#[derive(Debug, Default)]
pub struct TranscriptPrinter {
    generation: u64,
    finished: HashSet<MessageId>,
    current: Option<MessageId>,
    printed: String,
}

impl TranscriptPrinter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns what should be written for this snapshot (possibly nothing).
    pub fn render(&mut self, snapshot: &TranscriptSnapshot) -> String {
        if snapshot.generation != self.generation {
            self.generation = snapshot.generation;
            self.finished.clear();
            self.current = None;
            self.printed.clear();
        }

        let mut out = String::new();
        for message in &snapshot.messages {
            if message.sender != Sender::Assistant || self.finished.contains(&message.id) {
                continue;
            }
            if self.current != Some(message.id) {
                self.current = Some(message.id);
                self.printed.clear();
            }

            match message.status {
                MessageStatus::Pending => {}
                MessageStatus::Streaming => {
                    let settled = message.text.len() - separator_prefix_len(&message.text);
                    if let Some(rest) = message.text[..settled].strip_prefix(self.printed.as_str()) {
                        out.push_str(rest);
                        self.printed.push_str(rest);
                    }
                }
                MessageStatus::Done | MessageStatus::Failed => {
                    let shown = common_prefix_len(&self.printed, &message.text);
                    if message.status == MessageStatus::Failed && self.printed.is_empty() {
                        out.push_str("! ");
                    }
                    out.push_str(&message.text[shown..]);
                    out.push('\n');
                    if let Some(chart) = &message.chart {
                        out.push('\n');
                        out.push_str(&render_chart(chart));
                    }
                    self.finished.insert(message.id);
                    self.current = None;
                    self.printed.clear();
                }
            }
        }
        out
    }
}

/// Length of the longest tail of `text` that could be the start of a chart
/// separator. That tail is held back until the next update settles it.
fn separator_prefix_len(text: &str) -> usize {
    (1..CHART_SEPARATOR.len())
        .rev()
        .find(|&n| text.ends_with(&CHART_SEPARATOR[..n]))
        .unwrap_or(0)
}

fn common_prefix_len(a: &str, b: &str) -> usize {
    a.char_indices()
        .zip(b.chars())
        .find(|((_, ca), cb)| ca != cb)
        .map(|((i, _), _)| i)
        .unwrap_or_else(|| a.len().min(b.len()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chart::SeriesPoint;
    use crate::conversation::Conversation;
    use crate::conversation::Outcome;
    use crate::dataset::TabularDataset;

    fn chart(kind: ChartKind) -> ChartSpec {
        ChartSpec {
            kind,
            title: "Sales by Product".into(),
            series: vec![
                SeriesPoint { name: "A".into(), value: 10.0 },
                SeriesPoint { name: "B".into(), value: 20.0 },
            ],
        }
    }

    #[test]
    fn test_bar_chart_scales_to_max() {
        let out = render_chart(&chart(ChartKind::Bar));
        assert!(out.starts_with("[bar chart] Sales by Product"));
        assert!(out.contains(&format!("B | {} 20", "█".repeat(BAR_WIDTH))));
        assert!(out.contains(&format!("A | {} 10", "█".repeat(BAR_WIDTH / 2))));
    }

    #[test]
    fn test_pie_chart_shows_shares() {
        let out = render_chart(&chart(ChartKind::Pie));
        assert!(out.contains(" 33.3%"));
        assert!(out.contains(" 66.7%"));
    }

    #[test]
    fn test_line_chart_places_extremes() {
        let out = render_chart(&chart(ChartKind::Line));
        let lines: Vec<&str> = out.lines().collect();
        assert!(lines[1].contains("|●"));
        assert!(lines[2].contains(&format!("{}● 20", " ".repeat(BAR_WIDTH - 1))));
    }

    #[test]
    fn test_format_value() {
        assert_eq!(format_value(10.0), "10");
        assert_eq!(format_value(2.5), "2.50");
    }

    #[test]
    fn test_preview_table() {
        let ds = TabularDataset::from_csv_text("product,sales\nWidget,10\nB,20").unwrap();
        let out = render_preview(&ds.preview(5));
        assert!(out.contains("Showing first 2 of 2 rows"));
        assert!(out.contains("product | sales"));
        assert!(out.contains("Widget  | 10"));
    }

    #[test]
    fn test_printer_streams_then_finishes() {
        let mut conv = Conversation::new();
        let mut printer = TranscriptPrinter::new();
        conv.append_user_message("q");
        let handle = conv.begin_assistant_message().unwrap();
        assert_eq!(printer.render(&conv.snapshot()), "");

        conv.update_assistant_text(&handle, "Here are ").unwrap();
        assert_eq!(printer.render(&conv.snapshot()), "Here are ");
        conv.update_assistant_text(&handle, "Here are the sales.||CH").unwrap();
        assert_eq!(printer.render(&conv.snapshot()), "the sales.");

        conv.finalize_assistant(
            &handle,
            "Here are the sales.".into(),
            Some(chart(ChartKind::Bar)),
            Outcome::Done,
        )
        .unwrap();
        let out = printer.render(&conv.snapshot());
        assert!(out.starts_with("\n\n[bar chart]"));
        // finished messages are not printed again
        assert_eq!(printer.render(&conv.snapshot()), "");
    }

    #[test]
    fn test_printer_releases_text_that_was_not_a_separator() {
        let mut conv = Conversation::new();
        let mut printer = TranscriptPrinter::new();
        let handle = conv.begin_assistant_message().unwrap();

        conv.update_assistant_text(&handle, "A is 10 |").unwrap();
        assert_eq!(printer.render(&conv.snapshot()), "A is 10 ");
        conv.update_assistant_text(&handle, "A is 10 | B is 20").unwrap();
        assert_eq!(printer.render(&conv.snapshot()), "| B is 20");

        conv.finalize_assistant(&handle, "A is 10 | B is 20".into(), None, Outcome::Done)
            .unwrap();
        assert_eq!(printer.render(&conv.snapshot()), "\n");
    }

    #[test]
    fn test_separator_prefix_len() {
        assert_eq!(separator_prefix_len("done."), 0);
        assert_eq!(separator_prefix_len("done.|"), 1);
        assert_eq!(separator_prefix_len("done.||CHART_DATA|"), CHART_SEPARATOR.len() - 1);
        assert_eq!(separator_prefix_len("a || b"), 0);
    }

    #[test]
    fn test_printer_marks_failures() {
        let mut conv = Conversation::new();
        let mut printer = TranscriptPrinter::new();
        let handle = conv.begin_assistant_message().unwrap();
        conv.finalize_assistant(&handle, "I'm sorry".into(), None, Outcome::Failed)
            .unwrap();
        assert_eq!(printer.render(&conv.snapshot()), "! I'm sorry\n");
    }
}
