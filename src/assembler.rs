//! Demultiplexes a streamed assistant reply into narrative text and a
//! trailing chart payload.
//!
//! The backend writes free-form markdown, optionally followed by
//! [`CHART_SEPARATOR`] and a JSON chart document. Fragments arrive in
//! arbitrary sizes; everything before the first separator is narrative,
//! everything after it is buffered until the stream ends and then decoded.

use tracing::{debug, warn};

use crate::chart::{ChartDecodeError, ChartSpec};

/// Marker between the narrative and the chart JSON.
pub const CHART_SEPARATOR: &str = "||CHART_DATA||";

/// Appended to the narrative when the chart payload cannot be decoded.
pub const CHART_ERROR_SUFFIX: &str = "\n\n(There was an error displaying the chart.)";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AssemblyMode {
    Narrative,
    Chart,
}

/// Per-request assembly state.
#[derive(Debug)]
pub struct ResponseAssembler {
    accumulated_text: String,
    chart_buffer: String,
    mode: AssemblyMode,
    fragments_seen: usize,
}

/// Final result of a stream.
#[derive(Debug)]
pub struct AssembledResponse {
    pub text: String,
    pub chart: Option<ChartSpec>,
    /// Set when a chart payload was present but could not be decoded.
    pub chart_error: Option<ChartDecodeError>,
}

impl Default for ResponseAssembler {
    fn default() -> Self {
        Self::new()
    }
}

impl ResponseAssembler {
    pub fn new() -> Self {
        Self {
            accumulated_text: String::new(),
            chart_buffer: String::new(),
            mode: AssemblyMode::Narrative,
            fragments_seen: 0,
        }
    }

    /// Applies one fragment.
    ///
    /// In narrative mode a separator inside the fragment itself wins. Only
    /// when there is none is the boundary checked: the tail of the narrative
    /// received so far plus the head of the fragment, so a separator split
    /// over two fragments is still found. In that case the part of the
    /// separator that was already shown is removed again.
    pub fn push(&mut self, fragment: &str) {
        self.fragments_seen += 1;

        match self.mode {
            AssemblyMode::Chart => self.chart_buffer.push_str(fragment),
            AssemblyMode::Narrative => {
                if let Some(at) = fragment.find(CHART_SEPARATOR) {
                    self.accumulated_text.push_str(&fragment[..at]);
                    self.enter_chart(&fragment[at + CHART_SEPARATOR.len()..]);
                } else if let Some(at) = self.straddling_separator(fragment) {
                    let consumed = CHART_SEPARATOR.len() - (self.accumulated_text.len() - at);
                    self.accumulated_text.truncate(at);
                    self.enter_chart(&fragment[consumed..]);
                } else {
                    self.accumulated_text.push_str(fragment);
                }
            }
        }
    }

    /// Start offset in the narrative of a separator that begins in the
    /// narrative and ends in `fragment`. Neither side holds a whole one.
    fn straddling_separator(&self, fragment: &str) -> Option<usize> {
        let window = CHART_SEPARATOR.len() - 1;

        let mut tail_start = self.accumulated_text.len().saturating_sub(window);
        while !self.accumulated_text.is_char_boundary(tail_start) {
            tail_start -= 1;
        }
        let mut head_end = fragment.len().min(window);
        while !fragment.is_char_boundary(head_end) {
            head_end -= 1;
        }

        let mut joined = String::with_capacity(window * 2);
        joined.push_str(&self.accumulated_text[tail_start..]);
        joined.push_str(&fragment[..head_end]);
        joined
            .find(CHART_SEPARATOR)
            .map(|offset| tail_start + offset)
    }

    fn enter_chart(&mut self, payload: &str) {
        self.chart_buffer.push_str(payload);
        self.mode = AssemblyMode::Chart;
        debug!(
            fragment = self.fragments_seen,
            narrative_len = self.accumulated_text.len(),
            "Chart separator detected"
        );
    }

    /// Narrative received so far. This is what the in-flight message shows.
    pub fn text(&self) -> &str {
        &self.accumulated_text
    }

    pub fn chart_buffer(&self) -> &str {
        &self.chart_buffer
    }

    pub fn mode(&self) -> AssemblyMode {
        self.mode
    }

    pub fn fragments_seen(&self) -> usize {
        self.fragments_seen
    }

    /// Consumes the assembler once the stream is exhausted (or broke off).
    ///
    /// A chart payload that fails to decode is dropped and a warning is
    /// appended to the narrative; it never fails the reply.
    pub fn finish(self) -> AssembledResponse {
        let Self {
            mut accumulated_text,
            chart_buffer,
            ..
        } = self;

        if chart_buffer.is_empty() {
            return AssembledResponse {
                text: accumulated_text.trim().to_string(),
                chart: None,
                chart_error: None,
            };
        }

        match ChartSpec::decode(&chart_buffer) {
            Ok(chart) => AssembledResponse {
                text: accumulated_text.trim().to_string(),
                chart: Some(chart),
                chart_error: None,
            },
            Err(err) => {
                warn!(error = %err, payload = %chart_buffer, "Failed to parse chart JSON");
                accumulated_text.push_str(CHART_ERROR_SUFFIX);
                AssembledResponse {
                    text: accumulated_text.trim().to_string(),
                    chart: None,
                    chart_error: Some(err),
                }
            }
        }
    }
}

/// Runs a whole fragment sequence through a fresh assembler.
pub fn assemble<I, S>(fragments: I) -> AssembledResponse
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    let mut assembler = ResponseAssembler::new();
    for fragment in fragments {
        assembler.push(fragment.as_ref());
    }
    assembler.finish()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mode_switches_on_separator() {
        let mut asm = ResponseAssembler::new();
        asm.push("Intro ");
        assert_eq!(asm.mode(), AssemblyMode::Narrative);
        asm.push("text||CHART_DATA||{\"ty");
        assert_eq!(asm.mode(), AssemblyMode::Chart);
        assert_eq!(asm.text(), "Intro text");
        assert_eq!(asm.chart_buffer(), "{\"ty");
        // everything after the switch goes to the chart buffer, separators included
        asm.push("pe\":||CHART_DATA||");
        assert_eq!(asm.text(), "Intro text");
        assert_eq!(asm.chart_buffer(), "{\"type\":||CHART_DATA||");
        assert_eq!(asm.fragments_seen(), 3);
    }

    #[test]
    fn test_separator_split_across_fragments() {
        let mut asm = ResponseAssembler::new();
        asm.push("Totals below.||CHART");
        assert_eq!(asm.mode(), AssemblyMode::Narrative);
        assert_eq!(asm.text(), "Totals below.||CHART");
        asm.push("_DATA||{}");
        assert_eq!(asm.mode(), AssemblyMode::Chart);
        assert_eq!(asm.text(), "Totals below.");
        assert_eq!(asm.chart_buffer(), "{}");
    }

    #[test]
    fn test_lookback_respects_char_boundaries() {
        let mut asm = ResponseAssembler::new();
        asm.push("ventas por categoría ▸ año ");
        asm.push("完了||CHART_DATA||");
        assert_eq!(asm.text(), "ventas por categoría ▸ año 完了");
        assert_eq!(asm.mode(), AssemblyMode::Chart);
        assert_eq!(asm.chart_buffer(), "");
    }

    #[test]
    fn test_split_separator_between_multibyte_text() {
        let mut asm = ResponseAssembler::new();
        asm.push("数据分析完成||CHART_DA");
        asm.push("TA||ééééé");
        assert_eq!(asm.text(), "数据分析完成");
        assert_eq!(asm.chart_buffer(), "ééééé");
    }

    #[test]
    fn test_whole_separator_in_fragment_beats_boundary_match() {
        let mut asm = ResponseAssembler::new();
        asm.push("Marker is ||CHART_DATA");
        asm.push("||CHART_DATA||{}");
        assert_eq!(asm.text(), "Marker is ||CHART_DATA");
        assert_eq!(asm.chart_buffer(), "{}");
    }

    #[test]
    fn test_separator_without_payload_has_no_chart() {
        let out = assemble(["Done.\n", "||CHART_DATA||"]);
        assert_eq!(out.text, "Done.");
        assert!(out.chart.is_none());
        assert!(out.chart_error.is_none());
    }

    #[test]
    fn test_whitespace_only_payload_is_a_decode_error() {
        let out = assemble(["Done.", "||CHART_DATA||", "\n"]);
        assert!(out.chart.is_none());
        assert!(out.chart_error.is_some());
        assert!(out.text.ends_with("(There was an error displaying the chart.)"));
    }
}
