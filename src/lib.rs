//! Conversational data analyst: load a CSV file, ask questions about it and
//! get streamed narrative answers, optionally with a chart.

pub mod assembler;
pub mod backend;
pub mod chart;
pub mod config;
pub mod constants;
pub mod conversation;
pub mod dataset;
pub mod prompt;
pub mod session;
pub mod ui;
pub mod web_server;

pub use assembler::{assemble, AssembledResponse, ResponseAssembler, CHART_SEPARATOR};
pub use backend::{BackendError, ChatBackend, FragmentStream};
pub use chart::{ChartKind, ChartSpec, SeriesPoint};
pub use conversation::{Message, MessageStatus, Sender, TranscriptSnapshot};
pub use dataset::{DatasetError, DatasetPreview, TabularDataset};
pub use session::{Session, SessionError, TurnOutcome};
