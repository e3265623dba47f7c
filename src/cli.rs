use std::path::PathBuf;

use clap::{Args, Parser, Subcommand, ValueEnum};

use crate::model::Difficulty;
use crate::retrieve::{DEFAULT_LIMIT, DEFAULT_MIN_SIMILARITY};
use crate::validate::{DEFAULT_CONFIDENCE_THRESHOLD, DEFAULT_CONTEXT_RADIUS};

#[derive(Parser, Debug)]
#[command(
    name = "exam-corpus",
    version,
    about = "Exam question ingestion, legal retrieval and exam assembly"
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    Ingest(IngestArgs),
    IngestLegal(IngestLegalArgs),
    Search(SearchArgs),
    Assemble(AssembleArgs),
    Status(StatusArgs),
}

#[derive(Args, Debug, Clone)]
pub struct IngestArgs {
    /// Exam document: `.pdf`, or text with form feeds between pages.
    pub path: PathBuf,

    #[arg(long, default_value = ".cache/exam-corpus")]
    pub cache_root: PathBuf,

    #[arg(long)]
    pub db_path: Option<PathBuf>,

    #[arg(long)]
    pub report_path: Option<PathBuf>,

    /// Defaults to the file stem.
    #[arg(long)]
    pub doc_id: Option<String>,

    #[arg(long, default_value = "general")]
    pub topic: String,

    #[arg(long, value_enum, default_value_t = DifficultyArg::Medium)]
    pub difficulty: DifficultyArg,

    #[arg(long)]
    pub legal_reference: Option<String>,

    #[arg(long, default_value = "local-hash-1024-v1")]
    pub model_id: String,

    /// External judge program; reads a JSON request on stdin. Without it only
    /// structural validation runs.
    #[arg(long)]
    pub judge_command: Option<String>,

    #[arg(long = "judge-arg")]
    pub judge_args: Vec<String>,

    #[arg(long, default_value_t = DEFAULT_CONFIDENCE_THRESHOLD)]
    pub confidence_threshold: f64,

    #[arg(long, default_value_t = true, action = clap::ArgAction::Set)]
    pub search_adjacent: bool,

    #[arg(long, default_value_t = DEFAULT_CONTEXT_RADIUS)]
    pub context_radius: u32,

    #[arg(long, default_value_t = 4)]
    pub workers: usize,

    #[arg(long, default_value_t = 0)]
    pub judge_min_interval_ms: u64,

    #[arg(long, default_value_t = 0)]
    pub ocr_min_interval_ms: u64,

    #[arg(long, default_value_t = 3)]
    pub max_retries: u32,

    #[arg(long, default_value_t = 250)]
    pub retry_base_delay_ms: u64,

    #[arg(long)]
    pub max_pages: Option<usize>,

    #[arg(long, value_enum, default_value_t = OcrMode::Auto)]
    pub ocr_mode: OcrMode,

    #[arg(long, default_value = "kor+eng")]
    pub ocr_lang: String,

    #[arg(long, default_value_t = 120)]
    pub ocr_min_text_chars: usize,
}

#[derive(Args, Debug, Clone)]
pub struct IngestLegalArgs {
    pub path: PathBuf,

    #[arg(long, default_value = ".cache/exam-corpus")]
    pub cache_root: PathBuf,

    #[arg(long)]
    pub db_path: Option<PathBuf>,

    #[arg(long)]
    pub doc_id: Option<String>,

    #[arg(long, default_value = "local-hash-1024-v1")]
    pub model_id: String,

    #[arg(long, default_value_t = 1200)]
    pub max_chunk_chars: usize,

    #[arg(long)]
    pub max_pages: Option<usize>,

    #[arg(long, value_enum, default_value_t = OcrMode::Auto)]
    pub ocr_mode: OcrMode,

    #[arg(long, default_value = "kor+eng")]
    pub ocr_lang: String,

    #[arg(long, default_value_t = 120)]
    pub ocr_min_text_chars: usize,
}

#[derive(Copy, Clone, Debug, Eq, PartialEq, ValueEnum)]
pub enum OcrMode {
    Off,
    Auto,
    Force,
}

impl OcrMode {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Off => "off",
            Self::Auto => "auto",
            Self::Force => "force",
        }
    }
}

#[derive(Copy, Clone, Debug, Eq, PartialEq, ValueEnum)]
pub enum DifficultyArg {
    Easy,
    Medium,
    Hard,
}

impl From<DifficultyArg> for Difficulty {
    fn from(value: DifficultyArg) -> Self {
        match value {
            DifficultyArg::Easy => Self::Easy,
            DifficultyArg::Medium => Self::Medium,
            DifficultyArg::Hard => Self::Hard,
        }
    }
}

#[derive(Copy, Clone, Debug, Eq, PartialEq, ValueEnum)]
pub enum SearchScope {
    Legal,
    Questions,
}

#[derive(Args, Debug, Clone)]
pub struct SearchArgs {
    pub query: String,

    #[arg(long, default_value = ".cache/exam-corpus")]
    pub cache_root: PathBuf,

    #[arg(long)]
    pub db_path: Option<PathBuf>,

    #[arg(long, value_enum, default_value_t = SearchScope::Legal)]
    pub scope: SearchScope,

    #[arg(long, default_value_t = DEFAULT_LIMIT)]
    pub limit: usize,

    #[arg(long, default_value_t = DEFAULT_MIN_SIMILARITY)]
    pub min_similarity: f64,

    /// Only applies to `--scope questions`.
    #[arg(long)]
    pub topic: Option<String>,

    #[arg(long, default_value = "local-hash-1024-v1")]
    pub model_id: String,

    #[arg(long, default_value_t = 2000)]
    pub timeout_ms: u64,

    #[arg(long, default_value_t = false)]
    pub json: bool,
}

#[derive(Args, Debug, Clone)]
pub struct AssembleArgs {
    #[arg(long, default_value = ".cache/exam-corpus")]
    pub cache_root: PathBuf,

    #[arg(long)]
    pub db_path: Option<PathBuf>,

    #[arg(long)]
    pub user_id: String,

    #[arg(long, default_value_t = 25)]
    pub count: usize,

    #[arg(long = "topic")]
    pub topics: Vec<String>,

    #[arg(long, default_value_t = false)]
    pub exclude_seen: bool,

    #[arg(long)]
    pub seed: Option<u64>,

    #[arg(long, default_value_t = false)]
    pub json: bool,
}

#[derive(Args, Debug, Clone)]
pub struct StatusArgs {
    #[arg(long, default_value = ".cache/exam-corpus")]
    pub cache_root: PathBuf,

    #[arg(long)]
    pub db_path: Option<PathBuf>,
}
