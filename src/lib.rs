//! # Retail Signals
//!
//! Turns uploaded retail CSV files (sales, returns, inventory, ad spend) into a
//! small, neutral, numeric context object and a deterministic prompt for a
//! language model.
//!
//! ## Pipeline
//!
//! - **Ingestion**: CSV bytes become a [`ParsedFile`] with up to 1000 retained records
//! - **Extraction**: each file kind is projected into typed rows; rows missing keys are dropped
//! - **Metrics**: velocity, return rate, days of cover and ROAS over a trailing 14-day
//!   window ending at the latest observed date, memoized in a [`MetricCache`]
//! - **Context**: top SKUs by all-time volume and top campaigns by spend, as a versioned
//!   [`NeutralContext`]
//! - **Prompt**: the context rendered between `DATA CONTEXT BEGIN` / `DATA CONTEXT END`
//!
//! ## Example
//!
//! ```rust,ignore
//! use retail_signals::*;
//!
//! let csv = "date,sku,units,revenue\n2024-01-30,SKU1,3,29.97\n";
//! let file = parse_csv_bytes("sales_daily.csv", csv.as_bytes(), &IngestOptions::default())?;
//!
//! let cache = MetricCache::new();
//! let context = ContextBuilder::new(&cache).build(&[file]).unwrap();
//! let prompt = build_prompt_for_context("What's trending?", &context);
//! ```

pub mod context;
pub mod error;
pub mod extraction;
pub mod ingestion;
pub mod legacy;
pub mod metrics;
pub mod prompt;
pub mod schema;
pub mod tables;
pub mod utils;

#[cfg(feature = "llm")]
pub mod llm;

pub use context::{
    build_context, build_context_at, rank_skus_all_time, ContextBuilder, ContextOptions,
};
pub use error::{Result, SignalError};
pub use extraction::{extract, ExtractedRows, RowKind, RowList};
pub use ingestion::{parse_csv, parse_csv_bytes, parse_csv_file, IngestOptions};
pub use legacy::{build_metrics_summary, summarize_files, FileSummary, MetricsSummary};
pub use metrics::{
    compute_days_cover, compute_returns14, compute_roas, compute_velocity14, CacheStats,
    MetricCache, RowSet,
};
pub use prompt::{build_prompt, build_prompt_for_context, build_prompt_preview};
pub use schema::*;
pub use tables::{extract_tables, strip_trailer, ParsedTable};

use chrono::{DateTime, Utc};
use log::debug;
use serde_json::Value;

/// The richest context available for a set of uploads.
#[derive(Debug, Clone, PartialEq)]
pub enum PromptContext {
    Neutral(NeutralContext),
    Legacy(MetricsSummary),
    Files(FileSummary),
    Empty,
}

impl PromptContext {
    pub fn kind(&self) -> &'static str {
        match self {
            PromptContext::Neutral(_) => "neutral",
            PromptContext::Legacy(_) => "legacy",
            PromptContext::Files(_) => "files",
            PromptContext::Empty => "empty",
        }
    }

    /// JSON handed to [`build_prompt`]. `Empty` becomes `null`, which renders as `NO METRICS`.
    pub fn to_value(&self) -> Result<Value> {
        let value = match self {
            PromptContext::Neutral(context) => serde_json::to_value(context)?,
            PromptContext::Legacy(summary) => serde_json::to_value(summary)?,
            PromptContext::Files(summary) => serde_json::to_value(summary)?,
            PromptContext::Empty => Value::Null,
        };
        Ok(value)
    }
}

/// Picks the neutral context, then the legacy comparative summary, then the
/// plain file aggregate.
pub fn resolve_prompt_context(
    files: &[ParsedFile],
    options: &ContextOptions,
    cache: &MetricCache,
    now: DateTime<Utc>,
) -> PromptContext {
    if files.is_empty() {
        return PromptContext::Empty;
    }

    let resolved = if let Some(context) = ContextBuilder::new(cache)
        .with_options(*options)
        .build_at(files, now)
    {
        PromptContext::Neutral(context)
    } else if let Some(summary) = build_metrics_summary(files, now.date_naive(), now) {
        PromptContext::Legacy(summary)
    } else {
        PromptContext::Files(summarize_files(files))
    };

    debug!("Resolved {} prompt context for {} files", resolved.kind(), files.len());
    resolved
}
