// src/analyze/mod.rs
//! Analysis pipeline: lexicon-driven heuristics, the AI adapter with its
//! fallback decision, and the orchestrator that ties them to storage.

pub mod ai_adapter;
pub mod heuristic;
pub mod insights;
pub mod lexicon;
pub mod orchestrator;
pub mod prompt;
pub mod record;
pub mod schema;
pub mod topic;

// Re-export convenient types.
pub use crate::analyze::ai_adapter::{AdapterOutcome, AiAdapter, AnalysisOptions, FallbackReason};
pub use crate::analyze::insights::{Insight, InsightKind, Severity};
pub use crate::analyze::orchestrator::{AnalyzeRequest, AnalyzeSuccess, Orchestrator};
pub use crate::analyze::record::{AnalysisRecord, ProcessingModel};
pub use crate::analyze::topic::{extract_topic, Topic};
