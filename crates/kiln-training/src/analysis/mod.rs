//! Post-run analysis of a job's metric series.
//!
//! [`analyze`] is deterministic and always available. [`NarrativeAnalyzer`]
//! adds prose on top when a text generator is configured.

mod narrative;
mod report;

pub use narrative::{
    build_prompt, parse_response, quick_analysis, AnalysisSource, MetricsSummary, NarrativeAnalyzer,
    PerformanceAnalysis, PROMPT_LOG_LINES,
};
pub use report::{
    analyze, DetailedMetrics, EpochRow, LossVariability, PerformanceLevel, SeriesStats, OVERFIT_GAP,
    UNDERFIT_ACCURACY_PERCENT,
};
