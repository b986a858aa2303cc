pub mod deps;
pub mod durations;
pub mod extract;
pub mod gate;
pub mod knowledge;
pub mod llm;
pub mod prompt;
pub mod report;
pub mod retry;
pub mod scanner;
pub mod wait;

pub use deps::{DependencyGraph, NoDependencies, StaticDependencyGraph};
pub use gate::{GateConfig, GatePermit, RateGate};
pub use knowledge::{
    file_repository::FileGuidelineRepository, selector::KnowledgeSelector,
    BuiltinGuidelineRepository, GuidelineCatalog, GuidelineEntry, GuidelineRepository,
    GuidelineValidationError,
};
pub use llm::{CallFailure, CompletionClient, LlmSettings, NoopClient, OpenAiClient};
pub use report::{render_report, OutputFormat};
pub use retry::{RetryOutcome, RetryPolicy};
pub use scanner::{
    scheduler::{ScanOptions, ScanOrchestrator},
    AbortReason, Finding, ScanError, ScanObserver, ScanOutcome, Severity, SourceFile,
};
