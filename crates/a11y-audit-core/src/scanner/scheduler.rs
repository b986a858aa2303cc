use std::{
    any::Any,
    panic::AssertUnwindSafe,
    path::PathBuf,
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
    time::Duration,
};

use anyhow::Result;
use futures::{future::join_all, FutureExt};
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};

use super::{
    normalize::normalize, AbortReason, ContentLoader, FileFailure, Finding, FsContentLoader,
    ScanError, ScanObserver, ScanOutcome, ScanTask, SourceFile,
};
use crate::{
    deps::{DependencyGraph, NoDependencies},
    extract::extract,
    gate::RateGate,
    knowledge::{selector::KnowledgeSelector, GuidelineCatalog},
    llm::CompletionClient,
    prompt::{self, RelatedFile, MAX_RELATED_PREVIEWS},
    retry::{RetryController, RetryOutcome, RetryPolicy},
    wait::{pause, Wait},
};

/// Per-run scheduling knobs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScanOptions {
    /// Files whose pipelines run concurrently within one batch.
    pub batch_size: usize,
    /// Pause between consecutive batches.
    #[serde(with = "crate::durations")]
    pub inter_batch_delay: Duration,
    /// Total attempts per file, first call included.
    pub max_retries: u32,
}

impl Default for ScanOptions {
    fn default() -> Self {
        Self {
            batch_size: 2,
            inter_batch_delay: Duration::from_millis(2000),
            max_retries: 3,
        }
    }
}

impl ScanOptions {
    pub fn validate(&self) -> Result<(), ScanError> {
        if self.batch_size == 0 {
            return Err(ScanError::InvalidOptions("batch_size must be at least 1".into()));
        }
        if self.max_retries == 0 {
            return Err(ScanError::InvalidOptions("max_retries must be at least 1".into()));
        }
        Ok(())
    }
}

/// How one file's pipeline settled.
#[derive(Debug)]
enum FileResult {
    Completed { path: PathBuf, findings: Vec<Finding> },
    Failed(FileFailure),
    AuthFailure { message: String },
    Cancelled,
}

/// Everything a file pipeline needs, shared by the pipelines of one run.
struct FilePipeline {
    selector: Arc<KnowledgeSelector>,
    catalog: Arc<GuidelineCatalog>,
    graph: Arc<dyn DependencyGraph>,
    related_loader: Arc<dyn ContentLoader>,
    retry: RetryController,
}

impl FilePipeline {
    async fn run(
        self: Arc<Self>,
        file: SourceFile,
        api_key: Arc<str>,
        run_token: CancellationToken,
    ) -> FileResult {
        if run_token.is_cancelled() {
            return FileResult::Cancelled;
        }
        let content = match file.load().await {
            Ok(content) => content,
            Err(err) => {
                warn!(file = %file.path.display(), error = %err, "skipping unreadable file");
                return FileResult::Failed(FileFailure {
                    path: file.path,
                    reason: format!("{err:#}"),
                });
            }
        };

        let related_paths: Vec<PathBuf> = self
            .graph
            .dependency_paths(&file.path)
            .into_iter()
            .filter(|path| *path != file.path)
            .collect();
        let task = ScanTask::new(file.path, content, related_paths);
        let rules = self.selector.select(&task.content, &task.file_name());
        let related = self.load_related(&task).await;
        let payload = prompt::build(&task, &rules, &self.catalog, &related);
        debug!(
            file = %task.file_path.display(),
            rules = payload.rule_ids.len(),
            related = task.related_paths.len(),
            prompt_chars = payload.text.len(),
            "prompt assembled"
        );

        match self.retry.call(&task, &payload.text, &api_key, &run_token).await {
            RetryOutcome::Succeeded { text, .. } => {
                let findings = match extract(&text) {
                    Some(json) => normalize(&json, &task.file_path),
                    None => {
                        warn!(
                            file = %task.file_path.display(),
                            "model answer contained no JSON array; file yields no findings"
                        );
                        Vec::new()
                    }
                };
                FileResult::Completed {
                    path: task.file_path,
                    findings,
                }
            }
            RetryOutcome::Exhausted {
                attempts,
                last_failure,
            } => FileResult::Failed(FileFailure {
                path: task.file_path,
                reason: format!("gave up after {attempts} attempt(s): {last_failure}"),
            }),
            RetryOutcome::AuthFailure(message) => {
                // stop batch siblings waiting at the gate or in backoff
                run_token.cancel();
                FileResult::AuthFailure { message }
            }
            RetryOutcome::Cancelled => FileResult::Cancelled,
        }
    }

    /// Previews for the first related files; the rest, and unreadable ones, are listed by path only.
    async fn load_related(&self, task: &ScanTask) -> Vec<RelatedFile> {
        let mut related = Vec::with_capacity(task.related_paths.len());
        for (idx, path) in task.related_paths.iter().enumerate() {
            if idx >= MAX_RELATED_PREVIEWS {
                related.push(RelatedFile::listed(path.clone()));
                continue;
            }
            match self.related_loader.load(path).await {
                Ok(content) => related.push(RelatedFile::with_content(path.clone(), &content)),
                Err(err) => {
                    debug!(path = %path.display(), error = %err, "related file unavailable");
                    related.push(RelatedFile::listed(path.clone()));
                }
            }
        }
        related
    }
}

fn panic_message<'a>(payload: &'a (dyn Any + Send + 'static)) -> &'a str {
    payload
        .downcast_ref::<&str>()
        .copied()
        .or_else(|| payload.downcast_ref::<String>().map(String::as_str))
        .unwrap_or("pipeline panicked")
}

/// Clears the running flag when a run settles, including early returns and a dropped run.
struct RunningGuard<'a>(&'a AtomicBool);

impl Drop for RunningGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

/// Drives scan runs: batches files, runs each file pipeline concurrently and aggregates findings.
pub struct ScanOrchestrator {
    client: Arc<dyn CompletionClient>,
    gate: Arc<RateGate>,
    catalog: Arc<GuidelineCatalog>,
    selector: Arc<KnowledgeSelector>,
    graph: Arc<dyn DependencyGraph>,
    related_loader: Arc<dyn ContentLoader>,
    retry_policy: RetryPolicy,
    call_timeout: Duration,
    observer: Option<Arc<dyn ScanObserver>>,
    running: AtomicBool,
}

impl ScanOrchestrator {
    pub const DEFAULT_CALL_TIMEOUT: Duration = Duration::from_secs(45);

    pub fn new(client: Arc<dyn CompletionClient>, gate: Arc<RateGate>) -> Result<Self> {
        Ok(Self {
            client,
            gate,
            catalog: Arc::new(GuidelineCatalog::builtin()),
            selector: Arc::new(KnowledgeSelector::new()?),
            graph: Arc::new(NoDependencies),
            related_loader: Arc::new(FsContentLoader),
            retry_policy: RetryPolicy::default(),
            call_timeout: Self::DEFAULT_CALL_TIMEOUT,
            observer: None,
            running: AtomicBool::new(false),
        })
    }

    pub fn with_catalog(mut self, catalog: GuidelineCatalog) -> Self {
        self.catalog = Arc::new(catalog);
        self
    }

    pub fn with_dependency_graph(mut self, graph: Arc<dyn DependencyGraph>) -> Self {
        self.graph = graph;
        self
    }

    pub fn with_related_loader(mut self, loader: Arc<dyn ContentLoader>) -> Self {
        self.related_loader = loader;
        self
    }

    /// Backoff durations; the attempt count comes from [`ScanOptions::max_retries`].
    pub fn with_retry_policy(mut self, policy: RetryPolicy) -> Self {
        self.retry_policy = policy;
        self
    }

    pub fn with_call_timeout(mut self, timeout: Duration) -> Self {
        self.call_timeout = timeout;
        self
    }

    pub fn with_observer(mut self, observer: Arc<dyn ScanObserver>) -> Self {
        self.observer = Some(observer);
        self
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    pub fn gate(&self) -> &Arc<RateGate> {
        &self.gate
    }

    /// Scan `files` in batches of `options.batch_size`.
    ///
    /// Cancelling `cancel` stops scheduling: waits fail fast, in-flight calls
    /// are abandoned and findings from files that already completed are kept.
    /// An authentication failure aborts the run the same way. Only one run may
    /// be active per orchestrator.
    ///
    /// File pipelines are polled by the returned future itself, so dropping it
    /// tears the run down: in-flight calls are abandoned and their gate
    /// permits are released before the orchestrator accepts another run.
    #[instrument(
        name = "scan_run",
        skip_all,
        fields(files = files.len(), batch_size = options.batch_size)
    )]
    pub async fn start_scan(
        &self,
        files: Vec<SourceFile>,
        api_key: &str,
        options: &ScanOptions,
        cancel: &CancellationToken,
    ) -> Result<ScanOutcome, ScanError> {
        options.validate()?;
        if self
            .running
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return Err(ScanError::AlreadyRunning);
        }
        let _guard = RunningGuard(&self.running);

        let run_token = cancel.child_token();
        let api_key: Arc<str> = Arc::from(api_key);
        let pipeline = Arc::new(FilePipeline {
            selector: Arc::clone(&self.selector),
            catalog: Arc::clone(&self.catalog),
            graph: Arc::clone(&self.graph),
            related_loader: Arc::clone(&self.related_loader),
            retry: RetryController::new(
                Arc::clone(&self.client),
                Arc::clone(&self.gate),
                self.retry_policy.with_max_attempts(options.max_retries),
                self.call_timeout,
            ),
        });

        let mut outcome = ScanOutcome::default();
        let batches: Vec<&[SourceFile]> = files.chunks(options.batch_size).collect();
        let batch_count = batches.len();

        for (batch_index, batch) in batches.into_iter().enumerate() {
            if run_token.is_cancelled() {
                break;
            }
            let paths: Vec<PathBuf> = batch.iter().map(|file| file.path.clone()).collect();
            info!(
                batch = batch_index + 1,
                of = batch_count,
                files = paths.len(),
                "starting batch"
            );
            if let Some(observer) = &self.observer {
                observer.batch_started(batch_index, &paths);
            }

            let pipelines = batch.iter().map(|file| {
                AssertUnwindSafe(Arc::clone(&pipeline).run(
                    file.clone(),
                    Arc::clone(&api_key),
                    run_token.clone(),
                ))
                .catch_unwind()
            });
            let results = join_all(pipelines).await;

            for (path, result) in paths.iter().zip(results) {
                match result {
                    Ok(FileResult::Completed { path, findings }) => {
                        if let Some(observer) = &self.observer {
                            observer.file_finished(&path, findings.len());
                        }
                        outcome.findings.extend(findings);
                        outcome.scanned_files.push(path);
                    }
                    Ok(FileResult::Failed(failure)) => {
                        if let Some(observer) = &self.observer {
                            observer.file_finished(&failure.path, 0);
                        }
                        outcome.failed_files.push(failure);
                    }
                    Ok(FileResult::AuthFailure { message }) => {
                        if outcome.abort.is_none() {
                            outcome.abort = Some(AbortReason::AuthFailure { message });
                        }
                    }
                    Ok(FileResult::Cancelled) => {
                        debug!(file = %path.display(), "file pipeline cancelled");
                    }
                    Err(payload) => {
                        let message = panic_message(payload.as_ref());
                        error!(file = %path.display(), error = message, "file pipeline crashed");
                        run_token.cancel();
                        if outcome.abort.is_none() {
                            outcome.abort = Some(AbortReason::Unexpected {
                                message: format!("{}: {message}", path.display()),
                            });
                        }
                    }
                }
            }
            if let Some(observer) = &self.observer {
                observer.batch_finished(batch_index);
            }

            if outcome.abort.is_some() || batch_index + 1 == batch_count {
                break;
            }
            if run_token.is_cancelled() {
                break;
            }
            if pause(options.inter_batch_delay, &run_token).await == Wait::Cancelled {
                break;
            }
        }

        if outcome.abort.is_none() && run_token.is_cancelled() {
            outcome.abort = Some(AbortReason::Cancelled);
        }
        match &outcome.abort {
            None => info!(
                scanned = outcome.scanned_files.len(),
                failed = outcome.failed_files.len(),
                findings = outcome.findings.len(),
                "scan completed"
            ),
            Some(AbortReason::Cancelled) => info!(
                scanned = outcome.scanned_files.len(),
                findings = outcome.findings.len(),
                "scan cancelled"
            ),
            Some(reason) => error!(
                scanned = outcome.scanned_files.len(),
                findings = outcome.findings.len(),
                %reason,
                "scan aborted"
            ),
        }
        if let Some(observer) = &self.observer {
            observer.run_finished(&outcome);
        }
        Ok(outcome)
    }
}
