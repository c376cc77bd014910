// THEORY:
// The `evaluator` module is the top-level API of the harness. It composes the
// `DatasetIndex` (what to test and what the right answer is) with a `Classifier` (what
// the model says) and folds the two into an `EvaluationReport`.
//
// Key architectural principles:
// 1.  **Ground Truth Is Local**: The classifier never sees the label. The evaluator pairs
//     every remote answer with the category the sample was filed under, and only then
//     decides whether the answer was right.
// 2.  **Failure Is an Entry, Not an Exit**: A file that cannot be read, a request that
//     times out, or an image the pre-screen rejects all become report entries marked as
//     failed. They count toward `total_tested` and never toward `correct_count`. The only
//     way `run` itself fails is a caller mistake (no category selected), and that is
//     caught before a single request goes out.
// 3.  **Sequential and Deterministic**: `run` issues one request at a time in manifest
//     order, so the report order is the manifest order. The ordered fan-out variant
//     lives in `parallel_evaluator` and keeps the same guarantee.
// 4.  **Owned Accumulator**: The report belongs to the run invocation alone. Samples
//     share no mutable state, which is what makes fanning them out safe.

use crate::config::ScreeningConfig;
use crate::core_modules::dataset_index::{Category, DatasetIndex, SampleRecord, Split};
use crate::core_modules::image_acceptance::AcceptancePolicy;
use crate::core_modules::inference_client::{Classifier, DEFAULT_TIMEOUT};
use crate::core_modules::prediction::PredictionResult;
use serde::Serialize;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::watch;
use tracing::{info, warn};

#[derive(Debug, Error, PartialEq, Eq)]
pub enum EvalError {
    #[error("no category selected: include glaucoma, non-glaucoma, or both")]
    NoCategorySelected,
    #[error("concurrency limit must be at least 1")]
    InvalidConcurrency,
}

/// What to evaluate.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BatchRequest {
    pub split: Split,
    /// Upper bound on samples drawn from *each* category.
    pub sample_count: usize,
    pub include_glaucoma: bool,
    pub include_non_glaucoma: bool,
}

impl BatchRequest {
    /// Both categories included.
    pub fn new(split: Split, sample_count: usize) -> Self {
        Self {
            split,
            sample_count,
            include_glaucoma: true,
            include_non_glaucoma: true,
        }
    }

    pub fn includes(&self, category: Category) -> bool {
        match category {
            Category::Glaucoma => self.include_glaucoma,
            Category::NonGlaucoma => self.include_non_glaucoma,
        }
    }
}

/// One tested sample and what came back for it.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EvaluationEntry {
    pub sample: SampleRecord,
    pub result: PredictionResult,
}

impl EvaluationEntry {
    pub fn is_correct(&self) -> bool {
        self.result.is_correct_for(self.sample.category)
    }
}

#[derive(Debug, Clone, PartialEq, Default, Serialize)]
pub struct EvaluationReport {
    pub entries: Vec<EvaluationEntry>,
    pub total_tested: usize,
    pub correct_count: usize,
    /// `correct_count / total_tested`, or 0 when nothing was tested.
    pub accuracy: f64,
    /// Set when iteration stopped early on a cancellation signal.
    pub cancelled: bool,
}

impl EvaluationReport {
    pub fn push(&mut self, sample: SampleRecord, result: PredictionResult) {
        self.entries.push(EvaluationEntry { sample, result });
    }

    /// Recomputes the aggregate counters from `entries`.
    pub fn finalize(&mut self) {
        self.total_tested = self.entries.len();
        self.correct_count = self.entries.iter().filter(|entry| entry.is_correct()).count();
        self.accuracy = if self.total_tested > 0 {
            self.correct_count as f64 / self.total_tested as f64
        } else {
            0.0
        };
    }

    /// Entries whose result did not pass validation.
    pub fn failures(&self) -> impl Iterator<Item = &EvaluationEntry> {
        self.entries.iter().filter(|entry| !entry.result.validation)
    }
}

/// Emitted after each sample completes.
#[derive(Debug)]
pub struct BatchProgress<'a> {
    pub completed: usize,
    pub total: usize,
    pub sample: &'a SampleRecord,
    pub result: &'a PredictionResult,
}

pub type ProgressFn = Box<dyn Fn(&BatchProgress<'_>) + Send + Sync>;

/// Runs filtered dataset samples through a `Classifier` and scores them.
pub struct BatchEvaluator<C> {
    index: DatasetIndex,
    classifier: C,
    timeout: Duration,
    prescreen: Option<AcceptancePolicy>,
    progress: Option<ProgressFn>,
    cancel: Option<watch::Receiver<bool>>,
}

impl<C: Classifier> BatchEvaluator<C> {
    pub fn new(index: DatasetIndex, classifier: C) -> Self {
        Self {
            index,
            classifier,
            timeout: DEFAULT_TIMEOUT,
            prescreen: None,
            progress: None,
            cancel: None,
        }
    }

    /// Index, timeout and pre-screen policy taken from `config`.
    pub fn from_config(config: &ScreeningConfig, classifier: C) -> Self {
        let evaluator = Self::new(config.dataset_index(), classifier).with_timeout(config.request_timeout);
        if config.prescreen {
            evaluator.with_prescreen(config.acceptance)
        } else {
            evaluator
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Reject samples locally with `policy` before any request is made for them.
    pub fn with_prescreen(mut self, policy: AcceptancePolicy) -> Self {
        self.prescreen = Some(policy);
        self
    }

    pub fn with_progress(mut self, progress: impl Fn(&BatchProgress<'_>) + Send + Sync + 'static) -> Self {
        self.progress = Some(Box::new(progress));
        self
    }

    /// Stop between samples once `cancel` reads `true`.
    pub fn with_cancellation(mut self, cancel: watch::Receiver<bool>) -> Self {
        self.cancel = Some(cancel);
        self
    }

    pub fn index(&self) -> &DatasetIndex {
        &self.index
    }

    pub fn classifier(&self) -> &C {
        &self.classifier
    }

    /// The samples a request would test, in order. Fails before touching the filesystem
    /// if no category is selected.
    pub fn plan(&self, request: &BatchRequest) -> Result<Vec<SampleRecord>, EvalError> {
        if !request.include_glaucoma && !request.include_non_glaucoma {
            return Err(EvalError::NoCategorySelected);
        }

        let samples: Vec<SampleRecord> = self
            .index
            .sample_images(request.split, request.sample_count)
            .into_iter()
            .filter(|sample| request.includes(sample.category))
            .collect();

        if samples.is_empty() {
            warn!(split = %request.split, "no samples match the selected criteria");
        }
        Ok(samples)
    }

    pub async fn run(
        &self,
        split: Split,
        sample_count: usize,
        include_glaucoma: bool,
        include_non_glaucoma: bool,
    ) -> Result<EvaluationReport, EvalError> {
        self.run_request(&BatchRequest {
            split,
            sample_count,
            include_glaucoma,
            include_non_glaucoma,
        })
        .await
    }

    /// Sequential run: one request in flight, report in manifest order.
    pub async fn run_request(&self, request: &BatchRequest) -> Result<EvaluationReport, EvalError> {
        let samples = self.plan(request)?;
        let total = samples.len();
        info!(split = %request.split, total, "starting batch evaluation");

        let mut report = EvaluationReport::default();
        for sample in samples {
            if self.is_cancelled() {
                warn!(completed = report.entries.len(), total, "batch evaluation cancelled");
                report.cancelled = true;
                break;
            }
            let result = self.evaluate_sample(&sample).await;
            self.notify(report.entries.len() + 1, total, &sample, &result);
            report.push(sample, result);
        }

        report.finalize();
        info!(
            tested = report.total_tested,
            correct = report.correct_count,
            accuracy = report.accuracy,
            "batch evaluation finished"
        );
        Ok(report)
    }

    /// Reads, optionally pre-screens, and classifies one sample. Never fails.
    pub(crate) async fn evaluate_sample(&self, sample: &SampleRecord) -> PredictionResult {
        let result = match tokio::fs::read(&sample.path).await {
            Err(err) => {
                warn!(path = %sample.path.display(), error = %err, "could not read sample");
                PredictionResult::read_error(err)
            }
            Ok(bytes) => match self.prescreen.as_ref().map(|policy| policy.validate(&bytes)) {
                Some(outcome) if !outcome.accepted => PredictionResult::rejected(outcome.reason),
                _ => self.classifier.classify(bytes, &sample.filename, self.timeout).await,
            },
        };
        let result = result.with_ground_truth(sample.category, sample.filename.clone());

        info!(
            filename = %sample.filename,
            ground_truth = %sample.category,
            validation = result.validation,
            prediction = %result.predicted_label,
            correct = result.is_correct_for(sample.category),
            "processed sample"
        );
        result
    }

    pub(crate) fn is_cancelled(&self) -> bool {
        self.cancel.as_ref().is_some_and(|cancel| *cancel.borrow())
    }

    pub(crate) fn notify(&self, completed: usize, total: usize, sample: &SampleRecord, result: &PredictionResult) {
        if let Some(progress) = &self.progress {
            progress(&BatchProgress {
                completed,
                total,
                sample,
                result,
            });
        }
    }
}
