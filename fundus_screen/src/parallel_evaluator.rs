// THEORY:
// `run_concurrent` is the fan-out twin of `BatchEvaluator::run_request`. Up to `limit`
// samples are read and classified at the same time, but results are *consumed* in
// manifest order (`futures::StreamExt::buffered`), so the report is identical to a
// sequential run over the same responses. The only shared state is the report, and
// it is touched by this single consumer loop alone.
//
// Cancellation is checked before pulling each result. Requests still in flight when the
// signal arrives are dropped along with the stream.

use crate::core_modules::inference_client::Classifier;
use crate::evaluator::{BatchEvaluator, BatchRequest, EvalError, EvaluationReport};
use futures::stream::{self, StreamExt};
use tracing::{info, warn};

impl<C: Classifier> BatchEvaluator<C> {
    /// Ordered run with at most `limit` requests in flight.
    pub async fn run_concurrent(&self, request: &BatchRequest, limit: usize) -> Result<EvaluationReport, EvalError> {
        if limit == 0 {
            return Err(EvalError::InvalidConcurrency);
        }
        let samples = self.plan(request)?;
        let total = samples.len();
        info!(split = %request.split, total, limit, "starting concurrent batch evaluation");

        let mut results = stream::iter(samples)
            .map(|sample| async move {
                let result = self.evaluate_sample(&sample).await;
                (sample, result)
            })
            .buffered(limit);

        let mut report = EvaluationReport::default();
        loop {
            if self.is_cancelled() {
                warn!(completed = report.entries.len(), total, "batch evaluation cancelled");
                report.cancelled = true;
                break;
            }
            let Some((sample, result)) = results.next().await else {
                break;
            };
            self.notify(report.entries.len() + 1, total, &sample, &result);
            report.push(sample, result);
        }

        report.finalize();
        info!(
            tested = report.total_tested,
            correct = report.correct_count,
            accuracy = report.accuracy,
            "concurrent batch evaluation finished"
        );
        Ok(report)
    }
}
