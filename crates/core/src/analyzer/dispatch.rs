use crate::analyzer::batch::Batch;
use crate::analyzer::error::PipelineError;
use crate::analyzer::Persister;
use crate::llm::json;
use crate::llm::ModelAdapter;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, Semaphore};
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;

/// Counts for one run plus the first failure observed, if any. Batches that
/// succeeded stay committed regardless of `first_error`.
#[derive(Debug, Default)]
pub struct RunReport {
    pub batches: usize,
    pub succeeded: usize,
    pub failed: usize,
    pub cancelled: usize,
    pub analyses_written: u64,
    pub first_error: Option<PipelineError>,
}

impl RunReport {
    pub fn is_success(&self) -> bool {
        self.first_error.is_none()
    }

    pub fn into_result(mut self) -> Result<RunReport, PipelineError> {
        match self.first_error.take() {
            Some(err) => Err(err),
            None => Ok(self),
        }
    }
}

enum BatchOutcome {
    Committed { written: u64 },
    Failed,
    Cancelled,
}

#[derive(Clone)]
struct BatchContext {
    adapter: Arc<dyn ModelAdapter>,
    persister: Arc<dyn Persister>,
    token: CancellationToken,
    first_error: Arc<Mutex<Option<PipelineError>>>,
    strict: bool,
}

impl BatchContext {
    async fn fail(&self, batch_idx: usize, err: PipelineError) -> BatchOutcome {
        tracing::error!(batch = batch_idx, kind = err.kind(), error = %err, "batch failed");
        let mut slot = self.first_error.lock().await;
        if slot.is_none() {
            *slot = Some(err);
        }
        drop(slot);
        self.token.cancel();
        BatchOutcome::Failed
    }
}

/// Fans batches out to the model under a concurrency ceiling. The first
/// failure cancels batches that have not reached the model yet; batches
/// already in flight run to completion and are persisted.
pub struct Dispatcher {
    adapter: Arc<dyn ModelAdapter>,
    persister: Arc<dyn Persister>,
    concurrency: usize,
    deadline: Option<Duration>,
    strict: bool,
}

impl Dispatcher {
    pub fn new(
        adapter: Arc<dyn ModelAdapter>,
        persister: Arc<dyn Persister>,
        concurrency: usize,
        deadline: Option<Duration>,
        strict: bool,
    ) -> Self {
        Self {
            adapter,
            persister,
            concurrency: concurrency.max(1),
            deadline,
            strict,
        }
    }

    pub async fn run(&self, batches: Vec<Batch>, shutdown: &CancellationToken) -> RunReport {
        let token = shutdown.child_token();
        let deadline_timer = self.deadline.map(|deadline| {
            let token = token.clone();
            tokio::spawn(async move {
                tokio::time::sleep(deadline).await;
                tracing::warn!(deadline_secs = deadline.as_secs_f64(), "run deadline reached; cancelling");
                token.cancel();
            })
        });

        let ctx = BatchContext {
            adapter: Arc::clone(&self.adapter),
            persister: Arc::clone(&self.persister),
            token: token.clone(),
            first_error: Arc::new(Mutex::new(None)),
            strict: self.strict,
        };

        let mut report = RunReport {
            batches: batches.len(),
            ..RunReport::default()
        };

        let semaphore = Arc::new(Semaphore::new(self.concurrency));
        let mut tasks = JoinSet::new();
        for (idx, batch) in batches.into_iter().enumerate() {
            let Ok(permit) = Arc::clone(&semaphore).acquire_owned().await else {
                break;
            };
            let ctx = ctx.clone();
            tasks.spawn(async move {
                let _permit = permit;
                run_batch(&ctx, idx + 1, batch).await
            });
        }

        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok(BatchOutcome::Committed { written }) => {
                    report.succeeded += 1;
                    report.analyses_written += written;
                }
                Ok(BatchOutcome::Failed) => report.failed += 1,
                Ok(BatchOutcome::Cancelled) => report.cancelled += 1,
                Err(join_err) => {
                    report.failed += 1;
                    ctx.fail(0, PipelineError::TaskPanicked(join_err.to_string()))
                        .await;
                }
            }
        }

        if let Some(timer) = deadline_timer {
            timer.abort();
        }

        report.first_error = ctx.first_error.lock().await.take();
        if report.first_error.is_none() && report.cancelled > 0 {
            report.first_error = Some(PipelineError::Cancelled);
        }

        tracing::info!(
            batches = report.batches,
            succeeded = report.succeeded,
            failed = report.failed,
            cancelled = report.cancelled,
            analyses_written = report.analyses_written,
            "dispatch finished"
        );
        report
    }
}

async fn run_batch(ctx: &BatchContext, batch_idx: usize, batch: Batch) -> BatchOutcome {
    if ctx.token.is_cancelled() {
        tracing::info!(batch = batch_idx, symbols = ?batch, "run cancelled; batch skipped");
        return BatchOutcome::Cancelled;
    }

    let exchange = match ctx.adapter.analyze(&batch).await {
        Ok(exchange) => exchange,
        Err(err) => return ctx.fail(batch_idx, err.into()).await,
    };

    // Audit row goes in before parsing so malformed output stays diagnosable.
    if let Err(err) = ctx
        .persister
        .record_exchange(&exchange.raw_request, &exchange.raw_response)
        .await
    {
        return ctx.fail(batch_idx, PipelineError::Persistence(err)).await;
    }

    if json::find_json_object(&exchange.output).is_none() {
        tracing::warn!(
            batch = batch_idx,
            stage = "extract",
            output_len = exchange.output.len(),
            "no JSON object found in model output"
        );
    }
    let json_text = json::extract_json(&exchange.output);

    let parsed = match json::parse_batch(json_text, chrono::Utc::now(), ctx.strict) {
        Ok(parsed) => parsed,
        Err(err) => return ctx.fail(batch_idx, err).await,
    };

    if parsed.items.is_empty() {
        tracing::warn!(batch = batch_idx, symbols = ?batch, "model returned no ticker analyses");
    }

    match ctx.persister.commit(&parsed).await {
        Ok(written) => {
            tracing::info!(
                batch = batch_idx,
                as_of_date = %parsed.as_of_date,
                written,
                "batch committed"
            );
            BatchOutcome::Committed { written }
        }
        Err(err) => ctx.fail(batch_idx, PipelineError::Persistence(err)).await,
    }
}
