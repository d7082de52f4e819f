//! Concurrent batch execution against a completion service.
//!
//! Every request becomes one tokio task; a semaphore caps how many are in
//! flight. Results come back in request order. Requests that still fail
//! after the client's own retries are logged and left out, so downstream
//! stages see them as missing correlations.

use crate::artifact::{read_jsonl, write_jsonl};
use crate::client::CompletionService;
use crate::models::{CompletionRequest, CompletionResult, Result, ServiceError, StageStats, VerisynthError};
use crate::pipeline::{log_stats, progress_bar};
use std::path::Path;
use std::sync::Arc;
use tokio::sync::Semaphore;
use tracing::{info, warn};

/// Outcome of one batch run.
#[derive(Debug, Default)]
pub struct BatchOutcome {
    /// Successful results, in request order
    pub results: Vec<CompletionResult>,
    /// Correlation ids that produced no result
    pub failed: Vec<String>,
}

/// Worker pool for parallel completion requests.
#[derive(Clone)]
pub struct WorkerPool {
    service: Arc<dyn CompletionService>,
    semaphore: Arc<Semaphore>,
    pool_size: usize,
}

impl WorkerPool {
    pub fn new(service: Arc<dyn CompletionService>, pool_size: usize) -> Self {
        let pool_size = pool_size.max(1);
        Self {
            service,
            semaphore: Arc::new(Semaphore::new(pool_size)),
            pool_size,
        }
    }

    async fn execute(&self, request: &CompletionRequest) -> Result<CompletionResult> {
        let _permit = self
            .semaphore
            .acquire()
            .await
            .map_err(|_| VerisynthError::Internal("Semaphore closed".to_string()))?;

        let content = self.service.complete(&request.body).await?;
        Ok(CompletionResult::success(request.custom_id.clone(), content))
    }

    /// Run every request; fails only if the batch is non-empty and nothing
    /// succeeded.
    pub async fn run(&self, requests: Vec<CompletionRequest>) -> Result<BatchOutcome> {
        let total = requests.len();
        let pb = progress_bar(total);
        let mut handles = Vec::with_capacity(total);

        for request in requests {
            let pool = self.clone();
            let pb = pb.clone();
            handles.push(tokio::spawn(async move {
                let result = pool.execute(&request).await;
                pb.inc(1);
                (request.custom_id, result)
            }));
        }

        let mut outcome = BatchOutcome::default();
        for handle in handles {
            match handle.await {
                Ok((_, Ok(result))) => outcome.results.push(result),
                Ok((custom_id, Err(e))) => {
                    warn!(
                        custom_id = %custom_id,
                        error = %e,
                        retryable = e.is_retryable(),
                        "Request failed"
                    );
                    outcome.failed.push(custom_id);
                }
                Err(e) => {
                    warn!(error = %e, "Task panicked");
                }
            }
        }
        pb.finish_and_clear();

        if total > 0 && outcome.results.is_empty() {
            return Err(ServiceError::BatchFailed(total).into());
        }
        Ok(outcome)
    }

    /// Execute a request file and write the result file.
    pub async fn run_file(&self, requests: &Path, output: &Path) -> Result<StageStats> {
        let mut stats = StageStats::new("run-batch");
        let requests: Vec<CompletionRequest> = read_jsonl(requests)?;
        stats.total = requests.len();
        stats.requests = requests.len();

        info!(
            requests = requests.len(),
            concurrency = self.pool_size,
            "Running batch"
        );

        let outcome = self.run(requests).await?;
        stats.errors = outcome.failed.len();
        stats.emitted = write_jsonl(output, &outcome.results)?;

        stats.finalize();
        log_stats(&stats);
        Ok(stats)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Message, RequestBody, SamplingParams};
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Echoes the last message, failing on "fail".
    struct EchoService {
        in_flight: AtomicUsize,
        peak: AtomicUsize,
    }

    #[async_trait]
    impl CompletionService for EchoService {
        async fn complete(&self, body: &RequestBody) -> Result<String> {
            let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
            self.peak.fetch_max(now, Ordering::SeqCst);
            tokio::time::sleep(std::time::Duration::from_millis(5)).await;
            self.in_flight.fetch_sub(1, Ordering::SeqCst);

            let last = body.messages.last().map(|m| m.content.clone()).unwrap_or_default();
            if last == "fail" {
                return Err(ServiceError::InvalidResponse("boom".into()).into());
            }
            Ok(format!("echo: {last}"))
        }
    }

    fn echo() -> Arc<EchoService> {
        Arc::new(EchoService {
            in_flight: AtomicUsize::new(0),
            peak: AtomicUsize::new(0),
        })
    }

    fn request(id: usize, text: &str) -> CompletionRequest {
        CompletionRequest::new(
            format!("request-{id}"),
            RequestBody::new(vec![Message::user(text)], &SamplingParams::greedy("m")),
        )
    }

    #[tokio::test]
    async fn test_results_in_request_order_and_bounded() {
        let service = echo();
        let pool = WorkerPool::new(service.clone(), 2);
        let requests = (1..=6).map(|i| request(i, &format!("q{i}"))).collect();

        let outcome = pool.run(requests).await.unwrap();
        let ids: Vec<_> = outcome.results.iter().map(|r| r.custom_id.as_str()).collect();
        assert_eq!(ids, ["request-1", "request-2", "request-3", "request-4", "request-5", "request-6"]);
        assert_eq!(outcome.results[2].text(), Some("echo: q3"));
        assert!(service.peak.load(Ordering::SeqCst) <= 2);
    }

    #[tokio::test]
    async fn test_failed_requests_are_left_out() {
        let pool = WorkerPool::new(echo(), 4);
        let outcome = pool
            .run(vec![request(1, "ok"), request(2, "fail"), request(3, "ok")])
            .await
            .unwrap();
        assert_eq!(outcome.results.len(), 2);
        assert_eq!(outcome.failed, ["request-2"]);
    }

    #[tokio::test]
    async fn test_all_failed_is_an_error() {
        let pool = WorkerPool::new(echo(), 4);
        let err = pool.run(vec![request(1, "fail")]).await.unwrap_err();
        assert!(matches!(err, VerisynthError::Service(ServiceError::BatchFailed(1))));
        assert!(pool.run(Vec::new()).await.unwrap().results.is_empty());
    }
}
