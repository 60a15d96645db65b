use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;

use crate::acquire::AcquisitionService;
use crate::models::{AcquisitionStatus, ExtractionRequest, ExtractionResult};
use crate::report::AcquisitionEvent;
use crate::traits::{ContentExtractor, ResultCache, ResultSink};

/// Acquire every request with at most `concurrency` runs in flight.
///
/// All runs share the service's rate limiter and breaker registry, so
/// requests for the same host still queue on that host's bucket. Results
/// come back in input order. Once `cancel` fires, queued requests finish
/// immediately as cancelled and in-flight ones abort their current tier.
/// A run that panics is reported as exhausted with no attempts.
pub async fn run_batch<X, C, S>(
    service: Arc<AcquisitionService<X, C, S>>,
    requests: Vec<ExtractionRequest>,
    concurrency: usize,
    cancel: CancellationToken,
) -> Vec<ExtractionResult>
where
    X: ContentExtractor + 'static,
    C: ResultCache + 'static,
    S: ResultSink + 'static,
{
    let total = requests.len();
    let concurrency = concurrency.max(1);
    service.reporter().report(AcquisitionEvent::BatchStarted {
        requests: total,
        concurrency,
    });

    let permits = Arc::new(Semaphore::new(concurrency));
    let mut tasks = JoinSet::new();
    let mut task_index = HashMap::with_capacity(total);
    let mut results: Vec<ExtractionResult> = requests
        .iter()
        .map(|r| ExtractionResult::empty(r, AcquisitionStatus::Exhausted))
        .collect();

    for (index, request) in requests.into_iter().enumerate() {
        let service = Arc::clone(&service);
        let permits = Arc::clone(&permits);
        let cancel = cancel.clone();

        let handle = tasks.spawn(async move {
            // Without a permit the run still happens: acquire() sees the
            // cancelled token and returns at once.
            let _permit = tokio::select! {
                permit = permits.acquire_owned() => permit.ok(),
                () = cancel.cancelled() => None,
            };
            service.acquire(&request, &cancel).await
        });
        task_index.insert(handle.id(), index);
    }

    while let Some(joined) = tasks.join_next_with_id().await {
        match joined {
            Ok((id, result)) => {
                if let Some(&index) = task_index.get(&id) {
                    results[index] = result;
                }
            }
            Err(e) => {
                let url = task_index.get(&e.id()).map(|&i| results[i].url.as_str());
                tracing::error!(error = %e, url = ?url, "Acquisition task failed");
            }
        }
    }

    service.reporter().report(AcquisitionEvent::BatchFinished {
        accepted: results.iter().filter(|r| r.is_accepted()).count(),
        total,
    });
    results
}
