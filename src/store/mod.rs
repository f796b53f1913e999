//! Graph Store
//!
//! Content-addressed results keyed by fingerprint, with at most one
//! in-flight computation per fingerprint. Concurrent callers for the same
//! fingerprint subscribe to the running computation; distinct fingerprints
//! never wait on each other's work.

pub mod backend;

pub use backend::{JsonFileBackend, MemoryBackend, StoreBackend};

use chrono::{DateTime, Utc};
use futures::future::{BoxFuture, FutureExt, Shared};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::future::Future;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::config::StoreConfig;
use crate::errors::{UeirError, UeirResult};
use crate::solver::SolverStats;
use crate::ueir::{Fingerprint, Graph};

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ResultMetadata {
    pub created_at: DateTime<Utc>,
    pub pareto_front_size: usize,
    pub optimization_stats: SolverStats,
    /// Profile the selected graph was specialized for.
    #[serde(default)]
    pub profile_id: String,
    #[serde(default)]
    pub applied_passes: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoredResult {
    pub graph_id: Fingerprint,
    pub selected_graph: Graph,
    pub metadata: ResultMetadata,
}

async fn run_computation<F, Fut>(
    backend: &dyn StoreBackend,
    computations: &AtomicUsize,
    fingerprint: Fingerprint,
    compute: F,
) -> UeirResult<StoredResult>
where
    F: FnOnce() -> Fut,
    Fut: Future<Output = UeirResult<StoredResult>>,
{
    // an earlier computation may have finished since the caller looked
    if let Some(hit) = backend.get(&fingerprint).await? {
        return Ok(hit);
    }
    computations.fetch_add(1, Ordering::SeqCst);
    info!("Computing {}", fingerprint.short());

    let result = compute().await?;
    if result.graph_id != fingerprint {
        return Err(UeirError::Store(format!(
            "computed result keyed {} under {}",
            result.graph_id.short(),
            fingerprint.short()
        )));
    }
    backend.put(result.clone()).await?;
    Ok(result)
}

type SharedComputation = Shared<BoxFuture<'static, UeirResult<StoredResult>>>;
type InFlight = Arc<Mutex<HashMap<Fingerprint, (u64, SharedComputation)>>>;

pub struct GraphStore {
    backend: Arc<dyn StoreBackend>,
    in_flight: InFlight,
    next_ticket: AtomicU64,
    computations: Arc<AtomicUsize>,
}

impl GraphStore {
    pub fn new(backend: Arc<dyn StoreBackend>) -> Self {
        Self {
            backend,
            in_flight: Arc::new(Mutex::new(HashMap::new())),
            next_ticket: AtomicU64::new(0),
            computations: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub fn in_memory() -> Self {
        Self::new(Arc::new(MemoryBackend::new()))
    }

    pub async fn from_config(config: &StoreConfig) -> UeirResult<Self> {
        let backend: Arc<dyn StoreBackend> = match config {
            StoreConfig::Memory => Arc::new(MemoryBackend::new()),
            StoreConfig::File { path } => Arc::new(JsonFileBackend::new(path).await?),
        };
        Ok(Self::new(backend))
    }

    pub async fn get(&self, fingerprint: &Fingerprint) -> UeirResult<Option<StoredResult>> {
        self.backend.get(fingerprint).await
    }

    pub async fn evict(&self, fingerprint: &Fingerprint) -> UeirResult<bool> {
        self.backend.evict(fingerprint).await
    }

    pub async fn len(&self) -> UeirResult<usize> {
        self.backend.len().await
    }

    /// Number of compute functions actually run.
    pub fn computations(&self) -> usize {
        self.computations.load(Ordering::SeqCst)
    }

    /// Return the stored result for `fingerprint`, running `compute` if there
    /// is none and no other caller is already computing it.
    ///
    /// The computation runs on its own task, so a caller dropping its future
    /// does not affect other subscribers. A failed computation is handed to
    /// every current subscriber and then released; nothing is stored.
    pub async fn get_or_compute<F, Fut>(&self, fingerprint: Fingerprint, compute: F) -> UeirResult<StoredResult>
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = UeirResult<StoredResult>> + Send + 'static,
    {
        if let Some(hit) = self.backend.get(&fingerprint).await? {
            debug!("Store hit for {}", fingerprint.short());
            return Ok(hit);
        }

        let computation = {
            let mut in_flight = self.in_flight.lock().await;
            match in_flight.get(&fingerprint) {
                Some((_, running)) => {
                    debug!("Joining in-flight computation for {}", fingerprint.short());
                    running.clone()
                }
                None => {
                    let ticket = self.next_ticket.fetch_add(1, Ordering::SeqCst);
                    let running = self.spawn_computation(fingerprint, ticket, compute);
                    in_flight.insert(fingerprint, (ticket, running.clone()));
                    running
                }
            }
        };

        computation.await
    }

    fn spawn_computation<F, Fut>(&self, fingerprint: Fingerprint, ticket: u64, compute: F) -> SharedComputation
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = UeirResult<StoredResult>> + Send + 'static,
    {
        let backend = self.backend.clone();
        let in_flight = self.in_flight.clone();
        let computations = self.computations.clone();

        let task = tokio::spawn(async move {
            run_computation(backend.as_ref(), &computations, fingerprint, compute).await
        });

        // Release runs on a separate task so it still happens when the
        // computation panics or no subscriber is left polling.
        let supervisor = tokio::spawn(async move {
            let outcome = match task.await {
                Ok(outcome) => outcome,
                Err(join_error) => Err(UeirError::from(join_error)),
            };

            let mut in_flight = in_flight.lock().await;
            if in_flight.get(&fingerprint).map_or(false, |(t, _)| *t == ticket) {
                in_flight.remove(&fingerprint);
            }
            if let Err(e) = &outcome {
                warn!("Computation for {} failed, released: {}", fingerprint.short(), e);
            }
            outcome
        });

        async move {
            match supervisor.await {
                Ok(outcome) => outcome,
                Err(join_error) => Err(UeirError::from(join_error)),
            }
        }
        .boxed()
        .shared()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn result_for(fingerprint: Fingerprint) -> StoredResult {
        StoredResult {
            graph_id: fingerprint,
            selected_graph: Graph::new(),
            metadata: ResultMetadata::default(),
        }
    }

    #[tokio::test]
    async fn test_concurrent_callers_share_one_computation() {
        let store = Arc::new(GraphStore::in_memory());
        let fp = Fingerprint::of("shared").unwrap();

        let callers = (0..8).map(|_| {
            let store = store.clone();
            tokio::spawn(async move {
                store
                    .get_or_compute(fp, move || async move {
                        tokio::time::sleep(Duration::from_millis(50)).await;
                        Ok(result_for(fp))
                    })
                    .await
            })
        });
        let results = futures::future::join_all(callers).await;

        for r in &results {
            assert_eq!(r.as_ref().unwrap().as_ref().unwrap().graph_id, fp);
        }
        assert_eq!(store.computations(), 1);
        assert_eq!(store.len().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_distinct_fingerprints_compute_independently() {
        let store = GraphStore::in_memory();
        let a = Fingerprint::of("a").unwrap();
        let b = Fingerprint::of("b").unwrap();
        store.get_or_compute(a, move || async move { Ok(result_for(a)) }).await.unwrap();
        store.get_or_compute(b, move || async move { Ok(result_for(b)) }).await.unwrap();
        assert_eq!(store.computations(), 2);
    }

    #[tokio::test]
    async fn test_failure_releases_fingerprint() {
        let store = GraphStore::in_memory();
        let fp = Fingerprint::of("flaky").unwrap();

        let err = store
            .get_or_compute(fp, || async { Err(UeirError::Infeasible { evaluated: 3 }) })
            .await
            .unwrap_err();
        assert_eq!(err, UeirError::Infeasible { evaluated: 3 });
        assert!(store.get(&fp).await.unwrap().is_none());

        let ok = store.get_or_compute(fp, move || async move { Ok(result_for(fp)) }).await.unwrap();
        assert_eq!(ok.graph_id, fp);
        assert_eq!(store.computations(), 2);
    }

    async fn panicking_compute() -> UeirResult<StoredResult> {
        panic!("evaluator bug")
    }

    #[tokio::test]
    async fn test_panicking_computation_releases_fingerprint() {
        let store = GraphStore::in_memory();
        let fp = Fingerprint::of("panics").unwrap();

        let err = store.get_or_compute(fp, panicking_compute).await.unwrap_err();
        assert!(matches!(err, UeirError::Task(_)));

        let ok = store.get_or_compute(fp, move || async move { Ok(result_for(fp)) }).await.unwrap();
        assert_eq!(ok.graph_id, fp);
        assert_eq!(store.computations(), 2);
    }

    #[tokio::test]
    async fn test_stored_result_is_reused() {
        let store = GraphStore::in_memory();
        let fp = Fingerprint::of("cached").unwrap();
        let first = store.get_or_compute(fp, move || async move { Ok(result_for(fp)) }).await.unwrap();
        let second = store
            .get_or_compute(fp, || async { Err(UeirError::Store("must not run".into())) })
            .await
            .unwrap();
        assert_eq!(first, second);
        assert_eq!(store.computations(), 1);
    }

    #[tokio::test]
    async fn test_cancelled_subscriber_does_not_break_others() {
        let store = Arc::new(GraphStore::in_memory());
        let fp = Fingerprint::of("cancel").unwrap();

        let compute = move || async move {
            tokio::time::sleep(Duration::from_millis(50)).await;
            Ok(result_for(fp))
        };
        let cancelled = {
            let store = store.clone();
            tokio::spawn(async move { store.get_or_compute(fp, compute).await })
        };
        tokio::time::sleep(Duration::from_millis(10)).await;

        let survivor = {
            let store = store.clone();
            tokio::spawn(async move {
                store
                    .get_or_compute(fp, || async { Err(UeirError::Store("duplicate".into())) })
                    .await
            })
        };
        cancelled.abort();

        let result = survivor.await.unwrap().unwrap();
        assert_eq!(result.graph_id, fp);
        assert_eq!(store.computations(), 1);
    }

    #[tokio::test]
    async fn test_mismatched_result_is_rejected() {
        let store = GraphStore::in_memory();
        let fp = Fingerprint::of("expected").unwrap();
        let other = Fingerprint::of("other").unwrap();
        let err = store
            .get_or_compute(fp, move || async move { Ok(result_for(other)) })
            .await
            .unwrap_err();
        assert!(matches!(err, UeirError::Store(_)));
        assert_eq!(store.len().await.unwrap(), 0);
    }
}
