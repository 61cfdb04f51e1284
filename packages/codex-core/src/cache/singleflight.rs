//! Single-flight request coalescing: concurrent fetches for the same URI
//! share one in-flight future.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use futures::FutureExt;
use futures::future::Shared;
use tracing::trace;

use crate::error::{CodexError, Result};

type SharedFetch = Shared<futures::future::BoxFuture<'static, std::result::Result<Arc<Vec<u8>>, Arc<CodexError>>>>;

/// A per-key coalescing map: the first caller for a key creates the
/// in-flight future, subsequent callers await the same one. On
/// completion, the entry is removed.
#[derive(Clone, Default)]
pub struct SingleFlight {
    inflight: Arc<Mutex<HashMap<String, SharedFetch>>>,
}

impl SingleFlight {
    pub fn new() -> Self {
        Self::default()
    }

    /// Run `make_future()` for `key`, coalescing concurrent callers onto
    /// the same execution. `make_future` is only invoked if no fetch is
    /// already in flight for `key`.
    pub async fn run<F>(&self, key: &str, make_future: F) -> Result<Vec<u8>>
    where
        F: FnOnce() -> futures::future::BoxFuture<'static, Result<Vec<u8>>>,
    {
        let shared = {
            let mut inflight = self.inflight.lock().expect("singleflight mutex poisoned");
            if let Some(existing) = inflight.get(key) {
                trace!(key, "joining in-flight fetch");
                existing.clone()
            } else {
                let inflight_map = self.inflight.clone();
                let key_owned = key.to_string();
                let inner = make_future();
                let wrapped: futures::future::BoxFuture<'static, std::result::Result<Arc<Vec<u8>>, Arc<CodexError>>> =
                    async move {
                        let result = inner.await;
                        inflight_map.lock().expect("singleflight mutex poisoned").remove(&key_owned);
                        result.map(Arc::new).map_err(Arc::new)
                    }
                    .boxed();
                let shared = wrapped.shared();
                inflight.insert(key.to_string(), shared.clone());
                shared
            }
        };

        shared.await.map(|arc| (*arc).clone()).map_err(|arc| match &*arc {
            CodexError::NotFound { uri, providers } => CodexError::NotFound {
                uri: uri.clone(),
                providers: providers.clone(),
            },
            CodexError::Network { provider, message } => CodexError::Network {
                provider: provider.clone(),
                message: message.clone(),
            },
            other => CodexError::Network {
                provider: "singleflight".into(),
                message: other.to_string(),
            },
        })
    }

    pub fn in_flight_count(&self) -> usize {
        self.inflight.lock().expect("singleflight mutex poisoned").len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq as pretty_assert_eq;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    #[tokio::test]
    async fn concurrent_calls_invoke_fetch_once() {
        let sf = SingleFlight::new();
        let calls = Arc::new(AtomicUsize::new(0));

        let mut handles = vec![];
        for _ in 0..8 {
            let sf = sf.clone();
            let calls = calls.clone();
            handles.push(tokio::spawn(async move {
                sf.run("codex://a/b/c", move || {
                    calls.fetch_add(1, Ordering::SeqCst);
                    async move {
                        tokio::time::sleep(Duration::from_millis(20)).await;
                        Ok(b"result".to_vec())
                    }
                    .boxed()
                })
                .await
            }));
        }

        for handle in handles {
            let result = handle.await.unwrap().unwrap();
            pretty_assert_eq!(result, b"result".to_vec());
        }

        pretty_assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn entry_is_removed_after_completion() {
        let sf = SingleFlight::new();
        sf.run("codex://a/b/c", || async { Ok(b"x".to_vec()) }.boxed())
            .await
            .unwrap();
        pretty_assert_eq!(sf.in_flight_count(), 0);
    }

    #[tokio::test]
    async fn errors_propagate_to_all_waiters() {
        let sf = SingleFlight::new();
        let mut handles = vec![];
        for _ in 0..4 {
            let sf = sf.clone();
            handles.push(tokio::spawn(async move {
                sf.run("codex://a/b/c", || {
                    async {
                        Err(CodexError::Network {
                            provider: "http".into(),
                            message: "boom".into(),
                        })
                    }
                    .boxed()
                })
                .await
            }));
        }
        for handle in handles {
            assert!(handle.await.unwrap().is_err());
        }
    }

    #[tokio::test]
    async fn distinct_keys_do_not_coalesce() {
        let sf = SingleFlight::new();
        let calls = Arc::new(AtomicUsize::new(0));
        let c1 = calls.clone();
        let c2 = calls.clone();

        sf.run("codex://a/b/1", move || {
            c1.fetch_add(1, Ordering::SeqCst);
            async { Ok(b"1".to_vec()) }.boxed()
        })
        .await
        .unwrap();
        sf.run("codex://a/b/2", move || {
            c2.fetch_add(1, Ordering::SeqCst);
            async { Ok(b"2".to_vec()) }.boxed()
        })
        .await
        .unwrap();

        pretty_assert_eq!(calls.load(Ordering::SeqCst), 2);
    }
}
