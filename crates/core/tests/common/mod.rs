#![allow(dead_code)]

pub mod memory;

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use futures::TryStreamExt;

use st_core::{
    Authenticator, ConcurrencyGate, Download, Endpoint, Orchestrator, Result, RetryBuilder,
    TokenCache,
};

pub use memory::MemoryBackend;

/// Issues `tk1`, `tk2`, ... and counts how often it was asked
#[derive(Default)]
pub struct CountingAuth {
    calls: AtomicU64,
}

impl CountingAuth {
    pub fn calls(&self) -> u64 {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Authenticator for CountingAuth {
    async fn authenticate(&self) -> Result<Endpoint> {
        let n = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
        Ok(Endpoint::new("memory://cluster/v1/AUTH_test", format!("tk{n}")))
    }
}

pub struct Harness {
    pub backend: Arc<MemoryBackend>,
    pub auth: Arc<CountingAuth>,
    pub tokens: Arc<TokenCache>,
    pub orchestrator: Orchestrator,
}

/// Orchestrator over a fresh in-memory store holding container `c`
pub fn harness(capacity: usize) -> Harness {
    let backend = Arc::new(MemoryBackend::new());
    backend.create_container("c");
    let auth = Arc::new(CountingAuth::default());
    let tokens = Arc::new(TokenCache::new(auth.clone()));
    let retry = RetryBuilder::new()
        .max_attempts(5)
        .initial_backoff_ms(1)
        .max_backoff_ms(4)
        .build();
    let orchestrator = Orchestrator::new(
        backend.clone(),
        tokens.clone(),
        retry,
        ConcurrencyGate::new(capacity),
    );
    Harness {
        backend,
        auth,
        tokens,
        orchestrator,
    }
}

/// Drain a download into memory
pub async fn read_all(download: Download) -> Result<Vec<u8>> {
    let chunks: Vec<bytes::Bytes> = download.stream.try_collect().await?;
    Ok(chunks.concat())
}

/// Deterministic test data
pub fn pattern(len: usize) -> Vec<u8> {
    (0..len).map(|i| (i % 251) as u8).collect()
}
