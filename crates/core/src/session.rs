//! A client session: backend, token cache, retry policy, and gate

use std::sync::Arc;

use bytes::Bytes;
use futures::StreamExt;

use crate::alias::RetryConfig;
use crate::body::ByteStream;
use crate::error::Result;
use crate::gate::ConcurrencyGate;
use crate::retry::RetryPolicy;
use crate::token::TokenCache;
use crate::traits::{Backend, Headers, Request, Response};

/// Shared handles every transfer in the process works through
///
/// Cloning is cheap; clones share the backend, token cache, and gate.
#[derive(Clone)]
pub struct Session {
    backend: Arc<dyn Backend>,
    retry: RetryPolicy,
    gate: ConcurrencyGate,
}

impl Session {
    pub fn new(
        backend: Arc<dyn Backend>,
        tokens: Arc<TokenCache>,
        retry: RetryConfig,
        gate: ConcurrencyGate,
    ) -> Self {
        Self {
            backend,
            retry: RetryPolicy::new(retry, tokens),
            gate,
        }
    }

    pub fn gate(&self) -> &ConcurrencyGate {
        &self.gate
    }

    pub fn tokens(&self) -> &Arc<TokenCache> {
        self.retry.tokens()
    }

    /// Send a request whose response body is small; the body is buffered
    ///
    /// Every attempt holds one permit for the whole round trip.
    pub async fn send(&self, request: Request) -> Result<(Headers, Bytes)> {
        let path = request.path.clone();
        self.retry
            .execute(|endpoint| {
                let request = request.clone();
                let path = &path;
                async move {
                    let _permit = self.gate.acquire().await?;
                    let response = self.backend.send(&endpoint, request).await?;
                    let response = response.error_for_status(path)?;
                    let body = response.body.collect().await?;
                    Ok((response.headers, body))
                }
            })
            .await
    }

    /// Send a request and stream its body
    ///
    /// The permit stays with the returned body until it is dropped. Errors
    /// while reading the body are not retried.
    pub async fn send_streaming(&self, request: Request) -> Result<Response> {
        let path = request.path.clone();
        self.retry
            .execute(|endpoint| {
                let request = request.clone();
                let path = &path;
                async move {
                    let permit = self.gate.acquire().await?;
                    let response = self.backend.send(&endpoint, request).await?;
                    let Response {
                        status,
                        headers,
                        body,
                    } = response.error_for_status(path)?;
                    let body = ByteStream::new(body.map(move |chunk| {
                        let _held = &permit;
                        chunk
                    }));
                    Ok(Response {
                        status,
                        headers,
                        body,
                    })
                }
            })
            .await
    }
}
