// Copyright (c) 2024-2025 Jesse Morgan / Morgan Forge
// SPDX-License-Identifier: AGPL-3.0-or-later

//! HTTP transport used by [`FileTransfer`](super::transfer::FileTransfer).
//!
//! The trait only covers what a streamed model download needs: a GET with an
//! optional bearer token, the status line, an optional total length, and a
//! body read incrementally as a stream of chunks.

use async_trait::async_trait;
use bytes::Bytes;
use futures_util::stream::BoxStream;
use futures_util::StreamExt;

use crate::error::{DownloadError, DownloadResult};

/// Incrementally readable response body.
pub type BodyStream = BoxStream<'static, DownloadResult<Bytes>>;

/// Response head plus streaming body.
pub struct HttpResponse {
    pub status: u16,
    pub reason: String,
    /// Value of `Content-Length`, when the server sent one
    pub content_length: Option<u64>,
    /// `None` for responses that cannot carry a body
    pub body: Option<BodyStream>,
}

impl HttpResponse {
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

impl std::fmt::Debug for HttpResponse {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HttpResponse")
            .field("status", &self.status)
            .field("reason", &self.reason)
            .field("content_length", &self.content_length)
            .field("body", &self.body.is_some())
            .finish()
    }
}

#[async_trait]
pub trait HttpTransport: Send + Sync {
    /// Issue a streaming GET. `bearer` goes verbatim into `Authorization`.
    async fn get(&self, url: &str, bearer: Option<&str>) -> DownloadResult<HttpResponse>;
}

/// [`HttpTransport`] backed by `reqwest`.
///
/// No overall timeout is set: a stalled connection waits until the
/// transport errors or the transfer is cancelled.
#[derive(Debug, Clone)]
pub struct ReqwestTransport {
    client: reqwest::Client,
}

impl ReqwestTransport {
    pub fn new() -> DownloadResult<Self> {
        let client = reqwest::Client::builder()
            .user_agent(concat!("modelfetch/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| DownloadError::Network(format!("failed to build HTTP client: {}", e)))?;
        Ok(Self { client })
    }
}

#[async_trait]
impl HttpTransport for ReqwestTransport {
    async fn get(&self, url: &str, bearer: Option<&str>) -> DownloadResult<HttpResponse> {
        let mut request = self.client.get(url);
        if let Some(token) = bearer {
            request = request.bearer_auth(token);
        }

        let response = request.send().await.map_err(|e| {
            if e.is_connect() {
                DownloadError::Network(format!("cannot connect to {}: {}", url, e))
            } else {
                DownloadError::Network(e.to_string())
            }
        })?;

        let status = response.status();
        let content_length = response.content_length();
        // 204 and 205 never carry a body.
        let body = if matches!(status.as_u16(), 204 | 205) {
            None
        } else {
            Some(
                response
                    .bytes_stream()
                    .map(|chunk| chunk.map_err(|e| DownloadError::Network(e.to_string())))
                    .boxed(),
            )
        };

        Ok(HttpResponse {
            status: status.as_u16(),
            reason: status.canonical_reason().unwrap_or("").to_string(),
            content_length,
            body,
        })
    }
}
