// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (c) 2025-2026 JR Morton

//! Network facade: a recording wrapper around a pooled `hyper` client.
//!
//! Request metadata (host, eTLD+1, method, protocol, port) is extracted
//! from the request URI before delegation; the effect is emitted only when
//! the delegated request resolves successfully. Connection and protocol
//! errors propagate to the host unchanged with nothing recorded.
//!
//! Only `http` and `https` schemes are observed. Hostnames longer than
//! 253 bytes are rejected (not recorded). The `fetch` convenience covers
//! one-shot requests; `request` is the low-level path over any
//! `http::Request`, and the wrapped client itself is the pooled surface.

use anyhow::{Context, Result};
use hyper::body::Body;
use hyper::client::connect::Connect;
use hyper::client::HttpConnector;
use hyper::{Client, Method, Request, Response, Uri};
use std::sync::Arc;

use crate::canonicalize::{to_etld_plus_1, MAX_HOSTNAME_LEN};
use crate::patches::PatchContext;
use crate::trace::{EffectData, NetEffect, Protocol};

/// Recorded HTTP client over any hyper connector.
pub struct RecordedClient<C = HttpConnector>
where
    C: Connect + Clone + Send + Sync + 'static,
{
    inner: Client<C, Body>,
    ctx: Arc<PatchContext>,
}

impl RecordedClient<HttpConnector> {
    /// Wrap a default plain-HTTP pooled client.
    pub fn with_default_client(ctx: Arc<PatchContext>) -> Self {
        Self {
            inner: Client::new(),
            ctx,
        }
    }
}

impl<C> RecordedClient<C>
where
    C: Connect + Clone + Send + Sync + 'static,
{
    /// Wrap an existing pooled client (e.g. one with a TLS connector).
    pub fn new(inner: Client<C, Body>, ctx: Arc<PatchContext>) -> Self {
        Self { inner, ctx }
    }

    /// Issue a request through the wrapped client, recording the outbound
    /// effect on success.
    pub async fn request(&self, req: Request<Body>) -> hyper::Result<Response<Body>> {
        let meta = if self.ctx.bypassed() {
            None
        } else {
            extract_net_effect(req.uri(), req.method())
        };
        let response = self.inner.request(req).await?;
        if let Some(net) = meta {
            self.ctx.emit(EffectData::net(net));
        }
        Ok(response)
    }

    /// GET convenience.
    pub async fn get(&self, uri: Uri) -> hyper::Result<Response<Body>> {
        let req = Request::builder()
            .method(Method::GET)
            .uri(uri)
            .body(Body::empty())
            .expect("GET request with empty body is well-formed");
        self.request(req).await
    }

    /// One-shot fetch by method and URL string.
    pub async fn fetch(&self, method: Method, url: &str) -> Result<Response<Body>> {
        let uri: Uri = url
            .parse()
            .with_context(|| format!("invalid url: {}", url))?;
        let req = Request::builder()
            .method(method)
            .uri(uri)
            .body(Body::empty())
            .with_context(|| "failed to build request")?;
        self.request(req).await.context("request failed")
    }
}

/// Extract the outbound effect from a request line. `None` means the
/// request is not observable (no host, oversized host, non-http scheme).
fn extract_net_effect(uri: &Uri, method: &Method) -> Option<NetEffect> {
    let host = uri.host()?;
    if host.is_empty() || host.len() > MAX_HOSTNAME_LEN {
        return None;
    }
    let protocol = match uri.scheme_str() {
        Some("https") => Protocol::Https,
        Some("http") | None => Protocol::Http,
        Some(_) => return None,
    };
    Some(NetEffect {
        host_raw: host.to_string(),
        host_etld_plus_1: to_etld_plus_1(host),
        method: method.as_str().to_ascii_uppercase(),
        protocol,
        port: uri.port_u16(),
    })
}
