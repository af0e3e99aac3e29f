//! Host-side view of a remote plugin.

use std::{str::FromStr, time::Duration};

use anyhow::{bail, Context, Result};
use bytes::Bytes;
use http::{header, Request, StatusCode, Uri};
use http_body_util::{BodyExt, Full};
use hyper_util::{
    client::legacy::{connect::HttpConnector, Client},
    rt::TokioExecutor,
};
use serde::de::DeserializeOwned;
use serde_json::Value;
use tether_sdk::{
    paths, LifecycleResponse, Method, PluginMetadata, ServiceCall, ServiceDescriptor,
};
use tokio::time::timeout;

use crate::{config::HostConfig, handlers::Endpoint, lifecycle::Operation};

type HttpClient = Client<HttpConnector, Full<Bytes>>;

/// Talks to one plugin over its HTTP boundary. A call that outlives its
/// timeout is reported as a plugin fault.
#[derive(Clone)]
pub struct PluginClient {
    base: Uri,
    client: HttpClient,
    config: HostConfig,
}

impl PluginClient {
    pub fn new(base_url: &str, config: &HostConfig) -> Result<Self> {
        let base = Uri::from_str(base_url.trim_end_matches('/'))
            .with_context(|| format!("invalid plugin url `{base_url}`"))?;
        if base.scheme().is_none() || base.authority().is_none() {
            bail!("plugin url `{base_url}` must include scheme and host");
        }
        Ok(Self {
            base,
            client: build_client(),
            config: config.clone(),
        })
    }

    pub fn base_url(&self) -> &Uri {
        &self.base
    }

    /// Raw discovery document, for validation before trusting it.
    pub async fn metadata_document(&self) -> Result<Value> {
        let (_, body) = self
            .send(Method::Get, paths::METADATA, None, self.config.request_timeout())
            .await?;
        decode(&body)
    }

    pub async fn metadata(&self) -> Result<PluginMetadata> {
        let document = self.metadata_document().await?;
        serde_json::from_value(document).context("plugin metadata does not match the contract")
    }

    pub async fn health(&self) -> Result<Value> {
        let (_, body) = self
            .send(Method::Get, paths::HEALTH, None, self.config.request_timeout())
            .await?;
        decode(&body)
    }

    /// Triggers a transition. An `{status: "error"}` reply is returned as a
    /// value, not an error; transport problems and timeouts are errors.
    pub async fn lifecycle(&self, op: Operation) -> Result<LifecycleResponse> {
        let endpoint = Endpoint::for_operation(op);
        let (status, body) = self
            .send(
                endpoint.method(),
                endpoint.path(),
                Some(Bytes::new()),
                self.config.lifecycle_timeout(),
            )
            .await?;
        decode::<LifecycleResponse>(&body)
            .with_context(|| format!("unexpected {status} reply to {op}"))
    }

    /// Forwards a call verbatim to a declared service.
    pub async fn call(&self, service: &ServiceDescriptor, call: &ServiceCall) -> Result<Value> {
        let body = match service.method {
            Method::Get => None,
            Method::Post => Some(Bytes::from(serde_json::to_vec(call)?)),
        };
        let (status, body) = self
            .send(service.method, &service.endpoint, body, self.config.request_timeout())
            .await?;
        let value: Value = decode(&body)?;
        if !status.is_success() {
            let message = value
                .get("message")
                .and_then(Value::as_str)
                .unwrap_or("no message");
            bail!("service `{}` failed with {status}: {message}", service.name);
        }
        Ok(value)
    }

    async fn send(
        &self,
        method: Method,
        path: &str,
        body: Option<Bytes>,
        limit: Duration,
    ) -> Result<(StatusCode, Bytes)> {
        let uri = self.uri_for(path)?;
        let mut builder = Request::builder().method(method.as_str()).uri(uri.clone());
        if body.is_some() {
            builder = builder.header(header::CONTENT_TYPE, "application/json");
        }
        let request = builder
            .body(Full::new(body.unwrap_or_default()))
            .context("failed to build plugin request")?;

        let exchange = async {
            let response = self.client.request(request).await?;
            let status = response.status();
            let body = response.into_body().collect().await?.to_bytes();
            anyhow::Ok((status, body))
        };
        timeout(limit, exchange)
            .await
            .with_context(|| format!("plugin fault: {method} {uri} timed out after {limit:?}"))?
            .with_context(|| format!("{method} {uri} failed"))
    }

    fn uri_for(&self, path: &str) -> Result<Uri> {
        let mut parts = self.base.clone().into_parts();
        let prefix = parts
            .path_and_query
            .as_ref()
            .map(|pq| pq.path().trim_end_matches('/'))
            .unwrap_or("");
        parts.path_and_query = Some(format!("{prefix}{path}").parse()?);
        Uri::from_parts(parts).context("failed to construct plugin uri")
    }
}

fn build_client() -> HttpClient {
    Client::builder(TokioExecutor::new()).build(HttpConnector::new())
}

fn decode<T: DeserializeOwned>(body: &[u8]) -> Result<T> {
    serde_json::from_slice(body).context("plugin reply is not valid JSON")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn joins_base_path_and_endpoint() {
        let client = PluginClient::new("http://plugin:8100/", &HostConfig::default()).unwrap();
        assert_eq!(
            client.uri_for("/plugin/load").unwrap(),
            Uri::from_static("http://plugin:8100/plugin/load")
        );

        let nested = PluginClient::new("http://core/plugins/metrics", &HostConfig::default()).unwrap();
        assert_eq!(
            nested.uri_for("/metrics/report").unwrap(),
            Uri::from_static("http://core/plugins/metrics/metrics/report")
        );
    }

    #[test]
    fn rejects_relative_urls() {
        assert!(PluginClient::new("/plugin", &HostConfig::default()).is_err());
    }
}
