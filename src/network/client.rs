//! HTTP network backed by ureq
//!
//! ureq is blocking, so each fetch runs on tokio's blocking pool.

use super::{CacheMode, FetchOptions, Method, Network, Request, Response};
use crate::error::{AgentError, AgentResult};
use async_trait::async_trait;
use tracing::debug;

/// Upper bound for a single response body (canvaskit wasm is several MB)
const MAX_BODY_BYTES: u64 = 64 * 1024 * 1024;

/// Network capability over real HTTP
#[derive(Clone)]
pub struct HttpNetwork {
    agent: ureq::Agent,
    user_agent: String,
}

impl HttpNetwork {
    /// Create a client; non-2xx statuses are returned as responses
    pub fn new(user_agent: impl Into<String>) -> Self {
        let agent: ureq::Agent = ureq::Agent::config_builder()
            .http_status_as_error(false)
            .build()
            .into();
        Self {
            agent,
            user_agent: user_agent.into(),
        }
    }

    fn fetch_blocking(
        agent: &ureq::Agent,
        user_agent: &str,
        request: &Request,
        options: FetchOptions,
    ) -> AgentResult<Response> {
        let url = request.url.as_str();
        let mut headers = vec![("User-Agent", user_agent)];
        if options.cache == CacheMode::Reload {
            headers.push(("Cache-Control", "no-cache"));
            headers.push(("Pragma", "no-cache"));
        }

        let result = match request.method {
            Method::Get => with_headers(agent.get(url), &headers).call(),
            Method::Head => with_headers(agent.head(url), &headers).call(),
            Method::Delete => with_headers(agent.delete(url), &headers).call(),
            Method::Post => with_headers(agent.post(url), &headers).send_empty(),
            Method::Put => with_headers(agent.put(url), &headers).send_empty(),
            Method::Patch => with_headers(agent.patch(url), &headers).send_empty(),
        };
        let mut response = result.map_err(|e| AgentError::network(url, e.to_string()))?;

        let status = response.status().as_u16();
        let headers = response
            .headers()
            .iter()
            .filter_map(|(name, value)| {
                value
                    .to_str()
                    .ok()
                    .map(|v| (name.as_str().to_string(), v.to_string()))
            })
            .collect();
        let body = response
            .body_mut()
            .with_config()
            .limit(MAX_BODY_BYTES)
            .read_to_vec()
            .map_err(|e| AgentError::network(url, format!("reading body: {}", e)))?;

        debug!("{} {} -> {} ({} bytes)", request.method, url, status, body.len());
        Ok(Response {
            status,
            headers,
            body,
        })
    }
}

fn with_headers<B>(
    mut builder: ureq::RequestBuilder<B>,
    headers: &[(&str, &str)],
) -> ureq::RequestBuilder<B> {
    for (name, value) in headers {
        builder = builder.header(*name, *value);
    }
    builder
}

#[async_trait]
impl Network for HttpNetwork {
    async fn fetch(&self, request: &Request, options: FetchOptions) -> AgentResult<Response> {
        let agent = self.agent.clone();
        let user_agent = self.user_agent.clone();
        let request = request.clone();

        tokio::task::spawn_blocking(move || {
            Self::fetch_blocking(&agent, &user_agent, &request, options)
        })
        .await
        .map_err(|e| AgentError::Internal(format!("fetch task failed: {}", e)))?
    }
}
