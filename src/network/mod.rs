//! Network capability
//!
//! The agent never talks to sockets directly. It asks a [`Network`]
//! implementation to fetch a request; a rejected fetch is reported as
//! `AgentError::Network`, while any HTTP status is a resolved response.

mod client;

pub use client::HttpNetwork;

use crate::error::{AgentError, AgentResult};
use async_trait::async_trait;
use std::fmt;
use std::str::FromStr;

/// HTTP request method
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Method {
    Get,
    Head,
    Post,
    Put,
    Patch,
    Delete,
}

impl FromStr for Method {
    type Err = AgentError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "GET" => Ok(Self::Get),
            "HEAD" => Ok(Self::Head),
            "POST" => Ok(Self::Post),
            "PUT" => Ok(Self::Put),
            "PATCH" => Ok(Self::Patch),
            "DELETE" => Ok(Self::Delete),
            other => Err(AgentError::Internal(format!("unsupported method: {}", other))),
        }
    }
}

impl fmt::Display for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Get => "GET",
            Self::Head => "HEAD",
            Self::Post => "POST",
            Self::Put => "PUT",
            Self::Patch => "PATCH",
            Self::Delete => "DELETE",
        };
        f.write_str(name)
    }
}

/// An intercepted request; its identity in a cache is the absolute URL
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Request {
    pub method: Method,
    pub url: String,
}

impl Request {
    pub fn new(method: Method, url: impl Into<String>) -> Self {
        Self {
            method,
            url: url.into(),
        }
    }

    /// Create a GET request
    pub fn get(url: impl Into<String>) -> Self {
        Self::new(Method::Get, url)
    }
}

/// A resolved response: status, headers and the full body
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Response {
    pub status: u16,
    pub headers: Vec<(String, String)>,
    pub body: Vec<u8>,
}

impl Response {
    pub fn new(status: u16, body: impl Into<Vec<u8>>) -> Self {
        Self {
            status,
            headers: Vec::new(),
            body: body.into(),
        }
    }

    /// A 200 response carrying a JSON document
    pub fn json(body: impl Into<Vec<u8>>) -> Self {
        Self::new(200, body).with_header("content-type", "application/json")
    }

    /// Add a header
    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    /// First value of a header, case-insensitive
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    /// Transport-level OK (2xx)
    pub fn is_ok(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

/// Cache directive passed to the network primitive
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum CacheMode {
    /// Normal HTTP caching
    #[default]
    Default,
    /// Bypass intermediate caches and revalidate against the origin
    Reload,
}

/// Options for a single fetch
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FetchOptions {
    pub cache: CacheMode,
}

impl FetchOptions {
    /// Options forcing revalidation, used for core shell installation
    pub fn reload() -> Self {
        Self {
            cache: CacheMode::Reload,
        }
    }
}

/// Abstract network interface
#[async_trait]
pub trait Network: Send + Sync {
    /// Fetch a request. Errors mean the request was rejected, not a bad status.
    async fn fetch(&self, request: &Request, options: FetchOptions) -> AgentResult<Response>;
}
