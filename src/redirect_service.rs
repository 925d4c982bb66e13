use std::collections::BTreeMap;

use async_trait::async_trait;
use bytes::Bytes;
use chrono::Utc;
use http::header;
use pingora_core::prelude::*;
use pingora_http::ResponseHeader;
use pingora_proxy::{ProxyHttp, Session};
use tracing::debug;

use crate::event::RedirectEvent;
use crate::resolver::{RedirectResolver, RedirectResult};

/// Answers every request locally: redirects, health and probe responses
pub struct RedirectService {
    resolver: RedirectResolver,
    probe_token: Option<String>,
}

impl RedirectService {
    const REDIRECT_PREFIX: &'static str = "/redirect";
    const HEALTH_PREFIX: &'static str = "/health";
    const HEALTH_BODY: &'static str = "healthy";

    /// Creates a new RedirectService
    pub fn new(resolver: RedirectResolver, probe_token: Option<String>) -> Self {
        Self {
            resolver,
            probe_token,
        }
    }

    /// Maps a request path to the endpoint that serves it
    fn route<'a>(&'a self, path: &'a str) -> Route<'a> {
        if let Some(rest) = Self::under(path, Self::REDIRECT_PREFIX) {
            // `/redirect/{pool}/{path...}`: the pool segment must be followed by a slash
            return match rest.and_then(|rest| rest.split_once('/')) {
                Some((pool_id, path)) => Route::Redirect { pool_id, path },
                None => Route::Malformed,
            };
        }

        if Self::under(path, Self::HEALTH_PREFIX).is_some() {
            return Route::Health;
        }

        if let Some(token) = self.probe_token.as_deref() {
            if Self::under(path, &format!("/{token}")).is_some() {
                return Route::Probe(token);
            }
        }

        Route::NotFound
    }

    /// `Some(None)` for the bare prefix, `Some(Some(rest))` for anything below it
    fn under<'a>(path: &'a str, prefix: &str) -> Option<Option<&'a str>> {
        let remainder = path.strip_prefix(prefix)?;
        if remainder.is_empty() {
            return Some(None);
        }
        remainder.strip_prefix('/').map(Some)
    }

    /// Builds the reply for a request; emits a redirect event for `/redirect/` requests
    fn handle(&self, path: &str, query: Option<&str>, client_ip: &str) -> Reply {
        match self.route(path) {
            Route::Health => Reply::text(200, Self::HEALTH_BODY),
            Route::Probe(token) => Reply::text(200, token),
            Route::NotFound => Reply::text(404, "Not Found"),
            Route::Malformed => {
                debug!("Malformed redirect path {path}");
                Reply::text(400, "Invalid URL format")
            }
            Route::Redirect { pool_id, path } => self.redirect(pool_id, path, query, client_ip),
        }
    }

    fn redirect(&self, pool_id: &str, path: &str, query: Option<&str>, client_ip: &str) -> Reply {
        let request_path = match query {
            Some(query) => format!("{path}?{query}"),
            None => path.to_string(),
        };

        match self.resolver.resolve(pool_id, &request_path) {
            Ok(result) => {
                debug!("Pool {pool_id} selected {}", result.domain);
                RedirectEvent::redirect(
                    pool_id,
                    path,
                    client_ip,
                    Utc::now(),
                    &result.url,
                    &result.headers,
                )
                .emit();
                Reply::found(result)
            }
            Err(err) => {
                let message = err.to_string();
                RedirectEvent::error(pool_id, path, client_ip, Utc::now(), message.as_str()).emit();
                Reply::text(err.status_code(), message)
            }
        }
    }

    /// Response header for a reply. Custom headers go in first so the
    /// headers the reply sets itself always win.
    fn response_header(reply: &Reply) -> Result<ResponseHeader> {
        let mut resp = ResponseHeader::build(reply.status, Some(4 + reply.headers.len()))?;

        for (name, value) in &reply.headers {
            resp.insert_header(name.clone(), value.as_str())?;
        }
        if let Some(location) = &reply.location {
            resp.insert_header(header::LOCATION, location.as_str())?;
        }

        if reply.body.is_empty() {
            resp.insert_header(header::CONTENT_LENGTH, 0)?;
        } else {
            resp.insert_header(header::CONTENT_TYPE, "text/plain; charset=utf-8")?;
            resp.insert_header(header::CONTENT_LENGTH, reply.body.len())?;
        }
        Ok(resp)
    }

    /// Writes the reply to the downstream session and ends the stream
    async fn write_reply(session: &mut Session, reply: Reply) -> Result<()> {
        let resp = Self::response_header(&reply)?;

        if reply.body.is_empty() {
            session.write_response_header(Box::new(resp), true).await?;
            return Ok(());
        }

        session.write_response_header(Box::new(resp), false).await?;
        session.write_response_body(Some(reply.body), true).await?;
        Ok(())
    }
}

/// Endpoint selected from the request path
#[derive(Debug, PartialEq, Eq)]
enum Route<'a> {
    Redirect { pool_id: &'a str, path: &'a str },
    Malformed,
    Health,
    Probe(&'a str),
    NotFound,
}

/// Response to send downstream
#[derive(Debug)]
struct Reply {
    status: u16,
    location: Option<String>,
    headers: BTreeMap<String, String>,
    body: Bytes,
}

impl Reply {
    fn text(status: u16, body: impl Into<String>) -> Self {
        Self {
            status,
            location: None,
            headers: BTreeMap::new(),
            body: Bytes::from(body.into()),
        }
    }

    fn found(result: RedirectResult) -> Self {
        Self {
            status: 302,
            location: Some(result.url),
            headers: result.headers,
            body: Bytes::new(),
        }
    }
}

#[async_trait]
impl ProxyHttp for RedirectService {
    type CTX = ();

    fn new_ctx(&self) -> Self::CTX {}

    /// Serves the request without contacting any upstream
    async fn request_filter(&self, session: &mut Session, _ctx: &mut Self::CTX) -> Result<bool> {
        let client_ip = session
            .client_addr()
            .map(|addr| addr.to_string())
            .unwrap_or_else(|| "-".to_string());

        let uri = &session.req_header().uri;
        let reply = self.handle(uri.path(), uri.query(), &client_ip);

        Self::write_reply(session, reply).await?;
        Ok(true)
    }

    async fn upstream_peer(
        &self,
        _session: &mut Session,
        _ctx: &mut Self::CTX,
    ) -> Result<Box<HttpPeer>> {
        Err(Error::explain(
            ErrorType::InternalError,
            "redirect service has no upstream",
        ))
    }
}
