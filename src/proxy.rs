//! Single-upstream reverse proxy with address rewriting.
//!
//! Requests are forwarded to one upstream. Every literal occurrence of the
//! upstream's address in the request query is replaced by the mock server's
//! own address before forwarding, and redirect `Location` headers coming
//! back are rewritten the same way, so a redirect chain keeps pointing at
//! the mock server instead of leaking the upstream.

use std::borrow::Cow;
use std::io;
use std::sync::Arc;

use axum::{
    body::Body,
    extract::Request,
    http::{
        header::{self, HeaderMap, HeaderName, HeaderValue},
        uri::InvalidUri,
        Uri, Version,
    },
    response::Response,
};
use hyper_rustls::{HttpsConnector, HttpsConnectorBuilder};
use hyper_util::{
    client::legacy::{connect::HttpConnector, Client},
    rt::TokioExecutor,
};
use thiserror::Error;
use tracing::{debug, warn};
use url::{Position, Url};

/// HTTP client shared by every proxy of one compiled router.
///
/// Speaks both `http` and `https`.
pub type UpstreamClient = Client<HttpsConnector<HttpConnector>, Body>;

/// Headers that only make sense for a single connection.
const HOP_BY_HOP: [&str; 8] = [
    "connection",
    "keep-alive",
    "proxy-authenticate",
    "proxy-authorization",
    "te",
    "trailer",
    "transfer-encoding",
    "upgrade",
];

const X_FORWARDED_HOST: HeaderName = HeaderName::from_static("x-forwarded-host");

/// Errors that prevent a proxy from being built.
#[derive(Debug, Error)]
pub enum ProxyError {
    /// The mock server's own address is not usable as a URL.
    #[error("error in parsing host URL [{addr}]: {source}")]
    HostUrl {
        addr: String,
        #[source]
        source: url::ParseError,
    },
    /// The upstream address cannot be parsed.
    #[error("error in parsing proxy URL [{target}]: {source}")]
    TargetUrl {
        target: String,
        #[source]
        source: url::ParseError,
    },
    /// The upstream address parses but cannot be proxied to.
    #[error("unsupported proxy URL [{0}], expected an http(s) URL with a host")]
    UnsupportedTarget(String),
}

/// Errors raised while forwarding one request.
#[derive(Debug, Error)]
pub enum UpstreamError {
    /// The upstream request URI could not be assembled.
    #[error("invalid upstream URI: {0}")]
    Uri(#[from] InvalidUri),
    /// The upstream call failed.
    #[error("upstream call failed: {0}")]
    Call(#[from] hyper_util::client::legacy::Error),
}

/// Create the client used for upstream calls.
///
/// TLS upstreams are verified against the platform's root certificates,
/// or against the bundled Mozilla roots when the platform has none.
///
/// # Errors
///
/// Returns `io::Error` if no TLS configuration can be built.
pub fn upstream_client() -> io::Result<UpstreamClient> {
    let provider = Arc::new(rustls::crypto::ring::default_provider());
    let builder = match HttpsConnectorBuilder::new().with_provider_and_native_roots(provider.clone()) {
        Ok(builder) => builder,
        Err(e) => {
            warn!(error = %e, "cannot load native root certificates, using bundled roots");
            HttpsConnectorBuilder::new()
                .with_provider_and_webpki_roots(provider)
                .map_err(io::Error::other)?
        }
    };

    let connector = builder.https_or_http().enable_http1().build();
    Ok(Client::builder(TokioExecutor::new()).build(connector))
}

/// Build the mock server's own base URL from its listen address.
///
/// Addresses without a host or with an unspecified host (`:8080`,
/// `0.0.0.0:8080`, `[::]:8080`) are reached through `localhost`.
///
/// # Parameters
///
/// - `addr` - Listen address
///
/// # Returns
///
/// Returns the base URL, or `url::ParseError` if the address is not usable.
pub fn local_base_url(addr: &str) -> Result<Url, url::ParseError> {
    let authority = match addr.rsplit_once(':') {
        Some((host, port)) if host.is_empty() || host == "0.0.0.0" || host == "[::]" => {
            format!("localhost:{port}")
        }
        _ => addr.to_string(),
    };
    Url::parse(&format!("http://{authority}"))
}

/// Reverse proxy bound to a single upstream.
#[derive(Debug, Clone)]
pub struct ReverseProxy {
    target: Url,
    /// Local base URL without trailing slash.
    host_addr: String,
    /// Upstream URL without trailing slash.
    target_addr: String,
    client: UpstreamClient,
}

impl ReverseProxy {
    /// Create a new proxy.
    ///
    /// # Parameters
    ///
    /// - `server_addr` - The mock server's own listen address
    /// - `target` - Upstream URL
    /// - `client` - HTTP client used for upstream calls
    ///
    /// # Returns
    ///
    /// Returns the proxy, or `ProxyError` if either address does not parse.
    pub fn new(server_addr: &str, target: &str, client: UpstreamClient) -> Result<Self, ProxyError> {
        let host = local_base_url(server_addr)
            .map_err(|source| ProxyError::HostUrl { addr: server_addr.to_string(), source })?;
        let target_url = Url::parse(target)
            .map_err(|source| ProxyError::TargetUrl { target: target.to_string(), source })?;
        if !matches!(target_url.scheme(), "http" | "https") || !target_url.has_host() {
            return Err(ProxyError::UnsupportedTarget(target.to_string()));
        }

        Ok(Self {
            host_addr: string_form(&host),
            target_addr: string_form(&target_url),
            target: target_url,
            client,
        })
    }

    /// The mock server's own address, as substituted into rewritten URLs.
    pub fn local_addr(&self) -> &str {
        &self.host_addr
    }

    /// The upstream's address, as searched for in rewritten URLs.
    pub fn upstream_addr(&self) -> &str {
        &self.target_addr
    }

    /// Forward a request to the upstream and relay its response.
    ///
    /// A redirect response (3xx) gets its `Location` header rewritten to point
    /// at the mock server; everything else is streamed back unchanged apart
    /// from hop-by-hop headers.
    ///
    /// # Parameters
    ///
    /// - `request` - Incoming request
    ///
    /// # Returns
    ///
    /// Returns the upstream response, or `UpstreamError` if the call fails.
    pub async fn forward(&self, request: Request) -> Result<Response, UpstreamError> {
        let (mut parts, body) = request.into_parts();

        let original_query = parts.uri.query();
        let adjusted_query = original_query.map(|query| self.adjust_query(query));
        let uri = match self.upstream_uri(parts.uri.path(), adjusted_query.as_deref()) {
            Ok(uri) => uri,
            Err(err) => {
                warn!(error = %err, "error in adjusting request query, forwarding it unchanged");
                self.upstream_uri(parts.uri.path(), original_query)?
            }
        };

        let original_host = parts.headers.remove(header::HOST);
        strip_hop_by_hop(&mut parts.headers);
        if let Ok(host) = HeaderValue::from_str(&self.target[Position::BeforeHost..Position::AfterPort]) {
            parts.headers.insert(header::HOST, host);
        }
        if let Some(original_host) = original_host {
            parts.headers.insert(X_FORWARDED_HOST, original_host);
        }

        debug!(uri = %uri, "proxying call");
        parts.uri = uri;
        parts.version = Version::HTTP_11;

        let response = self.client.request(Request::from_parts(parts, body)).await?;
        let (mut parts, body) = response.into_parts();
        strip_hop_by_hop(&mut parts.headers);

        if parts.status.is_redirection() {
            let location = parts.headers.get(header::LOCATION).and_then(|v| v.to_str().ok());
            if let Some(location) = location {
                let redirect = self.adjust_redirect_url(location);
                debug!(status = %parts.status, location = %redirect, "redirect location");
                match HeaderValue::from_str(&redirect) {
                    Ok(value) => {
                        parts.headers.insert(header::LOCATION, value);
                    }
                    Err(err) => warn!(error = %err, "rewritten redirect location is not a valid header"),
                }
            }
        }

        Ok(Response::from_parts(parts, Body::new(body)))
    }

    /// Rewrite a redirect location to point at the mock server.
    ///
    /// The upstream address is replaced literally throughout, and again inside
    /// the decoded query component so that URL-encoded addresses are caught.
    ///
    /// # Parameters
    ///
    /// - `location` - Value of an upstream `Location` header
    ///
    /// # Returns
    ///
    /// Returns the rewritten location.
    pub fn adjust_redirect_url(&self, location: &str) -> String {
        let location = location.replace(&self.target_addr, &self.host_addr);

        let (without_fragment, fragment) = match location.split_once('#') {
            Some((head, fragment)) => (head, Some(fragment)),
            None => (location.as_str(), None),
        };
        let Some((base, query)) = without_fragment.split_once('?') else {
            return location.clone();
        };

        let mut redirect = format!("{base}?{}", self.adjust_query(query));
        if let Some(fragment) = fragment {
            redirect.push('#');
            redirect.push_str(fragment);
        }
        redirect
    }

    /// Replace the upstream address inside decoded query pairs.
    ///
    /// The query is re-encoded only when a replacement happened.
    fn adjust_query<'q>(&self, query: &'q str) -> Cow<'q, str> {
        let pairs: Vec<(String, String)> = form_urlencoded::parse(query.as_bytes())
            .map(|(key, value)| (key.into_owned(), value.into_owned()))
            .collect();

        let target = self.target_addr.as_str();
        if !pairs.iter().any(|(key, value)| key.contains(target) || value.contains(target)) {
            return Cow::Borrowed(query);
        }

        let mut serializer = form_urlencoded::Serializer::new(String::new());
        for (key, value) in &pairs {
            serializer.append_pair(
                &key.replace(target, &self.host_addr),
                &value.replace(target, &self.host_addr),
            );
        }
        Cow::Owned(serializer.finish())
    }

    /// Assemble the upstream URI for a request path and query.
    fn upstream_uri(&self, path: &str, query: Option<&str>) -> Result<Uri, InvalidUri> {
        let mut uri = format!(
            "{}://{}{}",
            self.target.scheme(),
            &self.target[Position::BeforeHost..Position::AfterPort],
            join_paths(self.target.path(), path)
        );

        let query = [self.target.query(), query]
            .into_iter()
            .flatten()
            .filter(|q| !q.is_empty())
            .collect::<Vec<_>>()
            .join("&");
        if !query.is_empty() {
            uri.push('?');
            uri.push_str(&query);
        }

        uri.parse()
    }
}

/// Serialize a URL without its trailing slash.
fn string_form(url: &Url) -> String {
    url.as_str().trim_end_matches('/').to_string()
}

/// Join two paths with exactly one slash between them.
fn join_paths(base: &str, path: &str) -> String {
    match (base.ends_with('/'), path.starts_with('/')) {
        (true, true) => format!("{base}{}", &path[1..]),
        (false, false) => format!("{base}/{path}"),
        _ => format!("{base}{path}"),
    }
}

/// Drop connection-scoped headers, including those listed in `Connection`.
fn strip_hop_by_hop(headers: &mut HeaderMap) {
    let listed: Vec<HeaderName> = headers
        .get_all(header::CONNECTION)
        .iter()
        .filter_map(|value| value.to_str().ok())
        .flat_map(|value| value.split(','))
        .filter_map(|name| HeaderName::from_bytes(name.trim().as_bytes()).ok())
        .collect();
    for name in listed {
        headers.remove(name);
    }

    for name in HOP_BY_HOP {
        headers.remove(name);
    }
    headers.remove("proxy-connection");
}
