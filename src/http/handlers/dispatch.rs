//! The per-endpoint request pipeline.
//!
//! Each compiled endpoint gets one [`DispatchHandler`], shared by all of its
//! methods. A request runs through, in order: the configured delay, failure
//! injection, proxying, the replayed JSON file, the inline JSON payload and
//! finally the dynamic fixture read or write. The first step that produces a
//! response ends the pipeline.

use std::collections::HashMap;
use std::fs;
use std::sync::Arc;
use std::time::Duration;

use axum::{
    extract::{FromRequestParts, Path, Request},
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use bytes::Bytes;
use serde_json::Value;
use tokio::time::sleep;
use tracing::{debug, Instrument, Span};

use crate::config::{DynamicSpec, Endpoint, ReadSpec, WriteSpec};
use crate::failure::FailureInjector;
use crate::http::compiler::EndpointError;
use crate::http::state::AppState;
use crate::http::types::DispatchError;
use crate::jsonpath::{resolve_key, resolve_value};
use crate::proxy::ReverseProxy;
use crate::store::FixtureStore;

/// Largest request body accepted by a dynamic write.
const MAX_BODY_BYTES: usize = 2 * 1024 * 1024;

/// Compiled behaviour of one endpoint.
pub struct DispatchHandler {
    status: StatusCode,
    delay: Duration,
    failures: Option<FailureInjector>,
    proxy: Option<ReverseProxy>,
    file: Option<Bytes>,
    json: Option<Bytes>,
    dynamic: Option<DynamicSpec>,
    store: Arc<dyn FixtureStore>,
    span: Span,
}

impl DispatchHandler {
    /// Compile an endpoint definition into a handler.
    ///
    /// The JSON file is read and the inline payload serialized once, here.
    ///
    /// # Parameters
    ///
    /// - `endpoint` - Endpoint definition
    /// - `state` - Compile context
    /// - `span` - Logging span of the endpoint; its `status` field is recorded here
    ///
    /// # Returns
    ///
    /// Returns the handler, or `EndpointError` when the endpoint cannot be served.
    pub fn compile(endpoint: &Endpoint, state: &AppState, span: Span) -> Result<Self, EndpointError> {
        let status = resolve_status(endpoint.status)?;
        span.record("status", status.as_u16());

        let failures = endpoint.errors.as_ref().map(FailureInjector::from_config).transpose()?;

        let proxy = endpoint
            .proxy
            .as_deref()
            .filter(|target| !target.is_empty())
            .map(|target| ReverseProxy::new(&state.listen_addr, target, state.client.clone()))
            .transpose()?;

        let file = endpoint
            .json_path
            .as_deref()
            .filter(|path| !path.is_empty())
            .map(|path| {
                let path = state.resolve_path(path);
                fs::read(&path)
                    .map(Bytes::from)
                    .map_err(|source| EndpointError::JsonFile { path, source })
            })
            .transpose()?;

        let json = endpoint
            .json
            .as_ref()
            .map(|payload| serde_json::to_vec(payload).map(Bytes::from))
            .transpose()?;

        let dynamic = match &endpoint.dynamic {
            Some(dynamic) => Some(dynamic.spec().ok_or(EndpointError::AmbiguousDynamic)?),
            None => None,
        };

        Ok(Self {
            status,
            delay: Duration::from_millis(u64::try_from(endpoint.delay).unwrap_or(0)),
            failures,
            proxy,
            file,
            json,
            dynamic,
            store: state.store.clone(),
            span,
        })
    }

    /// The status written when no other step decides it.
    pub fn status(&self) -> StatusCode {
        self.status
    }

    /// Run the pipeline for one request.
    pub async fn dispatch(self: Arc<Self>, request: Request) -> Response {
        let span = self.span.clone();
        self.handle(request).instrument(span).await.unwrap_or_else(IntoResponse::into_response)
    }

    async fn handle(&self, request: Request) -> Result<Response, DispatchError> {
        if !self.delay.is_zero() {
            sleep(self.delay).await;
        }

        if let Some(forced) = self.failures.as_ref().and_then(FailureInjector::sample) {
            debug!(status = forced.as_u16(), "failed with predefined error");
            return Ok(forced.into_response());
        }

        if let Some(proxy) = &self.proxy {
            debug!(proxy_to = proxy.upstream_addr(), "proxying call");
            return Ok(proxy.forward(request).await?);
        }

        if let Some(file) = &self.file {
            return Ok(self.json_response(file.clone()));
        }

        if let Some(json) = &self.json {
            debug!("returning JSON object");
            return Ok(self.json_response(json.clone()));
        }

        match &self.dynamic {
            Some(DynamicSpec::Write(spec)) => self.write_fixture(spec, request).await,
            Some(DynamicSpec::Read(spec)) => self.read_fixture(spec, request).await,
            None => Ok(self.status.into_response()),
        }
    }

    async fn write_fixture(&self, spec: &WriteSpec, request: Request) -> Result<Response, DispatchError> {
        let body = axum::body::to_bytes(request.into_body(), MAX_BODY_BYTES)
            .await
            .map_err(|e| DispatchError::MalformedBody(e.to_string()))?;
        let input: Value =
            serde_json::from_slice(&body).map_err(|e| DispatchError::MalformedBody(e.to_string()))?;

        let key = resolve_key(&spec.key, &input).map_err(DispatchError::KeyPath)?;
        let value = resolve_value(&spec.value, &input).map_err(DispatchError::ValuePath)?;

        debug!(entity = %spec.name, key, "writing fixture");
        self.store.write(&spec.name, key, value.clone());
        Ok(self.status.into_response())
    }

    async fn read_fixture(&self, spec: &ReadSpec, request: Request) -> Result<Response, DispatchError> {
        let Some(param) = &spec.key_param else {
            debug!(entity = %spec.name, "reading all fixtures");
            let table = self
                .store
                .read_all(&spec.name)
                .ok_or_else(|| DispatchError::NotFound { key: String::new() })?;
            return Ok((self.status, Json(table)).into_response());
        };

        let (mut parts, _body) = request.into_parts();
        let key = Path::<HashMap<String, String>>::from_request_parts(&mut parts, &())
            .await
            .ok()
            .and_then(|Path(mut params)| params.remove(param))
            .unwrap_or_default();

        debug!(entity = %spec.name, key = %key, "reading fixture");
        let value = self
            .store
            .read(&spec.name, &key)
            .ok_or(DispatchError::NotFound { key })?;
        Ok((self.status, Json(value)).into_response())
    }

    fn json_response(&self, body: Bytes) -> Response {
        (self.status, [(header::CONTENT_TYPE, "application/json")], body).into_response()
    }
}

/// Resolve the configured status, `<= 0` meaning 200.
fn resolve_status(status: i64) -> Result<StatusCode, EndpointError> {
    if status <= 0 {
        return Ok(StatusCode::OK);
    }
    u16::try_from(status)
        .ok()
        .and_then(|code| StatusCode::from_u16(code).ok())
        .ok_or(EndpointError::InvalidStatus(status))
}
