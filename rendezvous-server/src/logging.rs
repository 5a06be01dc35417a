//! Pluggable access-log decorator (component D).
//!
//! [`AccessLogLayer`] wraps the router and emits one [`LogRecord`] per
//! response to every configured [`LogSink`]. Two sinks are provided
//! in-tree (apache-style text, structured JSON); the New Relic shipper
//! named in the pairing protocol's external interfaces is modelled as
//! a third sink behind the same trait and left as a thin stub, per the
//! ACME/log-shipper carve-out.

use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};
use std::time::Instant;

use axum::extract::ConnectInfo;
use axum::http::{HeaderMap, Request, Response};
use chrono::Utc;
use http_body::Body as _;
use serde::Serialize;
use std::net::SocketAddr;
use std::sync::Arc;
use tower::{Layer, Service};

/// One logged request/response, independent of which sink renders it.
#[derive(Debug, Clone, Serialize)]
pub struct LogRecord {
    pub remote_addr: String,
    pub forwarded_for: Option<String>,
    pub method: String,
    pub uri: String,
    pub proto: String,
    pub status: u16,
    pub bytes: u64,
    pub elapsed_ms: u128,
}

pub trait LogSink: Send + Sync {
    fn record(&self, record: &LogRecord);
}

/// Plain apache-style combined-log-format line, written through
/// `tracing` so it composes with whatever subscriber the operator
/// configures.
pub struct ApacheSink;

impl LogSink for ApacheSink {
    fn record(&self, r: &LogRecord) {
        let who = r.forwarded_for.as_deref().unwrap_or(&r.remote_addr);
        tracing::info!(
            target: "access",
            "{who} - - [{}] \"{} {} {}\" {} {} {}ms",
            Utc::now().format("%d/%b/%Y:%H:%M:%S %z"),
            r.method,
            r.uri,
            r.proto,
            r.status,
            r.bytes,
            r.elapsed_ms,
        );
    }
}

/// Structured JSON, one object per line.
pub struct JsonSink;

impl LogSink for JsonSink {
    fn record(&self, r: &LogRecord) {
        match serde_json::to_string(r) {
            Ok(line) => tracing::info!(target: "access", "{line}"),
            Err(err) => tracing::warn!("failed to serialise access log record: {err}"),
        }
    }
}

/// Fan-out to an external log-shipping endpoint (e.g. New Relic Logs).
/// Shipping itself is out of scope for this crate; this sink only
/// fires when `NEW_RELIC_LICENSE_KEY` is set, and otherwise is a no-op,
/// matching the "consumed via thin interfaces" contract.
pub struct ShipperSink {
    enabled: bool,
}

impl ShipperSink {
    pub fn from_env() -> Self {
        Self {
            enabled: std::env::var("NEW_RELIC_LICENSE_KEY").is_ok(),
        }
    }
}

impl LogSink for ShipperSink {
    fn record(&self, r: &LogRecord) {
        if !self.enabled {
            return;
        }
        tracing::debug!(target: "access.shipper", status = r.status, uri = %r.uri, "would ship log record");
    }
}

#[derive(Clone)]
pub struct AccessLogLayer {
    sinks: Arc<Vec<Box<dyn LogSink>>>,
}

impl AccessLogLayer {
    pub fn new(sinks: Vec<Box<dyn LogSink>>) -> Self {
        Self {
            sinks: Arc::new(sinks),
        }
    }
}

impl<S> Layer<S> for AccessLogLayer {
    type Service = AccessLogService<S>;

    fn layer(&self, inner: S) -> Self::Service {
        AccessLogService {
            inner,
            sinks: self.sinks.clone(),
        }
    }
}

#[derive(Clone)]
pub struct AccessLogService<S> {
    inner: S,
    sinks: Arc<Vec<Box<dyn LogSink>>>,
}

impl<S, ReqBody> Service<Request<ReqBody>> for AccessLogService<S>
where
    S: Service<Request<ReqBody>, Response = Response<axum::body::Body>> + Clone + Send + 'static,
    S::Future: Send + 'static,
    ReqBody: Send + 'static,
{
    type Response = S::Response;
    type Error = S::Error;
    type Future = Pin<Box<dyn Future<Output = Result<Self::Response, Self::Error>> + Send>>;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx)
    }

    fn call(&mut self, req: Request<ReqBody>) -> Self::Future {
        let start = Instant::now();
        let method = req.method().to_string();
        let uri = req.uri().to_string();
        let proto = format!("{:?}", req.version());
        let remote_addr = req
            .extensions()
            .get::<ConnectInfo<SocketAddr>>()
            .map(|ConnectInfo(addr)| addr.ip().to_string())
            .unwrap_or_else(|| "-".to_string());
        let forwarded_for = forwarded_for(req.headers());

        let sinks = self.sinks.clone();
        let clone = self.inner.clone();
        let mut inner = std::mem::replace(&mut self.inner, clone);

        Box::pin(async move {
            let response = inner.call(req).await?;
            let status = response.status().as_u16();
            let bytes = response.body().size_hint().lower();
            let record = LogRecord {
                remote_addr,
                forwarded_for,
                method,
                uri,
                proto,
                status,
                bytes,
                elapsed_ms: start.elapsed().as_millis(),
            };
            for sink in sinks.iter() {
                sink.record(&record);
            }
            Ok(response)
        })
    }
}

fn forwarded_for(headers: &HeaderMap) -> Option<String> {
    headers
        .get("x-forwarded-for")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.split(',').next())
        .map(|v| v.trim().to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    struct CollectingSink(Mutex<Vec<LogRecord>>);

    impl LogSink for CollectingSink {
        fn record(&self, record: &LogRecord) {
            self.0.lock().unwrap().push(record.clone());
        }
    }

    #[test]
    fn forwarded_for_takes_first_hop() {
        let mut headers = HeaderMap::new();
        headers.insert("x-forwarded-for", "1.2.3.4, 5.6.7.8".parse().unwrap());
        assert_eq!(forwarded_for(&headers).as_deref(), Some("1.2.3.4"));
    }

    #[test]
    fn forwarded_for_absent_is_none() {
        let headers = HeaderMap::new();
        assert_eq!(forwarded_for(&headers), None);
    }

    #[test]
    fn json_sink_does_not_panic_on_serialisable_record() {
        let record = LogRecord {
            remote_addr: "127.0.0.1".into(),
            forwarded_for: None,
            method: "GET".into(),
            uri: "/".into(),
            proto: "HTTP/1.1".into(),
            status: 200,
            bytes: 0,
            elapsed_ms: 1,
        };
        JsonSink.record(&record);
        ApacheSink.record(&record);
    }
}
