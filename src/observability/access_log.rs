//! HTTP access log.
//!
//! # Responsibilities
//! - Produce exactly one line per request/response
//! - Colorize the status code by range
//! - Measure time to response head and time to end of body
//! - Write through an injectable sink
//!
//! # Line format
//! ```text
//! [<iso date>] <remote addr> HTTP/<version> <method> <url> <status> <length> bytes <total>ms <response>ms
//! ```

use axum::{
    body::Body,
    extract::{ConnectInfo, Request, State},
    http::{header, Method, StatusCode, Version},
    middleware::Next,
    response::Response,
};
use chrono::{DateTime, SecondsFormat, Utc};
use http_body::{Frame, SizeHint};
use pin_project_lite::pin_project;
use std::net::SocketAddr;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{ready, Context, Poll};
use std::time::{Duration, Instant};

use crate::config::SinkKind;
use crate::security::client::ClientInfo;
use crate::terminal::{Style, Terminal};

/// Destination for access log lines.
pub trait LogSink: Send + Sync + 'static {
    fn write(&self, line: &str);
}

/// Shared handle to a sink.
pub type SharedSink = Arc<dyn LogSink>;

/// Writes to standard output.
#[derive(Debug, Clone, Copy, Default)]
pub struct StdoutSink;

impl LogSink for StdoutSink {
    fn write(&self, line: &str) {
        println!("{}", line.trim());
    }
}

/// Writes to standard error.
#[derive(Debug, Clone, Copy, Default)]
pub struct StderrSink;

impl LogSink for StderrSink {
    fn write(&self, line: &str) {
        eprintln!("{}", line.trim());
    }
}

/// Emits each line as an `info` event on the `serverkit::access` target.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingSink;

impl LogSink for TracingSink {
    fn write(&self, line: &str) {
        tracing::info!(target: "serverkit::access", "{}", line.trim());
    }
}

impl<F> LogSink for F
where
    F: Fn(&str) + Send + Sync + 'static,
{
    fn write(&self, line: &str) {
        self(line)
    }
}

/// Build one of the built-in sinks.
pub fn sink_for(kind: SinkKind) -> SharedSink {
    match kind {
        SinkKind::Stdout => Arc::new(StdoutSink),
        SinkKind::Stderr => Arc::new(StderrSink),
        SinkKind::Tracing => Arc::new(TracingSink),
    }
}

/// Everything that goes into one access log line.
#[derive(Debug, Clone)]
pub struct AccessRecord {
    pub date: DateTime<Utc>,
    pub remote_addr: Option<String>,
    pub version: Version,
    pub method: Method,
    pub url: String,
    pub status: Option<StatusCode>,
    pub content_length: Option<u64>,
    pub total_time: Duration,
    pub response_time: Duration,
}

fn version_str(version: Version) -> &'static str {
    match version {
        Version::HTTP_09 => "0.9",
        Version::HTTP_10 => "1.0",
        Version::HTTP_11 => "1.1",
        Version::HTTP_2 => "2.0",
        Version::HTTP_3 => "3.0",
        _ => "-",
    }
}

fn status_style(status: u16) -> Option<Style> {
    match status {
        s if s >= 500 => Some(Style::foreground(31)),
        s if s >= 400 => Some(Style::foreground(33)),
        s if s >= 300 => Some(Style::foreground(36)),
        s if s >= 200 => Some(Style::foreground(32)),
        _ => None,
    }
}

fn millis(duration: Duration) -> String {
    format!("{:.3}ms", duration.as_secs_f64() * 1000.0)
}

/// Render a record as a single line.
pub fn format_line(record: &AccessRecord, term: &Terminal) -> String {
    let status = match record.status {
        Some(code) => {
            let text = code.as_u16().to_string();
            match status_style(code.as_u16()) {
                Some(style) => term.apply(style, &text),
                None => text,
            }
        }
        None => "-".to_string(),
    };
    let length = record
        .content_length
        .map(|n| n.to_string())
        .unwrap_or_else(|| "-".to_string());

    [
        term.magenta(&format!(
            "[{}]",
            record.date.to_rfc3339_opts(SecondsFormat::Millis, true)
        )),
        record.remote_addr.clone().unwrap_or_else(|| "-".to_string()),
        format!("HTTP/{}", version_str(record.version)),
        record.method.to_string(),
        record.url.clone(),
        status,
        format!("{} bytes", length),
        term.bold(&millis(record.total_time)),
        millis(record.response_time),
    ]
    .join(" ")
}

/// Middleware state: where lines go and how they are styled.
#[derive(Clone)]
pub struct AccessLog {
    sink: SharedSink,
    terminal: Terminal,
}

impl AccessLog {
    pub fn new(sink: SharedSink, terminal: Terminal) -> Self {
        Self { sink, terminal }
    }

    fn emit(&self, record: &AccessRecord) {
        self.sink.write(&format_line(record, &self.terminal));
    }
}

/// Writes the line when dropped, i.e. once the body is finished or abandoned.
struct PendingLine {
    log: AccessLog,
    record: AccessRecord,
    started: Instant,
}

impl Drop for PendingLine {
    fn drop(&mut self) {
        self.record.total_time = self.started.elapsed();
        self.record.date = Utc::now();
        self.log.emit(&self.record);
    }
}

pin_project! {
    /// Response body that finalizes the access log line at end of stream.
    struct LoggedBody<B> {
        #[pin]
        inner: B,
        pending: Option<PendingLine>,
    }
}

impl<B> http_body::Body for LoggedBody<B>
where
    B: http_body::Body,
{
    type Data = B::Data;
    type Error = B::Error;

    fn poll_frame(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
    ) -> Poll<Option<Result<Frame<Self::Data>, Self::Error>>> {
        let this = self.project();
        let frame = ready!(this.inner.poll_frame(cx));
        if matches!(frame, None | Some(Err(_))) {
            this.pending.take();
        }
        Poll::Ready(frame)
    }

    fn is_end_stream(&self) -> bool {
        self.inner.is_end_stream()
    }

    fn size_hint(&self) -> SizeHint {
        self.inner.size_hint()
    }
}

fn remote_addr(request: &Request) -> Option<String> {
    if let Some(client) = request.extensions().get::<ClientInfo>() {
        return client.ip.map(|ip| ip.to_string());
    }
    request
        .extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ConnectInfo(addr)| addr.ip().to_string())
}

/// Middleware function for the access log.
pub async fn access_log_middleware(
    State(log): State<AccessLog>,
    request: Request,
    next: Next,
) -> Response {
    let started = Instant::now();
    let remote_addr = remote_addr(&request);
    let version = request.version();
    let method = request.method().clone();
    let url = request
        .uri()
        .path_and_query()
        .map(|pq| pq.as_str().to_string())
        .unwrap_or_else(|| request.uri().path().to_string());

    let response = next.run(request).await;
    let response_time = started.elapsed();

    let content_length = response
        .headers()
        .get(header::CONTENT_LENGTH)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.parse::<u64>().ok())
        .or_else(|| http_body::Body::size_hint(response.body()).exact());

    let pending = PendingLine {
        log,
        record: AccessRecord {
            date: Utc::now(),
            remote_addr,
            version,
            method,
            url,
            status: Some(response.status()),
            content_length,
            total_time: Duration::ZERO,
            response_time,
        },
        started,
    };

    response.map(|body| {
        Body::new(LoggedBody {
            inner: body,
            pending: Some(pending),
        })
    })
}
