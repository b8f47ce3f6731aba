use axum::{extract::Request, http::HeaderMap, middleware::Next, response::Response};
use opentelemetry::global;
use opentelemetry::propagation::{Extractor, Injector};
use reqwest::header::{HeaderName, HeaderValue};
use tracing::Span;
use tracing_opentelemetry::OpenTelemetrySpanExt;

/// Axum middleware: parents the request span on the W3C trace context carried
/// by the caller, so coordinator and node spans join one trace.
pub async fn trace_context_middleware(
    headers: HeaderMap,
    request: Request,
    next: Next,
) -> Response {
    let parent_context = global::get_text_map_propagator(|propagator| {
        propagator.extract(&HeaderExtractor::new(&headers))
    });
    Span::current().set_parent(parent_context);

    next.run(request).await
}

pub struct HeaderExtractor<'a> {
    headers: &'a HeaderMap,
}

impl<'a> HeaderExtractor<'a> {
    pub fn new(headers: &'a HeaderMap) -> Self {
        Self { headers }
    }
}

impl Extractor for HeaderExtractor<'_> {
    fn get(&self, key: &str) -> Option<&str> {
        self.headers.get(key)?.to_str().ok()
    }

    fn keys(&self) -> Vec<&str> {
        self.headers.keys().map(|k| k.as_str()).collect()
    }
}

pub struct HeaderInjector<'a> {
    headers: &'a mut HeaderMap,
}

impl<'a> HeaderInjector<'a> {
    pub fn new(headers: &'a mut HeaderMap) -> Self {
        Self { headers }
    }
}

impl Injector for HeaderInjector<'_> {
    fn set(&mut self, key: &str, value: String) {
        if let (Ok(name), Ok(value)) = (
            HeaderName::from_bytes(key.as_bytes()),
            HeaderValue::from_str(&value),
        ) {
            self.headers.insert(name, value);
        }
    }
}

/// Trace-context headers for the current span.
pub fn current_trace_headers() -> HeaderMap {
    let mut headers = HeaderMap::new();
    global::get_text_map_propagator(|propagator| {
        propagator.inject_context(&Span::current().context(), &mut HeaderInjector::new(&mut headers))
    });
    headers
}

/// Attaches the current trace context to an outgoing request.
pub fn traced(builder: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
    builder.headers(current_trace_headers())
}
