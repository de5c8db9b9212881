use std::time::Duration;

use axum::{body::Body, http::Request};
use tower_http::classify::{ServerErrorsAsFailures, ServerErrorsFailureClass, SharedClassifier};
use tower_http::trace::{
    DefaultOnBodyChunk, DefaultOnEos, DefaultOnResponse, MakeSpan, TraceLayer,
};
use tracing::{Level, Span, error, info};

use crate::middleware::request_context::RequestContext;

type TraceLayerType = TraceLayer<
    SharedClassifier<ServerErrorsAsFailures>,
    HttpMakeSpan,
    fn(&Request<Body>, &Span),
    DefaultOnResponse,
    DefaultOnBodyChunk,
    DefaultOnEos,
    fn(ServerErrorsFailureClass, Duration, &Span),
>;

/// Opens one span per request, tagged with the id minted by
/// `assign_request_id`.
///
/// Only the path is recorded. The WebSocket endpoint accepts `?token=`, so
/// query strings never reach the logs.
#[derive(Clone, Debug, Default)]
pub(crate) struct HttpMakeSpan;

impl<B> MakeSpan<B> for HttpMakeSpan {
    fn make_span(&mut self, request: &Request<B>) -> Span {
        let request_id = request
            .extensions()
            .get::<RequestContext>()
            .map_or_else(|| "n/a".to_string(), |ctx| ctx.request_id.clone());

        tracing::info_span!(
            "http_request",
            method = %request.method(),
            path = %request.uri().path(),
            request_id = %request_id,
            upgrade = is_upgrade(request),
        )
    }
}

fn is_upgrade<B>(request: &Request<B>) -> bool {
    request
        .headers()
        .get(axum::http::header::UPGRADE)
        .and_then(|value| value.to_str().ok())
        .is_some_and(|value| value.eq_ignore_ascii_case("websocket"))
}

pub(crate) fn on_request_handler(req: &Request<Body>, span: &Span) {
    span.in_scope(|| {
        info!(version = ?req.version(), "started processing request");
    });
}

pub(crate) fn on_failure_handler(error: ServerErrorsFailureClass, latency: Duration, span: &Span) {
    span.in_scope(|| {
        error!(error = %error, latency = ?latency, "error processing request");
    });
}

pub fn create_trace_layer() -> TraceLayerType {
    TraceLayer::new_for_http()
        .make_span_with(HttpMakeSpan)
        .on_request(on_request_handler as fn(&Request<Body>, &Span))
        .on_response(DefaultOnResponse::new().level(Level::INFO))
        .on_failure(on_failure_handler as fn(ServerErrorsFailureClass, Duration, &Span))
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::{Method, StatusCode, header};
    use std::sync::{Arc, Mutex};
    use tracing_subscriber::{fmt::MakeWriter, util::SubscriberInitExt};

    #[derive(Clone, Default)]
    struct Captured(Arc<Mutex<Vec<u8>>>);

    impl std::io::Write for Captured {
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            self.0.lock().unwrap().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    impl<'a> MakeWriter<'a> for Captured {
        type Writer = Captured;

        fn make_writer(&'a self) -> Self::Writer {
            self.clone()
        }
    }

    impl Captured {
        fn text(&self) -> String {
            String::from_utf8(self.0.lock().unwrap().clone()).unwrap()
        }
    }

    fn request(uri: &str) -> Request<Body> {
        let mut request = Request::builder()
            .method(Method::GET)
            .uri(uri)
            .body(Body::empty())
            .unwrap();
        request.extensions_mut().insert(RequestContext {
            request_id: "req-42".to_string(),
            user: None,
        });
        request
    }

    #[test]
    fn span_carries_request_id_and_hides_query() {
        let captured = Captured::default();
        let _guard = tracing_subscriber::fmt()
            .with_writer(captured.clone())
            .with_ansi(false)
            .with_max_level(Level::INFO)
            .set_default();

        let req = request("/api/ws?token=secret-token");
        let span = HttpMakeSpan.make_span(&req);
        on_request_handler(&req, &span);

        let output = captured.text();
        assert!(output.contains("req-42"), "{output}");
        assert!(output.contains("/api/ws"), "{output}");
        assert!(!output.contains("secret-token"), "{output}");
    }

    #[test]
    fn span_falls_back_without_context() {
        let captured = Captured::default();
        let _guard = tracing_subscriber::fmt()
            .with_writer(captured.clone())
            .with_ansi(false)
            .set_default();

        let req = Request::builder().uri("/healthz").body(Body::empty()).unwrap();
        let span = HttpMakeSpan.make_span(&req);
        on_request_handler(&req, &span);

        assert!(captured.text().contains("request_id=n/a"));
    }

    #[test]
    fn detects_websocket_upgrades() {
        let mut req = request("/api/ws");
        assert!(!is_upgrade(&req));
        req.headers_mut()
            .insert(header::UPGRADE, "WebSocket".parse().unwrap());
        assert!(is_upgrade(&req));
    }

    #[test]
    fn failures_are_logged_at_error() {
        let captured = Captured::default();
        let _guard = tracing_subscriber::fmt()
            .with_writer(captured.clone())
            .with_ansi(false)
            .set_default();

        let span = tracing::info_span!("http_request");
        on_failure_handler(
            ServerErrorsFailureClass::StatusCode(StatusCode::INTERNAL_SERVER_ERROR),
            Duration::from_millis(12),
            &span,
        );

        let output = captured.text();
        assert!(output.contains("ERROR"));
        assert!(output.contains("500"));
    }
}
