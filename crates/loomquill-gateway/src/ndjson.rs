//! Renders a `Stream<Item = StreamEvent>` as an NDJSON HTTP response: one
//! `\n`-terminated JSON object per line (spec.md §6).

use axum::body::Body;
use axum::http::header;
use axum::response::{IntoResponse, Response};
use futures::{Stream, StreamExt};
use loomquill_core::types::StreamEvent;

pub fn ndjson_response(stream: impl Stream<Item = StreamEvent> + Send + 'static) -> Response {
    let body_stream = stream.map(|event| {
        let mut line = serde_json::to_vec(&event).unwrap_or_default();
        line.push(b'\n');
        Ok::<_, std::io::Error>(line)
    });
    let body = Body::from_stream(body_stream);
    Response::builder()
        .header(header::CONTENT_TYPE, "application/x-ndjson")
        .body(body)
        .unwrap_or_else(|_| Response::new(Body::empty()))
        .into_response()
}
