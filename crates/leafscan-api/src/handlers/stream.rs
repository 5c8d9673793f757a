//! MJPEG live stream.

use std::convert::Infallible;
use std::sync::Arc;

use axum::body::Body;
use axum::extract::State;
use axum::http::header;
use axum::response::{IntoResponse, Response};
use bytes::{Bytes, BytesMut};
use futures_util::stream;

use crate::metrics;
use crate::state::AppState;

/// Content type of the live stream.
pub const MJPEG_CONTENT_TYPE: &str = "multipart/x-mixed-replace; boundary=frame";

const PART_HEADER: &[u8] = b"--frame\r\nContent-Type: image/jpeg\r\n\r\n";

/// Wrap one JPEG as a multipart part. An empty frame yields an empty part.
pub fn multipart_part(jpeg: &[u8]) -> Bytes {
    let mut part = BytesMut::with_capacity(PART_HEADER.len() + jpeg.len() + 2);
    part.extend_from_slice(PART_HEADER);
    part.extend_from_slice(jpeg);
    part.extend_from_slice(b"\r\n");
    part.freeze()
}

/// Keeps the viewer gauge accurate for the lifetime of a stream.
struct ViewerGuard;

impl ViewerGuard {
    fn new() -> Self {
        metrics::stream_viewer_connected();
        Self
    }
}

impl Drop for ViewerGuard {
    fn drop(&mut self) {
        metrics::stream_viewer_disconnected();
    }
}

/// Stream annotated frames until the client disconnects or the server shuts down.
///
/// Each frame goes to exactly one viewer. When no frame arrives within the
/// stream timeout an empty part is sent and the stream stays open.
pub async fn video_feed(State(state): State<AppState>) -> Response {
    let channel = Arc::clone(state.camera.channel());
    let timeout = state.config.vision.stream_timeout;
    let shutdown = state.shutdown_signal();

    let parts = stream::unfold(
        (channel, shutdown, ViewerGuard::new()),
        move |(channel, mut shutdown, guard)| async move {
            if *shutdown.borrow() {
                return None;
            }
            let frame = tokio::select! {
                frame = channel.consume(timeout) => frame,
                _ = shutdown.changed() => return None,
            };
            let part = match frame {
                Some(jpeg) => multipart_part(&jpeg),
                None => {
                    metrics::record_stream_empty_part();
                    multipart_part(&[])
                }
            };
            Some((Ok::<_, Infallible>(part), (channel, shutdown, guard)))
        },
    );

    (
        [
            (header::CONTENT_TYPE, MJPEG_CONTENT_TYPE),
            (header::CACHE_CONTROL, "no-cache, no-store"),
        ],
        Body::from_stream(parts),
    )
        .into_response()
}
