// Newline-delimited JSON streaming utilities
use axum::body::Body;
use axum::http::{header, Response, StatusCode};
use axum::response::IntoResponse;
use bytes::{BufMut, Bytes, BytesMut};
use futures::stream::Stream;
use futures::StreamExt;
use serde::Serialize;

/// Create a chunked NDJSON streaming response, one JSON document per line
pub fn ndjson_stream<S, T>(stream: S) -> Result<Response<Body>, StatusCode>
where
    S: Stream<Item = T> + Send + 'static,
    T: Serialize + Send + 'static,
{
    let byte_stream = stream.map(|item| serialize_line(&item));

    Response::builder()
        .status(StatusCode::OK)
        .header(header::CONTENT_TYPE, "application/x-ndjson")
        .header(header::CACHE_CONTROL, "no-cache")
        .body(Body::from_stream(byte_stream))
        .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)
}

/// Serialize a single item to a newline-terminated chunk
fn serialize_line<T: Serialize>(item: &T) -> Result<Bytes, std::io::Error> {
    let json = serde_json::to_vec(item).map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))?;

    let mut chunk = BytesMut::with_capacity(json.len() + 1);
    chunk.put_slice(&json);
    chunk.put_u8(b'\n');
    Ok(chunk.freeze())
}

/// Stream everything sent on `rx` until all senders are gone.
///
/// `guard` lives as long as the response body, so a subscription handed in
/// here is released when the client disconnects.
pub fn stream_from_receiver<T, G>(mut rx: tokio::sync::mpsc::Receiver<T>, guard: G) -> impl IntoResponse
where
    T: Serialize + Send + 'static,
    G: Send + 'static,
{
    let stream = async_stream::stream! {
        let _guard = guard;
        while let Some(item) = rx.recv().await {
            yield item;
        }
    };

    match ndjson_stream(stream) {
        Ok(response) => response,
        Err(status) => status.into_response(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Serialize)]
    struct Tick {
        n: u32,
    }

    #[test]
    fn test_serialize_line() {
        let chunk = serialize_line(&Tick { n: 7 }).unwrap();
        assert_eq!(&chunk[..], b"{\"n\":7}\n");
    }

    #[tokio::test]
    async fn test_stream_from_receiver_ends_when_senders_drop() {
        let (tx, rx) = tokio::sync::mpsc::channel(4);
        tx.send(Tick { n: 1 }).await.unwrap();
        tx.send(Tick { n: 2 }).await.unwrap();
        drop(tx);

        let response = stream_from_receiver(rx, ()).into_response();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(
            response.headers().get(header::CONTENT_TYPE).unwrap(),
            "application/x-ndjson"
        );

        let body = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
        assert_eq!(&body[..], b"{\"n\":1}\n{\"n\":2}\n");
    }
}
