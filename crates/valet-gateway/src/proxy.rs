//! Reverse proxy: forwards `/app` traffic to the supervised worker.

use axum::body::Body;
use axum::extract::State;
use axum::http::{Request, StatusCode};
use axum::response::Response;
use std::sync::Arc;

use super::server::AppState;

fn bad_gateway(message: &str) -> Response {
    super::server::error_response(StatusCode::BAD_GATEWAY, message)
}

/// Forward the request as-is (method, path, query, headers, body) to the
/// worker's local port. Any failure maps to 502.
pub async fn to_worker(State(state): State<Arc<AppState>>, req: Request<Body>) -> Response {
    let Some(base) = state.supervisor.local_url().await else {
        return bad_gateway("Worker is not running");
    };

    let path_and_query = req
        .uri()
        .path_and_query()
        .map(|pq| pq.as_str().to_string())
        .unwrap_or_else(|| "/".to_string());
    let target = format!("{base}{path_and_query}");

    forward(&state.client, &target, req).await
}

/// Relay a request to `target`, streaming both bodies. Neither body is
/// buffered, so uploads and downloads of any size pass through.
async fn forward(client: &reqwest::Client, target: &str, req: Request<Body>) -> Response {
    let (parts, body) = req.into_parts();

    let mut headers = parts.headers;
    // The worker sees itself as the host.
    headers.remove(axum::http::header::HOST);

    let upstream = client
        .request(parts.method, target)
        .headers(headers)
        .body(reqwest::Body::wrap_stream(body.into_data_stream()))
        .send()
        .await;

    let upstream = match upstream {
        Ok(response) => response,
        Err(e) => {
            tracing::warn!("Worker proxy error for {target}: {e}");
            return bad_gateway("Proxy error");
        }
    };

    let mut builder = Response::builder().status(upstream.status());
    for (name, value) in upstream.headers() {
        builder = builder.header(name, value);
    }
    builder
        .body(Body::from_stream(upstream.bytes_stream()))
        .unwrap_or_else(|_| bad_gateway("Proxy error"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};

    #[tokio::test]
    async fn relays_status_headers_and_body_from_upstream() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            let (mut sock, _) = listener.accept().await.unwrap();
            let mut buf = [0u8; 2048];
            let _ = sock.read(&mut buf).await;
            sock.write_all(
                b"HTTP/1.1 200 OK\r\ncontent-length: 2\r\nx-worker: 1\r\n\r\nok",
            )
            .await
            .unwrap();
        });

        let client = reqwest::Client::new();
        let req = Request::builder()
            .method("GET")
            .uri("/app/ping")
            .body(Body::empty())
            .unwrap();
        let response = forward(&client, &format!("http://{addr}/app/ping"), req).await;

        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(response.headers().get("x-worker").unwrap(), "1");
        let body = axum::body::to_bytes(response.into_body(), 1024).await.unwrap();
        assert_eq!(&body[..], b"ok");
    }

    #[tokio::test]
    async fn unreachable_upstream_maps_to_bad_gateway() {
        let client = reqwest::Client::new();
        let req = Request::builder()
            .method("GET")
            .uri("/app/ping")
            .body(Body::empty())
            .unwrap();
        // port 9 is discard; nothing listens there in tests
        let response = forward(&client, "http://127.0.0.1:9/app/ping", req).await;
        assert_eq!(response.status(), StatusCode::BAD_GATEWAY);
    }
}
