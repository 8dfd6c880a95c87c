//! Request/response delivery over HTTP POST.

use futures_util::future::BoxFuture;
use tokio_tungstenite::tungstenite::http::Uri;

use super::{Deliver, Destination, TransportError};

/// Delivers a body as `POST` to the destination URL.
pub struct HttpPost;

impl Deliver for HttpPost {
    fn deliver(&self, destination: &Destination, body: Vec<u8>) -> BoxFuture<'static, Result<(), TransportError>> {
        let uri = destination.uri().clone();
        Box::pin(async move {
            // Any response counts as delivered, whatever its status
            post(&uri, body).await.map(|_| ())
        })
    }
}

/// Sends the request and returns the response status code.
pub async fn post(uri: &Uri, body: Vec<u8>) -> Result<u16, TransportError> {
    let scheme = uri.scheme_str().unwrap_or("http");
    if scheme != "http" {
        return Err(TransportError::UnsupportedScheme(scheme.to_string()));
    }
    let url = uri.to_string();

    // ureq blocks, keep it off the runtime threads
    tokio::task::spawn_blocking(move || {
        match ureq::post(&url)
            .set("Content-Type", "application/octet-stream")
            .send_bytes(&body)
        {
            Ok(response) => Ok(response.status()),
            Err(ureq::Error::Status(code, _)) => Ok(code),
            Err(ureq::Error::Transport(e)) => Err(TransportError::Request(e.to_string())),
        }
    })
    .await?
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::{body::Bytes, http::StatusCode, Router};
    use tokio::net::TcpListener;
    use tokio::sync::mpsc;

    /// Serves every request with `status` and forwards each body.
    async fn recording_server(
        bind: &str,
        status: StatusCode,
    ) -> (String, mpsc::UnboundedReceiver<Vec<u8>>) {
        let listener = TcpListener::bind(bind).await.unwrap();
        let addr = listener.local_addr().unwrap();
        let (tx, rx) = mpsc::unbounded_channel();
        let app = Router::new().fallback(move |body: Bytes| {
            let tx = tx.clone();
            async move {
                let _ = tx.send(body.to_vec());
                status
            }
        });
        tokio::spawn(async move { axum::serve(listener, app).await });
        (format!("http://{}", addr), rx)
    }

    #[tokio::test]
    async fn test_post_round_trip() {
        let (url, mut bodies) = recording_server("127.0.0.1:0", StatusCode::NO_CONTENT).await;

        let uri: Uri = url.parse().unwrap();
        assert_eq!(post(&uri, vec![0, 0, 0, 42]).await.unwrap(), 204);
        assert_eq!(bodies.recv().await, Some(vec![0, 0, 0, 42]));
    }

    #[tokio::test]
    async fn test_error_status_still_counts_as_delivered() {
        let (url, _bodies) = recording_server("127.0.0.1:0", StatusCode::INTERNAL_SERVER_ERROR).await;

        let destination = Destination::http(&url).unwrap();
        assert!(HttpPost.deliver(&destination, vec![1]).await.is_ok());
    }

    #[tokio::test]
    async fn test_ipv6_literal_destination() {
        let Ok(loopback) = TcpListener::bind("[::1]:0").await else {
            // No IPv6 loopback on this host
            return;
        };
        drop(loopback);

        let (url, mut bodies) = recording_server("[::1]:0", StatusCode::OK).await;
        let destination = Destination::http(url.trim_start_matches("http://")).unwrap();
        assert_eq!(destination.uri().host(), Some("[::1]"));

        HttpPost.deliver(&destination, vec![0, 0, 0, 8]).await.unwrap();
        assert_eq!(bodies.recv().await, Some(vec![0, 0, 0, 8]));
    }

    #[tokio::test]
    async fn test_post_refused_is_request_error() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let uri: Uri = format!("http://{}", addr).parse().unwrap();
        assert!(matches!(post(&uri, vec![1]).await, Err(TransportError::Request(_))));
    }

    #[tokio::test]
    async fn test_https_is_unsupported() {
        let uri: Uri = "https://localhost:8443".parse().unwrap();
        assert!(matches!(
            post(&uri, vec![1]).await,
            Err(TransportError::UnsupportedScheme(_))
        ));
    }
}
