use futures_util::{SinkExt, StreamExt};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio_tungstenite::{connect_async, tungstenite::Message as WsMessage};
use tracing::{debug, info, warn};

use super::{Destination, SendOutcome, Status};

/// Frames waiting for the socket. Anything beyond this is dropped, not queued.
const FRAME_QUEUE: usize = 2;

/// A WebSocket that takes binary messages whenever it is connected.
/// There is no completion signal, so no send slot: pacing is the socket's job.
pub struct DuplexChannel {
    destination: Destination,
    connected: Arc<AtomicBool>,
    retired: Arc<AtomicBool>,
    tx: mpsc::Sender<Vec<u8>>,
}

impl DuplexChannel {
    /// Starts connecting in the background. Sends are dropped until the socket is open.
    /// Dropping the channel closes the socket without reporting it.
    pub fn open(destination: Destination, status_tx: mpsc::UnboundedSender<Status>) -> Self {
        let connected = Arc::new(AtomicBool::new(false));
        let retired = Arc::new(AtomicBool::new(false));
        let (tx, rx) = mpsc::channel::<Vec<u8>>(FRAME_QUEUE);

        tokio::spawn(run_socket(
            destination.clone(),
            connected.clone(),
            rx,
            StatusReporter {
                tx: status_tx,
                retired: retired.clone(),
            },
        ));

        Self {
            destination,
            connected,
            retired,
            tx,
        }
    }

    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::Acquire)
    }

    pub fn destination(&self) -> &Destination {
        &self.destination
    }

    pub fn send(&self, body: Vec<u8>) -> SendOutcome {
        if !self.is_connected() {
            return SendOutcome::Dropped;
        }
        match self.tx.try_send(body) {
            Ok(()) => SendOutcome::Dispatched,
            Err(mpsc::error::TrySendError::Full(_)) => {
                debug!(destination = %self.destination, "socket backed up, dropping frame");
                SendOutcome::Dropped
            }
            Err(mpsc::error::TrySendError::Closed(_)) => SendOutcome::Dropped,
        }
    }
}

impl Drop for DuplexChannel {
    fn drop(&mut self) {
        self.retired.store(true, Ordering::Release);
    }
}

/// Status sink that goes quiet once its channel has been replaced.
struct StatusReporter {
    tx: mpsc::UnboundedSender<Status>,
    retired: Arc<AtomicBool>,
}

impl StatusReporter {
    fn report(&self, status: Status) {
        if !self.retired.load(Ordering::Acquire) {
            let _ = self.tx.send(status);
        }
    }
}

async fn run_socket(
    destination: Destination,
    connected: Arc<AtomicBool>,
    mut rx: mpsc::Receiver<Vec<u8>>,
    status: StatusReporter,
) {
    let ws_stream = match connect_async(destination.as_str()).await {
        Ok((ws_stream, _)) => ws_stream,
        Err(e) => {
            warn!(%destination, error = %e, "websocket connect failed");
            status.report(Status::CommsError(e.to_string()));
            return;
        }
    };

    info!(%destination, "websocket connected");
    connected.store(true, Ordering::Release);
    status.report(Status::Connected);

    let (mut ws_sender, mut ws_receiver) = ws_stream.split();
    loop {
        tokio::select! {
            outgoing = rx.recv() => match outgoing {
                Some(body) => {
                    if let Err(e) = ws_sender.send(WsMessage::Binary(body)).await {
                        warn!(%destination, error = %e, "websocket send failed");
                        status.report(Status::CommsError(e.to_string()));
                        break;
                    }
                }
                None => {
                    // Channel dropped by its owner
                    let _ = ws_sender.close().await;
                    break;
                }
            },
            incoming = ws_receiver.next() => match incoming {
                Some(Ok(WsMessage::Close(_))) | None => {
                    debug!(%destination, "websocket closed by peer");
                    break;
                }
                Some(Err(e)) => {
                    warn!(%destination, error = %e, "websocket error");
                    status.report(Status::CommsError(e.to_string()));
                    break;
                }
                Some(Ok(_)) => {}
            },
        }
    }

    connected.store(false, Ordering::Release);
    status.report(Status::Disconnected);
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use tokio::net::TcpListener;
    use tokio_tungstenite::accept_async;

    #[tokio::test]
    async fn test_sends_only_while_connected() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let server = tokio::spawn(async move {
            let (stream, _) = listener.accept().await.unwrap();
            let mut ws = accept_async(stream).await.unwrap();
            match ws.next().await {
                Some(Ok(WsMessage::Binary(data))) => data,
                other => panic!("unexpected message: {:?}", other),
            }
        });

        let (status_tx, mut status_rx) = mpsc::unbounded_channel();
        let channel = DuplexChannel::open(Destination::ws(&addr.to_string()).unwrap(), status_tx);
        // Not open yet on the first poll of this task
        assert_eq!(channel.send(vec![9]), SendOutcome::Dropped);

        assert_eq!(status_rx.recv().await, Some(Status::Connected));
        assert!(channel.is_connected());
        assert_eq!(channel.send(vec![1, 2, 3]), SendOutcome::Dispatched);

        assert_eq!(server.await.unwrap(), vec![1, 2, 3]);
        // The server drops without a close frame, which may surface as an error first
        loop {
            match status_rx.recv().await {
                Some(Status::Disconnected) => break,
                Some(Status::CommsError(_)) => continue,
                other => panic!("unexpected status: {:?}", other),
            }
        }
        assert!(!channel.is_connected());
        assert_eq!(channel.send(vec![4]), SendOutcome::Dropped);
    }

    #[tokio::test]
    async fn test_backed_up_socket_drops_frames() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let (release_tx, release_rx) = tokio::sync::oneshot::channel::<()>();
        // Accepts the socket, then reads nothing until released
        tokio::spawn(async move {
            let (stream, _) = listener.accept().await.unwrap();
            let _ws = accept_async(stream).await.unwrap();
            let _ = release_rx.await;
        });

        let (status_tx, mut status_rx) = mpsc::unbounded_channel();
        let channel = DuplexChannel::open(Destination::ws(&addr.to_string()).unwrap(), status_tx);
        assert_eq!(status_rx.recv().await, Some(Status::Connected));

        // The socket task cannot run between these calls, so the queue fills
        let outcomes: Vec<SendOutcome> = (0..6).map(|_| channel.send(vec![0; 50_112])).collect();
        assert_eq!(&outcomes[..FRAME_QUEUE], &[SendOutcome::Dispatched; FRAME_QUEUE]);
        assert!(outcomes[FRAME_QUEUE..].iter().all(|o| *o == SendOutcome::Dropped));
        drop(release_tx);
    }

    #[tokio::test]
    async fn test_dropped_channel_stays_quiet() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let server = tokio::spawn(async move {
            let (stream, _) = listener.accept().await.unwrap();
            let mut ws = accept_async(stream).await.unwrap();
            // Runs until the client goes away
            while let Some(Ok(_)) = ws.next().await {}
        });

        let (status_tx, mut status_rx) = mpsc::unbounded_channel();
        let channel = DuplexChannel::open(Destination::ws(&addr.to_string()).unwrap(), status_tx);
        assert_eq!(status_rx.recv().await, Some(Status::Connected));

        drop(channel);
        tokio::time::timeout(Duration::from_secs(5), server).await.unwrap().unwrap();
        // The socket task has ended and sent nothing more
        assert_eq!(status_rx.recv().await, None);
    }

    #[tokio::test]
    async fn test_connect_failure_reports_error() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let (status_tx, mut status_rx) = mpsc::unbounded_channel();
        let channel = DuplexChannel::open(Destination::ws(&addr.to_string()).unwrap(), status_tx);

        assert!(matches!(status_rx.recv().await, Some(Status::CommsError(_))));
        assert!(!channel.is_connected());
    }
}
