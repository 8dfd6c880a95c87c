use futures_util::future::BoxFuture;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tracing::{debug, warn};

use super::{Destination, SendOutcome, SendSlot, Status, TransportError};

/// One request/response exchange. Completion means a response arrived or the exchange failed.
pub trait Deliver: Send + Sync + 'static {
    fn deliver(&self, destination: &Destination, body: Vec<u8>) -> BoxFuture<'static, Result<(), TransportError>>;
}

/// Request/response channel guarded by a [`SendSlot`].
pub struct RequestChannel {
    slot: SendSlot,
    deliver: Arc<dyn Deliver>,
    destination: watch::Sender<Destination>,
    status_tx: mpsc::UnboundedSender<Status>,
    timeout: Option<Duration>,
}

impl RequestChannel {
    pub fn new(
        deliver: Arc<dyn Deliver>,
        destination: Destination,
        status_tx: mpsc::UnboundedSender<Status>,
    ) -> Self {
        Self {
            slot: SendSlot::new(),
            deliver,
            destination: watch::Sender::new(destination),
            status_tx,
            timeout: None,
        }
    }

    /// Abandon deliveries that take longer than `timeout`. `None` waits forever.
    pub fn with_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn is_ready(&self) -> bool {
        self.slot.is_ready()
    }

    pub fn destination(&self) -> Destination {
        self.destination.borrow().clone()
    }

    /// Applies to the next dispatch; an in-flight send keeps its address.
    pub fn set_destination(&self, destination: Destination) {
        self.destination.send_replace(destination);
    }

    /// Dispatches `body` unless a transfer is outstanding, in which case it is discarded.
    pub fn send(&self, body: Vec<u8>) -> SendOutcome {
        let Some(permit) = self.slot.try_acquire() else {
            debug!(len = body.len(), "send slot busy, dropping body");
            return SendOutcome::Dropped;
        };

        let destination = self.destination();
        let len = body.len();
        let exchange = self.deliver.deliver(&destination, body);
        let timeout = self.timeout;
        let status_tx = self.status_tx.clone();

        tokio::spawn(async move {
            let result = match timeout {
                Some(limit) => tokio::time::timeout(limit, exchange)
                    .await
                    .unwrap_or(Err(TransportError::Timeout)),
                None => exchange.await,
            };
            // Release before reporting so observers of the status see a free slot
            drop(permit);

            let status = match result {
                Ok(()) => {
                    debug!(%destination, len, "delivered");
                    Status::Good
                }
                Err(e) => {
                    warn!(%destination, error = %e, "delivery failed");
                    Status::CommsError(e.to_string())
                }
            };
            let _ = status_tx.send(status);
        });

        SendOutcome::Dispatched
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use std::sync::Mutex;
    use tokio::sync::oneshot;

    /// Records every exchange and completes each one when the test says so.
    #[derive(Default)]
    pub(crate) struct ScriptedDeliver {
        pub calls: Mutex<Vec<(String, Vec<u8>)>>,
        pending: Mutex<Vec<oneshot::Sender<Result<(), TransportError>>>>,
    }

    impl ScriptedDeliver {
        pub fn call_count(&self) -> usize {
            self.calls.lock().unwrap().len()
        }

        /// Completes the oldest outstanding exchange.
        pub fn complete(&self, result: Result<(), TransportError>) {
            let tx = self.pending.lock().unwrap().remove(0);
            tx.send(result).unwrap();
        }
    }

    impl Deliver for ScriptedDeliver {
        fn deliver(&self, destination: &Destination, body: Vec<u8>) -> BoxFuture<'static, Result<(), TransportError>> {
            self.calls
                .lock()
                .unwrap()
                .push((destination.to_string(), body));
            let (tx, rx) = oneshot::channel();
            self.pending.lock().unwrap().push(tx);
            Box::pin(async move { rx.await.unwrap_or(Err(TransportError::Timeout)) })
        }
    }

    fn channel() -> (Arc<ScriptedDeliver>, RequestChannel, mpsc::UnboundedReceiver<Status>) {
        let deliver = Arc::new(ScriptedDeliver::default());
        let (status_tx, status_rx) = mpsc::unbounded_channel();
        let channel = RequestChannel::new(
            deliver.clone(),
            Destination::http("127.0.0.1:8000").unwrap(),
            status_tx,
        );
        (deliver, channel, status_rx)
    }

    #[tokio::test]
    async fn test_second_send_is_dropped_while_busy() {
        let (deliver, channel, mut status_rx) = channel();

        assert_eq!(channel.send(vec![0, 0, 0, 1]), SendOutcome::Dispatched);
        assert!(!channel.is_ready());

        channel.set_destination(Destination::http("127.0.0.1:9999").unwrap());
        assert_eq!(channel.send(vec![0, 0, 0, 2]), SendOutcome::Dropped);

        // The in-flight exchange is untouched
        {
            let calls = deliver.calls.lock().unwrap();
            assert_eq!(calls.len(), 1);
            assert_eq!(calls[0], ("http://127.0.0.1:8000".to_string(), vec![0, 0, 0, 1]));
        }

        deliver.complete(Ok(()));
        assert_eq!(status_rx.recv().await, Some(Status::Good));
        assert!(channel.is_ready());

        assert_eq!(channel.send(vec![0, 0, 0, 3]), SendOutcome::Dispatched);
        let calls = deliver.calls.lock().unwrap();
        assert_eq!(calls.len(), 2);
        assert_eq!(calls[1].0, "http://127.0.0.1:9999");
    }

    #[tokio::test]
    async fn test_failure_releases_slot() {
        let (deliver, channel, mut status_rx) = channel();

        channel.send(vec![1]);
        deliver.complete(Err(TransportError::Request("connection refused".into())));

        assert!(matches!(status_rx.recv().await, Some(Status::CommsError(_))));
        assert!(channel.is_ready());
        assert_eq!(channel.send(vec![2]), SendOutcome::Dispatched);
        assert_eq!(deliver.call_count(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeout_reports_comms_error() {
        let (deliver, channel, mut status_rx) = channel();
        let channel = channel.with_timeout(Some(Duration::from_secs(2)));

        channel.send(vec![1]);
        // Never completed by the test; the timeout fires instead
        assert!(matches!(status_rx.recv().await, Some(Status::CommsError(_))));
        assert!(channel.is_ready());
        assert_eq!(deliver.call_count(), 1);
    }
}
