use super::{request::RenderRequest, worker::worker_loop};
use crate::server::telemetry::increment_resource_creations;
use core::sync::atomic::{AtomicU64, Ordering};
use core::time::Duration;
use courier::{HostError, HostEvent, ResourceHost};
use parking_lot::Mutex;
use serde_json::Value;
use tokio::sync::{mpsc, oneshot};
use tokio::time::timeout;

// One request in flight at a time, plus a little slack for queued callers.
const REQUEST_BUFFER: usize = 8;

/// Hosts the singleton rendering resource as a background worker task.
///
/// At most one worker is alive at a time. A worker counts as alive as long as
/// its request channel is open.
pub struct WorkerResourceHost {
    worker: Mutex<Option<mpsc::Sender<RenderRequest>>>,
    instances: AtomicU64,
    request_timeout: Duration,
    idle: Option<Duration>,
    events: mpsc::Sender<HostEvent>,
}

impl WorkerResourceHost {
    pub const fn new(
        request_timeout: Duration,
        idle: Option<Duration>,
        events: mpsc::Sender<HostEvent>,
    ) -> Self {
        Self {
            worker: Mutex::new(None),
            instances: AtomicU64::new(0),
            request_timeout,
            idle,
            events,
        }
    }

    /// Whether a worker is currently alive.
    pub fn is_alive(&self) -> bool {
        self.worker.lock().as_ref().is_some_and(|tx| !tx.is_closed())
    }

    fn sender(&self) -> Option<mpsc::Sender<RenderRequest>> {
        self.worker
            .lock()
            .as_ref()
            .filter(|tx| !tx.is_closed())
            .cloned()
    }

    /// Stops the current worker, waiting at most `wait` for it to
    /// acknowledge.
    pub async fn shutdown(&self, wait: Duration) {
        let Some(tx) = self.worker.lock().take() else {
            return;
        };

        let (response, ack) = oneshot::channel();
        if tx.send(RenderRequest::Shutdown { response }).await.is_err() {
            return;
        }
        match timeout(wait, ack).await {
            Ok(Ok(())) => {
                #[cfg(feature = "tracing")]
                tracing::debug!("Rendering resource acknowledged shutdown");
            }
            Ok(Err(_)) | Err(_) => {
                #[cfg(feature = "tracing")]
                tracing::warn!("Rendering resource did not acknowledge shutdown");
            }
        }
    }
}

impl ResourceHost for WorkerResourceHost {
    async fn create(&self) -> Result<(), HostError> {
        let mut worker = self.worker.lock();
        if worker.as_ref().is_some_and(|tx| !tx.is_closed()) {
            return Err(HostError::AlreadyExists);
        }

        let instance = self.instances.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = mpsc::channel(REQUEST_BUFFER);
        tokio::spawn(worker_loop(instance, rx, self.idle, self.events.clone()));
        *worker = Some(tx);
        increment_resource_creations();
        Ok(())
    }

    async fn send(&self, message: Value) -> Result<Value, HostError> {
        let tx = self.sender().ok_or(HostError::ReceiverMissing)?;

        let (response, reply) = oneshot::channel();
        tx.send(RenderRequest::Render { message, response })
            .await
            .map_err(|_| HostError::ReceiverMissing)?;

        match timeout(self.request_timeout, reply).await {
            Ok(Ok(value)) => Ok(value),
            // The worker stopped before answering.
            Ok(Err(_)) => Err(HostError::ReceiverMissing),
            Err(_) => Err(HostError::Unavailable(format!(
                "no response within {:?}",
                self.request_timeout
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use courier::{Error, ResourceController};
    use serde_json::json;

    fn host(idle: Option<Duration>) -> (WorkerResourceHost, mpsc::Receiver<HostEvent>) {
        let (events, rx) = mpsc::channel(8);
        (
            WorkerResourceHost::new(Duration::from_secs(5), idle, events),
            rx,
        )
    }

    #[tokio::test]
    async fn second_create_reports_already_exists() {
        let (host, _events) = host(None);
        assert_eq!(host.create().await, Ok(()));
        assert_eq!(host.create().await, Err(HostError::AlreadyExists));
        assert!(host.is_alive());
    }

    #[tokio::test]
    async fn send_without_worker_reports_missing_receiver() {
        let (host, _events) = host(None);
        assert_eq!(
            host.send(json!({})).await,
            Err(HostError::ReceiverMissing)
        );
    }

    #[tokio::test]
    async fn renders_through_the_worker() {
        let (host, _events) = host(None);
        host.create().await.unwrap();
        let out = host
            .send(json!({ "kind": "svg", "markup": "<svg width=\"1\" height=\"2\"/>" }))
            .await
            .unwrap();
        assert_eq!(out["success"], true);
        assert_eq!(out["height"], 2.0);
    }

    #[tokio::test(start_paused = true)]
    async fn idle_worker_tears_down_and_announces_it() {
        let (host, mut events) = host(Some(Duration::from_secs(60)));
        host.create().await.unwrap();

        assert_eq!(events.recv().await, Some(HostEvent::ResourceDisconnected));
        assert!(!host.is_alive());
        assert_eq!(host.send(json!({})).await, Err(HostError::ReceiverMissing));

        // A fresh instance can be created once the old one is gone.
        assert_eq!(host.create().await, Ok(()));
    }

    #[tokio::test]
    async fn shutdown_stops_the_worker() {
        let (host, mut events) = host(None);
        host.create().await.unwrap();
        host.shutdown(Duration::from_secs(1)).await;

        assert_eq!(events.recv().await, Some(HostEvent::ResourceDisconnected));
        assert!(!host.is_alive());
    }

    #[tokio::test]
    async fn controller_recovers_after_teardown() {
        let (host, _events) = host(None);
        let controller = ResourceController::new(host);

        controller.forward(json!({ "kind": "svg", "markup": "<svg/>" })).await.unwrap();
        controller.host().shutdown(Duration::from_secs(1)).await;

        // Belief is stale until the failed round trip corrects it.
        let err = controller.forward(json!({})).await.unwrap_err();
        assert!(matches!(
            err,
            Error::CommunicationFailure {
                transient: false,
                ..
            }
        ));
        assert!(!controller.is_created());

        controller.forward(json!({ "kind": "svg", "markup": "<svg/>" })).await.unwrap();
        assert_eq!(controller.creations(), 2);
    }
}
