//! Singleton Resource Lifecycle Controller.
//!
//! Tracks a single *belief* about whether the shared rendering resource
//! exists. The belief is a cache of external truth, not a lock: it may be
//! stale and is corrected whenever the host tells us otherwise.
//!
//! Concurrent [`ResourceController::ensure`] calls are not serialized. Each
//! may attempt creation; the host rejects duplicates atomically with
//! [`HostError::AlreadyExists`], which is treated as success.

use crate::{Error, HostError, ResourceHost, Result};
use core::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use serde_json::Value;

pub struct ResourceController<H> {
    host: H,
    created: AtomicBool,
    creations: AtomicU64,
}

impl<H: ResourceHost> ResourceController<H> {
    pub const fn new(host: H) -> Self {
        Self {
            host,
            created: AtomicBool::new(false),
            creations: AtomicU64::new(0),
        }
    }

    pub const fn host(&self) -> &H {
        &self.host
    }

    /// Whether the resource is currently believed to exist.
    pub fn is_created(&self) -> bool {
        self.created.load(Ordering::Acquire)
    }

    /// Number of creation attempts this controller saw succeed.
    pub fn creations(&self) -> u64 {
        self.creations.load(Ordering::Relaxed)
    }

    /// Makes sure the resource exists.
    ///
    /// No-op while the belief is `true`.
    ///
    /// # Errors
    ///
    /// [`Error::ResourceCreationFailed`] if the host fails for any reason
    /// other than the resource already existing. The belief stays `false`.
    pub async fn ensure(&self) -> Result<()> {
        if self.is_created() {
            return Ok(());
        }

        match self.host.create().await {
            Ok(()) => {
                self.creations.fetch_add(1, Ordering::Relaxed);
                self.created.store(true, Ordering::Release);

                #[cfg(feature = "tracing")]
                tracing::debug!("Rendering resource created");

                Ok(())
            }
            Err(HostError::AlreadyExists) => {
                self.created.store(true, Ordering::Release);

                #[cfg(feature = "tracing")]
                tracing::debug!("Rendering resource already exists");

                Ok(())
            }
            Err(e) => {
                #[cfg(feature = "tracing")]
                tracing::warn!("Failed to create rendering resource: {e}");

                Err(Error::ResourceCreationFailed {
                    reason: e.to_string(),
                })
            }
        }
    }

    /// Ensures the resource exists, then forwards one request to it.
    ///
    /// A dead receiver means the belief was stale and resets it. Other
    /// failures leave the belief alone since the resource may still be alive.
    ///
    /// # Errors
    ///
    /// - [`Error::ResourceCreationFailed`] from [`Self::ensure`].
    /// - [`Error::CommunicationFailure`] if the round trip fails.
    #[cfg_attr(feature = "tracing", tracing::instrument(level = "debug", skip_all))]
    pub async fn forward(&self, message: Value) -> Result<Value> {
        self.ensure().await?;

        match self.host.send(message).await {
            Ok(response) => Ok(response),
            Err(HostError::ReceiverMissing) => {
                self.created.store(false, Ordering::Release);

                #[cfg(feature = "tracing")]
                tracing::info!("Rendering resource is gone, resetting belief");

                Err(Error::CommunicationFailure {
                    reason: HostError::ReceiverMissing.to_string(),
                    transient: false,
                })
            }
            Err(e) => Err(Error::CommunicationFailure {
                reason: e.to_string(),
                transient: true,
            }),
        }
    }

    /// Resets the belief after the resource's connection went away.
    pub fn on_disconnect(&self) {
        self.created.store(false, Ordering::Release);

        #[cfg(feature = "tracing")]
        tracing::debug!("Rendering resource disconnected");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;
    use serde_json::json;
    use std::sync::Arc;
    use std::sync::atomic::AtomicUsize;

    /// A host whose resource exists once created, and which rejects duplicate
    /// creation the way the platform does.
    #[derive(Default)]
    struct PlatformHost {
        exists: AtomicBool,
        create_calls: AtomicUsize,
        created_ok: AtomicUsize,
        fail_create: Mutex<Option<HostError>>,
        next_send: Mutex<Option<HostError>>,
    }

    impl ResourceHost for PlatformHost {
        async fn create(&self) -> core::result::Result<(), HostError> {
            self.create_calls.fetch_add(1, Ordering::SeqCst);
            tokio::task::yield_now().await;
            if let Some(e) = self.fail_create.lock().clone() {
                return Err(e);
            }
            if self
                .exists
                .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
                .is_ok()
            {
                self.created_ok.fetch_add(1, Ordering::SeqCst);
                Ok(())
            } else {
                Err(HostError::classify(
                    "Only a single offscreen document may be created.",
                ))
            }
        }

        async fn send(&self, message: Value) -> core::result::Result<Value, HostError> {
            if let Some(e) = self.next_send.lock().take() {
                return Err(e);
            }
            Ok(json!({ "echo": message }))
        }
    }

    #[tokio::test]
    async fn ensure_creates_once_then_short_circuits() {
        let controller = ResourceController::new(PlatformHost::default());
        controller.ensure().await.unwrap();
        controller.ensure().await.unwrap();

        assert!(controller.is_created());
        assert_eq!(controller.host().create_calls.load(Ordering::SeqCst), 1);
        assert_eq!(controller.creations(), 1);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_ensure_creates_exactly_once() {
        let controller = Arc::new(ResourceController::new(PlatformHost::default()));

        let handles: Vec<_> = (0..16)
            .map(|_| {
                let controller = Arc::clone(&controller);
                tokio::spawn(async move { controller.ensure().await })
            })
            .collect();

        for handle in futures::future::join_all(handles).await {
            assert_eq!(handle.unwrap(), Ok(()));
        }

        assert!(controller.is_created());
        assert_eq!(controller.host().created_ok.load(Ordering::SeqCst), 1);
        assert_eq!(controller.creations(), 1);
    }

    #[tokio::test]
    async fn already_exists_counts_as_success() {
        let host = PlatformHost::default();
        host.exists.store(true, Ordering::SeqCst);
        let controller = ResourceController::new(host);

        assert_eq!(controller.ensure().await, Ok(()));
        assert!(controller.is_created());
        assert_eq!(controller.creations(), 0);
    }

    #[tokio::test]
    async fn other_creation_errors_propagate_and_keep_belief_false() {
        let host = PlatformHost::default();
        *host.fail_create.lock() = Some(HostError::Failed("no document API".into()));
        let controller = ResourceController::new(host);

        assert_eq!(
            controller.ensure().await,
            Err(Error::ResourceCreationFailed {
                reason: "no document API".into()
            })
        );
        assert!(!controller.is_created());
    }

    #[tokio::test]
    async fn forward_returns_the_resource_response() {
        let controller = ResourceController::new(PlatformHost::default());
        let response = controller.forward(json!({ "kind": "svg" })).await.unwrap();
        assert_eq!(response, json!({ "echo": { "kind": "svg" } }));
    }

    #[tokio::test]
    async fn missing_receiver_resets_belief() {
        let controller = ResourceController::new(PlatformHost::default());
        controller.ensure().await.unwrap();
        *controller.host().next_send.lock() = Some(HostError::ReceiverMissing);

        let err = controller.forward(json!({})).await.unwrap_err();
        assert!(matches!(
            err,
            Error::CommunicationFailure {
                transient: false,
                ..
            }
        ));
        assert!(!controller.is_created());
    }

    #[tokio::test]
    async fn transient_failure_keeps_belief() {
        let controller = ResourceController::new(PlatformHost::default());
        controller.ensure().await.unwrap();
        *controller.host().next_send.lock() = Some(HostError::Unavailable("timed out".into()));

        let err = controller.forward(json!({})).await.unwrap_err();
        assert!(matches!(
            err,
            Error::CommunicationFailure {
                transient: true,
                ..
            }
        ));
        assert!(controller.is_created());
    }

    #[tokio::test]
    async fn disconnect_forces_recreation_attempt() {
        let controller = ResourceController::new(PlatformHost::default());
        controller.ensure().await.unwrap();
        controller.on_disconnect();
        assert!(!controller.is_created());

        // The platform still holds the old instance, so recreation reports
        // "already exists" and the belief is restored without error.
        controller.ensure().await.unwrap();
        assert!(controller.is_created());
        assert_eq!(controller.host().create_calls.load(Ordering::SeqCst), 2);
    }
}
