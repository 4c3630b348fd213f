//! Background tasks reacting to host lifecycle signals and reclaiming stale
//! state.
//!
//! - [`spawn_reactor`] consumes [`HostEvent`]s: a removed surface drops the
//!   print job bound to it, and a lost resource connection resets the
//!   controller's belief. The reactor only reclaims bookkeeping after the
//!   fact; it never closes surfaces itself.
//! - [`spawn_reaper`] periodically removes upload sessions that went idle and
//!   print jobs that outlived their TTL.
//!
//! Both tasks stop when the shared [`CancellationToken`] is cancelled.

use crate::{HostEvent, PrintPipeline, ResourceController, ResourceHost, SurfaceHost, Token};
use core::time::Duration;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;

/// Applies one host event. Returns the token of a dropped job, if any.
pub fn apply_event<S, H>(
    pipeline: &PrintPipeline<S>,
    resource: &ResourceController<H>,
    event: HostEvent,
) -> Option<Token>
where
    S: SurfaceHost,
    H: ResourceHost,
{
    match event {
        HostEvent::SurfaceRemoved(surface) => pipeline.on_surface_removed(surface),
        HostEvent::ResourceDisconnected => {
            resource.on_disconnect();
            None
        }
    }
}

/// Spawns the host event reactor.
///
/// The task ends when the channel closes or `shutdown` is cancelled.
pub fn spawn_reactor<S, H>(
    pipeline: Arc<PrintPipeline<S>>,
    resource: Arc<ResourceController<H>>,
    mut events: mpsc::Receiver<HostEvent>,
    shutdown: CancellationToken,
) -> JoinHandle<()>
where
    S: SurfaceHost,
    H: ResourceHost,
{
    tokio::spawn(async move {
        #[cfg(feature = "tracing")]
        tracing::trace!("Host event reactor started");

        loop {
            tokio::select! {
                () = shutdown.cancelled() => break,
                event = events.recv() => match event {
                    Some(event) => {
                        #[cfg(feature = "tracing")]
                        tracing::debug!(?event, "Host event");
                        apply_event(&pipeline, &resource, event);
                    }
                    None => break,
                },
            }
        }

        #[cfg(feature = "tracing")]
        tracing::trace!("Host event reactor stopped");
    })
}

/// When and what the reaper removes.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ReapPolicy {
    /// Maximum idle time of an upload session. `None` keeps sessions forever.
    pub session_ttl: Option<Duration>,
    /// Maximum age of a print job. `None` keeps jobs until completed.
    pub job_ttl: Option<Duration>,
    pub interval: Duration,
}

impl ReapPolicy {
    pub const fn is_enabled(&self) -> bool {
        self.session_ttl.is_some() || self.job_ttl.is_some()
    }
}

/// What one reaper pass removed.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ReapReport {
    pub sessions: Vec<Token>,
    pub jobs: Vec<Token>,
}

impl ReapReport {
    pub fn total(&self) -> usize {
        self.sessions.len() + self.jobs.len()
    }
}

/// Runs a single reaper pass at the pipeline clock's current time.
pub async fn reap_once<S: SurfaceHost>(pipeline: &PrintPipeline<S>, policy: &ReapPolicy) -> ReapReport {
    let now = pipeline.sessions().clock().current_millis();
    let mut report = ReapReport::default();

    if let Some(ttl) = policy.session_ttl {
        report.sessions = pipeline.sessions().reap_idle(now, ttl.as_millis() as u64);
    }
    if let Some(ttl) = policy.job_ttl {
        report.jobs = pipeline.reap_expired(now, ttl.as_millis() as u64).await;
    }

    #[cfg(feature = "tracing")]
    if report.total() > 0 {
        tracing::info!(
            sessions = report.sessions.len(),
            jobs = report.jobs.len(),
            "Reaped expired state"
        );
    }

    report
}

/// Spawns the periodic reaper, or returns `None` if `policy` disables it.
///
/// `on_reap` observes every non-empty pass.
pub fn spawn_reaper<S, F>(
    pipeline: Arc<PrintPipeline<S>>,
    policy: ReapPolicy,
    shutdown: CancellationToken,
    on_reap: F,
) -> Option<JoinHandle<()>>
where
    S: SurfaceHost,
    F: Fn(&ReapReport) + Send + 'static,
{
    if !policy.is_enabled() {
        return None;
    }

    Some(tokio::spawn(async move {
        let mut ticker = tokio::time::interval(policy.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        // The first tick completes immediately.
        ticker.tick().await;

        loop {
            tokio::select! {
                () = shutdown.cancelled() => break,
                _ = ticker.tick() => {
                    let report = reap_once(&pipeline, &policy).await;
                    if report.total() > 0 {
                        on_reap(&report);
                    }
                }
            }
        }

        #[cfg(feature = "tracing")]
        tracing::trace!("Reaper stopped");
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{MockSurfaces, MockTime, SequentialTokens};
    use crate::{
        DEFAULT_CHUNK_SIZE, Error, HostError, OpenOptions, SessionRegistry, StartOptions,
        SurfaceId,
    };
    use serde_json::Value;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct CountingHost {
        creates: AtomicUsize,
    }

    impl ResourceHost for CountingHost {
        async fn create(&self) -> Result<(), HostError> {
            self.creates.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }

        async fn send(&self, message: Value) -> Result<Value, HostError> {
            Ok(message)
        }
    }

    fn fixture() -> (
        Arc<PrintPipeline<MockSurfaces>>,
        Arc<ResourceController<CountingHost>>,
        Arc<MockTime>,
    ) {
        let time = MockTime::at(0);
        let sessions = Arc::new(SessionRegistry::new(
            DEFAULT_CHUNK_SIZE,
            Arc::new(SequentialTokens::default()),
            time.clone(),
        ));
        let pipeline = Arc::new(PrintPipeline::new(sessions, MockSurfaces::default()));
        let resource = Arc::new(ResourceController::new(CountingHost {
            creates: AtomicUsize::new(0),
        }));
        (pipeline, resource, time)
    }

    async fn started_job(pipeline: &PrintPipeline<MockSurfaces>, body: &str) -> Token {
        let opened = pipeline.sessions().open(None, OpenOptions::default());
        pipeline
            .sessions()
            .append_chunk(opened.token.as_str(), body.to_owned())
            .unwrap();
        pipeline
            .start(opened.token.as_str(), StartOptions::default())
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn reactor_drops_job_of_removed_surface() {
        let (pipeline, resource, _) = fixture();
        let token = started_job(&pipeline, "<p>bye</p>").await;
        let surface = pipeline.job(token.as_str()).unwrap().tab_id.unwrap();

        let (tx, rx) = mpsc::channel(4);
        let shutdown = CancellationToken::new();
        let handle = spawn_reactor(
            Arc::clone(&pipeline),
            Arc::clone(&resource),
            rx,
            shutdown.clone(),
        );

        tx.send(HostEvent::SurfaceRemoved(surface)).await.unwrap();
        drop(tx);
        handle.await.unwrap();

        assert_eq!(pipeline.request(token.as_str()), Err(Error::JobNotFound));
        assert!(pipeline.surfaces().closed.lock().is_empty());
    }

    #[tokio::test]
    async fn reactor_resets_resource_belief() {
        let (pipeline, resource, _) = fixture();
        resource.ensure().await.unwrap();
        assert!(resource.is_created());

        assert_eq!(
            apply_event(&pipeline, &resource, HostEvent::ResourceDisconnected),
            None
        );
        assert!(!resource.is_created());

        resource.ensure().await.unwrap();
        assert_eq!(resource.host().creates.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn reactor_ignores_unbound_surfaces() {
        let (pipeline, resource, _) = fixture();
        let token = started_job(&pipeline, "x").await;
        assert_eq!(
            apply_event(&pipeline, &resource, HostEvent::SurfaceRemoved(SurfaceId(4242))),
            None
        );
        assert!(pipeline.job(token.as_str()).is_some());
    }

    #[tokio::test]
    async fn reactor_stops_on_shutdown() {
        let (pipeline, resource, _) = fixture();
        let (_tx, rx) = mpsc::channel(1);
        let shutdown = CancellationToken::new();
        let handle = spawn_reactor(pipeline, resource, rx, shutdown.clone());
        shutdown.cancel();
        handle.await.unwrap();
    }

    #[tokio::test]
    async fn reap_once_applies_both_ttls() {
        let (pipeline, _, time) = fixture();
        let job = started_job(&pipeline, "job").await;
        let idle = pipeline.sessions().open(None, OpenOptions::default());
        time.advance(2_000);
        let fresh = pipeline.sessions().open(None, OpenOptions::default());

        let policy = ReapPolicy {
            session_ttl: Some(Duration::from_millis(1_000)),
            job_ttl: Some(Duration::from_millis(1_500)),
            interval: Duration::from_secs(1),
        };
        let report = reap_once(&pipeline, &policy).await;

        assert_eq!(report.sessions, vec![idle.token]);
        assert_eq!(report.jobs, vec![job]);
        assert_eq!(report.total(), 2);
        assert!(pipeline.sessions().contains(fresh.token.as_str()));
        assert_eq!(pipeline.surfaces().closed.lock().as_slice(), &[SurfaceId(100)]);
    }

    #[tokio::test]
    async fn disabled_policy_spawns_nothing() {
        let (pipeline, _, _) = fixture();
        let policy = ReapPolicy {
            session_ttl: None,
            job_ttl: None,
            interval: Duration::from_secs(1),
        };
        assert!(spawn_reaper(pipeline, policy, CancellationToken::new(), |_| {}).is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn reaper_runs_on_interval_until_cancelled() {
        let (pipeline, _, time) = fixture();
        pipeline.sessions().open(None, OpenOptions::default());
        time.advance(5_000);

        let passes = Arc::new(AtomicUsize::new(0));
        let observed = Arc::clone(&passes);
        let shutdown = CancellationToken::new();
        let policy = ReapPolicy {
            session_ttl: Some(Duration::from_millis(1_000)),
            job_ttl: None,
            interval: Duration::from_secs(30),
        };
        let handle = spawn_reaper(Arc::clone(&pipeline), policy, shutdown.clone(), move |report| {
            assert_eq!(report.sessions.len(), 1);
            observed.fetch_add(1, Ordering::SeqCst);
        })
        .unwrap();

        tokio::time::sleep(Duration::from_secs(31)).await;
        assert_eq!(passes.load(Ordering::SeqCst), 1);
        assert!(pipeline.sessions().is_empty());

        shutdown.cancel();
        handle.await.unwrap();
    }
}
