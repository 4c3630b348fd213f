use core::sync::atomic::{AtomicU64, Ordering};
use courier::{HostError, HostEvent, SurfaceHost, SurfaceId, Token};
use parking_lot::Mutex;
use serde::Serialize;
use std::collections::BTreeMap;
use tokio::sync::mpsc;
use url::Url;

/// A consumer surface as seen by whoever displays it.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SurfaceInfo {
    pub tab_id: SurfaceId,
    pub token: Token,
    pub url: String,
}

/// Keeps the table of open consumer surfaces.
///
/// Opening a surface only allocates an id and a URL carrying the job token;
/// the display side discovers it through [`LocalSurfaceHost::list`]. Closing
/// one is reported back as [`HostEvent::SurfaceRemoved`], like any other
/// removal.
pub struct LocalSurfaceHost {
    base_url: Url,
    next_id: AtomicU64,
    open: Mutex<BTreeMap<SurfaceId, SurfaceInfo>>,
    events: mpsc::Sender<HostEvent>,
}

impl LocalSurfaceHost {
    pub fn new(base_url: Url, events: mpsc::Sender<HostEvent>) -> Self {
        Self {
            base_url,
            next_id: AtomicU64::new(1),
            open: Mutex::new(BTreeMap::new()),
            events,
        }
    }

    pub fn list(&self) -> Vec<SurfaceInfo> {
        self.open.lock().values().cloned().collect()
    }

    /// Drops a surface that was removed outside of [`SurfaceHost::close`].
    pub fn forget(&self, surface: SurfaceId) -> bool {
        self.open.lock().remove(&surface).is_some()
    }

    fn url_for(&self, token: &Token) -> String {
        let mut url = self.base_url.clone();
        url.query_pairs_mut().append_pair("token", token.as_str());
        url.into()
    }
}

impl SurfaceHost for LocalSurfaceHost {
    async fn open(&self, token: &Token) -> Result<SurfaceId, HostError> {
        let tab_id = SurfaceId(self.next_id.fetch_add(1, Ordering::Relaxed));
        let info = SurfaceInfo {
            tab_id,
            token: token.clone(),
            url: self.url_for(token),
        };

        #[cfg(feature = "tracing")]
        tracing::debug!(%tab_id, url = %info.url, "Opened surface");

        self.open.lock().insert(tab_id, info);
        Ok(tab_id)
    }

    async fn close(&self, surface: SurfaceId) -> Result<(), HostError> {
        if !self.forget(surface) {
            return Err(HostError::Failed(format!("No tab with id: {surface}")));
        }

        // The reactor tolerates surfaces with no job, so a full channel only
        // loses a redundant notification.
        if self.events.try_send(HostEvent::SurfaceRemoved(surface)).is_err() {
            #[cfg(feature = "tracing")]
            tracing::debug!(%surface, "Surface removal not announced");
        }
        Ok(())
    }
}
