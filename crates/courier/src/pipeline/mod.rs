//! Print Job Pipeline.
//!
//! A print payload arrives through the chunked upload path and is served back
//! out, again in chunks, to a freshly opened consumer surface that cannot
//! receive a single oversized message.
//!
//! ## Per-token state machine
//!
//! ```text
//! (no job) --start--> Ready --request--> Fetching --complete--> (no job)
//!                       \                    |
//!                        +---- surface removed / reaped ----+
//! ```
//!
//! Promotion moves the session out of the [`SessionRegistry`]; a token is
//! never present in both the registry and the job table.

mod job;

pub use job::*;

use crate::{Error, Result, SessionRegistry, SurfaceHost, SurfaceId, Token};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;

pub struct PrintPipeline<S> {
    sessions: Arc<SessionRegistry>,
    jobs: Mutex<HashMap<Token, PrintJob>>,
    surfaces: S,
}

impl<S: SurfaceHost> PrintPipeline<S> {
    pub fn new(sessions: Arc<SessionRegistry>, surfaces: S) -> Self {
        Self {
            sessions,
            jobs: Mutex::new(HashMap::new()),
            surfaces,
        }
    }

    pub const fn surfaces(&self) -> &S {
        &self.surfaces
    }

    pub fn sessions(&self) -> &Arc<SessionRegistry> {
        &self.sessions
    }

    /// Promotes the session named by `token` into a print job and opens a
    /// consumer surface for it.
    ///
    /// The session is finalized first if it is still accumulating. Title and
    /// filename come from `options`, then from the session metadata, then
    /// default to `"Document"` and `""`.
    ///
    /// # Errors
    ///
    /// - [`Error::SessionNotFound`] if no session is registered under `token`.
    /// - [`Error::Collaborator`] if the surface could not be opened. The job
    ///   is discarded in that case.
    #[cfg_attr(feature = "tracing", tracing::instrument(level = "debug", skip(self, options)))]
    pub async fn start(&self, token: &str, options: StartOptions) -> Result<Token> {
        let now = self.sessions.clock().current_millis();
        let session = self.sessions.promote(token)?;

        let title = non_empty(options.title)
            .or_else(|| session.metadata_str("title").and_then(non_empty_str))
            .unwrap_or_else(|| "Document".to_owned());
        let filename = non_empty(options.filename)
            .or_else(|| session.metadata_str("filename").and_then(non_empty_str))
            .unwrap_or_default();
        let token = session.token.clone();
        let chunk_size = session.chunk_size;
        let job = PrintJob::new(
            token.clone(),
            session.into_data(),
            title,
            filename,
            chunk_size,
            now,
            options.source_tab_id,
        );
        self.jobs.lock().insert(token.clone(), job);

        match self.surfaces.open(&token).await {
            Ok(surface) => {
                let bound = match self.jobs.lock().get_mut(&token) {
                    Some(job) => {
                        job.tab_id = Some(surface);
                        true
                    }
                    None => false,
                };
                if !bound {
                    #[cfg(feature = "tracing")]
                    tracing::debug!(%token, %surface, "Job finished before its surface was bound");
                    self.close_quietly(surface).await;
                }

                #[cfg(feature = "tracing")]
                tracing::info!(%token, %surface, "Print job started");

                Ok(token)
            }
            Err(e) => {
                self.jobs.lock().remove(&token);
                self.sessions.release(token.as_str());

                #[cfg(feature = "tracing")]
                tracing::warn!(%token, "Failed to open print surface: {e}");

                Err(Error::collaborator("surface", e))
            }
        }
    }

    /// Metadata the consumer needs before pulling chunks.
    ///
    /// # Errors
    ///
    /// [`Error::JobNotFound`] or [`Error::JobNotReady`].
    pub fn request(&self, token: &str) -> Result<JobMetadata> {
        let jobs = self.jobs.lock();
        let job = jobs.get(token).ok_or(Error::JobNotFound)?;
        let html = job.html().ok_or(Error::JobNotReady)?;
        Ok(JobMetadata {
            title: job.title.clone(),
            filename: job.filename.clone(),
            length: html.len(),
            chunk_size: job.chunk_size,
        })
    }

    /// Returns the payload slice starting at `offset`.
    ///
    /// A negative or absent `offset` reads from 0. An absent `length` uses the
    /// job's chunk size.
    ///
    /// # Errors
    ///
    /// - [`Error::JobNotFound`] / [`Error::JobNotReady`].
    /// - [`Error::InvalidInput`] if `length` is not positive.
    pub fn fetch_chunk(
        &self,
        token: &str,
        offset: Option<i64>,
        length: Option<i64>,
    ) -> Result<PrintChunk> {
        let offset = offset.unwrap_or(0).max(0) as usize;

        let jobs = self.jobs.lock();
        let job = jobs.get(token).ok_or(Error::JobNotFound)?;
        let html = job.html().ok_or(Error::JobNotReady)?;
        let length = match length {
            None => job.chunk_size,
            Some(length) if length > 0 => length as usize,
            Some(length) => {
                return Err(Error::invalid_input(format!(
                    "length must be positive, got {length}"
                )));
            }
        };

        let (chunk, next_offset) = slice_chunk(html, offset, length);
        Ok(PrintChunk {
            chunk: chunk.to_owned(),
            next_offset,
        })
    }

    /// Deletes the job and, unless `close_surface` is `false`, tears down its
    /// surface.
    ///
    /// Unknown tokens are not an error. Surface teardown failures are logged
    /// and swallowed. Returns whether a job was removed.
    pub async fn complete(&self, token: &str, close_surface: bool) -> bool {
        let removed = self.jobs.lock().remove(token);
        let Some(job) = removed else {
            return false;
        };
        self.sessions.release(token);

        #[cfg(feature = "tracing")]
        tracing::info!(%token, "Print job completed");

        if close_surface {
            if let Some(surface) = job.tab_id {
                self.close_quietly(surface).await;
            }
        }
        true
    }

    /// Drops the job bound to a surface that was removed externally.
    ///
    /// At most one job is bound to a surface, so the scan stops at the first
    /// match.
    pub fn on_surface_removed(&self, surface: SurfaceId) -> Option<Token> {
        let token = {
            let mut jobs = self.jobs.lock();
            let token = jobs
                .iter()
                .find(|(_, job)| job.tab_id == Some(surface))
                .map(|(token, _)| token.clone())?;
            jobs.remove(&token);
            token
        };
        self.sessions.release(token.as_str());

        #[cfg(feature = "tracing")]
        tracing::info!(%token, %surface, "Surface removed, dropped print job");

        Some(token)
    }

    /// Removes jobs created at least `ttl_millis` ago and closes their
    /// surfaces.
    pub async fn reap_expired(&self, now: u64, ttl_millis: u64) -> Vec<Token> {
        let mut expired = Vec::new();
        self.jobs.lock().retain(|token, job| {
            let keep = now.saturating_sub(job.created_at) < ttl_millis;
            if !keep {
                expired.push((token.clone(), job.tab_id));
            }
            keep
        });

        let mut reaped = Vec::with_capacity(expired.len());
        for (token, surface) in expired {
            self.sessions.release(token.as_str());
            if let Some(surface) = surface {
                self.close_quietly(surface).await;
            }
            reaped.push(token);
        }
        reaped
    }

    pub fn job(&self, token: &str) -> Option<PrintJob> {
        self.jobs.lock().get(token).cloned()
    }

    pub fn len(&self) -> usize {
        self.jobs.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.jobs.lock().is_empty()
    }

    async fn close_quietly(&self, surface: SurfaceId) {
        if let Err(_e) = self.surfaces.close(surface).await {
            #[cfg(feature = "tracing")]
            tracing::warn!(%surface, "Failed to close surface: {_e}");
        }
    }
}

fn non_empty(value: Option<String>) -> Option<String> {
    value.filter(|v| !v.is_empty())
}

fn non_empty_str(value: &str) -> Option<String> {
    (!value.is_empty()).then(|| value.to_owned())
}
