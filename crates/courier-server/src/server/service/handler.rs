//! The message handler.
//!
//! [`Coordinator`] is the context object owning every registry and
//! collaborator for the lifetime of the service. Each inbound [`Request`] is
//! dispatched to exactly one operation and answered with exactly one
//! [`Reply`]; errors are converted at this boundary and never propagate.
//!
//! ## Responsibilities
//!
//! - Own the session registry, print pipeline, resource controller, scroll
//!   positions and collaborators.
//! - Run the host event reactor and the TTL reaper in the background.
//! - Record request metrics.
//! - Stop background work on shutdown.

use crate::server::{
    collab::{FsDownloadSink, FsFileReader, MemoryCache},
    config::ServerConfig,
    render::WorkerResourceHost,
    surface::{LocalSurfaceHost, SurfaceInfo},
    telemetry::{
        increment_chunk_bytes, increment_jobs_completed, increment_jobs_started,
        increment_reaped, increment_request_errors, increment_requests,
        increment_sessions_opened, record_request_duration,
    },
};
use courier::{
    CacheOperation, Error, HostEvent, OpenOptions, OsTokenSource, PrintPipeline, Reply, Request,
    ResourceController, Result, ScrollPositions, SessionRegistry, StartOptions, SystemClock,
    TimeSource, TokenSource, parse_encoding, spawn_reactor, spawn_reaper,
};
use futures::future::join_all;
use parking_lot::Mutex;
use serde_json::Value;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;

pub type Pipeline = PrintPipeline<LocalSurfaceHost>;
pub type Resource = ResourceController<WorkerResourceHost>;

pub struct Coordinator {
    config: ServerConfig,
    pipeline: Arc<Pipeline>,
    resource: Arc<Resource>,
    scroll: ScrollPositions,
    cache: MemoryCache,
    files: FsFileReader,
    downloads: FsDownloadSink,
    events: mpsc::Sender<HostEvent>,
    shutdown: CancellationToken,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl Coordinator {
    /// Builds the coordinator and spawns its background tasks. Must be called
    /// within a Tokio runtime.
    pub fn new(config: ServerConfig) -> Self {
        Self::with_sources(config, Arc::new(OsTokenSource::new()), Arc::new(SystemClock))
    }

    pub fn with_sources(
        config: ServerConfig,
        tokens: Arc<dyn TokenSource>,
        clock: Arc<dyn TimeSource>,
    ) -> Self {
        let shutdown = CancellationToken::new();
        let (events, events_rx) = mpsc::channel(config.event_buffer_size);

        let sessions = Arc::new(SessionRegistry::new(config.chunk_size, tokens, clock));
        let surfaces = LocalSurfaceHost::new(config.surface_base_url.clone(), events.clone());
        let pipeline = Arc::new(PrintPipeline::new(sessions, surfaces));
        let resource = Arc::new(ResourceController::new(WorkerResourceHost::new(
            config.render_timeout,
            config.render_idle,
            events.clone(),
        )));

        let mut tasks = vec![spawn_reactor(
            Arc::clone(&pipeline),
            Arc::clone(&resource),
            events_rx,
            shutdown.clone(),
        )];
        if let Some(reaper) = spawn_reaper(
            Arc::clone(&pipeline),
            config.reap_policy(),
            shutdown.clone(),
            |report| increment_reaped(report.sessions.len() as u64, report.jobs.len() as u64),
        ) {
            tasks.push(reaper);
        }

        Self {
            cache: MemoryCache::new(config.cache_max_entries),
            files: FsFileReader,
            downloads: FsDownloadSink::new(config.download_dir.clone()),
            scroll: ScrollPositions::new(),
            config,
            pipeline,
            resource,
            events,
            shutdown,
            tasks: Mutex::new(tasks),
        }
    }

    pub fn pipeline(&self) -> &Arc<Pipeline> {
        &self.pipeline
    }

    pub fn resource(&self) -> &Arc<Resource> {
        &self.resource
    }

    pub fn sessions(&self) -> &Arc<SessionRegistry> {
        self.pipeline.sessions()
    }

    pub fn surfaces(&self) -> Vec<SurfaceInfo> {
        self.pipeline.surfaces().list()
    }

    /// Handles one request, recording metrics around it.
    #[cfg_attr(feature = "tracing", tracing::instrument(skip_all, fields(action = request.action())))]
    pub async fn handle(&self, request: Request) -> Reply {
        let start = std::time::Instant::now();
        let action = request.action();
        increment_requests();

        let reply = if self.shutdown.is_cancelled() {
            Reply::from(Error::ServiceShutdown)
        } else {
            self.dispatch(request).await.into()
        };

        if let Reply::Error { error: _error } = &reply {
            increment_request_errors(action);

            #[cfg(feature = "tracing")]
            tracing::debug!("Request failed: {_error}");
        }
        record_request_duration(action, start.elapsed().as_secs_f64() * 1_000.0);
        reply
    }

    async fn dispatch(&self, request: Request) -> Result<Reply> {
        let sessions = self.pipeline.sessions();

        match request {
            Request::OpenUploadSession {
                purpose,
                encoding,
                metadata,
                expected_size,
                chunk_size,
            } => {
                let encoding = parse_encoding(encoding.as_deref())?;
                let opened = sessions.open(
                    purpose,
                    OpenOptions {
                        chunk_size,
                        encoding,
                        metadata: metadata.unwrap_or_default(),
                        expected_size,
                    },
                );
                increment_sessions_opened();
                Ok(Reply::Opened {
                    token: opened.token,
                    chunk_size: opened.chunk_size,
                })
            }
            Request::AppendUploadChunk { token, chunk } => {
                let encoding = sessions
                    .inspect(&token, |session| session.encoding)
                    .ok_or(Error::SessionNotFound)?;
                let Value::String(chunk) = chunk else {
                    return Err(Error::InvalidChunk);
                };
                let bytes = encoding.accounted_bytes(&chunk);
                sessions.append_chunk(&token, chunk)?;
                increment_chunk_bytes(bytes);
                Ok(Reply::ok())
            }
            Request::FinalizeUploadSession { token } => {
                let finalized = sessions.finalize(&token)?;
                Ok(Reply::Finalized {
                    token: finalized.token,
                    purpose: finalized.purpose,
                    bytes: finalized.bytes,
                    encoding: finalized.encoding,
                })
            }
            Request::AbortUploadSession { token } => {
                sessions.abort(&token);
                Ok(Reply::ok())
            }
            Request::StartPrintJob {
                token,
                payload,
                source_tab_id,
            } => {
                let token = self
                    .pipeline
                    .start(
                        &token,
                        StartOptions {
                            title: payload.title,
                            filename: payload.filename,
                            source_tab_id,
                        },
                    )
                    .await?;
                increment_jobs_started();
                Ok(Reply::Started {
                    success: true,
                    token,
                })
            }
            Request::RequestPrintJob { token } => Ok(Reply::Job {
                success: true,
                payload: self.pipeline.request(&token)?,
            }),
            Request::FetchPrintChunk {
                token,
                offset,
                length,
            } => {
                let fetched = self.pipeline.fetch_chunk(&token, offset, length)?;
                Ok(Reply::Chunk {
                    success: true,
                    chunk: fetched.chunk,
                    next_offset: fetched.next_offset,
                })
            }
            Request::CompletePrintJob { token, close_tab } => {
                if self.pipeline.complete(&token, close_tab != Some(false)).await {
                    increment_jobs_completed();
                }
                Ok(Reply::ok())
            }
            Request::Render { payload } => {
                let response = self.resource.forward(Value::Object(payload)).await?;
                Ok(Reply::Raw(response))
            }
            Request::Cache {
                operation,
                key,
                value,
                data_type,
            } => self.cache_operation(operation, key, value, data_type),
            Request::ReadLocalFile { file_path, binary } => {
                let read = self
                    .files
                    .read(&file_path, binary.unwrap_or(false))
                    .await?;
                Ok(Reply::File {
                    content: read.content,
                    content_type: read.content_type.map(str::to_owned),
                })
            }
            Request::FinalizeDownload { token } => {
                let session = sessions.take_finalized(&token)?;
                let download = self.downloads.save(&session).await?;
                Ok(Reply::Download {
                    success: true,
                    download_id: download.id,
                })
            }
            Request::SaveScrollPosition { url, position } => {
                self.scroll.save(url, position);
                Ok(Reply::ok())
            }
            Request::GetScrollPosition { url } => Ok(Reply::Scroll {
                position: self.scroll.get(&url),
            }),
        }
    }

    fn cache_operation(
        &self,
        operation: CacheOperation,
        key: Option<String>,
        value: Option<Value>,
        data_type: Option<String>,
    ) -> Result<Reply> {
        let require_key = || key.clone().ok_or_else(|| Error::invalid_input("cache key is required"));

        match operation {
            CacheOperation::Get => Ok(Reply::CacheResult {
                result: self.cache.get(&require_key()?).unwrap_or(Value::Null),
            }),
            CacheOperation::Set => {
                let key = require_key()?;
                let value = value.ok_or_else(|| Error::invalid_input("cache value is required"))?;
                self.cache.set(key, value, data_type);
                Ok(Reply::ok())
            }
            CacheOperation::Clear => {
                self.cache.clear();
                Ok(Reply::ok())
            }
            CacheOperation::GetStats => {
                let stats = serde_json::to_value(self.cache.stats())
                    .map_err(|e| Error::collaborator("cache", e))?;
                Ok(Reply::CacheResult { result: stats })
            }
        }
    }

    /// Accepts a lifecycle signal reported by an external host.
    ///
    /// # Errors
    ///
    /// [`Error::ServiceShutdown`] once the reactor has stopped.
    pub async fn notify(&self, event: HostEvent) -> Result<()> {
        if let HostEvent::SurfaceRemoved(surface) = event {
            self.pipeline.surfaces().forget(surface);
        }
        self.events
            .send(event)
            .await
            .map_err(|_| Error::ServiceShutdown)
    }

    /// Stops background tasks and the rendering resource.
    ///
    /// Waits up to the configured shutdown timeout for each stage.
    pub async fn shutdown(&self) {
        #[cfg(feature = "tracing")]
        tracing::info!("Refusing new requests");
        self.shutdown.cancel();

        self.resource
            .host()
            .shutdown(self.config.shutdown_timeout)
            .await;

        let tasks = core::mem::take(&mut *self.tasks.lock());
        match timeout(self.config.shutdown_timeout, join_all(tasks)).await {
            Ok(_) => {
                #[cfg(feature = "tracing")]
                tracing::debug!("Background tasks stopped");
            }
            Err(_) => {
                #[cfg(feature = "tracing")]
                tracing::warn!("Background tasks did not stop in time");
            }
        }
    }
}
