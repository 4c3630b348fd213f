use anyhow::bail;
use clap::Parser;
use core::time::Duration;
use courier::{DEFAULT_CHUNK_SIZE, ReapPolicy};
use std::path::PathBuf;
use url::Url;

/// Runtime configuration for the `courier-server` binary.
///
/// All values are parsed from CLI arguments or environment variables. TTLs of
/// `0` disable the corresponding reaping.
#[derive(Parser, Debug, Clone)]
#[command(
    name = "courier-server",
    version,
    about = "A JSON message endpoint for chunked uploads and print-job read-back"
)]
pub struct CliArgs {
    /// Address to listen on (TCP or Unix socket path; use --uds for Unix socket).
    ///
    /// Example: "127.0.0.1:7878" or "/tmp/courier.sock"
    ///
    /// Environment variable: `SERVER_ADDR`
    #[arg(long, env = "SERVER_ADDR", default_value_t = String::from("127.0.0.1:7878"))]
    pub server_addr: String,

    /// Listen on a Unix socket instead of TCP. If set, `SERVER_ADDR` must be a file path.
    #[arg(short, long, default_value_t = false)]
    pub uds: bool,

    /// Chunk size suggested to senders that do not ask for one, in bytes of
    /// chunk string. Also the default read-back slice length.
    ///
    /// Environment variable: `CHUNK_SIZE`
    #[arg(long, env = "CHUNK_SIZE", default_value_t = DEFAULT_CHUNK_SIZE)]
    pub chunk_size: usize,

    /// Seconds an upload session may sit without receiving a chunk before it
    /// is reaped. `0` keeps idle sessions forever.
    ///
    /// Environment variable: `SESSION_TTL_SECS`
    #[arg(long, env = "SESSION_TTL_SECS", default_value_t = 600)]
    pub session_ttl_secs: u64,

    /// Seconds a print job may live before it is reaped and its surface
    /// closed. `0` keeps jobs until they are completed.
    ///
    /// Environment variable: `JOB_TTL_SECS`
    #[arg(long, env = "JOB_TTL_SECS", default_value_t = 1800)]
    pub job_ttl_secs: u64,

    /// Seconds between reaper passes.
    ///
    /// Environment variable: `REAP_INTERVAL_SECS`
    #[arg(long, env = "REAP_INTERVAL_SECS", default_value_t = 30)]
    pub reap_interval_secs: u64,

    /// Upper bound on a single round trip to the rendering resource.
    ///
    /// Environment variable: `RENDER_TIMEOUT_MS`
    #[arg(long, env = "RENDER_TIMEOUT_MS", default_value_t = 30_000)]
    pub render_timeout_ms: u64,

    /// Seconds without a render request after which the rendering resource
    /// tears itself down. `0` keeps it alive until shutdown.
    ///
    /// Environment variable: `RENDER_IDLE_SECS`
    #[arg(long, env = "RENDER_IDLE_SECS", default_value_t = 300)]
    pub render_idle_secs: u64,

    /// Maximum number of cache entries before the oldest is evicted.
    ///
    /// Environment variable: `CACHE_MAX_ENTRIES`
    #[arg(long, env = "CACHE_MAX_ENTRIES", default_value_t = 512)]
    pub cache_max_entries: usize,

    /// Directory finalized downloads are written to. Created on demand.
    ///
    /// Environment variable: `DOWNLOAD_DIR`
    #[arg(long, env = "DOWNLOAD_DIR", default_value = "downloads")]
    pub download_dir: PathBuf,

    /// URL handed to consumer surfaces; the job token is appended as a query
    /// parameter.
    ///
    /// Environment variable: `SURFACE_BASE_URL`
    #[arg(long, env = "SURFACE_BASE_URL", default_value_t = String::from("http://127.0.0.1:7878/print"))]
    pub surface_base_url: String,

    /// Capacity of the host event channel feeding the reactor.
    ///
    /// Environment variable: `EVENT_BUFFER_SIZE`
    #[arg(long, env = "EVENT_BUFFER_SIZE", default_value_t = 64)]
    pub event_buffer_size: usize,

    /// Seconds to wait for background tasks during shutdown.
    ///
    /// Environment variable: `SHUTDOWN_TIMEOUT`
    #[arg(long, env = "SHUTDOWN_TIMEOUT", default_value_t = 3)]
    pub shutdown_timeout: u64,
}

#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub server_addr: String,
    pub uds: bool,
    pub chunk_size: usize,
    pub session_ttl: Option<Duration>,
    pub job_ttl: Option<Duration>,
    pub reap_interval: Duration,
    pub render_timeout: Duration,
    pub render_idle: Option<Duration>,
    pub cache_max_entries: usize,
    pub download_dir: PathBuf,
    pub surface_base_url: Url,
    pub event_buffer_size: usize,
    pub shutdown_timeout: Duration,
}

impl ServerConfig {
    pub const fn reap_policy(&self) -> ReapPolicy {
        ReapPolicy {
            session_ttl: self.session_ttl,
            job_ttl: self.job_ttl,
            interval: self.reap_interval,
        }
    }
}

impl TryFrom<CliArgs> for ServerConfig {
    type Error = anyhow::Error;

    fn try_from(args: CliArgs) -> Result<Self, Self::Error> {
        if args.chunk_size == 0 {
            bail!("CHUNK_SIZE must be greater than 0");
        }

        let session_ttl = secs_or_disabled(args.session_ttl_secs);
        let job_ttl = secs_or_disabled(args.job_ttl_secs);

        if (session_ttl.is_some() || job_ttl.is_some()) && args.reap_interval_secs == 0 {
            bail!("REAP_INTERVAL_SECS must be greater than 0 when a TTL is enabled");
        }

        if args.render_timeout_ms == 0 {
            bail!("RENDER_TIMEOUT_MS must be greater than 0");
        }

        if args.cache_max_entries == 0 {
            bail!("CACHE_MAX_ENTRIES must be greater than 0");
        }

        if args.event_buffer_size == 0 {
            bail!("EVENT_BUFFER_SIZE must be greater than 0");
        }

        let surface_base_url = match Url::parse(&args.surface_base_url) {
            Ok(url) if !url.cannot_be_a_base() => url,
            Ok(_) => bail!("SURFACE_BASE_URL must be a hierarchical URL"),
            Err(e) => bail!("SURFACE_BASE_URL is not a valid URL: {e}"),
        };

        Ok(Self {
            server_addr: args.server_addr,
            uds: args.uds,
            chunk_size: args.chunk_size,
            session_ttl,
            job_ttl,
            reap_interval: Duration::from_secs(args.reap_interval_secs.max(1)),
            render_timeout: Duration::from_millis(args.render_timeout_ms),
            render_idle: secs_or_disabled(args.render_idle_secs),
            cache_max_entries: args.cache_max_entries,
            download_dir: args.download_dir,
            surface_base_url,
            event_buffer_size: args.event_buffer_size,
            shutdown_timeout: Duration::from_secs(args.shutdown_timeout),
        })
    }
}

fn secs_or_disabled(secs: u64) -> Option<Duration> {
    (secs > 0).then(|| Duration::from_secs(secs))
}
