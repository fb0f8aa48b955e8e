pub mod backend;
pub mod cache;
pub mod compress;
pub mod config;
pub mod connection;
pub mod gateway;
pub mod health;
pub mod server;

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;

use gateway::{Dispatcher, GatewayContext};
use server::RpcHandler;

/// Return the platform-standard data directory for Switchboard.
///
/// - macOS: `~/Library/Application Support/switchboard/`
/// - Windows: `{FOLDERID_RoamingAppData}\switchboard\`
/// - Linux: `$XDG_DATA_HOME/switchboard/` (fallback `~/.local/share/...`)
///
/// Falls back to `~/.switchboard/` only if none of the above can be resolved.
pub fn data_dir() -> PathBuf {
    if let Some(dir) = dirs::data_dir() {
        return dir.join("switchboard");
    }
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".switchboard")
}

/// Initialize the tracing subscriber, writing structured logs to the data
/// directory. stdout is left alone for the stdio front end.
///
/// On each startup:
/// 1. Rotates existing logs (gateway.log → gateway.log.1 → .2 → .3, keeps last 3).
/// 2. Opens a fresh gateway.log with a line-flushing writer.
/// 3. Logs a startup banner with the data directory path.
pub fn init_tracing() {
    use tracing_subscriber::fmt;
    use tracing_subscriber::EnvFilter;

    let log_dir = data_dir();
    let _ = std::fs::create_dir_all(&log_dir);

    let log_path = log_dir.join("gateway.log");
    rotate_log_file(&log_path, 3);

    let log_file = std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(&log_path)
        .expect("failed to open gateway.log");

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("switchboard=info,warn"));

    fmt::fmt()
        .with_env_filter(filter)
        .with_writer(FlushingWriter::new(log_file))
        .with_ansi(false)
        .with_target(true)
        .with_thread_ids(false)
        .init();

    tracing::info!(
        version = env!("CARGO_PKG_VERSION"),
        data_dir = %log_dir.display(),
        log_file = %log_path.display(),
        pid = std::process::id(),
        "=== Switchboard starting ==="
    );
}

/// Rotate log files: `gateway.log` → `gateway.log.1` → `.2` → … → `.{keep}`.
///
/// Oldest file beyond `keep` is deleted. Missing files in the chain are skipped.
fn rotate_log_file(base_path: &std::path::Path, keep: u32) {
    let oldest = format!("{}.{keep}", base_path.display());
    let _ = std::fs::remove_file(&oldest);

    for i in (1..keep).rev() {
        let from = format!("{}.{i}", base_path.display());
        let to = format!("{}.{}", base_path.display(), i + 1);
        let _ = std::fs::rename(&from, &to);
    }

    if base_path.exists() {
        let to = format!("{}.1", base_path.display());
        let _ = std::fs::rename(base_path, &to);
    }
}

/// A writer that wraps `std::fs::File` and flushes after every write, so
/// each log line is on disk before a crash can lose it.
#[derive(Clone)]
struct FlushingWriter {
    file: Arc<std::sync::Mutex<std::fs::File>>,
}

impl FlushingWriter {
    fn new(file: std::fs::File) -> Self {
        Self {
            file: Arc::new(std::sync::Mutex::new(file)),
        }
    }
}

impl std::io::Write for FlushingWriter {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        let mut f = self
            .file
            .lock()
            .map_err(|e| std::io::Error::other(format!("lock poisoned: {e}")))?;
        let n = std::io::Write::write(&mut *f, buf)?;
        std::io::Write::flush(&mut *f)?;
        Ok(n)
    }

    fn flush(&mut self) -> std::io::Result<()> {
        let mut f = self
            .file
            .lock()
            .map_err(|e| std::io::Error::other(format!("lock poisoned: {e}")))?;
        std::io::Write::flush(&mut *f)
    }
}

impl<'a> tracing_subscriber::fmt::MakeWriter<'a> for FlushingWriter {
    type Writer = FlushingWriter;

    fn make_writer(&'a self) -> Self::Writer {
        self.clone()
    }
}

// ─── Launch ──────────────────────────────────────────────────────────────────

/// Command-line options: an optional config path and `--http`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LaunchOptions {
    pub config_path: Option<PathBuf>,
    pub http: bool,
}

impl LaunchOptions {
    pub fn from_args(args: impl IntoIterator<Item = String>) -> anyhow::Result<Self> {
        let mut options = Self::default();
        for arg in args {
            match arg.as_str() {
                "--http" => options.http = true,
                flag if flag.starts_with('-') => anyhow::bail!("unknown flag '{flag}'"),
                path => {
                    if options.config_path.is_some() {
                        anyhow::bail!("unexpected extra argument '{path}'");
                    }
                    options.config_path = Some(PathBuf::from(path));
                }
            }
        }
        Ok(options)
    }
}

/// Load config, connect backends, and serve until the front end stops.
pub async fn run(options: LaunchOptions) -> anyhow::Result<()> {
    let cwd = std::env::current_dir().context("cannot read working directory")?;
    let path = config::find_config_path(options.config_path.as_deref(), &cwd)?;
    let config = config::load_gateway_config(&path)
        .with_context(|| format!("failed to load config from {}", path.display()))?;

    tracing::info!(
        config = %path.display(),
        backends = config.backends.len(),
        mode = ?config.connection_mode,
        "configuration loaded"
    );

    let (host, port, attempts) = (
        config.listen_host.clone(),
        config.listen_port,
        config.port_retry_attempts,
    );

    let context = GatewayContext::from_config(config).await;
    for line in context.tools_overview().lines() {
        tracing::info!(target: "switchboard::startup", "{line}");
    }

    let handler = Arc::new(RpcHandler::new(Arc::new(Dispatcher::new(Arc::clone(&context)))));
    let served = if options.http {
        server::serve_http(handler, &host, port, attempts).await
    } else {
        server::serve_stdio(handler).await.context("stdio front end failed")
    };

    context.close().await;
    served
}
