//! CLI entry point and transport wiring (spec §6 ambient CLI, C12).
//!
//! Grounded on `estuary-flow/crates/dekaf/src/main.rs`: a `clap::Parser`
//! CLI with `env` fallbacks, a `tokio::net::TcpListener` accept loop with
//! one `tokio::spawn`ed task per connection, a `tokio_util` cancellation
//! token raced against idle-timeout/next-frame reads via `tokio::select!`,
//! and a `tokio::sync::Semaphore` bounding concurrent connections.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use clap::Parser;
use tokio::io::AsyncWriteExt;
use tokio_util::codec::{FramedRead, LengthDelimitedCodec};

use salt_master_core::auth::MasterKeys;
use salt_master_core::config::MasterConfig;
use salt_master_core::publisher::RecordingTransport;
use salt_master_core::worker::{CommandRegistry, PingHandler};
use salt_master_core::{crypto, logging, metrics, null_sink, Master};

/// Authentication, request-routing, and publication core for a
/// minion-orchestration master.
#[derive(Debug, Parser)]
#[command(about, version)]
struct Cli {
    /// Directory holding the four minion key-state subdirectories.
    #[arg(long, default_value = "/etc/salt/pki/master", env = "PKI_DIR")]
    pki_dir: PathBuf,
    /// Accept every presented key without operator review.
    #[arg(long, env = "OPEN_MODE")]
    open_mode: bool,
    /// Automatically move every pending key to accepted.
    #[arg(long, env = "AUTO_ACCEPT")]
    auto_accept: bool,
    /// Maximum number of accepted minions; 0 means unlimited.
    #[arg(long, default_value = "0", env = "MAX_MINIONS")]
    max_minions: usize,
    /// Oldest envelope version this master will accept.
    #[arg(long, default_value = "3", env = "MINIMUM_AUTH_VERSION")]
    minimum_auth_version: u32,
    /// Sign every published message with the master's private key.
    #[arg(long, env = "SIGN_PUB_MESSAGES")]
    sign_pub_messages: bool,
    /// How long a v3+ request's timestamp may lag before it's rejected.
    #[arg(long, value_parser = humantime::parse_duration, default_value = "300s", env = "REQUEST_SERVER_TTL")]
    request_server_ttl: Duration,
    /// The port to listen on for minion request-server connections.
    #[arg(long, default_value = "4506", env = "REQUEST_SERVER_PORT")]
    request_server_port: u16,
    /// The port to listen on for Prometheus metrics.
    #[arg(long, default_value = "9094", env = "METRICS_PORT")]
    metrics_port: u16,
    /// Maximum number of concurrent request-server connections to accept.
    #[arg(long, default_value = "300", env = "MAX_CONNECTIONS")]
    max_connections: usize,
    /// How long an idle connection may go without a frame before it's closed.
    #[arg(long, value_parser = humantime::parse_duration, default_value = "120s", env = "IDLE_CONNECTION_TIMEOUT")]
    idle_connection_timeout: Duration,
}

impl Cli {
    fn into_config(self) -> MasterConfig {
        MasterConfig {
            pki_dir: self.pki_dir,
            open_mode: self.open_mode,
            auto_accept: self.auto_accept,
            max_minions: self.max_minions,
            minimum_auth_version: self.minimum_auth_version,
            sign_pub_messages: self.sign_pub_messages,
            request_server_ttl: self.request_server_ttl,
            max_connections: self.max_connections,
            ..Default::default()
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    logging::install();

    let cli = Cli::parse();
    let metrics_port = cli.metrics_port;
    let request_server_port = cli.request_server_port;
    let max_connections = cli.max_connections;
    let idle_connection_timeout = cli.idle_connection_timeout;
    let config = cli.into_config();

    tracing::info!(pki_dir = %config.pki_dir.display(), "starting master core");

    let (signing_private_key, signing_public_key) =
        crypto::generate_keypair().context("generating master signing key pair")?;
    let master_keys = MasterKeys::new(signing_private_key, signing_public_key, None)
        .context("building master key identity")?;

    // Execution modules are out of scope (spec §1); `test.ping` is the one
    // command wired up so a fresh deployment has something to answer.
    let registry = CommandRegistry::new().register("test.ping", Arc::new(PingHandler));

    // No concrete publish transport is specified in scope; a recording
    // transport stands in until a real pub/sub sidecar is wired in front
    // of `Master::publisher`.
    let transport = Arc::new(RecordingTransport::new(false));

    let master = Arc::new(
        Master::build(config, master_keys, registry, transport, null_sink())
            .context("building master component graph")?,
    );

    let metrics_handle = metrics::install_recorder();
    let metrics_router =
        metrics::build_router(metrics_handle, master.pool_router.clone(), master.vault.clone());
    let metrics_addr = format!("[::]:{metrics_port}").parse::<std::net::SocketAddr>()?;
    let metrics_listener = tokio::net::TcpListener::bind(metrics_addr)
        .await
        .context("binding metrics listener")?;
    tokio::spawn(async move {
        if let Err(e) = axum::serve(metrics_listener, metrics_router).await {
            tracing::error!(error = %e, "metrics server exited");
        }
    });

    let cancel_token = tokio_util::sync::CancellationToken::new();
    let ctrl_c_token = cancel_token.clone();
    tokio::spawn(async move {
        tokio::signal::ctrl_c().await.expect("failed to listen for CTRL-C");
        tracing::info!("received ctrl-c, initiating shutdown");
        ctrl_c_token.cancel();
    });

    let connection_limit = Arc::new(tokio::sync::Semaphore::new(max_connections));
    let request_listener = tokio::net::TcpListener::bind(format!("[::]:{request_server_port}"))
        .await
        .context("binding request-server listener")?;

    loop {
        tokio::select! {
            accept = request_listener.accept() => {
                let Ok((socket, addr)) = accept else { continue };
                let _ = socket.set_nodelay(true);
                let master = master.clone();
                let task_cancellation = cancel_token.child_token();
                let connection_limit = connection_limit.clone();
                tokio::spawn(serve(master, socket, addr, idle_connection_timeout, task_cancellation, connection_limit));
            }
            _ = cancel_token.cancelled() => break,
        }
    }

    tracing::info!("waiting up to 10s for in-flight work to drain");
    let _ = tokio::time::timeout(Duration::from_secs(10), async {
        match Arc::try_unwrap(master) {
            Ok(master) => master.shutdown().await,
            Err(master) => tracing::warn!(
                refs = Arc::strong_count(&master),
                "connections still hold a reference to the master at shutdown"
            ),
        }
    })
    .await;

    Ok(())
}

/// Serves one request-server connection: reads length-delimited msgpack
/// envelope frames, hands each to [`Master::handle_request`], and writes
/// the reply frame back, until the peer disconnects, the idle timeout
/// fires, or shutdown is signalled (spec §4.5, §5).
#[tracing::instrument(skip(master, socket, stop, connection_limit), fields(?addr))]
async fn serve(
    master: Arc<Master>,
    socket: tokio::net::TcpStream,
    addr: std::net::SocketAddr,
    idle_timeout: Duration,
    stop: tokio_util::sync::CancellationToken,
    connection_limit: Arc<tokio::sync::Semaphore>,
) {
    let permit = match connection_limit.try_acquire() {
        Ok(permit) => permit,
        Err(_) => {
            ::metrics::counter!(metrics::names::REJECTED_CONNECTIONS).increment(1);
            tracing::warn!("connection limit reached, rejecting connection");
            return;
        }
    };

    tracing::info!("accepted request-server connection");
    ::metrics::gauge!(metrics::names::ACTIVE_CONNECTIONS).increment(1.0);

    let (r, mut w) = socket.into_split();
    let mut framed = FramedRead::new(
        r,
        LengthDelimitedCodec::builder().big_endian().length_field_length(4).max_frame_length(1 << 24).new_codec(),
    );

    let result: anyhow::Result<()> = async {
        loop {
            tokio::select! {
                frame = read_frame(&mut framed) => {
                    let Some(bytes) = frame? else { return Ok(()) };
                    let now = std::time::SystemTime::now()
                        .duration_since(std::time::UNIX_EPOCH)
                        .unwrap_or_default()
                        .as_secs() as i64;
                    let reply = master.handle_request(&bytes, now).await;
                    write_frame(&mut w, &reply).await?;
                }
                _ = tokio::time::sleep(idle_timeout) => {
                    anyhow::bail!("timeout waiting for next request-server frame")
                }
                _ = stop.cancelled() => {
                    anyhow::bail!("signalled to stop")
                }
            }
        }
    }
    .await;

    ::metrics::gauge!(metrics::names::ACTIVE_CONNECTIONS).decrement(1.0);

    if let Err(e) = result {
        tracing::warn!(error = %e, "closing request-server connection");
    }
    let _ = w.shutdown().await;
    drop(permit);
}

async fn read_frame(
    framed: &mut FramedRead<tokio::net::tcp::OwnedReadHalf, LengthDelimitedCodec>,
) -> anyhow::Result<Option<Vec<u8>>> {
    use futures::TryStreamExt;
    match framed.try_next().await.context("reading next request-server frame")? {
        Some(bytes) => Ok(Some(bytes.to_vec())),
        None => Ok(None),
    }
}

async fn write_frame(w: &mut tokio::net::tcp::OwnedWriteHalf, payload: &[u8]) -> anyhow::Result<()> {
    let len = u32::try_from(payload.len()).context("reply frame too large to length-prefix")?;
    w.write_all(&len.to_be_bytes()).await?;
    w.write_all(payload).await?;
    Ok(())
}
