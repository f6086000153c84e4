//! qtable server - builds the index if missing, then serves lookups
//!
//! Run-once entry point. The build gate looks for the direct index in the
//! data directory; if it is absent the index is built from the source
//! table before the socket is bound. There is no build-only mode.
//!
//! Usage:
//!   qtable-server [data-dir] [--socket /tmp/qtable.sock]
//!
//! Protocol:
//!   Request:  [4-byte length BE] [MessagePack payload]
//!   Response: [4-byte length BE] [MessagePack payload]

use std::io::{Read, Write};
use std::os::unix::net::{UnixListener, UnixStream};
use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;

use anyhow::Context;
use serde::{Deserialize, Serialize};
use tracing_subscriber::EnvFilter;

use qtable::storage::EngineStats;
use qtable::{ensure_index, BuildOutcome, IndexConfig, IndexError, LookupEngine, LookupResult};

static NEXT_CLIENT_ID: AtomicUsize = AtomicUsize::new(1);

const DEFAULT_DATA_DIR: &str = "data";
const DEFAULT_SOCKET: &str = "/tmp/qtable.sock";

/// Largest request frame accepted from a client.
const MAX_MESSAGE_SIZE: usize = 1024 * 1024;

// ============================================================================
// Wire Protocol Types
// ============================================================================

/// Request from client
#[derive(Debug, Deserialize)]
#[serde(tag = "cmd", rename_all = "camelCase")]
pub enum Request {
    Hello {
        #[serde(rename = "protocolVersion")]
        protocol_version: Option<u32>,
        #[serde(rename = "clientId")]
        client_id: Option<String>,
    },
    Lookup { key: WireKey },
    Stats,
    Ping,
    Shutdown,
}

/// Lookup key: a u32, or a string holding a decimal u32 or a `0x`-prefixed
/// hex u32.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum WireKey {
    Number(u32),
    Text(String),
}

impl WireKey {
    fn parse(&self) -> Result<u32, String> {
        match self {
            WireKey::Number(n) => Ok(*n),
            WireKey::Text(raw) => match raw.strip_prefix("0x").or_else(|| raw.strip_prefix("0X")) {
                Some(digits) => u32::from_str_radix(digits, 16)
                    .map_err(|_| format!("invalid hex key {:?}", raw)),
                None => raw
                    .parse::<u32>()
                    .map_err(|_| format!("invalid decimal key {:?}", raw)),
            },
        }
    }
}

/// Response to client
#[derive(Debug, Serialize)]
#[serde(untagged)]
pub enum Response {
    HelloOk {
        ok: bool,
        #[serde(rename = "protocolVersion")]
        protocol_version: u32,
        #[serde(rename = "serverVersion")]
        server_version: String,
    },
    Lookup { key: u32, result: LookupResult },
    Stats { stats: EngineStats },
    Pong { pong: bool, version: String },
    Ok { ok: bool },
    ErrorWithCode { error: String, code: String },
}

impl Response {
    fn error(err: &IndexError) -> Self {
        Response::ErrorWithCode {
            error: err.to_string(),
            code: err.code().to_string(),
        }
    }
}

/// Request envelope: captures requestId alongside the tagged Request.
#[derive(Deserialize)]
struct RequestEnvelope {
    #[serde(default, rename = "requestId")]
    request_id: Option<String>,
    #[serde(flatten)]
    request: Request,
}

/// Response envelope: wraps Response with optional requestId for echo-back.
#[derive(Serialize)]
struct ResponseEnvelope {
    #[serde(rename = "requestId", skip_serializing_if = "Option::is_none")]
    request_id: Option<String>,
    #[serde(flatten)]
    response: Response,
}

// ============================================================================
// Request Handling
// ============================================================================

fn handle_request(engine: &LookupEngine, request: Request) -> Response {
    match request {
        Request::Hello { protocol_version: _, client_id: _ } => Response::HelloOk {
            ok: true,
            protocol_version: 1,
            server_version: env!("CARGO_PKG_VERSION").to_string(),
        },

        Request::Lookup { key } => {
            let key = match key.parse() {
                Ok(key) => key,
                Err(error) => {
                    return Response::ErrorWithCode {
                        error,
                        code: "BAD_KEY".to_string(),
                    }
                }
            };
            match engine.lookup(key) {
                Ok(result) => Response::Lookup { key, result },
                Err(e) => {
                    tracing::error!("lookup of key {} failed: {}", key, e);
                    Response::error(&e)
                }
            }
        }

        Request::Stats => Response::Stats { stats: engine.stats() },

        Request::Ping => Response::Pong {
            pong: true,
            version: env!("CARGO_PKG_VERSION").to_string(),
        },

        // Handled by the caller after the reply is written.
        Request::Shutdown => Response::Ok { ok: true },
    }
}

// ============================================================================
// Client Connection Handler
// ============================================================================

fn read_message(stream: &mut UnixStream) -> std::io::Result<Option<Vec<u8>>> {
    // Read 4-byte length prefix (big-endian)
    let mut len_buf = [0u8; 4];
    match stream.read_exact(&mut len_buf) {
        Ok(()) => {}
        Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => return Ok(None),
        Err(e) => return Err(e),
    }

    let len = u32::from_be_bytes(len_buf) as usize;
    if len > MAX_MESSAGE_SIZE {
        return Err(std::io::Error::new(
            std::io::ErrorKind::InvalidData,
            format!("Message too large: {} bytes", len),
        ));
    }

    let mut buf = vec![0u8; len];
    stream.read_exact(&mut buf)?;

    Ok(Some(buf))
}

fn write_message(stream: &mut UnixStream, data: &[u8]) -> std::io::Result<()> {
    let len = data.len() as u32;
    stream.write_all(&len.to_be_bytes())?;
    stream.write_all(data)?;
    stream.flush()?;
    Ok(())
}

/// How a client connection ended.
#[derive(Debug, PartialEq, Eq)]
enum ClientExit {
    Disconnected,
    ShutdownRequested,
}

fn handle_client(mut stream: UnixStream, engine: &LookupEngine, client_id: usize) -> ClientExit {
    tracing::debug!("client {} connected", client_id);

    loop {
        let msg = match read_message(&mut stream) {
            Ok(Some(msg)) => msg,
            Ok(None) => {
                tracing::debug!("client {} disconnected", client_id);
                return ClientExit::Disconnected;
            }
            Err(e) => {
                tracing::warn!("client {} read error: {}", client_id, e);
                return ClientExit::Disconnected;
            }
        };

        let (request_id, response, is_shutdown) =
            match rmp_serde::from_slice::<RequestEnvelope>(&msg) {
                Ok(env) => {
                    let is_shutdown = matches!(env.request, Request::Shutdown);
                    (env.request_id, handle_request(engine, env.request), is_shutdown)
                }
                Err(e) => (
                    None,
                    Response::ErrorWithCode {
                        error: format!("Invalid request: {}", e),
                        code: "BAD_REQUEST".to_string(),
                    },
                    false,
                ),
            };

        let envelope = ResponseEnvelope { request_id, response };
        let resp_bytes = match rmp_serde::to_vec_named(&envelope) {
            Ok(bytes) => bytes,
            Err(e) => {
                tracing::error!("serialize error: {}", e);
                continue;
            }
        };

        if let Err(e) = write_message(&mut stream, &resp_bytes) {
            tracing::warn!("client {} write error: {}", client_id, e);
            return ClientExit::Disconnected;
        }

        if is_shutdown {
            tracing::info!("shutdown requested by client {}", client_id);
            return ClientExit::ShutdownRequested;
        }
    }
}

// ============================================================================
// Main
// ============================================================================

fn print_usage() {
    println!("Usage: qtable-server [data-dir] [--socket <socket-path>]");
    println!();
    println!("Arguments:");
    println!("  [data-dir]     Directory holding the source table and index files (default: {})", DEFAULT_DATA_DIR);
    println!("  --socket       Unix socket path (default: {})", DEFAULT_SOCKET);
    println!();
    println!("Flags:");
    println!("  -V, --version  Print version information");
    println!("  -h, --help     Print this help message");
}

fn main() -> anyhow::Result<()> {
    let args: Vec<String> = std::env::args().collect();

    if args.iter().any(|a| a == "--version" || a == "-V") {
        println!("qtable-server {}", env!("CARGO_PKG_VERSION"));
        return Ok(());
    }
    if args.iter().any(|a| a == "--help" || a == "-h") {
        println!("qtable-server {}", env!("CARGO_PKG_VERSION"));
        println!();
        print_usage();
        return Ok(());
    }

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let socket_pos = args.iter().position(|a| a == "--socket");
    let socket_path = socket_pos
        .and_then(|i| args.get(i + 1))
        .map(|s| s.as_str())
        .unwrap_or(DEFAULT_SOCKET)
        .to_string();

    let data_dir = args
        .iter()
        .enumerate()
        .skip(1)
        .find(|(i, a)| !a.starts_with("--") && socket_pos.map_or(true, |p| *i != p + 1))
        .map(|(_, a)| PathBuf::from(a))
        .unwrap_or_else(|| PathBuf::from(DEFAULT_DATA_DIR));

    tracing::info!("starting qtable-server v{}", env!("CARGO_PKG_VERSION"));

    let config = IndexConfig::load(&data_dir)
        .with_context(|| format!("reading config from {}", data_dir.display()))?;

    // Build phase: must finish before any lookup is served.
    match ensure_index(&data_dir, &config).context("building index")? {
        BuildOutcome::Built(report) => {
            if report.dropped_bytes > 0 {
                tracing::warn!("{} trailing source bytes were not indexed", report.dropped_bytes);
            }
        }
        BuildOutcome::Skipped => {}
    }

    // Serve phase: the index files are immutable from here on.
    let engine = Arc::new(LookupEngine::open(&data_dir, &config).context("opening index")?);

    let _ = std::fs::remove_file(&socket_path);
    let listener = UnixListener::bind(&socket_path)
        .with_context(|| format!("binding {}", socket_path))?;
    tracing::info!("listening on {}", socket_path);

    let socket_path_for_signal = socket_path.clone();
    let mut signals = signal_hook::iterator::Signals::new([
        signal_hook::consts::SIGINT,
        signal_hook::consts::SIGTERM,
    ])
    .context("registering signal handlers")?;

    thread::spawn(move || {
        if let Some(sig) = signals.forever().next() {
            tracing::info!("received signal {}, exiting", sig);
            let _ = std::fs::remove_file(&socket_path_for_signal);
            std::process::exit(0);
        }
    });

    for stream in listener.incoming() {
        match stream {
            Ok(stream) => {
                let client_id = NEXT_CLIENT_ID.fetch_add(1, Ordering::SeqCst);
                let engine = Arc::clone(&engine);
                let socket_path = socket_path.clone();
                thread::spawn(move || {
                    if handle_client(stream, &engine, client_id) == ClientExit::ShutdownRequested {
                        let _ = std::fs::remove_file(&socket_path);
                        std::process::exit(0);
                    }
                });
            }
            Err(e) => {
                tracing::warn!("accept error: {}", e);
            }
        }
    }

    Ok(())
}

// ============================================================================
// Tests
// ============================================================================
