use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use shelfsync_lib::{
    init_tracing, CurrentUser, MemoryCache, RealtimeSync, Role, Session, SseTransport, SyncConfig,
    SyncError, TokenPair,
};
use tracing::info;

const ENV_ACCESS_TOKEN: &str = "SHELFSYNC_ACCESS_TOKEN";
const ENV_REFRESH_TOKEN: &str = "SHELFSYNC_REFRESH_TOKEN";
const ENV_USER_ID: &str = "SHELFSYNC_USER_ID";
const ENV_USER_ROLE: &str = "SHELFSYNC_USER_ROLE";

#[tokio::main]
async fn main() {
    init_tracing();
    if let Err(error) = run().await {
        eprintln!("sync probe failed: {error}");
        std::process::exit(1);
    }
}

async fn run() -> Result<(), SyncError> {
    let mut duration: Option<Duration> = None;
    let mut env_file: Option<PathBuf> = None;

    let mut args = std::env::args().skip(1);
    while let Some(arg) = args.next() {
        if arg == "--help" || arg == "-h" {
            print_help();
            return Ok(());
        }

        if let Some(value) = arg.strip_prefix("--duration-secs=") {
            duration = Some(parse_duration(value)?);
            continue;
        }
        if arg == "--duration-secs" {
            let value = args
                .next()
                .ok_or_else(|| SyncError::Other("--duration-secs requires a value".into()))?;
            duration = Some(parse_duration(&value)?);
            continue;
        }

        if let Some(value) = arg.strip_prefix("--env-file=") {
            env_file = Some(PathBuf::from(value));
            continue;
        }
        if arg == "--env-file" {
            let value = args
                .next()
                .ok_or_else(|| SyncError::Other("--env-file requires a value".into()))?;
            env_file = Some(PathBuf::from(value));
            continue;
        }

        return Err(SyncError::Other(format!("unknown argument '{arg}'")));
    }

    // The file may also carry the token variables read below.
    if let Some(path) = &env_file {
        dotenvy::from_path(path).map_err(|e| {
            SyncError::Other(format!("failed to load {}: {e}", path.display()))
        })?;
    }
    let config = SyncConfig::from_env()?;
    let access = std::env::var(ENV_ACCESS_TOKEN)
        .map_err(|_| SyncError::Other(format!("{ENV_ACCESS_TOKEN} is not set")))?;
    let refresh = std::env::var(ENV_REFRESH_TOKEN).unwrap_or_default();
    let user = CurrentUser {
        id: std::env::var(ENV_USER_ID).unwrap_or_else(|_| "probe".to_string()),
        role: match std::env::var(ENV_USER_ROLE) {
            Ok(raw) => raw.parse::<Role>().map_err(SyncError::Other)?,
            Err(_) => Role::Member,
        },
    };

    let transport = Arc::new(SseTransport::new(&config)?);
    let cache = Arc::new(MemoryCache::new(config.stale_after()));
    let session = Session::new();
    let sync = RealtimeSync::init(&config, &session, transport, cache);
    session.sign_in(TokenPair::new(access, refresh), user);
    info!(endpoint = %config.endpoint(), "sync probe running");

    let mut status_rx = sync.channel().watch_status();
    let mut queue_rx = sync.notifications().watch();
    let deadline = async {
        match duration {
            Some(duration) => tokio::time::sleep(duration).await,
            None => std::future::pending::<()>().await,
        }
    };
    tokio::pin!(deadline);

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                info!("interrupted");
                break;
            }
            _ = &mut deadline => {
                info!("probe duration elapsed");
                break;
            }
            changed = status_rx.changed() => {
                if changed.is_err() {
                    break;
                }
                let status = status_rx.borrow_and_update().clone();
                info!(%status, "channel status");
            }
            changed = queue_rx.changed() => {
                if changed.is_err() {
                    break;
                }
                let view = queue_rx.borrow_and_update().clone();
                match view.current {
                    Some(current) => info!(
                        kind = current.kind.as_str(),
                        backlog = view.backlog_count,
                        "notification: {} - {}",
                        current.title,
                        current.message
                    ),
                    None => info!("notification queue idle"),
                }
            }
        }
    }

    sync.teardown();
    session.sign_out();
    Ok(())
}

fn parse_duration(value: &str) -> Result<Duration, SyncError> {
    let secs = value
        .trim()
        .parse::<u64>()
        .map_err(|e| SyncError::Other(format!("invalid --duration-secs value '{value}': {e}")))?;
    Ok(Duration::from_secs(secs))
}

fn print_help() {
    println!(
        "Usage: sync_probe [--duration-secs N] [--env-file PATH]\n\n\
         Connects to the push endpoint with {ENV_ACCESS_TOKEN} and logs channel\n\
         status and notifications until interrupted.\n\n\
         Environment:\n  \
         {ENV_ACCESS_TOKEN}   bearer token (required)\n  \
         {ENV_REFRESH_TOKEN}  refresh token (optional)\n  \
         {ENV_USER_ID}        user id for borrow-update filtering (default: probe)\n  \
         {ENV_USER_ROLE}      member | librarian | admin (default: member)\n  \
         SHELFSYNC_*             see SyncConfig for connection settings"
    );
}
