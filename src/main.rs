use std::path::PathBuf;
use std::sync::Arc;

use clap::{ArgAction, Args, Parser, Subcommand};
use tokio::net::TcpListener;
use tokio::sync::Semaphore;
use tracing::info;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use rentdesk::backup;
use rentdesk::owner::OwnerManager;
use rentdesk::store::FileStore;
use rentdesk::wire;

/// rentdesk - car rental bookings over the PostgreSQL wire protocol
///
/// Owners connect with any PostgreSQL client using their database name as the
/// account; customers book through `postgres://public:<password>@host/<owner>`.
#[derive(Debug, Parser)]
#[command(name = "rentdesk")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
struct Cli {
    /// Directory holding one sub-directory of tables per owner
    #[arg(long, env = "RENTDESK_DATA_DIR", default_value = "./data", global = true)]
    data_dir: PathBuf,

    /// Directory for JSON backups
    #[arg(long, env = "RENTDESK_BACKUP_DIR", default_value = "./backups", global = true)]
    backup_dir: PathBuf,

    /// Increase verbosity (-v for debug, -vv for trace)
    #[arg(short, long, action = ArgAction::Count, global = true)]
    verbose: u8,

    #[command(flatten)]
    serve: ServeArgs,

    /// Defaults to `serve`
    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Debug, Args)]
struct ServeArgs {
    #[arg(long, env = "RENTDESK_BIND", default_value = "0.0.0.0")]
    bind: String,

    #[arg(long, env = "RENTDESK_PORT", default_value_t = 5433)]
    port: u16,

    /// Password of the shared `public` booking login
    #[arg(long, env = "RENTDESK_PUBLIC_PASSWORD", default_value = "public", hide_env_values = true)]
    public_password: String,

    #[arg(long, env = "RENTDESK_MAX_CONNECTIONS", default_value_t = 256)]
    max_connections: usize,

    /// Serve Prometheus metrics on this port
    #[arg(long, env = "RENTDESK_METRICS_PORT")]
    metrics_port: Option<u16>,

    #[arg(long, env = "RENTDESK_TLS_CERT", value_name = "FILE")]
    tls_cert: Option<String>,

    #[arg(long, env = "RENTDESK_TLS_KEY", value_name = "FILE")]
    tls_key: Option<String>,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Accept client connections (default)
    Serve,
    /// Write JSON backups of owner records
    Backup {
        /// Only this owner; every owner when omitted
        #[arg(long)]
        owner: Option<String>,
    },
    /// Restore an `<owner>_backup_<stamp>.json` file (server must be stopped)
    Restore { file: PathBuf },
    /// List backup files
    ListBackups,
}

fn init_logging(verbose: u8) {
    let level = match verbose {
        0 => "info",
        1 => "debug",
        _ => "trace",
    };
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("rentdesk={level}")));
    let _ = tracing_subscriber::registry()
        .with(env_filter)
        .with(fmt::layer().with_target(true))
        .try_init();
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    match cli.command.unwrap_or(Command::Serve) {
        Command::Serve => serve(cli.serve, cli.data_dir).await,
        Command::Backup { owner } => {
            let store = FileStore::open(&cli.data_dir)?;
            let written = backup::backup(&store, &cli.backup_dir, owner.as_deref(), &backup::timestamp())?;
            if written.is_empty() {
                println!("nothing to back up");
            }
            for path in written {
                println!("{}", path.display());
            }
            Ok(())
        }
        Command::Restore { file } => {
            let store = FileStore::open(&cli.data_dir)?;
            let restored = backup::restore(&store, &file)?;
            println!(
                "restored {}: {} cars, {} bookings, {} expenses, {} logins",
                restored.owner, restored.cars, restored.bookings, restored.expenses, restored.users
            );
            Ok(())
        }
        Command::ListBackups => {
            let files = backup::list_backups(&cli.backup_dir)?;
            if files.is_empty() {
                println!("no backup files in {}", cli.backup_dir.display());
            }
            for (i, path) in files.iter().enumerate() {
                let name = path.file_name().unwrap_or_default().to_string_lossy();
                println!("{}. {name}", i + 1);
            }
            Ok(())
        }
    }
}

async fn serve(args: ServeArgs, data_dir: PathBuf) -> Result<(), Box<dyn std::error::Error>> {
    rentdesk::observability::init(args.metrics_port)?;
    let tls_acceptor =
        rentdesk::tls::load_tls_acceptor(args.tls_cert.as_deref(), args.tls_key.as_deref())?;

    let store = Arc::new(FileStore::open(&data_dir)?);
    let owners = Arc::new(OwnerManager::new(store));
    let max_connections = args.max_connections;
    let semaphore = Arc::new(Semaphore::new(max_connections));

    let addr = format!("{}:{}", args.bind, args.port);
    let listener = TcpListener::bind(&addr).await?;
    info!("rentdesk listening on {addr}");
    info!("  data_dir: {}", data_dir.display());
    info!("  max_connections: {max_connections}");
    info!("  tls: {}", if tls_acceptor.is_some() { "enabled" } else { "disabled" });
    info!("  metrics: {}", args.metrics_port.map_or("disabled".to_string(), |p| format!("http://0.0.0.0:{p}/metrics")));
    info!("  public booking link: postgres://public:<password>@<host>:{}/<owner>", args.port);

    // Graceful shutdown: stop accepting on SIGTERM/ctrl-c, drain in-flight connections
    let shutdown = async {
        let ctrl_c = tokio::signal::ctrl_c();
        #[cfg(unix)]
        {
            match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
                Ok(mut sigterm) => {
                    tokio::select! {
                        _ = ctrl_c => {}
                        _ = sigterm.recv() => {}
                    }
                }
                Err(e) => {
                    tracing::warn!("cannot listen for SIGTERM: {e}");
                    ctrl_c.await.ok();
                }
            }
        }
        #[cfg(not(unix))]
        {
            ctrl_c.await.ok();
        }
    };
    tokio::pin!(shutdown);

    loop {
        tokio::select! {
            result = listener.accept() => {
                let (socket, peer) = match result {
                    Ok(conn) => conn,
                    Err(e) => {
                        tracing::error!("accept error: {e}");
                        continue;
                    }
                };

                let permit = match semaphore.clone().try_acquire_owned() {
                    Ok(permit) => permit,
                    Err(_) => {
                        tracing::warn!("connection limit reached, rejecting {peer}");
                        metrics::counter!(rentdesk::observability::CONNECTIONS_REJECTED_TOTAL).increment(1);
                        drop(socket);
                        continue;
                    }
                };

                info!("connection from {peer}");
                metrics::counter!(rentdesk::observability::CONNECTIONS_TOTAL).increment(1);
                metrics::gauge!(rentdesk::observability::CONNECTIONS_ACTIVE).increment(1.0);
                let owners = owners.clone();
                let password = args.public_password.clone();
                let tls = tls_acceptor.clone();

                tokio::spawn(async move {
                    let _permit = permit; // held until connection closes
                    if let Err(e) = wire::process_connection(socket, owners, password, tls).await {
                        tracing::error!("connection error from {peer}: {e}");
                    }
                    metrics::gauge!(rentdesk::observability::CONNECTIONS_ACTIVE).decrement(1.0);
                });
            }
            _ = &mut shutdown => {
                info!("shutdown signal received, stopping accept loop");
                break;
            }
        }
    }

    // Wait for in-flight connections to finish (up to 10s)
    info!("draining connections...");
    let drain_deadline = tokio::time::sleep(std::time::Duration::from_secs(10));
    tokio::pin!(drain_deadline);

    loop {
        if semaphore.available_permits() == max_connections {
            info!("all connections drained");
            break;
        }
        tokio::select! {
            _ = &mut drain_deadline => {
                let remaining = max_connections - semaphore.available_permits();
                tracing::warn!("drain timeout, {remaining} connections still open");
                break;
            }
            _ = tokio::time::sleep(std::time::Duration::from_millis(100)) => {}
        }
    }

    info!("rentdesk stopped");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn cli_is_well_formed() {
        Cli::command().debug_assert();
    }

    #[test]
    fn no_subcommand_means_serve() {
        let cli = Cli::try_parse_from(["rentdesk", "--port", "6000"]).unwrap();
        assert!(cli.command.is_none());
        assert_eq!(cli.serve.port, 6000);
    }

    #[test]
    fn backup_takes_owner() {
        let cli = Cli::try_parse_from(["rentdesk", "backup", "--owner", "acme"]).unwrap();
        match cli.command {
            Some(Command::Backup { owner }) => assert_eq!(owner.as_deref(), Some("acme")),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn restore_needs_file() {
        assert!(Cli::try_parse_from(["rentdesk", "restore"]).is_err());
    }
}
