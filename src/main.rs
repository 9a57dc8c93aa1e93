//! webgate binary: parse flags, load config, open the database, serve.

use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

use webgate::database::{Executor, SqliteExecutor};
use webgate::{App, Config, Server};

#[derive(Debug, Parser)]
#[command(name = "webgate")]
#[command(about = "Static files, CGI scripts and a table API over SQLite", long_about = None)]
struct Cli {
    /// TOML configuration file. Built-in defaults are used when omitted.
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Bind address, overrides `listen`.
    #[arg(short, long)]
    listen: Option<String>,

    /// Document root, overrides `document_root`.
    #[arg(short, long)]
    root: Option<PathBuf>,

    /// Log filter used when RUST_LOG is not set.
    #[arg(long, default_value = "webgate=info")]
    log_level: String,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| cli.log_level.as_str().into()))
        .with(tracing_subscriber::fmt::layer())
        .init();

    let mut config = match &cli.config {
        Some(path) => Config::load(path)?,
        None => Config::default(),
    };
    if let Some(listen) = cli.listen {
        config.listen = listen;
    }
    if let Some(root) = cli.root {
        config.document_root = root;
    }
    config.validate()?;
    let config = Arc::new(config);

    tracing::info!(
        listen = %config.listen,
        document_root = %config.document_root.display(),
        interpreter = %config.cgi.interpreter.display(),
        auth = config.auth.is_some(),
        "configuration loaded"
    );

    let database: Option<Arc<dyn Executor>> = match SqliteExecutor::open(&config.database.path) {
        Ok(executor) => {
            tracing::info!(path = %config.database.path.display(), "database opened");
            Some(Arc::new(executor))
        }
        Err(e) => {
            tracing::warn!(error = %e, "database unavailable, API requests will answer 503");
            None
        }
    };

    let app = Arc::new(App::new(Arc::clone(&config), database));
    let server = Server::bind(&config.listen).await?;
    server.run(app).await?;
    Ok(())
}
