//! コントロールの受信側。`/play_sound` `/set_volume` `/stop_sound` `/stop_all` を
//! ログ出力エンジンへ振り分ける

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use tokio_util::sync::CancellationToken;
use tracing::info;
use tracing_subscriber::EnvFilter;

use dancefloor::config::Config;
use dancefloor::control::{register_sound_engine, LoggingEngine};
use dancefloor::osc::{OscServer, Router};

#[derive(Parser, Debug)]
#[command(name = "sound_control", version, about = "Log inbound sound control messages")]
struct Args {
    #[arg(short, long, value_name = "FILE", default_value = "dancefloor.toml")]
    config: PathBuf,

    /// [osc] listen_addr を上書き
    #[arg(long)]
    listen: Option<SocketAddr>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();
    info!("Sound Control ({})", dancefloor::VERSION);

    let config = Config::load_or_default(&args.config);
    let addr = match args.listen {
        Some(addr) => addr,
        None => config
            .osc
            .listen_addr
            .parse()
            .with_context(|| format!("invalid listen_addr {}", config.osc.listen_addr))?,
    };

    let mut router = Router::new();
    register_sound_engine(&mut router, Arc::new(LoggingEngine))?;
    let mut server = OscServer::bind(addr)
        .await
        .with_context(|| format!("cannot listen on {}", addr))?;

    let cancel = CancellationToken::new();
    {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                cancel.cancel();
            }
        });
    }

    server.listen(Arc::new(router), cancel).await?;
    Ok(())
}
