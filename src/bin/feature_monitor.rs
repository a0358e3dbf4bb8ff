//! `dancefloor run` が送信する特徴量を表示する

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use rosc::OscMessage;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use tracing_subscriber::EnvFilter;

use dancefloor::config::Config;
use dancefloor::osc::message::{LEGACY_KEYPOINTS_ADDR, MOVEMENT_PATTERN, PERSON_COUNT_ADDR, PERSON_KEYPOINTS_PATTERN};
use dancefloor::osc::{Feature, OscServer, Router};

#[derive(Parser, Debug)]
#[command(name = "feature_monitor", version, about = "Log crowd features received over OSC")]
struct Args {
    #[arg(short, long, value_name = "FILE", default_value = "dancefloor.toml")]
    config: PathBuf,

    /// [osc] listen_addr を上書き
    #[arg(long)]
    listen: Option<SocketAddr>,

    /// キーポイントのメッセージもログに出す
    #[arg(long)]
    keypoints: bool,
}

fn log_feature(msg: &OscMessage) -> Result<()> {
    match Feature::from_message(msg) {
        Some(Feature::PersonCount(n)) => info!("person_count {}", n),
        Some(Feature::Movement { metric, value }) => info!("{} movement {:.4}", metric, value),
        Some(Feature::PersonKeypoints { person, values }) => {
            debug!("person {}: {} values", person, values.len())
        }
        Some(Feature::LegacyKeypoints(values)) => debug!("legacy keypoints: {} values", values.len()),
        None => anyhow::bail!("undecodable feature {:?}", msg.args),
    }
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    let default_filter = if args.keypoints { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter)))
        .init();
    info!("Feature Monitor ({})", dancefloor::VERSION);

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
    router.register(PERSON_COUNT_ADDR, log_feature)?;
    router.register(MOVEMENT_PATTERN, log_feature)?;
    if args.keypoints {
        router.register(PERSON_KEYPOINTS_PATTERN, log_feature)?;
        router.register(LEGACY_KEYPOINTS_ADDR, log_feature)?;
    }

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

    if let Err(e) = server.listen(Arc::new(router), cancel).await {
        warn!("Monitor stopped: {}", e);
        return Err(e.into());
    }
    Ok(())
}
