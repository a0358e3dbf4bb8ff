use std::fs::File;
use std::io::{self, BufRead, BufReader, Write};
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use dancefloor::config::Config;
use dancefloor::control::{register_sound_engine, LoggingEngine};
use dancefloor::osc::{OscPublisher, OscServer, Router};
use dancefloor::pipeline::{Pipeline, PipelineStats};
use dancefloor::signal::{ExportFormat, Table};

#[derive(Parser, Debug)]
#[command(name = "dancefloor", version, about = "Crowd movement features from pose keypoints, over OSC")]
struct Cli {
    /// TOML 設定ファイル (なければデフォルト)
    #[arg(short, long, value_name = "FILE", default_value = "dancefloor.toml")]
    config: PathBuf,

    /// RUST_LOG 未設定時のログフィルタ
    #[arg(long, default_value = "info")]
    log_level: String,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// 検出フィードから群衆の特徴量を送信する
    Run {
        /// JSON-lines 検出フィード。`-` で標準入力
        #[arg(short, long, default_value = "-")]
        input: String,
        /// [osc] target_addr を上書き
        #[arg(long)]
        target: Option<String>,
        /// [osc] listen_addr でコントロール受信も行う
        #[arg(long)]
        listen: bool,
        /// 毎秒このフレーム数で再生する
        #[arg(long)]
        fps: Option<f32>,
        /// フィード終了時にポーズテーブルを書き出す
        #[arg(long, value_name = "FILE")]
        export: Option<PathBuf>,
        #[arg(long, default_value = "wide")]
        format: ExportFormat,
    },
    /// 検出フィードを CSV ポーズテーブルに変換する
    Export {
        #[arg(short, long, default_value = "-")]
        input: String,
        #[arg(long, default_value = "wide")]
        format: ExportFormat,
        /// 出力ファイル。省略時は標準出力
        #[arg(short, long, value_name = "FILE")]
        output: Option<PathBuf>,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&cli.log_level));
    tracing_subscriber::fmt().with_env_filter(filter).with_target(false).init();

    info!("dancefloor ({})", dancefloor::VERSION);
    let config = Config::load_or_default(&cli.config);

    match cli.command {
        Command::Run {
            input,
            target,
            listen,
            fps,
            export,
            format,
        } => {
            let runtime = tokio::runtime::Runtime::new()?;
            let result = runtime.block_on(run(config, input, target, listen, fps, export.map(|p| (p, format))));
            // Ctrl-C 後も標準入力の読み取りスレッドがブロックしうる
            runtime.shutdown_timeout(Duration::from_secs(1));
            result
        }
        Command::Export { input, format, output } => {
            let mut pipeline = Pipeline::new(&config, None);
            let stats = pipeline_task(&mut pipeline, input, None, CancellationToken::new())
                .context("failed to replay detection feed")?;
            info!("{} frames, {} rejected", stats.frames, stats.rejected);
            let table = pipeline.shared().as_table(format, config.export.one_based_idx);
            write_table(&table, output.as_deref())
        }
    }
}

async fn run(
    config: Config,
    input: String,
    target: Option<String>,
    listen: bool,
    fps: Option<f32>,
    export: Option<(PathBuf, ExportFormat)>,
) -> Result<()> {
    let cancel = CancellationToken::new();
    {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                info!("Ctrl-C received, shutting down");
                cancel.cancel();
            }
        });
    }

    let listener = if listen {
        let addr: SocketAddr = config
            .osc
            .listen_addr
            .parse()
            .with_context(|| format!("invalid listen_addr {}", config.osc.listen_addr))?;
        let mut router = Router::new();
        register_sound_engine(&mut router, Arc::new(LoggingEngine))?;
        let mut server = OscServer::bind(addr)
            .await
            .with_context(|| format!("cannot listen on {}", addr))?;
        let cancel = cancel.clone();
        Some(tokio::spawn(async move { server.listen(Arc::new(router), cancel).await }))
    } else {
        None
    };

    let target = target.unwrap_or_else(|| config.osc.target_addr.clone());
    let publisher = OscPublisher::new(&target)?;
    info!("Publishing features to {}", publisher.target());

    let interval = match fps {
        Some(f) if f > 0.0 => Some(Duration::from_secs_f32(1.0 / f)),
        Some(f) => bail!("--fps must be positive, got {}", f),
        None => None,
    };

    let mut pipeline = Pipeline::new(&config, Some(publisher));
    let shared = pipeline.shared();
    let feed = {
        let cancel = cancel.clone();
        tokio::task::spawn_blocking(move || pipeline_task(&mut pipeline, input, interval, cancel))
    };

    let stats = tokio::select! {
        joined = feed => Some(joined.context("feed task panicked")??),
        _ = cancel.cancelled() => None,
    };
    match &stats {
        Some(stats) => info!(
            "Feed done: {} frames, {} observations, {} rejected, {} undefined diffs, {} evicted",
            stats.frames, stats.observations, stats.rejected, stats.undefined_diffs, stats.evicted
        ),
        None => warn!("Stopped before the feed ended"),
    }
    if let Some(snapshot) = shared.snapshot() {
        info!(
            "Last frame {}: {} dancing, movement {:.4}",
            snapshot.frame,
            snapshot.person_count,
            snapshot.aggregate_movement()
        );
    }

    if let Some((path, format)) = export {
        write_table(&shared.as_table(format, config.export.one_based_idx), Some(&path))?;
        info!("Wrote {}", path.display());
    }

    cancel.cancel();
    if let Some(task) = listener {
        if let Err(e) = task.await.context("listener task panicked")? {
            error!("Listener failed: {}", e);
            return Err(e.into());
        }
    }
    Ok(())
}

fn pipeline_task(
    pipeline: &mut Pipeline,
    input: String,
    interval: Option<Duration>,
    cancel: CancellationToken,
) -> Result<PipelineStats> {
    let reader = open_input(&input)?;
    pipeline.run_feed(reader, interval, &cancel)
}

fn open_input(input: &str) -> Result<Box<dyn BufRead + Send>> {
    if input == "-" {
        info!("Reading detections from stdin");
        return Ok(Box::new(BufReader::new(io::stdin())));
    }
    let file = File::open(input).with_context(|| format!("failed to open {}", input))?;
    Ok(Box::new(BufReader::new(file)))
}

fn write_table(table: &Table, output: Option<&Path>) -> Result<()> {
    match output {
        Some(path) => {
            let file = File::create(path).with_context(|| format!("failed to create {}", path.display()))?;
            table.write_csv(file)
        }
        None => {
            let stdout = io::stdout();
            let mut lock = stdout.lock();
            table.write_csv(&mut lock)?;
            lock.flush()?;
            Ok(())
        }
    }
}
