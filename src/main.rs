use anyhow::{Context, Result};
use renewscraper::{
    config::Config,
    error::PipelineError,
    export::ParquetSink,
    fetch::Fetcher,
    pipeline::{self, PipelineOutput},
    verify::{render, REFERENCE_SET},
};
use std::process::ExitCode;
use tracing::{error, info};
use tracing_subscriber::{fmt, EnvFilter};

fn main() -> ExitCode {
    // ─── 1) init logging ─────────────────────────────────────────────
    let env = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,renewscraper=info"));
    fmt::Subscriber::builder()
        .with_env_filter(env)
        .with_span_events(fmt::format::FmtSpan::CLOSE)
        .init();
    info!("startup");

    // ─── 2) load config ──────────────────────────────────────────────
    let config = match load_config() {
        Ok(c) => c,
        Err(e) => {
            error!("{:#}", e);
            eprintln!("error: {:#}", e);
            return ExitCode::from(2);
        }
    };

    // ─── 3) fetch → verify → export ──────────────────────────────────
    match run(&config) {
        Ok(output) => {
            println!("{}", render(&output.report));
            if output.report.all_passed() {
                ExitCode::SUCCESS
            } else {
                ExitCode::from(1)
            }
        }
        Err(e) => {
            let stage = e.stage();
            let e = anyhow::Error::from(e);
            error!(%stage, "{:#}", e);
            eprintln!("{} stage failed: {:#}", stage, e);
            ExitCode::from(2)
        }
    }
}

fn load_config() -> Result<Config> {
    match std::env::args().nth(1) {
        Some(path) => {
            info!(%path, "loading config");
            Config::load(&path)
        }
        None => Ok(Config::default()),
    }
    .context("loading configuration")
}

fn run(config: &Config) -> Result<PipelineOutput, PipelineError> {
    let fetcher = Fetcher::from_config(config)?;
    let output = pipeline::run(&fetcher, config, &REFERENCE_SET)?;

    let sink = ParquetSink::new(&config.output.dir);
    pipeline::export(&sink, &output)?;
    info!(dir = %config.output.dir.display(), "exported");
    Ok(output)
}
