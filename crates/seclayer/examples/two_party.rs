//! Runs a small convolution, ReLU and pooling network with one party per process.
//!
//! Start the server with `--party first` and the client with `--party second`. Both derive their
//! shares of a fixed demo input from a common seed, so the output is only a smoke test of the
//! operators, not a private evaluation.
//!
//! To view the logging output, set the environment variable `RUST_LOG` as specified
//! [here](https://docs.rs/tracing-subscriber/latest/tracing_subscriber/struct.EnvFilter.html).
use std::fs::File;
use std::io;
use std::path::PathBuf;

use anyhow::Result;
use clap::Parser;
use rand::SeedableRng;
use rand_chacha::ChaCha12Rng;
use tracing::info;
use tracing::level_filters::LevelFilter;
use tracing_subscriber::EnvFilter;

use seclayer::ops;
use seclayer::private_test_utils::{from_signed, share, to_signed};
use seclayer::reshape::{ConvParams, Padding, PoolParams};
use seclayer::session::connect_channels;
use seclayer::{BackendKind, Party, SessionConfig, SessionContext};

#[derive(Parser, Debug)]
struct Args {
    /// YAML session configuration. Command line options take precedence.
    #[clap(long)]
    config: Option<PathBuf>,
    #[clap(long, value_parser = parse_party)]
    party: Option<Party>,
    #[clap(long, value_parser = parse_backend)]
    backend: Option<BackendKind>,
    #[clap(long)]
    address: Option<String>,
    #[clap(long)]
    port: Option<u16>,
    #[clap(long)]
    threads: Option<usize>,
    #[clap(long)]
    verify: bool,
    /// Write the session report as JSON to this file.
    #[clap(long)]
    report: Option<PathBuf>,
}

fn parse_party(s: &str) -> Result<Party, String> {
    match s {
        "first" | "server" => Ok(Party::SERVER),
        "second" | "client" => Ok(Party::CLIENT),
        other => Err(format!("unknown party {other}")),
    }
}

fn parse_backend(s: &str) -> Result<BackendKind, String> {
    match s {
        "ring" => Ok(BackendKind::Ring),
        "field" => Ok(BackendKind::Field),
        "cheetah" => Ok(BackendKind::Cheetah),
        other => Err(format!("unknown backend {other}")),
    }
}

fn session_config(args: &Args) -> Result<SessionConfig> {
    let mut config = match &args.config {
        Some(path) => SessionConfig::from_file(path)?,
        None => SessionConfig::default(),
    };
    if let Some(party) = args.party {
        config.party = party;
    }
    if let Some(backend) = args.backend {
        config.backend = backend;
    }
    if let Some(address) = &args.address {
        config.address = address.clone();
    }
    if let Some(port) = args.port {
        config.port = port;
    }
    if let Some(threads) = args.threads {
        config.num_threads = threads;
    }
    config.verify |= args.verify;
    Ok(config)
}

fn own_share(party: Party, shares: (Vec<u64>, Vec<u64>)) -> Vec<u64> {
    match party {
        Party::SERVER => shares.0,
        Party::CLIENT => shares.1,
    }
}

async fn run(ctx: &mut SessionContext) -> Result<Vec<i64>> {
    let domain = *ctx.domain();
    let party = ctx.party();
    let mut rng = ChaCha12Rng::seed_from_u64(7);
    let conv = ConvParams {
        n: 1,
        h: 6,
        w: 6,
        ci: 1,
        fh: 3,
        fw: 3,
        co: 2,
        pad: Padding::uniform(1),
        stride_h: 1,
        stride_w: 1,
    };
    let image: Vec<i64> = (0..conv.input_len() as i64).map(|v| v % 7 - 3).collect();
    let input = own_share(party, share(&domain, &from_signed(&domain, &image), &mut rng));
    let filter = match party {
        Party::SERVER => from_signed(
            &domain,
            &[1, -1, 0, 2, 1, -2, 0, 1, 1, -1, 1, 0, 0, 1, 2, 1, -1, 1],
        ),
        Party::CLIENT => vec![0; conv.filter_len()],
    };

    let mut conv_out = vec![0; conv.output_len()];
    ops::conv2d_wrapper(ctx, &conv, &input, &filter, &mut conv_out).await?;
    let mut relu_out = vec![0; conv_out.len()];
    ops::relu(ctx, &conv_out, &mut relu_out, 0, false).await?;

    let pool = PoolParams {
        n: 1,
        img_h: conv.out_h(),
        img_w: conv.out_w(),
        c: conv.co,
        ksize_h: 2,
        ksize_w: 2,
        pad: Padding::default(),
        stride_h: 2,
        stride_w: 2,
    };
    let mut pooled = vec![0; pool.output_len()];
    ops::max_pool(ctx, &pool, &relu_out, &mut pooled).await?;
    let mut class = [0];
    ops::arg_max(ctx, 1, pooled.len(), &pooled, &mut class).await?;
    Ok(to_signed(&domain, &class))
}

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();
    let args = Args::parse();
    let config = session_config(&args)?;
    let channels = connect_channels(&config).await?;
    let mut ctx = SessionContext::start(config, channels).await?;
    let class_share = run(&mut ctx).await?;
    info!(?class_share, "Share of the predicted class");
    let report = ctx.end().await?;
    info!(
        total_time_ms = report.total_time_ms,
        mib_sent = report.comm.total_mib_sent(),
        "Finished"
    );
    if let Some(path) = args.report {
        serde_json::to_writer_pretty(File::create(path)?, &report)?;
    }
    Ok(())
}

fn init_tracing() {
    tracing_subscriber::fmt()
        .with_writer(io::stderr)
        .with_env_filter(
            EnvFilter::builder()
                .with_default_directive(LevelFilter::INFO.into())
                .from_env_lossy(),
        )
        .init();
}
