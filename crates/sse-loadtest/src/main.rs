/// SSE push-channel load test
///
/// Usage:
///   sse-loadtest run                  Full run: ramp up, hold, tear down, report
///   sse-loadtest run --json           Same, report printed as JSON
///   sse-loadtest sample               Read the server's telemetry gauges once
///   sse-loadtest token [identity]     Issue one credential and show it
///
/// Settings come from an optional TOML file (`--config`), overridden by
/// flags and `SSE_LOADTEST_*` environment variables.
use std::path::PathBuf;

use clap::{Parser, Subcommand};
use tracing::{info, warn};

use sse_loadtest::auth::Authenticator;
use sse_loadtest::config::{AuthMode, CredentialScope};
use sse_loadtest::orchestrator::http_client;
use sse_loadtest::sampler::ServerMetricsSampler;
use sse_loadtest::{Grade, HarnessConfig, TestRun};

// ── CLI ──────────────────────────────────────────────────────

#[derive(Parser)]
#[command(name = "sse-loadtest", about = "Load test for server-push notification channels", version)]
struct Args {
    #[command(subcommand)]
    command: Command,

    /// TOML configuration file
    #[arg(short, long, global = true, env = "SSE_LOADTEST_CONFIG")]
    config: Option<PathBuf>,

    /// Target base URL (overrides the config file)
    #[arg(short, long, global = true, env = "SSE_LOADTEST_URL")]
    url: Option<String>,
}

#[derive(Subcommand)]
enum Command {
    /// Run the full load test and print the report
    Run(RunArgs),
    /// Read the server's telemetry gauges once
    Sample,
    /// Issue one credential for an identity
    Token {
        /// Identity id substituted into the issuance path
        #[arg(default_value = "1")]
        identity: u64,
    },
}

#[derive(clap::Args)]
struct RunArgs {
    /// Total connections to open
    #[arg(short = 'n', long, env = "SSE_LOADTEST_CONNECTIONS")]
    connections: Option<u64>,

    /// Connections launched per batch
    #[arg(short, long, env = "SSE_LOADTEST_BATCH_SIZE")]
    batch_size: Option<u64>,

    /// Pause between batches, milliseconds
    #[arg(long, env = "SSE_LOADTEST_BATCH_DELAY_MS")]
    batch_delay_ms: Option<u64>,

    /// Test duration in seconds, from the start of ramp-up
    #[arg(short, long, env = "SSE_LOADTEST_DURATION")]
    duration: Option<u64>,

    /// Per-connection lifetime limit in seconds
    #[arg(long, env = "SSE_LOADTEST_IDLE_TIMEOUT")]
    idle_timeout: Option<u64>,

    /// Credential mode
    #[arg(long, value_enum, env = "SSE_LOADTEST_AUTH")]
    auth: Option<AuthMode>,

    /// Credential sharing policy
    #[arg(long, value_enum, env = "SSE_LOADTEST_SCOPE")]
    scope: Option<CredentialScope>,

    /// Skip the health check before ramp-up
    #[arg(long)]
    no_health_check: bool,

    /// Do not sample server telemetry
    #[arg(long)]
    no_telemetry: bool,

    /// End the hold phase early once every connection has finished
    #[arg(long)]
    stop_when_settled: bool,

    /// Print the report as JSON
    #[arg(long)]
    json: bool,
}

impl RunArgs {
    fn apply(&self, config: &mut HarnessConfig) {
        if let Some(n) = self.connections {
            config.load.connections = n;
        }
        if let Some(n) = self.batch_size {
            config.load.batch_size = n;
        }
        if let Some(ms) = self.batch_delay_ms {
            config.load.batch_delay_ms = ms;
        }
        if let Some(secs) = self.duration {
            config.load.duration_ms = secs.saturating_mul(1000);
        }
        if let Some(secs) = self.idle_timeout {
            config.load.idle_timeout_ms = secs.saturating_mul(1000);
        }
        if let Some(mode) = self.auth {
            config.auth.mode = mode;
        }
        if let Some(scope) = self.scope {
            config.auth.scope = scope;
        }
        if self.no_health_check {
            config.target.health_check = false;
        }
        if self.no_telemetry {
            config.telemetry.enabled = false;
        }
        if self.stop_when_settled {
            config.load.stop_when_settled = true;
        }
    }
}

fn load_config(args: &Args) -> anyhow::Result<HarnessConfig> {
    let mut config = match &args.config {
        Some(path) => {
            let config = HarnessConfig::load(path)?;
            info!(path = %path.display(), "loaded configuration");
            config
        }
        None => HarnessConfig::default(),
    };
    if let Some(url) = &args.url {
        config.target.base_url = url.clone();
    }
    Ok(config)
}

// ── Subcommands ──────────────────────────────────────────────

async fn run(mut config: HarnessConfig, run_args: &RunArgs) -> anyhow::Result<()> {
    run_args.apply(&mut config);
    let test = TestRun::new(config)?;

    let shutdown = test.shutdown_token();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Ctrl-C received, tearing down");
            shutdown.cancel();
        }
    });

    let report = test.execute().await?;

    if run_args.json {
        println!("{}", report.to_json()?);
    } else {
        println!();
        print!("{report}");
    }

    if report.grade == Grade::NeedsImprovement {
        std::process::exit(1);
    }
    Ok(())
}

async fn sample(config: HarnessConfig) -> anyhow::Result<()> {
    config.validate()?;
    let sampler = ServerMetricsSampler::new(http_client()?, &config);
    let sample = sampler.sample().await?;

    let show = |v: Option<f64>| v.map_or_else(|| "-".to_string(), |v| format!("{v:.0}"));
    println!("Server telemetry ({})", config.target.base_url);
    println!("══════════════════════════════");
    println!("  Active connections:  {}", show(sample.active_connections));
    println!(
        "  Memory used (MB):    {}",
        show(sample.memory_used_bytes.map(|b| b / (1024.0 * 1024.0)))
    );
    println!("  Notifications sent:  {}", show(sample.notifications_sent));
    Ok(())
}

async fn token(config: HarnessConfig, identity: u64) -> anyhow::Result<()> {
    config.validate()?;
    let auth = Authenticator::new(http_client()?, config.target.base_url.clone(), config.auth.clone());
    let credential = auth.obtain(identity).await?;
    let (header, value) = credential.token.header();
    let shown: String = value.chars().take(48).collect();

    println!("Credential");
    println!("══════════════════════════════");
    println!("  Identity:  {}", credential.identity);
    println!("  Kind:      {}", credential.token.kind());
    println!("  Header:    {header}: {shown}...");
    match credential.expires_at {
        Some(expires) => println!(
            "  Expires:   in {}s",
            expires.saturating_duration_since(credential.issued_at).as_secs()
        ),
        None => println!("  Expires:   not tracked (per-connection scope)"),
    }
    Ok(())
}

// ── Main ─────────────────────────────────────────────────────

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();
    let config = load_config(&args)?;

    info!(
        version = env!("CARGO_PKG_VERSION"),
        build = sse_protocol::GIT_HASH,
        built = sse_protocol::BUILD_TIME,
        "sse-loadtest starting"
    );

    match &args.command {
        Command::Run(run_args) => run(config, run_args).await?,
        Command::Sample => sample(config).await?,
        Command::Token { identity } => token(config, *identity).await?,
    }

    Ok(())
}
