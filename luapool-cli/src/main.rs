use std::process;

use anyhow::Context;
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

use luapool_cli::error::CliError;
use luapool_cli::{USAGE, parse_args, run};

/// Initialize tracing on stderr so stdout carries only the JSON report.
///
/// `RUST_LOG` wins when set; otherwise `LUAPOOL_LOG` picks the level for the
/// luapool crates. `LOG_FORMAT=json` switches to JSON lines.
fn init_tracing() {
    let filter = if std::env::var("RUST_LOG").is_ok() {
        EnvFilter::from_default_env()
    } else {
        let base_level = match std::env::var("LUAPOOL_LOG").as_deref() {
            Ok("debug") => "debug",
            Ok("info") => "info",
            Ok("error") => "error",
            _ => "warn",
        };
        EnvFilter::new(format!(
            "luapool={level},luapool_cli={level}",
            level = base_level
        ))
    };

    let use_json = std::env::var("LOG_FORMAT").as_deref() == Ok("json");

    if use_json {
        let subscriber = tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().json().with_writer(std::io::stderr));
        let _ = subscriber.try_init();
    } else {
        let subscriber = tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().with_writer(std::io::stderr));
        let _ = subscriber.try_init();
    }
}

fn print_usage() {
    eprintln!("{USAGE}");
    eprintln!();
    eprintln!("Arguments:");
    eprintln!("  <script.lua>         Lua script to run");
    eprintln!();
    eprintln!("Options:");
    eprintln!("  --color <name>       Pool to run on [default: default]");
    eprintln!("  --runs <n>           Number of runs [default: 1]");
    eprintln!("  --concurrency <n>    Concurrent workers [default: 1]");
    eprintln!("  --warmup <n>         Instances to pre-build [default: 0]");
    eprintln!("  --wait-ms <n>        Wait for an idle instance up to n ms");
    eprintln!("                       [default: the pool's exhaustion timeout, 0 = fail fast]");
}

#[tokio::main]
async fn main() {
    init_tracing();

    let args: Vec<String> = std::env::args().collect();
    let args = match parse_args(&args) {
        Ok(args) => args,
        Err(e) => {
            if !matches!(&e, CliError::Usage(msg) if msg.is_empty()) {
                eprintln!("error: {e}");
                eprintln!();
            }
            print_usage();
            process::exit(e.exit_code());
        }
    };

    if let Err(e) = report(&args).await {
        eprintln!("error: {e:#}");
        let code = e.downcast_ref::<CliError>().map_or(1, CliError::exit_code);
        process::exit(code);
    }
}

async fn report(args: &luapool_cli::CliArgs) -> anyhow::Result<()> {
    let report = run(args).await?;
    let json = serde_json::to_string_pretty(&report).context("failed to serialize run report")?;
    println!("{json}");

    if report.failed > 0 {
        anyhow::bail!("{} of {} runs failed", report.failed, report.runs);
    }
    Ok(())
}
