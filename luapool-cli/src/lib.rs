pub mod error;

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use serde::Serialize;

use luapool::{DEFAULT_POOL, PoolStats, PooledState, ScriptContext, StatePool, VersionInfo};

use crate::error::{CliError, Result};

/// Snippet name the script is registered under.
const SCRIPT_SNIPPET: &str = "main";

pub const USAGE: &str = "Usage: luapool <script.lua> [--color <name>] [--runs <n>] \
     [--concurrency <n>] [--warmup <n>] [--wait-ms <n>]";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CliArgs {
    pub script: PathBuf,
    pub color: String,
    pub runs: usize,
    pub concurrency: usize,
    pub warmup: usize,
    /// How long a worker waits for an idle instance. `None` uses the pool's
    /// exhaustion timeout, where zero means fail immediately.
    pub wait: Option<Duration>,
}

fn parse_count(flag: &'static str, value: Option<&String>, allow_zero: bool) -> Result<usize> {
    let value = value.ok_or_else(|| CliError::Usage(format!("{flag} requires a value")))?;
    match value.parse::<usize>() {
        Ok(n) if n > 0 || allow_zero => Ok(n),
        _ => Err(CliError::InvalidNumber {
            flag,
            value: value.clone(),
        }),
    }
}

/// Parse `argv` (including argv[0]).
pub fn parse_args(args: &[String]) -> Result<CliArgs> {
    let mut script: Option<PathBuf> = None;
    let mut color = DEFAULT_POOL.to_string();
    let mut runs = 1;
    let mut concurrency = 1;
    let mut warmup = 0;
    let mut wait = None;

    let mut i = 1; // skip argv[0]
    while i < args.len() {
        match args[i].as_str() {
            "--color" => {
                i += 1;
                color = args
                    .get(i)
                    .ok_or_else(|| CliError::Usage("--color requires a value".to_string()))?
                    .clone();
            }
            "--runs" => {
                i += 1;
                runs = parse_count("--runs", args.get(i), false)?;
            }
            "--concurrency" => {
                i += 1;
                concurrency = parse_count("--concurrency", args.get(i), false)?;
            }
            "--warmup" => {
                i += 1;
                warmup = parse_count("--warmup", args.get(i), true)?;
            }
            "--wait-ms" => {
                i += 1;
                let millis = parse_count("--wait-ms", args.get(i), true)?;
                wait = Some(Duration::from_millis(millis as u64));
            }
            "--help" | "-h" => return Err(CliError::Usage(String::new())),
            arg if arg.starts_with('-') => {
                return Err(CliError::Usage(format!("unknown flag: {arg}")));
            }
            arg => {
                if script.is_some() {
                    return Err(CliError::Usage(format!("unexpected argument: {arg}")));
                }
                script = Some(PathBuf::from(arg));
            }
        }
        i += 1;
    }

    let script =
        script.ok_or_else(|| CliError::Usage("missing required argument: <script.lua>".to_string()))?;
    Ok(CliArgs {
        script,
        color,
        runs,
        concurrency,
        warmup,
        wait,
    })
}

/// Outcome of a batch of script runs.
#[derive(Debug, Clone, Serialize)]
pub struct RunReport {
    pub version: VersionInfo,
    pub script: String,
    pub runs: usize,
    pub succeeded: usize,
    pub failed: usize,
    pub pool: PoolStats,
}

/// Split `runs` across `workers` as evenly as possible.
fn shares(runs: usize, workers: usize) -> Vec<usize> {
    let workers = workers.min(runs).max(1);
    (0..workers)
        .map(|w| runs / workers + usize::from(w < runs % workers))
        .collect()
}

/// Explicit `--wait-ms`, else the pool's own exhaustion timeout.
fn acquire_wait(args: &CliArgs, pool: &StatePool) -> Duration {
    args.wait.unwrap_or_else(|| pool.config().exhaustion_timeout())
}

/// Run the script `args.runs` times on blocking tasks sharing one thread-safe
/// registry. Script failures are counted; pool and setup errors abort.
pub async fn run(args: &CliArgs) -> Result<RunReport> {
    if !Path::new(&args.script).is_file() {
        return Err(CliError::ScriptNotFound(args.script.display().to_string()));
    }

    let context = Arc::new(ScriptContext::new());
    context.registry().set_thread_safe(true);
    context.compile_file(SCRIPT_SNIPPET, &args.script)?;

    let pool = context.get_pool(&args.color)?;
    let warmed = pool.warmup(args.warmup)?;
    tracing::info!(color = %args.color, warmed, runs = args.runs, concurrency = args.concurrency, "Starting runs");

    let timeout = acquire_wait(args, &pool);
    let snippet = Arc::new(context.snippets().get(SCRIPT_SNIPPET)?);
    let failed = Arc::new(AtomicUsize::new(0));

    let mut tasks = Vec::new();
    for (worker, share) in shares(args.runs, args.concurrency).into_iter().enumerate() {
        let pool = Arc::clone(&pool);
        let snippet = Arc::clone(&snippet);
        let failed = Arc::clone(&failed);
        tasks.push(tokio::task::spawn_blocking(move || -> Result<()> {
            for _ in 0..share {
                let instance = pool.acquire_timeout(timeout)?;
                let state = PooledState::new(instance, Arc::clone(&pool));
                if let Err(e) = state.exec_named(snippet.name(), snippet.source()) {
                    tracing::warn!(worker, error = %e, "Script run failed");
                    failed.fetch_add(1, Ordering::Relaxed);
                }
            }
            Ok(())
        }));
    }

    for task in tasks {
        task.await??;
    }

    let failed = failed.load(Ordering::Relaxed);
    Ok(RunReport {
        version: VersionInfo::detect(),
        script: args.script.display().to_string(),
        runs: args.runs,
        succeeded: args.runs - failed,
        failed,
        pool: pool.stats(),
    })
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use luapool::PoolConfig;

    use super::*;

    fn argv(args: &[&str]) -> Vec<String> {
        std::iter::once("luapool")
            .chain(args.iter().copied())
            .map(String::from)
            .collect()
    }

    fn script(code: &str) -> tempfile::NamedTempFile {
        let mut file = tempfile::Builder::new().suffix(".lua").tempfile().unwrap();
        write!(file, "{code}").unwrap();
        file
    }

    #[test]
    fn parse_defaults() {
        let args = parse_args(&argv(&["job.lua"])).unwrap();
        assert_eq!(
            args,
            CliArgs {
                script: PathBuf::from("job.lua"),
                color: "default".to_string(),
                runs: 1,
                concurrency: 1,
                warmup: 0,
                wait: None,
            }
        );
    }

    #[test]
    fn parse_all_flags() {
        let args = parse_args(&argv(&[
            "--color",
            "sandboxed",
            "job.lua",
            "--runs",
            "20",
            "--concurrency",
            "4",
            "--warmup",
            "2",
            "--wait-ms",
            "1500",
        ]))
        .unwrap();
        assert_eq!(args.color, "sandboxed");
        assert_eq!(args.runs, 20);
        assert_eq!(args.concurrency, 4);
        assert_eq!(args.warmup, 2);
        assert_eq!(args.wait, Some(Duration::from_millis(1500)));
    }

    #[test]
    fn parse_errors_are_usage_errors() {
        for bad in [
            argv(&[]),
            argv(&["a.lua", "b.lua"]),
            argv(&["a.lua", "--bogus"]),
            argv(&["a.lua", "--runs"]),
            argv(&["a.lua", "--runs", "0"]),
            argv(&["a.lua", "--concurrency", "many"]),
            argv(&["a.lua", "--wait-ms", "-5"]),
        ] {
            let err = parse_args(&bad).unwrap_err();
            assert_eq!(err.exit_code(), 2, "{bad:?} -> {err}");
        }
        assert!(parse_args(&argv(&["a.lua", "--warmup", "0"])).is_ok());
    }

    #[test]
    fn shares_cover_all_runs() {
        assert_eq!(shares(10, 3), vec![4, 3, 3]);
        assert_eq!(shares(2, 8), vec![1, 1]);
        assert_eq!(shares(5, 1), vec![5]);
        assert_eq!(shares(9, 3).iter().sum::<usize>(), 9);
    }

    #[tokio::test]
    async fn run_reports_pool_stats() {
        let file = script("local total = 0 for i = 1, 100 do total = total + i end");
        let args = CliArgs {
            script: file.path().to_path_buf(),
            color: "sandboxed".to_string(),
            runs: 12,
            concurrency: 8,
            warmup: 2,
            wait: Some(Duration::from_secs(30)),
        };

        let report = run(&args).await.unwrap();
        assert_eq!(report.succeeded, 12);
        assert_eq!(report.failed, 0);
        assert_eq!(report.pool.color, "sandboxed");
        assert_eq!(report.pool.checked_out, 0);
        assert!(report.pool.current_size <= report.pool.max_size);
        assert!(report.pool.thread_safe);
    }

    #[tokio::test]
    async fn run_report_snapshot() {
        let file = script("local s = string.rep('a', 3)");
        let args = CliArgs {
            script: file.path().to_path_buf(),
            color: "sandboxed".to_string(),
            runs: 4,
            concurrency: 1,
            warmup: 2,
            wait: None,
        };

        let mut report = run(&args).await.unwrap();
        report.script = "job.lua".to_string();
        report.version.luapool = "0.1.0";
        insta::assert_json_snapshot!("run_report", report);
    }

    #[test]
    fn wait_defaults_to_pool_timeout() {
        let quick = StatePool::new("quick", PoolConfig::new());
        let patient = StatePool::new(
            "patient",
            PoolConfig::new().with_exhaustion_timeout(Duration::from_secs(2)),
        );
        let mut args = parse_args(&argv(&["job.lua"])).unwrap();

        assert_eq!(acquire_wait(&args, &quick), Duration::ZERO);
        assert_eq!(acquire_wait(&args, &patient), Duration::from_secs(2));

        args.wait = Some(Duration::from_millis(250));
        assert_eq!(acquire_wait(&args, &quick), Duration::from_millis(250));
        assert_eq!(acquire_wait(&args, &patient), Duration::from_millis(250));
    }

    #[tokio::test]
    async fn script_failures_are_counted() {
        let file = script("error('boom')");
        let args = CliArgs {
            script: file.path().to_path_buf(),
            color: "minimal".to_string(),
            runs: 3,
            concurrency: 2,
            warmup: 0,
            wait: Some(Duration::from_secs(30)),
        };

        let report = run(&args).await.unwrap();
        assert_eq!(report.failed, 3);
        assert_eq!(report.succeeded, 0);
    }

    #[tokio::test]
    async fn unknown_color_is_runtime_error() {
        let file = script("x = 1");
        let args = CliArgs {
            script: file.path().to_path_buf(),
            color: "nope".to_string(),
            runs: 1,
            concurrency: 1,
            warmup: 0,
            wait: None,
        };
        let err = run(&args).await.unwrap_err();
        assert!(matches!(err, CliError::Pool(luapool::PoolError::NotFound(_))));
        assert_eq!(err.exit_code(), 1);
    }

    #[tokio::test]
    async fn syntax_error_is_reported_before_running() {
        let file = script("x = = 1");
        let args = parse_args(&argv(&[file.path().to_str().unwrap()])).unwrap();
        let err = run(&args).await.unwrap_err();
        assert!(matches!(
            err,
            CliError::Pool(luapool::PoolError::Compile { .. })
        ));
    }

    #[tokio::test]
    async fn missing_script() {
        let args = parse_args(&argv(&["/no/such/script.lua"])).unwrap();
        assert!(matches!(
            run(&args).await.unwrap_err(),
            CliError::ScriptNotFound(_)
        ));
    }
}
