use std::collections::BTreeMap;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use quantpipe_core::engine::PipelineEngine;
use quantpipe_core::config::EngineConfig;
use quantpipe_core::registry::MemoryNodeRegistry;
use quantpipe_core::runs_memory::MemoryRunStore;
use tracing_subscriber::EnvFilter;

const EXIT_OK: u8 = 0;
const EXIT_COMPILE_FAILED: u8 = 2;
const EXIT_EXECUTION_FAILED: u8 = 3;
const EXIT_CANCELLED: u8 = 130;

#[tokio::main]
async fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::from_default_env().add_directive("info".parse().expect("valid directive")),
        )
        .with_writer(std::io::stderr)
        .init();

    let args: Vec<String> = std::env::args().skip(1).collect();
    match args.first().map(String::as_str) {
        Some("compile") => compile_command(&args[1..]),
        Some("run") => run_command(&args[1..]).await,
        Some("help") | Some("--help") | Some("-h") | None => {
            print_usage();
            ExitCode::from(EXIT_OK)
        }
        Some(other) => {
            eprintln!("unknown command: {}", other);
            print_usage();
            ExitCode::from(EXIT_COMPILE_FAILED)
        }
    }
}

fn print_usage() {
    eprintln!(
        "quantpipe — compile and run backtesting pipelines

USAGE:
    quantpipe compile <pipeline.yaml> [--id <pipeline-id>]
    quantpipe run <pipeline.yaml> [--id <pipeline-id>] [--runs-root <dir>]
                  [--dataset <name>=<path>]...

Exit codes: 0 success, 2 compilation failure, 3 execution failure,
130 cancelled (Ctrl-C)."
    );
}

fn compile_command(args: &[String]) -> ExitCode {
    let Some(path) = args.first() else {
        eprintln!("compile: missing pipeline file");
        return ExitCode::from(EXIT_COMPILE_FAILED);
    };
    let text = match std::fs::read_to_string(path) {
        Ok(t) => t,
        Err(e) => {
            eprintln!("compile: cannot read {}: {}", path, e);
            return ExitCode::from(EXIT_COMPILE_FAILED);
        }
    };
    let pipeline_id = flag_value(args, "--id").unwrap_or_else(|| file_stem(path));

    let result = quantpipe_core::compile(&pipeline_id, &text, &MemoryNodeRegistry::new());
    for warning in &result.warnings {
        eprintln!("warning: {}", warning);
    }
    if result.success {
        match serde_json::to_string_pretty(&result.pipeline) {
            Ok(json) => println!("{}", json),
            Err(e) => eprintln!("failed to render IR: {}", e),
        }
        ExitCode::from(EXIT_OK)
    } else {
        for error in &result.errors {
            eprintln!("error: {}", error);
        }
        ExitCode::from(EXIT_COMPILE_FAILED)
    }
}

async fn run_command(args: &[String]) -> ExitCode {
    let Some(path) = args.first() else {
        eprintln!("run: missing pipeline file");
        return ExitCode::from(EXIT_COMPILE_FAILED);
    };
    let text = match std::fs::read_to_string(path) {
        Ok(t) => t,
        Err(e) => {
            eprintln!("run: cannot read {}: {}", path, e);
            return ExitCode::from(EXIT_COMPILE_FAILED);
        }
    };
    let pipeline_id = flag_value(args, "--id").unwrap_or_else(|| file_stem(path));

    let mut config = EngineConfig::default();
    if let Some(root) = flag_value(args, "--runs-root") {
        config.runs_root = PathBuf::from(root);
    }
    config.datasets = parse_datasets(args);

    let store = Arc::new(MemoryRunStore::new());
    let registry = Arc::new(MemoryNodeRegistry::new());
    let engine = Arc::new(PipelineEngine::new(store.clone(), registry, config));

    // Compile first so a broken description exits 2 without starting a run.
    let compiled = engine.compile(&pipeline_id, &text);
    for warning in &compiled.warnings {
        eprintln!("warning: {}", warning);
    }
    if !compiled.success {
        for error in &compiled.errors {
            eprintln!("error: {}", error);
        }
        return ExitCode::from(EXIT_COMPILE_FAILED);
    }

    let mut exec = {
        let engine = engine.clone();
        let pipeline_id = pipeline_id.clone();
        tokio::spawn(async move { engine.execute(&pipeline_id, &text).await })
    };

    // Ctrl-C cancels the run cooperatively; the executor returns with
    // cancelled=true once in-flight workers are terminated.
    let finished = tokio::select! {
        result = &mut exec => Some(result),
        _ = tokio::signal::ctrl_c() => None,
    };
    let joined = match finished {
        Some(result) => result,
        None => {
            eprintln!("interrupt received, cancelling run");
            for run_id in store.active_runs().await {
                engine.cancel(run_id).await;
            }
            exec.await
        }
    };
    let result = match joined {
        Ok(result) => result,
        Err(e) => {
            eprintln!("run: executor task failed: {}", e);
            return ExitCode::from(EXIT_EXECUTION_FAILED);
        }
    };

    match serde_json::to_string_pretty(&result) {
        Ok(json) => println!("{}", json),
        Err(e) => eprintln!("failed to render result: {}", e),
    }

    if result.cancelled {
        ExitCode::from(EXIT_CANCELLED)
    } else if result.success {
        ExitCode::from(EXIT_OK)
    } else {
        ExitCode::from(EXIT_EXECUTION_FAILED)
    }
}

/// Value of `--flag <value>` style arguments.
fn flag_value(args: &[String], flag: &str) -> Option<String> {
    args.windows(2)
        .find(|w| w[0] == flag)
        .map(|w| w[1].clone())
}

/// Collect every `--dataset name=path` pair.
fn parse_datasets(args: &[String]) -> BTreeMap<String, PathBuf> {
    let mut datasets = BTreeMap::new();
    for window in args.windows(2) {
        if window[0] == "--dataset" {
            if let Some((name, path)) = window[1].split_once('=') {
                datasets.insert(name.to_string(), PathBuf::from(path));
            } else {
                eprintln!("warning: ignoring malformed --dataset '{}'", window[1]);
            }
        }
    }
    datasets
}

fn file_stem(path: &str) -> String {
    std::path::Path::new(path)
        .file_stem()
        .map(|s| s.to_string_lossy().to_string())
        .unwrap_or_else(|| "pipeline".to_string())
}
