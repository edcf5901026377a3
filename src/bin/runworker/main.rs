//! runworker demo host - coordinator and worker in one executable
//!
//! Usage:
//!   runworker demo [--deferred] [--respawn]
//!   runworker describe <module>
//!   runworker call <module> <path> [args...]
//!
//! Examples:
//!   runworker call demo add 2 3
//!   runworker call demo namespace.sub1
//!   RUNWORKER_LOG=runworker=debug runworker demo --respawn
//!
//! Spawned with `RUNWORKER_ROLE=worker` the same binary serves the built-in
//! modules instead of parsing a command line.

mod modules;

use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Parser, Subcommand};
use runworker::config::Settings;
use runworker::logging::{self, LogConfig};
use runworker::supervisor::{spawn, CallableKind, Lifecycle, LoadMode, Proxy, SpawnOptions};
use runworker::{worker, RpcError};
use serde_json::{json, Value};

#[derive(Parser)]
#[command(name = "runworker")]
#[command(about = "runworker - call functions exported by a worker process")]
#[command(version)]
struct Cli {
    /// Path to a runworker.toml (defaults to the usual search locations)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the built-in demo scenario
    Demo {
        /// Send the module path with an init message instead of the environment
        #[arg(long)]
        deferred: bool,

        /// Respawn the worker after it exits on its own
        #[arg(long)]
        respawn: bool,
    },

    /// Print the exported surface of a module
    Describe {
        /// Built-in module name
        module: String,
    },

    /// Call one export and print its result
    Call {
        /// Built-in module name
        module: String,

        /// Dot-separated export path, e.g. namespace.sub1
        path: String,

        /// Arguments; each is parsed as JSON, falling back to a string
        args: Vec<String>,
    },
}

fn main() -> ExitCode {
    if runworker::is_worker() {
        let settings = Settings::load().unwrap_or_default();
        logging::init(LogConfig::from_settings(&settings.logging).with_env_overrides());
        return worker::run(modules::table());
    }

    let cli = Cli::parse();

    let settings = match &cli.config {
        Some(path) => Settings::from_file(path),
        None => Settings::load(),
    };
    let settings = match settings {
        Ok(settings) => settings,
        Err(e) => {
            eprintln!("Error: {}", e);
            return ExitCode::FAILURE;
        }
    };
    logging::init(LogConfig::from_settings(&settings.logging).with_env_overrides());

    let options = match SpawnOptions::from_settings(&settings) {
        Ok(options) => options,
        Err(e) => {
            eprintln!("Error: {}", e);
            return ExitCode::FAILURE;
        }
    };

    let runtime = match tokio::runtime::Builder::new_multi_thread().enable_all().build() {
        Ok(runtime) => runtime,
        Err(e) => {
            eprintln!("Error: cannot start runtime: {}", e);
            return ExitCode::FAILURE;
        }
    };

    let outcome = runtime.block_on(async move {
        match cli.command {
            Commands::Demo { deferred, respawn } => {
                let mut options = options;
                if respawn {
                    options = options.respawn(true);
                }
                if deferred {
                    options = options.load_mode(LoadMode::Deferred);
                }
                cmd_demo(options).await
            }
            Commands::Describe { module } => cmd_describe(&module, options).await,
            Commands::Call { module, path, args } => cmd_call(&module, &path, &args, options).await,
        }
    });

    match outcome {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("Error: {}", e);
            if let Some(remote) = e.remote() {
                if let Some(stack) = &remote.stack {
                    eprintln!("{}", stack);
                }
            }
            ExitCode::FAILURE
        }
    }
}

fn parse_arg(raw: &str) -> Value {
    serde_json::from_str(raw).unwrap_or_else(|_| Value::String(raw.to_string()))
}

fn show(result: Option<Value>) -> String {
    match result {
        Some(value) => value.to_string(),
        None => "(no value)".to_string(),
    }
}

async fn cmd_demo(options: SpawnOptions) -> Result<(), RpcError> {
    let respawn = options.respawn;
    let worker = spawn("demo", options).await?;
    println!("worker {:?} ready", worker.pid());

    worker.on("helloworld", |msg| println!("event helloworld: {}", msg));

    println!("add(2, 3) = {}", show(worker.call(&["add"], vec![json!(2), json!(3)]).await?));
    println!("delayed(4) = {}", show(worker.call(&["delayed"], vec![json!(4)]).await?));
    println!("list[0]() = {}", show(worker.call(&["list", "0"], vec![]).await?));
    println!("list[1]() = {}", show(worker.call(&["list", "1"], vec![]).await?));
    println!("namespace.sub1() = {}", show(worker.call(&["namespace", "sub1"], vec![]).await?));
    println!("getY() = {}", show(worker.call(&["getY"], vec![]).await?));
    println!("action1() = {}", show(worker.call(&["action1"], vec![json!("out")]).await?));

    match worker.call(&["error"], vec![]).await {
        Err(e) => println!("error() failed as expected: {}", e),
        Ok(value) => println!("error() unexpectedly returned {}", show(value)),
    }

    if !respawn {
        worker.terminate();
        let info = worker.wait_for_exit().await;
        println!("worker stopped (requested: {})", info.requested);
        return Ok(());
    }

    let mut lifecycle = worker.lifecycle();
    let _ = worker.call(&["exit"], vec![json!(3)]).await;
    loop {
        match lifecycle.recv().await {
            Ok(Lifecycle::Exited { pid, info }) => println!("worker {:?} exited with {:?}", pid, info.code),
            Ok(Lifecycle::Respawned(replacement)) => {
                println!("worker respawned as {:?}", replacement.pid());
                println!(
                    "add(20, 22) = {}",
                    show(replacement.call(&["add"], vec![json!(20), json!(22)]).await?)
                );
                replacement.terminate();
                replacement.wait_for_exit().await;
                return Ok(());
            }
            Ok(Lifecycle::RespawnFailed(error)) => return Err(RpcError::Remote(error)),
            Ok(Lifecycle::ProtocolViolation { .. }) => {}
            Err(_) => return Err(RpcError::ChannelClosed),
        }
    }
}

async fn cmd_describe(module: &str, options: SpawnOptions) -> Result<(), RpcError> {
    let worker = spawn(module, options).await?;
    print_tree(worker.proxy(), "", 0);
    worker.terminate();
    worker.wait_for_exit().await;
    Ok(())
}

fn print_tree(proxy: &Proxy, label: &str, depth: usize) {
    let indent = "  ".repeat(depth);
    match proxy {
        Proxy::Stub(stub) => {
            let kind = match stub.kind() {
                CallableKind::Sync => "fn",
                CallableKind::Deferred => "async fn",
                CallableKind::Pending => "pending",
            };
            println!("{}{}: {}", indent, label, kind);
        }
        Proxy::Opaque(kind) => println!("{}{}: {:?}", indent, label, kind),
        Proxy::List(items) => {
            println!("{}{}: [", indent, label);
            for (index, item) in items.iter().enumerate() {
                print_tree(item, &index.to_string(), depth + 1);
            }
            println!("{}]", indent);
        }
        Proxy::Record(members) => {
            println!("{}{}{{", indent, if label.is_empty() { String::new() } else { format!("{}: ", label) });
            for (key, member) in members {
                print_tree(member, key, depth + 1);
            }
            println!("{}}}", indent);
        }
    }
}

async fn cmd_call(module: &str, path: &str, args: &[String], options: SpawnOptions) -> Result<(), RpcError> {
    let worker = spawn(module, options).await?;
    let segments: Vec<&str> = path.split('.').filter(|s| !s.is_empty()).collect();
    let arguments = args.iter().map(|raw| parse_arg(raw)).collect();

    let outcome = worker.call(&segments[..], arguments).await;
    worker.terminate();
    worker.wait_for_exit().await;

    println!("{}", show(outcome?));
    Ok(())
}
