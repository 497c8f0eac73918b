//! helm-worker binary: `run`, `enqueue` and `check-config`

use anyhow::{bail, Context};
use clap::{value_parser, Arg, ArgAction, ArgMatches, Command};
use helm_queue::{RedisQueue, TaskQueue};
use helm_worker::{telemetry, Worker, WorkerConfig};
use std::path::PathBuf;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

fn config_arg() -> Arg {
    Arg::new("config")
        .long("config")
        .short('c')
        .value_parser(value_parser!(PathBuf))
        .help("TOML config file; HELM_* variables override it")
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Command::new("helm-worker")
        .version(helm_worker::VERSION)
        .about("Helm queue worker")
        .subcommand_required(true)
        .subcommand(
            Command::new("run")
                .about("Consume the task stream until interrupted")
                .arg(config_arg()),
        )
        .subcommand(
            Command::new("enqueue")
                .about("Append a job to the task stream")
                .arg(config_arg())
                .arg(
                    Arg::new("role")
                        .long("role")
                        .required(true)
                        .help("orchestrate, approve, or an agent name"),
                )
                .arg(
                    Arg::new("task-id")
                        .long("task-id")
                        .help("Task id; generated when absent"),
                )
                .arg(
                    Arg::new("field")
                        .long("field")
                        .short('f')
                        .action(ArgAction::Append)
                        .help("Extra message field as key=value"),
                ),
        )
        .subcommand(
            Command::new("check-config")
                .about("Load, validate and print the effective config")
                .arg(config_arg()),
        );

    match cli.get_matches().subcommand() {
        Some(("run", args)) => run(load_config(args)?).await,
        Some(("enqueue", args)) => enqueue(load_config(args)?, args).await,
        Some(("check-config", args)) => {
            let config = load_config(args)?;
            println!("{}", toml::to_string_pretty(&config).context("cannot render config")?);
            Ok(())
        }
        _ => unreachable!("subcommand_required"),
    }
}

fn load_config(args: &ArgMatches) -> anyhow::Result<WorkerConfig> {
    let path = args.get_one::<PathBuf>("config");
    let config = WorkerConfig::load(path.map(PathBuf::as_path))?;
    telemetry::init(&config.log_level, config.log_format);
    Ok(config)
}

async fn run(config: WorkerConfig) -> anyhow::Result<()> {
    let worker = Arc::new(Worker::connect(config).await.context("worker startup failed")?);
    let cancel = CancellationToken::new();

    let signal = cancel.clone();
    tokio::spawn(async move {
        shutdown_signal().await;
        tracing::info!("shutdown requested");
        signal.cancel();
    });

    worker.run(cancel).await?;
    tracing::info!("worker stopped");
    Ok(())
}

async fn enqueue(config: WorkerConfig, args: &ArgMatches) -> anyhow::Result<()> {
    let Some(url) = &config.redis_url else {
        bail!("enqueue needs redis_url (or HELM_REDIS_URL); an in-process queue would be lost");
    };
    let mut fields = helm_queue::Fields::new();
    for pair in args.get_many::<String>("field").into_iter().flatten() {
        let Some((key, value)) = pair.split_once('=') else {
            bail!("--field expects key=value, got '{pair}'");
        };
        fields.insert(key.to_string(), value.to_string());
    }
    let role = args
        .get_one::<String>("role")
        .context("--role is required")?;
    fields.insert("role".into(), role.clone());
    let task_id = args
        .get_one::<String>("task-id")
        .cloned()
        .unwrap_or_else(|| uuid::Uuid::new_v4().to_string());
    fields.insert("taskId".into(), task_id.clone());

    let queue = RedisQueue::connect(url).await?;
    let id = queue.enqueue(&config.tasks_stream, &fields).await?;
    println!("{task_id} {id}");
    Ok(())
}

async fn shutdown_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};
        match signal(SignalKind::terminate()) {
            Ok(mut term) => {
                tokio::select! {
                    _ = tokio::signal::ctrl_c() => {}
                    _ = term.recv() => {}
                }
                return;
            }
            Err(e) => tracing::warn!(error = %e, "cannot listen for SIGTERM"),
        }
    }
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::warn!(error = %e, "cannot listen for ctrl-c");
    }
}
