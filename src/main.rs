use anyhow::{Context, Result};
use std::path::Path;
use std::sync::Arc;
use tracing::{error, warn};
use tracing_subscriber::EnvFilter;
use uuid::Uuid;
use vedops::cli::commands::{HistoryCommand, RunCommand, ShowCommand, StatsCommand, ValidateCommand};
use vedops::cli::output::*;
use vedops::cli::{Cli, Command};
use vedops::notify::{LogSink, Notifier};
use vedops::provider::EchoProvider;
use vedops::{AgentRegistry, AgentRole, Orchestrator, Pipeline, PipelineConfig, RunStatus, RunStore};

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::from_args();

    // Initialize logging; RUST_LOG wins over --verbose
    let default_level = if cli.verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .try_init()
        .map_err(|e| anyhow::anyhow!("Failed to set logging subscriber: {}", e))?;

    // Execute command
    match &cli.command {
        Command::Run(cmd) => run_pipeline(cmd).await?,
        Command::Validate(cmd) => validate_pipeline(cmd)?,
        Command::History(cmd) => show_history(cmd).await?,
        Command::Show(cmd) => show_run(cmd).await?,
        Command::Stats(cmd) => show_stats(cmd).await?,
        Command::Roles => list_roles(),
    }

    Ok(())
}

#[cfg(feature = "sqlite")]
async fn open_store(db: Option<&Path>) -> Result<Arc<dyn RunStore>> {
    use vedops::SqliteRunStore;

    let store = match db {
        Some(path) => SqliteRunStore::new(path).await?,
        None => SqliteRunStore::with_default_path().await?,
    };
    Ok(Arc::new(store))
}

#[cfg(not(feature = "sqlite"))]
async fn open_store(_db: Option<&Path>) -> Result<Arc<dyn RunStore>> {
    anyhow::bail!("Run history requires building with the `sqlite` feature")
}

async fn run_pipeline(cmd: &RunCommand) -> Result<()> {
    // Load pipeline config
    let mut config = PipelineConfig::from_file(&cmd.file)
        .with_context(|| format!("Failed to load pipeline config {}", cmd.file.display()))?;

    println!("{} Loaded pipeline: {}", INFO, style(&config.name).bold());

    // Apply overrides
    if cmd.sequential {
        config.parallel_execution = false;
    }
    if let Some(max) = cmd.max_parallel {
        config.max_parallel_agents = max;
    }
    for (key, value) in &cmd.var {
        config.variables.insert(key.clone(), value.clone());
        println!(
            "{} Variable override: {} = {}",
            INFO,
            style(key).cyan(),
            style(value).dim()
        );
    }

    let mut notifier = Notifier::new();
    if cmd.log_events {
        notifier.add_sink(Arc::new(LogSink));
    }

    let mut orchestrator = Orchestrator::new(AgentRegistry::with_builtin_roles()).with_notifier(notifier);
    if cmd.offline {
        println!("{} Offline mode: using the echo provider", INFO);
        orchestrator = orchestrator.with_provider(Arc::new(EchoProvider::default()));
    }
    if !cmd.no_history {
        match open_store(cmd.db.as_deref()).await {
            Ok(store) => orchestrator = orchestrator.with_store(store),
            Err(e) => warn!("Run history disabled: {:#}", e),
        }
    }
    let orchestrator = Arc::new(orchestrator);

    let run = orchestrator.submit(config).context("Pipeline rejected")?;
    let run_id = run.id;
    println!(
        "{} Starting pipeline {} ({})",
        ROCKET,
        style(&run.pipeline_name).bold(),
        style(run_id).dim()
    );

    // Ctrl-C cancels the run; in-flight stages get their grace period
    let canceller = orchestrator.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            eprintln!("{} Cancelling run...", WARN);
            if let Err(e) = canceller.cancel(run_id) {
                error!("{}", e);
            }
        }
    });

    let progress = create_progress_bar(run.stages.len());
    let mut updates = orchestrator
        .subscribe(run_id)
        .context("Run disappeared right after submission")?;
    let mut printed = 0;

    let run = loop {
        let snapshot = updates.borrow_and_update().clone();

        for entry in &snapshot.audit[printed..] {
            progress.println(format_audit_entry(entry));
        }
        printed = snapshot.audit.len();
        progress.set_position(printed as u64);

        let running: Vec<&str> = snapshot
            .stages
            .iter()
            .filter(|s| !s.status.is_terminal() && s.status != vedops::StageStatus::Pending)
            .map(|s| s.stage.as_str())
            .collect();
        progress.set_message(running.join(", "));

        if snapshot.status.is_terminal() {
            break snapshot;
        }
        if updates.changed().await.is_err() {
            // The driver is gone; report whatever it left behind
            break orchestrator.wait(run_id).await.unwrap_or(snapshot);
        }
    };
    progress.finish_and_clear();

    println!("\n{}", format_run_details(&run));

    match run.status {
        RunStatus::Succeeded => {
            println!(
                "\n{} {} completed {}",
                CHECK,
                style(&run.pipeline_name).bold(),
                style("successfully").green()
            );
            Ok(())
        }
        status => {
            println!(
                "\n{} {} {}",
                CROSS,
                style(&run.pipeline_name).bold(),
                format_status(status)
            );
            std::process::exit(1);
        }
    }
}

fn validate_pipeline(cmd: &ValidateCommand) -> Result<()> {
    println!("{} Validating pipeline...", INFO);

    let registry = AgentRegistry::with_builtin_roles();
    let result = PipelineConfig::from_file(&cmd.file).and_then(|config| {
        let pipeline = Pipeline::from_config(&config)?;
        if let Some(stage) = pipeline.stages().iter().find(|s| !registry.contains(&s.role)) {
            return Err(vedops::ConfigError::UnknownRole {
                stage: stage.id.clone(),
                role: stage.role.clone(),
            });
        }
        Ok((config, pipeline))
    });

    match result {
        Ok((config, pipeline)) => {
            println!("{} Pipeline configuration is valid!", CHECK);
            println!("  Name: {}", style(&config.name).bold());
            println!("  Provider: {} ({})", style(&config.llm.provider).cyan(), config.llm.model);
            println!("  Stages: {}", style(config.stages.len()).cyan());
            println!("  Order: {}", pipeline.execution_order().join(" -> "));
            println!("  Variables: {}", style(config.variables.len()).cyan());

            if cmd.json {
                let json = serde_json::to_string_pretty(&config.redacted())?;
                println!("\n{}", json);
            }
            Ok(())
        }
        Err(e) => {
            println!("{} Validation failed:", CROSS);
            println!("  {}", style(e).red());
            std::process::exit(1);
        }
    }
}

async fn show_history(cmd: &HistoryCommand) -> Result<()> {
    let store = open_store(cmd.db.as_deref()).await?;
    let runs = store.list(cmd.pipeline.as_deref(), cmd.limit).await?;

    if cmd.json {
        let data = serde_json::json!({ "runs": runs });
        println!("{}", serde_json::to_string_pretty(&data)?);
        return Ok(());
    }

    if runs.is_empty() {
        println!("{} No runs found", INFO);
        return Ok(());
    }

    println!("{} Run history (showing latest {}):", INFO, cmd.limit);
    for summary in &runs {
        println!("  {}", format_run_summary(summary));
    }

    Ok(())
}

async fn show_stats(cmd: &StatsCommand) -> Result<()> {
    let store = open_store(cmd.db.as_deref()).await?;
    let since = chrono::Utc::now() - chrono::Duration::days(cmd.days.max(0));
    let stats = store.statistics(cmd.pipeline.as_deref(), Some(since)).await?;

    if cmd.json {
        let data = serde_json::json!({
            "pipeline": cmd.pipeline,
            "days": cmd.days,
            "statistics": stats,
            "success_rate": stats.success_rate(),
        });
        println!("{}", serde_json::to_string_pretty(&data)?);
        return Ok(());
    }

    let scope = cmd.pipeline.as_deref().unwrap_or("all pipelines");
    println!("{} Statistics for {} (last {} days):", INFO, style(scope).bold(), cmd.days);
    println!("{}", format_statistics(&stats));

    Ok(())
}

async fn show_run(cmd: &ShowCommand) -> Result<()> {
    let run_id = Uuid::parse_str(&cmd.run_id).context("Invalid run ID format")?;
    let store = open_store(cmd.db.as_deref()).await?;

    match store.load(run_id).await? {
        Some(run) if cmd.json => println!("{}", serde_json::to_string_pretty(&run)?),
        Some(run) => {
            println!("{}", format_run_details(&run));
            for stage in run.stages.iter().filter(|s| s.output.is_some()) {
                let summary = stage
                    .output
                    .as_ref()
                    .and_then(|o| o.get("summary"))
                    .and_then(|s| s.as_str())
                    .map(str::to_string)
                    .unwrap_or_else(|| stage.output.as_ref().map(|o| o.to_string()).unwrap_or_default());
                println!("\n{} {}", INFO, style(&stage.stage).bold());
                println!("{}", format_output(&summary, 8));
            }
        }
        None => {
            println!("{} Run {} not found", WARN, run_id);
            std::process::exit(1);
        }
    }

    Ok(())
}

fn list_roles() {
    println!("{} Built-in agent roles:", INFO);
    for role in AgentRole::ALL {
        println!(
            "  {}",
            fit_to_terminal(&format!("{:<15} {}", style(role).cyan(), role.description()))
        );
    }
}
