//! `promptguard` - CLI for the email redaction pipeline
//!
//! This binary runs the coordinator as a JSON-lines service and provides
//! commands for scanning request bodies and reviewing recorded issues.

#![warn(missing_debug_implementations)]
#![deny(unsafe_code)]

use std::sync::Arc;

use anyhow::{bail, Context};
use chrono::{DateTime, Utc};
use clap::Parser;
use tokio::io::{AsyncReadExt, BufReader};

use promptguard::cli::{Cli, Command, ConfigCommand, IssuesCommand, ScanCommand};
use promptguard::interceptor::{DetectionSink, OutboundRequest, RequestBody};
use promptguard::service::{self, DryRunSender, LogSink};
use promptguard::{
    init_logging, Ack, ActionMessage, Config, Coordinator, Interceptor, Issue, Pipeline,
    RequestSender, SqliteStore, StateStore,
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Initialize logging based on verbosity
    init_logging(cli.verbosity());

    // `config validate` reports problems itself instead of failing to load
    if let Command::Config(ConfigCommand::Validate { file }) = &cli.command {
        let path = file
            .clone()
            .or_else(|| cli.config.clone())
            .unwrap_or_else(Config::default_config_path);
        return handle_validate(&path);
    }

    let config = Config::load_from(cli.config.clone()).context("failed to load configuration")?;

    match cli.command {
        Command::Serve => handle_serve(&config).await,
        Command::Scan(cmd) => handle_scan(&config, &cmd).await,
        Command::Issues(cmd) => handle_issues(&config, &cmd).await,
        Command::Status(cmd) => handle_status(&config, cmd.json),
        Command::Dismiss(cmd) => {
            send_action(&config, ActionMessage::DismissIssue { issue_id: cmd.id }).await
        }
        Command::DismissEmail(cmd) => {
            send_action(&config, ActionMessage::DismissEmail { email: cmd.email }).await
        }
        Command::Clear(cmd) => {
            if !cmd.yes {
                println!("This will remove every recorded issue and snooze.");
                println!("Use --yes to confirm.");
                return Ok(());
            }
            send_action(&config, ActionMessage::ClearHistory).await
        }
        Command::Reconcile => handle_reconcile(&config).await,
        Command::Config(cmd) => handle_config(&config, &cmd),
    }
}

fn open_store(config: &Config) -> anyhow::Result<Arc<SqliteStore>> {
    let path = config.database_path();
    let store = SqliteStore::open(&path)
        .with_context(|| format!("failed to open store at {}", path.display()))?;
    Ok(Arc::new(store))
}

async fn handle_serve(config: &Config) -> anyhow::Result<()> {
    let store = open_store(config)?;
    let subscription = store.subscribe(Box::new(|state| {
        tracing::debug!(
            active = state.active_issues().len(),
            total = state.issues.len(),
            "Store changed"
        );
    }));

    let pipeline = Pipeline::start(store, config);
    let stdin = BufReader::new(tokio::io::stdin());
    let applied = service::serve(stdin, tokio::io::stdout(), &pipeline.handle()).await?;
    pipeline.shutdown().await?;
    subscription.unsubscribe();

    tracing::info!(applied, "Input closed; stopping");
    Ok(())
}

async fn handle_scan(config: &Config, cmd: &ScanCommand) -> anyhow::Result<()> {
    let mut body = String::new();
    tokio::io::stdin()
        .read_to_string(&mut body)
        .await
        .context("failed to read request body from stdin")?;
    let request = OutboundRequest::post(cmd.url.as_str(), body);

    let sent = if cmd.dry_run {
        scan_with(config, Arc::new(LogSink), request).await?
    } else {
        let pipeline = Pipeline::start(open_store(config)?, config);
        let sent = scan_with(config, pipeline.sink(), request).await?;
        pipeline.shutdown().await?;
        sent
    };

    match sent.body {
        Some(RequestBody::Text(text)) => print!("{text}"),
        Some(RequestBody::Binary(_)) | None => {}
    }
    Ok(())
}

async fn scan_with(
    config: &Config,
    sink: Arc<dyn DetectionSink>,
    request: OutboundRequest,
) -> anyhow::Result<OutboundRequest> {
    let interceptor = Interceptor::with_config(DryRunSender, sink, &config.interception);
    Ok(interceptor.send(request).await?)
}

async fn handle_issues(config: &Config, cmd: &IssuesCommand) -> anyhow::Result<()> {
    let state = open_store(config)?.load().await?;

    if cmd.history {
        let issues = state.history();
        if cmd.json {
            println!("{}", serde_json::to_string_pretty(&issues)?);
            return Ok(());
        }
        if issues.is_empty() {
            println!("No issues recorded.");
        }
        for issue in issues {
            print_issue(issue);
        }
        return Ok(());
    }

    if cmd.json {
        println!("{}", serde_json::to_string_pretty(&state.active_issues())?);
        return Ok(());
    }

    let groups = state.active_by_email();
    if groups.is_empty() {
        println!("No issues awaiting review.");
    }
    for (email, issues) in groups {
        println!("{email} ({} detection(s))", issues.len());
        for issue in issues {
            println!("  {}  {}", issue.id, format_timestamp(issue.timestamp));
        }
    }
    Ok(())
}

fn print_issue(issue: &Issue) {
    let state = match issue.dismissed_until {
        Some(until) if issue.dismissed => format!("snoozed until {}", format_timestamp(until)),
        _ => issue.state().to_string(),
    };
    println!(
        "{}  {}  {}  {}",
        format_timestamp(issue.timestamp),
        issue.id,
        issue.email,
        state
    );
}

fn format_timestamp(millis: i64) -> String {
    DateTime::<Utc>::from_timestamp_millis(millis).map_or_else(
        || millis.to_string(),
        |t| t.format("%Y-%m-%d %H:%M:%S").to_string(),
    )
}

fn handle_status(config: &Config, json: bool) -> anyhow::Result<()> {
    let store = open_store(config)?;
    let stats = store.stats()?;

    if json {
        let status = serde_json::json!({
            "database_path": store.path(),
            "total_issues": stats.total_issues,
            "active_issues": stats.active_issues,
            "snoozed_emails": stats.snoozed_emails,
            "oldest_issue": stats.oldest_issue,
            "newest_issue": stats.newest_issue,
            "db_size_bytes": stats.db_size_bytes,
        });
        println!("{}", serde_json::to_string_pretty(&status)?);
    } else {
        println!("promptguard status");
        println!("------------------");
        println!("Database:       {}", store.path().display());
        println!("Issues:         {}", stats.total_issues);
        println!("Active:         {}", stats.active_issues);
        println!("Snoozed emails: {}", stats.snoozed_emails);
        if let Some(newest) = stats.newest_issue {
            println!("Last detection: {}", format_timestamp(newest));
        }
        println!("Size:           {} bytes", stats.db_size_bytes);
    }
    Ok(())
}

async fn send_action(config: &Config, message: ActionMessage) -> anyhow::Result<()> {
    let pipeline = Pipeline::start(open_store(config)?, config);
    let ack = pipeline.send(message).await;
    pipeline.shutdown().await?;
    report(ack?)
}

fn report(ack: Ack) -> anyhow::Result<()> {
    if !ack.success {
        bail!(ack.error.unwrap_or_else(|| "action failed".to_string()));
    }
    println!("Done.");
    Ok(())
}

async fn handle_reconcile(config: &Config) -> anyhow::Result<()> {
    let mut coordinator = Coordinator::from_config(open_store(config)?, config);
    let result = coordinator.reconcile().await?;
    println!(
        "Reactivated {} issue(s), pruned {} snooze(s).",
        result.reactivated, result.pruned
    );
    Ok(())
}

fn handle_validate(path: &std::path::Path) -> anyhow::Result<()> {
    println!("Validating configuration: {}", path.display());
    match Config::load_from(Some(path.to_path_buf())) {
        Ok(_) => println!("Configuration is valid."),
        Err(e) => bail!("Configuration error: {e}"),
    }
    Ok(())
}

fn handle_config(config: &Config, cmd: &ConfigCommand) -> anyhow::Result<()> {
    match cmd {
        ConfigCommand::Show { json } => {
            if *json {
                println!("{}", serde_json::to_string_pretty(config)?);
            } else {
                println!("Current Configuration");
                println!("=====================");
                println!();
                println!("[Storage]");
                println!("  Database path:     {}", config.database_path().display());
                println!();
                println!("[Interception]");
                println!(
                    "  Endpoint markers:  {}",
                    config.interception.endpoint_markers.join(", ")
                );
                println!(
                    "  Resource marker:   {}",
                    config.interception.resource_marker
                );
                println!("  Placeholder:       {}", config.interception.placeholder);
                println!();
                println!("[Snooze]");
                println!("  Duration (hours):  {}", config.snooze.duration_hours);
                println!(
                    "  Permanent dismiss: {}",
                    config.snooze.permanent_issue_dismiss
                );
                println!();
                println!("[Presentation]");
                println!("  Auto show:         {}", config.presentation.auto_show);
                if !config.presentation.command.is_empty() {
                    println!(
                        "  Command:           {}",
                        config.presentation.command.join(" ")
                    );
                }
                println!();
                println!("[Coordinator]");
                println!("  Queue capacity:    {}", config.coordinator.queue_capacity);
            }
        }
        ConfigCommand::Path => {
            println!("{}", Config::default_config_path().display());
        }
        ConfigCommand::Validate { .. } => {}
    }
    Ok(())
}
