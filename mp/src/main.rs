//! mp - conversational event meal planner
//!
//! CLI entry point for quantity scaling, scripted planning sessions and the
//! session store.

use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};

use clap::Parser;
use colored::Colorize;
use eyre::{Context, Result};
use tracing::{debug, info};

use mealplan::cli::{Cli, Command, DisplayFormat, SessionsCommand, get_log_path};
use mealplan::config::Config;
use mealplan::domain::{GuestCounts, PlanningRecord};
use mealplan::events::read_session_events;
use mealplan::quantity::{QuantityTable, scale_quantity};
use mealplan::render::stage_prompt;
use mealplan::scenario::{Scenario, run_scenario};
use mealplan::session::{SessionStore, resolve_reference};

const RECENT_EVENTS: usize = 5;

fn setup_logging(cli_log_level: Option<&str>, config_log_level: Option<&str>) -> Result<()> {
    // Note: Can't log params here since logging isn't initialized yet
    let log_path = get_log_path();
    if let Some(log_dir) = log_path.parent() {
        fs::create_dir_all(log_dir).context("Failed to create log directory")?;
    }

    // Determine log level with priority: CLI --log-level > config file > default (INFO)
    let level = match cli_log_level.or(config_log_level) {
        Some(s) => match s.to_uppercase().as_str() {
            "TRACE" => tracing::Level::TRACE,
            "DEBUG" => tracing::Level::DEBUG,
            "INFO" => tracing::Level::INFO,
            "WARN" | "WARNING" => tracing::Level::WARN,
            "ERROR" => tracing::Level::ERROR,
            _ => {
                eprintln!("Warning: Unknown log-level '{}', defaulting to INFO", s);
                tracing::Level::INFO
            }
        },
        None => tracing::Level::INFO,
    };

    let log_file = fs::File::create(&log_path).context("Failed to create log file")?;

    tracing_subscriber::fmt()
        .with_writer(log_file)
        .with_ansi(false)
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env().add_directive(level.into()))
        .init();

    info!("Logging initialized (level: {:?})", level);
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Load log level from config file early (before full config load)
    let config_log_level = Config::load_log_level(cli.config.as_ref());
    setup_logging(cli.log_level.as_deref(), config_log_level.as_deref()).context("Failed to setup logging")?;

    let config = Config::load(cli.config.as_ref()).context("Failed to load configuration")?;

    debug!(command = ?cli.command, "main: dispatching command");
    match cli.command {
        Command::Scale {
            category,
            adults,
            children,
            base,
            servings,
        } => cmd_scale(&config, category.as_deref(), adults, children, base, servings),
        Command::Simulate { scenario, persist } => cmd_simulate(&config, scenario, persist).await,
        Command::Sessions { command } => match command {
            SessionsCommand::List { format } => cmd_sessions_list(&config, format),
            SessionsCommand::Show { id, format } => cmd_sessions_show(&config, &id, format),
            SessionsCommand::Delete { id } => cmd_sessions_delete(&config, &id),
        },
    }
}

/// Print the multiplier for a category and, with a base quantity, the scaled amount
fn cmd_scale(
    config: &Config,
    category: Option<&str>,
    adults: u32,
    children: u32,
    base: Option<f64>,
    servings: Option<u32>,
) -> Result<()> {
    debug!(?category, adults, children, ?base, ?servings, "cmd_scale: called");
    let table = QuantityTable::from_config(&config.quantities);
    let scale = table.scale(category, GuestCounts::new(adults, children));

    let label = if scale.estimated {
        format!("{} (estimated)", scale.category).yellow().to_string()
    } else {
        scale.category.clone()
    };
    println!("{:<12} {}", "category:".bold(), label);
    println!(
        "{:<12} {:.2} ({} adults, {} children)",
        "multiplier:".bold(),
        scale.multiplier,
        adults,
        children
    );

    if let Some(base) = base {
        let servings = servings.unwrap_or_else(|| table.reference_servings());
        let scaled = scale_quantity(base, scale.multiplier, servings);
        println!(
            "{:<12} {:.2} (base {} per {} servings)",
            "scaled:".bold(),
            scaled,
            base,
            servings
        );
    }
    Ok(())
}

async fn cmd_simulate(config: &Config, path: PathBuf, persist: bool) -> Result<()> {
    debug!(?path, persist, "cmd_simulate: called");
    let scenario = Scenario::load(&path)?;
    let report = run_scenario(&scenario, config, persist).await?;
    println!("\n{} {} ({})", "finished".bold(), report.session_id, report.stage);
    if persist {
        println!("Snapshot written to {}", config.storage.sessions_dir.display());
    }
    Ok(())
}

fn resolve_stored(store: &SessionStore, reference: &str) -> Result<String> {
    let names: HashMap<String, String> = store
        .list()?
        .into_iter()
        .map(|summary| (summary.session_id, summary.plan_name))
        .collect();
    Ok(resolve_reference(&names, reference)?)
}

fn cmd_sessions_list(config: &Config, format: DisplayFormat) -> Result<()> {
    debug!(%format, "cmd_sessions_list: called");
    let store = SessionStore::new(&config.storage.sessions_dir);
    let summaries = store.list()?;

    if format == DisplayFormat::Json {
        println!("{}", serde_json::to_string_pretty(&summaries)?);
        return Ok(());
    }
    if summaries.is_empty() {
        println!("No sessions in {}", store.dir().display());
        return Ok(());
    }
    for summary in &summaries {
        let run = summary
            .run_step
            .map(|step| step.to_string())
            .unwrap_or_else(|| "-".to_string());
        println!(
            "{}  {:<20} {:<16} {}  {}",
            summary.session_id.cyan(),
            summary.stage,
            run,
            summary.updated_at.format("%Y-%m-%d %H:%M"),
            summary.plan_name
        );
    }
    Ok(())
}

fn cmd_sessions_show(config: &Config, reference: &str, format: DisplayFormat) -> Result<()> {
    debug!(%reference, %format, "cmd_sessions_show: called");
    let store = SessionStore::new(&config.storage.sessions_dir);
    let session_id = resolve_stored(&store, reference)?;
    let record = store
        .load(&session_id)?
        .ok_or_else(|| eyre::eyre!("Session {} disappeared while loading", session_id))?;

    match format {
        DisplayFormat::Json => println!("{}", serde_json::to_string_pretty(&record)?),
        DisplayFormat::Text => {
            print_record(&record);
            print_recent_events(&config.storage.events_dir, &session_id)?;
        }
    }
    Ok(())
}

fn print_record(record: &PlanningRecord) {
    let progress = record.progress();
    println!("{} {}", record.plan_name().bold(), format!("({})", record.session_id).dimmed());
    println!("  stage:    {} - {}", record.stage, stage_prompt(record.stage));
    println!(
        "  progress: {}/{} answered, {:.0}%, {}/{} dishes resolved",
        progress.answered,
        progress.total,
        progress.score * 100.0,
        progress.resolved,
        progress.recipes
    );
    if let Some(per_person) = record.budget_per_person() {
        println!("  budget:   {:.2} per person", per_person);
    }

    if !record.meal_plan.is_empty() {
        println!("  menu:");
        for recipe in &record.meal_plan {
            let state = if recipe.is_resolved() {
                "ready".green()
            } else if recipe.awaiting_user_input {
                "needs input".yellow()
            } else {
                "pending".normal()
            };
            println!("    - {} [{}]", recipe.name, state);
            if let Some(error) = &recipe.last_resolution_error {
                println!("      {}", error.dimmed());
            }
        }
    }

    if let Some(run) = &record.agent_run {
        println!("  run:      {} ({})", run.run_id, run.step);
        if let Some(list) = &run.shopping_list {
            println!("  list:     {} items", list.item_count());
        }
        if let Some(failure) = &run.failure {
            println!("  failed:   {}", failure.red());
        }
        if let Some(report) = &run.delivery {
            for line in report.summary().lines() {
                println!("    {}", line);
            }
        }
    }
}

/// Last few entries of the session's event log, if one was written
fn print_recent_events(events_dir: &Path, session_id: &str) -> Result<()> {
    let entries = read_session_events(events_dir, session_id)?;
    if entries.is_empty() {
        return Ok(());
    }
    println!("  events:   {} logged, latest:", entries.len());
    for entry in entries.iter().rev().take(RECENT_EVENTS).rev() {
        println!(
            "    {} {}",
            entry.timestamp.format("%H:%M:%S").to_string().dimmed(),
            entry.event.event_type()
        );
    }
    Ok(())
}

fn cmd_sessions_delete(config: &Config, reference: &str) -> Result<()> {
    debug!(%reference, "cmd_sessions_delete: called");
    let store = SessionStore::new(&config.storage.sessions_dir);
    let session_id = resolve_stored(&store, reference)?;
    store.delete(&session_id)?;

    let events = config.storage.events_dir.join(&session_id);
    if events.exists() {
        fs::remove_dir_all(&events).with_context(|| format!("Failed to delete {}", events.display()))?;
    }
    println!("Deleted session {}", session_id);
    Ok(())
}
