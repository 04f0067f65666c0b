//! Scenario runner - a whole planning session from a YAML script
//!
//! Every capability is scripted: each message carries the diff the extractor
//! would have produced, dishes map to canned ingredient lists or failures,
//! and delivery formats succeed or fail as listed. `mp simulate` prints the
//! session's events as they happen.

use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;
use std::sync::Arc;

use colored::Colorize;
use eyre::{Context, Result};
use serde::Deserialize;
use tokio::sync::broadcast;
use tracing::{debug, info};

use crate::capability::{CapabilityError, RetryPolicy, ScriptedEditor, ScriptedExtractor, ScriptedSource};
use crate::config::{Config, DeliveryConfig};
use crate::delivery::{DeliveryRouter, ScriptedBackend};
use crate::domain::{DeliveryReport, ExtractionDiff, Ingredient, OutputFormat, PipelineStep, ReviewEdit, Stage};
use crate::events::{PlanEvent, create_event_bus, spawn_event_logger};
use crate::pipeline::AgentPipeline;
use crate::quantity::QuantityTable;
use crate::render::Renderer;
use crate::resolver::RecipeResolver;
use crate::session::{Session, SessionDeps, SessionRegistry, SessionStore};

/// One user message and what the extractor makes of it
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ScriptedMessage {
    pub text: String,
    #[serde(default)]
    pub diff: ExtractionDiff,
}

/// How the ingredient source answers for one dish
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct DishScript {
    pub ingredients: Vec<Ingredient>,
    /// Generation fails with this message
    pub fail: Option<String>,
    /// Generation never answers; the capability timeout applies
    pub hang: bool,
}

/// A review-time step: a sentence for the list editor or a typed edit
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum ReviewStep {
    Say(String),
    Edit(ReviewEdit),
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Scenario {
    pub name: String,
    pub messages: Vec<ScriptedMessage>,
    pub dishes: BTreeMap<String, DishScript>,
    /// Artifact label -> ingredients extracted from it
    pub artifacts: BTreeMap<String, Vec<Ingredient>>,
    /// Instruction -> edits the list editor returns
    pub editor: BTreeMap<String, Vec<ReviewEdit>>,
    #[serde(rename = "output-formats")]
    pub output_formats: Vec<OutputFormat>,
    #[serde(rename = "failing-formats")]
    pub failing_formats: Vec<OutputFormat>,
    pub review: Vec<ReviewStep>,
    pub exclusions: Vec<String>,
    /// Retry every failed format once after delivery
    #[serde(rename = "retry-failed")]
    pub retry_failed: bool,
}

impl Scenario {
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        debug!(?path, "Scenario::load: called");
        let content =
            std::fs::read_to_string(path).with_context(|| format!("Failed to read scenario {}", path.display()))?;
        serde_yaml::from_str(&content).with_context(|| format!("Failed to parse scenario {}", path.display()))
    }

    fn source(&self) -> ScriptedSource {
        let mut source = ScriptedSource::new();
        for (dish, script) in &self.dishes {
            source = if script.hang {
                source.with_hang(dish)
            } else if let Some(message) = &script.fail {
                source.with_failure(dish, CapabilityError::Rejected(message.clone()))
            } else {
                source.with_dish(dish, script.ingredients.clone())
            };
        }
        for (label, ingredients) in &self.artifacts {
            source = source.with_artifact(label, ingredients.clone());
        }
        source
    }

    fn editor(&self) -> ScriptedEditor {
        self.editor
            .iter()
            .fold(ScriptedEditor::new(), |editor, (instruction, edits)| {
                editor.with_instruction(instruction, edits.clone())
            })
    }

    /// Configured backends, with scripted stand-ins for everything else
    ///
    /// Failing formats always get a failing backend so the scenario's
    /// outcome does not depend on the network.
    fn router(&self, config: &DeliveryConfig) -> Result<DeliveryRouter> {
        let mut router = DeliveryRouter::from_config(config).context("Failed to set up delivery backends")?;
        for format in &self.output_formats {
            if self.failing_formats.contains(format) {
                router = router.with_backend(
                    *format,
                    Arc::new(ScriptedBackend::failing(format!("{} is unavailable", format))),
                );
            } else if !router.supports(*format) {
                router = router.with_backend(
                    *format,
                    Arc::new(ScriptedBackend::succeeding(format!("https://lists.example/{}", format))),
                );
            }
        }
        Ok(router)
    }
}

/// Where a scenario ended up
#[derive(Debug, Clone)]
pub struct ScenarioReport {
    pub session_id: String,
    pub stage: Stage,
    pub delivery: Option<DeliveryReport>,
}

/// Drive a session through the scenario, printing events to stdout
///
/// With `persist` the session snapshot and event log are written to the
/// configured storage directories.
pub async fn run_scenario(scenario: &Scenario, config: &Config, persist: bool) -> Result<ScenarioReport> {
    info!(name = %scenario.name, persist, "run_scenario: called");
    let bus = create_event_bus();
    let mut rx = bus.subscribe();
    let logger = persist.then(|| spawn_event_logger(bus.clone(), config.storage.events_dir.clone()));

    let retry = RetryPolicy::from(&config.pipeline);
    let resolver = RecipeResolver::new(Arc::new(scenario.source()), retry)
        .with_max_concurrent(config.pipeline.max_concurrent_resolutions);
    let pipeline = AgentPipeline::new(
        resolver,
        QuantityTable::from_config(&config.quantities),
        scenario.router(&config.delivery)?,
        Arc::new(scenario.editor()),
        retry,
    );
    let extractor = ScriptedExtractor::new(scenario.messages.iter().map(|m| Ok(m.diff.clone())));
    let deps = SessionDeps {
        extractor: Arc::new(extractor),
        pipeline: Arc::new(pipeline),
        retry,
        store: persist.then(|| SessionStore::new(&config.storage.sessions_dir)),
    };
    let registry = SessionRegistry::new(bus.clone(), deps);
    let title = if scenario.name.is_empty() { "scenario" } else { &scenario.name };
    let session = registry.create(title).await?;
    println!("{} {}", "session".bold(), session.id());

    for message in &scenario.messages {
        println!("\n{} {}", ">".green().bold(), message.text);
        if let Err(e) = session.handle_message(&message.text).await {
            println!("  {} {}", "error:".red(), e);
        }
        drain(&mut rx);
    }

    if session.stage().await == Stage::SelectingOutput && !scenario.output_formats.is_empty() {
        let formats: BTreeSet<OutputFormat> = scenario.output_formats.iter().copied().collect();
        println!("\n{} {}", "outputs:".bold(), join(&formats));
        if let Err(e) = session.select_outputs(formats).await {
            println!("  {} {}", "error:".red(), e);
        }
        drain(&mut rx);
    }

    let delivery = if run_step(&session).await == Some(PipelineStep::AwaitingReview) {
        review(scenario, &session, &mut rx).await?
    } else {
        println!("\n{} session stopped in {}", "note:".yellow(), session.stage().await);
        None
    };

    let report = ScenarioReport {
        session_id: session.id().to_string(),
        stage: session.stage().await,
        delivery,
    };

    // the logger stops once every sender is gone
    session.cancel();
    drop(session);
    drop(registry);
    drop(bus);
    if let Some(logger) = logger {
        let _ = logger.await;
    }
    Ok(report)
}

async fn review(
    scenario: &Scenario,
    session: &Session,
    rx: &mut broadcast::Receiver<PlanEvent>,
) -> Result<Option<DeliveryReport>> {
    let renderer = Renderer::new();
    for step in &scenario.review {
        let result = match step {
            ReviewStep::Say(text) => {
                println!("\n{} {}", ">".green().bold(), text);
                session.handle_message(text).await.map(|outcome| outcome.review_edit)
            }
            ReviewStep::Edit(edit) => {
                println!("\n{} {:?}", "edit:".bold(), edit);
                session.apply_review_edit(edit.clone()).await.map(Some)
            }
        };
        match result {
            Ok(Some(list)) => {
                let title = session.snapshot().await.shopping_title();
                println!("{}", renderer.review(&title, &list)?);
            }
            Ok(None) => println!("  {}", "not a list correction".dimmed()),
            Err(e) => println!("  {} {}", "error:".red(), e),
        }
        drain(rx);
    }

    let exclusions: BTreeSet<String> = scenario.exclusions.iter().cloned().collect();
    println!("\n{} excluding [{}]", "approve:".bold(), join(&exclusions));
    let mut report = session.approve(exclusions).await?;
    drain(rx);

    if scenario.retry_failed {
        let failed: Vec<OutputFormat> = report.failures().map(|r| r.format).collect();
        for format in failed {
            println!("\n{} {}", "retry:".bold(), format);
            match session.retry_delivery(format).await {
                Ok(result) => report.upsert(result),
                Err(e) => println!("  {} {}", "error:".red(), e),
            }
            drain(rx);
        }
    }

    println!("\n{}\n{}", "delivery report".bold(), report.summary());
    Ok(Some(report))
}

async fn run_step(session: &Session) -> Option<PipelineStep> {
    session.snapshot().await.agent_run.map(|run| run.step)
}

fn join<T: std::fmt::Display>(items: &BTreeSet<T>) -> String {
    items.iter().map(|i| i.to_string()).collect::<Vec<_>>().join(", ")
}

/// Print everything emitted since the last drain
fn drain(rx: &mut broadcast::Receiver<PlanEvent>) {
    loop {
        match rx.try_recv() {
            Ok(event) => print_event(&event),
            Err(broadcast::error::TryRecvError::Lagged(n)) => {
                println!("  {} {} events skipped", "warn:".yellow(), n);
            }
            Err(_) => break,
        }
    }
}

fn print_event(event: &PlanEvent) {
    match event {
        PlanEvent::StageChanged { from, to, .. } => {
            println!("  {} {} -> {}", "stage".cyan(), from, to.to_string().cyan().bold());
        }
        PlanEvent::PipelineStep { step, .. } => println!("  {} {}", "step".blue(), step),
        PlanEvent::ResolutionSettled { dish, error, .. } => match error {
            None => println!("  {} {}", "resolved".green(), dish),
            Some(error) => println!("  {} {}: {}", "unresolved".yellow(), dish, error),
        },
        PlanEvent::ReviewReady { message, .. } => println!("\n{}", message),
        PlanEvent::DeliveryFinished { result, .. } => match &result.error {
            None => println!("  {} {}", "delivered".green(), result.format),
            Some(error) => println!("  {} {}: {}", "failed".red(), result.format, error),
        },
        PlanEvent::RunCompleted { .. } => println!("  {}", "run done".green().bold()),
        PlanEvent::RunFailed { reason, .. } => println!("  {} {}", "run failed:".red().bold(), reason),
        PlanEvent::Warning { context, message, .. } => println!("  {} [{}] {}", "warn:".yellow(), context, message),
        PlanEvent::Error { context, message, .. } => println!("  {} [{}] {}", "error:".red(), context, message),
        PlanEvent::SessionClosed { .. } => {}
    }
}
