//! specloop - iterative design specification refinement
//!
//! ## Commands
//!
//! - `generate`: create a spec from a prompt and refine it until it converges
//! - `switch`: apply one targeted edit (e.g. a material swap) without a loop
//! - `iterate`: run the refinement loop on a stored spec
//! - `batch`: run many generate/iterate requests with bounded parallelism
//! - `show`, `history`, `diff`, `evaluate`: read-only inspection

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{info, Level};

use specloop_core::backend::{GenerationBackend, HttpBackend, HttpBackendConfig, RuleBasedBackend};
use specloop_core::{
    diff_specs, AgentCoordinator, BatchItem, BatchItemResult, ChangeKind, EvaluationResult, Generator,
    RefinementConfig, SessionOutcome, SpecDiff, SwitchOutcome, METRICS,
};
use specloop_state::fakes::MemorySpecStore;
use specloop_state::{FsSpecStore, IterationRecord, SpecId, SpecStore, Specification, SurrealSpecStore};

#[derive(Parser)]
#[command(name = "specloop")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Iterative design specification refinement", long_about = None)]
struct Cli {
    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Emit JSON-formatted log lines
    #[arg(long, global = true)]
    json: bool,

    /// Print results as JSON instead of text
    #[arg(long, global = true)]
    output_json: bool,

    /// TOML file with refinement settings
    #[arg(long, global = true, env = "SPECLOOP_CONFIG")]
    config: Option<PathBuf>,

    /// Where specs and iteration records are kept
    #[arg(long, global = true, value_enum, default_value_t = StoreKind::Fs)]
    store: StoreKind,

    /// Data directory for the fs and surreal stores
    #[arg(long, global = true, env = "SPECLOOP_DATA_DIR", default_value = ".specloop")]
    data_dir: PathBuf,

    /// Generation backend
    #[arg(long, global = true, value_enum, default_value_t = BackendKind::Rules)]
    backend: BackendKind,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum StoreKind {
    Fs,
    Memory,
    Surreal,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum BackendKind {
    Rules,
    Http,
}

#[derive(Subcommand)]
enum Commands {
    /// Generate a new spec from a prompt and refine it
    Generate {
        /// Design prompt, e.g. "Modern office chair"
        #[arg(required = true, num_args = 1..)]
        prompt: Vec<String>,
    },

    /// Apply one edit to a stored spec
    Switch {
        spec_id: String,

        /// Free-form instruction, e.g. "set floor_1.material.type to marble"
        #[arg(conflicts_with_all = ["object", "material"])]
        instruction: Option<String>,

        /// Object whose material to switch
        #[arg(long, requires = "material")]
        object: Option<String>,

        /// New material type
        #[arg(long, requires = "object")]
        material: Option<String>,
    },

    /// Run the refinement loop on a stored spec
    Iterate {
        spec_id: String,

        /// First-round instruction (synthesized from the evaluation if omitted)
        #[arg(short, long)]
        instruction: Option<String>,
    },

    /// Run a JSON array of generate/iterate requests
    Batch {
        /// File with `[{"op": "generate", "prompt": ".."}, {"op": "iterate", "spec_id": ".."}]`
        file: PathBuf,
    },

    /// Print a stored spec
    Show { spec_id: String },

    /// Show the iteration records of a spec
    History {
        spec_id: String,

        /// Maximum number of records to show, newest last
        #[arg(short, long, default_value = "20")]
        limit: usize,
    },

    /// Show the changes made by one iteration record
    Diff {
        spec_id: String,

        /// Record position in the history, 0 = oldest (default: newest)
        #[arg(short, long)]
        record: Option<usize>,
    },

    /// Score a stored spec
    Evaluate { spec_id: String },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let level = if cli.verbose { Level::DEBUG } else { Level::INFO };
    specloop_core::init_tracing(cli.json, level);

    let config = RefinementConfig::load(cli.config.as_deref()).context("Failed to load configuration")?;
    let store = open_store(cli.store, &cli.data_dir).await?;
    let backend = open_backend(cli.backend)?;
    let coordinator = Arc::new(
        AgentCoordinator::new(Arc::new(Generator::new(backend)), store, config)
            .context("Failed to build coordinator")?,
    );

    let result = run(&coordinator, cli.command, cli.output_json).await;
    METRICS.flush();
    result
}

async fn run(coordinator: &Arc<AgentCoordinator>, command: Commands, json: bool) -> Result<()> {
    match command {
        Commands::Generate { prompt } => cmd_generate(coordinator, &prompt.join(" "), json).await,
        Commands::Switch {
            spec_id,
            instruction,
            object,
            material,
        } => cmd_switch(coordinator, &spec_id, instruction, object, material, json).await,
        Commands::Iterate {
            spec_id,
            instruction,
        } => cmd_iterate(coordinator, &spec_id, instruction.as_deref(), json).await,
        Commands::Batch { file } => cmd_batch(coordinator, &file, json).await,
        Commands::Show { spec_id } => cmd_show(coordinator, &spec_id).await,
        Commands::History { spec_id, limit } => cmd_history(coordinator, &spec_id, limit, json).await,
        Commands::Diff { spec_id, record } => cmd_diff(coordinator, &spec_id, record, json).await,
        Commands::Evaluate { spec_id } => cmd_evaluate(coordinator, &spec_id, json).await,
    }
}

async fn open_store(kind: StoreKind, data_dir: &Path) -> Result<Arc<dyn SpecStore>> {
    let store: Arc<dyn SpecStore> = match kind {
        StoreKind::Memory => Arc::new(MemorySpecStore::new()),
        StoreKind::Fs => Arc::new(
            FsSpecStore::new(data_dir).with_context(|| format!("Failed to open spec store at {:?}", data_dir))?,
        ),
        StoreKind::Surreal => {
            let path = data_dir.join("db");
            Arc::new(
                SurrealSpecStore::from_env(&path.to_string_lossy())
                    .await
                    .context("Failed to connect to SurrealDB")?,
            )
        }
    };
    Ok(store)
}

fn open_backend(kind: BackendKind) -> Result<Arc<dyn GenerationBackend>> {
    let backend: Arc<dyn GenerationBackend> = match kind {
        BackendKind::Rules => Arc::new(RuleBasedBackend::new()),
        BackendKind::Http => {
            let Some(config) = HttpBackendConfig::from_env() else {
                bail!("SPECLOOP_BACKEND_URL must be set for the http backend");
            };
            let backend = HttpBackend::new(config).context("Failed to build HTTP backend")?;
            info!(endpoint = %backend.endpoint(), "using HTTP generation backend");
            Arc::new(backend)
        }
    };
    Ok(backend)
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

async fn cmd_generate(coordinator: &AgentCoordinator, prompt: &str, json: bool) -> Result<()> {
    let outcome = coordinator.generate(prompt).await?;
    if json {
        return print_json(&outcome);
    }
    println!("{}", render_outcome_text(&outcome));
    Ok(())
}

async fn cmd_switch(
    coordinator: &AgentCoordinator,
    spec_id: &str,
    instruction: Option<String>,
    object: Option<String>,
    material: Option<String>,
    json: bool,
) -> Result<()> {
    let spec_id = SpecId::from(spec_id);
    let outcome = match (instruction, object, material) {
        (Some(instruction), _, _) => coordinator.switch(&spec_id, &instruction).await?,
        (None, Some(object), Some(material)) => {
            coordinator.switch_material(&spec_id, &object, &material).await?
        }
        _ => bail!("give an instruction or both --object and --material"),
    };
    if json {
        return print_json(&outcome);
    }
    println!("{}", render_switch_text(&outcome));
    Ok(())
}

async fn cmd_iterate(coordinator: &AgentCoordinator, spec_id: &str, instruction: Option<&str>, json: bool) -> Result<()> {
    let outcome = coordinator.iterate(&SpecId::from(spec_id), instruction).await?;
    if json {
        return print_json(&outcome);
    }
    println!("{}", render_outcome_text(&outcome));
    Ok(())
}

async fn cmd_batch(coordinator: &Arc<AgentCoordinator>, file: &Path, json: bool) -> Result<()> {
    let content = std::fs::read_to_string(file).with_context(|| format!("Failed to read batch file: {:?}", file))?;
    let items: Vec<BatchItem> =
        serde_json::from_str(&content).with_context(|| format!("Invalid batch file {:?}", file))?;
    let results = coordinator.batch(items).await;
    if json {
        return print_json(&results);
    }
    println!("{}", render_batch_text(&results));
    Ok(())
}

async fn cmd_show(coordinator: &AgentCoordinator, spec_id: &str) -> Result<()> {
    let spec = coordinator.get_spec(&SpecId::from(spec_id)).await?;
    print_json(&spec)
}

async fn cmd_history(coordinator: &AgentCoordinator, spec_id: &str, limit: usize, json: bool) -> Result<()> {
    let history = coordinator.history(&SpecId::from(spec_id)).await?;
    let skip = history.len().saturating_sub(limit);
    let shown = &history[skip..];
    if json {
        return print_json(&shown);
    }
    if shown.is_empty() {
        println!("No iterations found for '{}'", spec_id);
        return Ok(());
    }
    for (offset, record) in shown.iter().enumerate() {
        println!("{}", render_record_text(skip + offset, record));
        println!();
    }
    Ok(())
}

async fn cmd_diff(coordinator: &AgentCoordinator, spec_id: &str, record: Option<usize>, json: bool) -> Result<()> {
    let history = coordinator.history(&SpecId::from(spec_id)).await?;
    let Some(last) = history.len().checked_sub(1) else {
        bail!("No iterations found for '{}'", spec_id);
    };
    let index = record.unwrap_or(last);
    let Some(entry) = history.get(index) else {
        bail!("Record {} out of range (history has {} records)", index, history.len());
    };
    let diff = diff_specs(entry.before_spec.as_ref(), &entry.after_spec);
    if json {
        return print_json(&diff);
    }
    println!("{}", render_diff_text(&diff));
    Ok(())
}

async fn cmd_evaluate(coordinator: &AgentCoordinator, spec_id: &str, json: bool) -> Result<()> {
    let evaluation = coordinator.evaluate(&SpecId::from(spec_id)).await?;
    if json {
        return print_json(&evaluation);
    }
    println!("{}", render_evaluation_text(&evaluation));
    Ok(())
}

fn render_outcome_text(outcome: &SessionOutcome) -> String {
    let mut out = String::new();
    out.push_str(&format!("spec:    {}\n", outcome.spec_id));
    out.push_str(&format!("status:  {}\n", outcome.status));
    out.push_str(&format!("rounds:  {}\n", outcome.rounds));
    match outcome.best_score {
        Some(score) => out.push_str(&format!("best:    {:.3}\n", score)),
        None => out.push_str("best:    -\n"),
    }
    if let Some(reason) = &outcome.failure {
        out.push_str(&format!("failure: {}\n", reason));
    }
    if !outcome.history_complete {
        out.push_str("warning: history may be incomplete\n");
        for e in &outcome.store_errors {
            out.push_str(&format!("  ! {}\n", e));
        }
    }
    if let Some(spec) = &outcome.best_spec {
        out.push_str("\nObjects:\n");
        out.push_str(&render_objects_text(spec));
    }
    out.trim_end().to_string()
}

fn render_objects_text(spec: &Specification) -> String {
    let mut out = String::new();
    for o in &spec.objects {
        let d = &o.dimensions;
        out.push_str(&format!(
            "  {:<12} {:<12} {}x{}x{} {}\n",
            o.object_id, o.material.material_type, d.length, d.width, d.height, d.units
        ));
    }
    out
}

fn render_switch_text(outcome: &SwitchOutcome) -> String {
    let mut out = String::new();
    out.push_str(&format!("iteration: {}\n", outcome.iteration_id));
    if outcome.degraded {
        out.push_str(&format!(
            "degraded:  {}\n",
            outcome.failure.as_deref().unwrap_or("generation failed")
        ));
    }
    for e in &outcome.store_errors {
        out.push_str(&format!("  ! {}\n", e));
    }
    out.push('\n');
    out.push_str(&render_diff_text(&outcome.changes));
    out.trim_end().to_string()
}

fn render_record_text(index: usize, record: &IterationRecord) -> String {
    let round = record
        .round_index
        .map_or_else(|| "manual".to_string(), |r| format!("round {r}"));
    let score = record.score.map_or_else(|| "-".to_string(), |s| format!("{s:.3}"));
    let mut out = format!(
        "#{index} {} ({round}, score {score}){}\nDate:   {}\n",
        record.iter_id,
        if record.degraded { " [degraded]" } else { "" },
        record.timestamp.format("%Y-%m-%d %H:%M:%S UTC")
    );
    out.push_str(&format!("\n    {}", truncate(&record.feedback, 120)));
    out
}

fn render_diff_text(diff: &SpecDiff) -> String {
    let mut out = String::new();
    out.push_str("Spec Diff\n");
    out.push_str("=========\n");
    out.push_str(&format!("added: {}\n", diff.count(ChangeKind::Added)));
    out.push_str(&format!("removed: {}\n", diff.count(ChangeKind::Removed)));
    out.push_str(&format!("modified: {}\n", diff.count(ChangeKind::Modified)));

    if !diff.is_empty() {
        out.push('\n');
        for c in &diff.changes {
            let marker = match c.kind {
                ChangeKind::Added => '+',
                ChangeKind::Removed => '-',
                ChangeKind::Modified => '~',
            };
            match c.kind {
                ChangeKind::Removed => out.push_str(&format!("  {} {}\n", marker, c.object_id)),
                _ => out.push_str(&format!(
                    "  {} {}.{}: {} -> {}\n",
                    marker, c.object_id, c.field, c.before, c.after
                )),
            }
        }
    }

    out.trim_end().to_string()
}

fn render_evaluation_text(evaluation: &EvaluationResult) -> String {
    let mut out = format!("score: {:.3}\n", evaluation.score);
    for (criterion, b) in &evaluation.breakdown {
        out.push_str(&format!(
            "  {:<26} weight {:.2}  raw {:.3}  contribution {:.3}",
            criterion.as_str(),
            b.weight,
            b.raw,
            b.contribution
        ));
        if let Some(e) = &b.error {
            out.push_str(&format!("  (error: {e})"));
        }
        out.push('\n');
    }
    for criterion in &evaluation.skipped {
        out.push_str(&format!("  {:<26} skipped\n", criterion.as_str()));
    }
    out.trim_end().to_string()
}

fn render_batch_text(results: &[BatchItemResult]) -> String {
    let mut out = String::new();
    for r in results {
        match (&r.outcome, &r.error) {
            (Some(outcome), _) => out.push_str(&format!(
                "[{}] {} {} rounds={} best={}\n",
                r.index,
                outcome.spec_id,
                outcome.status,
                outcome.rounds,
                outcome
                    .best_score
                    .map_or_else(|| "-".to_string(), |s| format!("{s:.3}"))
            )),
            (None, error) => out.push_str(&format!(
                "[{}] error: {}\n",
                r.index,
                error.as_deref().unwrap_or("unknown")
            )),
        }
    }
    out.trim_end().to_string()
}

/// Truncate a string for display
fn truncate(s: &str, max_chars: usize) -> String {
    if s.chars().count() <= max_chars {
        s.to_string()
    } else {
        let head: String = s.chars().take(max_chars.saturating_sub(3)).collect();
        format!("{head}...")
    }
}
