use anyhow::{bail, Context, Result};
use clap::{Args, Parser, Subcommand};
use std::sync::Arc;
use tracing::{info, warn};
use trip_planner::config::RemoteConfig;
use trip_planner::sync::{Identity, IdentityProvider, RemoteLink, StaticIdentity};
use trip_planner::{
    create_router, AppState, BucketKey, Category, Config, ExpenseCandidate, FileStore,
    HttpExtractor, LocalFirstStore, LocalStore, NatsSpeechEngine, Plan, Planner, RestRemoteStore,
    RestartPolicy, SessionHandle,
};

#[derive(Parser)]
#[command(name = "trip-planner", version, about = "Voice-first trip plans and expense ledgers")]
struct Cli {
    /// Config file, without extension
    #[arg(long, default_value = "config/trip-planner")]
    config: String,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run the HTTP API with voice capture
    Serve,
    /// Generate, save and inspect plans
    #[command(subcommand)]
    Plan(PlanCommand),
    /// Manage a plan's expense ledger
    #[command(subcommand)]
    Expense(ExpenseCommand),
    /// List the signed-in user's remote trips
    Trips,
}

#[derive(Subcommand)]
enum PlanCommand {
    /// Generate a plan from a trip request and save it
    Generate { input: String },
    /// Retry the remote save of a local plan
    Save { key: String },
    /// Show a plan and its budget report
    Show { key: String },
    /// List locally stored plans
    List,
}

#[derive(Subcommand)]
enum ExpenseCommand {
    /// Add an expense from a sentence or from explicit fields
    Add(AddExpense),
    /// List a plan's expenses, newest first
    List { plan: String },
    /// Remove an expense by id
    Remove { plan: String, id: String },
}

#[derive(Args)]
struct AddExpense {
    plan: String,
    /// Sentence for the extractor, e.g. "午饭 80 元"
    #[arg(long, conflicts_with_all = ["amount", "category", "note"])]
    text: Option<String>,
    #[arg(long)]
    amount: Option<f64>,
    #[arg(long)]
    category: Option<String>,
    #[arg(long)]
    note: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt::init();

    let cli = Cli::parse();
    let cfg = Config::load(&cli.config)?;

    info!("Trip planner v{}", env!("CARGO_PKG_VERSION"));
    info!("Loaded config: {}", cfg.service.name);

    let planner = build_planner(&cfg)?;

    match cli.command {
        Command::Serve => serve(&cfg, planner).await,
        Command::Plan(cmd) => plan_command(&planner, cmd).await,
        Command::Expense(cmd) => expense_command(&planner, cmd).await,
        Command::Trips => {
            let trips = planner.list_remote_plans().await?;
            if trips.is_empty() {
                println!("No remote trips (not signed in, or none saved)");
            }
            for trip in trips {
                println!("{}  {}  {}", trip.id, trip.title, trip.input_text);
            }
            Ok(())
        }
    }
}

fn build_planner(cfg: &Config) -> Result<Planner> {
    let kv = FileStore::open(&cfg.storage.path)?;
    info!("Local store: {}", cfg.storage.path);

    let remote = match &cfg.remote {
        Some(remote) => Some(remote_link(remote)?),
        None => {
            info!("No remote configured; running local-only");
            None
        }
    };

    let extractor = HttpExtractor::new(
        &cfg.extractor.base_url,
        std::time::Duration::from_secs(cfg.extractor.timeout_secs),
    )?;

    let store = LocalFirstStore::new(LocalStore::new(kv), remote);
    Ok(Planner::new(store, Arc::new(extractor)))
}

fn remote_link(remote: &RemoteConfig) -> Result<RemoteLink> {
    let store = RestRemoteStore::new(&remote.url, &remote.anon_key)?;

    let identity: Arc<dyn IdentityProvider> = match (&remote.user_id, &remote.access_token) {
        (Some(user_id), Some(access_token)) => {
            info!("Remote sync enabled for user {}", user_id);
            Arc::new(StaticIdentity::signed_in(Identity {
                user_id: user_id.clone(),
                email: remote.email.clone(),
                access_token: access_token.clone(),
            }))
        }
        _ => {
            warn!("Remote configured without a signed-in user; writes stay local");
            Arc::new(StaticIdentity::anonymous())
        }
    };

    Ok(RemoteLink::new(Arc::new(store), identity))
}

async fn serve(cfg: &Config, planner: Planner) -> Result<()> {
    let engine = NatsSpeechEngine::new(
        &cfg.capture.nats_url,
        &cfg.capture.session_id,
        &cfg.capture.language,
    );
    let policy = RestartPolicy {
        after_end: cfg.capture.restart_after_end(),
        after_error: cfg.capture.restart_after_error(),
    };
    let (handle, events, _manager) = SessionHandle::spawn(Box::new(engine), policy);
    let (state, _collector) = AppState::new(planner).with_capture(handle, events);

    let addr = format!("{}:{}", cfg.service.http.bind, cfg.service.http.port);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("Failed to bind {}", addr))?;
    info!("HTTP server listening on {}", addr);

    axum::serve(listener, create_router(state)).await?;
    Ok(())
}

fn open_plan(planner: &Planner, key: &str) -> Result<Plan> {
    match planner.open_plan(&BucketKey::new(key))? {
        Some(plan) => Ok(plan),
        None => bail!("Plan {} not found", key),
    }
}

async fn plan_command(planner: &Planner, cmd: PlanCommand) -> Result<()> {
    match cmd {
        PlanCommand::Generate { input } => {
            let mut plan = planner.generate_plan(&input).await?;
            let outcome = planner.save_plan(&mut plan).await?;
            println!("{}  {}  ({:?})", plan.bucket_key(), plan.title, outcome);
            for day in &plan.days {
                println!("Day {}: {}", day.day, day.title);
                for item in &day.items {
                    println!("  {} {}  {}", item.time, item.name, item.address);
                }
            }
        }
        PlanCommand::Save { key } => {
            let mut plan = open_plan(planner, &key)?;
            let outcome = planner.save_plan(&mut plan).await?;
            println!("{}  ({:?})", plan.bucket_key(), outcome);
        }
        PlanCommand::Show { key } => {
            let plan = open_plan(planner, &key)?;
            println!("{}", serde_json::to_string_pretty(&plan)?);

            let report = planner.budget_report(&plan)?;
            for line in &report.lines {
                println!("{:<10} {:>10.2} / {:>10.2}", line.label, line.actual, line.planned);
            }
            println!(
                "{:<10} {:>10.2} / {:>10.2}",
                "total", report.actual_total, report.planned_total
            );
        }
        PlanCommand::List => {
            for plan in planner.list_local_plans()? {
                let state = if plan.is_draft() { "draft" } else { "synced" };
                println!("{}  {}  [{}]", plan.bucket_key(), plan.title, state);
            }
        }
    }
    Ok(())
}

async fn expense_command(planner: &Planner, cmd: ExpenseCommand) -> Result<()> {
    match cmd {
        ExpenseCommand::Add(args) => {
            let plan = open_plan(planner, &args.plan)?;
            let candidate = match args.text {
                Some(text) => planner.parse_expense(&text).await?,
                None => ExpenseCandidate {
                    amount: args.amount.unwrap_or_default(),
                    category: args
                        .category
                        .as_deref()
                        .and_then(Category::parse)
                        .unwrap_or(Category::Others),
                    note: args.note.unwrap_or_default(),
                }
                .normalized(""),
            };

            let (entry, mirror) = planner.add_expense(&plan, candidate)?;
            println!("{}  {} {:.2}  {}", entry.id, entry.category, entry.amount, entry.note);

            // A one-shot command must wait, or the runtime drops the mirror
            let outcome = mirror.await?;
            println!("sync: {:?}", outcome);
        }
        ExpenseCommand::List { plan } => {
            let plan = open_plan(planner, &plan)?;
            for entry in planner.load_expenses(&plan).await? {
                println!(
                    "{}  {}  {:<9} {:>10.2}  {}",
                    entry.id,
                    entry.created_at.format("%Y-%m-%d %H:%M"),
                    entry.category,
                    entry.amount,
                    entry.note
                );
            }
        }
        ExpenseCommand::Remove { plan, id } => {
            let plan = open_plan(planner, &plan)?;
            let (removed, delete) = planner.remove_expense(&plan, &id)?;
            if !removed {
                bail!("Expense {} not found in {}", id, plan.bucket_key());
            }
            println!("Removed {}", id);
            if let Some(delete) = delete {
                delete.await?;
            }
        }
    }
    Ok(())
}
