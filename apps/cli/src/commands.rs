//! CLI command definitions, routing, and tracing setup.

use std::path::{Path, PathBuf};

use chrono::Utc;
use clap::{Parser, Subcommand};
use color_eyre::eyre::{Result, eyre};
use leadforge_ai::{AdGoal, StrategyRequest, generate_ad_strategy, generate_conversion_assist};
use leadforge_core::{
    IntelligenceInput, LeadSubmission, Services, StageUpdate, compute_lead_intelligence,
    submit_lead, update_stage,
};
use leadforge_shared::{
    AppConfig, Answers, Funnel, Lead, LeadId, Org, OrgId, Stage, init_config, load_config,
    load_config_from, validate_config,
};
use leadforge_storage::Storage;
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::info;

use crate::server;

// ---------------------------------------------------------------------------
// CLI structure
// ---------------------------------------------------------------------------

/// LeadForge: capture leads and automate the first touch.
#[derive(Parser)]
#[command(
    name = "leadforge",
    version,
    about = "Multi-tenant lead capture with scoring, notifications, follow-up sequences, and a rep call bridge.",
    long_about = None,
)]
pub(crate) struct Cli {
    /// Log format: text (default) or json.
    #[arg(long, default_value = "text", global = true)]
    pub log_format: LogFormat,

    /// Verbosity level (-v, -vv).
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Config file (defaults to ~/.leadforge/leadforge.toml).
    #[arg(long, global = true, env = "LEADFORGE_CONFIG")]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Command,
}

/// Log output format.
#[derive(Clone, Debug, clap::ValueEnum)]
pub(crate) enum LogFormat {
    Text,
    Json,
}

/// Top-level CLI subcommands.
#[derive(Subcommand)]
pub(crate) enum Command {
    /// Serve the submission endpoint and Twilio webhooks, with the
    /// automation dispatcher and sequence worker running alongside.
    Serve,

    /// Run the follow-up sequence worker.
    Worker {
        /// Process one batch and exit.
        #[arg(long)]
        once: bool,
    },

    /// Submit a lead from the command line and automate it immediately.
    Submit {
        /// Funnel slug.
        #[arg(long)]
        funnel: String,

        /// Answers as a JSON object.
        #[arg(long)]
        answers: String,

        #[arg(long, default_value = "en")]
        language: String,
    },

    /// Funnel management.
    Funnel {
        #[command(subcommand)]
        action: FunnelAction,
    },

    /// Lead inspection and stage changes.
    Lead {
        #[command(subcommand)]
        action: LeadAction,
    },

    /// Generate an ad campaign strategy for an organization.
    Strategy {
        /// Organization ID.
        #[arg(long)]
        org: String,

        /// Campaign goal: sales, traffic, or financing.
        #[arg(long, default_value = "sales")]
        goal: String,

        /// Monthly budget in dollars.
        #[arg(long)]
        budget: f64,

        #[arg(long)]
        notes: Option<String>,
    },

    /// Configuration management.
    Config {
        /// Config subcommand.
        #[command(subcommand)]
        action: ConfigAction,
    },
}

#[derive(Subcommand)]
pub(crate) enum FunnelAction {
    /// Import an org and its funnels from a JSON file.
    Import {
        /// Path to a `{ "org": ..., "funnels": [...] }` document.
        file: PathBuf,
    },
    /// Print a funnel by slug.
    Show { slug: String },
    /// List all funnels.
    List,
}

#[derive(Subcommand)]
pub(crate) enum LeadAction {
    /// List recent leads.
    List {
        #[arg(long, default_value = "20")]
        limit: u32,
    },
    /// Print a lead with its stage history and automation log.
    Show { id: String },
    /// Close probability, staleness, and stage-leak warnings.
    Intel { id: String },
    /// Move a lead to another pipeline stage.
    Stage {
        id: String,

        /// new, contacted, qualified, proposal, won, or lost.
        #[arg(long)]
        to: String,

        #[arg(long)]
        amount: Option<f64>,

        /// Required for won/lost.
        #[arg(long)]
        reason: Option<String>,

        #[arg(long)]
        note: Option<String>,

        #[arg(long)]
        actor: Option<String>,
    },
    /// Print the lead's follow-up sequence.
    Sequences { id: String },
    /// Draft the next follow-up for the rep.
    Assist { id: String },
}

/// Config subcommands.
#[derive(Subcommand)]
pub(crate) enum ConfigAction {
    /// Initialize config file with defaults.
    Init,
    /// Show resolved configuration.
    Show,
}

// ---------------------------------------------------------------------------
// Tracing setup
// ---------------------------------------------------------------------------

/// Initialize tracing based on CLI flags.
pub(crate) fn init_tracing(cli: &Cli) {
    use tracing_subscriber::{EnvFilter, fmt};

    let filter = match cli.verbose {
        0 => "leadforge=info",
        1 => "leadforge=debug",
        _ => "leadforge=trace",
    };

    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(filter));

    match cli.log_format {
        LogFormat::Text => {
            fmt()
                .with_env_filter(env_filter)
                .with_target(false)
                .init();
        }
        LogFormat::Json => {
            fmt()
                .json()
                .with_env_filter(env_filter)
                .init();
        }
    }
}

// ---------------------------------------------------------------------------
// Command dispatch
// ---------------------------------------------------------------------------

/// Run the CLI command.
pub(crate) async fn run(cli: Cli) -> Result<()> {
    let config_path = cli.config.as_deref();
    match cli.command {
        Command::Serve => server::serve(open_services(config_path).await?).await,
        Command::Worker { once } => cmd_worker(&open_services(config_path).await?, once).await,
        Command::Submit {
            funnel,
            answers,
            language,
        } => cmd_submit(&open_services(config_path).await?, funnel, &answers, language).await,
        Command::Funnel { action } => {
            let services = open_services(config_path).await?;
            match action {
                FunnelAction::Import { file } => cmd_funnel_import(&services, &file).await,
                FunnelAction::Show { slug } => cmd_funnel_show(&services, &slug).await,
                FunnelAction::List => cmd_funnel_list(&services).await,
            }
        }
        Command::Lead { action } => cmd_lead(&open_services(config_path).await?, action).await,
        Command::Strategy {
            org,
            goal,
            budget,
            notes,
        } => {
            let services = open_services(config_path).await?;
            cmd_strategy(&services, &org, &goal, budget, notes.as_deref()).await
        }
        Command::Config { action } => match action {
            ConfigAction::Init => cmd_config_init().await,
            ConfigAction::Show => cmd_config_show(config_path).await,
        },
    }
}

async fn open_services(path: Option<&Path>) -> Result<Services> {
    Ok(Services::from_config(resolve_config(path)?).await?)
}

fn resolve_config(path: Option<&Path>) -> Result<AppConfig> {
    let config = match path {
        Some(p) => load_config_from(p)?,
        None => load_config()?,
    };
    validate_config(&config)?;
    Ok(config)
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn parse_lead_id(raw: &str) -> Result<LeadId> {
    raw.parse().map_err(|e| eyre!("invalid lead id '{raw}': {e}"))
}

async fn load_lead(storage: &Storage, raw: &str) -> Result<Lead> {
    let id = parse_lead_id(raw)?;
    storage
        .get_lead(&id)
        .await?
        .ok_or_else(|| eyre!("no lead with id '{raw}'"))
}

// ---------------------------------------------------------------------------
// Command handlers
// ---------------------------------------------------------------------------

async fn cmd_worker(services: &Services, once: bool) -> Result<()> {
    if once {
        let report = services.worker.run_once(Utc::now()).await?;
        return print_json(&report);
    }

    let (stop_tx, stop_rx) = tokio::sync::watch::channel(false);
    let worker = services.worker.clone();
    let interval = services.poll_interval();
    let handle = tokio::spawn(async move { worker.run_forever(interval, stop_rx).await });

    tokio::signal::ctrl_c().await?;
    info!("shutdown requested");
    let _ = stop_tx.send(true);
    handle.await?;
    Ok(())
}

async fn cmd_submit(
    services: &Services,
    funnel_slug: String,
    answers: &str,
    language: String,
) -> Result<()> {
    let answers: Answers =
        serde_json::from_str(answers).map_err(|e| eyre!("--answers must be a JSON object: {e}"))?;
    let outcome = submit_lead(
        &services.storage,
        LeadSubmission {
            funnel_slug,
            answers,
            language,
            source: serde_json::Map::from_iter([("channel".to_string(), json!("cli"))]),
            honeypot: None,
        },
    )
    .await?;
    info!(lead_id = %outcome.lead_id, "lead stored, running automation");

    let report = services.pipeline.run(outcome.lead_id).await;
    print_json(&report)
}

/// An org and the funnels it owns, as imported from disk.
#[derive(Debug, Deserialize)]
struct FunnelBundle {
    org: Org,
    #[serde(default)]
    funnels: Vec<BundleFunnel>,
}

/// A funnel whose `org_id` may be omitted; it defaults to the bundle's org.
#[derive(Debug, Deserialize)]
struct BundleFunnel {
    #[serde(default)]
    org_id: Option<OrgId>,
    #[serde(flatten)]
    rest: serde_json::Map<String, serde_json::Value>,
}

impl FunnelBundle {
    /// Funnels with `org_id` filled in from the bundle's org.
    fn funnels(&self) -> Result<Vec<Funnel>> {
        self.funnels
            .iter()
            .map(|entry| {
                let mut fields = entry.rest.clone();
                fields.insert("org_id".into(), json!(entry.org_id.unwrap_or(self.org.id)));
                serde_json::from_value(serde_json::Value::Object(fields))
                    .map_err(|e| eyre!("invalid funnel: {e}"))
            })
            .collect()
    }
}

async fn cmd_funnel_import(services: &Services, file: &Path) -> Result<()> {
    let raw = std::fs::read_to_string(file)
        .map_err(|e| eyre!("cannot read '{}': {e}", file.display()))?;
    let bundle: FunnelBundle =
        serde_json::from_str(&raw).map_err(|e| eyre!("invalid funnel bundle: {e}"))?;
    let funnels = bundle.funnels()?;

    services.storage.upsert_org(&bundle.org).await?;
    for funnel in &funnels {
        services.storage.upsert_funnel(funnel).await?;
        println!("  imported funnel {} ({})", funnel.slug, funnel.id);
    }
    println!("  org: {} ({})", bundle.org.name, bundle.org.id);
    Ok(())
}

async fn cmd_funnel_show(services: &Services, slug: &str) -> Result<()> {
    let funnel = services
        .storage
        .get_funnel_by_slug(slug)
        .await?
        .ok_or_else(|| eyre!("no funnel with slug '{slug}'"))?;
    print_json(&funnel)
}

async fn cmd_funnel_list(services: &Services) -> Result<()> {
    for funnel in services.storage.list_funnels().await? {
        let state = if funnel.is_active { "active" } else { "inactive" };
        println!("{:<32} {:<10} {}", funnel.slug, state, funnel.name);
    }
    Ok(())
}

async fn cmd_lead(services: &Services, action: LeadAction) -> Result<()> {
    let storage = &services.storage;

    match action {
        LeadAction::List { limit } => {
            for lead in storage.list_leads(limit).await? {
                println!(
                    "{}  {:<10} score={:<4} {}",
                    lead.id,
                    lead.stage.as_str(),
                    lead.ai_score.map(|s| s.to_string()).unwrap_or_else(|| "-".into()),
                    lead.name().unwrap_or_default()
                );
            }
            Ok(())
        }
        LeadAction::Show { id } => {
            let lead = load_lead(storage, &id).await?;
            let history = storage.list_stage_history(&lead.id).await?;
            let events = storage.list_events(&lead.id).await?;
            print_json(&json!({"lead": lead, "stage_history": history, "events": events}))
        }
        LeadAction::Intel { id } => {
            let lead = load_lead(storage, &id).await?;
            print_json(&compute_lead_intelligence(IntelligenceInput::from(&lead), Utc::now()))
        }
        LeadAction::Stage {
            id,
            to,
            amount,
            reason,
            note,
            actor,
        } => {
            let lead_id = parse_lead_id(&id)?;
            let to_stage: Stage = to.parse()?;
            let result = update_stage(
                storage,
                &lead_id,
                StageUpdate {
                    to_stage,
                    deal_amount: amount,
                    reason,
                    note,
                    actor,
                },
                Utc::now(),
            )
            .await?;
            match &result.event {
                Some(event) => println!(
                    "  {} -> {}",
                    event.from_stage.map(|s| s.as_str()).unwrap_or("-"),
                    event.to_stage
                ),
                None => println!("  already {}", result.lead.stage),
            }
            Ok(())
        }
        LeadAction::Sequences { id } => {
            let lead_id = parse_lead_id(&id)?;
            for step in storage.list_sequence_steps(&lead_id).await? {
                println!(
                    "  #{} {:<8} {}  {}",
                    step.step,
                    step.status.as_str(),
                    step.scheduled_at.format("%Y-%m-%d %H:%M"),
                    step.message
                );
            }
            Ok(())
        }
        LeadAction::Assist { id } => {
            let lead = load_lead(storage, &id).await?;
            let org = storage.get_org(&lead.org_id).await?;
            let industry = org.as_ref().and_then(|o| o.industry_name.as_deref());
            let assist = generate_conversion_assist(services.claude.as_ref(), &lead, industry).await;
            print_json(&assist)
        }
    }
}

async fn cmd_strategy(
    services: &Services,
    org_id: &str,
    goal: &str,
    budget: f64,
    notes: Option<&str>,
) -> Result<()> {
    let id: OrgId = org_id
        .parse()
        .map_err(|e| eyre!("invalid org id '{org_id}': {e}"))?;
    let org = services
        .storage
        .get_org(&id)
        .await?
        .ok_or_else(|| eyre!("no org with id '{org_id}'"))?;
    let goal: AdGoal = goal.parse()?;

    let strategy = generate_ad_strategy(
        services.claude.as_ref(),
        &StrategyRequest {
            org: &org,
            goal,
            monthly_budget: budget,
            notes,
        },
    )
    .await;
    print_json(&strategy)
}

async fn cmd_config_init() -> Result<()> {
    let path = init_config()?;
    println!("Config initialized at: {}", path.display());
    Ok(())
}

async fn cmd_config_show(path: Option<&Path>) -> Result<()> {
    let config = match path {
        Some(p) => load_config_from(p)?,
        None => load_config()?,
    };
    let toml_str = toml::to_string_pretty(&config)?;
    println!("{toml_str}");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn demo_bundle_parses() {
        let bundle: FunnelBundle =
            serde_json::from_str(include_str!("../../../demos/solar-prime.json")).unwrap();
        let funnels = bundle.funnels().unwrap();
        assert_eq!(funnels.len(), 1);
        assert_eq!(funnels[0].org_id, bundle.org.id);
        assert_eq!(funnels[0].slug, "solar-quote");
        assert_eq!(funnels[0].sequence.steps.len(), 3);
        assert!(funnels[0].schema.fields().any(|f| f.is_phone()));
    }

    #[test]
    fn cli_parses_stage_command() {
        let cli = Cli::try_parse_from([
            "leadforge", "lead", "stage", "0192", "--to", "won", "--amount", "1200", "--reason", "signed",
        ])
        .unwrap();
        assert!(matches!(
            cli.command,
            Command::Lead {
                action: LeadAction::Stage { amount: Some(_), .. }
            }
        ));
    }
}
