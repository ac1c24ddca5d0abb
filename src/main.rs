use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use hailstorm::ask::terminal::TerminalResponder;
use hailstorm::audit::{self, AuditSink};
use hailstorm::cli::{Cli, Commands, ConfigAction, StageArg};
use hailstorm::config::{reload, HailstormConfig};
use hailstorm::gate::{GateDecision, GateReport};
use hailstorm::gateway::{AgentRequest, Gateway, GatewayBuilder, Outcome};
use hailstorm::notification::NotificationEvent;
use hailstorm::sim::{self, Scenario};
use hailstorm::web::{self, AppState};
use tracing_subscriber::EnvFilter;

const DEFAULT_TEMPLATE: &str = include_str!("../templates/default.json");
const STRICT_TEMPLATE: &str = include_str!("../templates/strict.json");

fn dirs_path() -> PathBuf {
    let home = std::env::var("HOME").unwrap_or_else(|_| ".".to_string());
    let dir = PathBuf::from(home).join(".hailstorm");
    std::fs::create_dir_all(&dir).ok();
    dir
}

fn db_path(config: Option<&HailstormConfig>) -> PathBuf {
    config
        .and_then(|c| c.audit.path.clone())
        .unwrap_or_else(|| dirs_path().join("audit.db"))
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Serve => cmd_serve(&cli.config).await?,
        Commands::Check {
            agent,
            role,
            stage,
            response,
            prompt,
        } => {
            let allowed = cmd_check(&cli.config, agent, role, stage, response, prompt).await?;
            if !allowed {
                std::process::exit(1);
            }
        }
        Commands::Simulate { scenario } => cmd_simulate(&cli.config, scenario.as_deref()).await?,
        Commands::Audit {
            tail,
            export,
            format,
        } => cmd_audit(&cli.config, tail, export, &format)?,
        Commands::Status => cmd_status(&cli.config)?,
        Commands::Init => cmd_init(&cli.config)?,
        Commands::Config { action } => match action {
            ConfigAction::Show => cmd_config_show(&cli.config)?,
            ConfigAction::Template { name } => cmd_config_template(&cli.config, &name)?,
        },
    }

    Ok(())
}

/// The config file when present, built-in defaults otherwise.
fn load_or_default(config_path: &Path) -> anyhow::Result<HailstormConfig> {
    if config_path.exists() {
        Ok(HailstormConfig::load_from_path(config_path)?)
    } else {
        println!(
            "No config at {}, using defaults (run 'hailstorm init' to create one)",
            config_path.display()
        );
        Ok(HailstormConfig::default())
    }
}

fn with_audit(builder: GatewayBuilder, config: &HailstormConfig) -> anyhow::Result<GatewayBuilder> {
    if !config.audit.enabled {
        return Ok(builder);
    }
    let path = db_path(Some(config));
    let pool = audit::open_pool(&path)
        .with_context(|| format!("opening audit database {}", path.display()))?;
    Ok(builder.audit(AuditSink::with_pool(pool)))
}

async fn cmd_serve(config_path: &Path) -> anyhow::Result<()> {
    let config = HailstormConfig::load_from_path(config_path)?;
    let listen = config.server.listen.clone();
    let (input, output) = config.enabled_checks();

    println!("Hailstorm starting...");
    println!("Config:       {}", config_path.display());
    println!("Listen:       {}", listen);
    println!(
        "Executor:     {}",
        config.executor.url.as_deref().unwrap_or("(none, /v1/invoke disabled)")
    );
    println!("Input gate:   [{}]", input.join(", "));
    println!("Output gate:  [{}]", output.join(", "));

    let mut builder = with_audit(Gateway::builder(config.clone()), &config)?;
    if config.ask.terminal {
        builder = builder.ask_responder(Arc::new(TerminalResponder::new()));
    }
    let gateway = Arc::new(builder.build()?);

    let _watcher = match reload::start_file_watcher(config_path.to_path_buf(), gateway.clone()) {
        Ok(w) => Some(w),
        Err(e) => {
            tracing::warn!("Config hot reload disabled: {}", e);
            None
        }
    };
    reload::start_sighup_handler(config_path.to_path_buf(), gateway.clone());

    gateway
        .notifications()
        .dispatch(NotificationEvent::GatewayStarted {
            listen_addr: listen.clone(),
        });

    let state = Arc::new(AppState {
        gateway: gateway.clone(),
    });
    web::start(&listen, state, async {
        tokio::signal::ctrl_c().await.ok();
        println!("\nShutting down...");
    })
    .await?;

    gateway
        .notifications()
        .dispatch_and_wait(NotificationEvent::GatewayShutdown)
        .await;
    Ok(())
}

async fn cmd_check(
    config_path: &Path,
    agent: String,
    role: Option<String>,
    stage: StageArg,
    response: Option<String>,
    prompt: String,
) -> anyhow::Result<bool> {
    let config = load_or_default(config_path)?;
    let gateway = with_audit(Gateway::builder(config.clone()), &config)?.build()?;

    let mut request = AgentRequest::new(agent, prompt);
    request.role = role;
    let report = match stage {
        StageArg::Input => gateway.check_input(request).await,
        StageArg::Output => {
            let response = response.context("--response is required with --stage output")?;
            gateway.check_output(request, &response).await
        }
    };

    print_report(&report);
    Ok(report.is_allowed())
}

fn print_report(report: &GateReport) {
    println!("{} gate", report.stage);
    println!("──────────────────");
    for record in &report.records {
        println!(
            "  {:<14} {:<10} {:>5}ms  {}",
            record.check, record.action, record.elapsed_ms, record.reason
        );
    }
    match &report.decision {
        GateDecision::Allowed { text, rewritten } => {
            println!("\nALLOWED{}", if *rewritten { " (rewritten)" } else { "" });
            println!("{}", text);
        }
        GateDecision::Denied { check, reason } => {
            println!("\nDENIED by '{}': {}", check, reason);
        }
    }
}

async fn cmd_simulate(config_path: &Path, scenario_path: Option<&Path>) -> anyhow::Result<()> {
    let config = load_or_default(config_path)?;
    let scenario = match scenario_path {
        Some(path) => Scenario::load(path)?,
        None => Scenario::builtin()?,
    };

    let gateway = with_audit(Gateway::builder(config.clone()), &config)?
        .executor(Arc::new(scenario.executor()?))
        .build()?;

    println!("Starting simulation ({} agents)...", scenario.agents.len());
    for run in sim::run_simulation(&gateway, &scenario).await {
        match run.result {
            Ok(Outcome::Allowed { response, .. }) => println!("  {}", response),
            Ok(Outcome::Denied {
                stage,
                check,
                reason,
                ..
            }) => println!("  {}: denied at {} gate by '{}': {}", run.agent_id, stage, check, reason),
            Err(e) => println!("  {}: error: {}", run.agent_id, e),
        }
    }
    println!("Simulation complete!");
    Ok(())
}

fn config_if_present(config_path: &Path) -> Option<HailstormConfig> {
    config_path
        .exists()
        .then(|| HailstormConfig::load_from_path(config_path).ok())
        .flatten()
}

fn cmd_audit(config_path: &Path, tail: usize, export: bool, format: &str) -> anyhow::Result<()> {
    let db = db_path(config_if_present(config_path).as_ref());
    if !db.exists() {
        println!("No audit database found. Run 'hailstorm serve' first.");
        return Ok(());
    }

    let conn = audit::open_db(&db)?;

    if export {
        match format {
            "csv" => print!("{}", audit::export::export_csv(&conn)?),
            _ => println!("{}", audit::export::export_json(&conn)?),
        }
    } else {
        let entries = audit::query_recent(&conn, tail)?;
        if entries.is_empty() {
            println!("No audit entries found.");
        } else {
            println!(
                "{:<26} {:<12} {:<8} {:<14} {:<8} {}",
                "TIMESTAMP", "AGENT", "STAGE", "CHECK", "ACTION", "REASON"
            );
            println!("{}", "─".repeat(110));
            for entry in &entries {
                println!(
                    "{:<26} {:<12} {:<8} {:<14} {:<8} {}",
                    entry.timestamp,
                    entry.agent_id,
                    entry.stage,
                    entry.check_name,
                    entry.action,
                    entry.reason
                );
            }
        }
    }
    Ok(())
}

fn cmd_status(config_path: &Path) -> anyhow::Result<()> {
    let config = config_if_present(config_path);

    println!("Hailstorm Status");
    println!("──────────────────");
    match &config {
        Some(config) => {
            let (input, output) = config.enabled_checks();
            println!("Config:       {}", config_path.display());
            println!("Input gate:   [{}]", input.join(", "));
            println!("Output gate:  [{}]", output.join(", "));
        }
        None => println!("Config:       not found or invalid ({})", config_path.display()),
    }

    let db = db_path(config.as_ref());
    if db.exists() {
        let conn = audit::open_db(&db)?;
        let stats = audit::query_stats(&conn)?;
        println!("Gate events:  {}", stats.total);
        println!("  Allowed:    {}", stats.allowed);
        println!("  Rewritten:  {}", stats.rewritten);
        println!("  Denied:     {}", stats.denied);
        println!("  Errors:     {}", stats.errors);
    } else {
        println!("No audit database found.");
        println!("Run 'hailstorm serve' to begin auditing.");
    }
    Ok(())
}

fn cmd_config_show(config_path: &Path) -> anyhow::Result<()> {
    let config = HailstormConfig::load_from_path(config_path)?;
    let (input, output) = config.enabled_checks();

    println!("Current Configuration ({})", config_path.display());
    println!("═══════════════════════════════════════");
    println!("Listen:   {}", config.server.listen);
    println!("Executor: {}", config.executor.url.as_deref().unwrap_or("(none)"));
    println!(
        "Input gate  (on_fail: {:?}, on_error: {:?}): {}",
        config.input_gate.settings.on_fail,
        config.input_gate.settings.on_error,
        input.join(" → ")
    );
    println!(
        "Output gate (on_fail: {:?}, on_error: {:?}): {}",
        config.output_gate.settings.on_fail,
        config.output_gate.settings.on_error,
        output.join(" → ")
    );
    if let Some(policy) = &config.input_gate.policy {
        println!("Policy default: {:?}", policy.default);
        for rule in &policy.rules {
            let roles = rule
                .roles
                .as_ref()
                .map(|r| r.join(", "))
                .unwrap_or_else(|| "*".to_string());
            println!(
                "  [{}] agents {} → {:?} (roles: {})",
                rule.name,
                rule.agents.join(", "),
                rule.action,
                roles
            );
        }
    }
    if !config.rbac.roles.is_empty() {
        println!("Roles: {}", config.rbac.roles.keys().cloned().collect::<Vec<_>>().join(", "));
    }
    Ok(())
}

fn cmd_config_template(config_path: &Path, name: &str) -> anyhow::Result<()> {
    let template_content = match name {
        "default" => DEFAULT_TEMPLATE,
        "strict" => STRICT_TEMPLATE,
        _ => {
            println!("Unknown template: {}", name);
            println!("Available templates: default, strict");
            return Ok(());
        }
    };

    std::fs::write(config_path, template_content)?;
    println!("Applied template '{}' to {}", name, config_path.display());
    Ok(())
}

fn cmd_init(config_path: &Path) -> anyhow::Result<()> {
    println!("Initializing Hailstorm...");

    let data_dir = dirs_path();
    std::fs::create_dir_all(&data_dir)?;
    println!("  Created data dir: {}", data_dir.display());

    let db = db_path(None);
    audit::open_pool(&db)?;
    println!("  Initialized audit database: {}", db.display());

    if !config_path.exists() {
        std::fs::write(config_path, DEFAULT_TEMPLATE)?;
        println!("  Created config: {}", config_path.display());
    } else {
        println!("  Config already exists: {}", config_path.display());
    }

    println!("\nDone! Next steps:");
    println!("  1. Point executor.url at your agent engine");
    println!("  2. Start the gateway: hailstorm serve");
    println!("  3. Try a dry run:     hailstorm check --agent Agent1 \"hello\"");
    Ok(())
}
