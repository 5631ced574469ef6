use clap::{Args, Parser, Subcommand, ValueEnum};
use ledgergate_adapters::DeterministicLedgerAdapter;
use ledgergate_core::{
    error_exit_code, AdapterRegistry, AutonomousSettings, CycleProof, CycleTriggerVerifier,
    EngineConfig, ExecuteBindingState, LedgerFamily, LedgerGateError, PolicyConfig, Storage,
    StorageConfig, WorkflowEngine, WorkflowRequest,
};
use serde::Serialize;
use serde_json::json;
use std::fs;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;
use tracing::{debug, info};

#[derive(Debug, Clone, Copy, ValueEnum)]
enum StorageMode {
    Auto,
    Memory,
    File,
    Postgres,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum BindingArg {
    Missing,
    Prepared,
    Active,
    Revoked,
}

impl From<BindingArg> for ExecuteBindingState {
    fn from(value: BindingArg) -> Self {
        match value {
            BindingArg::Missing => Self::Missing,
            BindingArg::Prepared => Self::Prepared,
            BindingArg::Active => Self::Active,
            BindingArg::Revoked => Self::Revoked,
        }
    }
}

#[derive(Debug, Parser)]
#[command(name = "ledgergate", version, about = "Safety-gated multi-ledger workflow runner")]
struct Cli {
    #[command(flatten)]
    storage: StorageArgs,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Args)]
struct StorageArgs {
    /// Persistence backend. `auto` picks postgres when a database url is configured,
    /// otherwise the file backend under --data-dir.
    #[arg(long, value_enum, default_value_t = StorageMode::Auto, env = "LEDGERGATE_STORAGE", global = true)]
    storage: StorageMode,
    /// Directory for the file backend.
    #[arg(long, default_value = ".ledgergate", env = "LEDGERGATE_DATA_DIR", global = true)]
    data_dir: PathBuf,
    /// PostgreSQL url for evidence and idempotency persistence.
    #[arg(long, env = "LEDGERGATE_DATABASE_URL", global = true)]
    database_url: Option<String>,
    /// Max PostgreSQL pool connections.
    #[arg(long, default_value_t = 5, env = "LEDGERGATE_PG_MAX_CONNECTIONS", global = true)]
    pg_max_connections: u32,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Run one workflow phase and print the response as JSON
    Run(RunArgs),

    /// Check a deterministic-cycle proof without running a workflow
    VerifyProof {
        /// Ledger family the proof's tx hash belongs to
        #[arg(long)]
        family: String,
        /// JSON file holding the cycle proof
        #[arg(long)]
        proof: PathBuf,
        /// Cycle id the proof must carry
        #[arg(long)]
        cycle_id: Option<String>,
    },

    /// Inspect the evidence history
    Evidence {
        #[command(subcommand)]
        command: EvidenceCommands,
    },
}

#[derive(Debug, Subcommand)]
enum EvidenceCommands {
    /// Print the most recent evidence entry
    Latest,
    /// Recompute the hash chain over the whole history
    Verify,
}

#[derive(Debug, Args)]
struct RunArgs {
    /// JSON file holding the workflow request
    #[arg(long)]
    request: PathBuf,
    /// Confirm an execute on a production network; same as `confirmProduction` in the request
    #[arg(long, default_value_t = false)]
    confirm_production: bool,
    /// JSON policy file; conservative defaults apply when absent
    #[arg(long, env = "LEDGERGATE_POLICY")]
    policy: Option<PathBuf>,
    /// Enable autonomous mode
    #[arg(long, default_value_t = false, env = "LEDGERGATE_AUTONOMOUS_MODE")]
    autonomous_mode: bool,
    /// Cycle id unattended runs are bound to
    #[arg(long, env = "LEDGERGATE_AUTONOMOUS_CYCLE_ID")]
    cycle_id: Option<String>,
    /// Cycle interval in seconds
    #[arg(long, env = "LEDGERGATE_AUTONOMOUS_CYCLE_INTERVAL_SECS")]
    cycle_interval_secs: Option<u64>,
    /// Readiness of the execute binding
    #[arg(long, value_enum, default_value_t = BindingArg::Missing, env = "LEDGERGATE_EXECUTE_BINDING_STATE")]
    execute_binding_state: BindingArg,
}

fn resolve_storage(args: &StorageArgs) -> anyhow::Result<StorageConfig> {
    let resolved_url = args
        .database_url
        .clone()
        .or_else(|| std::env::var("DATABASE_URL").ok());

    let storage = match args.storage {
        StorageMode::Memory => StorageConfig::Memory,
        StorageMode::File => StorageConfig::file(&args.data_dir),
        StorageMode::Postgres => {
            let database_url = resolved_url.ok_or_else(|| {
                anyhow::anyhow!("storage=postgres requires --database-url or DATABASE_URL")
            })?;
            StorageConfig::postgres(database_url, args.pg_max_connections)
        }
        StorageMode::Auto => match resolved_url {
            Some(database_url) => StorageConfig::postgres(database_url, args.pg_max_connections),
            None => StorageConfig::file(&args.data_dir),
        },
    };

    Ok(storage)
}

fn read_json<T: serde::de::DeserializeOwned>(path: &Path) -> anyhow::Result<T> {
    let bytes = fs::read(path)
        .map_err(|err| anyhow::anyhow!("cannot read {}: {err}", path.display()))?;
    serde_json::from_slice(&bytes)
        .map_err(|err| anyhow::anyhow!("{} is not valid JSON: {err}", path.display()))
}

fn print_json<T: Serialize>(value: &T) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn load_request(args: &RunArgs) -> anyhow::Result<WorkflowRequest> {
    let mut request: WorkflowRequest = read_json(&args.request)?;
    request.confirm_production |= args.confirm_production;
    Ok(request)
}

fn engine_config(args: &RunArgs, storage: StorageConfig) -> EngineConfig {
    EngineConfig {
        storage,
        autonomous: AutonomousSettings {
            enabled: args.autonomous_mode,
            cycle_id: args.cycle_id.clone(),
            cycle_interval_secs: args.cycle_interval_secs,
            execute_binding: args.execute_binding_state.into(),
        },
        ..EngineConfig::default()
    }
}

fn adapters() -> AdapterRegistry {
    DeterministicLedgerAdapter::all()
        .into_iter()
        .fold(AdapterRegistry::new(), |registry, adapter| registry.with(Arc::new(adapter)))
}

async fn run_workflow(args: RunArgs, storage: StorageConfig) -> anyhow::Result<u8> {
    let request = load_request(&args)?;
    let policy: PolicyConfig = match &args.policy {
        Some(path) => read_json(path)?,
        None => PolicyConfig::default(),
    };
    debug!(policy_version = %policy.policy_version, "policy loaded");

    let engine = WorkflowEngine::bootstrap(policy, engine_config(&args, storage), adapters()).await?;
    let response = engine.run_workflow(request).await?;
    print_json(&response)?;
    Ok(response.exit_code() as u8)
}

fn verify_proof(family: &str, proof: &Path, cycle_id: Option<String>) -> anyhow::Result<u8> {
    let family = LedgerFamily::parse(family)
        .ok_or_else(|| anyhow::anyhow!("unknown ledger family '{family}'"))?;
    let proof: CycleProof = read_json(proof)?;

    let mut verifier = CycleTriggerVerifier::new(family);
    if let Some(cycle_id) = cycle_id {
        verifier = verifier.with_required_cycle_id(cycle_id);
    }
    let verification = verifier.verify(&proof);
    print_json(&verification)?;
    Ok(if verification.verifiable { 0 } else { 2 })
}

async fn evidence(command: EvidenceCommands, storage: StorageConfig) -> anyhow::Result<u8> {
    let storage = Storage::bootstrap(storage).await?;
    let evidence = storage.evidence;

    match command {
        EvidenceCommands::Latest => {
            print_json(&evidence.latest())?;
            Ok(0)
        }
        EvidenceCommands::Verify => {
            let valid = evidence.verify_chain();
            print_json(&json!({
                "backend": evidence.backend_label(),
                "entries": evidence.entries().len(),
                "valid": valid,
            }))?;
            Ok(if valid { 0 } else { 1 })
        }
    }
}

async fn dispatch(cli: Cli) -> anyhow::Result<u8> {
    let storage = resolve_storage(&cli.storage)?;
    info!(storage = storage.label(), "ledgergate starting");

    match cli.command {
        Commands::Run(args) => run_workflow(args, storage).await,
        Commands::VerifyProof {
            family,
            proof,
            cycle_id,
        } => verify_proof(&family, &proof, cycle_id),
        Commands::Evidence { command } => evidence(command, storage).await,
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "ledgergate=info,info".to_string()),
        )
        .init();

    let cli = Cli::parse();
    match dispatch(cli).await {
        Ok(code) => ExitCode::from(code),
        Err(err) => match err.downcast_ref::<LedgerGateError>() {
            Some(gate_err) => {
                let structured = json!({ "error": gate_err.to_structured() });
                println!("{structured:#}");
                ExitCode::from(error_exit_code(gate_err) as u8)
            }
            None => {
                eprintln!("error: {err:#}");
                ExitCode::from(1)
            }
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(args: &[&str]) -> Cli {
        Cli::try_parse_from(args).unwrap()
    }

    #[test]
    fn auto_storage_falls_back_to_files() {
        let cli = parse(&["ledgergate", "--data-dir", "/tmp/lg", "evidence", "verify"]);
        if std::env::var("DATABASE_URL").is_ok() || std::env::var("LEDGERGATE_DATABASE_URL").is_ok() {
            return;
        }
        match resolve_storage(&cli.storage).unwrap() {
            StorageConfig::File { dir } => assert_eq!(dir, PathBuf::from("/tmp/lg")),
            other => panic!("unexpected storage {other:?}"),
        }
    }

    #[test]
    fn explicit_database_url_selects_postgres() {
        let cli = parse(&[
            "ledgergate",
            "--database-url",
            "postgres://localhost/ledgergate",
            "--pg-max-connections",
            "9",
            "evidence",
            "latest",
        ]);
        match resolve_storage(&cli.storage).unwrap() {
            StorageConfig::Postgres {
                database_url,
                max_connections,
            } => {
                assert_eq!(database_url, "postgres://localhost/ledgergate");
                assert_eq!(max_connections, 9);
            }
            other => panic!("unexpected storage {other:?}"),
        }
    }

    #[test]
    fn run_flags_build_autonomous_settings() {
        let cli = parse(&[
            "ledgergate",
            "--storage",
            "memory",
            "run",
            "--request",
            "request.json",
            "--autonomous-mode",
            "--cycle-id",
            "cycle-9",
            "--cycle-interval-secs",
            "300",
            "--execute-binding-state",
            "active",
        ]);
        let Commands::Run(args) = cli.command else {
            panic!("expected run");
        };
        let config = engine_config(&args, StorageConfig::Memory);
        assert!(config.autonomous.enabled);
        assert_eq!(config.autonomous.cycle_id.as_deref(), Some("cycle-9"));
        assert_eq!(config.autonomous.cycle_interval_secs, Some(300));
        assert_eq!(config.autonomous.execute_binding, ExecuteBindingState::Active);
    }

    #[test]
    fn verify_proof_reports_missing_fields() {
        let path = std::env::temp_dir().join(format!("ledgergate-proof-{}.json", std::process::id()));
        fs::write(&path, r#"{"txHash": "0xabc"}"#).unwrap();

        let code = verify_proof("starknet", &path, Some("cycle-1".to_string())).unwrap();
        assert_eq!(code, 2);
        assert!(verify_proof("bitcoin", &path, None).is_err());

        let _ = fs::remove_file(path);
    }

    #[test]
    fn confirm_production_flag_sets_the_request_field() {
        let path = std::env::temp_dir().join(format!("ledgergate-request-{}.json", std::process::id()));
        fs::write(
            &path,
            r#"{"phase": "execute", "network": "evm:mainnet", "intent": {"type": "transfer.native"}}"#,
        )
        .unwrap();
        let request = path.to_string_lossy().to_string();

        let cli = parse(&["ledgergate", "run", "--request", &request, "--confirm-production"]);
        let Commands::Run(args) = cli.command else {
            panic!("expected run");
        };
        assert!(load_request(&args).unwrap().confirm_production);

        let cli = parse(&["ledgergate", "run", "--request", &request]);
        let Commands::Run(args) = cli.command else {
            panic!("expected run");
        };
        assert!(!load_request(&args).unwrap().confirm_production);

        let _ = fs::remove_file(path);
    }
}
