use anyhow::{anyhow, Result};
use clap::Parser;
use nanoid::nanoid;
use qubemesh_e2e::browser::{BrowserConfig, ChromiumDriver};
use qubemesh_e2e::launcher::QubeMesh;
use qubemesh_e2e::login::authenticate;
use qubemesh_e2e::report::{ArtifactStore, DiskArtifactStore, RunReport};
use qubemesh_e2e::workflow::{AgentContext, WorkflowRunner};
use qubemesh_e2e::{AgentVariant, Driver, EnvConfig, Harness, SessionState, SessionStore, Soft, Timeouts};
use std::process::ExitCode;
use std::sync::Arc;
use tokio::task::JoinSet;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

/// Run the Qube Mesh agent workflows against a live tenant.
#[derive(Parser, Debug)]
#[command(name = "qubemesh-e2e", version)]
struct Args {
    /// Agent to run (1, 2, 3, 3.1, 4, 5); repeat for several. Defaults to all but 3.1.
    #[arg(long = "agent")]
    agents: Vec<AgentVariant>,

    /// Log in, write the session file and stop.
    #[arg(long, conflicts_with = "skip_setup")]
    setup_only: bool,

    /// Reuse the existing session file instead of logging in.
    #[arg(long)]
    skip_setup: bool,

    /// Show the browser windows.
    #[arg(long)]
    headful: bool,
}

fn browser_config(cfg: &EnvConfig, headful: bool) -> BrowserConfig {
    BrowserConfig { headless: cfg.headless && !headful, user_agent: None }
}

async fn setup(cfg: &EnvConfig, headful: bool, store: &SessionStore) -> Result<SessionState> {
    let driver = Arc::new(ChromiumDriver::start(cfg.chrome_ws_url.as_deref(), browser_config(cfg, headful)).await?);
    let h = Harness::new(driver, Timeouts::default());
    Ok(authenticate(&h, cfg, store).await?)
}

async fn run_agent(
    variant: AgentVariant,
    cfg: Arc<EnvConfig>,
    session: Arc<SessionState>,
    headful: bool,
) -> Result<RunReport> {
    let driver = Arc::new(ChromiumDriver::start(cfg.chrome_ws_url.as_deref(), browser_config(&cfg, headful)).await?);
    let budget = Timeouts::default().run;
    let outcome = tokio::time::timeout(budget, drive(variant, &cfg, &session, driver.clone()))
        .await
        .map_err(|_| anyhow!("run exceeded {}s", budget.as_secs()))
        .and_then(|r| r);
    driver.close().await.soft("close browser context");
    outcome
}

async fn drive(
    variant: AgentVariant,
    cfg: &EnvConfig,
    session: &SessionState,
    driver: Arc<ChromiumDriver>,
) -> Result<RunReport> {
    driver.import_session(session).await?;
    let h = Harness::new(driver.clone(), Timeouts::default());
    let store: Arc<dyn ArtifactStore> = Arc::new(DiskArtifactStore::new(&cfg.artifacts_dir));

    let ctx = AgentContext { agent_name: cfg.agent_name(variant.index()).to_string(), agent_index: variant.index() };
    if let Err(e) = QubeMesh::new(&h).launch(&cfg.qube_mesh_url, &ctx.agent_name).await {
        // no run report yet, keep at least the screen
        if let Some(shot) = driver.screenshot_b64().await.soft("launch failure screenshot") {
            let run_id = nanoid!();
            if let Some(path) = store.save_screenshot(&run_id, "failure.png", &shot).await.soft("save screenshot") {
                error!(agent = %variant, path = %path.display(), "launch failed, screenshot saved");
            }
        }
        return Err(anyhow!("launching {}: {e}", ctx.agent_name));
    }

    let workflow = variant.workflow(&h.timeouts);
    Ok(WorkflowRunner::new(&h, cfg).with_artifacts(store).run(&workflow, &ctx).await)
}

#[tokio::main]
async fn main() -> Result<ExitCode> {
    tracing_subscriber::fmt().with_env_filter(EnvFilter::from_default_env()).init();

    let args = Args::parse();
    let cfg = Arc::new(EnvConfig::from_env()?);
    let store = SessionStore::new(&cfg.storage_state);

    let session = if args.skip_setup {
        store.load().await?
    } else {
        setup(&cfg, args.headful, &store).await?
    };
    if args.setup_only {
        info!(path = %store.path().display(), "setup done");
        return Ok(ExitCode::SUCCESS);
    }

    let agents = if args.agents.is_empty() { AgentVariant::DEFAULT.to_vec() } else { args.agents.clone() };
    let session = Arc::new(session);

    let mut workers = JoinSet::new();
    for variant in agents {
        let (cfg, session) = (cfg.clone(), session.clone());
        let headful = args.headful;
        workers.spawn(async move { (variant, run_agent(variant, cfg, session, headful).await) });
    }

    let mut failed = 0usize;
    while let Some(joined) = workers.join_next().await {
        match joined {
            Ok((variant, Ok(report))) if report.passed() => {
                println!("PASS {variant} ({}) run={} {}ms", report.agent, report.run_id, report.metrics.time_ms);
            }
            Ok((variant, Ok(report))) => {
                failed += 1;
                let reason = report.error.as_ref().map(|e| e.to_string()).unwrap_or_default();
                println!("FAIL {variant} ({}) run={} {:?}: {reason}", report.agent, report.run_id, report.state);
            }
            Ok((variant, Err(e))) => {
                failed += 1;
                println!("FAIL {variant}: {e}");
            }
            Err(e) => {
                failed += 1;
                error!(error = %e, "worker panicked");
            }
        }
    }

    if failed > 0 {
        error!(failed, "agent runs failed");
        return Ok(ExitCode::FAILURE);
    }
    Ok(ExitCode::SUCCESS)
}
