//! Timelapse CLI
//!
//! Inspect a recorded session database: list ticks and resources, dump
//! stored bodies, print a tab's reconstructed DOM at a tick, and check that
//! reconstruction is stable under rewinds.

#![warn(missing_docs)]
#![warn(clippy::all)]

use clap::{Args, Parser, Subcommand};
use color_eyre::eyre::{WrapErr, bail, eyre};
use color_eyre::Result;
use serde::{Deserialize, Serialize};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use timelapse_core::{FrameId, ResourceId, SessionId, TabId};
use timelapse_log::{ChangeLogStore, SessionTimeline};
use timelapse_replay::{
    DomDivergence, MirrorContext, ReplayConfig, StorageSnapshot, TabTicks, TickIndex,
};
use timelapse_storage::{ResourceFilter, ResourceStore, SessionDb, StoreConfig};
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "timelapse")]
#[command(about = "Inspect and replay recorded browser sessions", long_about = None)]
struct Cli {
    /// JSON configuration file
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Args, Debug, Clone)]
struct SessionArgs {
    /// Session database file
    #[arg(long)]
    db: PathBuf,
    /// Command and mouse timeline JSON from the recorder
    #[arg(long)]
    timeline: Option<PathBuf>,
}

#[derive(Subcommand)]
enum Commands {
    /// List navigable ticks
    Ticks {
        #[command(flatten)]
        session: SessionArgs,
        /// Only this tab
        #[arg(long)]
        tab: Option<u32>,
        /// Print the tick index as JSON
        #[arg(long)]
        json: bool,
    },
    /// List captured resources
    Resources {
        /// Session database file
        #[arg(long)]
        db: PathBuf,
        /// Only resources with a captured response
        #[arg(long)]
        has_response: bool,
        /// Only GET requests and documents
        #[arg(long)]
        get_or_document: bool,
    },
    /// Write a stored response body to stdout
    Body {
        /// Session database file
        #[arg(long)]
        db: PathBuf,
        /// Resource id
        #[arg(long)]
        id: u64,
        /// Keep the body in its stored encoding
        #[arg(long)]
        raw: bool,
    },
    /// Print a tab's reconstructed HTML
    Mirror {
        #[command(flatten)]
        session: SessionArgs,
        /// Tab to reconstruct
        #[arg(long)]
        tab: u32,
        /// Tick index within the tab (end of the log when omitted)
        #[arg(long)]
        tick: Option<usize>,
        /// Frame to print (the main frame when omitted)
        #[arg(long)]
        frame: Option<u32>,
    },
    /// Load every tick forward then backward and compare the output
    Verify {
        #[command(flatten)]
        session: SessionArgs,
        /// Tab to verify
        #[arg(long)]
        tab: u32,
    },
}

/// Contents of `--config`
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
struct CliConfig {
    store: StoreConfig,
    replay: ReplayConfig,
    /// Storage snapshot restored before the first load
    storage_snapshot: Option<PathBuf>,
}

impl CliConfig {
    fn load(path: Option<&Path>) -> Result<Self> {
        let Some(path) = path else {
            return Ok(Self::default());
        };
        let json = std::fs::read_to_string(path)
            .wrap_err_with(|| format!("reading config {}", path.display()))?;
        serde_json::from_str(&json).wrap_err_with(|| format!("parsing config {}", path.display()))
    }
}

/// Stores of one open session database
struct Session {
    log: ChangeLogStore,
    resources: Arc<ResourceStore>,
}

impl Session {
    fn open(path: &Path, config: &StoreConfig) -> Result<Self> {
        let db = SessionDb::open(path).wrap_err_with(|| format!("opening {}", path.display()))?;
        Ok(Self {
            log: ChangeLogStore::open(&db, config)?,
            resources: Arc::new(ResourceStore::new(&db, config)),
        })
    }

    fn context(&self, timeline: Option<&Path>, config: &CliConfig) -> Result<MirrorContext> {
        let timeline = match timeline {
            Some(path) => {
                let json = std::fs::read_to_string(path)
                    .wrap_err_with(|| format!("reading timeline {}", path.display()))?;
                SessionTimeline::from_json(&json)?
            }
            None => SessionTimeline::default(),
        };
        let context = MirrorContext::open(
            SessionId::new(),
            &self.log,
            Arc::clone(&self.resources),
            timeline,
            config.replay.clone(),
        )?;
        Ok(match &config.storage_snapshot {
            Some(path) => {
                let json = std::fs::read_to_string(path)
                    .wrap_err_with(|| format!("reading storage snapshot {}", path.display()))?;
                context.with_storage_snapshot(StorageSnapshot::from_json(&json)?)
            }
            None => context,
        })
    }
}

fn main() -> Result<()> {
    color_eyre::install()?;
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("timelapse=info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let config = CliConfig::load(cli.config.as_deref())?;
    let mut stdout = std::io::stdout().lock();

    match cli.command {
        Commands::Ticks { session, tab, json } => {
            let store = Session::open(&session.db, &config.store)?;
            let index = store.context(session.timeline.as_deref(), &config)?.tick_index();
            let tab = tab.map(TabId::new);
            if json {
                let tabs: Vec<&TabTicks> = index
                    .tabs
                    .iter()
                    .filter(|t| tab.is_none_or(|id| t.tab_id == id))
                    .collect();
                writeln!(stdout, "{}", serde_json::to_string_pretty(&tabs)?)?;
            } else {
                write!(stdout, "{}", render_ticks(&index, tab))?;
            }
        }
        Commands::Resources {
            db,
            has_response,
            get_or_document,
        } => {
            let store = Session::open(&db, &config.store)?;
            let filter = ResourceFilter {
                has_response,
                is_get_or_document: get_or_document,
            };
            for resource in store.resources.filter(filter)? {
                writeln!(
                    stdout,
                    "{}\t{}\t{}\t{}\t{}",
                    resource.id,
                    resource.tab_id,
                    resource.status_code.map_or_else(|| "-".to_string(), |s| s.to_string()),
                    resource.method,
                    resource.url
                )?;
            }
        }
        Commands::Body { db, id, raw } => {
            let store = Session::open(&db, &config.store)?;
            let body = store
                .resources
                .get_resource_body(ResourceId::new(id), !raw)?
                .ok_or_else(|| eyre!("resource {id} has no stored body"))?;
            info!(resource = id, encoding = body.encoding.as_str(), bytes = body.bytes.len(), "writing body");
            stdout.write_all(&body.bytes)?;
        }
        Commands::Mirror {
            session,
            tab,
            tick,
            frame,
        } => {
            let store = Session::open(&session.db, &config.store)?;
            let html = mirror_html(&store, &session, &config, TabId::new(tab), tick, frame.map(FrameId::new))?;
            writeln!(stdout, "{html}")?;
        }
        Commands::Verify { session, tab } => {
            let store = Session::open(&session.db, &config.store)?;
            let diverged = verify_tab(&store, &session, &config, TabId::new(tab))?;
            for (tick, divergence) in &diverged {
                writeln!(stdout, "tick {tick}: {divergence}")?;
            }
            if !diverged.is_empty() {
                bail!("{} ticks reconstructed differently after a rewind", diverged.len());
            }
            writeln!(stdout, "ok")?;
        }
    }
    Ok(())
}

fn render_ticks(index: &TickIndex, tab: Option<TabId>) -> String {
    let mut out = String::new();
    for tab_ticks in index.tabs.iter().filter(|t| tab.is_none_or(|id| t.tab_id == id)) {
        out.push_str(&format!("{}\n", tab_ticks.tab_id));
        for (i, tick) in tab_ticks.ticks.iter().enumerate() {
            let marker = if tick.is_new_document_tick {
                "N"
            } else if tick.is_major {
                "*"
            } else {
                " "
            };
            out.push_str(&format!(
                "{i:>5} {marker} {:>13} {:<11} {:>6} {}\n",
                tick.timestamp.as_millis(),
                format!("{:?}", tick.event_type),
                tick.change_range_end,
                tick.label
            ));
        }
    }
    out
}

fn mirror_html(
    store: &Session,
    session: &SessionArgs,
    config: &CliConfig,
    tab: TabId,
    tick: Option<usize>,
    frame: Option<FrameId>,
) -> Result<String> {
    let context = store.context(session.timeline.as_deref(), config)?;
    let mut replay = context.reconstructor(tab)?;
    match tick {
        Some(i) => {
            let index = context.tick_index();
            let ticks = index.tab(tab).map(|t| t.ticks.as_slice()).unwrap_or_default();
            let tick = ticks
                .get(i)
                .ok_or_else(|| eyre!("{tab} has {} ticks, no tick {i}", ticks.len()))?;
            replay.load(Some(tick))?;
        }
        None => {
            replay.load(None)?;
        }
    }
    info!(%tab, position = ?replay.position(), digest = %replay.digest(), "reconstructed tab");
    Ok(replay.outer_html(frame))
}

fn verify_tab(
    store: &Session,
    session: &SessionArgs,
    config: &CliConfig,
    tab: TabId,
) -> Result<Vec<(usize, DomDivergence)>> {
    let context = store.context(session.timeline.as_deref(), config)?;
    let index = context.tick_index();
    let ticks = index.tab(tab).map(|t| t.ticks.as_slice()).unwrap_or_default();
    let mut replay = context.reconstructor(tab)?;

    let mut forward = Vec::with_capacity(ticks.len());
    for tick in ticks {
        replay.load(Some(tick))?;
        forward.push(replay.outer_html(None));
    }
    let mut diverged = Vec::new();
    for (i, tick) in ticks.iter().enumerate().rev() {
        replay.load(Some(tick))?;
        if let Some(divergence) = DomDivergence::compare(&forward[i], &replay.outer_html(None)) {
            diverged.push((i, divergence));
        }
    }
    diverged.reverse();
    info!(%tab, ticks = ticks.len(), diverged = diverged.len(), "verified tab");
    Ok(diverged)
}
