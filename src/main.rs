use std::{collections::HashMap, path::PathBuf, sync::Arc};

use anyhow::{anyhow, bail, Context, Result};
use clap::{Args, Parser, Subcommand};
use model_center::core::logging::setup_logging;
use model_center::models::{HttpTransport, ModelFile};
use model_center::{
    Catalog, DownloadSession, ModelCenterState, ModelDownloader, ModelManager, ModelRowState,
    Settings, SettingsManager,
};
use tokio::runtime::Handle;

#[derive(Parser)]
#[command(name = "model-center", version, about = "Download and install on-device models")]
struct Cli {
    /// Print state as JSON instead of text.
    #[arg(long, global = true)]
    json: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Show every catalog entry and its install status.
    List,
    /// Show per-file detail for one model.
    Status { id: String },
    /// Install the required models in order, stopping at the first failure.
    InstallRequired,
    Download { id: String },
    Delete { id: String },
    /// Show or change settings.
    Config(ConfigArgs),
}

#[derive(Args)]
struct ConfigArgs {
    #[arg(long, conflicts_with = "clear_models_root")]
    models_root: Option<PathBuf>,
    #[arg(long)]
    clear_models_root: bool,
    #[arg(long)]
    connect_timeout: Option<u64>,
    #[arg(long)]
    read_timeout: Option<u64>,
    #[arg(long)]
    write_timeout: Option<u64>,
    #[arg(long)]
    user_agent: Option<String>,
}

impl ConfigArgs {
    fn apply(self, settings: &mut Settings) {
        if self.clear_models_root {
            settings.models_root = None;
        }
        if let Some(root) = self.models_root {
            settings.models_root = Some(root);
        }
        if let Some(secs) = self.connect_timeout {
            settings.connect_timeout_secs = secs;
        }
        if let Some(secs) = self.read_timeout {
            settings.read_timeout_secs = secs;
        }
        if let Some(secs) = self.write_timeout {
            settings.write_timeout_secs = secs;
        }
        if let Some(agent) = self.user_agent {
            settings.user_agent = agent;
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    setup_logging();
    let cli = Cli::parse();
    let settings = SettingsManager::new()?;

    match cli.command {
        Command::Config(args) => {
            let updated = settings.update(|current| args.apply(current))?;
            if cli.json {
                println!("{}", serde_json::to_string_pretty(&updated)?);
            } else {
                println!("config file   {}", settings.path().display());
                println!("models root   {}", updated.resolve_models_root()?.display());
                println!("connect       {}s", updated.connect_timeout_secs);
                println!("read          {}s", updated.read_timeout_secs);
                println!("write         {}s", updated.write_timeout_secs);
                println!("user agent    {}", updated.user_agent);
            }
            Ok(())
        }
        Command::List => {
            let session = build_session(&settings.read())?;
            let state = session.state();
            if cli.json {
                println!("{}", serde_json::to_string_pretty(&state)?);
            } else {
                for row in &state.rows {
                    print_row(row);
                }
            }
            Ok(())
        }
        Command::Status { id } => {
            let session = build_session(&settings.read())?;
            let spec = session
                .catalog()
                .find(&id)
                .ok_or_else(|| anyhow!("unknown model {id}"))?;
            let state = session.state();
            let row = state
                .row(&id)
                .ok_or_else(|| anyhow!("no state for {id}"))?;
            if cli.json {
                println!("{}", serde_json::to_string_pretty(row)?);
            } else {
                print_row(row);
                println!("  {}", session.manager().install_dir(spec).display());
                for (file, status) in spec.files.iter().zip(&row.file_statuses) {
                    println!(
                        "  {:<48} {:>14} bytes  {}",
                        status.file_name,
                        status.bytes,
                        file_verdict(file, status.exists, status.meets_min_bytes)
                    );
                }
            }
            Ok(())
        }
        Command::InstallRequired => {
            let session = build_session(&settings.read())?;
            let ids = session
                .catalog()
                .required()
                .iter()
                .map(|spec| spec.id.clone())
                .collect::<Vec<_>>();
            if !session.install_required() {
                bail!("another operation is already running");
            }
            report(&session, &ids, cli.json).await
        }
        Command::Download { id } => {
            let session = build_session(&settings.read())?;
            if !session.download(&id) {
                bail!("unknown model {id}");
            }
            report(&session, &[id], cli.json).await
        }
        Command::Delete { id } => {
            let session = build_session(&settings.read())?;
            if !session.delete(&id) {
                bail!("unknown model {id}");
            }
            report(&session, &[id], cli.json).await
        }
    }
}

fn build_session(settings: &Settings) -> Result<DownloadSession> {
    let root = settings.resolve_models_root()?;
    let manager = ModelManager::new(root);
    manager.ensure_directory()?;
    tracing::debug!("models root {}", manager.root().display());

    let transport = HttpTransport::new(settings.timeouts(), &settings.user_agent)
        .context("building http client failed")?;
    let downloader = ModelDownloader::new(manager, Arc::new(transport));
    Ok(DownloadSession::new(
        Catalog::builtin(),
        downloader,
        Handle::current(),
    ))
}

/// Prints progress until the session goes idle. Ctrl-C cancels the transfer
/// and keeps the partial files for the next run.
async fn follow(session: &DownloadSession, quiet: bool) -> Result<ModelCenterState> {
    let mut receiver = session.subscribe();
    let mut shown: HashMap<String, String> = HashMap::new();

    loop {
        let state = receiver.borrow_and_update().clone();
        if !quiet {
            for row in state.rows.iter().filter(|row| row.is_downloading) {
                let Some(text) = &row.progress_text else {
                    continue;
                };
                if shown.get(&row.spec_id) != Some(text) {
                    eprintln!("{}: {text}", row.spec_id);
                    shown.insert(row.spec_id.clone(), text.clone());
                }
            }
        }
        if !state.overall_busy {
            return Ok(state);
        }

        tokio::select! {
            changed = receiver.changed() => changed.context("session closed")?,
            signal = tokio::signal::ctrl_c() => {
                signal.context("listening for ctrl-c failed")?;
                eprintln!("cancelling…");
                session.cancel();
            }
        }
    }
}

async fn report(session: &DownloadSession, ids: &[String], json: bool) -> Result<()> {
    let state = follow(session, json).await?;
    let rows: Vec<&ModelRowState> = ids.iter().filter_map(|id| state.row(id)).collect();

    if json {
        println!("{}", serde_json::to_string_pretty(&rows)?);
    } else {
        for row in &rows {
            print_row(row);
        }
    }

    let failed: Vec<&ModelRowState> = rows
        .into_iter()
        .filter(|row| row.error_text.is_some())
        .collect();
    match failed.first() {
        None => Ok(()),
        Some(row) => {
            let message = row.error_text.clone().unwrap_or_default();
            match row.failure_kind {
                Some(kind) => bail!("{}: {message}. {}", row.spec_id, kind.hint()),
                None => bail!("{}: {message}", row.spec_id),
            }
        }
    }
}

fn print_row(row: &ModelRowState) {
    println!(
        "{:<28} {:<4} {:<10} {}",
        row.spec_id,
        row.kind.label(),
        row.status.label(),
        row.display_name
    );
    if let Some(error) = &row.error_text {
        println!("  error: {error}");
    }
}

fn file_verdict(file: &ModelFile, exists: bool, meets_min_bytes: bool) -> String {
    match (exists, meets_min_bytes, file.min_bytes) {
        (false, _, _) => "missing".into(),
        (true, true, _) => "ok".into(),
        (true, false, Some(min)) => format!("below {min} bytes"),
        (true, false, None) => "incomplete".into(),
    }
}
