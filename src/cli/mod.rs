//! CLI surface: flags, the interactive menu, and action execution.
//!
//! The binary runs one long-lived command. Actions are queued from a text
//! menu (or non-interactively from flags and `sources.yml`) and executed
//! together: fetch platform dumps, regenerate frequencies, export the
//! analytics store.

use std::path::{Path, PathBuf};

use clap::Parser;
use colored::Colorize;
use comfy_table::{presets::UTF8_FULL, Table};
use dialoguer::{Confirm, Input, Select};

use crate::application::{
    export_source_json, generate_frequencies, ingest_source, project, IngestSummary,
};
use crate::domain::{AppError, Result};
use crate::infrastructure::config::{load_source_actions, SourceAction, StoreConfig};
use crate::infrastructure::sources::SourceKind;
use crate::infrastructure::CanonicalStore;

/// Directory of SQL scripts applied to the trimmed analytics file.
const POSTPROCESS_DIR: &str = "queries/postprocess";

/// nimika - longitudinal term-frequency analytics for toki pona corpora.
#[derive(Parser, Debug)]
#[command(name = "nimika")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Enable verbose logging (use multiple times for more verbosity).
    #[arg(short, long, action = clap::ArgAction::Count)]
    pub verbose: u8,

    /// Queue fetch actions from a sources.yml file and skip the menu.
    #[arg(long)]
    pub sources: Option<PathBuf>,

    /// Queue frequency regeneration and skip the menu.
    #[arg(long)]
    pub frequency: bool,

    /// Queue an analytics export under this base name and skip the menu.
    #[arg(long)]
    pub export: Option<String>,

    /// Output directory for analytics exports.
    #[arg(long, default_value = ".")]
    pub out_dir: PathBuf,
}

/// Everything the user queued for this run.
#[derive(Debug, Default)]
pub struct Actions {
    pub sources: Vec<SourceAction>,
    pub frequency: bool,
    pub sqlite: Option<SqliteAction>,
}

/// A queued analytics export.
#[derive(Debug, Clone)]
pub struct SqliteAction {
    pub full: PathBuf,
    pub trimmed: PathBuf,
}

impl Actions {
    fn is_empty(&self) -> bool {
        self.sources.is_empty() && !self.frequency && self.sqlite.is_none()
    }

    /// Build the queue from CLI flags alone.
    pub fn from_cli(cli: &Cli) -> Result<Option<Self>> {
        let mut actions = Self::default();
        if let Some(path) = &cli.sources {
            actions.sources = load_source_actions(path)?;
        }
        actions.frequency = cli.frequency;
        if let Some(base) = &cli.export {
            actions.sqlite = Some(sqlite_action(&cli.out_dir, base));
        }
        Ok(if actions.is_empty() {
            None
        } else {
            Some(actions)
        })
    }
}

fn sqlite_action(dir: &Path, base: &str) -> SqliteAction {
    SqliteAction {
        full: dir.join(format!("{base}-full.sqlite")),
        trimmed: dir.join(format!("{base}-trimmed.sqlite")),
    }
}

fn prompt_err(e: dialoguer::Error) -> AppError {
    AppError::Io {
        message: format!("prompt failed: {e}"),
        source: None,
    }
}

fn today() -> String {
    chrono::Utc::now().format("%Y-%m-%d").to_string()
}

/// Ask until the user names an existing directory.
fn ask_directory(prompt: &str) -> Result<PathBuf> {
    loop {
        let raw: String = Input::new()
            .with_prompt(prompt)
            .interact_text()
            .map_err(prompt_err)?;
        let dir = PathBuf::from(raw.trim());
        if dir.is_dir() {
            return Ok(dir);
        }
        println!("{} {} is not a directory", "error:".red().bold(), dir.display());
    }
}

fn setup_one_source(actions: &mut Actions) -> Result<()> {
    let names: Vec<&str> = SourceKind::ALL.iter().map(|k| k.name()).collect();
    let picked = Select::new()
        .with_prompt("What source?")
        .items(&names)
        .default(0)
        .interact()
        .map_err(prompt_err)?;
    let source = names[picked].to_string();

    let root = ask_directory("Where from?")?;
    let to_db = Confirm::new()
        .with_prompt("Send to database?")
        .default(true)
        .interact()
        .map_err(prompt_err)?;

    let output = if to_db {
        None
    } else {
        let default = format!("./{source}_{}.jsonl", today());
        let raw: String = Input::new()
            .with_prompt("Output where?")
            .default(default)
            .interact_text()
            .map_err(prompt_err)?;
        Some(PathBuf::from(raw))
    };

    actions.sources.push(SourceAction {
        source,
        root,
        to_db,
        output,
    });
    Ok(())
}

fn setup_sources(actions: &mut Actions) -> Result<()> {
    let from_config = Confirm::new()
        .with_prompt("From config?")
        .default(false)
        .interact()
        .map_err(prompt_err)?;

    if from_config {
        let path: String = Input::new()
            .with_prompt("Provide config")
            .default("./sources.yml".to_string())
            .interact_text()
            .map_err(prompt_err)?;
        let loaded = load_source_actions(Path::new(&path))?;
        for action in &loaded {
            let dest = action
                .output
                .as_ref()
                .map_or_else(|| "db".to_string(), |p| p.display().to_string());
            println!(
                "Will fetch {} data from {} and output to {dest}",
                action.source,
                action.root.display()
            );
        }
        actions.sources.extend(loaded);
    } else {
        setup_one_source(actions)?;
    }
    Ok(())
}

fn setup_sqlite(actions: &mut Actions) -> Result<()> {
    let base: String = Input::new()
        .with_prompt("Base name for the analytics files?")
        .default(today())
        .interact_text()
        .map_err(prompt_err)?;
    let dir = ask_directory("Save to where?")?;

    let action = sqlite_action(&dir, &base);
    println!(
        "Will export the analytics store to {} and {}",
        action.full.display(),
        action.trimmed.display()
    );
    actions.sqlite = Some(action);
    Ok(())
}

fn display_choices(actions: &Actions) {
    for source in &actions.sources {
        let dest = source
            .output
            .as_ref()
            .map_or_else(|| "db".to_string(), |p| p.display().to_string());
        println!(
            "Sending {} data from {} to {dest}",
            source.source,
            source.root.display()
        );
    }
    if actions.frequency {
        println!("Regenerating frequency data from the canonical store");
    }
    if let Some(sqlite) = &actions.sqlite {
        println!("Building analytics store {}", sqlite.full.display());
    }
}

/// Run the interactive menu until the user starts or cancels.
///
/// Returns the queued actions, or `None` when the user cancelled.
pub fn menu() -> Result<Option<Actions>> {
    let mut actions = Actions::default();
    loop {
        display_choices(&actions);
        println!("{}", "Main Menu".bold());

        let options = [
            "Fetch new data",
            "Calculate frequencies",
            "Export analytics store",
            "Start executing actions",
            "Cancel",
        ];
        let choice = Select::new()
            .items(&options)
            .default(0)
            .interact()
            .map_err(prompt_err)?;

        match choice {
            0 => setup_sources(&mut actions)?,
            1 => {
                actions.frequency = true;
                println!("Will regenerate frequency data on next run");
            }
            2 => setup_sqlite(&mut actions)?,
            3 => return Ok(Some(actions)),
            _ => {
                println!("{}", "Shutting down!".green());
                return Ok(None);
            }
        }

        let again = Confirm::new()
            .with_prompt("Do you want to queue another action?")
            .default(true)
            .interact()
            .map_err(prompt_err)?;
        if !again {
            return Ok(Some(actions));
        }
    }
}

/// Execute the queued actions in order: fetches, then frequency
/// regeneration, then the analytics export.
pub async fn run_actions(actions: Actions) -> Result<()> {
    if actions.is_empty() {
        println!("Nothing to do.");
        return Ok(());
    }

    let needs_store = actions.sources.iter().any(|s| s.to_db)
        || actions.frequency
        || actions.sqlite.is_some();
    let mut store = if needs_store {
        let config = StoreConfig::from_env()?;
        tracing::debug!("canonical store params: {}", config.describe());
        let path = config.database_path();
        tracing::info!("opening canonical store at {}", path.display());
        let store = CanonicalStore::open(&path)?;
        tracing::info!(messages = store.message_count()?, "canonical store ready");
        Some(store)
    } else {
        None
    };

    let mut summary = Table::new();
    summary.load_preset(UTF8_FULL);
    summary.set_header(vec!["action", "result"]);

    let mut ingested_any = false;
    for action in actions.sources {
        let kind: SourceKind = action
            .source
            .parse()
            .map_err(|message| AppError::Config { message })?;
        let adapter = kind.build(&action.root);

        if action.to_db {
            let store = store.as_mut().ok_or_else(|| AppError::Config {
                message: "canonical store required for ingestion".into(),
            })?;
            let IngestSummary {
                seen,
                inserted,
                already_present,
            } = ingest_source(store, adapter).await?;
            ingested_any = true;
            summary.add_row(vec![
                format!("fetch {}", action.source),
                format!("{seen} seen, {inserted} new, {already_present} already present"),
            ]);
        } else {
            let output = action.output.clone().ok_or_else(|| AppError::Config {
                message: format!("source {:?} has no output file", action.source),
            })?;
            let written = export_source_json(adapter, &output)?;
            summary.add_row(vec![
                format!("fetch {}", action.source),
                format!("{written} messages to {}", output.display()),
            ]);
        }
    }

    if ingested_any {
        if let Some(store) = store.as_ref() {
            tracing::info!("updating derived author sentence counts");
            store.update_author_num_tp_sentences()?;
        }
    }

    if actions.frequency {
        let store = store.as_mut().ok_or_else(|| AppError::Config {
            message: "canonical store required for frequency generation".into(),
        })?;
        let freq = generate_frequencies(store, true)?;
        summary.add_row(vec![
            "frequencies".to_string(),
            format!(
                "{} buckets, {} sentences, {} rows",
                freq.buckets, freq.sentences, freq.rows
            ),
        ]);
    }

    if let Some(sqlite) = actions.sqlite {
        let store = store.as_ref().ok_or_else(|| AppError::Config {
            message: "canonical store required for export".into(),
        })?;
        let projection = project(
            store,
            &sqlite.full,
            &sqlite.trimmed,
            Path::new(POSTPROCESS_DIR),
        )?;
        summary.add_row(vec![
            "export".to_string(),
            format!(
                "{} terms ({} pruned), {} monthly rows, {} yearly rows, {} scripts",
                projection.terms,
                projection.pruned_terms,
                projection.monthly_rows,
                projection.yearly_rows,
                projection.scripts_applied
            ),
        ]);
    }

    println!("{summary}");
    println!("{} all actions finished", "done:".green().bold());
    Ok(())
}
