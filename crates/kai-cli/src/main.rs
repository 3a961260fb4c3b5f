//! kai CLI - command-line interface for the kai retrieval pipeline.

use std::fs;
use std::path::{Path, PathBuf};

use chrono::NaiveDate;
use clap::{Parser, Subcommand};
use tracing::debug;
use tracing_subscriber::EnvFilter;

use kai_core::{KaiConfig, TurnMessage};
use kai_server::{AskParams, KaiServer, TimetableParams, ToolResult};

/// kai - retrieval pipeline for the NAU university assistant
#[derive(Parser)]
#[command(name = "kai")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Config file (default: <config dir>/kai/config.toml, then ./kai.toml)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Database path, overriding the config
    #[arg(short, long, global = true)]
    database: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Write a default config and create the database
    Init {
        /// Overwrite an existing config file
        #[arg(long)]
        force: bool,
    },

    /// Retrieve validated evidence for a question
    Ask {
        question: String,

        /// Student group code
        #[arg(short, long)]
        group: Option<String>,

        /// JSON file with earlier turns: [{"role": "user", "content": "..."}]
        #[arg(long)]
        history: Option<PathBuf>,
    },

    /// Show how a question would be routed
    Route {
        question: String,

        #[arg(short, long)]
        group: Option<String>,
    },

    /// Import documents from a JSON file or a directory of them
    Import {
        path: PathBuf,

        /// Recursively process directories
        #[arg(short, long)]
        recursive: bool,
    },

    /// Show statistics
    Stats,

    /// Show a group's lessons for a date
    Timetable {
        /// Group code in any spelling (Б-121-22-1-КІ, б_121_22_1_кі), or free
        /// text containing a full code
        group: String,

        /// Date as YYYY-MM-DD (default: today)
        #[arg(long)]
        date: Option<NaiveDate>,

        /// Bypass the cache
        #[arg(long)]
        refresh: bool,
    },
}

fn setup_logging(verbose: bool) {
    let filter = if verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"))
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .try_init()
        .ok();
}

fn default_config_path() -> PathBuf {
    dirs::config_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("kai")
        .join("config.toml")
}

fn load_config(path: Option<&Path>, database: Option<PathBuf>) -> kai_core::Result<KaiConfig> {
    let mut config = match path {
        Some(path) => KaiConfig::load(path)?,
        None => KaiConfig::load_default()?,
    };
    if let Some(db) = database {
        config.store.path = db;
    }
    Ok(config)
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    setup_logging(cli.verbose);

    if let Commands::Init { force } = cli.command {
        return init(cli.config, cli.database, force);
    }

    let config = load_config(cli.config.as_deref(), cli.database)?;
    let server = get_server(config)?;

    let result = match cli.command {
        Commands::Init { .. } => return Ok(()),
        Commands::Ask {
            question,
            group,
            history,
        } => {
            let history = match history {
                Some(path) => read_history(&path)?,
                None => Vec::new(),
            };
            server
                .ask(AskParams {
                    question,
                    history,
                    group,
                })
                .await
        }
        Commands::Route { question, group } => {
            server
                .route(AskParams {
                    question,
                    history: Vec::new(),
                    group,
                })
                .await
        }
        Commands::Import { path, recursive } => import(&server, &path, recursive).await?,
        Commands::Stats => server.stats().await,
        Commands::Timetable {
            group,
            date,
            refresh,
        } => {
            server
                .timetable(timetable_params(group, date, refresh))
                .await
        }
    };

    emit(result);
    Ok(())
}

/// A bare argument is a group code; anything with spaces is searched for one.
fn timetable_params(group: String, date: Option<NaiveDate>, refresh: bool) -> TimetableParams {
    let (group, text) = if group.trim().contains(char::is_whitespace) {
        (None, Some(group))
    } else {
        (Some(group), None)
    };
    TimetableParams {
        group,
        text,
        date,
        time: None,
        refresh,
    }
}

fn init(
    config_path: Option<PathBuf>,
    database: Option<PathBuf>,
    force: bool,
) -> Result<(), Box<dyn std::error::Error>> {
    let config_path = config_path.unwrap_or_else(default_config_path);

    let mut config = if config_path.exists() && !force {
        println!("Using existing config at: {}", config_path.display());
        KaiConfig::load(&config_path)?
    } else {
        if let Some(parent) = config_path.parent() {
            fs::create_dir_all(parent)?;
        }
        let config = KaiConfig::default();
        fs::write(&config_path, config.to_toml()?)?;
        println!("Wrote config to: {}", config_path.display());
        config
    };
    if let Some(db) = database {
        config.store.path = db;
    }

    if let Some(parent) = config.store.path.parent() {
        fs::create_dir_all(parent)?;
    }
    fs::create_dir_all(&config.timetable.data_dir)?;

    // Opening the server creates the schema
    let _server = KaiServer::new(config.clone())?;
    println!("Initialized database at: {}", config.store.path.display());
    Ok(())
}

fn get_server(config: KaiConfig) -> Result<KaiServer, Box<dyn std::error::Error>> {
    if let Some(parent) = config.store.path.parent() {
        if !parent.as_os_str().is_empty() && !parent.exists() {
            eprintln!(
                "Database directory does not exist. Run 'kai init' first, or specify a path with -d."
            );
            std::process::exit(1);
        }
    }

    Ok(KaiServer::new(config)?)
}

fn read_history(path: &Path) -> Result<Vec<TurnMessage>, Box<dyn std::error::Error>> {
    let raw = fs::read_to_string(path)?;
    Ok(serde_json::from_str(&raw)?)
}

async fn import(
    server: &KaiServer,
    path: &Path,
    recursive: bool,
) -> Result<ToolResult, Box<dyn std::error::Error>> {
    let files = collect_files(path, recursive)?;

    if files.is_empty() {
        return Ok(ToolResult::error(format!(
            "No JSON files found at: {}",
            path.display()
        )));
    }

    let mut imported = 0u64;
    let mut failed = Vec::new();

    for file_path in files {
        debug!("Importing {}", file_path.display());
        let content = match fs::read_to_string(&file_path) {
            Ok(c) => c,
            Err(e) => {
                failed.push(format!("{}: {}", file_path.display(), e));
                continue;
            }
        };

        let result = server.import_json(&content).await;
        if result.success {
            let count = serde_json::from_str::<serde_json::Value>(&result.message)
                .ok()
                .and_then(|v| v["imported"].as_u64())
                .unwrap_or(0);
            imported += count;
        } else {
            failed.push(format!("{}: {}", file_path.display(), result.message));
        }
    }

    let summary = serde_json::to_string_pretty(&serde_json::json!({
        "imported": imported,
        "failed": failed,
    }))?;

    Ok(if failed.is_empty() {
        ToolResult::success(summary)
    } else {
        ToolResult::error(summary)
    })
}

fn collect_files(path: &Path, recursive: bool) -> Result<Vec<PathBuf>, std::io::Error> {
    let mut files = Vec::new();

    if path.is_file() {
        files.push(path.to_path_buf());
    } else if path.is_dir() {
        let mut entries: Vec<PathBuf> = fs::read_dir(path)?
            .map(|entry| entry.map(|e| e.path()))
            .collect::<Result<_, _>>()?;
        entries.sort();

        for entry_path in entries {
            if entry_path.is_file() && is_json(&entry_path) {
                files.push(entry_path);
            } else if entry_path.is_dir() && recursive {
                files.extend(collect_files(&entry_path, recursive)?);
            }
        }
    }

    Ok(files)
}

fn is_json(path: &Path) -> bool {
    path.extension().and_then(|e| e.to_str()) == Some("json")
}

fn emit(result: ToolResult) {
    if result.success {
        println!("{}", result.message);
    } else {
        eprintln!("Error: {}", result.message);
        std::process::exit(1);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_parse_timetable_date() {
        let cli = Cli::try_parse_from([
            "kai",
            "--verbose",
            "timetable",
            "Б-121-22-1-КІ",
            "--date",
            "2025-09-08",
        ])
        .unwrap();
        assert!(cli.verbose);
        match cli.command {
            Commands::Timetable { date, .. } => {
                assert_eq!(date, NaiveDate::from_ymd_opt(2025, 9, 8));
            }
            _ => panic!("expected timetable"),
        }
    }

    #[test]
    fn test_timetable_argument_is_a_group() {
        let params = timetable_params("б_121_22_1_кі".to_string(), None, true);
        assert_eq!(params.group.as_deref(), Some("б_121_22_1_кі"));
        assert!(params.text.is_none());
        assert!(params.refresh);

        let params = timetable_params("розклад Б-121-22-1-КІ".to_string(), None, false);
        assert!(params.group.is_none());
        assert_eq!(params.text.as_deref(), Some("розклад Б-121-22-1-КІ"));
    }

    #[tokio::test]
    async fn test_timetable_resolves_loose_group_spelling() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(
            dir.path().join("Б-121-22-1-КІ.json"),
            r#"{"group": "Б-121-22-1-КІ", "weeks": {"1": [
                {"day": "Mon", "lessons": [{"number": 1, "subject": "Алгоритми"}]}
            ]}}"#,
        )
        .unwrap();
        let mut config = KaiConfig::default();
        config.timetable.data_dir = dir.path().to_path_buf();
        config.embedding.model_path = dir.path().join("no-model");
        let server = KaiServer::new_memory(config).unwrap();

        let monday = NaiveDate::from_ymd_opt(2025, 9, 1);
        let result = server
            .timetable(timetable_params("б_121_22_1_кі".to_string(), monday, false))
            .await;
        assert!(result.success, "{}", result.message);
        assert!(result.message.contains("Алгоритми"));
    }

    #[test]
    fn test_collect_files_filters_json() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("a.json"), "[]").unwrap();
        fs::write(dir.path().join("notes.txt"), "x").unwrap();
        fs::create_dir(dir.path().join("nested")).unwrap();
        fs::write(dir.path().join("nested").join("b.json"), "[]").unwrap();

        assert_eq!(collect_files(dir.path(), false).unwrap().len(), 1);
        assert_eq!(collect_files(dir.path(), true).unwrap().len(), 2);
    }

    #[test]
    fn test_load_config_database_override() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("kai.toml");
        fs::write(&path, KaiConfig::default().to_toml().unwrap()).unwrap();
        let config = load_config(Some(&path), Some(PathBuf::from("/tmp/kai.db"))).unwrap();
        assert_eq!(config.store.path, PathBuf::from("/tmp/kai.db"));
    }
}
