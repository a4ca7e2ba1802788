//! Command line front end for the offline library.

mod error;

use crate::error::{ErrorKind, Result};
use clap::{Parser, Subcommand};
use exn::{OptionExt, ResultExt};
use folio_catalog::HttpCatalog;
use folio_config::Config;
use folio_library::Library;
use folio_library::download::Progress;
use folio_library::packages::PackageTree;
use folio_reader::{ContentCache, Language, VersionSelection};
use folio_state::{Database, SqliteStore};
use folio_storage::BackendHandle;
use folio_storage::backend::LocalBackend;
use indicatif::{HumanBytes, ProgressBar, ProgressStyle};
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

/// Keep an offline text library in sync and read from it.
#[derive(Parser)]
#[command(name = "folio")]
struct Cli {
    /// Configuration file; defaults to folio.toml in the platform config
    /// directory.
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Show the package tree and what is selected.
    Packages,
    /// Select a package for download.
    Select { name: String },
    /// Deselect a package and everything below it, deleting its books.
    Deselect { name: String },
    /// Show what the next sync would download and delete.
    Plan,
    /// Check the server for updates, then delete and download books.
    Sync,
    /// List the books stored locally.
    Books,
    /// Print the section containing a reference.
    Read {
        /// Reference such as "Genesis 1:3".
        reference: String,

        /// Version to use for a language, as LANG=TITLE (repeatable).
        #[arg(long = "version", value_name = "LANG=TITLE")]
        versions: Vec<String>,

        /// Leave a language out instead of falling back to its default
        /// version.
        #[arg(long)]
        no_fallback: bool,

        /// Print the assembled section as JSON.
        #[arg(long)]
        json: bool,
    },
}

struct App {
    archives: BackendHandle,
    documents: BackendHandle,
    database: Database,
    library: Library,
}

impl App {
    async fn open(config_file: Option<&Path>) -> Result<Self> {
        let config = Config::load(config_file).or_raise(|| ErrorKind::Config)?;
        let archives: BackendHandle = Arc::new(
            LocalBackend::new("library", &config.library_dir).or_raise(|| ErrorKind::Setup("library directory"))?,
        );
        let documents: BackendHandle = Arc::new(
            LocalBackend::new("documents", &config.documents_dir)
                .or_raise(|| ErrorKind::Setup("documents directory"))?,
        );
        if let Some(parent) = config.state_path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .or_raise(|| ErrorKind::Setup("state directory"))?;
        }
        let database = Database::connect(&config.state_path)
            .await
            .or_raise(|| ErrorKind::Setup("state database"))?;
        let store = Arc::new(SqliteStore::new(database.pool().clone()));
        let catalog = Arc::new(
            HttpCatalog::new(&config.server.base_url, config.server.schema_version.clone())
                .or_raise(|| ErrorKind::Setup("remote catalog"))?,
        );
        let library = Library::new(&config, archives.clone(), store, catalog);
        Ok(Self { archives, documents, database, library })
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let cli = Cli::parse();
    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            eprintln!("Error: {err:?}");
            ExitCode::FAILURE
        },
    }
}

async fn run(cli: Cli) -> Result<()> {
    let app = App::open(cli.config.as_deref()).await?;
    let result = match cli.command {
        Command::Packages => packages(&app).await,
        Command::Select { name } => select(&app, &name).await,
        Command::Deselect { name } => deselect(&app, &name).await,
        Command::Plan => plan(&app).await,
        Command::Sync => sync(&app).await,
        Command::Books => books(&app).await,
        Command::Read { reference, versions, no_fallback, json } => {
            read(&app, &reference, &versions, !no_fallback, json).await
        },
    };
    app.database.close().await;
    result
}

async fn packages(app: &App) -> Result<()> {
    let state = app.library.package_setup_protocol().await.or_raise(|| ErrorKind::Library)?;
    print_tree(&state.packages);
    Ok(())
}

fn print_tree(tree: &PackageTree) {
    let root = tree.root().name.as_str();
    for name in std::iter::once(root).chain(tree.descendants(root)) {
        let Some(package) = tree.get(name) else {
            continue;
        };
        let mark = if package.superseded_by_parent {
            "[~]"
        } else if package.selected {
            "[x]"
        } else {
            "[ ]"
        };
        let size = package.size.map(|size| format!(" ({})", HumanBytes(size))).unwrap_or_default();
        println!("{}{mark} {name}{size}", "  ".repeat(tree.depth(name)));
    }
}

async fn select(app: &App, name: &str) -> Result<()> {
    app.library.select(name).await.or_raise(|| ErrorKind::Library)?;
    let pending = app.library.calculate_books_to_download().await.or_raise(|| ErrorKind::Library)?;
    println!("Selected {name}; {} books to download on the next sync.", pending.len());
    Ok(())
}

async fn deselect(app: &App, name: &str) -> Result<()> {
    let to_delete = app.library.deselect(name).await.or_raise(|| ErrorKind::Library)?;
    let deleted = app.library.delete_books(&to_delete).await.or_raise(|| ErrorKind::Library)?;
    println!("Deselected {name}; deleted {} of {} books.", deleted.len(), to_delete.len());
    Ok(())
}

async fn plan(app: &App) -> Result<()> {
    let to_download = app.library.calculate_books_to_download().await.or_raise(|| ErrorKind::Library)?;
    let to_delete = app.library.calculate_books_to_delete().await.or_raise(|| ErrorKind::Library)?;
    let new_books = app.library.books_not_downloaded(&to_download).await.or_raise(|| ErrorKind::Library)?;
    println!("Download ({}, {} new):", to_download.len(), new_books.len());
    for title in &to_download {
        println!("  + {title}");
    }
    println!("Delete ({}):", to_delete.len());
    for title in &to_delete {
        println!("  - {title}");
    }
    Ok(())
}

async fn sync(app: &App) -> Result<()> {
    let check = app.library.check_updates_from_server().await.or_raise(|| ErrorKind::Library)?;
    println!("{} new books, {} updates.", check.new_books.len(), check.updates());

    let bar = ProgressBar::new(0);
    bar.set_style(
        ProgressStyle::with_template("{spinner:.green} [{bar:40.cyan/blue}] {bytes}/{total_bytes} ({eta})")
            .unwrap_or_else(|_| ProgressStyle::default_bar()),
    );
    let on_progress = {
        let bar = bar.clone();
        move |progress: Progress| {
            if let Some(total) = progress.total {
                bar.set_length(total);
            }
            bar.set_position(progress.downloaded);
        }
    };

    let update = app.library.download_update(&on_progress);
    tokio::pin!(update);
    let report = tokio::select! {
        report = &mut update => report,
        _ = tokio::signal::ctrl_c() => {
            tracing::warn!("interrupted, cancelling download");
            if let Err(err) = app.library.cancel_download() {
                tracing::debug!(error = ?err, "nothing to cancel");
            }
            update.await
        },
    };
    bar.finish_and_clear();

    let report = report.or_raise(|| ErrorKind::Library)?;
    println!("Deleted {} books, downloaded {} books.", report.deleted.len(), report.downloaded.len());
    Ok(())
}

async fn books(app: &App) -> Result<()> {
    let books = app.library.get_local_book_list().await.or_raise(|| ErrorKind::Library)?;
    for title in &books {
        println!("{title}");
    }
    Ok(())
}

fn parse_versions(arguments: &[String]) -> Result<VersionSelection> {
    arguments
        .iter()
        .map(|argument| {
            let invalid = || ErrorKind::InvalidVersion(argument.clone());
            let (language, title) = argument.split_once('=').ok_or_raise(invalid)?;
            let language: Language = language.parse::<Language>().or_raise(invalid)?;
            Ok((language, title.to_string()))
        })
        .collect()
}

async fn read(app: &App, reference: &str, versions: &[String], fallback: bool, json: bool) -> Result<()> {
    let versions = parse_versions(versions)?;
    let cache = ContentCache::new(app.archives.clone(), app.documents.clone());
    let section = cache
        .load_text_offline(reference, &versions, fallback)
        .await
        .or_raise(|| ErrorKind::Read(reference.to_string()))?;

    if json {
        let rendered = serde_json::to_string_pretty(&*section).or_raise(|| ErrorKind::Read(reference.to_string()))?;
        println!("{rendered}");
        return Ok(());
    }

    println!("{}", section.section_ref);
    for (language, title) in &section.current_versions {
        println!("  {language}: {title}");
    }
    if section.is_partial() {
        let missing: Vec<String> = section.missing_languages.iter().map(ToString::to_string).collect();
        println!("  missing: {}", missing.join(", "));
    }
    for segment in &section.content {
        println!();
        println!("{:>4}  {}", segment.segment_number, segment.text);
        if !segment.he.is_empty() {
            println!("      {}", segment.he);
        }
    }
    Ok(())
}
