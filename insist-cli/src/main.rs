use clap::{Parser, Subcommand, ValueEnum};
use insist::include::IncludeObserver;
use insist::record::DynamicRecord;
use insist::watcher::WatchControl;
use insist::{CollectionStore, Enforcer, Registry, WatchConfig};
use std::path::{Path, PathBuf};
use std::process;
use std::sync::PoisonError;

/// insist: keep INI-backed collections in sync with the files they live in
#[derive(Parser)]
#[command(name = "insist", version, about)]
struct Cli {
    /// Collections configuration (YAML)
    #[arg(long, short, default_value = "insist.yaml")]
    config: PathBuf,

    /// Watched directory (default: `root` of the configuration, else the
    /// directory holding it)
    #[arg(long)]
    root: Option<PathBuf>,

    /// Output format
    #[arg(long, default_value = "yaml")]
    format: OutputFormat,

    /// More log output (-v info, -vv debug, -vvv trace); RUST_LOG wins
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    #[command(subcommand)]
    command: Command,
}

#[derive(Clone, ValueEnum)]
enum OutputFormat {
    Yaml,
    Json,
}

#[derive(Subcommand)]
enum Command {
    /// Load every collection, then apply file changes until Enter is pressed
    Watch,

    /// Load collections and print their items
    Show {
        /// Only this collection
        collection: Option<String>,
    },

    /// Print a collection in document form
    Dump {
        /// Collection name
        collection: String,
    },

    /// Print the include graph of the documents below a directory
    Includes {
        /// Directory to scan (default: current directory)
        dir: Option<PathBuf>,
    },
}

type CliResult<T> = Result<T, Box<dyn std::error::Error>>;

fn main() {
    let cli = Cli::parse();

    let level = match cli.verbose {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(level)).init();

    if let Err(e) = run(cli) {
        eprintln!("ERROR:{e}");
        process::exit(1);
    }
}

fn run(cli: Cli) -> CliResult<()> {
    match &cli.command {
        Command::Watch => {
            let (root, registry, stores) = open(&cli)?;
            let mut enforcer = Enforcer::new(&root);
            let handlers = enforcer.register_handlers(&registry)?;
            log::info!("{handlers} collection(s) enforced below {}", root.display());

            let observer = IncludeObserver::new(&root).start()?;
            let watcher = enforcer.start()?;
            eprintln!("Watching {} (press Enter to stop)", root.display());
            let mut line = String::new();
            std::io::stdin().read_line(&mut line)?;
            drop(watcher);
            drop(observer);

            print_output(&collections_value(&stores, None)?, &cli.format)?;
        }

        Command::Show { collection } => {
            let (_, _, stores) = open(&cli)?;
            if let Some(name) = collection {
                find(&stores, name)?;
            }
            print_output(&collections_value(&stores, collection.as_deref())?, &cli.format)?;
        }

        Command::Dump { collection } => {
            let (_, _, stores) = open(&cli)?;
            print!("{}", find(&stores, collection)?.dumps()?);
        }

        Command::Includes { dir } => {
            let dir = std::fs::canonicalize(dir.as_deref().unwrap_or(Path::new(".")))?;
            let mut observer = IncludeObserver::new(dir);
            observer.initialize(&mut Unwatched)?;
            print_output(&serde_json::to_value(observer.graph())?, &cli.format)?;
        }
    }

    Ok(())
}

/// Read the configuration, build its collections and load them once.
fn open(cli: &Cli) -> CliResult<(PathBuf, Registry, Vec<CollectionStore>)> {
    let config = WatchConfig::load(&cli.config)
        .map_err(|e| format!("Failed to read configuration '{}': {e}", cli.config.display()))?;
    let root = match &cli.root {
        Some(root) => root.clone(),
        None => {
            let base = match cli.config.parent() {
                Some(dir) if !dir.as_os_str().is_empty() => dir,
                _ => Path::new("."),
            };
            config.resolve_root(base)
        }
    };
    let root = std::fs::canonicalize(&root)
        .map_err(|e| format!("Cannot use root '{}': {e}", root.display()))?;

    let mut registry = Registry::new();
    let stores = config.build(&root, &mut registry)?;
    for store in &stores {
        match store.load_from_backend(None) {
            Ok(report) => log::info!(
                "Loaded collection '{}': {} item(s)",
                store.name(),
                report.added.len()
            ),
            Err(e) => log::warn!("Cannot load collection '{}': {e}", store.name()),
        }
    }
    Ok((root, registry, stores))
}

fn find<'a>(stores: &'a [CollectionStore], name: &str) -> CliResult<&'a CollectionStore> {
    stores
        .iter()
        .find(|s| s.name() == name)
        .ok_or_else(|| format!("Unknown collection '{name}'").into())
}

/// `{collection: {key: {attribute: value}}}`
fn collections_value(stores: &[CollectionStore], only: Option<&str>) -> CliResult<serde_json::Value> {
    let mut out = serde_json::Map::new();
    for store in stores {
        if only.is_some_and(|name| name != store.name()) {
            continue;
        }
        let collection = store.collection().read().unwrap_or_else(PoisonError::into_inner);
        let mut items = serde_json::Map::new();
        for (key, item) in collection.iter() {
            let record = item.read().unwrap_or_else(PoisonError::into_inner);
            if let Some(record) = record.downcast_ref::<DynamicRecord>() {
                items.insert(key.to_string(), serde_json::to_value(record)?);
            }
        }
        out.insert(store.name().to_string(), serde_json::Value::Object(items));
    }
    Ok(serde_json::Value::Object(out))
}

fn print_output(value: &serde_json::Value, format: &OutputFormat) -> CliResult<()> {
    match format {
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(value)?),
        OutputFormat::Yaml => print!("{}", serde_yaml::to_string(value)?),
    }
    Ok(())
}

/// The include graph of a one-off scan needs no directory watches.
struct Unwatched;

impl WatchControl for Unwatched {
    fn watch(&mut self, _dir: &Path) -> insist::Result<()> {
        Ok(())
    }

    fn unwatch(&mut self, _dir: &Path) -> insist::Result<()> {
        Ok(())
    }
}
