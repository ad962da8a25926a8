mod config;
mod error;
mod filter;
mod mocks;
mod record;
mod search;
mod server;
mod store;
mod values;

use clap::{ArgAction, Parser, Subcommand};
use config::{Overrides, Settings};
use error::Error;
use mocks::{MockKind, MockOptions, MockRegistry};
use record::Record;
use server::{AppState, RequestLog, Server};
use std::collections::BTreeMap;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use store::UserStore;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(
    name = "dirfix",
    version,
    about = "Serve a synthetic directory user dataset and file-backed mocks for integration tests"
)]
struct Cli {
    #[arg(long, global = true, env = "DIRFIX_CONFIG", help = "YAML settings file")]
    config: Option<PathBuf>,

    #[arg(long, global = true, env = "DIRFIX_DATABASE", help = "SQLite user database")]
    database: Option<PathBuf>,

    #[arg(long, global = true, env = "DIRFIX_SEED_CSV", help = "CSV used to seed an empty database")]
    seed_csv: Option<PathBuf>,

    #[arg(long, global = true, env = "DIRFIX_MOCKS_DIR", help = "Directory holding mocks.json and mock_data/")]
    mocks_dir: Option<PathBuf>,

    #[arg(short, long, global = true, action = ArgAction::Count, help = "More log output (-v, -vv)")]
    verbose: u8,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run the HTTP server until interrupted
    Serve {
        #[arg(long, env = "DIRFIX_LISTEN")]
        listen: Option<SocketAddr>,
    },
    /// Print the users matching a filter, one JSON object per line
    Query {
        #[arg(help = "LDAP-style filter, e.g. (&(memberOf=Admins)(uidNumber>=1000)), or key=value")]
        filter: String,

        #[arg(long, help = "Match against a JSON array of records instead of the database")]
        records: Option<PathBuf>,
    },
    /// List the distinct values of an attribute
    Values {
        attribute: String,

        #[arg(long, help = "Show count for each value")]
        count: bool,
    },
    /// Register a file as a mock served at /mocks/{label}
    AddMock {
        #[arg(long)]
        label: String,

        #[arg(long, help = "Source file to copy into mock_data/")]
        src: PathBuf,

        #[arg(long = "type", value_enum, default_value_t = MockKind::Json)]
        kind: MockKind,

        #[arg(long, default_value_t = 200)]
        status: u16,

        #[arg(long, default_value = "{}", help = "JSON object of response headers")]
        headers: String,

        #[arg(long, help = "Content-Type for raw mocks")]
        content_type: Option<String>,

        #[arg(long, help = "Replace an existing mapping")]
        overwrite: bool,
    },
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    let overrides = Overrides {
        listen: match &cli.command {
            Command::Serve { listen } => *listen,
            _ => None,
        },
        database: cli.database,
        seed_csv: cli.seed_csv,
        mocks_dir: cli.mocks_dir,
    };
    let settings = match Settings::load(cli.config.as_deref(), overrides) {
        Ok(settings) => settings,
        Err(e) => {
            eprintln!("Error: {}", e);
            return ExitCode::from(2);
        }
    };

    match cli.command {
        Command::Serve { .. } => run_serve(settings),
        Command::Query { filter, records } => {
            run_query_mode(&settings, &filter, records.as_deref())
        }
        Command::Values { attribute, count } => run_values_mode(&settings, &attribute, count),
        Command::AddMock {
            label,
            src,
            kind,
            status,
            headers,
            content_type,
            overwrite,
        } => {
            let options = MockOptions {
                kind,
                status,
                headers: parse_headers(&headers),
                content_type,
            };
            run_add_mock(&settings, &label, &src, options, overwrite)
        }
    }
}

fn init_logging(verbose: u8) {
    let default_level = match verbose {
        0 => "info",
        1 => "debug",
        _ => "trace",
    };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    let subscriber = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr);
    if let Err(e) = subscriber.try_init() {
        eprintln!("Failed to init tracing subscriber: {e}");
    }
}

fn open_store(settings: &Settings) -> error::Result<UserStore> {
    let store = UserStore::open(&settings.database)?;
    store.seed_from_csv(&settings.seed_csv)?;
    Ok(store)
}

fn run_serve(settings: Settings) -> ExitCode {
    let store = match open_store(&settings) {
        Ok(store) => store,
        Err(e) => {
            error!("Failed to open user store: {}", e);
            return ExitCode::from(2);
        }
    };
    let state = AppState {
        store,
        mocks: MockRegistry::new(&settings.mocks_dir),
        log: RequestLog::new(settings.request_log_capacity),
    };

    let runtime = match tokio::runtime::Runtime::new() {
        Ok(runtime) => runtime,
        Err(e) => {
            error!("Failed to start runtime: {}", e);
            return ExitCode::from(2);
        }
    };

    let result = runtime.block_on(async {
        tokio::select! {
            result = Server::new(settings.listen, state).run() => result,
            _ = tokio::signal::ctrl_c() => {
                info!("Shutting down");
                Ok(())
            }
        }
    });

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("Server failed: {}", e);
            ExitCode::from(2)
        }
    }
}

fn load_records(path: &Path) -> error::Result<Vec<Record>> {
    let text = std::fs::read_to_string(path)?;
    Ok(serde_json::from_str(&text)?)
}

fn run_query_mode(settings: &Settings, filter_str: &str, records_path: Option<&Path>) -> ExitCode {
    let result = match records_path {
        Some(path) => load_records(path).and_then(|records| {
            let filter = filter::parse(filter_str)?;
            Ok(search::select(&filter, records))
        }),
        None => open_store(settings)
            .and_then(|store| search::search_users(&store, Some(filter_str))),
    };

    let matches = match result {
        Ok(matches) => matches,
        Err(e) => {
            eprintln!("Query error: {}", e);
            return ExitCode::from(2);
        }
    };

    for record in &matches {
        match serde_json::to_string(record) {
            Ok(line) => println!("{}", line),
            Err(e) => warn!("Skipping unprintable record: {}", e),
        }
    }

    if matches.is_empty() {
        ExitCode::from(1)
    } else {
        ExitCode::from(0)
    }
}

fn run_values_mode(settings: &Settings, attribute: &str, show_count: bool) -> ExitCode {
    let records = match open_store(settings).and_then(|store| store.all_users()) {
        Ok(records) => records,
        Err(e) => {
            eprintln!("Error: {}", e);
            return ExitCode::from(2);
        }
    };

    let counts = values::collect_values(&records, attribute);

    if counts.is_empty() {
        return ExitCode::from(1);
    }

    let lines = values::format_values(counts, show_count);
    for line in lines {
        println!("{}", line);
    }

    ExitCode::from(0)
}

fn parse_headers(raw: &str) -> BTreeMap<String, String> {
    serde_json::from_str(raw).unwrap_or_else(|e| {
        warn!("Invalid headers JSON ({}); using empty", e);
        BTreeMap::new()
    })
}

fn run_add_mock(
    settings: &Settings,
    label: &str,
    src: &Path,
    options: MockOptions,
    overwrite: bool,
) -> ExitCode {
    let registry = MockRegistry::new(&settings.mocks_dir);
    match registry.register_file(label, src, options, overwrite) {
        Ok(entry) => {
            println!("Registered mock: {}", label);
            let mapping = BTreeMap::from([(label, entry)]);
            match serde_json::to_string_pretty(&mapping) {
                Ok(json) => println!("{}", json),
                Err(e) => warn!("Failed to render mapping: {}", e),
            }
            ExitCode::from(0)
        }
        Err(e) => {
            eprintln!("Error: {}", e);
            let code = match e {
                Error::NotFound(_) => 2,
                Error::Conflict(_) => 3,
                Error::InvalidRequest(_) => 4,
                _ => 1,
            };
            ExitCode::from(code)
        }
    }
}
