//! connkit - demo entry point.
//!
//! Runs one wrapper through a short connect, operate, close sequence and
//! then sweeps old files out of the log directory.
//!
//! Usage: connkit <DEMO> [OPTIONS]
//!
//! Demos: ldap, mysql, postgres, ocp, sftp, docstore, cleanup, passwd
//!
//! Options:
//!   --config PATH    Config file (default: ./connkit.toml)
//!   --init-config    Write a documented config file and exit
//!   --version, -v    Show version
//!   --help, -h       Show this help

use std::env;
use std::path::{Path, PathBuf};
use std::process::ExitCode;

use serde_json::json;
use tracing::{error, info, warn};

use connkit::clients::{
    DocStore, LdapClient, ModifyEvent, MySqlClient, OcpAuth, OcpClient, PatternSearch,
    PostgresClient, SearchType, SftpClient, SqlRow,
};
use connkit::display::print_table;
use connkit::{Config, Error, ErrorKind, LoggingContext, VERSION, cleanup, read_masked_password};

const USAGE: &str = "Usage: connkit <DEMO> [--config PATH] [--init-config]

Demos:
  ldap       Search and modify a directory entry
  mysql      Run a plain and a parameterized query
  postgres   Query the server version
  ocp        List objects of the configured kind
  sftp       Upload, list and delete a file
  docstore   Insert and update a document
  cleanup    Sweep old files from the configured directories
  passwd     Read a masked password

Options:
  --config PATH    Config file (default: ./connkit.toml, or $CONNKIT_CONFIG)
  --init-config    Write a documented config file and exit
  --version, -v    Show version
  --help, -h       Show this help";

/// Exit status for authentication failures and usage errors.
const EXIT_FAILURE: u8 = 1;

/// Exit status after Ctrl-C at a password prompt.
const EXIT_INTERRUPTED: u8 = 130;

const LDAP_DEMO_FILTER: &str = "uid=aladin-29";
const LDAP_DEMO_ATTRIBUTES: [&str; 2] = ["cn", "desc"];
const LDAP_DEMO_MODIFY_DN: &str = "uid=aladin-29";
const LDAP_DEMO_VALUE: &str = "Aladin Ldap Connection";

const MYSQL_DEMO_QUERY: &str = "SELECT * FROM DB.TABLE";
const MYSQL_DEMO_PARAM_QUERY: &str = "select name from db.table where lower(country) = lower(?)";
const MYSQL_DEMO_COUNTRY: &str = "Italy";

const SFTP_DEMO_REMOTE_DIR: &str = "/upload";

/// A runnable demonstration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Demo {
    Ldap,
    MySql,
    Postgres,
    Ocp,
    Sftp,
    DocStore,
    Cleanup,
    Passwd,
}

impl Demo {
    fn parse(name: &str) -> Option<Self> {
        match name {
            "ldap" => Some(Self::Ldap),
            "mysql" => Some(Self::MySql),
            "postgres" => Some(Self::Postgres),
            "ocp" => Some(Self::Ocp),
            "sftp" => Some(Self::Sftp),
            "docstore" => Some(Self::DocStore),
            "cleanup" => Some(Self::Cleanup),
            "passwd" => Some(Self::Passwd),
            _ => None,
        }
    }

    /// Program name used for the log file.
    fn progname(self) -> &'static str {
        match self {
            Self::Ldap => "ldap_conn",
            Self::MySql => "mysql_conn",
            Self::Postgres => "pg_conn",
            Self::Ocp => "ocp_conn",
            Self::Sftp => "sftp_conn",
            Self::DocStore => "docstore_conn",
            Self::Cleanup => "cleanup",
            Self::Passwd => "passwd",
        }
    }
}

/// Parsed command line.
#[derive(Debug, Default)]
struct Args {
    demo: Option<String>,
    config: Option<PathBuf>,
    init_config: bool,
}

fn parse_args(args: &[String]) -> Result<Args, String> {
    let mut parsed = Args::default();
    let mut iter = args.iter();
    while let Some(arg) = iter.next() {
        if arg == "--config" {
            let path = iter.next().ok_or("--config requires a path")?;
            parsed.config = Some(PathBuf::from(path));
        } else if let Some(path) = arg.strip_prefix("--config=") {
            parsed.config = Some(PathBuf::from(path));
        } else if arg == "--init-config" {
            parsed.init_config = true;
        } else if arg.starts_with('-') {
            return Err(format!("Unknown option: {}", arg));
        } else if parsed.demo.is_none() {
            parsed.demo = Some(arg.clone());
        } else {
            return Err(format!("Unexpected argument: {}", arg));
        }
    }
    Ok(parsed)
}

/// Exit status for errors that stop the program before the cleanup sweep.
fn fatal_status(e: &Error) -> Option<u8> {
    match e.kind() {
        ErrorKind::Authentication => Some(EXIT_FAILURE),
        ErrorKind::Interrupted => Some(EXIT_INTERRUPTED),
        _ => None,
    }
}

fn main() -> ExitCode {
    let args: Vec<String> = env::args().collect();

    if args.iter().any(|a| a == "--version" || a == "-v") {
        println!("connkit v{}", VERSION);
        return ExitCode::SUCCESS;
    }
    if args.iter().any(|a| a == "--help" || a == "-h") {
        println!("{}", USAGE);
        return ExitCode::SUCCESS;
    }

    let args = match parse_args(args.get(1..).unwrap_or_default()) {
        Ok(args) => args,
        Err(msg) => {
            eprintln!("{}\n\n{}", msg, USAGE);
            return ExitCode::from(EXIT_FAILURE);
        }
    };

    let config_path = Config::resolve_path(args.config.as_deref());
    if args.init_config {
        return match Config::write_default(&config_path) {
            Ok(true) => {
                println!("Wrote {}", config_path.display());
                ExitCode::SUCCESS
            }
            Ok(false) => {
                println!("{} already exists", config_path.display());
                ExitCode::SUCCESS
            }
            Err(e) => {
                eprintln!("Cannot write {}: {}", config_path.display(), e);
                ExitCode::from(EXIT_FAILURE)
            }
        };
    }

    let Some(name) = args.demo else {
        eprintln!("{}", USAGE);
        return ExitCode::from(EXIT_FAILURE);
    };
    let Some(demo) = Demo::parse(&name) else {
        eprintln!("Unknown demo: {}\n\n{}", name, USAGE);
        return ExitCode::from(EXIT_FAILURE);
    };

    let mut config = match Config::load(&config_path) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Failed to load {}: {}", config_path.display(), e);
            return ExitCode::from(EXIT_FAILURE);
        }
    };

    let logging = match LoggingContext::init(demo.progname(), &config.logging) {
        Ok(logging) => logging,
        Err(e) => {
            eprintln!("File logging disabled: {}", e);
            LoggingContext::console_only(&config.logging)
        }
    };
    if let Some(ref source) = config.source {
        info!("Loaded configuration from {}", source.display());
    }

    let code = match run(demo, &mut config, logging.log_path()) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            if let Some(status) = fatal_status(&e) {
                error!("{} demo stopped: {}", demo.progname(), e);
                eprintln!("\n{}", e);
                logging.shutdown();
                return ExitCode::from(status);
            }
            error!("Problem while running {}: {}", demo.progname(), e);
            eprintln!("{}", e);
            ExitCode::SUCCESS
        }
    };

    if demo != Demo::Cleanup {
        sweep(&config);
    }
    logging.shutdown();
    code
}

/// Removes files past the retention window from the configured directories.
fn sweep(config: &Config) -> cleanup::CleanupReport {
    let names: Vec<&str> = config.cleanup.paths.iter().map(String::as_str).collect();
    cleanup::cleanup_paths(
        config.cleanup.retention_days,
        &config.cleanup.base_dir,
        &names,
    )
}

/// Prompts for a password unless one is configured.
fn ensure_password(slot: &mut Option<String>, prompt: &str) -> connkit::Result<()> {
    if slot.is_none() {
        *slot = Some(read_masked_password(prompt, "*")?);
    }
    Ok(())
}

fn run(demo: Demo, config: &mut Config, log_path: Option<&Path>) -> connkit::Result<()> {
    match demo {
        Demo::Cleanup => {
            let report = sweep(config);
            println!(
                "Removed {}, kept {}, failed {}",
                report.removed, report.kept, report.failed
            );
            Ok(())
        }
        Demo::Passwd => {
            let password = read_masked_password("Password: ", "*")?;
            println!("Read {} characters", password.chars().count());
            Ok(())
        }
        Demo::DocStore => docstore_demo(config),
        Demo::Sftp => {
            if config.sftp.needs_password() {
                ensure_password(&mut config.sftp.password, "SFTP password: ")?;
            }
            sftp_demo(config, log_path)
        }
        Demo::Ldap | Demo::MySql | Demo::Postgres | Demo::Ocp => {
            match demo {
                Demo::Ldap if config.ldap.bind_dn.is_some() => {
                    ensure_password(&mut config.ldap.password, "LDAP password: ")?;
                }
                Demo::MySql => ensure_password(&mut config.mysql.password, "MySQL password: ")?,
                Demo::Postgres => {
                    ensure_password(&mut config.postgres.password, "PostgreSQL password: ")?;
                }
                Demo::Ocp => {
                    if let OcpAuth::Password {
                        ref mut password, ..
                    } = config.ocp.auth
                    {
                        ensure_password(password, "OpenShift password: ")?;
                    }
                }
                _ => {}
            }

            let runtime = tokio::runtime::Builder::new_current_thread()
                .enable_all()
                .build()?;
            runtime.block_on(async {
                match demo {
                    Demo::Ldap => ldap_demo(config).await,
                    Demo::MySql => mysql_demo(config).await,
                    Demo::Postgres => postgres_demo(config).await,
                    _ => ocp_demo(config).await,
                }
            })
        }
    }
}

fn print_rows(title: &str, rows: &[SqlRow]) {
    println!("{}", title);
    for row in rows {
        let cells: Vec<&str> = row.iter().map(|c| c.as_deref().unwrap_or("NULL")).collect();
        println!("  {}", cells.join(" | "));
    }
}

async fn ldap_demo(config: &Config) -> connkit::Result<()> {
    let settings = &config.ldap;
    let mut client = LdapClient::connect(settings).await?;

    let outcome = async {
        let entries = client
            .search(
                &settings.user_base_dn,
                LDAP_DEMO_FILTER,
                &LDAP_DEMO_ATTRIBUTES,
                false,
            )
            .await?;
        println!("Search Results: {} entries", entries.len());
        for entry in &entries {
            println!("dn: {}", entry.dn);
            print_table(entry.rows());
        }

        client
            .modify(LDAP_DEMO_MODIFY_DN, "cn", LDAP_DEMO_VALUE, ModifyEvent::Add)
            .await
    }
    .await;

    client.close().await?;
    outcome
}

async fn mysql_demo(config: &Config) -> connkit::Result<()> {
    let mut client = MySqlClient::connect(&config.mysql).await?;

    let outcome = async {
        let first = client.query(MYSQL_DEMO_QUERY, &[]).await?;
        print_rows("First query result:", &first);

        let second = client
            .query(MYSQL_DEMO_PARAM_QUERY, &[MYSQL_DEMO_COUNTRY.to_string()])
            .await?;
        print_rows("Second query results:", &second);

        let search = PatternSearch::new("db.users", "country")?;
        let matches = client
            .search_by_pattern(&search, "%ita%", SearchType::Like)
            .await?;
        print_rows("Pattern search results:", &matches);
        Ok::<(), Error>(())
    }
    .await;

    client.close(false).await?;
    outcome
}

async fn postgres_demo(config: &Config) -> connkit::Result<()> {
    let client = PostgresClient::connect(&config.postgres).await?;
    let outcome = client.query("SELECT version()").await;
    client.close().await;
    print_rows("Server version:", &outcome?);
    Ok(())
}

async fn ocp_demo(config: &Config) -> connkit::Result<()> {
    let settings = &config.ocp;
    let client = OcpClient::connect(settings).await?;
    let listed = client
        .list_objects(&settings.api_version, &settings.kind)
        .await;
    client.close();
    let objects = listed?;

    println!(
        "{} {} object(s) in namespace {}",
        objects.len(),
        settings.kind,
        settings.namespace
    );
    for object in &objects {
        println!(
            "  {} status: {}",
            object.name,
            object.phase.as_deref().unwrap_or("-")
        );
    }
    Ok(())
}

fn sftp_demo(config: &Config, log_path: Option<&Path>) -> connkit::Result<()> {
    let local = log_path.ok_or_else(|| {
        Error::InvalidInput("the sftp demo uploads the log file; enable logging".to_string())
    })?;
    let file_name = local
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_default();
    let remote = format!("{}/{}", SFTP_DEMO_REMOTE_DIR, file_name);

    let client = SftpClient::login(&config.sftp)?;
    let outcome = (|| {
        client.copy_file(local, &remote)?;
        for entry in client.list_files(SFTP_DEMO_REMOTE_DIR)? {
            println!("  {} ({} bytes)", entry.name, entry.size);
        }
        client.delete_file(&remote)?;
        let remaining = client.list_files(SFTP_DEMO_REMOTE_DIR)?;
        println!("{} entries left in {}", remaining.len(), SFTP_DEMO_REMOTE_DIR);
        Ok::<(), Error>(())
    })();
    client.logout();
    outcome
}

fn docstore_demo(config: &Config) -> connkit::Result<()> {
    let settings = &config.docstore;
    let mut store = DocStore::open(&settings.path)?;
    store.use_table(&settings.table);

    let document = json!({"id": "q1", "sql_query": "SELECT 1"});
    if let Some(document) = document.as_object() {
        let id = store.insert(document.clone())?;
        info!("Inserted document {}", id);
    }

    let mut changes = serde_json::Map::new();
    changes.insert("sql_query".to_string(), json!("SELECT 2"));
    let updated = store.update_where("id", &json!("q1"), &changes)?;
    if updated.is_empty() {
        warn!("No document matched id q1");
    }

    for (id, document) in store.all()? {
        println!("{}: {}", id, serde_json::Value::Object(document.clone()));
    }
    store.close()
}
