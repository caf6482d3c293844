//! Sofa CLI
//!
//! Command-line client for CouchDB-style servers.
//!
//! # Usage
//!
//! ```bash
//! # Server and database info
//! sofa info
//! sofa info orders
//!
//! # Documents
//! sofa put orders '{"_id":"o1","total":12}'
//! sofa get orders o1 --conflicts
//! sofa bulk orders batch.json --all-or-nothing
//!
//! # Follow the changes feed until Ctrl-C
//! sofa changes orders --feed continuous --since now --include-docs
//!
//! # Views
//! sofa view orders reports by_day -p group_level=2 -p limit=10
//!
//! # Against another server, with feed settings from a file
//! SOFA_URL=http://db:5984 sofa --config /etc/sofa/sofa.toml changes orders
//! ```

use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use colored::*;
use serde::Serialize;
use tracing::{debug, Level};
use tracing_subscriber::FmtSubscriber;

use sofa::{
    BulkWriteOutcome, ChangesSubscription, Client, ClientConfig, Document, FeedMode, FilterRef,
    GetOptions, Params, Revision, Seq, ViewParams,
};

/// Sofa - CouchDB-style database client
#[derive(Parser, Debug)]
#[command(name = "sofa")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Server URL (overrides the config file)
    #[arg(short, long, env = "SOFA_URL")]
    url: Option<String>,

    /// Configuration file path (TOML)
    #[arg(short, long, env = "SOFA_CONFIG")]
    config: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, env = "SOFA_LOG_LEVEL", default_value = "warn")]
    log_level: String,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Show server info, or database info when a database is given
    Info { db: Option<String> },

    /// List databases
    Dbs,

    /// Create a database
    CreateDb { db: String },

    /// Delete a database
    DeleteDb { db: String },

    /// Fetch a document
    Get {
        db: String,
        id: String,
        /// Fetch this revision instead of the winner
        #[arg(long)]
        rev: Option<String>,
        /// Include conflicting revisions
        #[arg(long)]
        conflicts: bool,
    },

    /// Create or update a document from JSON
    Put { db: String, json: String },

    /// Delete a document revision
    Delete { db: String, id: String, rev: String },

    /// Write a JSON array of documents (or `{"docs": [...]}`) from a file
    Bulk {
        db: String,
        file: PathBuf,
        #[arg(long)]
        all_or_nothing: bool,
    },

    /// Read the changes feed
    Changes {
        db: String,
        /// normal, longpoll or continuous
        #[arg(long, default_value = "normal")]
        feed: FeedMode,
        /// Start after this sequence (`now` for new changes only)
        #[arg(long)]
        since: Option<String>,
        /// Server-side filter as design/name
        #[arg(long)]
        filter: Option<String>,
        #[arg(long)]
        include_docs: bool,
    },

    /// Query a view
    View {
        db: String,
        design: String,
        view: String,
        /// Skip the reduce function
        #[arg(long)]
        map_only: bool,
        /// Extra query parameter, repeatable
        #[arg(short = 'p', long = "param", value_parser = parse_param)]
        params: Vec<(String, String)>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Logs go to stderr; stdout carries command output
    FmtSubscriber::builder()
        .with_max_level(parse_level(&args.log_level))
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    let config = load_config(args.config.as_deref(), args.url)?;
    debug!(url = %config.url, "connecting");
    let client = Client::new(config.clone())
        .with_context(|| format!("Invalid server URL {}", config.url))?;

    run(&client, args.command).await
}

fn parse_level(level: &str) -> Level {
    match level.to_lowercase().as_str() {
        "trace" => Level::TRACE,
        "debug" => Level::DEBUG,
        "info" => Level::INFO,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::INFO,
    }
}

/// `key=value` query parameter
fn parse_param(raw: &str) -> std::result::Result<(String, String), String> {
    match raw.split_once('=') {
        Some((key, value)) if !key.is_empty() => Ok((key.to_string(), value.to_string())),
        _ => Err(format!("expected key=value, got '{}'", raw)),
    }
}

/// Config file first, then the URL flag or `SOFA_URL`
fn load_config(path: Option<&Path>, url: Option<String>) -> Result<ClientConfig> {
    let mut config = match path {
        Some(path) => {
            let raw = std::fs::read_to_string(path)
                .with_context(|| format!("Failed to read config {}", path.display()))?;
            toml::from_str(&raw)
                .with_context(|| format!("Failed to parse config {}", path.display()))?
        }
        None => ClientConfig::default(),
    };
    if let Some(url) = url {
        config.url = url;
    }
    Ok(config)
}

/// Read documents for a bulk write
fn parse_bulk(raw: &str) -> Result<Vec<Document>> {
    #[derive(serde::Deserialize)]
    #[serde(untagged)]
    enum Batch {
        Docs(Vec<Document>),
        Wrapped { docs: Vec<Document> },
    }

    let batch: Batch = serde_json::from_str(raw)
        .context("Expected a JSON array of documents or {\"docs\": [...]}")?;
    Ok(match batch {
        Batch::Docs(docs) | Batch::Wrapped { docs } => docs,
    })
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn print_ok(message: &str) {
    println!("{} {}", "ok".green().bold(), message);
}

fn print_outcome(index: usize, outcome: &BulkWriteOutcome) {
    match outcome {
        BulkWriteOutcome::Accepted { id, rev } => {
            println!("{:>4} {} {} {}", index, "accepted".green(), id, rev.to_string().dimmed())
        }
        BulkWriteOutcome::Conflict { id } => {
            println!("{:>4} {} {}", index, "conflict".yellow(), id)
        }
        BulkWriteOutcome::Rejected { id, error, reason } => {
            println!("{:>4} {} {} {}: {}", index, "rejected".red(), id, error, reason)
        }
    }
}

async fn run(client: &Client, command: Command) -> Result<()> {
    match command {
        Command::Info { db: None } => print_json(&client.server_info().await?),
        Command::Info { db: Some(db) } => print_json(&client.database(&db).info().await?),
        Command::Dbs => {
            for name in client.all_dbs().await? {
                println!("{}", name);
            }
            Ok(())
        }
        Command::CreateDb { db } => {
            client.create_database(&db).await?;
            print_ok(&format!("created {}", db));
            Ok(())
        }
        Command::DeleteDb { db } => {
            client.delete_database(&db).await?;
            print_ok(&format!("deleted {}", db));
            Ok(())
        }
        Command::Get {
            db,
            id,
            rev,
            conflicts,
        } => {
            let mut options = GetOptions::default().conflicts(conflicts);
            if let Some(rev) = rev {
                options = options.rev(Revision::parse(&rev)?);
            }
            let doc = client.database(&db).get_with(&id, &options).await?;
            if doc.has_conflicts() {
                eprintln!(
                    "{} {} conflicting revision(s)",
                    "warning:".yellow().bold(),
                    doc.conflicts.len()
                );
            }
            print_json(&doc)
        }
        Command::Put { db, json } => {
            let doc = Document::from_json(json.as_bytes()).context("Invalid document JSON")?;
            let db = client.database(&db);
            let written = if doc.id.is_some() {
                db.save(&doc).await?
            } else {
                db.insert(doc).await?
            };
            print_ok(&format!("{} {}", written.id, written.rev));
            Ok(())
        }
        Command::Delete { db, id, rev } => {
            let rev = Revision::parse(&rev)?;
            let written = client.database(&db).delete(&id, &rev).await?;
            print_ok(&format!("{} {}", written.id, written.rev));
            Ok(())
        }
        Command::Bulk {
            db,
            file,
            all_or_nothing,
        } => {
            let raw = std::fs::read_to_string(&file)
                .with_context(|| format!("Failed to read {}", file.display()))?;
            let docs = parse_bulk(&raw)?;
            let outcomes = client.database(&db).bulk_write(&docs, all_or_nothing).await?;
            for (index, outcome) in outcomes.iter().enumerate() {
                print_outcome(index, outcome);
            }
            let summary = sofa::BulkSummary::of(&outcomes);
            println!(
                "{} accepted, {} conflicts, {} rejected",
                summary.accepted.to_string().green(),
                summary.conflicts.to_string().yellow(),
                summary.rejected.to_string().red()
            );
            Ok(())
        }
        Command::Changes {
            db,
            feed,
            since,
            filter,
            include_docs,
        } => {
            let mut subscription = ChangesSubscription::new(feed).include_docs(include_docs);
            if let Some(since) = since {
                subscription = subscription.since(Seq::from(since.as_str()));
            }
            if let Some(filter) = filter {
                subscription = subscription.filter(filter.parse::<FilterRef>()?);
            }
            follow(client, &db, subscription).await
        }
        Command::View {
            db,
            design,
            view,
            map_only,
            params,
        } => {
            let params: Params = params.into_iter().collect();
            let db = client.database(&db);
            let rows = if map_only {
                db.map_only(&design, &view, params).await?
            } else {
                db.view(&design, &view, ViewParams::from(params)).await?
            };
            print_json(&rows)
        }
    }
}

/// Print changes as JSON lines; a continuous feed runs until Ctrl-C
async fn follow(client: &Client, db: &str, subscription: ChangesSubscription) -> Result<()> {
    let mut feed = client.database(db).changes_feed(subscription);

    loop {
        let next = tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                eprintln!("{}", "interrupted".dimmed());
                break;
            }
            next = feed.next() => next,
        };
        match next {
            Some(Ok(event)) => println!("{}", serde_json::to_string(&event)?),
            Some(Err(e)) => {
                feed.close().await;
                bail!("changes feed failed: {}", e);
            }
            None => break,
        }
    }

    if let Some(seq) = feed.last_seq() {
        eprintln!("{} {}", "last_seq".dimmed(), seq);
    }
    feed.close().await;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_parse_level() {
        assert_eq!(parse_level("DEBUG"), Level::DEBUG);
        assert_eq!(parse_level("error"), Level::ERROR);
        assert_eq!(parse_level("bogus"), Level::INFO);
    }

    #[test]
    fn test_parse_param() {
        assert_eq!(
            parse_param("startkey=[\"a\",1]").unwrap(),
            ("startkey".to_string(), "[\"a\",1]".to_string())
        );
        assert_eq!(parse_param("stale=").unwrap().1, "");
        assert!(parse_param("=x").is_err());
        assert!(parse_param("novalue").is_err());
    }

    #[test]
    fn test_args() {
        let args = Args::try_parse_from([
            "sofa",
            "--url",
            "http://db:5984",
            "changes",
            "orders",
            "--feed",
            "longpoll",
            "--filter",
            "app/by_type",
        ])
        .unwrap();
        assert_eq!(args.url.as_deref(), Some("http://db:5984"));
        match args.command {
            Command::Changes { db, feed, filter, .. } => {
                assert_eq!(db, "orders");
                assert_eq!(feed, FeedMode::LongPoll);
                assert_eq!(filter.as_deref(), Some("app/by_type"));
            }
            other => panic!("unexpected command {:?}", other),
        }

        let args =
            Args::try_parse_from(["sofa", "view", "d", "app", "v", "-p", "limit=2", "-p", "group=true"])
                .unwrap();
        match args.command {
            Command::View { params, .. } => assert_eq!(params.len(), 2),
            other => panic!("unexpected command {:?}", other),
        }

        assert!(Args::try_parse_from(["sofa", "changes", "d", "--feed", "sometimes"]).is_err());
    }

    #[test]
    fn test_load_config_overrides_url() {
        let dir = std::env::temp_dir().join(format!("sofa-cli-{}", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("sofa.toml");
        std::fs::write(
            &path,
            "url = \"http://from-file:5984\"\n[feed]\nchannel_capacity = 3\n",
        )
        .unwrap();

        let config = load_config(Some(&path), None).unwrap();
        assert_eq!(config.url, "http://from-file:5984");
        assert_eq!(config.feed.channel_capacity, 3);
        assert_eq!(config.request_timeout, Some(Duration::from_secs(30)));

        let config = load_config(Some(&path), Some("http://flag:5984".into())).unwrap();
        assert_eq!(config.url, "http://flag:5984");

        assert!(load_config(Some(&dir.join("missing.toml")), None).is_err());
        std::fs::remove_dir_all(&dir).unwrap();
    }

    #[test]
    fn test_parse_bulk() {
        let docs = parse_bulk(r#"[{"_id":"a"},{"v":1}]"#).unwrap();
        assert_eq!(docs.len(), 2);
        assert_eq!(docs[0].id(), Some("a"));

        let docs = parse_bulk(r#"{"docs":[{"_id":"b"}]}"#).unwrap();
        assert_eq!(docs[0].id(), Some("b"));

        assert!(parse_bulk(r#"{"_id":"c"}"#).is_err());
    }
}
