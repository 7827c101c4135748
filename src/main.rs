use clap::{Parser, Subcommand};
use colored::*;
use pabuviz_db::analytics::aggregate::{average_rule_result_properties, satisfaction_histogram};
use pabuviz_db::analytics::filter::ElectionFilters;
use pabuviz_db::analytics::histogram::election_property_histogram;
use pabuviz_db::analytics::listing::{election_details, election_list};
use pabuviz_db::analytics::proportionality::category_proportions;
use pabuviz_db::database::ingestion::{
    audit_elections, purge_stale_elections, ElectionIngester, ElectionSnapshot,
};
use pabuviz_db::database::{schema, seed, PbDatabase};
use serde_json::json;
use std::path::{Path, PathBuf};

#[derive(Parser)]
struct Opts {
    #[clap(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Create the database schema and seed the reference catalogs.
    Init {
        /// SQLite database path
        #[clap(long, default_value = "pabuviz.sqlite")]
        database: PathBuf,
    },
    /// Ingest a normalized election snapshot (JSON) produced by the parser.
    Ingest {
        /// Snapshot file
        snapshot: PathBuf,
        /// SQLite database path
        #[clap(long, default_value = "pabuviz.sqlite")]
        database: PathBuf,
    },
    /// Find (and optionally delete) elections whose vote counts disagree
    /// with their stored voters.
    Audit {
        #[clap(long, default_value = "pabuviz.sqlite")]
        database: PathBuf,
        /// Delete the incomplete elections
        #[clap(long)]
        delete: bool,
    },
    /// Remove stale elections. Point this at the user-submitted scratch
    /// database; it runs as a scheduled job there.
    Purge {
        #[clap(long, default_value = "pabuviz.sqlite")]
        database: PathBuf,
        /// Retention window in days
        #[clap(long, default_value_t = 2)]
        days: i64,
    },
    /// List elections matching a filter specification.
    Elections {
        #[clap(long, default_value = "pabuviz.sqlite")]
        database: PathBuf,
        /// Filter specification, e.g. '{"num_votes": {"min": 100}}'
        #[clap(long, default_value = "{}")]
        filters: String,
    },
    /// Per-election values of the requested properties.
    Details {
        #[clap(long, default_value = "pabuviz.sqlite")]
        database: PathBuf,
        /// Comma-separated property short names (all when omitted)
        #[clap(long)]
        properties: Option<String>,
        /// Restrict metadata properties to one ballot type
        #[clap(long)]
        ballot_type: Option<String>,
        #[clap(long, default_value = "{}")]
        filters: String,
    },
    /// Bucketed histogram over an election property.
    Histogram {
        /// Public field or metadata short name
        property: String,
        #[clap(long, default_value = "pabuviz.sqlite")]
        database: PathBuf,
        #[clap(long, default_value_t = 10)]
        bins: usize,
        /// Logarithmic bucket spacing (non-positive values are excluded)
        #[clap(long)]
        log: bool,
        /// Separate counts per ballot type
        #[clap(long)]
        by_ballot_type: bool,
        #[clap(long, default_value = "{}")]
        filters: String,
    },
    /// Vote vs. result cost shares per project category.
    Proportions {
        election_id: i64,
        #[clap(long, default_value = "pabuviz.sqlite")]
        database: PathBuf,
        /// Comma-separated rule abbreviations
        #[clap(long)]
        rules: String,
    },
    /// Average rule result properties over the filtered elections.
    Averages {
        #[clap(long, default_value = "pabuviz.sqlite")]
        database: PathBuf,
        /// Comma-separated rule abbreviations
        #[clap(long)]
        rules: String,
        /// Comma-separated property short names
        #[clap(long)]
        props: String,
        /// Average over whatever values exist instead of requiring complete
        /// elections
        #[clap(long)]
        include_incomplete: bool,
        #[clap(long, default_value = "{}")]
        filters: String,
    },
    /// Averaged cost-satisfaction distribution per rule.
    Satisfaction {
        #[clap(long, default_value = "pabuviz.sqlite")]
        database: PathBuf,
        /// Comma-separated rule abbreviations
        #[clap(long)]
        rules: String,
        #[clap(long, default_value = "{}")]
        filters: String,
    },
}

#[tokio::main]
async fn main() {
    env_logger::init();
    let opts = Opts::parse();

    if let Err(e) = run(opts.command).await {
        eprintln!("{} {}", "error:".bright_red().bold(), e);
        std::process::exit(1);
    }
}

async fn run(command: Command) -> Result<(), Box<dyn std::error::Error>> {
    match command {
        Command::Init { database } => {
            let db = open_database(&database).await?;
            schema::create_schema(db.pool()).await?;
            seed::initialize_reference_data(db.pool()).await?;
            schema::verify_schema(db.pool()).await?;
            println!(
                "{} {}",
                "Database initialized:".bright_green(),
                database.display()
            );
        }
        Command::Ingest { snapshot, database } => {
            let db = open_database(&database).await?;
            let raw = std::fs::read_to_string(&snapshot)?;
            let parsed: ElectionSnapshot = serde_json::from_str(&raw)?;
            let file_name = snapshot
                .file_name()
                .map(|name| name.to_string_lossy().to_string());
            let file_size = raw.len() as f64;

            let ingester = ElectionIngester::new(db);
            let summary = ingester
                .ingest(&parsed, file_name.as_deref(), file_size)
                .await?;
            ingester.print_summary(&summary);
        }
        Command::Audit { database, delete } => {
            let db = open_database(&database).await?;
            let findings = audit_elections(&db, delete).await?;
            if findings.is_empty() {
                println!("{}", "No incomplete elections found".bright_green());
            } else {
                for finding in &findings {
                    println!(
                        "{} id: {}, name: {}, num_votes: {}, voters: {}",
                        "incomplete election:".bright_yellow(),
                        finding.election_id,
                        finding.name,
                        finding.num_votes,
                        finding.num_voters
                    );
                }
                println!(
                    "{}: {}{}",
                    "Incomplete elections".bright_white().bold(),
                    findings.len().to_string().bright_yellow(),
                    if delete { " (deleted)" } else { "" }
                );
            }
        }
        Command::Purge { database, days } => {
            let db = open_database(&database).await?;
            let removed = purge_stale_elections(&db, days).await?;
            println!(
                "{}: {}",
                "Stale elections removed".bright_white().bold(),
                removed.len().to_string().bright_yellow()
            );
        }
        Command::Elections { database, filters } => {
            let db = open_database(&database).await?;
            let filters: ElectionFilters = serde_json::from_str(&filters)?;
            let list = election_list(&db, &filters).await?;
            print_envelope(&json!({
                "data": list.elections,
                "metadata": {"ballot_types": list.ballot_types},
            }))?;
        }
        Command::Details {
            database,
            properties,
            ballot_type,
            filters,
        } => {
            let db = open_database(&database).await?;
            let filters: ElectionFilters = serde_json::from_str(&filters)?;
            let properties = properties.as_deref().map(comma_list);
            let details = election_details(
                &db,
                properties.as_deref(),
                ballot_type.as_deref(),
                &filters,
            )
            .await?;
            print_envelope(&json!({
                "data": details.elections,
                "metadata": details.properties,
            }))?;
        }
        Command::Histogram {
            property,
            database,
            bins,
            log,
            by_ballot_type,
            filters,
        } => {
            let db = open_database(&database).await?;
            let filters: ElectionFilters = serde_json::from_str(&filters)?;
            let result =
                election_property_histogram(&db, &property, &filters, bins, by_ballot_type, log)
                    .await?;
            print_envelope(&json!({
                "data": result.histogram,
                "meta_data": {"election_property": result.election_property},
            }))?;
        }
        Command::Proportions {
            election_id,
            database,
            rules,
        } => {
            let db = open_database(&database).await?;
            let result = category_proportions(&db, election_id, &comma_list(&rules)).await?;
            print_envelope(&serde_json::to_value(&result)?)?;
        }
        Command::Averages {
            database,
            rules,
            props,
            include_incomplete,
            filters,
        } => {
            let db = open_database(&database).await?;
            let filters: ElectionFilters = serde_json::from_str(&filters)?;
            let result = average_rule_result_properties(
                &db,
                &comma_list(&rules),
                &comma_list(&props),
                &filters,
                include_incomplete,
            )
            .await?;
            print_envelope(&json!({
                "data": result.data,
                "meta_data": {"num_elections": result.num_elections},
            }))?;
        }
        Command::Satisfaction {
            database,
            rules,
            filters,
        } => {
            let db = open_database(&database).await?;
            let filters: ElectionFilters = serde_json::from_str(&filters)?;
            let result = satisfaction_histogram(&db, &comma_list(&rules), &filters).await?;
            print_envelope(&json!({
                "data": result.data,
                "meta_data": {"num_elections": result.num_elections},
            }))?;
        }
    }

    Ok(())
}

async fn open_database(path: &Path) -> Result<PbDatabase, Box<dyn std::error::Error>> {
    let url = format!("sqlite:{}", path.display());
    Ok(PbDatabase::new(&url).await?)
}

fn comma_list(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(|part| part.trim().to_string())
        .filter(|part| !part.is_empty())
        .collect()
}

fn print_envelope(value: &serde_json::Value) -> Result<(), Box<dyn std::error::Error>> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}
