use crate::database::{DatabaseError, NewElection, PbDatabase, Result};
/// Transactional ingestion of normalized election snapshots, plus the
/// consistency audit and the scratch-database purge job.
use crate::model::{BallotFormat, Gender};
use chrono::{Duration, NaiveDate, Utc};
use colored::*;
use itertools::Itertools;
use serde::Deserialize;
use std::collections::{BTreeMap, HashMap};
use std::time::Instant;

/// A fully parsed election file, as produced by the external ballot parser.
/// All referential structure is by election-scoped string identifiers.
#[derive(Debug, Clone, Deserialize)]
pub struct ElectionSnapshot {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub country: String,
    #[serde(default)]
    pub unit: String,
    #[serde(default)]
    pub subunit: String,
    #[serde(default)]
    pub instance: String,
    pub budget: f64,
    pub vote_type: String,
    #[serde(default)]
    pub rule: Option<String>,
    #[serde(default)]
    pub date_begin: Option<NaiveDate>,
    #[serde(default)]
    pub date_end: Option<NaiveDate>,
    #[serde(default)]
    pub language: String,
    #[serde(default)]
    pub edition: String,
    #[serde(default)]
    pub district: String,
    #[serde(default)]
    pub comment: String,
    /// Ballot-legality bounds and similar file-level numbers, keyed by
    /// election metadata short name. Unknown keys are logged and skipped.
    #[serde(default)]
    pub metadata: BTreeMap<String, f64>,
    pub projects: Vec<ProjectSnapshot>,
    pub voters: Vec<VoterSnapshot>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ProjectSnapshot {
    pub project_id: String,
    pub cost: f64,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub categories: Vec<String>,
    #[serde(default)]
    pub targets: Vec<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct VoterSnapshot {
    pub voter_id: String,
    #[serde(default)]
    pub age: Option<i64>,
    #[serde(default)]
    pub gender: Option<String>,
    #[serde(default)]
    pub voting_method: Option<String>,
    #[serde(default)]
    pub neighborhood: Option<String>,
    #[serde(default)]
    pub preferences: Vec<PreferenceSnapshot>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PreferenceSnapshot {
    pub project_id: String,
    /// Submitted score; derived when absent (approval: 1, ordinal: inverse
    /// rank of the preference within the ballot).
    #[serde(default)]
    pub preference_strength: Option<f64>,
}

#[derive(Debug)]
pub struct IngestSummary {
    pub election_id: i64,
    pub name: String,
    pub num_projects: i64,
    pub num_votes: i64,
    pub num_preferences: u64,
    pub duration_ms: u64,
}

#[derive(Debug)]
pub struct AuditFinding {
    pub election_id: i64,
    pub name: String,
    pub num_votes: i64,
    pub num_voters: i64,
}

pub struct ElectionIngester {
    db: PbDatabase,
}

impl ElectionIngester {
    pub fn new(db: PbDatabase) -> Self {
        Self { db }
    }

    /// Ingest one snapshot atomically. Re-ingesting a file (same `file_name`)
    /// replaces the previously stored election.
    pub async fn ingest(
        &self,
        snapshot: &ElectionSnapshot,
        file_name: Option<&str>,
        file_size: f64,
    ) -> Result<IngestSummary> {
        let start = Instant::now();

        let ballot_format = BallotFormat::from_alias(&snapshot.vote_type).ok_or_else(|| {
            DatabaseError::InvalidSnapshot(format!(
                "unknown vote type {:?}, expected one of: {}",
                snapshot.vote_type,
                BallotFormat::ALL.iter().map(|b| b.as_str()).join(", ")
            ))
        })?;
        let rule = match &snapshot.rule {
            Some(raw) => Some(self.resolve_rule(raw).await?),
            None => None,
        };

        if let Some(file_name) = file_name {
            if let Some(previous) = self.db.get_election_by_file_name(file_name).await? {
                log::info!(
                    "replacing previously ingested election {} ({})",
                    previous.name,
                    file_name
                );
                self.db.delete_election(previous.id).await?;
            }
        }

        let election = NewElection {
            name: self.election_name(snapshot)?,
            description: snapshot.description.clone(),
            country: snapshot.country.clone(),
            unit: snapshot.unit.clone(),
            subunit: snapshot.subunit.clone(),
            instance: snapshot.instance.clone(),
            budget: snapshot.budget,
            ballot_type: ballot_format.as_str().to_string(),
            rule,
            date_begin: snapshot.date_begin,
            date_end: snapshot.date_end,
            language: snapshot.language.clone(),
            edition: snapshot.edition.clone(),
            district: snapshot.district.clone(),
            comment: snapshot.comment.clone(),
            num_projects: snapshot.projects.len() as i64,
            num_votes: snapshot.voters.len() as i64,
            has_categories: snapshot.projects.iter().any(|p| !p.categories.is_empty()),
            has_targets: snapshot.projects.iter().any(|p| !p.targets.is_empty()),
            has_neighborhoods: snapshot.voters.iter().any(|v| v.neighborhood.is_some()),
            has_voting_methods: snapshot.voters.iter().any(|v| v.voting_method.is_some()),
            // trivial elections can afford every single project
            is_trivial: snapshot.projects.iter().map(|p| p.cost).sum::<f64>()
                <= snapshot.budget,
            modification_date: current_timestamp(),
            file_name: file_name.map(|f| f.to_string()),
            file_size,
        };

        let mut tx = self.db.pool().begin().await?;

        let election_id = super::insert_election_on(&mut tx, &election).await?;

        for (key, value) in &snapshot.metadata {
            let known: Option<i64> =
                sqlx::query_scalar("SELECT 1 FROM election_metadata WHERE short_name = ?")
                    .bind(key)
                    .fetch_optional(&mut *tx)
                    .await?;
            if known.is_some() {
                sqlx::query(
                    "INSERT INTO election_data_properties (election_id, metadata, value)
                     VALUES (?, ?, ?)",
                )
                .bind(election_id)
                .bind(key)
                .bind(value)
                .execute(&mut *tx)
                .await?;
            } else {
                log::warn!("ignoring unknown election metadata key {}", key);
            }
        }

        // Projects and their category/target memberships.
        let mut project_ids: HashMap<&str, i64> = HashMap::new();
        for project in &snapshot.projects {
            let project_row_id: i64 = sqlx::query_scalar(
                "INSERT INTO projects (election_id, project_id, cost, name, description)
                 VALUES (?, ?, ?, ?, ?) RETURNING id",
            )
            .bind(election_id)
            .bind(&project.project_id)
            .bind(project.cost)
            .bind(&project.name)
            .bind(&project.description)
            .fetch_one(&mut *tx)
            .await?;
            project_ids.insert(project.project_id.as_str(), project_row_id);

            for category in &project.categories {
                let category_id =
                    get_or_create_lookup(&mut tx, "categories", election_id, category).await?;
                sqlx::query(
                    "INSERT OR IGNORE INTO project_categories (project_id, category_id) VALUES (?, ?)",
                )
                .bind(project_row_id)
                .bind(category_id)
                .execute(&mut *tx)
                .await?;
            }
            for target in &project.targets {
                let target_id =
                    get_or_create_lookup(&mut tx, "targets", election_id, target).await?;
                sqlx::query(
                    "INSERT OR IGNORE INTO project_targets (project_id, target_id) VALUES (?, ?)",
                )
                .bind(project_row_id)
                .bind(target_id)
                .execute(&mut *tx)
                .await?;
            }
        }

        // Voters and their ballots.
        let mut num_preferences = 0u64;
        for voter in &snapshot.voters {
            let voting_method_id = match &voter.voting_method {
                Some(name) => {
                    Some(get_or_create_lookup(&mut tx, "voting_methods", election_id, name).await?)
                }
                None => None,
            };
            let neighborhood_id = match &voter.neighborhood {
                Some(name) => {
                    Some(get_or_create_lookup(&mut tx, "neighborhoods", election_id, name).await?)
                }
                None => None,
            };
            let gender = voter
                .gender
                .as_deref()
                .map(Gender::normalize)
                .unwrap_or(Gender::Unknown);

            let voter_row_id: i64 = sqlx::query_scalar(
                "INSERT INTO voters (election_id, voter_id, age, gender, voting_method_id, neighborhood_id)
                 VALUES (?, ?, ?, ?, ?, ?) RETURNING id",
            )
            .bind(election_id)
            .bind(&voter.voter_id)
            .bind(voter.age)
            .bind(gender.as_str())
            .bind(voting_method_id)
            .bind(neighborhood_id)
            .fetch_one(&mut *tx)
            .await?;

            let ballot_length = voter.preferences.len();
            for (position, preference) in voter.preferences.iter().enumerate() {
                let project_row_id = project_ids
                    .get(preference.project_id.as_str())
                    .copied()
                    .ok_or_else(|| {
                        DatabaseError::InvalidSnapshot(format!(
                            "voter {} references unknown project {}",
                            voter.voter_id, preference.project_id
                        ))
                    })?;

                let strength = match (preference.preference_strength, ballot_format) {
                    (_, BallotFormat::Approval) => 1.0,
                    (Some(strength), _) => strength,
                    // ordinal ballots list projects by decreasing preference
                    (None, BallotFormat::Ordinal) => (ballot_length - position) as f64,
                    (None, _) => {
                        return Err(DatabaseError::InvalidSnapshot(format!(
                            "voter {} gives no score for project {}",
                            voter.voter_id, preference.project_id
                        )))
                    }
                };

                sqlx::query(
                    "INSERT INTO preference_infos (voter_id, project_id, preference_strength)
                     VALUES (?, ?, ?)",
                )
                .bind(voter_row_id)
                .bind(project_row_id)
                .bind(strength)
                .execute(&mut *tx)
                .await?;
                num_preferences += 1;
            }
        }

        tx.commit().await?;

        let summary = IngestSummary {
            election_id,
            name: election.name,
            num_projects: election.num_projects,
            num_votes: election.num_votes,
            num_preferences,
            duration_ms: start.elapsed().as_millis() as u64,
        };
        log::info!(
            "ingested election {} ({} projects, {} votes) in {} ms",
            summary.name,
            summary.num_projects,
            summary.num_votes,
            summary.duration_ms
        );
        Ok(summary)
    }

    /// Election files may omit the name; fall back to "unit, subunit,
    /// district, YYYY-MM".
    fn election_name(&self, snapshot: &ElectionSnapshot) -> Result<String> {
        if let Some(name) = &snapshot.name {
            return Ok(name.clone());
        }
        if snapshot.unit.is_empty() {
            return Err(DatabaseError::InvalidSnapshot(
                "election has neither a name nor a unit".to_string(),
            ));
        }
        let mut name = snapshot.unit.clone();
        for part in [&snapshot.subunit, &snapshot.district].iter() {
            if !part.is_empty() {
                name.push_str(", ");
                name.push_str(part);
            }
        }
        if let Some(date) = snapshot.date_begin {
            name.push_str(", ");
            name.push_str(&date.format("%Y-%m").to_string());
        }
        Ok(name)
    }

    async fn resolve_rule(&self, raw: &str) -> Result<String> {
        let alias = raw.to_lowercase();
        let abbreviation = match alias.as_str() {
            "greedy" | "greedy_cost" => "greedy_cost".to_string(),
            _ => alias,
        };
        match self.db.get_rule(&abbreviation).await? {
            Some(rule) => Ok(rule.abbreviation),
            None => Err(DatabaseError::UnknownReference {
                kind: "rule",
                value: raw.to_string(),
            }),
        }
    }

    pub fn print_summary(&self, summary: &IngestSummary) {
        println!("\n{}", "Ingestion complete".bright_green().bold());
        println!("{}", "=".repeat(50).bright_green());
        println!(
            "{}: {}",
            "Election".bright_white().bold(),
            summary.name.bright_cyan()
        );
        println!(
            "{}: {}",
            "Projects".bright_white().bold(),
            summary.num_projects.to_string().bright_yellow()
        );
        println!(
            "{}: {}",
            "Votes".bright_white().bold(),
            summary.num_votes.to_string().bright_yellow()
        );
        println!(
            "{}: {}",
            "Preferences".bright_white().bold(),
            summary.num_preferences.to_string().bright_yellow()
        );
        println!(
            "{}: {} ms",
            "Duration".bright_white().bold(),
            summary.duration_ms.to_string().bright_yellow()
        );
        println!();
    }
}

/// Get-or-create a row in one of the election-scoped name lookup tables.
async fn get_or_create_lookup(
    tx: &mut sqlx::Transaction<'_, sqlx::Sqlite>,
    table: &str,
    election_id: i64,
    name: &str,
) -> Result<i64> {
    sqlx::query(&format!(
        "INSERT OR IGNORE INTO {} (election_id, name) VALUES (?, ?)",
        table
    ))
    .bind(election_id)
    .bind(name)
    .execute(&mut **tx)
    .await?;

    let id: i64 = sqlx::query_scalar(&format!(
        "SELECT id FROM {} WHERE election_id = ? AND name = ?",
        table
    ))
    .bind(election_id)
    .bind(name)
    .fetch_one(&mut **tx)
    .await?;

    Ok(id)
}

/// Find elections whose stored vote count disagrees with the owned voter
/// rows. These are leftovers of failed ingestion attempts.
pub async fn audit_elections(db: &PbDatabase, delete: bool) -> Result<Vec<AuditFinding>> {
    let rows: Vec<(i64, String, i64, i64)> = sqlx::query_as(
        "SELECT e.id, e.name, e.num_votes, COUNT(v.id)
         FROM elections e
         LEFT JOIN voters v ON v.election_id = e.id
         GROUP BY e.id
         HAVING e.num_votes != COUNT(v.id)
         ORDER BY e.id",
    )
    .fetch_all(db.pool())
    .await?;

    let mut findings = Vec::new();
    for (election_id, name, num_votes, num_voters) in rows {
        log::warn!(
            "incomplete election: id: {}, name: {}, num_votes: {}, number of voters: {}",
            election_id,
            name,
            num_votes,
            num_voters
        );
        if delete {
            log::info!("removing incomplete election {}", name);
            db.delete_election(election_id).await?;
        }
        findings.push(AuditFinding {
            election_id,
            name,
            num_votes,
            num_voters,
        });
    }
    Ok(findings)
}

/// Remove elections whose last modification is older than the retention
/// window. Intended for the user-submitted scratch database, where ad-hoc
/// uploads accumulate.
pub async fn purge_stale_elections(db: &PbDatabase, retention_days: i64) -> Result<Vec<String>> {
    let cutoff = (Utc::now() - Duration::days(retention_days))
        .format("%Y-%m-%d %H:%M:%S")
        .to_string();

    let stale: Vec<(i64, String)> =
        sqlx::query_as("SELECT id, name FROM elections WHERE modification_date <= ?")
            .bind(&cutoff)
            .fetch_all(db.pool())
            .await?;

    let mut removed = Vec::new();
    for (election_id, name) in stale {
        log::info!("removing user submitted election {}", name);
        db.delete_election(election_id).await?;
        removed.push(name);
    }
    Ok(removed)
}

pub fn current_timestamp() -> String {
    Utc::now().format("%Y-%m-%d %H:%M:%S").to_string()
}
