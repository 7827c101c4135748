pub mod ingestion;
pub mod schema;
pub mod seed;

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::SqlitePool;
use std::str::FromStr;

#[derive(Debug, thiserror::Error)]
pub enum DatabaseError {
    #[error("SQLite error: {0}")]
    Sqlx(#[from] sqlx::Error),
    #[error("Migration error: {0}")]
    Migration(String),
    #[error("Data integrity error: {0}")]
    Integrity(String),
    #[error("Invalid election snapshot: {0}")]
    InvalidSnapshot(String),
    #[error("Unknown {kind}: {value}")]
    UnknownReference { kind: &'static str, value: String },
}

pub type Result<T> = std::result::Result<T, DatabaseError>;

/// Pooled handle to one election database (the main archive or the
/// user-submitted scratch database).
#[derive(Clone)]
pub struct PbDatabase {
    pool: SqlitePool,
}

impl PbDatabase {
    pub async fn new(database_url: &str) -> Result<Self> {
        let options = SqliteConnectOptions::from_str(database_url)?.create_if_missing(true);
        // every pooled connection to :memory: would open its own database
        let max_connections = if database_url.contains(":memory:") { 1 } else { 8 };
        let pool = SqlitePoolOptions::new()
            .max_connections(max_connections)
            .connect_with(options)
            .await?;
        Ok(Self { pool })
    }

    /// Fresh in-memory database with schema and reference data, for tests.
    pub async fn create_in_memory() -> Result<Self> {
        let db = Self::new("sqlite::memory:").await?;
        schema::create_schema(db.pool()).await?;
        seed::initialize_reference_data(db.pool()).await?;
        Ok(db)
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    pub async fn get_election(&self, election_id: i64) -> Result<Option<ElectionRow>> {
        let election = sqlx::query_as::<_, ElectionRow>("SELECT * FROM elections WHERE id = ?")
            .bind(election_id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(election)
    }

    pub async fn get_election_by_file_name(&self, file_name: &str) -> Result<Option<ElectionRow>> {
        let election =
            sqlx::query_as::<_, ElectionRow>("SELECT * FROM elections WHERE file_name = ?")
                .bind(file_name)
                .fetch_optional(&self.pool)
                .await?;
        Ok(election)
    }

    /// All ballot types, in presentation order.
    pub async fn get_ballot_types(&self) -> Result<Vec<BallotTypeRow>> {
        let rows = sqlx::query_as::<_, BallotTypeRow>(
            "SELECT name, description, order_priority FROM ballot_types ORDER BY order_priority",
        )
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }

    pub async fn get_rule(&self, abbreviation: &str) -> Result<Option<RuleRow>> {
        let rule = sqlx::query_as::<_, RuleRow>(
            "SELECT abbreviation, name, description, rule_family, order_priority
             FROM rules WHERE abbreviation = ?",
        )
        .bind(abbreviation)
        .fetch_optional(&self.pool)
        .await?;
        Ok(rule)
    }

    pub async fn get_rule_families(&self) -> Result<Vec<RuleFamilyRow>> {
        let rows = sqlx::query_as::<_, RuleFamilyRow>(
            "SELECT abbreviation, name, description, order_priority
             FROM rule_families ORDER BY order_priority, name",
        )
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }

    pub async fn get_rules_for_family(&self, family: &str) -> Result<Vec<RuleRow>> {
        let rows = sqlx::query_as::<_, RuleRow>(
            "SELECT abbreviation, name, description, rule_family, order_priority
             FROM rules WHERE rule_family = ? ORDER BY order_priority, name",
        )
        .bind(family)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }

    pub async fn rule_applies_to(&self, rule: &str, ballot_type: &str) -> Result<bool> {
        let count: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM rule_applies_to WHERE rule = ? AND ballot_type = ?",
        )
        .bind(rule)
        .bind(ballot_type)
        .fetch_one(&self.pool)
        .await?;
        Ok(count > 0)
    }

    pub async fn get_election_metadata(
        &self,
        short_name: &str,
    ) -> Result<Option<ElectionMetadataRow>> {
        let row = sqlx::query_as::<_, ElectionMetadataRow>(
            "SELECT short_name, name, description, inner_type, order_priority
             FROM election_metadata WHERE short_name = ?",
        )
        .bind(short_name)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row)
    }

    /// Election metadata catalog, optionally restricted to entries applying to
    /// one ballot type, in presentation order.
    pub async fn list_election_metadata(
        &self,
        ballot_type: Option<&str>,
    ) -> Result<Vec<ElectionMetadataRow>> {
        let rows = match ballot_type {
            Some(bt) => {
                sqlx::query_as::<_, ElectionMetadataRow>(
                    "SELECT m.short_name, m.name, m.description, m.inner_type, m.order_priority
                     FROM election_metadata m
                     JOIN election_metadata_applies_to a ON a.metadata = m.short_name
                     WHERE a.ballot_type = ?
                     ORDER BY m.order_priority, m.name",
                )
                .bind(bt)
                .fetch_all(&self.pool)
                .await?
            }
            None => {
                sqlx::query_as::<_, ElectionMetadataRow>(
                    "SELECT short_name, name, description, inner_type, order_priority
                     FROM election_metadata ORDER BY order_priority, name",
                )
                .fetch_all(&self.pool)
                .await?
            }
        };
        Ok(rows)
    }

    pub async fn get_rule_result_metadata(
        &self,
        short_name: &str,
    ) -> Result<Option<RuleResultMetadataRow>> {
        let row = sqlx::query_as::<_, RuleResultMetadataRow>(
            "SELECT short_name, name, description, inner_type, range, order_priority
             FROM rule_result_metadata WHERE short_name = ?",
        )
        .bind(short_name)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row)
    }

    pub async fn list_rule_result_metadata(&self) -> Result<Vec<RuleResultMetadataRow>> {
        let rows = sqlx::query_as::<_, RuleResultMetadataRow>(
            "SELECT short_name, name, description, inner_type, range, order_priority
             FROM rule_result_metadata ORDER BY order_priority, name",
        )
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }

    pub async fn get_categories_for_election(&self, election_id: i64) -> Result<Vec<CategoryRow>> {
        let rows = sqlx::query_as::<_, CategoryRow>(
            "SELECT id, election_id, name FROM categories WHERE election_id = ? ORDER BY name",
        )
        .bind(election_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }

    pub async fn get_projects_for_election(&self, election_id: i64) -> Result<Vec<ProjectRow>> {
        let rows = sqlx::query_as::<_, ProjectRow>(
            "SELECT id, election_id, project_id, cost, name, description
             FROM projects WHERE election_id = ? ORDER BY project_id",
        )
        .bind(election_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }

    pub async fn count_voters(&self, election_id: i64) -> Result<i64> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM voters WHERE election_id = ?")
            .bind(election_id)
            .fetch_one(&self.pool)
            .await?;
        Ok(count)
    }

    pub async fn insert_election(&self, election: &NewElection) -> Result<i64> {
        let mut tx = self.pool.begin().await?;
        let id = insert_election_on(&mut tx, election).await?;
        tx.commit().await?;
        Ok(id)
    }

    pub async fn insert_category(&self, election_id: i64, name: &str) -> Result<i64> {
        let id: i64 = sqlx::query_scalar(
            "INSERT INTO categories (election_id, name) VALUES (?, ?) RETURNING id",
        )
        .bind(election_id)
        .bind(name)
        .fetch_one(&self.pool)
        .await?;
        Ok(id)
    }

    pub async fn insert_project(
        &self,
        election_id: i64,
        project_id: &str,
        cost: f64,
        name: &str,
    ) -> Result<i64> {
        let id: i64 = sqlx::query_scalar(
            "INSERT INTO projects (election_id, project_id, cost, name, description)
             VALUES (?, ?, ?, ?, '') RETURNING id",
        )
        .bind(election_id)
        .bind(project_id)
        .bind(cost)
        .bind(name)
        .fetch_one(&self.pool)
        .await?;
        Ok(id)
    }

    pub async fn link_project_category(&self, project_id: i64, category_id: i64) -> Result<()> {
        sqlx::query(
            "INSERT OR IGNORE INTO project_categories (project_id, category_id) VALUES (?, ?)",
        )
        .bind(project_id)
        .bind(category_id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn insert_voter(&self, election_id: i64, voter_id: &str) -> Result<i64> {
        let id: i64 = sqlx::query_scalar(
            "INSERT INTO voters (election_id, voter_id, gender) VALUES (?, ?, 'Unknown')
             RETURNING id",
        )
        .bind(election_id)
        .bind(voter_id)
        .fetch_one(&self.pool)
        .await?;
        Ok(id)
    }

    pub async fn insert_preference(
        &self,
        voter_id: i64,
        project_id: i64,
        preference_strength: f64,
    ) -> Result<()> {
        sqlx::query(
            "INSERT INTO preference_infos (voter_id, project_id, preference_strength)
             VALUES (?, ?, ?)",
        )
        .bind(voter_id)
        .bind(project_id)
        .bind(preference_strength)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn insert_rule_result(&self, election_id: i64, rule: &str) -> Result<i64> {
        let id: i64 = sqlx::query_scalar(
            "INSERT INTO rule_results (election_id, rule) VALUES (?, ?)
             ON CONFLICT(election_id, rule) DO UPDATE SET rule = excluded.rule
             RETURNING id",
        )
        .bind(election_id)
        .bind(rule)
        .fetch_one(&self.pool)
        .await?;
        Ok(id)
    }

    pub async fn add_selected_project(&self, rule_result_id: i64, project_id: i64) -> Result<()> {
        sqlx::query(
            "INSERT OR IGNORE INTO rule_result_selected (rule_result_id, project_id) VALUES (?, ?)",
        )
        .bind(rule_result_id)
        .bind(project_id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn clear_selected_projects(&self, rule_result_id: i64) -> Result<()> {
        sqlx::query("DELETE FROM rule_result_selected WHERE rule_result_id = ?")
            .bind(rule_result_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    /// Attach or replace an election data property (at most one value per
    /// (election, metadata) pair).
    pub async fn set_election_data_property(
        &self,
        election_id: i64,
        metadata: &str,
        value: f64,
    ) -> Result<()> {
        sqlx::query(
            "INSERT INTO election_data_properties (election_id, metadata, value)
             VALUES (?, ?, ?)
             ON CONFLICT(election_id, metadata) DO UPDATE SET value = excluded.value",
        )
        .bind(election_id)
        .bind(metadata)
        .bind(value)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Attach or replace a rule result data property; `value` is the scalar or
    /// JSON-encoded list rendering.
    pub async fn set_rule_result_data_property(
        &self,
        rule_result_id: i64,
        metadata: &str,
        value: &str,
    ) -> Result<()> {
        sqlx::query(
            "INSERT INTO rule_result_data_properties (rule_result_id, metadata, value)
             VALUES (?, ?, ?)
             ON CONFLICT(rule_result_id, metadata) DO UPDATE SET value = excluded.value",
        )
        .bind(rule_result_id)
        .bind(metadata)
        .bind(value)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Delete an election and everything it owns. The cascade is explicit so
    /// it works regardless of the connection's foreign_keys pragma.
    pub async fn delete_election(&self, election_id: i64) -> Result<()> {
        let mut tx = self.pool.begin().await?;

        let owned_deletes = [
            "DELETE FROM preference_infos WHERE voter_id IN
                (SELECT id FROM voters WHERE election_id = ?)",
            "DELETE FROM project_categories WHERE project_id IN
                (SELECT id FROM projects WHERE election_id = ?)",
            "DELETE FROM project_targets WHERE project_id IN
                (SELECT id FROM projects WHERE election_id = ?)",
            "DELETE FROM rule_result_selected WHERE rule_result_id IN
                (SELECT id FROM rule_results WHERE election_id = ?)",
            "DELETE FROM rule_result_data_properties WHERE rule_result_id IN
                (SELECT id FROM rule_results WHERE election_id = ?)",
            "DELETE FROM election_data_properties WHERE election_id = ?",
            "DELETE FROM rule_results WHERE election_id = ?",
            "DELETE FROM voters WHERE election_id = ?",
            "DELETE FROM projects WHERE election_id = ?",
            "DELETE FROM categories WHERE election_id = ?",
            "DELETE FROM targets WHERE election_id = ?",
            "DELETE FROM neighborhoods WHERE election_id = ?",
            "DELETE FROM voting_methods WHERE election_id = ?",
            "DELETE FROM elections WHERE id = ?",
        ];
        for statement in owned_deletes.iter() {
            sqlx::query(statement)
                .bind(election_id)
                .execute(&mut *tx)
                .await?;
        }

        tx.commit().await?;
        Ok(())
    }
}

pub(crate) async fn insert_election_on(
    tx: &mut sqlx::Transaction<'_, sqlx::Sqlite>,
    election: &NewElection,
) -> Result<i64> {
    let id: i64 = sqlx::query_scalar(
        "INSERT INTO elections (
            name, description, country, unit, subunit, instance, budget,
            ballot_type, rule, date_begin, date_end, language, edition,
            district, comment, num_projects, num_votes, has_categories,
            has_targets, has_neighborhoods, has_voting_methods, is_trivial,
            modification_date, file_name, file_size)
         VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
         RETURNING id",
    )
    .bind(&election.name)
    .bind(&election.description)
    .bind(&election.country)
    .bind(&election.unit)
    .bind(&election.subunit)
    .bind(&election.instance)
    .bind(election.budget)
    .bind(&election.ballot_type)
    .bind(&election.rule)
    .bind(election.date_begin)
    .bind(election.date_end)
    .bind(&election.language)
    .bind(&election.edition)
    .bind(&election.district)
    .bind(&election.comment)
    .bind(election.num_projects)
    .bind(election.num_votes)
    .bind(election.has_categories)
    .bind(election.has_targets)
    .bind(election.has_neighborhoods)
    .bind(election.has_voting_methods)
    .bind(election.is_trivial)
    .bind(&election.modification_date)
    .bind(&election.file_name)
    .bind(election.file_size)
    .fetch_one(&mut **tx)
    .await?;
    Ok(id)
}

#[derive(Debug, Clone, sqlx::FromRow, Serialize)]
pub struct ElectionRow {
    pub id: i64,
    pub name: String,
    pub description: String,
    pub country: String,
    pub unit: String,
    pub subunit: String,
    pub instance: String,
    pub budget: f64,
    pub ballot_type: String,
    pub rule: Option<String>,
    pub date_begin: Option<NaiveDate>,
    pub date_end: Option<NaiveDate>,
    pub language: String,
    pub edition: String,
    pub district: String,
    pub comment: String,
    pub num_projects: i64,
    pub num_votes: i64,
    pub has_categories: bool,
    pub has_targets: bool,
    pub has_neighborhoods: bool,
    pub has_voting_methods: bool,
    pub is_trivial: bool,
    pub modification_date: String,
    pub file_name: Option<String>,
    pub file_size: f64,
}

/// Insert payload for a new election row.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewElection {
    pub name: String,
    pub description: String,
    pub country: String,
    pub unit: String,
    pub subunit: String,
    pub instance: String,
    pub budget: f64,
    pub ballot_type: String,
    pub rule: Option<String>,
    pub date_begin: Option<NaiveDate>,
    pub date_end: Option<NaiveDate>,
    pub language: String,
    pub edition: String,
    pub district: String,
    pub comment: String,
    pub num_projects: i64,
    pub num_votes: i64,
    pub has_categories: bool,
    pub has_targets: bool,
    pub has_neighborhoods: bool,
    pub has_voting_methods: bool,
    pub is_trivial: bool,
    pub modification_date: String,
    pub file_name: Option<String>,
    pub file_size: f64,
}

impl Default for NewElection {
    fn default() -> Self {
        NewElection {
            name: String::new(),
            description: String::new(),
            country: String::new(),
            unit: String::new(),
            subunit: String::new(),
            instance: String::new(),
            budget: 0.0,
            ballot_type: "approval".to_string(),
            rule: None,
            date_begin: None,
            date_end: None,
            language: String::new(),
            edition: String::new(),
            district: String::new(),
            comment: String::new(),
            num_projects: 0,
            num_votes: 0,
            has_categories: false,
            has_targets: false,
            has_neighborhoods: false,
            has_voting_methods: false,
            is_trivial: false,
            modification_date: ingestion::current_timestamp(),
            file_name: None,
            file_size: 0.0,
        }
    }
}

#[derive(Debug, Clone, sqlx::FromRow, Serialize)]
pub struct BallotTypeRow {
    pub name: String,
    pub description: String,
    pub order_priority: i64,
}

#[derive(Debug, Clone, sqlx::FromRow, Serialize)]
pub struct RuleFamilyRow {
    pub abbreviation: String,
    pub name: String,
    pub description: String,
    pub order_priority: i64,
}

#[derive(Debug, Clone, sqlx::FromRow, Serialize)]
pub struct RuleRow {
    pub abbreviation: String,
    pub name: String,
    pub description: String,
    pub rule_family: Option<String>,
    pub order_priority: i64,
}

#[derive(Debug, Clone, sqlx::FromRow, Serialize)]
pub struct ElectionMetadataRow {
    pub short_name: String,
    pub name: String,
    pub description: String,
    pub inner_type: String,
    pub order_priority: i64,
}

#[derive(Debug, Clone, sqlx::FromRow, Serialize)]
pub struct RuleResultMetadataRow {
    pub short_name: String,
    pub name: String,
    pub description: String,
    pub inner_type: String,
    pub range: String,
    pub order_priority: i64,
}

#[derive(Debug, Clone, sqlx::FromRow, Serialize)]
pub struct CategoryRow {
    pub id: i64,
    pub election_id: i64,
    pub name: String,
}

#[derive(Debug, Clone, sqlx::FromRow, Serialize)]
pub struct ProjectRow {
    pub id: i64,
    pub election_id: i64,
    pub project_id: String,
    pub cost: f64,
    pub name: String,
    pub description: String,
}
