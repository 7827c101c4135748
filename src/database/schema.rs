use crate::database::{DatabaseError, Result};
/// Database schema definitions and migration helpers
use sqlx::SqlitePool;

pub async fn create_schema(pool: &SqlitePool) -> Result<()> {
    // Global reference data: ballot types, rule catalog, metadata catalogs.
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS ballot_types (
            name TEXT PRIMARY KEY,
            description TEXT NOT NULL,
            order_priority INTEGER NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS rule_families (
            abbreviation TEXT PRIMARY KEY,
            name TEXT UNIQUE NOT NULL,
            description TEXT NOT NULL DEFAULT '',
            order_priority INTEGER NOT NULL DEFAULT 100
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS rules (
            abbreviation TEXT PRIMARY KEY,
            name TEXT NOT NULL,
            description TEXT NOT NULL DEFAULT '',
            rule_family TEXT,
            order_priority INTEGER NOT NULL DEFAULT 100,
            FOREIGN KEY (rule_family) REFERENCES rule_families(abbreviation)
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS rule_applies_to (
            rule TEXT NOT NULL,
            ballot_type TEXT NOT NULL,
            PRIMARY KEY (rule, ballot_type),
            FOREIGN KEY (rule) REFERENCES rules(abbreviation),
            FOREIGN KEY (ballot_type) REFERENCES ballot_types(name)
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS election_metadata (
            short_name TEXT PRIMARY KEY,
            name TEXT UNIQUE NOT NULL,
            description TEXT NOT NULL,
            inner_type TEXT NOT NULL,
            order_priority INTEGER NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS election_metadata_applies_to (
            metadata TEXT NOT NULL,
            ballot_type TEXT NOT NULL,
            PRIMARY KEY (metadata, ballot_type),
            FOREIGN KEY (metadata) REFERENCES election_metadata(short_name),
            FOREIGN KEY (ballot_type) REFERENCES ballot_types(name)
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS rule_result_metadata (
            short_name TEXT PRIMARY KEY,
            name TEXT NOT NULL,
            description TEXT NOT NULL,
            inner_type TEXT NOT NULL,
            range TEXT NOT NULL DEFAULT '',
            order_priority INTEGER NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS rule_result_metadata_applies_to (
            metadata TEXT NOT NULL,
            ballot_type TEXT NOT NULL,
            PRIMARY KEY (metadata, ballot_type),
            FOREIGN KEY (metadata) REFERENCES rule_result_metadata(short_name),
            FOREIGN KEY (ballot_type) REFERENCES ballot_types(name)
        )
        "#,
    )
    .execute(pool)
    .await?;

    // Election-owned data.
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS elections (
            id INTEGER PRIMARY KEY,
            name TEXT NOT NULL,
            description TEXT NOT NULL DEFAULT '',
            country TEXT NOT NULL DEFAULT '',
            unit TEXT NOT NULL DEFAULT '',
            subunit TEXT NOT NULL DEFAULT '',
            instance TEXT NOT NULL DEFAULT '',
            budget REAL NOT NULL,
            ballot_type TEXT NOT NULL,
            rule TEXT,
            date_begin DATE,
            date_end DATE,
            language TEXT NOT NULL DEFAULT '',
            edition TEXT NOT NULL DEFAULT '',
            district TEXT NOT NULL DEFAULT '',
            comment TEXT NOT NULL DEFAULT '',
            num_projects INTEGER NOT NULL DEFAULT 0,
            num_votes INTEGER NOT NULL DEFAULT 0,
            has_categories BOOLEAN NOT NULL DEFAULT FALSE,
            has_targets BOOLEAN NOT NULL DEFAULT FALSE,
            has_neighborhoods BOOLEAN NOT NULL DEFAULT FALSE,
            has_voting_methods BOOLEAN NOT NULL DEFAULT FALSE,
            is_trivial BOOLEAN NOT NULL DEFAULT FALSE,
            modification_date TIMESTAMP NOT NULL DEFAULT CURRENT_TIMESTAMP,
            file_name TEXT UNIQUE,
            file_size REAL NOT NULL DEFAULT 0,
            FOREIGN KEY (ballot_type) REFERENCES ballot_types(name),
            FOREIGN KEY (rule) REFERENCES rules(abbreviation)
        )
        "#,
    )
    .execute(pool)
    .await?;

    // Election-scoped name lookups share one shape.
    for table in &["categories", "targets", "neighborhoods", "voting_methods"] {
        sqlx::query(&format!(
            r#"
            CREATE TABLE IF NOT EXISTS {} (
                id INTEGER PRIMARY KEY,
                election_id INTEGER NOT NULL,
                name TEXT NOT NULL,
                FOREIGN KEY (election_id) REFERENCES elections(id),
                UNIQUE(election_id, name)
            )
            "#,
            table
        ))
        .execute(pool)
        .await?;
    }

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS projects (
            id INTEGER PRIMARY KEY,
            election_id INTEGER NOT NULL,
            project_id TEXT NOT NULL,
            cost REAL NOT NULL,
            name TEXT NOT NULL DEFAULT '',
            description TEXT NOT NULL DEFAULT '',
            FOREIGN KEY (election_id) REFERENCES elections(id),
            UNIQUE(election_id, project_id)
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS project_categories (
            project_id INTEGER NOT NULL,
            category_id INTEGER NOT NULL,
            PRIMARY KEY (project_id, category_id),
            FOREIGN KEY (project_id) REFERENCES projects(id),
            FOREIGN KEY (category_id) REFERENCES categories(id)
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS project_targets (
            project_id INTEGER NOT NULL,
            target_id INTEGER NOT NULL,
            PRIMARY KEY (project_id, target_id),
            FOREIGN KEY (project_id) REFERENCES projects(id),
            FOREIGN KEY (target_id) REFERENCES targets(id)
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS voters (
            id INTEGER PRIMARY KEY,
            election_id INTEGER NOT NULL,
            voter_id TEXT NOT NULL,
            age INTEGER,
            gender TEXT NOT NULL DEFAULT 'Unknown',
            voting_method_id INTEGER,
            neighborhood_id INTEGER,
            FOREIGN KEY (election_id) REFERENCES elections(id),
            FOREIGN KEY (voting_method_id) REFERENCES voting_methods(id),
            FOREIGN KEY (neighborhood_id) REFERENCES neighborhoods(id),
            UNIQUE(election_id, voter_id)
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS preference_infos (
            id INTEGER PRIMARY KEY,
            voter_id INTEGER NOT NULL,
            project_id INTEGER NOT NULL,
            preference_strength REAL NOT NULL DEFAULT 1,
            FOREIGN KEY (voter_id) REFERENCES voters(id),
            FOREIGN KEY (project_id) REFERENCES projects(id),
            UNIQUE(voter_id, project_id)
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS rule_results (
            id INTEGER PRIMARY KEY,
            election_id INTEGER NOT NULL,
            rule TEXT NOT NULL,
            FOREIGN KEY (election_id) REFERENCES elections(id),
            FOREIGN KEY (rule) REFERENCES rules(abbreviation),
            UNIQUE(election_id, rule)
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS rule_result_selected (
            rule_result_id INTEGER NOT NULL,
            project_id INTEGER NOT NULL,
            PRIMARY KEY (rule_result_id, project_id),
            FOREIGN KEY (rule_result_id) REFERENCES rule_results(id),
            FOREIGN KEY (project_id) REFERENCES projects(id)
        )
        "#,
    )
    .execute(pool)
    .await?;

    // Generic key-value property attachments; the catalog declares the type.
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS election_data_properties (
            id INTEGER PRIMARY KEY,
            election_id INTEGER NOT NULL,
            metadata TEXT NOT NULL,
            value REAL NOT NULL,
            FOREIGN KEY (election_id) REFERENCES elections(id),
            FOREIGN KEY (metadata) REFERENCES election_metadata(short_name),
            UNIQUE(election_id, metadata)
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS rule_result_data_properties (
            id INTEGER PRIMARY KEY,
            rule_result_id INTEGER NOT NULL,
            metadata TEXT NOT NULL,
            value TEXT NOT NULL,
            FOREIGN KEY (rule_result_id) REFERENCES rule_results(id),
            FOREIGN KEY (metadata) REFERENCES rule_result_metadata(short_name),
            UNIQUE(rule_result_id, metadata)
        )
        "#,
    )
    .execute(pool)
    .await?;

    // Create indexes for performance
    create_indexes(pool).await?;

    Ok(())
}

async fn create_indexes(pool: &SqlitePool) -> Result<()> {
    let indexes = vec![
        "CREATE INDEX IF NOT EXISTS idx_elections_ballot_type ON elections(ballot_type)",
        "CREATE INDEX IF NOT EXISTS idx_elections_modification ON elections(modification_date)",
        "CREATE INDEX IF NOT EXISTS idx_categories_election ON categories(election_id)",
        "CREATE INDEX IF NOT EXISTS idx_projects_election ON projects(election_id)",
        "CREATE INDEX IF NOT EXISTS idx_project_categories_category ON project_categories(category_id)",
        "CREATE INDEX IF NOT EXISTS idx_voters_election ON voters(election_id)",
        "CREATE INDEX IF NOT EXISTS idx_preference_infos_voter ON preference_infos(voter_id)",
        "CREATE INDEX IF NOT EXISTS idx_preference_infos_project ON preference_infos(project_id)",
        "CREATE INDEX IF NOT EXISTS idx_rule_results_election ON rule_results(election_id)",
        "CREATE INDEX IF NOT EXISTS idx_election_props_metadata ON election_data_properties(metadata)",
        "CREATE INDEX IF NOT EXISTS idx_rule_result_props_metadata ON rule_result_data_properties(metadata)",
    ];

    for index_sql in indexes {
        sqlx::query(index_sql).execute(pool).await?;
    }

    Ok(())
}

/// Verify database schema integrity
pub async fn verify_schema(pool: &SqlitePool) -> Result<()> {
    // Check that all expected tables exist
    let tables: Vec<String> =
        sqlx::query_scalar("SELECT name FROM sqlite_master WHERE type='table' ORDER BY name")
            .fetch_all(pool)
            .await?;

    let expected_tables = vec![
        "ballot_types",
        "categories",
        "election_data_properties",
        "election_metadata",
        "election_metadata_applies_to",
        "elections",
        "neighborhoods",
        "preference_infos",
        "project_categories",
        "project_targets",
        "projects",
        "rule_applies_to",
        "rule_families",
        "rule_result_data_properties",
        "rule_result_metadata",
        "rule_result_metadata_applies_to",
        "rule_result_selected",
        "rule_results",
        "rules",
        "targets",
        "voters",
        "voting_methods",
    ];

    for expected in &expected_tables {
        if !tables.iter().any(|name| name == expected) {
            return Err(DatabaseError::Integrity(format!(
                "Missing table: {}",
                expected
            )));
        }
    }

    Ok(())
}
