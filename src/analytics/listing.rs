use crate::analytics::filter::{filter_elections, ElectionFilters};
/// Reference-data listings and per-election detail queries backing the
/// presentation layer.
use crate::analytics::{AnalyticsError, AnalyticsResult};
use crate::database::{ElectionMetadataRow, ElectionRow, PbDatabase, RuleResultMetadataRow};
use crate::model::{election_field, ElectionField, InnerType, PropertyValue, ELECTION_FIELDS};
use chrono::NaiveDate;
use serde::Serialize;
use serde_json::Value;
use std::collections::{BTreeMap, BTreeSet};

/// Descriptor of a filterable election property: a public field or a
/// metadata catalog entry, flattened to one shape for the caller.
#[derive(Debug, Clone, Serialize)]
pub struct PropertyDescriptor {
    pub name: String,
    pub short_name: String,
    pub description: String,
    pub inner_type: String,
}

impl PropertyDescriptor {
    pub fn from_field(field: &ElectionField) -> Self {
        PropertyDescriptor {
            name: field.label.to_string(),
            short_name: field.name.to_string(),
            description: field.help.to_string(),
            inner_type: field.field_type.as_str().to_string(),
        }
    }

    pub fn from_election_metadata(row: &ElectionMetadataRow) -> Self {
        PropertyDescriptor {
            name: row.name.clone(),
            short_name: row.short_name.clone(),
            description: row.description.clone(),
            inner_type: row.inner_type.clone(),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct RuleResultPropertyDescriptor {
    pub name: String,
    pub short_name: String,
    pub description: String,
    pub inner_type: String,
    pub range: String,
}

impl From<RuleResultMetadataRow> for RuleResultPropertyDescriptor {
    fn from(row: RuleResultMetadataRow) -> Self {
        RuleResultPropertyDescriptor {
            name: row.name,
            short_name: row.short_name,
            description: row.description,
            inner_type: row.inner_type,
            range: row.range,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct BallotTypeDescriptor {
    pub name: String,
    pub description: String,
}

/// The public view of one election row.
#[derive(Debug, Clone, Serialize)]
pub struct ElectionSummary {
    pub id: i64,
    pub name: String,
    pub description: String,
    pub country: String,
    pub unit: String,
    pub subunit: String,
    pub budget: f64,
    pub num_projects: i64,
    pub num_votes: i64,
    pub ballot_type: String,
    pub rule: Option<String>,
    pub date_begin: Option<NaiveDate>,
    pub date_end: Option<NaiveDate>,
    pub has_categories: bool,
    pub has_targets: bool,
    pub has_neighborhoods: bool,
    pub has_voting_methods: bool,
}

impl From<&ElectionRow> for ElectionSummary {
    fn from(row: &ElectionRow) -> Self {
        ElectionSummary {
            id: row.id,
            name: row.name.clone(),
            description: row.description.clone(),
            country: row.country.clone(),
            unit: row.unit.clone(),
            subunit: row.subunit.clone(),
            budget: row.budget,
            num_projects: row.num_projects,
            num_votes: row.num_votes,
            ballot_type: row.ballot_type.clone(),
            rule: row.rule.clone(),
            date_begin: row.date_begin,
            date_end: row.date_end,
            has_categories: row.has_categories,
            has_targets: row.has_targets,
            has_neighborhoods: row.has_neighborhoods,
            has_voting_methods: row.has_voting_methods,
        }
    }
}

/// Ballot types that occur in at least one stored election, in priority
/// order.
pub async fn ballot_type_list(db: &PbDatabase) -> AnalyticsResult<Vec<BallotTypeDescriptor>> {
    let rows: Vec<(String, String)> = sqlx::query_as(
        "SELECT bt.name, bt.description
         FROM ballot_types bt
         WHERE EXISTS (SELECT 1 FROM elections e WHERE e.ballot_type = bt.name)
         ORDER BY bt.order_priority",
    )
    .fetch_all(db.pool())
    .await?;
    Ok(rows
        .into_iter()
        .map(|(name, description)| BallotTypeDescriptor { name, description })
        .collect())
}

#[derive(Debug, Serialize)]
pub struct ElectionList {
    pub elections: Vec<ElectionSummary>,
    /// Ballot types occurring among the filtered elections.
    pub ballot_types: Vec<BallotTypeDescriptor>,
}

pub async fn election_list(
    db: &PbDatabase,
    filters: &ElectionFilters,
) -> AnalyticsResult<ElectionList> {
    let elections = filter_elections(db, filters).await?;
    let occurring: BTreeSet<&str> = elections.iter().map(|e| e.ballot_type.as_str()).collect();
    let ballot_types = db
        .get_ballot_types()
        .await?
        .into_iter()
        .filter(|bt| occurring.contains(bt.name.as_str()))
        .map(|bt| BallotTypeDescriptor {
            name: bt.name,
            description: bt.description,
        })
        .collect();
    Ok(ElectionList {
        elections: elections.iter().map(ElectionSummary::from).collect(),
        ballot_types,
    })
}

/// Descriptors for the requested property short names (or all of them),
/// resolving public fields first and metadata catalog entries second.
/// Unknown names are skipped, as are metadata entries not applying to the
/// requested ballot type.
pub async fn filterable_election_property_list(
    db: &PbDatabase,
    property_short_names: Option<&[String]>,
    ballot_type: Option<&str>,
) -> AnalyticsResult<Vec<PropertyDescriptor>> {
    let mut properties = Vec::new();
    match property_short_names {
        Some(short_names) => {
            for short_name in short_names {
                if let Some(field) = election_field(short_name) {
                    properties.push(PropertyDescriptor::from_field(field));
                } else if let Some(metadata) = db.get_election_metadata(short_name).await? {
                    if applies_to(db, &metadata.short_name, ballot_type).await? {
                        properties.push(PropertyDescriptor::from_election_metadata(&metadata));
                    }
                }
            }
        }
        None => {
            for field in ELECTION_FIELDS {
                properties.push(PropertyDescriptor::from_field(field));
            }
            for metadata in db.list_election_metadata(ballot_type).await? {
                properties.push(PropertyDescriptor::from_election_metadata(&metadata));
            }
        }
    }
    Ok(properties)
}

async fn applies_to(
    db: &PbDatabase,
    metadata: &str,
    ballot_type: Option<&str>,
) -> AnalyticsResult<bool> {
    let ballot_type = match ballot_type {
        Some(ballot_type) => ballot_type,
        None => return Ok(true),
    };
    let count: i64 = sqlx::query_scalar(
        "SELECT COUNT(*) FROM election_metadata_applies_to WHERE metadata = ? AND ballot_type = ?",
    )
    .bind(metadata)
    .bind(ballot_type)
    .fetch_one(db.pool())
    .await?;
    Ok(count > 0)
}

#[derive(Debug, Serialize)]
pub struct ElectionDetails {
    /// election id -> property short name -> value.
    pub elections: BTreeMap<i64, BTreeMap<String, Value>>,
    pub properties: Vec<PropertyDescriptor>,
}

/// Per filtered election, the values of the requested properties: public
/// fields straight off the row, metadata properties parsed from the
/// attachment table per their declared inner type.
pub async fn election_details(
    db: &PbDatabase,
    property_short_names: Option<&[String]>,
    ballot_type: Option<&str>,
    filters: &ElectionFilters,
) -> AnalyticsResult<ElectionDetails> {
    let properties =
        filterable_election_property_list(db, property_short_names, ballot_type).await?;
    let elections = filter_elections(db, filters).await?;

    let metadata_names: Vec<&str> = properties
        .iter()
        .filter(|p| election_field(&p.short_name).is_none())
        .map(|p| p.short_name.as_str())
        .collect();
    let inner_types: BTreeMap<&str, InnerType> = properties
        .iter()
        .filter_map(|p| {
            InnerType::from_str(&p.inner_type).map(|inner| (p.short_name.as_str(), inner))
        })
        .collect();

    let mut details = BTreeMap::new();
    for election in &elections {
        let summary_fields = match serde_json::to_value(ElectionSummary::from(election))? {
            Value::Object(map) => map,
            _ => unreachable!("a summary always serializes to an object"),
        };

        let mut election_details = BTreeMap::new();
        for property in &properties {
            if let Some(value) = summary_fields.get(property.short_name.as_str()) {
                election_details.insert(property.short_name.clone(), value.clone());
            }
        }

        if !metadata_names.is_empty() {
            let attached: Vec<(String, f64)> = sqlx::query_as(
                "SELECT dp.metadata, dp.value FROM election_data_properties dp
                 WHERE dp.election_id = ?",
            )
            .bind(election.id)
            .fetch_all(db.pool())
            .await?;
            for (metadata, value) in attached {
                if !metadata_names.contains(&metadata.as_str()) {
                    continue;
                }
                let inner_type = inner_types
                    .get(metadata.as_str())
                    .copied()
                    .unwrap_or(InnerType::Float);
                let parsed = PropertyValue::from_float(value, inner_type);
                election_details.insert(metadata, serde_json::to_value(parsed)?);
            }
        }

        details.insert(election.id, election_details);
    }

    Ok(ElectionDetails {
        elections: details,
        properties,
    })
}

pub async fn rule_result_property_list(
    db: &PbDatabase,
    property_short_names: Option<&[String]>,
) -> AnalyticsResult<Vec<RuleResultPropertyDescriptor>> {
    let rows = db.list_rule_result_metadata().await?;
    let descriptors = rows
        .into_iter()
        .filter(|row| match property_short_names {
            Some(short_names) => short_names.iter().any(|name| name == &row.short_name),
            None => true,
        })
        .map(RuleResultPropertyDescriptor::from)
        .collect();
    Ok(descriptors)
}

#[derive(Debug, Serialize)]
pub struct RuleDescriptor {
    pub abbreviation: String,
    pub name: String,
    pub description: String,
    pub applies_to: Vec<String>,
}

#[derive(Debug, Serialize)]
pub struct RuleFamilyDescriptor {
    pub abbreviation: String,
    pub name: String,
    pub description: String,
    pub elements: Vec<RuleDescriptor>,
}

pub async fn rule_family_list(db: &PbDatabase) -> AnalyticsResult<Vec<RuleFamilyDescriptor>> {
    let mut families = Vec::new();
    for family in db.get_rule_families().await? {
        let mut elements = Vec::new();
        for rule in db.get_rules_for_family(&family.abbreviation).await? {
            let applies_to: Vec<String> = sqlx::query_scalar(
                "SELECT a.ballot_type FROM rule_applies_to a
                 JOIN ballot_types bt ON bt.name = a.ballot_type
                 WHERE a.rule = ?
                 ORDER BY bt.order_priority",
            )
            .bind(&rule.abbreviation)
            .fetch_all(db.pool())
            .await?;
            elements.push(RuleDescriptor {
                abbreviation: rule.abbreviation,
                name: rule.name,
                description: rule.description,
                applies_to,
            });
        }
        families.push(RuleFamilyDescriptor {
            abbreviation: family.abbreviation,
            name: family.name,
            description: family.description,
            elements,
        });
    }
    Ok(families)
}

#[derive(Debug, Serialize)]
pub struct ProjectDescriptor {
    pub project_id: String,
    pub cost: f64,
    pub name: String,
    pub description: String,
    pub categories: Vec<String>,
    pub targets: Vec<String>,
}

#[derive(Debug, Serialize)]
pub struct ProjectList {
    pub projects: Vec<ProjectDescriptor>,
    /// Rules for which a stored result exists on this election.
    pub rules_with_results: Vec<String>,
}

pub async fn project_list(db: &PbDatabase, election_id: i64) -> AnalyticsResult<ProjectList> {
    if db.get_election(election_id).await?.is_none() {
        return Err(AnalyticsError::ElectionNotFound { id: election_id });
    }

    let mut projects = Vec::new();
    for project in db.get_projects_for_election(election_id).await? {
        let categories: Vec<String> = sqlx::query_scalar(
            "SELECT c.name FROM project_categories pc
             JOIN categories c ON c.id = pc.category_id
             WHERE pc.project_id = ? ORDER BY c.name",
        )
        .bind(project.id)
        .fetch_all(db.pool())
        .await?;
        let targets: Vec<String> = sqlx::query_scalar(
            "SELECT t.name FROM project_targets pt
             JOIN targets t ON t.id = pt.target_id
             WHERE pt.project_id = ? ORDER BY t.name",
        )
        .bind(project.id)
        .fetch_all(db.pool())
        .await?;
        projects.push(ProjectDescriptor {
            project_id: project.project_id,
            cost: project.cost,
            name: project.name,
            description: project.description,
            categories,
            targets,
        });
    }

    let rules_with_results: Vec<String> = sqlx::query_scalar(
        "SELECT rr.rule FROM rule_results rr
         JOIN rules r ON r.abbreviation = rr.rule
         WHERE rr.election_id = ?
         ORDER BY r.order_priority, r.name",
    )
    .bind(election_id)
    .fetch_all(db.pool())
    .await?;

    Ok(ProjectList {
        projects,
        rules_with_results,
    })
}
