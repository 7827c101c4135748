use crate::analytics::{AnalyticsError, AnalyticsResult};
/// Dynamic election filtering: a declarative `field -> constraint` map is
/// resolved against the static field registry and the metadata catalog, then
/// rendered into one SQL WHERE conjunction.
use crate::database::{ElectionRow, PbDatabase};
use crate::model::{election_field, FieldType};
use chrono::NaiveDate;
use serde::Deserialize;
use serde_json::Value;
use sqlx::{QueryBuilder, Sqlite};
use std::collections::BTreeMap;

/// Declarative filter specification, as received from the query boundary.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(transparent)]
pub struct ElectionFilters(pub BTreeMap<String, Value>);

impl ElectionFilters {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Type-check every constraint and fix the dispatch, in priority order:
    /// special keys, public election fields, then registered metadata short
    /// names. Unknown names fail here, before any query runs.
    pub async fn resolve(&self, db: &PbDatabase) -> AnalyticsResult<ResolvedFilters> {
        let mut clauses = Vec::new();

        for (property, constraint) in &self.0 {
            // a null constraint is always a no-op
            if constraint.is_null() {
                continue;
            }

            if property == "id_list" {
                clauses.push(Clause::IdIn {
                    ids: id_list(property, constraint)?,
                });
            } else if property == "ballot_types" {
                clauses.push(Clause::RefIn {
                    column: "ballot_type",
                    ids: reference_list(property, constraint)?,
                });
            } else if let Some(field) = election_field(property) {
                match field.field_type {
                    FieldType::Int | FieldType::Float => {
                        let (min, max) = numeric_range(property, constraint)?;
                        clauses.push(Clause::NumRange {
                            column: field.column,
                            min,
                            max,
                        });
                    }
                    FieldType::Date => {
                        let (min, max) = date_range(property, constraint)?;
                        clauses.push(Clause::DateRange {
                            column: field.column,
                            min,
                            max,
                        });
                    }
                    FieldType::Bool => match constraint {
                        Value::Bool(value) => clauses.push(Clause::BoolEq {
                            column: field.column,
                            value: *value,
                        }),
                        other => {
                            return Err(shape_error(
                                property,
                                format!("expected a boolean, got {}", other),
                            ))
                        }
                    },
                    FieldType::Text => {
                        let (contains, equals) = text_match(property, constraint)?;
                        clauses.push(Clause::TextMatch {
                            column: field.column,
                            contains,
                            equals,
                        });
                    }
                    FieldType::Reference => clauses.push(Clause::RefIn {
                        column: field.column,
                        ids: reference_list(property, constraint)?,
                    }),
                }
            } else if db.get_election_metadata(property).await?.is_some() {
                // all metadata properties are numeric
                let (min, max) = numeric_range(property, constraint)?;
                clauses.push(Clause::MetaRange {
                    short_name: property.clone(),
                    min,
                    max,
                });
            } else {
                return Err(AnalyticsError::UnknownFilterProperty {
                    property: property.clone(),
                });
            }
        }

        Ok(ResolvedFilters { clauses })
    }
}

/// Typed filter clauses, ready to be rendered into SQL.
#[derive(Debug, Clone)]
enum Clause {
    NumRange {
        column: &'static str,
        min: Option<f64>,
        max: Option<f64>,
    },
    DateRange {
        column: &'static str,
        min: Option<NaiveDate>,
        max: Option<NaiveDate>,
    },
    BoolEq {
        column: &'static str,
        value: bool,
    },
    TextMatch {
        column: &'static str,
        contains: Option<String>,
        equals: Option<String>,
    },
    RefIn {
        column: &'static str,
        ids: Vec<String>,
    },
    IdIn {
        ids: Vec<i64>,
    },
    MetaRange {
        short_name: String,
        min: Option<f64>,
        max: Option<f64>,
    },
}

#[derive(Debug, Clone, Default)]
pub struct ResolvedFilters {
    clauses: Vec<Clause>,
}

impl ResolvedFilters {
    /// Append the WHERE conjunction to a query whose election table is
    /// aliased `e`. The builder must already contain a WHERE clause to
    /// conjoin with (conventionally `WHERE 1=1`).
    pub fn apply(&self, qb: &mut QueryBuilder<'_, Sqlite>) {
        for clause in &self.clauses {
            match clause {
                Clause::NumRange { column, min, max } => {
                    if let Some(min) = min {
                        qb.push(format!(" AND e.{} >= ", column));
                        qb.push_bind(*min);
                    }
                    if let Some(max) = max {
                        qb.push(format!(" AND e.{} <= ", column));
                        qb.push_bind(*max);
                    }
                }
                Clause::DateRange { column, min, max } => {
                    if let Some(min) = min {
                        qb.push(format!(" AND e.{} >= ", column));
                        qb.push_bind(*min);
                    }
                    if let Some(max) = max {
                        qb.push(format!(" AND e.{} <= ", column));
                        qb.push_bind(*max);
                    }
                }
                Clause::BoolEq { column, value } => {
                    qb.push(format!(" AND e.{} = ", column));
                    qb.push_bind(*value);
                }
                Clause::TextMatch {
                    column,
                    contains,
                    equals,
                } => {
                    if let Some(contains) = contains {
                        // SQLite LIKE is case-insensitive for ASCII
                        qb.push(format!(" AND e.{} LIKE ", column));
                        qb.push_bind(format!("%{}%", contains));
                    }
                    if let Some(equals) = equals {
                        qb.push(format!(" AND e.{} = ", column));
                        qb.push_bind(equals.clone());
                    }
                }
                Clause::RefIn { column, ids } => {
                    if ids.is_empty() {
                        qb.push(" AND 1 = 0");
                        continue;
                    }
                    qb.push(format!(" AND e.{} IN (", column));
                    let mut separated = qb.separated(", ");
                    for id in ids {
                        separated.push_bind(id.clone());
                    }
                    qb.push(")");
                }
                Clause::IdIn { ids } => {
                    if ids.is_empty() {
                        qb.push(" AND 1 = 0");
                        continue;
                    }
                    qb.push(" AND e.id IN (");
                    let mut separated = qb.separated(", ");
                    for id in ids {
                        separated.push_bind(*id);
                    }
                    qb.push(")");
                }
                Clause::MetaRange {
                    short_name,
                    min,
                    max,
                } => {
                    if min.is_none() && max.is_none() {
                        continue;
                    }
                    // both bounds must hold for the same attached row
                    qb.push(
                        " AND e.id IN (SELECT dp.election_id FROM election_data_properties dp \
                         WHERE dp.metadata = ",
                    );
                    qb.push_bind(short_name.clone());
                    if let Some(min) = min {
                        qb.push(" AND dp.value >= ");
                        qb.push_bind(*min);
                    }
                    if let Some(max) = max {
                        qb.push(" AND dp.value <= ");
                        qb.push_bind(*max);
                    }
                    qb.push(")");
                }
            }
        }
    }
}

/// Narrow further to elections that have, for every requested rule, a stored
/// rule result carrying all of the requested properties.
pub fn apply_rule_property_completeness(
    qb: &mut QueryBuilder<'_, Sqlite>,
    rule_abbreviations: &[String],
    property_short_names: &[String],
) {
    for rule in rule_abbreviations {
        if property_short_names.is_empty() {
            qb.push(" AND e.id IN (SELECT rr.election_id FROM rule_results rr WHERE rr.rule = ");
            qb.push_bind(rule.clone());
            qb.push(")");
        } else {
            qb.push(
                " AND e.id IN (SELECT rr.election_id FROM rule_results rr \
                 JOIN rule_result_data_properties dp ON dp.rule_result_id = rr.id \
                 WHERE rr.rule = ",
            );
            qb.push_bind(rule.clone());
            qb.push(" AND dp.metadata IN (");
            let mut separated = qb.separated(", ");
            for property in property_short_names {
                separated.push_bind(property.clone());
            }
            qb.push(") GROUP BY rr.election_id HAVING COUNT(DISTINCT dp.metadata) = ");
            qb.push_bind(property_short_names.len() as i64);
            qb.push(")");
        }
    }
}

/// Run a filter specification and fetch the surviving elections.
pub async fn filter_elections(
    db: &PbDatabase,
    filters: &ElectionFilters,
) -> AnalyticsResult<Vec<ElectionRow>> {
    let resolved = filters.resolve(db).await?;
    let mut qb = QueryBuilder::new("SELECT e.* FROM elections e WHERE 1=1");
    resolved.apply(&mut qb);
    qb.push(" ORDER BY e.date_begin DESC, e.country, e.unit");
    let elections = qb
        .build_query_as::<ElectionRow>()
        .fetch_all(db.pool())
        .await?;
    Ok(elections)
}

/// Ids of the elections surviving a resolved filter, optionally narrowed by
/// rule-property completeness.
pub async fn filtered_election_ids(
    db: &PbDatabase,
    resolved: &ResolvedFilters,
    completeness: Option<(&[String], &[String])>,
) -> AnalyticsResult<Vec<i64>> {
    let mut qb = QueryBuilder::new("SELECT e.id FROM elections e WHERE 1=1");
    resolved.apply(&mut qb);
    if let Some((rules, properties)) = completeness {
        apply_rule_property_completeness(&mut qb, rules, properties);
    }
    let ids = qb
        .build_query_scalar::<i64>()
        .fetch_all(db.pool())
        .await?;
    Ok(ids)
}

fn shape_error(property: &str, detail: String) -> AnalyticsError {
    AnalyticsError::InvalidFilterShape {
        property: property.to_string(),
        detail,
    }
}

fn constraint_object<'a>(
    property: &str,
    constraint: &'a Value,
) -> AnalyticsResult<&'a serde_json::Map<String, Value>> {
    constraint
        .as_object()
        .ok_or_else(|| shape_error(property, format!("expected an object, got {}", constraint)))
}

fn numeric_range(
    property: &str,
    constraint: &Value,
) -> AnalyticsResult<(Option<f64>, Option<f64>)> {
    let object = constraint_object(property, constraint)?;
    let mut bounds = [None, None];
    for (slot, key) in bounds.iter_mut().zip(["min", "max"].iter()) {
        match object.get(*key) {
            None | Some(Value::Null) => {}
            Some(value) => {
                *slot = Some(value.as_f64().ok_or_else(|| {
                    shape_error(property, format!("{} bound must be a number", key))
                })?);
            }
        }
    }
    Ok((bounds[0], bounds[1]))
}

fn date_range(
    property: &str,
    constraint: &Value,
) -> AnalyticsResult<(Option<NaiveDate>, Option<NaiveDate>)> {
    let object = constraint_object(property, constraint)?;
    let mut bounds = [None, None];
    for (slot, key) in bounds.iter_mut().zip(["min", "max"].iter()) {
        match object.get(*key) {
            None | Some(Value::Null) => {}
            Some(Value::String(raw)) => {
                let date = NaiveDate::parse_from_str(raw, "%Y-%m-%d").map_err(|e| {
                    shape_error(property, format!("{} bound {:?} is not a date: {}", key, raw, e))
                })?;
                *slot = Some(date);
            }
            Some(other) => {
                return Err(shape_error(
                    property,
                    format!("{} bound must be a YYYY-MM-DD string, got {}", key, other),
                ))
            }
        }
    }
    Ok((bounds[0], bounds[1]))
}

fn text_match(
    property: &str,
    constraint: &Value,
) -> AnalyticsResult<(Option<String>, Option<String>)> {
    let object = constraint_object(property, constraint)?;
    let mut parts = [None, None];
    for (slot, key) in parts.iter_mut().zip(["contains", "equals"].iter()) {
        match object.get(*key) {
            None | Some(Value::Null) => {}
            Some(Value::String(raw)) => *slot = Some(raw.clone()),
            Some(other) => {
                return Err(shape_error(
                    property,
                    format!("{} must be a string, got {}", key, other),
                ))
            }
        }
    }
    let [contains, equals] = parts;
    Ok((contains, equals))
}

/// A reference constraint is either a single identifier or a list of
/// identifiers; anything else is a shape error.
fn reference_list(property: &str, constraint: &Value) -> AnalyticsResult<Vec<String>> {
    match constraint {
        Value::String(id) => Ok(vec![id.clone()]),
        Value::Array(ids) => ids
            .iter()
            .map(|id| {
                id.as_str().map(|s| s.to_string()).ok_or_else(|| {
                    shape_error(property, format!("list entry {} is not an identifier", id))
                })
            })
            .collect(),
        other => Err(shape_error(
            property,
            format!("expected an identifier or a list of identifiers, got {}", other),
        )),
    }
}

fn id_list(property: &str, constraint: &Value) -> AnalyticsResult<Vec<i64>> {
    match constraint {
        Value::Array(ids) => ids
            .iter()
            .map(|id| {
                id.as_i64()
                    .ok_or_else(|| shape_error(property, format!("{} is not an id", id)))
            })
            .collect(),
        other => Err(shape_error(
            property,
            format!("expected a list of ids, got {}", other),
        )),
    }
}
