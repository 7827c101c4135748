use crate::analytics::filter::{filtered_election_ids, ElectionFilters};
/// Averaging of rule-result data properties over a filtered election set:
/// SQL means for scalars, single-pass element-wise means for vectors.
use crate::analytics::{AnalyticsError, AnalyticsResult};
use crate::database::PbDatabase;
use crate::model::{InnerType, PropertyValue};
use serde::Serialize;
use sqlx::QueryBuilder;
use std::collections::BTreeMap;

#[derive(Debug, Serialize)]
pub struct AverageDataProperties {
    /// rule -> property short name -> averaged value (None when no stored
    /// value contributed).
    pub data: BTreeMap<String, BTreeMap<String, Option<PropertyValue>>>,
    /// Elections contributing after filtering and completeness narrowing.
    pub num_elections: usize,
}

/// Average the requested rule-result properties over the filtered elections.
///
/// Unless `include_incomplete_elections` is set, only elections carrying all
/// requested (rule, property) combinations contribute.
pub async fn average_rule_result_properties(
    db: &PbDatabase,
    rule_abbreviations: &[String],
    property_short_names: &[String],
    election_filters: &ElectionFilters,
    include_incomplete_elections: bool,
) -> AnalyticsResult<AverageDataProperties> {
    let resolved = election_filters.resolve(db).await?;
    let completeness = if include_incomplete_elections {
        None
    } else {
        Some((rule_abbreviations, property_short_names))
    };
    let election_ids = filtered_election_ids(db, &resolved, completeness).await?;

    let mut data = BTreeMap::new();
    for rule in rule_abbreviations {
        let mut rule_data = BTreeMap::new();
        for property in property_short_names {
            let metadata = db
                .get_rule_result_metadata(property)
                .await?
                .ok_or_else(|| AnalyticsError::UnknownFilterProperty {
                    property: property.clone(),
                })?;
            let inner_type = InnerType::from_str(&metadata.inner_type).ok_or_else(|| {
                AnalyticsError::UnsupportedPropertyType {
                    property: property.clone(),
                    field_type: "unknown",
                }
            })?;

            let value = match inner_type {
                InnerType::Int | InnerType::Float => {
                    scalar_average(db, rule, property, &election_ids)
                        .await?
                        .map(PropertyValue::Float)
                }
                InnerType::FloatList => {
                    let vectors = stored_vectors(db, rule, property, &election_ids).await?;
                    Some(PropertyValue::FloatList(element_wise_mean(
                        property, &vectors,
                    )?))
                }
            };
            rule_data.insert(property.clone(), value);
        }
        data.insert(rule.clone(), rule_data);
    }

    Ok(AverageDataProperties {
        data,
        num_elections: election_ids.len(),
    })
}

async fn scalar_average(
    db: &PbDatabase,
    rule: &str,
    property: &str,
    election_ids: &[i64],
) -> AnalyticsResult<Option<f64>> {
    if election_ids.is_empty() {
        return Ok(None);
    }
    let mut qb = QueryBuilder::new(
        "SELECT AVG(CAST(dp.value AS REAL)) \
         FROM rule_result_data_properties dp \
         JOIN rule_results rr ON rr.id = dp.rule_result_id \
         WHERE rr.rule = ",
    );
    qb.push_bind(rule.to_string());
    qb.push(" AND dp.metadata = ");
    qb.push_bind(property.to_string());
    qb.push(" AND rr.election_id IN (");
    let mut separated = qb.separated(", ");
    for id in election_ids {
        separated.push_bind(*id);
    }
    qb.push(")");

    let average: Option<f64> = qb
        .build_query_scalar::<Option<f64>>()
        .fetch_one(db.pool())
        .await?;
    Ok(average)
}

async fn stored_vectors(
    db: &PbDatabase,
    rule: &str,
    property: &str,
    election_ids: &[i64],
) -> AnalyticsResult<Vec<Vec<f64>>> {
    if election_ids.is_empty() {
        return Ok(Vec::new());
    }
    let mut qb = QueryBuilder::new(
        "SELECT dp.value \
         FROM rule_result_data_properties dp \
         JOIN rule_results rr ON rr.id = dp.rule_result_id \
         WHERE rr.rule = ",
    );
    qb.push_bind(rule.to_string());
    qb.push(" AND dp.metadata = ");
    qb.push_bind(property.to_string());
    qb.push(" AND rr.election_id IN (");
    let mut separated = qb.separated(", ");
    for id in election_ids {
        separated.push_bind(*id);
    }
    qb.push(")");

    let raw_values: Vec<String> = qb.build_query_scalar().fetch_all(db.pool()).await?;
    let mut vectors = Vec::with_capacity(raw_values.len());
    for raw in raw_values {
        vectors.push(serde_json::from_str::<Vec<f64>>(&raw)?);
    }
    Ok(vectors)
}

/// Element-wise mean, accumulated in one pass: sum every position, divide
/// once at the end. All vectors of a property must share one length.
pub fn element_wise_mean(property: &str, vectors: &[Vec<f64>]) -> AnalyticsResult<Vec<f64>> {
    let first = match vectors.first() {
        Some(first) => first,
        None => return Ok(Vec::new()),
    };
    let mut sums = vec![0.0; first.len()];
    for vector in vectors {
        if vector.len() != sums.len() {
            log::error!(
                "vector length mismatch for property {}: expected {}, found {}",
                property,
                sums.len(),
                vector.len()
            );
            return Err(AnalyticsError::VectorLengthMismatch {
                property: property.to_string(),
                expected: sums.len(),
                found: vector.len(),
            });
        }
        for (sum, value) in sums.iter_mut().zip(vector) {
            *sum += value;
        }
    }
    let count = vectors.len() as f64;
    Ok(sums.into_iter().map(|sum| sum / count).collect())
}

#[derive(Debug, Serialize)]
pub struct RuleSatisfaction {
    pub hist_data: Vec<f64>,
    pub avg: Option<f64>,
}

#[derive(Debug, Serialize)]
pub struct SatisfactionHistogram {
    pub data: BTreeMap<String, RuleSatisfaction>,
    pub num_elections: usize,
}

/// The averaged cost-satisfaction distribution per rule, reshaped for the
/// satisfaction chart: the 21-bucket distribution plus the scalar mean.
pub async fn satisfaction_histogram(
    db: &PbDatabase,
    rule_abbreviations: &[String],
    election_filters: &ElectionFilters,
) -> AnalyticsResult<SatisfactionHistogram> {
    let properties = vec![
        "aggregated_norm_cost_satisfaction".to_string(),
        "avg_norm_cost_satisfaction".to_string(),
    ];
    let averages = average_rule_result_properties(
        db,
        rule_abbreviations,
        &properties,
        election_filters,
        false,
    )
    .await?;

    let mut data = BTreeMap::new();
    for (rule, mut rule_data) in averages.data {
        let hist_data = match rule_data.remove("aggregated_norm_cost_satisfaction") {
            Some(Some(PropertyValue::FloatList(values))) => values,
            _ => Vec::new(),
        };
        let avg = match rule_data.remove("avg_norm_cost_satisfaction") {
            Some(Some(PropertyValue::Float(value))) => Some(value),
            _ => None,
        };
        data.insert(rule, RuleSatisfaction { hist_data, avg });
    }

    Ok(SatisfactionHistogram {
        data,
        num_elections: averages.num_elections,
    })
}
