use crate::analytics::filter::ElectionFilters;
use crate::analytics::listing::PropertyDescriptor;
/// Bucketed frequency distributions over a numeric election field or an
/// attached metadata property, with optional logarithmic spacing and optional
/// per-ballot-type breakdown.
use crate::analytics::{AnalyticsError, AnalyticsResult};
use crate::database::PbDatabase;
use crate::model::{election_field, FieldType};
use serde::Serialize;
use sqlx::QueryBuilder;
use std::collections::BTreeMap;

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum HistogramValues {
    Flat(Vec<i64>),
    ByCategory(BTreeMap<String, Vec<i64>>),
}

impl HistogramValues {
    pub fn total(&self) -> i64 {
        match self {
            HistogramValues::Flat(counts) => counts.iter().sum(),
            HistogramValues::ByCategory(by_category) => {
                by_category.values().flatten().sum()
            }
        }
    }
}

/// `bins` holds the `num_bins + 1` bucket edges; every bucket is half-open
/// except the final one, which is closed on the right.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Histogram {
    pub bins: Vec<f64>,
    pub bin_midpoints: Vec<f64>,
    pub values: HistogramValues,
}

/// Bucket a flat collection of values.
///
/// With `log_scale`, values that are not strictly positive are excluded up
/// front rather than rejected; a collection with no positive values
/// degenerates to the empty histogram.
pub fn histogram(values: &[f64], num_bins: usize, log_scale: bool) -> Histogram {
    let num_bins = num_bins.max(1);
    let kept: Vec<f64> = if log_scale {
        values.iter().copied().filter(|v| *v > 0.0).collect()
    } else {
        values.to_vec()
    };

    let (min_value, max_value) = match min_max(&kept) {
        Some(bounds) => bounds,
        None => {
            return Histogram {
                bins: Vec::new(),
                bin_midpoints: Vec::new(),
                values: HistogramValues::Flat(Vec::new()),
            }
        }
    };

    if min_value == max_value {
        return Histogram {
            bins: vec![min_value, min_value],
            bin_midpoints: vec![min_value],
            values: HistogramValues::Flat(vec![kept.len() as i64]),
        };
    }

    let (bins, bin_midpoints) = bin_edges(min_value, max_value, num_bins, log_scale);
    let mut counts = vec![0i64; num_bins];
    for value in kept {
        counts[bucket_index(value, min_value, max_value, num_bins, log_scale)] += 1;
    }

    Histogram {
        bins,
        bin_midpoints,
        values: HistogramValues::Flat(counts),
    }
}

/// Bucket a tagged collection, counting separately per category against the
/// same global bucket edges. Every category of `categories` appears in the
/// result, zero-filled if nothing fell into it.
pub fn histogram_by_category(
    tagged_values: &[(f64, String)],
    categories: &[String],
    num_bins: usize,
    log_scale: bool,
) -> Histogram {
    let num_bins = num_bins.max(1);
    let kept: Vec<&(f64, String)> = if log_scale {
        tagged_values.iter().filter(|(v, _)| *v > 0.0).collect()
    } else {
        tagged_values.iter().collect()
    };

    let values: Vec<f64> = kept.iter().map(|(v, _)| *v).collect();
    let (min_value, max_value) = match min_max(&values) {
        Some(bounds) => bounds,
        None => {
            return Histogram {
                bins: Vec::new(),
                bin_midpoints: Vec::new(),
                values: HistogramValues::ByCategory(
                    categories.iter().map(|c| (c.clone(), Vec::new())).collect(),
                ),
            }
        }
    };

    if min_value == max_value {
        let mut by_category: BTreeMap<String, Vec<i64>> = categories
            .iter()
            .map(|c| (c.clone(), vec![0i64]))
            .collect();
        for (_, category) in &kept {
            if let Some(counts) = by_category.get_mut(category) {
                counts[0] += 1;
            }
        }
        return Histogram {
            bins: vec![min_value, min_value],
            bin_midpoints: vec![min_value],
            values: HistogramValues::ByCategory(by_category),
        };
    }

    let (bins, bin_midpoints) = bin_edges(min_value, max_value, num_bins, log_scale);
    let mut by_category: BTreeMap<String, Vec<i64>> = categories
        .iter()
        .map(|c| (c.clone(), vec![0i64; num_bins]))
        .collect();
    for (value, category) in &kept {
        if let Some(counts) = by_category.get_mut(category) {
            counts[bucket_index(*value, min_value, max_value, num_bins, log_scale)] += 1;
        }
    }

    Histogram {
        bins,
        bin_midpoints,
        values: HistogramValues::ByCategory(by_category),
    }
}

fn min_max(values: &[f64]) -> Option<(f64, f64)> {
    let first = *values.first()?;
    let mut min_value = first;
    let mut max_value = first;
    for value in &values[1..] {
        min_value = min_value.min(*value);
        max_value = max_value.max(*value);
    }
    Some((min_value, max_value))
}

fn bin_edges(
    min_value: f64,
    max_value: f64,
    num_bins: usize,
    log_scale: bool,
) -> (Vec<f64>, Vec<f64>) {
    let n = num_bins as f64;
    if log_scale {
        let ratio = max_value / min_value;
        let bins = (0..=num_bins)
            .map(|i| min_value * ratio.powf(i as f64 / n))
            .collect();
        let midpoints = (0..num_bins)
            .map(|i| min_value * ratio.powf((i as f64 + 0.5) / n))
            .collect();
        (bins, midpoints)
    } else {
        let span = max_value - min_value;
        let bins = (0..=num_bins)
            .map(|i| min_value + i as f64 * span / n)
            .collect();
        let midpoints = (0..num_bins)
            .map(|i| min_value + (i as f64 + 0.5) * span / n)
            .collect();
        (bins, midpoints)
    }
}

fn bucket_index(
    value: f64,
    min_value: f64,
    max_value: f64,
    num_bins: usize,
    log_scale: bool,
) -> usize {
    let position = if log_scale {
        (value / min_value).ln() / (max_value / min_value).ln()
    } else {
        (value - min_value) / (max_value - min_value)
    };
    let index = (position * num_bins as f64).floor() as i64;
    // The raw index reaches num_bins exactly at the maximum value; clamping
    // merges indices num_bins-1 and num_bins into one closed final bucket.
    index.clamp(0, num_bins as i64 - 1) as usize
}

#[derive(Debug, Serialize)]
pub struct PropertyHistogram {
    pub histogram: Histogram,
    pub election_property: PropertyDescriptor,
}

/// Histogram over an election property: either a registered metadata short
/// name (values read from the attachment table) or a numeric public field.
pub async fn election_property_histogram(
    db: &PbDatabase,
    property: &str,
    filters: &ElectionFilters,
    num_bins: usize,
    by_ballot_type: bool,
    log_scale: bool,
) -> AnalyticsResult<PropertyHistogram> {
    let resolved = filters.resolve(db).await?;

    let (descriptor, mut qb) = if let Some(metadata) = db.get_election_metadata(property).await? {
        let mut qb = QueryBuilder::new(
            "SELECT dp.value AS value, e.ballot_type AS category \
             FROM election_data_properties dp \
             JOIN elections e ON e.id = dp.election_id \
             WHERE dp.metadata = ",
        );
        qb.push_bind(property.to_string());
        (PropertyDescriptor::from_election_metadata(&metadata), qb)
    } else if let Some(field) = election_field(property) {
        match field.field_type {
            FieldType::Int | FieldType::Float => {}
            other => {
                return Err(AnalyticsError::UnsupportedPropertyType {
                    property: property.to_string(),
                    field_type: other.as_str(),
                })
            }
        }
        let qb = QueryBuilder::new(format!(
            "SELECT CAST(e.{} AS REAL) AS value, e.ballot_type AS category \
             FROM elections e WHERE 1=1",
            field.column
        ));
        (PropertyDescriptor::from_field(field), qb)
    } else {
        return Err(AnalyticsError::UnknownFilterProperty {
            property: property.to_string(),
        });
    };

    resolved.apply(&mut qb);
    let rows: Vec<(f64, String)> = qb.build_query_as().fetch_all(db.pool()).await?;

    let histogram_data = if by_ballot_type {
        let categories: Vec<String> = db
            .get_ballot_types()
            .await?
            .into_iter()
            .map(|b| b.name)
            .collect();
        histogram_by_category(&rows, &categories, num_bins, log_scale)
    } else {
        let values: Vec<f64> = rows.into_iter().map(|(v, _)| v).collect();
        histogram(&values, num_bins, log_scale)
    };

    Ok(PropertyHistogram {
        histogram: histogram_data,
        election_property: descriptor,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tagged(values: &[(f64, &str)]) -> Vec<(f64, String)> {
        values.iter().map(|(v, c)| (*v, c.to_string())).collect()
    }

    #[test]
    fn linear_binning_matches_reference_scenario() {
        // ballot lengths i^2 - i for i in 0..4
        let values = [0.0, 0.0, 2.0, 6.0];
        let result = histogram(&values, 4, false);
        assert_eq!(result.bins, vec![0.0, 1.5, 3.0, 4.5, 6.0]);
        assert_eq!(result.bin_midpoints, vec![0.75, 2.25, 3.75, 5.25]);
        assert_eq!(result.values, HistogramValues::Flat(vec![2, 1, 0, 1]));
    }

    #[test]
    fn counts_are_conserved() {
        let values: Vec<f64> = (0..97).map(|i| (i as f64) * 0.37 - 5.0).collect();
        for num_bins in [1, 2, 5, 10, 31] {
            let result = histogram(&values, num_bins, false);
            assert_eq!(result.values.total(), values.len() as i64);
        }
    }

    #[test]
    fn maximum_lands_in_the_final_closed_bucket() {
        let values = [1.0, 2.0, 3.0, 10.0];
        let result = histogram(&values, 3, false);
        match &result.values {
            HistogramValues::Flat(counts) => {
                assert_eq!(counts.len(), 3);
                assert_eq!(counts[2], 1);
            }
            other => panic!("expected flat counts, got {:?}", other),
        }
    }

    #[test]
    fn single_valued_collections_collapse_to_one_bucket() {
        let values = [3.5; 7];
        let result = histogram(&values, 10, false);
        assert_eq!(result.bins, vec![3.5, 3.5]);
        assert_eq!(result.bin_midpoints, vec![3.5]);
        assert_eq!(result.values, HistogramValues::Flat(vec![7]));
    }

    #[test]
    fn empty_collections_produce_empty_histograms() {
        let result = histogram(&[], 5, false);
        assert!(result.bins.is_empty());
        assert!(result.bin_midpoints.is_empty());
        assert_eq!(result.values, HistogramValues::Flat(vec![]));
    }

    #[test]
    fn log_scale_edges_are_strictly_increasing() {
        let values = [1.0, 10.0, 100.0, 1000.0];
        let result = histogram(&values, 3, true);
        assert_eq!(result.bins.len(), 4);
        for window in result.bins.windows(2) {
            assert!(window[0] < window[1]);
        }
        for (i, edge) in result.bins.iter().enumerate() {
            assert!((edge - 10f64.powi(i as i32)).abs() < 1e-5);
        }
        assert_eq!(result.values, HistogramValues::Flat(vec![1, 1, 2]));
    }

    #[test]
    fn log_scale_silently_excludes_non_positive_values() {
        let values = [-2.0, 0.0, 1.0, 10.0, 100.0];
        let result = histogram(&values, 2, true);
        // only the three positive values are bucketed
        assert_eq!(result.values.total(), 3);
        assert_eq!(result.bins.first().copied(), Some(1.0));
    }

    #[test]
    fn log_scale_with_no_positive_values_degenerates_to_empty() {
        let values = [-1.0, 0.0, -0.5];
        let result = histogram(&values, 4, true);
        assert!(result.bins.is_empty());
        assert_eq!(result.values, HistogramValues::Flat(vec![]));
    }

    #[test]
    fn category_split_shares_global_edges() {
        let categories = vec![
            "approval".to_string(),
            "ordinal".to_string(),
            "cumulative".to_string(),
            "cardinal".to_string(),
        ];
        let values = tagged(&[
            (0.0, "approval"),
            (0.0, "approval"),
            (2.0, "ordinal"),
            (6.0, "ordinal"),
        ]);
        let result = histogram_by_category(&values, &categories, 4, false);
        assert_eq!(result.bins, vec![0.0, 1.5, 3.0, 4.5, 6.0]);
        match &result.values {
            HistogramValues::ByCategory(by_category) => {
                assert_eq!(by_category["approval"], vec![2, 0, 0, 0]);
                assert_eq!(by_category["ordinal"], vec![0, 1, 0, 1]);
                assert_eq!(by_category["cumulative"], vec![0, 0, 0, 0]);
                assert_eq!(by_category["cardinal"], vec![0, 0, 0, 0]);
            }
            other => panic!("expected per-category counts, got {:?}", other),
        }
    }

    #[test]
    fn category_split_conserves_counts_per_category() {
        let categories = vec!["a".to_string(), "b".to_string()];
        let values = tagged(&[(1.0, "a"), (2.0, "a"), (3.0, "b"), (4.0, "a"), (4.0, "b")]);
        let result = histogram_by_category(&values, &categories, 3, false);
        match &result.values {
            HistogramValues::ByCategory(by_category) => {
                assert_eq!(by_category["a"].iter().sum::<i64>(), 3);
                assert_eq!(by_category["b"].iter().sum::<i64>(), 2);
            }
            other => panic!("expected per-category counts, got {:?}", other),
        }
    }

    #[test]
    fn degenerate_category_split_counts_each_category() {
        let categories = vec!["a".to_string(), "b".to_string()];
        let values = tagged(&[(2.0, "a"), (2.0, "a"), (2.0, "b")]);
        let result = histogram_by_category(&values, &categories, 5, false);
        assert_eq!(result.bins, vec![2.0, 2.0]);
        match &result.values {
            HistogramValues::ByCategory(by_category) => {
                assert_eq!(by_category["a"], vec![2]);
                assert_eq!(by_category["b"], vec![1]);
            }
            other => panic!("expected per-category counts, got {:?}", other),
        }
    }
}
