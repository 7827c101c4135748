use crate::analytics::{AnalyticsError, AnalyticsResult};
/// Category proportionality: how the cost share each rule allocates to a
/// project category compares to the voters' cost-weighted support for it.
use crate::database::PbDatabase;
use serde::Serialize;
use std::collections::{BTreeMap, HashMap};

#[derive(Debug, Clone, Serialize)]
pub struct CategoryProportions {
    pub category_names: Vec<String>,
    pub vote_cost_shares: Vec<f64>,
    pub result_cost_shares: BTreeMap<String, Vec<f64>>,
}

/// Per category of the election: the cost-weighted vote share and, for every
/// requested rule, the share of selected cost. Both are normalized into
/// proportions over all categories.
pub async fn category_proportions(
    db: &PbDatabase,
    election_id: i64,
    rule_abbreviations: &[String],
) -> AnalyticsResult<CategoryProportions> {
    let election = db
        .get_election(election_id)
        .await?
        .ok_or(AnalyticsError::ElectionNotFound { id: election_id })?;

    if !election.has_categories {
        return Ok(CategoryProportions {
            category_names: Vec::new(),
            vote_cost_shares: Vec::new(),
            result_cost_shares: rule_abbreviations
                .iter()
                .map(|rule| (rule.clone(), Vec::new()))
                .collect(),
        });
    }

    let categories = db.get_categories_for_election(election_id).await?;

    // cost-weighted vote support per category
    let vote_rows: Vec<(i64, f64)> = sqlx::query_as(
        "SELECT pc.category_id, SUM(p.cost * pi.preference_strength)
         FROM preference_infos pi
         JOIN voters v ON v.id = pi.voter_id
         JOIN projects p ON p.id = pi.project_id
         JOIN project_categories pc ON pc.project_id = p.id
         WHERE v.election_id = ?
         GROUP BY pc.category_id",
    )
    .bind(election_id)
    .fetch_all(db.pool())
    .await?;
    let vote_totals: HashMap<i64, f64> = vote_rows.into_iter().collect();

    let mut vote_cost_shares: Vec<f64> = categories
        .iter()
        .map(|category| vote_totals.get(&category.id).copied().unwrap_or(0.0))
        .collect();
    let vote_cost_share_sum: f64 = vote_cost_shares.iter().sum();
    if vote_cost_share_sum == 0.0 {
        return Err(AnalyticsError::NoPositiveCostVotes {
            election: election_id,
        });
    }
    for share in vote_cost_shares.iter_mut() {
        *share /= vote_cost_share_sum;
    }

    // selected cost per category, rule by rule
    let mut result_cost_shares = BTreeMap::new();
    for rule in rule_abbreviations {
        let result_rows: Vec<(i64, f64)> = sqlx::query_as(
            "SELECT pc.category_id, SUM(p.cost)
             FROM rule_results rr
             JOIN rule_result_selected s ON s.rule_result_id = rr.id
             JOIN projects p ON p.id = s.project_id
             JOIN project_categories pc ON pc.project_id = p.id
             WHERE rr.election_id = ? AND rr.rule = ?
             GROUP BY pc.category_id",
        )
        .bind(election_id)
        .bind(rule)
        .fetch_all(db.pool())
        .await?;
        let result_totals: HashMap<i64, f64> = result_rows.into_iter().collect();

        let mut shares: Vec<f64> = categories
            .iter()
            .map(|category| result_totals.get(&category.id).copied().unwrap_or(0.0))
            .collect();
        // a rule selecting no categorized cost keeps all-zero shares instead
        // of dividing by zero
        let sum: f64 = shares.iter().sum();
        let divider = if sum == 0.0 { 1.0 } else { sum };
        for share in shares.iter_mut() {
            *share /= divider;
        }
        result_cost_shares.insert(rule.clone(), shares);
    }

    Ok(CategoryProportions {
        category_names: categories.into_iter().map(|c| c.name).collect(),
        vote_cost_shares,
        result_cost_shares,
    })
}
