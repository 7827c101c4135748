use crate::database::{DatabaseError, PbDatabase, ProjectRow, Result};
/// Seam to the external election-computation library: rule solvers and
/// satisfaction measures plug in through these traits, and their outputs are
/// recorded as rule results and data properties.
use crate::model::{BallotFormat, PropertyValue};

/// Numeric mode for rule and satisfaction computations. Threaded explicitly
/// through every call; never process-wide state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Precision {
    Exact,
    Float,
}

#[derive(Debug, Clone)]
pub struct RuleParams {
    pub precision: Precision,
}

impl Default for RuleParams {
    fn default() -> Self {
        RuleParams {
            precision: Precision::Float,
        }
    }
}

/// One election's projects and budget, materialized for rule computation.
#[derive(Debug, Clone)]
pub struct PbInstance {
    pub election_id: i64,
    pub budget: f64,
    pub projects: Vec<ProjectRow>,
}

/// A voter's ballot: (project row id, preference strength), strongest first.
#[derive(Debug, Clone)]
pub struct PbBallot {
    pub voter_id: i64,
    pub preferences: Vec<(i64, f64)>,
}

#[derive(Debug, Clone)]
pub struct PbProfile {
    pub ballot_format: BallotFormat,
    pub ballots: Vec<PbBallot>,
}

/// An allocation rule: maps an instance and profile to the selected project
/// row ids, respecting the budget constraint.
pub trait RuleSolver {
    fn abbreviation(&self) -> &str;
    fn run_rule(&self, instance: &PbInstance, profile: &PbProfile, params: &RuleParams)
        -> Vec<i64>;
}

/// A derived statistic over a rule outcome, keyed by its catalog short name.
pub trait SatisfactionMeasure {
    fn short_name(&self) -> &str;
    fn compute(
        &self,
        instance: &PbInstance,
        profile: &PbProfile,
        allocation: &[i64],
        params: &RuleParams,
    ) -> PropertyValue;
}

/// Materialize one election for the computation collaborators.
pub async fn load_instance(
    db: &PbDatabase,
    election_id: i64,
) -> Result<(PbInstance, PbProfile)> {
    let election = db.get_election(election_id).await?.ok_or_else(|| {
        DatabaseError::Integrity(format!("no election with id {}", election_id))
    })?;
    let ballot_format = BallotFormat::from_alias(&election.ballot_type).ok_or_else(|| {
        DatabaseError::Integrity(format!("unknown ballot type {}", election.ballot_type))
    })?;
    let projects = db.get_projects_for_election(election_id).await?;

    let voter_ids: Vec<i64> =
        sqlx::query_scalar("SELECT id FROM voters WHERE election_id = ? ORDER BY id")
            .bind(election_id)
            .fetch_all(db.pool())
            .await?;
    let preferences: Vec<(i64, i64, f64)> = sqlx::query_as(
        "SELECT pi.voter_id, pi.project_id, pi.preference_strength
         FROM preference_infos pi
         JOIN voters v ON v.id = pi.voter_id
         WHERE v.election_id = ?
         ORDER BY pi.voter_id, pi.preference_strength DESC",
    )
    .bind(election_id)
    .fetch_all(db.pool())
    .await?;

    let mut ballots: Vec<PbBallot> = voter_ids
        .into_iter()
        .map(|voter_id| PbBallot {
            voter_id,
            preferences: Vec::new(),
        })
        .collect();
    let by_voter: std::collections::HashMap<i64, usize> = ballots
        .iter()
        .enumerate()
        .map(|(index, ballot)| (ballot.voter_id, index))
        .collect();
    for (voter_id, project_id, strength) in preferences {
        if let Some(index) = by_voter.get(&voter_id) {
            ballots[*index].preferences.push((project_id, strength));
        }
    }

    Ok((
        PbInstance {
            election_id,
            budget: election.budget,
            projects,
        },
        PbProfile {
            ballot_format,
            ballots,
        },
    ))
}

/// Run one solver over an election and persist its outcome: the selected
/// project set plus the requested satisfaction measures. Rules that do not
/// apply to the election's ballot type are skipped.
pub async fn store_rule_result(
    db: &PbDatabase,
    election_id: i64,
    solver: &dyn RuleSolver,
    measures: &[&dyn SatisfactionMeasure],
    params: &RuleParams,
) -> Result<Option<i64>> {
    let election = db.get_election(election_id).await?.ok_or_else(|| {
        DatabaseError::Integrity(format!("no election with id {}", election_id))
    })?;
    if !db
        .rule_applies_to(solver.abbreviation(), &election.ballot_type)
        .await?
    {
        log::warn!(
            "rule {} does not apply to {} ballots, skipping election {}",
            solver.abbreviation(),
            election.ballot_type,
            election.name
        );
        return Ok(None);
    }

    let (instance, profile) = load_instance(db, election_id).await?;
    let selected = solver.run_rule(&instance, &profile, params);

    let rule_result_id = db
        .insert_rule_result(election_id, solver.abbreviation())
        .await?;
    db.clear_selected_projects(rule_result_id).await?;
    for project_id in &selected {
        db.add_selected_project(rule_result_id, *project_id).await?;
    }

    for measure in measures {
        let value = measure.compute(&instance, &profile, &selected, params);
        db.set_rule_result_data_property(
            rule_result_id,
            measure.short_name(),
            &value.to_stored_string(),
        )
        .await?;
    }

    log::info!(
        "stored result of rule {} for election {} ({} projects selected)",
        solver.abbreviation(),
        election.name,
        selected.len()
    );
    Ok(Some(rule_result_id))
}
