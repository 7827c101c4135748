use pabuviz_db::analytics::aggregate::{average_rule_result_properties, satisfaction_histogram};
use pabuviz_db::analytics::filter::{filter_elections, filtered_election_ids, ElectionFilters};
use pabuviz_db::analytics::histogram::{election_property_histogram, HistogramValues};
use pabuviz_db::analytics::listing::{
    ballot_type_list, election_details, project_list, rule_family_list, rule_result_property_list,
};
use pabuviz_db::analytics::proportionality::category_proportions;
use pabuviz_db::analytics::AnalyticsError;
use pabuviz_db::database::ingestion::{
    audit_elections, purge_stale_elections, ElectionIngester, ElectionSnapshot,
};
use pabuviz_db::database::{NewElection, PbDatabase};
use pabuviz_db::model::PropertyValue;
use pabuviz_db::rules::{
    store_rule_result, PbInstance, PbProfile, RuleParams, RuleSolver, SatisfactionMeasure,
};
use serde_json::json;

fn filters(value: serde_json::Value) -> ElectionFilters {
    serde_json::from_value(value).unwrap()
}

fn assert_close(actual: f64, expected: f64) {
    assert!(
        (actual - expected).abs() < 1e-9,
        "expected {}, got {}",
        expected,
        actual
    );
}

/// Three elections with rule results and data properties, mirroring the
/// archive's smallest realistic shape.
async fn elections_with_rule_properties(db: &PbDatabase) -> Vec<i64> {
    let mut ids = Vec::new();
    for i in 0..3i64 {
        let election_id = db
            .insert_election(&NewElection {
                name: format!("e{}", i),
                budget: 100.0 * i as f64,
                num_votes: 20 * i,
                num_projects: 5 * i,
                ..Default::default()
            })
            .await
            .unwrap();

        let greedy_result = db.insert_rule_result(election_id, "greedy_cost").await.unwrap();
        let mes_result = db.insert_rule_result(election_id, "mes").await.unwrap();

        // e0 and e2 miss greedy_cost/avg_cost_satisfaction
        if i == 1 {
            db.set_rule_result_data_property(
                greedy_result,
                "avg_cost_satisfaction",
                &(i * 4 + 1).to_string(),
            )
            .await
            .unwrap();
        }
        db.set_rule_result_data_property(
            greedy_result,
            "avg_card_satisfaction",
            &(i * 4 + 2).to_string(),
        )
        .await
        .unwrap();
        db.set_rule_result_data_property(
            mes_result,
            "avg_cost_satisfaction",
            &(i * 4 + 3).to_string(),
        )
        .await
        .unwrap();
        db.set_rule_result_data_property(
            mes_result,
            "avg_card_satisfaction",
            &(i * 4 + 4).to_string(),
        )
        .await
        .unwrap();

        db.set_election_data_property(election_id, "avg_ballot_length", i as f64)
            .await
            .unwrap();
        db.set_election_data_property(election_id, "avg_ballot_cost", (i * i) as f64)
            .await
            .unwrap();

        ids.push(election_id);
    }
    ids
}

#[tokio::test]
async fn filters_narrow_elections_by_fields_and_metadata() {
    let db = PbDatabase::create_in_memory().await.unwrap();
    elections_with_rule_properties(&db).await;

    let narrowed = filter_elections(
        &db,
        &filters(json!({"num_votes": {"min": 10}, "num_projects": {"max": 8}})),
    )
    .await
    .unwrap();
    assert_eq!(narrowed.len(), 1);
    assert_eq!(narrowed[0].name, "e1");

    let narrowed = filter_elections(
        &db,
        &filters(json!({
            "num_votes": {"max": 1000},
            "num_projects": {"min": 4},
            "budget": {"min": 200},
        })),
    )
    .await
    .unwrap();
    assert_eq!(narrowed.len(), 1);
    assert_eq!(narrowed[0].name, "e2");

    let narrowed = filter_elections(&db, &filters(json!({"budget": {"max": 200}})))
        .await
        .unwrap();
    assert_eq!(narrowed.len(), 3);

    let narrowed = filter_elections(
        &db,
        &filters(json!({"ballot_types": ["ordinal", "approval"]})),
    )
    .await
    .unwrap();
    assert_eq!(narrowed.len(), 3);

    // metadata short names filter through the attachment table
    let narrowed = filter_elections(&db, &filters(json!({"avg_ballot_length": {"min": 1}})))
        .await
        .unwrap();
    assert_eq!(narrowed.len(), 2);

    let narrowed = filter_elections(
        &db,
        &filters(json!({"avg_ballot_length": {"min": 1, "max": 1}})),
    )
    .await
    .unwrap();
    assert_eq!(narrowed.len(), 1);
    assert_eq!(narrowed[0].name, "e1");
}

#[tokio::test]
async fn range_bounds_are_inclusive() {
    let db = PbDatabase::create_in_memory().await.unwrap();
    elections_with_rule_properties(&db).await;

    // budgets are exactly 0, 100, 200
    let narrowed = filter_elections(&db, &filters(json!({"budget": {"min": 100, "max": 200}})))
        .await
        .unwrap();
    let names: Vec<&str> = narrowed.iter().map(|e| e.name.as_str()).collect();
    assert_eq!(narrowed.len(), 2);
    assert!(names.contains(&"e1") && names.contains(&"e2"));
}

#[tokio::test]
async fn text_filters_match_case_insensitive_substrings() {
    let db = PbDatabase::create_in_memory().await.unwrap();
    for name in ["Warszawa 2020", "Kraków 2020", "Warszawa 2021"] {
        db.insert_election(&NewElection {
            name: name.to_string(),
            ..Default::default()
        })
        .await
        .unwrap();
    }

    let narrowed = filter_elections(&db, &filters(json!({"name": {"contains": "warszawa"}})))
        .await
        .unwrap();
    assert_eq!(narrowed.len(), 2);

    let narrowed = filter_elections(&db, &filters(json!({"name": {"equals": "Kraków 2020"}})))
        .await
        .unwrap();
    assert_eq!(narrowed.len(), 1);
}

#[tokio::test]
async fn completeness_narrowing_requires_every_rule_property_pair() {
    let db = PbDatabase::create_in_memory().await.unwrap();
    elections_with_rule_properties(&db).await;

    let rules = vec!["mes".to_string(), "greedy_cost".to_string()];
    let props = vec![
        "avg_card_satisfaction".to_string(),
        "avg_cost_satisfaction".to_string(),
    ];
    let resolved = ElectionFilters::new().resolve(&db).await.unwrap();
    let ids = filtered_election_ids(&db, &resolved, Some((rules.as_slice(), props.as_slice())))
        .await
        .unwrap();
    // only e1 carries all four (rule, property) combinations
    assert_eq!(ids.len(), 1);
    let complete = db.get_election(ids[0]).await.unwrap().unwrap();
    assert_eq!(complete.name, "e1");
}

#[tokio::test]
async fn scalar_properties_average_over_complete_elections() {
    let db = PbDatabase::create_in_memory().await.unwrap();
    for i in 0..2i64 {
        let election_id = db
            .insert_election(&NewElection {
                name: format!("e{}", i),
                budget: 1.0,
                ..Default::default()
            })
            .await
            .unwrap();
        let greedy_result = db.insert_rule_result(election_id, "greedy_cost").await.unwrap();
        let mes_result = db.insert_rule_result(election_id, "mes").await.unwrap();
        db.set_rule_result_data_property(
            greedy_result,
            "avg_cost_satisfaction",
            &(i * 4 + 1).to_string(),
        )
        .await
        .unwrap();
        db.set_rule_result_data_property(
            greedy_result,
            "avg_card_satisfaction",
            &(i * 4 + 2).to_string(),
        )
        .await
        .unwrap();
        db.set_rule_result_data_property(
            mes_result,
            "avg_cost_satisfaction",
            &(i * 4 + 3).to_string(),
        )
        .await
        .unwrap();
        db.set_rule_result_data_property(
            mes_result,
            "avg_card_satisfaction",
            &(i * 4 + 4).to_string(),
        )
        .await
        .unwrap();
    }

    let rules = vec!["mes".to_string(), "greedy_cost".to_string()];
    let props = vec![
        "avg_card_satisfaction".to_string(),
        "avg_cost_satisfaction".to_string(),
    ];
    let averages =
        average_rule_result_properties(&db, &rules, &props, &ElectionFilters::new(), false)
            .await
            .unwrap();

    assert_eq!(averages.num_elections, 2);
    assert_eq!(
        averages.data["greedy_cost"]["avg_card_satisfaction"],
        Some(PropertyValue::Float(4.0))
    );
    assert_eq!(
        averages.data["greedy_cost"]["avg_cost_satisfaction"],
        Some(PropertyValue::Float(3.0))
    );
    assert_eq!(
        averages.data["mes"]["avg_card_satisfaction"],
        Some(PropertyValue::Float(6.0))
    );
    assert_eq!(
        averages.data["mes"]["avg_cost_satisfaction"],
        Some(PropertyValue::Float(5.0))
    );
}

#[tokio::test]
async fn satisfaction_distributions_average_element_wise() {
    let db = PbDatabase::create_in_memory().await.unwrap();
    let distributions = [
        // (greedy_cost, mes) per election
        ([0.5, 0.5, 0.0], [0.75, 0.25, 0.0]),
        ([0.0, 0.0, 1.0], [0.25, 0.25, 0.5]),
    ];
    for (i, (greedy_dist, mes_dist)) in distributions.iter().enumerate() {
        let election_id = db
            .insert_election(&NewElection {
                name: format!("e{}", i),
                budget: 1.0,
                ..Default::default()
            })
            .await
            .unwrap();
        let greedy_result = db.insert_rule_result(election_id, "greedy_cost").await.unwrap();
        let mes_result = db.insert_rule_result(election_id, "mes").await.unwrap();
        db.set_rule_result_data_property(
            greedy_result,
            "aggregated_norm_cost_satisfaction",
            &serde_json::to_string(greedy_dist).unwrap(),
        )
        .await
        .unwrap();
        db.set_rule_result_data_property(
            mes_result,
            "aggregated_norm_cost_satisfaction",
            &serde_json::to_string(mes_dist).unwrap(),
        )
        .await
        .unwrap();
        db.set_rule_result_data_property(greedy_result, "avg_norm_cost_satisfaction", "0.5")
            .await
            .unwrap();
        db.set_rule_result_data_property(mes_result, "avg_norm_cost_satisfaction", "0.5")
            .await
            .unwrap();
    }

    let rules = vec!["mes".to_string(), "greedy_cost".to_string()];
    let result = satisfaction_histogram(&db, &rules, &ElectionFilters::new())
        .await
        .unwrap();

    assert_eq!(result.num_elections, 2);
    assert_eq!(result.data["greedy_cost"].hist_data, vec![0.25, 0.25, 0.5]);
    assert_eq!(result.data["mes"].hist_data, vec![0.5, 0.25, 0.25]);
    assert_eq!(result.data["greedy_cost"].avg, Some(0.5));
}

/// Four elections with `avg_ballot_length` i^2 - i, budgets 10^i, vote
/// counts i; approval ballots for the first two, ordinal for the rest.
async fn elections_for_histograms(db: &PbDatabase) {
    for i in 0..4i64 {
        let election_id = db
            .insert_election(&NewElection {
                name: format!("e{}", i),
                budget: 10f64.powi(i as i32),
                num_votes: i,
                ballot_type: if i < 2 { "approval" } else { "ordinal" }.to_string(),
                ..Default::default()
            })
            .await
            .unwrap();
        db.set_election_data_property(election_id, "avg_ballot_length", (i * i - i) as f64)
            .await
            .unwrap();
    }
}

#[tokio::test]
async fn metadata_property_histograms_bucket_linearly() {
    let db = PbDatabase::create_in_memory().await.unwrap();
    elections_for_histograms(&db).await;

    let result = election_property_histogram(
        &db,
        "avg_ballot_length",
        &ElectionFilters::new(),
        4,
        false,
        false,
    )
    .await
    .unwrap();

    assert_eq!(result.histogram.bins, vec![0.0, 1.5, 3.0, 4.5, 6.0]);
    assert_eq!(result.histogram.bin_midpoints, vec![0.75, 2.25, 3.75, 5.25]);
    assert_eq!(
        result.histogram.values,
        HistogramValues::Flat(vec![2, 1, 0, 1])
    );
    assert_eq!(result.election_property.short_name, "avg_ballot_length");
}

#[tokio::test]
async fn histograms_respect_election_filters() {
    let db = PbDatabase::create_in_memory().await.unwrap();
    elections_for_histograms(&db).await;

    let result = election_property_histogram(
        &db,
        "avg_ballot_length",
        &filters(json!({"budget": {"min": 11}})),
        4,
        false,
        false,
    )
    .await
    .unwrap();

    assert_eq!(result.histogram.bins, vec![2.0, 3.0, 4.0, 5.0, 6.0]);
    assert_eq!(
        result.histogram.values,
        HistogramValues::Flat(vec![1, 0, 0, 1])
    );
}

#[tokio::test]
async fn field_histograms_support_log_scale() {
    let db = PbDatabase::create_in_memory().await.unwrap();
    elections_for_histograms(&db).await;

    let result =
        election_property_histogram(&db, "budget", &ElectionFilters::new(), 3, false, true)
            .await
            .unwrap();

    assert_eq!(result.histogram.bins.len(), 4);
    for (i, edge) in result.histogram.bins.iter().enumerate() {
        assert!((edge - 10f64.powi(i as i32)).abs() < 1e-5);
    }
    assert_eq!(result.histogram.bin_midpoints.len(), 3);
    for (i, midpoint) in result.histogram.bin_midpoints.iter().enumerate() {
        assert!((midpoint - 10f64.powi(i as i32) * 10f64.sqrt()).abs() < 1e-5);
    }
    assert_eq!(
        result.histogram.values,
        HistogramValues::Flat(vec![1, 1, 2])
    );
}

#[tokio::test]
async fn ballot_type_breakdown_shares_global_bucket_edges() {
    let db = PbDatabase::create_in_memory().await.unwrap();
    elections_for_histograms(&db).await;

    let result = election_property_histogram(
        &db,
        "avg_ballot_length",
        &ElectionFilters::new(),
        4,
        true,
        false,
    )
    .await
    .unwrap();

    assert_eq!(result.histogram.bins, vec![0.0, 1.5, 3.0, 4.5, 6.0]);
    match &result.histogram.values {
        HistogramValues::ByCategory(by_type) => {
            assert_eq!(by_type["approval"], vec![2, 0, 0, 0]);
            assert_eq!(by_type["ordinal"], vec![0, 1, 0, 1]);
            assert_eq!(by_type["cumulative"], vec![0, 0, 0, 0]);
            assert_eq!(by_type["cardinal"], vec![0, 0, 0, 0]);
        }
        other => panic!("expected per-ballot-type counts, got {:?}", other),
    }

    let result = election_property_histogram(
        &db,
        "num_votes",
        &ElectionFilters::new(),
        3,
        true,
        false,
    )
    .await
    .unwrap();

    assert_eq!(result.histogram.bins, vec![0.0, 1.0, 2.0, 3.0]);
    assert_eq!(result.histogram.bin_midpoints, vec![0.5, 1.5, 2.5]);
    match &result.histogram.values {
        HistogramValues::ByCategory(by_type) => {
            assert_eq!(by_type["approval"], vec![1, 1, 0]);
            assert_eq!(by_type["ordinal"], vec![0, 0, 2]);
        }
        other => panic!("expected per-ballot-type counts, got {:?}", other),
    }
}

#[tokio::test]
async fn histograms_reject_unknown_and_non_numeric_properties() {
    let db = PbDatabase::create_in_memory().await.unwrap();
    elections_for_histograms(&db).await;

    match election_property_histogram(&db, "no_such", &ElectionFilters::new(), 4, false, false)
        .await
    {
        Err(AnalyticsError::UnknownFilterProperty { property }) => {
            assert_eq!(property, "no_such")
        }
        other => panic!("expected UnknownFilterProperty, got {:?}", other.map(|_| ())),
    }

    match election_property_histogram(&db, "name", &ElectionFilters::new(), 4, false, false).await
    {
        Err(AnalyticsError::UnsupportedPropertyType { property, .. }) => {
            assert_eq!(property, "name")
        }
        other => panic!(
            "expected UnsupportedPropertyType, got {:?}",
            other.map(|_| ())
        ),
    }
}

async fn categorized_election(db: &PbDatabase) -> i64 {
    let election_id = db
        .insert_election(&NewElection {
            name: "categorized".to_string(),
            budget: 10.0,
            num_votes: 10,
            has_categories: true,
            ..Default::default()
        })
        .await
        .unwrap();

    let mut category_ids = Vec::new();
    for name in ["0", "1"] {
        category_ids.push(db.insert_category(election_id, name).await.unwrap());
    }

    // costs 4, 3, 2, 1; memberships {0}, {0,1}, {1}, {1}
    let mut project_ids = Vec::new();
    for i in 0..4i64 {
        let project_id = db
            .insert_project(election_id, &i.to_string(), (4 - i) as f64, "")
            .await
            .unwrap();
        let memberships: &[i64] = match i {
            0 => &category_ids[0..1],
            1 => &category_ids[0..2],
            _ => &category_ids[1..2],
        };
        for category_id in memberships {
            db.link_project_category(project_id, *category_id)
                .await
                .unwrap();
        }
        project_ids.push(project_id);
    }

    // one voter per project, approving only that project
    for (i, project_id) in project_ids.iter().enumerate() {
        let voter_id = db
            .insert_voter(election_id, &i.to_string())
            .await
            .unwrap();
        db.insert_preference(voter_id, *project_id, 1.0).await.unwrap();
    }

    for (rule, selected) in [
        ("rule1", &project_ids[0..3]),
        ("rule2", &project_ids[2..4]),
        ("rule3", &project_ids[0..0]),
    ] {
        sqlx::query("INSERT INTO rules (abbreviation, name, order_priority) VALUES (?, ?, 100)")
            .bind(rule)
            .bind(rule)
            .execute(db.pool())
            .await
            .unwrap();
        let rule_result_id = db.insert_rule_result(election_id, rule).await.unwrap();
        for project_id in selected.iter() {
            db.add_selected_project(rule_result_id, *project_id)
                .await
                .unwrap();
        }
    }

    election_id
}

#[tokio::test]
async fn category_proportions_normalize_vote_and_result_shares() {
    let db = PbDatabase::create_in_memory().await.unwrap();
    let election_id = categorized_election(&db).await;

    let rules: Vec<String> = ["rule1", "rule2", "rule3"]
        .iter()
        .map(|r| r.to_string())
        .collect();
    let proportions = category_proportions(&db, election_id, &rules).await.unwrap();

    assert_eq!(proportions.category_names, vec!["0", "1"]);
    assert_close(proportions.vote_cost_shares[0], 7.0 / 13.0);
    assert_close(proportions.vote_cost_shares[1], 6.0 / 13.0);
    assert_close(proportions.vote_cost_shares.iter().sum::<f64>(), 1.0);

    assert_close(proportions.result_cost_shares["rule1"][0], 7.0 / 12.0);
    assert_close(proportions.result_cost_shares["rule1"][1], 5.0 / 12.0);
    assert_eq!(proportions.result_cost_shares["rule2"], vec![0.0, 1.0]);
    // rule3 selected nothing: all-zero shares, not NaN
    assert_eq!(proportions.result_cost_shares["rule3"], vec![0.0, 0.0]);
}

#[tokio::test]
async fn category_proportions_error_paths() {
    let db = PbDatabase::create_in_memory().await.unwrap();
    let rules = vec!["rule1".to_string()];

    match category_proportions(&db, 8, &rules).await {
        Err(AnalyticsError::ElectionNotFound { id }) => assert_eq!(id, 8),
        other => panic!("expected ElectionNotFound, got {:?}", other.map(|_| ())),
    }

    // categorized election without any cost-weighted votes
    let empty_id = db
        .insert_election(&NewElection {
            name: "no votes".to_string(),
            budget: 10.0,
            has_categories: true,
            ..Default::default()
        })
        .await
        .unwrap();
    match category_proportions(&db, empty_id, &rules).await {
        Err(AnalyticsError::NoPositiveCostVotes { election }) => {
            assert_eq!(election, empty_id)
        }
        other => panic!("expected NoPositiveCostVotes, got {:?}", other.map(|_| ())),
    }

    // elections without categories yield empty shares, not an error
    let uncategorized_id = db
        .insert_election(&NewElection {
            name: "no categories".to_string(),
            budget: 10.0,
            ..Default::default()
        })
        .await
        .unwrap();
    let proportions = category_proportions(&db, uncategorized_id, &rules)
        .await
        .unwrap();
    assert!(proportions.category_names.is_empty());
    assert!(proportions.vote_cost_shares.is_empty());
    assert_eq!(proportions.result_cost_shares["rule1"], Vec::<f64>::new());
}

fn snapshot(value: serde_json::Value) -> ElectionSnapshot {
    serde_json::from_value(value).unwrap()
}

#[tokio::test]
async fn ingestion_round_trip_populates_the_domain_model() {
    let db = PbDatabase::create_in_memory().await.unwrap();
    let ingester = ElectionIngester::new(db.clone());

    let parsed = snapshot(json!({
        "unit": "Test City",
        "country": "PL",
        "budget": 10.0,
        "vote_type": "approval",
        "date_begin": "2023-05-01",
        "metadata": {"max_length": 3.0, "bogus_key": 1.0},
        "projects": [
            {"project_id": "p1", "cost": 6.0, "name": "Park", "categories": ["green"]},
            {"project_id": "p2", "cost": 5.0, "name": "Bike lane"},
        ],
        "voters": [
            {"voter_id": "v1", "gender": "f", "preferences": [{"project_id": "p1"}]},
            {"voter_id": "v2", "neighborhood": "north",
             "preferences": [{"project_id": "p1"}, {"project_id": "p2"}]},
        ],
    }));

    let summary = ingester
        .ingest(&parsed, Some("test_city.pb"), 123.0)
        .await
        .unwrap();
    assert_eq!(summary.num_projects, 2);
    assert_eq!(summary.num_votes, 2);
    assert_eq!(summary.num_preferences, 3);

    let election = db
        .get_election(summary.election_id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(election.name, "Test City, 2023-05");
    assert!(election.has_categories);
    assert!(election.has_neighborhoods);
    assert!(!election.has_voting_methods);
    // total project cost exceeds the budget
    assert!(!election.is_trivial);
    assert_eq!(db.count_voters(summary.election_id).await.unwrap(), 2);

    let genders: Vec<String> =
        sqlx::query_scalar("SELECT gender FROM voters WHERE election_id = ? ORDER BY voter_id")
            .bind(summary.election_id)
            .fetch_all(db.pool())
            .await
            .unwrap();
    assert_eq!(genders, vec!["Female".to_string(), "Unknown".to_string()]);

    // the known metadata key is attached, the bogus one is skipped
    let attached: Vec<(String, f64)> = sqlx::query_as(
        "SELECT metadata, value FROM election_data_properties WHERE election_id = ?",
    )
    .bind(summary.election_id)
    .fetch_all(db.pool())
    .await
    .unwrap();
    assert_eq!(attached, vec![("max_length".to_string(), 3.0)]);

    // approval preferences always carry strength 1
    let strengths: Vec<f64> = sqlx::query_scalar(
        "SELECT pi.preference_strength FROM preference_infos pi
         JOIN voters v ON v.id = pi.voter_id WHERE v.election_id = ?",
    )
    .bind(summary.election_id)
    .fetch_all(db.pool())
    .await
    .unwrap();
    assert!(strengths.iter().all(|s| *s == 1.0));

    // re-ingesting the same file replaces the election
    let replaced = ingester
        .ingest(&parsed, Some("test_city.pb"), 123.0)
        .await
        .unwrap();
    assert_ne!(replaced.election_id, summary.election_id);
    let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM elections")
        .fetch_one(db.pool())
        .await
        .unwrap();
    assert_eq!(count, 1);
}

#[tokio::test]
async fn audit_detects_and_removes_incomplete_elections() {
    let db = PbDatabase::create_in_memory().await.unwrap();
    let election_id = db
        .insert_election(&NewElection {
            name: "broken".to_string(),
            num_votes: 5,
            ..Default::default()
        })
        .await
        .unwrap();
    db.insert_election(&NewElection {
        name: "fine".to_string(),
        num_votes: 0,
        ..Default::default()
    })
    .await
    .unwrap();

    let findings = audit_elections(&db, false).await.unwrap();
    assert_eq!(findings.len(), 1);
    assert_eq!(findings[0].election_id, election_id);
    assert_eq!(findings[0].num_votes, 5);
    assert_eq!(findings[0].num_voters, 0);

    audit_elections(&db, true).await.unwrap();
    assert!(db.get_election(election_id).await.unwrap().is_none());
}

#[tokio::test]
async fn purge_removes_only_elections_past_the_retention_window() {
    let db = PbDatabase::create_in_memory().await.unwrap();
    let stale_id = db
        .insert_election(&NewElection {
            name: "stale".to_string(),
            modification_date: "2020-01-01 00:00:00".to_string(),
            ..Default::default()
        })
        .await
        .unwrap();
    let fresh_id = db
        .insert_election(&NewElection {
            name: "fresh".to_string(),
            ..Default::default()
        })
        .await
        .unwrap();

    let removed = purge_stale_elections(&db, 2).await.unwrap();
    assert_eq!(removed, vec!["stale".to_string()]);
    assert!(db.get_election(stale_id).await.unwrap().is_none());
    assert!(db.get_election(fresh_id).await.unwrap().is_some());
}

#[tokio::test]
async fn listings_expose_reference_data_and_details() {
    let db = PbDatabase::create_in_memory().await.unwrap();
    elections_with_rule_properties(&db).await;

    // only ballot types in use are listed
    let ballot_types = ballot_type_list(&db).await.unwrap();
    let names: Vec<&str> = ballot_types.iter().map(|b| b.name.as_str()).collect();
    assert_eq!(names, vec!["approval"]);

    let requested = vec![
        "budget".to_string(),
        "avg_ballot_length".to_string(),
        "unknown_prop".to_string(),
    ];
    let details = election_details(&db, Some(&requested), None, &ElectionFilters::new())
        .await
        .unwrap();
    // the unknown property is skipped, the rest are described
    assert_eq!(details.properties.len(), 2);
    assert_eq!(details.elections.len(), 3);
    for (_, properties) in &details.elections {
        assert!(properties.contains_key("budget"));
        assert!(properties.contains_key("avg_ballot_length"));
    }

    let families = rule_family_list(&db).await.unwrap();
    assert_eq!(families.len(), 4);
    assert_eq!(families[0].abbreviation, "greedy");
    assert_eq!(families[0].elements.len(), 3);
    assert!(families[0]
        .elements
        .iter()
        .any(|rule| rule.abbreviation == "greedy_cost"));

    let requested = vec!["avg_cost_satisfaction".to_string()];
    let properties = rule_result_property_list(&db, Some(&requested)).await.unwrap();
    assert_eq!(properties.len(), 1);
    assert_eq!(properties[0].inner_type, "float");
    assert_eq!(properties[0].range, "0-");
}

#[tokio::test]
async fn date_filters_compare_inclusively() {
    let db = PbDatabase::create_in_memory().await.unwrap();
    let dates = [
        Some(chrono::NaiveDate::from_ymd_opt(2020, 1, 1).unwrap()),
        Some(chrono::NaiveDate::from_ymd_opt(2021, 6, 15).unwrap()),
        None,
    ];
    for (i, date_begin) in dates.iter().enumerate() {
        db.insert_election(&NewElection {
            name: format!("e{}", i),
            date_begin: *date_begin,
            ..Default::default()
        })
        .await
        .unwrap();
    }

    let narrowed = filter_elections(&db, &filters(json!({"date_begin": {"min": "2021-01-01"}})))
        .await
        .unwrap();
    assert_eq!(narrowed.len(), 1);
    assert_eq!(narrowed[0].name, "e1");

    let narrowed = filter_elections(
        &db,
        &filters(json!({"date_begin": {"min": "2020-01-01", "max": "2021-06-15"}})),
    )
    .await
    .unwrap();
    assert_eq!(narrowed.len(), 2);
}

#[tokio::test]
async fn project_lists_include_memberships_and_stored_rules() {
    let db = PbDatabase::create_in_memory().await.unwrap();
    let election_id = categorized_election(&db).await;

    let list = project_list(&db, election_id).await.unwrap();
    assert_eq!(list.projects.len(), 4);
    assert_eq!(list.projects[1].categories, vec!["0", "1"]);
    assert_eq!(list.rules_with_results.len(), 3);

    match project_list(&db, 999).await {
        Err(AnalyticsError::ElectionNotFound { id }) => assert_eq!(id, 999),
        other => panic!("expected ElectionNotFound, got {:?}", other.map(|_| ())),
    }
}

/// Toy solver for exercising the collaborator seam: funds the cheapest
/// projects first until the budget runs out.
struct CheapestFirst;

impl RuleSolver for CheapestFirst {
    fn abbreviation(&self) -> &str {
        "greedy_cost"
    }

    fn run_rule(
        &self,
        instance: &PbInstance,
        _profile: &PbProfile,
        _params: &RuleParams,
    ) -> Vec<i64> {
        let mut projects: Vec<_> = instance.projects.iter().collect();
        projects.sort_by(|a, b| a.cost.partial_cmp(&b.cost).unwrap());
        let mut remaining = instance.budget;
        let mut selected = Vec::new();
        for project in projects {
            if project.cost <= remaining {
                remaining -= project.cost;
                selected.push(project.id);
            }
        }
        selected
    }
}

struct SelectedCount;

impl SatisfactionMeasure for SelectedCount {
    fn short_name(&self) -> &str {
        "avg_card_satisfaction"
    }

    fn compute(
        &self,
        _instance: &PbInstance,
        _profile: &PbProfile,
        allocation: &[i64],
        _params: &RuleParams,
    ) -> PropertyValue {
        PropertyValue::Float(allocation.len() as f64)
    }
}

#[tokio::test]
async fn rule_results_are_stored_through_the_solver_seam() {
    let db = PbDatabase::create_in_memory().await.unwrap();
    let election_id = categorized_election(&db).await;

    let measures: [&dyn SatisfactionMeasure; 1] = [&SelectedCount];
    let stored = store_rule_result(
        &db,
        election_id,
        &CheapestFirst,
        &measures,
        &RuleParams::default(),
    )
    .await
    .unwrap();
    let rule_result_id = stored.expect("greedy_cost applies to approval ballots");

    // costs 4+3+2+1 fit the budget of 10, everything is selected
    let selected: i64 =
        sqlx::query_scalar("SELECT COUNT(*) FROM rule_result_selected WHERE rule_result_id = ?")
            .bind(rule_result_id)
            .fetch_one(db.pool())
            .await
            .unwrap();
    assert_eq!(selected, 4);

    let value: String = sqlx::query_scalar(
        "SELECT value FROM rule_result_data_properties WHERE rule_result_id = ? AND metadata = ?",
    )
    .bind(rule_result_id)
    .bind("avg_card_satisfaction")
    .fetch_one(db.pool())
    .await
    .unwrap();
    assert_eq!(value, "4");

    // rules are skipped on ballot types they do not apply to
    let ordinal_id = db
        .insert_election(&NewElection {
            name: "ordinal".to_string(),
            ballot_type: "ordinal".to_string(),
            ..Default::default()
        })
        .await
        .unwrap();
    let skipped = store_rule_result(
        &db,
        ordinal_id,
        &CheapestFirst,
        &[],
        &RuleParams::default(),
    )
    .await
    .unwrap();
    assert!(skipped.is_none());
}
