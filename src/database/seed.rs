/// Reference data shared by all elections: ballot types, the rule catalog and
/// both metadata catalogs. Idempotent; run once per database at init.
use crate::database::Result;
use sqlx::SqlitePool;

const ALL: &[&str] = &["approval", "ordinal", "cumulative", "cardinal"];
const APP: &[&str] = &["approval"];
const CUM: &[&str] = &["cumulative"];
const CUM_CARD: &[&str] = &["cumulative", "cardinal"];
const CARD: &[&str] = &["cardinal"];
const APP_CUM_CARD: &[&str] = &["approval", "cumulative", "cardinal"];

struct MetadataSeed {
    short_name: &'static str,
    name: &'static str,
    description: &'static str,
    inner_type: &'static str,
    applies_to: &'static [&'static str],
}

struct RuleResultMetadataSeed {
    short_name: &'static str,
    name: &'static str,
    description: &'static str,
    inner_type: &'static str,
    range: &'static str,
    applies_to: &'static [&'static str],
}

struct RuleSeed {
    abbreviation: &'static str,
    name: &'static str,
    description: &'static str,
    family: &'static str,
    applies_to: &'static [&'static str],
}

pub async fn initialize_reference_data(pool: &SqlitePool) -> Result<()> {
    initialize_ballot_types(pool).await?;
    initialize_election_metadata(pool).await?;
    initialize_rules(pool).await?;
    initialize_rule_result_metadata(pool).await?;
    Ok(())
}

async fn initialize_ballot_types(pool: &SqlitePool) -> Result<()> {
    let ballot_types = [
        ("approval", "approval ballots", 1i64),
        ("ordinal", "ordinal ballots", 2),
        ("cumulative", "cumulative ballots", 3),
        ("cardinal", "cardinal ballots", 4),
    ];

    for (name, description, order_priority) in ballot_types.iter() {
        sqlx::query(
            "INSERT INTO ballot_types (name, description, order_priority)
             VALUES (?, ?, ?)
             ON CONFLICT(name) DO UPDATE SET
                description = excluded.description,
                order_priority = excluded.order_priority",
        )
        .bind(name)
        .bind(description)
        .bind(order_priority)
        .execute(pool)
        .await?;
    }

    Ok(())
}

async fn initialize_election_metadata(pool: &SqlitePool) -> Result<()> {
    let entries = [
        // ballot legality bounds
        MetadataSeed {
            short_name: "max_length",
            name: "maximum allowed ballot length",
            description: "maximum number of projects a voter can approve",
            inner_type: "int",
            applies_to: ALL,
        },
        MetadataSeed {
            short_name: "min_length",
            name: "minimum allowed ballot length",
            description: "minimum number of projects a voter can approve",
            inner_type: "int",
            applies_to: ALL,
        },
        MetadataSeed {
            short_name: "max_sum_cost",
            name: "maximum allowed ballot cost",
            description: "maximum cost restriction on the ballots",
            inner_type: "float",
            applies_to: APP,
        },
        MetadataSeed {
            short_name: "min_sum_cost",
            name: "minimum allowed ballot cost",
            description: "minimum cost restriction on the ballots",
            inner_type: "float",
            applies_to: APP,
        },
        MetadataSeed {
            short_name: "max_sum_points",
            name: "maximum allowed total points",
            description: "upper restriction on the total points each voter can give",
            inner_type: "float",
            applies_to: CUM,
        },
        MetadataSeed {
            short_name: "min_sum_points",
            name: "minimum allowed total points",
            description: "lower restriction on the total points each voter can give",
            inner_type: "float",
            applies_to: CUM,
        },
        MetadataSeed {
            short_name: "max_points",
            name: "maximum allowed points",
            description: "upper restriction on the number of points a voter can give to a single project",
            inner_type: "float",
            applies_to: CUM_CARD,
        },
        MetadataSeed {
            short_name: "min_points",
            name: "minimum allowed points",
            description: "lower restriction on the number of points a voter can give to a single project",
            inner_type: "float",
            applies_to: CUM_CARD,
        },
        MetadataSeed {
            short_name: "default_score",
            name: "default score",
            description: "default score of a project in a ballot",
            inner_type: "float",
            applies_to: CARD,
        },
        // derived election statistics
        MetadataSeed {
            short_name: "sum_proj_cost",
            name: "total cost of all projects",
            description: "total sum of the costs of all projects",
            inner_type: "float",
            applies_to: ALL,
        },
        MetadataSeed {
            short_name: "funding_scarcity",
            name: "funding scarcity",
            description: "ratio of the total project cost to the budget limit",
            inner_type: "float",
            applies_to: ALL,
        },
        MetadataSeed {
            short_name: "avg_project_cost",
            name: "average project cost",
            description: "average cost of all the projects",
            inner_type: "float",
            applies_to: ALL,
        },
        MetadataSeed {
            short_name: "median_project_cost",
            name: "median project cost",
            description: "median cost of all the projects",
            inner_type: "float",
            applies_to: ALL,
        },
        MetadataSeed {
            short_name: "std_dev_project_cost",
            name: "standard deviation of project costs",
            description: "standard deviation of the cost of all the projects",
            inner_type: "float",
            applies_to: ALL,
        },
        MetadataSeed {
            short_name: "avg_ballot_length",
            name: "average ballot length",
            description: "average length of all submitted ballots",
            inner_type: "float",
            applies_to: ALL,
        },
        MetadataSeed {
            short_name: "median_ballot_length",
            name: "median ballot length",
            description: "median length of all submitted ballots",
            inner_type: "int",
            applies_to: ALL,
        },
        MetadataSeed {
            short_name: "avg_ballot_cost",
            name: "average ballot cost",
            description: "average cost of all submitted ballots",
            inner_type: "float",
            applies_to: APP,
        },
        MetadataSeed {
            short_name: "median_ballot_cost",
            name: "median ballot cost",
            description: "median cost of all submitted ballots",
            inner_type: "float",
            applies_to: APP,
        },
        MetadataSeed {
            short_name: "avg_approval_score",
            name: "average approval score",
            description: "average number of approvals over all the projects",
            inner_type: "float",
            applies_to: APP,
        },
        MetadataSeed {
            short_name: "median_approval_score",
            name: "median approval score",
            description: "median number of approvals over all the projects",
            inner_type: "int",
            applies_to: APP,
        },
        MetadataSeed {
            short_name: "avg_total_score",
            name: "average total project score",
            description: "average total score of all the projects",
            inner_type: "float",
            applies_to: CUM_CARD,
        },
        MetadataSeed {
            short_name: "median_total_score",
            name: "median total project score",
            description: "median total score of all the projects",
            inner_type: "float",
            applies_to: CUM_CARD,
        },
    ];

    for (priority, entry) in entries.iter().enumerate() {
        sqlx::query(
            "INSERT INTO election_metadata (short_name, name, description, inner_type, order_priority)
             VALUES (?, ?, ?, ?, ?)
             ON CONFLICT(short_name) DO UPDATE SET
                name = excluded.name,
                description = excluded.description,
                inner_type = excluded.inner_type,
                order_priority = excluded.order_priority",
        )
        .bind(entry.short_name)
        .bind(entry.name)
        .bind(entry.description)
        .bind(entry.inner_type)
        .bind((priority + 1) as i64)
        .execute(pool)
        .await?;

        for ballot_type in entry.applies_to.iter() {
            sqlx::query(
                "INSERT OR IGNORE INTO election_metadata_applies_to (metadata, ballot_type)
                 VALUES (?, ?)",
            )
            .bind(entry.short_name)
            .bind(ballot_type)
            .execute(pool)
            .await?;
        }
    }

    Ok(())
}

async fn initialize_rules(pool: &SqlitePool) -> Result<()> {
    let families = [
        ("greedy", "Greedy", "Greedy rules", 1i64),
        (
            "max_sat",
            "Satisfaction maximizer",
            "Rules maximizing some satisfaction function",
            2,
        ),
        (
            "mes",
            "Method of equal shares",
            "Method of equal shares and variations",
            3,
        ),
        ("other", "Other", "Other rules", 4),
    ];

    for (abbreviation, name, description, order_priority) in families.iter() {
        sqlx::query(
            "INSERT INTO rule_families (abbreviation, name, description, order_priority)
             VALUES (?, ?, ?, ?)
             ON CONFLICT(abbreviation) DO UPDATE SET
                name = excluded.name,
                description = excluded.description,
                order_priority = excluded.order_priority",
        )
        .bind(abbreviation)
        .bind(name)
        .bind(description)
        .bind(order_priority)
        .execute(pool)
        .await?;
    }

    let rules = [
        RuleSeed {
            abbreviation: "greedy_card",
            name: "Greedy (card)",
            description: "Greedily choose the project with the best cost to approval ratio",
            family: "greedy",
            applies_to: APP_CUM_CARD,
        },
        RuleSeed {
            abbreviation: "greedy_cost",
            name: "Greedy (cost)",
            description: "Greedily choose the most approved projects",
            family: "greedy",
            applies_to: APP_CUM_CARD,
        },
        RuleSeed {
            abbreviation: "greedy_cc",
            name: "Greedy (Chamberlin-Courant)",
            description: "Greedily choose the project supported by the highest number of completely unsatisfied voters",
            family: "greedy",
            applies_to: APP_CUM_CARD,
        },
        RuleSeed {
            abbreviation: "max_card",
            name: "Maximum cardinality satisfaction",
            description: "Chooses the allocation yielding the maximum total cardinality satisfaction",
            family: "max_sat",
            applies_to: APP_CUM_CARD,
        },
        RuleSeed {
            abbreviation: "max_cost",
            name: "Maximum cost satisfaction",
            description: "Chooses the allocation yielding the maximum total cost satisfaction",
            family: "max_sat",
            applies_to: APP_CUM_CARD,
        },
        RuleSeed {
            abbreviation: "mes",
            name: "Equal shares",
            description: "The method of equal shares with budget increase and greedy (cost) completion",
            family: "mes",
            applies_to: APP_CUM_CARD,
        },
        RuleSeed {
            abbreviation: "mes_uncompleted",
            name: "Equal shares (no completion)",
            description: "The method of equal shares without budget increase or completion",
            family: "mes",
            applies_to: APP_CUM_CARD,
        },
        RuleSeed {
            abbreviation: "mes_greedy_app",
            name: "Equal shares (greedy)",
            description: "The method of equal shares with greedy approval completion",
            family: "mes",
            applies_to: APP_CUM_CARD,
        },
        RuleSeed {
            abbreviation: "seq_phragmen",
            name: "Sequential Phragmen",
            description: "Sequential Phragmen rule",
            family: "other",
            applies_to: APP,
        },
    ];

    for (priority, rule) in rules.iter().enumerate() {
        sqlx::query(
            "INSERT INTO rules (abbreviation, name, description, rule_family, order_priority)
             VALUES (?, ?, ?, ?, ?)
             ON CONFLICT(abbreviation) DO UPDATE SET
                name = excluded.name,
                description = excluded.description,
                rule_family = excluded.rule_family,
                order_priority = excluded.order_priority",
        )
        .bind(rule.abbreviation)
        .bind(rule.name)
        .bind(rule.description)
        .bind(rule.family)
        .bind((priority + 1) as i64)
        .execute(pool)
        .await?;

        for ballot_type in rule.applies_to.iter() {
            sqlx::query(
                "INSERT OR IGNORE INTO rule_applies_to (rule, ballot_type) VALUES (?, ?)",
            )
            .bind(rule.abbreviation)
            .bind(ballot_type)
            .execute(pool)
            .await?;
        }
    }

    Ok(())
}

async fn initialize_rule_result_metadata(pool: &SqlitePool) -> Result<()> {
    let entries = [
        RuleResultMetadataSeed {
            short_name: "avg_card_satisfaction",
            name: "Average cardinality satisfaction",
            description: "The average number of approved projects chosen by the rule over all voters.",
            inner_type: "float",
            range: "0-",
            applies_to: APP_CUM_CARD,
        },
        RuleResultMetadataSeed {
            short_name: "avg_norm_card_satisfaction",
            name: "Average cardinality satisfaction (normalized)",
            description: "The average number of approved projects chosen by the rule over all voters, \
                          normalized by the maximum number of projects that could be chosen w.r.t. the budget limit.",
            inner_type: "float",
            range: "01",
            applies_to: APP_CUM_CARD,
        },
        RuleResultMetadataSeed {
            short_name: "avg_rel_card_satisfaction",
            name: "Average relative cardinality satisfaction",
            description: "The average relative number of approved projects chosen by the rule over all voters.",
            inner_type: "float",
            range: "01",
            applies_to: APP_CUM_CARD,
        },
        RuleResultMetadataSeed {
            short_name: "avg_cost_satisfaction",
            name: "Average cost satisfaction",
            description: "The average cost satisfaction of the voters",
            inner_type: "float",
            range: "0-",
            applies_to: APP_CUM_CARD,
        },
        RuleResultMetadataSeed {
            short_name: "avg_norm_cost_satisfaction",
            name: "Average cost satisfaction (normalized)",
            description: "The average cost satisfaction of the voters, \
                          normalized by the maximum possible budget allocation cost (w.r.t. the budget limit)",
            inner_type: "float",
            range: "01",
            applies_to: APP_CUM_CARD,
        },
        RuleResultMetadataSeed {
            short_name: "avg_rel_cost_satisfaction",
            name: "Average relative cost satisfaction",
            description: "The average relative cost satisfaction of the voters",
            inner_type: "float",
            range: "01",
            applies_to: APP_CUM_CARD,
        },
        RuleResultMetadataSeed {
            short_name: "category_proportionality",
            name: "Category proportionality",
            description: "",
            inner_type: "float",
            range: "01",
            applies_to: APP_CUM_CARD,
        },
        RuleResultMetadataSeed {
            short_name: "equality",
            name: "Equality (inverted cost gini)",
            description: "",
            inner_type: "float",
            range: "01",
            applies_to: APP_CUM_CARD,
        },
        RuleResultMetadataSeed {
            short_name: "happiness",
            name: "Happiness (%non-empty-handed)",
            description: "",
            inner_type: "float",
            range: "01",
            applies_to: APP_CUM_CARD,
        },
        RuleResultMetadataSeed {
            short_name: "median_selected_cost",
            name: "Median selected cost",
            description: "",
            inner_type: "float",
            range: "0-",
            applies_to: ALL,
        },
        RuleResultMetadataSeed {
            short_name: "aggregated_norm_cost_satisfaction",
            name: "Aggregated normalized cost satisfaction distribution",
            description: "The relative number of voters being x % satisfied for x being 0, 0-5, 5-10, ..., 95-100.",
            inner_type: "list[float]",
            range: "01",
            applies_to: APP_CUM_CARD,
        },
    ];

    for (priority, entry) in entries.iter().enumerate() {
        sqlx::query(
            "INSERT INTO rule_result_metadata (short_name, name, description, inner_type, range, order_priority)
             VALUES (?, ?, ?, ?, ?, ?)
             ON CONFLICT(short_name) DO UPDATE SET
                name = excluded.name,
                description = excluded.description,
                inner_type = excluded.inner_type,
                range = excluded.range,
                order_priority = excluded.order_priority",
        )
        .bind(entry.short_name)
        .bind(entry.name)
        .bind(entry.description)
        .bind(entry.inner_type)
        .bind(entry.range)
        .bind((priority + 1) as i64)
        .execute(pool)
        .await?;

        for ballot_type in entry.applies_to.iter() {
            sqlx::query(
                "INSERT OR IGNORE INTO rule_result_metadata_applies_to (metadata, ballot_type)
                 VALUES (?, ?)",
            )
            .bind(entry.short_name)
            .bind(ballot_type)
            .execute(pool)
            .await?;
        }
    }

    Ok(())
}
