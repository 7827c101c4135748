/// Core domain vocabulary: ballot formats, voter demographics, the typed
/// property catalogs and the static election field registry.
use lazy_static::lazy_static;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// The four supported ballot formats. Reference rows in the `ballot_types`
/// table mirror these, created once at initialization.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BallotFormat {
    Approval,
    Ordinal,
    Cumulative,
    Cardinal,
}

impl BallotFormat {
    pub const ALL: [BallotFormat; 4] = [
        BallotFormat::Approval,
        BallotFormat::Ordinal,
        BallotFormat::Cumulative,
        BallotFormat::Cardinal,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            BallotFormat::Approval => "approval",
            BallotFormat::Ordinal => "ordinal",
            BallotFormat::Cumulative => "cumulative",
            BallotFormat::Cardinal => "cardinal",
        }
    }

    /// Resolve a vote-type string from an election file, accepting the known
    /// aliases ("scoring" ballots are cardinal ballots).
    pub fn from_alias(alias: &str) -> Option<BallotFormat> {
        match alias.to_lowercase().as_str() {
            "approval" => Some(BallotFormat::Approval),
            "ordinal" => Some(BallotFormat::Ordinal),
            "cumulative" => Some(BallotFormat::Cumulative),
            "cardinal" | "scoring" => Some(BallotFormat::Cardinal),
            _ => None,
        }
    }
}

impl std::fmt::Display for BallotFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Normalized voter gender.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Gender {
    Male,
    Female,
    Other,
    Unknown,
}

impl Gender {
    pub fn as_str(&self) -> &'static str {
        match self {
            Gender::Male => "Male",
            Gender::Female => "Female",
            Gender::Other => "Other",
            Gender::Unknown => "Unknown",
        }
    }
}

lazy_static! {
    // Alias spellings observed in election files ("k" shows up in Polish data).
    static ref GENDER_ALIASES: HashMap<&'static str, Gender> = {
        let mut m = HashMap::new();
        m.insert("male", Gender::Male);
        m.insert("m", Gender::Male);
        m.insert("female", Gender::Female);
        m.insert("f", Gender::Female);
        m.insert("k", Gender::Female);
        m.insert("other", Gender::Other);
        m.insert("o", Gender::Other);
        m
    };
}

impl Gender {
    /// Normalize a raw gender string through the alias table; anything
    /// unrecognized (including empty) maps to `Unknown`.
    pub fn normalize(raw: &str) -> Gender {
        GENDER_ALIASES
            .get(raw.trim().to_lowercase().as_str())
            .copied()
            .unwrap_or(Gender::Unknown)
    }
}

/// Primitive type of a metadata catalog entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum InnerType {
    Int,
    Float,
    FloatList,
}

impl InnerType {
    pub fn as_str(&self) -> &'static str {
        match self {
            InnerType::Int => "int",
            InnerType::Float => "float",
            InnerType::FloatList => "list[float]",
        }
    }

    pub fn from_str(s: &str) -> Option<InnerType> {
        match s {
            "int" => Some(InnerType::Int),
            "float" => Some(InnerType::Float),
            "list[float]" => Some(InnerType::FloatList),
            _ => None,
        }
    }
}

/// A parsed metadata value. Data properties are persisted as text/float and
/// parsed according to the catalog entry's declared inner type when read.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum PropertyValue {
    Int(i64),
    Float(f64),
    FloatList(Vec<f64>),
}

impl PropertyValue {
    /// Parse a stored text value according to the declared inner type.
    /// `list[float]` values are JSON-encoded arrays.
    pub fn parse(raw: &str, inner_type: InnerType) -> Result<PropertyValue, String> {
        match inner_type {
            InnerType::Int => raw
                .parse::<f64>()
                .map(|v| PropertyValue::Int(v.round() as i64))
                .map_err(|e| format!("invalid int value {:?}: {}", raw, e)),
            InnerType::Float => raw
                .parse::<f64>()
                .map(PropertyValue::Float)
                .map_err(|e| format!("invalid float value {:?}: {}", raw, e)),
            InnerType::FloatList => serde_json::from_str::<Vec<f64>>(raw)
                .map(PropertyValue::FloatList)
                .map_err(|e| format!("invalid list[float] value {:?}: {}", raw, e)),
        }
    }

    pub fn from_float(value: f64, inner_type: InnerType) -> PropertyValue {
        match inner_type {
            InnerType::Int => PropertyValue::Int(value.round() as i64),
            _ => PropertyValue::Float(value),
        }
    }

    /// Render the value the way data property tables store it.
    pub fn to_stored_string(&self) -> String {
        match self {
            PropertyValue::Int(v) => v.to_string(),
            PropertyValue::Float(v) => v.to_string(),
            PropertyValue::FloatList(v) => {
                serde_json::to_string(v).unwrap_or_else(|_| "[]".to_string())
            }
        }
    }
}

/// Declared primitive type of a public election field, resolved once at
/// registration time. Filter constraints dispatch on this.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldType {
    Int,
    Float,
    Date,
    Bool,
    Text,
    Reference,
}

impl FieldType {
    /// Type name reported to the presentation layer. Reference fields are
    /// exposed as plain strings there.
    pub fn as_str(&self) -> &'static str {
        match self {
            FieldType::Int => "int",
            FieldType::Float => "float",
            FieldType::Date => "date",
            FieldType::Bool => "bool",
            FieldType::Text | FieldType::Reference => "str",
        }
    }
}

/// One publicly filterable election field.
pub struct ElectionField {
    pub name: &'static str,
    pub column: &'static str,
    pub field_type: FieldType,
    pub label: &'static str,
    pub help: &'static str,
}

/// The public election fields, in presentation order. Everything else on the
/// elections table is internal.
pub const ELECTION_FIELDS: &[ElectionField] = &[
    ElectionField {
        name: "name",
        column: "name",
        field_type: FieldType::Text,
        label: "name",
        help: "name of the election",
    },
    ElectionField {
        name: "description",
        column: "description",
        field_type: FieldType::Text,
        label: "description",
        help: "description of the election",
    },
    ElectionField {
        name: "country",
        column: "country",
        field_type: FieldType::Text,
        label: "country",
        help: "country the election took place in",
    },
    ElectionField {
        name: "unit",
        column: "unit",
        field_type: FieldType::Text,
        label: "unit",
        help: "name of the municipality, region, organization, etc.",
    },
    ElectionField {
        name: "subunit",
        column: "subunit",
        field_type: FieldType::Text,
        label: "subunit",
        help: "name of the sub-jurisdiction",
    },
    ElectionField {
        name: "budget",
        column: "budget",
        field_type: FieldType::Float,
        label: "budget",
        help: "maximum budget to spend",
    },
    ElectionField {
        name: "num_projects",
        column: "num_projects",
        field_type: FieldType::Int,
        label: "number of projects",
        help: "number of projects in the election",
    },
    ElectionField {
        name: "num_votes",
        column: "num_votes",
        field_type: FieldType::Int,
        label: "number of votes",
        help: "number of submitted ballots",
    },
    ElectionField {
        name: "ballot_type",
        column: "ballot_type",
        field_type: FieldType::Reference,
        label: "ballot type",
        help: "format of the submitted ballots",
    },
    ElectionField {
        name: "rule",
        column: "rule",
        field_type: FieldType::Reference,
        label: "rule applied",
        help: "the rule that was applied in the actual election",
    },
    ElectionField {
        name: "date_begin",
        column: "date_begin",
        field_type: FieldType::Date,
        label: "start date",
        help: "start date of the voting process",
    },
    ElectionField {
        name: "date_end",
        column: "date_end",
        field_type: FieldType::Date,
        label: "end date",
        help: "end date of the voting process",
    },
    ElectionField {
        name: "has_categories",
        column: "has_categories",
        field_type: FieldType::Bool,
        label: "project categories",
        help: "each project is assigned one or more project categories",
    },
    ElectionField {
        name: "has_targets",
        column: "has_targets",
        field_type: FieldType::Bool,
        label: "project target groups",
        help: "each project is assigned one or more target groups",
    },
    ElectionField {
        name: "has_neighborhoods",
        column: "has_neighborhoods",
        field_type: FieldType::Bool,
        label: "neighborhoods",
        help: "the voters are divided into neighborhoods",
    },
    ElectionField {
        name: "has_voting_methods",
        column: "has_voting_methods",
        field_type: FieldType::Bool,
        label: "voting methods",
        help: "the voting method (e.g. online or in person) is recorded for each vote",
    },
];

/// Look up a public election field by name.
pub fn election_field(name: &str) -> Option<&'static ElectionField> {
    ELECTION_FIELDS.iter().find(|f| f.name == name)
}
