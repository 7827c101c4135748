pub mod election;

pub use election::{
    election_field, BallotFormat, ElectionField, FieldType, Gender, InnerType, PropertyValue,
    ELECTION_FIELDS,
};
