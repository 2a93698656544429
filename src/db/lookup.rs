//! Categorical lookup tables shared by both backends.
//!
//! Each table maps a categorical value to a stable small integer id,
//! created lazily on first sight. The relational schema and the document
//! schema use the same id and value field names.

use super::DatabaseError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LookupTable {
    Sex,
    BloodPressure,
    Cholesterol,
}

impl LookupTable {
    pub const ALL: [LookupTable; 3] = [
        LookupTable::Sex,
        LookupTable::BloodPressure,
        LookupTable::Cholesterol,
    ];

    /// Relational table name.
    pub fn table(&self) -> &'static str {
        match self {
            Self::Sex => "sexes",
            Self::BloodPressure => "blood_pressures",
            Self::Cholesterol => "cholesterols",
        }
    }

    /// Document collection name.
    pub fn collection(&self) -> &'static str {
        match self {
            Self::Sex => "Sexes",
            Self::BloodPressure => "BloodPressures",
            Self::Cholesterol => "Cholesterols",
        }
    }

    pub fn id_field(&self) -> &'static str {
        match self {
            Self::Sex => "sex_id",
            Self::BloodPressure => "bp_id",
            Self::Cholesterol => "cholesterol_id",
        }
    }

    pub fn value_field(&self) -> &'static str {
        match self {
            Self::Sex => "sex_name",
            Self::BloodPressure => "bp_level",
            Self::Cholesterol => "cholesterol_level",
        }
    }
}

/// `resolve(table, value) -> id`: return the existing id for `value`, or
/// create an entry and return its fresh id.
pub trait LookupResolver {
    fn resolve(&self, table: LookupTable, value: &str) -> Result<i64, DatabaseError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn field_names_line_up_per_table() {
        assert_eq!(LookupTable::Sex.id_field(), "sex_id");
        assert_eq!(LookupTable::BloodPressure.value_field(), "bp_level");
        assert_eq!(LookupTable::Cholesterol.collection(), "Cholesterols");
        assert_eq!(LookupTable::Cholesterol.table(), "cholesterols");
    }
}
