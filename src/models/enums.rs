use crate::db::DatabaseError;
use serde::{Deserialize, Serialize};

/// Macro to generate enum with as_str + std::str::FromStr pattern.
/// The string form is also the serde wire form.
macro_rules! str_enum {
    ($name:ident { $($variant:ident => $s:literal),+ $(,)? }) => {
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
        pub enum $name {
            $(#[serde(rename = $s)] $variant),+
        }

        impl $name {
            pub fn as_str(&self) -> &'static str {
                match self {
                    $(Self::$variant => $s),+
                }
            }
        }

        impl std::str::FromStr for $name {
            type Err = DatabaseError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                match s {
                    $($s => Ok(Self::$variant)),+,
                    _ => Err(DatabaseError::InvalidEnum {
                        field: stringify!($name).into(),
                        value: s.into(),
                    }),
                }
            }
        }

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                f.write_str(self.as_str())
            }
        }
    };
}

str_enum!(Sex {
    Male => "M",
    Female => "F",
});

str_enum!(BloodPressure {
    High => "HIGH",
    Normal => "NORMAL",
    Low => "LOW",
});

str_enum!(Cholesterol {
    High => "HIGH",
    Normal => "NORMAL",
});

str_enum!(DrugType {
    DrugY => "DrugY",
    DrugA => "drugA",
    DrugB => "drugB",
    DrugC => "drugC",
    DrugX => "drugX",
});

// Which store answered a request. The labels are the ones existing
// clients and prediction logs expect.
str_enum!(BackendKind {
    Relational => "postgresql",
    Document => "mongodb",
});
