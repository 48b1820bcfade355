//! Privilege lists for the three grant targets
//!
//! Declared privileges are matched case-insensitively. `ALL` expands to the
//! full set of the target and `TEMP` is accepted for `TEMPORARY`.

use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PrivilegeTarget {
    /// `ON DATABASE`
    Database,
    /// `ON SCHEMA`
    Schema,
    /// `ON ALL TABLES IN SCHEMA` and default privileges on tables
    Tables,
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum PrivilegeError {
    #[error("unknown {target} privilege '{value}' (expected one of: {expected})")]
    Unknown {
        target: &'static str,
        value: String,
        expected: String,
    },

    #[error("empty privilege list")]
    Empty,
}

impl PrivilegeTarget {
    /// Every privilege the target accepts, in the order SQL lists them
    pub fn all(self) -> &'static [&'static str] {
        match self {
            Self::Database => &["CONNECT", "CREATE", "TEMPORARY"],
            Self::Schema => &["CREATE", "USAGE"],
            Self::Tables => &[
                "SELECT",
                "INSERT",
                "UPDATE",
                "DELETE",
                "TRUNCATE",
                "REFERENCES",
                "TRIGGER",
            ],
        }
    }

    fn label(self) -> &'static str {
        match self {
            Self::Database => "database",
            Self::Schema => "schema",
            Self::Tables => "table",
        }
    }

    /// Parse declared privileges into a sorted, deduplicated list
    pub fn parse<'a>(
        self,
        values: impl IntoIterator<Item = &'a str>,
    ) -> Result<Vec<String>, PrivilegeError> {
        let mut parsed = Vec::new();
        for value in values {
            let upper = value.trim().to_uppercase();
            match upper.as_str() {
                "ALL" | "ALL PRIVILEGES" => {
                    parsed.extend(self.all().iter().map(|p| (*p).to_string()));
                }
                "TEMP" if self == Self::Database => parsed.push("TEMPORARY".to_string()),
                other if self.all().contains(&other) => parsed.push(upper),
                _ => {
                    return Err(PrivilegeError::Unknown {
                        target: self.label(),
                        value: value.to_string(),
                        expected: self.all().join(", "),
                    });
                }
            }
        }
        if parsed.is_empty() {
            return Err(PrivilegeError::Empty);
        }
        parsed.sort();
        parsed.dedup();
        Ok(parsed)
    }

    /// Whether `privileges` is the complete set for this target
    pub fn is_all<S: AsRef<str>>(self, privileges: &[S]) -> bool {
        self.all()
            .iter()
            .all(|p| privileges.iter().any(|have| have.as_ref() == *p))
    }

    /// Render a privilege list in canonical SQL order, collapsing to `ALL`
    pub fn render<S: AsRef<str>>(self, privileges: &[S]) -> String {
        if self.is_all(privileges) {
            return "ALL".to_string();
        }
        self.all()
            .iter()
            .filter(|p| privileges.iter().any(|have| have.as_ref() == **p))
            .copied()
            .collect::<Vec<_>>()
            .join(", ")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn all_expands_to_full_set() {
        let parsed = PrivilegeTarget::Schema.parse(["all"]).unwrap();
        assert_eq!(parsed, ["CREATE", "USAGE"]);
        assert!(PrivilegeTarget::Schema.is_all(&parsed));
    }

    #[test]
    fn temp_is_an_alias_for_databases() {
        let parsed = PrivilegeTarget::Database
            .parse(["connect", "Temp", "TEMPORARY"])
            .unwrap();
        assert_eq!(parsed, ["CONNECT", "TEMPORARY"]);
    }

    #[test]
    fn unknown_privileges_are_rejected() {
        let err = PrivilegeTarget::Schema.parse(["usage", "select"]).unwrap_err();
        assert_eq!(
            err.to_string(),
            "unknown schema privilege 'select' (expected one of: CREATE, USAGE)"
        );
        assert_eq!(
            PrivilegeTarget::Database.parse(Vec::<&str>::new()),
            Err(PrivilegeError::Empty)
        );
    }

    #[test]
    fn render_uses_sql_order() {
        let tables = PrivilegeTarget::Tables;
        let parsed = tables.parse(["update", "select"]).unwrap();
        assert_eq!(tables.render(&parsed), "SELECT, UPDATE");
        assert_eq!(tables.render(&tables.parse(["ALL"]).unwrap()), "ALL");
    }
}
