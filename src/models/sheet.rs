use serde::{Deserialize, Serialize};

/// Default trackable window applied to newly created sheets.
pub const DEFAULT_START_DATE: &str = "2025-12-21";
pub const DEFAULT_END_DATE: &str = "2026-02-01";

/// One tracked roster.
///
/// `sheet_id` is the identifier the upstream spreadsheet system assigned to
/// the source document. It is stable and globally unique, so it is the
/// primary key everywhere - no surrogate ids.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Sheet {
    pub sheet_id: String,
    pub title: String,
    /// Tab within the source spreadsheet the roster was imported from.
    pub tab_name: String,
    pub group_name: String,
    pub subgroup_name: String,
    /// First trackable day, ISO date.
    pub start_date: String,
    /// Last trackable day, inclusive.
    pub end_date: String,
    pub created_at: String,
    pub updated_at: String,
}

/// One person within a sheet.
///
/// Rosters are always saved whole (delete-all + reinsert), so a member has no
/// identity of its own beyond the owning sheet and person code.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TeamMember {
    #[serde(default)]
    pub first_name: String,
    #[serde(default)]
    pub last_name: String,
    /// Personal identifier code. Kept as a string: codes with leading zeros
    /// and non-numeric codes both occur in source spreadsheets.
    #[serde(default)]
    pub person_code: String,
    #[serde(default)]
    pub group_name: String,
    #[serde(default)]
    pub subgroup_name: String,
    #[serde(default)]
    pub section_name: String,
    #[serde(default)]
    pub specialty: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn member_deserializes_from_partial_camel_case_json() {
        let m: TeamMember =
            serde_json::from_str(r#"{"firstName":"Dana","personCode":"100"}"#).unwrap();
        assert_eq!(m.first_name, "Dana");
        assert_eq!(m.person_code, "100");
        assert_eq!(m.last_name, "");
        assert_eq!(m.section_name, "");
    }
}
