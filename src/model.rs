//! Row types for the guild tables: members, logger, castle_rush(_entry),
//! advent_expedition(_entry). Field names follow the backend's column names.

use chrono::NaiveDate;
use serde::{Deserialize, Deserializer, Serialize};
use std::fmt;

/// Guild role. Unknown strings fold into `Member`.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum Role {
    #[default]
    Member,
    Dps,
    Healer,
    Tank,
    Leader,
    /// Placeholder for names that only appear in imported history.
    Historical,
}

impl Role {
    pub const ASSIGNABLE: [Role; 5] = [Role::Member, Role::Dps, Role::Healer, Role::Tank, Role::Leader];

    pub fn as_str(self) -> &'static str {
        match self {
            Role::Member => "Member",
            Role::Dps => "DPS",
            Role::Healer => "Healer",
            Role::Tank => "Tank",
            Role::Leader => "Leader",
            Role::Historical => "Historical",
        }
    }

    pub fn normalize(raw: &str) -> Role {
        match raw.trim() {
            "DPS" => Role::Dps,
            "Healer" => Role::Healer,
            "Tank" => Role::Tank,
            "Leader" => Role::Leader,
            "Historical" => Role::Historical,
            _ => Role::Member,
        }
    }
}

impl From<String> for Role {
    fn from(raw: String) -> Self {
        Role::normalize(&raw)
    }
}

impl From<Role> for String {
    fn from(role: Role) -> Self {
        role.as_str().to_string()
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Advent Expedition bosses, in the order the sheet shows them.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Boss {
    Teo,
    Kyle,
    Yeonhee,
    Karma,
}

impl Boss {
    pub const ALL: [Boss; 4] = [Boss::Teo, Boss::Kyle, Boss::Yeonhee, Boss::Karma];

    pub fn as_str(self) -> &'static str {
        match self {
            Boss::Teo => "Teo",
            Boss::Kyle => "Kyle",
            Boss::Yeonhee => "Yeonhee",
            Boss::Karma => "Karma",
        }
    }

    pub fn parse(raw: &str) -> Option<Boss> {
        Boss::ALL
            .into_iter()
            .find(|b| b.as_str().eq_ignore_ascii_case(raw.trim()))
    }
}

impl fmt::Display for Boss {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Member {
    #[serde(deserialize_with = "id_string")]
    pub id: String,
    pub name: String,
    #[serde(default, deserialize_with = "null_default")]
    pub role: Role,
    #[serde(default, deserialize_with = "null_default")]
    pub kicked: bool,
    #[serde(default)]
    pub created_at: Option<String>,
    #[serde(default, deserialize_with = "opt_id_string")]
    pub logger_id: Option<String>,
}

/// Insert payload for `members`.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct NewMember {
    pub name: String,
    pub role: Role,
    pub kicked: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub logger_id: Option<String>,
}

/// Partial update for `members`; `None` fields are left alone.
#[derive(Clone, Debug, Default, PartialEq, Serialize)]
pub struct MemberPatch {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub role: Option<Role>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub kicked: Option<bool>,
}

impl MemberPatch {
    pub fn is_empty(&self) -> bool {
        self.name.is_none() && self.role.is_none() && self.kicked.is_none()
    }
}

/// Audit row: one per write batch.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Logger {
    #[serde(deserialize_with = "id_string")]
    pub id: String,
    #[serde(default)]
    pub logged_by: Option<String>,
    #[serde(default)]
    pub created_at: Option<String>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct CastleRush {
    #[serde(deserialize_with = "id_string")]
    pub id: String,
    pub castle: String,
    pub date: NaiveDate,
    #[serde(default, deserialize_with = "opt_id_string")]
    pub logger_id: Option<String>,
    #[serde(default)]
    pub created_at: Option<String>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct CastleRushEntry {
    #[serde(default, deserialize_with = "opt_id_string")]
    pub id: Option<String>,
    #[serde(deserialize_with = "id_string")]
    pub castle_rush_id: String,
    #[serde(deserialize_with = "id_string")]
    pub member_id: String,
    #[serde(default, deserialize_with = "null_default")]
    pub attendance: bool,
    #[serde(default, deserialize_with = "null_default")]
    pub score: i64,
    #[serde(default, deserialize_with = "opt_id_string")]
    pub logger_id: Option<String>,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct NewCastleRushEntry {
    pub castle_rush_id: String,
    pub member_id: String,
    pub attendance: bool,
    pub score: i64,
    pub logger_id: Option<String>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct AdventExpedition {
    #[serde(deserialize_with = "id_string")]
    pub id: String,
    pub date: NaiveDate,
    #[serde(default, deserialize_with = "opt_id_string")]
    pub logger_id: Option<String>,
    #[serde(default)]
    pub created_at: Option<String>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct AdventEntry {
    #[serde(default, deserialize_with = "opt_id_string")]
    pub id: Option<String>,
    #[serde(deserialize_with = "id_string")]
    pub advent_expedition_id: String,
    #[serde(deserialize_with = "id_string")]
    pub member_id: String,
    pub date: NaiveDate,
    pub boss: Boss,
    #[serde(default, deserialize_with = "null_default")]
    pub attendance: bool,
    #[serde(default, deserialize_with = "null_default")]
    pub total_score: i64,
    #[serde(default, deserialize_with = "opt_id_string")]
    pub logger_id: Option<String>,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct NewAdventEntry {
    pub advent_expedition_id: String,
    pub member_id: String,
    pub date: NaiveDate,
    pub boss: Boss,
    pub attendance: bool,
    pub total_score: i64,
    pub logger_id: Option<String>,
}

// *************** serde helpers ***************

fn null_default<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Default + Deserialize<'de>,
{
    Ok(Option::<T>::deserialize(deserializer)?.unwrap_or_default())
}

#[derive(Deserialize)]
#[serde(untagged)]
enum RawId {
    Text(String),
    Number(i64),
}

impl From<RawId> for String {
    fn from(raw: RawId) -> Self {
        match raw {
            RawId::Text(s) => s,
            RawId::Number(n) => n.to_string(),
        }
    }
}

// Backends hand out uuid strings or serial integers depending on the schema.
fn id_string<'de, D: Deserializer<'de>>(deserializer: D) -> Result<String, D::Error> {
    RawId::deserialize(deserializer).map(String::from)
}

fn opt_id_string<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Option<String>, D::Error> {
    Ok(Option::<RawId>::deserialize(deserializer)?.map(String::from))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_role_normalizes_unknown_to_member() {
        assert_eq!(Role::normalize("Tank"), Role::Tank);
        assert_eq!(Role::normalize("DPS"), Role::Dps);
        assert_eq!(Role::normalize("Officer"), Role::Member);
        assert_eq!(Role::normalize(""), Role::Member);
    }

    #[test]
    fn test_member_tolerates_nulls_and_numeric_ids() {
        let json = r#"{"id": 42, "name": "Aria", "role": null, "kicked": null, "logger_id": 7}"#;
        let member: Member = serde_json::from_str(json).unwrap();
        assert_eq!(member.id, "42");
        assert_eq!(member.role, Role::Member);
        assert!(!member.kicked);
        assert_eq!(member.logger_id.as_deref(), Some("7"));
    }

    #[test]
    fn test_role_serializes_as_wire_string() {
        let patch = MemberPatch { role: Some(Role::Dps), ..Default::default() };
        assert_eq!(serde_json::to_string(&patch).unwrap(), r#"{"role":"DPS"}"#);
        assert!(MemberPatch::default().is_empty());
    }

    #[test]
    fn test_boss_parse_is_case_insensitive() {
        assert_eq!(Boss::parse("yeonhee"), Some(Boss::Yeonhee));
        assert_eq!(Boss::parse("KARMA"), Some(Boss::Karma));
        assert_eq!(Boss::parse("Rudy"), None);
    }

    #[test]
    fn test_advent_entry_reads_boss_and_date() {
        let json = r#"{"advent_expedition_id":"ae1","member_id":"m1","date":"2026-10-01","boss":"Kyle","attendance":true,"total_score":1200000}"#;
        let entry: AdventEntry = serde_json::from_str(json).unwrap();
        assert_eq!(entry.boss, Boss::Kyle);
        assert_eq!(entry.date, NaiveDate::from_ymd_opt(2026, 10, 1).unwrap());
        assert_eq!(entry.total_score, 1_200_000);
    }
}
