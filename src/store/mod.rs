//! Backend access. The hosted backend speaks PostgREST; everything the entry
//! services need goes through [`GuildStore`] so they can run against the
//! in-memory store in tests.

mod rest;

#[cfg(test)]
pub mod memory;

pub use rest::RestStore;

use chrono::NaiveDate;

use crate::error::Result;
use crate::model::{
    AdventEntry, AdventExpedition, CastleRush, CastleRushEntry, Logger, Member, MemberPatch,
    NewAdventEntry, NewCastleRushEntry, NewMember,
};

/// Upper bound on roster reads, same cap the dashboard used.
pub const MEMBER_LIMIT: usize = 1000;

pub trait GuildStore {
    /// Newest first, at most [`MEMBER_LIMIT`] rows.
    async fn list_members(&self) -> Result<Vec<Member>>;
    /// Members whose name equals `name` ignoring case.
    async fn members_named(&self, name: &str) -> Result<Vec<Member>>;
    async fn insert_members(&self, rows: &[NewMember]) -> Result<Vec<Member>>;
    async fn update_member(&self, id: &str, patch: &MemberPatch) -> Result<Member>;
    async fn delete_member(&self, id: &str) -> Result<()>;

    async fn create_logger(&self, logged_by: Option<&str>) -> Result<Logger>;

    /// Most recent first.
    async fn castle_rushes(&self, limit: usize) -> Result<Vec<CastleRush>>;
    async fn castle_rush(&self, id: &str) -> Result<Option<CastleRush>>;
    async fn castle_rush_on(&self, date: NaiveDate) -> Result<Option<CastleRush>>;
    async fn castle_rushes_at(&self, castle: &str) -> Result<Vec<CastleRush>>;
    /// Events dated within `from..=to`.
    async fn castle_rushes_between(&self, from: NaiveDate, to: NaiveDate) -> Result<Vec<CastleRush>>;
    async fn insert_castle_rush(&self, castle: &str, date: NaiveDate, logger_id: &str) -> Result<CastleRush>;
    async fn delete_castle_rush(&self, id: &str) -> Result<()>;
    async fn castle_rush_entries(&self, castle_rush_ids: &[String]) -> Result<Vec<CastleRushEntry>>;
    async fn all_castle_rush_entries(&self) -> Result<Vec<CastleRushEntry>>;
    async fn insert_castle_rush_entries(&self, rows: &[NewCastleRushEntry]) -> Result<()>;
    async fn delete_castle_rush_entries(&self, castle_rush_id: &str) -> Result<()>;
    async fn delete_member_castle_rush_entries(&self, member_id: &str) -> Result<()>;

    /// Most recent first, optionally only on or after `since`.
    async fn advent_expeditions(&self, since: Option<NaiveDate>, limit: usize) -> Result<Vec<AdventExpedition>>;
    async fn advent_expedition(&self, id: &str) -> Result<Option<AdventExpedition>>;
    async fn advent_expedition_on(&self, date: NaiveDate) -> Result<Option<AdventExpedition>>;
    async fn insert_advent_expedition(&self, date: NaiveDate, logger_id: &str) -> Result<AdventExpedition>;
    async fn delete_advent_expedition(&self, id: &str) -> Result<()>;
    async fn advent_entries(&self, advent_ids: &[String]) -> Result<Vec<AdventEntry>>;
    async fn all_advent_entries(&self) -> Result<Vec<AdventEntry>>;
    async fn insert_advent_entries(&self, rows: &[NewAdventEntry]) -> Result<()>;
    async fn delete_advent_entries(&self, advent_id: &str) -> Result<()>;
    async fn delete_member_advent_entries(&self, member_id: &str) -> Result<()>;
}
