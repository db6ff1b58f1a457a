//! In-memory [`GuildStore`] used by the service tests.

use chrono::NaiveDate;
use std::sync::{Mutex, MutexGuard};

use super::{GuildStore, MEMBER_LIMIT};
use crate::error::{GuildError, Result};
use crate::model::{
    AdventEntry, AdventExpedition, CastleRush, CastleRushEntry, Logger, Member, MemberPatch,
    NewAdventEntry, NewCastleRushEntry, NewMember,
};

#[derive(Default)]
struct Tables {
    next_id: u64,
    members: Vec<Member>,
    loggers: Vec<Logger>,
    castle_rushes: Vec<CastleRush>,
    castle_rush_entries: Vec<CastleRushEntry>,
    advents: Vec<AdventExpedition>,
    advent_entries: Vec<AdventEntry>,
}

impl Tables {
    fn id(&mut self) -> String {
        self.next_id += 1;
        self.next_id.to_string()
    }
}

#[derive(Default)]
pub struct MemoryStore {
    tables: Mutex<Tables>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Tables> {
        self.tables.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Loggers written so far, oldest first.
    pub fn loggers(&self) -> Vec<Logger> {
        self.lock().loggers.clone()
    }
}

impl GuildStore for MemoryStore {
    async fn list_members(&self) -> Result<Vec<Member>> {
        Ok(self.lock().members.iter().rev().take(MEMBER_LIMIT).cloned().collect())
    }

    async fn members_named(&self, name: &str) -> Result<Vec<Member>> {
        let needle = name.to_lowercase();
        Ok(self
            .lock()
            .members
            .iter()
            .filter(|m| m.name.to_lowercase() == needle)
            .cloned()
            .collect())
    }

    async fn insert_members(&self, rows: &[NewMember]) -> Result<Vec<Member>> {
        let mut t = self.lock();
        let mut created = Vec::with_capacity(rows.len());
        for row in rows {
            let member = Member {
                id: t.id(),
                name: row.name.clone(),
                role: row.role,
                kicked: row.kicked,
                created_at: None,
                logger_id: row.logger_id.clone(),
            };
            t.members.push(member.clone());
            created.push(member);
        }
        Ok(created)
    }

    async fn update_member(&self, id: &str, patch: &MemberPatch) -> Result<Member> {
        let mut t = self.lock();
        let member = t
            .members
            .iter_mut()
            .find(|m| m.id == id)
            .ok_or_else(|| GuildError::not_found(format!("member {id}")))?;
        if let Some(name) = &patch.name {
            member.name = name.clone();
        }
        if let Some(role) = patch.role {
            member.role = role;
        }
        if let Some(kicked) = patch.kicked {
            member.kicked = kicked;
        }
        Ok(member.clone())
    }

    async fn delete_member(&self, id: &str) -> Result<()> {
        self.lock().members.retain(|m| m.id != id);
        Ok(())
    }

    async fn create_logger(&self, logged_by: Option<&str>) -> Result<Logger> {
        let mut t = self.lock();
        let logger = Logger {
            id: t.id(),
            logged_by: logged_by.map(str::to_string),
            created_at: None,
        };
        t.loggers.push(logger.clone());
        Ok(logger)
    }

    async fn castle_rushes(&self, limit: usize) -> Result<Vec<CastleRush>> {
        let mut rows = self.lock().castle_rushes.clone();
        rows.sort_by(|a, b| b.date.cmp(&a.date));
        rows.truncate(limit);
        Ok(rows)
    }

    async fn castle_rush(&self, id: &str) -> Result<Option<CastleRush>> {
        Ok(self.lock().castle_rushes.iter().find(|c| c.id == id).cloned())
    }

    async fn castle_rush_on(&self, date: NaiveDate) -> Result<Option<CastleRush>> {
        Ok(self.lock().castle_rushes.iter().find(|c| c.date == date).cloned())
    }

    async fn castle_rushes_at(&self, castle: &str) -> Result<Vec<CastleRush>> {
        Ok(self
            .lock()
            .castle_rushes
            .iter()
            .filter(|c| c.castle == castle)
            .cloned()
            .collect())
    }

    async fn castle_rushes_between(&self, from: NaiveDate, to: NaiveDate) -> Result<Vec<CastleRush>> {
        Ok(self
            .lock()
            .castle_rushes
            .iter()
            .filter(|c| (from..=to).contains(&c.date))
            .cloned()
            .collect())
    }

    async fn insert_castle_rush(&self, castle: &str, date: NaiveDate, logger_id: &str) -> Result<CastleRush> {
        let mut t = self.lock();
        if t.castle_rushes.iter().any(|c| c.date == date) {
            return Err(GuildError::conflict(format!("castle_rush for {date} exists")));
        }
        let row = CastleRush {
            id: t.id(),
            castle: castle.to_string(),
            date,
            logger_id: Some(logger_id.to_string()),
            created_at: None,
        };
        t.castle_rushes.push(row.clone());
        Ok(row)
    }

    async fn delete_castle_rush(&self, id: &str) -> Result<()> {
        self.lock().castle_rushes.retain(|c| c.id != id);
        Ok(())
    }

    async fn castle_rush_entries(&self, castle_rush_ids: &[String]) -> Result<Vec<CastleRushEntry>> {
        Ok(self
            .lock()
            .castle_rush_entries
            .iter()
            .filter(|e| castle_rush_ids.contains(&e.castle_rush_id))
            .cloned()
            .collect())
    }

    async fn all_castle_rush_entries(&self) -> Result<Vec<CastleRushEntry>> {
        Ok(self.lock().castle_rush_entries.clone())
    }

    async fn insert_castle_rush_entries(&self, rows: &[NewCastleRushEntry]) -> Result<()> {
        let mut t = self.lock();
        for row in rows {
            let id = t.id();
            t.castle_rush_entries.push(CastleRushEntry {
                id: Some(id),
                castle_rush_id: row.castle_rush_id.clone(),
                member_id: row.member_id.clone(),
                attendance: row.attendance,
                score: row.score,
                logger_id: row.logger_id.clone(),
            });
        }
        Ok(())
    }

    async fn delete_castle_rush_entries(&self, castle_rush_id: &str) -> Result<()> {
        self.lock()
            .castle_rush_entries
            .retain(|e| e.castle_rush_id != castle_rush_id);
        Ok(())
    }

    async fn delete_member_castle_rush_entries(&self, member_id: &str) -> Result<()> {
        self.lock().castle_rush_entries.retain(|e| e.member_id != member_id);
        Ok(())
    }

    async fn advent_expeditions(&self, since: Option<NaiveDate>, limit: usize) -> Result<Vec<AdventExpedition>> {
        let mut rows: Vec<_> = self
            .lock()
            .advents
            .iter()
            .filter(|a| since.is_none_or(|s| a.date >= s))
            .cloned()
            .collect();
        rows.sort_by(|a, b| b.date.cmp(&a.date));
        rows.truncate(limit);
        Ok(rows)
    }

    async fn advent_expedition(&self, id: &str) -> Result<Option<AdventExpedition>> {
        Ok(self.lock().advents.iter().find(|a| a.id == id).cloned())
    }

    async fn advent_expedition_on(&self, date: NaiveDate) -> Result<Option<AdventExpedition>> {
        Ok(self.lock().advents.iter().find(|a| a.date == date).cloned())
    }

    async fn insert_advent_expedition(&self, date: NaiveDate, logger_id: &str) -> Result<AdventExpedition> {
        let mut t = self.lock();
        let row = AdventExpedition {
            id: t.id(),
            date,
            logger_id: Some(logger_id.to_string()),
            created_at: None,
        };
        t.advents.push(row.clone());
        Ok(row)
    }

    async fn delete_advent_expedition(&self, id: &str) -> Result<()> {
        self.lock().advents.retain(|a| a.id != id);
        Ok(())
    }

    async fn advent_entries(&self, advent_ids: &[String]) -> Result<Vec<AdventEntry>> {
        Ok(self
            .lock()
            .advent_entries
            .iter()
            .filter(|e| advent_ids.contains(&e.advent_expedition_id))
            .cloned()
            .collect())
    }

    async fn all_advent_entries(&self) -> Result<Vec<AdventEntry>> {
        Ok(self.lock().advent_entries.clone())
    }

    async fn insert_advent_entries(&self, rows: &[NewAdventEntry]) -> Result<()> {
        let mut t = self.lock();
        for row in rows {
            let id = t.id();
            t.advent_entries.push(AdventEntry {
                id: Some(id),
                advent_expedition_id: row.advent_expedition_id.clone(),
                member_id: row.member_id.clone(),
                date: row.date,
                boss: row.boss,
                attendance: row.attendance,
                total_score: row.total_score,
                logger_id: row.logger_id.clone(),
            });
        }
        Ok(())
    }

    async fn delete_advent_entries(&self, advent_id: &str) -> Result<()> {
        self.lock()
            .advent_entries
            .retain(|e| e.advent_expedition_id != advent_id);
        Ok(())
    }

    async fn delete_member_advent_entries(&self, member_id: &str) -> Result<()> {
        self.lock().advent_entries.retain(|e| e.member_id != member_id);
        Ok(())
    }
}
