//! Advent Expedition: a member x boss score grid recorded against one date.

use chrono::{Duration, NaiveDate};
use std::collections::{BTreeMap, HashMap, HashSet};
use tracing::info;

use crate::castle_rush::{join_members, rounded_average};
use crate::error::{GuildError, Result};
use crate::grade::{Grade, advent_grade};
use crate::model::{AdventExpedition, Boss, Member, NewAdventEntry, Role};
use crate::quick_entry::Sheet;
use crate::store::GuildStore;

/// Default window for [`list`].
pub const LIST_DAYS: i64 = 30;
pub const LIST_LIMIT: usize = 30;

#[derive(Clone, Debug)]
pub struct AdventSheet {
    roster: Vec<Member>,
    scores: HashMap<(String, Boss), i64>,
    excluded: HashSet<(String, Boss)>,
    /// Boss that quick entry writes to.
    active: Boss,
}

impl AdventSheet {
    pub fn new(roster: Vec<Member>) -> Self {
        Self {
            roster,
            scores: HashMap::new(),
            excluded: HashSet::new(),
            active: Boss::Teo,
        }
    }

    pub fn roster(&self) -> &[Member] {
        &self.roster
    }

    pub fn active_boss(&self) -> Boss {
        self.active
    }

    pub fn set_active_boss(&mut self, boss: Boss) {
        self.active = boss;
    }

    pub fn score(&self, member_id: &str, boss: Boss) -> Option<i64> {
        self.scores.get(&(member_id.to_string(), boss)).copied()
    }

    pub fn set(&mut self, member_id: &str, boss: Boss, score: i64) {
        self.scores.insert((member_id.to_string(), boss), score);
    }

    /// Flips the exclusion of one (member, boss) cell and returns the new state.
    pub fn toggle_excluded(&mut self, member_id: &str, boss: Boss) -> bool {
        let key = (member_id.to_string(), boss);
        if self.excluded.remove(&key) {
            false
        } else {
            self.excluded.insert(key);
            true
        }
    }

    pub fn is_excluded(&self, member_id: &str, boss: Boss) -> bool {
        self.excluded.contains(&(member_id.to_string(), boss))
    }

    /// Sum of one member's scores across bosses.
    pub fn member_total(&self, member_id: &str) -> i64 {
        Boss::ALL
            .iter()
            .filter_map(|b| self.score(member_id, *b))
            .sum()
    }

    fn rows(&self, advent_id: &str, date: NaiveDate, logger_id: &str) -> Vec<NewAdventEntry> {
        let mut rows = Vec::with_capacity(self.roster.len() * Boss::ALL.len());
        for member in &self.roster {
            for boss in Boss::ALL {
                if self.is_excluded(&member.id, boss) {
                    continue;
                }
                let total_score = self.score(&member.id, boss).unwrap_or(0);
                rows.push(NewAdventEntry {
                    advent_expedition_id: advent_id.to_string(),
                    member_id: member.id.clone(),
                    date,
                    boss,
                    attendance: total_score > 0,
                    total_score,
                    logger_id: Some(logger_id.to_string()),
                });
            }
        }
        rows
    }
}

impl Sheet for AdventSheet {
    fn contains(&self, member_id: &str) -> bool {
        self.roster.iter().any(|m| m.id == member_id)
    }

    fn add(&mut self, member: &Member) {
        if !self.contains(&member.id) {
            self.roster.insert(0, member.clone());
        }
    }

    fn set_score(&mut self, member_id: &str, score: i64) {
        let boss = self.active;
        self.set(member_id, boss, score);
    }
}

pub async fn create<S: GuildStore>(
    store: &S,
    date: NaiveDate,
    sheet: &AdventSheet,
    logged_by: &str,
) -> Result<AdventExpedition> {
    if store.advent_expedition_on(date).await?.is_some() {
        return Err(GuildError::conflict(format!(
            "An Advent Expedition entry already exists for {date}"
        )));
    }
    let logger = store.create_logger(Some(logged_by)).await?;
    let event = store.insert_advent_expedition(date, &logger.id).await?;
    let rows = sheet.rows(&event.id, date, &logger.id);
    store.insert_advent_entries(&rows).await?;

    info!(id = %event.id, %date, entries = rows.len(), "advent expedition created");
    Ok(event)
}

/// Rewrites every entry of an expedition under a fresh logger row.
pub async fn update<S: GuildStore>(
    store: &S,
    id: &str,
    sheet: &AdventSheet,
    logged_by: &str,
) -> Result<AdventExpedition> {
    let event = store
        .advent_expedition(id)
        .await?
        .ok_or_else(|| GuildError::not_found(format!("advent expedition {id}")))?;

    let logger = store.create_logger(Some(logged_by)).await?;
    store.delete_advent_entries(&event.id).await?;
    let rows = sheet.rows(&event.id, event.date, &logger.id);
    store.insert_advent_entries(&rows).await?;

    info!(id = %event.id, entries = rows.len(), "advent expedition updated");
    Ok(event)
}

/// Loads an expedition's positive scores onto a sheet for editing.
pub async fn load_sheet<S: GuildStore>(store: &S, id: &str, roster: Vec<Member>) -> Result<AdventSheet> {
    let mut sheet = AdventSheet::new(roster);
    for entry in store.advent_entries(&[id.to_string()]).await? {
        if entry.total_score > 0 {
            sheet.set(&entry.member_id, entry.boss, entry.total_score);
        }
    }
    Ok(sheet)
}

pub async fn delete<S: GuildStore>(store: &S, id: &str) -> Result<()> {
    store.delete_advent_entries(id).await?;
    store.delete_advent_expedition(id).await?;
    info!(id, "advent expedition deleted");
    Ok(())
}

/// Expeditions dated within the last `days` of `today`, newest first.
pub async fn list<S: GuildStore>(
    store: &S,
    today: NaiveDate,
    days: i64,
    limit: usize,
) -> Result<Vec<AdventExpedition>> {
    store
        .advent_expeditions(Some(today - Duration::days(days)), limit)
        .await
}

#[derive(Clone, Debug, PartialEq)]
pub struct MemberTotal {
    pub member_id: String,
    pub name: String,
    pub role: Role,
    pub total_score: i64,
    pub bosses: BTreeMap<Boss, i64>,
}

/// One stored (member, boss) cell joined to the member's name.
#[derive(Clone, Debug, PartialEq)]
pub struct BossEntry {
    pub member_id: String,
    pub name: String,
    pub role: Role,
    pub boss: Boss,
    pub total_score: i64,
    pub attendance: bool,
}

#[derive(Clone, Debug)]
pub struct AdventReport {
    pub event: AdventExpedition,
    /// Attended entries aggregated per member, highest total first.
    pub members: Vec<MemberTotal>,
    /// Every stored cell, highest score first.
    pub entries: Vec<BossEntry>,
    pub total_entries: usize,
    pub boss_totals: BTreeMap<Boss, i64>,
}

impl AdventReport {
    pub fn total_score(&self) -> i64 {
        self.boss_totals.values().sum()
    }

    pub fn unique_participants(&self) -> usize {
        self.members.len()
    }

    /// Average per participating member.
    pub fn average_score(&self) -> i64 {
        rounded_average(self.total_score(), self.unique_participants())
    }

    pub fn grade(&self) -> Grade {
        advent_grade(self.total_score())
    }
}

pub async fn report<S: GuildStore>(store: &S, id: &str) -> Result<AdventReport> {
    let event = store
        .advent_expedition(id)
        .await?
        .ok_or_else(|| GuildError::not_found(format!("advent expedition {id}")))?;
    let roster = store.list_members().await?;
    let lookup = join_members(&roster);

    let mut boss_totals: BTreeMap<Boss, i64> = Boss::ALL.iter().map(|b| (*b, 0)).collect();
    let mut per_member: HashMap<String, MemberTotal> = HashMap::new();
    let mut entries = Vec::new();
    let mut total_entries = 0;

    for entry in store.advent_entries(std::slice::from_ref(&event.id)).await? {
        let (name, role) = lookup(&entry.member_id);
        entries.push(BossEntry {
            member_id: entry.member_id.clone(),
            name,
            role,
            boss: entry.boss,
            total_score: entry.total_score,
            attendance: entry.attendance,
        });
        if !entry.attendance {
            continue;
        }
        total_entries += 1;
        *boss_totals.entry(entry.boss).or_insert(0) += entry.total_score;

        let row = per_member.entry(entry.member_id.clone()).or_insert_with(|| {
            let (name, role) = lookup(&entry.member_id);
            MemberTotal {
                member_id: entry.member_id.clone(),
                name,
                role,
                total_score: 0,
                bosses: BTreeMap::new(),
            }
        });
        row.total_score += entry.total_score;
        *row.bosses.entry(entry.boss).or_insert(0) += entry.total_score;
    }

    let mut members: Vec<MemberTotal> = per_member.into_values().collect();
    members.sort_by(|a, b| {
        b.total_score
            .cmp(&a.total_score)
            .then_with(|| a.name.to_lowercase().cmp(&b.name.to_lowercase()))
    });

    entries.sort_by(|a, b| b.total_score.cmp(&a.total_score));

    Ok(AdventReport { event, members, entries, total_entries, boss_totals })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::roster;
    use crate::store::memory::MemoryStore;

    fn date(d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2026, 10, d).unwrap()
    }

    async fn seeded() -> (MemoryStore, Vec<Member>) {
        let store = MemoryStore::new();
        roster::add(&store, "Aria", "Healer", None).await.unwrap();
        roster::add(&store, "Bolt", "Tank", None).await.unwrap();
        let members = store.list_members().await.unwrap();
        (store, members)
    }

    fn id_of(members: &[Member], name: &str) -> String {
        members.iter().find(|m| m.name == name).unwrap().id.clone()
    }

    #[tokio::test]
    async fn test_create_writes_grid_minus_exclusions() {
        let (store, members) = seeded().await;
        let aria = id_of(&members, "Aria");
        let bolt = id_of(&members, "Bolt");

        let mut sheet = AdventSheet::new(members.clone());
        sheet.set(&aria, Boss::Teo, 60_000_000);
        sheet.set_active_boss(Boss::Karma);
        sheet.set_score(&bolt, 40_000_000);
        assert!(sheet.toggle_excluded(&bolt, Boss::Kyle));

        let event = create(&store, date(1), &sheet, "cli").await.unwrap();
        let entries = store.advent_entries(&[event.id.clone()]).await.unwrap();
        assert_eq!(entries.len(), 7);
        assert!(entries.iter().all(|e| e.date == date(1)));
        assert!(!entries.iter().any(|e| e.member_id == bolt && e.boss == Boss::Kyle));

        let report = report(&store, &event.id).await.unwrap();
        assert_eq!(report.total_score(), 100_000_000);
        assert_eq!(report.unique_participants(), 2);
        assert_eq!(report.total_entries, 2);
        assert_eq!(report.average_score(), 50_000_000);
        assert_eq!(report.boss_totals[&Boss::Karma], 40_000_000);
        assert_eq!(report.grade(), Grade::S);
        assert_eq!(report.members[0].name, "Aria");
        assert_eq!(report.entries.len(), 7);
        assert_eq!(report.entries[0].boss, Boss::Teo);
    }

    #[tokio::test]
    async fn test_create_conflicts_on_same_date() {
        let (store, members) = seeded().await;
        let sheet = AdventSheet::new(members);
        create(&store, date(3), &sheet, "cli").await.unwrap();
        assert!(create(&store, date(3), &sheet, "cli").await.unwrap_err().is_conflict());
    }

    #[tokio::test]
    async fn test_update_uses_new_logger() {
        let (store, members) = seeded().await;
        let aria = id_of(&members, "Aria");
        let mut sheet = AdventSheet::new(members.clone());
        sheet.set(&aria, Boss::Yeonhee, 5);
        let event = create(&store, date(4), &sheet, "cli").await.unwrap();

        let mut edited = load_sheet(&store, &event.id, members).await.unwrap();
        assert_eq!(edited.score(&aria, Boss::Yeonhee), Some(5));
        edited.set(&aria, Boss::Yeonhee, 9);
        update(&store, &event.id, &edited, "cli").await.unwrap();

        let entries = store.advent_entries(&[event.id.clone()]).await.unwrap();
        assert_eq!(entries.len(), 8);
        assert!(entries.iter().all(|e| e.logger_id != event.logger_id));
        let report = report(&store, &event.id).await.unwrap();
        assert_eq!(report.total_score(), 9);
    }

    #[tokio::test]
    async fn test_list_window_and_delete() {
        let (store, members) = seeded().await;
        let sheet = AdventSheet::new(members);
        let old = NaiveDate::from_ymd_opt(2026, 8, 1).unwrap();
        create(&store, old, &sheet, "cli").await.unwrap();
        let recent = create(&store, date(10), &sheet, "cli").await.unwrap();

        let listed = list(&store, date(18), LIST_DAYS, LIST_LIMIT).await.unwrap();
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].id, recent.id);

        delete(&store, &recent.id).await.unwrap();
        assert!(store.advent_expedition(&recent.id).await.unwrap().is_none());
        assert!(store.advent_entries(&[recent.id]).await.unwrap().is_empty());
    }

    #[test]
    fn test_toggle_excluded_round_trips() {
        let mut sheet = AdventSheet::new(Vec::new());
        assert!(sheet.toggle_excluded("m1", Boss::Teo));
        assert!(sheet.is_excluded("m1", Boss::Teo));
        assert!(!sheet.toggle_excluded("m1", Boss::Teo));
        assert!(!sheet.is_excluded("m1", Boss::Teo));
    }
}
