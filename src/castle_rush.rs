//! Castle Rush: one event per day, one score per member.

use chrono::NaiveDate;
use std::collections::{BTreeMap, HashMap, HashSet};
use tracing::info;

use crate::error::{GuildError, Result};
use crate::grade::{Grade, castle_rush_grade};
use crate::model::{CastleRush, Member, NewCastleRushEntry, NewMember, Role};
use crate::quick_entry::Sheet;
use crate::schedule;
use crate::store::GuildStore;

/// Scores being entered for one Castle Rush.
#[derive(Clone, Debug, Default)]
pub struct CastleRushSheet {
    roster: Vec<Member>,
    scores: BTreeMap<String, i64>,
    absent: HashSet<String>,
    /// Write a row for every roster member, not only the entered ones.
    whole_roster: bool,
}

impl CastleRushSheet {
    /// Sheet that records every roster member; blanks count as absent.
    pub fn whole_roster(roster: Vec<Member>) -> Self {
        Self { roster, whole_roster: true, ..Default::default() }
    }

    /// Sheet that only records members that were entered or marked absent.
    pub fn entered_only(roster: Vec<Member>) -> Self {
        Self { roster, whole_roster: false, ..Default::default() }
    }

    pub fn roster(&self) -> &[Member] {
        &self.roster
    }

    pub fn score(&self, member_id: &str) -> Option<i64> {
        self.scores.get(member_id).copied()
    }

    pub fn remove(&mut self, member_id: &str) {
        self.scores.remove(member_id);
    }

    /// Marks a member as not participating. Entered members are left alone.
    pub fn mark_absent(&mut self, member_id: &str) -> bool {
        if self.scores.contains_key(member_id) {
            return false;
        }
        self.absent.insert(member_id.to_string())
    }

    pub fn absent(&self) -> impl Iterator<Item = &Member> {
        self.roster.iter().filter(|m| self.absent.contains(&m.id))
    }

    pub fn has_any_score(&self) -> bool {
        self.scores.values().any(|s| *s > 0)
    }

    pub fn total(&self) -> i64 {
        self.scores.values().sum()
    }

    /// Entered members with their scores, highest first, then by name.
    pub fn ranked(&self) -> Vec<(&Member, i64)> {
        let mut rows: Vec<(&Member, i64)> = self
            .roster
            .iter()
            .filter_map(|m| self.scores.get(&m.id).map(|s| (m, *s)))
            .collect();
        rows.sort_by(|a, b| {
            b.1.cmp(&a.1)
                .then_with(|| a.0.name.to_lowercase().cmp(&b.0.name.to_lowercase()))
        });
        rows
    }

    fn rows(&self, castle_rush_id: &str, logger_id: Option<&str>) -> Vec<NewCastleRushEntry> {
        let row = |member_id: &str, score: i64| NewCastleRushEntry {
            castle_rush_id: castle_rush_id.to_string(),
            member_id: member_id.to_string(),
            attendance: score > 0,
            score,
            logger_id: logger_id.map(str::to_string),
        };

        if self.whole_roster {
            return self
                .roster
                .iter()
                .map(|m| row(&m.id, self.scores.get(&m.id).copied().unwrap_or(0)))
                .collect();
        }
        let mut rows: Vec<_> = self.scores.iter().map(|(id, s)| row(id, *s)).collect();
        let mut absent: Vec<_> = self.absent.iter().collect();
        absent.sort();
        rows.extend(absent.into_iter().map(|id| row(id, 0)));
        rows
    }
}

impl Sheet for CastleRushSheet {
    fn contains(&self, member_id: &str) -> bool {
        self.scores.contains_key(member_id)
    }

    fn add(&mut self, member: &Member) {
        self.absent.remove(&member.id);
        self.scores.entry(member.id.clone()).or_insert(0);
    }

    fn set_score(&mut self, member_id: &str, score: i64) {
        self.absent.remove(member_id);
        self.scores.insert(member_id.to_string(), score);
    }
}

/// Creates the day's event and its entries under one logger row.
pub async fn create<S: GuildStore>(
    store: &S,
    date: NaiveDate,
    sheet: &CastleRushSheet,
    logged_by: &str,
) -> Result<CastleRush> {
    if !sheet.has_any_score() {
        return Err(GuildError::validation("Please enter at least one score before submitting"));
    }
    if store.castle_rush_on(date).await?.is_some() {
        return Err(GuildError::conflict(format!("An entry already exists for {date}")));
    }
    let castle = schedule::castle_for(date).castle;

    let logger = store.create_logger(Some(logged_by)).await?;
    let event = store.insert_castle_rush(castle, date, &logger.id).await?;
    let rows = sheet.rows(&event.id, Some(&logger.id));
    store.insert_castle_rush_entries(&rows).await?;

    info!(id = %event.id, %date, castle, entries = rows.len(), "castle rush created");
    Ok(event)
}

/// Replaces the entries of an existing event. The event keeps its logger.
pub async fn update<S: GuildStore>(store: &S, id: &str, sheet: &CastleRushSheet) -> Result<CastleRush> {
    if !sheet.has_any_score() {
        return Err(GuildError::validation("Please enter at least one score before submitting"));
    }
    let event = store
        .castle_rush(id)
        .await?
        .ok_or_else(|| GuildError::not_found(format!("castle rush {id}")))?;

    store.delete_castle_rush_entries(&event.id).await?;
    let rows = sheet.rows(&event.id, event.logger_id.as_deref());
    store.insert_castle_rush_entries(&rows).await?;

    info!(id = %event.id, entries = rows.len(), "castle rush updated");
    Ok(event)
}

/// Loads an existing event's positive scores onto a whole-roster sheet.
pub async fn load_sheet<S: GuildStore>(store: &S, id: &str, roster: Vec<Member>) -> Result<CastleRushSheet> {
    let mut sheet = CastleRushSheet::whole_roster(roster);
    for entry in store.castle_rush_entries(&[id.to_string()]).await? {
        if entry.score > 0 {
            sheet.set_score(&entry.member_id, entry.score);
        }
    }
    Ok(sheet)
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Participant {
    pub name: String,
    pub score: i64,
}

/// Parses `name score` where the score is the last whitespace-separated token.
pub fn parse_participant(line: &str) -> Option<Participant> {
    let line = line.trim();
    let (name, score) = line.rsplit_once(char::is_whitespace)?;
    let score: i64 = score.replace(',', "").parse().ok()?;
    let name = name.trim();
    if name.is_empty() {
        return None;
    }
    Some(Participant { name: name.to_string(), score })
}

/// Backfills a past event. Names not on the roster become kicked
/// `Historical` members so their scores have somewhere to live.
pub async fn historical<S: GuildStore>(
    store: &S,
    date: NaiveDate,
    participants: &[Participant],
) -> Result<CastleRush> {
    if participants.is_empty() {
        return Err(GuildError::validation("Please add at least one participant"));
    }
    if let Some(p) = participants.iter().find(|p| p.score <= 0) {
        return Err(GuildError::validation(format!(
            "score for {} must be greater than 0",
            p.name
        )));
    }
    if store.castle_rush_on(date).await?.is_some() {
        return Err(GuildError::conflict(format!(
            "An entry already exists for {date}. Delete it first or choose a different date."
        )));
    }

    let roster = store.list_members().await?;
    let known: HashMap<String, String> = roster
        .iter()
        .map(|m| (m.name.to_lowercase(), m.id.clone()))
        .collect();

    let logger = store.create_logger(Some("system")).await?;
    let event = store
        .insert_castle_rush(schedule::castle_for(date).castle, date, &logger.id)
        .await?;

    let unknown: Vec<NewMember> = participants
        .iter()
        .filter(|p| !known.contains_key(&p.name.to_lowercase()))
        .map(|p| NewMember {
            name: p.name.clone(),
            role: Role::Historical,
            kicked: true,
            logger_id: Some(logger.id.clone()),
        })
        .collect();
    let created = store.insert_members(&unknown).await?;
    let mut ids = known;
    for m in &created {
        ids.insert(m.name.to_lowercase(), m.id.clone());
    }

    let rows: Vec<NewCastleRushEntry> = participants
        .iter()
        .filter_map(|p| {
            ids.get(&p.name.to_lowercase()).map(|id| NewCastleRushEntry {
                castle_rush_id: event.id.clone(),
                member_id: id.clone(),
                attendance: true,
                score: p.score,
                logger_id: Some(logger.id.clone()),
            })
        })
        .collect();
    store.insert_castle_rush_entries(&rows).await?;

    info!(
        id = %event.id,
        %date,
        current = participants.len() - created.len(),
        historical = created.len(),
        "historical castle rush created"
    );
    Ok(event)
}

/// Deletes the entries, then the event.
pub async fn delete<S: GuildStore>(store: &S, id: &str) -> Result<()> {
    store.delete_castle_rush_entries(id).await?;
    store.delete_castle_rush(id).await?;
    info!(id, "castle rush deleted");
    Ok(())
}

/// Each member's best score at `castle`, for ordering the sheet.
pub async fn best_scores_at<S: GuildStore>(store: &S, castle: &str) -> Result<HashMap<String, i64>> {
    let ids: Vec<String> = store
        .castle_rushes_at(castle)
        .await?
        .into_iter()
        .map(|c| c.id)
        .collect();
    let mut best = HashMap::new();
    if ids.is_empty() {
        return Ok(best);
    }
    for entry in store.castle_rush_entries(&ids).await? {
        let slot = best.entry(entry.member_id).or_insert(0);
        if entry.score > *slot {
            *slot = entry.score;
        }
    }
    Ok(best)
}

#[derive(Clone, Debug, PartialEq)]
pub struct RankedEntry {
    pub member_id: String,
    pub name: String,
    pub role: Role,
    pub score: i64,
    pub attendance: bool,
}

/// An event with its entries joined to member names, highest score first.
#[derive(Clone, Debug)]
pub struct CastleRushReport {
    pub event: CastleRush,
    pub entries: Vec<RankedEntry>,
}

impl CastleRushReport {
    pub fn attended(&self) -> impl Iterator<Item = &RankedEntry> {
        self.entries.iter().filter(|e| e.attendance)
    }

    pub fn total_score(&self) -> i64 {
        self.attended().map(|e| e.score).sum()
    }

    pub fn attendance_count(&self) -> usize {
        self.attended().count()
    }

    pub fn average_score(&self) -> i64 {
        rounded_average(self.total_score(), self.attendance_count())
    }

    pub fn grade(&self) -> Grade {
        castle_rush_grade(self.total_score())
    }
}

pub(crate) fn rounded_average(total: i64, count: usize) -> i64 {
    if count == 0 {
        return 0;
    }
    (total as f64 / count as f64).round() as i64
}

pub(crate) fn join_members<'a>(
    roster: &'a [Member],
) -> impl Fn(&str) -> (String, Role) + 'a {
    let by_id: HashMap<&str, &Member> = roster.iter().map(|m| (m.id.as_str(), m)).collect();
    move |id: &str| match by_id.get(id) {
        Some(m) => (m.name.clone(), m.role),
        None => ("Unknown".to_string(), Role::Member),
    }
}

pub async fn report<S: GuildStore>(store: &S, id: &str) -> Result<CastleRushReport> {
    let event = store
        .castle_rush(id)
        .await?
        .ok_or_else(|| GuildError::not_found(format!("castle rush {id}")))?;
    build_report(store, event).await
}

/// Report for the event on `date`, if one was recorded.
pub async fn entries_on<S: GuildStore>(store: &S, date: NaiveDate) -> Result<Option<CastleRushReport>> {
    match store.castle_rush_on(date).await? {
        Some(event) => Ok(Some(build_report(store, event).await?)),
        None => Ok(None),
    }
}

async fn build_report<S: GuildStore>(store: &S, event: CastleRush) -> Result<CastleRushReport> {
    let roster = store.list_members().await?;
    let lookup = join_members(&roster);
    let mut entries: Vec<RankedEntry> = store
        .castle_rush_entries(std::slice::from_ref(&event.id))
        .await?
        .into_iter()
        .map(|e| {
            let (name, role) = lookup(&e.member_id);
            RankedEntry {
                member_id: e.member_id,
                name,
                role,
                score: e.score,
                attendance: e.attendance,
            }
        })
        .collect();
    entries.sort_by(|a, b| b.score.cmp(&a.score));
    Ok(CastleRushReport { event, entries })
}

/// Days of `year`-`month` with a recorded event.
pub async fn dates_in_month<S: GuildStore>(store: &S, year: i32, month: u32) -> Result<HashSet<NaiveDate>> {
    let (first, last) = schedule::month_bounds(year, month)
        .ok_or_else(|| GuildError::validation(format!("{year}-{month:02} is not a valid month")))?;
    Ok(store
        .castle_rushes_between(first, last)
        .await?
        .into_iter()
        .map(|e| e.date)
        .collect())
}

/// Recent events with their totals, most recent first.
pub async fn list<S: GuildStore>(store: &S, limit: usize) -> Result<Vec<(CastleRush, i64, usize)>> {
    let events = store.castle_rushes(limit).await?;
    let ids: Vec<String> = events.iter().map(|e| e.id.clone()).collect();
    let entries = if ids.is_empty() {
        Vec::new()
    } else {
        store.castle_rush_entries(&ids).await?
    };
    Ok(events
        .into_iter()
        .map(|event| {
            let mine = entries.iter().filter(|e| e.castle_rush_id == event.id);
            let (total, attended) = mine.fold((0i64, 0usize), |(t, a), e| {
                (t + e.score, a + usize::from(e.attendance))
            });
            (event, total, attended)
        })
        .collect())
}
