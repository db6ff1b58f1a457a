//! Member analysis and the guild overview, computed from raw entries.
//!
//! Everything here is pure over rows already fetched; [`load_member_stats`] and
//! [`load_overview`] do the fetching. "Today" is always passed in so the
//! numbers are reproducible.

use chrono::{Datelike, NaiveDate};
use std::collections::HashMap;

use crate::error::Result;
use crate::model::{CastleRush, Member, Role};
use crate::store::GuildStore;

/// Cap on event rows read for the overview.
pub const HISTORY_LIMIT: usize = 10_000;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum EventKind {
    CastleRush,
    Advent,
}

/// One entry of either event type, flattened to what the metrics need.
#[derive(Clone, Debug, PartialEq)]
pub struct ScoredEntry {
    pub member_id: String,
    pub date: NaiveDate,
    pub attendance: bool,
    pub score: i64,
    pub kind: EventKind,
}

#[derive(Clone, Debug, PartialEq)]
pub struct MemberStats {
    pub member_id: String,
    pub name: String,
    pub role: Role,
    pub total_entries: usize,
    pub attendance_rate: f64,
    /// Mean score over entries dated within the last 7 days, today included.
    pub average_score: f64,
    pub score_breakdown: String,
    pub highest_score: i64,
    pub lowest_score: i64,
    pub consistency: f64,
    pub last_entry: Option<NaiveDate>,
    pub days_since_last_entry: Option<i64>,
    /// Attended entries per day, oldest first; the last slot is today.
    pub weekly_activity: [u32; 7],
    pub castle_rush_entries: usize,
    pub advent_entries: usize,
    pub castle_rush_attendance: f64,
    pub advent_attendance: f64,
}

fn rate(attended: usize, total: usize) -> f64 {
    if total == 0 {
        0.0
    } else {
        attended as f64 / total as f64 * 100.0
    }
}

fn consistency(scores: &[i64]) -> f64 {
    if scores.len() < 2 {
        return 0.0;
    }
    let n = scores.len() as f64;
    let mean = scores.iter().sum::<i64>() as f64 / n;
    let variance = scores
        .iter()
        .map(|s| {
            let diff = *s as f64 - mean;
            diff * diff
        })
        .sum::<f64>()
        / n;
    (100.0 - variance.sqrt() / 10.0).max(0.0)
}

/// Stats for every member that has not been kicked.
pub fn member_stats(members: &[Member], entries: &[ScoredEntry], today: NaiveDate) -> Vec<MemberStats> {
    let mut by_member: HashMap<&str, Vec<&ScoredEntry>> = HashMap::new();
    for e in entries {
        by_member.entry(e.member_id.as_str()).or_default().push(e);
    }

    members
        .iter()
        .filter(|m| !m.kicked)
        .map(|m| {
            let mut mine = by_member.remove(m.id.as_str()).unwrap_or_default();
            mine.sort_by(|a, b| b.date.cmp(&a.date));
            one_member(m, &mine, today)
        })
        .collect()
}

fn one_member(member: &Member, entries: &[&ScoredEntry], today: NaiveDate) -> MemberStats {
    let recent: Vec<i64> = entries
        .iter()
        .filter(|e| (today - e.date).num_days() < 7)
        .map(|e| e.score)
        .collect();
    let average_score = if recent.is_empty() {
        0.0
    } else {
        recent.iter().sum::<i64>() as f64 / recent.len() as f64
    };
    let score_breakdown = if recent.is_empty() {
        "No entries in last 7 days".to_string()
    } else {
        let parts: Vec<String> = recent.iter().map(i64::to_string).collect();
        format!("({}) / {} = {:.0}", parts.join(" + "), recent.len(), average_score)
    };

    let positive: Vec<i64> = entries.iter().map(|e| e.score).filter(|s| *s > 0).collect();

    let attended = entries.iter().filter(|e| e.attendance).count();
    let of_kind = |kind: EventKind| {
        let all = entries.iter().filter(|e| e.kind == kind);
        let total = all.clone().count();
        (total, rate(all.filter(|e| e.attendance).count(), total))
    };
    let (castle_rush_entries, castle_rush_attendance) = of_kind(EventKind::CastleRush);
    let (advent_entries, advent_attendance) = of_kind(EventKind::Advent);

    let last_entry = entries.first().map(|e| e.date);
    let mut weekly_activity = [0u32; 7];
    for e in entries.iter().filter(|e| e.attendance) {
        let ago = (today - e.date).num_days();
        if (0..7).contains(&ago) {
            weekly_activity[6 - ago as usize] += 1;
        }
    }

    MemberStats {
        member_id: member.id.clone(),
        name: member.name.clone(),
        role: member.role,
        total_entries: entries.len(),
        attendance_rate: rate(attended, entries.len()),
        average_score,
        score_breakdown,
        highest_score: positive.iter().copied().max().unwrap_or(0),
        lowest_score: positive.iter().copied().min().unwrap_or(0),
        consistency: consistency(&positive),
        last_entry,
        days_since_last_entry: last_entry.map(|d| (today - d).num_days()),
        weekly_activity,
        castle_rush_entries,
        advent_entries,
        castle_rush_attendance,
        advent_attendance,
    }
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct GuildMetrics {
    pub active_members: usize,
    pub average_attendance: f64,
    pub guild_average_score: f64,
    pub top_performers: Vec<MemberStats>,
    pub at_risk: Vec<MemberStats>,
    pub recently_inactive: Vec<MemberStats>,
    pub consistent_performers: Vec<MemberStats>,
    pub total_events: usize,
    pub overall_participation: f64,
}

const SHORTLIST: usize = 5;

fn shortlist<F, K>(stats: &[MemberStats], keep: F, mut order: K) -> Vec<MemberStats>
where
    F: Fn(&MemberStats) -> bool,
    K: FnMut(&MemberStats, &MemberStats) -> std::cmp::Ordering,
{
    let mut picked: Vec<MemberStats> = stats.iter().filter(|s| keep(s)).cloned().collect();
    picked.sort_by(|a, b| order(a, b));
    picked.truncate(SHORTLIST);
    picked
}

pub fn guild_metrics(stats: &[MemberStats]) -> GuildMetrics {
    if stats.is_empty() {
        return GuildMetrics::default();
    }
    let n = stats.len() as f64;
    let average_attendance = stats.iter().map(|s| s.attendance_rate).sum::<f64>() / n;
    let guild_average_score = stats.iter().map(|s| s.average_score).sum::<f64>() / n;

    let top_performers = shortlist(
        stats,
        |s| s.attendance_rate >= 80.0 && s.average_score > guild_average_score,
        |a, b| b.average_score.total_cmp(&a.average_score),
    );
    let at_risk = shortlist(
        stats,
        |s| s.attendance_rate < 60.0 || s.days_since_last_entry.is_some_and(|d| d >= 3),
        |a, b| a.attendance_rate.total_cmp(&b.attendance_rate),
    );
    let recently_inactive = shortlist(
        stats,
        |s| s.days_since_last_entry.is_some_and(|d| d >= 2) && s.total_entries > 5,
        |a, b| b.days_since_last_entry.cmp(&a.days_since_last_entry),
    );
    let consistent_performers = shortlist(
        stats,
        |s| s.total_entries >= 5,
        |a, b| b.consistency.total_cmp(&a.consistency),
    );

    let total_events: usize = stats.iter().map(|s| s.total_entries).sum();
    let total_attended: f64 = stats
        .iter()
        .map(|s| s.total_entries as f64 * s.attendance_rate / 100.0)
        .sum();
    let overall_participation = if total_events > 0 {
        total_attended / total_events as f64 * 100.0
    } else {
        0.0
    };

    GuildMetrics {
        active_members: stats.len(),
        average_attendance,
        guild_average_score,
        top_performers,
        at_risk,
        recently_inactive,
        consistent_performers,
        total_events,
        overall_participation,
    }
}

pub fn format_last_active(days: Option<i64>) -> String {
    match days {
        None => "-".to_string(),
        Some(d) if d <= 1 => "Up to date".to_string(),
        Some(d) if d < 7 => format!("{d}d ago"),
        Some(d) => format!("{}w ago", d / 7),
    }
}

/// Castle Rush headline numbers for the dashboard.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Overview {
    pub total_members: usize,
    pub active_members: usize,
    pub kicked_members: usize,
    pub today_attendance: usize,
    pub today_average_score: i64,
    pub today_top_score: i64,
    pub today_top_scorer: Option<String>,
    /// Attended entries this week vs the week before, in percent.
    pub weekly_trend: f64,
    pub low_performers: usize,
    pub average_attendance: f64,
    pub events_this_month: usize,
    pub last_event: Option<NaiveDate>,
}

/// `entries` are Castle Rush entries only.
pub fn overview(
    members: &[Member],
    events: &[CastleRush],
    entries: &[ScoredEntry],
    today: NaiveDate,
) -> Overview {
    let active: Vec<&Member> = members.iter().filter(|m| !m.kicked).collect();

    let today_attended: Vec<&ScoredEntry> = entries
        .iter()
        .filter(|e| e.date == today && e.attendance)
        .collect();
    let today_scores: Vec<i64> = today_attended.iter().map(|e| e.score).filter(|s| *s > 0).collect();
    let today_top_score = today_scores.iter().copied().max().unwrap_or(0);
    let today_top_scorer = today_attended
        .iter()
        .find(|e| today_top_score > 0 && e.score == today_top_score)
        .and_then(|e| members.iter().find(|m| m.id == e.member_id))
        .map(|m| m.name.clone());

    let ago = |e: &ScoredEntry| (today - e.date).num_days();
    let this_week = entries.iter().filter(|e| e.attendance && ago(e) <= 7).count();
    let last_week = entries
        .iter()
        .filter(|e| e.attendance && ago(e) > 7 && ago(e) <= 14)
        .count();
    let weekly_trend = if last_week > 0 {
        (this_week as f64 - last_week as f64) / last_week as f64 * 100.0
    } else {
        0.0
    };

    let member_rates: Vec<(f64, Option<i64>)> = active
        .iter()
        .map(|m| {
            let mine: Vec<&ScoredEntry> = entries.iter().filter(|e| e.member_id == m.id).collect();
            let attended = mine.iter().filter(|e| e.attendance).count();
            let idle = mine.iter().map(|e| e.date).max().map(|d| (today - d).num_days());
            (rate(attended, mine.len()), idle)
        })
        .collect();
    let low_performers = member_rates
        .iter()
        .filter(|(rate, idle)| *rate < 50.0 || idle.is_none_or(|d| d > 14))
        .count();
    let average_attendance = if member_rates.is_empty() {
        0.0
    } else {
        member_rates.iter().map(|(r, _)| r).sum::<f64>() / member_rates.len() as f64
    };

    let month_start = today.with_day(1).unwrap_or(today);

    Overview {
        total_members: members.len(),
        active_members: active.len(),
        kicked_members: members.len() - active.len(),
        today_attendance: today_attended.len(),
        today_average_score: crate::castle_rush::rounded_average(
            today_scores.iter().sum(),
            today_scores.len(),
        ),
        today_top_score,
        today_top_scorer,
        weekly_trend,
        low_performers,
        average_attendance,
        events_this_month: events.iter().filter(|e| e.date >= month_start).count(),
        last_event: events.iter().map(|e| e.date).max(),
    }
}

async fn castle_rush_entries<S: GuildStore>(store: &S) -> Result<(Vec<CastleRush>, Vec<ScoredEntry>)> {
    let events = store.castle_rushes(HISTORY_LIMIT).await?;
    let dates: HashMap<&str, NaiveDate> = events.iter().map(|e| (e.id.as_str(), e.date)).collect();
    let entries = store
        .all_castle_rush_entries()
        .await?
        .into_iter()
        .filter_map(|e| {
            dates.get(e.castle_rush_id.as_str()).map(|date| ScoredEntry {
                member_id: e.member_id,
                date: *date,
                attendance: e.attendance,
                score: e.score,
                kind: EventKind::CastleRush,
            })
        })
        .collect();
    Ok((events, entries))
}

/// Castle Rush and Advent entries of every member, flattened.
pub async fn load_entries<S: GuildStore>(store: &S) -> Result<Vec<ScoredEntry>> {
    let (_, mut entries) = castle_rush_entries(store).await?;
    entries.extend(store.all_advent_entries().await?.into_iter().map(|e| ScoredEntry {
        member_id: e.member_id,
        date: e.date,
        attendance: e.attendance,
        score: e.total_score,
        kind: EventKind::Advent,
    }));
    Ok(entries)
}

pub async fn load_member_stats<S: GuildStore>(store: &S, today: NaiveDate) -> Result<Vec<MemberStats>> {
    let members = store.list_members().await?;
    let entries = load_entries(store).await?;
    Ok(member_stats(&members, &entries, today))
}

pub async fn load_overview<S: GuildStore>(store: &S, today: NaiveDate) -> Result<Overview> {
    let members = store.list_members().await?;
    let (events, entries) = castle_rush_entries(store).await?;
    Ok(overview(&members, &events, &entries, today))
}

/// A member's entries, newest first, with their stats.
#[derive(Clone, Debug)]
pub struct Profile {
    pub member: Member,
    pub history: Vec<ScoredEntry>,
    pub stats: MemberStats,
}

pub async fn profile<S: GuildStore>(store: &S, member: Member, today: NaiveDate) -> Result<Profile> {
    let mut history: Vec<ScoredEntry> = load_entries(store)
        .await?
        .into_iter()
        .filter(|e| e.member_id == member.id)
        .collect();
    history.sort_by(|a, b| b.date.cmp(&a.date));
    let refs: Vec<&ScoredEntry> = history.iter().collect();
    let stats = one_member(&member, &refs, today);
    Ok(Profile { member, history, stats })
}
