//! Event exports: Discord message text, Discord webhook embeds and JSON
//! documents for Castle Rush and Advent Expedition reports.

use chrono::{DateTime, NaiveDate, SecondsFormat, Utc};
use reqwest::Client;
use serde::Serialize;
use std::time::Duration;
use tracing::info;

use crate::advent::AdventReport;
use crate::castle_rush::CastleRushReport;
use crate::error::{GuildError, Result};
use crate::model::Role;

const FOOTER: &str = "7K Guild Management";
const FIELD_LIMIT: usize = 1024;
const FIELD_CUT: usize = 1020;
const WEBHOOK_TIMEOUT_SECS: u64 = 15;

// *************** Formatting ***************

/// `1234567` -> `1,234,567`.
pub fn thousands(n: i64) -> String {
    let digits = n.unsigned_abs().to_string();
    let mut out = String::with_capacity(digits.len() + digits.len() / 3 + 1);
    if n < 0 {
        out.push('-');
    }
    for (i, c) in digits.chars().enumerate() {
        if i > 0 && (digits.len() - i) % 3 == 0 {
            out.push(',');
        }
        out.push(c);
    }
    out
}

/// `Monday, October 19, 2026`
pub fn long_date(date: NaiveDate) -> String {
    date.format("%A, %B %-d, %Y").to_string()
}

/// `October 19, 2026`
pub fn month_date(date: NaiveDate) -> String {
    date.format("%B %-d, %Y").to_string()
}

fn medal(rank: usize) -> String {
    match rank {
        0 => "🥇".to_string(),
        1 => "🥈".to_string(),
        2 => "🥉".to_string(),
        n => format!("{}.", n + 1),
    }
}

fn member_lines<'a>(rows: impl Iterator<Item = (&'a str, Role, i64)>) -> String {
    rows.enumerate()
        .map(|(i, (name, role, score))| {
            format!("{} **{}** [{}] - {}\n", medal(i), name, role, thousands(score))
        })
        .collect()
}

/// Discord rejects field values over 1024 characters.
fn field_value(text: &str) -> String {
    if text.chars().count() > FIELD_LIMIT {
        let cut: String = text.chars().take(FIELD_CUT).collect();
        format!("{cut}...")
    } else {
        text.to_string()
    }
}

/// Title, date line, performance block and member list shared by the text
/// and embed renderings.
struct Message {
    title: String,
    date: String,
    performance: String,
    members: String,
    color: u32,
}

impl Message {
    fn castle_rush(report: &CastleRushReport) -> Self {
        let attended: Vec<_> = report.attended().collect();
        let performance = format!(
            "• Total Score: **{}** ({})\n• Attendance: **{}** members\n• Average Score: **{}**",
            thousands(report.total_score()),
            report.grade(),
            attended.len(),
            thousands(report.average_score()),
        );
        Self {
            title: format!("🏰 Castle Rush - {}", report.event.castle),
            date: long_date(report.event.date),
            performance,
            members: member_lines(attended.iter().map(|e| (e.name.as_str(), e.role, e.score))),
            color: report.grade().color_value(),
        }
    }

    fn advent(report: &AdventReport) -> Self {
        let performance = format!(
            "• Total Score: **{}** ({})\n• Participants: **{}** members\n• Average Score: **{}**",
            thousands(report.total_score()),
            report.grade(),
            report.unique_participants(),
            thousands(report.average_score()),
        );
        Self {
            title: "🐉 Advent Expedition".to_string(),
            date: month_date(report.event.date),
            performance,
            members: member_lines(
                report
                    .members
                    .iter()
                    .map(|m| (m.name.as_str(), m.role, m.total_score)),
            ),
            color: report.grade().color_value(),
        }
    }

    fn text(&self) -> String {
        format!(
            "**{}**\n📅 {}\n\n**Guild Performance:**\n{}\n\n**Member Scores:**\n{}",
            self.title, self.date, self.performance, self.members
        )
    }

    fn embed(&self, timestamp: DateTime<Utc>) -> WebhookPayload {
        WebhookPayload {
            embeds: vec![Embed {
                title: self.title.clone(),
                description: format!("📅 {}", self.date),
                color: self.color,
                fields: vec![
                    EmbedField {
                        name: "📊 Guild Performance".to_string(),
                        value: self.performance.clone(),
                        inline: false,
                    },
                    EmbedField {
                        name: "👥 Member Scores".to_string(),
                        value: field_value(&self.members),
                        inline: false,
                    },
                ],
                timestamp: timestamp.to_rfc3339_opts(SecondsFormat::Millis, true),
                footer: EmbedFooter { text: FOOTER.to_string() },
            }],
        }
    }
}

pub fn castle_rush_text(report: &CastleRushReport) -> String {
    Message::castle_rush(report).text()
}

pub fn advent_text(report: &AdventReport) -> String {
    Message::advent(report).text()
}

// *************** Webhook ***************

#[derive(Clone, Debug, Serialize)]
pub struct WebhookPayload {
    pub embeds: Vec<Embed>,
}

#[derive(Clone, Debug, Serialize)]
pub struct Embed {
    pub title: String,
    pub description: String,
    pub color: u32,
    pub fields: Vec<EmbedField>,
    pub timestamp: String,
    pub footer: EmbedFooter,
}

#[derive(Clone, Debug, Serialize)]
pub struct EmbedField {
    pub name: String,
    pub value: String,
    pub inline: bool,
}

#[derive(Clone, Debug, Serialize)]
pub struct EmbedFooter {
    pub text: String,
}

pub fn castle_rush_embed(report: &CastleRushReport, timestamp: DateTime<Utc>) -> WebhookPayload {
    Message::castle_rush(report).embed(timestamp)
}

pub fn advent_embed(report: &AdventReport, timestamp: DateTime<Utc>) -> WebhookPayload {
    Message::advent(report).embed(timestamp)
}

/// Posts an embed to the configured Discord webhook.
pub async fn post_webhook(webhook: Option<&str>, payload: &WebhookPayload) -> Result<()> {
    let url = webhook
        .filter(|u| !u.trim().is_empty())
        .ok_or_else(|| GuildError::validation("Discord webhook not configured"))?;

    let client = Client::builder()
        .timeout(Duration::from_secs(WEBHOOK_TIMEOUT_SECS))
        .build()?;
    let response = client.post(url).json(payload).send().await?;

    let status = response.status();
    if !status.is_success() {
        let message = response.text().await.unwrap_or_default();
        return Err(GuildError::Backend { status: status.as_u16(), message });
    }
    info!(title = %payload.embeds.first().map(|e| e.title.as_str()).unwrap_or(""), "posted to Discord");
    Ok(())
}

// *************** JSON documents ***************

#[derive(Debug, Serialize)]
pub struct CastleRushDocument {
    pub event_type: &'static str,
    pub event_id: String,
    pub castle: String,
    pub date: NaiveDate,
    pub created_at: Option<String>,
    pub summary: CastleRushSummary,
    pub entries: Vec<CastleRushLine>,
}

#[derive(Debug, Serialize)]
pub struct CastleRushSummary {
    pub total_score: i64,
    pub attendance_count: usize,
    pub total_members: usize,
    pub average_score: i64,
    pub grade: &'static str,
}

#[derive(Debug, Serialize)]
pub struct CastleRushLine {
    pub member_id: String,
    pub member_name: String,
    pub member_role: Role,
    pub score: i64,
    pub attendance: bool,
}

pub fn castle_rush_document(report: &CastleRushReport) -> CastleRushDocument {
    CastleRushDocument {
        event_type: "castle_rush",
        event_id: report.event.id.clone(),
        castle: report.event.castle.clone(),
        date: report.event.date,
        created_at: report.event.created_at.clone(),
        summary: CastleRushSummary {
            total_score: report.total_score(),
            attendance_count: report.attendance_count(),
            total_members: report.entries.len(),
            average_score: report.average_score(),
            grade: report.grade().label(),
        },
        entries: report
            .entries
            .iter()
            .map(|e| CastleRushLine {
                member_id: e.member_id.clone(),
                member_name: e.name.clone(),
                member_role: e.role,
                score: e.score,
                attendance: e.attendance,
            })
            .collect(),
    }
}

#[derive(Debug, Serialize)]
pub struct AdventDocument {
    pub event_type: &'static str,
    pub event_id: String,
    pub date: NaiveDate,
    pub created_at: Option<String>,
    pub summary: AdventSummary,
    pub entries: Vec<AdventLine>,
}

#[derive(Debug, Serialize)]
pub struct AdventSummary {
    pub total_score: i64,
    pub unique_participants: usize,
    pub total_entries: usize,
    pub average_score: i64,
    pub grade: &'static str,
}

#[derive(Debug, Serialize)]
pub struct AdventLine {
    pub member_id: String,
    pub member_name: String,
    pub member_role: Role,
    pub boss: crate::model::Boss,
    pub total_score: i64,
    pub attendance: bool,
}

pub fn advent_document(report: &AdventReport) -> AdventDocument {
    AdventDocument {
        event_type: "advent_expedition",
        event_id: report.event.id.clone(),
        date: report.event.date,
        created_at: report.event.created_at.clone(),
        summary: AdventSummary {
            total_score: report.total_score(),
            unique_participants: report.unique_participants(),
            total_entries: report.total_entries,
            average_score: report.average_score(),
            grade: report.grade().label(),
        },
        entries: report
            .entries
            .iter()
            .map(|e| AdventLine {
                member_id: e.member_id.clone(),
                member_name: e.name.clone(),
                member_role: e.role,
                boss: e.boss,
                total_score: e.total_score,
                attendance: e.attendance,
            })
            .collect(),
    }
}

pub fn castle_rush_file_name(report: &CastleRushReport) -> String {
    format!("castle-rush-{}-{}.json", report.event.castle, report.event.date)
}

pub fn advent_file_name(report: &AdventReport) -> String {
    format!("advent-expedition-{}.json", report.event.date)
}

/// Pretty JSON with two-space indentation.
pub fn to_pretty_json<T: Serialize>(doc: &T) -> Result<String> {
    Ok(serde_json::to_string_pretty(doc)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::advent::{BossEntry, MemberTotal};
    use crate::castle_rush::RankedEntry;
    use crate::model::{AdventExpedition, Boss, CastleRush};
    use std::collections::BTreeMap;

    fn ranked(name: &str, role: Role, score: i64) -> RankedEntry {
        RankedEntry {
            member_id: name.to_lowercase(),
            name: name.into(),
            role,
            score,
            attendance: score > 0,
        }
    }

    fn castle_report() -> CastleRushReport {
        CastleRushReport {
            event: CastleRush {
                id: "cr1".into(),
                castle: "Guardian's Castle".into(),
                date: NaiveDate::from_ymd_opt(2026, 10, 19).unwrap(),
                logger_id: None,
                created_at: Some("2026-10-19T12:00:00Z".into()),
            },
            entries: vec![
                ranked("Aria", Role::Healer, 3_000_000),
                ranked("Bolt", Role::Tank, 2_000_000),
                ranked("Cid", Role::Member, 1_000_000),
                ranked("Dax", Role::Dps, 500_000),
                ranked("Eve", Role::Member, 0),
            ],
        }
    }

    fn advent_report() -> AdventReport {
        let total = |name: &str, score: i64| MemberTotal {
            member_id: name.to_lowercase(),
            name: name.into(),
            role: Role::Member,
            total_score: score,
            bosses: BTreeMap::new(),
        };
        let mut boss_totals = BTreeMap::new();
        boss_totals.insert(Boss::Teo, 30_000_000);
        boss_totals.insert(Boss::Kyle, 1_000_001);
        AdventReport {
            event: AdventExpedition {
                id: "ae1".into(),
                date: NaiveDate::from_ymd_opt(2026, 10, 1).unwrap(),
                logger_id: None,
                created_at: None,
            },
            members: vec![total("Aria", 30_000_000), total("Bolt", 1_000_001)],
            entries: vec![
                BossEntry {
                    member_id: "aria".into(),
                    name: "Aria".into(),
                    role: Role::Member,
                    boss: Boss::Teo,
                    total_score: 30_000_000,
                    attendance: true,
                },
                BossEntry {
                    member_id: "bolt".into(),
                    name: "Bolt".into(),
                    role: Role::Member,
                    boss: Boss::Kyle,
                    total_score: 1_000_001,
                    attendance: true,
                },
            ],
            total_entries: 2,
            boss_totals,
        }
    }

    #[test]
    fn test_thousands() {
        assert_eq!(thousands(0), "0");
        assert_eq!(thousands(999), "999");
        assert_eq!(thousands(1000), "1,000");
        assert_eq!(thousands(6_500_000), "6,500,000");
        assert_eq!(thousands(-1234), "-1,234");
    }

    #[test]
    fn test_dates() {
        let d = NaiveDate::from_ymd_opt(2026, 10, 5).unwrap();
        assert_eq!(long_date(d), "Monday, October 5, 2026");
        assert_eq!(month_date(d), "October 5, 2026");
    }

    #[test]
    fn test_castle_rush_text() {
        let text = castle_rush_text(&castle_report());
        let expected = "**🏰 Castle Rush - Guardian's Castle**\n\
            📅 Monday, October 19, 2026\n\
            \n\
            **Guild Performance:**\n\
            • Total Score: **6,500,000** (C)\n\
            • Attendance: **4** members\n\
            • Average Score: **1,625,000**\n\
            \n\
            **Member Scores:**\n\
            🥇 **Aria** [Healer] - 3,000,000\n\
            🥈 **Bolt** [Tank] - 2,000,000\n\
            🥉 **Cid** [Member] - 1,000,000\n\
            4. **Dax** [DPS] - 500,000\n";
        assert_eq!(text, expected);
    }

    #[test]
    fn test_advent_text_header() {
        let text = advent_text(&advent_report());
        assert!(text.starts_with("**🐉 Advent Expedition**\n📅 October 1, 2026\n"));
        assert!(text.contains("• Total Score: **31,000,001** (C)"));
        assert!(text.contains("• Participants: **2** members"));
        assert!(text.contains("• Average Score: **15,500,001**"));
    }

    #[test]
    fn test_embed_shape() {
        let ts = DateTime::parse_from_rfc3339("2026-10-19T20:00:00Z").unwrap().with_timezone(&Utc);
        let payload = castle_rush_embed(&castle_report(), ts);
        let json = serde_json::to_value(&payload).unwrap();
        let embed = &json["embeds"][0];
        assert_eq!(embed["title"], "🏰 Castle Rush - Guardian's Castle");
        assert_eq!(embed["description"], "📅 Monday, October 19, 2026");
        assert_eq!(embed["color"], 0x006400);
        assert_eq!(embed["fields"].as_array().unwrap().len(), 2);
        assert_eq!(embed["fields"][1]["inline"], false);
        assert_eq!(embed["footer"]["text"], "7K Guild Management");
        assert_eq!(embed["timestamp"], "2026-10-19T20:00:00.000Z");
    }

    #[test]
    fn test_long_member_list_is_truncated() {
        let long = "x".repeat(1500);
        let value = field_value(&long);
        assert_eq!(value.chars().count(), 1023);
        assert!(value.ends_with("..."));
        assert_eq!(field_value("short"), "short");
        assert_eq!(field_value(&"y".repeat(1024)).len(), 1024);
    }

    #[test]
    fn test_castle_rush_document() {
        let report = castle_report();
        let json = serde_json::to_value(castle_rush_document(&report)).unwrap();
        assert_eq!(json["event_type"], "castle_rush");
        assert_eq!(json["date"], "2026-10-19");
        assert_eq!(json["summary"]["total_score"], 6_500_000);
        assert_eq!(json["summary"]["attendance_count"], 4);
        assert_eq!(json["summary"]["total_members"], 5);
        assert_eq!(json["summary"]["grade"], "C");
        assert_eq!(json["entries"][0]["member_name"], "Aria");
        assert_eq!(json["entries"][3]["member_role"], "DPS");
        assert_eq!(castle_rush_file_name(&report), "castle-rush-Guardian's Castle-2026-10-19.json");
    }

    #[test]
    fn test_advent_document() {
        let report = advent_report();
        let json = serde_json::to_value(advent_document(&report)).unwrap();
        assert_eq!(json["event_type"], "advent_expedition");
        assert_eq!(json["summary"]["unique_participants"], 2);
        assert_eq!(json["summary"]["total_entries"], 2);
        assert_eq!(json["entries"][0]["boss"], "Teo");
        assert!(json["created_at"].is_null());
        assert_eq!(advent_file_name(&report), "advent-expedition-2026-10-01.json");
    }

    #[tokio::test]
    async fn test_post_without_webhook_is_validation_error() {
        let payload = advent_embed(&advent_report(), Utc::now());
        let err = post_webhook(None, &payload).await.unwrap_err();
        assert_eq!(err.to_string(), "Discord webhook not configured");
        assert!(post_webhook(Some("  "), &payload).await.is_err());
    }
}
