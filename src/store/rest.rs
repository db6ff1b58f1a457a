//! PostgREST client for the hosted backend.
//! Tables live under `{url}/rest/v1/{table}`; the service key goes in both the
//! `apikey` header and the bearer token.

use chrono::NaiveDate;
use reqwest::{Client, RequestBuilder, Response, StatusCode};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::time::Duration;
use tracing::debug;

use super::{GuildStore, MEMBER_LIMIT};
use crate::error::{GuildError, Result};
use crate::model::{
    AdventEntry, AdventExpedition, CastleRush, CastleRushEntry, Logger, Member, MemberPatch,
    NewAdventEntry, NewCastleRushEntry, NewMember,
};

const TIMEOUT_SECS: u64 = 30;
// Keeps `in.(...)` filters well under URL length limits.
const IN_CHUNK: usize = 100;
/// PostgREST caps responses at `max-rows` (1000 by default).
const PAGE_SIZE: usize = 1000;

type Query = Vec<(&'static str, String)>;

pub struct RestStore {
    client: Client,
    base_url: String,
    key: String,
}

/// PostgREST error body.
#[derive(Deserialize)]
struct ApiError {
    #[serde(default)]
    message: Option<String>,
    #[serde(default)]
    code: Option<String>,
}

impl RestStore {
    pub fn new(base_url: &str, key: &str) -> Result<Self> {
        if base_url.trim().is_empty() || key.trim().is_empty() {
            return Err(GuildError::validation(
                "backend url and key are required (SUPABASE_URL / SUPABASE_SERVICE_ROLE_KEY)",
            ));
        }
        let client = Client::builder()
            .timeout(Duration::from_secs(TIMEOUT_SECS))
            .build()?;
        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            key: key.to_string(),
        })
    }

    fn table_url(&self, table: &str) -> String {
        format!("{}/rest/v1/{}", self.base_url, table)
    }

    fn authed(&self, rb: RequestBuilder) -> RequestBuilder {
        rb.header("apikey", &self.key).bearer_auth(&self.key)
    }

    async fn select<T: DeserializeOwned>(&self, table: &str, query: Query) -> Result<Vec<T>> {
        debug!(table, ?query, "select");
        let response = self
            .authed(self.client.get(self.table_url(table)))
            .query(&query)
            .send()
            .await?;
        Ok(check(response).await?.json().await?)
    }

    async fn insert<B, T>(&self, table: &str, rows: &B) -> Result<Vec<T>>
    where
        B: Serialize + ?Sized,
        T: DeserializeOwned,
    {
        debug!(table, "insert");
        let response = self
            .authed(self.client.post(self.table_url(table)))
            .header("Prefer", "return=representation")
            .query(&[("select", "*")])
            .json(rows)
            .send()
            .await?;
        Ok(check(response).await?.json().await?)
    }

    async fn insert_minimal<B: Serialize + ?Sized>(&self, table: &str, rows: &B) -> Result<()> {
        debug!(table, "insert (minimal)");
        let response = self
            .authed(self.client.post(self.table_url(table)))
            .header("Prefer", "return=minimal")
            .json(rows)
            .send()
            .await?;
        check(response).await?;
        Ok(())
    }

    async fn delete(&self, table: &str, query: Query) -> Result<()> {
        debug!(table, ?query, "delete");
        let response = self
            .authed(self.client.delete(self.table_url(table)))
            .query(&query)
            .send()
            .await?;
        check(response).await?;
        Ok(())
    }

    async fn insert_one<B, T>(&self, table: &str, row: &B) -> Result<T>
    where
        B: Serialize + ?Sized,
        T: DeserializeOwned,
    {
        self.insert::<B, T>(table, row)
            .await?
            .into_iter()
            .next()
            .ok_or_else(|| GuildError::Backend {
                status: 200,
                message: format!("insert into {table} returned no row"),
            })
    }

    async fn select_in<T: DeserializeOwned>(
        &self,
        table: &str,
        column: &'static str,
        ids: &[String],
    ) -> Result<Vec<T>> {
        let mut rows = Vec::new();
        for chunk in ids.chunks(IN_CHUNK) {
            let query = vec![("select", "*".to_string()), (column, in_list(chunk))];
            rows.extend(self.select::<T>(table, query).await?);
        }
        Ok(rows)
    }

    /// Every row of `table`, fetched page by page in id order.
    async fn select_all<T: DeserializeOwned>(&self, table: &str) -> Result<Vec<T>> {
        collect_pages(PAGE_SIZE, move |offset, limit| {
            let query = vec![
                ("select", "*".to_string()),
                ("order", "id.asc".to_string()),
                ("offset", offset.to_string()),
                ("limit", limit.to_string()),
            ];
            self.select::<T>(table, query)
        })
        .await
    }
}

/// Calls `fetch(offset, limit)` until a page comes back short.
async fn collect_pages<T, F, Fut>(page_size: usize, mut fetch: F) -> Result<Vec<T>>
where
    F: FnMut(usize, usize) -> Fut,
    Fut: Future<Output = Result<Vec<T>>>,
{
    let mut rows = Vec::new();
    loop {
        let page = fetch(rows.len(), page_size).await?;
        let short = page.len() < page_size;
        rows.extend(page);
        if short {
            return Ok(rows);
        }
        debug!(rows = rows.len(), "fetching next page");
    }
}

async fn check(response: Response) -> Result<Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response.text().await.unwrap_or_default();
    let parsed: Option<ApiError> = serde_json::from_str(&body).ok();
    let message = parsed
        .as_ref()
        .and_then(|e| e.message.clone())
        .unwrap_or_else(|| body.clone());

    // 23505: unique_violation
    let unique = parsed.as_ref().and_then(|e| e.code.as_deref()) == Some("23505");
    if status == StatusCode::CONFLICT || unique {
        return Err(GuildError::Conflict(message));
    }
    Err(GuildError::Backend { status: status.as_u16(), message })
}

fn eq(value: impl std::fmt::Display) -> String {
    format!("eq.{value}")
}

fn in_list(ids: &[String]) -> String {
    let quoted: Vec<String> = ids.iter().map(|id| format!("\"{}\"", id.replace('"', ""))).collect();
    format!("in.({})", quoted.join(","))
}

impl GuildStore for RestStore {
    async fn list_members(&self) -> Result<Vec<Member>> {
        let query = vec![
            ("select", "*".to_string()),
            ("order", "created_at.desc".to_string()),
            ("limit", MEMBER_LIMIT.to_string()),
        ];
        self.select("members", query).await
    }

    async fn members_named(&self, name: &str) -> Result<Vec<Member>> {
        let query = vec![("select", "*".to_string()), ("name", format!("ilike.{name}"))];
        let found: Vec<Member> = self.select("members", query).await?;
        // ilike treats `*`, `%` and `_` as wildcards
        Ok(found
            .into_iter()
            .filter(|m| m.name.to_lowercase() == name.to_lowercase())
            .collect())
    }

    async fn insert_members(&self, rows: &[NewMember]) -> Result<Vec<Member>> {
        if rows.is_empty() {
            return Ok(Vec::new());
        }
        self.insert("members", rows).await
    }

    async fn update_member(&self, id: &str, patch: &MemberPatch) -> Result<Member> {
        let response = self
            .authed(self.client.patch(self.table_url("members")))
            .header("Prefer", "return=representation")
            .query(&[("id", eq(id)), ("select", "*".to_string())])
            .json(patch)
            .send()
            .await?;
        let rows: Vec<Member> = check(response).await?.json().await?;
        rows.into_iter()
            .next()
            .ok_or_else(|| GuildError::not_found(format!("member {id}")))
    }

    async fn delete_member(&self, id: &str) -> Result<()> {
        self.delete("members", vec![("id", eq(id))]).await
    }

    async fn create_logger(&self, logged_by: Option<&str>) -> Result<Logger> {
        let row = match logged_by {
            Some(who) => json!({ "logged_by": who }),
            None => json!({}),
        };
        self.insert_one("logger", &row).await
    }

    async fn castle_rushes(&self, limit: usize) -> Result<Vec<CastleRush>> {
        let query = vec![
            ("select", "*".to_string()),
            ("order", "date.desc".to_string()),
            ("limit", limit.to_string()),
        ];
        self.select("castle_rush", query).await
    }

    async fn castle_rush(&self, id: &str) -> Result<Option<CastleRush>> {
        let rows: Vec<CastleRush> = self
            .select("castle_rush", vec![("select", "*".to_string()), ("id", eq(id))])
            .await?;
        Ok(rows.into_iter().next())
    }

    async fn castle_rush_on(&self, date: NaiveDate) -> Result<Option<CastleRush>> {
        let rows: Vec<CastleRush> = self
            .select("castle_rush", vec![("select", "*".to_string()), ("date", eq(date))])
            .await?;
        Ok(rows.into_iter().next())
    }

    async fn castle_rushes_at(&self, castle: &str) -> Result<Vec<CastleRush>> {
        self.select("castle_rush", vec![("select", "*".to_string()), ("castle", eq(castle))])
            .await
    }

    async fn castle_rushes_between(&self, from: NaiveDate, to: NaiveDate) -> Result<Vec<CastleRush>> {
        let query = vec![
            ("select", "*".to_string()),
            ("date", format!("gte.{from}")),
            ("date", format!("lte.{to}")),
            ("order", "date.asc".to_string()),
        ];
        self.select("castle_rush", query).await
    }

    async fn insert_castle_rush(&self, castle: &str, date: NaiveDate, logger_id: &str) -> Result<CastleRush> {
        let row = json!({ "castle": castle, "date": date, "logger_id": logger_id });
        self.insert_one("castle_rush", &row).await
    }

    async fn delete_castle_rush(&self, id: &str) -> Result<()> {
        self.delete("castle_rush", vec![("id", eq(id))]).await
    }

    async fn castle_rush_entries(&self, castle_rush_ids: &[String]) -> Result<Vec<CastleRushEntry>> {
        self.select_in("castle_rush_entry", "castle_rush_id", castle_rush_ids)
            .await
    }

    async fn all_castle_rush_entries(&self) -> Result<Vec<CastleRushEntry>> {
        self.select_all("castle_rush_entry").await
    }

    async fn insert_castle_rush_entries(&self, rows: &[NewCastleRushEntry]) -> Result<()> {
        if rows.is_empty() {
            return Ok(());
        }
        self.insert_minimal("castle_rush_entry", rows).await
    }

    async fn delete_castle_rush_entries(&self, castle_rush_id: &str) -> Result<()> {
        self.delete("castle_rush_entry", vec![("castle_rush_id", eq(castle_rush_id))])
            .await
    }

    async fn delete_member_castle_rush_entries(&self, member_id: &str) -> Result<()> {
        self.delete("castle_rush_entry", vec![("member_id", eq(member_id))]).await
    }

    async fn advent_expeditions(&self, since: Option<NaiveDate>, limit: usize) -> Result<Vec<AdventExpedition>> {
        let mut query = vec![
            ("select", "*".to_string()),
            ("order", "date.desc".to_string()),
            ("limit", limit.to_string()),
        ];
        if let Some(since) = since {
            query.push(("date", format!("gte.{since}")));
        }
        self.select("advent_expedition", query).await
    }

    async fn advent_expedition(&self, id: &str) -> Result<Option<AdventExpedition>> {
        let rows: Vec<AdventExpedition> = self
            .select("advent_expedition", vec![("select", "*".to_string()), ("id", eq(id))])
            .await?;
        Ok(rows.into_iter().next())
    }

    async fn advent_expedition_on(&self, date: NaiveDate) -> Result<Option<AdventExpedition>> {
        let rows: Vec<AdventExpedition> = self
            .select("advent_expedition", vec![("select", "*".to_string()), ("date", eq(date))])
            .await?;
        Ok(rows.into_iter().next())
    }

    async fn insert_advent_expedition(&self, date: NaiveDate, logger_id: &str) -> Result<AdventExpedition> {
        let row = json!({ "date": date, "logger_id": logger_id });
        self.insert_one("advent_expedition", &row).await
    }

    async fn delete_advent_expedition(&self, id: &str) -> Result<()> {
        self.delete("advent_expedition", vec![("id", eq(id))]).await
    }

    async fn advent_entries(&self, advent_ids: &[String]) -> Result<Vec<AdventEntry>> {
        self.select_in("advent_expedition_entry", "advent_expedition_id", advent_ids)
            .await
    }

    async fn all_advent_entries(&self) -> Result<Vec<AdventEntry>> {
        self.select_all("advent_expedition_entry").await
    }

    async fn insert_advent_entries(&self, rows: &[NewAdventEntry]) -> Result<()> {
        if rows.is_empty() {
            return Ok(());
        }
        self.insert_minimal("advent_expedition_entry", rows).await
    }

    async fn delete_advent_entries(&self, advent_id: &str) -> Result<()> {
        self.delete("advent_expedition_entry", vec![("advent_expedition_id", eq(advent_id))])
            .await
    }

    async fn delete_member_advent_entries(&self, member_id: &str) -> Result<()> {
        self.delete("advent_expedition_entry", vec![("member_id", eq(member_id))]).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_requires_url_and_key() {
        assert!(matches!(RestStore::new("", "key"), Err(GuildError::Validation(_))));
        assert!(matches!(RestStore::new("https://x.supabase.co", " "), Err(GuildError::Validation(_))));
    }

    #[test]
    fn test_table_url_strips_trailing_slash() {
        let store = RestStore::new("https://x.supabase.co/", "key").unwrap();
        assert_eq!(store.table_url("members"), "https://x.supabase.co/rest/v1/members");
    }

    #[test]
    fn test_filters() {
        assert_eq!(eq("abc"), "eq.abc");
        assert_eq!(in_list(&["a".into(), "b\"c".into()]), "in.(\"a\",\"bc\")");
    }

    async fn paged(rows: &[u32], page_size: usize) -> (Vec<u32>, Vec<usize>) {
        let mut offsets = Vec::new();
        let all = collect_pages(page_size, |offset, limit| {
            offsets.push(offset);
            let page: Vec<u32> = rows.iter().skip(offset).take(limit).copied().collect();
            async move { Ok(page) }
        })
        .await
        .unwrap();
        (all, offsets)
    }

    #[tokio::test]
    async fn test_collect_pages_reads_past_the_row_cap() {
        let rows: Vec<u32> = (0..25).collect();
        let (all, offsets) = paged(&rows, 10).await;
        assert_eq!(all, rows);
        assert_eq!(offsets, vec![0, 10, 20]);

        let (all, offsets) = paged(&rows[..20], 10).await;
        assert_eq!(all.len(), 20);
        assert_eq!(offsets, vec![0, 10, 20]);

        let (all, offsets) = paged(&[], 10).await;
        assert!(all.is_empty());
        assert_eq!(offsets, vec![0]);
    }

    #[tokio::test]
    #[ignore = "requires SUPABASE_URL and SUPABASE_SERVICE_ROLE_KEY"]
    async fn test_live_member_listing() {
        let url = std::env::var("SUPABASE_URL").unwrap();
        let key = std::env::var("SUPABASE_SERVICE_ROLE_KEY").unwrap();
        let store = RestStore::new(&url, &key).unwrap();
        let members = store.list_members().await.unwrap();
        assert!(members.len() <= MEMBER_LIMIT);
    }
}
