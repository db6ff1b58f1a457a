//! Member roster: create, update, soft-delete (kick), bulk import and the
//! ordering used by the entry sheets.

use std::cmp::Ordering;
use std::collections::HashMap;
use tracing::info;

use crate::error::{GuildError, Result};
use crate::model::{Member, MemberPatch, NewMember, Role};
use crate::store::GuildStore;

pub async fn list<S: GuildStore>(store: &S, include_kicked: bool) -> Result<Vec<Member>> {
    let mut members = store.list_members().await?;
    if !include_kicked {
        members.retain(|m| !m.kicked);
    }
    Ok(members)
}

/// Adds one member. Names are unique ignoring case.
pub async fn add<S: GuildStore>(
    store: &S,
    name: &str,
    role: &str,
    logged_by: Option<&str>,
) -> Result<Member> {
    let name = name.trim();
    if name.is_empty() {
        return Err(GuildError::validation("Name is required"));
    }
    let role = Role::normalize(role);

    if !store.members_named(name).await?.is_empty() {
        return Err(GuildError::conflict("Member with that name already exists"));
    }

    let logger = store.create_logger(logged_by).await?;
    let row = NewMember {
        name: name.to_string(),
        role,
        kicked: false,
        logger_id: Some(logger.id),
    };
    let member = store
        .insert_members(std::slice::from_ref(&row))
        .await?
        .into_iter()
        .next()
        .ok_or_else(|| GuildError::not_found("inserted member"))?;

    info!(id = %member.id, name = %member.name, role = %member.role, "member added");
    Ok(member)
}

pub async fn update<S: GuildStore>(store: &S, id: &str, mut patch: MemberPatch) -> Result<Member> {
    if let Some(name) = patch.name.as_mut() {
        *name = name.trim().to_string();
        if name.is_empty() {
            return Err(GuildError::validation("Name is required"));
        }
    }
    if patch.is_empty() {
        return Err(GuildError::validation("nothing to update"));
    }
    let member = store.update_member(id, &patch).await?;
    info!(id, name = %member.name, kicked = member.kicked, "member updated");
    Ok(member)
}

pub async fn set_kicked<S: GuildStore>(store: &S, id: &str, kicked: bool) -> Result<Member> {
    update(store, id, MemberPatch { kicked: Some(kicked), ..Default::default() }).await
}

/// Deletes the member's Castle Rush and Advent entries, then the member.
pub async fn remove<S: GuildStore>(store: &S, id: &str) -> Result<()> {
    store.delete_member_castle_rush_entries(id).await?;
    store.delete_member_advent_entries(id).await?;
    store.delete_member(id).await?;
    info!(id, "member deleted");
    Ok(())
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PendingMember {
    pub name: String,
    pub role: Role,
    pub in_guild: bool,
}

/// One import line: `name[,role[,in_guild]]`. `in_guild` accepts
/// yes/no/true/false/1/0 and defaults to yes. Blank lines and `#` comments
/// yield `None`.
pub fn parse_import_line(line: &str) -> Option<PendingMember> {
    let line = line.trim();
    if line.is_empty() || line.starts_with('#') {
        return None;
    }
    let mut parts = line.split(',').map(str::trim);
    let name = parts.next().filter(|n| !n.is_empty())?.to_string();
    let role = parts.next().map(Role::normalize).unwrap_or_default();
    let in_guild = !matches!(
        parts.next().map(str::to_ascii_lowercase).as_deref(),
        Some("no" | "false" | "0" | "n")
    );
    Some(PendingMember { name, role, in_guild })
}

/// Inserts all pending members under a single logger row. Members that are
/// not in the guild are stored kicked.
pub async fn import<S: GuildStore>(store: &S, pending: &[PendingMember]) -> Result<Vec<Member>> {
    if pending.is_empty() {
        return Err(GuildError::validation("No members to import"));
    }
    let logger = store.create_logger(Some("system")).await?;
    let rows: Vec<NewMember> = pending
        .iter()
        .map(|p| NewMember {
            name: p.name.clone(),
            role: p.role,
            kicked: !p.in_guild,
            logger_id: Some(logger.id.clone()),
        })
        .collect();
    let created = store.insert_members(&rows).await?;
    info!(count = created.len(), "members imported");
    Ok(created)
}

/// Officers first (any role other than `Member`), roles alphabetically, then
/// names alphabetically.
pub fn sheet_order(a: &Member, b: &Member) -> Ordering {
    let role_a = a.role.as_str().to_lowercase();
    let role_b = b.role.as_str().to_lowercase();
    let plain_a = role_a == "member";
    let plain_b = role_b == "member";

    plain_a
        .cmp(&plain_b)
        .then_with(|| role_a.cmp(&role_b))
        .then_with(|| a.name.to_lowercase().cmp(&b.name.to_lowercase()))
}

pub fn sort_for_sheet(members: &mut [Member]) {
    members.sort_by(sheet_order);
}

/// Best past score first; ties fall back to [`sheet_order`].
pub fn sort_by_best(members: &mut [Member], best: &HashMap<String, i64>) {
    members.sort_by(|a, b| {
        let pa = best.get(&a.id).copied().unwrap_or(0);
        let pb = best.get(&b.id).copied().unwrap_or(0);
        pb.cmp(&pa).then_with(|| sheet_order(a, b))
    });
}

/// Looks a member up by id, then by exact name ignoring case.
pub fn find<'a>(members: &'a [Member], key: &str) -> Option<&'a Member> {
    let key = key.trim();
    members
        .iter()
        .find(|m| m.id == key)
        .or_else(|| members.iter().find(|m| m.name.eq_ignore_ascii_case(key)))
}
