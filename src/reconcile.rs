//! Matches names read by the OCR service against the roster.

use std::collections::HashMap;

use crate::model::Member;
use crate::ocr::ExtractedPlayer;

/// Similarity a fuzzy match must exceed.
pub const MATCH_THRESHOLD: f64 = 0.65;

/// Ratcliff/Obershelp similarity: twice the matched characters over the
/// combined length. 1.0 for identical strings, 0.0 for nothing in common.
pub fn similarity(a: &str, b: &str) -> f64 {
    let a: Vec<char> = a.chars().collect();
    let b: Vec<char> = b.chars().collect();
    let total = a.len() + b.len();
    if total == 0 {
        return 1.0;
    }
    2.0 * matching_chars(&a, &b) as f64 / total as f64
}

fn matching_chars(a: &[char], b: &[char]) -> usize {
    let (i, j, len) = longest_common_block(a, b);
    if len == 0 {
        return 0;
    }
    len + matching_chars(&a[..i], &b[..j]) + matching_chars(&a[i + len..], &b[j + len..])
}

/// Earliest longest common substring as (start in a, start in b, length).
fn longest_common_block(a: &[char], b: &[char]) -> (usize, usize, usize) {
    let mut best = (0, 0, 0);
    let mut prev = vec![0usize; b.len() + 1];
    for (i, ca) in a.iter().enumerate() {
        let mut row = vec![0usize; b.len() + 1];
        for (j, cb) in b.iter().enumerate() {
            if ca == cb {
                row[j + 1] = prev[j] + 1;
                let len = row[j + 1];
                if len > best.2 {
                    best = (i + 1 - len, j + 1 - len, len);
                }
            }
        }
        prev = row;
    }
    best
}

/// Exact name ignoring case, else the most similar member above
/// [`MATCH_THRESHOLD`].
pub fn match_member<'a>(name: &str, roster: &'a [Member]) -> Option<&'a Member> {
    let needle = name.trim().to_lowercase();
    if needle.is_empty() {
        return None;
    }
    if let Some(exact) = roster.iter().find(|m| m.name.to_lowercase() == needle) {
        return Some(exact);
    }

    let mut best: Option<(&Member, f64)> = None;
    for member in roster {
        let ratio = similarity(&needle, &member.name.to_lowercase());
        if best.is_none_or(|(_, r)| ratio > r) {
            best = Some((member, ratio));
        }
    }
    best.filter(|(_, r)| *r > MATCH_THRESHOLD).map(|(m, _)| m)
}

/// Resolves recognized players to roster members. A member seen twice keeps
/// the later score. Unmatched names are dropped.
pub fn reconcile<'a>(players: &[ExtractedPlayer], roster: &'a [Member]) -> Vec<(&'a Member, i64)> {
    let mut order: Vec<&'a Member> = Vec::new();
    let mut scores: HashMap<&str, i64> = HashMap::new();
    for player in players {
        let Some(member) = match_member(&player.player_name, roster) else {
            continue;
        };
        if scores.insert(member.id.as_str(), player.score).is_none() {
            order.push(member);
        }
    }
    order
        .into_iter()
        .map(|m| (m, scores.get(m.id.as_str()).copied().unwrap_or(0)))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::Role;

    fn roster() -> Vec<Member> {
        ["Aria", "Bolt", "Nightshade", "Kris"]
            .iter()
            .enumerate()
            .map(|(i, name)| Member {
                id: i.to_string(),
                name: name.to_string(),
                role: Role::Member,
                kicked: false,
                created_at: None,
                logger_id: None,
            })
            .collect()
    }

    fn player(name: &str, score: i64) -> ExtractedPlayer {
        ExtractedPlayer { player_name: name.into(), score }
    }

    #[test]
    fn test_similarity_matches_sequence_matcher() {
        assert_eq!(similarity("abcd", "abcd"), 1.0);
        assert_eq!(similarity("abc", "xyz"), 0.0);
        assert_eq!(similarity("", ""), 1.0);
        // 2 * 3 / 8
        assert!((similarity("abcd", "bcde") - 0.75).abs() < 1e-9);
        // "shade" + "nigh"
        assert!((similarity("nightshade", "nighshade") - 18.0 / 19.0).abs() < 1e-9);
    }

    #[test]
    fn test_match_member_exact_then_fuzzy() {
        let roster = roster();
        assert_eq!(match_member("ARIA", &roster).map(|m| m.id.as_str()), Some("0"));
        assert_eq!(match_member("Nighshade", &roster).map(|m| m.id.as_str()), Some("2"));
        assert_eq!(match_member("Zed", &roster), None);
        assert_eq!(match_member("  ", &roster), None);
    }

    #[test]
    fn test_reconcile_keeps_latest_score() {
        let roster = roster();
        let players = vec![player("Bolt", 100), player("Unknown Guy", 5), player("bolt", 250), player("Kris", 70)];
        let matched = reconcile(&players, &roster);
        let flat: Vec<_> = matched.iter().map(|(m, s)| (m.name.as_str(), *s)).collect();
        assert_eq!(flat, vec![("Bolt", 250), ("Kris", 70)]);
    }
}
