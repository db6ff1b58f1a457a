//! Line-driven entry sheets behind `castle-rush enter` and `advent enter`.
//! Each line goes through the quick-entry grammar; a blank line (or EOF)
//! ends the sheet.

use anyhow::Result;
use std::io::{BufRead, Write};

use crate::advent::AdventSheet;
use crate::castle_rush::CastleRushSheet;
use crate::export::thousands;
use crate::model::{Boss, Member};
use crate::quick_entry::{Indicator, Outcome, QuickEntry};
use crate::session;

/// Candidates listed for an ambiguous line.
const MAX_LISTED: usize = 15;
/// Lines starting with this skip command parsing, for names like `-Ace` or `Who?`.
const LITERAL: char = '=';

fn read_line<R: BufRead, W: Write>(input: &mut R, out: &mut W, prompt: &str) -> Result<Option<String>> {
    write!(out, "{prompt}> ")?;
    out.flush()?;
    let mut line = String::new();
    if input.read_line(&mut line)? == 0 {
        return Ok(None);
    }
    let line = line.trim().to_string();
    Ok((!line.is_empty()).then_some(line))
}

fn list_candidates<W: Write>(out: &mut W, found: &[&Member]) -> Result<()> {
    writeln!(out, "{} members match:", found.len())?;
    for member in found.iter().take(MAX_LISTED) {
        writeln!(out, "  {} [{}]", member.name, member.role)?;
    }
    if found.len() > MAX_LISTED {
        writeln!(out, "  ... and {} more", found.len() - MAX_LISTED)?;
    }
    Ok(())
}

fn describe<W: Write>(out: &mut W, input: &str, outcome: &Outcome<'_>, suffix: &str) -> Result<()> {
    match outcome {
        Outcome::Idle => {}
        Outcome::NoMatch => writeln!(out, "no member matches \"{input}\"")?,
        Outcome::Ambiguous(found) => list_candidates(out, found)?,
        Outcome::Select { member, newly_added } => {
            let added = if *newly_added { " (added to sheet)" } else { "" };
            writeln!(out, "{} selected{added}, type a score to record it", member.name)?;
        }
        Outcome::Commit { member, score, count, newly_added } => {
            let added = if *newly_added { " (added to sheet)" } else { "" };
            let count = count.map(|c| format!(" x{c}")).unwrap_or_default();
            writeln!(out, "{}{suffix}: {}{count}{added}", member.name, thousands(*score))?;
        }
        Outcome::Rejected(reason) => writeln!(out, "rejected: {reason}")?,
    }
    Ok(())
}

/// The single member `query` names, or `None` after telling the user why not.
fn single<'a, W: Write>(quick: &QuickEntry<'a>, query: &str, out: &mut W) -> Result<Option<&'a Member>> {
    let mut found = quick.candidates(query);
    match found.len() {
        0 => {
            writeln!(out, "no member matches \"{}\"", query.trim())?;
            Ok(None)
        }
        1 => Ok(Some(found.remove(0))),
        _ => {
            list_candidates(out, &found)?;
            Ok(None)
        }
    }
}

/// `query?` shows who a line would hit without touching the sheet.
fn preview<W: Write>(quick: &QuickEntry<'_>, query: &str, out: &mut W) -> Result<()> {
    let found = quick.candidates(query);
    match quick.indicator(query) {
        Indicator::Idle => {}
        Indicator::NoMatch => writeln!(out, "no member matches \"{}\"", query.trim())?,
        Indicator::Searching => list_candidates(out, &found)?,
        state @ (Indicator::SingleResult | Indicator::ReadyToSubmit) => {
            if let Some(member) = found.first() {
                let next = if state == Indicator::ReadyToSubmit { "ready to record" } else { "add a score to record it" };
                writeln!(out, "{} matches, {next}", member.name)?;
            }
        }
    }
    Ok(())
}

/// `name score` records a score, `-name` clears one, `?` prints the sheet and
/// `=line` enters a line as-is.
pub fn castle_rush<R: BufRead, W: Write>(
    mut input: R,
    out: &mut W,
    quick: &QuickEntry<'_>,
    sheet: &mut CastleRushSheet,
) -> Result<()> {
    writeln!(
        out,
        "Type `name score` per line. `-name` clears, `name?` previews, `?` shows the sheet, `=` enters a line as-is, blank line finishes."
    )?;
    while let Some(line) = read_line(&mut input, out, "")? {
        if let Some(literal) = line.strip_prefix(LITERAL) {
            let outcome = quick.apply(literal, sheet);
            describe(out, literal, &outcome, "")?;
            continue;
        }
        if line == "?" {
            write!(out, "{}", session::summary(sheet))?;
            continue;
        }
        if let Some(query) = line.strip_suffix('?') {
            preview(quick, query, out)?;
            continue;
        }
        if let Some(query) = line.strip_prefix('-') {
            if let Some(member) = single(quick, query, out)? {
                sheet.remove(&member.id);
                writeln!(out, "{} cleared", member.name)?;
            }
            continue;
        }
        let outcome = quick.apply(&line, sheet);
        describe(out, &line, &outcome, "")?;
    }
    Ok(())
}

fn advent_totals<W: Write>(out: &mut W, sheet: &AdventSheet) -> Result<()> {
    let mut grand = 0;
    for member in sheet.roster() {
        let total = sheet.member_total(&member.id);
        if total == 0 {
            continue;
        }
        grand += total;
        let cells: Vec<String> = Boss::ALL
            .iter()
            .filter_map(|b| sheet.score(&member.id, *b).map(|s| format!("{b} {}", thousands(s))))
            .collect();
        writeln!(out, "  {}: {} ({})", member.name, thousands(total), cells.join(", "))?;
    }
    writeln!(out, "total {}", thousands(grand))?;
    Ok(())
}

/// Same grammar as [`castle_rush`], scored against the active boss.
/// `boss NAME` switches the boss and `-name` toggles the member's exclusion
/// from it.
pub fn advent<R: BufRead, W: Write>(
    mut input: R,
    out: &mut W,
    quick: &QuickEntry<'_>,
    sheet: &mut AdventSheet,
) -> Result<()> {
    writeln!(
        out,
        "Type `name score` per line. `boss NAME` switches boss, `-name` toggles exclusion, `?` shows totals, `=` enters a line as-is, blank line finishes."
    )?;
    loop {
        let prompt = sheet.active_boss().to_string();
        let Some(line) = read_line(&mut input, out, &prompt)? else {
            break;
        };
        if let Some(literal) = line.strip_prefix(LITERAL) {
            let outcome = quick.apply(literal, sheet);
            describe(out, literal, &outcome, &format!(" [{}]", sheet.active_boss()))?;
            continue;
        }
        if line == "?" {
            advent_totals(out, sheet)?;
            continue;
        }
        if let Some(query) = line.strip_suffix('?') {
            preview(quick, query, out)?;
            continue;
        }
        if let Some(name) = line.strip_prefix("boss ") {
            match Boss::parse(name) {
                Some(boss) => {
                    sheet.set_active_boss(boss);
                    writeln!(out, "entering {boss}")?;
                }
                None => writeln!(out, "unknown boss \"{}\", expected Teo, Kyle, Yeonhee or Karma", name.trim())?,
            }
            continue;
        }
        if let Some(query) = line.strip_prefix('-') {
            if let Some(member) = single(quick, query, out)? {
                let boss = sheet.active_boss();
                let state = if sheet.toggle_excluded(&member.id, boss) { "excluded from" } else { "included in" };
                writeln!(out, "{} {state} {boss}", member.name)?;
            }
            continue;
        }
        let outcome = quick.apply(&line, sheet);
        describe(out, &line, &outcome, &format!(" [{}]", sheet.active_boss()))?;
    }
    Ok(())
}
