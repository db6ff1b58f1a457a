mod advent;
mod capture;
mod castle_rush;
mod config;
mod entry;
mod error;
mod export;
mod grade;
mod model;
mod ocr;
mod quick_entry;
mod reconcile;
mod roster;
mod schedule;
mod session;
mod stats;
mod store;

use anyhow::{Context, Result, bail};
use chrono::{Datelike, Local, NaiveDate, Utc};
use clap::builder::PossibleValuesParser;
use clap::{Arg, ArgAction, ArgMatches, Command, value_parser};
use dialoguer::Confirm;
use std::io;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use crate::advent::{AdventReport, AdventSheet};
use crate::castle_rush::{CastleRushReport, CastleRushSheet};
use crate::config::Config;
use crate::export::thousands;
use crate::model::{MemberPatch, Role};
use crate::ocr::{CaptureKind, OcrClient};
use crate::quick_entry::QuickEntry;
use crate::session::{Capture, MonitorSource, SessionOptions};
use crate::store::GuildStore;

// *************** CLI Definition ***************

fn parse_date(raw: &str) -> std::result::Result<NaiveDate, String> {
    NaiveDate::parse_from_str(raw.trim(), "%Y-%m-%d").map_err(|e| format!("expected YYYY-MM-DD: {e}"))
}

fn parse_month(raw: &str) -> std::result::Result<(i32, u32), String> {
    let (year, month) = raw.trim().split_once('-').ok_or("expected YYYY-MM")?;
    let year: i32 = year.parse().map_err(|_| format!("bad year \"{year}\""))?;
    let month: u32 = month.parse().map_err(|_| format!("bad month \"{month}\""))?;
    if !(1..=12).contains(&month) {
        return Err(format!("month {month} is out of range"));
    }
    Ok((year, month))
}

fn id_arg() -> Arg {
    Arg::new("id").value_name("ID").required(true)
}

fn date_arg() -> Arg {
    Arg::new("date")
        .long("date")
        .short('d')
        .value_name("YYYY-MM-DD")
        .value_parser(parse_date)
        .help("Event date (defaults to today)")
}

fn yes_arg() -> Arg {
    Arg::new("yes")
        .long("yes")
        .short('y')
        .action(ArgAction::SetTrue)
        .help("Answer yes to confirmation prompts")
}

fn event_arg() -> Arg {
    Arg::new("event")
        .value_name("EVENT")
        .required(true)
        .value_parser(["castle-rush", "advent"])
}

fn role_arg() -> Arg {
    Arg::new("role")
        .long("role")
        .short('r')
        .value_name("ROLE")
        .value_parser(PossibleValuesParser::new(Role::ASSIGNABLE.map(Role::as_str)))
}

fn cli() -> Command {
    Command::new("guildboard")
        .version(env!("CARGO_PKG_VERSION"))
        .about("Guild roster, Castle Rush and Advent Expedition scores, with OCR score capture")
        .subcommand_required(true)
        .arg_required_else_help(true)
        .arg(
            Arg::new("config")
                .long("config")
                .short('c')
                .global(true)
                .value_name("PATH")
                .value_parser(value_parser!(PathBuf))
                .help("Config file (default: guildboard.json)"),
        )
        .arg(
            Arg::new("verbose")
                .long("verbose")
                .short('v')
                .global(true)
                .action(ArgAction::SetTrue)
                .help("Debug logging"),
        )
        .subcommand(
            Command::new("members")
                .about("Manage the roster")
                .subcommand_required(true)
                .subcommand(
                    Command::new("list").about("List members, newest first").arg(
                        Arg::new("all")
                            .long("all")
                            .action(ArgAction::SetTrue)
                            .help("Include kicked members"),
                    ),
                )
                .subcommand(
                    Command::new("add")
                        .about("Add a member")
                        .arg(Arg::new("name").value_name("NAME").required(true))
                        .arg(role_arg().default_value("Member")),
                )
                .subcommand(
                    Command::new("update")
                        .about("Rename a member or change their role")
                        .arg(id_arg())
                        .arg(Arg::new("name").long("name").value_name("NAME"))
                        .arg(role_arg()),
                )
                .subcommand(Command::new("kick").about("Mark a member as kicked").arg(id_arg()))
                .subcommand(Command::new("unkick").about("Bring a kicked member back").arg(id_arg()))
                .subcommand(
                    Command::new("delete")
                        .about("Delete a member and their entries")
                        .arg(id_arg())
                        .arg(yes_arg()),
                )
                .subcommand(
                    Command::new("import")
                        .about("Bulk import from a file of `name[,role[,in_guild]]` lines")
                        .arg(Arg::new("file").value_name("FILE").required(true).value_parser(value_parser!(PathBuf))),
                )
                .subcommand(
                    Command::new("profile")
                        .about("A member's stats and history")
                        .arg(Arg::new("member").value_name("ID|NAME").required(true)),
                ),
        )
        .subcommand(
            Command::new("castle-rush")
                .about("Daily Castle Rush scores")
                .subcommand_required(true)
                .subcommand(
                    Command::new("enter")
                        .about("Enter the day's scores with the quick-entry prompt")
                        .arg(date_arg())
                        .arg(Arg::new("edit").long("edit").value_name("ID").help("Edit an existing event"))
                        .arg(yes_arg()),
                )
                .subcommand(
                    Command::new("historical")
                        .about("Backfill a past event from a file of `name score` lines")
                        .arg(date_arg().required(true))
                        .arg(Arg::new("file").value_name("FILE").required(true).value_parser(value_parser!(PathBuf))),
                )
                .subcommand(
                    Command::new("show")
                        .about("Show an event by id or date")
                        .arg(Arg::new("target").value_name("ID|YYYY-MM-DD").required(true)),
                )
                .subcommand(
                    Command::new("list").about("Recent events").arg(
                        Arg::new("limit")
                            .long("limit")
                            .value_parser(value_parser!(usize))
                            .default_value("20"),
                    ),
                )
                .subcommand(Command::new("delete").about("Delete an event").arg(id_arg()).arg(yes_arg()))
                .subcommand(
                    Command::new("calendar").about("Month calendar with recorded days").arg(
                        Arg::new("month")
                            .long("month")
                            .value_name("YYYY-MM")
                            .value_parser(parse_month),
                    ),
                ),
        )
        .subcommand(
            Command::new("advent")
                .about("Advent Expedition scores")
                .subcommand_required(true)
                .subcommand(
                    Command::new("enter")
                        .about("Enter boss scores with the quick-entry prompt")
                        .arg(date_arg())
                        .arg(Arg::new("edit").long("edit").value_name("ID").help("Edit an existing expedition"))
                        .arg(yes_arg()),
                )
                .subcommand(Command::new("show").about("Show an expedition").arg(id_arg()))
                .subcommand(
                    Command::new("list")
                        .about("Recent expeditions")
                        .arg(
                            Arg::new("days")
                                .long("days")
                                .value_parser(value_parser!(i64))
                                .help("Only expeditions from the last N days (default 30)"),
                        )
                        .arg(
                            Arg::new("limit")
                                .long("limit")
                                .value_parser(value_parser!(usize))
                                .help("At most this many rows (default 30)"),
                        ),
                )
                .subcommand(Command::new("delete").about("Delete an expedition").arg(id_arg()).arg(yes_arg())),
        )
        .subcommand(
            Command::new("stats")
                .about("Member analysis and guild overview")
                .subcommand_required(true)
                .subcommand(Command::new("analysis").about("Per-member stats and guild insights"))
                .subcommand(Command::new("overview").about("Today's numbers at a glance")),
        )
        .subcommand(
            Command::new("export")
                .about("Share event results")
                .subcommand_required(true)
                .subcommand(
                    Command::new("discord")
                        .about("Print a Discord-formatted message")
                        .arg(event_arg())
                        .arg(id_arg()),
                )
                .subcommand(
                    Command::new("json")
                        .about("JSON document, to stdout or a directory")
                        .arg(event_arg())
                        .arg(id_arg())
                        .arg(
                            Arg::new("out")
                                .long("out")
                                .short('o')
                                .value_name("DIR")
                                .value_parser(value_parser!(PathBuf)),
                        ),
                )
                .subcommand(
                    Command::new("post")
                        .about("Post an embed to the configured Discord webhook")
                        .arg(event_arg())
                        .arg(id_arg()),
                ),
        )
        .subcommand(
            Command::new("ocr")
                .about("External OCR service")
                .subcommand_required(true)
                .subcommand(Command::new("health").about("Check that the service answers"))
                .subcommand(
                    Command::new("warm")
                        .about("Ping the service periodically so it stays awake")
                        .arg(
                            Arg::new("every")
                                .long("every")
                                .value_name("MINUTES")
                                .value_parser(value_parser!(u64))
                                .default_value("14"),
                        )
                        .arg(
                            Arg::new("count")
                                .long("count")
                                .value_parser(value_parser!(u32))
                                .help("Stop after this many pings"),
                        ),
                )
                .subcommand(
                    Command::new("extract")
                        .about("Send an image to the service and print the players it reads")
                        .arg(Arg::new("file").value_name("FILE").required(true).value_parser(value_parser!(PathBuf)))
                        .arg(
                            Arg::new("kind")
                                .long("kind")
                                .value_parser(["castle-rush", "advent"])
                                .default_value("castle-rush"),
                        ),
                ),
        )
        .subcommand(
            Command::new("capture")
                .about("Castle Rush score capture from the screen")
                .subcommand_required(true)
                .subcommand(
                    Command::new("session")
                        .about("Capture frames until Ctrl+C, then submit")
                        .arg(date_arg())
                        .arg(
                            Arg::new("frames")
                                .long("frames")
                                .value_name("N")
                                .value_parser(value_parser!(u32))
                                .help("Stop after N frames were read"),
                        )
                        .arg(
                            Arg::new("monitor")
                                .long("monitor")
                                .value_parser(value_parser!(usize))
                                .help("Monitor index (overrides the config)"),
                        )
                        .arg(yes_arg()),
                )
                .subcommand(
                    Command::new("image")
                        .about("Read one screenshot from disk, then submit")
                        .arg(Arg::new("file").value_name("FILE").required(true).value_parser(value_parser!(PathBuf)))
                        .arg(date_arg())
                        .arg(yes_arg()),
                ),
        )
        .subcommand(
            Command::new("config")
                .about("Configuration file")
                .subcommand_required(true)
                .subcommand(
                    Command::new("init").about("Write a default config file").arg(
                        Arg::new("force")
                            .long("force")
                            .action(ArgAction::SetTrue)
                            .help("Overwrite an existing file"),
                    ),
                )
                .subcommand(Command::new("show").about("Print the effective config, key redacted")),
        )
}

// *************** Helpers ***************

fn init_tracing(verbose: bool) {
    let default = if verbose { "info,guildboard=debug" } else { "info,guildboard=info" };
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default)))
        .with_target(false)
        .with_writer(io::stderr)
        .init();
}

fn today() -> NaiveDate {
    Local::now().date_naive()
}

fn date_or_today(m: &ArgMatches) -> NaiveDate {
    m.get_one::<NaiveDate>("date").copied().unwrap_or_else(today)
}

fn required<'a>(m: &'a ArgMatches, name: &str) -> Result<&'a String> {
    m.get_one::<String>(name).with_context(|| format!("missing <{name}>"))
}

fn confirm(prompt: &str, yes: bool) -> Result<bool> {
    if yes {
        return Ok(true);
    }
    Confirm::new()
        .with_prompt(prompt)
        .default(false)
        .interact()
        .context("Confirmation needs a terminal, pass --yes to skip it")
}

fn read_lines(path: &Path) -> Result<Vec<String>> {
    let text = std::fs::read_to_string(path).with_context(|| format!("Failed to read {}", path.display()))?;
    Ok(text.lines().map(str::to_string).collect())
}

fn print_castle_rush(report: &CastleRushReport) {
    println!(
        "{} - {} ({})",
        export::long_date(report.event.date),
        report.event.castle,
        report.event.id
    );
    for (rank, entry) in report.attended().enumerate() {
        println!("{:>3}. {:<20} {:<10} {:>15}", rank + 1, entry.name, entry.role.as_str(), thousands(entry.score));
    }
    let absent: Vec<&str> = report
        .entries
        .iter()
        .filter(|e| !e.attendance)
        .map(|e| e.name.as_str())
        .collect();
    if !absent.is_empty() {
        println!("Did not participate: {}", absent.join(", "));
    }
    println!(
        "Total {} ({}), {} attended, average {}",
        thousands(report.total_score()),
        report.grade(),
        report.attendance_count(),
        thousands(report.average_score())
    );
}

fn print_advent(report: &AdventReport) {
    println!("Advent Expedition - {} ({})", export::month_date(report.event.date), report.event.id);
    for (rank, member) in report.members.iter().enumerate() {
        let bosses: Vec<String> = member
            .bosses
            .iter()
            .map(|(boss, score)| format!("{boss} {}", thousands(*score)))
            .collect();
        println!(
            "{:>3}. {:<20} {:>15}  {}",
            rank + 1,
            member.name,
            thousands(member.total_score),
            bosses.join(", ")
        );
    }
    let per_boss: Vec<String> = report
        .boss_totals
        .iter()
        .map(|(boss, total)| format!("{boss} {}", thousands(*total)))
        .collect();
    println!("Bosses: {}", per_boss.join(", "));
    println!(
        "Total {} ({}), {} participants over {} entries, average {}",
        thousands(report.total_score()),
        report.grade(),
        report.unique_participants(),
        report.total_entries,
        thousands(report.average_score())
    );
}

// *************** Members ***************

async fn members<S: GuildStore>(store: &S, config: &Config, m: &ArgMatches) -> Result<()> {
    match m.subcommand() {
        Some(("list", m)) => {
            let list = roster::list(store, m.get_flag("all")).await?;
            for member in &list {
                let kicked = if member.kicked { "  (kicked)" } else { "" };
                println!("{:<38} {:<20} {:<10}{kicked}", member.id, member.name, member.role.as_str());
            }
            println!("{} members", list.len());
        }
        Some(("add", m)) => {
            let role = m.get_one::<String>("role").map(String::as_str).unwrap_or("Member");
            let member = roster::add(store, required(m, "name")?, role, Some(&config.logged_by)).await?;
            println!("Added {} [{}] ({})", member.name, member.role, member.id);
        }
        Some(("update", m)) => {
            let patch = MemberPatch {
                name: m.get_one::<String>("name").cloned(),
                role: m.get_one::<String>("role").map(|r| Role::normalize(r)),
                kicked: None,
            };
            let member = roster::update(store, required(m, "id")?, patch).await?;
            println!("Updated {} [{}]", member.name, member.role);
        }
        Some((action @ ("kick" | "unkick"), m)) => {
            let member = roster::set_kicked(store, required(m, "id")?, action == "kick").await?;
            println!("{} is {}", member.name, if member.kicked { "kicked" } else { "back in the guild" });
        }
        Some(("delete", m)) => {
            let id = required(m, "id")?;
            if confirm(&format!("Delete member {id} and all their entries?"), m.get_flag("yes"))? {
                roster::remove(store, id).await?;
                println!("Deleted {id}");
            }
        }
        Some(("import", m)) => {
            let path = m.get_one::<PathBuf>("file").context("missing <file>")?;
            let pending: Vec<_> = read_lines(path)?
                .iter()
                .filter_map(|l| roster::parse_import_line(l))
                .collect();
            let created = roster::import(store, &pending).await?;
            println!("Imported {} members", created.len());
        }
        Some(("profile", m)) => {
            let key = required(m, "member")?;
            let all = roster::list(store, true).await?;
            let member = roster::find(&all, key)
                .cloned()
                .with_context(|| format!("No member matches \"{key}\""))?;
            let profile = stats::profile(store, member, today()).await?;
            let s = &profile.stats;
            println!("{} [{}]{}", profile.member.name, profile.member.role, if profile.member.kicked { " (kicked)" } else { "" });
            println!(
                "Entries {} (Castle Rush {}, Advent {}), attendance {:.1}%",
                s.total_entries, s.castle_rush_entries, s.advent_entries, s.attendance_rate
            );
            println!("7-day average {:.0}: {}", s.average_score, s.score_breakdown);
            println!(
                "Best {}, lowest {}, consistency {:.1}, last active {}",
                thousands(s.highest_score),
                thousands(s.lowest_score),
                s.consistency,
                stats::format_last_active(s.days_since_last_entry)
            );
            println!(
                "Castle Rush attendance {:.1}%, Advent attendance {:.1}%, last entry {}",
                s.castle_rush_attendance,
                s.advent_attendance,
                s.last_entry.map(|d| d.to_string()).unwrap_or_else(|| "-".to_string())
            );
            let week: Vec<String> = s.weekly_activity.iter().map(u32::to_string).collect();
            println!("Last 7 days (oldest first): {}", week.join(" "));
            for entry in &profile.history {
                let kind = match entry.kind {
                    stats::EventKind::CastleRush => "Castle Rush",
                    stats::EventKind::Advent => "Advent",
                };
                let mark = if entry.attendance { "" } else { "  absent" };
                println!("  {}  {:<12} {:>15}{mark}", entry.date, kind, thousands(entry.score));
            }
        }
        _ => bail!("unknown members command"),
    }
    Ok(())
}

// *************** Castle Rush ***************

async fn castle_rush_enter<S: GuildStore>(store: &S, config: &Config, m: &ArgMatches) -> Result<()> {
    let yes = m.get_flag("yes");
    let event = match m.get_one::<String>("edit") {
        Some(id) => Some(
            store
                .castle_rush(id)
                .await?
                .with_context(|| format!("No Castle Rush with id {id}"))?,
        ),
        None => {
            let date = date_or_today(m);
            match store.castle_rush_on(date).await? {
                Some(existing) if confirm(&format!("An entry already exists for {date}. Edit it instead?"), yes)? => {
                    Some(existing)
                }
                Some(_) => return Ok(()),
                None => None,
            }
        }
    };
    let date = event.as_ref().map(|e| e.date).unwrap_or_else(|| date_or_today(m));
    let day = schedule::castle_for(date);
    println!("{} - {} (boss {})", export::long_date(date), day.castle, day.boss);

    let editing = event.is_some();
    let mut roster = roster::list(store, editing).await?;
    let best = castle_rush::best_scores_at(store, day.castle).await?;
    roster::sort_by_best(&mut roster, &best);
    let mut sheet = match &event {
        Some(e) => castle_rush::load_sheet(store, &e.id, roster.clone()).await?,
        None => CastleRushSheet::whole_roster(roster.clone()),
    };

    let quick = QuickEntry::new(&roster).edit_mode(editing);
    entry::castle_rush(io::stdin().lock(), &mut io::stdout(), &quick, &mut sheet)?;

    print!("{}", session::summary(&sheet));
    if !sheet.has_any_score() {
        println!("No scores entered, nothing saved.");
        return Ok(());
    }
    if !confirm("Submit these scores?", yes)? {
        println!("Discarded.");
        return Ok(());
    }
    let saved = match &event {
        Some(e) => castle_rush::update(store, &e.id, &sheet).await?,
        None => castle_rush::create(store, date, &sheet, &config.logged_by).await?,
    };
    println!("Saved Castle Rush {} for {}", saved.id, saved.date);
    Ok(())
}

async fn castle_rush_command<S: GuildStore>(store: &S, config: &Config, m: &ArgMatches) -> Result<()> {
    match m.subcommand() {
        Some(("enter", m)) => castle_rush_enter(store, config, m).await?,
        Some(("historical", m)) => {
            let date = date_or_today(m);
            let path = m.get_one::<PathBuf>("file").context("missing <file>")?;
            let mut participants = Vec::new();
            for (n, line) in read_lines(path)?.iter().enumerate() {
                if line.trim().is_empty() {
                    continue;
                }
                let p = castle_rush::parse_participant(line)
                    .with_context(|| format!("{}:{}: expected `name score`", path.display(), n + 1))?;
                participants.push(p);
            }
            let event = castle_rush::historical(store, date, &participants).await?;
            println!("Saved {} participants for {} ({})", participants.len(), event.date, event.castle);
        }
        Some(("show", m)) => {
            let target = required(m, "target")?;
            let report = match parse_date(target) {
                Ok(date) => castle_rush::entries_on(store, date).await?,
                Err(_) => Some(castle_rush::report(store, target).await?),
            };
            match report {
                Some(report) => print_castle_rush(&report),
                None => println!("No Castle Rush recorded for {target}"),
            }
        }
        Some(("list", m)) => {
            let limit = m.get_one::<usize>("limit").copied().unwrap_or(20);
            for (event, total, attended) in castle_rush::list(store, limit).await? {
                println!(
                    "{}  {:<24} {:>15}  {:>3} attended  {}",
                    event.date,
                    event.castle,
                    thousands(total),
                    attended,
                    event.id
                );
            }
        }
        Some(("delete", m)) => {
            let id = required(m, "id")?;
            if confirm(&format!("Delete Castle Rush {id} and its entries?"), m.get_flag("yes"))? {
                castle_rush::delete(store, id).await?;
                println!("Deleted {id}");
            }
        }
        Some(("calendar", m)) => {
            let now = today();
            let (year, month) = m
                .get_one::<(i32, u32)>("month")
                .copied()
                .unwrap_or((now.year(), now.month()));
            let recorded = castle_rush::dates_in_month(store, year, month).await?;
            let calendar = schedule::render_month(year, month, &recorded)
                .with_context(|| format!("{year}-{month:02} is not a valid month"))?;
            print!("{calendar}");
            let today_castle = schedule::castle_for(now);
            println!("* recorded    today: {} (boss {})", today_castle.castle, today_castle.boss);
        }
        _ => bail!("unknown castle-rush command"),
    }
    Ok(())
}

// *************** Advent Expedition ***************

async fn advent_enter<S: GuildStore>(store: &S, config: &Config, m: &ArgMatches) -> Result<()> {
    let yes = m.get_flag("yes");
    let event = match m.get_one::<String>("edit") {
        Some(id) => Some(
            store
                .advent_expedition(id)
                .await?
                .with_context(|| format!("No Advent Expedition with id {id}"))?,
        ),
        None => {
            let date = date_or_today(m);
            match store.advent_expedition_on(date).await? {
                Some(existing)
                    if confirm(
                        &format!("An Advent Expedition entry already exists for {date}. Switch to update?"),
                        yes,
                    )? =>
                {
                    Some(existing)
                }
                Some(_) => return Ok(()),
                None => None,
            }
        }
    };
    let date = event.as_ref().map(|e| e.date).unwrap_or_else(|| date_or_today(m));
    println!("Advent Expedition - {}", export::month_date(date));

    let editing = event.is_some();
    let mut roster = roster::list(store, editing).await?;
    roster::sort_for_sheet(&mut roster);
    let mut sheet = match &event {
        Some(e) => advent::load_sheet(store, &e.id, roster.clone()).await?,
        None => AdventSheet::new(roster.clone()),
    };

    let quick = QuickEntry::new(&roster).edit_mode(editing);
    entry::advent(io::stdin().lock(), &mut io::stdout(), &quick, &mut sheet)?;

    let total: i64 = sheet.roster().iter().map(|m| sheet.member_total(&m.id)).sum();
    println!("Total {}", thousands(total));
    if !confirm("Submit these scores?", yes)? {
        println!("Discarded.");
        return Ok(());
    }
    let saved = match &event {
        Some(e) => advent::update(store, &e.id, &sheet, &config.logged_by).await?,
        None => advent::create(store, date, &sheet, &config.logged_by).await?,
    };
    println!("Saved Advent Expedition {} for {}", saved.id, saved.date);
    Ok(())
}

async fn advent_command<S: GuildStore>(store: &S, config: &Config, m: &ArgMatches) -> Result<()> {
    match m.subcommand() {
        Some(("enter", m)) => advent_enter(store, config, m).await?,
        Some(("show", m)) => print_advent(&advent::report(store, required(m, "id")?).await?),
        Some(("list", m)) => {
            let days = m.get_one::<i64>("days").copied().unwrap_or(advent::LIST_DAYS);
            let limit = m.get_one::<usize>("limit").copied().unwrap_or(advent::LIST_LIMIT);
            for event in advent::list(store, today(), days, limit).await? {
                println!("{}  {}", event.date, event.id);
            }
        }
        Some(("delete", m)) => {
            let id = required(m, "id")?;
            if confirm(&format!("Delete Advent Expedition {id} and its entries?"), m.get_flag("yes"))? {
                advent::delete(store, id).await?;
                println!("Deleted {id}");
            }
        }
        _ => bail!("unknown advent command"),
    }
    Ok(())
}

// *************** Stats ***************

async fn stats_command<S: GuildStore>(store: &S, m: &ArgMatches) -> Result<()> {
    match m.subcommand() {
        Some(("analysis", _)) => {
            let mut all = stats::load_member_stats(store, today()).await?;
            all.sort_by(|a, b| b.attendance_rate.total_cmp(&a.attendance_rate).then_with(|| a.name.cmp(&b.name)));
            println!(
                "{:<20} {:<10} {:>7} {:>8} {:>15} {:>8}  {}",
                "Name", "Role", "Entries", "Attend%", "Avg (7d)", "Consist", "Last active"
            );
            for s in &all {
                println!(
                    "{:<20} {:<10} {:>7} {:>7.1}% {:>15} {:>8.1}  {}",
                    s.name,
                    s.role.as_str(),
                    s.total_entries,
                    s.attendance_rate,
                    thousands(s.average_score.round() as i64),
                    s.consistency,
                    stats::format_last_active(s.days_since_last_entry)
                );
            }

            let metrics = stats::guild_metrics(&all);
            println!();
            println!(
                "{} active members, average attendance {:.1}%, guild average {}, {} entries, participation {:.1}%",
                metrics.active_members,
                metrics.average_attendance,
                thousands(metrics.guild_average_score.round() as i64),
                metrics.total_events,
                metrics.overall_participation
            );
            let names = |list: &[stats::MemberStats]| {
                if list.is_empty() {
                    "-".to_string()
                } else {
                    list.iter().map(|s| s.name.as_str()).collect::<Vec<_>>().join(", ")
                }
            };
            println!("Top performers:        {}", names(&metrics.top_performers));
            println!("Consistent performers: {}", names(&metrics.consistent_performers));
            println!("At risk:               {}", names(&metrics.at_risk));
            println!("Recently inactive:     {}", names(&metrics.recently_inactive));
        }
        Some(("overview", _)) => {
            let o = stats::load_overview(store, today()).await?;
            println!(
                "Members: {} total, {} active, {} kicked",
                o.total_members, o.active_members, o.kicked_members
            );
            println!(
                "Today: {} attended, average {}, top {}{}",
                o.today_attendance,
                thousands(o.today_average_score),
                thousands(o.today_top_score),
                o.today_top_scorer.as_deref().map(|n| format!(" by {n}")).unwrap_or_default()
            );
            println!("Weekly trend: {:+.1}%", o.weekly_trend);
            println!(
                "Average attendance {:.1}%, {} low performers",
                o.average_attendance, o.low_performers
            );
            println!(
                "{} events this month, last on {}",
                o.events_this_month,
                o.last_event.map(|d| d.to_string()).unwrap_or_else(|| "-".to_string())
            );
        }
        _ => bail!("unknown stats command"),
    }
    Ok(())
}

// *************** Export ***************

enum Report {
    CastleRush(CastleRushReport),
    Advent(AdventReport),
}

async fn load_report<S: GuildStore>(store: &S, m: &ArgMatches) -> Result<Report> {
    let id = required(m, "id")?;
    Ok(match required(m, "event")?.as_str() {
        "advent" => Report::Advent(advent::report(store, id).await?),
        _ => Report::CastleRush(castle_rush::report(store, id).await?),
    })
}

async fn export_command<S: GuildStore>(store: &S, config: &Config, m: &ArgMatches) -> Result<()> {
    match m.subcommand() {
        Some(("discord", m)) => {
            let text = match load_report(store, m).await? {
                Report::CastleRush(r) => export::castle_rush_text(&r),
                Report::Advent(r) => export::advent_text(&r),
            };
            print!("{text}");
        }
        Some(("json", m)) => {
            let (json, file_name) = match load_report(store, m).await? {
                Report::CastleRush(r) => (
                    export::to_pretty_json(&export::castle_rush_document(&r))?,
                    export::castle_rush_file_name(&r),
                ),
                Report::Advent(r) => (
                    export::to_pretty_json(&export::advent_document(&r))?,
                    export::advent_file_name(&r),
                ),
            };
            match m.get_one::<PathBuf>("out") {
                Some(dir) => {
                    std::fs::create_dir_all(dir).with_context(|| format!("Failed to create {}", dir.display()))?;
                    let path = dir.join(file_name);
                    std::fs::write(&path, json).with_context(|| format!("Failed to write {}", path.display()))?;
                    println!("Wrote {}", path.display());
                }
                None => println!("{json}"),
            }
        }
        Some(("post", m)) => {
            let payload = match load_report(store, m).await? {
                Report::CastleRush(r) => export::castle_rush_embed(&r, Utc::now()),
                Report::Advent(r) => export::advent_embed(&r, Utc::now()),
            };
            export::post_webhook(config.discord_webhook.as_deref(), &payload).await?;
            println!("Posted to Discord");
        }
        _ => bail!("unknown export command"),
    }
    Ok(())
}

// *************** OCR and Capture ***************

async fn ocr_command(config: &Config, m: &ArgMatches) -> Result<()> {
    let ocr = OcrClient::new(&config.ocr_url)?;
    match m.subcommand() {
        Some(("health", _)) => {
            let state = if ocr.health().await { "online" } else { "offline" };
            println!("{} is {state}", ocr.base_url());
        }
        Some(("warm", m)) => {
            let minutes = m.get_one::<u64>("every").copied().unwrap_or(14).max(1);
            let count = m.get_one::<u32>("count").copied();
            tokio::select! {
                _ = ocr.warm(Duration::from_secs(minutes * 60), count) => {}
                _ = tokio::signal::ctrl_c() => info!("keep-warm stopped"),
            }
        }
        Some(("extract", m)) => {
            let path = m.get_one::<PathBuf>("file").context("missing <file>")?;
            let image = capture::load_image(path)?;
            let kind = match m.get_one::<String>("kind").map(String::as_str) {
                Some("advent") => CaptureKind::Advent,
                _ => CaptureKind::CastleRush,
            };
            let names: Vec<String> = match config.store() {
                Ok(store) => roster::list(&store, false).await?.into_iter().map(|m| m.name).collect(),
                Err(e) => {
                    warn!(error = %e, "backend not configured, extracting without member names");
                    Vec::new()
                }
            };
            for player in ocr.extract_players(&image, &names, kind).await? {
                println!("{:<24} {:>15}", player.player_name, thousands(player.score));
            }
        }
        _ => bail!("unknown ocr command"),
    }
    Ok(())
}

async fn submit_capture<S: GuildStore>(store: &S, mut capture: Capture, date: NaiveDate, yes: bool) -> Result<()> {
    let expected = schedule::castle_for(date).castle;
    if let Some(name) = &capture.castle_name {
        println!("Castle on screen: {name}");
        if !expected.to_lowercase().contains(&name.to_lowercase()) {
            warn!(on_screen = %name, expected, "castle on screen does not match the schedule");
        }
    }
    println!("{} frames read", capture.frames);
    print!("{}", session::summary(&capture.sheet));
    if !capture.sheet.has_any_score() {
        println!("No scores recognized, nothing to submit.");
        return Ok(());
    }

    let marked = session::mark_non_participants(&mut capture.sheet);
    if !marked.is_empty() {
        let names: Vec<&str> = capture.sheet.absent().map(|m| m.name.as_str()).collect();
        println!("Not participating ({}): {}", names.len(), names.join(", "));
    }
    if !confirm(&format!("Submit Castle Rush for {date} ({expected})?"), yes)? {
        println!("Discarded.");
        return Ok(());
    }
    match castle_rush::create(store, date, &capture.sheet, session::LOGGED_BY).await {
        Ok(event) => println!("Saved Castle Rush {} for {}", event.id, event.date),
        Err(e) if e.is_conflict() => {
            bail!("{e}. Use `castle-rush enter --date {date}` to edit it")
        }
        Err(e) => return Err(e.into()),
    }
    Ok(())
}

async fn capture_command<S: GuildStore>(store: &S, config: &Config, m: &ArgMatches) -> Result<()> {
    let ocr = OcrClient::new(&config.ocr_url)?;
    let mut roster = roster::list(store, false).await?;
    roster::sort_for_sheet(&mut roster);

    match m.subcommand() {
        Some(("session", m)) => {
            let date = date_or_today(m);
            let options = SessionOptions {
                interval: config.capture.interval(),
                health_every: config.capture.health_interval(),
                change_threshold: config.capture.change_threshold,
                frames: m.get_one::<u32>("frames").copied(),
                debug_dir: config.capture.debug_dir.clone(),
            };
            let index = m.get_one::<usize>("monitor").copied().unwrap_or(config.capture.monitor);
            println!(
                "Capturing monitor {index} for {} ({}). Press Ctrl+C to stop.",
                date,
                schedule::castle_for(date).castle
            );
            let capture = session::run(&ocr, MonitorSource { index }, roster, &options).await?;
            submit_capture(store, capture, date, m.get_flag("yes")).await
        }
        Some(("image", m)) => {
            let path = m.get_one::<PathBuf>("file").context("missing <file>")?;
            let image = capture::load_image(path)?;
            let capture = session::read_image(&ocr, &image, roster, config.capture.debug_dir.clone()).await?;
            submit_capture(store, capture, date_or_today(m), m.get_flag("yes")).await
        }
        _ => bail!("unknown capture command"),
    }
}

// *************** Config ***************

fn config_command(config: &Config, path: &Path, m: &ArgMatches) -> Result<()> {
    match m.subcommand() {
        Some(("init", m)) => {
            if path.exists() && !m.get_flag("force") {
                bail!("{} already exists, pass --force to overwrite", path.display());
            }
            Config::default().save(path)?;
            println!("Wrote {}", path.display());
        }
        Some(("show", _)) => {
            println!("# {}", path.display());
            println!("{}", serde_json::to_string_pretty(&config.redacted())?);
        }
        _ => bail!("unknown config command"),
    }
    Ok(())
}

// *************** Main ***************

#[tokio::main]
async fn main() -> Result<()> {
    let matches = cli().get_matches();
    init_tracing(matches.get_flag("verbose"));

    let config_path = matches
        .get_one::<PathBuf>("config")
        .cloned()
        .unwrap_or_else(|| PathBuf::from(config::DEFAULT_PATH));
    let config = Config::load(&config_path)?;

    match matches.subcommand() {
        Some(("config", m)) => config_command(&config, &config_path, m),
        Some(("ocr", m)) => ocr_command(&config, m).await,
        Some((name, m)) => {
            let store = config
                .store()
                .context("Backend not configured: set backend_url and backend_key or SUPABASE_URL and a key")?;
            match name {
                "members" => members(&store, &config, m).await,
                "castle-rush" => castle_rush_command(&store, &config, m).await,
                "advent" => advent_command(&store, &config, m).await,
                "stats" => stats_command(&store, m).await,
                "export" => export_command(&store, &config, m).await,
                "capture" => capture_command(&store, &config, m).await,
                _ => bail!("unknown command {name}"),
            }
        }
        None => bail!("no command given"),
    }
}
