//! Live capture session: grab frames on a timer, read them through the OCR
//! service and collect one Castle Rush score per recognized member.

use anyhow::Result;
use image::DynamicImage;
use std::path::PathBuf;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

use crate::capture::{self, ChangeDetector};
use crate::castle_rush::CastleRushSheet;
use crate::model::Member;
use crate::ocr::{CaptureKind, ExtractedPlayer, Recognizer};
use crate::quick_entry::Sheet;
use crate::reconcile;

/// Recorded as `logged_by` for sessions submitted from screen capture.
pub const LOGGED_BY: &str = "screen_capture";

/// Blocking frame producer; called off the async runtime.
pub trait FrameSource {
    fn next_frame(&mut self) -> Result<DynamicImage>;
}

pub struct MonitorSource {
    pub index: usize,
}

impl FrameSource for MonitorSource {
    fn next_frame(&mut self) -> Result<DynamicImage> {
        capture::capture_monitor(self.index)
    }
}

#[derive(Clone, Debug)]
pub struct SessionOptions {
    pub interval: Duration,
    pub health_every: Duration,
    pub change_threshold: f64,
    /// Stop after this many processed frames; `None` runs until Ctrl-C.
    pub frames: Option<u32>,
    pub debug_dir: PathBuf,
}

/// What a session collected.
pub struct Capture {
    pub sheet: CastleRushSheet,
    pub castle_name: Option<String>,
    pub frames: u32,
}

#[derive(Debug, PartialEq)]
enum FrameOutcome {
    /// The source failed to produce a frame.
    Missing,
    Unchanged,
    Read(usize),
}

/// Applies one frame's recognized players to the sheet. Returns how many
/// roster members were matched.
pub fn merge_players(sheet: &mut CastleRushSheet, players: &[ExtractedPlayer]) -> usize {
    let roster = sheet.roster().to_vec();
    let matched = reconcile::reconcile(players, &roster);
    for (member, score) in &matched {
        sheet.set_score(&member.id, *score);
    }
    matched.len()
}

/// Marks every roster member without a score as not participating and
/// returns them.
pub fn mark_non_participants(sheet: &mut CastleRushSheet) -> Vec<Member> {
    let missing: Vec<Member> = sheet
        .roster()
        .iter()
        .filter(|m| !sheet.contains(&m.id))
        .cloned()
        .collect();
    for member in &missing {
        sheet.mark_absent(&member.id);
    }
    missing
}

/// Scores sorted by score then name, followed by the total.
pub fn summary(sheet: &CastleRushSheet) -> String {
    let rows = sheet.ranked();
    let width = rows.iter().map(|(m, _)| m.name.chars().count()).max().unwrap_or(0);
    let mut out = String::new();
    for (member, score) in &rows {
        out.push_str(&format!(
            "{:<width$}  {:>13}\n",
            member.name,
            crate::export::thousands(*score),
            width = width
        ));
    }
    out.push_str(&format!(
        "{} members, total {}\n",
        rows.len(),
        crate::export::thousands(sheet.total())
    ));
    out
}

/// Runs `next_frame` on the blocking pool.
async fn grab<F: FrameSource + Send + 'static>(source: &Arc<Mutex<F>>) -> Result<DynamicImage> {
    let source = Arc::clone(source);
    tokio::task::spawn_blocking(move || {
        source
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .next_frame()
    })
    .await?
}

async fn recheck<R: Recognizer>(ocr: &R, was_online: bool) -> bool {
    let now = ocr.health().await;
    if now != was_online {
        if now {
            info!("OCR service back online");
        } else {
            warn!("OCR service went offline");
        }
    }
    now
}

struct Reader<'a, R> {
    ocr: &'a R,
    names: Vec<String>,
    detector: ChangeDetector,
    debug_dir: PathBuf,
}

impl<R: Recognizer> Reader<'_, R> {
    async fn read(&mut self, frame: &DynamicImage, capture: &mut Capture) -> Result<FrameOutcome> {
        if !self.detector.changed(frame) {
            return Ok(FrameOutcome::Unchanged);
        }
        let regions = capture::crop_regions(frame)?;
        capture::save_debug(&regions, &self.debug_dir)?;

        match self.ocr.extract_castle_name(&regions.castle_name).await {
            Ok(Some(name)) if capture.castle_name.as_deref() != Some(name.as_str()) => {
                info!(castle = %name, "castle recognized");
                capture.castle_name = Some(name);
            }
            Ok(_) => {}
            Err(e) => debug!(error = %e, "castle name not read"),
        }

        let players = self
            .ocr
            .extract_players(&regions.players, &self.names, CaptureKind::CastleRush)
            .await?;
        Ok(FrameOutcome::Read(merge_players(&mut capture.sheet, &players)))
    }

    async fn next<F: FrameSource + Send + 'static>(
        &mut self,
        source: &Arc<Mutex<F>>,
        capture: &mut Capture,
    ) -> Result<FrameOutcome> {
        match grab(source).await {
            Ok(frame) => self.read(&frame, capture).await,
            Err(e) => {
                warn!(error = %e, "frame capture failed");
                Ok(FrameOutcome::Missing)
            }
        }
    }
}

/// Runs until Ctrl-C or until `options.frames` frames were read. Frame
/// capture runs on the blocking pool and Ctrl-C interrupts a frame that is
/// still being read.
pub async fn run<R, F>(ocr: &R, source: F, roster: Vec<Member>, options: &SessionOptions) -> Result<Capture>
where
    R: Recognizer,
    F: FrameSource + Send + 'static,
{
    let source = Arc::new(Mutex::new(source));
    let mut reader = Reader {
        ocr,
        names: roster.iter().map(|m| m.name.clone()).collect(),
        detector: ChangeDetector::new(options.change_threshold),
        debug_dir: options.debug_dir.clone(),
    };
    let mut capture = Capture {
        sheet: CastleRushSheet::entered_only(roster),
        castle_name: None,
        frames: 0,
    };

    let mut frame_tick = tokio::time::interval(options.interval);
    frame_tick.set_missed_tick_behavior(MissedTickBehavior::Skip);
    let mut health_tick = tokio::time::interval(options.health_every);
    health_tick.tick().await;

    let mut online = ocr.health().await;
    if online {
        info!(url = ocr.base_url(), "OCR service online");
    } else {
        warn!(url = ocr.base_url(), "OCR service offline, waiting");
    }

    let ctrl_c = tokio::signal::ctrl_c();
    tokio::pin!(ctrl_c);

    loop {
        tokio::select! {
            _ = &mut ctrl_c => break,
            _ = health_tick.tick() => online = recheck(ocr, online).await,
            _ = frame_tick.tick() => {
                if !online {
                    continue;
                }
                let outcome = {
                    let step = reader.next(&source, &mut capture);
                    tokio::pin!(step);
                    loop {
                        tokio::select! {
                            _ = &mut ctrl_c => break None,
                            _ = health_tick.tick() => online = recheck(ocr, online).await,
                            outcome = &mut step => break Some(outcome),
                        }
                    }
                };
                let Some(outcome) = outcome else {
                    break;
                };
                match outcome {
                    Ok(FrameOutcome::Missing | FrameOutcome::Unchanged) => continue,
                    Ok(FrameOutcome::Read(matched)) => {
                        capture.frames += 1;
                        info!(frame = capture.frames, matched, total = capture.sheet.ranked().len(), "frame read");
                    }
                    Err(e) => {
                        capture.frames += 1;
                        warn!(error = %e, "frame skipped");
                    }
                }
                if options.frames.is_some_and(|n| capture.frames >= n) {
                    break;
                }
            }
        }
    }

    info!(frames = capture.frames, "capture stopped");
    Ok(capture)
}

/// Reads a single still image.
pub async fn read_image<R: Recognizer>(
    ocr: &R,
    image: &DynamicImage,
    roster: Vec<Member>,
    debug_dir: PathBuf,
) -> Result<Capture> {
    let mut reader = Reader {
        ocr,
        names: roster.iter().map(|m| m.name.clone()).collect(),
        detector: ChangeDetector::new(0.0),
        debug_dir,
    };
    let mut capture = Capture {
        sheet: CastleRushSheet::entered_only(roster),
        castle_name: None,
        frames: 1,
    };
    reader.read(image, &mut capture).await?;
    Ok(capture)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::Role;
    use image::{Rgb, RgbImage};
    use std::cell::{Cell, RefCell};
    use std::collections::{HashMap, VecDeque};

    fn roster() -> Vec<Member> {
        ["Aria", "Bolt", "Cid"]
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
    fn test_later_frames_overwrite_scores() {
        let mut sheet = CastleRushSheet::entered_only(roster());
        assert_eq!(merge_players(&mut sheet, &[player("Aria", 100), player("Stranger", 1)]), 1);
        assert_eq!(merge_players(&mut sheet, &[player("aria", 150), player("Bolt", 90)]), 2);
        assert_eq!(sheet.score("0"), Some(150));
        assert_eq!(sheet.score("1"), Some(90));
        assert_eq!(sheet.score("2"), None);
    }

    #[test]
    fn test_non_participants_are_marked() {
        let mut sheet = CastleRushSheet::entered_only(roster());
        merge_players(&mut sheet, &[player("Bolt", 90)]);
        let missing: Vec<_> = mark_non_participants(&mut sheet).into_iter().map(|m| m.name).collect();
        assert_eq!(missing, vec!["Aria", "Cid"]);
        assert_eq!(sheet.absent().count(), 2);
    }

    #[test]
    fn test_summary_orders_and_totals() {
        let mut sheet = CastleRushSheet::entered_only(roster());
        merge_players(&mut sheet, &[player("Cid", 5_000), player("Aria", 5_000), player("Bolt", 12_000)]);
        let text = summary(&sheet);
        let names: Vec<&str> = text.lines().take(3).map(|l| l.split_whitespace().next().unwrap()).collect();
        assert_eq!(names, vec!["Bolt", "Aria", "Cid"]);
        assert!(text.ends_with("3 members, total 22,000\n"));
    }

    fn solid(v: u8) -> DynamicImage {
        DynamicImage::ImageRgb8(RgbImage::from_pixel(64, 40, Rgb([v, v, v])))
    }

    /// Frames by gray level; `None` is a failed capture.
    struct Script(VecDeque<Option<u8>>);

    impl FrameSource for Script {
        fn next_frame(&mut self) -> Result<DynamicImage> {
            match self.0.pop_front() {
                Some(Some(v)) => Ok(solid(v)),
                Some(None) => anyhow::bail!("display went away"),
                None => anyhow::bail!("no frames left"),
            }
        }
    }

    /// Answers health checks from a script (the last answer repeats) and
    /// reads players by the gray level of the crop.
    #[derive(Default)]
    struct StubOcr {
        health: RefCell<VecDeque<bool>>,
        health_calls: Cell<u32>,
        online: Cell<bool>,
        players: HashMap<u8, Vec<ExtractedPlayer>>,
        /// Gray level of every players crop read, with the health state at the time.
        reads: RefCell<Vec<(u8, bool)>>,
    }

    impl Recognizer for StubOcr {
        fn base_url(&self) -> &str {
            "stub"
        }

        async fn health(&self) -> bool {
            self.health_calls.set(self.health_calls.get() + 1);
            let mut answers = self.health.borrow_mut();
            let now = if answers.len() > 1 { answers.pop_front() } else { answers.front().copied() };
            let now = now.unwrap_or(true);
            self.online.set(now);
            now
        }

        async fn extract_castle_name(&self, _image: &DynamicImage) -> Result<Option<String>> {
            Ok(Some("Guardian's Castle".to_string()))
        }

        async fn extract_players(
            &self,
            image: &DynamicImage,
            _member_names: &[String],
            _kind: CaptureKind,
        ) -> Result<Vec<ExtractedPlayer>> {
            let level = image.to_luma8().get_pixel(0, 0)[0];
            self.reads.borrow_mut().push((level, self.online.get()));
            match self.players.get(&level) {
                Some(players) => Ok(players.clone()),
                None => anyhow::bail!("unreadable frame"),
            }
        }
    }

    fn options(health_every: Duration, frames: u32, dir: &std::path::Path) -> SessionOptions {
        SessionOptions {
            interval: Duration::from_millis(1),
            health_every,
            change_threshold: 1.0,
            frames: Some(frames),
            debug_dir: dir.to_path_buf(),
        }
    }

    async fn run_script(ocr: &StubOcr, frames: Vec<Option<u8>>, options: &SessionOptions) -> Capture {
        let session = run(ocr, Script(frames.into()), roster(), options);
        tokio::time::timeout(Duration::from_secs(10), session)
            .await
            .expect("session did not stop")
            .unwrap()
    }

    #[tokio::test]
    async fn test_run_skips_unchanged_and_survives_failures() {
        let dir = tempfile::tempdir().unwrap();
        let ocr = StubOcr {
            players: HashMap::from([
                (10, vec![player("Aria", 100), player("Stranger", 5)]),
                (90, vec![player("aria", 150), player("Bolt", 90)]),
            ]),
            ..Default::default()
        };
        // repeat of 10 is unchanged, None fails capture, 50 fails extraction
        let script = vec![Some(10), Some(10), None, Some(50), Some(90), Some(120)];
        let mut capture = run_script(&ocr, script, &options(Duration::from_secs(3600), 3, dir.path())).await;

        assert_eq!(capture.frames, 3);
        let levels: Vec<u8> = ocr.reads.borrow().iter().map(|(level, _)| *level).collect();
        assert_eq!(levels, vec![10, 50, 90]);
        assert_eq!(capture.castle_name.as_deref(), Some("Guardian's Castle"));
        assert_eq!(capture.sheet.score("0"), Some(150));
        assert_eq!(capture.sheet.score("1"), Some(90));
        assert_eq!(capture.sheet.score("2"), None);

        let absent: Vec<_> = mark_non_participants(&mut capture.sheet).into_iter().map(|m| m.name).collect();
        assert_eq!(absent, vec!["Cid"]);
        assert!(summary(&capture.sheet).ends_with("2 members, total 240\n"));
    }

    #[tokio::test]
    async fn test_run_waits_for_service_to_come_online() {
        let dir = tempfile::tempdir().unwrap();
        let ocr = StubOcr {
            health: RefCell::new(VecDeque::from([false, false, true])),
            players: HashMap::from([(30, vec![player("Bolt", 70)])]),
            ..Default::default()
        };
        let capture = run_script(&ocr, vec![Some(30)], &options(Duration::from_millis(20), 1, dir.path())).await;

        assert_eq!(capture.frames, 1);
        assert!(ocr.health_calls.get() >= 3);
        assert_eq!(*ocr.reads.borrow(), vec![(30, true)]);
        assert_eq!(capture.sheet.score("1"), Some(70));
    }
}
