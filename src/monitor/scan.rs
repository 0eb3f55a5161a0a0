//! One poll cycle's filesystem work.  Runs on a blocking thread and owns
//! the cache for its duration.

use std::collections::HashMap;
use std::fs::File;
use std::io::{self, Read, Seek, SeekFrom};
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant, SystemTime};

use chrono::{DateTime, Utc};
use serde_json::Value;
use tracing::{debug, trace, warn};

use super::cache::ActivityCache;
use crate::activity::{AgentActivity, AgentKind};
use crate::parser::{self, ParseOptions};

pub const TRANSCRIPT_EXTENSION: &str = "jsonl";
/// Files not modified within this window are not polled.
pub const ACTIVITY_WINDOW: Duration = Duration::from_secs(30 * 60);
pub const MAX_FILES_PER_CYCLE: usize = 5;

#[derive(Debug, Clone)]
pub struct Candidate {
    pub path: PathBuf,
    pub mtime: SystemTime,
}

/// Recently modified transcripts in `dir`, newest first, at most
/// [`MAX_FILES_PER_CYCLE`].  A missing or unreadable directory yields none.
pub fn discover_candidates(dir: &Path, now: SystemTime) -> Vec<Candidate> {
    let entries = match std::fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(e) if e.kind() == io::ErrorKind::NotFound => {
            debug!(dir = %dir.display(), "sessions directory does not exist yet");
            return Vec::new();
        }
        Err(e) => {
            warn!(dir = %dir.display(), error = %e, "failed to list sessions directory");
            return Vec::new();
        }
    };

    let cutoff = now.checked_sub(ACTIVITY_WINDOW);
    let mut found: Vec<Candidate> = entries
        .flatten()
        .filter_map(|entry| {
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some(TRANSCRIPT_EXTENSION) {
                return None;
            }
            let meta = std::fs::metadata(&path).ok()?;
            if !meta.is_file() {
                return None;
            }
            let mtime = meta.modified().ok()?;
            if cutoff.is_some_and(|c| mtime < c) {
                return None;
            }
            Some(Candidate { path, mtime })
        })
        .collect();

    found.sort_by(|a, b| b.mtime.cmp(&a.mtime).then_with(|| a.path.cmp(&b.path)));
    found.truncate(MAX_FILES_PER_CYCLE);
    found
}

/// Bytes read from a transcript, trimmed to whole lines.
#[derive(Debug)]
pub struct Chunk {
    pub bytes: Vec<u8>,
    /// Where the read actually started; 0 after a truncation reset.
    pub start: u64,
    /// Offset to store for the next read.
    pub end: u64,
}

/// Read `path` from `offset` to end of file.
///
/// An offset past the end means the file was truncated or replaced and the
/// read starts over from 0.  Only complete lines are returned; a trailing
/// fragment is left for the next read unless it already parses as a JSON
/// object.
pub fn read_from_offset(path: &Path, offset: u64) -> io::Result<Chunk> {
    let mut file = File::open(path)?;
    let len = file.metadata()?.len();
    let start = if offset > len {
        warn!(
            path = %path.display(),
            offset,
            len,
            "transcript shrank, rereading from start"
        );
        0
    } else {
        offset
    };

    file.seek(SeekFrom::Start(start))?;
    let mut bytes = Vec::with_capacity((len - start) as usize);
    file.read_to_end(&mut bytes)?;

    let consumed = match bytes.iter().rposition(|&b| b == b'\n') {
        Some(pos) if pos + 1 == bytes.len() => bytes.len(),
        Some(pos) if is_complete_record(&bytes[pos + 1..]) => bytes.len(),
        Some(pos) => pos + 1,
        None if is_complete_record(&bytes) => bytes.len(),
        None => 0,
    };
    bytes.truncate(consumed);

    Ok(Chunk {
        bytes,
        start,
        end: start + consumed as u64,
    })
}

fn is_complete_record(fragment: &[u8]) -> bool {
    std::str::from_utf8(fragment)
        .ok()
        .and_then(parser::parse_line)
        .is_some_and(|v| matches!(v, Value::Object(_)))
}

#[derive(Debug, Clone, Copy)]
pub struct ReadPolicy {
    pub attempts: u32,
    pub delay: Duration,
    pub timeout: Duration,
}

/// [`read_from_offset`] with retries on transient errors.  A vanished file
/// is not retried.
pub fn read_with_retry(path: &Path, offset: u64, policy: ReadPolicy) -> io::Result<Chunk> {
    retry_io(path, policy, || read_from_offset(path, offset))
}

/// Run `op` until it succeeds, fails with `NotFound`, runs out of
/// attempts, or the next attempt would overrun the policy's timeout.
pub(crate) fn retry_io<T>(
    path: &Path,
    policy: ReadPolicy,
    mut op: impl FnMut() -> io::Result<T>,
) -> io::Result<T> {
    let started = Instant::now();
    let attempts = policy.attempts.max(1);
    let mut attempt = 1;
    loop {
        match op() {
            Ok(value) => return Ok(value),
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Err(e),
            Err(e) => {
                let out_of_time = started.elapsed() + policy.delay >= policy.timeout;
                if attempt >= attempts || out_of_time {
                    return Err(e);
                }
                debug!(
                    path = %path.display(),
                    attempt,
                    error = %e,
                    "transcript read failed, retrying"
                );
                std::thread::sleep(policy.delay);
                attempt += 1;
            }
        }
    }
}

/// Everything a poll cycle needs, moved onto the worker.
#[derive(Debug)]
pub struct ScanInput {
    pub dir: PathBuf,
    pub cache: ActivityCache,
    pub offsets: HashMap<PathBuf, u64>,
    /// Committed activities from the previous poll (or the restored
    /// checkpoint), keyed by id.
    pub committed: HashMap<String, AgentActivity>,
    pub max_actions: usize,
    pub policy: ReadPolicy,
    pub now: SystemTime,
}

/// What a poll cycle hands back to the monitor.
#[derive(Debug, Default)]
pub struct ScanOutput {
    pub cache: ActivityCache,
    pub offsets: HashMap<PathBuf, u64>,
    pub agents: HashMap<String, AgentActivity>,
    pub files_examined: usize,
    pub files_parsed: u64,
    pub cache_hits: u64,
}

pub fn run_scan(input: ScanInput) -> ScanOutput {
    let candidates = discover_candidates(&input.dir, input.now);
    scan_candidates(input, candidates)
}

fn scan_candidates(input: ScanInput, candidates: Vec<Candidate>) -> ScanOutput {
    let ScanInput {
        mut cache,
        mut offsets,
        committed,
        max_actions,
        policy,
        ..
    } = input;

    let mut out = ScanOutput {
        files_examined: candidates.len(),
        ..Default::default()
    };

    for Candidate { path, mtime } in candidates {
        if let Some(hit) = cache.lookup(&path, mtime) {
            trace!(path = %path.display(), "cache hit");
            out.cache_hits += 1;
            out.agents.insert(hit.id.clone(), hit.clone());
            continue;
        }

        let filename = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        let id = parser::session_id_from_filename(&filename);

        // Fold onto the previous parse only when its offset is known too;
        // otherwise reparse the whole file.
        let base = cache
            .previous(&path)
            .or_else(|| committed.get(&id))
            .cloned();
        let (base, offset) = match (base, offsets.get(&path).copied()) {
            (Some(base), Some(offset)) => (Some(base), offset),
            _ => (None, 0),
        };

        let chunk = match read_with_retry(&path, offset, policy) {
            Ok(chunk) => chunk,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                debug!(path = %path.display(), "transcript vanished before read");
                continue;
            }
            Err(e) => {
                warn!(path = %path.display(), error = %e, "transcript read failed");
                if let Some(base) = base {
                    out.agents.insert(base.id.clone(), base);
                }
                continue;
            }
        };

        let base = if chunk.start < offset { None } else { base };
        let text = String::from_utf8_lossy(&chunk.bytes);
        let fallback_time: DateTime<Utc> = mtime.into();
        let activity = parser::parse_content(
            &text,
            &filename,
            &ParseOptions {
                max_actions,
                agent_kind: AgentKind::Openclaw,
                previous: base.as_ref(),
                fallback_time,
            },
        );
        trace!(
            path = %path.display(),
            from = chunk.start,
            to = chunk.end,
            "transcript parsed"
        );
        out.files_parsed += 1;

        offsets.insert(path.clone(), chunk.end);
        cache.insert(path, mtime, activity.clone());
        out.agents.insert(activity.id.clone(), activity);
    }

    out.cache = cache;
    out.offsets = offsets;
    out
}
