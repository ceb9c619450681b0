//! Progress extraction from renderer log output.
//!
//! Each render engine reports progress in its own dialect. A
//! [`ProgressParser`] understands one dialect; [`parser_for`] picks the
//! right one from the job's renderer identifier. Completion (`Saved: ...`)
//! is engine independent and handled by [`LogScanner`].

use std::path::PathBuf;
use std::sync::LazyLock;
use std::time::Duration;

use regex::Regex;

static BLENDER_INTERNAL_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^Fra:(\d+) Mem:\S+ \(\S+, peak \S+\) \| .*\bPart (\d+)-(\d+)\s*$")
        .expect("valid regex")
});

static CYCLES_TILE_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^Fra:(\d+) .*\| (?:Rendering \| )?Path Tracing Tile (\d+)/(\d+)").expect("valid regex")
});

static CYCLES_SAMPLE_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^Fra:(\d+) .*\| Sample (\d+)/(\d+)").expect("valid regex")
});

static SAVED_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^Saved: '?(?P<path>[^']+?)'?(?: Time: (?P<time>[0-9:.]+).*)?$").expect("valid regex")
});

static TIME_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^\s*Time: (?P<time>[0-9:.]+)").expect("valid regex"));

/// A renderer dialect that can turn log lines into a completed/total count.
pub trait ProgressParser: Send {
    /// `Some((done, total))` when the line carries progress information.
    fn parse(&mut self, line: &str) -> Option<(u32, u32)>;
}

/// Blender Internal prints one line per finished render part.
#[derive(Debug, Default)]
pub struct BlenderInternalParser;

impl ProgressParser for BlenderInternalParser {
    fn parse(&mut self, line: &str) -> Option<(u32, u32)> {
        let caps = BLENDER_INTERNAL_RE.captures(line)?;
        Some((caps[2].parse().ok()?, caps[3].parse().ok()?))
    }
}

/// Cycles reports either finished tiles or samples, depending on version.
#[derive(Debug, Default)]
pub struct CyclesParser;

impl ProgressParser for CyclesParser {
    fn parse(&mut self, line: &str) -> Option<(u32, u32)> {
        let caps = CYCLES_TILE_RE
            .captures(line)
            .or_else(|| CYCLES_SAMPLE_RE.captures(line))?;
        Some((caps[2].parse().ok()?, caps[3].parse().ok()?))
    }
}

/// Engines without a known dialect only report completion.
#[derive(Debug, Default)]
pub struct CompletionOnlyParser;

impl ProgressParser for CompletionOnlyParser {
    fn parse(&mut self, _line: &str) -> Option<(u32, u32)> {
        None
    }
}

/// Select the parser for a renderer identifier.
pub fn parser_for(renderer: &str) -> Box<dyn ProgressParser> {
    match renderer.to_ascii_uppercase().as_str() {
        "BLENDER_RENDER" => Box::new(BlenderInternalParser),
        "CYCLES" => Box::new(CyclesParser),
        _ => Box::new(CompletionOnlyParser),
    }
}

/// What a log line told us.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LogEvent {
    Progress(u8),
    Saved {
        path: PathBuf,
        time: Option<Duration>,
    },
    RenderTime(Duration),
}

/// Feeds renderer output through a dialect parser and tracks the
/// resulting percentage.
pub struct LogScanner {
    parser: Box<dyn ProgressParser>,
    progress: u8,
}

impl LogScanner {
    pub fn new(renderer: &str) -> Self {
        Self {
            parser: parser_for(renderer),
            progress: 0,
        }
    }

    pub fn progress(&self) -> u8 {
        self.progress
    }

    pub fn scan(&mut self, line: &str) -> Option<LogEvent> {
        let line = line.trim_end();

        if let Some((done, total)) = self.parser.parse(line) {
            if total == 0 {
                return None;
            }
            let percent = (u64::from(done.min(total)) * 100 / u64::from(total)) as u8;
            // Never go backwards within one render
            self.progress = self.progress.max(percent);
            return Some(LogEvent::Progress(self.progress));
        }

        if let Some(caps) = SAVED_RE.captures(line) {
            self.progress = 100;
            return Some(LogEvent::Saved {
                path: PathBuf::from(caps["path"].trim()),
                time: caps.name("time").and_then(|t| parse_render_time(t.as_str())),
            });
        }

        TIME_RE
            .captures(line)
            .and_then(|caps| parse_render_time(&caps["time"]))
            .map(LogEvent::RenderTime)
    }
}

/// Parse Blender's `[[HH:]MM:]SS[.ff]` render time.
pub fn parse_render_time(s: &str) -> Option<Duration> {
    let mut seconds = 0f64;
    for part in s.trim().split(':') {
        let value: f64 = part.parse().ok()?;
        if value < 0.0 {
            return None;
        }
        seconds = seconds * 60.0 + value;
    }
    Some(Duration::from_secs_f64(seconds))
}
