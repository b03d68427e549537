//! Daemon log reading.
//!
//! The daemons log either plain lines
//! (`2024/01/01 10:00:00 vigil-remoted: INFO: Started`) or one JSON object
//! per line with the same four fields. Timestamps are written in local time
//! and reported in UTC.

use crate::config::{LogFormat, PathsConfig};
use crate::error::{codes, Result, VigilError};
use chrono::{Local, NaiveDateTime, TimeZone, Utc};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;
use std::sync::LazyLock;

/// Lines read from the end of the log when the caller sets no limit.
pub const DEFAULT_LIMIT: usize = 2000;

const LOG_TIMESTAMP_FORMAT: &str = "%Y/%m/%d %H:%M:%S";
const REPORTED_TIMESTAMP_FORMAT: &str = "%Y-%m-%dT%H:%M:%SZ";

static PLAIN_LOG_LINE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"^(\d{4}/\d\d/\d\d \d\d:\d\d:\d\d) (\S+?)(?:\[.*)?: (DEBUG|INFO|CRITICAL|ERROR|WARNING):(.*)$",
    )
    .expect("log line regex must compile")
});

/// One parsed log line.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogEntry {
    pub timestamp: String,
    pub tag: String,
    pub level: String,
    pub description: String,
}

/// Per-level line counts of one tag.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LevelCounts {
    pub all: usize,
    pub info: usize,
    pub error: usize,
    pub critical: usize,
    pub warning: usize,
    pub debug: usize,
}

impl LevelCounts {
    fn count(&mut self, level: &str) {
        self.all += 1;
        match level {
            "info" => self.info += 1,
            "error" => self.error += 1,
            "critical" => self.critical += 1,
            "warning" => self.warning += 1,
            "debug" => self.debug += 1,
            _ => {}
        }
    }
}

#[derive(Deserialize)]
struct JsonLogLine {
    timestamp: String,
    tag: String,
    level: String,
    description: String,
}

/// Parse one log line; lines that do not match the format yield `None`.
pub fn parse_log_line(line: &str, format: LogFormat) -> Option<LogEntry> {
    let raw = match format {
        LogFormat::Plain => {
            let captures = PLAIN_LOG_LINE.captures(line)?;
            JsonLogLine {
                timestamp: captures[1].to_string(),
                tag: captures[2].to_string(),
                level: captures[3].to_string(),
                description: captures[4].to_string(),
            }
        }
        LogFormat::Json => serde_json::from_str(line).ok()?,
    };

    let local = NaiveDateTime::parse_from_str(&raw.timestamp, LOG_TIMESTAMP_FORMAT).ok()?;
    let timestamp = Local
        .from_local_datetime(&local)
        .earliest()?
        .with_timezone(&Utc)
        .format(REPORTED_TIMESTAMP_FORMAT)
        .to_string();

    // Rootcheck logs under several tags.
    let tag = if raw.tag.contains("rootcheck") {
        "vigil-rootcheck".to_string()
    } else {
        raw.tag
    };

    Some(LogEntry {
        timestamp,
        tag,
        level: raw.level.to_lowercase(),
        description: raw.description.trim().to_string(),
    })
}

/// Last `limit` lines of the log written in `format`.
pub async fn get_logs(paths: &PathsConfig, format: LogFormat, limit: usize) -> Result<Vec<LogEntry>> {
    let path = match format {
        LogFormat::Plain => &paths.log_file,
        LogFormat::Json => &paths.log_json_file,
    };
    let content = read_log(path).await?;

    let lines: Vec<&str> = content.lines().collect();
    let start = lines.len().saturating_sub(limit);
    Ok(lines[start..]
        .iter()
        .filter_map(|line| parse_log_line(line, format))
        .collect())
}

/// Line counts per tag over the last `limit` lines.
pub async fn get_logs_summary(
    paths: &PathsConfig,
    format: LogFormat,
    limit: usize,
) -> Result<BTreeMap<String, LevelCounts>> {
    let mut tags: BTreeMap<String, LevelCounts> = BTreeMap::new();
    for entry in get_logs(paths, format, limit).await? {
        tags.entry(entry.tag).or_default().count(&entry.level);
    }
    Ok(tags)
}

async fn read_log(path: &Path) -> Result<String> {
    match tokio::fs::read_to_string(path).await {
        Ok(content) => Ok(content),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Err(VigilError::Internal {
            code: codes::LOG_UNAVAILABLE,
            message: "Impossible to retrieve the log file".to_string(),
        }),
        Err(e) => Err(VigilError::io_with_path(e, path)),
    }
}
