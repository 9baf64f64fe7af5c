//! Backup kinds, period tags and run names.
//!
//! A run name is `<cycle>-<kind>-<period>`, e.g.
//! `workstation-daily-2026-10-16`, `workstation-weekly-2026-W42` or
//! `workstation-monthly-2026-10`.

use chrono::{Datelike, NaiveDate, Weekday};
use clap::ValueEnum;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum BackupKind {
    Daily,
    Weekly,
    Monthly,
}

impl BackupKind {
    /// First of the month is monthly, Sunday is weekly, anything else daily.
    pub fn for_date(date: NaiveDate) -> Self {
        if date.day() == 1 {
            BackupKind::Monthly
        } else if date.weekday() == Weekday::Sun {
            BackupKind::Weekly
        } else {
            BackupKind::Daily
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            BackupKind::Daily => "daily",
            BackupKind::Weekly => "weekly",
            BackupKind::Monthly => "monthly",
        }
    }

    /// Period tag of `date` for this kind.
    pub fn period_tag(self, date: NaiveDate) -> String {
        match self {
            BackupKind::Daily => date.format("%Y-%m-%d").to_string(),
            BackupKind::Weekly => date.format("%G-W%V").to_string(),
            BackupKind::Monthly => date.format("%Y-%m").to_string(),
        }
    }

    fn parses_tag(self, tag: &str) -> bool {
        match self {
            BackupKind::Daily => NaiveDate::parse_from_str(tag, "%Y-%m-%d").is_ok(),
            BackupKind::Weekly => {
                NaiveDate::parse_from_str(&format!("{}-1", tag), "%G-W%V-%u").is_ok()
            }
            BackupKind::Monthly => {
                NaiveDate::parse_from_str(&format!("{}-01", tag), "%Y-%m-%d").is_ok()
            }
        }
    }
}

impl fmt::Display for BackupKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for BackupKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "daily" => Ok(BackupKind::Daily),
            "weekly" => Ok(BackupKind::Weekly),
            "monthly" => Ok(BackupKind::Monthly),
            other => Err(format!("unknown backup kind: {}", other)),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunName {
    pub cycle: String,
    pub kind: BackupKind,
    pub period: String,
}

impl RunName {
    pub fn new(cycle: &str, kind: BackupKind, date: NaiveDate) -> Self {
        Self {
            cycle: cycle.to_string(),
            kind,
            period: kind.period_tag(date),
        }
    }

    /// Parse a directory name belonging to `cycle`.
    pub fn parse(cycle: &str, name: &str) -> Option<Self> {
        let rest = name.strip_prefix(cycle)?.strip_prefix('-')?;
        let (kind, period) = rest.split_once('-')?;
        let kind: BackupKind = kind.parse().ok()?;
        if !kind.parses_tag(period) {
            return None;
        }
        Some(Self {
            cycle: cycle.to_string(),
            kind,
            period: period.to_string(),
        })
    }
}

impl fmt::Display for RunName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}-{}", self.cycle, self.kind, self.period)
    }
}

/// One execution of the orchestrator.
#[derive(Debug, Clone)]
pub struct Run {
    name: RunName,
    force: bool,
}

impl Run {
    /// `kind` overrides the kind derived from `date`.
    pub fn new(cycle: &str, kind: Option<BackupKind>, force: bool, date: NaiveDate) -> Self {
        let kind = kind.unwrap_or_else(|| BackupKind::for_date(date));
        Self {
            name: RunName::new(cycle, kind, date),
            force,
        }
    }

    pub fn name(&self) -> &RunName {
        &self.name
    }

    pub fn kind(&self) -> BackupKind {
        self.name.kind
    }

    pub fn force(&self) -> bool {
        self.force
    }

    pub fn log_file_name(&self) -> String {
        format!("{}.log", self.name)
    }
}
