//! Environment listing: best-effort disk-usage scanning and rendering.

use crate::cli::ListFormat;
use crate::config::Paths;
use crate::update;
use anyhow::{anyhow, Context, Result};
use regex::Regex;
use serde::Serialize;
use std::collections::BTreeMap;
use std::fs;
use std::path::Path;
use std::process::Command;

/// One environment's listing row. Field order matches the sorted-key JSON
/// output; absent values are omitted entirely.
#[derive(Debug, Default, Serialize)]
pub struct EnvEntry {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub home_dir: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub home_dir_du_error: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub home_dir_mtime: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub home_dir_size: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub work_dir: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub work_dir_du_error: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub work_dir_mtime: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub work_dir_size: Option<u64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DiskUsage {
    /// The scan hit permission errors; totals cover what was readable.
    pub partial: bool,
    pub size: u64,
    pub mtime: u64,
}

pub fn list_environments(paths: &Paths, format: ListFormat) -> Result<()> {
    if format == ListFormat::Names {
        // Fast path for shell completions: no scanning at all.
        for name in child_names(&paths.work_root) {
            println!("{name}");
        }
        return Ok(());
    }

    let now = update::now_secs()?;
    let mut envs: BTreeMap<String, EnvEntry> = BTreeMap::new();
    for name in child_names(&paths.work_root) {
        let dir = paths.work_dir(&name);
        let entry = envs.entry(name).or_default();
        entry.work_dir = Some(dir.display().to_string());
        if let Ok(usage) = scan_usage(&dir) {
            entry.work_dir_du_error = Some(usage.partial);
            entry.work_dir_size = Some(usage.size);
            entry.work_dir_mtime = Some(usage.mtime);
        }
    }
    for name in child_names(&paths.home_root) {
        let dir = paths.home_dir(&name);
        let entry = envs.entry(name).or_default();
        entry.home_dir = Some(dir.display().to_string());
        if let Ok(usage) = scan_usage(&dir) {
            entry.home_dir_du_error = Some(usage.partial);
            entry.home_dir_size = Some(usage.size);
            entry.home_dir_mtime = Some(usage.mtime);
        }
    }

    match format {
        ListFormat::Json => println!("{}", render_json(&envs)?),
        ListFormat::Default => print!("{}", render_table(&envs, now)),
        ListFormat::Names => unreachable!("handled above"),
    }
    Ok(())
}

/// Sorted child directory names; a missing root reads as empty.
fn child_names(root: &Path) -> Vec<String> {
    let mut names = Vec::new();
    if let Ok(entries) = fs::read_dir(root) {
        for entry in entries.flatten() {
            names.push(entry.file_name().to_string_lossy().to_string());
        }
    }
    names.sort();
    names
}

/// Aggregate size and newest mtime via `du`, tolerating permission errors.
fn scan_usage(path: &Path) -> Result<DiskUsage> {
    let output = Command::new("du")
        .args(["-cs", "--block-size=1", "--time", "--time-style=+%s"])
        .arg(path)
        .output()
        .context("run du")?;
    parse_du_output(
        &String::from_utf8_lossy(&output.stdout),
        !output.stderr.is_empty(),
    )
}

fn parse_du_output(stdout: &str, partial: bool) -> Result<DiskUsage> {
    let total = Regex::new(r"(?m)^([0-9]+)\t([0-9]+)\ttotal$").expect("du total regex");
    let caps = total
        .captures(stdout)
        .ok_or_else(|| anyhow!("unexpected output from du"))?;
    let size = caps[1].parse().context("parse du size")?;
    let mtime = caps[2].parse().context("parse du mtime")?;
    Ok(DiskUsage {
        partial,
        size,
        mtime,
    })
}

fn render_json(envs: &BTreeMap<String, EnvEntry>) -> Result<String> {
    let formatter = serde_json::ser::PrettyFormatter::with_indent(b"    ");
    let mut buf = Vec::new();
    let mut ser = serde_json::Serializer::with_formatter(&mut buf, formatter);
    envs.serialize(&mut ser).context("serialize listing")?;
    String::from_utf8(buf).context("listing is not UTF-8")
}

fn render_table(envs: &BTreeMap<String, EnvEntry>, now: u64) -> String {
    let nw = envs
        .keys()
        .map(String::len)
        .max()
        .unwrap_or(0)
        .max(10);
    let mut out = String::new();
    out.push_str(&format!(
        "{:<nw$} | {:^21} | {:^21}\n",
        "", "home directory", "work directory"
    ));
    out.push_str(&format!(
        "{:<nw$} | {:>10} {:>10} | {:>10} {:>10}\n",
        "name", "size", "modified", "size", "modified"
    ));
    out.push_str(&format!(
        "{:-<nw$} + {:-<10} {:-<10} + {:-<10} {:-<10}\n",
        "", "", "", "", ""
    ));
    for (name, entry) in envs {
        out.push_str(&format!(
            "{:<nw$} | {:>10} {:>10} | {:>10} {:>10}\n",
            name,
            size_cell(entry.home_dir_size, entry.home_dir_du_error),
            age_cell(entry.home_dir_mtime, now),
            size_cell(entry.work_dir_size, entry.work_dir_du_error),
            age_cell(entry.work_dir_mtime, now),
        ));
    }
    out
}

fn size_cell(size: Option<u64>, partial: Option<bool>) -> String {
    match size {
        Some(size) => {
            let mut cell = si_bytes(size);
            if partial == Some(true) {
                cell.push('+');
            }
            cell
        }
        None => "N/A".to_string(),
    }
}

fn age_cell(mtime: Option<u64>, now: u64) -> String {
    match mtime {
        Some(mtime) => rel_time(now.saturating_sub(mtime)),
        None => "N/A".to_string(),
    }
}

pub fn si_bytes(size: u64) -> String {
    if size < 1_000 {
        return format!("{size} B");
    }
    let size = size as f64;
    if size < 999_950.0 {
        format!("{:.1} kB", size / 1e3)
    } else if size < 999_950.0 * 1e3 {
        format!("{:.1} MB", size / 1e6)
    } else if size < 999_950.0 * 1e6 {
        format!("{:.1} GB", size / 1e9)
    } else {
        format!("{:.1} TB", size / 1e12)
    }
}

pub fn rel_time(duration_secs: u64) -> String {
    let minutes = duration_secs as f64 / 60.0;
    if minutes < 59.5 {
        return format!("{minutes:.0} minutes");
    }
    let hours = minutes / 60.0;
    if hours < 23.5 {
        return format!("{hours:.0} hours");
    }
    format!("{:.0} days", hours / 24.0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn si_bytes_rounds_at_decimal_boundaries() {
        assert_eq!(si_bytes(0), "0 B");
        assert_eq!(si_bytes(999), "999 B");
        assert_eq!(si_bytes(1_000), "1.0 kB");
        assert_eq!(si_bytes(999_949), "999.9 kB");
        assert_eq!(si_bytes(999_950), "1.0 MB");
        assert_eq!(si_bytes(2_500_000_000), "2.5 GB");
        assert_eq!(si_bytes(3_000_000_000_000), "3.0 TB");
    }

    #[test]
    fn rel_time_switches_units() {
        assert_eq!(rel_time(0), "0 minutes");
        assert_eq!(rel_time(59 * 60), "59 minutes");
        assert_eq!(rel_time(60 * 60), "1 hours");
        assert_eq!(rel_time(23 * 60 * 60), "23 hours");
        assert_eq!(rel_time(24 * 60 * 60), "1 days");
        assert_eq!(rel_time(3 * 24 * 60 * 60), "3 days");
    }

    #[test]
    fn du_output_parses_the_total_line() {
        let stdout = "4096\t1700000000\t/some/dir\n8192\t1700000300\ttotal\n";
        let usage = parse_du_output(stdout, false).unwrap();
        assert_eq!(
            usage,
            DiskUsage {
                partial: false,
                size: 8192,
                mtime: 1_700_000_300
            }
        );
        assert!(parse_du_output("garbage\n", false).is_err());
    }

    #[test]
    fn partial_scans_are_flagged_not_fatal() {
        let stdout = "100\t1700000000\ttotal\n";
        let usage = parse_du_output(stdout, true).unwrap();
        assert!(usage.partial);
        assert_eq!(size_cell(Some(usage.size), Some(usage.partial)), "100 B+");
    }

    #[test]
    fn table_renders_missing_scans_as_na() {
        let mut envs = BTreeMap::new();
        envs.insert(
            "foo".to_string(),
            EnvEntry {
                work_dir: Some("/w/foo".to_string()),
                work_dir_size: Some(2048),
                work_dir_mtime: Some(1_000),
                work_dir_du_error: Some(false),
                ..EnvEntry::default()
            },
        );
        let table = render_table(&envs, 1_000 + 120);
        let row = table.lines().last().unwrap();
        assert!(row.starts_with("foo"));
        assert!(row.contains("N/A"), "{row}");
        assert!(row.contains("2.0 kB"), "{row}");
        assert!(row.contains("2 minutes"), "{row}");
    }

    #[test]
    fn json_omits_missing_fields_and_indents_by_four() {
        let mut envs = BTreeMap::new();
        envs.insert(
            "foo".to_string(),
            EnvEntry {
                home_dir: Some("/h/foo".to_string()),
                ..EnvEntry::default()
            },
        );
        let json = render_json(&envs).unwrap();
        assert!(json.contains("    \"foo\""), "{json}");
        assert!(json.contains("\"home_dir\": \"/h/foo\""), "{json}");
        assert!(!json.contains("work_dir"), "{json}");
    }
}
