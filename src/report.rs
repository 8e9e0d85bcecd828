//! Module: Report
//! But: Console rendering of what a scanner left in its output directory.
//!
//! Readers never lock writers out. A missing or torn `status.json` simply
//! renders as "no status yet".
//!
//! *Signed: kryon.kas*

use std::fmt::Write;
use std::path::Path;

use crate::config::{FOUND_LOG, STATUS_FILE};
use crate::sink::read_found_log;
use crate::status::read_status;

/// Renders status and found records of one output directory.
pub fn render(dir: &Path, show_keys: bool) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "== {} ==", dir.display());

    match read_status(&dir.join(STATUS_FILE)) {
        Some(status) => {
            let script = if status.script.is_empty() { "?" } else { status.script.as_str() };
            let _ = writeln!(out, "Script:            {script}");
            let _ = writeln!(out, "Total keys tested: {}", status.total_keys_checked);
            let _ = writeln!(out, "Session keys:      {}", status.session_keys_checked);
            let _ = writeln!(out, "Speed:             {:.2} keys/s", status.rate_per_second);
            let _ = writeln!(out, "Hits (BTC/ETH):    {}/{}", status.btc_hits, status.eth_hits);
            let _ = writeln!(out, "Unchecked:         {}", status.unchecked);
            let _ = writeln!(out, "Last update:       {}", status.last_update);
            if let Some(range) = status.range {
                let _ = writeln!(out, "Range:             {} - {}", range.range_start_hex, range.range_end_hex);
                let _ = writeln!(out, "Coverage (global): {:.8}%", range.coverage_global_percent);
            }
        }
        None => {
            let _ = writeln!(out, "no status yet");
        }
    }

    let records = read_found_log(&dir.join(FOUND_LOG));
    let _ = writeln!(out, "Found records:     {}", records.len());
    for record in records {
        let key = if show_keys { record.private_key.as_str() } else { "<hidden>" };
        let _ = writeln!(
            out,
            "  [{}] {} {:.8} {} {}",
            record.timestamp.format("%Y-%m-%d %H:%M:%S"),
            record.currency,
            record.balance,
            record.address,
            key,
        );
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::status::{StatusSnapshot, write_json_atomic};

    #[test]
    fn test_render_empty_directory() {
        let dir = tempfile::tempdir().unwrap();
        let text = render(dir.path(), false);
        assert!(text.contains("no status yet"));
        assert!(text.contains("Found records:     0"));
    }

    #[test]
    fn test_render_status_and_records() {
        let dir = tempfile::tempdir().unwrap();
        let snapshot = StatusSnapshot {
            script: "generator".into(),
            total_keys_checked: 77,
            ..StatusSnapshot::default()
        };
        write_json_atomic(&dir.path().join(STATUS_FILE), &snapshot).unwrap();
        std::fs::write(
            dir.path().join(FOUND_LOG),
            "[2024-05-06 07:08:09] ASSET=BTC BALANCE=0.50000000 ADDR=X PRIV=abcd\n[2024-05-06 07:08",
        )
        .unwrap();

        let text = render(dir.path(), false);
        assert!(text.contains("Total keys tested: 77"));
        assert!(text.contains("Found records:     1"));
        assert!(text.contains("BTC 0.50000000 X <hidden>"));
        assert!(render(dir.path(), true).contains("X abcd"));
    }

    #[test]
    fn test_render_tolerates_torn_status() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join(STATUS_FILE), "{\"total_keys_ch").unwrap();
        assert!(render(dir.path(), false).contains("no status yet"));
    }
}
