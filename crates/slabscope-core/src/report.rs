//! Fixed-width text rendering of cache summaries.
//!
//! The layout is consumed by existing tooling, so widths, the banner and the
//! header are frozen. The header carries no trailing newline; every row starts
//! with one. A rendered report therefore has no final newline.
//!
//! The two KiB columns are true quotients printed the way Python 3 prints a
//! float: shortest round-trip digits, always a fractional part, and exponent
//! notation (`1e+16`) from 1e16 upward.

use std::io::{self, Write};

use crate::aggregate::CacheSummary;

/// Default text report file name.
pub const REPORT_FILE_NAME: &str = "slabsummary_partial.txt";
/// Default JSON report file name.
pub const JSON_REPORT_FILE_NAME: &str = "slabsummary_partial.json";

/// Width of each banner line.
pub const BANNER_WIDTH: usize = 99;
const TITLE: &str = " Summary of partial slabs ";

/// Text of a KiB column value.
#[must_use]
pub fn kib_text(value: f64) -> String {
    let text = format!("{value:?}");
    match text.split_once('e') {
        Some((mantissa, exp)) => {
            let (sign, digits) = exp.strip_prefix('-').map_or(("+", exp), |d| ("-", d));
            format!("{mantissa}e{sign}{digits:0>2}")
        }
        None => text,
    }
}

/// Renders the legacy partial-slab summary.
#[derive(Debug, Default, Clone, Copy)]
pub struct ReportFormatter;

impl ReportFormatter {
    #[must_use]
    pub fn new() -> Self {
        Self
    }

    /// Three banner lines, each newline-terminated.
    #[must_use]
    pub fn banner(&self) -> String {
        let rule = "=".repeat(BANNER_WIDTH);
        let left = (BANNER_WIDTH - TITLE.len()) / 2;
        let right = BANNER_WIDTH - TITLE.len() - left;
        format!(
            "{rule}\n{}{TITLE}{}\n{rule}\n",
            "=".repeat(left),
            "=".repeat(right)
        )
    }

    #[must_use]
    pub fn header(&self) -> String {
        format!(
            "{:<35} {:<9} {:<10} {:<10} {:<8} {:<10} {:<10}",
            "NAME", "OBJSIZE", "ALLOCATED", "TOTAL", "TOTAL*SIZE", "SLABS", "SSIZE"
        )
    }

    /// One row, including its leading newline.
    #[must_use]
    pub fn row(&self, summary: &CacheSummary) -> String {
        format!(
            "\n{:<35} {:>9} {:>10} {:>10} {:>8}K {:>10} {:>10}K",
            summary.name,
            summary.object_size,
            summary.total_allocated,
            summary.total_objects,
            kib_text(summary.total_size_kb()),
            summary.nr_slabs,
            kib_text(summary.slab_size_kb())
        )
    }

    #[must_use]
    pub fn render(&self, rows: &[CacheSummary]) -> String {
        let mut out = self.banner();
        out.push_str(&self.header());
        for summary in rows {
            out.push_str(&self.row(summary));
        }
        out
    }

    pub fn write_to<W: Write>(&self, rows: &[CacheSummary], out: &mut W) -> io::Result<()> {
        out.write_all(self.banner().as_bytes())?;
        out.write_all(self.header().as_bytes())?;
        for summary in rows {
            out.write_all(self.row(summary).as_bytes())?;
        }
        out.flush()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn summary(name: &str) -> CacheSummary {
        CacheSummary {
            name: name.to_string(),
            address: 0x1000,
            object_size: 128,
            size_with_metadata: 192,
            nr_partial: 2,
            nr_slabs: 12,
            total_free: 9,
            total_objects: 14,
            total_allocated: 5,
            page_order: 1,
            active_cpus: 1,
            anomalies: Vec::new(),
        }
    }

    #[test]
    fn banner_lines_are_fixed() {
        let banner = ReportFormatter::new().banner();
        let lines: Vec<&str> = banner.lines().collect();
        assert_eq!(lines.len(), 3);
        assert!(lines.iter().all(|l| l.len() == BANNER_WIDTH));
        assert_eq!(lines[0], "=".repeat(99));
        assert_eq!(
            lines[1],
            "==================================== Summary of partial slabs ====================================="
        );
    }

    #[test]
    fn header_layout() {
        let header = ReportFormatter::new().header();
        assert_eq!(
            header,
            "NAME                                OBJSIZE   ALLOCATED  TOTAL      TOTAL*SIZE SLABS      SSIZE     "
        );
    }

    #[test]
    fn row_layout() {
        let row = ReportFormatter::new().row(&summary("kmalloc-128"));
        assert_eq!(
            row,
            "\nkmalloc-128                               128          5         14    2.625K         12        8.0K"
        );
    }

    #[test]
    fn kib_values_print_like_python_floats() {
        assert_eq!(kib_text(0.0), "0.0");
        assert_eq!(kib_text(3.5), "3.5");
        assert_eq!(kib_text(8.0), "8.0");
        assert_eq!(kib_text(1.0 / 1024.0), "0.0009765625");
        assert_eq!(kib_text(1e16), "1e+16");
        assert_eq!(kib_text(2f64.powi(64) / 1024.0), "1.8014398509481984e+16");
        assert_eq!(kib_text(f64::INFINITY), "inf");
    }

    #[test]
    fn huge_totals_switch_to_exponent_form() {
        let mut big = summary("huge");
        big.size_with_metadata = u32::MAX;
        big.total_objects = u64::MAX;
        let row = ReportFormatter::new().row(&big);
        assert!(row.contains("e+"), "{row}");
        assert!(row.ends_with("        8.0K"), "{row}");
    }

    #[test]
    fn long_names_are_not_truncated_by_formatting() {
        let name = "a".repeat(40);
        let row = ReportFormatter::new().row(&summary(&name));
        assert!(row.starts_with(&format!("\n{name} ")));
    }

    #[test]
    fn render_matches_streamed_output() {
        let rows = vec![summary("a"), summary("b")];
        let fmt = ReportFormatter::new();
        let mut buf = Vec::new();
        fmt.write_to(&rows, &mut buf).unwrap();
        let rendered = fmt.render(&rows);
        assert_eq!(String::from_utf8(buf).unwrap(), rendered);
        assert!(!rendered.ends_with('\n'));
        assert_eq!(rendered.lines().count(), 3 + 1 + 2);
    }
}
