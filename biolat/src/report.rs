//! Rendering of one interval's histogram.

use std::io::{self, Write};

use biolat_common::{bucket_lower_us, bucket_upper_us, MAX_BAR_WIDTH};
use serde::Serialize;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BucketRow {
    pub slot: u32,
    pub lower_us: u64,
    pub upper_us: u64,
    pub count: u64,
}

impl BucketRow {
    pub fn new(slot: u32, count: u64) -> Self {
        Self {
            slot,
            lower_us: bucket_lower_us(slot),
            upper_us: bucket_upper_us(slot),
            count,
        }
    }

    /// One mark per completion, clamped at [`MAX_BAR_WIDTH`].
    pub fn bar(&self) -> String {
        "*".repeat(self.count.min(MAX_BAR_WIDTH) as usize)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct Report {
    pub rows: Vec<BucketRow>,
    /// Completions drained from slots past the displayed prefix.
    pub undisplayed: u64,
    /// Submissions not measured this interval because the in-flight table
    /// was full.
    pub dropped: u64,
}

impl Report {
    pub fn total(&self) -> u64 {
        self.rows.iter().map(|r| r.count).sum::<u64>() + self.undisplayed
    }

    pub fn count(&self, slot: u32) -> Option<u64> {
        self.rows.iter().find(|r| r.slot == slot).map(|r| r.count)
    }

    pub fn write_text<W: Write>(&self, out: &mut W) -> io::Result<()> {
        writeln!(out, "{:<20} : {:<16} | {}", "usecs range", "count", "distribution")?;
        for row in &self.rows {
            writeln!(
                out,
                "{:<10} -> {:<10} : {:<16} | {}",
                row.lower_us,
                row.upper_us,
                row.count,
                row.bar()
            )?;
        }
        Ok(())
    }

    pub fn write_json<W: Write>(&self, out: &mut W) -> io::Result<()> {
        serde_json::to_writer(&mut *out, self)?;
        writeln!(out)
    }
}
