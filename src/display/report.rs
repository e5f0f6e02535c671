use std::fmt::{Display, Formatter, Result};

use crate::dedup::{model::IdGroup, pipeline::RunReport, result::RunResult};

/// The groups of a result file, largest first, with the run parameters on top.
pub struct GroupListing<'a> {
    result: &'a RunResult,
    limit: Option<usize>,
}

impl<'a> GroupListing<'a> {
    pub fn new(result: &'a RunResult, limit: Option<usize>) -> Self {
        Self { result, limit }
    }

    /// Groups with their position in the file, by size descending. Equal
    /// sizes keep file order.
    fn by_size(&self) -> Vec<(usize, &'a IdGroup)> {
        let mut groups: Vec<(usize, &IdGroup)> = self.result.groups.iter().enumerate().collect();
        groups.sort_by(|a, b| b.1.len().cmp(&a.1.len()));
        groups
    }
}

impl Display for GroupListing<'_> {
    fn fmt(&self, f: &mut Formatter<'_>) -> Result {
        let groups = &self.result.groups;
        match &self.result.meta {
            Some(meta) => {
                writeln!(
                    f,
                    "⚙️  metric: {}, eps: {}, eps_decay: {}, min_samples: {}, max_samples: {}, epochs: {}, bucket_size: {}",
                    meta.metric,
                    meta.eps,
                    meta.eps_decay,
                    meta.min_samples,
                    meta.max_samples,
                    meta.epochs,
                    meta.bucket_size
                )?;
                writeln!(
                    f,
                    "📊 {} groups, {} of {} samples grouped",
                    groups.len(),
                    groups.num_ids(),
                    meta.total_samples
                )?;
            }
            None => writeln!(
                f,
                "📊 {} groups, {} samples grouped",
                groups.len(),
                groups.num_ids()
            )?,
        }

        let sorted = self.by_size();
        let shown = self.limit.unwrap_or(sorted.len()).min(sorted.len());
        for (index, group) in &sorted[..shown] {
            writeln!(f, "📦  group {} ({}):", index, group.len())?;
            for id in group.iter() {
                writeln!(f, "      |__ 🆔 {}", id)?;
            }
        }
        if shown < sorted.len() {
            writeln!(f, "... {} more groups", sorted.len() - shown)?;
        }
        Ok(())
    }
}

/// One line per epoch of a finished run, then the totals.
pub struct RunSummary<'a>(pub &'a RunReport);

impl Display for RunSummary<'_> {
    fn fmt(&self, f: &mut Formatter<'_>) -> Result {
        let report = self.0;
        if report.excluded > 0 {
            writeln!(f, "⏭️  {} samples already grouped by the previous result", report.excluded)?;
        }
        for e in &report.epochs {
            write!(
                f,
                "🔁 epoch {} (eps {:.4}): {} -> {} samples, {} groups",
                e.epoch + 1,
                e.radius,
                e.working_set_before,
                e.working_set_after,
                e.groups
            )?;
            if e.pass.oversized_groups > 0 {
                write!(
                    f,
                    ", {} oversized split into {} ({} ids dropped)",
                    e.pass.oversized_groups, e.pass.split_groups, e.pass.ids_dropped
                )?;
            }
            writeln!(f)?;
        }
        let groups = &report.result.groups;
        writeln!(
            f,
            "💾 {} groups ({} new), {} samples in groups",
            groups.len(),
            report.new_groups,
            groups.num_ids()
        )
    }
}
