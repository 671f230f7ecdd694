//! Classification of integrit check output.

/// Line prefixes integrit uses to report a difference against the baseline.
pub const CHANGE_PREFIXES: [&str; 3] = ["changed: ", "new: ", "deleted: "];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReportClass {
    Changed,
    Clean,
}

/// Lines of a check report that describe a change.
pub fn changed_lines(report: &str) -> impl Iterator<Item = &str> {
    report
        .lines()
        .filter(|line| CHANGE_PREFIXES.iter().any(|prefix| line.starts_with(prefix)))
}

pub fn classify_report(report: &str) -> ReportClass {
    if changed_lines(report).next().is_some() {
        ReportClass::Changed
    } else {
        ReportClass::Clean
    }
}
