//! Monotonic counters.

use dashmap::DashMap;
use std::fmt::Write;
use std::sync::atomic::{AtomicU64, Ordering};

/// Write the `# HELP` and `# TYPE` header of one metric family.
pub(crate) fn write_header(out: &mut String, name: &str, help: &str, kind: &str) {
    let _ = writeln!(out, "# HELP {} {}", name, help);
    let _ = writeln!(out, "# TYPE {} {}", name, kind);
}

/// A counter that only goes up.
#[derive(Debug)]
pub struct Counter {
    name: &'static str,
    help: &'static str,
    value: AtomicU64,
}

impl Counter {
    pub const fn new(name: &'static str, help: &'static str) -> Self {
        Self {
            name,
            help,
            value: AtomicU64::new(0),
        }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn inc(&self) {
        self.inc_by(1);
    }

    pub fn inc_by(&self, n: u64) {
        self.value.fetch_add(n, Ordering::Relaxed);
    }

    pub fn get(&self) -> u64 {
        self.value.load(Ordering::Relaxed)
    }

    /// Append this counter in text exposition format.
    pub fn render(&self, out: &mut String) {
        write_header(out, self.name, self.help, "counter");
        let _ = writeln!(out, "{} {}", self.name, self.get());
    }
}

/// A family of counters keyed by `N` label values.
#[derive(Debug)]
pub struct LabeledCounter<const N: usize> {
    name: &'static str,
    help: &'static str,
    labels: [&'static str; N],
    values: DashMap<[String; N], u64>,
}

impl<const N: usize> LabeledCounter<N> {
    pub fn new(name: &'static str, help: &'static str, labels: [&'static str; N]) -> Self {
        Self {
            name,
            help,
            labels,
            values: DashMap::new(),
        }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn inc(&self, values: [&str; N]) {
        *self.values.entry(values.map(str::to_string)).or_insert(0) += 1;
    }

    /// Count for one label set; zero if never incremented.
    pub fn get(&self, values: [&str; N]) -> u64 {
        self.values
            .get(&values.map(str::to_string))
            .map(|v| *v)
            .unwrap_or(0)
    }

    /// Sum over every label set.
    pub fn total(&self) -> u64 {
        self.values.iter().map(|v| *v.value()).sum()
    }

    /// Every label set with its count, sorted by labels.
    pub fn entries(&self) -> Vec<([String; N], u64)> {
        let mut entries: Vec<_> = self
            .values
            .iter()
            .map(|e| (e.key().clone(), *e.value()))
            .collect();
        entries.sort();
        entries
    }

    /// Append every label set in text exposition format.
    pub fn render(&self, out: &mut String) {
        write_header(out, self.name, self.help, "counter");
        for (values, count) in self.entries() {
            let labels: Vec<String> = self
                .labels
                .iter()
                .zip(values.iter())
                .map(|(label, value)| format!("{}=\"{}\"", label, value))
                .collect();
            let _ = writeln!(out, "{}{{{}}} {}", self.name, labels.join(","), count);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_counter() {
        let counter = Counter::new("beans_created_total", "Beans created");
        assert_eq!(counter.get(), 0);

        counter.inc();
        counter.inc_by(4);
        assert_eq!(counter.get(), 5);

        let mut out = String::new();
        counter.render(&mut out);
        assert_eq!(
            out,
            "# HELP beans_created_total Beans created\n\
             # TYPE beans_created_total counter\n\
             beans_created_total 5\n"
        );
    }

    #[test]
    fn test_labeled_counter() {
        let counter = LabeledCounter::<1>::new(
            "dispatch_failures_total",
            "Failed dispatches by reason",
            ["reason"],
        );

        counter.inc(["unreachable"]);
        counter.inc(["unreachable"]);
        counter.inc(["rejected"]);

        assert_eq!(counter.get(["unreachable"]), 2);
        assert_eq!(counter.get(["marshalling"]), 0);
        assert_eq!(counter.total(), 3);
        assert_eq!(
            counter.entries(),
            vec![(["rejected".to_string()], 1), (["unreachable".to_string()], 2)]
        );

        let mut out = String::new();
        counter.render(&mut out);
        assert!(out.ends_with("dispatch_failures_total{reason=\"unreachable\"} 2\n"));
    }
}
