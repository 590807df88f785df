//! Gauges.

use crate::metrics::counters::write_header;
use std::fmt::Write;
use std::sync::atomic::{AtomicI64, Ordering};

/// A value that moves both ways, such as a queue length.
#[derive(Debug)]
pub struct Gauge {
    name: &'static str,
    help: &'static str,
    value: AtomicI64,
}

impl Gauge {
    pub const fn new(name: &'static str, help: &'static str) -> Self {
        Self {
            name,
            help,
            value: AtomicI64::new(0),
        }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn set(&self, value: i64) {
        self.value.store(value, Ordering::Relaxed);
    }

    pub fn inc(&self) {
        self.add(1);
    }

    pub fn dec(&self) {
        self.add(-1);
    }

    pub fn sub(&self, n: i64) {
        self.add(-n);
    }

    fn add(&self, n: i64) {
        self.value.fetch_add(n, Ordering::Relaxed);
    }

    pub fn get(&self) -> i64 {
        self.value.load(Ordering::Relaxed)
    }

    /// Append this gauge in text exposition format.
    pub fn render(&self, out: &mut String) {
        write_header(out, self.name, self.help, "gauge");
        let _ = writeln!(out, "{} {}", self.name, self.get());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_gauge() {
        let gauge = Gauge::new("scheduler_entries", "Pending scheduled entries");
        gauge.inc();
        gauge.inc();
        gauge.dec();
        assert_eq!(gauge.get(), 1);

        gauge.set(7);
        gauge.sub(3);
        assert_eq!(gauge.get(), 4);

        let mut out = String::new();
        gauge.render(&mut out);
        assert!(out.contains("# TYPE scheduler_entries gauge\n"));
        assert!(out.ends_with("scheduler_entries 4\n"));
    }
}
