use std::fmt;
use std::sync::atomic::{AtomicU8, Ordering};

use serde::Deserialize;

/// Ordinal severity of a log entry.
///
/// Filtering compares an entry's severity against a per-sink threshold: an
/// entry passes when `entry >= threshold`. `Off` as a threshold disables the
/// sink; `Invalid` never appears on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Deserialize)]
#[serde(rename_all = "lowercase")]
#[repr(u8)]
pub enum Severity {
    Debug = 0,
    Trace = 1,
    Notice = 2,
    Warning = 3,
    Error = 4,
    Critical = 5,
    Off = 6,
    Invalid = 7,
}

impl Severity {
    /// Decodes the 3-bit wire value. Returns `None` for `Invalid` (7) and
    /// anything wider than three bits.
    pub const fn from_bits(bits: u8) -> Option<Severity> {
        match bits {
            0 => Some(Severity::Debug),
            1 => Some(Severity::Trace),
            2 => Some(Severity::Notice),
            3 => Some(Severity::Warning),
            4 => Some(Severity::Error),
            5 => Some(Severity::Critical),
            6 => Some(Severity::Off),
            _ => None,
        }
    }

    pub const fn bits(self) -> u8 {
        self as u8
    }

    /// Short fixed-width label used when rendering lines.
    pub const fn label(self) -> &'static str {
        match self {
            Severity::Debug => "dbg",
            Severity::Trace => "trc",
            Severity::Notice => "ntc",
            Severity::Warning => "wrn",
            Severity::Error => "err",
            Severity::Critical => "crt",
            Severity::Off => "off",
            Severity::Invalid => "inv",
        }
    }

    /// True if an entry of this severity passes a sink with `threshold`.
    #[inline]
    pub fn passes(self, threshold: Severity) -> bool {
        self < Severity::Off && self >= threshold
    }
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// A severity threshold that can be changed at runtime from any thread.
///
/// Loads and stores are relaxed: a racing update may be lost, but a reader
/// never sees a torn value since the whole threshold is one atomic byte.
#[derive(Debug)]
pub struct AtomicSeverity(AtomicU8);

impl AtomicSeverity {
    pub const fn new(severity: Severity) -> Self {
        Self(AtomicU8::new(severity as u8))
    }

    #[inline]
    pub fn load(&self) -> Severity {
        Severity::from_bits(self.0.load(Ordering::Relaxed)).unwrap_or(Severity::Off)
    }

    #[inline]
    pub fn store(&self, severity: Severity) {
        self.0.store(severity as u8, Ordering::Relaxed);
    }
}

/// The three output thresholds shared between the frontend (which gates
/// producers on the most permissive of them) and the default output sink.
#[derive(Debug)]
pub struct Severities {
    pub file: AtomicSeverity,
    pub stdout: AtomicSeverity,
    pub stderr: AtomicSeverity,
}

impl Severities {
    pub fn new(file: Severity, stdout: Severity, stderr: Severity) -> Self {
        Self {
            file: AtomicSeverity::new(file),
            stdout: AtomicSeverity::new(stdout),
            stderr: AtomicSeverity::new(stderr),
        }
    }

    /// True if at least one output would accept `severity`.
    #[inline]
    pub fn any_passes(&self, severity: Severity) -> bool {
        severity.passes(self.file.load())
            || severity.passes(self.stdout.load())
            || severity.passes(self.stderr.load())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_wire_bits() {
        for bits in 0..7u8 {
            assert_eq!(Severity::from_bits(bits).unwrap().bits(), bits);
        }
        assert_eq!(Severity::from_bits(7), None);
        assert_eq!(Severity::from_bits(200), None);
    }

    #[test]
    fn test_threshold() {
        assert!(Severity::Error.passes(Severity::Warning));
        assert!(Severity::Warning.passes(Severity::Warning));
        assert!(!Severity::Notice.passes(Severity::Warning));
        assert!(!Severity::Critical.passes(Severity::Off));
        assert!(!Severity::Off.passes(Severity::Debug));
    }

    #[test]
    fn test_any_passes() {
        let s = Severities::new(Severity::Off, Severity::Off, Severity::Error);
        assert!(s.any_passes(Severity::Critical));
        assert!(!s.any_passes(Severity::Warning));
        s.stdout.store(Severity::Debug);
        assert!(s.any_passes(Severity::Debug));
    }
}
