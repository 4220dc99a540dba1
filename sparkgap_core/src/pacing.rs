//! Periodic breaks between attempts and the time estimates that depend on them.

use crate::config::CampaignOptions;
use std::time::Duration;

/// Estimates are only made once this much time has elapsed.
pub const MIN_ELAPSED_FOR_ESTIMATE: Duration = Duration::from_secs(10);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BreakKind {
    Small,
    Big,
    VeryBig,
}

impl BreakKind {
    /// Big and very big breaks also persist the session.
    pub fn checkpoints(self) -> bool {
        matches!(self, BreakKind::Big | BreakKind::VeryBig)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Break {
    pub kind: BreakKind,
    pub duration: Duration,
}

/// Number of breaks of each kind taken over a span of attempts.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BreakTally {
    pub small: u64,
    pub big: u64,
    pub very_big: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Threshold {
    every: u64,
    duration: Duration,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PacingPolicy {
    small: Threshold,
    big: Threshold,
    very_big: Threshold,
}

fn gcd(a: u64, b: u64) -> u64 {
    if b == 0 { a } else { gcd(b, a % b) }
}

fn lcm(a: u64, b: u64) -> u64 {
    if a == 0 || b == 0 {
        return 0;
    }
    (a / gcd(a, b)).saturating_mul(b)
}

fn multiples(n: u64, of: u64) -> u64 {
    if of == 0 { 0 } else { n / of }
}

impl PacingPolicy {
    pub fn new(
        small: (u64, Duration),
        big: (u64, Duration),
        very_big: (u64, Duration),
    ) -> Self {
        let threshold = |(every, duration): (u64, Duration)| Threshold { every, duration };
        Self {
            small: threshold(small),
            big: threshold(big),
            very_big: threshold(very_big),
        }
    }

    pub fn from_options(options: &CampaignOptions) -> Self {
        Self::new(
            (options.iter_before_small_break, options.small_break()),
            (options.iter_before_big_break, options.big_break()),
            (options.iter_before_very_big_break, options.very_big_break()),
        )
    }

    /// The break due after `attempts` attempts, if any. Thresholds are checked
    /// from largest to smallest and only the first match is taken.
    pub fn break_after(&self, attempts: u64) -> Option<Break> {
        if attempts == 0 {
            return None;
        }
        [
            (BreakKind::VeryBig, self.very_big),
            (BreakKind::Big, self.big),
            (BreakKind::Small, self.small),
        ]
        .into_iter()
        .find(|(_, threshold)| threshold.every > 0 && attempts % threshold.every == 0)
        .map(|(kind, threshold)| Break {
            kind,
            duration: threshold.duration,
        })
    }

    /// Breaks taken by attempts `1..=attempts`, each attempt counted under the
    /// largest threshold it is a multiple of.
    pub fn breaks_within(&self, attempts: u64) -> BreakTally {
        let (s, b, vb) = (self.small.every, self.big.every, self.very_big.every);
        let very_big = multiples(attempts, vb);
        let big = multiples(attempts, b).saturating_sub(multiples(attempts, lcm(b, vb)));
        let small = (multiples(attempts, s) + multiples(attempts, lcm(lcm(s, b), vb)))
            .saturating_sub(multiples(attempts, lcm(s, b)) + multiples(attempts, lcm(s, vb)));
        BreakTally {
            small,
            big,
            very_big,
        }
    }

    pub fn break_time(&self, tally: BreakTally) -> Duration {
        let scale = |d: Duration, n: u64| d.mul_f64(n as f64);
        scale(self.small.duration, tally.small)
            + scale(self.big.duration, tally.big)
            + scale(self.very_big.duration, tally.very_big)
    }

    /// Projects the time left for `total` attempts after `done` took `elapsed`.
    ///
    /// Throughput is measured net of the breaks already taken and the breaks
    /// still due over the remaining attempts are added back. Returns `None`
    /// until an attempt has been made and [`MIN_ELAPSED_FOR_ESTIMATE`] has passed.
    pub fn estimate_remaining(&self, elapsed: Duration, done: u64, total: u64) -> Option<Duration> {
        if done == 0 || elapsed <= MIN_ELAPSED_FOR_ESTIMATE {
            return None;
        }
        let on_attempts = elapsed.saturating_sub(self.break_time(self.breaks_within(done)));
        let remaining = total.saturating_sub(done);
        let per_attempt = on_attempts.as_secs_f64() / done as f64;
        let working = Duration::try_from_secs_f64(per_attempt * remaining as f64).unwrap_or(Duration::ZERO);
        Some(working + self.break_time(self.breaks_within(remaining)))
    }
}
