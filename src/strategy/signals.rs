//! Built-in signal functions

use chrono::{DateTime, Duration, Utc};

use crate::common::errors::ClientError;
use crate::common::types::{ContractType, DurationUnit};
use crate::config::types::SignalConfig;
use crate::strategy::traits::{BoxedSignal, SignalStrategy};
use crate::strategy::types::{Signal, TickHistory};

/// Build the configured signal, rejecting out-of-range parameters
pub fn build_signal(config: &SignalConfig) -> Result<BoxedSignal, ClientError> {
    let invalid = |msg: String| Err(ClientError::Configuration(msg));

    let signal: BoxedSignal = match *config {
        SignalConfig::ParitySequence { run_length } => {
            if run_length == 0 {
                return invalid("parity_sequence run_length must be at least 1".to_string());
            }
            Box::new(ParitySequence { run_length })
        }
        SignalConfig::OverUnder {
            barrier,
            run_length,
        } => {
            if barrier > 9 {
                return invalid(format!("over_under barrier must be a digit, got {barrier}"));
            }
            if run_length == 0 {
                return invalid("over_under run_length must be at least 1".to_string());
            }
            Box::new(OverUnder {
                barrier,
                run_length,
            })
        }
        SignalConfig::DigitDiffer { digit } => {
            if digit > 9 {
                return invalid(format!("digit_differ digit must be 0-9, got {digit}"));
            }
            Box::new(DigitDiffer { digit })
        }
        SignalConfig::DigitFrequency {
            window_ms,
            min_count,
            duration_ticks,
        } => {
            if window_ms == 0 || min_count == 0 {
                return invalid("digit_frequency window_ms and min_count must be positive".to_string());
            }
            Box::new(DigitFrequency {
                window: Duration::milliseconds(window_ms as i64),
                min_count,
                duration_ticks,
            })
        }
        SignalConfig::TickTrend { run_length } => {
            if run_length < 2 {
                return invalid("tick_trend run_length must be at least 2".to_string());
            }
            Box::new(TickTrend { run_length })
        }
    };
    Ok(signal)
}

/// A run of odd digits trades EVEN, a run of even digits trades ODD
#[derive(Debug, Clone)]
pub struct ParitySequence {
    pub run_length: usize,
}

impl SignalStrategy for ParitySequence {
    fn name(&self) -> &str {
        "parity_sequence"
    }

    fn decide(&self, history: &TickHistory, _now: DateTime<Utc>) -> Option<Signal> {
        let digits = history.last_digits(self.run_length)?;
        if digits.iter().all(|d| d % 2 == 1) {
            Some(Signal::new(
                ContractType::DigitEven,
                format!("odd run {digits:?}"),
            ))
        } else if digits.iter().all(|d| d % 2 == 0) {
            Some(Signal::new(
                ContractType::DigitOdd,
                format!("even run {digits:?}"),
            ))
        } else {
            None
        }
    }
}

/// A run of digits above the barrier trades UNDER, below trades OVER
#[derive(Debug, Clone)]
pub struct OverUnder {
    pub barrier: u8,
    pub run_length: usize,
}

impl SignalStrategy for OverUnder {
    fn name(&self) -> &str {
        "over_under"
    }

    fn decide(&self, history: &TickHistory, _now: DateTime<Utc>) -> Option<Signal> {
        let digits = history.last_digits(self.run_length)?;
        // UNDER 0 and OVER 9 can never win
        if self.barrier > 0 && digits.iter().all(|d| *d > self.barrier) {
            Some(
                Signal::new(ContractType::DigitUnder, format!("run above {} {digits:?}", self.barrier))
                    .with_barrier(self.barrier),
            )
        } else if self.barrier < 9 && digits.iter().all(|d| *d < self.barrier) {
            Some(
                Signal::new(ContractType::DigitOver, format!("run below {} {digits:?}", self.barrier))
                    .with_barrier(self.barrier),
            )
        } else {
            None
        }
    }
}

/// The watched digit just printed, bet it does not print again
#[derive(Debug, Clone)]
pub struct DigitDiffer {
    pub digit: u8,
}

impl SignalStrategy for DigitDiffer {
    fn name(&self) -> &str {
        "digit_differ"
    }

    fn decide(&self, history: &TickHistory, _now: DateTime<Utc>) -> Option<Signal> {
        let last = history.latest()?.last_digit();
        (last == self.digit).then(|| {
            Signal::new(ContractType::DigitDiff, format!("last digit was {last}"))
                .with_barrier(self.digit)
        })
    }
}

/// MATCH on the most frequent last digit within a sliding time window
///
/// Ties go to the lowest digit.
#[derive(Debug, Clone)]
pub struct DigitFrequency {
    pub window: Duration,
    pub min_count: usize,
    pub duration_ticks: Option<u32>,
}

impl DigitFrequency {
    /// Digit counts for ticks no older than the window
    ///
    /// The window ends at the latest tick's own timestamp, so local clock
    /// skew against the feed does not matter.
    pub fn counts(&self, history: &TickHistory) -> [usize; 10] {
        let mut counts = [0usize; 10];
        let Some(end) = history.latest().and_then(|tick| tick.timestamp()) else {
            return counts;
        };
        let cutoff = end - self.window;
        for tick in history.iter().rev() {
            match tick.timestamp() {
                Some(ts) if ts >= cutoff => counts[tick.last_digit() as usize] += 1,
                _ => break,
            }
        }
        counts
    }
}

impl SignalStrategy for DigitFrequency {
    fn name(&self) -> &str {
        "digit_frequency"
    }

    fn decide(&self, history: &TickHistory, _now: DateTime<Utc>) -> Option<Signal> {
        let counts = self.counts(history);
        let (digit, count) = counts
            .iter()
            .enumerate()
            .fold((0usize, 0usize), |best, (digit, count)| {
                if *count > best.1 {
                    (digit, *count)
                } else {
                    best
                }
            });
        if count < self.min_count {
            return None;
        }

        let digit = digit as u8;
        let signal = Signal::new(
            ContractType::DigitMatch,
            format!("top digit {digit} ({count}x)"),
        )
        .with_barrier(digit);
        Some(match self.duration_ticks {
            Some(ticks) => signal.with_duration(ticks, DurationUnit::Tick),
            None => signal,
        })
    }
}

/// Strictly rising prices trade CALL, strictly falling trade PUT
#[derive(Debug, Clone)]
pub struct TickTrend {
    pub run_length: usize,
}

impl SignalStrategy for TickTrend {
    fn name(&self) -> &str {
        "tick_trend"
    }

    fn decide(&self, history: &TickHistory, _now: DateTime<Utc>) -> Option<Signal> {
        let ticks = history.last_n(self.run_length)?;
        let rising = ticks.windows(2).all(|pair| pair[1].price > pair[0].price);
        let falling = ticks.windows(2).all(|pair| pair[1].price < pair[0].price);

        if rising {
            Some(Signal::new(
                ContractType::Call,
                format!("{} ticks up", self.run_length),
            ))
        } else if falling {
            Some(Signal::new(
                ContractType::Put,
                format!("{} ticks down", self.run_length),
            ))
        } else {
            None
        }
    }
}
