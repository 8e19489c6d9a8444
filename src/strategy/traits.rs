use chrono::{DateTime, Utc};

use crate::strategy::types::{Signal, TickHistory};

/// Decision function plugged into the strategy engine
///
/// Signals decide *what* to trade from recent ticks. Stake, pacing, session
/// limits and the contract lifecycle all stay in the engine, so every
/// signal gets the same risk handling.
///
/// # Implementation Notes
///
/// - `decide` is called on the tick path and should be fast, no I/O
/// - The history is owned by the engine and is read-only here
/// - Returning `None` means "no trade on this tick"
///
/// # Example
///
/// ```ignore
/// struct AlwaysEven;
///
/// impl SignalStrategy for AlwaysEven {
///     fn name(&self) -> &str { "always_even" }
///
///     fn decide(&self, history: &TickHistory, _now: DateTime<Utc>) -> Option<Signal> {
///         history.latest()?;
///         Some(Signal::new(ContractType::DigitEven, "every tick"))
///     }
/// }
/// ```
pub trait SignalStrategy: Send + Sync {
    /// Identifier used in logs
    fn name(&self) -> &str;

    /// Inspect the tick history and optionally emit a trade signal
    fn decide(&self, history: &TickHistory, now: DateTime<Utc>) -> Option<Signal>;
}

/// Boxed signal for dynamic dispatch
pub type BoxedSignal = Box<dyn SignalStrategy>;
