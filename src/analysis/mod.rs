/// Statistical core of the service.
///
/// Pure functions only: no I/O, no clock. Callers pass in history, windows
/// and policies explicitly so results are reproducible across runs.
///
/// Submodules:
/// - `percentiles`: day-of-year percentile thresholds from daily history.
/// - `trend`: rising/falling/stable detection and time since peak.

pub mod percentiles;
pub mod trend;
