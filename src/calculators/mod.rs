// calculators/mod.rs - Pure, deterministic aggregation functions (spec.md §4.1, §4.2)
//
// Neither calculator performs I/O or reads a clock; `now` and `userZone`
// are always supplied by the caller so results are reproducible in tests.

pub mod streak;
pub mod xp;

pub use streak::calculate_streak;
pub use xp::{calculate_xp, get_total_points_for_metadata};
