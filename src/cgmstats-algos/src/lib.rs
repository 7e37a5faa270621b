pub(crate) mod glucose;
pub use glucose::{GlucoseStatsCalculator, RangeThresholds};

pub(crate) mod fluctuation;
pub use fluctuation::FluctuationCalculator;

pub(crate) mod periods;
pub use periods::{PeriodPlanner, a1c_windows};

pub(crate) mod daily;
pub use daily::DailyAverage;

pub(crate) mod time_of_day;
pub use time_of_day::TimeOfDayFilter;

pub(crate) mod hypo;
pub use hypo::{HypoEventCounter, HypoEvents};

pub(crate) mod a1c;
pub use a1c::A1cComparison;

pub mod helpers;
