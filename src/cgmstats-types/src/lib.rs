#[macro_use]
extern crate serde;

mod reading;
pub use reading::Reading;

mod window;
pub use window::TimeWindow;

mod patient;
pub use patient::{A1cMeasurement, PatientRecord};

mod stats;
pub use stats::{CgmType, StatsResult};
