#[macro_use]
extern crate log;

mod runner;
pub use runner::{CohortRun, CohortRunner, PatientPlan, RunSummary, WindowStats};

mod report;
pub use report::{DailyRow, PatientReport, WindowSlot};
