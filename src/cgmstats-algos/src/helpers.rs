pub mod stats_math;
