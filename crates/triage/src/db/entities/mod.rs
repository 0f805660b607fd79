//! SeaORM entities: jobs own reports, reports own artifacts.

pub mod artifact;
pub mod job;
pub mod report;
