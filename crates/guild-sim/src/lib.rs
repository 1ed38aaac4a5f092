//! Guild Sim: scripted scenarios and stress runs for the guild kernel
//!
//! Boots kernels on a chosen host layout, drives them through the public
//! services and reports whether the routing and relation invariants held.

pub mod catalog;
pub mod report;
pub mod scenario;
pub mod stress;

pub use catalog::LogPresenter;
pub use report::{RunReport, ScenarioOutcome, StressReport};
pub use stress::StressConfig;
