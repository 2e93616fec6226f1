//! End-to-End Test Framework for Actor Ports
//!
//! Scenarios that exercise proxy and service ports, the catalog and the
//! wire drivers together, over each supported transport. Each scenario
//! checks one observable guarantee and reports its validations in a
//! [`TestResult`].

pub mod fixtures;
pub mod framework;
pub mod scenarios;

pub use framework::{TestConfig, TestFramework, TestResult, TestScenario, Transport};
pub use scenarios::*;
