//! Demorar - async task latency diagnostics and deprecated concurrency-API scanning
//!
//! This library provides two independent diagnostic surfaces for cooperative
//! async runtimes: a duration-threshold monitor that wraps units of work and
//! reports where over-threshold tasks were created, and a structural source
//! scanner that flags known-deprecated concurrency idioms with replacement
//! recommendations.

pub mod cli;
pub mod monitor;
pub mod origin;
pub mod registry;
pub mod report;
pub mod scanner;
