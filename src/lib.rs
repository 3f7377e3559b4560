//! dbheal: rule-based triage for detected database issues.
//!
//! Issues written by an external detector are mapped to decisions by a
//! validated [`rulebook`]. AUTO_HEAL decisions get a recorded, simulated
//! remediation; ADMIN_REVIEW decisions get a prioritized review package for
//! a human. The [`orchestrator`] runs the stages as one cycle and audits
//! the result. Nothing here ever mutates the monitored database: every
//! read and write passes the [`safety`] guards first.
//!
//! See `DESIGN.md` for the architecture.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod config;
pub mod logging;

pub mod rulebook;
pub mod safety;
pub mod store;

pub mod engine;
pub mod orchestrator;
pub mod stats;
