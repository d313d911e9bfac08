//! Scheduling core: computes a conflict-free placement of tasks and habits
//! onto a slotted future horizon, and wraps that computation in a debounced,
//! supersession-aware run lifecycle with idempotent plan application.
//!
//! The solver itself ([`services::solver::solve`]) is a pure function over an
//! immutable [`models::input::SchedulingInput`] snapshot. Everything stateful
//! (runs, persisted placements) goes through [`services::run_service`].

pub mod db;
pub mod error;
pub mod models;
pub mod services;
pub mod utils;
