pub mod candidates;
pub mod objective;
pub mod placement;
pub mod plan_apply;
pub mod recurrence;
pub mod run_service;
pub mod slot_grid;
pub mod solver;
