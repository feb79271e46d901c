//! Scenario-based tests for vedops

mod helpers;

mod cancellation;
mod failure_handling;
mod notifications;
mod parallel_limits;
mod persistence;
mod rollback;
mod variable_substitution;
