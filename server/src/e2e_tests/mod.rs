//! End-to-end tests over the full append/fetch/replay path.
//!
//! Each test file covers one scenario, wiring real stores, logs, registries
//! and handler channels together with deterministic inputs.

#![cfg(test)]

mod helpers;

mod test_concurrent_append;
mod test_coordinated_writers;
mod test_crash_recovery;
mod test_dataset_replay;
mod test_empty_patch;
mod test_sequence_conflict;
