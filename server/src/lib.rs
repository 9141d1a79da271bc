// Life of an append:
// 1. Patch body comes in (text or binary)
// 2. Decode into a `Patch`, check it has an id
// 3. Take the log's writer lock (local mutex or coordination lock)
// 4. Check the patch follows the head, pick the next version
// 5. Write the body to the record store, then record version <-> id
// 6. Respond with the new version
//
// Replicas read versions in order and play them through a handler channel.
//
// System components:
//  - Record store (file or memory)
//  - Patch log (version index, cache, sequencing)
//  - Data source registry and storage providers
//  - Coordination service for shared logs

pub mod api;
pub mod codec;
pub mod config;
pub mod coord;
pub mod follow;
pub mod handlers;
pub mod lifecycle;
pub mod log;
pub mod patch;
pub mod provider;
pub mod registry;
pub mod storage;
pub mod types;

#[cfg(test)]
mod e2e_tests;

pub use log::PatchLog;
pub use patch::Patch;
pub use registry::{DataRegistry, DataSource};
