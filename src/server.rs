//! The ASCII server's main world.
//!
//! Owns every listener and session, the entity store and the MMC bookkeeping,
//! and drives them from one event loop. Blocking work (SSH launches, database
//! writes, MMC stamping) runs on worker worlds that report back as messages.
//!
//! Re-exports:
//! - [`ServerWorld`]: startup and the serving loop.
//! - [`ServerState`]: state of the main world and its handlers.
//! - [`ServerMsg`], [`ServerTimer`]: what the main world receives.

pub mod boot;
pub mod children;
pub mod dispatch;
pub mod gui;
pub mod mmc;
pub mod peers;
pub mod sensors;
pub mod state;
#[cfg(test)]
pub mod tests;

pub use boot::{ServerWorld, LISTEN_BACKLOG};
pub use state::{ServerMsg, ServerState, ServerTimer};
