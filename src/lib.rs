pub mod configuration;
pub mod entity_store;
pub mod error_handling;
pub mod logging;
pub mod mmc_pipeline;
pub mod process_supervision;
pub mod protocol;
pub mod reactor;
pub mod replication;
pub mod server;
pub mod session_management;
pub mod storage;
pub mod transport;

#[cfg(test)]
pub mod test_support;
