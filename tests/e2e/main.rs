//! End-to-end acceptance scenarios (spec §8 S1-S7), run against the full
//! `Master` component graph rather than any single module in isolation.
//! Grounded on the one-file-per-scenario-family layout of
//! `estuary-flow/crates/dekaf/tests/e2e/*.rs`, with a shared `harness`
//! module standing in for `dekaf`'s `DekafTestEnv`.

mod harness;

mod s1_downgrade;
mod s2_happy_path_accept;
mod s3_ttl_expiry;
mod s4_id_mismatch;
mod s5_pool_routing;
mod s6_duplicate_command_config_error;
mod s7_publish_list_target;
