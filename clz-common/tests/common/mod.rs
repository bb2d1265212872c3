#![allow(dead_code)]

pub mod fixtures;
pub mod logging;

pub use fixtures::{cluster_spec, docker_cluster_spec, node};
pub use logging::init_test_logging;
