//! Rollouts driven end to end against a checkout on disk and fake hosts.

mod common;
mod deploy_tests;
mod plan_tests;
