//! fleetroll-lib: Core types and logic for fleetroll
//!
//! This crate provides the pieces of a fleet rollout:
//! - `app` / `host` / `method`: the data model and the status state machine
//! - `reconcile`: diffing desired applications against a host's last snapshot
//! - `schedule`: boot-ordered, site-partitioned, concurrency-bounded dispatch
//! - `remote`: discrete and interactive command execution over ssh
//! - `orchestrate`: the run flow tying the collaborators together

pub mod app;
pub mod command;
pub mod config;
pub mod consts;
pub mod context;
pub mod deploy;
pub mod host;
pub mod manifest;
pub mod method;
pub mod orchestrate;
pub mod package;
pub mod platform;
pub mod reconcile;
pub mod remote;
pub mod repo;
pub mod run_lock;
pub mod schedule;
pub mod snapshot;
pub mod template;
pub mod util;
