//! Command drivers. Each submodule owns one subcommand's flags and its
//! thin wiring into the engine or its wrapper behaviour.

pub mod clone;
pub mod ls;
pub mod reclone;
pub mod reclone_cron;
pub mod reclone_server;
