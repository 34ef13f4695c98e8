//! # gitfleet
//!
//! `gitfleet` bulk-clones every repository visible to an identity on a
//! source-code host (GitHub, GitLab, Gitea, Bitbucket, or Sourcehut) into a
//! local directory tree and keeps that tree faithful to the remote across
//! repeated runs.
//!
//! ## Core pieces
//!
//! - **SCM clients** enumerate remote repositories with paged, concurrent
//!   API fetches and normalise them into a common record.
//! - **Filters** cut the set down by prefix, regex, topics, archive/fork
//!   status, and operator-maintained include/exclude files.
//! - **The path planner** assigns collision-free local destinations.
//! - **A bounded worker pool** fans the per-repo processor out across the
//!   set, cloning, pulling, mirroring, or syncing as each clone requires.
//! - **The pruner** reconciles the local tree against the remote set.
//! - **The stats recorder** appends one durable row per run.

pub mod colorlog;
pub mod commands;
pub mod config;
pub mod engine;
pub mod git;
pub mod scm;
pub mod utils;
