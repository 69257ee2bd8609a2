//! Core modules for docket's collection storage engine.
//!
//! Everything the CLI (and a front-end daemon) calls lives here: the
//! collection facade, the two storage backends, the key registry and the
//! integrity checker.

pub mod check;
pub mod collection;
pub mod dialect;
pub mod error;
pub mod keymap;
pub mod pairtree;
pub mod ptstore;
pub mod query;
pub mod semver;
pub mod service;
pub mod sqlstore;
pub mod time;
