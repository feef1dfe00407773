//! Core of the mirror engine
//!
//! Parsing of control files and repository lines, the package file resolver,
//! the download pool and the staging/cleanup passes over the on-disk trees.

pub mod config;
pub mod control;
pub mod fetcher;
pub mod packages;
pub mod reconcile;
pub mod repository;
pub mod staging;
