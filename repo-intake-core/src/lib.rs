#![doc = "repo-intake-core: repository ingestion pipeline for repo-intake."]

//! This crate stages repositories for downstream scanning. A repository
//! arrives either as an uploaded byte stream (optionally an archive) or as a
//! remote URL to shallow-clone; either way it lands in a deterministic
//! directory under the staging root and a scan event is fanned out to the
//! configured topics.
//!
//! # Usage
//! Build an [`coordinator::IngestionCoordinator`] from an
//! [`config::IntakeConfig`] and hand it [`request::IngestionRequest`]s.
//! External capabilities (git, the broker) sit behind the traits in
//! [`contract`] so tests can inject mocks.

pub mod archive;
pub mod config;
pub mod contract;
pub mod coordinator;
pub mod error;
pub mod git;
pub mod locks;
pub mod name;
pub mod publisher;
pub mod remote;
pub mod request;
pub mod staging;
pub mod upload;
