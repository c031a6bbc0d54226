//! mediagen: prompt-to-image and image-to-video generation backed by Replicate.

#![allow(clippy::multiple_crate_versions)]
#![deny(clippy::all)]
#![deny(clippy::await_holding_lock)]
#![deny(clippy::complexity)]
#![deny(clippy::correctness)]
#![deny(clippy::disallowed_methods)]
#![deny(clippy::expect_used)]
#![deny(clippy::needless_pass_by_value)]
#![deny(clippy::panic)]
#![deny(clippy::perf)]
#![deny(clippy::trivially_copy_pass_by_ref)]
#![deny(clippy::unreachable)]
#![deny(clippy::unwrap_used)]
#![deny(warnings)]
#![forbid(unsafe_code)]
#![deny(missing_docs)]

pub mod cli;
pub mod client;
pub mod collector;
pub mod config;
pub mod constants;
pub mod error;
pub mod job;
pub mod media;
pub mod normalize;
pub mod poller;
pub mod provider;
pub mod registry;
pub mod submitter;
pub mod tracker;
pub mod web;
