//! Canary console: library crate for the `canary` binary and integration tests.
//!
//! Talks to the canarytokens backend, drives AWS Infra onboarding and serves
//! the referrer-check edge.

pub mod awsinfra;
pub mod backend;
pub mod config;
pub mod edge;
pub mod errors;
pub mod labels;
pub mod models;
