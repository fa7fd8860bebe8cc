//! Cadence - job execution orchestration
//!
//! Hosts job firings in-process or in worker processes, routes their
//! reports through a message broker, retries failures with dedicated
//! triggers, dispatches monitor hooks on execution events and coordinates
//! multi-step sequences and workflows on top of a local scheduler.

#![allow(missing_docs)]

pub mod app;
pub mod app_info;
pub mod boot;
pub mod broker;
pub mod cli;
pub mod commands;
pub mod config;
pub mod coordination;
pub mod database;
pub mod environment;
pub mod execution;
pub mod jobs;
pub mod mailer;
pub mod monitor;
pub mod persistence;
pub mod retry;
pub mod scheduling;
pub mod setup_tracing;
