//! Core runtime infrastructure.
//!
//! This module contains the essential components for running a notary node:
//! - [`config`] - Configuration parsing and validation
//! - [`runtime`] - Component lifecycle orchestration
//! - [`time`] - Clock abstraction and time-window checking
//! - [`error`] - Error types and outcome classification

pub mod config;
pub mod error;
pub mod runtime;
pub mod time;
