// SPDX-FileCopyrightText: 2026 Mattia Egloff <mattia.egloff@pm.me>
//
// SPDX-License-Identifier: GPL-3.0-or-later

//! Courier API Layer
//!
//! High-level API for the Courier message delivery pipeline.
//!
//! # Overview
//!
//! The API layer wires the components of the pipeline together:
//! - Storage and at-rest encryption
//! - The relay connection and its reconnection policy
//! - Message sending and receiving
//! - Contact list and contact sync jobs
//!
//! # Module Structure
//!
//! - [`error`] - Error types for the API layer
//! - [`config`] - Configuration types
//! - [`courier`] - Main Courier orchestrator and builder

pub mod config;
pub mod courier;
pub mod error;

// Error types
pub use error::{CourierError, CourierResult};

// Configuration
pub use config::{CourierConfig, MessagingConfig, RelayConfig};

// Courier
pub use courier::{Courier, CourierBuilder};
