// SPDX-License-Identifier: Apache-2.0
//! key-keeper agent: configuration discovery, the controller loops and the
//! health/metrics endpoint.

pub mod config;
pub mod controller;
pub mod http;
pub mod metrics;
pub mod source;
