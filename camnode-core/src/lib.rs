#![no_std]
#![allow(async_fn_in_trait)]

// Shared logic for the camera node wake cycle.
//
// This crate stays portable across the ESP32 firmware and host tooling by
// avoiding the Rust standard library. Hardware is reached only through the
// traits exposed by each module so the full cycle can run under test.

pub mod capture;
pub mod config;
pub mod cycle;
pub mod endpoint;
pub mod link;
pub mod power;
pub mod telemetry;
pub mod upload;
