//! Shared building blocks for the campsite energy services

pub mod logging;
