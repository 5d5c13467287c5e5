#![forbid(unsafe_code)]
#![deny(unreachable_pub)]

//! Shared foundation for `s3ry`: settings resolution and the localized
//! message catalog. Nothing in here talks to the network.

pub mod config;
pub mod error;
pub mod messages;
