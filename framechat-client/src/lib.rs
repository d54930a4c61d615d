//! # framechat-client
//!
//! Client library for framechat.
//!
//! This crate provides:
//! - Async TCP connect with a timeout
//! - A session controller that learns its identity from the server
//! - Message and attachment sending
//! - Parked attachment offers resolved by the caller

pub mod client;
pub mod connection;
pub mod error;

pub use client::{Client, ClientEvent, ClientEventReceiver};
pub use connection::ConnectionConfig;
pub use error::ClientError;
