#![cfg_attr(not(test), forbid(unsafe_code))]

//! Courier client.
//!
//! [`transport`] is the embeddable part: a [`transport::TransportAdapter`]
//! that a UI mounts once per signed-in user. [`cli`] and [`commands`] wrap it
//! in the `courier` command-line tool.

pub mod cli;
pub mod commands;
pub mod transport;
