//! # DSU Server Library
//!
//! Serve virtual game controllers to DSU (cemuhook) clients over UDP.
//!
//! This library provides the packet codec, the shared controller state store,
//! the client registry and push loop, and the lifecycle manager that binds
//! controller scripts to slots.

pub mod capture;
pub mod config;
pub mod controller;
pub mod dsu;
pub mod error;
pub mod lifecycle;
pub mod server;
