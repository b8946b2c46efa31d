//! Live-state layer of the smart farm dashboard: merges REST metric polls,
//! MQTT echoes, and optimistic user commands into one in-memory snapshot.

pub mod bus;
pub mod config;
pub mod dispatcher;
pub mod error;
pub mod mqtt;
pub mod reconciler;
pub mod rest;
pub mod session;
pub mod state;
pub mod web;
