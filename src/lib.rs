//! Persona Director - Dialogue Policy & Transition Engine
//!
//! This crate drives one turn of a stateful, persona-constrained dialogue:
//! it evolves a continuous affect model and a phase/scene scenario state
//! machine (with a propose-then-consent transition handshake), selects the
//! behavioral rules that apply to the turn, and validates and repairs the
//! generated candidate reply against them through a bounded retry loop.

pub mod adapters;
pub mod application;
pub mod config;
pub mod domain;
pub mod ports;
pub mod telemetry;
