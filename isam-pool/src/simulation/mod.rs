//! Deterministic Simulation Testing (DST) infrastructure.
//!
//! Drives the pools through seeded random operation sequences and checks
//! pool invariants after every step.
//!
//! # Design Principles
//!
//! 1. All randomness is seeded for reproducibility
//! 2. Invariants are checked from outside, through read-only accessors
//! 3. Misuse is injected deliberately and must be rejected without effect
//! 4. Given the same seed, execution is identical

mod simulator;
