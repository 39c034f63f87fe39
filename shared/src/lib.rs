//! Shared utilities for the capture rig.
//!
//! Holds code used by more than one crate: the pure conversion functions
//! consumed by the control layer, the digital-gain lookup table applied to
//! preview frames, and small synchronization helpers for the background
//! loops.

pub mod conversions;
pub mod gain_lut;
pub mod sync;
