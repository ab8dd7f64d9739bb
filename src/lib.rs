//! Junction Simulation Library
//!
//! Lane-level routing and right-of-way arbitration for road junctions, with
//! an in-memory road network to drive vehicles through them.

pub mod simulation;
