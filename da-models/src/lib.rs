//! Dynamical-model right-hand-sides for the benchmark twins.

pub mod l96;
pub mod swing;

pub use l96::{Lorenz96, L96sTaylor};
pub use swing::SwingNetwork;
