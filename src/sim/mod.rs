//! A simulated bluetooth stack for tests and demos without hardware.

pub mod radio;
