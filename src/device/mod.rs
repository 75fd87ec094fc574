pub mod btle;
pub mod buffer;
pub mod connection;
pub mod constants;
pub mod ids;
pub mod radio;
pub mod state;
pub mod types;
