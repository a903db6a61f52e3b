//! Logging and trace export setup shared by hubwire binaries.

pub mod tracing_setup;
