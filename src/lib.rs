//! archivectl is the lifecycle controller of an imaging archive. It starts the
//! storage SCP, the query/retrieve SCP and the web server according to the
//! server settings, lets operators start and stop each of them individually,
//! reports which ones are running and shuts everything down on exit.

/// CLI interface.
pub mod cli;

/// Configuration management.
pub mod config;

/// Service lifecycle controller.
pub mod control;

/// Error handling.
pub mod error;

/// Server log.
pub mod logs;

/// Managed service handles and their listener adapters.
pub mod services;

#[cfg(test)]
mod test_utils;
