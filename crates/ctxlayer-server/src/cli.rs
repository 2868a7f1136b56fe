//! CLI argument types and command structures.

use clap::{Parser, Subcommand};

#[derive(Parser)]
#[command(name = "ctx")]
#[command(version, about = "Context intelligence layer service", long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Start the HTTP server
    Serve {
        /// Host to bind to
        #[arg(long, default_value = "0.0.0.0")]
        host: String,

        /// Port to bind to
        #[arg(long, default_value = "8080")]
        port: u16,
    },

    /// Run a liveness check against a running instance
    Health {
        /// Base URL of the service to check
        #[arg(long, default_value = "http://localhost:8080")]
        url: String,
    },

    /// Apply pending database migrations and exit
    Migrate,
}
