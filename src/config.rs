//! CLI / configuration wiring for the `wiretap` binary.
//!
//! The core crate treats CA loading, listen-address selection, and initial
//! logger settings as external wiring rather than part of the engine itself;
//! this module is that wiring, kept thin and separate from [`crate::server`]
//! so the library half of the crate stays usable without pulling in `clap`.

use std::path::PathBuf;

use clap::Parser;

use crate::reqlog::ProjectId;

/// Command-line configuration for the `wiretap` proxy binary.
#[derive(Debug, Parser)]
#[command(name = "wiretap", about = "An HTTP(S) intercepting proxy with a pluggable modifier pipeline")]
pub struct Config {
    /// Address to listen for proxy connections on.
    #[arg(long, default_value = "127.0.0.1:8080")]
    pub listen: String,

    /// Path to the PEM-encoded CA certificate used to sign intercepted
    /// leaf certificates.
    #[arg(long)]
    pub ca_cert: PathBuf,

    /// Path to the PEM-encoded CA private key matching `--ca-cert`.
    #[arg(long)]
    pub ca_key: PathBuf,

    /// Project id to log traffic under. Zero (the default) means "no
    /// active project" — every exchange is bypassed for logging.
    #[arg(long, default_value_t = 0)]
    pub active_project_id: u64,

    /// When set, requests that don't match the configured scope are
    /// bypassed for logging rather than logged unconditionally.
    #[arg(long, default_value_t = false)]
    pub bypass_out_of_scope: bool,
}

impl Config {
    pub fn active_project_id(&self) -> ProjectId {
        ProjectId(self.active_project_id)
    }
}
