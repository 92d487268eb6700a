//! Command line interface definition.

use std::path::PathBuf;

use clap::Parser;

/// Tessera: a node of a partitioned, replicated key-value cluster.
#[derive(Parser, Debug)]
#[command(name = "tessera")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Home directory holding `config/server.toml` and `config/cluster.toml`.
    /// Defaults to `$TESSERA_HOME`.
    pub home: Option<PathBuf>,
}
