// Copyright 2025 Schelling Point Labs Inc
// SPDX-License-Identifier: AGPL-3.0-only

//! ShoalFS Daemon executable — thin wrapper around the session library

use std::fs;
use std::net::TcpListener;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Result;
use clap::Parser;
use tracing::info;
use tracing_subscriber::EnvFilter;

use shoalfs_daemon::serve;
use shoalfs_engine::{Engine, EngineConfig};
use shoalfs_proto::DEFAULT_PORT;

#[derive(Parser)]
#[command(about = "ShoalFS storage daemon")]
struct Args {
    /// Address to listen on
    #[arg(long, default_value_t = format!("0.0.0.0:{DEFAULT_PORT}"))]
    listen: String,

    /// Directory holding the metadata databases
    #[arg(long)]
    database_path: Option<PathBuf>,

    /// Directory for opaque file storage
    #[arg(long)]
    storage_path: Option<PathBuf>,

    /// Configuration file (JSON)
    #[arg(short, long)]
    config: Option<PathBuf>,
}

fn load_config(config_path: Option<PathBuf>) -> Result<EngineConfig> {
    match config_path {
        Some(path) => {
            let content = fs::read_to_string(&path)?;
            let config: EngineConfig = serde_json::from_str(&content)?;
            Ok(config)
        }
        None => Ok(EngineConfig::default()),
    }
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let args = Args::parse();

    let mut config = load_config(args.config)?;
    if let Some(path) = args.database_path {
        config.database_path = path;
    }
    if let Some(path) = args.storage_path {
        config.storage_path = path;
    }

    let engine = Arc::new(Engine::open(&config)?);

    let listener = TcpListener::bind(&args.listen)?;
    info!(listen = %args.listen, "ShoalFS daemon listening");
    serve(listener, engine);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn config_loading_default() {
        let config = load_config(None).unwrap();
        assert_eq!(config.database_path, PathBuf::from("."));
        assert_eq!(config.storage_path, PathBuf::from("."));
    }

    #[test]
    fn config_loading_from_file() {
        let mut temp_file = NamedTempFile::new().unwrap();
        let config_json = r#"{
            "database_path": "/var/lib/shoalfs/db",
            "storage_path": "/var/lib/shoalfs/storage"
        }"#;
        temp_file.write_all(config_json.as_bytes()).unwrap();
        temp_file.flush().unwrap();

        let config = load_config(Some(temp_file.path().to_path_buf())).unwrap();
        assert_eq!(config.database_path, PathBuf::from("/var/lib/shoalfs/db"));
        assert_eq!(
            config.storage_path,
            PathBuf::from("/var/lib/shoalfs/storage")
        );
    }
}
