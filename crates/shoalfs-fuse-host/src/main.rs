// Copyright 2025 Schelling Point Labs Inc
// SPDX-License-Identifier: AGPL-3.0-only

//! ShoalFS FUSE Host — mounts the remote filesystem
//!
//! Builds the client facade for the configured daemon, hands it to the
//! FUSE adapter and blocks in the mount until unmounted.

mod adapter;

use std::path::PathBuf;

use anyhow::Result;
use clap::Parser;
use fuser::MountOption;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use adapter::ShoalFuse;
use shoalfs_client::Client;
use shoalfs_proto::DEFAULT_PORT;

#[derive(Parser)]
#[command(about = "ShoalFS FUSE host")]
struct Args {
    /// Mount point for the filesystem
    mount_point: PathBuf,

    /// Daemon endpoint
    #[arg(long, default_value_t = format!("127.0.0.1:{DEFAULT_PORT}"))]
    server: String,

    /// Allow other users to access the filesystem
    #[arg(long)]
    allow_other: bool,

    /// Auto unmount on process exit
    #[arg(long)]
    auto_unmount: bool,

    /// Legacy demo-filesystem option; accepted but inert
    #[arg(long)]
    name: Option<String>,

    /// Legacy demo-filesystem option; accepted but inert
    #[arg(long)]
    contents: Option<String>,
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let args = Args::parse();
    if args.name.is_some() || args.contents.is_some() {
        warn!("--name and --contents are kept for compatibility and have no effect");
    }

    let client = Client::new(args.server.clone());
    let filesystem = ShoalFuse::new(client);

    let mut mount_options = vec![
        MountOption::FSName("shoalfs".to_string()),
        MountOption::Subtype("shoalfs".to_string()),
    ];
    if args.allow_other {
        mount_options.push(MountOption::AllowOther);
    }
    if args.auto_unmount {
        mount_options.push(MountOption::AutoUnmount);
    }

    info!(
        server = %args.server,
        mount_point = %args.mount_point.display(),
        "mounting ShoalFS"
    );
    fuser::mount2(filesystem, &args.mount_point, &mount_options)?;
    info!("unmounted");
    Ok(())
}
