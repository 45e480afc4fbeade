use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(name = "memfs", about = "FUSE filesystem held entirely in memory")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Mount an empty in-memory filesystem
    Mount {
        /// Path to the mount point
        mountpoint: PathBuf,

        /// Log file path
        #[arg(long, default_value = "/tmp/memfs.log")]
        log_file: PathBuf,

        /// Stream table snapshots to a viewer listening at HOST:PORT
        #[arg(long, value_name = "ADDR")]
        visualise: Option<String>,

        /// Do not create the /hello example file
        #[arg(long)]
        no_hello: bool,
    },
    /// Unmount a memfs filesystem
    Unmount {
        /// Path to the mount point
        mountpoint: PathBuf,
    },
}

#[derive(Debug, Clone)]
pub struct MemfsConfig {
    pub mountpoint: PathBuf,
    pub log_file: PathBuf,
    pub visualise: Option<String>,
    pub seed_hello: bool,
}

impl MemfsConfig {
    /// Config for a mount with no log file, no viewer and no example file.
    pub fn bare(mountpoint: impl Into<PathBuf>) -> Self {
        Self {
            mountpoint: mountpoint.into(),
            log_file: PathBuf::from("/tmp/memfs.log"),
            visualise: None,
            seed_hello: false,
        }
    }
}
