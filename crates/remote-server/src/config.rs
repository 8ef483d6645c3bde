use clap::Parser;
use std::path::PathBuf;

/// Remote Server daemon configuration. Structurally the same shape as
/// the Local Proxy's (spec.md §9: "structurally identical to the Local
/// Submitter"), minus anything Remote-Bridge-specific since this
/// daemon *is* the remote side.
#[derive(Parser, Debug, Clone)]
#[command(name = "remote-server")]
pub struct Cli {
    #[arg(long, default_value = "127.0.0.1:8080")]
    pub listen: String,

    #[arg(long)]
    pub data_dir: Option<PathBuf>,

    #[arg(long, default_value_t = 5)]
    pub poll_interval_secs: u64,

    /// Root under which every user's staged tree lands, mirroring the
    /// local upload root (spec.md §6 Filesystem layout).
    #[arg(long)]
    pub remote_base_dir: PathBuf,
}

#[derive(Debug, Clone)]
pub struct Config {
    pub listen: String,
    pub data_dir: PathBuf,
    pub poll_interval_secs: u64,
    pub remote_base_dir: PathBuf,
}

impl Config {
    pub fn from_cli(cli: Cli) -> Self {
        let data_dir = cli.data_dir.unwrap_or_else(default_data_dir);
        Config {
            listen: cli.listen,
            data_dir,
            poll_interval_secs: cli.poll_interval_secs,
            remote_base_dir: cli.remote_base_dir,
        }
    }

    pub fn db_path(&self) -> PathBuf {
        self.data_dir.join("remote_server.db")
    }

    pub fn user_root(&self, username: &str) -> PathBuf {
        self.remote_base_dir.join(username)
    }
}

fn default_data_dir() -> PathBuf {
    let home = std::env::var_os("HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from("."));
    home.join(".ailabber-remote")
}
