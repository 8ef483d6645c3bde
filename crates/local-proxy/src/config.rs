use clap::Parser;
use std::path::PathBuf;

/// Local Proxy daemon configuration (spec.md §6 Configuration). No
/// runtime reconfiguration: this is parsed once at startup into an
/// immutable value held by `AppContext`.
#[derive(Parser, Debug, Clone)]
#[command(name = "local-proxy")]
pub struct Cli {
    #[arg(long, default_value = "127.0.0.1:8080")]
    pub listen: String,

    /// Defaults to `$HOME/.ailabber`.
    #[arg(long)]
    pub data_dir: Option<PathBuf>,

    #[arg(long, default_value_t = 5)]
    pub poll_interval_secs: u64,

    #[arg(long)]
    pub remote_server_url: Option<String>,

    #[arg(long)]
    pub ssh_key_path: Option<String>,

    #[arg(long)]
    pub ssh_host: Option<String>,

    #[arg(long, default_value_t = 22)]
    pub ssh_port: u16,

    #[arg(long)]
    pub ssh_user: Option<String>,

    #[arg(long)]
    pub remote_base_dir: Option<String>,
}

#[derive(Debug, Clone)]
pub struct Config {
    pub listen: String,
    pub data_dir: PathBuf,
    pub poll_interval_secs: u64,
    pub remote: Option<RemoteConfig>,
}

#[derive(Debug, Clone)]
pub struct RemoteConfig {
    pub server_url: String,
    pub ssh_key_path: String,
    pub ssh_host: String,
    pub ssh_port: u16,
    pub ssh_user: String,
    pub remote_base_dir: String,
}

impl Config {
    pub fn from_cli(cli: Cli) -> Self {
        let data_dir = cli.data_dir.unwrap_or_else(default_data_dir);
        let remote = match (
            cli.remote_server_url,
            cli.ssh_key_path,
            cli.ssh_host,
            cli.ssh_user,
            cli.remote_base_dir,
        ) {
            (Some(server_url), Some(ssh_key_path), Some(ssh_host), Some(ssh_user), Some(remote_base_dir)) => {
                Some(RemoteConfig {
                    server_url,
                    ssh_key_path,
                    ssh_host,
                    ssh_port: cli.ssh_port,
                    ssh_user,
                    remote_base_dir,
                })
            }
            _ => None,
        };
        Config {
            listen: cli.listen,
            data_dir,
            poll_interval_secs: cli.poll_interval_secs,
            remote,
        }
    }

    pub fn db_path(&self) -> PathBuf {
        self.data_dir.join("local_proxy.db")
    }

    pub fn tmp_dir(&self, username: &str) -> PathBuf {
        self.data_dir.join("tmp").join(username)
    }

    pub fn logs_dir(&self) -> PathBuf {
        self.data_dir.join("logs")
    }
}

fn default_data_dir() -> PathBuf {
    let home = std::env::var_os("HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from("."));
    home.join(".ailabber")
}
