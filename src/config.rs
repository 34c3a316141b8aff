use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use log::debug;
use serde::{Deserialize, Serialize};

pub const CONFIG_FILE: &str = "server_config.json";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub host: String,
    pub port: u16,
    pub open_browser: bool,
    pub root_dir: String,
    pub workers: usize,
    pub log_level: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 8080,
            open_browser: true,
            root_dir: ".".to_string(),
            workers: 4,
            log_level: "info".to_string(),
        }
    }
}

/// On-disk document shape. Every key is optional so a partial file only
/// overrides what it names; unknown keys are ignored by serde.
#[derive(Debug, Default, Deserialize)]
struct ConfigFile {
    host: Option<String>,
    port: Option<u16>,
    open_browser: Option<bool>,
    root_dir: Option<String>,
    workers: Option<usize>,
    log_level: Option<String>,
}

impl Config {
    /// Load defaults overlaid with whatever `path` provides. A missing,
    /// unreadable, or unparseable file yields the defaults unchanged.
    pub fn load(path: &Path) -> Config {
        let mut config = Config::default();

        let doc = match fs::read_to_string(path) {
            Ok(text) => match serde_json::from_str::<ConfigFile>(&text) {
                Ok(doc) => doc,
                Err(e) => {
                    debug!("Ignoring malformed {}: {}", path.display(), e);
                    return config;
                }
            },
            Err(_) => return config,
        };

        if let Some(host) = doc.host {
            config.host = host;
        }
        if let Some(port) = doc.port {
            config.port = port;
        }
        if let Some(open_browser) = doc.open_browser {
            config.open_browser = open_browser;
        }
        if let Some(root_dir) = doc.root_dir {
            config.root_dir = root_dir;
        }
        if let Some(workers) = doc.workers {
            config.workers = workers;
        }
        if let Some(log_level) = doc.log_level {
            config.log_level = log_level;
        }

        config
    }

    /// Positional overrides: one argument is a port, two are host and port.
    /// A port that does not parse keeps the prior value; any other argument
    /// count is ignored.
    pub fn apply_args(&mut self, args: &[String]) {
        match args {
            [port] => {
                if let Ok(port) = port.parse() {
                    self.port = port;
                }
            }
            [host, port] => {
                self.host = host.clone();
                if let Ok(port) = port.parse() {
                    self.port = port;
                }
            }
            _ => {}
        }
    }

    pub fn address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    pub fn base_url(&self) -> String {
        format!("http://{}:{}", self.host, self.port)
    }

    /// The served root must exist and be reachable before the listener
    /// comes up; the caller treats failure as fatal.
    pub fn resolve_root(&self) -> io::Result<PathBuf> {
        fs::canonicalize(&self.root_dir)
    }
}
