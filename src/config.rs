//! Startup configuration surface: CLI flags overlaying an INI-style
//! config file, matching `minitree`'s `[server:main]`/`[backend:main]`
//! sections and its socket-supersedes-port rule.

use std::path::PathBuf;

use clap::Parser;

use crate::auth::AdminCredentials;

#[derive(Debug, Parser)]
#[command(name = "treeconf", about = "hierarchical configuration store")]
pub struct Cli {
    /// Path (or name) of UNIX/TCP socket to bind to. Overrides --port.
    #[arg(short, long)]
    pub socket: Option<String>,

    /// Path of the configuration file.
    #[arg(short, long, default_value = "etc/default.ini")]
    pub config: PathBuf,

    /// The port number to listen on.
    #[arg(short, long)]
    pub port: Option<u16>,
}

#[derive(Debug, Clone)]
pub enum Listener {
    Tcp(u16),
    Unix(String),
}

#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub listener: Listener,
    pub admin: AdminCredentials,
    pub max_threads: usize,
}

#[derive(Debug, Clone)]
pub struct BackendConfig {
    pub dsn: String,
    pub cp_min: u32,
    pub cp_max: u32,
}

#[derive(Debug, Clone)]
pub struct Config {
    pub server: ServerConfig,
    pub backend: BackendConfig,
}

const DEFAULT_INI: &str = r#"
[server:main]
port = 8000
admin_user =
admin_pass =
max_threads = 4

[backend:main]
dsn = host=localhost port=5432 dbname=treeconf user=treeconf password=
cp_min = 2
cp_max = 4
"#;

/// Loads the built-in defaults, overlays the on-disk config file (if it
/// exists), then applies CLI overrides. A socket path supersedes a port.
pub fn load(cli: &Cli) -> anyhow::Result<Config> {
    let mut ini = ini::Ini::load_from_str(DEFAULT_INI)?;
    if cli.config.exists() {
        let on_disk = ini::Ini::load_from_file(&cli.config)?;
        for (section, props) in on_disk.iter() {
            for (key, value) in props.iter() {
                ini.set_to(section.map(|s| s.to_string()), key.to_string(), value.to_string());
            }
        }
    }

    let server_section = ini.section(Some("server:main"));
    let backend_section = ini.section(Some("backend:main"));

    let cfg_port: u16 = server_section
        .and_then(|s| s.get("port"))
        .and_then(|v| v.parse().ok())
        .unwrap_or(8000);
    let port = cli.port.unwrap_or(cfg_port);

    let listener = match &cli.socket {
        Some(path) => Listener::Unix(path.clone()),
        None => Listener::Tcp(port),
    };

    let admin = AdminCredentials {
        user: server_section.and_then(|s| s.get("admin_user")).unwrap_or("").to_string(),
        password: server_section.and_then(|s| s.get("admin_pass")).unwrap_or("").to_string(),
    };
    let max_threads = server_section
        .and_then(|s| s.get("max_threads"))
        .and_then(|v| v.parse().ok())
        .unwrap_or(4);

    let dsn = backend_section
        .and_then(|s| s.get("dsn"))
        .unwrap_or("")
        .to_string();
    let cp_min = backend_section
        .and_then(|s| s.get("cp_min"))
        .and_then(|v| v.parse().ok())
        .unwrap_or(2);
    let cp_max = backend_section
        .and_then(|s| s.get("cp_max"))
        .and_then(|v| v.parse().ok())
        .unwrap_or(4);

    Ok(Config {
        server: ServerConfig { listener, admin, max_threads },
        backend: BackendConfig { dsn, cp_min, cp_max },
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_parse_cleanly() {
        let cli = Cli { socket: None, config: PathBuf::from("/nonexistent/default.ini"), port: None };
        let cfg = load(&cli).unwrap();
        assert!(matches!(cfg.server.listener, Listener::Tcp(8000)));
        assert_eq!(cfg.backend.cp_min, 2);
        assert_eq!(cfg.backend.cp_max, 4);
        assert_eq!(cfg.server.admin.user, "");
    }

    #[test]
    fn socket_supersedes_port() {
        let cli = Cli {
            socket: Some("treeconf.sock".to_string()),
            config: PathBuf::from("/nonexistent/default.ini"),
            port: Some(9000),
        };
        let cfg = load(&cli).unwrap();
        assert!(matches!(cfg.server.listener, Listener::Unix(ref s) if s == "treeconf.sock"));
    }

    #[test]
    fn cli_port_overrides_config_default() {
        let cli = Cli { socket: None, config: PathBuf::from("/nonexistent/default.ini"), port: Some(9090) };
        let cfg = load(&cli).unwrap();
        assert!(matches!(cfg.server.listener, Listener::Tcp(9090)));
    }
}
