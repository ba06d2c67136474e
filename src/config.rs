use std::{net::SocketAddr, path::PathBuf, str::FromStr};

use anyhow::Context;
use log::LevelFilter;

pub const DB_FILE: &str = "./dorm-relay.db";
pub const SERIAL_PORT_PATH: &str = "/dev/ttyUSB0";
pub const BAUD_RATE: u32 = 9600;
pub const BIND_HOST: &str = "0.0.0.0";
pub const PORT: u16 = 3001;
pub const DORM_ID: &str = "ABC123";

#[derive(Debug, Clone, PartialEq)]
pub struct Settings {
    pub database_path: PathBuf,
    pub serial_port_path: PathBuf,
    pub baud_rate: u32,
    pub bind_host: String,
    pub port: u16,
    pub dorm_id: String,
    pub log_level: LevelFilter,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            database_path: DB_FILE.into(),
            serial_port_path: SERIAL_PORT_PATH.into(),
            baud_rate: BAUD_RATE,
            bind_host: BIND_HOST.into(),
            port: PORT,
            dorm_id: DORM_ID.into(),
            log_level: LevelFilter::Info,
        }
    }
}

impl Settings {
    /// Reads settings from the process environment. Also returns the
    /// `KEY=value` entries that failed to parse and fell back to defaults.
    pub fn from_env() -> (Self, Vec<String>) {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Builds settings from `lookup`, falling back to defaults for missing or
    /// unparseable values.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> (Self, Vec<String>) {
        let mut settings = Settings::default();
        let mut rejected = Vec::new();

        if let Some(v) = lookup("DATABASE_PATH") {
            settings.database_path = v.into();
        }
        if let Some(v) = lookup("SERIAL_PORT_PATH") {
            settings.serial_port_path = v.into();
        }
        if let Some(v) = lookup("BIND_HOST") {
            settings.bind_host = v;
        }
        if let Some(v) = lookup("DORM_ID") {
            settings.dorm_id = v;
        }
        parse_into(&lookup, "SERIAL_BAUD_RATE", &mut settings.baud_rate, &mut rejected);
        parse_into(&lookup, "PORT", &mut settings.port, &mut rejected);
        parse_into(&lookup, "LOG_LEVEL", &mut settings.log_level, &mut rejected);

        (settings, rejected)
    }

    pub fn listen_addr(&self) -> Result<SocketAddr, anyhow::Error> {
        format!("{}:{}", self.bind_host, self.port)
            .parse()
            .context("Failed to parse listen address")
    }
}

/// Loads `.env` from the working directory or its parents into the process
/// environment. A missing file is not an error.
pub fn load_dotenv() -> Result<Option<PathBuf>, dotenvy::Error> {
    match dotenvy::dotenv() {
        Ok(path) => Ok(Some(path)),
        Err(e) if e.not_found() => Ok(None),
        Err(e) => Err(e),
    }
}

fn parse_into<T: FromStr>(
    lookup: &impl Fn(&str) -> Option<String>,
    key: &str,
    target: &mut T,
    rejected: &mut Vec<String>,
) {
    if let Some(raw) = lookup(key) {
        match raw.trim().parse() {
            Ok(v) => *target = v,
            Err(_) => rejected.push(format!("{key}={raw:?}")),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    fn settings(vars: &[(&str, &str)]) -> Settings {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        Settings::from_lookup(|key| vars.get(key).cloned()).0
    }

    #[test]
    fn test_defaults() {
        let s = settings(&[]);
        assert_eq!(s, Settings::default());
        assert_eq!(s.dorm_id, "ABC123");
        assert_eq!(s.port, 3001);
        assert_eq!(s.baud_rate, 9600);
    }

    #[test]
    fn test_overrides() {
        let s = settings(&[
            ("DATABASE_PATH", "/var/lib/dorms.db"),
            ("SERIAL_PORT_PATH", "/dev/ttyACM0"),
            ("SERIAL_BAUD_RATE", "115200"),
            ("PORT", "8080"),
            ("DORM_ID", "XYZ789"),
            ("LOG_LEVEL", "debug"),
        ]);
        assert_eq!(s.database_path, PathBuf::from("/var/lib/dorms.db"));
        assert_eq!(s.serial_port_path, PathBuf::from("/dev/ttyACM0"));
        assert_eq!(s.baud_rate, 115200);
        assert_eq!(s.port, 8080);
        assert_eq!(s.dorm_id, "XYZ789");
        assert_eq!(s.log_level, LevelFilter::Debug);
    }

    #[test]
    fn test_invalid_numbers_fall_back() {
        let s = settings(&[("PORT", "http"), ("SERIAL_BAUD_RATE", "-1")]);
        assert_eq!(s.port, PORT);
        assert_eq!(s.baud_rate, BAUD_RATE);
    }

    #[test]
    fn test_invalid_values_are_reported() {
        let (s, rejected) = Settings::from_lookup(|key| match key {
            "PORT" => Some("http".to_string()),
            "LOG_LEVEL" => Some("loud".to_string()),
            "DORM_ID" => Some("XYZ789".to_string()),
            _ => None,
        });
        assert_eq!(s.dorm_id, "XYZ789");
        assert_eq!(rejected, vec!["PORT=\"http\"", "LOG_LEVEL=\"loud\""]);

        let (_, rejected) = Settings::from_lookup(|_| None);
        assert!(rejected.is_empty());
    }

    #[test]
    fn test_dotenv_file_keys() {
        let path = std::env::temp_dir().join(format!("dorm-relay-{}.env", std::process::id()));
        std::fs::write(
            &path,
            "SERIAL_PORT_PATH=/dev/ttyACM1\nPORT=4000\n# comment\nDORM_ID=\"DEF456\"\n",
        )
        .unwrap();
        let vars: HashMap<String, String> = dotenvy::from_path_iter(&path)
            .unwrap()
            .collect::<Result<_, _>>()
            .unwrap();
        std::fs::remove_file(&path).unwrap();

        let (s, rejected) = Settings::from_lookup(|key| vars.get(key).cloned());
        assert!(rejected.is_empty());
        assert_eq!(s.serial_port_path, PathBuf::from("/dev/ttyACM1"));
        assert_eq!(s.port, 4000);
        assert_eq!(s.dorm_id, "DEF456");
    }

    #[test]
    fn test_listen_addr() {
        let s = settings(&[("BIND_HOST", "127.0.0.1"), ("PORT", "9000")]);
        assert_eq!(s.listen_addr().unwrap(), "127.0.0.1:9000".parse().unwrap());
        assert!(settings(&[("BIND_HOST", "not a host")]).listen_addr().is_err());
    }
}
