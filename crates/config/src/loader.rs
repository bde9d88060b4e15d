use std::path::{Path, PathBuf};

use tracing::{debug, warn};

use crate::{Error, Result, schema::JobdeckConfig};

/// Standard config file names, checked in order.
const CONFIG_FILENAMES: &[&str] = &[
    "jobdeck.toml",
    "jobdeck.yaml",
    "jobdeck.yml",
    "jobdeck.json",
];

pub const ENV_DATABASE_URL: &str = "JOBDECK_DATABASE_URL";
pub const ENV_POLL_INTERVAL_SECS: &str = "JOBDECK_POLL_INTERVAL_SECS";
pub const ENV_MAX_CONCURRENT_JOBS: &str = "JOBDECK_MAX_CONCURRENT_JOBS";

/// Load config from the given path (any supported format).
pub fn load_config(path: &Path) -> Result<JobdeckConfig> {
    let raw = std::fs::read_to_string(path).map_err(|source| Error::Read {
        path: path.to_path_buf(),
        source,
    })?;
    parse_config(&raw, path)
}

/// Resolve the effective configuration.
///
/// An explicit path must load; discovery falls back to defaults. Environment
/// overrides are applied last in both cases.
pub fn load(explicit: Option<&Path>) -> Result<JobdeckConfig> {
    let mut config = match explicit {
        Some(path) => {
            debug!(path = %path.display(), "loading config");
            load_config(path)?
        },
        None => discover_and_load(),
    };
    apply_env_overrides(&mut config, |var| std::env::var(var).ok())?;
    Ok(config)
}

/// Discover and load config from standard locations.
///
/// Search order:
/// 1. `./jobdeck.{toml,yaml,yml,json}` (project-local)
/// 2. `<user config dir>/jobdeck.{toml,yaml,yml,json}`
///
/// Returns `JobdeckConfig::default()` if no config file is found or the one
/// found does not parse.
pub fn discover_and_load() -> JobdeckConfig {
    if let Some(path) = find_config_file() {
        debug!(path = %path.display(), "loading config");
        match load_config(&path) {
            Ok(cfg) => return cfg,
            Err(e) => {
                warn!(path = %path.display(), error = %e, "failed to load config, using defaults");
            },
        }
    } else {
        debug!("no config file found, using defaults");
    }
    JobdeckConfig::default()
}

/// First config file in the standard locations.
pub fn find_config_file() -> Option<PathBuf> {
    find_in(Path::new(".")).or_else(|| config_dir().and_then(|dir| find_in(&dir)))
}

fn find_in(dir: &Path) -> Option<PathBuf> {
    CONFIG_FILENAMES
        .iter()
        .map(|name| dir.join(name))
        .find(|p| p.exists())
}

/// Returns the user-global config directory (`~/.config/jobdeck/` on Linux).
pub fn config_dir() -> Option<PathBuf> {
    directories::ProjectDirs::from("", "", "jobdeck").map(|d| d.config_dir().to_path_buf())
}

/// Apply `JOBDECK_*` overrides read through `lookup`.
///
/// Empty values are ignored. Values that do not parse are an error rather
/// than silently falling back.
pub fn apply_env_overrides(
    config: &mut JobdeckConfig,
    lookup: impl Fn(&str) -> Option<String>,
) -> Result<()> {
    let get = |var: &str| lookup(var).filter(|v| !v.trim().is_empty());

    if let Some(url) = get(ENV_DATABASE_URL) {
        debug!(var = ENV_DATABASE_URL, "database url overridden from env");
        config.database.url = url;
    }
    if let Some(raw) = get(ENV_POLL_INTERVAL_SECS) {
        config.scheduler.poll_interval_secs =
            raw.trim().parse().map_err(|_| Error::InvalidEnv {
                var: ENV_POLL_INTERVAL_SECS,
                value: raw.clone(),
            })?;
    }
    if let Some(raw) = get(ENV_MAX_CONCURRENT_JOBS) {
        config.scheduler.max_concurrent_jobs =
            raw.trim().parse().map_err(|_| Error::InvalidEnv {
                var: ENV_MAX_CONCURRENT_JOBS,
                value: raw.clone(),
            })?;
    }
    Ok(())
}

fn parse_config(raw: &str, path: &Path) -> Result<JobdeckConfig> {
    let ext = path.extension().and_then(|e| e.to_str()).unwrap_or("toml");
    let parse_err = |message: String| Error::Parse {
        path: path.to_path_buf(),
        message,
    };

    match ext {
        "toml" => toml::from_str(raw).map_err(|e| parse_err(e.to_string())),
        "yaml" | "yml" => serde_yaml::from_str(raw).map_err(|e| parse_err(e.to_string())),
        "json" => serde_json::from_str(raw).map_err(|e| parse_err(e.to_string())),
        other => Err(Error::UnsupportedFormat {
            extension: other.to_string(),
        }),
    }
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    fn write(dir: &tempfile::TempDir, name: &str, body: &str) -> PathBuf {
        let path = dir.path().join(name);
        std::fs::write(&path, body).unwrap();
        path
    }

    #[test]
    fn loads_toml_with_partial_sections() {
        let dir = tempfile::tempdir().unwrap();
        let path = write(
            &dir,
            "jobdeck.toml",
            "[scheduler]\npoll_interval_secs = 30\n\n[database]\nurl = \"sqlite://x.db\"\n",
        );
        let cfg = load_config(&path).unwrap();
        assert_eq!(cfg.scheduler.poll_interval_secs, 30);
        assert_eq!(cfg.scheduler.max_concurrent_jobs, 8);
        assert_eq!(cfg.database.url, "sqlite://x.db");
        assert_eq!(cfg.database.max_connections, 5);
    }

    #[test]
    fn loads_yaml_and_json() {
        let dir = tempfile::tempdir().unwrap();
        let yaml = write(&dir, "jobdeck.yaml", "scheduler:\n  history_limit: 7\n");
        assert_eq!(load_config(&yaml).unwrap().scheduler.history_limit, 7);

        let json = write(&dir, "jobdeck.json", r#"{"scheduler": {"autostart": false}}"#);
        assert!(!load_config(&json).unwrap().scheduler.autostart);
    }

    #[test]
    fn empty_file_is_all_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = write(&dir, "jobdeck.toml", "");
        assert_eq!(load_config(&path).unwrap(), JobdeckConfig::default());
    }

    #[test]
    fn rejects_bad_input() {
        let dir = tempfile::tempdir().unwrap();
        let broken = write(&dir, "jobdeck.toml", "[scheduler\n");
        assert!(matches!(load_config(&broken), Err(Error::Parse { .. })));

        let ini = write(&dir, "jobdeck.ini", "");
        assert!(matches!(
            load_config(&ini),
            Err(Error::UnsupportedFormat { .. })
        ));

        let missing = dir.path().join("nope.toml");
        assert!(matches!(load(Some(missing.as_path())), Err(Error::Read { .. })));
    }

    #[test]
    fn finds_first_standard_name() {
        let dir = tempfile::tempdir().unwrap();
        assert!(find_in(dir.path()).is_none());
        write(&dir, "jobdeck.json", "{}");
        write(&dir, "jobdeck.toml", "");
        assert_eq!(find_in(dir.path()).unwrap(), dir.path().join("jobdeck.toml"));
    }

    #[test]
    fn env_overrides_apply() {
        let env: HashMap<&str, &str> = HashMap::from([
            (ENV_DATABASE_URL, "sqlite::memory:"),
            (ENV_POLL_INTERVAL_SECS, " 12 "),
            (ENV_MAX_CONCURRENT_JOBS, ""),
        ]);
        let mut cfg = JobdeckConfig::default();
        apply_env_overrides(&mut cfg, |k| env.get(k).map(|v| v.to_string())).unwrap();

        assert_eq!(cfg.database.url, "sqlite::memory:");
        assert_eq!(cfg.scheduler.poll_interval_secs, 12);
        assert_eq!(cfg.scheduler.max_concurrent_jobs, 8);
    }

    #[test]
    fn env_override_must_parse() {
        let mut cfg = JobdeckConfig::default();
        let err = apply_env_overrides(&mut cfg, |k| {
            (k == ENV_MAX_CONCURRENT_JOBS).then(|| "lots".to_string())
        })
        .unwrap_err();
        assert!(err.to_string().contains(ENV_MAX_CONCURRENT_JOBS));
    }
}
