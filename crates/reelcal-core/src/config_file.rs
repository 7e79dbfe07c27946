use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::Config;

/// On-disk TOML configuration structure.
/// All fields are optional so partial configs work (merge with defaults).
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ConfigFile {
    pub api: Option<ApiConfig>,
    pub cache: Option<CacheConfig>,
    pub fetch: Option<FetchConfig>,
    pub server: Option<ServerConfig>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ApiConfig {
    pub tmdb_api_key: Option<String>,
    pub timeout_secs: Option<u64>,
    pub requests_per_second: Option<u32>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CacheConfig {
    pub path: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FetchConfig {
    pub max_pages: Option<u32>,
    pub credits_limit: Option<usize>,
    pub credit_workers: Option<usize>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ServerConfig {
    pub port: Option<u16>,
}

/// Platform config directory path: `<config_dir>/reelcal/config.toml`.
pub fn config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|d| d.join("reelcal").join("config.toml"))
}

/// Load config by cascading CWD `.reelcal.toml` over platform config.
/// CWD values override platform values.
pub fn load_config() -> ConfigFile {
    let platform = config_path().and_then(|p| load_from_path(&p));
    let cwd = load_from_path(Path::new(".reelcal.toml"));

    match (platform, cwd) {
        (None, None) => ConfigFile::default(),
        (Some(p), None) => p,
        (None, Some(c)) => c,
        (Some(p), Some(c)) => merge(p, c),
    }
}

/// Load a config from a specific path. Returns `None` if the file doesn't
/// exist or can't be parsed; a parse failure is logged.
pub fn load_from_path(path: &Path) -> Option<ConfigFile> {
    let content = std::fs::read_to_string(path).ok()?;
    match toml::from_str(&content) {
        Ok(config) => Some(config),
        Err(e) => {
            tracing::warn!(path = %path.display(), error = %e, "ignoring unparseable config file");
            None
        }
    }
}

fn pick<S, T: Clone>(
    overlay: &Option<S>,
    base: &Option<S>,
    field: impl Fn(&S) -> &Option<T>,
) -> Option<T> {
    overlay
        .as_ref()
        .and_then(|s| field(s).clone())
        .or_else(|| base.as_ref().and_then(|s| field(s).clone()))
}

/// Merge two configs: `overlay` values take precedence over `base`.
pub fn merge(base: ConfigFile, overlay: ConfigFile) -> ConfigFile {
    ConfigFile {
        api: Some(ApiConfig {
            tmdb_api_key: pick(&overlay.api, &base.api, |a| &a.tmdb_api_key),
            timeout_secs: pick(&overlay.api, &base.api, |a| &a.timeout_secs),
            requests_per_second: pick(&overlay.api, &base.api, |a| &a.requests_per_second),
        }),
        cache: Some(CacheConfig {
            path: pick(&overlay.cache, &base.cache, |c| &c.path),
        }),
        fetch: Some(FetchConfig {
            max_pages: pick(&overlay.fetch, &base.fetch, |f| &f.max_pages),
            credits_limit: pick(&overlay.fetch, &base.fetch, |f| &f.credits_limit),
            credit_workers: pick(&overlay.fetch, &base.fetch, |f| &f.credit_workers),
        }),
        server: Some(ServerConfig {
            port: pick(&overlay.server, &base.server, |s| &s.port),
        }),
    }
}

/// Default cache file: `$CACHE_DIR/cache.sqlite` when `CACHE_DIR` is set,
/// else `<cache_dir>/reelcal/cache.sqlite`.
pub fn default_cache_path(cache_dir_env: Option<&str>) -> Option<PathBuf> {
    match cache_dir_env.filter(|d| !d.trim().is_empty()) {
        Some(dir) => Some(PathBuf::from(dir).join("cache.sqlite")),
        None => dirs::cache_dir().map(|d| d.join("reelcal").join("cache.sqlite")),
    }
}

/// Resolve a [`Config`] from the environment over `file` over defaults.
///
/// `env` looks up a variable by name; pass `|k| std::env::var(k).ok()` in
/// production. Command-line flags are applied by the caller afterwards.
pub fn resolve_with(file: &ConfigFile, env: impl Fn(&str) -> Option<String>) -> Config {
    let mut config = Config::default();
    let api = file.api.clone().unwrap_or_default();
    let cache = file.cache.clone().unwrap_or_default();
    let fetch = file.fetch.clone().unwrap_or_default();
    let server = file.server.clone().unwrap_or_default();

    config.tmdb_api_key = env("TMDB_API_KEY").or(api.tmdb_api_key);

    config.cache_path = env("REELCAL_CACHE_PATH")
        .map(PathBuf::from)
        .or_else(|| cache.path.map(PathBuf::from))
        .or_else(|| default_cache_path(env("CACHE_DIR").as_deref()));

    if let Some(secs) = parse_env(&env, "REELCAL_TIMEOUT_SECS").or(api.timeout_secs) {
        config.timeout = Duration::from_secs(secs.max(1));
    }
    if let Some(rps) = api.requests_per_second {
        config.requests_per_second = rps.max(1);
    }
    if let Some(port) = parse_env(&env, "PORT").or(server.port) {
        config.port = port;
    }

    if let Some(n) = fetch.max_pages {
        config.fetch.max_pages = n.max(1);
    }
    if let Some(n) = fetch.credits_limit {
        config.fetch.credits_limit = n;
    }
    if let Some(n) = fetch.credit_workers {
        config.fetch.credit_workers = n.max(1);
    }

    config
}

/// Resolve from the process environment and the cascaded config files.
pub fn resolve() -> Config {
    resolve_with(&load_config(), |k| std::env::var(k).ok())
}

fn parse_env<T: std::str::FromStr>(env: impl Fn(&str) -> Option<String>, key: &str) -> Option<T> {
    let raw = env(key)?;
    match raw.trim().parse() {
        Ok(v) => Some(v),
        Err(_) => {
            tracing::warn!(key, value = %raw, "ignoring unparseable environment variable");
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn env_of(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |k| map.get(k).cloned()
    }

    #[test]
    fn parses_all_sections() {
        let toml_str = r#"
            [api]
            tmdb_api_key = "file-key"
            timeout_secs = 4
            requests_per_second = 10
            [cache]
            path = "/var/cache/reelcal/cache.sqlite"
            [fetch]
            max_pages = 3
            credits_limit = 10
            credit_workers = 4
            [server]
            port = 8080
        "#;
        let parsed: ConfigFile = toml::from_str(toml_str).unwrap();
        assert_eq!(parsed.api.as_ref().unwrap().timeout_secs, Some(4));
        assert_eq!(parsed.fetch.as_ref().unwrap().credit_workers, Some(4));
        assert_eq!(parsed.server.unwrap().port, Some(8080));
    }

    #[test]
    fn missing_sections_deserialize_as_none() {
        let parsed: ConfigFile = toml::from_str("[cache]\npath = \"/x\"\n").unwrap();
        assert!(parsed.api.is_none());
        assert_eq!(parsed.cache.unwrap().path.as_deref(), Some("/x"));
    }

    #[test]
    fn merge_overlay_wins_and_base_fills_gaps() {
        let base = ConfigFile {
            api: Some(ApiConfig {
                tmdb_api_key: Some("base".into()),
                timeout_secs: Some(30),
                ..Default::default()
            }),
            cache: Some(CacheConfig {
                path: Some("/base/cache.sqlite".into()),
            }),
            ..Default::default()
        };
        let overlay = ConfigFile {
            api: Some(ApiConfig {
                tmdb_api_key: Some("overlay".into()),
                ..Default::default()
            }),
            ..Default::default()
        };
        let merged = merge(base, overlay);
        let api = merged.api.unwrap();
        assert_eq!(api.tmdb_api_key.as_deref(), Some("overlay"));
        assert_eq!(api.timeout_secs, Some(30));
        assert_eq!(merged.cache.unwrap().path.as_deref(), Some("/base/cache.sqlite"));
    }

    #[test]
    fn environment_beats_file() {
        let file = ConfigFile {
            api: Some(ApiConfig {
                tmdb_api_key: Some("file-key".into()),
                timeout_secs: Some(20),
                ..Default::default()
            }),
            cache: Some(CacheConfig {
                path: Some("/file/cache.sqlite".into()),
            }),
            server: Some(ServerConfig { port: Some(8080) }),
            ..Default::default()
        };
        let config = resolve_with(
            &file,
            env_of(&[
                ("TMDB_API_KEY", "env-key"),
                ("REELCAL_CACHE_PATH", "/env/cache.sqlite"),
                ("REELCAL_TIMEOUT_SECS", "3"),
                ("PORT", "4000"),
            ]),
        );
        assert_eq!(config.tmdb_api_key.as_deref(), Some("env-key"));
        assert_eq!(config.cache_path, Some(PathBuf::from("/env/cache.sqlite")));
        assert_eq!(config.timeout, Duration::from_secs(3));
        assert_eq!(config.port, 4000);
    }

    #[test]
    fn file_beats_defaults() {
        let file = ConfigFile {
            fetch: Some(FetchConfig {
                max_pages: Some(2),
                credits_limit: Some(5),
                credit_workers: Some(0),
            }),
            cache: Some(CacheConfig {
                path: Some("/file/cache.sqlite".into()),
            }),
            ..Default::default()
        };
        let config = resolve_with(&file, env_of(&[]));
        assert_eq!(config.fetch.max_pages, 2);
        assert_eq!(config.fetch.credits_limit, 5);
        assert_eq!(config.fetch.credit_workers, 1);
        assert_eq!(config.cache_path, Some(PathBuf::from("/file/cache.sqlite")));
        assert_eq!(config.port, 3000);
        assert!(config.tmdb_api_key.is_none());
    }

    #[test]
    fn cache_dir_env_sets_default_path() {
        let config = resolve_with(&ConfigFile::default(), env_of(&[("CACHE_DIR", "/data")]));
        assert_eq!(config.cache_path, Some(PathBuf::from("/data/cache.sqlite")));
    }

    #[test]
    fn garbage_env_values_are_ignored() {
        let config = resolve_with(
            &ConfigFile::default(),
            env_of(&[("PORT", "eighty"), ("REELCAL_TIMEOUT_SECS", "-1")]),
        );
        assert_eq!(config.port, 3000);
        assert_eq!(config.timeout, Duration::from_secs(10));
    }
}
