//! Layered configuration for papersnipe.
//!
//! Settings are resolved once at startup, in order:
//! 1. built-in defaults
//! 2. `papersnipe.toml` in the project directory
//! 3. environment variables (a project `.env` is loaded first)
//! 4. CLI flags
//!
//! The resolved [`Config`] is passed by reference to every component; nothing
//! else in the crate reads the environment.
//!
//! # Configuration File Format
//!
//! ```toml
//! [paths]
//! database = "database.json"
//! repos = "/var/lib/papersnipe/repos"
//!
//! [hub]
//! username = "my-user"
//!
//! [claude]
//! cli_path = "/usr/local/bin/claude"
//! init_enabled = true
//! auto_approve = true
//! auto_install = false
//! install_method = "auto"
//! init_timeout = 1800
//!
//! [upload]
//! enabled = true
//! private = false
//! force = false
//!
//! [pipeline]
//! auto_retry_failed = false
//! parallel_generation = false
//! max_concurrent_generations = 3
//! ```

use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

/// Name of the optional project configuration file.
pub const CONFIG_FILE: &str = "papersnipe.toml";

const DEFAULT_DATABASE: &str = "database.json";
const DEFAULT_INIT_TIMEOUT_SECS: u64 = 1800;
const DEFAULT_MAX_CONCURRENT: usize = 3;

/// How to obtain the coding-agent CLI when it is not installed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum InstallMethod {
    #[default]
    Auto,
    Curl,
    Skip,
}

impl fmt::Display for InstallMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            InstallMethod::Auto => write!(f, "auto"),
            InstallMethod::Curl => write!(f, "curl"),
            InstallMethod::Skip => write!(f, "skip"),
        }
    }
}

impl FromStr for InstallMethod {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "auto" => Ok(InstallMethod::Auto),
            "curl" => Ok(InstallMethod::Curl),
            "skip" => Ok(InstallMethod::Skip),
            _ => anyhow::bail!(
                "Invalid install method '{}'. Valid values: auto, curl, skip",
                s
            ),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PathsSection {
    #[serde(default)]
    pub database: Option<PathBuf>,
    #[serde(default)]
    pub repos: Option<PathBuf>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct HubSection {
    #[serde(default)]
    pub token: Option<String>,
    #[serde(default)]
    pub username: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ClaudeSection {
    #[serde(default)]
    pub cli_path: Option<PathBuf>,
    #[serde(default)]
    pub init_enabled: Option<bool>,
    #[serde(default)]
    pub auto_approve: Option<bool>,
    #[serde(default)]
    pub auto_install: Option<bool>,
    #[serde(default)]
    pub install_method: Option<InstallMethod>,
    #[serde(default)]
    pub init_timeout: Option<TimeoutSetting>,
}

/// `init_timeout = 1800`, `init_timeout = "1800"`, or `init_timeout = "none"`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum TimeoutSetting {
    Seconds(u64),
    Text(String),
}

impl fmt::Display for TimeoutSetting {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TimeoutSetting::Seconds(secs) => write!(f, "{}", secs),
            TimeoutSetting::Text(text) => f.write_str(text),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct UploadSection {
    #[serde(default)]
    pub enabled: Option<bool>,
    #[serde(default)]
    pub private: Option<bool>,
    #[serde(default)]
    pub force: Option<bool>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PipelineSection {
    #[serde(default)]
    pub auto_retry_failed: Option<bool>,
    #[serde(default)]
    pub parallel_generation: Option<bool>,
    #[serde(default)]
    pub max_concurrent_generations: Option<usize>,
}

/// The complete papersnipe.toml structure.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SnipeToml {
    #[serde(default)]
    pub paths: PathsSection,
    #[serde(default)]
    pub hub: HubSection,
    #[serde(default)]
    pub claude: ClaudeSection,
    #[serde(default)]
    pub upload: UploadSection,
    #[serde(default)]
    pub pipeline: PipelineSection,
}

impl SnipeToml {
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;
        Self::parse(&content)
    }

    pub fn parse(content: &str) -> Result<Self> {
        toml::from_str(content).context("Failed to parse papersnipe.toml")
    }

    /// Load `papersnipe.toml` from the project directory, or defaults if absent.
    pub fn load_or_default(project_dir: &Path) -> Result<Self> {
        let path = project_dir.join(CONFIG_FILE);
        if path.exists() {
            Self::load(&path)
        } else {
            Ok(Self::default())
        }
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        let content = toml::to_string_pretty(self).context("Failed to serialize papersnipe.toml")?;
        std::fs::write(path, content)
            .with_context(|| format!("Failed to write config file: {}", path.display()))?;
        Ok(())
    }

    /// A starter file with every default written out.
    pub fn starter() -> Self {
        Self {
            paths: PathsSection {
                database: Some(PathBuf::from(DEFAULT_DATABASE)),
                repos: None,
            },
            hub: HubSection::default(),
            claude: ClaudeSection {
                cli_path: None,
                init_enabled: Some(true),
                auto_approve: Some(true),
                auto_install: Some(false),
                install_method: Some(InstallMethod::Auto),
                init_timeout: Some(TimeoutSetting::Seconds(DEFAULT_INIT_TIMEOUT_SECS)),
            },
            upload: UploadSection {
                enabled: None,
                private: Some(false),
                force: Some(false),
            },
            pipeline: PipelineSection {
                auto_retry_failed: Some(false),
                parallel_generation: Some(false),
                max_concurrent_generations: Some(DEFAULT_MAX_CONCURRENT),
            },
        }
    }
}

/// Hosting-platform credentials and upload behaviour.
#[derive(Debug, Clone)]
pub struct HubSettings {
    pub token: String,
    pub username: String,
    pub upload_enabled: bool,
    pub private: bool,
    pub force: bool,
}

impl HubSettings {
    /// Why uploads cannot run, if they cannot.
    pub fn upload_blocker(&self) -> Option<String> {
        if !self.upload_enabled {
            return Some("Space upload is disabled".to_string());
        }
        if self.token.is_empty() {
            return Some("HF_TOKEN is required for Space upload".to_string());
        }
        if self.username.is_empty() {
            return Some("HF_USERNAME is required for Space upload".to_string());
        }
        None
    }
}

/// Coding-agent CLI settings.
#[derive(Debug, Clone)]
pub struct ClaudeSettings {
    pub cli_path: Option<PathBuf>,
    pub init_enabled: bool,
    pub auto_approve: bool,
    pub auto_install: bool,
    pub install_method: InstallMethod,
    /// `None` means no limit.
    pub init_timeout: Option<Duration>,
    pub api_key_present: bool,
    /// Directories from `PATH`, searched last when locating the CLI.
    pub search_path: Vec<PathBuf>,
}

impl ClaudeSettings {
    /// Flags placed before the prompt on every invocation.
    pub fn flags(&self) -> Vec<String> {
        let mut flags = vec!["--print".to_string()];
        if self.auto_approve {
            flags.push("--dangerously-skip-permissions".to_string());
        }
        flags
    }
}

#[derive(Debug, Clone)]
pub struct PipelineSettings {
    pub auto_retry_failed: bool,
    pub parallel_generation: bool,
    pub max_concurrent_generations: usize,
}

/// Resolved runtime configuration.
#[derive(Debug, Clone)]
pub struct Config {
    pub project_dir: PathBuf,
    pub database_path: PathBuf,
    pub repos_path: PathBuf,
    pub hub: HubSettings,
    pub claude: ClaudeSettings,
    pub pipeline: PipelineSettings,
    pub verbose: bool,
    /// Problems found while resolving (bad values replaced by defaults).
    resolve_warnings: Vec<String>,
}

impl Config {
    /// Resolve configuration from the project's file and the process environment.
    pub fn load(project_dir: &Path, verbose: bool) -> Result<Self> {
        let project_dir = project_dir
            .canonicalize()
            .context("Failed to resolve project directory")?;
        let toml = SnipeToml::load_or_default(&project_dir)?;
        Ok(Self::resolve(
            &project_dir,
            &toml,
            &|key| std::env::var(key).ok(),
            verbose,
        ))
    }

    /// Merge defaults, file values, and `env` lookups.
    pub fn resolve(
        project_dir: &Path,
        toml: &SnipeToml,
        env: &dyn Fn(&str) -> Option<String>,
        verbose: bool,
    ) -> Self {
        let mut warnings = Vec::new();
        let env = |key: &str| env(key).filter(|v| !v.trim().is_empty());
        let mut env_bool = |key: &str| -> Option<bool> {
            let raw = env(key)?;
            let parsed = parse_bool(&raw);
            if parsed.is_none() {
                warnings.push(format!("Ignoring {}='{}': expected true or false", key, raw));
            }
            parsed
        };

        let init_enabled = env_bool("CLAUDE_INIT_ENABLED")
            .or(toml.claude.init_enabled)
            .unwrap_or(true);
        let auto_approve = env_bool("CLAUDE_AUTO_APPROVE")
            .or(toml.claude.auto_approve)
            .unwrap_or(true);
        let auto_install = env_bool("CLAUDE_AUTO_INSTALL")
            .or(toml.claude.auto_install)
            .unwrap_or(false);
        let upload_flag = env_bool("SPACE_UPLOAD_ENABLED").or(toml.upload.enabled);
        let private = env_bool("SPACE_UPLOAD_PRIVATE")
            .or(toml.upload.private)
            .unwrap_or(false);
        let force = env_bool("SPACE_UPLOAD_FORCE")
            .or(toml.upload.force)
            .unwrap_or(false);
        let auto_retry_failed = env_bool("AUTO_RETRY_FAILED")
            .or(toml.pipeline.auto_retry_failed)
            .unwrap_or(false);
        let parallel_generation = env_bool("GRADIO_PARALLEL")
            .or(toml.pipeline.parallel_generation)
            .unwrap_or(false);

        let database_path = env("DATABASE_PATH")
            .map(PathBuf::from)
            .or_else(|| toml.paths.database.clone())
            .map(|p| absolutize(project_dir, &p))
            .unwrap_or_else(|| project_dir.join(DEFAULT_DATABASE));
        let repos_path = env("REPOS_PATH")
            .map(PathBuf::from)
            .or_else(|| toml.paths.repos.clone())
            .map(|p| absolutize(project_dir, &p))
            .unwrap_or_else(|| std::env::temp_dir().join("papersnipe_repos"));

        let token = env("HF_TOKEN")
            .or_else(|| toml.hub.token.clone())
            .unwrap_or_default();
        let username = env("HF_USERNAME")
            .or_else(|| toml.hub.username.clone())
            .unwrap_or_default();
        // Uploads default to on exactly when credentials are present.
        let upload_enabled =
            upload_flag.unwrap_or(!token.is_empty() && !username.is_empty());

        let install_method = match env("CLAUDE_INSTALL_METHOD") {
            Some(raw) => raw.parse::<InstallMethod>().unwrap_or_else(|e| {
                warnings.push(e.to_string());
                InstallMethod::Auto
            }),
            None => toml.claude.install_method.unwrap_or_default(),
        };

        let raw_timeout = env("CLAUDE_INIT_TIMEOUT")
            .or_else(|| toml.claude.init_timeout.as_ref().map(|t| t.to_string()));
        let init_timeout = match raw_timeout {
            Some(raw) => parse_timeout(&raw).unwrap_or_else(|| {
                warnings.push(format!(
                    "Invalid CLAUDE_INIT_TIMEOUT '{}', using {} seconds",
                    raw, DEFAULT_INIT_TIMEOUT_SECS
                ));
                Some(Duration::from_secs(DEFAULT_INIT_TIMEOUT_SECS))
            }),
            None => Some(Duration::from_secs(DEFAULT_INIT_TIMEOUT_SECS)),
        };

        let max_concurrent_generations = match env("GRADIO_MAX_CONCURRENT") {
            Some(raw) => raw.trim().parse().unwrap_or_else(|_| {
                warnings.push(format!(
                    "Invalid GRADIO_MAX_CONCURRENT '{}', using {}",
                    raw, DEFAULT_MAX_CONCURRENT
                ));
                DEFAULT_MAX_CONCURRENT
            }),
            None => toml
                .pipeline
                .max_concurrent_generations
                .unwrap_or(DEFAULT_MAX_CONCURRENT),
        };

        let cli_path = env("CLAUDE_CLI_PATH")
            .map(PathBuf::from)
            .or_else(|| toml.claude.cli_path.clone())
            .map(|p| expand_home(&p));

        Self {
            project_dir: project_dir.to_path_buf(),
            database_path,
            repos_path,
            hub: HubSettings {
                token,
                username,
                upload_enabled,
                private,
                force,
            },
            claude: ClaudeSettings {
                cli_path,
                init_enabled,
                auto_approve,
                auto_install,
                install_method,
                init_timeout,
                api_key_present: env("ANTHROPIC_API_KEY").is_some(),
                search_path: env("PATH")
                    .map(|raw| std::env::split_paths(&raw).collect())
                    .unwrap_or_default(),
            },
            pipeline: PipelineSettings {
                auto_retry_failed,
                parallel_generation,
                max_concurrent_generations,
            },
            verbose,
            resolve_warnings: warnings,
        }
    }

    /// Validate configuration and return any warnings.
    pub fn validate(&self) -> Vec<String> {
        let mut warnings = self.resolve_warnings.clone();

        if self.pipeline.max_concurrent_generations == 0 {
            warnings.push("max_concurrent_generations must be at least 1".to_string());
        }
        if self.hub.upload_enabled
            && let Some(reason) = self.hub.upload_blocker()
        {
            warnings.push(format!("Space upload enabled but unusable: {}", reason));
        }
        if self.claude.init_enabled && !self.claude.api_key_present {
            warnings.push(
                "ANTHROPIC_API_KEY is not set; the coding agent may fail to authenticate"
                    .to_string(),
            );
        }
        if let Some(path) = &self.claude.cli_path
            && !path.is_file()
        {
            warnings.push(format!(
                "Configured Claude CLI path does not exist: {}",
                path.display()
            ));
        }

        warnings
    }

    /// Concurrency for parallel app generation, never below one.
    pub fn generation_concurrency(&self) -> usize {
        self.pipeline.max_concurrent_generations.max(1)
    }
}

/// Accepts `true/1/yes` and `false/0/no`, case-insensitively.
pub fn parse_bool(raw: &str) -> Option<bool> {
    match raw.trim().to_lowercase().as_str() {
        "true" | "1" | "yes" => Some(true),
        "false" | "0" | "no" => Some(false),
        _ => None,
    }
}

/// Seconds as an integer, or one of `none/null/inf/infinite` for no limit.
/// Returns `None` when the value is unparsable.
pub fn parse_timeout(raw: &str) -> Option<Option<Duration>> {
    let value = raw.trim().to_lowercase();
    if matches!(value.as_str(), "none" | "null" | "inf" | "infinite") {
        return Some(None);
    }
    value.parse::<u64>().ok().map(|secs| Some(Duration::from_secs(secs)))
}

fn expand_home(path: &Path) -> PathBuf {
    match path.strip_prefix("~") {
        Ok(rest) => dirs::home_dir()
            .map(|home| home.join(rest))
            .unwrap_or_else(|| path.to_path_buf()),
        Err(_) => path.to_path_buf(),
    }
}

fn absolutize(base: &Path, path: &Path) -> PathBuf {
    let path = expand_home(path);
    if path.is_absolute() {
        path
    } else {
        base.join(path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use tempfile::tempdir;

    fn resolve_with(toml: &SnipeToml, vars: &[(&str, &str)]) -> Config {
        let map: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        Config::resolve(
            Path::new("/project"),
            toml,
            &|key| map.get(key).cloned(),
            false,
        )
    }

    #[test]
    fn test_defaults() {
        let config = resolve_with(&SnipeToml::default(), &[]);

        assert_eq!(config.database_path, PathBuf::from("/project/database.json"));
        assert!(config.claude.init_enabled);
        assert!(config.claude.auto_approve);
        assert!(!config.claude.auto_install);
        assert_eq!(config.claude.install_method, InstallMethod::Auto);
        assert_eq!(config.claude.init_timeout, Some(Duration::from_secs(1800)));
        assert!(!config.hub.upload_enabled);
        assert_eq!(config.pipeline.max_concurrent_generations, 3);
        assert!(!config.pipeline.parallel_generation);
    }

    #[test]
    fn test_env_overrides_file() {
        let toml = SnipeToml::parse(
            r#"
            [claude]
            auto_approve = false
            init_timeout = "60"

            [pipeline]
            max_concurrent_generations = 5
            "#,
        )
        .unwrap();

        let config = resolve_with(
            &toml,
            &[("CLAUDE_AUTO_APPROVE", "yes"), ("GRADIO_MAX_CONCURRENT", "2")],
        );

        assert!(config.claude.auto_approve);
        assert_eq!(config.claude.init_timeout, Some(Duration::from_secs(60)));
        assert_eq!(config.pipeline.max_concurrent_generations, 2);
    }

    #[test]
    fn test_timeout_none_means_unbounded() {
        let config = resolve_with(&SnipeToml::default(), &[("CLAUDE_INIT_TIMEOUT", "None")]);
        assert_eq!(config.claude.init_timeout, None);
    }

    #[test]
    fn test_invalid_timeout_falls_back_with_warning() {
        let config = resolve_with(&SnipeToml::default(), &[("CLAUDE_INIT_TIMEOUT", "soon")]);
        assert_eq!(config.claude.init_timeout, Some(Duration::from_secs(1800)));
        assert!(config.validate().iter().any(|w| w.contains("soon")));
    }

    #[test]
    fn test_upload_auto_enabled_with_credentials() {
        let config = resolve_with(
            &SnipeToml::default(),
            &[("HF_TOKEN", "hf_abc"), ("HF_USERNAME", "alice")],
        );
        assert!(config.hub.upload_enabled);
        assert_eq!(config.hub.upload_blocker(), None);
    }

    #[test]
    fn test_upload_explicitly_disabled() {
        let config = resolve_with(
            &SnipeToml::default(),
            &[
                ("HF_TOKEN", "hf_abc"),
                ("HF_USERNAME", "alice"),
                ("SPACE_UPLOAD_ENABLED", "false"),
            ],
        );
        assert_eq!(
            config.hub.upload_blocker().as_deref(),
            Some("Space upload is disabled")
        );
    }

    #[test]
    fn test_upload_enabled_without_username_is_blocked() {
        let config = resolve_with(
            &SnipeToml::default(),
            &[("SPACE_UPLOAD_ENABLED", "true"), ("HF_TOKEN", "hf_abc")],
        );
        assert_eq!(
            config.hub.upload_blocker().as_deref(),
            Some("HF_USERNAME is required for Space upload")
        );
        assert!(config.validate().iter().any(|w| w.contains("HF_USERNAME")));
    }

    #[test]
    fn test_relative_paths_resolve_against_project() {
        let config = resolve_with(
            &SnipeToml::default(),
            &[("DATABASE_PATH", "state/db.json"), ("REPOS_PATH", "/abs/repos")],
        );
        assert_eq!(config.database_path, PathBuf::from("/project/state/db.json"));
        assert_eq!(config.repos_path, PathBuf::from("/abs/repos"));
    }

    #[test]
    fn test_invalid_install_method_warns() {
        let config = resolve_with(&SnipeToml::default(), &[("CLAUDE_INSTALL_METHOD", "brew")]);
        assert_eq!(config.claude.install_method, InstallMethod::Auto);
        assert!(config.validate().iter().any(|w| w.contains("brew")));
    }

    #[test]
    fn test_invalid_bool_is_ignored_with_warning() {
        let config = resolve_with(&SnipeToml::default(), &[("CLAUDE_INIT_ENABLED", "maybe")]);
        assert!(config.claude.init_enabled);
        assert!(config.validate().iter().any(|w| w.contains("maybe")));
    }

    #[test]
    fn test_claude_flags() {
        let mut config = resolve_with(&SnipeToml::default(), &[]);
        assert_eq!(
            config.claude.flags(),
            vec!["--print", "--dangerously-skip-permissions"]
        );
        config.claude.auto_approve = false;
        assert_eq!(config.claude.flags(), vec!["--print"]);
    }

    #[test]
    fn test_parse_bool_variants() {
        assert_eq!(parse_bool("TRUE"), Some(true));
        assert_eq!(parse_bool("1"), Some(true));
        assert_eq!(parse_bool("no"), Some(false));
        assert_eq!(parse_bool("maybe"), None);
    }

    #[test]
    fn test_install_method_round_trip_display() {
        for method in [InstallMethod::Auto, InstallMethod::Curl, InstallMethod::Skip] {
            assert_eq!(method.to_string().parse::<InstallMethod>().unwrap(), method);
        }
    }

    #[test]
    fn test_starter_file_saves_and_parses() {
        let dir = tempdir().unwrap();
        let path = dir.path().join(CONFIG_FILE);
        SnipeToml::starter().save(&path).unwrap();

        let loaded = SnipeToml::load(&path).unwrap();
        assert_eq!(loaded.pipeline.max_concurrent_generations, Some(3));
        assert_eq!(loaded.claude.install_method, Some(InstallMethod::Auto));
        assert_eq!(loaded.claude.init_timeout, Some(TimeoutSetting::Seconds(1800)));
    }

    #[test]
    fn test_integer_and_string_timeouts_accepted() {
        let toml = SnipeToml::parse("[claude]\ninit_timeout = 900\n").unwrap();
        assert_eq!(toml.claude.init_timeout, Some(TimeoutSetting::Seconds(900)));
        let config = resolve_with(&toml, &[]);
        assert_eq!(config.claude.init_timeout, Some(Duration::from_secs(900)));

        let toml = SnipeToml::parse("[claude]\ninit_timeout = \"none\"\n").unwrap();
        let config = resolve_with(&toml, &[]);
        assert_eq!(config.claude.init_timeout, None);
    }

    #[test]
    fn test_load_or_default_without_file() {
        let dir = tempdir().unwrap();
        let toml = SnipeToml::load_or_default(dir.path()).unwrap();
        assert!(toml.paths.database.is_none());
    }
}
