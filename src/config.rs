use crate::package_manager::parser::{flatpak, snap, SkipPatterns};
use crate::package_manager::BackendKind;
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// 每次运行的输出日志目录
    pub log_dir: PathBuf,
    /// 整体超时，超过后按取消处理
    pub timeout_secs: Option<u64>,
    /// 取消后等待后端自行结束的时间
    pub cancel_grace_secs: u64,
    pub backends: BackendToggles,
    pub skip: SkipConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            log_dir: PathBuf::from("/tmp/update_logs"),
            timeout_secs: None,
            cancel_grace_secs: 10,
            backends: BackendToggles::default(),
            skip: SkipConfig::default(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BackendToggles {
    pub apt: bool,
    pub dnf: bool,
    pub pacman: bool,
    pub flatpak: bool,
    pub snap: bool,
}

impl Default for BackendToggles {
    fn default() -> Self {
        Self {
            apt: true,
            dnf: true,
            pacman: true,
            flatpak: true,
            snap: true,
        }
    }
}

impl BackendToggles {
    pub fn is_enabled(&self, kind: BackendKind) -> bool {
        match kind {
            BackendKind::Apt => self.apt,
            BackendKind::Dnf => self.dnf,
            BackendKind::Pacman => self.pacman,
            BackendKind::Flatpak => self.flatpak,
            BackendKind::Snap => self.snap,
        }
    }
}

/// 未设置时使用内置的跳过规则；设置为空列表表示不跳过任何包
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct SkipConfig {
    pub flatpak: Option<Vec<String>>,
    pub snap: Option<Vec<String>>,
}

impl SkipConfig {
    pub fn flatpak_patterns(&self) -> SkipPatterns {
        match &self.flatpak {
            Some(patterns) => SkipPatterns::new(patterns),
            None => SkipPatterns::new(flatpak::DEFAULT_SKIP),
        }
    }

    pub fn snap_patterns(&self) -> SkipPatterns {
        match &self.snap {
            Some(patterns) => SkipPatterns::new(patterns),
            None => SkipPatterns::new(snap::DEFAULT_SKIP),
        }
    }
}

impl Config {
    /// `~/.config/sysupdate/config.toml`
    pub fn default_path() -> PathBuf {
        let home = std::env::var("HOME").unwrap_or_else(|_| ".".to_string());
        PathBuf::from(home).join(".config/sysupdate/config.toml")
    }

    /// 文件存在则读取，否则使用默认值；格式错误时报错
    pub fn load_or_default(path: &Path) -> Result<Self> {
        if !path.exists() {
            log::debug!("配置文件 {} 不存在，使用默认配置", path.display());
            return Ok(Self::default());
        }
        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file {}", path.display()))?;
        let config: Config = toml::from_str(&content)
            .with_context(|| format!("Invalid config file {}", path.display()))?;
        Ok(config)
    }

    pub fn timeout(&self) -> Option<Duration> {
        self.timeout_secs.filter(|&s| s > 0).map(Duration::from_secs)
    }

    pub fn cancel_grace(&self) -> Duration {
        Duration::from_secs(self.cancel_grace_secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_missing_file_gives_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let config = Config::load_or_default(&dir.path().join("config.toml")).unwrap();
        assert_eq!(config.log_dir, PathBuf::from("/tmp/update_logs"));
        assert_eq!(config.cancel_grace(), Duration::from_secs(10));
        assert!(config.timeout().is_none());
        assert!(BackendKind::ALL.iter().all(|&k| config.backends.is_enabled(k)));
        assert!(config.skip.flatpak_patterns().matches("org.gnome.Platform.Locale"));
    }

    #[test]
    fn test_overrides() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(
            file,
            r#"
log_dir = "/var/log/sysupdate"
timeout_secs = 3600

[backends]
snap = false

[skip]
flatpak = []
snap = ["lxd", "gnome-*"]
"#
        )
        .unwrap();

        let config = Config::load_or_default(file.path()).unwrap();
        assert_eq!(config.log_dir, PathBuf::from("/var/log/sysupdate"));
        assert_eq!(config.timeout(), Some(Duration::from_secs(3600)));
        assert_eq!(config.cancel_grace_secs, 10);
        assert!(!config.backends.is_enabled(BackendKind::Snap));
        assert!(config.backends.is_enabled(BackendKind::Apt));

        assert!(!config.skip.flatpak_patterns().matches("org.gnome.Platform.Locale"));
        let snap = config.skip.snap_patterns();
        assert!(snap.matches("lxd"));
        assert!(snap.matches("gnome-42-2204"));
        assert!(!snap.matches("core22"));
    }

    #[test]
    fn test_malformed_file_is_an_error() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, "timeout_secs = \"soon\"").unwrap();
        let err = Config::load_or_default(file.path()).unwrap_err();
        assert!(err.to_string().starts_with("Invalid config file"));
    }
}
