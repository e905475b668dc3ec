use std::{
    path::{Path, PathBuf},
    time::Duration,
};

use serde::Deserialize;

const fn default_create() -> bool {
    true
}

const fn default_max_name_attempts() -> u32 {
    100
}

/// Staged files this old are left over from a crashed writer
const fn default_orphan_max_age_secs() -> u64 {
    36 * 60 * 60
}

/// Configuration for a maildir queue
///
/// ```ron
/// (
///     path: "/var/spool/courier",
///     create: true,
///     max_name_attempts: 100,
///     orphan_max_age_secs: 129600,
/// )
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MaildirConfig {
    path: PathBuf,
    create: bool,
    max_name_attempts: u32,
    orphan_max_age_secs: u64,
}

impl Default for MaildirConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from("/var/spool/courier"),
            create: default_create(),
            max_name_attempts: default_max_name_attempts(),
            orphan_max_age_secs: default_orphan_max_age_secs(),
        }
    }
}

impl<'de> Deserialize<'de> for MaildirConfig {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        #[derive(Deserialize)]
        struct MaildirConfigHelper {
            path: PathBuf,
            #[serde(default = "default_create")]
            create: bool,
            #[serde(default = "default_max_name_attempts")]
            max_name_attempts: u32,
            #[serde(default = "default_orphan_max_age_secs")]
            orphan_max_age_secs: u64,
        }

        let helper = MaildirConfigHelper::deserialize(deserializer)?;
        Self::validate_path(&helper.path).map_err(serde::de::Error::custom)?;
        if helper.max_name_attempts == 0 {
            return Err(serde::de::Error::custom(
                "max_name_attempts must be at least 1",
            ));
        }

        Ok(Self {
            path: helper.path,
            create: helper.create,
            max_name_attempts: helper.max_name_attempts,
            orphan_max_age_secs: helper.orphan_max_age_secs,
        })
    }
}

impl MaildirConfig {
    /// Validate a queue path
    ///
    /// # Security Checks
    /// - Rejects paths containing `..` (directory traversal)
    /// - Rejects paths to sensitive system directories
    /// - Ensures the path is absolute
    ///
    /// # Errors
    /// Returns an error if the path is invalid or potentially dangerous
    fn validate_path(path: &Path) -> anyhow::Result<()> {
        if path
            .components()
            .any(|component| component == std::path::Component::ParentDir)
        {
            return Err(anyhow::anyhow!(
                "Queue path cannot contain '..' components: {}",
                path.display()
            ));
        }

        if !path.is_absolute() {
            return Err(anyhow::anyhow!(
                "Queue path must be absolute: {}",
                path.display()
            ));
        }

        #[cfg(unix)]
        let sensitive_prefixes = [
            "/etc", "/bin", "/sbin", "/usr/bin", "/usr/sbin", "/boot", "/sys", "/proc", "/dev",
        ];

        #[cfg(windows)]
        let sensitive_prefixes = [
            "c:\\windows",
            "c:\\program files",
            "c:\\program files (x86)",
            "c:\\programdata",
        ];

        #[cfg(unix)]
        let blocked = sensitive_prefixes
            .iter()
            .find(|prefix| path.starts_with(prefix));

        #[cfg(windows)]
        let blocked = {
            let lowered = path.to_string_lossy().to_lowercase();
            sensitive_prefixes
                .iter()
                .find(|prefix| Path::new(&lowered).starts_with(prefix))
        };

        #[cfg(not(any(unix, windows)))]
        let blocked: Option<&&str> = None;

        if let Some(prefix) = blocked {
            return Err(anyhow::anyhow!(
                "Queue path cannot be in system directory {prefix}: {}",
                path.display()
            ));
        }

        Ok(())
    }

    /// Create a new `MaildirConfig` builder
    #[must_use]
    pub fn builder() -> MaildirConfigBuilder {
        MaildirConfigBuilder::default()
    }

    /// Root of the maildir
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Whether missing directories are created on open
    #[must_use]
    pub const fn create(&self) -> bool {
        self.create
    }

    /// How many names staging tries before giving up
    #[must_use]
    pub const fn max_name_attempts(&self) -> u32 {
        self.max_name_attempts
    }

    #[must_use]
    pub const fn orphan_max_age(&self) -> Duration {
        Duration::from_secs(self.orphan_max_age_secs)
    }
}

/// Builder for `MaildirConfig`
#[derive(Debug)]
pub struct MaildirConfigBuilder {
    config: MaildirConfig,
}

impl Default for MaildirConfigBuilder {
    fn default() -> Self {
        Self {
            config: MaildirConfig {
                path: PathBuf::new(),
                ..MaildirConfig::default()
            },
        }
    }
}

impl MaildirConfigBuilder {
    /// Set the queue directory path
    #[must_use]
    pub fn path(mut self, path: impl Into<PathBuf>) -> Self {
        self.config.path = path.into();
        self
    }

    #[must_use]
    pub const fn create(mut self, create: bool) -> Self {
        self.config.create = create;
        self
    }

    #[must_use]
    pub const fn max_name_attempts(mut self, attempts: u32) -> Self {
        self.config.max_name_attempts = attempts;
        self
    }

    #[must_use]
    pub const fn orphan_max_age(mut self, age: Duration) -> Self {
        self.config.orphan_max_age_secs = age.as_secs();
        self
    }

    /// Build the final `MaildirConfig`
    ///
    /// # Errors
    /// Returns an error if the path is invalid or potentially dangerous, or
    /// if no name attempts are allowed
    pub fn build(self) -> anyhow::Result<MaildirConfig> {
        MaildirConfig::validate_path(&self.config.path)?;
        anyhow::ensure!(
            self.config.max_name_attempts > 0,
            "max_name_attempts must be at least 1"
        );
        Ok(self.config)
    }
}
