use std::path::PathBuf;
use std::time::Duration;

pub const DEFAULT_WORKERS: usize = 4;
pub const DEFAULT_TIMEOUT_SECS: u64 = 30;

/// Runtime settings, resolved once in `main` from flags, environment and defaults.
#[derive(Debug, Clone)]
pub struct Config {
    pub database_path: PathBuf,
    /// `None` applies the migrations built into the binary.
    pub migrations_dir: Option<PathBuf>,
    /// Upper bound on concurrent platform fetches.
    pub workers: usize,
    pub fetch_timeout: Duration,
    pub user_agent: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            database_path: Self::default_database_path(),
            migrations_dir: Self::default_migrations_dir(),
            workers: DEFAULT_WORKERS,
            fetch_timeout: Duration::from_secs(DEFAULT_TIMEOUT_SECS),
            user_agent: format!("hunt/{}", env!("CARGO_PKG_VERSION")),
        }
    }
}

impl Config {
    pub fn default_database_path() -> PathBuf {
        // Use XDG data directory or fallback
        if let Some(proj_dirs) = directories::ProjectDirs::from("", "", "hunt") {
            proj_dirs.data_dir().join("hunt.db")
        } else {
            PathBuf::from("hunt.db")
        }
    }

    /// The source tree's `migrations/` while it is still around.
    pub fn default_migrations_dir() -> Option<PathBuf> {
        let dir = PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("migrations");
        dir.is_dir().then_some(dir)
    }

    pub fn with_database_path(mut self, path: Option<PathBuf>) -> Self {
        if let Some(path) = path {
            self.database_path = path;
        }
        self
    }

    pub fn with_migrations_dir(mut self, dir: Option<PathBuf>) -> Self {
        if let Some(dir) = dir {
            self.migrations_dir = Some(dir);
        }
        self
    }

    pub fn with_workers(mut self, workers: Option<usize>) -> Self {
        if let Some(workers) = workers {
            self.workers = workers.max(1);
        }
        self
    }

    pub fn with_fetch_timeout_secs(mut self, secs: Option<u64>) -> Self {
        if let Some(secs) = secs {
            self.fetch_timeout = Duration::from_secs(secs.max(1));
        }
        self
    }

    pub fn with_user_agent(mut self, user_agent: Option<String>) -> Self {
        if let Some(ua) = user_agent.filter(|ua| !ua.trim().is_empty()) {
            self.user_agent = ua;
        }
        self
    }
}
