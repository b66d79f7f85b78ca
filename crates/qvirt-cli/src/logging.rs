//! Tracing setup.

use tracing_subscriber::EnvFilter;

/// Log output format.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TracingFormat {
    /// Human-readable lines.
    Console,
    /// One JSON object per event.
    Json,
}

/// Tracing configuration.
#[derive(Debug, Clone)]
pub struct TracingConfig {
    /// Filter directive from `RUST_LOG`, if set.
    pub directive: Option<String>,
    /// Level used when no directive is set.
    pub level: &'static str,
    pub format: TracingFormat,
}

impl Default for TracingConfig {
    fn default() -> Self {
        Self {
            directive: None,
            level: "warn",
            format: TracingFormat::Console,
        }
    }
}

impl TracingConfig {
    /// Read `RUST_LOG` and `QVIRT_LOG_FORMAT` ("console" or "json").
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let format = match lookup("QVIRT_LOG_FORMAT").as_deref() {
            Some("json") => TracingFormat::Json,
            _ => TracingFormat::Console,
        };
        Self {
            directive: lookup("RUST_LOG").filter(|d| !d.is_empty()),
            format,
            ..Self::default()
        }
    }

    /// Level for a `-v` count. `RUST_LOG` still takes precedence.
    pub fn with_verbosity(mut self, verbose: u8) -> Self {
        self.level = match verbose {
            0 => "warn",
            1 => "info",
            2 => "debug",
            _ => "trace",
        };
        self
    }

    fn filter(&self) -> EnvFilter {
        self.directive
            .as_deref()
            .and_then(|d| EnvFilter::try_new(d).ok())
            .unwrap_or_else(|| EnvFilter::new(self.level))
    }

    /// Install the global subscriber.
    pub fn init(self) -> anyhow::Result<()> {
        let builder = tracing_subscriber::fmt()
            .with_env_filter(self.filter())
            .with_target(false)
            .with_writer(std::io::stderr);
        match self.format {
            TracingFormat::Console => builder.try_init(),
            TracingFormat::Json => builder.json().try_init(),
        }
        .map_err(|e| anyhow::anyhow!("failed to initialize logging: {e}"))
    }
}
