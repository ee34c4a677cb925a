//! Probe adapter: external checks wrapped as structured results.
//!
//! Each probe shells out to the package manager (or performs one bounded
//! network request) and reports a structured outcome without interpreting
//! it; classification is the engine's job. No probe retries internally and
//! no probe has a timeout except the connectivity check - a hung
//! package-manager invocation stalls the daemon until it exits, by design.

mod parse;

pub use parse::{is_valid_url, parse_depclean_report, parse_update_report};

use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use tokio::process::Command;
use tracing::{debug, warn};

use upwatch_core::{Config, OrphanSet, UpdateSet};

/// Fixed flag set for the update dry-run. Held constant so the output stays
/// parseable by `parse_update_report`.
pub const UPDATE_DRY_RUN_ARGS: [&str; 12] = [
    "--quiet",
    "--update",
    "--deep",
    "--newuse",
    "--pretend",
    "--getbinpkg",
    "--rebuilt-binaries",
    "--backtrack=100",
    "--with-bdeps=y",
    "--misspell-suggestion=n",
    "--fuzzy-search=n",
    "@world",
];

/// Fixed flag set for the orphan dry-run.
pub const DEPCLEAN_DRY_RUN_ARGS: [&str; 2] = ["--depclean", "--pretend"];

/// The four external checks the engine consumes.
///
/// This is the seam between the engine and the outside world; tests script
/// it, production uses [`EmergeProbes`].
#[async_trait]
pub trait ProbeSet: Send + Sync {
    /// Bounded-timeout reachability test. Any successful connection counts,
    /// including HTTP error responses; only transport failures are offline.
    async fn check_connectivity(&self) -> bool;

    /// Runs the repository sync. Failure is reported, never retried.
    async fn sync_repositories(&self) -> Result<(), ProbeError>;

    /// Runs the update dry-run and parses its merge plan.
    async fn check_updates(&self) -> Result<UpdateSet, ProbeError>;

    /// Runs the depclean dry-run and extracts removable packages.
    async fn check_orphans(&self) -> Result<OrphanSet, ProbeError>;
}

/// Errors from probe invocations. Surfaced as tagged failures, never
/// panics; the engine maps them to terminal status codes.
#[derive(Debug, thiserror::Error)]
pub enum ProbeError {
    #[error("failed to run {command}: {error}")]
    Spawn { command: String, error: String },

    #[error("{command} exited with status {code:?}")]
    Failed { command: String, code: Option<i32> },

    #[error("failed to build HTTP client: {0}")]
    HttpClient(String),
}

/// Production probes backed by `emerge` child processes and one HTTP client.
pub struct EmergeProbes {
    http: reqwest::Client,
    connectivity_url: String,
    connectivity_timeout: Duration,
}

impl EmergeProbes {
    /// Builds the probe set from configuration.
    ///
    /// An invalid configured endpoint silently falls back to the default
    /// (fail-open).
    pub fn new(config: &Config) -> Result<Self, ProbeError> {
        let connectivity_url = if is_valid_url(&config.connectivity_url) {
            config.connectivity_url.clone()
        } else {
            warn!(
                configured = %config.connectivity_url,
                fallback = upwatch_core::config::DEFAULT_CONNECTIVITY_URL,
                "Configured connectivity URL is invalid, using default"
            );
            upwatch_core::config::DEFAULT_CONNECTIVITY_URL.to_string()
        };

        let http = reqwest::Client::builder()
            .timeout(config.connectivity_timeout())
            .build()
            .map_err(|e| ProbeError::HttpClient(e.to_string()))?;

        Ok(Self {
            http,
            connectivity_url,
            connectivity_timeout: config.connectivity_timeout(),
        })
    }

    /// Returns the endpoint the connectivity probe targets.
    pub fn connectivity_url(&self) -> &str {
        &self.connectivity_url
    }

    /// Runs `emerge` with the given arguments, capturing combined output.
    async fn run_emerge(&self, args: &[&str]) -> Result<Vec<String>, ProbeError> {
        let output = Command::new("emerge")
            .args(args)
            .stdin(Stdio::null())
            .output()
            .await
            .map_err(|e| ProbeError::Spawn {
                command: format!("emerge {}", args.join(" ")),
                error: e.to_string(),
            })?;

        // stdout and stderr are both part of the report; the regexes in
        // `parse` must see interleaved lines from either stream.
        let mut lines: Vec<String> = String::from_utf8_lossy(&output.stdout)
            .lines()
            .map(str::to_string)
            .collect();
        lines.extend(
            String::from_utf8_lossy(&output.stderr)
                .lines()
                .map(str::to_string),
        );

        debug!(
            args = args.join(" "),
            status = ?output.status.code(),
            lines = lines.len(),
            "emerge invocation finished"
        );

        Ok(lines)
    }
}

#[async_trait]
impl ProbeSet for EmergeProbes {
    async fn check_connectivity(&self) -> bool {
        match self
            .http
            .get(&self.connectivity_url)
            .timeout(self.connectivity_timeout)
            .send()
            .await
        {
            // HTTP error statuses (429, 5xx, ...) still prove reachability.
            Ok(_) => true,
            Err(e) => {
                debug!(url = %self.connectivity_url, error = %e, "Connectivity check failed");
                false
            }
        }
    }

    async fn sync_repositories(&self) -> Result<(), ProbeError> {
        let status = Command::new("emerge")
            .arg("--sync")
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status()
            .await
            .map_err(|e| ProbeError::Spawn {
                command: "emerge --sync".to_string(),
                error: e.to_string(),
            })?;

        if status.success() {
            Ok(())
        } else {
            Err(ProbeError::Failed {
                command: "emerge --sync".to_string(),
                code: status.code(),
            })
        }
    }

    async fn check_updates(&self) -> Result<UpdateSet, ProbeError> {
        // Exit status is deliberately ignored: the dry-run exits non-zero
        // on blocked configurations whose output we still need to parse.
        let lines = self.run_emerge(&UPDATE_DRY_RUN_ARGS).await?;
        Ok(parse_update_report(lines.iter().map(String::as_str)))
    }

    async fn check_orphans(&self) -> Result<OrphanSet, ProbeError> {
        let lines = self.run_emerge(&DEPCLEAN_DRY_RUN_ARGS).await?;
        Ok(parse_depclean_report(lines.iter().map(String::as_str)))
    }
}
