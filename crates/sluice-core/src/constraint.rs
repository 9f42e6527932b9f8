//! Host execution limits.
//!
//! One [`ConstraintProfile`] is selected per host when the process starts
//! and stays read-only for the lifetime of the process. Profiles are looked
//! up by host identifier through [`profile_for`]; unrecognised hosts fall
//! back to the most permissive profile so they can still attempt to run.

use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use tracing::warn;

/// Static description of what a host allows a dispatch to do.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConstraintProfile {
    /// Hard ceiling on a single handler execution. `None` means unlimited.
    pub max_execution_time: Option<Duration>,
    /// Whether work may continue after the inbound request has been answered.
    pub supports_background_execution: bool,
    /// Whether long-lived connections (the push channel) may be held open.
    pub supports_persistent_connection: bool,
    /// Whether a writable file system is available.
    pub supports_file_system: bool,
    /// Ceiling on concurrently handled requests. `None` means unbounded.
    pub max_concurrent_operations: Option<usize>,
}

impl ConstraintProfile {
    /// The most permissive profile: no limits, every capability available.
    pub const PERMISSIVE: Self = Self {
        max_execution_time: None,
        supports_background_execution: true,
        supports_persistent_connection: true,
        supports_file_system: true,
        max_concurrent_operations: None,
    };

    /// Returns `true` if a run of `expected` would exceed this profile's
    /// execution ceiling.
    pub fn exceeds_execution_limit(&self, expected: Duration) -> bool {
        self.max_execution_time
            .is_some_and(|limit| expected > limit)
    }
}

impl Default for ConstraintProfile {
    fn default() -> Self {
        Self::PERMISSIVE
    }
}

/// Hosts with a known constraint profile.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Host {
    /// A long-running server process (bare metal, container, VM).
    Server,
    /// Vercel serverless functions.
    Vercel,
    /// Netlify functions.
    Netlify,
    /// Cloudflare Workers.
    CloudflareWorkers,
    /// AWS Lambda.
    AwsLambda,
}

impl Host {
    /// Returns the canonical identifier of this host.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Server => "server",
            Self::Vercel => "vercel",
            Self::Netlify => "netlify",
            Self::CloudflareWorkers => "cloudflare-workers",
            Self::AwsLambda => "aws-lambda",
        }
    }

    /// Returns the constraint profile of this host.
    pub fn profile(&self) -> ConstraintProfile {
        match self {
            Self::Server => ConstraintProfile::PERMISSIVE,
            Self::Vercel | Self::Netlify => ConstraintProfile {
                max_execution_time: Some(Duration::from_secs(10)),
                supports_background_execution: false,
                supports_persistent_connection: false,
                supports_file_system: false,
                max_concurrent_operations: None,
            },
            // `waitUntil` lets work outlive the response.
            Self::CloudflareWorkers => ConstraintProfile {
                max_execution_time: Some(Duration::from_secs(30)),
                supports_background_execution: true,
                supports_persistent_connection: false,
                supports_file_system: false,
                max_concurrent_operations: Some(6),
            },
            Self::AwsLambda => ConstraintProfile {
                max_execution_time: Some(Duration::from_secs(900)),
                supports_background_execution: false,
                supports_persistent_connection: false,
                supports_file_system: true,
                max_concurrent_operations: Some(1),
            },
        }
    }
}

impl fmt::Display for Host {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Host {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "server" | "node" | "bun" | "deno" | "docker" => Ok(Self::Server),
            "vercel" => Ok(Self::Vercel),
            "netlify" => Ok(Self::Netlify),
            "cloudflare-workers" | "cloudflare" | "workers" => Ok(Self::CloudflareWorkers),
            "aws-lambda" | "lambda" => Ok(Self::AwsLambda),
            _ => Err(()),
        }
    }
}

/// Looks up the constraint profile for a host identifier.
///
/// Never fails: an unknown host yields [`ConstraintProfile::PERMISSIVE`]
/// and a warning.
pub fn profile_for(host: &str) -> ConstraintProfile {
    match host.parse::<Host>() {
        Ok(known) => known.profile(),
        Err(()) => {
            warn!(
                host = %host,
                "Unknown host, falling back to the most permissive constraint profile"
            );
            ConstraintProfile::PERMISSIVE
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn known_hosts_resolve_by_alias() {
        assert_eq!(profile_for("lambda"), Host::AwsLambda.profile());
        assert_eq!(profile_for(" Vercel "), Host::Vercel.profile());
        assert_eq!(profile_for("node"), ConstraintProfile::PERMISSIVE);
    }

    #[test]
    fn unknown_host_is_permissive() {
        let profile = profile_for("some-new-edge-runtime");
        assert_eq!(profile, ConstraintProfile::PERMISSIVE);
        assert!(profile.supports_background_execution);
        assert_eq!(profile.max_execution_time, None);
    }

    #[test]
    fn execution_limit_check() {
        let vercel = Host::Vercel.profile();
        assert!(vercel.exceeds_execution_limit(Duration::from_secs(11)));
        assert!(!vercel.exceeds_execution_limit(Duration::from_secs(10)));
        assert!(!ConstraintProfile::PERMISSIVE.exceeds_execution_limit(Duration::MAX));
    }
}
