//! Host detection from well-known platform environment variables.

use sluice_core::Host;
use tracing::debug;

/// Environment variables that identify a host, checked in order.
const MARKERS: &[(&str, Host)] = &[
    ("VERCEL", Host::Vercel),
    ("NETLIFY", Host::Netlify),
    ("AWS_LAMBDA_FUNCTION_NAME", Host::AwsLambda),
    ("CF_PAGES", Host::CloudflareWorkers),
    ("CLOUDFLARE_WORKER", Host::CloudflareWorkers),
];

/// Detects the host from the process environment, defaulting to
/// [`Host::Server`].
pub fn detect_host() -> Host {
    detect_with(|name| std::env::var_os(name).is_some_and(|v| !v.is_empty()))
}

fn detect_with(is_set: impl Fn(&str) -> bool) -> Host {
    let host = MARKERS
        .iter()
        .find(|(name, _)| is_set(name))
        .map_or(Host::Server, |(_, host)| *host);
    debug!(host = %host, "Detected host");
    host
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn no_markers_means_server() {
        assert_eq!(detect_with(|_| false), Host::Server);
    }

    #[test]
    fn first_marker_wins() {
        assert_eq!(detect_with(|name| name == "NETLIFY"), Host::Netlify);
        assert_eq!(
            detect_with(|name| name == "AWS_LAMBDA_FUNCTION_NAME" || name == "CF_PAGES"),
            Host::AwsLambda
        );
    }
}
