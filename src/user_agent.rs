//! Shared User-Agent strings for discovery and artifact HTTP clients.
//!
//! Discovery traffic identifies the tool; artifact fetches present a browser
//! identity picked at random once per retrieval.

use rand::seq::SliceRandom;

/// Browser identities rotated across artifact retrievals.
pub const BROWSER_USER_AGENTS: [&str; 6] = [
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36",
    "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36",
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64; rv:121.0) Gecko/20100101 Firefox/121.0",
    "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) AppleWebKit/605.1.15 (KHTML, like Gecko) Version/17.2 Safari/605.1.15",
    "Mozilla/5.0 (X11; Linux x86_64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36",
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36 Edg/120.0.0.0",
];

/// `Accept` header sent with artifact requests.
pub const BROWSER_ACCEPT: &str =
    "text/html,application/xhtml+xml,application/xml;q=0.9,application/pdf,*/*;q=0.8";

/// `Accept-Language` header sent with artifact requests.
pub const BROWSER_ACCEPT_LANGUAGE: &str = "en-US,en;q=0.5";

/// User-Agent for discovery API requests (identifies the tool).
#[must_use]
pub fn discovery_user_agent() -> String {
    let version = env!("CARGO_PKG_VERSION");
    format!("PDF-harvester/{version}")
}

/// Picks one browser User-Agent at random.
#[must_use]
pub fn random_browser_user_agent() -> &'static str {
    BROWSER_USER_AGENTS
        .choose(&mut rand::thread_rng())
        .copied()
        .unwrap_or(BROWSER_USER_AGENTS[0])
}
