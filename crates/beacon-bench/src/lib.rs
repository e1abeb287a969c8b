//! Shared fixtures for the Beacon benchmarks.

use beacon_core::{AudienceSpec, Identity};

/// Prefix used by every benchmark.
pub const PREFIX: &str = "bench:";

/// Audience with all eight flags set.
#[must_use]
pub fn full_audience() -> AudienceSpec {
    AudienceSpec::from_flags([
        "subscribe-session",
        "subscribe-user",
        "subscribe-group",
        "subscribe-broadcast",
        "publish-session",
        "publish-user",
        "publish-group",
        "publish-broadcast",
    ])
}

/// Fully authenticated identity number `n`.
#[must_use]
pub fn identity(n: usize) -> Identity {
    Identity::anonymous()
        .with_session(format!("session-{n}"))
        .with_user(format!("user-{n}"))
        .with_group(format!("group-{}", n % 16))
}
