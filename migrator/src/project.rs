//! Build identity

pub const NAME: &str = "etcd-cluster-migrator";

pub fn version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}

/// Commit the binary was built from, injected through `GIT_SHA` at build time
pub fn git_sha() -> &'static str {
    option_env!("GIT_SHA").unwrap_or("n/a")
}

/// `name:version - sha`
pub fn build_identity() -> String {
    format!("{}:{} - {}", NAME, version(), git_sha())
}
