/// The distributor of this client build, reported in the user agent.
///
/// Common values include `nixpkgs` and `dev`.
pub const DISTRIBUTOR: &str = if let Some(distro) = option_env!("NIXCACHE_DISTRIBUTOR") {
    distro
} else {
    "unknown"
};
