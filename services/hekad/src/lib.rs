//! Daemon harness library: stage registry and concrete stage
//! implementations backing the `hekad` binary (§10). `main.rs` stays a
//! thin CLI/bootstrap shell over what lives here, the way `forwarder` and
//! `receiver` split their own binaries.

pub mod registry;
pub mod stages;
