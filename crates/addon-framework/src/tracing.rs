//! # Observability & Tracing
//!
//! Every part of the container logs through the `tracing` crate with structured fields
//! (`addon`, `callback`, `message_id`, `target`, `dependency`, `elapsed_ms`). Callback executions
//! run inside a `callback` span, so nested logs of a handler show which addon and caller they
//! belong to.
//!
//! ## Usage Examples
//!
//! ```bash
//! # Lifecycle transitions, dependency waits, failures
//! RUST_LOG=info cargo run
//!
//! # Every message sent, every callback executed
//! RUST_LOG=debug cargo run
//!
//! # Only the container internals
//! RUST_LOG=addon_framework=debug cargo run
//! ```
//!
//! The addon `verbose` option raises the per-callback execution log from `debug` to `info`.
//!
//! ```text
//! INFO Addon started addon="cpu"
//! INFO Waiting for dependency dependency="events" delay_ms=500
//! INFO Addon awake addon="cpu"
//! INFO callback: Callback executed callback="get_world" elapsed_ms=0
//! ```

/// Installs a compact `fmt` subscriber filtered by `RUST_LOG`.
///
/// Safe to call more than once: only the first call installs the subscriber, which lets tests
/// and embedding applications call it unconditionally.
pub fn setup_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_target(false)
        .compact()
        .try_init();
}
