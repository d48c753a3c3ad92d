//! A pure Rust implementation of the native PulseAudio server protocol: the
//! wire format, the per-client connection state machine, and the playback and
//! record stream engines that sit between clients and a mixer.

#![warn(
    anonymous_parameters,
    missing_debug_implementations,
    nonstandard_style,
    rust_2018_idioms,
    trivial_casts,
    trivial_numeric_casts,
    unused_extern_crates,
    unused_qualifications
)]

use std::path::PathBuf;

pub mod protocol;
pub mod server;

/// Returns the directory the daemon should place its socket and cookie in,
/// checking the following locations in order:
///   - $PULSE_RUNTIME_PATH
///   - $XDG_RUNTIME_DIR/pulse
pub fn runtime_dir_from_env() -> Option<PathBuf> {
    std::env::var("PULSE_RUNTIME_PATH")
        .ok()
        .map(PathBuf::from)
        .or_else(|| {
            std::env::var("XDG_RUNTIME_DIR")
                .ok()
                .map(|s| PathBuf::from(s).join("pulse"))
        })
}

/// Attempts to find the authentication cookie in the environment, checking
/// the following locations in order:
///
///   - $PULSE_COOKIE
///   - $HOME/.config/pulse/cookie
///   - $HOME/.pulse-cookie
pub fn cookie_path_from_env() -> Option<PathBuf> {
    #[allow(deprecated)]
    let home = std::env::home_dir()?;

    let mut paths = std::env::var("PULSE_COOKIE")
        .ok()
        .map(PathBuf::from)
        .into_iter()
        .chain(std::iter::once(home.join(".config/pulse/cookie")))
        .chain(std::iter::once(home.join(".pulse-cookie")));

    paths.find(|path| path.exists())
}
