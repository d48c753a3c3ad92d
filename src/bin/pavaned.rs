//! A minimal daemon around the protocol service: a null sink and source
//! behind a native socket.
//!
//! Start it with:
//!     cargo run --bin pavaned
//!
//! and point clients at the printed socket, e.g.:
//!     PULSE_SERVER="unix:/run/user/1000/pavane/native" pactl info
//!
//! Module-style options can be passed as arguments:
//!     pavaned auth-anonymous=1 srbchannel=0

use std::fs;
use std::path::PathBuf;

use pavane::protocol::SampleSpec;
use pavane::server::connection::Transport;
use pavane::server::options::NativeOptions;
use pavane::server::{service_with_null_devices, ServiceEvent};

fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let args: Vec<String> = std::env::args().skip(1).collect();
    let mut options = NativeOptions::parse(&args.join(" "))?;

    let runtime_dir = pavane::runtime_dir_from_env()
        .unwrap_or_else(|| PathBuf::from("/tmp"))
        .join("pavane");
    fs::create_dir_all(&runtime_dir)?;

    options.load_cookie(&runtime_dir)?;

    let mut service = service_with_null_devices(options, SampleSpec::default(), true)?;

    service.add_hook(|event| match event {
        ServiceEvent::ConnectionPut(index) => log::debug!("client {} connected", index),
        ServiceEvent::ConnectionUnlink(index) => log::debug!("client {} gone", index),
        ServiceEvent::ServersChanged => {}
    });

    let socket_path = runtime_dir.join("native");

    // A stale socket from a dead daemon would fail the bind; a live one
    // still answers connects, and then we must not steal it.
    if socket_path.exists() {
        match std::os::unix::net::UnixStream::connect(&socket_path) {
            Ok(_) => {
                return Err(format!(
                    "another daemon is already listening on {}",
                    socket_path.display()
                )
                .into())
            }
            Err(_) => fs::remove_file(&socket_path)?,
        }
    }

    service.listen_unix(&socket_path)?;
    log::info!("listening on unix:{}", socket_path.display());

    // Also adopt a socketpair endpoint passed by a supervisor, if any.
    if let Ok(fd) = std::env::var("PAVANE_SOCKET_FD") {
        use std::os::unix::io::FromRawFd;

        let fd: i32 = fd.parse()?;
        let stream = unsafe { std::os::unix::net::UnixStream::from_raw_fd(fd) };
        stream.set_nonblocking(true)?;
        service.accept_connection(Transport::Unix(mio::net::UnixStream::from_std(stream)))?;
    }

    service.run()?;
    log::info!("exit requested, shutting down");

    Ok(())
}
