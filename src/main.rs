use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicI32, Ordering};

use clap::Parser;
use tracing::{error, info, warn};
use tracing_subscriber::fmt;
use tracing_subscriber::prelude::*;

use memfs::config::{Cli, Command, MemfsConfig};
use memfs::error::FsError;
use memfs::fs::ops::{MemoryFs, Owner};
use memfs::fs::MemFs;
use memfs::observer::{SocketObserver, TracingObserver};

/// Write-end of the self-pipe used for signal notification.
static SIGNAL_PIPE: AtomicI32 = AtomicI32::new(-1);

extern "C" fn signal_handler(_sig: libc::c_int) {
    let fd = SIGNAL_PIPE.load(Ordering::Relaxed);
    if fd >= 0 {
        unsafe {
            libc::write(fd, [0u8].as_ptr() as *const libc::c_void, 1);
        }
    }
}

enum ShutdownAction {
    /// SIGINT or SIGTERM: we unmount.
    Signal,
    /// The FUSE session ended on its own (someone ran umount).
    ExternalUnmount,
}

/// Block until a signal arrives or the FUSE session thread exits.
fn wait_for_shutdown(guard: &std::thread::JoinHandle<std::io::Result<()>>) -> ShutdownAction {
    let mut pipe_fds = [0 as libc::c_int; 2];
    if unsafe { libc::pipe(pipe_fds.as_mut_ptr()) } != 0 {
        error!(
            "Failed to create signal pipe: {}",
            std::io::Error::last_os_error()
        );
        while !guard.is_finished() {
            std::thread::sleep(std::time::Duration::from_millis(200));
        }
        return ShutdownAction::ExternalUnmount;
    }

    SIGNAL_PIPE.store(pipe_fds[1], Ordering::Relaxed);

    unsafe {
        use nix::sys::signal::{signal, SigHandler, Signal};
        signal(Signal::SIGINT, SigHandler::Handler(signal_handler)).ok();
        signal(Signal::SIGTERM, SigHandler::Handler(signal_handler)).ok();
    }

    let action = loop {
        let mut pfd = libc::pollfd {
            fd: pipe_fds[0],
            events: libc::POLLIN,
            revents: 0,
        };
        let ret = unsafe { libc::poll(&mut pfd, 1, 200) };

        if ret > 0 {
            let mut buf = [0u8; 1];
            unsafe {
                libc::read(pipe_fds[0], buf.as_mut_ptr() as *mut libc::c_void, 1);
            }
            if guard.is_finished() {
                break ShutdownAction::ExternalUnmount;
            }
            eprintln!("memfs: unmounting (received signal)...");
            break ShutdownAction::Signal;
        }

        if guard.is_finished() {
            break ShutdownAction::ExternalUnmount;
        }
    };

    SIGNAL_PIPE.store(-1, Ordering::Relaxed);
    unsafe {
        libc::close(pipe_fds[0]);
        libc::close(pipe_fds[1]);
    }

    action
}

/// Build the in-memory state. Snapshots are only taken when a viewer was
/// asked for.
fn build_fs(config: &MemfsConfig) -> MemoryFs {
    let fs = MemoryFs::new(Owner::current());
    let Some(addr) = config.visualise.as_deref() else {
        return fs;
    };
    match SocketObserver::connect(addr) {
        Ok(observer) => {
            info!("Streaming table snapshots to {}", addr);
            fs.with_observer(Box::new(observer))
        }
        Err(e) => {
            warn!("Could not reach viewer at {}: {}", addr, e);
            fs.with_observer(Box::new(TracingObserver))
        }
    }
}

/// Mount in a background session, retrying owner-only when the system
/// refuses `allow_other`.
fn mount(config: &MemfsConfig) -> Result<fuser::BackgroundSession, FsError> {
    let mut fuse_config = fuser::Config::default();
    fuse_config.mount_options = vec![
        fuser::MountOption::FSName("memfs".to_string()),
        fuser::MountOption::AutoUnmount,
        fuser::MountOption::DefaultPermissions,
    ];
    fuse_config.acl = fuser::SessionACL::All;

    let memfs = MemFs::new(config.clone(), build_fs(config));
    match fuser::spawn_mount2(memfs, &config.mountpoint, &fuse_config) {
        Ok(session) => Ok(session),
        Err(e) if e.raw_os_error() == Some(libc::EPERM) || e.to_string().contains("allow_other") => {
            info!("Retrying mount without allow_other...");
            fuse_config.acl = fuser::SessionACL::Owner;
            let memfs = MemFs::new(config.clone(), build_fs(config));
            fuser::spawn_mount2(memfs, &config.mountpoint, &fuse_config)
                .map_err(|e| FsError::Mount(e.to_string()))
        }
        Err(e) => Err(FsError::Mount(e.to_string())),
    }
}

fn main() {
    let cli = Cli::parse();

    match cli.command {
        Command::Mount {
            mountpoint,
            log_file,
            visualise,
            no_hello,
        } => {
            if !mountpoint.exists() {
                if let Err(e) = std::fs::create_dir_all(&mountpoint) {
                    eprintln!("Error creating mountpoint {:?}: {}", mountpoint, e);
                    std::process::exit(1);
                }
            }

            let mountpoint = std::fs::canonicalize(&mountpoint).unwrap_or_else(|e| {
                eprintln!("Error: mountpoint {:?}: {}", mountpoint, e);
                std::process::exit(1);
            });

            if is_stale_fuse_mount(&mountpoint) {
                eprintln!(
                    "Error: {} is a stale FUSE mount.\nFix with:  umount -f {}",
                    mountpoint.display(),
                    mountpoint.display(),
                );
                std::process::exit(1);
            }

            let log_dir = log_file.parent().unwrap_or_else(|| Path::new("/tmp"));
            let log_name = log_file
                .file_name()
                .unwrap_or_else(|| std::ffi::OsStr::new("memfs.log"));
            let file_appender = tracing_appender::rolling::never(log_dir, log_name);
            let (non_blocking, _guard) = tracing_appender::non_blocking(file_appender);

            let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));

            let subscriber = tracing_subscriber::registry()
                .with(env_filter)
                .with(
                    fmt::layer()
                        .with_writer(non_blocking)
                        .with_ansi(false)
                        .with_target(false),
                )
                .with(
                    fmt::layer()
                        .with_writer(std::io::stderr)
                        .with_target(false),
                );
            if let Err(e) = tracing::subscriber::set_global_default(subscriber) {
                eprintln!("Error installing log subscriber: {}", e);
                std::process::exit(1);
            }

            let config = MemfsConfig {
                mountpoint: mountpoint.clone(),
                log_file,
                visualise,
                seed_hello: !no_hello,
            };

            info!("memfs starting: mountpoint={}", mountpoint.display());

            let session = match mount(&config) {
                Ok(session) => session,
                Err(e) => {
                    error!("Failed to mount: {}", e);
                    std::process::exit(1);
                }
            };

            info!("memfs mounted at {}", mountpoint.display());

            match wait_for_shutdown(&session.guard) {
                ShutdownAction::Signal => {
                    if let Err(e) = session.umount_and_join() {
                        error!("Error during unmount, trying force unmount: {}", e);
                        let mp = mountpoint.to_string_lossy();
                        let _ = std::process::Command::new("umount")
                            .args(["-f", &*mp])
                            .status();
                    }
                }
                ShutdownAction::ExternalUnmount => {
                    if let Err(e) = session.join() {
                        error!("Error joining FUSE session: {}", e);
                    }
                }
            }

            eprintln!("memfs: unmounted {}", mountpoint.display());
        }
        Command::Unmount { mountpoint } => {
            unmount(&mountpoint);
        }
    }
}

/// A mountpoint listed as a FUSE mount whose directory can no longer be read.
fn is_stale_fuse_mount(path: &Path) -> bool {
    let output = match std::process::Command::new("mount").output() {
        Ok(o) => o,
        Err(_) => return false,
    };
    let stdout = String::from_utf8_lossy(&output.stdout);
    let path_str = path.to_string_lossy();
    let listed = stdout
        .lines()
        .any(|line| line.contains(path_str.as_ref()) && line.contains("fuse"));
    listed && std::fs::read_dir(path).is_err()
}

fn run_quiet(program: &str, args: &[&str]) -> Option<std::process::Output> {
    std::process::Command::new(program).args(args).output().ok()
}

fn unmount(mountpoint: &PathBuf) {
    let mountpoint = std::fs::canonicalize(mountpoint).unwrap_or_else(|e| {
        eprintln!("Error: mountpoint {:?}: {}", mountpoint, e);
        std::process::exit(1);
    });
    let mp = mountpoint.to_string_lossy();
    eprintln!("Unmounting {}...", mp);

    for (program, args) in [("umount", vec![&*mp]), ("fusermount", vec!["-u", &*mp])] {
        match run_quiet(program, &args) {
            Some(o) if o.status.success() => {
                eprintln!("Successfully unmounted {}", mp);
                return;
            }
            Some(o) if String::from_utf8_lossy(&o.stderr).contains("busy") => {
                eprintln!(
                    "Mount point is busy. Make sure no shells or processes are using {}, then try again.",
                    mp
                );
                std::process::exit(1);
            }
            _ => {}
        }
    }

    if matches!(run_quiet("umount", &["-f", &*mp]), Some(o) if o.status.success()) {
        eprintln!("Successfully unmounted {} (forced)", mp);
        return;
    }

    eprintln!("Failed to unmount {}. Try: sudo umount -f {}", mp, mp);
    std::process::exit(1);
}
