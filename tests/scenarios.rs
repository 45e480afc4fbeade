//! End-to-end scenarios against a real mount.
//!
//! These tests require a working FUSE installation (libfuse or macFUSE).
//! They are ignored by default. Run with:
//!
//!     cargo test --test scenarios -- --ignored --test-threads=1

use std::fs;
use std::io::{Read, Seek, SeekFrom, Write};
use std::os::unix::fs::MetadataExt;
use std::path::Path;
use std::process::{Child, Command, ExitStatus, Stdio};
use std::time::{Duration, Instant};

use tempfile::TempDir;

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

/// A running `memfs mount` process.
struct MemfsMount {
    child: Child,
    mountpoint: TempDir,
}

impl MemfsMount {
    fn start() -> Self {
        let mountpoint = tempfile::tempdir().expect("create mountpoint tmpdir");
        let log_file = std::env::temp_dir().join(format!("memfs-test-{}.log", std::process::id()));

        let child = Command::new(env!("CARGO_BIN_EXE_memfs"))
            .args([
                "mount",
                mountpoint.path().to_str().unwrap(),
                "--log-file",
                log_file.to_str().unwrap(),
            ])
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .spawn()
            .expect("failed to spawn memfs mount");

        let mount = Self { child, mountpoint };
        mount.wait_for_mount(Duration::from_secs(5));
        mount
    }

    fn path(&self) -> &Path {
        self.mountpoint.path()
    }

    /// The example file only exists once the filesystem is serving.
    fn wait_for_mount(&self, timeout: Duration) {
        let start = Instant::now();
        while start.elapsed() < timeout {
            if self.path().join("hello").exists() {
                return;
            }
            std::thread::sleep(Duration::from_millis(100));
        }
        panic!("memfs did not mount at {:?} within {:?}", self.path(), timeout);
    }

    fn wait_with_timeout(&mut self, timeout: Duration) -> Option<ExitStatus> {
        let start = Instant::now();
        loop {
            match self.child.try_wait().expect("try_wait failed") {
                Some(status) => return Some(status),
                None if start.elapsed() >= timeout => return None,
                None => std::thread::sleep(Duration::from_millis(50)),
            }
        }
    }
}

impl Drop for MemfsMount {
    fn drop(&mut self) {
        if self.child.try_wait().ok().flatten().is_none() {
            unsafe {
                libc::kill(self.child.id() as libc::pid_t, libc::SIGKILL);
            }
            let _ = self.child.wait();
        }
        let _ = Command::new("umount")
            .args(["-f", self.path().to_str().unwrap()])
            .status();
    }
}

// ---------------------------------------------------------------------------
// Scenarios
// ---------------------------------------------------------------------------

#[test]
#[ignore]
fn hello_file_is_served() {
    let mount = MemfsMount::start();
    let content = fs::read_to_string(mount.path().join("hello")).unwrap();
    assert_eq!(content, "Hello World!\n");
}

#[test]
#[ignore]
fn create_write_read() {
    let mount = MemfsMount::start();
    let file = mount.path().join("notes.txt");
    fs::write(&file, "written through the kernel").unwrap();
    assert_eq!(fs::read_to_string(&file).unwrap(), "written through the kernel");
    assert_eq!(fs::metadata(&file).unwrap().len(), 26);
}

#[test]
#[ignore]
fn overwrite_inside_file_truncates_after_written_range() {
    let mount = MemfsMount::start();
    let file = mount.path().join("digits");
    fs::write(&file, "0123456789").unwrap();

    let mut f = fs::OpenOptions::new().write(true).open(&file).unwrap();
    f.seek(SeekFrom::Start(2)).unwrap();
    f.write_all(b"abc").unwrap();
    drop(f);

    // Attribute cache lives for one second.
    std::thread::sleep(Duration::from_millis(1100));
    let mut content = String::new();
    fs::File::open(&file)
        .unwrap()
        .read_to_string(&mut content)
        .unwrap();
    assert_eq!(content, "01abc");
}

#[test]
#[ignore]
fn directories_list_direct_children_only() {
    let mount = MemfsMount::start();
    fs::create_dir(mount.path().join("a")).unwrap();
    fs::write(mount.path().join("a").join("b"), "").unwrap();
    fs::write(mount.path().join("c"), "").unwrap();

    let mut names: Vec<String> = fs::read_dir(mount.path())
        .unwrap()
        .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
        .collect();
    names.sort();
    assert_eq!(names, vec!["a", "c", "hello"]);

    let nested: Vec<String> = fs::read_dir(mount.path().join("a"))
        .unwrap()
        .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
        .collect();
    assert_eq!(nested, vec!["b"]);
}

#[test]
#[ignore]
fn subdirectory_raises_parent_link_count() {
    let mount = MemfsMount::start();
    let d = mount.path().join("d");
    fs::create_dir(&d).unwrap();
    fs::create_dir(d.join("e")).unwrap();
    std::thread::sleep(Duration::from_millis(1100));
    assert_eq!(fs::metadata(&d).unwrap().nlink(), 3);
}

#[test]
#[ignore]
fn hard_link_survives_unlink_of_first_path() {
    let mount = MemfsMount::start();
    let old = mount.path().join("old");
    let new = mount.path().join("new");
    fs::write(&old, "shared").unwrap();
    fs::hard_link(&old, &new).unwrap();
    assert_eq!(fs::metadata(&new).unwrap().nlink(), 2);

    fs::remove_file(&old).unwrap();
    assert!(!old.exists());
    assert_eq!(fs::read_to_string(&new).unwrap(), "shared");
    std::thread::sleep(Duration::from_millis(1100));
    assert_eq!(fs::metadata(&new).unwrap().nlink(), 1);
}

#[test]
#[ignore]
fn sigint_unmounts_and_exits() {
    let mut mount = MemfsMount::start();
    unsafe {
        libc::kill(mount.child.id() as libc::pid_t, libc::SIGINT);
    }
    let status = mount
        .wait_with_timeout(Duration::from_secs(3))
        .expect("memfs did not exit within 3s of SIGINT");
    assert!(status.success(), "expected exit 0, got {:?}", status);
    assert!(!mount.path().join("hello").exists());
}

#[test]
#[ignore]
fn external_unmount_ends_the_process() {
    let mut mount = MemfsMount::start();
    let output = Command::new(env!("CARGO_BIN_EXE_memfs"))
        .args(["unmount", mount.path().to_str().unwrap()])
        .output()
        .expect("failed to run memfs unmount");
    assert!(
        output.status.success(),
        "memfs unmount failed: {}",
        String::from_utf8_lossy(&output.stderr)
    );
    let status = mount
        .wait_with_timeout(Duration::from_secs(3))
        .expect("memfs mount process did not exit after external unmount");
    assert!(status.success(), "expected exit 0, got {:?}", status);
}
