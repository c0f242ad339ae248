// vim: tw=80
//! Name obliteration: repeatedly rename a file to shorter and shorter
//! generated names before the final unlink, to scrub the name from any
//! directory slot that might otherwise be reused with the old name's bytes
//! still visible on disk.

use std::{
    io,
    os::unix::io::{BorrowedFd, IntoRawFd, RawFd},
    path::{Path, PathBuf},
};

use log::info;
use nix::{
    fcntl::{open, OFlag},
    sys::stat::Mode,
    unistd::{close, fdatasync, fsync, sync},
};

/// Characters allowed in a generated name: a safe, portable set with no
/// shell metacharacters.
const NAMESET: &[u8] =
    b"0123456789abcdefghijklmnopqrstuvwxyzABCDEFGHIJKLMNOPQRSTUVWXYZ_+=%@#.";

fn nameset_index(c: u8) -> Option<usize> {
    NAMESET.iter().position(|&b| b == c)
}

/// Increment `name` in place, treating it as a big-endian base-N number
/// whose digits come from [`NAMESET`]. A byte outside the alphabet sorts
/// before `NAMESET[0]` and is replaced by it rather than advanced. Returns
/// `true` on carry out of the most significant digit (the name wrapped
/// around to all-`NAMESET[0]` and every name of this length has been seen).
pub fn incname(name: &mut [u8]) -> bool {
    let Some((last, rest)) = name.split_last_mut() else {
        return true;
    };
    match nameset_index(*last) {
        None => {
            *last = NAMESET[0];
            false
        }
        Some(idx) if idx + 1 < NAMESET.len() => {
            *last = NAMESET[idx + 1];
            false
        }
        Some(_) => {
            *last = NAMESET[0];
            incname(rest)
        }
    }
}

/// Rename `path` repeatedly to shorter and shorter generated names, syncing
/// the containing directory after each successful rename, then unlink it.
/// Returns the final (about-to-be-unlinked) path name so callers can report
/// it, and propagates the `unlink` error if the file could not be removed.
///
/// Failing to find an unused name at some length, or a `rename` call
/// itself failing, is not treated as fatal: the loop simply moves on to the
/// next (shorter) length, exactly as upstream does, on the theory that a
/// best-effort scrub of the name is better than none.
pub fn wipename(path: &Path, verbose: bool) -> io::Result<()> {
    if verbose {
        info!("{}: removing", path.display());
    }

    let parent = path.parent().filter(|p| !p.as_os_str().is_empty());
    let dir_fd = open_dir_for_sync(parent);

    let base_len = path
        .file_name()
        .map(|n| n.as_encoded_bytes().len())
        .unwrap_or(0);

    let mut current = path.to_path_buf();
    let mut first = true;
    let orig_display = path.display().to_string();

    let mut len = base_len;
    while len > 0 {
        let mut candidate_name = vec![NAMESET[0]; len];
        loop {
            let candidate = sibling_with_name(&current, &candidate_name);
            if !path_exists(&candidate) {
                match std::fs::rename(&current, &candidate) {
                    Ok(()) => {
                        sync_dir_or_global(dir_fd);
                        if verbose {
                            let shown = if first {
                                orig_display.as_str()
                            } else {
                                current.to_str().unwrap_or_default()
                            };
                            info!("{shown}: renamed to {}", candidate.display());
                            first = false;
                        }
                        current = candidate;
                        break;
                    }
                    Err(_) => break,
                }
            }
            if incname(&mut candidate_name) {
                break;
            }
        }
        len -= 1;
    }

    let result = std::fs::remove_file(&current);
    sync_dir_or_global(dir_fd);
    if let Some(fd) = dir_fd {
        let _ = close(fd);
    }

    if result.is_ok() && verbose {
        info!("{}: removed", orig_display);
    }
    result
}

fn sibling_with_name(current: &Path, name: &[u8]) -> PathBuf {
    let name = String::from_utf8_lossy(name).into_owned();
    match current.parent() {
        Some(p) if !p.as_os_str().is_empty() => p.join(name),
        _ => PathBuf::from(name),
    }
}

fn path_exists(p: &Path) -> bool {
    std::fs::symlink_metadata(p).is_ok()
}

fn open_dir_for_sync(dir: Option<&Path>) -> Option<RawFd> {
    let target = dir.map(Path::to_path_buf).unwrap_or_else(|| PathBuf::from("."));
    open(&target, OFlag::O_RDONLY | OFlag::O_NOCTTY, Mode::empty())
        .ok()
        .map(IntoRawFd::into_raw_fd)
}

fn sync_dir_or_global(dir_fd: Option<RawFd>) {
    let synced = dir_fd.is_some_and(|fd| {
        let borrowed = unsafe { BorrowedFd::borrow_raw(fd) };
        fdatasync(borrowed).is_ok() || fsync(borrowed).is_ok()
    });
    if !synced {
        sync();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn incname_advances_within_alphabet() {
        let mut name = b"0".to_vec();
        assert!(!incname(&mut name));
        assert_eq!(name, b"1");
    }

    #[test]
    fn incname_carries_into_prefix() {
        // Last char of NAMESET is '.'; incrementing past it carries.
        let mut name = b"a.".to_vec();
        assert!(!incname(&mut name));
        assert_eq!(name, b"b0");
    }

    #[test]
    fn incname_reports_carry_out_of_top() {
        let alphabet_len = NAMESET.len();
        let mut name = vec![*NAMESET.last().unwrap(); 1];
        assert!(incname(&mut name));
        assert_eq!(name, vec![NAMESET[0]; 1]);
        let _ = alphabet_len;
    }

    #[test]
    fn incname_replaces_out_of_alphabet_byte() {
        let mut name = b"!".to_vec();
        assert!(!incname(&mut name));
        assert_eq!(name, [NAMESET[0]]);
    }

    #[test]
    fn incname_round_trips_through_full_cycle_for_short_names() {
        let mut name = vec![NAMESET[0]; 2];
        let total = NAMESET.len() * NAMESET.len();
        for _ in 0..total - 1 {
            assert!(!incname(&mut name));
        }
        assert!(incname(&mut name));
        assert_eq!(name, vec![NAMESET[0]; 2]);
    }

    #[test]
    fn wipename_removes_file_and_leaves_directory_empty() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("to-be-wiped");
        std::fs::write(&path, b"secret").unwrap();
        wipename(&path, false).unwrap();
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 0);
    }
}
