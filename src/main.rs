// vim: tw=80
//! Overwrite files to hide their contents, and optionally delete them.
//!
//! Deletes data more securely than plain `rm`, by overwriting it first so
//! recovery of the data, even with a lot of hardware or software effort,
//! is not feasible. A given file's data is overwritten by default in 3
//! passes, but that's configurable via `-n`, and a final zero-fill pass can
//! be layered on with `-z`. See the README or `shred --help` for the
//! complete set of caveats this approach can't paper over (journaling
//! filesystems, copy-on-write, wear-leveled flash, snapshots, backups...).

mod error;
mod isaac;
mod overwrite;
mod scheduler;
mod size;
mod wipename;

use std::{
    fs::OpenOptions,
    os::unix::{fs::OpenOptionsExt, io::FromRawFd},
    path::Path,
    process::ExitCode,
};

use clap::Parser;
use log::error;

use crate::{
    error::ShredError,
    isaac::IsaacState,
    overwrite::{check_not_append_only, do_wipefd, Options as WipeOptions},
    size::SizeParser,
};

const DEFAULT_PASSES: usize = 3;

/// Reject `0` (the spec requires at least one pass) and any count so large
/// that the pass plan's backing storage would overflow when sized, the same
/// usage error the original raises for `-n` values that don't fit its own
/// `size_t` arithmetic.
fn parse_iterations(s: &str) -> Result<usize, String> {
    let n: usize = s
        .parse()
        .map_err(|_| ShredError::InvalidPassCount.to_string())?;
    if n == 0 {
        return Err(ShredError::InvalidPassCount.to_string());
    }
    n.checked_mul(std::mem::size_of::<scheduler::PassCode>())
        .ok_or_else(|| ShredError::InvalidPassCount.to_string())?;
    Ok(n)
}

/// Overwrite the specified FILE(s) repeatedly, in order to make it harder
/// for even very expensive hardware probing to recover the data.
#[derive(Parser, Debug)]
#[command(name = "shred", author, version, about, long_about = None)]
struct Cli {
    /// Change permissions to allow writing if necessary
    #[arg(short = 'f', long = "force")]
    force: bool,

    /// Overwrite N times instead of the default (3)
    #[arg(
        short = 'n',
        long = "iterations",
        value_name = "N",
        default_value_t = DEFAULT_PASSES,
        value_parser = parse_iterations,
    )]
    iterations: usize,

    /// Shred this many bytes (suffixes like K, M, G accepted)
    #[arg(short = 's', long = "size", value_name = "N", value_parser = SizeParser)]
    size: Option<u64>,

    /// Deallocate and remove file after overwriting
    #[arg(short = 'u', long = "remove")]
    remove: bool,

    /// Show progress
    #[arg(short = 'v', long = "verbose")]
    verbose: bool,

    /// Do not round file sizes up to the next full block; this is the
    /// default for non-regular files
    #[arg(short = 'x', long = "exact")]
    exact: bool,

    /// Add a final overwrite with zeros to hide shredding
    #[arg(short = 'z', long = "zero")]
    zero: bool,

    /// Files to shred; "-" means standard output, and "/dev/fd/N" means an
    /// already-open descriptor N
    #[arg(required = true, value_name = "FILE")]
    files: Vec<String>,
}

impl Cli {
    fn wipe_options(&self) -> WipeOptions {
        WipeOptions {
            passes: self.iterations,
            explicit_size: self.size,
            remove_after: self.remove,
            verbose: self.verbose,
            exact_size: self.exact,
            append_zero_pass: self.zero,
        }
    }
}

/// Parses a `/dev/fd/N` target name the way the original accepts it even on
/// platforms without a real `/dev/fd` filesystem: purely decimal, no
/// leading zeros except the literal descriptor `0`.
fn parse_dev_fd(name: &str) -> Option<i32> {
    let digits = name.strip_prefix("/dev/fd/")?;
    if digits.is_empty() || (digits.len() > 1 && digits.starts_with('0')) {
        return None;
    }
    digits.parse::<i32>().ok()
}

fn wipe_raw_fd(
    fd: i32,
    name: &str,
    rng: &mut IsaacState,
    opts: &WipeOptions,
) -> Result<(), ShredError> {
    check_not_append_only(fd)?;
    let mut file = unsafe { std::fs::File::from_raw_fd(fd) };
    let result = do_wipefd(&mut file, name, rng, opts);
    // The descriptor was handed to us by the caller (stdout, or a
    // command-line /dev/fd/N reference); don't let File's Drop close it.
    std::mem::forget(file);
    result
}

fn wipe_named_file(
    path: &Path,
    name: &str,
    rng: &mut IsaacState,
    opts: &WipeOptions,
    force: bool,
) -> Result<(), ShredError> {
    let mut open_opts = OpenOptions::new();
    open_opts.write(true).custom_flags(libc::O_NOCTTY);
    let mut file = match open_opts.open(path) {
        Ok(f) => f,
        Err(e) if e.kind() == std::io::ErrorKind::PermissionDenied && force => {
            let _ = std::fs::set_permissions(
                path,
                std::os::unix::fs::PermissionsExt::from_mode(0o200),
            );
            open_opts.open(path).map_err(|source| ShredError::Open {
                path: path.to_path_buf(),
                source,
            })?
        }
        Err(source) => {
            return Err(ShredError::Open { path: path.to_path_buf(), source })
        }
    };

    do_wipefd(&mut file, name, rng, opts)?;
    drop(file);

    if opts.remove_after {
        wipename::wipename(path, opts.verbose)
            .map_err(|source| ShredError::Unlink { source })?;
    }
    Ok(())
}

fn shred_one(
    spec: &str,
    rng: &mut IsaacState,
    opts: &WipeOptions,
    force: bool,
) -> Result<(), ShredError> {
    if spec == "-" {
        return wipe_raw_fd(libc::STDOUT_FILENO, spec, rng, opts);
    }
    if let Some(fd) = parse_dev_fd(spec) {
        return wipe_raw_fd(fd, spec, rng, opts);
    }
    wipe_named_file(Path::new(spec), spec, rng, opts, force)
}

fn main() -> ExitCode {
    env_logger::builder().format_timestamp(None).init();

    let cli = Cli::parse();
    let opts = cli.wipe_options();
    let mut rng = IsaacState::seed_default();

    let mut had_error = false;
    for spec in &cli.files {
        if let Err(e) = shred_one(spec, &mut rng, &opts, cli.force) {
            error!("{spec}: {e}");
            had_error = true;
        }
    }

    drop(rng);

    if had_error {
        ExitCode::FAILURE
    } else {
        ExitCode::SUCCESS
    }
}
