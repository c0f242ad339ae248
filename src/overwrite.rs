// vim: tw=80
//! The overwriter: performs the actual write passes over a target's byte
//! range, tolerating short writes, bad sectors, and size discovery on
//! devices whose length isn't known up front.

use std::{
    io::{Seek, SeekFrom, Write},
    os::unix::io::{AsRawFd, BorrowedFd},
    time::{Duration, Instant},
};

use log::info;
use nix::{
    errno::Errno,
    fcntl::{fcntl, FcntlArg, OFlag},
    sys::stat::{FileStat, SFlag},
    unistd::{fdatasync, fsync, ftruncate, isatty},
};

use crate::{
    error::{Result, ShredError},
    isaac::{IsaacState, WordRng},
    scheduler::{genpattern, PassCode},
    size::{human_readable_ceiling, human_readable_floor},
};

/// Write buffer size: a multiple of both 4 KiB and the 3-byte pattern
/// period, so `fillpattern` never has to special-case a trailing partial
/// period across a refill boundary. 3 KiB happens to satisfy both minimally.
const BUF_SIZE: usize = 3 * 1024;

/// Minimum interval between verbose progress lines, matching the original's
/// once-every-five-seconds cadence.
const VERBOSE_UPDATE: Duration = Duration::from_secs(5);

/// The declared size of a target: known up front, or to be discovered as
/// writes are attempted.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TargetSize {
    Known(u64),
    Unknown,
}

impl TargetSize {
    fn as_known(self) -> Option<u64> {
        match self {
            TargetSize::Known(n) => Some(n),
            TargetSize::Unknown => None,
        }
    }
}

/// Configuration for one run of the overwriter, independent of any
/// particular target file.
#[derive(Clone, Debug)]
pub struct Options {
    pub passes: usize,
    pub explicit_size: Option<u64>,
    pub remove_after: bool,
    pub verbose: bool,
    pub exact_size: bool,
    pub append_zero_pass: bool,
}

/// Fill `buf[..size]` with the fixed bit pattern named by `type_bits` (the
/// low 12 bits of a [`PassCode::Pattern`]), optionally complementing the
/// high bit of every 512-byte sector when bit 12 is set.
pub fn fillpattern(type_bits: u16, flip_sector_bit: bool, buf: &mut [u8]) {
    debug_assert!(buf.len() >= 3);
    let bits = (type_bits as u32 & 0xfff) * 0x1001;
    buf[0] = ((bits >> 4) & 255) as u8;
    buf[1] = ((bits >> 8) & 255) as u8;
    buf[2] = (bits & 255) as u8;

    let mut filled = 3;
    while filled < buf.len() / 2 {
        let (done, rest) = buf.split_at_mut(filled);
        rest[..filled].copy_from_slice(&done[..filled]);
        filled *= 2;
    }
    if filled < buf.len() {
        let remaining = buf.len() - filled;
        let (done, rest) = buf.split_at_mut(filled);
        rest.copy_from_slice(&done[..remaining]);
    }

    if flip_sector_bit {
        for sector in buf.chunks_mut(512) {
            sector[0] ^= 0x80;
        }
    }
}

fn pass_name(pass: PassCode) -> String {
    pass.to_string()
}

/// Perform one full overwrite pass over `target`, writing `pass` to
/// `[0, size)`. `size` may be unknown, in which case it's discovered the
/// first time a write comes up short; the discovered value is returned.
///
/// `k`/`n` and `name` are used only to format progress messages; passing
/// `n == 0` suppresses progress reporting entirely.
#[allow(clippy::too_many_arguments)]
pub fn dopass<F>(
    target: &mut F,
    name: &str,
    size: TargetSize,
    pass: PassCode,
    rng: &mut IsaacState,
    k: usize,
    n: usize,
) -> Result<TargetSize>
where
    F: Write + Seek + AsRawFd,
{
    target
        .seek(SeekFrom::Start(0))
        .map_err(|source| ShredError::Rewind { source })?;

    let mut buf = [0u8; BUF_SIZE];
    let fixed_len = size
        .as_known()
        .map(|s| (s as usize).min(BUF_SIZE))
        .unwrap_or(BUF_SIZE);
    if let PassCode::Pattern(bits) = pass {
        fillpattern(bits, pass.flips_sector_bit(), &mut buf[..fixed_len.max(3)]);
    }
    let pass_string = pass_name(pass);

    let mut word_rng = WordRng::new(rng);
    let mut size = size;
    let mut offset: u64 = 0;
    let mut next_update = Instant::now() + VERBOSE_UPDATE;
    let mut last_shown = String::new();

    if n > 0 {
        info!("{name}: pass {k}/{n} ({pass_string})...");
    }

    loop {
        let mut lim = BUF_SIZE;
        if let Some(known) = size.as_known() {
            if known <= offset {
                break;
            }
            let remaining = known - offset;
            if (lim as u64) > remaining {
                lim = remaining as usize;
            }
            if lim == 0 {
                break;
            }
        }

        if matches!(pass, PassCode::Random) {
            word_rng.fill(&mut buf, lim);
        }

        let mut soff = 0usize;
        while soff < lim {
            match target.write(&buf[soff..lim]) {
                Ok(0) if size.as_known().is_none() => {
                    size = TargetSize::Known(offset + soff as u64);
                    break;
                }
                Ok(written) => soff += written,
                Err(e)
                    if e.raw_os_error() == Some(Errno::ENOSPC as i32)
                        && size.as_known().is_none() =>
                {
                    size = TargetSize::Known(offset + soff as u64);
                    break;
                }
                Err(e)
                    if e.raw_os_error() == Some(Errno::EIO as i32)
                        && soff % 512 == 0
                        && lim >= soff + 512
                        && size.as_known().is_some() =>
                {
                    target
                        .seek(SeekFrom::Start(offset + soff as u64 + 512))
                        .map_err(|source| ShredError::Write {
                            offset: offset + soff as u64,
                            source,
                        })?;
                    soff += 512;
                }
                Err(source) => {
                    return Err(ShredError::Write {
                        offset: offset + soff as u64,
                        source,
                    });
                }
            }
        }

        offset = offset
            .checked_add(soff as u64)
            .ok_or(ShredError::FileTooLarge)?;

        if n > 0 {
            let at_end = size.as_known() == Some(offset);
            let due = Instant::now() >= next_update;
            if at_end || due {
                let human_offset = human_readable_floor(offset);
                let line = match size.as_known() {
                    None => format!(
                        "{name}: pass {k}/{n} ({pass_string})...{human_offset}"
                    ),
                    Some(total) => {
                        let percent = if total == 0 {
                            100
                        } else {
                            (offset.saturating_mul(100) / total).min(100)
                        };
                        let human_size = human_readable_ceiling(total);
                        let shown = if at_end {
                            human_size.clone()
                        } else {
                            human_offset
                        };
                        format!(
                            "{name}: pass {k}/{n} ({pass_string})...{shown}/{human_size} {percent}%"
                        )
                    }
                };
                if at_end || line != last_shown {
                    info!("{line}");
                    last_shown = line;
                    next_update = Instant::now() + VERBOSE_UPDATE;
                    sync_target(target)?;
                }
            }
        }
    }

    sync_target(target)?;
    Ok(size)
}

fn sync_target<F: AsRawFd>(target: &F) -> Result<()> {
    let fd = unsafe { BorrowedFd::borrow_raw(target.as_raw_fd()) };
    if fdatasync(fd).is_err() && fsync(fd).is_err() {
        return Err(ShredError::Sync {
            source: std::io::Error::last_os_error(),
        });
    }
    Ok(())
}

/// Drive the full run over one already-open target: determine its size,
/// schedule the passes, run them in order, optionally append a final
/// all-zero pass, and optionally truncate on the way out.
pub fn do_wipefd<F>(
    target: &mut F,
    name: &str,
    rng: &mut IsaacState,
    opts: &Options,
) -> Result<()>
where
    F: Write + Seek + AsRawFd,
{
    let fd = target.as_raw_fd();
    let borrowed = unsafe { BorrowedFd::borrow_raw(fd) };
    let st = fstat(fd)?;

    let file_type = SFlag::from_bits_truncate(
        st.st_mode as libc::mode_t & SFlag::S_IFMT.bits(),
    );
    let is_regular = file_type == SFlag::S_IFREG;
    let invalid = {
        let is_chr_tty =
            file_type == SFlag::S_IFCHR && isatty(borrowed).unwrap_or(false);
        let is_fifo = file_type == SFlag::S_IFIFO;
        let is_sock = file_type == SFlag::S_IFSOCK;
        let is_dir = file_type == SFlag::S_IFDIR;
        is_chr_tty || is_fifo || is_sock || is_dir
    };
    if invalid {
        return Err(ShredError::InvalidFileType);
    }

    let n_for_progress = if opts.verbose {
        opts.passes + usize::from(opts.append_zero_pass)
    } else {
        0
    };

    let size = determine_size(target, &st, is_regular, opts)?;

    let plan = {
        let mut isaac_rng = WordRng::new(&mut *rng);
        genpattern(opts.passes, &mut isaac_rng)
    };

    let mut size = size;
    for (i, pass) in plan.iter().enumerate() {
        size = dopass(target, name, size, *pass, rng, i + 1, n_for_progress)?;
    }

    if opts.append_zero_pass {
        size = dopass(
            target,
            name,
            size,
            PassCode::Pattern(0x000),
            rng,
            opts.passes + 1,
            n_for_progress,
        )?;
    }
    let _ = size;

    if opts.remove_after && is_regular {
        ftruncate(borrowed, 0).map_err(|errno| ShredError::Truncate {
            source: std::io::Error::from_raw_os_error(errno as i32),
        })?;
    }

    Ok(())
}

fn determine_size<F: AsRawFd + Seek>(
    target: &mut F,
    st: &FileStat,
    is_regular: bool,
    opts: &Options,
) -> Result<TargetSize> {
    if let Some(explicit) = opts.explicit_size {
        return Ok(TargetSize::Known(explicit));
    }

    let mut size: Option<i64> = if is_regular {
        let st_size = st.st_size;
        if st_size < 0 {
            return Err(ShredError::NegativeSize);
        }
        Some(st_size)
    } else {
        let end = target
            .seek(SeekFrom::End(0))
            .map_err(|source| ShredError::Rewind { source })?;
        let end = end as i64;
        if end <= 0 {
            None
        } else {
            Some(end)
        }
    };

    if let Some(s) = size {
        if !opts.exact_size && is_regular {
            let blksize = if st.st_blksize > 0 {
                st.st_blksize as i64
            } else {
                512
            };
            let rounded = s.checked_add(blksize - 1 - (s - 1).rem_euclid(blksize));
            size = Some(rounded.unwrap_or(i64::MAX));
        }
    }

    Ok(match size {
        Some(s) => TargetSize::Known(s as u64),
        None => TargetSize::Unknown,
    })
}

fn fstat(fd: i32) -> Result<FileStat> {
    let borrowed = unsafe { BorrowedFd::borrow_raw(fd) };
    nix::sys::stat::fstat(borrowed).map_err(|errno| ShredError::Stat {
        source: std::io::Error::from_raw_os_error(errno as i32),
    })
}

/// Check a raw file descriptor's open flags before wiping it, rejecting
/// append-only descriptors the way the original CLI wrapper does for
/// descriptors named on the command line.
pub fn check_not_append_only(fd: i32) -> Result<()> {
    let borrowed = unsafe { BorrowedFd::borrow_raw(fd) };
    let flags = fcntl(borrowed, FcntlArg::F_GETFL).map_err(|errno| {
        ShredError::Stat {
            source: std::io::Error::from_raw_os_error(errno as i32),
        }
    })?;
    if OFlag::from_bits_truncate(flags).contains(OFlag::O_APPEND) {
        return Err(ShredError::AppendOnly);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use std::{
        io::{self, Read},
        os::unix::io::RawFd,
    };

    use super::*;

    /// A `Write + Seek + AsRawFd` wrapper around a real temp file that can
    /// be told to fail a write once at a given cursor position (simulating
    /// a bad sector) or to cap writable length (simulating an unknown-size
    /// device that runs out of room). Backed by a real file so `sync_target`
    /// still has a genuine descriptor to `fdatasync`/`fsync`.
    struct FlakyFile {
        inner: std::fs::File,
        cursor: u64,
        fail_once_at: Option<u64>,
        failed_already: bool,
        cap: Option<u64>,
    }

    impl Write for FlakyFile {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            if let Some(off) = self.fail_once_at {
                if !self.failed_already {
                    if self.cursor == off {
                        self.failed_already = true;
                        return Err(io::Error::from_raw_os_error(
                            Errno::EIO as i32,
                        ));
                    }
                    if self.cursor < off
                        && self.cursor + buf.len() as u64 > off
                    {
                        let n = (off - self.cursor) as usize;
                        let written = self.inner.write(&buf[..n])?;
                        self.cursor += written as u64;
                        return Ok(written);
                    }
                }
            }
            if let Some(cap) = self.cap {
                if self.cursor >= cap {
                    return Err(io::Error::from_raw_os_error(
                        Errno::ENOSPC as i32,
                    ));
                }
                let remaining = (cap - self.cursor) as usize;
                let n = buf.len().min(remaining);
                let written = self.inner.write(&buf[..n])?;
                self.cursor += written as u64;
                return Ok(written);
            }
            let written = self.inner.write(buf)?;
            self.cursor += written as u64;
            Ok(written)
        }

        fn flush(&mut self) -> io::Result<()> {
            self.inner.flush()
        }
    }

    impl Seek for FlakyFile {
        fn seek(&mut self, pos: SeekFrom) -> io::Result<u64> {
            let new_pos = self.inner.seek(pos)?;
            self.cursor = new_pos;
            Ok(new_pos)
        }
    }

    impl AsRawFd for FlakyFile {
        fn as_raw_fd(&self) -> RawFd {
            self.inner.as_raw_fd()
        }
    }

    /// A single EIO at a 512-aligned offset is skipped by seeking past the
    /// bad sector; everything else in the pass still gets the pattern.
    #[test]
    fn dopass_skips_one_bad_sector_and_continues() {
        let tmp = tempfile::NamedTempFile::new().unwrap();
        std::fs::write(tmp.path(), vec![0u8; 8192]).unwrap();
        let inner = std::fs::OpenOptions::new()
            .read(true)
            .write(true)
            .open(tmp.path())
            .unwrap();
        let mut target = FlakyFile {
            inner,
            cursor: 0,
            fail_once_at: Some(1024),
            failed_already: false,
            cap: None,
        };

        let mut rng_state = crate::isaac::IsaacState::seed_start();
        rng_state.seed_data(&[3u8; 32]);
        rng_state.seed_finish();

        let result = dopass(
            &mut target,
            "flaky",
            TargetSize::Known(8192),
            PassCode::Pattern(0xfff),
            &mut rng_state,
            1,
            1,
        );
        assert!(result.is_ok());

        let mut contents = Vec::new();
        std::fs::File::open(tmp.path())
            .unwrap()
            .read_to_end(&mut contents)
            .unwrap();
        assert_eq!(contents.len(), 8192);
        assert!(contents[..1024].iter().all(|&b| b == 0xff));
        assert!(contents[1024..1536].iter().all(|&b| b == 0));
        assert!(contents[1536..].iter().all(|&b| b == 0xff));
    }

    /// An unknown-size target whose writes start failing with `ENOSPC`
    /// discovers its true size at the point of first failure and stops
    /// cleanly rather than erroring out.
    #[test]
    fn dopass_discovers_unknown_size_on_enospc() {
        let tmp = tempfile::NamedTempFile::new().unwrap();
        std::fs::write(tmp.path(), vec![0u8; 16 * 1024]).unwrap();
        let inner = std::fs::OpenOptions::new()
            .read(true)
            .write(true)
            .open(tmp.path())
            .unwrap();
        let mut target = FlakyFile {
            inner,
            cursor: 0,
            fail_once_at: None,
            failed_already: false,
            cap: Some(6000),
        };

        let mut rng_state = crate::isaac::IsaacState::seed_start();
        rng_state.seed_data(&[4u8; 32]);
        rng_state.seed_finish();

        let result = dopass(
            &mut target,
            "unknown-size",
            TargetSize::Unknown,
            PassCode::Pattern(0x000),
            &mut rng_state,
            1,
            1,
        );
        assert_eq!(result.unwrap(), TargetSize::Known(6000));

        let mut contents = Vec::new();
        std::fs::File::open(tmp.path())
            .unwrap()
            .read_to_end(&mut contents)
            .unwrap();
        assert!(contents[..6000].iter().all(|&b| b == 0));
    }

    #[test]
    fn fillpattern_all_zero() {
        let mut buf = [0xffu8; 9];
        fillpattern(0x000, false, &mut buf);
        assert_eq!(buf, [0u8; 9]);
    }

    #[test]
    fn fillpattern_all_one() {
        let mut buf = [0u8; 9];
        fillpattern(0xfff, false, &mut buf);
        assert_eq!(buf, [0xffu8; 9]);
    }

    #[test]
    fn fillpattern_repeats_exactly() {
        let mut buf = [0u8; 17];
        fillpattern(0x555, false, &mut buf);
        let first_three = [buf[0], buf[1], buf[2]];
        for chunk in buf.chunks(3) {
            if chunk.len() == 3 {
                assert_eq!(chunk, first_three);
            }
        }
    }

    #[test]
    fn fillpattern_flips_sector_high_bit() {
        let mut buf = [0u8; 1024];
        fillpattern(0x1000, true, &mut buf);
        assert_eq!(buf[0] & 0x80, 0x80);
        assert_eq!(buf[512] & 0x80, 0x80);
    }

    #[test]
    fn fillpattern_is_idempotent() {
        let mut a = [0u8; 128];
        let mut b = [0u8; 128];
        fillpattern(0x6db, false, &mut a);
        fillpattern(0x6db, false, &mut b);
        assert_eq!(a, b);
    }
}
