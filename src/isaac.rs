// vim: tw=80
//! Bob Jenkins' cryptographic random number generator, ISAAC.
//!
//! We need a source of random numbers for some of the overwrite data.
//! Cryptographically secure is desirable, but it's not life-or-death so the
//! choice of RNG here can stay a little bit experimental: ISAAC is fast,
//! analyzed, and has no known practical attack.
//!
//! The state-mixing arithmetic below is deliberately bit-for-bit identical to
//! the reference C implementation; do not "simplify" the index math, it
//! changes the output stream.

use std::{
    fs::File,
    io::Read,
    time::{SystemTime, UNIX_EPOCH},
};

use log::debug;
use rand_core::RngCore;
use zeroize::Zeroize;

pub const ISAAC_LOG: usize = 8;
pub const ISAAC_WORDS: usize = 1 << ISAAC_LOG;
pub const ISAAC_BYTES: usize = ISAAC_WORDS * 4;

/// Precomputed result of four rounds of [`mix8`] applied to the golden-ratio
/// constant `0x9e3779b9`, repeated eight times.
const INITIAL_IV: [u32; 8] = [
    0x1367df5a, 0x95d90059, 0xc3163e4b, 0x0f421ad8, 0xd92a4a78, 0xa51a3c49,
    0xc4efea1b, 0x30609119,
];

/// Bob Jenkins' 8-register cascading mix, used only during seeding.
#[allow(clippy::too_many_arguments)]
fn mix8(regs: &mut [u32; 8]) {
    let [mut a, mut b, mut c, mut d, mut e, mut f, mut g, mut h] = *regs;
    a ^= b << 11;
    d = d.wrapping_add(a);
    b = b.wrapping_add(c);
    b ^= c >> 2;
    e = e.wrapping_add(b);
    c = c.wrapping_add(d);
    c ^= d << 8;
    f = f.wrapping_add(c);
    d = d.wrapping_add(e);
    d ^= e >> 16;
    g = g.wrapping_add(d);
    e = e.wrapping_add(f);
    e ^= f << 10;
    h = h.wrapping_add(e);
    f = f.wrapping_add(g);
    f ^= g >> 4;
    a = a.wrapping_add(f);
    g = g.wrapping_add(h);
    g ^= h << 8;
    b = b.wrapping_add(g);
    h = h.wrapping_add(a);
    h ^= a >> 9;
    c = c.wrapping_add(h);
    a = a.wrapping_add(b);
    *regs = [a, b, c, d, e, f, g, h];
}

/// ISAAC's persistent RNG state: the 256-word main array, the 8-word seeding
/// register file, and the three scalar index variables.
#[derive(Zeroize)]
pub struct IsaacState {
    mm: [u32; ISAAC_WORDS],
    iv: [u32; 8],
    a: u32,
    b: u32,
    /// Output counter once seeded; a byte-granular write cursor into `mm`
    /// while seeding is in progress.
    c: u32,
}

impl Drop for IsaacState {
    fn drop(&mut self) {
        self.zeroize();
    }
}

impl IsaacState {
    /// Begin seeding: reset the working IV to its fixed starting value and
    /// zero the scalar registers. `mm` is left uninitialized-but-zeroed;
    /// nothing in it is meaningful until `seed_data`/`seed_finish` run.
    pub fn seed_start() -> Self {
        IsaacState {
            mm: [0; ISAAC_WORDS],
            iv: INITIAL_IV,
            a: 0,
            b: 0,
            c: 0,
        }
    }

    /// In-place initialization mix: read `mm` as seed material, accumulate it
    /// into the working IV eight words at a time, and write the mixed result
    /// back into `mm`.
    fn isaac_mix_self(&mut self) {
        let mut regs = self.iv;
        for i in (0..ISAAC_WORDS).step_by(8) {
            for k in 0..8 {
                regs[k] = regs[k].wrapping_add(self.mm[i + k]);
            }
            mix8(&mut regs);
            self.mm[i..i + 8].copy_from_slice(&regs);
        }
        self.iv = regs;
    }

    fn xor_bytes_at(&mut self, byte_pos: usize, data: &[u8]) {
        for (i, &byte) in data.iter().enumerate() {
            let p = byte_pos + i;
            let word = p / 4;
            let shift = (p % 4) * 8;
            self.mm[word] ^= (byte as u32) << shift;
        }
    }

    /// Add a buffer of seed material, XORing it into `mm` at the current
    /// byte cursor and running the initialization mix whenever the cursor
    /// wraps around the end of `mm`.
    pub fn seed_data(&mut self, mut buf: &[u8]) {
        let mut pos = self.c as usize;
        loop {
            let avail = ISAAC_BYTES - pos;
            if buf.len() <= avail {
                self.xor_bytes_at(pos, buf);
                self.c = (pos + buf.len()) as u32;
                return;
            }
            let (head, tail) = buf.split_at(avail);
            self.xor_bytes_at(pos, head);
            self.isaac_mix_self();
            pos = 0;
            buf = tail;
        }
    }

    /// End the seeding phase: mix twice more and reset the counter so output
    /// can be drawn.
    pub fn seed_finish(&mut self) {
        self.isaac_mix_self();
        self.isaac_mix_self();
        self.c = 0;
    }

    /// Seed from the platform's best-effort entropy sources. No single
    /// source failing is fatal; it simply contributes nothing to the seed.
    pub fn seed_default() -> Self {
        let mut s = Self::seed_start();

        s.seed_data(&(std::process::id() as u32).to_ne_bytes());
        #[cfg(unix)]
        {
            s.seed_data(&(nix::unistd::getppid().as_raw() as u32).to_ne_bytes());
            s.seed_data(&(nix::unistd::getuid().as_raw()).to_ne_bytes());
            s.seed_data(&(nix::unistd::getgid().as_raw()).to_ne_bytes());
        }

        if let Ok(d) = SystemTime::now().duration_since(UNIX_EPOCH) {
            s.seed_data(&d.as_secs().to_ne_bytes());
            s.seed_data(&d.subsec_nanos().to_ne_bytes());
        }

        if let Some(t) = read_cycle_counter() {
            s.seed_data(&t.to_ne_bytes());
        }

        let mut buf = [0u8; 32];
        if let Ok(mut f) = File::open("/dev/urandom") {
            if f.read_exact(&mut buf).is_ok() {
                s.seed_data(&buf);
            } else {
                debug!("short read from /dev/urandom");
            }
        } else if let Ok(mut f) = nonblocking_dev_random() {
            if f.read(&mut buf[..16]).unwrap_or(0) > 0 {
                s.seed_data(&buf[..16]);
            }
        } else {
            debug!("no kernel entropy source available, seeding from pid/clock only");
        }

        s.seed_finish();
        s
    }

    /// Refill a 256-word output block and return it, advancing `a`, `b`,
    /// `c`. This is ISAAC's central step, done in two halves of 128 words.
    fn refill(&mut self) -> [u32; ISAAC_WORDS] {
        let mut r = [0u32; ISAAC_WORDS];
        let mut a = self.a;
        self.c = self.c.wrapping_add(1);
        let mut b = self.b.wrapping_add(self.c);

        for i in 0..ISAAC_WORDS {
            let mix = match i % 4 {
                0 => a << 13,
                1 => a >> 6,
                2 => a << 2,
                _ => a >> 16,
            };
            let off = (i + ISAAC_WORDS / 2) % ISAAC_WORDS;
            a = (a ^ mix).wrapping_add(self.mm[off]);
            let x = self.mm[i];
            let y = self.mm[((x >> 2) as usize) & (ISAAC_WORDS - 1)]
                .wrapping_add(a)
                .wrapping_add(b);
            self.mm[i] = y;
            b = self.mm[((y >> (ISAAC_LOG + 2)) as usize) & (ISAAC_WORDS - 1)]
                .wrapping_add(x);
            r[i] = b;
        }
        self.a = a;
        self.b = b;
        r
    }
}

fn nonblocking_dev_random() -> std::io::Result<File> {
    use std::{fs::OpenOptions, os::unix::fs::OpenOptionsExt};
    OpenOptions::new()
        .read(true)
        .custom_flags(libc::O_NONBLOCK)
        .open("/dev/random")
}

cfg_if::cfg_if! {
    if #[cfg(target_arch = "x86_64")] {
        fn read_cycle_counter() -> Option<u64> {
            // Safety: rdtsc is available on every x86_64 CPU, no privilege
            // required, and has no side effects other than reading a
            // register.
            Some(unsafe { std::arch::x86_64::_rdtsc() })
        }
    } else if #[cfg(target_arch = "x86")] {
        fn read_cycle_counter() -> Option<u64> {
            // Safety: rdtsc is available on every x86 CPU with TSC support,
            // no privilege required.
            Some(unsafe { std::arch::x86::_rdtsc() })
        }
    } else {
        fn read_cycle_counter() -> Option<u64> {
            None
        }
    }
}

/// A word-granular draw on top of an [`IsaacState`]. Holds its own
/// 256-word reservoir and refills it from the underlying state on demand,
/// deliberately consuming it back-to-front, which happens to leave the
/// better-mixed tail of each refill for callers that only need a handful of
/// values.
pub struct WordRng<'a> {
    state: &'a mut IsaacState,
    buf: [u32; ISAAC_WORDS],
    numleft: usize,
}

impl<'a> WordRng<'a> {
    pub fn new(state: &'a mut IsaacState) -> Self {
        WordRng {
            state,
            buf: [0; ISAAC_WORDS],
            numleft: 0,
        }
    }

    /// Draw one 32-bit word, refilling the reservoir when it's exhausted.
    pub fn u32(&mut self) -> u32 {
        if self.numleft == 0 {
            self.buf = self.state.refill();
            self.numleft = ISAAC_WORDS;
        }
        self.numleft -= 1;
        self.buf[self.numleft]
    }

    /// Return a value uniformly distributed in `[0, n]` by rejection
    /// sampling. When `n == u32::MAX`, every draw is in range, so the raw
    /// draw is returned directly.
    pub fn uniform(&mut self, n: u32) -> u32 {
        let modulus = n.wrapping_add(1);
        if modulus == 0 {
            return self.u32();
        }
        let lim = modulus.wrapping_neg() % modulus;
        loop {
            let x = self.u32();
            if x >= lim {
                return x % modulus;
            }
        }
    }

    /// Fill `buf` with fresh random bytes. `len` is rounded up to the next
    /// multiple of 1024 bytes (one 256-word refill); `buf` must have at
    /// least that much capacity.
    pub fn fill(&mut self, buf: &mut [u8], len: usize) {
        let words_needed = len.div_ceil(1024) * ISAAC_WORDS;
        let mut written = 0usize;
        for _ in (0..words_needed).step_by(ISAAC_WORDS) {
            let block = self.state.refill();
            for w in block {
                if written + 4 > buf.len() {
                    break;
                }
                buf[written..written + 4].copy_from_slice(&w.to_ne_bytes());
                written += 4;
            }
        }
    }
}

impl Drop for WordRng<'_> {
    fn drop(&mut self) {
        self.buf.zeroize();
    }
}

impl RngCore for WordRng<'_> {
    fn next_u32(&mut self) -> u32 {
        self.u32()
    }

    fn next_u64(&mut self) -> u64 {
        let lo = self.u32() as u64;
        let hi = self.u32() as u64;
        (hi << 32) | lo
    }

    fn fill_bytes(&mut self, dest: &mut [u8]) {
        self.fill(dest, dest.len());
    }

    fn try_fill_bytes(
        &mut self,
        dest: &mut [u8],
    ) -> Result<(), rand_core::Error> {
        self.fill_bytes(dest);
        Ok(())
    }
}
