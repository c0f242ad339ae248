// vim: tw=80
//! Pass scheduling: turn a requested pass count into a pseudorandom
//! permutation of pattern passes drawn from a fixed catalog, interleaved
//! with random passes.
//!
//! The passes start and end with a random pass, and the passes in between
//! are done in random order. The idea is to deprive someone trying to
//! reverse the process of knowledge of the overwrite patterns, so they have
//! the additional step of figuring out what was done to the disk before
//! they can try to reverse or cancel it.
//!
//! First, all possible 1-bit patterns. There are two of them. Then, all
//! possible 2-bit patterns: four, but the two that are also 1-bit patterns
//! are omitted. Then 3-bit (8-2=6), then 4-bit (16-4=12). Adding random
//! passes at the beginning, middle and end produces the classic 25-pass
//! structure.
//!
//! One extension included here: complementing the first bit of every
//! 512-byte block, to alter the phase of the encoded data in the more
//! complex encodings. This doesn't apply to MFM, so the 1-bit patterns are
//! folded into the 3-bit ones and the 2-bit patterns into the 4-bit ones.

use std::fmt;

use crate::isaac::WordRng;

/// One overwrite pass: either fresh random bytes, or a fixed bit pattern.
/// The pattern's low 12 bits are three hex nibbles to repeat; bit 12, if
/// set, additionally flips the high bit of every 512-byte-aligned byte.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PassCode {
    Random,
    Pattern(u16),
}

impl PassCode {
    pub fn flips_sector_bit(self) -> bool {
        matches!(self, PassCode::Pattern(p) if p & 0x1000 != 0)
    }

    pub fn fill_bits(self) -> u16 {
        match self {
            PassCode::Pattern(p) => p & 0xfff,
            PassCode::Random => 0,
        }
    }
}

impl fmt::Display for PassCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PassCode::Random => write!(f, "random"),
            PassCode::Pattern(p) => write!(f, "{:03x}", p & 0xfff),
        }
    }
}

enum Block {
    Random(usize),
    Patterns(&'static [u16]),
}

/// The catalog of overwrite passes, processed in order and cycling back to
/// the start when exhausted.
const CATALOG: &[Block] = &[
    Block::Random(2),
    Block::Patterns(&[0x000, 0xFFF]),
    Block::Patterns(&[0x555, 0xAAA]),
    Block::Random(1),
    Block::Patterns(&[0x249, 0x492, 0x6DB, 0x924, 0xB6D, 0xDB6]),
    Block::Patterns(&[
        0x111, 0x222, 0x333, 0x444, 0x666, 0x777, 0x888, 0x999, 0xBBB, 0xCCC,
        0xDDD, 0xEEE,
    ]),
    Block::Random(1),
    Block::Patterns(&[
        0x1000, 0x1249, 0x1492, 0x16DB, 0x1924, 0x1B6D, 0x1DB6, 0x1FFF,
    ]),
    Block::Patterns(&[
        0x1111, 0x1222, 0x1333, 0x1444, 0x1555, 0x1666, 0x1777, 0x1888,
        0x1999, 0x1AAA, 0x1BBB, 0x1CCC, 0x1DDD, 0x1EEE,
    ]),
    Block::Random(1),
];

/// Stage 1: walk the catalog and choose which fixed patterns to use,
/// leaving the rest of the requested count as random passes.
///
/// Returns the chosen patterns (in catalog order) and the number of random
/// passes still to be interleaved among them.
fn select(num: usize, rng: &mut WordRng) -> (Vec<PassCode>, usize) {
    let mut chosen = Vec::new();
    let mut randpasses = 0usize;
    let mut n = num;
    let mut catalog = CATALOG.iter().cycle();

    loop {
        match catalog.next().unwrap() {
            Block::Random(k) => {
                let k = *k;
                if k >= n {
                    randpasses += n;
                    n = 0;
                } else {
                    randpasses += k;
                    n -= k;
                }
            }
            Block::Patterns(list) => {
                let k = list.len();
                if k <= n {
                    chosen.extend(list.iter().map(|&p| PassCode::Pattern(p)));
                    n -= k;
                } else if n < 2 || 3 * n < k {
                    randpasses += n;
                    n = 0;
                } else {
                    // Reservoir-style selection: keep exactly n of the k
                    // remaining patterns, each with probability n/k at the
                    // point it's considered.
                    let mut remaining_in_block = k as u32;
                    let mut idx = 0usize;
                    loop {
                        let before = remaining_in_block;
                        remaining_in_block -= 1;
                        let take = n as u32 == before
                            || rng.uniform(remaining_in_block) < n as u32;
                        if take {
                            chosen.push(PassCode::Pattern(list[idx]));
                            n -= 1;
                        }
                        idx += 1;
                        if n == 0 {
                            break;
                        }
                    }
                }
            }
        }
        if n == 0 {
            break;
        }
    }

    (chosen, randpasses)
}

/// Stage 2: distribute `randpasses` random slots among `patterns` so that
/// one lands at the first slot, one at the last, and the remainder are
/// spread via Bresenham's line-draw algorithm; shuffle the pattern slots
/// into random order along the way.
fn interleave(
    patterns: Vec<PassCode>,
    randpasses: usize,
    rng: &mut WordRng,
) -> Vec<PassCode> {
    let top0 = patterns.len();
    let num = top0 + randpasses;
    let mut dest = patterns;
    dest.resize(num, PassCode::Random);

    if randpasses == 0 {
        // No random passes were chosen at all. The plan still needs a full
        // shuffle of its pattern slots.
        for n in 0..num {
            let span = num - n - 1;
            if span == 0 {
                break;
            }
            let swap = n + rng.uniform(span as u32) as usize;
            dest.swap(n, swap);
        }
        return dest;
    }

    let mut top = top0;
    let step = randpasses - 1;
    let mut accum = step;
    for n in 0..num {
        if accum <= step {
            accum += num - 1;
            dest[top] = dest[n];
            top += 1;
            dest[n] = PassCode::Random;
        } else {
            let span = top - n - 1;
            let swap = n + rng.uniform(span as u32) as usize;
            dest.swap(n, swap);
        }
        accum -= step;
    }
    debug_assert_eq!(top, num);
    dest
}

/// Generate a random wiping pass pattern of exactly `num` passes. Empty for
/// `num == 0`.
pub fn genpattern(num: usize, rng: &mut WordRng) -> Vec<PassCode> {
    if num == 0 {
        return Vec::new();
    }
    let (patterns, randpasses) = select(num, rng);
    interleave(patterns, randpasses, rng)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::isaac::IsaacState;

    fn rng_from(seed: &[u8]) -> IsaacState {
        let mut s = IsaacState::seed_start();
        s.seed_data(seed);
        s.seed_finish();
        s
    }

    #[test]
    fn plan_composition_holds_for_small_n() {
        for n in 1..=200usize {
            let mut s = rng_from(format!("plan-{n}").as_bytes());
            let mut rng = WordRng::new(&mut s);
            let plan = genpattern(n, &mut rng);
            assert_eq!(plan.len(), n);
            if n >= 2 {
                assert_eq!(plan[0], PassCode::Random, "n={n}");
                assert_eq!(plan[n - 1], PassCode::Random, "n={n}");
            }
            for p in &plan {
                if let PassCode::Pattern(code) = p {
                    assert!(*code <= 0x1fff, "n={n} code={code:#x}");
                    assert_eq!(code & !0x1fff, 0);
                }
            }
        }
    }

    #[test]
    fn catalog_coverage_at_25() {
        let mut s = rng_from(b"catalog-coverage-fixed-seed");
        let mut rng = WordRng::new(&mut s);
        let plan = genpattern(25, &mut rng);
        assert_eq!(plan.len(), 25);

        let random_count =
            plan.iter().filter(|p| **p == PassCode::Random).count();
        assert_eq!(random_count, 3);

        let one_bit = [0x000u16, 0xFFF];
        let two_bit = [0x555u16, 0xAAA];
        let three_bit = [0x249u16, 0x492, 0x6DB, 0x924, 0xB6D, 0xDB6];
        let four_bit = [
            0x111u16, 0x222, 0x333, 0x444, 0x666, 0x777, 0x888, 0x999, 0xBBB,
            0xCCC, 0xDDD, 0xEEE,
        ];

        let count_in = |set: &[u16]| {
            plan.iter()
                .filter(|p| {
                    matches!(p, PassCode::Pattern(c) if set.contains(c))
                })
                .count()
        };
        assert_eq!(count_in(&one_bit), 2);
        assert_eq!(count_in(&two_bit), 2);
        assert_eq!(count_in(&three_bit), 6);
        assert_eq!(count_in(&four_bit), 12);
    }

    #[test]
    fn interleave_shuffles_even_with_zero_random_passes() {
        let mut s = rng_from(b"tie-break-zero-random");
        let mut rng = WordRng::new(&mut s);
        let patterns: Vec<PassCode> =
            (0..10).map(|i| PassCode::Pattern(i as u16)).collect();
        let out = interleave(patterns.clone(), 0, &mut rng);
        assert_eq!(out.len(), patterns.len());
        // Every original element must still be present exactly once.
        let mut sorted_in: Vec<_> =
            patterns.iter().map(|p| p.fill_bits()).collect();
        let mut sorted_out: Vec<_> =
            out.iter().map(|p| p.fill_bits()).collect();
        sorted_in.sort();
        sorted_out.sort();
        assert_eq!(sorted_in, sorted_out);
    }

    #[test]
    fn single_slot_with_zero_random_passes_is_unchanged() {
        let mut s = rng_from(b"tie-break-n1");
        let mut rng = WordRng::new(&mut s);
        let patterns = vec![PassCode::Pattern(0x555)];
        let out = interleave(patterns, 0, &mut rng);
        assert_eq!(out, vec![PassCode::Pattern(0x555)]);
    }

    #[test]
    fn display_matches_pass_name_convention() {
        assert_eq!(PassCode::Random.to_string(), "random");
        assert_eq!(PassCode::Pattern(0x249).to_string(), "249");
        assert_eq!(PassCode::Pattern(0x1fff).to_string(), "fff");
    }
}
