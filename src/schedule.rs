//! Hop schedule derivation.
//!
//! Both endpoints expand the 16-bit session key into the same pseudo-random
//! ordering of the allowed channels and then agree, frame by frame, that the
//! datagram numbered `n` travels on `schedule[n mod len]`. The ordering has
//! to come out byte-identical on both sides, which is why the generator is
//! the crate's own [`Xorwow`](crate::rng::Xorwow) and never a platform RNG.

use heapless::Vec;

use crate::rng::Xorwow;
use crate::SessionKey;

/// Storage bound for a schedule; channels are confined to `0..=125`.
pub const MAX_SCHEDULE_SLOTS: usize = 125;

/// Draw an ordering of the distinct values in `0..=max_value`, skipping the
/// two excluded ones.
///
/// Candidates are drawn as `prng mod (max_value + 1)` and accepted iff not
/// yet taken and not excluded; rejected candidates are simply redrawn, which
/// keeps the ordering uniform over the admissible set without an
/// intermediate shuffle buffer. `out_len` must equal `max_value - 1`; when
/// the two excluded values coincide, one admissible value is left over and
/// never appears in the output.
pub fn permute(
    seed: u32,
    max_value: u8,
    exclude_a: u8,
    exclude_b: u8,
    out_len: usize,
) -> Vec<u8, MAX_SCHEDULE_SLOTS> {
    assert!(exclude_a <= max_value && exclude_b <= max_value);
    assert_eq!(out_len, max_value as usize + 1 - 2);

    let mut available = [false; MAX_SCHEDULE_SLOTS + 1];
    for slot in available.iter_mut().take(max_value as usize + 1) {
        *slot = true;
    }
    available[exclude_a as usize] = false;
    available[exclude_b as usize] = false;

    let mut prng = Xorwow::new(seed);
    let mut out = Vec::new();
    while out.len() < out_len {
        let candidate = prng.next_below(u32::from(max_value) + 1) as u8;
        if available[candidate as usize] {
            available[candidate as usize] = false;
            let _ = out.push(candidate);
        }
    }
    out
}

/// The per-session channel ordering used while hopping.
///
/// Neither the built-in default mono channel nor the configured one appears
/// in the schedule, so the bootstrap channel stays clear of hop traffic.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HopSchedule {
    channels: Vec<u8, MAX_SCHEDULE_SLOTS>,
}

impl HopSchedule {
    /// Expand `key` into the ordering of `max_channel - 1` channels.
    pub fn derive(key: SessionKey, max_channel: u8, mono_channel: u8) -> Self {
        let out_len = max_channel as usize - 1;
        HopSchedule {
            channels: permute(
                u32::from(key.get()),
                max_channel,
                crate::config::defaults::MONO_CHANNEL,
                mono_channel,
                out_len,
            ),
        }
    }

    /// Channel carrying the datagram numbered `number`.
    pub fn channel_for(&self, number: u16) -> u8 {
        self.channels[number as usize % self.channels.len()]
    }

    pub fn as_slice(&self) -> &[u8] {
        &self.channels
    }
}

impl get_move::Get for HopSchedule {
    type Output = u8;

    fn get_move(&self, index: usize) -> Option<Self::Output> {
        self.channels.get(index).copied()
    }

    fn len(&self) -> usize {
        self.channels.len()
    }
}

impl<'a> IntoIterator for &'a HopSchedule {
    type IntoIter = get_move::Iter<'a, HopSchedule>;
    type Item = u8;

    fn into_iter(self) -> Self::IntoIter {
        get_move::Get::iter(self)
    }
}
