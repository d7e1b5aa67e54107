//! Hybrid logical clock used to stamp every mergeable change
//!
//! An HLC is encoded as 16 characters, six bits per character:
//! seven for a 42-bit logical time, four for a 24-bit counter and five for a
//! 30-bit hash of the client id. The alphabet is in ASCII order so the
//! encoded strings sort exactly like the numbers they encode.

use crate::{
    merkle::get_hash,
    types::{Hlc, HlcParts, Timestamp},
};
use std::{
    fmt,
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc,
    },
};
use tracing::trace;

/// Length of an encoded HLC
pub const HLC_LENGTH: usize = 16;

const ALPHABET: &[u8; 64] = b"-0123456789ABCDEFGHIJKLMNOPQRSTUVWXYZ_abcdefghijklmnopqrstuvwxyz";
const MASK6: u64 = 63;
const TIME_CHARS: usize = 7;
const COUNTER_CHARS: usize = 4;
const CLIENT_CHARS: usize = 5;

/// Largest logical time an HLC can carry
pub const MAX_LOGICAL_TIME: u64 = (1 << 42) - 1;
/// Largest counter an HLC can carry
pub const MAX_COUNTER: u32 = (1 << 24) - 1;

pub(crate) fn is_hlc_char(c: char) -> bool {
    c.is_ascii() && ALPHABET.contains(&(c as u8))
}

fn encode6(num: u64) -> char {
    ALPHABET[(num & MASK6) as usize] as char
}

fn decode6(byte: u8) -> u64 {
    ALPHABET
        .iter()
        .position(|c| *c == byte)
        .map_or(0, |position| position as u64)
}

fn encode_number(out: &mut String, num: u64, chars: usize) {
    for index in (0..chars).rev() {
        out.push(encode6(num >> (index * 6)));
    }
}

fn decode_number(bytes: &[u8]) -> u64 {
    bytes.iter().fold(0, |num, byte| (num << 6) | decode6(*byte))
}

/// Encode the 30-bit client part of an HLC from a client hash
pub fn encode_client_part(client_hash: u32) -> String {
    let mut out = String::with_capacity(CLIENT_CHARS);
    encode_number(&mut out, u64::from(client_hash), CLIENT_CHARS);
    out
}

fn encode_with_client_part(logical_time: u64, counter: u32, client_part: &str) -> Hlc {
    let mut out = String::with_capacity(HLC_LENGTH);
    encode_number(&mut out, logical_time, TIME_CHARS);
    encode_number(&mut out, u64::from(counter), COUNTER_CHARS);
    out.push_str(client_part);
    Hlc::from_encoded(out)
}

/// Encode a logical time, counter and client hash into an HLC
pub fn encode_hlc(logical_time: u64, counter: u32, client_hash: u32) -> Hlc {
    encode_with_client_part(logical_time, counter, &encode_client_part(client_hash))
}

/// Decode an HLC into its parts. The empty HLC decodes to zero time and counter.
pub fn decode_hlc(hlc: &Hlc) -> HlcParts {
    let bytes = hlc.as_str().as_bytes();
    if bytes.len() != HLC_LENGTH {
        return HlcParts {
            logical_time: 0,
            counter: 0,
            client_part: String::new(),
        };
    }
    HlcParts {
        logical_time: decode_number(&bytes[..TIME_CHARS]),
        counter: decode_number(&bytes[TIME_CHARS..TIME_CHARS + COUNTER_CHARS]) as u32,
        client_part: hlc.as_str()[TIME_CHARS + COUNTER_CHARS..].to_string(),
    }
}

/// Source of wall-clock time for an [`HlcClock`]
pub trait TimeSource: Send + Sync + fmt::Debug {
    /// Current wall-clock time
    fn now(&self) -> Timestamp;
}

/// Time source backed by the system clock
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemTimeSource;

impl TimeSource for SystemTimeSource {
    fn now(&self) -> Timestamp {
        Timestamp::now()
    }
}

/// Time source that only moves when told to. Used for deterministic replicas.
#[derive(Debug, Default)]
pub struct ManualTimeSource {
    millis: AtomicU64,
}

impl ManualTimeSource {
    /// Create a manual source fixed at `millis`
    pub fn new(millis: u64) -> Self {
        Self {
            millis: AtomicU64::new(millis),
        }
    }

    /// Move the clock to `millis`
    pub fn set(&self, millis: u64) {
        self.millis.store(millis, Ordering::SeqCst);
    }

    /// Move the clock forward by `millis`
    pub fn advance(&self, millis: u64) {
        self.millis.fetch_add(millis, Ordering::SeqCst);
    }
}

impl TimeSource for ManualTimeSource {
    fn now(&self) -> Timestamp {
        Timestamp::from_millis(self.millis.load(Ordering::SeqCst))
    }
}

/// Per-replica hybrid logical clock.
///
/// Tracks wall-clock time while there is no contention and behaves like a
/// Lamport clock otherwise: HLCs issued by one clock are strictly
/// increasing, and observing a remote HLC never lets the local clock fall
/// behind it.
#[derive(Debug, Clone)]
pub struct HlcClock {
    logical_time: u64,
    last_counter: i64,
    client_part: String,
    time_source: Arc<dyn TimeSource>,
}

impl HlcClock {
    /// Create a clock using the system time. Without a unique id the client
    /// part is derived from a random UUID.
    pub fn new(unique_id: Option<&str>) -> Self {
        Self::with_time_source(unique_id, Arc::new(SystemTimeSource))
    }

    /// Create a clock reading time from `time_source`
    pub fn with_time_source(unique_id: Option<&str>, time_source: Arc<dyn TimeSource>) -> Self {
        let client_hash = match unique_id {
            Some(unique_id) => get_hash(unique_id),
            None => get_hash(&uuid::Uuid::new_v4().to_string()),
        };
        Self {
            logical_time: 0,
            last_counter: -1,
            client_part: encode_client_part(client_hash),
            time_source,
        }
    }

    /// The encoded client part every HLC from this clock ends with
    pub fn client_part(&self) -> &str {
        &self.client_part
    }

    /// Issue the next HLC for a local write
    pub fn next_hlc(&mut self) -> Hlc {
        self.seen_hlc(None);
        self.last_counter += 1;
        if self.last_counter > i64::from(MAX_COUNTER) {
            self.logical_time += 1;
            self.last_counter = 0;
        }
        let hlc = encode_with_client_part(
            self.logical_time,
            self.last_counter as u32,
            &self.client_part,
        );
        trace!(hlc = %hlc, "issued hlc");
        hlc
    }

    /// Observe an HLC (typically from a remote write) so that the next local
    /// HLC is greater than it
    pub fn seen_hlc(&mut self, remote: Option<&Hlc>) {
        let previous_time = self.logical_time;
        let (remote_time, remote_counter) = match remote {
            Some(hlc) if !hlc.is_empty() => {
                let parts = decode_hlc(hlc);
                (parts.logical_time, i64::from(parts.counter))
            }
            _ => (0, 0),
        };
        let now = self.time_source.now().as_millis().min(MAX_LOGICAL_TIME);

        self.logical_time = previous_time.max(remote_time).max(now);
        self.last_counter = if self.logical_time == previous_time {
            if self.logical_time == remote_time {
                self.last_counter.max(remote_counter)
            } else {
                self.last_counter
            }
        } else if self.logical_time == remote_time {
            remote_counter
        } else {
            -1
        };
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fixed_clock(unique_id: &str, millis: u64) -> (HlcClock, Arc<ManualTimeSource>) {
        let time = Arc::new(ManualTimeSource::new(millis));
        let clock = HlcClock::with_time_source(Some(unique_id), time.clone());
        (clock, time)
    }

    #[test]
    fn test_encode_decode_round_trip() {
        let hlc = encode_hlc(1_704_067_200_000, 42, 123_456_789);
        let parts = decode_hlc(&hlc);
        assert_eq!(hlc.as_str().len(), HLC_LENGTH);
        assert_eq!(parts.logical_time, 1_704_067_200_000);
        assert_eq!(parts.counter, 42);
        assert_eq!(parts.client_part, encode_client_part(123_456_789));
    }

    #[test]
    fn test_zero_encodes_to_lowest_chars() {
        assert_eq!(encode_hlc(0, 0, 0).as_str(), "----------------");
        assert_eq!(
            encode_hlc(MAX_LOGICAL_TIME, MAX_COUNTER, u32::MAX).as_str(),
            "zzzzzzzzzzzzzzzz"
        );
    }

    #[test]
    fn test_successive_hlcs_increase_with_fixed_time() {
        let (mut clock, _time) = fixed_clock("s1", 1_000);
        let first = clock.next_hlc();
        let second = clock.next_hlc();
        let third = clock.next_hlc();
        assert!(first < second);
        assert!(second < third);
        assert_eq!(decode_hlc(&first).counter, 0);
        assert_eq!(decode_hlc(&third).counter, 2);
    }

    #[test]
    fn test_counter_resets_when_time_advances() {
        let (mut clock, time) = fixed_clock("s1", 1_000);
        clock.next_hlc();
        clock.next_hlc();
        time.advance(5);
        let hlc = clock.next_hlc();
        let parts = decode_hlc(&hlc);
        assert_eq!(parts.logical_time, 1_005);
        assert_eq!(parts.counter, 0);
    }

    #[test]
    fn test_seen_remote_hlc_moves_clock_forward() {
        let (mut local, _local_time) = fixed_clock("s1", 1_000);
        let (mut remote, _remote_time) = fixed_clock("s2", 9_000);
        remote.next_hlc();
        let remote_hlc = remote.next_hlc();

        local.seen_hlc(Some(&remote_hlc));
        let next = local.next_hlc();
        let parts = decode_hlc(&next);
        assert!(next > remote_hlc);
        assert_eq!(parts.logical_time, 9_000);
        assert_eq!(parts.counter, 2);
    }

    #[test]
    fn test_seen_older_hlc_does_not_regress() {
        let (mut clock, _time) = fixed_clock("s1", 5_000);
        let before = clock.next_hlc();
        clock.seen_hlc(Some(&encode_hlc(10, 3, 7)));
        let after = clock.next_hlc();
        assert!(after > before);
    }

    #[test]
    fn test_counter_overflow_rolls_time() {
        let (mut clock, _time) = fixed_clock("s1", 1_000);
        clock.seen_hlc(Some(&encode_hlc(1_000, MAX_COUNTER, 0)));
        let hlc = clock.next_hlc();
        let parts = decode_hlc(&hlc);
        assert_eq!(parts.logical_time, 1_001);
        assert_eq!(parts.counter, 0);
    }

    #[test]
    fn test_client_part_is_stable_per_id() {
        let (a, _) = fixed_clock("device-a", 0);
        let (b, _) = fixed_clock("device-a", 0);
        let (c, _) = fixed_clock("device-c", 0);
        assert_eq!(a.client_part(), b.client_part());
        assert_ne!(a.client_part(), c.client_part());
        assert_eq!(a.client_part().len(), 5);
    }
}
