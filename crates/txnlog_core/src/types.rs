//! Transaction identifiers.
//!
//! A transaction id is a time-ordered UUID (version 1). Its string form is
//! what lands on disk in Transaction and Replay lines; its embedded
//! timestamp defines the total order used to decide whether an anchor lives
//! in the active file or in the archive.

use parking_lot::Mutex;
use rand::RngCore;
use std::fmt;
use std::str::FromStr;
use std::time::{SystemTime, UNIX_EPOCH};
use uuid::{Timestamp, Uuid};

/// 100ns ticks between the gregorian epoch (1582-10-15) and the unix epoch.
const UUID_TICKS_BETWEEN_EPOCHS: u64 = 0x01B2_1DD2_1381_4000;

/// Maximum value of the 14-bit clock sequence.
const MAX_CLOCK_SEQ: u16 = 0x3FFF;

/// A time-ordered transaction id.
///
/// Two ids produced by the same log compare by their embedded timestamp
/// (100ns gregorian ticks, clock sequence as tiebreak); see
/// [`order_key`](TxnId::order_key). Equality is plain UUID equality.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TxnId(Uuid);

impl TxnId {
    /// Wraps an existing UUID.
    #[must_use]
    pub const fn from_uuid(uuid: Uuid) -> Self {
        Self(uuid)
    }

    /// Returns the inner UUID.
    #[must_use]
    pub const fn as_uuid(&self) -> &Uuid {
        &self.0
    }

    /// Parses an id from its on-disk byte form (a hyphenated UUID string).
    ///
    /// Returns `None` if the bytes are not valid UTF-8 or not a UUID.
    #[must_use]
    pub fn parse_bytes(bytes: &[u8]) -> Option<Self> {
        let s = std::str::from_utf8(bytes).ok()?;
        Uuid::parse_str(s).ok().map(Self)
    }

    /// Returns the ordering key `(ticks << 16) | clock_seq`.
    ///
    /// `None` for UUIDs without an embedded timestamp; such ids never
    /// compare greater-or-equal to anything, so they resolve to the archive
    /// during source selection.
    #[must_use]
    pub fn order_key(&self) -> Option<u128> {
        let (ticks, counter) = self.0.get_timestamp()?.to_rfc4122();
        Some((u128::from(ticks) << 16) | u128::from(counter))
    }

    /// Returns the embedded timestamp as unix seconds.
    #[must_use]
    pub fn unix_seconds(&self) -> Option<i64> {
        let (secs, _nanos) = self.0.get_timestamp()?.to_unix();
        i64::try_from(secs).ok()
    }
}

impl fmt::Display for TxnId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.hyphenated().fmt(f)
    }
}

impl FromStr for TxnId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Uuid::parse_str(s).map(Self)
    }
}

/// Mints strictly ascending transaction ids.
///
/// Ids are UUIDv1 with a random per-generator node id. Within a generator
/// the `(ticks, clock_seq)` pair is strictly increasing even when the
/// system clock stalls or steps backward; seeding with
/// [`with_floor`](TxnIdGen::with_floor) extends the guarantee across
/// process restarts.
#[derive(Debug)]
pub struct TxnIdGen {
    node: [u8; 6],
    state: Mutex<LastStamp>,
}

#[derive(Debug, Clone, Copy, Default)]
struct LastStamp {
    ticks: u64,
    counter: u16,
}

impl TxnIdGen {
    /// Creates a generator with a random node id.
    #[must_use]
    pub fn new() -> Self {
        let mut node = [0u8; 6];
        rand::thread_rng().fill_bytes(&mut node);
        // Multicast bit marks the node id as non-IEEE802.
        node[0] |= 0x01;

        Self {
            node,
            state: Mutex::new(LastStamp::default()),
        }
    }

    /// Creates a generator that will only mint ids ordered after `floor`.
    #[must_use]
    pub fn with_floor(floor: Option<&TxnId>) -> Self {
        let gen = Self::new();
        if let Some(id) = floor {
            gen.raise_floor(id);
        }
        gen
    }

    /// Raises the generator floor so subsequent ids order after `id`.
    ///
    /// Ids already below the floor are unaffected.
    pub fn raise_floor(&self, id: &TxnId) {
        if let Some(ts) = id.as_uuid().get_timestamp() {
            let (ticks, counter) = ts.to_rfc4122();
            let mut state = self.state.lock();
            if ticks > state.ticks || (ticks == state.ticks && counter > state.counter) {
                *state = LastStamp { ticks, counter };
            }
        }
    }

    /// Mints the next transaction id.
    #[must_use]
    pub fn next(&self) -> TxnId {
        let now = gregorian_ticks_now();
        let mut state = self.state.lock();

        if now > state.ticks {
            *state = LastStamp {
                ticks: now,
                counter: 0,
            };
        } else if state.counter < MAX_CLOCK_SEQ {
            state.counter += 1;
        } else {
            // Clock sequence exhausted within one tick; borrow the next one.
            state.ticks += 1;
            state.counter = 0;
        }

        let ts = Timestamp::from_rfc4122(state.ticks, state.counter);
        TxnId(Uuid::new_v1(ts, &self.node))
    }
}

impl Default for TxnIdGen {
    fn default() -> Self {
        Self::new()
    }
}

fn gregorian_ticks_now() -> u64 {
    let now = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default();
    now.as_secs() * 10_000_000 + u64::from(now.subsec_nanos() / 100) + UUID_TICKS_BETWEEN_EPOCHS
}
