//! Time-ordered 64-bit ID generation.
//!
//! Layout: 41 bits of milliseconds since the service epoch, 5 bits of
//! datacenter, 5 bits of worker, 12 bits of intra-millisecond sequence.
//! A single generator instance produces strictly increasing values; each
//! repository owns its own instance with a distinct worker ID.

use std::sync::Mutex;
use std::time::{SystemTime, UNIX_EPOCH};

use crate::domain::DataError;

/// Service epoch: 2023-01-01T00:00:00Z in Unix milliseconds.
const EPOCH_MS: i64 = 1_672_531_200_000;

const WORKER_ID_BITS: u8 = 5;
const DATACENTER_ID_BITS: u8 = 5;
const SEQUENCE_BITS: u8 = 12;

const MAX_WORKER_ID: i64 = (1 << WORKER_ID_BITS) - 1;
const MAX_DATACENTER_ID: i64 = (1 << DATACENTER_ID_BITS) - 1;
const MAX_SEQUENCE: i64 = (1 << SEQUENCE_BITS) - 1;

const WORKER_ID_SHIFT: u8 = SEQUENCE_BITS;
const DATACENTER_ID_SHIFT: u8 = SEQUENCE_BITS + WORKER_ID_BITS;
const TIMESTAMP_SHIFT: u8 = SEQUENCE_BITS + WORKER_ID_BITS + DATACENTER_ID_BITS;

/// Construction errors for [`IdGenerator`].
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum IdGeneratorError {
    #[error("worker id {0} out of range 0..={MAX_WORKER_ID}")]
    WorkerIdOutOfRange(i64),
    #[error("datacenter id {0} out of range 0..={MAX_DATACENTER_ID}")]
    DatacenterIdOutOfRange(i64),
}

#[derive(Debug, Default)]
struct GeneratorState {
    last_timestamp: i64,
    sequence: i64,
}

/// Mutex-serialized ID mint.
///
/// When the 12-bit sequence saturates within one millisecond the generator
/// busy-waits for the next tick. A clock observed behind the last issued
/// timestamp fails the mint with [`DataError::Clock`]; the caller may retry
/// once the clock catches up.
#[derive(Debug)]
pub struct IdGenerator {
    worker_id: i64,
    datacenter_id: i64,
    state: Mutex<GeneratorState>,
}

impl IdGenerator {
    /// Build a generator, validating the worker and datacenter IDs.
    pub fn new(worker_id: i64, datacenter_id: i64) -> Result<Self, IdGeneratorError> {
        if !(0..=MAX_WORKER_ID).contains(&worker_id) {
            return Err(IdGeneratorError::WorkerIdOutOfRange(worker_id));
        }
        if !(0..=MAX_DATACENTER_ID).contains(&datacenter_id) {
            return Err(IdGeneratorError::DatacenterIdOutOfRange(datacenter_id));
        }
        Ok(Self {
            worker_id,
            datacenter_id,
            state: Mutex::new(GeneratorState::default()),
        })
    }

    /// Mint the next ID, strictly greater than every ID minted before it on
    /// this instance.
    pub fn next_id(&self) -> Result<i64, DataError> {
        let mut state = self
            .state
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner);

        let mut now = current_millis();
        if now < state.last_timestamp {
            return Err(DataError::Clock {
                backwards_ms: state.last_timestamp - now,
            });
        }

        if now == state.last_timestamp {
            state.sequence = (state.sequence + 1) & MAX_SEQUENCE;
            if state.sequence == 0 {
                // Sequence exhausted for this millisecond; spin to the next
                // tick. The window is at most 1ms.
                while now <= state.last_timestamp {
                    now = current_millis();
                }
            }
        } else {
            state.sequence = 0;
        }

        state.last_timestamp = now;

        Ok(((now - EPOCH_MS) << TIMESTAMP_SHIFT)
            | (self.datacenter_id << DATACENTER_ID_SHIFT)
            | (self.worker_id << WORKER_ID_SHIFT)
            | state.sequence)
    }
}

fn current_millis() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as i64)
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case(-1, 0)]
    #[case(32, 0)]
    fn rejects_out_of_range_worker_ids(#[case] worker: i64, #[case] datacenter: i64) {
        assert!(matches!(
            IdGenerator::new(worker, datacenter),
            Err(IdGeneratorError::WorkerIdOutOfRange(_))
        ));
    }

    #[rstest]
    #[case(0, -1)]
    #[case(0, 32)]
    fn rejects_out_of_range_datacenter_ids(#[case] worker: i64, #[case] datacenter: i64) {
        assert!(matches!(
            IdGenerator::new(worker, datacenter),
            Err(IdGeneratorError::DatacenterIdOutOfRange(_))
        ));
    }

    #[rstest]
    fn ids_are_strictly_increasing() {
        let generator = IdGenerator::new(1, 1).expect("valid ids");
        let mut last = 0;
        for _ in 0..1_000_000 {
            let id = generator.next_id().expect("mint succeeds");
            assert!(id > last, "id {id} not greater than {last}");
            last = id;
        }
    }

    #[rstest]
    fn ids_embed_worker_and_datacenter() {
        let generator = IdGenerator::new(3, 5).expect("valid ids");
        let id = generator.next_id().expect("mint succeeds");
        assert_eq!((id >> WORKER_ID_SHIFT) & MAX_WORKER_ID, 3);
        assert_eq!((id >> DATACENTER_ID_SHIFT) & MAX_DATACENTER_ID, 5);
    }

    #[rstest]
    fn concurrent_mints_never_collide() {
        use std::collections::HashSet;
        use std::sync::Arc;

        let generator = Arc::new(IdGenerator::new(0, 0).expect("valid ids"));
        let handles: Vec<_> = (0..4)
            .map(|_| {
                let generator = Arc::clone(&generator);
                std::thread::spawn(move || {
                    (0..10_000)
                        .map(|_| generator.next_id().expect("mint succeeds"))
                        .collect::<Vec<_>>()
                })
            })
            .collect();

        let mut seen = HashSet::new();
        for handle in handles {
            for id in handle.join().expect("thread completes") {
                assert!(seen.insert(id), "duplicate id {id}");
            }
        }
    }
}
