//! Push-id generation.
//!
//! Push ids are time-ordered UUIDv7 values rendered as 32 lowercase hex
//! digits, so lexicographic key order matches creation order.

use parking_lot::{const_mutex, Mutex};
use uuid::Uuid;

static LAST: Mutex<u128> = const_mutex(0);

/// Generates a new push id.
///
/// Ids from one process are strictly increasing, even when the clock
/// stalls or steps backwards.
pub fn push_id() -> String {
    let candidate = Uuid::now_v7().as_u128();
    let mut last = LAST.lock();
    let next = if candidate > *last {
        candidate
    } else {
        last.wrapping_add(1)
    };
    *last = next;
    Uuid::from_u128(next).simple().to_string()
}
