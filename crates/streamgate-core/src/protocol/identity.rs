//! Stream identity allocation.

use rand::rngs::OsRng;
use rand::RngCore;

/// Allocate a stream identity not currently live in the owning scope.
///
/// Draws cryptographically random 64-bit values and retries on collision;
/// at realistic map sizes the birthday bound makes a retry vanishingly rare,
/// so the loop carries no artificial cap. Zero is never returned: a control
/// record whose `stId` is absent means "open a new stream", so id 0 would be
/// ambiguous on the wire.
pub fn allocate_stream_id<F>(is_live: F) -> u64
where
    F: Fn(u64) -> bool,
{
    loop {
        let id = OsRng.next_u64();
        if id != 0 && !is_live(id) {
            return id;
        }
    }
}
