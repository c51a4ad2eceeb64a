use anyhow::anyhow;
use core_affinity::{CoreId, get_core_ids, set_for_current};

/// Pin the calling thread to the given logical core.
/// Returns the pinned id on success.
pub fn try_pin_core(core_id: usize) -> anyhow::Result<usize> {
    let available = get_core_ids().unwrap_or_default();
    if core_id < available.len() && set_for_current(CoreId { id: core_id }) {
        return Ok(core_id);
    }
    Err(anyhow!("cannot pin thread to core {core_id}"))
}
