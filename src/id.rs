//! Mapping between externally visible UUIDs and the engine's 128-bit ids.
//!
//! The engine id is the UUID's 32 hex digits read as one base-16 integer, so
//! the mapping is reversible and preserves the textual ordering of ids.

use uuid::Uuid;

/// Identifier used by the accounting engine for accounts and transfers.
pub type EngineId = u128;

/// Strip the hyphens from `id` and read the remaining hex digits as an integer.
pub fn to_engine_id(id: &Uuid) -> EngineId {
    // `as_u128` is the big-endian reading of the 16 bytes, i.e. exactly the
    // integer spelled by the simple (unhyphenated) hex form.
    id.as_u128()
}

/// Zero-pad `id` to 32 hex digits and re-insert hyphens at 8-4-4-4-12.
pub fn to_external_id(id: EngineId) -> Uuid {
    Uuid::from_u128(id)
}

/// Deterministic id for a secondary engine record belonging to `transfer_id`.
///
/// Redelivered fulfil or abort requests derive the same ids, so the engine
/// reports them as already existing instead of applying them twice.
pub fn derived_id(transfer_id: &Uuid, purpose: &str) -> EngineId {
    to_engine_id(&Uuid::new_v5(transfer_id, purpose.as_bytes()))
}

/// Fresh random id, used for newly provisioned accounts.
pub fn random_id() -> EngineId {
    to_engine_id(&Uuid::new_v4())
}
