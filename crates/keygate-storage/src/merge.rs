//! Pure row-merge rules for capability upserts and patches, kept separate
//! from the ORM so the invariants are testable without a database.

use keygate_channel::FetchedCapability;

use crate::storage::{ModelCapabilityRecord, ModelPatch};

/// Fold a freshly-fetched capability into an existing row.
///
/// Auto-refresh owns the name, the `supports_*` flags and the fetch
/// bookkeeping; optional limits are only overwritten when the provider
/// reported them, and `custom_capabilities` is untouched.
pub fn merge_fetched(
    existing: &ModelCapabilityRecord,
    fetched: &FetchedCapability,
) -> ModelCapabilityRecord {
    let mut row = existing.clone();
    row.model_name = fetched.model_name.clone();
    row.supports_streaming = fetched.supports_streaming;
    row.supports_vision = fetched.supports_vision;
    row.supports_functions = fetched.supports_functions;
    row.is_auto_fetched = true;
    row.last_fetched_at = Some(fetched.last_fetched_at);
    if fetched.max_tokens.is_some() {
        row.max_tokens = fetched.max_tokens;
    }
    if fetched.max_input_tokens.is_some() {
        row.max_input_tokens = fetched.max_input_tokens;
    }
    if fetched.max_output_tokens.is_some() {
        row.max_output_tokens = fetched.max_output_tokens;
    }
    row
}

/// Apply a partial update. Absent fields stay put; explicit nulls clear the
/// optional limits.
pub fn apply_patch(existing: &ModelCapabilityRecord, patch: &ModelPatch) -> ModelCapabilityRecord {
    let mut row = existing.clone();
    if let Some(v) = patch.supports_streaming {
        row.supports_streaming = v;
    }
    if let Some(v) = patch.supports_vision {
        row.supports_vision = v;
    }
    if let Some(v) = patch.supports_functions {
        row.supports_functions = v;
    }
    if let Some(v) = patch.max_tokens {
        row.max_tokens = v;
    }
    if let Some(v) = patch.max_input_tokens {
        row.max_input_tokens = v;
    }
    if let Some(v) = patch.max_output_tokens {
        row.max_output_tokens = v;
    }
    if let Some(v) = &patch.custom_capabilities {
        row.custom_capabilities = Some(v.clone());
    }
    row
}
