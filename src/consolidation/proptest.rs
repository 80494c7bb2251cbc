//! Property-based tests for the consolidation building blocks.
//!
//! - Normalization is a bijection over its input, and nothing outside it resolves
//! - A payload decodes only under the tag it was shaped for
//! - Backfill returns everything above threshold, topped up to `min_top_k`
