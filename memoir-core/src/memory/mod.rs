//! The memory subsystem: records, annotation parsing, pairing, the
//! summarization queue, tier classification, importance weighting, and
//! injection composition.

pub mod annotate;
pub mod compose;
pub mod ledger;
pub mod pairing;
pub mod queue;
pub mod record;
pub mod store;
pub mod tiers;
pub mod vectors;
pub mod weight;
