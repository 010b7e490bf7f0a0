//! Keyed record storage for the active conversation.
//!
//! Records live in a map from unit index to [`MemoryRecord`]. The store
//! validates records against the live transcript on load and quietly drops
//! anything stale; persistence of the validated map is handled by the
//! archive layer.

use std::collections::HashMap;

use log::{debug, info};

use super::annotate::contains_word;
use super::pairing::{pair_partner, PairingPolicy};
use super::record::MemoryRecord;
use crate::transcript::Transcript;

/// Result of a load pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct LoadReport {
    /// Records that passed validation.
    pub kept: usize,
    /// Records dropped for failing validation.
    pub dropped: usize,
    /// True when the call was a no-op because this conversation was already
    /// loaded and non-empty.
    pub already_loaded: bool,
}

/// In-memory record storage for one conversation at a time.
#[derive(Debug, Default)]
pub struct MemoryStore {
    conversation_id: Option<String>,
    records: HashMap<usize, MemoryRecord>,
}

impl MemoryStore {
    /// Create an empty store bound to no conversation.
    pub fn new() -> Self {
        Self::default()
    }

    /// The conversation the store currently holds records for.
    pub fn conversation_id(&self) -> Option<&str> {
        self.conversation_id.as_deref()
    }

    /// Bind the store to a conversation, clearing any previous records.
    pub fn start_conversation(&mut self, id: impl Into<String>) {
        self.conversation_id = Some(id.into());
        self.records.clear();
    }

    /// Number of stored records.
    pub fn len(&self) -> usize {
        self.records.len()
    }

    /// True when no records are stored.
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// File a record under `index`. When the record covers a paired
    /// exchange, any record previously filed under the pair's other index
    /// is removed first, so a policy flip between enqueue and processing
    /// can move the filing target but never double-file.
    pub fn put(&mut self, index: usize, record: MemoryRecord, policy: PairingPolicy) {
        if record.is_paired {
            if let Some(partner) = pair_partner(index, policy) {
                if self.records.remove(&partner).is_some() {
                    debug!("[memory:store] refiled pair record away from index {partner}");
                }
            }
        }
        self.records.insert(index, record);
    }

    /// Get the record filed under `index`.
    pub fn get(&self, index: usize) -> Option<&MemoryRecord> {
        self.records.get(&index)
    }

    /// Mutable access to the record filed under `index`.
    pub fn get_mut(&mut self, index: usize) -> Option<&mut MemoryRecord> {
        self.records.get_mut(&index)
    }

    /// True when a record is filed under exactly `index`.
    pub fn has(&self, index: usize) -> bool {
        self.records.contains_key(&index)
    }

    /// Remove and return the record filed under `index`.
    pub fn delete(&mut self, index: usize) -> Option<MemoryRecord> {
        self.records.remove(&index)
    }

    /// All records, keyed by filing index.
    pub fn records(&self) -> &HashMap<usize, MemoryRecord> {
        &self.records
    }

    /// Mutable iteration for rescoring passes.
    pub fn records_mut(&mut self) -> impl Iterator<Item = (&usize, &mut MemoryRecord)> {
        self.records.iter_mut()
    }

    /// The record covering `index`, whether filed under `index` itself or
    /// under its pair partner.
    pub fn covering_record(
        &self,
        index: usize,
        policy: PairingPolicy,
    ) -> Option<(usize, &MemoryRecord)> {
        if let Some(record) = self.records.get(&index) {
            return Some((index, record));
        }
        let partner = pair_partner(index, policy)?;
        let record = self.records.get(&partner)?;
        record.paired_source_indices.contains(&index).then_some((partner, record))
    }

    /// True when `index` is covered by any record, directly or through a
    /// pair partner.
    pub fn is_summarized(&self, index: usize, policy: PairingPolicy) -> bool {
        self.covering_record(index, policy).is_some()
    }

    /// Load records for a conversation, validating each against the live
    /// transcript. Reloading the active conversation keeps the in-memory
    /// records instead of consuming `loaded`, but still revalidates every
    /// one of them, so a rewritten turn sheds its stale record without a
    /// trip back to disk. With unchanged turns the reload is a no-op.
    pub fn load_for_conversation(
        &mut self,
        id: &str,
        loaded: HashMap<usize, MemoryRecord>,
        transcript: &Transcript,
    ) -> LoadReport {
        if self.conversation_id.as_deref() == Some(id) && !self.records.is_empty() {
            let before = self.records.len();
            self.records
                .retain(|index, record| record_is_valid(*index, record, transcript));
            let dropped = before - self.records.len();
            if dropped > 0 {
                info!(
                    "[memory:store] dropped {dropped} stale record(s) revalidating conversation {id}"
                );
            }
            return LoadReport {
                kept: self.records.len(),
                dropped,
                already_loaded: true,
            };
        }

        self.conversation_id = Some(id.to_string());
        self.records.clear();

        let mut dropped = 0usize;
        for (index, record) in loaded {
            if record_is_valid(index, &record, transcript) {
                self.records.insert(index, record);
            } else {
                dropped += 1;
            }
        }

        if dropped > 0 {
            info!(
                "[memory:store] dropped {dropped} stale record(s) while loading conversation {id}"
            );
        }

        LoadReport {
            kept: self.records.len(),
            dropped,
            already_loaded: false,
        }
    }

    /// Indices of records that mention any of the given text's words as a
    /// stored character or topic. Used by the reinforcement sweep.
    pub fn detect_mentions(&self, text: &str) -> Vec<usize> {
        let lower = text.to_lowercase();
        let mut hits: Vec<usize> = self
            .records
            .iter()
            .filter(|(_, record)| {
                record
                    .characters
                    .iter()
                    .chain(record.topics.iter())
                    .any(|term| {
                        let term = term.to_lowercase();
                        !term.is_empty() && contains_word(&lower, &term)
                    })
            })
            .map(|(index, _)| *index)
            .collect();
        hits.sort_unstable();
        hits
    }
}

/// A record survives a load only when its text is non-empty, its target
/// index still exists, and every source hash matches the live turn.
fn record_is_valid(index: usize, record: &MemoryRecord, transcript: &Transcript) -> bool {
    if record.text.trim().is_empty() {
        return false;
    }
    if index >= transcript.len() {
        return false;
    }

    let sources: Vec<usize> = if record.paired_source_indices.is_empty() {
        vec![index]
    } else {
        record.paired_source_indices.clone()
    };

    if sources.len() != record.content_hashes.len() {
        return false;
    }

    sources
        .iter()
        .zip(record.content_hashes.iter())
        .all(|(source, stored_hash)| {
            transcript
                .hash_of(*source)
                .is_some_and(|live| &live == stored_hash)
        })
}
