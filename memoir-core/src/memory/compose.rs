//! Budgeted injection composition.
//!
//! Turns the classified store into one bounded text block for the host's
//! prompt. Sections are appended in a fixed priority order, each only if it
//! fits whole in the remaining budget; a section that does not fit is
//! skipped outright, never truncated mid-section. Overflow is therefore not
//! an error, just an omission. An empty result means "no memory available"
//! and the host injects nothing.
//!
//! Budget here is measured in characters. The banner line on top is the
//! only text not counted against the caller's budget.

use std::collections::HashMap;

use super::ledger::LedgerFact;
use super::record::MemoryRecord;
use super::tiers::TierPartition;
use super::vectors::VectorHit;

/// Fraction of the budget the cross-session section may claim.
pub const CROSS_SESSION_RESERVE: f64 = 0.20;

/// Item caps per tier section.
pub const PERMANENT_ITEM_CAP: usize = 10;
pub const LONG_TERM_ITEM_CAP: usize = 5;
pub const MEDIUM_TERM_ITEM_CAP: usize = 3;

/// Usage gates: a tier section is considered only while running usage is
/// under this fraction of the budget.
pub const LONG_TERM_GATE: f64 = 0.80;
pub const MEDIUM_TERM_GATE: f64 = 0.90;

/// Ceiling on banner text prepended outside the budget.
pub const HEADER_OVERHEAD: usize = 64;

const PROMPT_BANNER: &str = "[Story memory]";
const CROSS_SESSION_HEADER: &str = "Carried over from earlier conversations:";
const PERMANENT_HEADER: &str = "Pivotal memories:";
const LONG_TERM_HEADER: &str = "Important memories:";
const MEDIUM_TERM_HEADER: &str = "Recent notable memories:";
const SEMANTIC_HEADER: &str = "Possibly relevant moments:";

fn width(text: &str) -> usize {
    text.chars().count()
}

/// Compose the tiered injection block. `cross_session` and `semantic_hits`
/// arrive pre-filtered and pre-ranked; tier ordering comes from the
/// partition.
pub fn compose_tiered(
    records: &HashMap<usize, MemoryRecord>,
    partition: &TierPartition,
    cross_session: &[&LedgerFact],
    semantic_hits: &[VectorHit],
    max_budget: usize,
) -> String {
    let mut out = String::new();
    let mut used = 0usize;

    // 1. Cross-session facts, confined to their reserve.
    if !cross_session.is_empty() {
        let reserve = (max_budget as f64 * CROSS_SESSION_RESERVE).floor() as usize;
        let mut lines = Vec::new();
        let mut section_width = width(CROSS_SESSION_HEADER);
        for fact in cross_session {
            let line = format!("- {}: {}", fact.character, fact.content);
            let cost = 1 + width(&line);
            if section_width + cost > reserve {
                break;
            }
            section_width += cost;
            lines.push(line);
        }
        if let Some(section) = build_section(CROSS_SESSION_HEADER, lines) {
            try_append(&mut out, &mut used, max_budget, &section);
        }
    }

    // 2. Permanent: records first, synthesized recurring entries filling the
    // remainder of the cap.
    let mut permanent: Vec<String> = tier_lines(records, &partition.permanent);
    permanent.extend(partition.synthesized.iter().map(|e| format!("- {}", e.content)));
    permanent.truncate(PERMANENT_ITEM_CAP);
    if let Some(section) = build_section(PERMANENT_HEADER, permanent) {
        try_append(&mut out, &mut used, max_budget, &section);
    }

    // 3. Long-term, gated on running usage.
    if (used as f64) < LONG_TERM_GATE * max_budget as f64 {
        let mut lines = tier_lines(records, &partition.long_term);
        lines.truncate(LONG_TERM_ITEM_CAP);
        if let Some(section) = build_section(LONG_TERM_HEADER, lines) {
            try_append(&mut out, &mut used, max_budget, &section);
        }
    }

    // 4. Medium-term.
    if (used as f64) < MEDIUM_TERM_GATE * max_budget as f64 {
        let mut lines = tier_lines(records, &partition.medium_term);
        lines.truncate(MEDIUM_TERM_ITEM_CAP);
        if let Some(section) = build_section(MEDIUM_TERM_HEADER, lines) {
            try_append(&mut out, &mut used, max_budget, &section);
        }
    }

    // 5. Semantic retrieval hits, annotated with their similarity.
    if let Some(section) = build_section(SEMANTIC_HEADER, semantic_lines(semantic_hits)) {
        try_append(&mut out, &mut used, max_budget, &section);
    }

    finish(out)
}

/// Legacy composition: every record older than the running window, in index
/// order, no tier logic. Kept as a selectable fallback.
pub fn compose_legacy(
    records: &HashMap<usize, MemoryRecord>,
    window_cutoff: usize,
    semantic_hits: &[VectorHit],
    max_budget: usize,
) -> String {
    let mut indices: Vec<usize> = records.keys().copied().filter(|&i| i < window_cutoff).collect();
    indices.sort_unstable();

    let mut out = String::new();
    let mut used = 0usize;

    for index in indices {
        let line = format!("- {}", records[&index].text);
        if !push_line(&mut out, &mut used, max_budget, &line) {
            break;
        }
    }
    for line in semantic_lines(semantic_hits) {
        if !push_line(&mut out, &mut used, max_budget, &line) {
            break;
        }
    }

    finish(out)
}

fn tier_lines(records: &HashMap<usize, MemoryRecord>, indices: &[usize]) -> Vec<String> {
    indices
        .iter()
        .filter_map(|i| records.get(i))
        .map(|r| format!("- {}", r.text))
        .collect()
}

fn semantic_lines(hits: &[VectorHit]) -> Vec<String> {
    hits.iter()
        .map(|h| format!("- {} ({}% match)", h.text.trim(), (h.score * 100.0).round() as u32))
        .collect()
}

fn build_section(header: &str, lines: Vec<String>) -> Option<String> {
    if lines.is_empty() {
        return None;
    }
    let mut section = String::from(header);
    for line in lines {
        section.push('\n');
        section.push_str(&line);
    }
    Some(section)
}

/// Append a whole section if it fits; separator counts against the budget.
fn try_append(out: &mut String, used: &mut usize, budget: usize, section: &str) -> bool {
    let sep = if out.is_empty() { 0 } else { 2 };
    let cost = sep + width(section);
    if *used + cost > budget {
        return false;
    }
    if sep > 0 {
        out.push_str("\n\n");
    }
    out.push_str(section);
    *used += cost;
    true
}

/// Line-at-a-time append for legacy mode.
fn push_line(out: &mut String, used: &mut usize, budget: usize, line: &str) -> bool {
    let sep = if out.is_empty() { 0 } else { 1 };
    let cost = sep + width(line);
    if *used + cost > budget {
        return false;
    }
    if sep > 0 {
        out.push('\n');
    }
    out.push_str(line);
    *used += cost;
    true
}

fn finish(body: String) -> String {
    if body.is_empty() {
        return body;
    }
    format!("{PROMPT_BANNER}\n{body}")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::ledger::{CharacterLedger, LedgerCategory};
    use crate::memory::record::MemoryRecord;
    use chrono::Utc;

    fn record(text: &str) -> MemoryRecord {
        MemoryRecord::new(text, 100, vec!["ab".into()], Utc::now())
    }

    fn store_of(entries: Vec<(usize, &str)>) -> HashMap<usize, MemoryRecord> {
        entries.into_iter().map(|(i, t)| (i, record(t))).collect()
    }

    fn hit(text: &str, score: f64) -> VectorHit {
        VectorHit {
            text: text.into(),
            score,
            metadata: HashMap::new(),
        }
    }

    #[test]
    fn test_empty_inputs_compose_to_empty_string() {
        let records = HashMap::new();
        let partition = TierPartition::default();
        let out = compose_tiered(&records, &partition, &[], &[], 1000);
        assert_eq!(out, "");
    }

    #[test]
    fn test_sections_appear_in_priority_order() {
        let records = store_of(vec![(0, "pivotal"), (2, "important"), (4, "notable")]);
        let partition = TierPartition {
            permanent: vec![0],
            long_term: vec![2],
            medium_term: vec![4],
            ..Default::default()
        };

        let out = compose_tiered(&records, &partition, &[], &[], 1000);
        let pivotal = out.find("pivotal").unwrap();
        let important = out.find("important").unwrap();
        let notable = out.find("notable").unwrap();
        assert!(pivotal < important && important < notable);
    }

    #[test]
    fn test_budget_respected_across_budgets() {
        let records = store_of(vec![
            (0, "a pivotal moment that reshaped the story"),
            (2, "an important oath sworn at the docks"),
            (4, "a notable bargain struck at dawn"),
        ]);
        let partition = TierPartition {
            permanent: vec![0],
            long_term: vec![2],
            medium_term: vec![4],
            ..Default::default()
        };
        let hits = vec![hit("the amulet glowed", 0.75)];

        for budget in [0, 10, 50, 80, 120, 200, 500] {
            let out = compose_tiered(&records, &partition, &[], &hits, budget);
            assert!(
                out.chars().count() <= budget + HEADER_OVERHEAD,
                "budget {budget} produced {} chars",
                out.chars().count()
            );
        }
    }

    #[test]
    fn test_permanent_item_cap() {
        let entries: Vec<(usize, String)> =
            (0..12).map(|i| (i * 2, format!("pivotal event {i}"))).collect();
        let records: HashMap<usize, MemoryRecord> = entries
            .iter()
            .map(|(i, t)| (*i, record(t)))
            .collect();
        let partition = TierPartition {
            permanent: entries.iter().map(|(i, _)| *i).collect(),
            ..Default::default()
        };

        let out = compose_tiered(&records, &partition, &[], &[], 10_000);
        assert_eq!(out.matches("- pivotal event").count(), 10);
    }

    #[test]
    fn test_long_term_gate_blocks_after_usage() {
        // Permanent fills 170 of 200, over the 80% gate; long-term would fit
        // in the remainder but must not be considered. Medium's 90% gate
        // still passes.
        let big = "p".repeat(150);
        let records = store_of(vec![(0, big.as_str()), (2, "L"), (4, "M")]);
        let partition = TierPartition {
            permanent: vec![0],
            long_term: vec![2],
            medium_term: vec![4],
            ..Default::default()
        };

        let out = compose_tiered(&records, &partition, &[], &[], 200);
        assert!(!out.contains("Important memories"));
        assert!(out.contains("Recent notable memories"));
    }

    #[test]
    fn test_section_skipped_wholesale_when_too_big() {
        let permanent_text = "p".repeat(60);
        let medium_text = "m".repeat(40);
        let records = store_of(vec![(0, permanent_text.as_str()), (4, medium_text.as_str())]);
        let partition = TierPartition {
            permanent: vec![0],
            medium_term: vec![4],
            ..Default::default()
        };

        // Medium passes its gate but cannot fit whole; nothing partial may
        // leak out.
        let out = compose_tiered(&records, &partition, &[], &[], 100);
        assert!(out.contains(&permanent_text));
        assert!(!out.contains("Recent notable memories"));
        assert!(!out.contains("mmm"));
    }

    #[test]
    fn test_cross_session_section_comes_first_within_reserve() {
        let records = store_of(vec![(0, "pivotal")]);
        let partition = TierPartition {
            permanent: vec![0],
            ..Default::default()
        };

        let mut ledger = CharacterLedger::new();
        let now = Utc::now();
        ledger.record_fact("Ann", "a".repeat(100).as_str(), LedgerCategory::Knowledge, Some("other"), now);
        ledger.record_fact("Ann", "b".repeat(100).as_str(), LedgerCategory::Knowledge, Some("other"), now);
        let facts = ledger.cross_session(Some("current"), now, 30);

        // Reserve is 200 of 1000: header (40) plus one 108-char line fits,
        // the second line does not.
        let out = compose_tiered(&records, &partition, &facts, &[], 1000);
        assert!(out.contains("Carried over"));
        assert!(out.contains(&"a".repeat(100)));
        assert!(!out.contains(&"b".repeat(100)));

        let carried = out.find("Carried over").unwrap();
        let pivotal = out.find("Pivotal memories").unwrap();
        assert!(carried < pivotal);
    }

    #[test]
    fn test_synthesized_entries_fill_permanent_cap() {
        use crate::memory::tiers::{SynthesizedEntry, SynthesizedId, SynthesizedKind};

        let records = store_of(vec![(0, "pivotal")]);
        let partition = TierPartition {
            permanent: vec![0],
            synthesized: vec![SynthesizedEntry {
                id: SynthesizedId::new(),
                kind: SynthesizedKind::CharacterTrait,
                content: "Ann trusts Marcus".into(),
                importance: 8.0,
            }],
            ..Default::default()
        };

        let out = compose_tiered(&records, &partition, &[], &[], 1000);
        assert!(out.contains("- pivotal"));
        assert!(out.contains("- Ann trusts Marcus"));
    }

    #[test]
    fn test_semantic_hits_annotated_with_similarity() {
        let records = store_of(vec![(0, "pivotal")]);
        let partition = TierPartition {
            permanent: vec![0],
            ..Default::default()
        };
        let hits = vec![hit("the amulet glowed faintly", 0.724)];

        let out = compose_tiered(&records, &partition, &[], &hits, 1000);
        assert!(out.contains("Possibly relevant moments"));
        assert!(out.contains("the amulet glowed faintly (72% match)"));
    }

    #[test]
    fn test_legacy_mode_index_order_outside_window() {
        let records = store_of(vec![(4, "later"), (0, "earliest"), (2, "middle"), (8, "in window")]);
        let out = compose_legacy(&records, 8, &[hit("related turn", 0.5)], 1000);

        let earliest = out.find("earliest").unwrap();
        let middle = out.find("middle").unwrap();
        let later = out.find("later").unwrap();
        assert!(earliest < middle && middle < later);
        assert!(!out.contains("in window"));
        assert!(out.contains("related turn (50% match)"));
    }

    #[test]
    fn test_legacy_mode_budget_respected() {
        let records = store_of(vec![(0, "first entry text"), (2, "second entry text")]);
        for budget in [0, 5, 20, 40, 200] {
            let out = compose_legacy(&records, 10, &[], budget);
            assert!(out.chars().count() <= budget + HEADER_OVERHEAD);
        }
    }

    #[test]
    fn test_banner_present_only_with_content() {
        let records = store_of(vec![(0, "pivotal")]);
        let partition = TierPartition {
            permanent: vec![0],
            ..Default::default()
        };

        assert!(compose_tiered(&records, &partition, &[], &[], 1000).starts_with("[Story memory]\n"));
        assert_eq!(compose_tiered(&HashMap::new(), &TierPartition::default(), &[], &[], 1000), "");
    }
}
