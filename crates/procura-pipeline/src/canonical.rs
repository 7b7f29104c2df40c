//! Canonical display names.
//!
//! Records that share a name key are one party, but the registry spells them
//! many ways. Within one batch every record adopts the most frequent spelling
//! for its key (ties go to the lexicographically smallest spelling), so
//! reports show one label per group.

use std::collections::BTreeMap;

use procura_core::{ContractRecord, ServiceCategory};
use tracing::debug;

type Spellings = BTreeMap<String, BTreeMap<String, usize>>;

fn tally(counts: &mut Spellings, code: &str, name: &str) {
    *counts
        .entry(code.to_string())
        .or_default()
        .entry(name.to_string())
        .or_insert(0) += 1;
}

fn winners(counts: Spellings) -> BTreeMap<String, String> {
    counts
        .into_iter()
        .filter_map(|(code, names)| {
            // Max by count; on equal counts the earlier (smaller) name wins.
            let best = names
                .into_iter()
                .fold(None::<(String, usize)>, |best, (name, n)| match best {
                    Some((_, m)) if m >= n => best,
                    _ => Some((name, n)),
                })?;
            Some((code, best.0))
        })
        .collect()
}

/// Rewrite entity, contractor and classified service labels to their
/// canonical spelling. Codes, dates and amounts are untouched.
pub fn merge_names(records: Vec<ContractRecord>) -> Vec<ContractRecord> {
    let mut entities = Spellings::new();
    let mut contractors = Spellings::new();
    let mut services = Spellings::new();
    for record in &records {
        tally(&mut entities, &record.entity().code, &record.entity().name);
        tally(&mut contractors, &record.contractor().code, &record.contractor().name);
        if let ServiceCategory::Classified { code, label } = record.service_category() {
            tally(&mut services, code, label);
        }
    }
    let entities = winners(entities);
    let contractors = winners(contractors);
    let services = winners(services);
    debug!(
        entities = entities.len(),
        contractors = contractors.len(),
        services = services.len(),
        "canonical names chosen"
    );

    records
        .into_iter()
        .map(|record| {
            let entity = entities
                .get(&record.entity().code)
                .cloned()
                .unwrap_or_else(|| record.entity().name.clone());
            let contractor = contractors
                .get(&record.contractor().code)
                .cloned()
                .unwrap_or_else(|| record.contractor().name.clone());
            let service = services.get(record.service_category().code()).cloned();
            record.with_display_names(&entity, &contractor, service.as_deref())
        })
        .collect()
}
