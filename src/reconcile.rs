//! Ask Bear whether notes in the ledger still exist and store the answers.
//!
//! Bear answers asynchronously: the listener appends each answer to the results
//! file while the sweep keeps submitting. Once the listener is down the results
//! are merged into the ledger by note id and the ledger is rewritten.

use crate::channel::{Channel, Listener, ListenerGuard};
use crate::ledger::{self, Ledger};
use crate::renderer::exists_check_url;
use crate::utils::{MigrateError, RunConfig, progress_bar};
use std::collections::HashMap;
use tracing::{debug, info};

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct SweepStats {
    /// `NO-BEAR-ID`: entries without a note id.
    pub no_note_id: usize,
    /// `EXISTS-IN-BEAR`: entries skipped because their state is already known.
    pub already_known: usize,
    /// Existence queries submitted.
    pub checked: usize,
    /// `EXISTS-IN-BEAR-true` answers.
    pub found: usize,
    /// `EXISTS-IN-BEAR-false` answers.
    pub missing: usize,
    /// Entries with a note id that got no answer.
    pub unanswered: usize,
}

pub fn execute(
    config: &RunConfig,
    channel: &mut dyn Channel,
    listener: &mut dyn Listener,
) -> Result<SweepStats, MigrateError> {
    info!(ledger = %config.ledger_path.display(), "checking whether notes exist");
    ledger::truncate_results(&config.results_path)?;

    let mut ledger = Ledger::load(&config.ledger_path)?;
    if ledger.is_empty() {
        info!("ledger is empty, nothing to check");
        return Ok(SweepStats::default());
    }

    let mut stats = SweepStats::default();
    {
        let _guard = ListenerGuard::start(listener)?;
        submit_checks(config, &ledger, channel, &mut stats);
    }

    let results = ledger::load_results(&config.results_path)?;
    let mut answers: HashMap<String, bool> = HashMap::with_capacity(results.len());
    for result in results {
        if result.exists {
            stats.found += 1;
        } else {
            stats.missing += 1;
        }
        answers.insert(result.note_id, result.exists);
    }

    merge_answers(&mut ledger, &answers, &mut stats);
    ledger.rewrite(&config.ledger_path)?;
    info!(?stats, "reconciliation finished");
    Ok(stats)
}

/// Submit one existence query per eligible entry, in ledger order, stopping
/// once `max_items` queries went out.
pub fn submit_checks(
    config: &RunConfig,
    ledger: &Ledger,
    channel: &mut dyn Channel,
    stats: &mut SweepStats,
) {
    let bar = progress_bar(ledger.len(), config.quiet, config.verbose);

    for entry in ledger.iter() {
        bar.inc(1);
        if stats.checked >= config.max_items {
            info!(max = config.max_items, "check cap reached");
            break;
        }

        let Some(note_id) = entry.note_id.as_deref() else {
            debug!(conversation_id = %entry.conversation_id, "no note id, skipping");
            stats.no_note_id += 1;
            continue;
        };
        if entry.exists.is_some() && !config.force_check {
            debug!(conversation_id = %entry.conversation_id, "existence already known, skipping");
            stats.already_known += 1;
            continue;
        }

        info!(conversation_id = %entry.conversation_id, note_id, "checking note");
        let request = exists_check_url(&config.render, &entry.conversation_id, note_id);
        channel.submit_exists_check(&request);
        stats.checked += 1;

        if !config.check_delay.is_zero() {
            std::thread::sleep(config.check_delay);
        }
    }

    bar.finish_and_clear();
}

/// Copy each answer onto the ledger entry with the same note id. Answers for
/// unknown note ids are dropped; entries without an answer keep their state.
pub fn merge_answers(ledger: &mut Ledger, answers: &HashMap<String, bool>, stats: &mut SweepStats) {
    for entry in ledger.iter_mut() {
        let Some(note_id) = entry.note_id.as_deref() else {
            continue;
        };
        match answers.get(note_id) {
            Some(&exists) => entry.exists = Some(exists),
            None => {
                info!(note_id, "no answer recorded for note");
                stats.unanswered += 1;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ledger::LedgerEntry;

    fn entry(cid: &str, note: Option<&str>, exists: Option<bool>) -> LedgerEntry {
        LedgerEntry {
            exists,
            ..LedgerEntry::new(cid, note.map(str::to_string))
        }
    }

    #[test]
    fn merge_ignores_unknown_notes_and_keeps_unanswered_entries() {
        let mut ledger = Ledger::new();
        ledger.upsert(entry("a", Some("N1"), None));
        ledger.upsert(entry("b", Some("N2"), Some(true)));
        ledger.upsert(entry("c", None, None));

        let answers = HashMap::from([("N1".to_string(), false), ("N9".to_string(), true)]);
        let mut stats = SweepStats::default();
        merge_answers(&mut ledger, &answers, &mut stats);

        assert_eq!(ledger.len(), 3);
        assert_eq!(ledger.get("a").unwrap().exists, Some(false));
        assert_eq!(ledger.get("b").unwrap().exists, Some(true));
        assert_eq!(ledger.get("c").unwrap().exists, None);
        assert_eq!(stats.unanswered, 1);
    }

    #[test]
    fn known_entries_are_skipped_unless_forced() {
        let mut ledger = Ledger::new();
        ledger.upsert(entry("a", Some("N1"), Some(true)));
        ledger.upsert(entry("b", None, None));

        let mut cfg = RunConfig {
            check_delay: std::time::Duration::ZERO,
            quiet: true,
            ..RunConfig::default()
        };
        let mut channel = crate::channel::RecordingChannel::new();
        let mut stats = SweepStats::default();
        submit_checks(&cfg, &ledger, &mut channel, &mut stats);
        assert_eq!((stats.checked, stats.already_known, stats.no_note_id), (0, 1, 1));

        cfg.force_check = true;
        let mut stats = SweepStats::default();
        submit_checks(&cfg, &ledger, &mut channel, &mut stats);
        assert_eq!(stats.checked, 1);
        assert!(channel.checks[0].contains("id=N1"));
    }
}
