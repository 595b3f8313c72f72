use crate::channel::{Channel, Listener, ListenerGuard};
use crate::export::{Conversation, load_export};
use crate::ledger::{self, Ledger};
use crate::renderer;
use crate::utils::{MigrateError, RunConfig, progress_bar};
use chrono::Local;
use std::collections::HashSet;
use std::path::Path;
use tracing::{debug, info, warn};

/// Counts reported at the end of an import pass.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct ImportReport {
    /// Already in Bear or already in the ledger.
    pub existing: usize,
    /// Submitted to Bear during this run.
    pub imported: usize,
    /// Rendered to nothing but the origin link and therefore not submitted.
    pub empty: usize,
}

impl ImportReport {
    pub fn total(&self) -> usize {
        self.existing + self.imported
    }
}

/// Run an import pass: load the ledger and the export, bring the listener up,
/// then submit every conversation Bear does not have yet, up to the cap.
///
/// The listener is stopped once, however the iteration ends.
pub fn execute(
    config: &RunConfig,
    export_path: &Path,
    channel: &mut dyn Channel,
    listener: &mut dyn Listener,
) -> Result<ImportReport, MigrateError> {
    let ledger = Ledger::load(&config.ledger_path)?;
    let conversations = load_export(export_path)?;
    info!(
        conversations = conversations.len(),
        ledger_entries = ledger.len(),
        "export loaded"
    );

    let _guard = ListenerGuard::start(listener)?;

    let processed: HashSet<String> = ledger.iter().map(|e| e.conversation_id.clone()).collect();
    let report = import_conversations(config, &conversations, processed, channel);
    info!(
        existing = report.existing,
        imported = report.imported,
        empty = report.empty,
        "import finished"
    );
    Ok(report)
}

/// The iteration itself, without any setup. `processed` holds the ids that
/// must not be submitted again; ids submitted here are added to it.
pub fn import_conversations(
    config: &RunConfig,
    conversations: &[Conversation],
    mut processed: HashSet<String>,
    channel: &mut dyn Channel,
) -> ImportReport {
    let mut report = ImportReport::default();
    let bar = progress_bar(conversations.len(), config.quiet, config.verbose);

    for conversation in conversations {
        bar.inc(1);
        let id = conversation.key();

        if conversation.exists_in_bear {
            info!(conversation_id = %id, "already exists in Bear");
            report.existing += 1;
            continue;
        }
        if processed.contains(id) {
            info!(conversation_id = %id, "already imported");
            report.existing += 1;
            continue;
        }
        if report.imported >= config.max_items {
            info!(max = config.max_items, "import cap reached");
            break;
        }

        let note = renderer::render(conversation, &config.render, Local::now());
        if note.message_count == 0 {
            warn!(conversation_id = %id, "nothing to import besides the link, skipping");
            report.empty += 1;
            continue;
        }

        info!(conversation_id = %id, title = %note.title, "creating note");
        debug!(characters = note.body.chars().count(), tag = %note.tag, "rendered");
        channel.submit_create(&note.destination_url);
        report.imported += 1;
        bar.set_message(note.title);

        if !config.import_delay.is_zero() {
            std::thread::sleep(config.import_delay);
        }

        if config.record_imports
            && let Err(e) = ledger::append(&config.ledger_path, id, None)
        {
            warn!(conversation_id = %id, error = %e, "could not record import in ledger");
        }
        processed.insert(id.to_string());
    }

    bar.finish_and_clear();
    report
}
