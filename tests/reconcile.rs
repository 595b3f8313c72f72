use chat2bear::channel::{RecordingChannel, StubListener};
use chat2bear::ledger::{self, CheckResult, Ledger};
use chat2bear::reconcile::{self, SweepStats};
use chat2bear::utils::RunConfig;
use pretty_assertions::assert_eq;
use std::collections::HashSet;
use std::fs;
use std::path::PathBuf;
use std::time::Duration;
use tempfile::TempDir;
use url::Url;

fn setup(ledger_lines: &str) -> (TempDir, RunConfig) {
    let dir = tempfile::tempdir().unwrap();
    let config = RunConfig {
        ledger_path: dir.path().join("bear_import_log.jsonl"),
        results_path: dir.path().join("conversation_check.jsonl"),
        check_delay: Duration::ZERO,
        quiet: true,
        ..RunConfig::default()
    };
    fs::write(&config.ledger_path, ledger_lines).unwrap();
    (dir, config)
}

/// Plays Bear: answers each `open-note` request into the results file.
/// Notes listed in `gone` are reported missing.
fn bear(results: PathBuf, gone: &'static [&'static str]) -> RecordingChannel {
    RecordingChannel::with_responder(move |request| {
        let url = Url::parse(request).unwrap();
        let note_id = url
            .query_pairs()
            .find(|(k, _)| k == "id")
            .map(|(_, v)| v.into_owned())
            .unwrap();
        let result = CheckResult {
            exists: !gone.contains(&note_id.as_str()),
            note_id,
            conversation_id: None,
        };
        ledger::append_result(&results, &result).unwrap();
    })
}

#[test]
fn answers_are_merged_and_the_ledger_is_rewritten() {
    let (_dir, config) = setup(
        "{\"conversation_id\": \"a\", \"bear_id\": \"N1\"}\n\
         {\"conversation_id\": \"b\", \"bear_id\": \"N2\"}\n\
         {\"conversation_id\": \"c\"}\n\
         {\"conversation_id\": \"a\", \"bear_id\": \"N1\"}\n",
    );
    let mut channel = bear(config.results_path.clone(), &["N2"]);
    let mut listener = StubListener::default();

    let stats = reconcile::execute(&config, &mut channel, &mut listener).unwrap();

    assert_eq!(
        stats,
        SweepStats {
            no_note_id: 1,
            checked: 2,
            found: 1,
            missing: 1,
            ..SweepStats::default()
        }
    );
    assert_eq!((listener.starts, listener.stops), (1, 1));
    assert_eq!(
        fs::read_to_string(&config.ledger_path).unwrap(),
        "{\"conversation_id\":\"a\",\"note_id\":\"N1\",\"exists\":true}\n\
         {\"conversation_id\":\"b\",\"note_id\":\"N2\",\"exists\":false}\n\
         {\"conversation_id\":\"c\",\"note_id\":null}\n"
    );
}

#[test]
fn rewrite_never_adds_keys() {
    let (_dir, config) = setup(
        "{\"conversation_id\": \"a\", \"note_id\": \"N1\"}\n\
         {\"conversation_id\": \"a\", \"note_id\": \"N1\"}\n\
         {\"conversation_id\": \"b\", \"note_id\": \"N2\"}\n",
    );
    let before: HashSet<String> = Ledger::load(&config.ledger_path)
        .unwrap()
        .iter()
        .map(|e| e.conversation_id.clone())
        .collect();

    let results = config.results_path.clone();
    let mut channel = RecordingChannel::with_responder(move |_| {
        // An answer for a note the ledger has never seen.
        ledger::append_result(
            &results,
            &CheckResult {
                note_id: "STRANGER".into(),
                exists: true,
                conversation_id: Some("zzz".into()),
            },
        )
        .unwrap();
    });
    let mut listener = StubListener::default();

    let stats = reconcile::execute(&config, &mut channel, &mut listener).unwrap();

    let after = Ledger::load(&config.ledger_path).unwrap();
    assert_eq!(after.len(), before.len());
    assert!(after.iter().all(|e| before.contains(&e.conversation_id)));
    assert!(after.iter().all(|e| e.exists.is_none()));
    assert_eq!(stats.unanswered, 2);
    let lines = fs::read_to_string(&config.ledger_path).unwrap();
    assert_eq!(lines.lines().count(), 2);
}

#[test]
fn known_entries_are_skipped_unless_forced() {
    let lines = "{\"conversation_id\": \"a\", \"note_id\": \"N1\", \"exists\": true}\n\
                 {\"conversation_id\": \"b\", \"note_id\": \"N2\"}\n";
    let (_dir, mut config) = setup(lines);
    let mut listener = StubListener::default();

    let mut channel = bear(config.results_path.clone(), &["N1"]);
    let stats = reconcile::execute(&config, &mut channel, &mut listener).unwrap();
    assert_eq!((stats.already_known, stats.checked), (1, 1));
    // Unanswered but already known: state kept.
    let ledger = Ledger::load(&config.ledger_path).unwrap();
    assert_eq!(ledger.get("a").unwrap().exists, Some(true));
    assert_eq!(ledger.get("b").unwrap().exists, Some(true));

    config.force_check = true;
    let mut channel = bear(config.results_path.clone(), &["N1"]);
    let stats = reconcile::execute(&config, &mut channel, &mut listener).unwrap();
    assert_eq!(stats.checked, 2);
    let ledger = Ledger::load(&config.ledger_path).unwrap();
    assert_eq!(ledger.get("a").unwrap().exists, Some(false));
}

#[test]
fn cap_limits_checks_per_run() {
    let lines: String = (0..5)
        .map(|i| format!("{{\"conversation_id\": \"c{i}\", \"note_id\": \"N{i}\"}}\n"))
        .collect();
    let (_dir, mut config) = setup(&lines);
    config.max_items = 3;
    let mut channel = bear(config.results_path.clone(), &[]);
    let mut listener = StubListener::default();

    let stats = reconcile::execute(&config, &mut channel, &mut listener).unwrap();

    assert_eq!(stats.checked, 3);
    assert_eq!(channel.checks.len(), 3);
    assert_eq!(stats.unanswered, 2);
}

#[test]
fn results_file_is_truncated_at_start() {
    let (_dir, config) = setup("{\"conversation_id\": \"a\", \"note_id\": \"N1\"}\n");
    fs::write(
        &config.results_path,
        "{\"note_id\": \"N1\", \"exists\": false}\n",
    )
    .unwrap();
    let mut channel = RecordingChannel::new();
    let mut listener = StubListener::default();

    let stats = reconcile::execute(&config, &mut channel, &mut listener).unwrap();

    assert_eq!(stats.checked, 1);
    assert_eq!(stats.missing, 0);
    let ledger = Ledger::load(&config.ledger_path).unwrap();
    assert_eq!(ledger.get("a").unwrap().exists, None);
}

#[test]
fn missing_ledger_is_a_no_op() {
    let dir = tempfile::tempdir().unwrap();
    let config = RunConfig {
        ledger_path: dir.path().join("absent.jsonl"),
        results_path: dir.path().join("check.jsonl"),
        quiet: true,
        ..RunConfig::default()
    };
    let mut channel = RecordingChannel::new();
    let mut listener = StubListener::default();

    let stats = reconcile::execute(&config, &mut channel, &mut listener).unwrap();

    assert_eq!(stats, SweepStats::default());
    assert_eq!(listener.starts, 0);
    assert!(!config.ledger_path.exists());
}
