#![allow(clippy::expect_used, clippy::unwrap_used)]

mod support;

use std::time::Duration;

use courier_common::{Signal, message::find_header};
use courier_delivery::{EntryOutcome, QueueProcessor, QueueWorker, SkipReason};
use courier_maildir::EntryName;
use pretty_assertions::assert_eq;
use support::{
    Reply, ScriptedTransport, enqueue, message, open_queue, published_files, set_age,
};

const HOUR: Duration = Duration::from_secs(60 * 60);

#[tokio::test]
async fn test_sweep_sends_and_retires_entries() {
    let (_dir, maildir) = open_queue().await;
    let transport = ScriptedTransport::new();
    let worker = QueueWorker::new(maildir.clone(), transport.clone());

    let entry = enqueue(&maildir, &message("a@x.com", &["b@x.com", "c@x.com"], "hello")).await;

    let report = worker.sweep().await.unwrap();

    assert_eq!(report.outcome(&entry.name), Some(&EntryOutcome::Delivered));
    assert_eq!(report.delivered, 1);
    assert!(published_files(&maildir).is_empty());

    let sent = transport.attempts();
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0].sender, "a@x.com");
    assert_eq!(sent[0].recipients, vec!["b@x.com", "c@x.com"]);
    assert_eq!(sent[0].data, b"Subject: hello\r\n\r\nhello\r\n".to_vec());
}

#[tokio::test]
async fn test_envelope_headers_are_stripped_before_sending() {
    let (_dir, maildir) = open_queue().await;
    let transport = ScriptedTransport::new();
    let worker = QueueWorker::new(maildir.clone(), transport.clone());

    let raw = b"X-Actually-From: a@x.com\r\n\
        X-Actually-To: b@x.com,c@x.com\r\n\
        Subject: smuggled\r\n\
        \r\n\
        body\r\n";
    maildir.stage(raw).await.unwrap().publish().await.unwrap();

    worker.sweep().await.unwrap();

    let sent = transport.attempts();
    assert_eq!(sent[0].sender, "a@x.com");
    assert_eq!(sent[0].recipients, vec!["b@x.com", "c@x.com"]);
    assert!(find_header(&sent[0].data, "X-Actually-From").is_none());
    assert!(find_header(&sent[0].data, "X-Actually-To").is_none());
    assert_eq!(sent[0].data, b"Subject: smuggled\r\n\r\nbody\r\n".to_vec());
}

#[tokio::test]
async fn test_fresh_claim_is_skipped() {
    let (_dir, maildir) = open_queue().await;
    let transport = ScriptedTransport::new();
    let worker = QueueWorker::new(maildir.clone(), transport.clone());

    let entry = enqueue(&maildir, &message("a@x.com", &["b@x.com"], "claimed")).await;
    std::fs::write(entry.claim_marker_path(), b"").unwrap();

    let report = worker.sweep().await.unwrap();

    assert_eq!(
        report.outcome(&entry.name),
        Some(&EntryOutcome::Skipped(SkipReason::ClaimHeld))
    );
    assert_eq!(transport.attempt_count(), 0);
    assert!(entry.path.exists());
    assert!(entry.claim_marker_path().exists());
}

#[tokio::test]
async fn test_stale_claim_is_recovered() {
    let (_dir, maildir) = open_queue().await;
    let transport = ScriptedTransport::new();
    let worker = QueueWorker::new(maildir.clone(), transport.clone()).with_stale_after(3 * HOUR);

    let entry = enqueue(&maildir, &message("a@x.com", &["b@x.com"], "abandoned")).await;
    std::fs::write(entry.claim_marker_path(), b"").unwrap();
    set_age(&entry.claim_marker_path(), 4 * HOUR);

    let report = worker.sweep().await.unwrap();

    assert_eq!(report.outcome(&entry.name), Some(&EntryOutcome::Delivered));
    assert_eq!(transport.attempt_count(), 1);
    assert!(published_files(&maildir).is_empty());
}

#[tokio::test]
async fn test_transient_failure_keeps_entry_and_claim() {
    let (_dir, maildir) = open_queue().await;
    let transport = ScriptedTransport::scripted([Reply::Code(451, "try again later")]);
    let worker = QueueWorker::new(maildir.clone(), transport.clone());

    let entry = enqueue(&maildir, &message("a@x.com", &["b@x.com"], "busy")).await;

    let report = worker.sweep().await.unwrap();

    assert!(matches!(
        report.outcome(&entry.name),
        Some(EntryOutcome::Deferred { reason }) if reason.contains("451")
    ));
    assert!(entry.path.exists());
    assert!(entry.claim_marker_path().exists());

    // The kept claim holds the entry back until it goes stale
    let report = worker.sweep().await.unwrap();
    assert_eq!(
        report.outcome(&entry.name),
        Some(&EntryOutcome::Skipped(SkipReason::ClaimHeld))
    );
    assert_eq!(transport.attempt_count(), 1);
}

#[tokio::test]
async fn test_transient_failure_is_retried_once_claim_is_stale() {
    let (_dir, maildir) = open_queue().await;
    let transport = ScriptedTransport::scripted([Reply::Disconnect]);
    let worker = QueueWorker::new(maildir.clone(), transport.clone()).with_stale_after(HOUR);

    let entry = enqueue(&maildir, &message("a@x.com", &["b@x.com"], "retry")).await;

    let report = worker.sweep().await.unwrap();
    assert_eq!(report.deferred, 1);

    set_age(&entry.claim_marker_path(), 2 * HOUR);
    let report = worker.sweep().await.unwrap();

    assert_eq!(report.outcome(&entry.name), Some(&EntryOutcome::Delivered));
    assert_eq!(transport.attempt_count(), 2);
    assert!(published_files(&maildir).is_empty());
}

#[tokio::test]
async fn test_permanent_failure_quarantines_entry() {
    let (_dir, maildir) = open_queue().await;
    let transport = ScriptedTransport::scripted([Reply::Code(550, "no such user")]);
    let worker = QueueWorker::new(maildir.clone(), transport.clone());

    let entry = enqueue(&maildir, &message("a@x.com", &["nobody@x.com"], "bounce")).await;

    let report = worker.sweep().await.unwrap();

    assert!(matches!(
        report.outcome(&entry.name),
        Some(EntryOutcome::Quarantined { reason }) if reason.contains("550 no such user")
    ));
    assert!(!entry.path.exists());
    assert!(!entry.claim_marker_path().exists());
    assert!(entry.rejected_path().exists());
    assert_eq!(published_files(&maildir), vec![entry.name.rejected()]);
    assert!(maildir.list_published().await.unwrap().is_empty());

    // Quarantined entries are never attempted again
    worker.sweep().await.unwrap();
    assert_eq!(transport.attempt_count(), 1);
}

#[tokio::test]
async fn test_one_bad_entry_does_not_stop_the_sweep() {
    let (_dir, maildir) = open_queue().await;
    let transport = ScriptedTransport::scripted([
        Reply::Code(554, "rejected"),
        Reply::Code(421, "closing"),
        Reply::Accept,
    ]);
    let worker = QueueWorker::new(maildir.clone(), transport.clone());

    let first = enqueue(&maildir, &message("a@x.com", &["1@x.com"], "one")).await;
    set_age(&first.path, 3 * HOUR);
    let second = enqueue(&maildir, &message("a@x.com", &["2@x.com"], "two")).await;
    set_age(&second.path, 2 * HOUR);
    let third = enqueue(&maildir, &message("a@x.com", &["3@x.com"], "three")).await;
    set_age(&third.path, HOUR);

    let report = worker.sweep().await.unwrap();

    let names: Vec<&EntryName> = report.entries.iter().map(|(name, _)| name).collect();
    assert_eq!(names, vec![&first.name, &second.name, &third.name]);
    assert_eq!(report.quarantined, 1);
    assert_eq!(report.deferred, 1);
    assert_eq!(report.delivered, 1);

    let recipients: Vec<_> = transport
        .attempts()
        .into_iter()
        .flat_map(|mail| mail.recipients)
        .collect();
    assert_eq!(recipients, vec!["1@x.com", "2@x.com", "3@x.com"]);
}

#[tokio::test]
async fn test_storage_error_fails_only_that_entry() {
    let (_dir, maildir) = open_queue().await;
    let transport = ScriptedTransport::new();
    let worker = QueueWorker::new(maildir.clone(), transport.clone()).with_stale_after(HOUR);

    let broken = enqueue(&maildir, &message("a@x.com", &["1@x.com"], "broken")).await;
    set_age(&broken.path, 2 * HOUR);
    let healthy = enqueue(&maildir, &message("a@x.com", &["2@x.com"], "healthy")).await;

    // A stale claim marker that cannot be removed
    let marker = broken.claim_marker_path();
    std::fs::create_dir(&marker).unwrap();
    std::fs::write(marker.join("occupied"), b"").unwrap();
    std::fs::File::open(&marker)
        .unwrap()
        .set_modified(std::time::SystemTime::now() - 2 * HOUR)
        .unwrap();

    let report = worker.sweep().await.unwrap();

    assert!(matches!(
        report.outcome(&broken.name),
        Some(EntryOutcome::Failed { .. })
    ));
    assert_eq!(report.outcome(&healthy.name), Some(&EntryOutcome::Delivered));
    assert_eq!(report.failed, 1);
    assert_eq!(report.delivered, 1);

    assert!(broken.path.exists());
    let sent = transport.attempts();
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0].recipients, vec!["2@x.com"]);
}

#[tokio::test]
async fn test_processor_purges_orphans_before_sweeping() {
    let (_dir, maildir) = open_queue().await;
    let transport = ScriptedTransport::new();
    let processor = QueueProcessor::default();
    let worker = QueueWorker::new(maildir.clone(), transport.clone());

    let orphan = maildir.tmp_dir().join("1.1.crashed.1");
    std::fs::write(&orphan, b"half a message").unwrap();
    set_age(&orphan, 48 * HOUR);
    enqueue(&maildir, &message("a@x.com", &["b@x.com"], "queued")).await;

    let report = processor.run_once(&worker).await.unwrap();

    assert_eq!(report.delivered, 1);
    assert!(!orphan.exists());
}

#[tokio::test]
async fn test_processor_applies_its_stale_claim_setting() {
    let (_dir, maildir) = open_queue().await;
    let transport = ScriptedTransport::new();
    let worker = QueueWorker::new(maildir.clone(), transport.clone());
    let processor: QueueProcessor = ron::from_str("(stale_claim_secs: 60)").unwrap();

    let entry = enqueue(&maildir, &message("a@x.com", &["b@x.com"], "abandoned")).await;
    std::fs::write(entry.claim_marker_path(), b"").unwrap();
    set_age(&entry.claim_marker_path(), Duration::from_secs(120));

    // Held as far as the worker's own three hour window goes
    let report = worker.sweep().await.unwrap();
    assert_eq!(
        report.outcome(&entry.name),
        Some(&EntryOutcome::Skipped(SkipReason::ClaimHeld))
    );

    let report = processor.run_once(&worker).await.unwrap();

    assert_eq!(report.outcome(&entry.name), Some(&EntryOutcome::Delivered));
    assert_eq!(transport.attempt_count(), 1);
}

#[tokio::test]
async fn test_processor_serves_until_shutdown() {
    let (_dir, maildir) = open_queue().await;
    let transport = ScriptedTransport::new();
    let processor = QueueProcessor {
        interval_secs: 1,
        ..QueueProcessor::default()
    };
    let worker = QueueWorker::new(maildir.clone(), transport.clone());
    enqueue(&maildir, &message("a@x.com", &["b@x.com"], "served")).await;

    let (tx, rx) = tokio::sync::broadcast::channel(1);
    let handle = tokio::spawn(async move { processor.serve(&worker, rx).await });

    tokio::time::timeout(Duration::from_secs(5), async {
        while transport.attempt_count() == 0 {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("the first sweep should run immediately");

    tx.send(Signal::Shutdown).unwrap();
    let result = tokio::time::timeout(Duration::from_secs(5), handle)
        .await
        .expect("processor should stop after shutdown")
        .unwrap();

    assert!(result.is_ok());
    assert!(published_files(&maildir).is_empty());
}
