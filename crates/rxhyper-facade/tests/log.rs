//! Reactive log facade over the memory log library

#![allow(clippy::unwrap_used)]
#![allow(clippy::expect_used)]

use assert_matches::assert_matches;
use futures::stream::{self, StreamExt};
use futures::{poll, FutureExt};
use rxhyper_core::{
    Block, BlockRange, CapabilityRecord, Container, GetOptions, LogOptions, ReadStreamOptions,
    RuntimeSettings, RxError, ValueEncoding,
};
use rxhyper_facade::{BridgeOutcome, LogContext, RxHyper, RxLog, SETTINGS};
use rxhyper_testkit::{fixture_loader, fixture_overrides, init_test_tracing};
use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::oneshot;
use tokio::time::{timeout, Instant};

async fn log_context() -> Arc<LogContext> {
    init_test_tracing();
    let host = RxHyper::new(Arc::new(fixture_loader()));
    host.install_log(fixture_overrides()).await.unwrap()
}

fn json() -> LogOptions {
    LogOptions::with_encoding(ValueEncoding::Json)
}

fn utf8() -> LogOptions {
    LogOptions::with_encoding(ValueEncoding::Utf8)
}

fn repeated(text: &str, times: usize) -> stream::Iter<std::vec::IntoIter<Block>> {
    stream::iter(vec![Block::from(text); times])
}

#[tokio::test]
async fn values_pass_through_until_closed() {
    let ctx = log_context().await;
    let log = RxLog::create(ctx, json()).unwrap();

    log.append(vec!["hello".into()]).await.unwrap();
    let block = log.get(0, GetOptions::default()).await.unwrap().unwrap();
    assert_eq!(block.as_str(), Some("hello"));

    let streamed = log.get_stream(0, GetOptions::default()).next().await.unwrap();
    assert_eq!(streamed.unwrap(), Some(block));

    log.close().await.unwrap();
    assert!(log.is_closed());
    assert_matches!(
        log.get(0, GetOptions::default()).await,
        Err(RxError::Closed { .. })
    );
    assert_matches!(
        log.get_stream(0, GetOptions::default()).next().await,
        Some(Err(RxError::Closed { .. }))
    );
}

#[tokio::test]
async fn sequential_appends_are_visible_to_sessions_and_live_readers() {
    let ctx = log_context().await;
    let log = RxLog::create(ctx, json()).unwrap();
    let session = log.session(json()).unwrap();

    let live = log
        .create_read_stream(ReadStreamOptions::live())
        .take(3)
        .map(|block| block.unwrap())
        .collect::<Vec<_>>();
    let appends = async {
        let hello: Vec<_> = log.append_with(|_| repeated("hello", 4)).collect().await;
        let world: Vec<_> = log.append_stream(repeated("world", 4)).collect().await;
        hello.into_iter().chain(world).map(Result::unwrap).collect::<Vec<_>>()
    };
    let (live, appended) = tokio::join!(live, appends);

    assert_eq!(live, vec![Block::Json("hello".into()); 3]);
    assert_eq!(
        appended.iter().map(|r| r.length).collect::<Vec<_>>(),
        (1..=8).collect::<Vec<u64>>()
    );
    assert_eq!(appended[7].value, Block::from("world"));

    let tail: Vec<_> = session
        .create_read_stream(ReadStreamOptions::default())
        .map(|block| block.unwrap())
        .collect()
        .await;
    assert_eq!(tail.len(), 8);
    assert_eq!(tail[6..], [Block::Json("world".into()), Block::Json("world".into())]);
}

#[tokio::test]
async fn merged_appends_all_land() {
    let ctx = log_context().await;
    let log = RxLog::create(ctx, json()).unwrap();

    let results: Vec<_> = stream::select(
        log.append_stream(repeated("hello", 4)),
        log.append_stream(repeated("world", 4)),
    )
    .map(Result::unwrap)
    .collect()
    .await;

    assert_eq!(results.len(), 8);
    let lengths: BTreeSet<_> = results.iter().map(|r| r.length).collect();
    assert_eq!(lengths, (1..=8).collect::<BTreeSet<u64>>());
    assert!(results
        .iter()
        .all(|r| matches!(r.value.as_str(), Some("hello" | "world"))));

    let stored: Vec<_> = log
        .create_read_stream(ReadStreamOptions::default())
        .map(Result::unwrap)
        .collect()
        .await;
    assert_eq!(stored.iter().filter(|b| b.as_str() == Some("hello")).count(), 4);
    assert_eq!(stored.iter().filter(|b| b.as_str() == Some("world")).count(), 4);
}

#[tokio::test]
async fn append_factory_receives_the_log_container() {
    let ctx = log_context().await;
    let log = RxLog::create(ctx, utf8()).unwrap();

    let results: Vec<_> = log
        .append_with(|container| {
            let settings: RuntimeSettings = container.get(SETTINGS).unwrap();
            stream::iter(vec![Block::from(settings.default_storage)])
        })
        .collect()
        .await;

    assert_eq!(results.len(), 1);
    assert_eq!(
        log.get(0, GetOptions::default()).await.unwrap(),
        Some(Block::from("memory"))
    );
}

#[tokio::test]
async fn replication_delivers_live_appends_in_order() {
    let ctx = log_context().await;
    let expectations = ["hello", "world", "foo", "bar"];
    let source = RxLog::create(ctx.clone(), utf8()).unwrap();
    source.ready().await.unwrap();
    let mirror = RxLog::create(ctx, utf8().key(source.key().unwrap())).unwrap();

    let mut peers = mirror.on_peer_add();
    assert!(poll!(peers.next()).is_pending());

    let outcome = mirror.replicate(Some(source.clone().into())).unwrap();
    assert_matches!(outcome, BridgeOutcome::Linked(_));

    let received = mirror
        .create_read_stream(ReadStreamOptions::live())
        .take(4)
        .map(Result::unwrap)
        .collect::<Vec<_>>();
    let appended = source
        .append_stream(stream::iter(expectations.map(Block::from)))
        .collect::<Vec<_>>();
    let (received, appended) = timeout(Duration::from_secs(5), async {
        tokio::join!(received, appended)
    })
    .await
    .unwrap();

    assert_eq!(appended.len(), 4);
    assert_eq!(received, expectations.map(Block::from).to_vec());
    assert!(!mirror.writable());

    let peer = timeout(Duration::from_secs(5), peers.next()).await.unwrap();
    assert_eq!(peer.unwrap().unwrap().key(), source.key());
}

#[tokio::test]
async fn detached_responder_and_download() {
    let ctx = log_context().await;
    let source = RxLog::create(ctx.clone(), utf8()).unwrap();
    source
        .append(vec!["a".into(), "b".into()])
        .await
        .unwrap();
    let mirror = RxLog::create(ctx, utf8().key(source.key().unwrap())).unwrap();

    let responder = source.replicate(None).unwrap().into_push_stream().unwrap();
    assert!(!responder.is_initiator());
    mirror.replicate(Some(responder.into())).unwrap();

    let downloaded = timeout(
        Duration::from_secs(5),
        mirror.download(BlockRange::new(0, 2)).next(),
    )
    .await
    .unwrap();
    assert_eq!(downloaded.unwrap().unwrap().length(), 2);
}

#[tokio::test]
async fn from_replication_follows_the_source() {
    let ctx = log_context().await;
    let source = RxLog::create(ctx.clone(), utf8()).unwrap();
    source.append(vec!["first".into()]).await.unwrap();

    let mirror = RxLog::from_replication(ctx.clone(), source.clone().into(), None, utf8()).unwrap();
    assert_eq!(mirror.key(), source.key());

    let block = timeout(
        Duration::from_secs(5),
        mirror.get(0, GetOptions { wait: true }),
    )
    .await
    .unwrap()
    .unwrap();
    assert_eq!(block, Some(Block::from("first")));
    mirror.close().await.unwrap();

    let raw = source.replicate(None).unwrap().transport().unwrap().clone();
    assert_matches!(
        RxLog::from_replication(ctx, raw.into(), None, utf8()),
        Err(RxError::Usage { .. })
    );
}

#[tokio::test]
async fn close_and_append_events_emit_the_log() {
    let ctx = log_context().await;
    let log = RxLog::create(ctx, json()).unwrap();

    let mut appends = log.on_append();
    let mut closes = log.on_close();
    assert!(poll!(appends.next()).is_pending());
    assert!(poll!(closes.next()).is_pending());

    log.append(vec!["x".into()]).await.unwrap();
    assert_eq!(appends.next().await.unwrap().unwrap().length(), 1);

    log.close().await.unwrap();
    assert!(closes.next().await.unwrap().unwrap().is_closed());
}

#[tokio::test]
async fn snapshots_and_many() {
    let ctx = log_context().await;
    let logs = RxLog::create_many(ctx, vec![json(), json(), utf8()]).unwrap();
    assert_eq!(logs.len(), 3);
    let keys: BTreeSet<_> = logs.iter().map(|log| log.key().unwrap()).collect();
    assert_eq!(keys.len(), 3);

    let log = &logs[0];
    log.append(vec!["a".into()]).await.unwrap();
    let snapshot = log.snapshot(json()).unwrap();
    log.append(vec!["b".into()]).await.unwrap();
    assert_eq!(snapshot.length(), 1);
    assert_eq!(log.length(), 2);
    assert!(!snapshot.writable());
    assert!(log.discovery_key().is_some());
    assert_ne!(log.discovery_key(), log.key());
}

#[tokio::test]
async fn sessions_of_one_log_cannot_link_to_each_other() {
    let ctx = log_context().await;
    let log = RxLog::create(ctx.clone(), utf8()).unwrap();
    let session = log.session(utf8()).unwrap();
    let snapshot = log.snapshot(utf8()).unwrap();

    assert_matches!(
        log.replicate(Some(session.clone().into())),
        Err(RxError::Usage { .. })
    );
    assert_matches!(
        session.replicate(Some(snapshot.into())),
        Err(RxError::Usage { .. })
    );

    let mirror = RxLog::create(ctx, utf8().key(log.key().unwrap())).unwrap();
    assert_matches!(
        mirror.replicate(Some(log.into())),
        Ok(BridgeOutcome::Linked(_))
    );
}

#[tokio::test]
async fn ready_stream_is_lazy() {
    let ctx = log_context().await;
    let log = RxLog::create(ctx, json()).unwrap();
    let ready = log.ready_stream();
    log.close().await.unwrap();

    let outcome: Vec<_> = ready.collect().await;
    assert_matches!(outcome.as_slice(), [Err(RxError::Closed { .. })]);
}

#[tokio::test(start_paused = true)]
async fn finding_peers_waits_for_quiescence_by_default() {
    let ctx = log_context().await;
    let log = RxLog::create(ctx, json()).unwrap();

    let started = Instant::now();
    let done: Vec<_> = log.finding_peers(None).collect().await;
    assert_matches!(done.as_slice(), [Ok(())]);
    assert!(started.elapsed() >= Duration::from_millis(6_000));
}

#[tokio::test]
async fn finding_peers_honours_a_custom_signal() {
    let ctx = log_context().await;
    let log = RxLog::create(ctx, json()).unwrap();
    let (signal, received) = oneshot::channel::<()>();

    let mut finding = log.finding_peers(Some(Box::new(move |_: &Container| {
        async move {
            let _ = received.await;
        }
        .boxed()
    })));
    assert!(poll!(finding.next()).is_pending());

    signal.send(()).unwrap();
    assert_matches!(finding.next().await, Some(Ok(())));
    assert_matches!(finding.next().await, None);
}

#[tokio::test]
async fn missing_default_storage_needs_explicit_storage() {
    init_test_tracing();
    let host = RxHyper::new(Arc::new(fixture_loader()));
    let overrides = fixture_overrides().dependency(
        "memory",
        CapabilityRecord::new(|| async {
            Err(RxError::not_found("memory storage is not installed"))
        })
        .optional(),
    );
    let ctx = host.install_log(overrides).await.unwrap();
    assert!(!ctx.base().has_storage());

    assert_matches!(RxLog::create(ctx.clone(), json()), Err(RxError::Usage { .. }));

    let storage = Arc::new(rxhyper_effects::MemoryStorage::new());
    let log = RxLog::create(ctx, json().storage(storage)).unwrap();
    log.append(vec!["kept".into()]).await.unwrap();
    assert_eq!(
        log.get(0, GetOptions::default()).await.unwrap().unwrap().as_str(),
        Some("kept")
    );
}

#[tokio::test]
async fn waiting_get_resolves_on_append() {
    let ctx = log_context().await;
    let log = RxLog::create(ctx, json()).unwrap();
    let mut waiting = log.get_stream(0, GetOptions { wait: true });
    assert!(poll!(waiting.next()).is_pending());

    log.append(vec!["late".into()]).await.unwrap();
    let block = waiting.next().await.unwrap().unwrap();
    assert_eq!(block.unwrap().as_str(), Some("late"));
}
