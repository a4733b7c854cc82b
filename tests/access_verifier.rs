//! Access verifier caching semantics against a counting fake directory:
//! positive verdicts are served from cache, negative verdicts are
//! re-probed, rate limits surface the platform wait verbatim.

use async_trait::async_trait;
use grammers_client::session::defs::{PeerAuth, PeerId, PeerRef};
use std::sync::atomic::{AtomicUsize, Ordering};
use tg_courier::access::{AccessVerifier, ChatAccess, ChatDirectory, DenyReason};
use tg_courier::link::ChatLocator;

struct FakeDirectory {
    probes: AtomicUsize,
    deny: Option<DenyReason>,
    join_result: bool,
}

impl FakeDirectory {
    fn reachable() -> Self {
        Self {
            probes: AtomicUsize::new(0),
            deny: None,
            join_result: true,
        }
    }

    fn denying(reason: DenyReason) -> Self {
        Self {
            probes: AtomicUsize::new(0),
            deny: Some(reason),
            join_result: false,
        }
    }

    fn probe_count(&self) -> usize {
        self.probes.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ChatDirectory for FakeDirectory {
    async fn locate(&self, _locator: &ChatLocator) -> Result<PeerRef, DenyReason> {
        self.probes.fetch_add(1, Ordering::SeqCst);
        match &self.deny {
            None => Ok(PeerRef {
                id: PeerId::channel(99),
                auth: PeerAuth::default(),
            }),
            Some(reason) => Err(reason.clone()),
        }
    }

    async fn join(&self, _invite_link: &str) -> bool {
        self.join_result
    }
}

#[tokio::test]
async fn second_verification_is_served_from_cache() {
    let verifier = AccessVerifier::new(100);
    let directory = FakeDirectory::reachable();
    let locator = ChatLocator::Id(-1_001_234_567_890);

    assert!(matches!(
        verifier.verify(&directory, &locator).await,
        ChatAccess::Reachable(_)
    ));
    assert!(matches!(
        verifier.verify(&directory, &locator).await,
        ChatAccess::Reachable(_)
    ));

    // Exactly one network probe for two verifications.
    assert_eq!(directory.probe_count(), 1);
    assert!(verifier.is_verified(&locator).await);
}

#[tokio::test]
async fn negative_verdicts_are_not_memoized() {
    let verifier = AccessVerifier::new(100);
    let locator = ChatLocator::Handle("somechannel".to_string());

    let denying = FakeDirectory::denying(DenyReason::PrivateUnjoined);
    for _ in 0..2 {
        assert!(matches!(
            verifier.verify(&denying, &locator).await,
            ChatAccess::Unreachable(DenyReason::PrivateUnjoined)
        ));
    }
    assert_eq!(denying.probe_count(), 2);
    assert!(!verifier.is_verified(&locator).await);

    // The transient condition resolved (e.g. the session joined): the next
    // attempt succeeds and is memoized.
    let reachable = FakeDirectory::reachable();
    assert!(matches!(
        verifier.verify(&reachable, &locator).await,
        ChatAccess::Reachable(_)
    ));
    assert!(verifier.is_verified(&locator).await);
}

#[tokio::test]
async fn distinct_locators_are_cached_independently() {
    let verifier = AccessVerifier::new(100);
    let directory = FakeDirectory::reachable();
    let first = ChatLocator::Handle("first".to_string());
    let second = ChatLocator::Handle("second".to_string());

    verifier.verify(&directory, &first).await;
    verifier.verify(&directory, &second).await;
    verifier.verify(&directory, &first).await;
    verifier.verify(&directory, &second).await;

    assert_eq!(directory.probe_count(), 2);
}

#[tokio::test]
async fn rate_limit_wait_time_surfaces_verbatim() {
    let verifier = AccessVerifier::new(100);
    let directory = FakeDirectory::denying(DenyReason::RateLimited {
        retry_after_secs: 300,
    });
    let locator = ChatLocator::Handle("busy".to_string());

    match verifier.verify(&directory, &locator).await {
        ChatAccess::Unreachable(DenyReason::RateLimited { retry_after_secs }) => {
            assert_eq!(retry_after_secs, 300);
        }
        other => panic!("expected rate limit verdict, got {other:?}"),
    }
}

#[tokio::test]
async fn join_attempts_report_boolean_outcome() {
    let verifier = AccessVerifier::new(100);

    let joins = FakeDirectory::reachable();
    assert!(verifier.attempt_join(&joins, "https://t.me/+AAAA").await);

    let expired = FakeDirectory::denying(DenyReason::InvalidPeer);
    assert!(!verifier.attempt_join(&expired, "https://t.me/+AAAA").await);
}
