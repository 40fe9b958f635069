//! End-to-end ceremony tests: challenge issuance through registration and
//! authentication, including the failure paths a hostile client exercises.

use std::sync::Arc;
use std::time::Duration;

use uuid::Uuid;

use keywarden::challenge::{ChallengeManager, MemorySessionBinding};
use keywarden::errors::AuthError;
use keywarden::metadata::StaticDeviceDirectory;
use keywarden::settings::{ChallengeSettings, WebAuthnSettings};
use keywarden::store::{CounterStore, MemoryKvStore};
use keywarden::testing::TestAuthenticator;
use keywarden::webauthn::{DeviceType, WebAuthnService};

const ORIGIN: &str = "http://localhost:8080";
const RP_ID: &str = "localhost";

fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

fn challenge_manager() -> ChallengeManager {
    init_logging();
    let counters = CounterStore::new(
        Arc::new(MemoryKvStore::new()),
        3,
        Duration::from_millis(1),
    );
    ChallengeManager::new(
        Arc::new(MemorySessionBinding::new()),
        counters,
        ChallengeSettings::default(),
    )
}

fn service() -> WebAuthnService {
    init_logging();
    WebAuthnService::new(
        WebAuthnSettings::default(),
        Arc::new(StaticDeviceDirectory::with_known_devices()),
    )
    .unwrap()
}

#[tokio::test]
async fn full_registration_and_authentication_ceremony() {
    let manager = challenge_manager();
    let service = service();
    let authenticator = TestAuthenticator::new();

    // Registration: issue, bind, read back, verify, consume.
    let challenge = manager.issue();
    let handle = manager.bind("session-abc", &challenge).await.unwrap();
    let bound = manager.retrieve(&handle).await.unwrap();
    manager.validate_freshness(bound.issued_at).unwrap();

    let response =
        authenticator.registration_response(&bound.challenge, ORIGIN, RP_ID, "none", false);
    let expected = service.expected(&bound.challenge, Some(RP_ID), None);
    let mut credential = service
        .verify_registration(&response, &expected)
        .await
        .unwrap();
    manager.consume_once(&bound.challenge).await.unwrap();

    assert_eq!(credential.credential_id, authenticator.credential_id());
    assert_eq!(credential.counter, 0);
    assert_eq!(credential.rp_id, RP_ID);
    assert!(credential.last_used.is_none());

    // Authentication with an advanced counter succeeds and reports the
    // new value for persistence.
    let challenge = manager.issue();
    let handle = manager.bind("session-abc", &challenge).await.unwrap();
    let bound = manager.retrieve(&handle).await.unwrap();
    manager.validate_freshness(bound.issued_at).unwrap();

    let assertion = authenticator.assertion_response(&bound.challenge, ORIGIN, RP_ID, 7);
    let expected = service.expected(&bound.challenge, Some(RP_ID), None);
    let outcome = service
        .verify_authentication(&assertion, &expected, &credential)
        .unwrap();
    manager.consume_once(&bound.challenge).await.unwrap();

    assert_eq!(outcome.new_counter, 7);
    assert_eq!(outcome.credential_id, credential.credential_id);

    credential.touch(outcome.new_counter, outcome.authenticated_at);
    assert_eq!(credential.counter, 7);
    assert_eq!(credential.last_used, Some(outcome.authenticated_at));
}

#[tokio::test]
async fn registration_records_a_nonzero_initial_counter() {
    let service = service();
    let authenticator = TestAuthenticator::new().with_initial_counter(41);

    let response = authenticator.registration_response("c1", ORIGIN, RP_ID, "none", false);
    let expected = service.expected("c1", Some(RP_ID), None);
    let credential = service
        .verify_registration(&response, &expected)
        .await
        .unwrap();
    assert_eq!(credential.counter, 41);

    // An equal counter is a rollback; the next value passes.
    let assertion = authenticator.assertion_response("c2", ORIGIN, RP_ID, 41);
    let expected = service.expected("c2", Some(RP_ID), None);
    let err = service
        .verify_authentication(&assertion, &expected, &credential)
        .unwrap_err();
    assert!(matches!(
        err,
        AuthError::InvalidCounter {
            stored: 41,
            received: 41
        }
    ));

    let assertion = authenticator.assertion_response("c3", ORIGIN, RP_ID, 42);
    let expected = service.expected("c3", Some(RP_ID), None);
    let outcome = service
        .verify_authentication(&assertion, &expected, &credential)
        .unwrap();
    assert_eq!(outcome.new_counter, 42);
}

#[tokio::test]
async fn counter_rollback_is_rejected_despite_valid_signature() {
    let service = service();
    let authenticator = TestAuthenticator::new();

    let challenge = "reg-challenge";
    let response = authenticator.registration_response(challenge, ORIGIN, RP_ID, "none", false);
    let expected = service.expected(challenge, Some(RP_ID), None);
    let mut credential = service
        .verify_registration(&response, &expected)
        .await
        .unwrap();
    credential.counter = 5;

    // The signature over the rolled-back assertion is genuine; the
    // counter check alone must reject it.
    let assertion = authenticator.assertion_response("auth-challenge", ORIGIN, RP_ID, 3);
    let expected = service.expected("auth-challenge", Some(RP_ID), None);
    let err = service
        .verify_authentication(&assertion, &expected, &credential)
        .unwrap_err();
    assert!(matches!(
        err,
        AuthError::InvalidCounter {
            stored: 5,
            received: 3
        }
    ));
}

#[tokio::test]
async fn tampered_signature_is_rejected() {
    let service = service();
    let authenticator = TestAuthenticator::new();

    let response = authenticator.registration_response("c1", ORIGIN, RP_ID, "none", false);
    let expected = service.expected("c1", Some(RP_ID), None);
    let credential = service
        .verify_registration(&response, &expected)
        .await
        .unwrap();

    let assertion = authenticator.tampered_assertion_response("c2", ORIGIN, RP_ID, 1);
    let expected = service.expected("c2", Some(RP_ID), None);
    let err = service
        .verify_authentication(&assertion, &expected, &credential)
        .unwrap_err();
    assert!(matches!(err, AuthError::SignatureFailed));
}

#[tokio::test]
async fn wrong_origin_is_rejected_in_both_ceremonies() {
    let service = service();
    let authenticator = TestAuthenticator::new();

    let response = authenticator.registration_response(
        "c1",
        "https://evil.example.com",
        RP_ID,
        "none",
        false,
    );
    let expected = service.expected("c1", Some(RP_ID), None);
    let err = service
        .verify_registration(&response, &expected)
        .await
        .unwrap_err();
    assert!(matches!(err, AuthError::InvalidOrigin));

    let good = authenticator.registration_response("c2", ORIGIN, RP_ID, "none", false);
    let expected = service.expected("c2", Some(RP_ID), None);
    let credential = service.verify_registration(&good, &expected).await.unwrap();

    let assertion =
        authenticator.assertion_response("c3", "https://evil.example.com", RP_ID, 1);
    let expected = service.expected("c3", Some(RP_ID), None);
    let err = service
        .verify_authentication(&assertion, &expected, &credential)
        .unwrap_err();
    assert!(matches!(err, AuthError::InvalidOrigin));
}

#[tokio::test]
async fn consumed_challenge_cannot_be_replayed() {
    let manager = challenge_manager();

    let challenge = manager.issue();
    manager.consume_once(challenge.as_str()).await.unwrap();
    let err = manager.consume_once(challenge.as_str()).await.unwrap_err();
    assert!(matches!(err, AuthError::ChallengeReplayed));

    // A different challenge value is unaffected.
    let other = manager.issue();
    manager.consume_once(other.as_str()).await.unwrap();
}

#[tokio::test]
async fn rebinding_a_session_supersedes_the_earlier_challenge() {
    let manager = challenge_manager();

    let first = manager.issue();
    let _stale = manager.bind("session-xyz", &first).await.unwrap();

    let second = manager.issue();
    let handle = manager.bind("session-xyz", &second).await.unwrap();

    let bound = manager.retrieve(&handle).await.unwrap();
    assert_eq!(bound.challenge, second.as_str());
    assert_ne!(bound.challenge, first.as_str());
}

#[tokio::test]
async fn all_zero_aaguid_registers_as_platform_credential() {
    let service = service();
    let authenticator = TestAuthenticator::new().with_aaguid(Uuid::nil());

    let response = authenticator.registration_response("c1", ORIGIN, RP_ID, "none", false);
    let expected = service.expected("c1", Some(RP_ID), None);
    let credential = service
        .verify_registration(&response, &expected)
        .await
        .unwrap();

    assert_eq!(credential.device_type, DeviceType::Platform);
    assert_eq!(credential.aaguid, Uuid::nil());
    // Unknown device model: fall back to a dated generic name.
    assert!(credential.display_name.starts_with("Passkey ("));
}

#[tokio::test]
async fn missing_user_presence_is_rejected() {
    let service = service();
    let authenticator = TestAuthenticator::new().without_user_presence();

    let response = authenticator.registration_response("c1", ORIGIN, RP_ID, "none", false);
    let expected = service.expected("c1", Some(RP_ID), None);
    let err = service
        .verify_registration(&response, &expected)
        .await
        .unwrap_err();
    assert!(matches!(err, AuthError::UserNotPresent));
}

#[tokio::test]
async fn backup_flags_are_carried_onto_the_credential() {
    let service = service();
    let authenticator = TestAuthenticator::new().with_backup_flags(true, true);

    let response = authenticator.registration_response("c1", ORIGIN, RP_ID, "none", false);
    let expected = service.expected("c1", Some(RP_ID), None);
    let credential = service
        .verify_registration(&response, &expected)
        .await
        .unwrap();

    assert!(credential.backup_eligible);
    assert!(credential.backup_state);
}
