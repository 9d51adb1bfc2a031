//! NIP-42 authentication during publish.

mod common;

use common::*;
use nostr_core::{EventSigner, create_auth_template};
use proptest::prelude::*;
use relay_client::{
    AuthNegotiator, AuthPhase, AuthRequirement, ClientError, PublishCoordinator, RelayConnection,
};
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;

/// Relay that requires auth for EVENT and accepts valid AUTH events.
fn members_only(frame: &Value, session: &mut Session) -> Vec<Frame> {
    match tag(frame) {
        "EVENT" if session.authenticated => vec![ok(&event_id(frame), true, "")],
        "EVENT" => vec![ok(&event_id(frame), false, "auth-required: members only")],
        "AUTH" => {
            let accepted = session.check_auth(frame);
            let reason = if accepted { "" } else { "invalid: bad auth event" };
            vec![ok(&event_id(frame), accepted, reason)]
        }
        _ => vec![],
    }
}

#[tokio::test]
async fn test_publish_authenticates_then_retries_once() {
    let relay = MockRelay::start_with(|s| vec![s.challenge("welcome-1")], members_only).await;

    let signer = signer();
    let event = note(signer.as_ref(), "hello");
    let result = PublishCoordinator::new(fast_config())
        .publish(&event, &[relay.url()], Some(signer.clone()))
        .await
        .unwrap();

    assert!(result.is_success(), "{}", result.summary());
    assert_eq!(relay.tags(), vec!["EVENT", "AUTH", "EVENT"]);

    let frames = relay.received();
    assert_eq!(event_id(&frames[0]), event.id);
    assert_eq!(event_id(&frames[2]), event.id);
    assert_eq!(frames[1][1]["kind"], 22242);
    assert_eq!(frames[1][1]["pubkey"], signer.public_key());
}

#[tokio::test]
async fn test_publish_without_signer_reports_auth_required() {
    let relay = MockRelay::start_with(|s| vec![s.challenge("welcome-1")], members_only).await;

    let signer = signer();
    let event = note(signer.as_ref(), "hello");
    let result = PublishCoordinator::new(fast_config())
        .publish(&event, &[relay.url()], None)
        .await
        .unwrap();

    assert_eq!(
        result.failed[0].error,
        ClientError::AuthRequired("auth-required: members only".to_string())
    );
    assert_eq!(relay.tags(), vec!["EVENT"]);
}

#[tokio::test]
async fn test_auth_rejected_is_final() {
    let relay = MockRelay::start_with(
        |s| vec![s.challenge("welcome-1")],
        |frame, _| match tag(frame) {
            "EVENT" => vec![ok(&event_id(frame), false, "auth-required: members only")],
            "AUTH" => vec![ok(&event_id(frame), false, "restricted: not a member")],
            _ => vec![],
        },
    )
    .await;

    let signer = signer();
    let event = note(signer.as_ref(), "hello");
    let result = PublishCoordinator::new(fast_config())
        .publish(&event, &[relay.url()], Some(signer.clone()))
        .await
        .unwrap();

    assert_eq!(
        result.failed[0].error,
        ClientError::AuthRejected("restricted: not a member".to_string())
    );
    assert_eq!(relay.tags(), vec!["EVENT", "AUTH"]);
}

#[tokio::test]
async fn test_second_auth_required_is_terminal() {
    let relay = MockRelay::start_with(
        |s| vec![s.challenge("welcome-1")],
        |frame, session| match tag(frame) {
            "EVENT" => vec![ok(&event_id(frame), false, "auth-required: still no")],
            "AUTH" => {
                let accepted = session.check_auth(frame);
                vec![ok(&event_id(frame), accepted, "")]
            }
            _ => vec![],
        },
    )
    .await;

    let signer = signer();
    let event = note(signer.as_ref(), "hello");
    let result = PublishCoordinator::new(fast_config())
        .publish(&event, &[relay.url()], Some(signer.clone()))
        .await
        .unwrap();

    assert_eq!(
        result.failed[0].error,
        ClientError::AuthRequired("auth-required: still no".to_string())
    );
    assert_eq!(relay.tags(), vec!["EVENT", "AUTH", "EVENT"]);
}

#[tokio::test]
async fn test_challenge_after_rejection_is_awaited() {
    let relay = MockRelay::start(|frame, session| match tag(frame) {
        "EVENT" if session.authenticated => vec![ok(&event_id(frame), true, "")],
        "EVENT" => vec![
            ok(&event_id(frame), false, "auth-required: members only"),
            session.challenge("late-challenge"),
        ],
        "AUTH" => {
            let accepted = session.check_auth(frame);
            vec![ok(&event_id(frame), accepted, "")]
        }
        _ => vec![],
    })
    .await;

    let signer = signer();
    let event = note(signer.as_ref(), "hello");
    let result = PublishCoordinator::new(fast_config())
        .publish(&event, &[relay.url()], Some(signer.clone()))
        .await
        .unwrap();

    assert!(result.is_success(), "{}", result.summary());
    assert_eq!(relay.tags(), vec!["EVENT", "AUTH", "EVENT"]);
}

#[tokio::test]
async fn test_missing_challenge_times_out() {
    let relay = MockRelay::start(|frame, _| match tag(frame) {
        "EVENT" => vec![ok(&event_id(frame), false, "auth-required: members only")],
        _ => vec![],
    })
    .await;

    let config = fast_config().with_auth_timeout(Duration::from_millis(200));
    let signer = signer();
    let event = note(signer.as_ref(), "hello");
    let result = PublishCoordinator::new(config)
        .publish(&event, &[relay.url()], Some(signer.clone()))
        .await
        .unwrap();

    assert!(matches!(
        result.failed[0].error,
        ClientError::RequestTimeout(_)
    ));
    assert_eq!(relay.tags(), vec!["EVENT"]);
}

#[tokio::test]
async fn test_authenticate_directly() {
    let relay = MockRelay::start_with(|s| vec![s.challenge("direct")], members_only).await;
    let conn = RelayConnection::open(relay.url(), &fast_config())
        .await
        .unwrap();

    let challenge = conn
        .wait_for_challenge(Duration::from_secs(1))
        .await
        .unwrap();
    assert_eq!(challenge, "direct");
    assert_eq!(conn.auth_requirement(), AuthRequirement::Required);

    let signer = signer();
    AuthNegotiator::new(Duration::from_secs(1))
        .authenticate(&conn, &challenge, signer.as_ref())
        .await
        .unwrap();

    assert_eq!(conn.auth_requirement(), AuthRequirement::Authenticated);
    assert_eq!(conn.with_auth(|s| s.phase().clone()), AuthPhase::Authenticated);

    let frames = relay.received();
    let auth_event = &frames[0][1];
    assert_eq!(auth_event["content"], "");
    assert_eq!(
        auth_event["tags"],
        serde_json::json!([["challenge", "direct"], ["relay", relay.url()]])
    );
    conn.close().await;
}

#[tokio::test]
async fn test_auth_template_matches_wire_shape() {
    let template = create_auth_template("abc", "ws://127.0.0.1:1234/");
    assert_eq!(template.kind, 22242);
    assert_eq!(template.tags[1], vec!["relay", "ws://127.0.0.1:1234"]);
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(10))]

    /// Challenges buffered before the rejection: the auth event answers the latest.
    #[test]
    fn prop_latest_challenge_wins(challenges in prop::collection::vec("[a-z0-9]{4,12}", 1..5)) {
        let runtime = tokio::runtime::Runtime::new().unwrap();
        let latest = challenges.last().cloned().unwrap();

        let (tags, answered) = runtime.block_on(async {
            let on_connect = {
                let challenges = challenges.clone();
                move |s: &mut Session| challenges.iter().map(|c| s.challenge(c)).collect::<Vec<_>>()
            };
            let relay = MockRelay::start_with(on_connect, members_only).await;

            let signer = signer();
            let event = note(signer.as_ref(), "hello");
            let result = PublishCoordinator::new(fast_config())
                .publish(&event, &[relay.url()], Some(signer.clone() as Arc<dyn EventSigner>))
                .await
                .unwrap();
            assert!(result.is_success(), "{}", result.summary());

            let frames = relay.received();
            let answered = frames
                .iter()
                .find(|f| tag(f) == "AUTH")
                .and_then(|f| f[1]["tags"][0][1].as_str().map(str::to_string));
            (relay.tags(), answered)
        });

        prop_assert_eq!(tags, vec!["EVENT", "AUTH", "EVENT"]);
        prop_assert_eq!(answered, Some(latest));
    }
}
