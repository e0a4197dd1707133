use super::*;
use uuid::Uuid;

fn alice() -> UserIdentity {
    UserIdentity { id: 1, username: "alice".into(), role: "user".into() }
}

#[test]
fn new_session_is_connecting() {
    let session = Session::new(Uuid::new_v4());
    assert_eq!(session.state_name(), "connecting");
    assert!(session.user().is_none());
}

#[test]
fn operations_are_illegal_before_authentication() {
    let session = Session::new(Uuid::new_v4());
    for op in ["join_room", "leave_room", "send_message", "typing"] {
        let err = session.authorize(op).unwrap_err();
        let SessionError::IllegalState { state, operation } = err;
        assert_eq!(state, "connecting");
        assert_eq!(operation, op);
    }
}

#[test]
fn authenticate_transitions_and_caches_identity() {
    let mut session = Session::new(Uuid::new_v4());
    let user = session.authenticate(alice()).expect("authenticate");
    assert_eq!(user.username, "alice");
    assert_eq!(session.state_name(), "authenticated");
    assert_eq!(session.authorize("send_message").expect("authorized").id, 1);
}

#[test]
fn authenticate_twice_is_illegal() {
    let mut session = Session::new(Uuid::new_v4());
    session.authenticate(alice()).expect("first authenticate");
    let err = session.authenticate(alice()).unwrap_err();
    assert!(matches!(
        err,
        SessionError::IllegalState { state: "authenticated", operation: "authenticate" }
    ));
}

#[test]
fn rejected_session_is_closed_and_stays_closed() {
    let mut session = Session::new(Uuid::new_v4());
    session.reject();
    assert_eq!(session.state_name(), "closed");

    // No retry within the same connection.
    assert!(session.authenticate(alice()).is_err());
    assert!(session.authorize("join_room").is_err());
    assert!(session.close().is_none(), "nothing was registered, nothing to clean up");
}

#[test]
fn close_yields_identity_exactly_once() {
    let mut session = Session::new(Uuid::new_v4());
    session.authenticate(alice()).expect("authenticate");

    let first = session.close();
    assert_eq!(first.map(|u| u.id), Some(1));
    assert_eq!(session.state_name(), "closed");

    assert!(session.close().is_none(), "second close must not trigger cleanup again");
}

#[test]
fn close_from_connecting_needs_no_cleanup() {
    let mut session = Session::new(Uuid::new_v4());
    assert!(session.close().is_none());
    assert_eq!(session.state_name(), "closed");
}

#[test]
fn illegal_state_error_maps_to_wire_code() {
    use crate::event::{ServerEvent, WireCode};

    let err = SessionError::IllegalState { state: "closed", operation: "typing" };
    assert_eq!(err.wire_code(), "E_ILLEGAL_STATE");

    let ev = ServerEvent::error_from(&err);
    let ServerEvent::Error { code, message } = ev else {
        panic!("expected error event");
    };
    assert_eq!(code, "E_ILLEGAL_STATE");
    assert!(message.contains("typing"));
    assert!(message.contains("closed"));
}
