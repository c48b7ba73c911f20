//! Session active-execution slot.

use std::sync::Arc;

use shellwire::models::execution::CommandSpec;
use shellwire::models::session::Session;
use shellwire::orchestrator::execution::Execution;
use shellwire::AppError;

fn execution(session: &Session) -> Arc<Execution> {
    Arc::new(Execution::new(
        session.id.clone(),
        CommandSpec::Shell("true".into()),
    ))
}

#[test]
fn new_session_is_idle_with_unique_id() {
    let a = Session::new(Some("127.0.0.1:1".into()));
    let b = Session::new(None);
    assert_ne!(a.id, b.id);
    assert!(!a.is_busy());
    assert!(a.active().is_none());
}

#[test]
fn second_attach_is_busy() {
    let session = Session::new(None);
    let first = execution(&session);
    session.try_attach(Arc::clone(&first)).unwrap();
    let err = session.try_attach(execution(&session)).unwrap_err();
    assert!(matches!(err, AppError::Busy(_)));
    assert_eq!(session.active().unwrap().id, first.id);
}

#[test]
fn detach_only_clears_matching_execution() {
    let session = Session::new(None);
    let first = execution(&session);
    session.try_attach(Arc::clone(&first)).unwrap();

    assert!(!session.detach("someone-else"));
    assert!(session.is_busy());
    assert!(session.detach(&first.id));
    assert!(!session.is_busy());
    assert!(!session.detach(&first.id));

    session.try_attach(execution(&session)).unwrap();
}
