use dal_unit_of_work::{DalError, ExceptionTranslator, SessionProvider};
use std::error::Error as _;
use std::io;
use std::sync::Arc;

#[test]
fn test_empty_provider_reports_session_not_open() {
    let provider = SessionProvider::<String>::new();
    assert!(provider.is_empty());
    assert!(matches!(provider.current_session(), Err(DalError::SessionNotOpen)));
}

#[test]
fn test_binding_twice_fails() {
    let provider = SessionProvider::new();
    let first = Arc::new("first".to_string());

    provider.bind(Arc::clone(&first)).expect("Failed to bind");
    let err = provider
        .set_current_session(Some(Arc::new("second".to_string())))
        .expect_err("Second bind should fail");
    assert!(matches!(err, DalError::SessionAlreadyOpen));

    let bound = provider.current_session().expect("First session should stay bound");
    assert!(Arc::ptr_eq(&bound, &first));
}

#[test]
fn test_clearing_allows_rebinding() {
    let provider = SessionProvider::new();
    provider.bind(Arc::new(1u32)).expect("Failed to bind");

    provider.set_current_session(None).expect("Clearing never fails");
    assert!(provider.is_empty());
    assert!(provider.clear().is_none());

    provider.bind(Arc::new(2u32)).expect("Failed to rebind");
    assert_eq!(provider.clear().as_deref(), Some(&2));
}

#[test]
fn test_translator_wraps_foreign_errors() {
    let err = ExceptionTranslator::wrap(io::Error::new(io::ErrorKind::BrokenPipe, "socket closed"));
    assert!(err.is_persistence());
    assert_eq!(err.to_string(), "Persistence error: socket closed");

    let source = err.source().expect("Cause should be kept");
    let io_err = source
        .downcast_ref::<io::Error>()
        .expect("Cause should be the io error");
    assert_eq!(io_err.kind(), io::ErrorKind::BrokenPipe);
}

#[test]
fn test_translator_passes_dal_errors_through() {
    let err = ExceptionTranslator::wrap(DalError::AlreadyCommitted);
    assert!(matches!(err, DalError::AlreadyCommitted));

    let call = ExceptionTranslator::wrap_call(|| -> Result<(), DalError> { Err(DalError::SessionNotOpen) });
    assert!(matches!(call, Err(DalError::SessionNotOpen)));
}

#[tokio::test]
async fn test_translator_wraps_futures() {
    let ok = ExceptionTranslator::wrap_future(async { Ok::<_, io::Error>(7) }).await;
    assert_eq!(ok.expect("Future should succeed"), 7);

    let failed = ExceptionTranslator::wrap_future(async {
        Err::<(), _>(io::Error::new(io::ErrorKind::TimedOut, "timed out"))
    })
    .await;
    assert!(matches!(failed, Err(DalError::Persistence { .. })));
}
