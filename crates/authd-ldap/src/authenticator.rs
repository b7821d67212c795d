//! One authentication attempt: connect, resolve, verify, release.

use crate::config::DirectoryConfig;
use crate::connector::{DirectoryConnection, DirectoryConnector};
use crate::session::ResolvedIdentity;
use crate::transport::LdapDialer;
use authd_core::{DirectoryError, DirectoryErrorKind};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::time::Instant;
use tracing::{debug, error, info, info_span, trace, warn, Instrument, Level};
use uuid::Uuid;

/// Progress of a single attempt.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub enum AuthStage {
    /// Nothing started yet.
    #[default]
    Idle,
    /// Dialing the directory and binding the service identity.
    Connecting,
    /// Connected with the service identity bound.
    ServiceBound,
    /// Searching for the user entry.
    Resolving,
    /// Binding as the user.
    Verifying,
    /// The password was accepted.
    Authenticated,
    /// The attempt ended with an error.
    Failed,
}

impl AuthStage {
    /// Lowercase name used in logs.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Connecting => "connecting",
            Self::ServiceBound => "service_bound",
            Self::Resolving => "resolving",
            Self::Verifying => "verifying",
            Self::Authenticated => "authenticated",
            Self::Failed => "failed",
        }
    }
}

impl fmt::Display for AuthStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Outcome a caller may reveal to an untrusted client.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Rejection {
    /// The login or password was not accepted.
    InvalidCredentials,
    /// The directory could not be reached or the service identity was refused.
    Unavailable,
}

/// A failed attempt: the stage it failed in and the underlying error.
#[derive(Debug, Error)]
#[error("authentication failed while {stage}: {source}")]
pub struct AuthError {
    stage: AuthStage,
    source: DirectoryError,
}

impl AuthError {
    /// Stage the attempt failed in.
    #[must_use]
    pub const fn stage(&self) -> AuthStage {
        self.stage
    }

    /// Kind of the underlying directory error.
    #[must_use]
    pub const fn kind(&self) -> DirectoryErrorKind {
        self.source.kind()
    }

    /// Underlying directory error.
    #[must_use]
    pub const fn directory_error(&self) -> &DirectoryError {
        &self.source
    }

    /// Collapses the failure to what a client may learn.
    ///
    /// Every failure after the connection is up reads as bad credentials, so clients cannot
    /// tell unknown users from wrong passwords.
    #[must_use]
    pub const fn rejection(&self) -> Rejection {
        match self.stage {
            AuthStage::Resolving | AuthStage::Verifying => Rejection::InvalidCredentials,
            AuthStage::Idle
            | AuthStage::Connecting
            | AuthStage::ServiceBound
            | AuthStage::Authenticated
            | AuthStage::Failed => Rejection::Unavailable,
        }
    }
}

/// Runs authentication attempts against the directory.
#[derive(Debug)]
pub struct Authenticator {
    connector: DirectoryConnector,
}

impl Authenticator {
    /// Creates an authenticator that dials with `ldap3`.
    #[must_use]
    pub fn new(config: Arc<DirectoryConfig>) -> Self {
        Self {
            connector: DirectoryConnector::new(config),
        }
    }

    /// Creates an authenticator with a custom dialer.
    #[must_use]
    pub fn with_dialer(config: Arc<DirectoryConfig>, dialer: Arc<dyn LdapDialer>) -> Self {
        Self {
            connector: DirectoryConnector::with_dialer(config, dialer),
        }
    }

    /// Returns the directory configuration.
    #[must_use]
    pub fn config(&self) -> &DirectoryConfig {
        self.connector.config()
    }

    /// Authenticates `login` with `password` on a fresh connection.
    ///
    /// The whole attempt is bounded by the request timeout. Each step gets the smaller of its
    /// own timeout and the time left.
    ///
    /// # Errors
    ///
    /// Returns [`AuthError`] carrying the failing stage; use [`AuthError::rejection`] before
    /// answering a client.
    pub async fn authenticate(
        &self,
        login: &str,
        password: &str,
    ) -> Result<ResolvedIdentity, AuthError> {
        let attempt_id = Uuid::new_v4();
        let span = info_span!("authenticate", %attempt_id, login = ?login);
        async {
            let result = self.attempt(login, password).await;
            match &result {
                Ok(identity) => info!(dn = %identity.bind_dn(), "authentication succeeded"),
                Err(err) => log_failure(err),
            }
            result
        }
        .instrument(span)
        .await
    }

    async fn attempt(&self, login: &str, password: &str) -> Result<ResolvedIdentity, AuthError> {
        let config = self.config();
        let deadline = Instant::now() + config.request_timeout();
        let mut tracker = StageTracker::default();

        tracker.advance(AuthStage::Connecting);
        let mut conn = self
            .connector
            .connect_within(budget(config.connect_timeout(), deadline))
            .await
            .map_err(|err| tracker.fail(err))?;
        if conn.is_service_bound() {
            tracker.advance(AuthStage::ServiceBound);
        }

        let result = Self::resolve_and_verify(&conn, &mut tracker, login, password, deadline).await;
        conn.close_within(budget(config.operation_timeout(), deadline)).await;

        if result.is_ok() {
            tracker.advance(AuthStage::Authenticated);
        }
        result
    }

    async fn resolve_and_verify(
        conn: &DirectoryConnection,
        tracker: &mut StageTracker,
        login: &str,
        password: &str,
        deadline: Instant,
    ) -> Result<ResolvedIdentity, AuthError> {
        let operation_timeout = conn.config().operation_timeout();

        tracker.advance(AuthStage::Resolving);
        let identity = conn
            .resolve_user(login, budget(operation_timeout, deadline))
            .await
            .map_err(|err| tracker.fail(err))?;

        tracker.advance(AuthStage::Verifying);
        conn.verify_password(
            identity.bind_dn(),
            password,
            budget(operation_timeout, deadline),
        )
        .await
        .map_err(|err| tracker.fail(err))?;

        Ok(identity)
    }
}

#[derive(Debug, Default)]
struct StageTracker {
    stage: AuthStage,
}

impl StageTracker {
    fn advance(&mut self, next: AuthStage) {
        trace!(from = %self.stage, to = %next, "attempt stage");
        self.stage = next;
    }

    fn fail(&mut self, source: DirectoryError) -> AuthError {
        let stage = self.stage;
        self.advance(AuthStage::Failed);
        AuthError { stage, source }
    }
}

/// Smaller of `limit` and the time left before `deadline`.
fn budget(limit: Duration, deadline: Instant) -> Duration {
    limit.min(deadline.saturating_duration_since(Instant::now()))
}

fn log_failure(err: &AuthError) {
    let kind = err.kind();
    let level = kind.severity();
    let stage = err.stage();
    let timed_out = kind.is_timeout();
    let error = err.directory_error();
    if level == Level::ERROR {
        error!(%stage, timed_out, %error, "authentication failed");
    } else if level == Level::WARN {
        warn!(%stage, timed_out, %error, "authentication failed");
    } else if level == Level::INFO {
        info!(%stage, timed_out, %error, "authentication failed");
    } else {
        debug!(%stage, timed_out, %error, "authentication failed");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::{
        LdapEntry, LdapSession, MockLdapDialer, MockLdapSession, SearchRequest,
    };
    use async_trait::async_trait;
    use ldap3::{LdapError, LdapResult};
    use secrecy::SecretString;
    use std::collections::HashMap;
    use std::io;
    use std::sync::Mutex;

    fn config() -> DirectoryConfig {
        DirectoryConfig::new("ldap://ldap.example.com", "dc=example,dc=com").unwrap()
    }

    fn entry() -> LdapEntry {
        let mut attributes = HashMap::new();
        attributes.insert("uid".to_string(), vec!["alice".to_string()]);
        LdapEntry {
            dn: "uid=alice,dc=example,dc=com".to_string(),
            attributes,
        }
    }

    fn dialer_for(session: MockLdapSession) -> Arc<MockLdapDialer> {
        let mut session = Some(session);
        let mut dialer = MockLdapDialer::new();
        dialer.expect_dial().times(1).returning(move || {
            Ok(Box::new(session.take().unwrap()) as Box<dyn LdapSession>)
        });
        Arc::new(dialer)
    }

    fn rejected(rc: u32) -> LdapError {
        LdapError::from(LdapResult {
            rc,
            matched: String::new(),
            text: String::new(),
            refs: Vec::new(),
            ctrls: Vec::new(),
        })
    }

    #[tokio::test]
    async fn successful_attempt_returns_identity_and_closes() {
        let mut session = MockLdapSession::new();
        session.expect_search().times(1).returning(|_| Ok(vec![entry()]));
        session
            .expect_simple_bind()
            .times(1)
            .returning(|dn, _| {
                assert_eq!(dn, "uid=alice,dc=example,dc=com");
                Ok(())
            });
        session.expect_unbind().times(1).returning(|| ());

        let auth = Authenticator::with_dialer(Arc::new(config()), dialer_for(session));
        let identity = auth.authenticate("alice", "pw").await.unwrap();
        assert_eq!(identity.attributes().get("uid").map(String::as_str), Some("alice"));
    }

    #[tokio::test]
    async fn wrong_password_fails_in_verifying_stage() {
        let mut session = MockLdapSession::new();
        session.expect_search().returning(|_| Ok(vec![entry()]));
        session
            .expect_simple_bind()
            .times(1)
            .returning(|_, _| Err(rejected(49)));
        session.expect_unbind().times(1).returning(|| ());

        let auth = Authenticator::with_dialer(Arc::new(config()), dialer_for(session));
        let err = auth.authenticate("alice", "nope").await.unwrap_err();
        assert_eq!(err.stage(), AuthStage::Verifying);
        assert_eq!(err.kind(), DirectoryErrorKind::InvalidCredentials);
        assert_eq!(err.rejection(), Rejection::InvalidCredentials);
    }

    #[tokio::test]
    async fn unknown_user_reads_as_invalid_credentials() {
        let mut session = MockLdapSession::new();
        session.expect_search().returning(|_| Ok(Vec::new()));
        session.expect_simple_bind().times(0);
        session.expect_unbind().times(1).returning(|| ());

        let auth = Authenticator::with_dialer(Arc::new(config()), dialer_for(session));
        let err = auth.authenticate("mallory", "pw").await.unwrap_err();
        assert_eq!(err.stage(), AuthStage::Resolving);
        assert_eq!(err.kind(), DirectoryErrorKind::UserNotFound);
        assert_eq!(err.rejection(), Rejection::InvalidCredentials);
    }

    #[tokio::test]
    async fn connect_failure_is_unavailable() {
        let mut dialer = MockLdapDialer::new();
        dialer.expect_dial().returning(|| {
            Err(DirectoryError::new(
                DirectoryErrorKind::ConnectionFailed,
                "failed to dial LDAP server",
            ))
        });

        let auth = Authenticator::with_dialer(Arc::new(config()), Arc::new(dialer));
        let err = auth.authenticate("alice", "pw").await.unwrap_err();
        assert_eq!(err.stage(), AuthStage::Connecting);
        assert_eq!(err.rejection(), Rejection::Unavailable);
    }

    #[tokio::test]
    async fn refused_service_bind_is_unavailable() {
        let mut session = MockLdapSession::new();
        session
            .expect_simple_bind()
            .times(1)
            .returning(|_, _| Err(rejected(49)));
        session.expect_unbind().times(1).returning(|| ());

        let config = config().with_service_bind(
            "cn=svc,dc=example,dc=com",
            SecretString::from("bad".to_string()),
        );
        let auth = Authenticator::with_dialer(Arc::new(config), dialer_for(session));
        let err = auth.authenticate("alice", "pw").await.unwrap_err();
        assert_eq!(err.kind(), DirectoryErrorKind::BindFailed);
        assert_eq!(err.rejection(), Rejection::Unavailable);
    }

    struct StalledUnbindSession;

    #[async_trait]
    impl LdapSession for StalledUnbindSession {
        async fn simple_bind(&self, _dn: &str, _password: &str) -> Result<(), LdapError> {
            Ok(())
        }

        async fn search(&self, _request: &SearchRequest) -> Result<Vec<LdapEntry>, LdapError> {
            Ok(vec![entry()])
        }

        async fn unbind(&self) {
            std::future::pending::<()>().await;
        }
    }

    struct StalledUnbindDialer;

    #[async_trait]
    impl LdapDialer for StalledUnbindDialer {
        async fn dial(&self) -> authd_core::Result<Box<dyn LdapSession>> {
            Ok(Box::new(StalledUnbindSession))
        }
    }

    #[tokio::test]
    async fn stalled_unbind_stays_within_the_request_timeout() {
        let config = config()
            .with_operation_timeout(Duration::from_secs(2))
            .with_request_timeout(Duration::from_millis(300));
        let auth = Authenticator::with_dialer(Arc::new(config), Arc::new(StalledUnbindDialer));

        let started = Instant::now();
        let identity = auth.authenticate("alice", "pw").await.unwrap();
        assert_eq!(identity.bind_dn(), "uid=alice,dc=example,dc=com");
        assert!(started.elapsed() < Duration::from_secs(1));
    }

    #[derive(Clone, Default)]
    struct CapturedLogs(Arc<Mutex<Vec<u8>>>);

    impl CapturedLogs {
        fn text(&self) -> String {
            String::from_utf8_lossy(&self.0.lock().unwrap()).into_owned()
        }
    }

    impl io::Write for CapturedLogs {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            self.0.lock().unwrap().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    #[tokio::test]
    async fn login_with_line_breaks_cannot_forge_log_lines() {
        let logs = CapturedLogs::default();
        let writer = logs.clone();
        let subscriber = tracing_subscriber::fmt()
            .with_max_level(Level::DEBUG)
            .with_ansi(false)
            .without_time()
            .with_writer(move || writer.clone())
            .finish();
        let _guard = tracing::subscriber::set_default(subscriber);

        let mut session = MockLdapSession::new();
        session.expect_search().times(1).returning(|_| Ok(Vec::new()));
        session.expect_unbind().returning(|| ());
        let auth = Authenticator::with_dialer(Arc::new(config()), dialer_for(session));

        let login = "mallory\nFORGED authenticate{login=admin}: authentication succeeded\n";
        let err = auth.authenticate(login, "pw").await.unwrap_err();
        assert_eq!(err.kind(), DirectoryErrorKind::UserNotFound);

        let output = logs.text();
        assert!(output.contains("searching for user"));
        assert!(output.contains("authentication failed"));
        assert!(output.contains("timed_out=false"));
        assert!(output.contains(r"mallory\nFORGED"));
        assert!(output.lines().all(|line| !line.starts_with("FORGED")));
    }

    #[test]
    fn budget_never_exceeds_time_left() {
        let deadline = Instant::now() + Duration::from_millis(500);
        assert!(budget(Duration::from_secs(2), deadline) <= Duration::from_millis(500));
        assert_eq!(
            budget(Duration::from_millis(100), deadline),
            Duration::from_millis(100)
        );
        let past = Instant::now();
        assert_eq!(budget(Duration::from_secs(2), past), Duration::ZERO);
    }

    #[test]
    fn only_post_connect_stages_read_as_invalid_credentials() {
        let stages = [
            (AuthStage::Idle, Rejection::Unavailable),
            (AuthStage::Connecting, Rejection::Unavailable),
            (AuthStage::ServiceBound, Rejection::Unavailable),
            (AuthStage::Resolving, Rejection::InvalidCredentials),
            (AuthStage::Verifying, Rejection::InvalidCredentials),
            (AuthStage::Authenticated, Rejection::Unavailable),
            (AuthStage::Failed, Rejection::Unavailable),
        ];
        for (stage, rejection) in stages {
            let err = AuthError {
                stage,
                source: DirectoryError::new(DirectoryErrorKind::SearchFailed, "search failed"),
            };
            assert_eq!(err.rejection(), rejection, "stage {stage}");
        }
    }

    #[test]
    fn error_display_names_stage_and_cause() {
        let err = AuthError {
            stage: AuthStage::Resolving,
            source: DirectoryError::new(DirectoryErrorKind::UserNotFound, "user not found"),
        };
        assert_eq!(
            err.to_string(),
            "authentication failed while resolving: [user_not_found] user not found"
        );
    }
}
