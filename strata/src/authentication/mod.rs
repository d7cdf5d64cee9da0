//! Authentication performed during the connection handshake.
//!
//! When a server answers STARTUP with AUTHENTICATE, the connection asks its
//! [`AuthenticatorProvider`] for a session and relays the exchange:
//!
//! ```text
//! AUTHENTICATE -> AUTH_RESPONSE -> (AUTH_CHALLENGE -> AUTH_RESPONSE)* -> AUTH_SUCCESS
//! ```

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use bytes::{BufMut, BytesMut};

/// Type to represent an authentication error message.
pub type AuthError = String;

/// Trait used to represent a user-defined custom authentication.
#[async_trait]
pub trait AuthenticatorSession: Send + Sync {
    /// To handle an authentication challenge initiated by the server.
    /// The information contained in the token parameter is authentication protocol specific.
    /// It may be NULL or empty.
    async fn evaluate_challenge(
        &mut self,
        token: Option<&[u8]>,
    ) -> Result<Option<Vec<u8>>, AuthError>;

    /// To handle the success phase of exchange.
    /// The token parameters contain information that may be used to finalize the request.
    async fn success(&mut self, token: Option<&[u8]>) -> Result<(), AuthError>;
}

/// Trait used to represent a factory of [`AuthenticatorSession`] instances.
/// A new [`AuthenticatorSession`] instance will be created for each connection.
///
/// The custom authenticator can be set using
/// [`ClusterConfig::authenticator_provider`](crate::config::ClusterConfig::authenticator_provider).
///
/// Default: [`PlainTextAuthenticator`], looked up in the [`AuthenticatorRegistry`]
/// under the configured authenticator name when credentials are set.
#[async_trait]
pub trait AuthenticatorProvider: Sync + Send {
    /// A pair of initial response and boxed [`AuthenticatorSession`]
    /// should be returned if authentication is required by the server.
    async fn start_authentication_session(
        &self,
        authenticator_name: &str,
    ) -> Result<(Option<Vec<u8>>, Box<dyn AuthenticatorSession>), AuthError>;
}

struct PlainTextAuthenticatorSession;

#[async_trait]
impl AuthenticatorSession for PlainTextAuthenticatorSession {
    async fn evaluate_challenge(
        &mut self,
        _token: Option<&[u8]>,
    ) -> Result<Option<Vec<u8>>, AuthError> {
        Err("Challenges are not expected during PlainTextAuthentication".to_string())
    }

    async fn success(&mut self, _token: Option<&[u8]>) -> Result<(), AuthError> {
        Ok(())
    }
}

/// Authenticator provider sending username and password in a single
/// SASL PLAIN response.
pub struct PlainTextAuthenticator {
    username: String,
    password: String,
}

impl PlainTextAuthenticator {
    /// Creates new [`PlainTextAuthenticator`] instance with provided username and password.
    pub fn new(username: String, password: String) -> Self {
        PlainTextAuthenticator { username, password }
    }
}

#[async_trait]
impl AuthenticatorProvider for PlainTextAuthenticator {
    async fn start_authentication_session(
        &self,
        _authenticator_name: &str,
    ) -> Result<(Option<Vec<u8>>, Box<dyn AuthenticatorSession>), AuthError> {
        let mut response = BytesMut::new();
        let username_as_bytes = self.username.as_bytes();
        let password_as_bytes = self.password.as_bytes();

        response.put_u8(0);
        response.put_slice(username_as_bytes);
        response.put_u8(0);
        response.put_slice(password_as_bytes);

        Ok((
            Some(response.to_vec()),
            Box::new(PlainTextAuthenticatorSession),
        ))
    }
}

/// Username and password handed to authenticator factories.
#[derive(Clone, PartialEq, Eq)]
pub struct Credentials {
    /// Login name.
    pub username: String,
    /// Kept out of `Debug` output.
    pub password: String,
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("username", &self.username)
            .field("password", &"<hidden>")
            .finish()
    }
}

/// Builds a provider from the configured credentials.
pub type AuthenticatorFactory =
    Arc<dyn Fn(&Credentials) -> Arc<dyn AuthenticatorProvider> + Send + Sync>;

/// Table of authenticators by name.
///
/// Names are matched case-insensitively against the end of the requested
/// name, so `PasswordAuthenticator` also answers for
/// `org.apache.cassandra.auth.PasswordAuthenticator`. Later registrations
/// win over earlier ones.
#[derive(Clone)]
pub struct AuthenticatorRegistry {
    factories: Vec<(String, AuthenticatorFactory)>,
}

impl Default for AuthenticatorRegistry {
    fn default() -> Self {
        let mut registry = Self::empty();
        registry.register(
            "PasswordAuthenticator",
            Arc::new(|credentials: &Credentials| -> Arc<dyn AuthenticatorProvider> {
                Arc::new(PlainTextAuthenticator::new(
                    credentials.username.clone(),
                    credentials.password.clone(),
                ))
            }),
        );
        registry
    }
}

impl fmt::Debug for AuthenticatorRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list()
            .entries(self.factories.iter().map(|(name, _)| name))
            .finish()
    }
}

impl AuthenticatorRegistry {
    /// A registry without any authenticator.
    pub fn empty() -> Self {
        Self {
            factories: Vec::new(),
        }
    }

    /// Adds an authenticator under `name`.
    pub fn register(&mut self, name: impl Into<String>, factory: AuthenticatorFactory) {
        self.factories.push((name.into(), factory));
    }

    /// Whether some registered name matches `name`.
    pub fn contains(&self, name: &str) -> bool {
        self.lookup(name).is_some()
    }

    fn lookup(&self, name: &str) -> Option<&AuthenticatorFactory> {
        let name = name.to_ascii_lowercase();
        self.factories
            .iter()
            .rev()
            .find(|(registered, _)| name.ends_with(&registered.to_ascii_lowercase()))
            .map(|(_, factory)| factory)
    }

    /// Builds the provider registered under `name` for `credentials`.
    pub fn resolve(
        &self,
        name: &str,
        credentials: &Credentials,
    ) -> Option<Arc<dyn AuthenticatorProvider>> {
        self.lookup(name).map(|factory| factory(credentials))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn credentials() -> Credentials {
        Credentials {
            username: "cassandra".to_owned(),
            password: "secret".to_owned(),
        }
    }

    #[tokio::test]
    async fn plain_text_initial_response() {
        let provider = PlainTextAuthenticator::new("user".to_owned(), "pass".to_owned());
        let (response, mut session) = provider
            .start_authentication_session("PasswordAuthenticator")
            .await
            .unwrap();
        assert_eq!(response.as_deref(), Some(&b"\0user\0pass"[..]));
        assert!(session.evaluate_challenge(None).await.is_err());
        assert!(session.success(None).await.is_ok());
    }

    #[test]
    fn registry_matches_by_suffix() {
        let registry = AuthenticatorRegistry::default();
        assert!(registry.contains("PasswordAuthenticator"));
        assert!(registry.contains("org.apache.cassandra.auth.PasswordAuthenticator"));
        assert!(registry.contains("passwordauthenticator"));
        assert!(!registry.contains("KerberosAuthenticator"));
        assert!(registry
            .resolve("com.example.PasswordAuthenticator", &credentials())
            .is_some());
    }

    struct Fixed(&'static [u8]);

    #[async_trait]
    impl AuthenticatorProvider for Fixed {
        async fn start_authentication_session(
            &self,
            _authenticator_name: &str,
        ) -> Result<(Option<Vec<u8>>, Box<dyn AuthenticatorSession>), AuthError> {
            Ok((
                Some(self.0.to_vec()),
                Box::new(PlainTextAuthenticatorSession),
            ))
        }
    }

    #[tokio::test]
    async fn later_registrations_win() {
        let mut registry = AuthenticatorRegistry::default();
        registry.register(
            "PasswordAuthenticator",
            Arc::new(|_: &Credentials| -> Arc<dyn AuthenticatorProvider> {
                Arc::new(Fixed(b"token"))
            }),
        );
        registry.register(
            "TokenAuthenticator",
            Arc::new(|_: &Credentials| -> Arc<dyn AuthenticatorProvider> {
                Arc::new(Fixed(b"other"))
            }),
        );

        let provider = registry
            .resolve("PasswordAuthenticator", &credentials())
            .unwrap();
        let (response, _) = provider.start_authentication_session("x").await.unwrap();
        assert_eq!(response.as_deref(), Some(&b"token"[..]));
    }

    #[test]
    fn credentials_debug_hides_password() {
        let printed = format!("{:?}", credentials());
        assert!(printed.contains("cassandra"));
        assert!(!printed.contains("secret"));
    }
}
