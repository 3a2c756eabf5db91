//! Shared harness for the integration tests.

#![allow(dead_code)]

use federated_auth::clock::Clock;
use federated_auth::mocks::{
    ManualClock, MemoryKeyValueStore, MockIdentityProvider, MockNotifier, MockPasswordHasher,
    MockUserDirectory,
};
use federated_auth::providers::{NewUser, PasswordHasher, User, UserDirectory};
use federated_auth::state::Role;
use federated_auth::{AuthConfig, AuthEnvironment, AuthService, ClientInfo};
use std::net::{IpAddr, Ipv4Addr};
use std::sync::Arc;

/// Service wired to the in-memory collaborators.
pub type TestService = AuthService<
    MemoryKeyValueStore,
    MockUserDirectory,
    MockNotifier,
    MockPasswordHasher,
    MockIdentityProvider,
>;

/// A service plus handles onto everything it was built from.
pub struct Harness {
    pub service: TestService,
    pub kv: MemoryKeyValueStore,
    pub users: MockUserDirectory,
    pub notifier: MockNotifier,
    pub identity: MockIdentityProvider,
    pub clock: ManualClock,
}

/// Install a test subscriber once; `RUST_LOG` controls verbosity.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

pub fn config() -> AuthConfig {
    AuthConfig::new("test-access-secret", "test-refresh-secret")
}

pub fn harness() -> Harness {
    harness_with(config())
}

pub fn harness_with(config: AuthConfig) -> Harness {
    init_tracing();

    let clock = ManualClock::default();
    let shared: Arc<dyn Clock> = Arc::new(clock.clone());
    let kv = MemoryKeyValueStore::new(Arc::clone(&shared));
    let users = MockUserDirectory::new(Arc::clone(&shared));
    let notifier = MockNotifier::new();
    let identity = MockIdentityProvider::new();

    let env = AuthEnvironment::new(
        kv.clone(),
        users.clone(),
        notifier.clone(),
        MockPasswordHasher::new(),
        identity.clone(),
        shared,
    );
    let service = AuthService::new(env, config).unwrap();

    Harness {
        service,
        kv,
        users,
        notifier,
        identity,
        clock,
    }
}

pub fn client() -> ClientInfo {
    ClientInfo::new(IpAddr::V4(Ipv4Addr::new(203, 0, 113, 7)), "integration-test")
}

pub fn ip() -> IpAddr {
    client().ip
}

impl Harness {
    /// Create a password account directly in the directory.
    pub async fn seed_user(&self, email: &str, password: &str) -> User {
        self.users
            .create(NewUser {
                email: email.to_string(),
                first_name: Some("Ada".to_string()),
                last_name: Some("Lovelace".to_string()),
                password_hash: Some(MockPasswordHasher::new().hash(password).unwrap()),
                role: Role::User,
                avatar_url: None,
                provider: None,
            })
            .await
            .unwrap()
    }
}
