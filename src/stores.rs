use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Mutex;

/// Credential/secret store. The engine never interprets secret contents;
/// they flow opaquely into a provider's initialize handshake.
#[async_trait]
pub trait SecretStore: Send + Sync {
    async fn get_secret(&self, name: &str) -> Option<HashMap<String, String>>;
}

/// In-memory secret store for tests and single-process deployments.
#[derive(Default)]
pub struct MemorySecretStore {
    secrets: Mutex<HashMap<String, HashMap<String, String>>>,
}

impl MemorySecretStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, name: impl Into<String>, secret: HashMap<String, String>) {
        self.secrets.lock().unwrap().insert(name.into(), secret);
    }
}

#[async_trait]
impl SecretStore for MemorySecretStore {
    async fn get_secret(&self, name: &str) -> Option<HashMap<String, String>> {
        self.secrets.lock().unwrap().get(name).cloned()
    }
}

/// Object storage for artifacts (terminal states, logs, generated
/// reports). Off the hot path; failures are logged, never fatal.
#[async_trait]
pub trait ArtifactStore: Send + Sync {
    async fn put_object(
        &self,
        bucket: &str,
        key: &str,
        bytes: Vec<u8>,
        metadata: HashMap<String, String>,
    ) -> Result<(), String>;
}

/// In-memory artifact store, keyed by `bucket/key`.
#[derive(Default)]
pub struct MemoryArtifactStore {
    objects: Mutex<HashMap<String, Vec<u8>>>,
}

impl MemoryArtifactStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, bucket: &str, key: &str) -> Option<Vec<u8>> {
        self.objects.lock().unwrap().get(&format!("{bucket}/{key}")).cloned()
    }

    pub fn len(&self) -> usize {
        self.objects.lock().unwrap().len()
    }
}

#[async_trait]
impl ArtifactStore for MemoryArtifactStore {
    async fn put_object(
        &self,
        bucket: &str,
        key: &str,
        bytes: Vec<u8>,
        _metadata: HashMap<String, String>,
    ) -> Result<(), String> {
        self.objects
            .lock()
            .unwrap()
            .insert(format!("{bucket}/{key}"), bytes);
        Ok(())
    }
}
