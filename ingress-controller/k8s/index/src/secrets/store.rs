use super::{is_supported_type, secret_type, validate};
use ahash::AHashMap as HashMap;
use nginx_ingress_controller_core::{extended::SecretReference, ResourceId, SecretFileManager};
use nginx_ingress_controller_k8s_api::Secret;
use parking_lot::RwLock;
use std::sync::Arc;

/// Validated secrets, materialized on the data plane on first read.
pub struct SecretStore {
    records: RwLock<HashMap<ResourceId, Record>>,
    manager: Arc<dyn SecretFileManager>,
}

#[derive(Clone, Debug)]
struct Record {
    secret: Arc<Secret>,
    path: String,
    error: Option<String>,
}

const NOT_FOUND: &str = "secret doesn't exist or of an unsupported type";

// === impl SecretStore ===

impl SecretStore {
    pub fn new(manager: Arc<dyn SecretFileManager>) -> Self {
        Self {
            records: Default::default(),
            manager,
        }
    }

    /// Validates and records a secret. A secret that is already materialized
    /// is rewritten if it is still valid and erased otherwise.
    pub fn add_or_update(&self, secret: Arc<Secret>) {
        let id = ResourceId::of(&*secret);
        if !is_supported_type(secret_type(&secret)) {
            self.delete(&id);
            return;
        }

        let error = validate(&secret).err().map(|e| e.to_string());
        let mut records = self.records.write();
        let path = match records.get(&id) {
            Some(prior) if !prior.path.is_empty() => {
                if error.is_some() {
                    self.manager.delete_secret(&id);
                    String::new()
                } else {
                    self.manager.add_or_update_secret(&secret)
                }
            }
            _ => String::new(),
        };
        if let Some(error) = &error {
            tracing::debug!(%id, %error, "Invalid secret");
        }
        records.insert(
            id,
            Record {
                secret,
                path,
                error,
            },
        );
    }

    pub fn delete(&self, id: &ResourceId) {
        if let Some(record) = self.records.write().remove(id) {
            if !record.path.is_empty() {
                self.manager.delete_secret(id);
            }
        }
    }

    /// Returns the state of a secret, materializing it if it is valid and
    /// was not yet written.
    pub fn get(&self, id: &ResourceId) -> SecretReference {
        let mut records = self.records.write();
        let record = match records.get_mut(id) {
            Some(record) => record,
            None => {
                return SecretReference {
                    error: Some(NOT_FOUND.to_string()),
                    ..Default::default()
                }
            }
        };

        if record.error.is_none() && record.path.is_empty() {
            record.path = self.manager.add_or_update_secret(&record.secret);
        }

        SecretReference {
            secret: Some(record.secret.clone()),
            type_: Some(secret_type(&record.secret).to_string()),
            path: record.path.clone(),
            error: record.error.clone(),
        }
    }

    pub fn contains(&self, id: &ResourceId) -> bool {
        self.records.read().contains_key(id)
    }

    pub fn len(&self) -> usize {
        self.records.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.read().is_empty()
    }
}

impl std::fmt::Debug for SecretStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SecretStore")
            .field("records", &self.records.read().len())
            .finish()
    }
}
