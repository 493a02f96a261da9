use domain::Celesta;
use std::sync::Arc;

use crate::api::auth::JwtKeys;

/// Lightweight handle to the Celesta services that can be cheaply cloned across tasks.
/// The engine synchronizes trades internally, so no outer lock is needed.
#[derive(Debug, Clone)]
pub struct CelestaHandle {
    inner: Arc<Celesta>,
    jwt: JwtKeys,
}

impl CelestaHandle {
    pub fn new(celesta: Celesta, jwt: JwtKeys) -> Self {
        Self {
            inner: Arc::new(celesta),
            jwt,
        }
    }

    pub fn celesta(&self) -> &Celesta {
        &self.inner
    }

    pub fn jwt(&self) -> &JwtKeys {
        &self.jwt
    }
}
