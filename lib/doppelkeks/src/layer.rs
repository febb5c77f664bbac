use crate::{CsrfService, error::Error, token::SecretKey};
use tower::Layer;
use triomphe::Arc;

/// Layer applying the double-submit CSRF filter to the wrapped service
#[derive(Clone)]
pub struct CsrfLayer {
    key: Arc<SecretKey>,
}

impl CsrfLayer {
    /// Build the layer from the server-wide signing secret
    ///
    /// An empty secret is a configuration mistake and is reported here, at
    /// startup, instead of surfacing as a 403 on every request.
    pub fn new(secret: impl AsRef<[u8]>) -> Result<Self, Error> {
        Ok(Self {
            key: Arc::new(SecretKey::new(secret)?),
        })
    }
}

impl<S> Layer<S> for CsrfLayer {
    type Service = CsrfService<S>;

    fn layer(&self, inner: S) -> Self::Service {
        CsrfService::new(inner, Arc::clone(&self.key))
    }
}
