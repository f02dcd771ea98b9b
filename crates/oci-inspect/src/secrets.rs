//! Credentials for authenticating to a registry

/// The authentication to use for a registry.
#[derive(Clone)]
pub enum RegistryAuth {
    /// Make anonymous requests. Suitable for public registries and the
    /// default here, since this client only ever reads.
    Anonymous,
    /// Authenticate with a username and password (or robot token).
    Basic(String, String),
}

pub(crate) trait RequestBuilderExt {
    fn apply_authentication(self, auth: &RegistryAuth) -> Self;
}

impl RequestBuilderExt for reqwest::RequestBuilder {
    fn apply_authentication(self, auth: &RegistryAuth) -> Self {
        match auth {
            RegistryAuth::Anonymous => self,
            RegistryAuth::Basic(username, password) => {
                self.basic_auth(username, Some(password))
            }
        }
    }
}
