//! Read-only OCI registry client
//!
//! This client authenticates against an OCI distribution registry and
//! fetches manifests, image configurations (for labels and creation times),
//! tag lists and layer data. It never writes to a registry.

use crate::errors::OciEnvelope;
use crate::manifest::{
    ConfigFile, OciImageIndex, OciManifest, TagList, DEFAULT_ARCHITECTURE, DEFAULT_OS,
    IMAGE_MANIFEST_LIST_MEDIA_TYPE, IMAGE_MANIFEST_MEDIA_TYPE, OCI_IMAGE_INDEX_MEDIA_TYPE,
    OCI_IMAGE_MANIFEST_MEDIA_TYPE,
};
use crate::reference::ImageRef;
use crate::secrets::{RegistryAuth, RequestBuilderExt};
use crate::token_cache::{RegistryToken, RegistryTokenType, TokenCache};

use anyhow::{anyhow, Context};
use chrono::{DateTime, Utc};
use futures_util::future;
use futures_util::stream::StreamExt;
use hyperx::header::Header;
use reqwest::header::HeaderMap;
use reqwest::RequestBuilder;
use sha2::Digest;
use std::collections::HashMap;
use std::convert::TryFrom;
use std::sync::RwLock;
use tracing::{debug, trace, warn};
use www_authenticate::{Challenge, ChallengeFields, RawChallenge, WwwAuthenticate};

const MIME_TYPES_DISTRIBUTION_MANIFEST: &[&str] = &[
    IMAGE_MANIFEST_MEDIA_TYPE,
    IMAGE_MANIFEST_LIST_MEDIA_TYPE,
    OCI_IMAGE_MANIFEST_MEDIA_TYPE,
    OCI_IMAGE_INDEX_MEDIA_TYPE,
];

/// The metadata one inspection round-trip yields for an image: the digest
/// the registry served for the requested reference, the creation timestamp
/// and the raw label map, both exactly as recorded in the image config.
#[derive(Debug, Clone)]
pub struct InspectInfo {
    /// The manifest digest the registry served for the requested reference.
    pub digest: String,
    /// When the image was created, if its config records it.
    pub created: Option<DateTime<Utc>>,
    /// The image's label map, unmodified. Empty when the config has none.
    pub labels: HashMap<String, String>,
}

/// The layer data of a pulled image.
#[derive(Clone)]
pub struct ImageData {
    /// The layers of the image, in manifest order.
    pub layers: Vec<ImageLayer>,
    /// The manifest digest the registry served for the requested reference.
    pub digest: String,
}

/// The data and media type for one image layer.
#[derive(Clone)]
pub struct ImageLayer {
    /// The raw (possibly compressed) layer bytes.
    pub data: Vec<u8>,
    /// The media type of this layer.
    pub media_type: String,
}

/// A read-only client for OCI distribution registries.
///
/// Most public registries require at least an anonymous OAuth2 handshake
/// before serving content; the client performs it transparently on the first
/// request for each repository and caches the bearer token for the rest of
/// the process lifetime.
///
/// All methods take `&self`; only the token cache mutates, behind its own
/// lock, so one client can serve overlapping lookups.
#[derive(Default)]
pub struct Client {
    config: ClientConfig,
    tokens: RwLock<TokenCache>,
    client: reqwest::Client,
}

impl TryFrom<ClientConfig> for Client {
    type Error = anyhow::Error;

    fn try_from(config: ClientConfig) -> Result<Self, Self::Error> {
        let client_builder = reqwest::Client::builder()
            .danger_accept_invalid_certs(config.accept_invalid_certificates);

        Ok(Self {
            config,
            tokens: RwLock::new(TokenCache::new()),
            client: client_builder.build()?,
        })
    }
}

impl Client {
    /// Create a new client with the supplied config
    pub fn new(config: ClientConfig) -> Self {
        Client::try_from(config.clone()).unwrap_or_else(|err| {
            warn!("Cannot create OCI client from config: {:?}", err);
            warn!("Creating client with default configuration");
            Self {
                config,
                tokens: RwLock::new(TokenCache::new()),
                client: reqwest::Client::new(),
            }
        })
    }

    /// Fetch the creation time and label map for an image.
    ///
    /// This is the single network round-trip of an inspection: the manifest
    /// is fetched (resolving an image index to its linux/amd64 entry when
    /// necessary), then the config blob it points at, and the config's
    /// `created` and `Labels` fields are returned unmodified.
    pub async fn inspect(
        &self,
        image: &ImageRef,
        auth: &RegistryAuth,
    ) -> anyhow::Result<InspectInfo> {
        debug!(%image, "Inspecting image");
        if !self.has_token(image) {
            self.auth(image, auth).await?;
        }

        let (manifest, digest) = self.pull_manifest(image).await?;

        let mut out: Vec<u8> = Vec::new();
        self.pull_blob(image, &manifest.config.digest, &mut out)
            .await?;
        let config: ConfigFile = serde_json::from_slice(&out).with_context(|| {
            format!("failed to parse image config for '{}'", image)
        })?;

        Ok(InspectInfo {
            digest,
            created: config.created,
            labels: config.labels(),
        })
    }

    /// Fetch a manifest's digest from the registry.
    ///
    /// Will first attempt to read the `Docker-Content-Digest` header using a
    /// HEAD request. If this header is not present, will make a second GET
    /// request and return the SHA256 of the response body.
    pub async fn fetch_manifest_digest(
        &self,
        image: &ImageRef,
        auth: &RegistryAuth,
    ) -> anyhow::Result<String> {
        if !self.has_token(image) {
            self.auth(image, auth).await?;
        }

        let url = self.to_v2_manifest_url(image);
        debug!("HEAD image manifest from {}", url);
        let res = RequestBuilderWrapper::from_client(self, |client| client.head(&url))
            .apply_accept(MIME_TYPES_DISTRIBUTION_MANIFEST)?
            .apply_auth(image)?
            .into_request_builder()
            .send()
            .await?;

        trace!(headers = ?res.headers(), "Got headers");
        if res.headers().get("Docker-Content-Digest").is_none() {
            let (body, headers) = self.manifest_get(image, &url).await?;
            digest_header_value(headers, Some(&body))
        } else {
            let status = res.status();
            let headers = res.headers().clone();
            let text = res.text().await?;
            match status {
                reqwest::StatusCode::OK => digest_header_value(headers, None),
                reqwest::StatusCode::UNAUTHORIZED => anyhow::bail!("Not Authorized"),
                s if s.is_client_error() => Err(anyhow!("{} on {}", status, url)),
                s if s.is_server_error() => Err(anyhow!("Server error at {}", url)),
                s => Err(anyhow!(
                    "An unexpected error occurred: code={}, message='{}'",
                    s,
                    text
                )),
            }
        }
    }

    /// Fetch every tag of an image's repository.
    pub async fn list_tags(
        &self,
        image: &ImageRef,
        auth: &RegistryAuth,
    ) -> anyhow::Result<Vec<String>> {
        if !self.has_token(image) {
            self.auth(image, auth).await?;
        }

        let url = self.to_v2_tags_url(image);
        debug!("Listing tags from {}", url);
        let res = RequestBuilderWrapper::from_client(self, |client| client.get(&url))
            .apply_auth(image)?
            .into_request_builder()
            .send()
            .await?;

        match res.status() {
            reqwest::StatusCode::OK => {
                let tags: TagList = res
                    .json()
                    .await
                    .with_context(|| format!("failed to parse tag list from {}", url))?;
                Ok(tags.tags)
            }
            s if s.is_client_error() => {
                let err = res.json::<OciEnvelope>().await?;
                Err(anyhow!("{} on {}", err.errors[0], url))
            }
            s if s.is_server_error() => Err(anyhow!("Server error at {}", url)),
            s => Err(anyhow!(
                "An unexpected error occurred: code={}, message='{}'",
                s,
                res.text().await?
            )),
        }
    }

    /// Pull an image's layer data.
    ///
    /// Only the layers are fetched, not the config; this is what unpacking a
    /// bundle image's filesystem needs.
    pub async fn pull(
        &self,
        image: &ImageRef,
        auth: &RegistryAuth,
    ) -> anyhow::Result<ImageData> {
        debug!(%image, "Pulling image layers");
        if !self.has_token(image) {
            self.auth(image, auth).await?;
        }

        let (manifest, digest) = self.pull_manifest(image).await?;

        let layers = manifest.layers.into_iter().map(|layer| async move {
            let mut out: Vec<u8> = Vec::new();
            debug!("Pulling image layer");
            self.pull_blob(image, &layer.digest, &mut out).await?;
            Ok::<_, anyhow::Error>(ImageLayer {
                data: out,
                media_type: layer.media_type,
            })
        });
        let layers = future::try_join_all(layers).await?;

        Ok(ImageData { layers, digest })
    }

    /// Perform an OAuth v2 auth request if necessary.
    ///
    /// This performs authorization and then stores the token internally to be
    /// used on other requests.
    async fn auth(&self, image: &ImageRef, authentication: &RegistryAuth) -> anyhow::Result<()> {
        debug!(%image, "Authorizing for image");
        // The version request will tell us where to go.
        let url = format!(
            "{}://{}/v2/",
            self.config.protocol.scheme_for(image.registry()),
            image.registry()
        );
        debug!(?url);
        let res = self.client.get(&url).send().await?;
        let dist_hdr = match res.headers().get(reqwest::header::WWW_AUTHENTICATE) {
            Some(h) => h,
            None => return Ok(()),
        };

        let auth = WwwAuthenticate::parse_header(&dist_hdr.as_bytes().into())?;
        // If challenge_opt is not set it means that no challenge was present,
        // even though the header was present.
        let challenge_opt = match auth.get::<BearerChallenge>() {
            Some(co) => co,
            None => {
                // Fall back to HTTP Basic Auth
                if let RegistryAuth::Basic(username, password) = authentication {
                    self.store_token(
                        image,
                        RegistryTokenType::Basic(username.to_string(), password.to_string()),
                    )?;
                }
                return Ok(());
            }
        };

        // This client only ever reads, so a pull scope is all it asks for.
        let scope = format!("repository:{}:pull", image.repository());

        let challenge = &challenge_opt[0];
        let realm = challenge.realm.as_ref().ok_or_else(|| {
            anyhow!("bearer challenge from {} is missing a realm", image.registry())
        })?;
        let service = challenge.service.as_ref();
        let mut query = vec![("scope", &scope)];

        if let Some(s) = service {
            query.push(("service", s))
        }

        debug!(?realm, ?service, ?scope, "Making authentication call");

        let auth_res = self
            .client
            .get(realm)
            .query(&query)
            .apply_authentication(authentication)
            .send()
            .await?;

        match auth_res.status() {
            reqwest::StatusCode::OK => {
                let text = auth_res.text().await?;
                let token: RegistryToken = serde_json::from_str(&text)
                    .context("Failed to decode registry token from auth request")?;
                debug!(%image, "Successfully authorized for image");
                self.store_token(image, RegistryTokenType::Bearer(token))?;
                Ok(())
            }
            _ => {
                let reason = auth_res.text().await?;
                debug!(%image, %reason, "Failed to authenticate");
                Err(anyhow!("failed to authenticate: {}", reason))
            }
        }
    }

    fn has_token(&self, image: &ImageRef) -> bool {
        self.tokens
            .read()
            .map(|tokens| tokens.contains_key(image))
            .unwrap_or(false)
    }

    fn store_token(&self, image: &ImageRef, token: RegistryTokenType) -> anyhow::Result<()> {
        self.tokens
            .write()
            .map_err(|_| anyhow!("token cache lock poisoned"))?
            .insert(image, token);
        Ok(())
    }

    /// Pull the manifest for an image, resolving an image index to its
    /// linux/amd64 entry.
    ///
    /// Returns the manifest and the digest the registry served for the
    /// originally requested reference.
    async fn pull_manifest(&self, image: &ImageRef) -> anyhow::Result<(OciManifest, String)> {
        let url = self.to_v2_manifest_url(image);
        debug!("Pulling image manifest from {}", url);
        let (body, headers) = self.manifest_get(image, &url).await?;
        let digest = digest_header_value(headers, Some(&body))?;

        let raw: serde_json::Value = serde_json::from_str(&body)
            .with_context(|| format!("manifest response from {} is not JSON", url))?;
        if raw.get("manifests").is_some() {
            // An image index; pick the conventional platform and fetch that
            // entry's manifest.
            let index: OciImageIndex = serde_json::from_value(raw)
                .with_context(|| format!("failed to parse image index from {}", url))?;
            let entry = index
                .select_platform(DEFAULT_OS, DEFAULT_ARCHITECTURE)
                .ok_or_else(|| {
                    anyhow!(
                        "image index for '{}' has no {}/{} manifest",
                        image,
                        DEFAULT_OS,
                        DEFAULT_ARCHITECTURE
                    )
                })?;
            let entry_url =
                self.to_v2_manifest_url_for(image.registry(), image.repository(), &entry.digest);
            debug!("Resolving index entry from {}", entry_url);
            let (body, _) = self.manifest_get(image, &entry_url).await?;
            let manifest: OciManifest = serde_json::from_str(&body)
                .with_context(|| format!("failed to parse manifest from {}", entry_url))?;
            Ok((manifest, digest))
        } else {
            let manifest: OciManifest = serde_json::from_value(raw)
                .with_context(|| format!("failed to parse manifest from {}", url))?;
            Ok((manifest, digest))
        }
    }

    /// GET one manifest URL, returning the body and response headers.
    async fn manifest_get(
        &self,
        image: &ImageRef,
        url: &str,
    ) -> anyhow::Result<(String, HeaderMap)> {
        let res = RequestBuilderWrapper::from_client(self, |client| client.get(url))
            .apply_accept(MIME_TYPES_DISTRIBUTION_MANIFEST)?
            .apply_auth(image)?
            .into_request_builder()
            .send()
            .await?;

        // The OCI spec technically does not allow any codes but 200, 500,
        // 401, and 404. Obviously, HTTP servers are going to send other
        // codes. This tries to catch the obvious ones (200, 4XX, 5XX).
        match res.status() {
            reqwest::StatusCode::OK => {
                let headers = res.headers().clone();
                let text = res.text().await?;
                Ok((text, headers))
            }
            reqwest::StatusCode::UNAUTHORIZED => anyhow::bail!("Not Authorized"),
            s if s.is_client_error() => {
                // According to the OCI spec, we should see an error in the
                // message body.
                let err = res.json::<OciEnvelope>().await?;
                Err(anyhow!("{} on {}", err.errors[0], url))
            }
            s if s.is_server_error() => Err(anyhow!("Server error at {}", url)),
            s => Err(anyhow!(
                "An unexpected error occurred: code={}, message='{}'",
                s,
                res.text().await?
            )),
        }
    }

    /// Pull a single blob (layer or config) by digest into `out`.
    async fn pull_blob(
        &self,
        image: &ImageRef,
        digest: &str,
        out: &mut Vec<u8>,
    ) -> anyhow::Result<()> {
        let url = self.to_v2_blob_url(image.registry(), image.repository(), digest);
        let res = RequestBuilderWrapper::from_client(self, |client| client.get(&url))
            .apply_auth(image)?
            .into_request_builder()
            .send()
            .await?;
        if !res.status().is_success() {
            anyhow::bail!("failed to fetch blob {}: HTTP {}", url, res.status());
        }

        let mut stream = res.bytes_stream();
        while let Some(bytes) = stream.next().await {
            out.extend_from_slice(&bytes?);
        }

        Ok(())
    }

    /// Convert a Reference to a v2 manifest URL.
    fn to_v2_manifest_url(&self, reference: &ImageRef) -> String {
        let selector = reference
            .digest()
            .or_else(|| reference.tag())
            .unwrap_or("latest");
        self.to_v2_manifest_url_for(reference.registry(), reference.repository(), selector)
    }

    fn to_v2_manifest_url_for(&self, registry: &str, repository: &str, selector: &str) -> String {
        format!(
            "{}://{}/v2/{}/manifests/{}",
            self.config.protocol.scheme_for(registry),
            registry,
            repository,
            selector,
        )
    }

    /// Convert a Reference to a v2 blob URL.
    fn to_v2_blob_url(&self, registry: &str, repository: &str, digest: &str) -> String {
        format!(
            "{}://{}/v2/{}/blobs/{}",
            self.config.protocol.scheme_for(registry),
            registry,
            repository,
            digest,
        )
    }

    /// Convert a Reference to a v2 tag list URL.
    fn to_v2_tags_url(&self, reference: &ImageRef) -> String {
        format!(
            "{}://{}/v2/{}/tags/list",
            self.config.protocol.scheme_for(reference.registry()),
            reference.registry(),
            reference.repository(),
        )
    }
}

/// The request builder wrapper allows to be instantiated from a
/// `Client` and allows composable operations on the request builder,
/// to produce a `RequestBuilder` object that can be executed.
struct RequestBuilderWrapper<'a> {
    client: &'a Client,
    request_builder: RequestBuilder,
}

impl<'a> RequestBuilderWrapper<'a> {
    /// Create a `RequestBuilderWrapper` from a `Client` instance, by
    /// instantiating the internal `RequestBuilder` with the provided
    /// function `f`.
    fn from_client(
        client: &'a Client,
        f: impl Fn(&reqwest::Client) -> RequestBuilder,
    ) -> RequestBuilderWrapper<'a> {
        let request_builder = f(&client.client);
        RequestBuilderWrapper {
            client,
            request_builder,
        }
    }

    // Produces a final `RequestBuilder` out of this `RequestBuilderWrapper`
    fn into_request_builder(self) -> RequestBuilder {
        self.request_builder
    }

    fn apply_accept(&self, accept: &[&str]) -> anyhow::Result<RequestBuilderWrapper> {
        let request_builder = self
            .request_builder
            .try_clone()
            .ok_or_else(|| anyhow!("could not clone request builder"))?
            .header("Accept", Vec::from(accept).join(", "));

        Ok(RequestBuilderWrapper {
            client: self.client,
            request_builder,
        })
    }

    /// Updates the request with the token cached for `image`, if any.
    ///
    /// A cached bearer token becomes an Authorization header; cached basic
    /// credentials are applied as HTTP Basic Auth. With no cached token the
    /// request is sent anonymously.
    fn apply_auth(&self, image: &ImageRef) -> anyhow::Result<RequestBuilderWrapper> {
        let mut headers = HeaderMap::new();

        let tokens = self
            .client
            .tokens
            .read()
            .map_err(|_| anyhow!("token cache lock poisoned"))?;
        if let Some(token) = tokens.get(image) {
            match token {
                RegistryTokenType::Bearer(token) => {
                    debug!("Using bearer token authentication.");
                    headers.insert("Authorization", token.bearer_token().parse().unwrap());
                }
                RegistryTokenType::Basic(username, password) => {
                    debug!("Using HTTP basic authentication.");
                    return Ok(RequestBuilderWrapper {
                        client: self.client,
                        request_builder: self
                            .request_builder
                            .try_clone()
                            .ok_or_else(|| anyhow!("could not clone request builder"))?
                            .headers(headers)
                            .basic_auth(username.to_string(), Some(password.to_string())),
                    });
                }
            }
        }
        Ok(RequestBuilderWrapper {
            client: self.client,
            request_builder: self
                .request_builder
                .try_clone()
                .ok_or_else(|| anyhow!("could not clone request builder"))?
                .headers(headers),
        })
    }
}

#[derive(Clone)]
struct BearerChallenge {
    pub realm: Option<String>,
    pub service: Option<String>,
    pub scope: Option<String>,
}

impl Challenge for BearerChallenge {
    fn challenge_name() -> &'static str {
        "Bearer"
    }

    fn from_raw(raw: RawChallenge) -> Option<Self> {
        match raw {
            RawChallenge::Token68(_) => None,
            RawChallenge::Fields(mut map) => Some(BearerChallenge {
                realm: map.remove("realm"),
                scope: map.remove("scope"),
                service: map.remove("service"),
            }),
        }
    }

    fn into_raw(self) -> RawChallenge {
        let mut map = ChallengeFields::new();
        if let Some(realm) = self.realm {
            map.insert_static_quoting("realm", realm);
        }
        if let Some(scope) = self.scope {
            map.insert_static_quoting("scope", scope);
        }
        if let Some(service) = self.service {
            map.insert_static_quoting("service", service);
        }
        RawChallenge::Fields(map)
    }
}

/// Extract `Docker-Content-Digest` header from manifest GET or HEAD request.
/// Can optionally supply a response body (i.e. the manifest itself) to
/// fallback to manually hashing this content. This should only be done if the
/// response body contains the image manifest.
fn digest_header_value(headers: HeaderMap, body: Option<&str>) -> anyhow::Result<String> {
    let digest_header = headers.get("Docker-Content-Digest");
    match digest_header {
        None => {
            if let Some(body) = body {
                // Fallback to hashing payload (tested with ECR)
                let digest = sha2::Sha256::digest(body.as_bytes());
                let hex = format!("sha256:{:x}", digest);
                debug!(%hex, "Computed digest of manifest payload.");
                Ok(hex)
            } else {
                Err(anyhow!("registry did not return a digest header"))
            }
        }
        Some(hv) => hv
            .to_str()
            .map(|s| s.to_string())
            .map_err(anyhow::Error::new),
    }
}

/// A client configuration
#[derive(Debug, Clone, Default)]
pub struct ClientConfig {
    /// Which protocol the client should use
    pub protocol: ClientProtocol,

    /// Accept invalid certificates. Defaults to false
    pub accept_invalid_certificates: bool,
}

/// The protocol that the client should use to connect
#[derive(Debug, Clone, PartialEq)]
pub enum ClientProtocol {
    #[allow(missing_docs)]
    Http,
    #[allow(missing_docs)]
    Https,
    #[allow(missing_docs)]
    HttpsExcept(Vec<String>),
}

impl Default for ClientProtocol {
    fn default() -> Self {
        ClientProtocol::Https
    }
}

impl ClientProtocol {
    fn scheme_for(&self, registry: &str) -> &str {
        match self {
            ClientProtocol::Https => "https",
            ClientProtocol::Http => "http",
            ClientProtocol::HttpsExcept(exceptions) => {
                if exceptions.contains(&registry.to_owned()) {
                    "http"
                } else {
                    "https"
                }
            }
        }
    }
}
