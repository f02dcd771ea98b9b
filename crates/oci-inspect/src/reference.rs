use std::convert::TryFrom;
use std::error::Error;
use std::fmt;
use std::str::FromStr;

/// The registry assumed when the first path component of a reference does not
/// look like a host (contains neither `.` nor `:`).
pub const DEFAULT_REGISTRY: &str = "docker.io";

/// A transport scheme marker some tools prefix references with. It is
/// stripped before parsing.
const TRANSPORT_PREFIX: &str = "docker://";

const DIGEST_PREFIX: &str = "sha256:";
const DIGEST_HEX_LENGTH: usize = 64;

/// The ways parsing an image reference string can fail.
#[derive(Debug, PartialEq, Eq)]
pub enum ParseError {
    /// The input was empty (after stripping any transport prefix).
    Empty,
    /// The input contains no `/`, so there is no repository component.
    MissingRepository,
    /// The reference carries neither a tag nor a digest. Such a reference is
    /// ambiguous and rejected rather than defaulted.
    MissingTag,
    /// A digest-form reference whose digest is not `sha256:` followed by 64
    /// hex characters.
    DigestInvalidFormat,
}

impl fmt::Display for ParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ParseError::Empty => write!(f, "image reference is empty"),
            ParseError::MissingRepository => {
                write!(f, "image reference has no repository component")
            }
            ParseError::MissingTag => {
                write!(f, "image reference has neither a tag nor a digest")
            }
            ParseError::DigestInvalidFormat => write!(
                f,
                "digest must be {}<{} hex characters>",
                DIGEST_PREFIX, DIGEST_HEX_LENGTH
            ),
        }
    }
}

impl Error for ParseError {}

/// A parsed container image reference.
///
/// A reference names a registry, a repository and exactly one of a tag or a
/// digest. Digest-form references are canonical and immutable; tag-form
/// references are mutable and must be resolved to a digest before an image
/// can be treated as a stable unit of analysis. Values are never mutated
/// after construction; conversions produce new values.
///
/// # Examples
///
/// ```
/// use oci_inspect::ImageRef;
///
/// let image: ImageRef = "quay.io/bpfman/bpfman-operator:latest".parse().unwrap();
///
/// assert_eq!("quay.io", image.registry());
/// assert_eq!("bpfman/bpfman-operator", image.repository());
/// assert_eq!(Some("latest"), image.tag());
/// assert_eq!(None, image.digest());
/// ```
#[derive(Clone, Hash, PartialEq, Eq)]
pub struct ImageRef {
    registry: String,
    repository: String,
    tag: Option<String>,
    digest: Option<String>,
}

impl ImageRef {
    /// Builds a reference directly from parts. No validation is applied; use
    /// the `FromStr`/`TryFrom` implementations for untrusted input.
    pub fn from_parts(
        registry: &str,
        repository: &str,
        tag: Option<&str>,
        digest: Option<&str>,
    ) -> Self {
        ImageRef {
            registry: registry.to_owned(),
            repository: repository.to_owned(),
            tag: tag.map(str::to_owned),
            digest: digest.map(str::to_owned),
        }
    }

    /// The registry host (possibly with a port).
    pub fn registry(&self) -> &str {
        &self.registry
    }

    /// The repository path within the registry.
    pub fn repository(&self) -> &str {
        &self.repository
    }

    /// The tag, if this is a tag-form reference.
    pub fn tag(&self) -> Option<&str> {
        self.tag.as_deref()
    }

    /// The digest, if this is a digest-form reference.
    pub fn digest(&self) -> Option<&str> {
        self.digest.as_deref()
    }

    /// Whether this reference pins its content by digest.
    pub fn is_pinned(&self) -> bool {
        self.digest.is_some()
    }

    /// Returns a new reference to the same repository pinned to `digest`,
    /// dropping any tag.
    pub fn with_digest(&self, digest: &str) -> ImageRef {
        ImageRef {
            registry: self.registry.clone(),
            repository: self.repository.clone(),
            tag: None,
            digest: Some(digest.to_owned()),
        }
    }

    /// The whole reference in its string form.
    pub fn whole(&self) -> String {
        if let Some(d) = self.digest() {
            format!("{}/{}@{}", self.registry, self.repository, d)
        } else if let Some(t) = self.tag() {
            format!("{}/{}:{}", self.registry, self.repository, t)
        } else {
            format!("{}/{}", self.registry, self.repository)
        }
    }
}

impl fmt::Debug for ImageRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.whole())
    }
}

impl fmt::Display for ImageRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.whole())
    }
}

impl serde::Serialize for ImageRef {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.whole())
    }
}

impl FromStr for ImageRef {
    type Err = ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        ImageRef::try_from(s)
    }
}

impl TryFrom<&str> for ImageRef {
    type Error = ParseError;

    fn try_from(s: &str) -> Result<Self, Self::Error> {
        let s = s.trim();
        let s = s.strip_prefix(TRANSPORT_PREFIX).unwrap_or(s);
        if s.is_empty() {
            return Err(ParseError::Empty);
        }

        let slash = s.find('/').ok_or(ParseError::MissingRepository)?;
        // The first path component is a registry host only when it contains
        // a dot (FQDN) or a colon (host:port); otherwise the whole string is
        // a repository path on the default registry.
        let first = &s[..slash];
        let (registry, rest) = if first.contains('.') || first.contains(':') {
            (first.to_owned(), &s[slash + 1..])
        } else {
            (DEFAULT_REGISTRY.to_owned(), s)
        };
        if rest.is_empty() {
            return Err(ParseError::MissingRepository);
        }

        // A digest delimiter takes priority over any trailing tag colon.
        if let Some(at) = rest.find('@') {
            let digest = &rest[at + 1..];
            let hex = digest
                .strip_prefix(DIGEST_PREFIX)
                .ok_or(ParseError::DigestInvalidFormat)?;
            if hex.len() != DIGEST_HEX_LENGTH || !hex.bytes().all(|b| b.is_ascii_hexdigit()) {
                return Err(ParseError::DigestInvalidFormat);
            }
            return Ok(ImageRef {
                registry,
                repository: rest[..at].to_owned(),
                tag: None,
                digest: Some(digest.to_owned()),
            });
        }

        // A tag colon must come after the last path separator, so that a
        // port in a path component is never mistaken for a tag.
        match rest.rfind(':') {
            Some(colon) if colon > rest.rfind('/').unwrap_or(0) && colon + 1 < rest.len() => {
                Ok(ImageRef {
                    registry,
                    repository: rest[..colon].to_owned(),
                    tag: Some(rest[colon + 1..].to_owned()),
                    digest: None,
                })
            }
            _ => Err(ParseError::MissingTag),
        }
    }
}

impl TryFrom<String> for ImageRef {
    type Error = ParseError;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        ImageRef::try_from(s.as_str())
    }
}

#[cfg(test)]
mod test {
    use super::*;

    const DIGEST: &str = "sha256:f29dba55022eec8c0ce1cbfaaed45f2352ab3fbbb1cdcd5ea30ca3513deb70c9";

    fn must_parse(image: &str) -> ImageRef {
        ImageRef::try_from(image).expect("could not parse reference")
    }

    mod parse {
        use super::*;

        #[test]
        fn tag_form() {
            let image = must_parse("quay.io/bpfman/bpfman-agent:v0.5.4");
            assert_eq!(image.registry(), "quay.io");
            assert_eq!(image.repository(), "bpfman/bpfman-agent");
            assert_eq!(image.tag(), Some("v0.5.4"));
            assert_eq!(image.digest(), None);
            assert!(!image.is_pinned());
        }

        #[test]
        fn digest_form() {
            let image = must_parse(&format!("registry.redhat.io/bpfman/bpfman@{}", DIGEST));
            assert_eq!(image.registry(), "registry.redhat.io");
            assert_eq!(image.repository(), "bpfman/bpfman");
            assert_eq!(image.tag(), None);
            assert_eq!(image.digest(), Some(DIGEST));
            assert!(image.is_pinned());
        }

        #[test]
        fn digest_wins_over_tag_colon() {
            // The digest itself contains a colon; it must not be split as a tag.
            let image = must_parse(&format!("quay.io/ns/bundle@{}", DIGEST));
            assert_eq!(image.repository(), "ns/bundle");
            assert_eq!(image.digest(), Some(DIGEST));
        }

        #[test]
        fn transport_prefix_is_stripped() {
            let image = must_parse("docker://quay.io/bpfman/bpfman:latest");
            assert_eq!(image.registry(), "quay.io");
            assert_eq!(image.tag(), Some("latest"));
        }

        #[test]
        fn default_registry_when_first_component_is_not_a_host() {
            let image = must_parse("bpfman/bpfman-operator:latest");
            assert_eq!(image.registry(), DEFAULT_REGISTRY);
            assert_eq!(image.repository(), "bpfman/bpfman-operator");
        }

        #[test]
        fn registry_with_port() {
            let image = must_parse("localhost:5000/bpfman/bpfman:dev");
            assert_eq!(image.registry(), "localhost:5000");
            assert_eq!(image.repository(), "bpfman/bpfman");
            assert_eq!(image.tag(), Some("dev"));
        }

        #[test]
        fn empty_reference() {
            assert_eq!(ImageRef::try_from(""), Err(ParseError::Empty));
            assert_eq!(ImageRef::try_from("docker://"), Err(ParseError::Empty));
        }

        #[test]
        fn missing_slash() {
            assert_eq!(ImageRef::try_from("badref"), Err(ParseError::MissingRepository));
        }

        #[test]
        fn missing_tag_and_digest() {
            assert_eq!(
                ImageRef::try_from("quay.io/bpfman/bpfman"),
                Err(ParseError::MissingTag)
            );
            // A trailing colon with no tag text is just as ambiguous.
            assert_eq!(
                ImageRef::try_from("quay.io/bpfman/bpfman:"),
                Err(ParseError::MissingTag)
            );
        }

        #[test]
        fn invalid_digests() {
            assert_eq!(
                ImageRef::try_from("quay.io/ns/repo@"),
                Err(ParseError::DigestInvalidFormat)
            );
            assert_eq!(
                ImageRef::try_from("quay.io/ns/repo@sha256:"),
                Err(ParseError::DigestInvalidFormat)
            );
            assert_eq!(
                ImageRef::try_from("quay.io/ns/repo@sha256:abc123"),
                Err(ParseError::DigestInvalidFormat)
            );
            assert_eq!(
                ImageRef::try_from(format!("quay.io/ns/repo@md5:{}", &DIGEST[7..])),
                Err(ParseError::DigestInvalidFormat)
            );
        }
    }

    mod serialise {
        use super::*;

        #[test]
        fn digest_round_trip_is_idempotent() {
            let original = format!("registry.redhat.io/bpfman/bpfman-operator-bundle@{}", DIGEST);
            let image = must_parse(&original);
            assert_eq!(image.whole(), original);
            assert_eq!(must_parse(&image.whole()), image);
        }

        #[test]
        fn tag_round_trip_is_idempotent() {
            let original = "quay.io/bpfman/bpfman-agent:v0.5.4";
            assert_eq!(must_parse(original).whole(), original);
        }

        #[test]
        fn serialises_as_a_string() {
            let image = must_parse("quay.io/bpfman/bpfman:latest");
            assert_eq!(
                serde_json::to_string(&image).unwrap(),
                "\"quay.io/bpfman/bpfman:latest\""
            );
        }

        #[test]
        fn with_digest_drops_the_tag() {
            let pinned = must_parse("quay.io/bpfman/bpfman:latest").with_digest(DIGEST);
            assert_eq!(pinned.tag(), None);
            assert_eq!(pinned.digest(), Some(DIGEST));
            assert_eq!(pinned.whole(), format!("quay.io/bpfman/bpfman@{}", DIGEST));
        }
    }
}
