// SPDX-License-Identifier: Apache-2.0

//! Concrete circuit artifacts and their provenance.

use std::borrow::Cow;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use hdlcross_mutate::MutationRecord;
use serde::{Deserialize, Serialize};

use crate::repr::RepresentationKind;

static NEXT_ARTIFACT_ID: AtomicU64 = AtomicU64::new(1);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ArtifactId(pub u64);

impl ArtifactId {
    fn fresh() -> Self {
        ArtifactId(NEXT_ARTIFACT_ID.fetch_add(1, Ordering::Relaxed))
    }
}

impl fmt::Display for ArtifactId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "a{}", self.0)
    }
}

/// Where the bytes of an artifact live.
#[derive(Debug, Clone)]
pub enum Payload {
    /// A file owned by a unit scratch directory (or a persisted result dir).
    File(PathBuf),
    Text(Arc<str>),
}

impl Payload {
    pub fn text(&self) -> std::io::Result<Cow<'_, str>> {
        match self {
            Payload::File(path) => Ok(Cow::Owned(std::fs::read_to_string(path)?)),
            Payload::Text(text) => Ok(Cow::Borrowed(text)),
        }
    }

    pub fn bytes(&self) -> std::io::Result<Vec<u8>> {
        match self {
            Payload::File(path) => std::fs::read(path),
            Payload::Text(text) => Ok(text.as_bytes().to_vec()),
        }
    }

    /// Returns a path holding the payload, writing in-memory text to
    /// `dir/file_name` when needed.
    pub fn materialize(&self, dir: &Path, file_name: &str) -> std::io::Result<PathBuf> {
        match self {
            Payload::File(path) => Ok(path.clone()),
            Payload::Text(text) => {
                let path = dir.join(file_name);
                std::fs::write(&path, text.as_bytes())?;
                Ok(path)
            }
        }
    }
}

/// How an artifact came to be.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Provenance {
    pub parent: Option<ArtifactId>,
    pub translator: Option<String>,
    pub profile: Option<String>,
    /// Mutations applied to the original input, oldest first. Only roots of
    /// mutated variants carry records; translated artifacts inherit them.
    pub mutations: Vec<MutationRecord>,
}

/// One immutable value flowing through a compilation path.
#[derive(Debug, Clone)]
pub struct CircuitArtifact {
    id: ArtifactId,
    kind: RepresentationKind,
    payload: Payload,
    provenance: Provenance,
    top: Option<String>,
    root_digest: String,
}

impl CircuitArtifact {
    /// Creates the root artifact of an artifact tree from source text.
    pub fn root(kind: RepresentationKind, text: &str, top: Option<String>) -> Self {
        CircuitArtifact {
            id: ArtifactId::fresh(),
            kind,
            payload: Payload::Text(Arc::from(text)),
            provenance: Provenance::default(),
            top,
            root_digest: digest_bytes(text.as_bytes()),
        }
    }

    /// Creates a new root for a mutated variant of `original`.
    pub fn mutant(original: &CircuitArtifact, text: &str, record: MutationRecord) -> Self {
        let mut mutations = original.provenance.mutations.clone();
        mutations.push(record);
        CircuitArtifact {
            id: ArtifactId::fresh(),
            kind: original.kind.clone(),
            payload: Payload::Text(Arc::from(text)),
            provenance: Provenance {
                parent: None,
                translator: None,
                profile: None,
                mutations,
            },
            top: original.top.clone(),
            root_digest: digest_bytes(text.as_bytes()),
        }
    }

    /// Creates the child of `parent` produced by a translator.
    pub fn derived(
        parent: &CircuitArtifact,
        kind: RepresentationKind,
        payload: Payload,
        translator: &str,
        profile: &str,
    ) -> Self {
        CircuitArtifact {
            id: ArtifactId::fresh(),
            kind,
            payload,
            provenance: Provenance {
                parent: Some(parent.id),
                translator: Some(translator.to_string()),
                profile: Some(profile.to_string()),
                mutations: parent.provenance.mutations.clone(),
            },
            top: parent.top.clone(),
            root_digest: parent.root_digest.clone(),
        }
    }

    pub fn id(&self) -> ArtifactId {
        self.id
    }

    pub fn kind(&self) -> &RepresentationKind {
        &self.kind
    }

    pub fn payload(&self) -> &Payload {
        &self.payload
    }

    pub fn provenance(&self) -> &Provenance {
        &self.provenance
    }

    pub fn top(&self) -> Option<&str> {
        self.top.as_deref()
    }

    /// Digest of the source text at the root of this artifact's tree.
    pub fn root_digest(&self) -> &str {
        &self.root_digest
    }

    pub fn text(&self) -> std::io::Result<Cow<'_, str>> {
        self.payload.text()
    }

    pub fn is_root(&self) -> bool {
        self.provenance.parent.is_none()
    }
}

pub fn digest_bytes(bytes: &[u8]) -> String {
    blake3::hash(bytes).to_hex().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::repr::Language;

    #[test]
    fn test_derived_artifact_tracks_parent() {
        let root = CircuitArtifact::root(
            RepresentationKind::source(Language::Verilog),
            "module m; endmodule\n",
            Some("m".to_string()),
        );
        assert!(root.is_root());
        let child = CircuitArtifact::derived(
            &root,
            RepresentationKind::produced(Language::Netlist, "yosys"),
            Payload::Text(Arc::from("module m; endmodule\n")),
            "yosys",
            "default",
        );
        assert_eq!(child.provenance().parent, Some(root.id()));
        assert_eq!(child.provenance().translator.as_deref(), Some("yosys"));
        assert_eq!(child.root_digest(), root.root_digest());
        assert_eq!(child.top(), Some("m"));
        assert_ne!(child.id(), root.id());
    }

    #[test]
    fn test_materialize_writes_text_payloads() {
        let dir = tempfile::tempdir().unwrap();
        let payload = Payload::Text(Arc::from("hello"));
        let path = payload.materialize(dir.path(), "x.txt").unwrap();
        assert_eq!(std::fs::read_to_string(path).unwrap(), "hello");
    }
}
