// Shared path addressing rules (spec.md §4.C/§4.D identifier rewrite
// scope): collection-scoped paths address a collection by its stable
// name on every instance; document-scoped paths need the name segment
// swapped for the addressed instance's local collection identifier.
// Used by both the Router (routing a live request) and the WAL Engine
// (replaying a recorded one), so the rule can't drift between them.

use crate::common::InstanceRole;
use crate::error::Result;
use crate::mapping::MappingRegistry;

pub enum PathKind {
    Collection,
    Document { name: String, rest: String },
}

/// `/collections/{name}` and `/collections/{name}/` are collection
/// operations; anything with a further segment (`/documents`, ids, etc)
/// is a document operation scoped to that collection.
pub fn classify_path(path: &str) -> PathKind {
    let Some(after) = path.strip_prefix("/collections/") else {
        return PathKind::Collection;
    };
    match after.trim_end_matches('/').find('/') {
        None => PathKind::Collection,
        Some(idx) => {
            let name = after[..idx].to_string();
            let rest = after[idx..].to_string();
            PathKind::Document { name, rest }
        }
    }
}

/// Extracts the collection name addressed by any `/collections/...` path.
pub fn collection_name(path: &str) -> Option<&str> {
    let after = path.strip_prefix("/collections/")?;
    Some(match after.find('/') {
        Some(idx) => &after[..idx],
        None => after.trim_end_matches('/'),
    })
}

/// Rewrites `path` for `instance`: a no-op for collection-scoped paths,
/// a name -> per-instance-id substitution for document-scoped ones.
pub async fn rewrite_for_instance(
    mapping: &MappingRegistry,
    path: &str,
    instance: InstanceRole,
) -> Result<String> {
    match classify_path(path) {
        PathKind::Collection => Ok(path.to_string()),
        PathKind::Document { name, rest } => {
            let id = mapping.resolve(&name, instance).await?;
            Ok(format!("/collections/{id}{rest}"))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn collection_path_not_rewritten_shape() {
        assert!(matches!(classify_path("/collections/docs"), PathKind::Collection));
        assert!(matches!(classify_path("/collections/docs/"), PathKind::Collection));
    }

    #[test]
    fn document_path_carries_name_and_rest() {
        match classify_path("/collections/docs/documents/42") {
            PathKind::Document { name, rest } => {
                assert_eq!(name, "docs");
                assert_eq!(rest, "/documents/42");
            }
            PathKind::Collection => panic!("expected document path"),
        }
    }
}
