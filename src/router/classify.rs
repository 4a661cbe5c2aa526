// Request classification (spec.md §4.F/§6): turns a method + path into the
// operation kind the Router dispatches on. Shares the collection/document
// path split with `pathaddr::classify_path` but exposes it at the
// crate-path granularity the Router needs (create vs delete vs document
// op vs read).

use axum::http::Method;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OperationKind {
    /// `POST /collections` — dispatched to both instances independently
    /// to establish a complete mapping (spec.md §4.F).
    CollectionCreate,
    /// `DELETE /collections/{name}` — removes a mapping once both
    /// instances have run it.
    CollectionDelete,
    /// Any other collection-scoped call (list, get-by-name, etc).
    CollectionRead,
    /// A call scoped to a document inside a collection; only this kind
    /// is subject to per-instance identifier rewriting.
    DocumentOp,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mutation {
    Read,
    Write,
}

/// Document ops that don't mutate state even when sent as `POST`
/// (spec.md §4.F: "Read = GET or query-shaped POST"; §4.D lists
/// add/update/upsert/delete as the WAL-worthy ones, leaving get/query as
/// the read-shaped remainder).
fn is_query_shaped_op(op: &str) -> bool {
    matches!(op.trim_matches('/'), "get" | "query")
}

fn read_or_write(method: &Method) -> Mutation {
    if matches!(*method, Method::GET | Method::HEAD) { Mutation::Read } else { Mutation::Write }
}

pub fn classify(method: &Method, path: &str) -> (OperationKind, Mutation) {
    let trimmed = path.trim_end_matches('/');

    // `POST /collections` (no name segment) is the documented create
    // endpoint (spec.md §6); the collection name travels in the body.
    if trimmed == "/collections" {
        return match *method {
            Method::POST => (OperationKind::CollectionCreate, Mutation::Write),
            _ => (OperationKind::CollectionRead, read_or_write(method)),
        };
    }

    let Some(after) = trimmed.strip_prefix("/collections/") else {
        return (OperationKind::CollectionRead, read_or_write(method));
    };

    match after.find('/') {
        None => {
            let kind = match *method {
                Method::DELETE => OperationKind::CollectionDelete,
                _ => OperationKind::CollectionRead,
            };
            (kind, read_or_write(method))
        }
        Some(idx) => {
            let op = &after[idx + 1..];
            let mutation = if matches!(*method, Method::GET | Method::HEAD) || is_query_shaped_op(op) {
                Mutation::Read
            } else {
                Mutation::Write
            };
            (OperationKind::DocumentOp, mutation)
        }
    }
}

/// Extracts the collection name from a `/collections/{name}[...]` path.
pub fn collection_name(path: &str) -> Option<&str> {
    let after = path.strip_prefix("/collections/")?;
    Some(match after.find('/') {
        Some(idx) => &after[..idx],
        None => after.trim_end_matches('/'),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn create_is_bare_collections_post() {
        let (kind, m) = classify(&Method::POST, "/collections");
        assert_eq!(kind, OperationKind::CollectionCreate);
        assert_eq!(m, Mutation::Write);
    }

    #[test]
    fn named_collection_post_is_not_create() {
        // Only bare `/collections` is the documented create endpoint; a
        // name-scoped POST falls through to a plain collection call.
        let (kind, _) = classify(&Method::POST, "/collections/docs");
        assert_eq!(kind, OperationKind::CollectionRead);
    }

    #[test]
    fn delete_is_collection_delete() {
        let (kind, m) = classify(&Method::DELETE, "/collections/docs");
        assert_eq!(kind, OperationKind::CollectionDelete);
        assert_eq!(m, Mutation::Write);
    }

    #[test]
    fn get_document_is_read_and_document_op() {
        let (kind, m) = classify(&Method::GET, "/collections/docs/documents/42");
        assert_eq!(kind, OperationKind::DocumentOp);
        assert_eq!(m, Mutation::Read);
    }

    #[test]
    fn post_query_is_read_and_document_op() {
        let (kind, m) = classify(&Method::POST, "/collections/docs/query");
        assert_eq!(kind, OperationKind::DocumentOp);
        assert_eq!(m, Mutation::Read);
    }

    #[test]
    fn post_get_is_read_and_document_op() {
        let (kind, m) = classify(&Method::POST, "/collections/docs/get");
        assert_eq!(kind, OperationKind::DocumentOp);
        assert_eq!(m, Mutation::Read);
    }

    #[test]
    fn post_upsert_is_write_and_document_op() {
        let (kind, m) = classify(&Method::POST, "/collections/docs/upsert");
        assert_eq!(kind, OperationKind::DocumentOp);
        assert_eq!(m, Mutation::Write);
    }

    #[test]
    fn collection_name_strips_segments() {
        assert_eq!(collection_name("/collections/docs/documents/42"), Some("docs"));
        assert_eq!(collection_name("/collections/docs"), Some("docs"));
    }
}
