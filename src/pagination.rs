//! Cursor- and offset-based pagination over an already-filtered, `_id`-sorted
//! document set (§6's pagination contract).

use crate::core::error::{Error, Result};
use crate::core::types::{doc_id_of, Document};
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine as _;
use serde::{Deserialize, Serialize};

const DEFAULT_LIMIT: i64 = 50;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Cursor {
    pub id: String,
    pub timestamp: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sort_key: Option<String>,
}

impl Cursor {
    pub fn for_id(id: &str) -> Self {
        Cursor {
            id: id.to_string(),
            timestamp: chrono::Utc::now().timestamp_millis(),
            sort_key: None,
        }
    }

    /// Base64url (no padding) of the cursor's JSON form.
    pub fn encode(&self) -> String {
        let json = serde_json::to_vec(self).expect("cursor always serializes");
        URL_SAFE_NO_PAD.encode(json)
    }

    /// Cursors are opaque from the client's point of view; anything that
    /// isn't valid base64url-encoded JSON of this shape is `InvalidArgument`,
    /// not a server error. The timestamp is recorded but never consulted —
    /// ordering is entirely by id (§9).
    pub fn decode(encoded: &str) -> Result<Self> {
        let bytes = URL_SAFE_NO_PAD
            .decode(encoded)
            .map_err(|e| Error::invalid_argument(format!("malformed cursor: {e}")))?;
        serde_json::from_slice(&bytes)
            .map_err(|e| Error::invalid_argument(format!("malformed cursor payload: {e}")))
    }
}

#[derive(Debug, Clone, Default)]
pub struct PaginationOptions {
    pub after: Option<String>,
    pub before: Option<String>,
    pub limit: Option<i64>,
    pub offset: Option<i64>,
    pub max_limit: Option<usize>,
}

#[derive(Debug, Clone)]
pub struct PaginationResult {
    pub documents: Vec<Document>,
    pub has_next: bool,
    pub has_prev: bool,
    pub next_cursor: Option<String>,
    pub prev_cursor: Option<String>,
    pub total: Option<usize>,
}

fn id_of(doc: &Document) -> String {
    doc_id_of(doc).map(|id| id.to_string()).unwrap_or_default()
}

fn resolve_limit(opts: &PaginationOptions) -> Result<usize> {
    let limit = opts.limit.unwrap_or(DEFAULT_LIMIT);
    if limit < 0 {
        return Err(Error::invalid_argument("limit must not be negative"));
    }
    let limit = if limit == 0 { DEFAULT_LIMIT } else { limit } as usize;
    if let Some(max) = opts.max_limit {
        if limit > max {
            return Err(Error::invalid_argument(format!(
                "limit {limit} exceeds max_limit {max}"
            )));
        }
    }
    Ok(limit)
}

fn validate(opts: &PaginationOptions) -> Result<()> {
    let has_cursor = opts.after.is_some() || opts.before.is_some();
    let has_nonzero_offset = opts.offset.map(|o| o != 0).unwrap_or(false);
    if has_cursor && has_nonzero_offset {
        return Err(Error::invalid_argument(
            "cannot mix a pagination cursor with a non-zero offset",
        ));
    }
    if let Some(offset) = opts.offset {
        if offset < 0 {
            return Err(Error::invalid_argument("offset must not be negative"));
        }
    }
    Ok(())
}

/// Documents must already be filtered; this function sorts by `_id`
/// ascending (lexicographic on string form, per §4.7) and slices out one
/// page.
pub fn paginate(mut documents: Vec<Document>, opts: &PaginationOptions) -> Result<PaginationResult> {
    validate(opts)?;
    let limit = resolve_limit(opts)?;
    documents.sort_by(|a, b| id_of(a).cmp(&id_of(b)));

    if opts.after.is_some() || opts.before.is_some() {
        paginate_by_cursor(documents, opts, limit)
    } else {
        paginate_by_offset(documents, opts, limit)
    }
}

fn paginate_by_offset(
    documents: Vec<Document>,
    opts: &PaginationOptions,
    limit: usize,
) -> Result<PaginationResult> {
    let total = documents.len();
    let offset = opts.offset.unwrap_or(0).max(0) as usize;

    let page: Vec<Document> = documents.into_iter().skip(offset).take(limit).collect();
    if page.is_empty() {
        return Ok(PaginationResult {
            documents: page,
            has_next: false,
            has_prev: false,
            next_cursor: None,
            prev_cursor: None,
            total: Some(total),
        });
    }

    let has_prev = offset > 0;
    let has_next = offset + page.len() < total;
    Ok(PaginationResult {
        documents: page,
        has_next,
        has_prev,
        next_cursor: None,
        prev_cursor: None,
        total: Some(total),
    })
}

fn paginate_by_cursor(
    documents: Vec<Document>,
    opts: &PaginationOptions,
    limit: usize,
) -> Result<PaginationResult> {
    let after_id = opts
        .after
        .as_ref()
        .map(|c| Cursor::decode(c))
        .transpose()?
        .map(|c| c.id);
    let before_id = opts
        .before
        .as_ref()
        .map(|c| Cursor::decode(c))
        .transpose()?
        .map(|c| c.id);

    let windowed: Vec<Document> = documents
        .iter()
        .filter(|d| {
            let id = id_of(d);
            after_id.as_ref().map_or(true, |a| id > *a) && before_id.as_ref().map_or(true, |b| id < *b)
        })
        .cloned()
        .collect();

    // A `before` cursor with no `after` paginates backward: the page is the
    // tail of the windowed set, immediately preceding the cursor.
    let page: Vec<Document> = if before_id.is_some() && after_id.is_none() {
        let start = windowed.len().saturating_sub(limit);
        windowed[start..].to_vec()
    } else {
        windowed.into_iter().take(limit).collect()
    };

    if page.is_empty() {
        return Ok(PaginationResult {
            documents: page,
            has_next: false,
            has_prev: false,
            next_cursor: None,
            prev_cursor: None,
            total: None,
        });
    }

    let first_overall = documents.first().map(id_of);
    let last_overall = documents.last().map(id_of);
    let first_page = id_of(&page[0]);
    let last_page = id_of(page.last().unwrap());

    let has_prev = first_overall.as_deref() != Some(first_page.as_str());
    let has_next = last_overall.as_deref() != Some(last_page.as_str());

    Ok(PaginationResult {
        next_cursor: has_next.then(|| Cursor::for_id(&last_page).encode()),
        prev_cursor: has_prev.then(|| Cursor::for_id(&first_page).encode()),
        documents: page,
        has_next,
        has_prev,
        total: None,
    })
}
