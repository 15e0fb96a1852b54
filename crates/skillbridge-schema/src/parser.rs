//! Schema resolution with `$ref` expansion and composition flattening.
//!
//! Resolution happens in two phases. First every document reachable through
//! `$ref` is fetched (async). Then the schema tree is expanded against that
//! document set without further I/O.
//!
//! Composition rules:
//! - `allOf`: branches are deep-merged; `required` lists are unioned and
//!   later scalars overwrite earlier ones
//! - `anyOf` / `oneOf`: only the first alternative is used
//! - `$id` does not change the resolution base

use dashmap::DashMap;
use reqwest::Url;
use serde_json::{Map, Value};
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::error::{SchemaError, SchemaResult};
use crate::fetch::{DefaultFetcher, SchemaFetcher};
use crate::structure::SchemaStructure;

/// Resolves and caches schemas by reference string.
pub struct SchemaParser {
    fetcher: Arc<dyn SchemaFetcher>,
    /// Raw documents keyed by URL without fragment
    documents: DashMap<String, Arc<Value>>,
    resolved: DashMap<String, Arc<Value>>,
    structures: DashMap<String, Arc<SchemaStructure>>,
}

impl SchemaParser {
    /// Create a parser with the default file/HTTP fetcher.
    pub fn new(fetch_timeout: Duration) -> Self {
        Self::with_fetcher(Arc::new(DefaultFetcher::new(fetch_timeout)))
    }

    /// Create a parser with a custom fetcher.
    pub fn with_fetcher(fetcher: Arc<dyn SchemaFetcher>) -> Self {
        Self {
            fetcher,
            documents: DashMap::new(),
            resolved: DashMap::new(),
            structures: DashMap::new(),
        }
    }

    /// Resolve a schema reference into a self-contained schema.
    pub async fn parse(&self, reference: &str) -> SchemaResult<Arc<Value>> {
        if let Some(cached) = self.resolved.get(reference) {
            return Ok(cached.clone());
        }

        let url = reference_url(reference)?;
        let docs = self.load_closure(&url).await?;
        let resolver = Resolver { docs: &docs };
        let root = resolver.lookup(&url)?;
        let mut stack = vec![url.to_string()];
        let resolved = Arc::new(resolver.resolve(root, &document_url(&url), &mut stack)?);

        self.resolved
            .insert(reference.to_string(), resolved.clone());
        info!("Resolved schema {} ({} documents)", reference, docs.len());
        Ok(resolved)
    }

    /// Extract the flat structure of a schema reference.
    pub async fn extract_structure(&self, reference: &str) -> SchemaResult<Arc<SchemaStructure>> {
        if let Some(cached) = self.structures.get(reference) {
            return Ok(cached.clone());
        }

        let schema = self.parse(reference).await?;
        let structure = Arc::new(SchemaStructure::from_schema(&schema));
        self.structures
            .insert(reference.to_string(), structure.clone());
        Ok(structure)
    }

    /// Number of cached resolved schemas.
    pub fn cached_count(&self) -> usize {
        self.resolved.len()
    }

    /// Fetch the root document and every document it transitively references.
    async fn load_closure(&self, root: &Url) -> SchemaResult<HashMap<String, Arc<Value>>> {
        let mut docs = HashMap::new();
        let mut queue = VecDeque::from([document_url(root)]);
        let mut seen = HashSet::new();

        while let Some(url) = queue.pop_front() {
            let key = url.to_string();
            if !seen.insert(key.clone()) {
                continue;
            }

            let doc = self.load_document(&url).await?;
            let mut refs = Vec::new();
            collect_refs(&doc, &mut refs);
            for r in refs {
                match url.join(&r) {
                    Ok(target) => {
                        let target = document_url(&target);
                        if !seen.contains(target.as_str()) {
                            queue.push_back(target);
                        }
                    }
                    Err(_) => warn!("Ignoring unresolvable $ref '{}' in {}", r, url),
                }
            }
            docs.insert(key, doc);
        }

        Ok(docs)
    }

    async fn load_document(&self, url: &Url) -> SchemaResult<Arc<Value>> {
        let key = url.to_string();
        if let Some(doc) = self.documents.get(&key) {
            return Ok(doc.clone());
        }

        debug!("Fetching schema document {}", key);
        let bytes = self.fetcher.fetch(url).await?;
        let doc: Value = serde_json::from_slice(&bytes).map_err(|e| SchemaError::Parse {
            url: key.clone(),
            message: e.to_string(),
        })?;
        let doc = Arc::new(doc);
        self.documents.insert(key, doc.clone());
        Ok(doc)
    }
}

/// Turn a reference string (URL or filesystem path) into a URL.
pub fn reference_url(reference: &str) -> SchemaResult<Url> {
    let trimmed = reference.trim();
    if trimmed.is_empty() {
        return Err(SchemaError::InvalidReference(reference.to_string()));
    }

    // Single-letter schemes are Windows drive letters, not URLs
    if let Ok(url) = Url::parse(trimmed) {
        if url.scheme().len() > 1 {
            return Ok(url);
        }
    }

    let path = std::path::Path::new(trimmed);
    let absolute = if path.is_absolute() {
        path.to_path_buf()
    } else {
        std::env::current_dir()
            .map_err(|_| SchemaError::InvalidReference(reference.to_string()))?
            .join(path)
    };
    Url::from_file_path(&absolute).map_err(|_| SchemaError::InvalidReference(reference.to_string()))
}

fn document_url(url: &Url) -> Url {
    let mut doc = url.clone();
    doc.set_fragment(None);
    doc
}

fn collect_refs(node: &Value, out: &mut Vec<String>) {
    match node {
        Value::Object(map) => {
            if let Some(Value::String(r)) = map.get("$ref") {
                out.push(r.clone());
            }
            for v in map.values() {
                collect_refs(v, out);
            }
        }
        Value::Array(items) => items.iter().for_each(|v| collect_refs(v, out)),
        _ => {}
    }
}

/// Synchronous expansion over a pre-fetched document set.
struct Resolver<'a> {
    docs: &'a HashMap<String, Arc<Value>>,
}

impl<'a> Resolver<'a> {
    /// Find the node a (possibly fragment-carrying) URL points at.
    fn lookup(&self, url: &Url) -> SchemaResult<&'a Value> {
        let doc = self
            .docs
            .get(document_url(url).as_str())
            .ok_or_else(|| SchemaError::PointerNotFound(url.to_string()))?;

        match url.fragment() {
            None | Some("") => Ok(doc.as_ref()),
            Some(fragment) => {
                let pointer = urlencoding::decode(fragment)
                    .map_err(|_| SchemaError::PointerNotFound(url.to_string()))?;
                doc.pointer(&pointer)
                    .ok_or_else(|| SchemaError::PointerNotFound(url.to_string()))
            }
        }
    }

    fn resolve(&self, node: &Value, base: &Url, stack: &mut Vec<String>) -> SchemaResult<Value> {
        let Value::Object(map) = node else {
            return Ok(node.clone());
        };
        let mut map = map.clone();

        if let Some(Value::String(reference)) = map.remove("$ref") {
            let target_url = base
                .join(&reference)
                .map_err(|_| SchemaError::InvalidReference(reference.clone()))?;
            let key = target_url.to_string();

            let target = if stack.contains(&key) {
                warn!("Recursive schema reference {} left unexpanded", key);
                Value::Object(Map::new())
            } else {
                let node = self.lookup(&target_url)?;
                stack.push(key);
                let resolved = self.resolve(node, &document_url(&target_url), stack);
                stack.pop();
                resolved?
            };

            if map.is_empty() {
                return Ok(target);
            }
            let siblings = self.resolve(&Value::Object(map), base, stack)?;
            return Ok(merge_schemas(target, siblings));
        }

        if let Some(Value::Array(branches)) = map.remove("allOf") {
            let mut merged = self.resolve(&Value::Object(map), base, stack)?;
            for branch in &branches {
                let branch = self.resolve(branch, base, stack)?;
                merged = merge_schemas(merged, branch);
            }
            return Ok(merged);
        }

        for keyword in ["anyOf", "oneOf"] {
            if let Some(Value::Array(alternatives)) = map.remove(keyword) {
                if alternatives.len() > 1 {
                    debug!(
                        "{} with {} alternatives: using the first",
                        keyword,
                        alternatives.len()
                    );
                }
                let own = self.resolve(&Value::Object(map), base, stack)?;
                return match alternatives.first() {
                    Some(first) => {
                        let first = self.resolve(first, base, stack)?;
                        Ok(merge_schemas(own, first))
                    }
                    None => Ok(own),
                };
            }
        }

        if let Some(Value::Object(properties)) = map.get_mut("properties") {
            for prop in properties.values_mut() {
                *prop = self.resolve(prop, base, stack)?;
            }
        }
        if let Some(items) = map.get_mut("items") {
            let expanded = match &*items {
                Value::Array(list) => Value::Array(
                    list.iter()
                        .map(|i| self.resolve(i, base, stack))
                        .collect::<SchemaResult<_>>()?,
                ),
                other => self.resolve(other, base, stack)?,
            };
            *items = expanded;
        }
        if let Some(Value::Array(list)) = map.get_mut("prefixItems") {
            for item in list.iter_mut() {
                *item = self.resolve(item, base, stack)?;
            }
        }
        if let Some(additional) = map.get_mut("additionalProperties") {
            if additional.is_object() {
                *additional = self.resolve(additional, base, stack)?;
            }
        }

        Ok(Value::Object(map))
    }
}

/// Deep-merge `overlay` into `base`. Objects merge recursively, `required`
/// arrays are unioned, everything else is overwritten by the overlay.
pub(crate) fn merge_schemas(base: Value, overlay: Value) -> Value {
    match (base, overlay) {
        (Value::Object(mut base), Value::Object(overlay)) => {
            for (key, value) in overlay {
                let merged = match (key.as_str(), base.remove(&key), value) {
                    ("required", Some(Value::Array(mut existing)), Value::Array(extra)) => {
                        for item in extra {
                            if !existing.contains(&item) {
                                existing.push(item);
                            }
                        }
                        Value::Array(existing)
                    }
                    (_, Some(existing @ Value::Object(_)), value @ Value::Object(_)) => {
                        merge_schemas(existing, value)
                    }
                    (_, _, value) => value,
                };
                base.insert(key, merged);
            }
            Value::Object(base)
        }
        (_, overlay) => overlay,
    }
}
