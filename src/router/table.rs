use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::Arc;

use serde::Serialize;
use thiserror::Error;

use super::descriptor::{join_url, EndpointDescriptor};
use super::endpoint::Method;
use super::error::RegistryError;
use super::resource::ResourceGroup;
use crate::security::{Permission, ScopeCatalog};

#[derive(Debug, Clone, PartialEq, Eq)]
enum Segment {
    Literal(String),
    Param(String),
    /// `{name:.*}`: swallows the remainder of the URL
    Rest(String),
}

impl Segment {
    fn parse(step: &str) -> Self {
        if let Some(name) = step.strip_prefix(':') {
            return Segment::Param(name.to_string());
        }
        if step.len() >= 2 && step.starts_with('{') && step.ends_with('}') {
            let inner = &step[1..step.len() - 1];
            return match inner.split_once(':') {
                Some((name, ".*")) => Segment::Rest(name.to_string()),
                Some((name, _)) => Segment::Param(name.to_string()),
                None => Segment::Param(inner.to_string()),
            };
        }
        Segment::Literal(step.to_string())
    }
}

fn parse_pattern(url: &str) -> Vec<Segment> {
    url.split('/').skip(1).map(Segment::parse).collect()
}

/// Pattern shape with placeholder names erased; two routes with the same
/// shape cannot be told apart by a request URL
fn shape_of(segments: &[Segment]) -> String {
    segments
        .iter()
        .map(|s| match s {
            Segment::Literal(l) => l.as_str(),
            Segment::Param(_) => "{}",
            Segment::Rest(_) => "{*}",
        })
        .collect::<Vec<_>>()
        .join("/")
}

/// One dispatchable (method, URL pattern) pair
#[derive(Debug)]
pub struct RouteEntry {
    pub url: String,
    pub descriptor: Arc<EndpointDescriptor>,
    segments: Vec<Segment>,
}

impl RouteEntry {
    fn new(url: String, descriptor: Arc<EndpointDescriptor>) -> Self {
        let segments = parse_pattern(&url);
        Self {
            url,
            descriptor,
            segments,
        }
    }

    /// `None` means every method: proxies are not restricted
    fn method(&self) -> Option<Method> {
        if self.descriptor.proxy {
            None
        } else {
            Some(self.descriptor.method)
        }
    }

    fn accepts(&self, method: &axum::http::Method) -> bool {
        match self.method() {
            None => true,
            Some(m) => Method::from_http(method) == Some(m),
        }
    }

    fn label(&self) -> String {
        format!("{}:{}", self.descriptor.group, self.descriptor.action)
    }

    /// Raw (still percent-encoded) captures when the path fits the pattern
    fn match_path(&self, path: &[&str]) -> Option<Vec<(String, String)>> {
        let mut captures = Vec::new();
        for (idx, segment) in self.segments.iter().enumerate() {
            match segment {
                Segment::Rest(name) => {
                    if idx >= path.len() {
                        return None;
                    }
                    captures.push((name.clone(), path[idx..].join("/")));
                    return Some(captures);
                }
                Segment::Literal(literal) => {
                    if path.get(idx) != Some(&literal.as_str()) {
                        return None;
                    }
                }
                Segment::Param(name) => match path.get(idx) {
                    Some(value) if !value.is_empty() => captures.push((name.clone(), value.to_string())),
                    _ => return None,
                },
            }
        }
        if path.len() == self.segments.len() {
            Some(captures)
        } else {
            None
        }
    }

    /// Ranked position by position, left to right: a literal outranks a
    /// placeholder, a placeholder outranks a catch-all. Two patterns with
    /// equal ranks have the same shape, which the builder refuses.
    fn specificity(&self) -> Vec<u8> {
        self.segments
            .iter()
            .map(|s| match s {
                Segment::Literal(_) => 2,
                Segment::Param(_) => 1,
                Segment::Rest(_) => 0,
            })
            .collect()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ResolveError {
    #[error("No route matches {0}")]
    NotFound(String),

    #[error("Method {method} not allowed on {url}")]
    MethodNotAllowed { method: String, url: String },
}

/// Result of a successful lookup
#[derive(Debug, Clone)]
pub struct ResolvedRoute {
    pub entry: Arc<RouteEntry>,
    pub captures: Vec<(String, String)>,
}

impl ResolvedRoute {
    pub fn descriptor(&self) -> &EndpointDescriptor {
        &self.entry.descriptor
    }
}

/// Human-oriented view of a route, used by the CLI and the docs endpoint
#[derive(Debug, Clone, Serialize)]
pub struct RouteSummary {
    pub method: String,
    pub url: String,
    pub handler: String,
    pub scope: Option<String>,
    pub permissions: Vec<Permission>,
    pub secure: bool,
    pub status: u16,
}

/// Immutable dispatch table, safe to share between request tasks
#[derive(Debug)]
pub struct RouteTable {
    url_prefix: String,
    entries: Vec<Arc<RouteEntry>>,
    parent_urls: BTreeSet<String>,
    endpoint_map: BTreeMap<String, Vec<Arc<EndpointDescriptor>>>,
}

impl RouteTable {
    pub fn builder(catalog: ScopeCatalog) -> RouteTableBuilder {
        RouteTableBuilder::new(catalog)
    }

    pub fn url_prefix(&self) -> &str {
        &self.url_prefix
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn entries(&self) -> impl Iterator<Item = &Arc<RouteEntry>> {
        self.entries.iter()
    }

    /// Mount prefix plus the first segment of every endpoint URL
    pub fn parent_urls(&self) -> &BTreeSet<String> {
        &self.parent_urls
    }

    /// Descriptors grouped by their URL template
    pub fn endpoint_map(&self) -> &BTreeMap<String, Vec<Arc<EndpointDescriptor>>> {
        &self.endpoint_map
    }

    /// Exact lookup by method and URL template, as registered
    pub fn get(&self, method: Method, url: &str) -> Option<&Arc<RouteEntry>> {
        self.entries
            .iter()
            .find(|e| e.url == url && e.descriptor.method == method)
    }

    /// Find the entry serving a concrete request path
    pub fn resolve(&self, method: &axum::http::Method, path: &str) -> Result<ResolvedRoute, ResolveError> {
        if !path.starts_with('/') {
            return Err(ResolveError::NotFound(path.to_string()));
        }
        let segments: Vec<&str> = path.split('/').skip(1).collect();

        let mut path_matched = false;
        let mut best: Option<(Vec<u8>, &Arc<RouteEntry>, Vec<(String, String)>)> = None;

        for entry in &self.entries {
            let Some(captures) = entry.match_path(&segments) else {
                continue;
            };
            path_matched = true;
            if !entry.accepts(method) {
                continue;
            }
            let score = entry.specificity();
            if best.as_ref().map_or(true, |(s, _, _)| score > *s) {
                best = Some((score, entry, captures));
            }
        }

        match best {
            Some((_, entry, captures)) => Ok(ResolvedRoute {
                entry: entry.clone(),
                captures,
            }),
            None if path_matched => Err(ResolveError::MethodNotAllowed {
                method: method.to_string(),
                url: path.to_string(),
            }),
            None => Err(ResolveError::NotFound(path.to_string())),
        }
    }

    pub fn summaries(&self) -> Vec<RouteSummary> {
        self.entries
            .iter()
            .map(|e| RouteSummary {
                method: match e.method() {
                    Some(m) => m.to_string(),
                    None => "*".to_string(),
                },
                url: e.url.clone(),
                handler: e.label(),
                scope: e.descriptor.scope.as_ref().map(|s| s.to_string()),
                permissions: e.descriptor.permissions.clone(),
                secure: e.descriptor.secure,
                status: e.descriptor.status,
            })
            .collect()
    }
}

/// Collects descriptors from resource groups, then freezes them into a
/// [`RouteTable`]. Any configuration error aborts the whole build.
pub struct RouteTableBuilder {
    url_prefix: String,
    catalog: ScopeCatalog,
    secure_by_default: bool,
    descriptors: Vec<EndpointDescriptor>,
}

impl RouteTableBuilder {
    pub fn new(catalog: ScopeCatalog) -> Self {
        Self {
            url_prefix: String::new(),
            catalog,
            secure_by_default: true,
            descriptors: Vec::new(),
        }
    }

    pub fn url_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.url_prefix = prefix.into();
        self
    }

    pub fn secure_by_default(mut self, secure: bool) -> Self {
        self.secure_by_default = secure;
        self
    }

    pub fn catalog(&self) -> &ScopeCatalog {
        &self.catalog
    }

    /// Derive and stage every endpoint of a group
    pub fn register(&mut self, group: &ResourceGroup) -> Result<&mut Self, RegistryError> {
        let descriptors = group.descriptors(&self.catalog, self.secure_by_default)?;
        self.descriptors.extend(descriptors);
        Ok(self)
    }

    pub fn build(self) -> Result<RouteTable, RegistryError> {
        let mut descriptors = self.descriptors;
        // Deterministic order for reproducible tables and logs; lookup does not depend on it
        descriptors.sort_by(|a, b| {
            (a.url.as_str(), a.method, a.action.as_str()).cmp(&(b.url.as_str(), b.method, b.action.as_str()))
        });

        let base = if self.url_prefix == "/" {
            ""
        } else {
            self.url_prefix.trim_end_matches('/')
        };

        let mut entries: Vec<Arc<RouteEntry>> = Vec::new();
        let mut shapes: HashMap<String, Vec<usize>> = HashMap::new();
        let mut parent_urls = BTreeSet::new();
        let mut endpoint_map: BTreeMap<String, Vec<Arc<EndpointDescriptor>>> = BTreeMap::new();

        for descriptor in descriptors {
            let descriptor = Arc::new(descriptor);
            let endpoint_url = if descriptor.url == "/" && !base.is_empty() {
                ""
            } else {
                descriptor.url.as_str()
            };
            let url = join_url(base, endpoint_url);

            let relative = endpoint_url.trim_start_matches('/');
            let parent = match relative.split_once('/') {
                Some((first, _)) => format!("{}/{}", base, first),
                None => url.clone(),
            };
            parent_urls.insert(parent);

            tracing::debug!(
                "Mapped [{}] to {}:{} restricted to {}",
                url,
                descriptor.group,
                descriptor.action,
                if descriptor.proxy { "*" } else { descriptor.method.as_str() }
            );

            let mut urls = vec![url.clone()];
            let ends_with_catch_all = url.ends_with(".*}");
            if !url.ends_with('/') && !ends_with_catch_all {
                urls.push(format!("{}/", url));
            }

            for url in urls {
                let entry = RouteEntry::new(url, descriptor.clone());
                let shape = shape_of(&entry.segments);
                let same_shape = shapes.entry(shape).or_default();
                if let Some(&other) = same_shape.iter().find(|&&idx| {
                    let existing: &RouteEntry = &entries[idx];
                    match (existing.method(), entry.method()) {
                        (Some(a), Some(b)) => a == b,
                        _ => true,
                    }
                }) {
                    let existing = &entries[other];
                    tracing::error!(
                        "Route collision on {} {}: {} and {}",
                        entry.descriptor.method,
                        entry.url,
                        existing.label(),
                        entry.label()
                    );
                    return Err(RegistryError::RouteCollision {
                        method: entry.descriptor.method.to_string(),
                        url: entry.url.clone(),
                        first: existing.label(),
                        second: entry.label(),
                    });
                }
                same_shape.push(entries.len());
                entries.push(Arc::new(entry));
            }

            endpoint_map
                .entry(descriptor.url.clone())
                .or_default()
                .push(descriptor.clone());
        }

        entries.sort_by(|a, b| {
            (a.url.as_str(), a.descriptor.method, a.descriptor.action.as_str()).cmp(&(
                b.url.as_str(),
                b.descriptor.method,
                b.descriptor.action.as_str(),
            ))
        });

        tracing::debug!("list of parent paths: {:?}", parent_urls);
        tracing::info!("Route table built with {} routes", entries.len());

        Ok(RouteTable {
            url_prefix: base.to_string(),
            entries,
            parent_urls,
            endpoint_map,
        })
    }
}
