//! Reading cache inputs from HTTP requests.

use std::net::IpAddr;

use http::header::{CACHE_CONTROL, PRAGMA};
use http::{HeaderMap, Request};
use serde_json::{Map, Value};
use trigcache::CallArgs;

/// Route path with named segments, e.g. `/trigs/{trig_id}/logs`.
///
/// Named segments become handler arguments and can feed the resource id of
/// the cache key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PathTemplate {
    segments: Vec<Segment>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Segment {
    Literal(String),
    Param(String),
}

impl PathTemplate {
    /// Parses a template. `{name}` marks a named segment.
    pub fn new(template: &str) -> Self {
        let segments = split(template)
            .map(|segment| {
                match segment
                    .strip_prefix('{')
                    .and_then(|s| s.strip_suffix('}'))
                {
                    Some(name) => Segment::Param(name.to_owned()),
                    None => Segment::Literal(segment.to_owned()),
                }
            })
            .collect();
        Self { segments }
    }

    /// Named segments of `path`, or `None` if it doesn't match.
    pub fn matches<'p>(&self, path: &'p str) -> Option<Vec<(&str, &'p str)>> {
        let parts: Vec<&str> = split(path).collect();
        if parts.len() != self.segments.len() {
            return None;
        }
        let mut params = Vec::new();
        for (segment, part) in self.segments.iter().zip(parts) {
            match segment {
                Segment::Literal(literal) if literal == part => {}
                Segment::Literal(_) => return None,
                Segment::Param(name) => params.push((name.as_str(), part)),
            }
        }
        Some(params)
    }
}

fn split(path: &str) -> impl Iterator<Item = &str> {
    path.split('/').filter(|s| !s.is_empty())
}

/// Whether the request asks for fresh data: `Cache-Control: no-cache` or
/// `no-store`, or `Pragma: no-cache`.
pub fn wants_fresh(headers: &HeaderMap) -> bool {
    let directive = |name, wanted: &[&str]| {
        headers
            .get_all(name)
            .iter()
            .filter_map(|value| value.to_str().ok())
            .flat_map(|value| value.split(','))
            .map(|d| d.trim())
            .any(|d| wanted.iter().any(|w| d.eq_ignore_ascii_case(w)))
    };
    directive(CACHE_CONTROL, &["no-cache", "no-store"]) || directive(PRAGMA, &["no-cache"])
}

/// Handler arguments of `request`: named path segments and query
/// parameters. Path segments win over query parameters of the same name.
///
/// A query parameter given more than once becomes an array of its values
/// in query order.
///
/// `None` if `template` is given and the path doesn't match it.
pub fn call_args<B>(request: &Request<B>, template: Option<&PathTemplate>) -> Option<CallArgs> {
    let mut args = CallArgs::new();
    if let Some(query) = request.uri().query() {
        match serde_urlencoded::from_str::<Vec<(String, String)>>(query) {
            Ok(pairs) => {
                for (name, value) in group_repeated(pairs) {
                    args.insert(name, value);
                }
            }
            Err(error) => tracing::debug!(%error, "query string ignored for cache key"),
        }
    }
    if let Some(template) = template {
        for (name, value) in template.matches(request.uri().path())? {
            args.insert(name, value);
        }
    }
    Some(args.bypass(wants_fresh(request.headers())))
}

fn group_repeated(pairs: Vec<(String, String)>) -> Map<String, Value> {
    let mut grouped = Map::new();
    for (name, value) in pairs {
        match grouped.get_mut(&name) {
            Some(Value::Array(values)) => values.push(Value::String(value)),
            Some(first) => *first = Value::Array(vec![first.take(), Value::String(value)]),
            None => {
                grouped.insert(name, Value::String(value));
            }
        }
    }
    grouped
}

/// Client address from `X-Forwarded-For` (first hop) or `X-Real-IP`.
pub fn client_address(headers: &HeaderMap) -> Option<IpAddr> {
    let forwarded = headers
        .get("x-forwarded-for")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.split(',').next())
        .and_then(|v| v.trim().parse().ok());
    forwarded.or_else(|| {
        headers
            .get("x-real-ip")
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.trim().parse().ok())
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use http::HeaderValue;
    use serde_json::json;

    #[test]
    fn test_template_matching() {
        let template = PathTemplate::new("/trigs/{trig_id}/logs");
        assert_eq!(
            template.matches("/trigs/42/logs"),
            Some(vec![("trig_id", "42")])
        );
        assert_eq!(template.matches("/trigs/42/photos"), None);
        assert_eq!(template.matches("/trigs/42"), None);
        assert_eq!(template.matches("/trigs/42/logs/"), Some(vec![("trig_id", "42")]));
    }

    #[test]
    fn test_wants_fresh() {
        let mut headers = HeaderMap::new();
        assert!(!wants_fresh(&headers));

        headers.insert(CACHE_CONTROL, HeaderValue::from_static("max-age=0, No-Cache"));
        assert!(wants_fresh(&headers));

        let mut headers = HeaderMap::new();
        headers.insert(CACHE_CONTROL, HeaderValue::from_static("max-age=60"));
        assert!(!wants_fresh(&headers));

        headers.insert(PRAGMA, HeaderValue::from_static("no-cache"));
        assert!(wants_fresh(&headers));
    }

    #[test]
    fn test_call_args() {
        let request = Request::get("/trigs/42?limit=10&skip=0")
            .header(CACHE_CONTROL, "no-cache")
            .body(())
            .unwrap();
        let template = PathTemplate::new("/trigs/{trig_id}");
        let args = call_args(&request, Some(&template)).unwrap();
        assert_eq!(args.get("trig_id"), Some(&json!("42")));
        assert_eq!(args.get("limit"), Some(&json!("10")));
        assert!(args.is_bypass());

        let other = Request::get("/users/1").body(()).unwrap();
        assert!(call_args(&other, Some(&template)).is_none());
    }

    #[test]
    fn test_repeated_query_parameter_keeps_every_value() {
        let both = Request::get("/trigs?county=Kent&county=Essex&limit=5")
            .body(())
            .unwrap();
        let args = call_args(&both, None).unwrap();
        assert_eq!(args.get("county"), Some(&json!(["Kent", "Essex"])));
        assert_eq!(args.get("limit"), Some(&json!("5")));

        let single = Request::get("/trigs?county=Essex").body(()).unwrap();
        let single = call_args(&single, None).unwrap();
        assert_eq!(single.get("county"), Some(&json!("Essex")));

        let namespace = trigcache::Namespace::new("tuk", "dev").unwrap();
        let codec = trigcache::KeyCodec::new(namespace);
        let policy = trigcache::EndpointPolicy::new(trigcache::ResourceType::new("trigs").unwrap());
        assert_ne!(policy.key(&codec, &args), policy.key(&codec, &single));
    }

    #[test]
    fn test_client_address() {
        let mut headers = HeaderMap::new();
        headers.insert("x-real-ip", HeaderValue::from_static("192.0.2.2"));
        assert_eq!(client_address(&headers), "192.0.2.2".parse().ok());

        headers.insert(
            "x-forwarded-for",
            HeaderValue::from_static("203.0.113.5, 10.0.0.1"),
        );
        assert_eq!(client_address(&headers), "203.0.113.5".parse().ok());
    }
}
