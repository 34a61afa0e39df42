//! Target URI construction: path-template substitution and query rendering.
//!
//! Path placeholder values are percent-encoded preserving RFC3986 unreserved
//! bytes. Query rendering supports three styles for multi-valued parameters:
//! repeated pairs (default), one comma-joined value, and bracketed repeated
//! pairs.

use indexmap::IndexMap;
use percent_encoding::{AsciiSet, NON_ALPHANUMERIC, utf8_percent_encode};
use restbind_types::{ArgumentError, ClientError, QueryStyle};
use url::Url;

/// Everything except RFC3986 unreserved bytes gets percent-encoded.
const COMPONENT: &AsciiSet = &NON_ALPHANUMERIC.remove(b'-').remove(b'.').remove(b'_').remove(b'~');

fn encode_component(value: &str) -> String {
    utf8_percent_encode(value, COMPONENT).to_string()
}

/// Substitute `{variable}` placeholders with percent-encoded values.
pub fn substitute_path(template: &str, variables: &IndexMap<String, String>) -> String {
    let mut path = template.to_string();
    for (name, value) in variables {
        path = path.replace(&format!("{{{name}}}"), &encode_component(value));
    }
    path
}

/// Join base-URI path, interface base path, and method path fragment.
pub fn join_paths(base: &str, interface_path: &str, method_path: &str) -> String {
    let mut joined = String::new();
    for segment in [base, interface_path, method_path] {
        let trimmed = segment.trim_matches('/');
        if trimmed.is_empty() {
            continue;
        }
        joined.push('/');
        joined.push_str(trimmed);
    }
    if joined.is_empty() {
        joined.push('/');
    }
    joined
}

/// Render query pairs under the configured style; `None` when empty.
pub fn render_query(pairs: &[(String, Vec<String>)], style: QueryStyle) -> Option<String> {
    if pairs.iter().all(|(_, values)| values.is_empty()) {
        return None;
    }
    let mut rendered: Vec<String> = Vec::new();
    for (name, values) in pairs {
        if values.is_empty() {
            continue;
        }
        let key = encode_component(name);
        match style {
            QueryStyle::Repeated => {
                for value in values {
                    rendered.push(format!("{key}={}", encode_component(value)));
                }
            }
            QueryStyle::CommaJoined => {
                let joined: Vec<String> = values.iter().map(|value| encode_component(value)).collect();
                rendered.push(format!("{key}={}", joined.join(",")));
            }
            QueryStyle::BracketedRepeated => {
                for value in values {
                    rendered.push(format!("{key}[]={}", encode_component(value)));
                }
            }
        }
    }
    Some(rendered.join("&"))
}

/// Build the final target URI for one invocation.
pub fn build_target(
    base_uri: &Url,
    interface_path: &str,
    method_path: &str,
    path_variables: &IndexMap<String, String>,
    query_pairs: &[(String, Vec<String>)],
    style: QueryStyle,
) -> Result<Url, ClientError> {
    let substituted = substitute_path(&join_paths(base_uri.path(), interface_path, method_path), path_variables);
    let mut target = base_uri.clone();
    target.set_path(&substituted);
    target.set_query(render_query(query_pairs, style).as_deref());
    Ok(target)
}

/// Resolve a redirect `Location` against the URI that produced it.
pub fn resolve_location(current: &Url, location: &str) -> Result<Url, ClientError> {
    current.join(location).map_err(|error| {
        ClientError::Argument(ArgumentError::MalformedBaseUri {
            uri: location.to_string(),
            reason: error.to_string(),
        })
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn base() -> Url {
        Url::parse("https://api.example.com").unwrap()
    }

    fn vars(entries: &[(&str, &str)]) -> IndexMap<String, String> {
        entries.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect()
    }

    #[test]
    fn substitution_preserves_unreserved_bytes() {
        let path = substitute_path("/v1/services/{service_id}", &vars(&[("service_id", "srv-d5f6a7b8")]));
        assert_eq!(path, "/v1/services/srv-d5f6a7b8");
    }

    #[test]
    fn substitution_encodes_reserved_bytes() {
        let path = substitute_path("/v1/projects/{project}", &vars(&[("project", "team/app name")]));
        assert_eq!(path, "/v1/projects/team%2Fapp%20name");
    }

    #[test]
    fn join_paths_normalizes_slashes() {
        assert_eq!(join_paths("/", "/api/", "items"), "/api/items");
        assert_eq!(join_paths("/v2", "", "/items/"), "/v2/items");
        assert_eq!(join_paths("", "", ""), "/");
    }

    #[test]
    fn repeated_style_emits_one_pair_per_value() {
        let pairs = vec![("p".to_string(), vec!["foo".into(), "bar".into(), "baz".into()])];
        assert_eq!(render_query(&pairs, QueryStyle::Repeated).as_deref(), Some("p=foo&p=bar&p=baz"));
    }

    #[test]
    fn comma_joined_style_emits_one_pair() {
        let pairs = vec![("p".to_string(), vec!["foo".into(), "bar".into(), "baz".into()])];
        assert_eq!(render_query(&pairs, QueryStyle::CommaJoined).as_deref(), Some("p=foo,bar,baz"));
    }

    #[test]
    fn bracketed_style_suffixes_each_key() {
        let pairs = vec![("p".to_string(), vec!["foo".into(), "bar".into(), "baz".into()])];
        assert_eq!(
            render_query(&pairs, QueryStyle::BracketedRepeated).as_deref(),
            Some("p[]=foo&p[]=bar&p[]=baz")
        );
    }

    #[test]
    fn build_target_combines_path_variables_and_query() {
        let target = build_target(
            &base(),
            "/v1",
            "/apps/{app}/dynos",
            &vars(&[("app", "my app")]),
            &[("state".to_string(), vec!["up".into()])],
            QueryStyle::Repeated,
        )
        .unwrap();
        assert_eq!(target.as_str(), "https://api.example.com/v1/apps/my%20app/dynos?state=up");
    }

    #[test]
    fn empty_query_leaves_uri_without_question_mark() {
        let target = build_target(&base(), "", "/ping", &IndexMap::new(), &[], QueryStyle::Repeated).unwrap();
        assert_eq!(target.as_str(), "https://api.example.com/ping");
    }

    #[test]
    fn location_resolution_handles_relative_and_absolute_targets() {
        let current = Url::parse("https://api.example.com/v1/items").unwrap();
        assert_eq!(
            resolve_location(&current, "/v2/items").unwrap().as_str(),
            "https://api.example.com/v2/items"
        );
        assert_eq!(
            resolve_location(&current, "https://other.example.com/x").unwrap().as_str(),
            "https://other.example.com/x"
        );
    }
}
