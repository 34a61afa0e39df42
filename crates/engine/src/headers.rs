//! Per-invocation header resolution.
//!
//! Precedence per header name: an explicit header-binding argument always
//! wins when non-null; otherwise the nearest-scope rule supplies the value
//! (method beats interface). Resolution is single-pass — a computed resolver
//! runs at most once per call.

use restbind_types::{ClientError, HeaderMap, ProcessingError};
use tracing::debug;

use crate::args::{Args, value_to_string, value_to_strings};
use crate::declare::BindingKind;
use crate::descriptor::{HeaderRule, MethodDescriptor, ResolvedHeaderSource};

/// Compute the final header set for one invocation.
pub fn resolve(
    interface_rules: &[HeaderRule],
    method: &MethodDescriptor,
    args: &Args,
) -> Result<HeaderMap, ClientError> {
    // Nearest scope wins: seed with interface rules, let method rules shadow
    // by case-insensitive name.
    let mut effective: Vec<&HeaderRule> = Vec::new();
    for rule in interface_rules.iter().chain(method.header_rules.iter()) {
        if let Some(existing) = effective.iter_mut().find(|r| r.name.eq_ignore_ascii_case(&rule.name)) {
            *existing = rule;
        } else {
            effective.push(rule);
        }
    }

    let mut headers = HeaderMap::new();
    for rule in effective {
        // An explicit header-binding argument for this name suppresses the
        // rule entirely; the binding is applied below.
        let bound_explicitly = method
            .params
            .iter()
            .any(|param| param.kind == BindingKind::Header && param.target.eq_ignore_ascii_case(&rule.name) && args.has(&param.name));
        if bound_explicitly {
            continue;
        }

        match &rule.source {
            ResolvedHeaderSource::Literal(values) => {
                for value in values {
                    headers.append(rule.name.clone(), value.clone());
                }
            }
            ResolvedHeaderSource::Computed { name, resolver } => match resolver.invoke(&rule.name) {
                Ok(value) => headers.append(rule.name.clone(), value),
                Err(error) if rule.required => {
                    return Err(ProcessingError::HeaderResolution {
                        header: rule.name.clone(),
                        message: error.to_string(),
                    }
                    .into());
                }
                Err(error) => {
                    debug!(
                        header = %rule.name,
                        resolver = %name,
                        error = %error,
                        "optional header resolver failed; header omitted"
                    );
                }
            },
        }
    }

    // Explicit header-binding arguments.
    for param in method.params.iter().filter(|param| param.kind == BindingKind::Header) {
        if let Some(value) = args.get(&param.name).filter(|value| !value.is_null()) {
            let values = value_to_strings(value);
            headers.remove(&param.target);
            for value in values {
                headers.append(param.target.clone(), value);
            }
        }
    }

    // Cookie-binding arguments collapse into a single Cookie header.
    let cookies: Vec<String> = method
        .params
        .iter()
        .filter(|param| param.kind == BindingKind::Cookie)
        .filter_map(|param| {
            args.get(&param.name)
                .filter(|value| !value.is_null())
                .map(|value| format!("{}={}", param.target, value_to_string(value)))
        })
        .collect();
    if !cookies.is_empty() {
        headers.append("Cookie", cookies.join("; "));
    }

    Ok(headers)
}
