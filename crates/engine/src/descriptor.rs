//! Compiled interface descriptors and build-time validation.
//!
//! [`build`] turns a declarative [`InterfaceDef`] into an immutable
//! [`InterfaceDescriptor`]. Validation runs in a fixed order, independent of
//! declaration order, and the first violation fails the whole build — the
//! engine never hands out a partially-built descriptor:
//!
//! 1. every method has exactly one HTTP verb (direct or inherited);
//! 2. path-template variables and bound path parameters match both ways;
//! 3. computed header resolvers are reachable and unambiguous;
//! 4. no duplicate header names within one scope;
//! 5. literal header rules carry at least one value (a rule is literal *or*
//!    computed by construction, never both).
//!
//! Built descriptors are cached per (interface, base URI, configuration
//! fingerprint) so repeated client builds reuse the validated form.

use std::collections::HashMap;
use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::sync::{Arc, Mutex};

use indexmap::IndexMap;
use once_cell::sync::Lazy;
use restbind_types::{DefinitionError, HttpVerb, MediaType, QueryStyle, ReturnShape};
use tracing::debug;
use url::Url;

use crate::declare::{BindingKind, HeaderRuleDef, HeaderSource, InterfaceDef, ParamDef, ResolverFn};
use crate::provider::ProviderRegistration;

/// Scope a header rule was declared in.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum HeaderScope {
    Interface,
    Method,
}

impl HeaderScope {
    fn as_str(&self) -> &'static str {
        match self {
            Self::Interface => "interface",
            Self::Method => "method",
        }
    }
}

/// A header rule with its resolver reference already bound.
#[derive(Clone, Debug)]
pub struct HeaderRule {
    pub name: String,
    pub scope: HeaderScope,
    pub source: ResolvedHeaderSource,
    pub required: bool,
}

#[derive(Clone, Debug)]
pub enum ResolvedHeaderSource {
    Literal(Vec<String>),
    Computed { name: String, resolver: ResolverFn },
}

/// Compiled per-method rule set.
#[derive(Clone, Debug)]
pub struct MethodDescriptor {
    pub name: String,
    pub verb: HttpVerb,
    pub path: String,
    pub produces: Vec<MediaType>,
    pub consumes: Vec<MediaType>,
    pub header_rules: Vec<HeaderRule>,
    /// Interface-level bindings merged ahead of the method's own.
    pub params: Vec<ParamDef>,
    pub return_shape: ReturnShape,
}

/// Fully validated, immutable interface descriptor.
#[derive(Debug)]
pub struct InterfaceDescriptor {
    pub name: String,
    pub base_uri: Url,
    pub base_path: String,
    pub query_style: QueryStyle,
    pub header_rules: Vec<HeaderRule>,
    methods: IndexMap<String, Arc<MethodDescriptor>>,
    /// Providers declared on the interface, merged against builder
    /// registrations when the client handle is assembled.
    pub declared_providers: Vec<ProviderRegistration>,
}

impl InterfaceDescriptor {
    pub fn method(&self, name: &str) -> Option<&Arc<MethodDescriptor>> {
        self.methods.get(name)
    }

    pub fn method_names(&self) -> impl Iterator<Item = &str> {
        self.methods.keys().map(String::as_str)
    }
}

/// Extract `{variable}` names from a path template, in appearance order.
pub fn template_variables(template: &str) -> Vec<String> {
    let mut variables = Vec::new();
    let mut rest = template;
    while let Some(open) = rest.find('{') {
        let Some(close) = rest[open..].find('}') else { break };
        let name = &rest[open + 1..open + close];
        if !name.is_empty() && !variables.iter().any(|existing| existing == name) {
            variables.push(name.to_string());
        }
        rest = &rest[open + close + 1..];
    }
    variables
}

/// Compile and validate an interface description.
pub fn build(
    def: &InterfaceDef,
    base_uri: &Url,
    query_style: QueryStyle,
    external_resolvers: &IndexMap<String, ResolverFn>,
) -> Result<InterfaceDescriptor, DefinitionError> {
    if def.methods.is_empty() {
        return Err(DefinitionError::NoMethods {
            interface: def.name.clone(),
        });
    }

    // 1. Exactly one HTTP verb per method.
    for method in &def.methods {
        match method.verbs.as_slice() {
            [_] => {}
            [] => {
                return Err(DefinitionError::MissingVerb {
                    interface: def.name.clone(),
                    method: method.name.clone(),
                });
            }
            [first, second, ..] => {
                return Err(DefinitionError::ConflictingVerbs {
                    interface: def.name.clone(),
                    method: method.name.clone(),
                    first: first.to_string(),
                    second: second.to_string(),
                });
            }
        }
    }

    // 2. Template variables and bound path parameters match both ways.
    for method in &def.methods {
        let mut variables = template_variables(&def.base_path);
        for variable in template_variables(&method.path) {
            if !variables.contains(&variable) {
                variables.push(variable);
            }
        }
        let bound: Vec<&ParamDef> = def
            .params
            .iter()
            .chain(method.params.iter())
            .filter(|param| param.kind == BindingKind::Path)
            .collect();
        for variable in &variables {
            if !bound.iter().any(|param| &param.target == variable) {
                return Err(DefinitionError::UnboundTemplateVariable {
                    method: method.name.clone(),
                    variable: variable.clone(),
                });
            }
        }
        for param in bound.iter().filter(|param| param.kind == BindingKind::Path) {
            // Interface-level path params must match somewhere; method-level
            // ones must match this method's reachable variables.
            if !variables.contains(&param.target) {
                return Err(DefinitionError::UnmatchedPathParameter {
                    method: method.name.clone(),
                    parameter: param.target.clone(),
                });
            }
        }
    }

    // 3. Computed resolvers are reachable and unambiguous.
    let interface_rules = compile_rules(&def.header_rules, HeaderScope::Interface, def, external_resolvers)?;
    let mut compiled_methods: Vec<(String, Vec<HeaderRule>)> = Vec::with_capacity(def.methods.len());
    for method in &def.methods {
        let rules = compile_rules(&method.header_rules, HeaderScope::Method, def, external_resolvers)?;
        compiled_methods.push((method.name.clone(), rules));
    }

    // 4. No duplicate header names within one scope.
    check_duplicates(&def.header_rules, HeaderScope::Interface)?;
    for method in &def.methods {
        check_duplicates(&method.header_rules, HeaderScope::Method)?;
    }

    // 5. Literal rules must carry at least one value.
    for rule in def.header_rules.iter().chain(def.methods.iter().flat_map(|m| m.header_rules.iter())) {
        if let HeaderSource::Literal(values) = &rule.source
            && values.is_empty()
        {
            return Err(DefinitionError::EmptyHeaderRule { name: rule.name.clone() });
        }
    }

    let mut methods = IndexMap::with_capacity(def.methods.len());
    for (method, (_, header_rules)) in def.methods.iter().zip(compiled_methods) {
        let mut params = def.params.clone();
        params.extend(method.params.iter().cloned());
        methods.insert(
            method.name.clone(),
            Arc::new(MethodDescriptor {
                name: method.name.clone(),
                verb: method.verbs[0],
                path: method.path.clone(),
                produces: method.produces.clone(),
                consumes: method.consumes.clone(),
                header_rules,
                params,
                return_shape: method.return_shape,
            }),
        );
    }

    debug!(
        interface = %def.name,
        base_uri = %base_uri,
        method_count = methods.len(),
        provider_count = def.providers.len(),
        "interface descriptor built"
    );

    Ok(InterfaceDescriptor {
        name: def.name.clone(),
        base_uri: base_uri.clone(),
        base_path: def.base_path.clone(),
        query_style,
        header_rules: interface_rules,
        methods,
        declared_providers: def.providers.clone(),
    })
}

fn compile_rules(
    rules: &[HeaderRuleDef],
    scope: HeaderScope,
    def: &InterfaceDef,
    external_resolvers: &IndexMap<String, ResolverFn>,
) -> Result<Vec<HeaderRule>, DefinitionError> {
    rules
        .iter()
        .map(|rule| {
            let source = match &rule.source {
                HeaderSource::Literal(values) => ResolvedHeaderSource::Literal(values.clone()),
                HeaderSource::Computed { resolver } => {
                    let local = def.resolvers.get(resolver);
                    let external = external_resolvers.get(resolver);
                    let bound = match (local, external) {
                        (Some(_), Some(_)) => {
                            return Err(DefinitionError::AmbiguousResolver {
                                header: rule.name.clone(),
                                resolver: resolver.clone(),
                            });
                        }
                        (Some(found), None) | (None, Some(found)) => found.clone(),
                        (None, None) => {
                            return Err(DefinitionError::UnknownResolver {
                                header: rule.name.clone(),
                                resolver: resolver.clone(),
                            });
                        }
                    };
                    ResolvedHeaderSource::Computed {
                        name: resolver.clone(),
                        resolver: bound,
                    }
                }
            };
            Ok(HeaderRule {
                name: rule.name.clone(),
                scope,
                source,
                required: rule.required,
            })
        })
        .collect()
}

fn check_duplicates(rules: &[HeaderRuleDef], scope: HeaderScope) -> Result<(), DefinitionError> {
    for (index, rule) in rules.iter().enumerate() {
        if rules[..index].iter().any(|earlier| earlier.name.eq_ignore_ascii_case(&rule.name)) {
            return Err(DefinitionError::DuplicateHeaderRule {
                scope: scope.as_str().to_string(),
                name: rule.name.clone(),
            });
        }
    }
    Ok(())
}

/// Structural fingerprint of a definition and the resolver names reachable
/// from it. Two definitions sharing a name but differing in shape, or the
/// same definition built against a different external resolver set, must
/// never share a cache entry. Resolver closures themselves cannot be
/// hashed; their registered names stand in for them.
fn definition_fingerprint(def: &InterfaceDef, external_resolvers: &IndexMap<String, ResolverFn>) -> u64 {
    let mut hasher = DefaultHasher::new();
    def.name.hash(&mut hasher);
    def.base_path.hash(&mut hasher);
    format!("{:?}", def.query_style).hash(&mut hasher);
    for rule in &def.header_rules {
        hash_rule(rule, &mut hasher);
    }
    for param in &def.params {
        hash_param(param, &mut hasher);
    }
    for name in def.resolvers.keys() {
        name.hash(&mut hasher);
    }
    for registration in &def.providers {
        registration.identity.hash(&mut hasher);
        registration.priority.hash(&mut hasher);
    }
    for method in &def.methods {
        method.name.hash(&mut hasher);
        for verb in &method.verbs {
            verb.as_str().hash(&mut hasher);
        }
        method.path.hash(&mut hasher);
        for media in &method.produces {
            media.as_str().hash(&mut hasher);
        }
        for media in &method.consumes {
            media.as_str().hash(&mut hasher);
        }
        for rule in &method.header_rules {
            hash_rule(rule, &mut hasher);
        }
        for param in &method.params {
            hash_param(param, &mut hasher);
        }
        method.return_shape.as_str().hash(&mut hasher);
    }
    for name in external_resolvers.keys() {
        name.hash(&mut hasher);
    }
    hasher.finish()
}

fn hash_rule(rule: &HeaderRuleDef, hasher: &mut impl Hasher) {
    rule.name.hash(hasher);
    match &rule.source {
        HeaderSource::Literal(values) => {
            0u8.hash(hasher);
            values.hash(hasher);
        }
        HeaderSource::Computed { resolver } => {
            1u8.hash(hasher);
            resolver.hash(hasher);
        }
    }
    rule.required.hash(hasher);
}

fn hash_param(param: &ParamDef, hasher: &mut impl Hasher) {
    param.name.hash(hasher);
    (param.kind as u8).hash(hasher);
    param.target.hash(hasher);
}

/// Cache of built descriptors keyed by interface, base URI, query style,
/// definition shape, and configuration fingerprint.
pub struct DescriptorCache {
    entries: Mutex<HashMap<String, Arc<InterfaceDescriptor>>>,
}

static GLOBAL_CACHE: Lazy<DescriptorCache> = Lazy::new(|| DescriptorCache {
    entries: Mutex::new(HashMap::new()),
});

impl DescriptorCache {
    pub fn global() -> &'static Self {
        &GLOBAL_CACHE
    }

    /// Return the cached descriptor or build and cache it. Build failures are
    /// not cached; a broken definition fails the same way on every attempt.
    pub fn get_or_build(
        &self,
        def: &InterfaceDef,
        base_uri: &Url,
        query_style: QueryStyle,
        external_resolvers: &IndexMap<String, ResolverFn>,
        config_fingerprint: u64,
    ) -> Result<Arc<InterfaceDescriptor>, DefinitionError> {
        let key = format!(
            "{}|{}|{:?}|{:016x}|{:016x}",
            def.name,
            base_uri,
            query_style,
            definition_fingerprint(def, external_resolvers),
            config_fingerprint
        );
        if let Some(descriptor) = self.entries.lock().expect("descriptor cache lock").get(&key) {
            debug!(interface = %def.name, cache_key = %key, "descriptor cache hit");
            return Ok(Arc::clone(descriptor));
        }
        debug!(interface = %def.name, cache_key = %key, "descriptor cache miss");
        let descriptor = Arc::new(build(def, base_uri, query_style, external_resolvers)?);
        self.entries
            .lock()
            .expect("descriptor cache lock")
            .insert(key, Arc::clone(&descriptor));
        Ok(descriptor)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::declare::{MethodDef, ParamDef};
    use restbind_types::HttpVerb;

    fn base_uri() -> Url {
        Url::parse("https://api.example.com").unwrap()
    }

    fn no_externals() -> IndexMap<String, ResolverFn> {
        IndexMap::new()
    }

    #[test]
    fn template_variables_extracts_in_order_without_duplicates() {
        let vars = template_variables("/apps/{app}/dynos/{dyno}/restart/{app}");
        assert_eq!(vars, ["app", "dyno"]);
        assert!(template_variables("/plain/path").is_empty());
    }

    #[test]
    fn build_rejects_method_without_a_verb() {
        let def = InterfaceDef::new("Svc").method(MethodDef::new("orphan").path("/x"));
        let err = build(&def, &base_uri(), QueryStyle::default(), &no_externals()).unwrap_err();
        assert!(matches!(err, DefinitionError::MissingVerb { .. }));
    }

    #[test]
    fn build_rejects_two_verb_rules_on_one_method() {
        let def = InterfaceDef::new("Svc").method(MethodDef::get("both", "/x").verb(HttpVerb::Post));
        let err = build(&def, &base_uri(), QueryStyle::default(), &no_externals()).unwrap_err();
        assert!(matches!(err, DefinitionError::ConflictingVerbs { .. }));
    }

    #[test]
    fn build_rejects_unbound_template_variable() {
        let def = InterfaceDef::new("Svc").method(MethodDef::get("fetch", "/items/{id}"));
        let err = build(&def, &base_uri(), QueryStyle::default(), &no_externals()).unwrap_err();
        assert!(matches!(err, DefinitionError::UnboundTemplateVariable { ref variable, .. } if variable == "id"));
    }

    #[test]
    fn build_rejects_path_parameter_without_template_variable() {
        let def = InterfaceDef::new("Svc").method(MethodDef::get("fetch", "/items").param(ParamDef::path("id")));
        let err = build(&def, &base_uri(), QueryStyle::default(), &no_externals()).unwrap_err();
        assert!(matches!(err, DefinitionError::UnmatchedPathParameter { ref parameter, .. } if parameter == "id"));
    }

    #[test]
    fn interface_level_path_binding_satisfies_method_templates() {
        let def = InterfaceDef::new("Svc")
            .base_path("/tenants/{tenant}")
            .param(ParamDef::path("tenant"))
            .method(MethodDef::get("list", "/items"));
        assert!(build(&def, &base_uri(), QueryStyle::default(), &no_externals()).is_ok());
    }

    #[test]
    fn build_rejects_unknown_resolver_at_build_time_not_invocation_time() {
        let def = InterfaceDef::new("Svc")
            .header(crate::declare::HeaderRuleDef::computed("X-Token", "missing_fn"))
            .method(MethodDef::get("list", "/items"));
        let err = build(&def, &base_uri(), QueryStyle::default(), &no_externals()).unwrap_err();
        assert!(matches!(err, DefinitionError::UnknownResolver { ref resolver, .. } if resolver == "missing_fn"));
    }

    #[test]
    fn build_rejects_resolver_reachable_through_both_registries() {
        let def = InterfaceDef::new("Svc")
            .resolver("token", ResolverFn::nullary(|| Ok("local".into())))
            .header(crate::declare::HeaderRuleDef::computed("X-Token", "token"))
            .method(MethodDef::get("list", "/items"));
        let mut externals = IndexMap::new();
        externals.insert("token".to_string(), ResolverFn::nullary(|| Ok("external".into())));

        let err = build(&def, &base_uri(), QueryStyle::default(), &externals).unwrap_err();
        assert!(matches!(err, DefinitionError::AmbiguousResolver { .. }));
    }

    #[test]
    fn external_resolver_alone_is_reachable() {
        let def = InterfaceDef::new("Svc")
            .header(crate::declare::HeaderRuleDef::computed("X-Token", "token"))
            .method(MethodDef::get("list", "/items"));
        let mut externals = IndexMap::new();
        externals.insert("token".to_string(), ResolverFn::nullary(|| Ok("external".into())));

        assert!(build(&def, &base_uri(), QueryStyle::default(), &externals).is_ok());
    }

    #[test]
    fn build_rejects_same_scope_duplicate_header_rules() {
        let def = InterfaceDef::new("Svc")
            .header(crate::declare::HeaderRuleDef::literal("X-Env", ["a"]))
            .header(crate::declare::HeaderRuleDef::literal("x-env", ["b"]))
            .method(MethodDef::get("list", "/items"));
        let err = build(&def, &base_uri(), QueryStyle::default(), &no_externals()).unwrap_err();
        assert!(matches!(err, DefinitionError::DuplicateHeaderRule { ref scope, .. } if scope == "interface"));
    }

    #[test]
    fn cross_scope_duplicate_header_rules_are_legal() {
        let def = InterfaceDef::new("Svc")
            .header(crate::declare::HeaderRuleDef::literal("X-Env", ["interface"]))
            .method(
                MethodDef::get("list", "/items").header(crate::declare::HeaderRuleDef::literal("X-Env", ["method"])),
            );
        assert!(build(&def, &base_uri(), QueryStyle::default(), &no_externals()).is_ok());
    }

    #[test]
    fn build_rejects_empty_literal_header_rule() {
        let def = InterfaceDef::new("Svc")
            .header(crate::declare::HeaderRuleDef::literal("X-Empty", Vec::<String>::new()))
            .method(MethodDef::get("list", "/items"));
        let err = build(&def, &base_uri(), QueryStyle::default(), &no_externals()).unwrap_err();
        assert!(matches!(err, DefinitionError::EmptyHeaderRule { .. }));
    }

    #[test]
    fn verb_check_runs_before_path_check_regardless_of_declaration_order() {
        // Both violations present; the verb violation must win.
        let def = InterfaceDef::new("Svc").method(MethodDef::new("broken").path("/items/{id}"));
        let err = build(&def, &base_uri(), QueryStyle::default(), &no_externals()).unwrap_err();
        assert!(matches!(err, DefinitionError::MissingVerb { .. }));
    }

    #[test]
    fn cache_returns_the_same_descriptor_for_identical_keys() {
        let def = InterfaceDef::new("CachedSvc").method(MethodDef::get("list", "/items"));
        let cache = DescriptorCache {
            entries: Mutex::new(HashMap::new()),
        };
        let first = cache
            .get_or_build(&def, &base_uri(), QueryStyle::default(), &no_externals(), 7)
            .unwrap();
        let second = cache
            .get_or_build(&def, &base_uri(), QueryStyle::default(), &no_externals(), 7)
            .unwrap();
        assert!(Arc::ptr_eq(&first, &second));

        let other_config = cache
            .get_or_build(&def, &base_uri(), QueryStyle::default(), &no_externals(), 8)
            .unwrap();
        assert!(!Arc::ptr_eq(&first, &other_config), "different fingerprint, different entry");
    }

    #[test]
    fn cache_never_validates_a_definition_through_a_same_named_entry() {
        let cache = DescriptorCache {
            entries: Mutex::new(HashMap::new()),
        };
        let valid = InterfaceDef::new("CollidingSvc").method(MethodDef::get("list", "/items"));
        cache
            .get_or_build(&valid, &base_uri(), QueryStyle::default(), &no_externals(), 7)
            .unwrap();

        // Same name, different shape, invalid: the cache must not short-cut
        // past validation.
        let invalid = InterfaceDef::new("CollidingSvc").method(MethodDef::get("fetch", "/items/{id}"));
        let err = cache
            .get_or_build(&invalid, &base_uri(), QueryStyle::default(), &no_externals(), 7)
            .unwrap_err();
        assert!(matches!(err, DefinitionError::UnboundTemplateVariable { ref variable, .. } if variable == "id"));
    }

    #[test]
    fn cache_distinguishes_external_resolver_sets() {
        let cache = DescriptorCache {
            entries: Mutex::new(HashMap::new()),
        };
        let def = InterfaceDef::new("ResolverSetSvc")
            .header(crate::declare::HeaderRuleDef::computed("X-Token", "token"))
            .method(MethodDef::get("list", "/items"));
        let mut externals = IndexMap::new();
        externals.insert("token".to_string(), ResolverFn::nullary(|| Ok("external".into())));
        cache
            .get_or_build(&def, &base_uri(), QueryStyle::default(), &externals, 7)
            .unwrap();

        let err = cache
            .get_or_build(&def, &base_uri(), QueryStyle::default(), &no_externals(), 7)
            .unwrap_err();
        assert!(matches!(err, DefinitionError::UnknownResolver { ref resolver, .. } if resolver == "token"));
    }
}
