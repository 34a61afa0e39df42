//! Declarative interface description model.
//!
//! The engine has no runtime reflection to scan, so the abstract interface
//! description is an explicit data structure assembled with a fluent builder:
//! an [`InterfaceDef`] carries interface-scope header rules, named header
//! resolvers, provider registrations, and a list of [`MethodDef`]s. The
//! description is inert until compiled into an
//! [`InterfaceDescriptor`](crate::descriptor::InterfaceDescriptor), where all
//! validation happens.

use std::fmt;
use std::sync::Arc;

use indexmap::IndexMap;
use restbind_types::{HttpVerb, MediaType, QueryStyle, ReturnShape};

use crate::provider::ProviderRegistration;

/// Error raised inside a computed header resolver.
pub type ResolverError = Box<dyn std::error::Error + Send + Sync>;

/// A named header-resolver function: either zero-argument, or taking the
/// header name being resolved.
#[derive(Clone)]
pub enum ResolverFn {
    Nullary(Arc<dyn Fn() -> Result<String, ResolverError> + Send + Sync>),
    Named(Arc<dyn Fn(&str) -> Result<String, ResolverError> + Send + Sync>),
}

impl ResolverFn {
    pub fn nullary<F>(f: F) -> Self
    where
        F: Fn() -> Result<String, ResolverError> + Send + Sync + 'static,
    {
        Self::Nullary(Arc::new(f))
    }

    pub fn named<F>(f: F) -> Self
    where
        F: Fn(&str) -> Result<String, ResolverError> + Send + Sync + 'static,
    {
        Self::Named(Arc::new(f))
    }

    /// Invoke the resolver for `header`.
    pub fn invoke(&self, header: &str) -> Result<String, ResolverError> {
        match self {
            Self::Nullary(f) => f(),
            Self::Named(f) => f(header),
        }
    }
}

impl fmt::Debug for ResolverFn {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Nullary(_) => f.write_str("ResolverFn::Nullary"),
            Self::Named(_) => f.write_str("ResolverFn::Named"),
        }
    }
}

/// Where a header rule's value comes from. Literal and computed sources are
/// mutually exclusive by construction.
#[derive(Clone, Debug)]
pub enum HeaderSource {
    /// One or more literal values.
    Literal(Vec<String>),
    /// Reference to a named resolver function.
    Computed { resolver: String },
}

/// Declarative header instruction attached to an interface or method.
#[derive(Clone, Debug)]
pub struct HeaderRuleDef {
    pub name: String,
    pub source: HeaderSource,
    /// When true, a resolver failure aborts the invocation; when false the
    /// header is omitted and the call proceeds.
    pub required: bool,
}

impl HeaderRuleDef {
    pub fn literal(name: impl Into<String>, values: impl IntoIterator<Item = impl Into<String>>) -> Self {
        Self {
            name: name.into(),
            source: HeaderSource::Literal(values.into_iter().map(Into::into).collect()),
            required: true,
        }
    }

    pub fn computed(name: impl Into<String>, resolver: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            source: HeaderSource::Computed {
                resolver: resolver.into(),
            },
            required: true,
        }
    }

    pub fn optional(mut self) -> Self {
        self.required = false;
        self
    }
}

/// How a method parameter binds into the outgoing request.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum BindingKind {
    Path,
    Query,
    Header,
    Cookie,
    Body,
}

/// A named method (or interface-level) parameter binding.
#[derive(Clone, Debug)]
pub struct ParamDef {
    /// Argument key the caller supplies a value under.
    pub name: String,
    pub kind: BindingKind,
    /// Wire name: template variable, query key, header name, or cookie name.
    pub target: String,
}

impl ParamDef {
    fn new(name: impl Into<String>, kind: BindingKind) -> Self {
        let name = name.into();
        Self {
            target: name.clone(),
            name,
            kind,
        }
    }

    pub fn path(name: impl Into<String>) -> Self {
        Self::new(name, BindingKind::Path)
    }

    pub fn query(name: impl Into<String>) -> Self {
        Self::new(name, BindingKind::Query)
    }

    pub fn header(name: impl Into<String>) -> Self {
        Self::new(name, BindingKind::Header)
    }

    pub fn cookie(name: impl Into<String>) -> Self {
        Self::new(name, BindingKind::Cookie)
    }

    pub fn body() -> Self {
        Self::new("body", BindingKind::Body)
    }

    /// Bind under a different wire name than the argument key.
    pub fn wire_name(mut self, target: impl Into<String>) -> Self {
        self.target = target.into();
        self
    }
}

/// One declared method of an interface.
#[derive(Clone, Debug)]
pub struct MethodDef {
    pub name: String,
    /// Every verb rule declared for this method. Validation requires exactly
    /// one after inheritance is applied.
    pub verbs: Vec<HttpVerb>,
    pub path: String,
    pub produces: Vec<MediaType>,
    pub consumes: Vec<MediaType>,
    pub header_rules: Vec<HeaderRuleDef>,
    pub params: Vec<ParamDef>,
    pub return_shape: ReturnShape,
}

impl MethodDef {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            verbs: Vec::new(),
            path: String::new(),
            produces: Vec::new(),
            consumes: Vec::new(),
            header_rules: Vec::new(),
            params: Vec::new(),
            return_shape: ReturnShape::default(),
        }
    }

    pub fn get(name: impl Into<String>, path: impl Into<String>) -> Self {
        Self::new(name).verb(HttpVerb::Get).path(path)
    }

    pub fn post(name: impl Into<String>, path: impl Into<String>) -> Self {
        Self::new(name).verb(HttpVerb::Post).path(path)
    }

    pub fn put(name: impl Into<String>, path: impl Into<String>) -> Self {
        Self::new(name).verb(HttpVerb::Put).path(path)
    }

    pub fn delete(name: impl Into<String>, path: impl Into<String>) -> Self {
        Self::new(name).verb(HttpVerb::Delete).path(path)
    }

    /// Add a verb rule. Calling this twice records a conflicting declaration
    /// that fails at build time.
    pub fn verb(mut self, verb: HttpVerb) -> Self {
        self.verbs.push(verb);
        self
    }

    pub fn path(mut self, path: impl Into<String>) -> Self {
        self.path = path.into();
        self
    }

    pub fn produces(mut self, media: impl Into<MediaType>) -> Self {
        self.produces.push(media.into());
        self
    }

    pub fn consumes(mut self, media: impl Into<MediaType>) -> Self {
        self.consumes.push(media.into());
        self
    }

    pub fn header(mut self, rule: HeaderRuleDef) -> Self {
        self.header_rules.push(rule);
        self
    }

    pub fn param(mut self, param: ParamDef) -> Self {
        self.params.push(param);
        self
    }

    pub fn returns(mut self, shape: ReturnShape) -> Self {
        self.return_shape = shape;
        self
    }

    /// Declare the asynchronous return shape; the pipeline will run on the
    /// configured executor.
    pub fn asynchronous(self) -> Self {
        self.returns(ReturnShape::Async)
    }
}

/// The full declarative description of one client interface.
#[derive(Clone, Debug, Default)]
pub struct InterfaceDef {
    pub name: String,
    pub base_path: String,
    pub query_style: Option<QueryStyle>,
    pub header_rules: Vec<HeaderRuleDef>,
    /// Interface-level bindings applying to every method (e.g. a path
    /// parameter used by the base path template).
    pub params: Vec<ParamDef>,
    /// Resolver functions reachable from the interface itself.
    pub resolvers: IndexMap<String, ResolverFn>,
    /// Providers declared on the interface.
    pub providers: Vec<ProviderRegistration>,
    pub methods: Vec<MethodDef>,
}

impl InterfaceDef {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }

    pub fn base_path(mut self, path: impl Into<String>) -> Self {
        self.base_path = path.into();
        self
    }

    pub fn query_style(mut self, style: QueryStyle) -> Self {
        self.query_style = Some(style);
        self
    }

    pub fn header(mut self, rule: HeaderRuleDef) -> Self {
        self.header_rules.push(rule);
        self
    }

    pub fn param(mut self, param: ParamDef) -> Self {
        self.params.push(param);
        self
    }

    /// Register a resolver function reachable from this interface.
    pub fn resolver(mut self, name: impl Into<String>, resolver: ResolverFn) -> Self {
        self.resolvers.insert(name.into(), resolver);
        self
    }

    /// Declare a provider on the interface. Builder registrations of the
    /// same identity override these at merge time.
    pub fn provider(mut self, registration: ProviderRegistration) -> Self {
        self.providers.push(registration.declared());
        self
    }

    pub fn method(mut self, method: MethodDef) -> Self {
        self.methods.push(method);
        self
    }

    /// Inherit from a parent interface: methods not redefined here are
    /// copied, a redefined method without a verb inherits the parent's verb
    /// rules, and parent header rules, params, and resolvers are carried over
    /// unless shadowed by name.
    pub fn extends(mut self, parent: &InterfaceDef) -> Self {
        for method in &mut self.methods {
            if method.verbs.is_empty()
                && let Some(inherited) = parent.methods.iter().find(|m| m.name == method.name)
            {
                method.verbs.extend(inherited.verbs.iter().copied());
            }
        }
        for method in &parent.methods {
            if !self.methods.iter().any(|m| m.name == method.name) {
                self.methods.push(method.clone());
            }
        }
        for rule in &parent.header_rules {
            if !self
                .header_rules
                .iter()
                .any(|r| r.name.eq_ignore_ascii_case(&rule.name))
            {
                self.header_rules.push(rule.clone());
            }
        }
        for param in &parent.params {
            if !self.params.iter().any(|p| p.name == param.name) {
                self.params.push(param.clone());
            }
        }
        for (name, resolver) in &parent.resolvers {
            if !self.resolvers.contains_key(name) {
                self.resolvers.insert(name.clone(), resolver.clone());
            }
        }
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn shorthand_constructors_set_verb_and_path() {
        let method = MethodDef::get("list_users", "/users");
        assert_eq!(method.verbs, [HttpVerb::Get]);
        assert_eq!(method.path, "/users");
        assert_eq!(method.return_shape, ReturnShape::Value);
    }

    #[test]
    fn double_verb_declaration_is_recorded_for_validation() {
        let method = MethodDef::get("ambiguous", "/x").verb(HttpVerb::Post);
        assert_eq!(method.verbs.len(), 2);
    }

    #[test]
    fn extends_copies_parent_methods_and_inherits_verbs() {
        let parent = InterfaceDef::new("Base")
            .header(HeaderRuleDef::literal("X-Base", ["yes"]))
            .method(MethodDef::get("ping", "/ping"))
            .method(MethodDef::get("status", "/status"));

        let child = InterfaceDef::new("Child")
            .method(MethodDef::new("ping").path("/ping/v2"))
            .extends(&parent);

        let ping = child.methods.iter().find(|m| m.name == "ping").unwrap();
        assert_eq!(ping.verbs, [HttpVerb::Get], "verb inherited from parent");
        assert_eq!(ping.path, "/ping/v2", "child path wins");
        assert!(child.methods.iter().any(|m| m.name == "status"));
        assert_eq!(child.header_rules.len(), 1);
    }

    #[test]
    fn resolver_invoke_passes_header_name_to_named_form() {
        let nullary = ResolverFn::nullary(|| Ok("fixed".to_string()));
        let named = ResolverFn::named(|header| Ok(format!("for-{header}")));

        assert_eq!(nullary.invoke("X-Ignored").unwrap(), "fixed");
        assert_eq!(named.invoke("X-Token").unwrap(), "for-X-Token");
    }
}
