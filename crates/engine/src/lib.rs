//! Declarative HTTP client invocation engine.
//!
//! An interface is described once as data — methods, path templates,
//! parameter bindings, header rules, providers — then compiled into a
//! validated descriptor and driven through a fixed invocation pipeline:
//!
//! ```no_run
//! use restbind_engine::{Args, ClientBuilder, InterfaceDef, MethodDef, ParamDef};
//!
//! # fn main() -> Result<(), restbind_engine::ClientError> {
//! let users = InterfaceDef::new("UserService")
//!     .base_path("/v1")
//!     .method(MethodDef::get("user", "/users/{id}").param(ParamDef::path("id")));
//!
//! let client = ClientBuilder::new()
//!     .base_uri("https://api.example.com")?
//!     .build(&users)?;
//!
//! let user = client.invoke_blocking("user", &Args::new().set("id", "u-123"))?;
//! println!("{user}");
//! # Ok(())
//! # }
//! ```
//!
//! All validation happens when the descriptor is built; a handle never
//! exists for a malformed interface. Per-call behavior — header resolution,
//! filter chains, exception mapping, redirect policy — is documented on the
//! individual modules.

pub mod args;
pub mod boundary;
pub mod client;
pub mod codec;
pub mod config;
pub mod context;
pub mod declare;
pub mod descriptor;
pub mod headers;
pub mod mapper;
pub mod pipeline;
pub mod provider;
pub mod uri;

pub use args::Args;
pub use boundary::{ContextInterceptor, ContextSnapshot, Executor, PendingInvocation, block_on_future};
pub use client::{ClientBuilder, ClientHandle};
pub use codec::{BodyCodec, CodecRegistry, JsonCodec, TextCodec};
pub use config::{ConfigSource, InterfaceOverrides, StaticConfigSource};
pub use context::InvocationContext;
pub use declare::{BindingKind, HeaderRuleDef, InterfaceDef, MethodDef, ParamDef, ResolverError, ResolverFn};
pub use descriptor::{DescriptorCache, InterfaceDescriptor, MethodDescriptor};
pub use mapper::DefaultStatusMapper;
pub use pipeline::{ClientResponse, REDIRECT_HOP_LIMIT};
pub use provider::{
    DEFAULT_PROVIDER_PRIORITY, ExceptionMapper, ProviderRegistration, ProviderRegistry, RequestFilter, ResponseFilter,
};

pub use restbind_types::{
    ArgumentError, ClientError, DefinitionError, DomainError, HeaderMap, HttpVerb, LifecycleError, MediaType,
    ProcessingError, QueryStyle, ReturnShape, WireRequest, WireResponse,
};
