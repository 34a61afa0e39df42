//! End-to-end behavior of the invocation engine through the public API,
//! exercised against the recording transport.
//!
//! Interface names are unique per test: built descriptors are cached
//! globally by name, base URI, and configuration fingerprint.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use restbind_engine::{
    Args, ClientBuilder, ClientError, ContextInterceptor, ContextSnapshot, DomainError, ExceptionMapper, HeaderMap,
    HeaderRuleDef, InterfaceDef, InterfaceOverrides, MethodDef, ParamDef, QueryStyle, RequestFilter, ResolverFn,
    ProviderRegistration, StaticConfigSource, WireResponse,
};
use restbind_engine::{DefinitionError, InvocationContext, ProcessingError, config::ConfigSource};
use restbind_transport::{RecordingTransport, Transport, TransportOptions};
use serde_json::json;

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

fn handle_for(def: &InterfaceDef, transport: &Arc<RecordingTransport>) -> restbind_engine::ClientHandle {
    init_tracing();
    ClientBuilder::new()
        .base_uri("https://api.example.com")
        .unwrap()
        .transport(Arc::clone(transport) as Arc<dyn restbind_transport::Transport>)
        .build(def)
        .expect("handle builds")
}

#[tokio::test]
async fn explicit_argument_beats_method_rule_beats_interface_rule() {
    let def = InterfaceDef::new("ConformanceHeaderPrecedence")
        .header(HeaderRuleDef::literal("X-Env", ["a"]))
        .method(
            MethodDef::get("list", "/items")
                .header(HeaderRuleDef::literal("X-Env", ["b"]))
                .param(ParamDef::header("env").wire_name("X-Env")),
        );
    let transport = Arc::new(RecordingTransport::new());
    let handle = handle_for(&def, &transport);

    handle.invoke("list", &Args::new().set("env", "c")).await.unwrap();
    assert_eq!(transport.last_request().unwrap().headers.get_all("x-env"), ["c"]);

    // Without the explicit argument the method-scope rule wins.
    handle.invoke("list", &Args::new()).await.unwrap();
    assert_eq!(transport.last_request().unwrap().headers.get_all("x-env"), ["b"]);
}

#[tokio::test]
async fn multi_valued_header_rules_send_each_value_separately() {
    let def = InterfaceDef::new("ConformanceMultiValue")
        .method(MethodDef::get("list", "/items").header(HeaderRuleDef::literal("X-Tag", ["foo", "bar"])));
    let transport = Arc::new(RecordingTransport::new());
    let handle = handle_for(&def, &transport);

    handle.invoke("list", &Args::new()).await.unwrap();
    let headers = transport.last_request().unwrap().headers;
    assert_eq!(headers.get_all("x-tag"), ["foo", "bar"]);
    assert_eq!(headers.joined_value("x-tag").as_deref(), Some("foo,bar"));
}

#[tokio::test]
async fn required_resolver_failure_fails_the_call_before_the_transport() {
    let def = InterfaceDef::new("ConformanceRequiredResolver")
        .resolver("token", ResolverFn::nullary(|| Err("vault sealed".into())))
        .header(HeaderRuleDef::computed("Authorization", "token"))
        .method(MethodDef::get("list", "/items"));
    let transport = Arc::new(RecordingTransport::new());
    let handle = handle_for(&def, &transport);

    let err = handle.invoke("list", &Args::new()).await.unwrap_err();
    assert!(matches!(err, ClientError::Processing(ProcessingError::HeaderResolution { .. })));
    assert_eq!(transport.calls(), 0);
}

struct TallyMapper {
    priority: u32,
    label: &'static str,
    handled: AtomicUsize,
}

impl ExceptionMapper for TallyMapper {
    fn priority(&self) -> u32 {
        self.priority
    }

    fn handles(&self, status: u16, _headers: &HeaderMap) -> bool {
        self.handled.fetch_add(1, Ordering::SeqCst);
        status >= 400
    }

    fn to_error(&self, response: &WireResponse) -> DomainError {
        DomainError::new(response.status, self.label)
    }
}

#[tokio::test]
async fn lowest_priority_mapper_wins_but_every_mapper_is_consulted() {
    let eager = Arc::new(TallyMapper {
        priority: 50,
        label: "eager",
        handled: AtomicUsize::new(0),
    });
    let late = Arc::new(TallyMapper {
        priority: 100,
        label: "late",
        handled: AtomicUsize::new(0),
    });

    let def = InterfaceDef::new("ConformanceMapperChain").method(MethodDef::get("list", "/items"));
    let transport = Arc::new(RecordingTransport::new());
    transport.enqueue(WireResponse::new(404).with_body(b"missing".to_vec()));
    let handle = ClientBuilder::new()
        .base_uri("https://api.example.com")
        .unwrap()
        .transport(Arc::clone(&transport) as Arc<dyn restbind_transport::Transport>)
        .register(ProviderRegistration::shared_exception_mapper(
            "late",
            Arc::clone(&late) as Arc<dyn ExceptionMapper>,
        ))
        .register(ProviderRegistration::shared_exception_mapper(
            "eager",
            Arc::clone(&eager) as Arc<dyn ExceptionMapper>,
        ))
        .build(&def)
        .unwrap();

    let err = handle.invoke("list", &Args::new()).await.unwrap_err();
    match err {
        ClientError::Domain(domain) => assert_eq!(domain.message, "eager", "priority 50 supplies the error"),
        other => panic!("expected a domain error, got {other}"),
    }
    assert_eq!(eager.handled.load(Ordering::SeqCst), 1);
    assert_eq!(late.handled.load(Ordering::SeqCst), 1, "later mappers are still consulted");
}

#[tokio::test]
async fn redirects_pass_through_untouched_by_default() {
    let def = InterfaceDef::new("ConformanceRedirectOff")
        .method(MethodDef::get("list", "/items").returns(restbind_engine::ReturnShape::Response));
    let transport = Arc::new(RecordingTransport::new());
    transport.enqueue(WireResponse::new(302).with_header("Location", "https://elsewhere.example.com/x"));
    let handle = handle_for(&def, &transport);

    let response = handle.invoke_response("list", &Args::new()).await.unwrap();
    assert_eq!(response.status(), 302);
    assert_eq!(transport.calls(), 1, "the Location target must not be requested");
}

#[tokio::test]
async fn enabling_redirects_issues_exactly_one_extra_request_per_hop() {
    let def = InterfaceDef::new("ConformanceRedirectOn").method(MethodDef::get("list", "/items"));
    let transport = Arc::new(RecordingTransport::new());
    transport.enqueue(WireResponse::new(302).with_header("Location", "/relocated"));
    transport.enqueue(
        WireResponse::new(200)
            .with_header("Content-Type", "application/json")
            .with_body(br#"{"ok": true}"#.to_vec()),
    );
    let handle = ClientBuilder::new()
        .base_uri("https://api.example.com")
        .unwrap()
        .follow_redirects(true)
        .transport(Arc::clone(&transport) as Arc<dyn restbind_transport::Transport>)
        .build(&def)
        .unwrap();

    let value = handle.invoke("list", &Args::new()).await.unwrap();
    assert_eq!(value, json!({"ok": true}));
    assert_eq!(transport.calls(), 2);
    assert_eq!(transport.requests()[1].uri, "https://api.example.com/relocated");
}

#[tokio::test]
async fn each_query_style_renders_its_documented_form() {
    let cases = [
        (QueryStyle::Repeated, "ConformanceQueryRepeated", "p=foo&p=bar&p=baz"),
        (QueryStyle::CommaJoined, "ConformanceQueryComma", "p=foo,bar,baz"),
        (
            QueryStyle::BracketedRepeated,
            "ConformanceQueryBracketed",
            "p[]=foo&p[]=bar&p[]=baz",
        ),
    ];

    for (style, name, expected) in cases {
        let def = InterfaceDef::new(name)
            .query_style(style)
            .method(MethodDef::get("list", "/items").param(ParamDef::query("p")));
        let transport = Arc::new(RecordingTransport::new());
        let handle = handle_for(&def, &transport);

        handle
            .invoke("list", &Args::new().set("p", json!(["foo", "bar", "baz"])))
            .await
            .unwrap();
        let uri = transport.last_request().unwrap().uri;
        assert_eq!(uri, format!("https://api.example.com/items?{expected}"), "style {style:?}");
    }
}

struct StampFilter;
impl RequestFilter for StampFilter {
    fn filter(&self, context: &mut InvocationContext) -> Result<(), ClientError> {
        context.headers_mut().set("X-Origin", "builder");
        Ok(())
    }
}

struct DeclaredStampFilter;
impl RequestFilter for DeclaredStampFilter {
    fn filter(&self, context: &mut InvocationContext) -> Result<(), ClientError> {
        context.headers_mut().set("X-Origin", "declared");
        Ok(())
    }
}

#[tokio::test]
async fn builder_registration_replaces_declared_provider_with_same_identity() {
    let def = InterfaceDef::new("ConformanceProviderOverride")
        .provider(ProviderRegistration::request_filter(DeclaredStampFilter).with_identity("stamp"))
        .method(MethodDef::get("list", "/items"));
    let transport = Arc::new(RecordingTransport::new());
    let handle = ClientBuilder::new()
        .base_uri("https://api.example.com")
        .unwrap()
        .transport(Arc::clone(&transport) as Arc<dyn restbind_transport::Transport>)
        .register(ProviderRegistration::request_filter(StampFilter).with_identity("stamp"))
        .build(&def)
        .unwrap();

    handle.invoke("list", &Args::new()).await.unwrap();
    assert_eq!(
        transport.last_request().unwrap().headers.get("x-origin"),
        Some("builder"),
        "the declared filter must have been replaced, not merely outrun"
    );
}

struct TenantInterceptor {
    applied: Arc<AtomicUsize>,
    removed: Arc<AtomicUsize>,
}

impl ContextInterceptor for TenantInterceptor {
    fn prepare(&self, snapshot: &mut ContextSnapshot) {
        snapshot.insert("tenant".into(), "acme".into());
    }

    fn apply(&self, snapshot: &ContextSnapshot) {
        assert_eq!(snapshot.get("tenant").map(String::as_str), Some("acme"));
        self.applied.fetch_add(1, Ordering::SeqCst);
    }

    fn remove(&self, _snapshot: &ContextSnapshot) {
        self.removed.fetch_add(1, Ordering::SeqCst);
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn submit_runs_interceptor_phases_around_the_worker_task() {
    let applied = Arc::new(AtomicUsize::new(0));
    let removed = Arc::new(AtomicUsize::new(0));

    let def = InterfaceDef::new("ConformanceAsyncSubmit").method(MethodDef::get("list", "/items").asynchronous());
    let transport = Arc::new(RecordingTransport::new());
    transport.enqueue(
        WireResponse::new(200)
            .with_header("Content-Type", "application/json")
            .with_body(br#"[1, 2, 3]"#.to_vec()),
    );
    let handle = ClientBuilder::new()
        .base_uri("https://api.example.com")
        .unwrap()
        .transport(Arc::clone(&transport) as Arc<dyn restbind_transport::Transport>)
        .interceptor(TenantInterceptor {
            applied: Arc::clone(&applied),
            removed: Arc::clone(&removed),
        })
        .build(&def)
        .unwrap();

    let pending = handle.submit("list", Args::new()).unwrap();
    let value = pending.outcome().await.unwrap();
    assert_eq!(value, json!([1, 2, 3]));
    assert_eq!(applied.load(Ordering::SeqCst), 1);
    assert_eq!(removed.load(Ordering::SeqCst), 1, "cleanup must run after the pipeline");
}

#[tokio::test]
async fn configuration_overrides_the_builder_base_uri() {
    let def = InterfaceDef::new("ConformanceConfigBaseUri").method(MethodDef::get("list", "/items"));
    let source: Arc<dyn ConfigSource> = Arc::new(StaticConfigSource::new().set_interface(
        "ConformanceConfigBaseUri",
        InterfaceOverrides {
            base_uri: Some("https://configured.example.com".into()),
            ..InterfaceOverrides::default()
        },
    ));
    let transport = Arc::new(RecordingTransport::new());
    let handle = ClientBuilder::new()
        .base_uri("https://builder.example.com")
        .unwrap()
        .config_source(source)
        .transport(Arc::clone(&transport) as Arc<dyn restbind_transport::Transport>)
        .build(&def)
        .unwrap();

    handle.invoke("list", &Args::new()).await.unwrap();
    assert_eq!(transport.last_request().unwrap().uri, "https://configured.example.com/items");
}

#[test]
fn configuration_naming_an_unregistered_provider_fails_the_build() {
    let def = InterfaceDef::new("ConformanceConfigProviders").method(MethodDef::get("list", "/items"));
    let source: Arc<dyn ConfigSource> = Arc::new(StaticConfigSource::new().set_interface(
        "ConformanceConfigProviders",
        InterfaceOverrides {
            providers: Some(vec!["audit".into()]),
            ..InterfaceOverrides::default()
        },
    ));

    let err = ClientBuilder::new()
        .base_uri("https://api.example.com")
        .unwrap()
        .config_source(source)
        .transport(Arc::new(RecordingTransport::new()) as Arc<dyn restbind_transport::Transport>)
        .build(&def)
        .unwrap_err();
    assert!(matches!(
        err,
        ClientError::Definition(DefinitionError::UnknownConfiguredProvider { ref name }) if name == "audit"
    ));
}

struct SlowTransport {
    delay: Duration,
}

#[async_trait::async_trait]
impl Transport for SlowTransport {
    async fn send(
        &self,
        _request: restbind_engine::WireRequest,
        _options: &TransportOptions,
    ) -> Result<WireResponse, ProcessingError> {
        tokio::time::sleep(self.delay).await;
        Ok(WireResponse::new(200))
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn closing_the_handle_lets_in_flight_calls_complete_normally() {
    let def = InterfaceDef::new("ConformanceCloseInFlight").method(MethodDef::get("list", "/items"));
    let handle = ClientBuilder::new()
        .base_uri("https://api.example.com")
        .unwrap()
        .transport(Arc::new(SlowTransport {
            delay: Duration::from_millis(200),
        }) as Arc<dyn Transport>)
        .build(&def)
        .unwrap();

    let in_flight = tokio::spawn({
        let handle = handle.clone();
        async move { handle.invoke("list", &Args::new()).await }
    });
    tokio::time::sleep(Duration::from_millis(50)).await;
    handle.close();

    let outcome = in_flight.await.expect("task joins");
    assert!(outcome.is_ok(), "closing must not fail calls already in flight: {outcome:?}");

    let err = handle.invoke("list", &Args::new()).await.unwrap_err();
    assert!(matches!(err, ClientError::Lifecycle(_)), "new calls after close must fail");
}

#[tokio::test]
async fn named_provider_activates_only_when_configuration_selects_it() {
    let def = InterfaceDef::new("ConformanceNamedProvider").method(MethodDef::get("list", "/items"));
    let source: Arc<dyn ConfigSource> = Arc::new(StaticConfigSource::new().set_interface(
        "ConformanceNamedProvider",
        InterfaceOverrides {
            providers: Some(vec!["stamp".into()]),
            ..InterfaceOverrides::default()
        },
    ));
    let transport = Arc::new(RecordingTransport::new());
    let handle = ClientBuilder::new()
        .base_uri("https://api.example.com")
        .unwrap()
        .config_source(source)
        .register_named("stamp", ProviderRegistration::request_filter(StampFilter))
        .transport(Arc::clone(&transport) as Arc<dyn restbind_transport::Transport>)
        .build(&def)
        .unwrap();

    handle.invoke("list", &Args::new()).await.unwrap();
    assert_eq!(transport.last_request().unwrap().headers.get("x-origin"), Some("builder"));
}
