use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::anyhow;
use inquest_engine::{
    CallbackMessage, Connection, EngineError, InitOutcome, PrivateKey, ProviderCallback, Runtime, SchemaRegistry, State, args,
};
use inquest_engine::{Resource, ResourceSchema};
use inquest_types::{FieldResult, RawData, Type};
use tokio_util::sync::CancellationToken;

struct TestConnection {
    closed: Arc<AtomicBool>,
}

impl Connection for TestConnection {
    fn id(&self) -> u32 {
        7
    }

    fn name(&self) -> &str {
        "local"
    }

    fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
    }
}

#[derive(Default, Clone)]
struct Counters {
    slow: Arc<AtomicUsize>,
    broken: Arc<AtomicUsize>,
    init: Arc<AtomicUsize>,
    release: Arc<AtomicUsize>,
    hanging: Arc<AtomicUsize>,
}

struct Release {
    version: String,
    codename: String,
}

const RELEASE: PrivateKey<Release> = PrivateKey::new("release");

async fn release_of(resource: &Resource<TestConnection>, counter: Arc<AtomicUsize>) -> anyhow::Result<Arc<Release>> {
    resource
        .private(&RELEASE, || async move {
            counter.fetch_add(1, Ordering::SeqCst);
            tokio::time::sleep(Duration::from_millis(10)).await;
            Ok::<_, anyhow::Error>(Release {
                version: "22.04".into(),
                codename: "jammy".into(),
            })
        })
        .await
}

fn schemas(counters: &Counters) -> SchemaRegistry<TestConnection> {
    let slow = counters.slow.clone();
    let broken = counters.broken.clone();
    let init = counters.init.clone();
    let release_version = counters.release.clone();
    let release_codename = counters.release.clone();
    let hanging = counters.hanging.clone();

    let os = ResourceSchema::<TestConnection>::new("os")
        .field("name", Type::STRING)
        .field("greeting", Type::STRING)
        .field("slow", Type::INT)
        .field("broken", Type::STRING)
        .field("hanging", Type::STRING)
        .field("mistyped", Type::STRING)
        .field("unresolved", Type::array(&Type::STRING))
        .field("version", Type::STRING)
        .field("codename", Type::STRING)
        .resolver("name", |_runtime, _resource| async { anyhow::Ok(RawData::string("ubuntu")) })
        .resolver("greeting", |_runtime, resource| async move {
            let name = resource.get_data("name").await?;
            anyhow::Ok(RawData::string(format!("hello {}", name.as_str().unwrap_or_default())))
        })
        .resolver("slow", move |_runtime, _resource| {
            let slow = slow.clone();
            async move {
                slow.fetch_add(1, Ordering::SeqCst);
                tokio::time::sleep(Duration::from_millis(30)).await;
                anyhow::Ok(RawData::int(42))
            }
        })
        .resolver("broken", move |_runtime, _resource| {
            let broken = broken.clone();
            async move {
                broken.fetch_add(1, Ordering::SeqCst);
                Err::<RawData, _>(anyhow!("permission denied reading /etc/shadow"))
            }
        })
        .resolver("hanging", move |_runtime, _resource| {
            let hanging = hanging.clone();
            async move {
                if hanging.fetch_add(1, Ordering::SeqCst) == 0 {
                    tokio::time::sleep(Duration::from_secs(3600)).await;
                }
                anyhow::Ok(RawData::string("finally"))
            }
        })
        .resolver("mistyped", |_runtime, _resource| async { anyhow::Ok(RawData::int(1)) })
        .resolver("version", move |_runtime, resource| {
            let counter = release_version.clone();
            async move { anyhow::Ok(RawData::string(release_of(&resource, counter).await?.version.clone())) }
        })
        .resolver("codename", move |_runtime, resource| {
            let counter = release_codename.clone();
            async move { anyhow::Ok(RawData::string(release_of(&resource, counter).await?.codename.clone())) }
        });

    let user = ResourceSchema::<TestConnection>::new("user")
        .required_field("name", Type::STRING)
        .field("uid", Type::INT)
        .field("home", Type::STRING)
        .id_fields(["name"])
        .init(move |_runtime, mut args| {
            let init = init.clone();
            async move {
                init.fetch_add(1, Ordering::SeqCst);
                if !args.contains_key("home") {
                    let name = args.get("name").and_then(|data| data.as_str()).unwrap_or_default().to_string();
                    args.insert("home".into(), RawData::string(format!("/home/{name}")));
                }
                anyhow::Ok(InitOutcome::Args(args))
            }
        })
        .resolver("uid", |_runtime, _resource| async { anyhow::Ok(RawData::int(1000)) });

    let parser = ResourceSchema::<TestConnection>::new("parser.line").field("content", Type::STRING).detached();

    SchemaRegistry::new().register(os).register(user).register(parser)
}

fn runtime_with(counters: &Counters) -> (Arc<Runtime<TestConnection>>, Arc<AtomicBool>) {
    let closed = Arc::new(AtomicBool::new(false));
    let runtime = Runtime::builder(TestConnection { closed: closed.clone() }, Arc::new(schemas(counters))).build();
    (runtime, closed)
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_reads_share_one_resolution() {
    let counters = Counters::default();
    let (runtime, _) = runtime_with(&counters);
    let os = runtime.create("os", args!()).await.expect("os resource");

    let mut handles = Vec::new();
    for _ in 0..32 {
        let os = os.clone();
        handles.push(tokio::spawn(async move { os.get_value("slow").await }));
    }

    let mut values = Vec::new();
    for handle in handles {
        values.push(handle.await.expect("joined").expect("value"));
    }

    assert_eq!(counters.slow.load(Ordering::SeqCst), 1);
    assert!(values.iter().all(|value| *value == values[0]));
    assert_eq!(values[0].data, RawData::int(42));
    assert_eq!(values[0].state, State::IS_SET);
}

#[tokio::test]
async fn identical_identities_collapse_to_one_instance() {
    let counters = Counters::default();
    let (runtime, _) = runtime_with(&counters);

    let first = runtime.get_or_create("user", args! { "name" => RawData::string("alice") }).await.expect("first");
    let second = runtime.get_or_create("user", args! { "name" => RawData::string("alice") }).await.expect("second");
    let created = runtime.create("user", args! { "name" => RawData::string("alice") }).await.expect("create");
    let other = runtime.get_or_create("user", args! { "name" => RawData::string("bob") }).await.expect("other");

    assert!(Arc::ptr_eq(&first, &second));
    assert!(Arc::ptr_eq(&first, &created));
    assert!(!Arc::ptr_eq(&first, &other));
    assert_eq!(runtime.len(), 2);
    // get_or_create skips the initializer on a hit; create always runs it
    assert_eq!(counters.init.load(Ordering::SeqCst), 3);
    assert_eq!(first.get_data("home").await.expect("home"), RawData::string("/home/alice"));
}

#[tokio::test]
async fn failed_fields_do_not_affect_their_siblings() {
    let counters = Counters::default();
    let (runtime, _) = runtime_with(&counters);
    let os = runtime.create("os", args!()).await.expect("os resource");

    let first = os.get_data("broken").await.expect_err("broken field fails");
    let name = os.get_data("name").await.expect("name resolves");
    let second = os.get_data("broken").await.expect_err("still failing");

    assert_eq!(name, RawData::string("ubuntu"));
    assert_eq!(counters.broken.load(Ordering::SeqCst), 1);
    let (first, second) = (first.field_error().expect("field error"), second.field_error().expect("field error"));
    assert!(first.same_as(second));
    assert!(first.to_string().contains("permission denied"));
    assert_eq!(os.field_state("broken"), Some(State::IS_SET | State::IS_NULL));
}

#[tokio::test]
async fn fields_can_read_their_siblings() {
    let counters = Counters::default();
    let (runtime, _) = runtime_with(&counters);
    let greeting = runtime
        .create("os", args!())
        .await
        .expect("os resource")
        .get_data("greeting")
        .await
        .expect("greeting");
    assert_eq!(greeting, RawData::string("hello ubuntu"));
    assert_eq!(runtime.resource("os", "os").expect("registered").field_state("name"), Some(State::IS_SET));
}

#[tokio::test]
async fn cancelled_reads_leave_the_field_unset() {
    let counters = Counters::default();
    let (runtime, _) = runtime_with(&counters);
    let os = runtime.create("os", args!()).await.expect("os resource");

    let cancel = CancellationToken::new();
    let trigger = cancel.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(20)).await;
        trigger.cancel();
    });

    let outcome = os.get_value_with("hanging", &cancel).await;
    assert!(matches!(outcome, Err(EngineError::Cancelled { .. })));
    assert_eq!(os.field_state("hanging"), Some(State::UNSET));

    let retried = os.get_data("hanging").await.expect("retry succeeds");
    assert_eq!(retried, RawData::string("finally"));
    assert_eq!(counters.hanging.load(Ordering::SeqCst), 2);
}

#[tokio::test]
#[should_panic(expected = "declared as string")]
async fn mistyped_resolver_output_panics() {
    let counters = Counters::default();
    let (runtime, _) = runtime_with(&counters);
    let os = runtime.create("os", args!()).await.expect("os resource");
    let _ = os.get_data("mistyped").await;
}

#[tokio::test]
async fn fields_without_resolver_become_null() {
    let counters = Counters::default();
    let (runtime, _) = runtime_with(&counters);
    let os = runtime.create("os", args!()).await.expect("os resource");

    let value = os.get_value("unresolved").await.expect("terminal value");
    assert!(value.is_null());
    assert!(value.error.is_none());
    assert_eq!(value.data, RawData::null(Type::array(&Type::STRING)));
}

#[tokio::test]
async fn seeded_fields_are_never_resolved() {
    let counters = Counters::default();
    let (runtime, _) = runtime_with(&counters);
    let os = runtime.create("os", args! { "slow" => RawData::int(7) }).await.expect("os resource");

    assert_eq!(os.get_data("slow").await.expect("seeded"), RawData::int(7));
    assert_eq!(counters.slow.load(Ordering::SeqCst), 0);

    os.set_data("name", RawData::string("debian")).expect("seed name");
    assert!(matches!(
        os.set_data("name", RawData::string("arch")),
        Err(EngineError::AlreadySet { .. })
    ));
    assert!(matches!(os.set_data("greeting", RawData::int(3)), Err(EngineError::ArgumentType { .. })));
    assert_eq!(runtime.get_data("os", "os", "greeting").await.expect("greeting"), RawData::string("hello debian"));
}

#[tokio::test]
async fn invalid_arguments_fail_creation() {
    let counters = Counters::default();
    let (runtime, _) = runtime_with(&counters);

    assert!(matches!(
        runtime.create("user", args!()).await,
        Err(EngineError::MissingArgument { .. })
    ));
    assert!(matches!(
        runtime.create("user", args! { "name" => RawData::int(3) }).await,
        Err(EngineError::ArgumentType { .. })
    ));
    assert!(matches!(
        runtime.create("user", args! { "name" => RawData::string("") }).await,
        Err(EngineError::Identity { .. })
    ));
    assert!(matches!(runtime.create("package", args!()).await, Err(EngineError::UnknownResource { .. })));
    assert!(runtime.is_empty());
}

#[tokio::test]
async fn private_objects_are_computed_once() {
    let counters = Counters::default();
    let (runtime, _) = runtime_with(&counters);
    let os = runtime.create("os", args!()).await.expect("os resource");

    let (version, codename) = tokio::join!(os.get_data("version"), os.get_data("codename"));
    assert_eq!(version.expect("version"), RawData::string("22.04"));
    assert_eq!(codename.expect("codename"), RawData::string("jammy"));
    assert_eq!(counters.release.load(Ordering::SeqCst), 1);
    assert_eq!(os.get_private(&RELEASE).map(|release| release.version.clone()), Some("22.04".to_string()));
}

#[tokio::test]
async fn detached_resources_bypass_the_registry() {
    let counters = Counters::default();
    let (runtime, _) = runtime_with(&counters);

    let first = runtime
        .new_detached("parser.line", args! { "content" => RawData::string("a=b") })
        .await
        .expect("first");
    let second = runtime
        .new_detached("parser.line", args! { "content" => RawData::string("a=b") })
        .await
        .expect("second");

    assert_ne!(first.id(), second.id());
    assert!(runtime.is_empty());
    assert!(matches!(runtime.create("parser.line", args!()).await, Err(EngineError::Detached { .. })));
    assert!(matches!(runtime.new_detached("os", args!()).await, Err(EngineError::NotDetached { .. })));
}

#[tokio::test]
async fn snapshot_captures_settled_fields() {
    let counters = Counters::default();
    let (runtime, _) = runtime_with(&counters);
    let os = runtime.create("os", args!()).await.expect("os resource");
    os.get_data("name").await.expect("name");
    let _ = os.get_data("broken").await;

    let snapshot = runtime.snapshot();
    assert_eq!(snapshot.len(), 1);
    assert_eq!(snapshot[0].fields.get("name"), Some(&FieldResult::Data(RawData::string("ubuntu"))));
    assert!(matches!(snapshot[0].fields.get("broken"), Some(FieldResult::Error { .. })));
    assert!(!snapshot[0].fields.contains_key("slow"));
}

#[derive(Default)]
struct RecordingCallback {
    messages: Mutex<Vec<(u32, CallbackMessage)>>,
}

impl ProviderCallback for RecordingCallback {
    fn collect(&self, connection_id: u32, message: CallbackMessage) {
        self.messages.lock().expect("messages lock").push((connection_id, message));
    }
}

#[tokio::test]
async fn resources_stream_through_the_callback() {
    let counters = Counters::default();
    let callback = Arc::new(RecordingCallback::default());
    let runtime = Runtime::builder(
        TestConnection {
            closed: Arc::new(AtomicBool::new(false)),
        },
        Arc::new(schemas(&counters)),
    )
    .callback(callback.clone())
    .build();

    let user = runtime.create("user", args! { "name" => RawData::string("carol") }).await.expect("user");
    runtime.emit_resource(&user);

    let messages = callback.messages.lock().expect("messages lock");
    assert_eq!(messages.len(), 1);
    let (connection_id, message) = &messages[0];
    assert_eq!(*connection_id, 7);
    match message {
        CallbackMessage::Resource { resource, id, fields } => {
            assert_eq!(resource, "user");
            assert_eq!(id, "carol");
            assert_eq!(fields.get("home"), Some(&FieldResult::Data(RawData::string("/home/carol"))));
        }
        other => panic!("unexpected message {other:?}"),
    }
}

#[tokio::test]
async fn lookups_are_memoized_per_runtime() {
    let counters = Counters::default();
    let (runtime, _) = runtime_with(&counters);
    let calls = AtomicUsize::new(0);
    let lookup = || async {
        calls.fetch_add(1, Ordering::SeqCst);
        anyhow::Ok(RawData::array(&Type::STRING, vec![]))
    };

    let (_, first_cached) = runtime.memoize("packages", lookup).await.expect("lookup");
    let (_, second_cached) = runtime.memoize("packages", lookup).await.expect("lookup");
    assert!(!first_cached);
    assert!(second_cached);
    assert_eq!(calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn closing_drops_instances_and_the_connection() {
    let counters = Counters::default();
    let (runtime, closed) = runtime_with(&counters);
    let os = runtime.create("os", args!()).await.expect("os resource");

    runtime.close();

    assert!(closed.load(Ordering::SeqCst));
    assert!(runtime.is_empty());
    assert!(matches!(
        runtime.create("os", args!()).await,
        Err(EngineError::RuntimeClosed { connection_id: 7 })
    ));
    assert!(matches!(os.get_data("name").await, Err(EngineError::Cancelled { .. })));
}
