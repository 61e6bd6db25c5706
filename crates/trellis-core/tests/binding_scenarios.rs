//! End-to-end binding scenarios.

use std::any::Any;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::thread;
use std::time::Duration;

use parking_lot::Mutex;
use trellis_core::accessor::{BindingSource, SingleSourceAccessor, SourceAccessor};
use trellis_core::behavior::{BehaviorId, BindingBehavior, DelayBindingBehavior};
use trellis_core::property::Property;
use trellis_core::resource::set_data_context;
use trellis_core::value::ValueType;
use trellis_core::weak_event::{EventListener, FnListener, to_weak};
use trellis_core::{
    BindingAction, BindingBuilder, BindingError, BindingModeKind, BindingPath, BindingServices, DataBinding,
    FnConverter, ObserverOptions, PathObserver, Result, Value, merge_path,
};
use trellis_macros::Bindable;

#[derive(Bindable)]
struct Node {
    child: Property<Value>,
    name: Property<String>,
}

impl Node {
    fn new(name: &str) -> Arc<Node> {
        Arc::new(Node {
            child: Property::new(Value::Null),
            name: Property::new(name.to_string()),
        })
    }

    fn with_child(name: &str, child: &Arc<Node>) -> Arc<Node> {
        let node = Node::new(name);
        node.set_child(Value::from_arc(child.clone()));
        node
    }

    fn set_child(&self, child: Value) {
        self.child.set_with(child, Value::same_as);
    }
}

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter("trellis_core=debug")
        .with_test_writer()
        .try_init();
}

fn services() -> BindingServices {
    init_tracing();
    let services = BindingServices::new();
    Node::register_bindable(services.member_provider());
    services
}

fn value(node: &Arc<Node>) -> Value {
    Value::from_arc(node.clone())
}

#[test]
fn test_path_parse_is_idempotent_and_interned() {
    for text in ["Child.Name", " Child . Name ", "Items[0].Name", "Map[\"key\"]", ""] {
        let first = BindingPath::parse(text).unwrap();
        let again = BindingPath::parse(first.as_str()).unwrap();
        assert_eq!(first.as_str(), again.as_str());
        assert!(Arc::ptr_eq(&first, &BindingPath::parse(text).unwrap()));
    }
}

#[test]
fn test_path_merge_law() {
    assert_eq!(merge_path("", "Foo"), "Foo");
    assert_eq!(merge_path("Foo", ""), "Foo");
    assert_eq!(merge_path("Foo", "Bar"), "Foo.Bar");
    assert_eq!(merge_path("Foo", "[0]"), "Foo[0]");
}

#[test]
fn test_suffix_only_invalidation() {
    let c = Node::new("c");
    let b = Node::with_child("b", &c);
    let a = Node::with_child("a", &b);
    let root = Node::with_child("root", &a);

    let observer = PathObserver::parse(
        value(&root),
        "Child.Child.Child.Name",
        services().member_provider().clone(),
        ObserverOptions::strong(),
    )
    .unwrap();
    let before: Vec<_> = (0..4).map(|i| observer.subscription_generation(i)).collect();

    b.set_child(value(&Node::new("c2")));

    assert_eq!(observer.subscription_generation(0), before[0]);
    assert_eq!(observer.subscription_generation(1), before[1]);
    assert_eq!(observer.subscription_generation(2), before[2]);
    assert_ne!(observer.subscription_generation(3), before[3]);
    assert_eq!(observer.value().get::<String>().as_deref(), Some("c2"));
}

#[test]
fn test_partial_binding_recovery_end_to_end() {
    let services = services();
    let root = Node::new("root");
    let target = Node::new("unchanged");

    let binding = BindingBuilder::with_services(&services, value(&target), "Name")
        .to("Child.Name")
        .source(value(&root))
        .mode(BindingModeKind::OneWay)
        .build()
        .unwrap();
    assert_eq!(target.name.get(), "unchanged");

    let child = Node::new("first");
    root.set_child(value(&child));
    assert_eq!(target.name.get(), "first");

    child.name.set("renamed".to_string());
    assert_eq!(target.name.get(), "renamed");

    binding.dispose();
    child.name.set("after dispose".to_string());
    assert_eq!(target.name.get(), "renamed");
}

#[test]
fn test_two_way_binding_with_converter() {
    let services = services();
    let source = Node::new("ada");
    let target = Node::new("");

    let converter = FnConverter::new(|value, _| {
        Ok(value
            .get::<String>()
            .map_or(Value::Unset, |text| Value::from(text.to_uppercase())))
    })
    .with_back(|value, _| {
        Ok(value
            .get::<String>()
            .map_or(Value::Unset, |text| Value::from(text.to_lowercase())))
    });

    let binding = BindingBuilder::with_services(&services, value(&target), "Name")
        .to("Name")
        .source(value(&source))
        .converter(converter.shared())
        .build()
        .unwrap();
    assert_eq!(target.name.get(), "ADA");

    target.name.set("GRACE".to_string());
    assert_eq!(source.name.get(), "grace");
    assert_eq!(target.name.get(), "GRACE");
    binding.dispose();
}

#[test]
fn test_two_way_binding_survives_writers_on_two_threads() {
    let services = services();
    let model = Node::new("model");
    let view = Node::new("view");
    let binding = BindingBuilder::with_services(&services, value(&view), "Name")
        .to("Name")
        .source(value(&model))
        .mode(BindingModeKind::TwoWay)
        .build()
        .unwrap();
    binding.set_log_errors(false);

    const WRITES: usize = 2_000;
    let finished = Arc::new(AtomicUsize::new(0));
    let writers: Vec<_> = [("model", model.clone()), ("view", view.clone())]
        .into_iter()
        .map(|(side, node)| {
            let finished = finished.clone();
            thread::spawn(move || {
                for i in 0..WRITES {
                    node.name.set(format!("{side} {i}"));
                }
                finished.fetch_add(1, Ordering::SeqCst);
            })
        })
        .collect();

    let deadline = std::time::Instant::now() + Duration::from_secs(20);
    while finished.load(Ordering::SeqCst) < 2 && std::time::Instant::now() < deadline {
        thread::sleep(Duration::from_millis(5));
    }
    assert_eq!(finished.load(Ordering::SeqCst), 2, "writers did not finish");
    for writer in writers {
        writer.join().unwrap();
    }

    // Both sides are still connected once the writers are done.
    model.name.set("settled".to_string());
    assert_eq!(view.name.get(), "settled");
    view.name.set("from view".to_string());
    assert_eq!(model.name.get(), "from view");
    binding.dispose();
}

#[test]
fn test_data_context_rebinding() {
    let services = services();
    let target = Node::new("");
    let first = Node::new("first");
    set_data_context(&value(&target), value(&first)).unwrap();

    let binding = BindingBuilder::with_services(&services, value(&target), "Name")
        .to("Name")
        .mode(BindingModeKind::OneWay)
        .build()
        .unwrap();
    assert_eq!(target.name.get(), "first");

    set_data_context(&value(&target), value(&Node::new("second"))).unwrap();
    assert_eq!(target.name.get(), "second");
    binding.dispose();
}

#[test]
fn test_duplicate_behavior_rejection() {
    let services = services();
    let source = Node::new("a");
    let target = Node::new("b");
    let binding = BindingBuilder::with_services(&services, value(&target), "Name")
        .to("Name")
        .source(value(&source))
        .build()
        .unwrap();

    let first: Arc<dyn BindingBehavior> = Arc::new(DelayBindingBehavior::new(Duration::from_millis(50)));
    let second: Arc<dyn BindingBehavior> = Arc::new(DelayBindingBehavior::new(Duration::from_millis(80)));

    assert!(binding.behaviors().add(first.clone()).unwrap());
    let len = binding.behaviors().len();
    assert!(matches!(
        binding.behaviors().add(second.clone()),
        Err(BindingError::DuplicateBehavior { .. })
    ));
    assert_eq!(binding.behaviors().len(), len);
    assert!(binding.behaviors().contains(&first));
    assert!(!binding.behaviors().contains(&second));
    binding.dispose();
}

/// A source whose reads always fail.
struct FailingAccessor;

impl SourceAccessor for FailingAccessor {
    fn get_value(&self, _target_type: Option<ValueType>) -> Result<Value> {
        Err(BindingError::evaluation("Name", "getter failed"))
    }

    fn set_value(&self, _from: &dyn SourceAccessor) -> Result<bool> {
        Ok(false)
    }

    fn sources(&self) -> &[BindingSource] {
        &[]
    }
}

#[test]
fn test_exception_isolation() {
    let services = services();
    let target = Node::new("last good");
    let observer = PathObserver::parse(
        value(&target),
        "Name",
        services.member_provider().clone(),
        ObserverOptions::default(),
    )
    .unwrap();
    let target_accessor = Arc::new(SingleSourceAccessor::new(BindingSource::new(observer)));
    let binding = DataBinding::new(target_accessor, Arc::new(FailingAccessor));
    binding.set_log_errors(false);

    let events = Arc::new(Mutex::new(Vec::new()));
    let events_clone = events.clone();
    binding.binding_exception().connect(move |event| {
        events_clone.lock().push(event.clone());
    });

    binding.update_target();

    let events = events.lock();
    assert_eq!(events.len(), 1);
    assert_eq!(events[0].action, BindingAction::UpdateTarget);
    assert_eq!(events[0].original, BindingError::evaluation("Name", "getter failed"));
    assert_eq!(target.name.get(), "last good");
}

/// An accessor that counts how often it is disposed.
struct CountingAccessor {
    disposals: Arc<AtomicUsize>,
}

impl SourceAccessor for CountingAccessor {
    fn get_value(&self, _target_type: Option<ValueType>) -> Result<Value> {
        Ok(Value::Unset)
    }

    fn set_value(&self, _from: &dyn SourceAccessor) -> Result<bool> {
        Ok(false)
    }

    fn sources(&self) -> &[BindingSource] {
        &[]
    }

    fn dispose(&self) {
        self.disposals.fetch_add(1, Ordering::SeqCst);
    }
}

/// A behavior that counts how often it is detached.
struct CountingBehavior {
    detaches: Arc<AtomicUsize>,
}

impl BindingBehavior for CountingBehavior {
    fn id(&self) -> BehaviorId {
        BehaviorId::new("Counting")
    }

    fn name(&self) -> &str {
        "counting"
    }

    fn attach(&self, _binding: &DataBinding) -> bool {
        true
    }

    fn detach(&self, _binding: &DataBinding) {
        self.detaches.fetch_add(1, Ordering::SeqCst);
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

#[test]
fn test_concurrent_dispose_runs_teardown_once() {
    let disposals = Arc::new(AtomicUsize::new(0));
    let detaches = Arc::new(AtomicUsize::new(0));
    let binding = DataBinding::new(
        Arc::new(CountingAccessor {
            disposals: disposals.clone(),
        }),
        Arc::new(CountingAccessor {
            disposals: disposals.clone(),
        }),
    );
    binding
        .behaviors()
        .add(Arc::new(CountingBehavior {
            detaches: detaches.clone(),
        }))
        .unwrap();
    binding.binding_updated().connect(|_| {});
    binding.binding_exception().connect(|_| {});

    thread::scope(|scope| {
        for _ in 0..2 {
            let binding = binding.clone();
            scope.spawn(move || binding.dispose());
        }
    });
    binding.dispose();

    assert!(binding.is_disposed());
    assert_eq!(detaches.load(Ordering::SeqCst), 1);
    assert_eq!(disposals.load(Ordering::SeqCst), 2);
    assert_eq!(binding.binding_updated().connection_count(), 0);
    assert_eq!(binding.binding_exception().connection_count(), 0);
    assert!(binding.behaviors().is_empty());
}

#[test]
fn test_weak_listener_self_neutralizes() {
    let calls = Arc::new(AtomicUsize::new(0));
    let calls_clone = calls.clone();
    let listener: Arc<dyn EventListener> = FnListener::shared(move |_, _| {
        calls_clone.fetch_add(1, Ordering::SeqCst);
    });
    let weak = to_weak(&listener);

    assert!(weak.try_handle(&Value::Null, &Value::Null));
    assert_eq!(calls.load(Ordering::SeqCst), 1);

    drop(listener);
    assert!(!weak.try_handle(&Value::Null, &Value::Null));
    weak.handle(&Value::Null, &Value::Null);
    assert_eq!(calls.load(Ordering::SeqCst), 1);
}
