//! Tests that the prelude covers a typical view-model binding.

use std::sync::Arc;

use parking_lot::Mutex;
use trellis::prelude::*;

#[derive(Bindable)]
struct Settings {
    volume: Property<i32>,

    #[event]
    saved: Signal<()>,
}

#[derive(Bindable)]
struct Slider {
    #[bind(name = "Value")]
    position: Property<i32>,
}

#[test]
fn test_prelude_binding() {
    let services = BindingServices::new();
    Settings::register_bindable(services.member_provider());
    Slider::register_bindable(services.member_provider());

    let settings = Arc::new(Settings {
        volume: Property::new(3),
        saved: Signal::new(),
    });
    let slider = Arc::new(Slider {
        position: Property::new(0),
    });

    let updates = Arc::new(Mutex::new(Vec::new()));
    let binding = BindingBuilder::with_services(&services, Value::from_arc(slider.clone()), "Value")
        .to("Volume")
        .source(Value::from_arc(settings.clone()))
        .build()
        .unwrap();
    let updates_clone = updates.clone();
    binding.binding_updated().connect(move |event| {
        updates_clone.lock().push(event.action);
    });

    assert_eq!(slider.position.get(), 3);

    slider.position.set(7);
    assert_eq!(settings.volume.get(), 7);

    settings.volume.set(9);
    assert_eq!(slider.position.get(), 9);

    let updates = updates.lock();
    assert!(updates.contains(&BindingAction::UpdateSource));
    assert!(updates.contains(&BindingAction::UpdateTarget));
    assert_eq!(Settings::BINDING_MEMBER_NAMES, &["Volume", "Saved"]);

    settings.saved.emit(());
    binding.dispose();
}
