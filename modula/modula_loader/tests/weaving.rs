//! Integration tests for weaving hook ordering, immutability and
//! black-listing.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use modula_core::error::WeavingError;
use modula_core::{FrameworkEvent, ModuleId};
use modula_loader::{HookError, WeavingPipeline, WovenClass, WovenClassState};
use tracing::Level;
use tracing_subscriber::FmtSubscriber;

// Initialize tracing for tests
fn init_tracing() {
    let subscriber = FmtSubscriber::builder()
        .with_max_level(Level::DEBUG)
        .finish();
    let _ = tracing::subscriber::set_global_default(subscriber);
}

fn append(byte: u8) -> impl Fn(&mut WovenClass) -> Result<(), HookError> + Send + Sync {
    move |class: &mut WovenClass| {
        let mut bytes = class.bytes().to_vec();
        bytes.push(byte);
        class.set_bytes(bytes)?;
        Ok(())
    }
}

#[test]
fn test_hooks_run_in_registration_order() {
    let pipeline = WeavingPipeline::new();
    pipeline.register("H1", append(b'X'));
    pipeline.register("H2", append(b'Y'));

    let woven = pipeline
        .weave(ModuleId::new(), "org.example.Foo", vec![0x01])
        .unwrap();
    assert_eq!(woven.bytes(), &[0x01, b'X', b'Y']);
    assert_eq!(woven.state(), WovenClassState::Transformed);
}

#[test]
fn test_bytes_are_frozen_after_the_pipeline() {
    let pipeline = WeavingPipeline::new();
    pipeline.register("H1", append(b'X'));

    let mut woven = pipeline
        .weave(ModuleId::new(), "org.example.Foo", vec![0x01])
        .unwrap();
    assert_eq!(
        woven.set_bytes(vec![0xFF]),
        Err(WeavingError::Immutable("org.example.Foo".to_string()))
    );
    assert!(matches!(
        woven.add_dynamic_import("org.late"),
        Err(WeavingError::Immutable(_))
    ));
    assert_eq!(woven.bytes(), &[0x01, b'X']);
}

#[test]
fn test_failing_hook_is_skipped_afterwards() {
    init_tracing();
    let pipeline = WeavingPipeline::new();
    let errors = pipeline.events().subscribe();
    let calls = Arc::new(AtomicUsize::new(0));
    let seen = Arc::new(Mutex::new(Vec::new()));

    let counter = calls.clone();
    let faulty = pipeline.register("faulty", move |_: &mut WovenClass| -> Result<(), HookError> {
        counter.fetch_add(1, Ordering::SeqCst);
        Err(HookError::Failed("disk full".to_string()))
    });
    let log = seen.clone();
    let healthy = pipeline.register("healthy", move |class: &mut WovenClass| -> Result<(), HookError> {
        log.lock().unwrap().push(class.class_name().to_string());
        Ok(())
    });

    let err = pipeline
        .weave(ModuleId::new(), "org.example.Foo", vec![])
        .unwrap_err();
    assert!(matches!(err, WeavingError::HookFailed { hook, .. } if hook == faulty));
    assert!(pipeline.is_blacklisted(faulty));
    assert!(seen.lock().unwrap().is_empty());
    assert!(matches!(
        errors.try_recv().unwrap(),
        FrameworkEvent::Error { ref source, .. } if source == "weaving"
    ));

    pipeline
        .weave(ModuleId::new(), "org.example.Bar", vec![])
        .unwrap();
    assert_eq!(calls.load(Ordering::SeqCst), 1);
    assert_eq!(*seen.lock().unwrap(), vec!["org.example.Bar".to_string()]);
    assert!(!pipeline.is_blacklisted(healthy));
}

#[test]
fn test_rejection_does_not_blacklist() {
    let pipeline = WeavingPipeline::new();
    let errors = pipeline.events().subscribe();
    let picky = pipeline.register("picky", |class: &mut WovenClass| -> Result<(), HookError> {
        if class.class_name().ends_with("Secret") {
            Err(HookError::Rejected("sealed".to_string()))
        } else {
            Ok(())
        }
    });

    let err = pipeline
        .weave(ModuleId::new(), "org.example.Secret", vec![])
        .unwrap_err();
    assert!(matches!(err, WeavingError::Rejected { ref reason, .. } if reason == "sealed"));
    assert!(!pipeline.is_blacklisted(picky));
    assert!(errors.try_recv().is_err());

    assert!(pipeline
        .weave(ModuleId::new(), "org.example.Public", vec![])
        .is_ok());
}

#[test]
fn test_malformed_dynamic_import_fails_fast() {
    let pipeline = WeavingPipeline::new();
    let outcome = Arc::new(Mutex::new(None));
    let record = outcome.clone();
    pipeline.register("importer", move |class: &mut WovenClass| -> Result<(), HookError> {
        let result = class.add_dynamic_import("org.weave;version=\"[1.0\"");
        *record.lock().unwrap() = Some(result.clone());
        class.add_dynamic_import("org.weave.runtime")?;
        Ok(())
    });

    let woven = pipeline
        .weave(ModuleId::new(), "org.example.Foo", vec![])
        .unwrap();
    assert!(matches!(
        outcome.lock().unwrap().clone(),
        Some(Err(WeavingError::InvalidDynamicImport { .. }))
    ));
    assert_eq!(woven.dynamic_imports(), &["org.weave.runtime".to_string()]);
}

#[test]
fn test_reentrant_weave_of_same_class_is_circular() {
    let pipeline = Arc::new(WeavingPipeline::new());
    let module = ModuleId::new();
    let nested = Arc::new(Mutex::new(None));

    let inner = Arc::downgrade(&pipeline);
    let record = nested.clone();
    pipeline.register("loads-itself", move |class: &mut WovenClass| -> Result<(), HookError> {
        if class.class_name() != "org.example.Foo" {
            return Ok(());
        }
        if let Some(pipeline) = inner.upgrade() {
            let again = pipeline.weave(class.module(), class.class_name(), vec![]);
            *record.lock().unwrap() = Some(again.map(|w| w.class_name().to_string()));
            let other = pipeline.weave(class.module(), "org.example.Helper", vec![]);
            assert!(other.is_ok());
        }
        Ok(())
    });

    assert!(pipeline.weave(module, "org.example.Foo", vec![]).is_ok());
    assert_eq!(
        nested.lock().unwrap().clone(),
        Some(Err(WeavingError::Circularity("org.example.Foo".to_string())))
    );
}
