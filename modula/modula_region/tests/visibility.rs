//! Integration tests for transitive and cyclic region visibility.

use modula_core::ModuleId;
use modula_region::filter::{VISIBLE_BUNDLE_NAMESPACE, VISIBLE_PACKAGE_NAMESPACE};
use modula_region::{Attributes, RegionDigraph, RegionFilter};
use tracing::Level;
use tracing_subscriber::FmtSubscriber;

// Initialize tracing for tests
fn init_tracing() {
    let subscriber = FmtSubscriber::builder()
        .with_max_level(Level::DEBUG)
        .finish();
    let _ = tracing::subscriber::set_global_default(subscriber);
}

fn allow_packages() -> RegionFilter {
    RegionFilter::builder()
        .allow_all(VISIBLE_PACKAGE_NAMESPACE)
        .build()
}

fn chain() -> RegionDigraph {
    let digraph = RegionDigraph::new();
    let a = digraph.create_region("A").unwrap();
    let b = digraph.create_region("B").unwrap();
    let c = digraph.create_region("C").unwrap();
    a.connect_region(&b, allow_packages()).unwrap();
    b.connect_region(&c, allow_packages()).unwrap();
    digraph
}

#[test]
fn test_transitive_visibility() {
    let digraph = chain();
    let export = Attributes::new().with("package", "org.c.api");

    assert!(digraph.is_visible("A", VISIBLE_PACKAGE_NAMESPACE, &export, "C"));
    assert!(digraph.is_visible("A", VISIBLE_PACKAGE_NAMESPACE, &export, "B"));
    assert!(!digraph.is_visible("C", VISIBLE_PACKAGE_NAMESPACE, &export, "A"));

    let visible = digraph
        .visible_regions("A", VISIBLE_PACKAGE_NAMESPACE, &export)
        .unwrap();
    assert_eq!(
        visible.into_iter().collect::<Vec<_>>(),
        vec!["A".to_string(), "B".to_string(), "C".to_string()]
    );
}

#[test]
fn test_breaking_an_edge_cuts_only_downstream() {
    let digraph = chain();
    let export = Attributes::new().with("package", "org.c.api");

    assert_eq!(digraph.disconnect("B", "C"), 1);
    assert!(!digraph.is_visible("A", VISIBLE_PACKAGE_NAMESPACE, &export, "C"));
    assert!(digraph.is_visible("A", VISIBLE_PACKAGE_NAMESPACE, &export, "B"));
}

#[test]
fn test_every_edge_on_the_path_must_admit() {
    let digraph = RegionDigraph::new();
    let a = digraph.create_region("A").unwrap();
    let b = digraph.create_region("B").unwrap();
    let c = digraph.create_region("C").unwrap();
    a.connect_region(&b, allow_packages()).unwrap();
    b.connect_region(
        &c,
        RegionFilter::builder()
            .allow(VISIBLE_PACKAGE_NAMESPACE, "(package=org.c.public)")
            .unwrap()
            .build(),
    )
    .unwrap();

    let public = Attributes::new().with("package", "org.c.public");
    let private = Attributes::new().with("package", "org.c.private");
    assert!(digraph.is_visible("A", VISIBLE_PACKAGE_NAMESPACE, &public, "C"));
    assert!(!digraph.is_visible("A", VISIBLE_PACKAGE_NAMESPACE, &private, "C"));
    assert!(!digraph.is_visible("A", VISIBLE_BUNDLE_NAMESPACE, &public, "B"));
}

#[test]
fn test_cycles_terminate_consistently() {
    let digraph = RegionDigraph::new();
    let a = digraph.create_region("A").unwrap();
    let b = digraph.create_region("B").unwrap();
    let c = digraph.create_region("C").unwrap();
    a.connect_region(&b, allow_packages()).unwrap();
    b.connect_region(&c, allow_packages()).unwrap();
    c.connect_region(&a, allow_packages()).unwrap();

    let export = Attributes::new().with("package", "p");
    for from in ["A", "B", "C"] {
        let visible = digraph
            .visible_regions(from, VISIBLE_PACKAGE_NAMESPACE, &export)
            .unwrap();
        assert_eq!(visible.len(), 3, "from {}", from);
        for owner in ["A", "B", "C"] {
            assert!(digraph.is_visible(from, VISIBLE_PACKAGE_NAMESPACE, &export, owner));
        }
        let services = digraph
            .visible_regions(from, "service", &export)
            .unwrap();
        assert_eq!(services.into_iter().collect::<Vec<_>>(), vec![from.to_string()]);
    }
}

#[test]
fn test_concurrent_queries_during_mutation() {
    init_tracing();
    let digraph = chain();
    let export = Attributes::new().with("package", "p");

    std::thread::scope(|scope| {
        let writer = digraph.clone();
        scope.spawn(move || {
            for i in 0..100 {
                let region = writer.create_region(&format!("extra-{}", i)).unwrap();
                region.add_module(ModuleId::new()).unwrap();
            }
        });
        for _ in 0..4 {
            let reader = digraph.clone();
            let export = export.clone();
            scope.spawn(move || {
                for _ in 0..100 {
                    assert!(reader.is_visible("A", VISIBLE_PACKAGE_NAMESPACE, &export, "C"));
                }
            });
        }
    });

    assert_eq!(digraph.regions().len(), 103);
}
