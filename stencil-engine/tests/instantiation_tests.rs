//! End-to-end instantiation tests against an in-memory backend

mod common;

use common::*;
use std::sync::Arc;
use stencil_common::{ResourceKey, ResourceKind, TemplateResource, VariableBinding};
use stencil_engine::config::EngineConfig;
use stencil_engine::preview::{PreviewOutcome, PreviewPhase};
use stencil_engine::{InstantiateError, InstantiationSession, SelectionError};

#[tokio::test]
async fn test_instantiate_two_namespaces() {
    let backend = Arc::new(
        FakeBackend::new()
            .with_version(VERSION, plain_resources())
            .with_variables("a", vec![VariableBinding::new("replicas", 3i64)])
            .with_variables("b", vec![VariableBinding::new("replicas", 1i64)]),
    );
    let session = session_with(backend.clone(), &["a", "b"]).await;
    session.select_namespace("a", true).await.unwrap();
    session.select_namespace("b", true).await.unwrap();

    let report = session.detect_conflicts().await.unwrap();
    assert!(report.is_empty());

    match session.focus_namespace("a").await.unwrap() {
        PreviewOutcome::Rendered(manifests) => {
            assert!(manifests[0].content.contains("replicas: 3\n"))
        }
        other => panic!("Expected rendered preview, got {:?}", other),
    }

    let manifests = session
        .set_variable("a", "replicas", Some(5i64.into()))
        .await
        .unwrap();
    assert!(manifests[0].content.contains("replicas: 5\n"));
    assert_eq!(CallCounts::get(&backend.calls.preview), 1);

    session.focus_namespace("b").await.unwrap();

    let result = session.submit().await.unwrap();
    assert!(result.is_complete());
    assert_eq!(result.succeeded, vec!["a".to_string(), "b".to_string()]);

    let submissions = backend.submissions.lock().unwrap();
    assert_eq!(submissions.len(), 1);
    let payload = &submissions[0];
    assert_eq!(payload.template_set_version_id, VERSION);
    assert_eq!(payload.namespace_ids, vec!["a".to_string(), "b".to_string()]);
    assert_eq!(
        payload.resources,
        vec![
            ResourceKey::new(ResourceKind::Deployment, "1"),
            ResourceKey::new(ResourceKind::Service, "2"),
        ]
    );
    assert_eq!(payload.variables["a"]["replicas"], "5");
    assert_eq!(payload.variables["b"]["replicas"], "1");
    assert!(payload.load_balancers.is_none());
}

#[tokio::test]
async fn test_submit_without_namespaces_sends_nothing() {
    let backend = Arc::new(FakeBackend::new().with_version(VERSION, plain_resources()));
    let session = session_with(backend.clone(), &["a"]).await;

    let err = session.submit().await.unwrap_err();
    assert!(matches!(
        err,
        InstantiateError::Selection(SelectionError::NoNamespacesSelected)
    ));
    assert_eq!(CallCounts::get(&backend.calls.submit), 0);
}

#[tokio::test]
async fn test_submit_without_version_sends_nothing() {
    let backend = Arc::new(FakeBackend::new());
    let session = InstantiationSession::new(backend.clone(), EngineConfig::default());

    let err = session.assemble().await.unwrap_err();
    assert_eq!(err, SelectionError::NoVersionSelected);
    assert_eq!(CallCounts::get(&backend.calls.submit), 0);
}

#[tokio::test]
async fn test_conflicting_namespace_blocks_submission() {
    let backend = Arc::new(
        FakeBackend::new()
            .with_version(VERSION, plain_resources())
            .with_existing("b", ResourceKind::Deployment, "web"),
    );
    let session = session_with(backend.clone(), &["a", "b"]).await;

    let report = session.detect_conflicts().await.unwrap();
    assert!(!report.is_blocked("a"));
    assert!(report.is_blocked("b"));
    assert_eq!(session.conflicts_for("b").await.len(), 1);

    session.select_namespace("a", true).await.unwrap();
    session.select_namespace("b", true).await.unwrap();
    let err = session.submit().await.unwrap_err();
    match err {
        InstantiateError::Selection(SelectionError::ConflictingResources { namespace, resources }) => {
            assert_eq!(namespace, "b");
            assert_eq!(resources[0].name, "web");
        }
        other => panic!("Expected conflict, got {:?}", other),
    }
    assert_eq!(CallCounts::get(&backend.calls.submit), 0);

    // Dropping the clashing deployment clears the index for the new selection
    session
        .set_resource_selected(&ResourceKey::new(ResourceKind::Deployment, "1"), false)
        .await
        .unwrap();
    let report = session.detect_conflicts().await.unwrap();
    assert!(report.is_empty());
    assert_eq!(CallCounts::get(&backend.calls.existing_resources), 2);

    session.submit().await.unwrap();
    let submissions = backend.submissions.lock().unwrap();
    assert_eq!(
        submissions[0].resources,
        vec![ResourceKey::new(ResourceKind::Service, "2")]
    );
}

#[tokio::test]
async fn test_reselected_resource_is_checked_again_before_submit() {
    let backend = Arc::new(
        FakeBackend::new()
            .with_version(VERSION, plain_resources())
            .with_existing("a", ResourceKind::Deployment, "web"),
    );
    let session = session_with(backend.clone(), &["a"]).await;
    session.detect_conflicts().await.unwrap();

    let service = ResourceKey::new(ResourceKind::Service, "2");
    session.set_resource_selected(&service, false).await.unwrap();
    session.set_resource_selected(&service, true).await.unwrap();
    session.select_namespace("a", true).await.unwrap();

    // The selection change emptied the index; assembling alone cannot vouch for a
    let err = session.assemble().await.unwrap_err();
    assert_eq!(err, SelectionError::ConflictsUnchecked("a".to_string()));

    let err = session.submit().await.unwrap_err();
    match err {
        InstantiateError::Selection(SelectionError::ConflictingResources { namespace, resources }) => {
            assert_eq!(namespace, "a");
            assert_eq!(resources[0].name, "web");
        }
        other => panic!("Expected conflict, got {:?}", other),
    }
    assert_eq!(CallCounts::get(&backend.calls.existing_resources), 2);
    assert_eq!(CallCounts::get(&backend.calls.submit), 0);
}

#[tokio::test]
async fn test_submit_checks_unchecked_namespaces() {
    let backend = Arc::new(FakeBackend::new().with_version(VERSION, plain_resources()));
    let session = session_with(backend.clone(), &["a", "b"]).await;
    session.select_namespace("a", true).await.unwrap();

    session.submit().await.unwrap();
    assert_eq!(CallCounts::get(&backend.calls.existing_resources), 1);
    assert_eq!(CallCounts::get(&backend.calls.submit), 1);
}

#[tokio::test]
async fn test_failed_check_before_submit_sends_nothing() {
    let backend = Arc::new(FakeBackend::new().with_version(VERSION, plain_resources()));
    backend
        .fail_existing
        .store(true, std::sync::atomic::Ordering::SeqCst);
    let session = session_with(backend.clone(), &["a"]).await;
    session.select_namespace("a", true).await.unwrap();

    let err = session.submit().await.unwrap_err();
    assert!(matches!(err, InstantiateError::ConflictFetch(_)));
    assert_eq!(CallCounts::get(&backend.calls.submit), 0);
}

#[tokio::test]
async fn test_conflict_check_runs_once_per_selection() {
    let backend = Arc::new(FakeBackend::new().with_version(VERSION, plain_resources()));
    let session = session_with(backend.clone(), &["a", "b"]).await;

    session.detect_conflicts().await.unwrap();
    session.detect_conflicts().await.unwrap();
    session.focus_namespace("a").await.unwrap();
    assert_eq!(CallCounts::get(&backend.calls.existing_resources), 1);
}

#[tokio::test]
async fn test_unresolved_load_balancer_blocks_submission() {
    let backend = Arc::new(
        FakeBackend::new()
            .with_version(VERSION, lb_resources())
            .with_load_balancers(CLUSTER, &[10]),
    );
    let session = session_with(backend.clone(), &["a", "b"]).await;
    session.detect_conflicts().await.unwrap();
    session.select_namespace("a", true).await.unwrap();
    session.select_namespace("b", true).await.unwrap();
    session.assign_load_balancer("a", "web-lb", 10).await.unwrap();

    let err = session.assemble().await.unwrap_err();
    assert_eq!(
        err,
        SelectionError::UnresolvedLoadBalancers {
            namespace: "b".to_string(),
            services: vec!["web-lb".to_string()],
        }
    );

    session.assign_load_balancer("b", "web-lb", 10).await.unwrap();
    let payload = session.assemble().await.unwrap();
    let load_balancers = payload.load_balancers.unwrap();
    assert_eq!(load_balancers["a"]["web-lb"], 10);
    assert_eq!(load_balancers["b"]["web-lb"], 10);

    let err = session.assign_load_balancer("a", "web", 10).await.unwrap_err();
    assert_eq!(err, SelectionError::UnknownResource("web".to_string()));
}

#[tokio::test]
async fn test_version_switch_discards_bindings_and_previews() {
    let backend = Arc::new(
        FakeBackend::new()
            .with_version(VERSION, plain_resources())
            .with_version(
                "v2",
                vec![TemplateResource::new(ResourceKind::ConfigMap, "9", "settings")],
            )
            .with_variables("a", vec![VariableBinding::new("replicas", 3i64)]),
    );
    let session = session_with(backend.clone(), &["a"]).await;
    session.focus_namespace("a").await.unwrap();
    session
        .set_variable("a", "replicas", Some("7".into()))
        .await
        .unwrap();

    let version = session.select_version("v2").await.unwrap();
    assert_eq!(version.resources.len(), 1);
    assert_eq!(session.selected_resources().await.len(), 1);
    assert!(session.variables("a").await.is_empty());
    assert!(session.preview("a").await.is_none());
    assert_eq!(session.phase("a").await, PreviewPhase::Idle);
    assert_eq!(session.focused_namespace().await, None);

    session.focus_namespace("a").await.unwrap();
    assert_eq!(CallCounts::get(&backend.calls.namespace_variables), 2);
    assert_eq!(session.variables("a").await[0].raw_value(), "3");
}

#[tokio::test]
async fn test_unknown_version_is_a_fetch_error() {
    let backend = Arc::new(FakeBackend::new());
    let session = InstantiationSession::new(backend, EngineConfig::default());

    let err = session.select_version("missing").await.unwrap_err();
    assert!(matches!(err, InstantiateError::TemplateFetch { ref version, .. } if version == "missing"));
    assert!(err.is_fetch_error());
    assert!(session.version().await.is_none());
}

#[tokio::test]
async fn test_resource_selection_is_validated() {
    let backend = Arc::new(FakeBackend::new().with_version(VERSION, plain_resources()));
    let session = session_with(backend, &["a"]).await;

    let err = session
        .set_resource_selected(&ResourceKey::new(ResourceKind::Secret, "1"), true)
        .await
        .unwrap_err();
    assert_eq!(err, SelectionError::UnknownResource("Secret-1".to_string()));

    for resource in plain_resources() {
        session.set_resource_selected(&resource.key(), false).await.unwrap();
    }
    let err = session.focus_namespace("a").await.unwrap_err();
    assert!(matches!(
        err,
        InstantiateError::Selection(SelectionError::NoResourcesSelected)
    ));
}

#[tokio::test]
async fn test_removed_candidate_is_deselected() {
    let backend = Arc::new(FakeBackend::new().with_version(VERSION, plain_resources()));
    let session = session_with(backend, &["a", "b"]).await;
    session.select_namespace("a", true).await.unwrap();
    session.select_namespace("b", true).await.unwrap();

    session.set_candidates(namespaces(&["b"])).await;
    assert_eq!(session.selected_namespaces().await, vec!["b".to_string()]);

    let err = session.select_namespace("a", true).await.unwrap_err();
    assert_eq!(err, SelectionError::UnknownNamespace("a".to_string()));
}
