//! Tests for HTTP request handlers.

#[cfg(test)]
mod tests {
    use crate::config::{ServiceDefinition, SupervisorSettings};
    use crate::registry::ServiceRegistry;
    use crate::server::create_router;
    use crate::server::state::AppState;
    use crate::supervisor::{control, ProcessSupervisor};
    use axum::{
        body::Body,
        http::{Method, Request, StatusCode},
        Router,
    };
    use std::sync::Arc;
    use tower::ServiceExt;

    struct TestApp {
        router: Router,
        supervisor: Arc<ProcessSupervisor>,
    }

    impl TestApp {
        async fn new(start: bool) -> Self {
            let mut api = ServiceDefinition::new("api", "sleep 60");
            api.depends_on = vec!["db".to_string()];
            let registry = Arc::new(
                ServiceRegistry::new(vec![ServiceDefinition::new("db", "sleep 60"), api]).unwrap(),
            );
            let settings = SupervisorSettings {
                graceful_timeout_seconds: 2,
                ready_settle_ms: 100,
                ..Default::default()
            };
            let supervisor = Arc::new(ProcessSupervisor::new(registry, settings).unwrap());
            let (handle, control_loop) = control::channel(supervisor.clone());
            tokio::spawn(control_loop.run());
            if start {
                supervisor.start_all(false).await.unwrap();
            }

            let state = Arc::new(AppState::new(supervisor.clone(), handle));
            Self {
                router: create_router(state),
                supervisor,
            }
        }

        async fn call(&self, method: Method, uri: &str) -> (StatusCode, serde_json::Value) {
            let request = Request::builder()
                .method(method)
                .uri(uri)
                .body(Body::empty())
                .unwrap();
            let response = self.router.clone().oneshot(request).await.unwrap();
            let status = response.status();
            let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
                .await
                .unwrap();
            (status, serde_json::from_slice(&bytes).unwrap())
        }

        async fn shutdown(self) {
            self.supervisor.begin_shutdown();
            self.supervisor.stop_all().await;
        }
    }

    #[tokio::test]
    async fn test_health_endpoint_healthy() {
        let app = TestApp::new(true).await;

        let (status, body) = app.call(Method::GET, "/api/v1/health").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["success"], true);
        assert_eq!(body["data"]["status"], "healthy");
        assert_eq!(body["data"]["services_running"], 2);

        app.shutdown().await;
    }

    #[tokio::test]
    async fn test_health_endpoint_degraded() {
        let app = TestApp::new(false).await;

        let (status, body) = app.call(Method::GET, "/api/v1/health").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["data"]["status"], "degraded");
        assert_eq!(body["data"]["services_running"], 0);
    }

    #[tokio::test]
    async fn test_list_services() {
        let app = TestApp::new(true).await;

        let (status, body) = app.call(Method::GET, "/api/v1/services").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["data"]["total"], 2);
        assert_eq!(body["data"]["services"][0]["name"], "db");
        assert_eq!(body["data"]["services"][0]["state"], "running");

        let (_, body) = app
            .call(Method::GET, "/api/v1/services?state=stopped")
            .await;
        assert_eq!(body["data"]["total"], 0);

        app.shutdown().await;
    }

    #[tokio::test]
    async fn test_get_service_not_found() {
        let app = TestApp::new(false).await;

        let (status, body) = app.call(Method::GET, "/api/v1/services/ghost").await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(body["success"], false);
        assert_eq!(body["error"]["code"], "E002");
    }

    #[tokio::test]
    async fn test_stop_then_start_service() {
        let app = TestApp::new(true).await;

        let (status, body) = app.call(Method::POST, "/api/v1/services/api/stop").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["data"]["previous_state"], "running");
        assert_eq!(body["data"]["current_state"], "stopped");
        assert_eq!(body["data"]["stop_outcome"], "graceful");

        let (status, body) = app.call(Method::POST, "/api/v1/services/api/start").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["data"]["current_state"], "running");

        app.shutdown().await;
    }

    #[tokio::test]
    async fn test_start_without_dependency_fails() {
        let app = TestApp::new(false).await;

        let (status, body) = app.call(Method::POST, "/api/v1/services/api/start").await;
        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(body["error"]["code"], "E004");
        assert_eq!(body["error"]["details"]["dependency"], "db");
    }

    #[tokio::test]
    async fn test_restart_service() {
        let app = TestApp::new(true).await;
        let before = app.supervisor.snapshot("db").unwrap().pid;

        let (status, body) = app
            .call(Method::POST, "/api/v1/services/db/restart")
            .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["data"]["action"], "restart");
        assert_ne!(app.supervisor.snapshot("db").unwrap().pid, before);

        app.shutdown().await;
    }

    #[tokio::test]
    async fn test_actions_rejected_while_shutting_down() {
        let app = TestApp::new(false).await;
        app.supervisor.begin_shutdown();

        let (status, body) = app.call(Method::POST, "/api/v1/services/db/start").await;
        assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(body["error"]["code"], "E009");

        let (status, body) = app.call(Method::GET, "/api/v1/health").await;
        assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(body["data"]["status"], "shutting_down");
    }

    #[tokio::test]
    async fn test_unknown_action_route() {
        let app = TestApp::new(false).await;

        let request = Request::builder()
            .method(Method::POST)
            .uri("/api/v1/services/db/reload")
            .body(Body::empty())
            .unwrap();
        let response = app.router.clone().oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }
}
