use entity_repo_server::config::AppConfig;
use entity_repo_server::logic::ContainerMetadataCache;
use entity_repo_server::{build_app, build_state};
use reqwest::{Client, Method, StatusCode};
use serde_json::{json, Value};
use tokio::net::TcpListener;

// Test client wrapper for making API calls
struct TestClient {
    client: Client,
    base_url: String,
}

impl TestClient {
    /// Boot the service on an ephemeral port and point a client at it
    async fn spawn() -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let address = listener.local_addr().unwrap();

        let mut config = AppConfig::default();
        config.server.port = address.port();
        let base_url = config.service_root();

        let state = build_state(config, &ContainerMetadataCache::new()).unwrap();
        tokio::spawn(async move {
            axum::serve(listener, build_app(state)).await.unwrap();
        });

        Self {
            client: Client::new(),
            base_url,
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}/{}", self.base_url, path)
    }

    async fn get(&self, path: &str) -> reqwest::Result<reqwest::Response> {
        self.client.get(self.url(path)).send().await
    }

    async fn send(&self, method: Method, path: &str, json: Value) -> reqwest::Result<reqwest::Response> {
        self.client.request(method, self.url(path)).json(&json).send().await
    }

    async fn delete(&self, path: &str) -> reqwest::Result<reqwest::Response> {
        self.client.delete(self.url(path)).send().await
    }
}

#[tokio::test]
async fn test_work_item_lifecycle() {
    let client = TestClient::spawn().await;

    // Create a bug through the derived type annotation
    let response = client
        .send(
            Method::POST,
            "WorkItems",
            json!({"@odata.type": "#Scrum.Bug", "Title": "Totals are rounded twice", "PriorityId": 4}),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::CREATED);
    let location = response.headers()["location"].to_str().unwrap().to_string();
    assert_eq!(location, client.url("WorkItems(3)"));
    let created: Value = response.json().await.unwrap();
    assert_eq!(created["@odata.type"], "#Scrum.Bug");

    // Partial update, both as PATCH and as the older MERGE verb
    let response = client
        .send(Method::PATCH, "WorkItems(3)", json!({"StatusId": 2}))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let merge = Method::from_bytes(b"MERGE").unwrap();
    let response = client
        .send(merge, "WorkItems(3)", json!({"ReproSteps": "Open an invoice"}))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let bug: Value = client.get("WorkItems(3)").await.unwrap().json().await.unwrap();
    assert_eq!(bug["StatusId"], 2);
    assert_eq!(bug["ReproSteps"], "Open an invoice");
    assert_eq!(bug["Title"], "Totals are rounded twice");

    // Replace then delete
    let response = client
        .send(Method::PUT, "WorkItems(3)", json!({"@odata.type": "#Scrum.Bug", "Title": "Rounding"}))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let replaced: Value = response.json().await.unwrap();
    assert_eq!(replaced["Id"], 3);
    assert!(replaced.get("StatusId").is_none());

    let response = client.delete("WorkItems(3)").await.unwrap();
    assert_eq!(response.status(), StatusCode::NO_CONTENT);
    let response = client.get("WorkItems(3)").await.unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_navigation_post_links_new_owner() {
    let client = TestClient::spawn().await;

    let response = client
        .send(Method::POST, "Projects(2)/Owners", json!({"UserName": "erin"}))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::CREATED);
    assert_eq!(response.headers()["location"], client.url("Users(4)").as_str());

    let owners: Value = client.get("Projects(2)/Owners").await.unwrap().json().await.unwrap();
    let names: Vec<_> = owners["value"]
        .as_array()
        .unwrap()
        .iter()
        .map(|owner| owner["UserName"].as_str().unwrap().to_string())
        .collect();
    assert_eq!(names, vec!["carol", "erin"]);
}

#[tokio::test]
async fn test_batch_creates_and_links_in_order() {
    let client = TestClient::spawn().await;

    let batch = json!({
        "requests": [
            {"id": "p", "method": "POST", "url": "Projects", "body": {"Name": "Analytics"}},
            {"id": "a", "method": "POST", "url": "$p/Areas", "body": {"Name": "Dashboards"}},
            {"id": "r", "method": "GET", "url": "$p/Areas"},
            {"id": "x", "method": "DELETE", "url": "Projects"}
        ]
    });
    let response = client.send(Method::POST, "$batch", batch).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let body: Value = response.json().await.unwrap();
    let responses = body["responses"].as_array().unwrap();
    assert_eq!(responses[0]["status"], 201);
    assert_eq!(responses[1]["status"], 201);
    assert_eq!(responses[1]["location"], client.url("ProjectAreas(2)"));
    assert_eq!(responses[2]["body"]["value"][0]["Name"], "Dashboards");
    assert_eq!(responses[3]["status"], 404);
}

#[tokio::test]
async fn test_metadata_and_service_document() {
    let client = TestClient::spawn().await;

    let response = client.get("$metadata").await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let etag = response.headers()["etag"].to_str().unwrap().to_string();
    let metadata: Value = response.json().await.unwrap();
    assert!(!metadata.to_string().contains("RuntimeType"));

    let response = client
        .client
        .get(client.url("$metadata"))
        .header("If-None-Match", etag)
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NOT_MODIFIED);

    let document: Value = client.get("").await.unwrap().json().await.unwrap();
    assert_eq!(document["value"].as_array().unwrap().len(), 12);
}
