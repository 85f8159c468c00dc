//! Integration tests for the registry client against a local stub registry.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;

use tagwatch_core::{ContainerImage, ManifestOptions, Platform};
use tagwatch_registry::{
    EndpointConfig, RegistryClient, RegistryContext, StaticSecretStore, TagSortMode,
};

/// One canned HTTP response.
struct StubResponse {
    status: u16,
    body: String,
    headers: Vec<(String, String)>,
    delay: Option<Duration>,
}

impl StubResponse {
    fn json(body: impl Into<String>) -> Self {
        Self {
            status: 200,
            body: body.into(),
            headers: vec![("content-type".to_string(), "application/json".to_string())],
            delay: None,
        }
    }

    fn status(status: u16) -> Self {
        Self {
            status,
            body: String::new(),
            headers: Vec::new(),
            delay: None,
        }
    }

    fn with_header(mut self, name: &str, value: &str) -> Self {
        self.headers.push((name.to_string(), value.to_string()));
        self
    }

    fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }
}

type Responder = dyn Fn(&str, Option<&str>) -> StubResponse + Send + Sync;

/// A minimal HTTP/1.1 registry stub bound to a local port.
struct StubRegistry {
    host: String,
    base_url: String,
}

impl StubRegistry {
    async fn serve(responder: Arc<Responder>) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let address = listener.local_addr().unwrap();

        tokio::spawn(async move {
            while let Ok((stream, _)) = listener.accept().await {
                let responder = responder.clone();
                tokio::spawn(async move {
                    handle_connection(stream, responder.as_ref()).await;
                });
            }
        });

        Self {
            host: address.to_string(),
            base_url: format!("http://{address}"),
        }
    }
}

async fn handle_connection(mut stream: tokio::net::TcpStream, responder: &Responder) {
    let mut buffer = Vec::new();
    let mut chunk = [0u8; 1024];
    while !buffer.windows(4).any(|window| window == b"\r\n\r\n") {
        match stream.read(&mut chunk).await {
            Ok(0) | Err(_) => return,
            Ok(n) => buffer.extend_from_slice(&chunk[..n]),
        }
    }

    let request = String::from_utf8_lossy(&buffer);
    let path = request
        .lines()
        .next()
        .and_then(|line| line.split_whitespace().nth(1))
        .unwrap_or("/")
        .to_string();
    let authorization = request.lines().find_map(|line| {
        let (name, value) = line.split_once(':')?;
        name.eq_ignore_ascii_case("authorization")
            .then(|| value.trim().to_string())
    });

    let response = responder(&path, authorization.as_deref());
    if let Some(delay) = response.delay {
        tokio::time::sleep(delay).await;
    }

    let mut head = format!(
        "HTTP/1.1 {} stub\r\ncontent-length: {}\r\nconnection: close\r\n",
        response.status,
        response.body.len()
    );
    for (name, value) in &response.headers {
        head.push_str(&format!("{name}: {value}\r\n"));
    }
    head.push_str("\r\n");

    let _ = stream.write_all(head.as_bytes()).await;
    let _ = stream.write_all(response.body.as_bytes()).await;
    let _ = stream.shutdown().await;
}

async fn client_for(stub: &StubRegistry, sort_mode: TagSortMode) -> (RegistryContext, RegistryClient) {
    let context = RegistryContext::new(Arc::new(StaticSecretStore::new()));
    context.endpoints().add_endpoint(
        EndpointConfig::new("stub", stub.host.clone(), stub.base_url.clone())
            .with_tag_sort_mode(sort_mode),
    );

    let image = ContainerImage::parse(&format!("{}/testorg/app:1.0.0", stub.host)).unwrap();
    let client = context.client_for(&image).await.unwrap();
    (context, client)
}

#[tokio::test]
async fn test_tags_returns_list() {
    let stub = StubRegistry::serve(Arc::new(|path: &str, _auth: Option<&str>| {
        assert_eq!(path, "/v2/testorg/app/tags/list");
        StubResponse::json(r#"{"name":"testorg/app","tags":["1.0.0","1.1.0","2.0.0"]}"#)
    }))
    .await;

    let (_context, client) = client_for(&stub, TagSortMode::Unsorted).await;
    let tags = client.tags().await.unwrap();
    assert_eq!(tags, vec!["1.0.0", "1.1.0", "2.0.0"]);
}

#[tokio::test]
async fn test_tags_not_found_is_empty() {
    let stub = StubRegistry::serve(Arc::new(|_path: &str, _auth: Option<&str>| {
        StubResponse::status(404)
    }))
    .await;

    let (_context, client) = client_for(&stub, TagSortMode::Unsorted).await;
    assert!(client.tags().await.unwrap().is_empty());
}

#[tokio::test]
async fn test_latest_first_tags_are_normalized() {
    let stub = StubRegistry::serve(Arc::new(|_path: &str, _auth: Option<&str>| {
        StubResponse::json(r#"{"name":"testorg/app","tags":["3.0.0","2.0.0","1.0.0"]}"#)
    }))
    .await;

    let (_context, client) = client_for(&stub, TagSortMode::LatestFirst).await;
    let tags = client.tags().await.unwrap();
    assert_eq!(tags, vec!["1.0.0", "2.0.0", "3.0.0"]);
}

#[tokio::test]
async fn test_concurrent_tags_share_one_fetch() {
    let hits = Arc::new(AtomicUsize::new(0));
    let counter = hits.clone();
    let stub = StubRegistry::serve(Arc::new(move |_path: &str, _auth: Option<&str>| {
        counter.fetch_add(1, Ordering::SeqCst);
        StubResponse::json(r#"{"name":"testorg/app","tags":["1.0.0"]}"#)
            .with_delay(Duration::from_millis(100))
    }))
    .await;

    let (_context, client) = client_for(&stub, TagSortMode::Unsorted).await;
    let mut calls = Vec::new();
    for _ in 0..8 {
        let client = client.clone();
        calls.push(async move { client.tags().await });
    }

    let results = futures::future::join_all(calls).await;
    for result in results {
        assert_eq!(result.unwrap(), vec!["1.0.0"]);
    }
    assert_eq!(hits.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_bearer_token_handshake_and_cache() {
    let token_hits = Arc::new(AtomicUsize::new(0));
    let counter = token_hits.clone();
    let stub_holder: Arc<parking_lot::RwLock<String>> =
        Arc::new(parking_lot::RwLock::new(String::new()));
    let realm_base = stub_holder.clone();

    let stub = StubRegistry::serve(Arc::new(move |path: &str, auth: Option<&str>| {
        if path.starts_with("/token") {
            counter.fetch_add(1, Ordering::SeqCst);
            return StubResponse::json(r#"{"token":"stub-token","expires_in":300}"#);
        }
        match auth {
            Some("Bearer stub-token") => {
                StubResponse::json(r#"{"name":"testorg/app","tags":["1.0.0","1.1.0"]}"#)
            }
            _ => StubResponse::status(401).with_header(
                "www-authenticate",
                &format!(
                    r#"Bearer realm="{}/token",service="stub-registry",scope="repository:testorg/app:pull""#,
                    realm_base.read()
                ),
            ),
        }
    }))
    .await;
    *stub_holder.write() = stub.base_url.clone();

    let (_context, client) = client_for(&stub, TagSortMode::Unsorted).await;

    let tags = client.tags().await.unwrap();
    assert_eq!(tags, vec!["1.0.0", "1.1.0"]);
    assert_eq!(token_hits.load(Ordering::SeqCst), 1);

    // The token is cached per repository: a second fetch authenticates
    // without another handshake.
    let tags = client.tags().await.unwrap();
    assert_eq!(tags, vec!["1.0.0", "1.1.0"]);
    assert_eq!(token_hits.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_tag_metadata_schema2() {
    let stub = StubRegistry::serve(Arc::new(|path: &str, _auth: Option<&str>| match path {
        "/v2/testorg/app/manifests/1.0.0" => StubResponse::json(
            r#"{"schemaVersion":2,"config":{"mediaType":"application/vnd.docker.container.image.v1+json","digest":"sha256:cfg","size":100}}"#,
        )
        .with_header(
            "content-type",
            "application/vnd.docker.distribution.manifest.v2+json",
        )
        .with_header("docker-content-digest", "sha256:parent"),
        "/v2/testorg/app/blobs/sha256:cfg" => StubResponse::json(
            r#"{"created":"2024-05-01T00:00:00Z","os":"linux","architecture":"amd64"}"#,
        ),
        other => panic!("unexpected request: {other}"),
    }))
    .await;

    let (_context, client) = client_for(&stub, TagSortMode::Unsorted).await;
    let manifest = client.manifest_for_tag("1.0.0").await.unwrap();
    assert_eq!(manifest.digest, "sha256:parent");

    let info = client
        .tag_metadata(&manifest, &ManifestOptions::new())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(info.digest, "sha256:parent");
    assert_eq!(info.created_at.to_rfc3339(), "2024-05-01T00:00:00+00:00");
}

#[tokio::test]
async fn test_tag_metadata_platform_mismatch_is_none() {
    let stub = StubRegistry::serve(Arc::new(|path: &str, _auth: Option<&str>| match path {
        "/v2/testorg/app/manifests/1.0.0" => StubResponse::json(
            r#"{"schemaVersion":2,"config":{"digest":"sha256:cfg","size":100}}"#,
        )
        .with_header(
            "content-type",
            "application/vnd.docker.distribution.manifest.v2+json",
        ),
        "/v2/testorg/app/blobs/sha256:cfg" => StubResponse::json(
            r#"{"created":"2024-05-01T00:00:00Z","os":"linux","architecture":"amd64"}"#,
        ),
        other => panic!("unexpected request: {other}"),
    }))
    .await;

    let (_context, client) = client_for(&stub, TagSortMode::Unsorted).await;
    let manifest = client.manifest_for_tag("1.0.0").await.unwrap();

    let options = ManifestOptions::new().with_platform(Platform::parse("linux/s390x").unwrap());
    let info = client.tag_metadata(&manifest, &options).await.unwrap();
    assert!(info.is_none());
}

#[tokio::test]
async fn test_tag_metadata_list_keeps_newest_reference() {
    let stub = StubRegistry::serve(Arc::new(|path: &str, _auth: Option<&str>| match path {
        "/v2/testorg/app/manifests/latest" => StubResponse::json(
            r#"{
                "mediaType": "application/vnd.oci.image.index.v1+json",
                "manifests": [
                    {"digest": "sha256:amd", "platform": {"os": "linux", "architecture": "amd64"}},
                    {"digest": "sha256:arm", "platform": {"os": "linux", "architecture": "arm64"}}
                ]
            }"#,
        )
        .with_header("content-type", "application/vnd.oci.image.index.v1+json")
        .with_header("docker-content-digest", "sha256:parent"),
        "/v2/testorg/app/manifests/sha256:amd" => StubResponse::json(
            r#"{"schemaVersion":2,"config":{"digest":"sha256:cfg-amd","size":10}}"#,
        )
        .with_header("content-type", "application/vnd.oci.image.manifest.v1+json"),
        "/v2/testorg/app/manifests/sha256:arm" => StubResponse::json(
            r#"{"schemaVersion":2,"config":{"digest":"sha256:cfg-arm","size":10}}"#,
        )
        .with_header("content-type", "application/vnd.oci.image.manifest.v1+json"),
        "/v2/testorg/app/blobs/sha256:cfg-amd" => StubResponse::json(
            r#"{"created":"2024-01-01T00:00:00Z","os":"linux","architecture":"amd64"}"#,
        ),
        "/v2/testorg/app/blobs/sha256:cfg-arm" => StubResponse::json(
            r#"{"created":"2024-06-01T00:00:00Z","os":"linux","architecture":"arm64"}"#,
        ),
        other => panic!("unexpected request: {other}"),
    }))
    .await;

    let (_context, client) = client_for(&stub, TagSortMode::Unsorted).await;
    let manifest = client.manifest_for_tag("latest").await.unwrap();
    assert!(manifest.is_list());

    // The most recently pushed architecture wins; the digest stays the
    // parent list digest.
    let info = client
        .tag_metadata(&manifest, &ManifestOptions::new())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(info.digest, "sha256:parent");
    assert_eq!(info.created_at.to_rfc3339(), "2024-06-01T00:00:00+00:00");
}

#[tokio::test]
async fn test_tag_metadata_list_filters_platforms() {
    let stub = StubRegistry::serve(Arc::new(|path: &str, _auth: Option<&str>| match path {
        "/v2/testorg/app/manifests/latest" => StubResponse::json(
            r#"{
                "mediaType": "application/vnd.oci.image.index.v1+json",
                "manifests": [
                    {"digest": "sha256:amd", "platform": {"os": "linux", "architecture": "amd64"}},
                    {"digest": "sha256:arm", "platform": {"os": "linux", "architecture": "arm64"}}
                ]
            }"#,
        )
        .with_header("content-type", "application/vnd.oci.image.index.v1+json")
        .with_header("docker-content-digest", "sha256:parent"),
        "/v2/testorg/app/manifests/sha256:amd" => StubResponse::json(
            r#"{"schemaVersion":2,"config":{"digest":"sha256:cfg-amd","size":10}}"#,
        )
        .with_header("content-type", "application/vnd.oci.image.manifest.v1+json"),
        "/v2/testorg/app/blobs/sha256:cfg-amd" => StubResponse::json(
            r#"{"created":"2024-01-01T00:00:00Z","os":"linux","architecture":"amd64"}"#,
        ),
        other => panic!("unexpected request: {other}"),
    }))
    .await;

    let (_context, client) = client_for(&stub, TagSortMode::Unsorted).await;
    let manifest = client.manifest_for_tag("latest").await.unwrap();

    // Only the amd64 reference is inspected; the arm64 child is never
    // fetched (the stub would panic on it).
    let options = ManifestOptions::new().with_platform(Platform::parse("linux/amd64").unwrap());
    let info = client
        .tag_metadata(&manifest, &options)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(info.created_at.to_rfc3339(), "2024-01-01T00:00:00+00:00");
}

#[tokio::test]
async fn test_ping_accepts_any_http_response() {
    let stub = StubRegistry::serve(Arc::new(|path: &str, _auth: Option<&str>| {
        assert_eq!(path, "/v2/");
        StubResponse::status(401)
    }))
    .await;

    let (_context, client) = client_for(&stub, TagSortMode::Unsorted).await;
    client.ping().await.unwrap();
}
