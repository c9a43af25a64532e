use harbor::http::request::{Method, Request, RequestBuilder, Version};

fn get(uri: &str) -> RequestBuilder {
    RequestBuilder::new().method(Method::GET).uri(uri)
}

#[test]
fn test_request_header_retrieval() {
    let req = get("/")
        .header("Host", "example.com")
        .header("Content-Type", "application/json")
        .build()
        .unwrap();

    assert_eq!(req.header("Host"), Some("example.com"));
    assert_eq!(req.header("content-type"), Some("application/json"));
    assert_eq!(req.header("Missing"), None);
}

#[test]
fn test_request_content_length_parsing() {
    let req = RequestBuilder::new()
        .method(Method::POST)
        .uri("/api")
        .header("Content-Length", "42")
        .build()
        .unwrap();

    assert_eq!(req.content_length(), 42);
}

#[test]
fn test_request_content_length_missing() {
    let req = get("/").build().unwrap();
    assert_eq!(req.content_length(), 0);
}

#[test]
fn test_request_content_length_invalid() {
    let req = get("/").header("Content-Length", "not-a-number").build().unwrap();
    assert_eq!(req.content_length(), 0);
}

#[test]
fn test_request_keep_alive_http11_default() {
    let req = get("/").build().unwrap();
    assert!(req.keep_alive());
}

#[test]
fn test_request_keep_alive_http10_default() {
    let req = get("/").version(Version::Http10).build().unwrap();
    assert!(!req.keep_alive());

    let req = get("/")
        .version(Version::Http10)
        .header("Connection", "keep-alive")
        .build()
        .unwrap();
    assert!(req.keep_alive());
}

#[test]
fn test_request_keep_alive_close() {
    let req = get("/").header("Connection", "close").build().unwrap();
    assert!(!req.keep_alive());
}

#[test]
fn test_request_keep_alive_case_insensitive() {
    let req = get("/").header("Connection", "Keep-Alive").build().unwrap();
    assert!(req.keep_alive());
}

#[test]
fn test_request_method_from_string() {
    assert_eq!(Method::from_str("GET"), Some(Method::GET));
    assert_eq!(Method::from_str("POST"), Some(Method::POST));
    assert_eq!(Method::from_str("INVALID"), None);
    assert_eq!(Method::from_str("get"), None); // Case-sensitive
}

#[test]
fn test_request_path_and_query() {
    let req = get("/search?q=rust&page=2").build().unwrap();

    assert_eq!(req.uri(), "/search?q=rust&page=2");
    assert_eq!(req.path(), "/search");
    assert_eq!(req.query(), Some("q=rust&page=2"));
}

#[test]
fn test_request_query_parameters() {
    let req = get("/search?tag=a&tag=b&name=J%C3%BCrgen+M").build().unwrap();

    assert_eq!(req.parameter("tag"), Some("a"));
    assert_eq!(req.parameters("tag"), ["a".to_string(), "b".to_string()]);
    assert_eq!(req.parameter("name"), Some("Jürgen M"));
    assert_eq!(req.parameter("missing"), None);
    assert!(req.parameters("missing").is_empty());
}

#[test]
fn test_request_form_body_parameters() {
    let req = RequestBuilder::new()
        .method(Method::POST)
        .uri("/login?next=home")
        .header("Content-Type", "application/x-www-form-urlencoded")
        .body("user=alice&pass=s3cret")
        .build()
        .unwrap();

    assert_eq!(req.parameter("user"), Some("alice"));
    assert_eq!(req.parameter("pass"), Some("s3cret"));
    assert_eq!(req.parameter("next"), Some("home"));
    assert_eq!(req.body(), b"user=alice&pass=s3cret");
}

#[test]
fn test_request_non_form_body_is_not_parsed() {
    let req = RequestBuilder::new()
        .method(Method::POST)
        .uri("/api")
        .header("Content-Type", "application/json")
        .body("a=b")
        .build()
        .unwrap();

    assert_eq!(req.parameter("a"), None);
}

#[test]
fn test_request_attributes() {
    let mut req = get("/").build().unwrap();

    req.set_attribute("user_id", 42u32);
    assert_eq!(req.attribute::<u32>("user_id"), Some(&42));
    assert_eq!(req.attribute::<String>("user_id"), None);

    assert!(req.remove_attribute("user_id"));
    assert!(!req.remove_attribute("user_id"));
}

#[test]
fn test_request_reset_clears_everything() {
    let mut req = get("/a?x=1")
        .header("X-Trace", "abc")
        .body("payload")
        .build()
        .unwrap();
    req.set_attribute("seen", true);

    req.reset();

    assert_eq!(req.uri(), "/");
    assert!(req.headers().is_empty());
    assert!(req.body().is_empty());
    assert!(req.parameter_map().is_empty());
    assert_eq!(req.attribute::<bool>("seen"), None);
    assert_eq!(req.remote_addr(), None);
}

#[test]
fn test_request_builder_requires_method_and_uri() {
    assert!(RequestBuilder::new().uri("/").build().is_err());
    assert!(RequestBuilder::new().method(Method::GET).build().is_err());

    let req: Request = get("/").build().unwrap();
    assert_eq!(req.method(), Method::GET);
    assert_eq!(req.version(), Version::Http11);
}
