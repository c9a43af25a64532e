use std::sync::Arc;

use harbor::http::request::{Method, Request, RequestBuilder};
use harbor::http::response::Response;
use harbor::server::handler::{HandlerFactory, RequestHandler, RouteTarget};
use harbor::server::routes::RouteTable;

struct Named(&'static str);

impl RequestHandler for Named {
    fn handle(&self, _request: &mut Request, response: &mut Response) -> anyhow::Result<()> {
        response.write_str(self.0)?;
        Ok(())
    }
}

/// Runs the resolved handler and returns what it wrote.
fn served_by(table: &RouteTable, uri: &str) -> Option<String> {
    let route = table.resolve(uri)?;
    let mut request = RequestBuilder::new().method(Method::GET).uri(uri).build().unwrap();
    let mut response = Response::new();
    route
        .target
        .handler_for(&request)
        .handle(&mut request, &mut response)
        .unwrap();
    Some(String::from_utf8(response.buffered().to_vec()).unwrap())
}

#[test]
fn test_longest_prefix_wins() {
    let table = RouteTable::new();
    table.register("/service", RouteTarget::handler(Named("service")));
    table.register("/service/info", RouteTarget::handler(Named("info")));

    assert_eq!(served_by(&table, "/service/info/x").as_deref(), Some("info"));
    assert_eq!(served_by(&table, "/service/other").as_deref(), Some("service"));
    assert_eq!(served_by(&table, "/service").as_deref(), Some("service"));
}

#[test]
fn test_registration_order_does_not_matter() {
    let table = RouteTable::new();
    table.register("/service/info", RouteTarget::handler(Named("info")));
    table.register("/service", RouteTarget::handler(Named("service")));

    assert_eq!(served_by(&table, "/service/info").as_deref(), Some("info"));
}

#[test]
fn test_no_match() {
    let table = RouteTable::new();
    table.register("/api", RouteTarget::handler(Named("api")));

    assert!(table.resolve("/other").is_none());
    assert!(table.resolve("/ap").is_none());
}

#[test]
fn test_root_prefix_matches_everything() {
    let table = RouteTable::new();
    table.register("/", RouteTarget::handler(Named("root")));
    table.register("/api", RouteTarget::handler(Named("api")));

    assert_eq!(served_by(&table, "/anything").as_deref(), Some("root"));
    assert_eq!(served_by(&table, "/api/v1").as_deref(), Some("api"));
}

#[test]
fn test_match_is_on_raw_uri_including_query() {
    let table = RouteTable::new();
    table.register("/search?q=", RouteTarget::handler(Named("query")));

    assert_eq!(table.resolve("/search?q=rust").unwrap().prefix, "/search?q=");
}

#[test]
fn test_re_registration_replaces() {
    let table = RouteTable::new();
    assert!(table.register("/x", RouteTarget::handler(Named("old"))).is_none());
    assert!(table.register("/x", RouteTarget::handler(Named("new"))).is_some());

    assert_eq!(table.len(), 1);
    assert_eq!(served_by(&table, "/x").as_deref(), Some("new"));
}

#[test]
fn test_unregister() {
    let table = RouteTable::new();
    table.register("/x", RouteTarget::handler(Named("x")));

    assert!(table.unregister("/x").is_some());
    assert!(table.is_empty());
    assert!(table.resolve("/x").is_none());
}

#[test]
fn test_factory_builds_handler_per_request() {
    struct EchoPath;

    impl HandlerFactory for EchoPath {
        fn new_handler(&self, request: &Request) -> Arc<dyn RequestHandler> {
            let path = request.path().to_string();
            Arc::new(move |_: &mut Request, response: &mut Response| -> anyhow::Result<()> {
                response.write_str(&path)?;
                Ok(())
            })
        }
    }

    let table = RouteTable::new();
    table.register("/f", RouteTarget::factory(EchoPath));

    assert_eq!(served_by(&table, "/f/one").as_deref(), Some("/f/one"));
    assert_eq!(served_by(&table, "/f/two").as_deref(), Some("/f/two"));
}

#[test]
fn test_concurrent_registration_keeps_every_route() {
    let table = Arc::new(RouteTable::new());

    let workers: Vec<_> = (0..8)
        .map(|i| {
            let table = Arc::clone(&table);
            std::thread::spawn(move || {
                for j in 0..25 {
                    table.register(format!("/t{i}/{j}"), RouteTarget::handler(Named("t")));
                }
            })
        })
        .collect();

    for worker in workers {
        worker.join().unwrap();
    }

    assert_eq!(table.len(), 200);
}
