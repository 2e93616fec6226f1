//! Catalog service and client over loopback TCP

use port_actors::{LinkTarget, PortError, ProxyPort, ServicePort};
use port_catalog::{CatalogClient, CatalogEntry, CatalogService};
use port_config::CatalogSettings;
use port_network::ActorUri;
use std::sync::Arc;
use std::time::Duration;

fn uri(text: &str) -> ActorUri {
    ActorUri::parse(text).unwrap()
}

async fn open_catalog(name: &str, scheme: &str, settings: CatalogSettings) -> (CatalogService, ActorUri) {
    let catalog = CatalogService::new(name, &settings).unwrap();
    let bound = catalog
        .open(&uri(&format!("{scheme}://127.0.0.1:0/catalog/{name}")))
        .await
        .unwrap();
    (catalog, bound)
}

async fn wait_for_entry(catalog: &CatalogService, name: &str) -> Option<CatalogEntry> {
    for _ in 0..50 {
        if let Some(entry) = catalog.entries().into_iter().find(|entry| entry.name == name) {
            return Some(entry);
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    None
}

#[tokio::test]
async fn test_publish_resolve_unpublish() {
    for scheme in ["tcp", "jsonrpc"] {
        let (catalog, catalog_uri) =
            open_catalog(&format!("directory-{scheme}"), scheme, CatalogSettings::default()).await;
        let client = CatalogClient::new(format!("publisher-{scheme}"));
        client.connect(catalog_uri).await.unwrap();

        let entry = CatalogEntry::new("pricing", &uri("tcp://10.1.2.3:7000/markets/pricing"))
            .with_app("pricer", "eu-1")
            .with_version("1.4.2");
        assert!(client.publish(entry.clone()).await.unwrap());
        assert_eq!(client.published(), vec!["pricing".to_string()]);

        assert_eq!(client.resolve("pricing").await.unwrap(), Some(entry));
        assert_eq!(client.resolve("orders").await.unwrap(), None);
        assert_eq!(client.list("pri").await.unwrap().len(), 1);

        assert!(client.unpublish("pricing").await.unwrap());
        assert!(!client.unpublish("pricing").await.unwrap());
        assert_eq!(client.resolve("pricing").await.unwrap(), None);
        assert!(client.published().is_empty());

        client.disconnect().await;
        catalog.disconnect().await;
    }
}

#[tokio::test]
async fn test_proxy_links_by_name_through_catalog() {
    let (catalog, catalog_uri) = open_catalog("directory-names", "tcp", CatalogSettings::default()).await;

    let greeter = ServicePort::builder("greeter")
        .on_method("greet", |name: String, _ctx| async move { Ok(format!("hello {name}")) })
        .build()
        .unwrap();
    let greeter_uri = greeter
        .open(&uri("tcp://127.0.0.1:0/people/greeter"))
        .await
        .unwrap();

    let publisher = CatalogClient::new("greeter-publisher");
    publisher.connect(catalog_uri.clone()).await.unwrap();
    publisher
        .publish(CatalogEntry::new("greeter", &greeter_uri))
        .await
        .unwrap();

    let resolver = CatalogClient::new("greeter-resolver");
    resolver.connect(catalog_uri).await.unwrap();
    let proxy = ProxyPort::builder("greeter-client")
        .resolver(Arc::new(resolver.clone()))
        .build();
    proxy.link(LinkTarget::Name("greeter".into())).unwrap();
    proxy.connect().await.unwrap();
    assert_eq!(proxy.uri(), Some(greeter_uri));

    let reply: String = proxy.request("greet", "ada".to_string()).await.unwrap();
    assert_eq!(reply, "hello ada");

    let unknown = ProxyPort::builder("nobody-client")
        .resolver(Arc::new(resolver))
        .build();
    let err = unknown
        .connect_to(LinkTarget::Name("nobody".into()))
        .await
        .unwrap_err();
    assert!(matches!(err, PortError::NameNotFound(name) if name == "nobody"));

    proxy.disconnect().await;
    greeter.disconnect().await;
    catalog.disconnect().await;
}

#[tokio::test]
async fn test_federation_stops_at_max_hop_count() {
    let (far, far_uri) = open_catalog("directory-far", "tcp", CatalogSettings::default()).await;
    let (near, near_uri) = open_catalog(
        "directory-near",
        "tcp",
        CatalogSettings {
            max_hop_count: 1,
            peers: vec![far_uri.to_string()],
            ..CatalogSettings::default()
        },
    )
    .await;
    let (origin, origin_uri) = open_catalog(
        "directory-origin",
        "tcp",
        CatalogSettings {
            max_hop_count: 1,
            peers: vec![near_uri.to_string()],
            ..CatalogSettings::default()
        },
    )
    .await;

    let client = CatalogClient::new("federation-publisher");
    client.connect(origin_uri).await.unwrap();
    client
        .publish(CatalogEntry::new("ledger", &uri("tcp://10.0.0.9:7100/books/ledger")))
        .await
        .unwrap();

    assert_eq!(origin.entries()[0].hop_count, 0);
    let forwarded = wait_for_entry(&near, "ledger").await.unwrap();
    assert_eq!(forwarded.hop_count, 1);
    assert_eq!(forwarded.uri, "tcp://10.0.0.9:7100/books/ledger");

    // near received the copy at the limit and must not pass it on
    tokio::time::sleep(Duration::from_millis(200)).await;
    assert!(far.entries().is_empty());

    client.disconnect().await;
    origin.disconnect().await;
    near.disconnect().await;
    far.disconnect().await;
}

#[tokio::test]
async fn test_refresh_keeps_entries_alive() {
    let (catalog, catalog_uri) = open_catalog("directory-refresh", "tcp", CatalogSettings::default()).await;
    let client = CatalogClient::new("refreshing-publisher");
    client.connect(catalog_uri).await.unwrap();
    client
        .publish(
            CatalogEntry::new("heartbeat", &uri("tcp://127.0.0.1:7200/ops/heartbeat"))
                .with_timeout_seconds(1),
        )
        .await
        .unwrap();

    let refresh = client.spawn_refresh(Duration::from_millis(250));
    tokio::time::sleep(Duration::from_millis(1_500)).await;
    assert!(refresh.is_running());
    assert!(client.resolve("heartbeat").await.unwrap().is_some());

    refresh.stop();
    tokio::time::sleep(Duration::from_millis(1_300)).await;
    assert!(client.resolve("heartbeat").await.unwrap().is_none());

    assert_eq!(client.refresh().await.unwrap(), 1);
    assert!(client.resolve("heartbeat").await.unwrap().is_some());

    client.disconnect().await;
    catalog.disconnect().await;
}
