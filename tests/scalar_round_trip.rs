//! End-to-end scalar round-trip (scenario S1): a server item is created,
//! a client subscribes and observes it, and a server-side mutation is
//! observed by the client. Wires a real server/client pair together over
//! the pair-socket backend on a loopback TCP port, the same style
//! `transport::pair`'s own unit tests use.

use std::sync::mpsc;
use std::time::Duration;

use tweak::config::ContextConfig;
use tweak::{ClientContext, Listeners, ServerContext, TweakId, Variant};

enum ClientEvent {
    Connected(bool),
    NewItem(TweakId),
    ValueChanged(TweakId, Variant),
}

fn noop_listeners() -> Listeners {
    Listeners {
        on_connection_status_changed: Box::new(|_| {}),
        on_new_item: Box::new(|_| {}),
        on_item_removed: Box::new(|_| {}),
        on_current_value_changed: Box::new(|_, _| {}),
    }
}

#[test]
fn server_item_round_trips_to_subscribed_client() {
    let port = 38421;
    let endpoint = format!("127.0.0.1:{port}");
    let server_config = ContextConfig::parse("nng", "role=server", &endpoint).unwrap();
    let client_config = ContextConfig::parse("nng", "role=client", &endpoint).unwrap();

    let server_handle = std::thread::spawn(move || ServerContext::create(&server_config, noop_listeners()).unwrap());
    std::thread::sleep(Duration::from_millis(50));

    let (tx, rx) = mpsc::channel();
    let new_item_tx = tx.clone();
    let changed_tx = tx.clone();
    let connected_tx = tx.clone();
    let client_listeners = Listeners {
        on_connection_status_changed: Box::new(move |connected| {
            connected_tx.send(ClientEvent::Connected(connected)).ok();
        }),
        on_new_item: Box::new(move |id| {
            new_item_tx.send(ClientEvent::NewItem(id)).ok();
        }),
        on_item_removed: Box::new(|_| {}),
        on_current_value_changed: Box::new(move |id, value| {
            changed_tx.send(ClientEvent::ValueChanged(id, value)).ok();
        }),
    };
    let client = ClientContext::create(&client_config, client_listeners).unwrap();
    let server = server_handle.join().unwrap();

    assert!(matches!(rx.recv_timeout(Duration::from_secs(1)).unwrap(), ClientEvent::Connected(true)));

    // Give the client's Subscribe round-trip a head start so the server's
    // subscribe-time walk sees this item directly; `add_item`'s own Append
    // job would otherwise still deliver it moments later regardless.
    std::thread::sleep(Duration::from_millis(50));

    let server_id = server.add_item("/a/b", "gain", "", Variant::F64(1.0), None);
    assert_ne!(server_id, 0);

    let ids = client.wait_uris(&["/a/b".to_string()], Duration::from_secs(1)).unwrap();
    let client_id = ids[0];

    assert!(matches!(rx.recv_timeout(Duration::from_secs(1)).unwrap(), ClientEvent::NewItem(id) if id == client_id));

    let snapshot = client.get_snapshot(client_id).unwrap();
    assert_eq!(snapshot.current_value, Variant::F64(1.0));

    server.replace_current_value(server_id, Variant::F64(2.5)).unwrap();

    loop {
        match rx.recv_timeout(Duration::from_secs(1)).unwrap() {
            ClientEvent::ValueChanged(id, value) if id == client_id => {
                assert_eq!(value, Variant::F64(2.5));
                break;
            }
            _ => continue,
        }
    }

    let snapshot = client.get_snapshot(client_id).unwrap();
    assert_eq!(snapshot.current_value, Variant::F64(2.5));

    client.destroy();
    server.destroy();
}
