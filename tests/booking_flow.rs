use std::net::SocketAddr;
use std::sync::Arc;

use tokio::net::TcpListener;
use tokio_postgres::{Config, NoTls, SimpleQueryMessage};
use ulid::Ulid;

use bunkd::tenant::TenantManager;
use bunkd::wire;

// ── Test infrastructure ──────────────────────────────────────

async fn start_test_server() -> (SocketAddr, Arc<TenantManager>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    let dir = std::env::temp_dir().join(format!("bunkd_int_test_{}", Ulid::new()));
    std::fs::create_dir_all(&dir).unwrap();
    let tm = Arc::new(TenantManager::new(dir, 1000));

    let tm2 = tm.clone();
    tokio::spawn(async move {
        loop {
            let (socket, _) = match listener.accept().await {
                Ok(conn) => conn,
                Err(_) => break,
            };
            let tm = tm2.clone();
            tokio::spawn(async move {
                let _ = wire::process_connection(socket, tm, "bunkd".to_string(), None).await;
            });
        }
    });

    (addr, tm)
}

async fn connect(addr: SocketAddr) -> tokio_postgres::Client {
    let mut config = Config::new();
    config
        .host(addr.ip().to_string())
        .port(addr.port())
        .dbname("test")
        .user("bunkd")
        .password("bunkd");

    let (client, connection) = config.connect(NoTls).await.unwrap();
    tokio::spawn(async move {
        let _ = connection.await;
    });
    client
}

fn data_rows(messages: &[SimpleQueryMessage]) -> Vec<&tokio_postgres::SimpleQueryRow> {
    messages
        .iter()
        .filter_map(|m| match m {
            SimpleQueryMessage::Row(row) => Some(row),
            _ => None,
        })
        .collect()
}

/// Seed a building with one mixed-use room holding two beds.
/// Returns (building, room, bed_a, bed_b).
async fn seed_site(client: &tokio_postgres::Client) -> (Ulid, Ulid, Ulid, Ulid) {
    let building = Ulid::new();
    let room = Ulid::new();
    let bed_a = Ulid::new();
    let bed_b = Ulid::new();

    client
        .batch_execute(&format!(
            "INSERT INTO buildings (id, name) VALUES ('{building}', 'Wisma Utama')"
        ))
        .await
        .unwrap();
    client
        .batch_execute(&format!(
            "INSERT INTO rooms (id, building_id, name, gender_policy, allocation) \
             VALUES ('{room}', '{building}', '101', 'mixed', 'guest_allowed')"
        ))
        .await
        .unwrap();
    client
        .batch_execute(&format!(
            "INSERT INTO beds (id, room_id, label) VALUES ('{bed_a}', '{room}', 'B-1')"
        ))
        .await
        .unwrap();
    client
        .batch_execute(&format!(
            "INSERT INTO beds (id, room_id, label) VALUES ('{bed_b}', '{room}', 'B-2')"
        ))
        .await
        .unwrap();

    (building, room, bed_a, bed_b)
}

// ── Tests ────────────────────────────────────────────────────

#[tokio::test]
async fn connect_and_query() {
    let (addr, _tm) = start_test_server().await;
    let client = connect(addr).await;

    let (_, room, _, _) = seed_site(&client).await;

    let rows = client
        .simple_query(&format!("SELECT * FROM beds WHERE room_id = '{room}'"))
        .await
        .unwrap();
    assert_eq!(data_rows(&rows).len(), 2);
}

#[tokio::test]
async fn full_booking_flow() {
    let (addr, _tm) = start_test_server().await;
    let client = connect(addr).await;

    let (building, room, bed_a, _) = seed_site(&client).await;

    let request = Ulid::new();
    let occupant = Ulid::new();

    client
        .batch_execute(&format!(
            "INSERT INTO requests (id, requester, agency, purpose, check_in, check_out) \
             VALUES ('{request}', 'B. Santoso', 'PLN', 'training', '2024-03-01', '2024-03-05')"
        ))
        .await
        .unwrap();
    client
        .batch_execute(&format!(
            "INSERT INTO occupants (id, request_id, name, identifier, kind, gender, check_in, check_out) \
             VALUES ('{occupant}', '{request}', 'A. Wijaya', 'EMP-7001', 'employee', 'male', '2024-03-01', '2024-03-05')"
        ))
        .await
        .unwrap();

    // Stage the bed and approve.
    client
        .batch_execute(&format!(
            "UPDATE occupants SET building_id = '{building}', room_id = '{room}', \
             bed_id = '{bed_a}' WHERE id = '{occupant}'"
        ))
        .await
        .unwrap();
    client
        .batch_execute(&format!(
            "UPDATE requests SET status = 'approved' WHERE id = '{request}'"
        ))
        .await
        .unwrap();

    // Only the unreserved bed is free inside the window.
    let rows = client
        .simple_query(&format!(
            "SELECT * FROM availability WHERE room_id = '{room}' \
             AND check_in >= '2024-03-01' AND check_out <= '2024-03-05'"
        ))
        .await
        .unwrap();
    assert_eq!(data_rows(&rows).len(), 1);

    // The request reads back as approved.
    let rows = client
        .simple_query("SELECT * FROM requests WHERE status = 'approved'")
        .await
        .unwrap();
    let approved = data_rows(&rows);
    assert_eq!(approved.len(), 1);
    assert_eq!(approved[0].get(0), Some(request.to_string().as_str()));

    // Movement: check in, scan the badge, check out.
    client
        .batch_execute(&format!(
            "UPDATE occupants SET status = 'checked_in' WHERE id = '{occupant}'"
        ))
        .await
        .unwrap();

    let rows = client
        .simple_query("SELECT * FROM scan WHERE tag = 'EMP-7001'")
        .await
        .unwrap();
    let scanned = data_rows(&rows);
    assert_eq!(scanned.len(), 1);
    assert_eq!(scanned[0].get(0), Some(occupant.to_string().as_str()));
    assert_eq!(scanned[0].get(5), Some("checked_in"));
    assert_eq!(scanned[0].get(6), Some("approved"));

    client
        .batch_execute(&format!(
            "UPDATE occupants SET status = 'checked_out' WHERE id = '{occupant}'"
        ))
        .await
        .unwrap();

    // After checkout the stay ends today; the bed is free from tomorrow.
    let today = bunkd::engine::now_ms() / 86_400_000;
    let rows = client
        .simple_query(&format!(
            "SELECT * FROM availability WHERE room_id = '{room}' \
             AND check_in >= {} AND check_out <= {}",
            today + 1,
            today + 6
        ))
        .await
        .unwrap();
    assert_eq!(data_rows(&rows).len(), 2);

    // One manifest row for the lone occupant, fully located.
    let rows = client.simple_query("SELECT * FROM manifest").await.unwrap();
    let manifest = data_rows(&rows);
    assert_eq!(manifest.len(), 1);
    assert_eq!(manifest[0].get(10), Some("Wisma Utama / 101 / B-1"));
    assert_eq!(manifest[0].get(13), Some("checked_out"));
}

#[tokio::test]
async fn reject_requires_reason_over_the_wire() {
    let (addr, _tm) = start_test_server().await;
    let client = connect(addr).await;

    let request = Ulid::new();
    client
        .batch_execute(&format!(
            "INSERT INTO requests (id, requester, agency, purpose, check_in, check_out) \
             VALUES ('{request}', 'B. Santoso', 'PLN', 'audit', '2024-04-01', '2024-04-03')"
        ))
        .await
        .unwrap();

    let err = client
        .batch_execute(&format!(
            "UPDATE requests SET status = 'rejected' WHERE id = '{request}'"
        ))
        .await
        .unwrap_err();
    assert!(err.to_string().contains("reason"));

    client
        .batch_execute(&format!(
            "UPDATE requests SET status = 'rejected', reason = 'no quota' WHERE id = '{request}'"
        ))
        .await
        .unwrap();

    let rows = client
        .simple_query("SELECT * FROM requests WHERE status = 'rejected'")
        .await
        .unwrap();
    assert_eq!(data_rows(&rows).len(), 1);
}

#[tokio::test]
async fn scan_unknown_tag_reports_the_input() {
    let (addr, _tm) = start_test_server().await;
    let client = connect(addr).await;

    let err = client
        .simple_query("SELECT * FROM scan WHERE tag = 'NOBODY-99'")
        .await
        .unwrap_err();
    assert!(err.to_string().contains("NOBODY-99"));
}

#[tokio::test]
async fn extended_protocol_binds_parameters() {
    let (addr, _tm) = start_test_server().await;
    let client = connect(addr).await;

    let building = Ulid::new();
    client
        .execute(
            "INSERT INTO buildings (id, name) VALUES ($1, $2)",
            &[&building.to_string(), &"Wisma Baru"],
        )
        .await
        .unwrap();

    let rows = client.simple_query("SELECT * FROM buildings").await.unwrap();
    let buildings = data_rows(&rows);
    assert_eq!(buildings.len(), 1);
    assert_eq!(buildings[0].get(1), Some("Wisma Baru"));
}
