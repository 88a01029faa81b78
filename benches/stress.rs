use std::time::{Duration, Instant};

use tokio_postgres::{Config, NoTls};
use ulid::Ulid;

// Windows start here (mid-2024 in epoch days) so the phases never collide
// with stays seeded relative to the wall clock.
const BASE_DAY: i64 = 19_900;

async fn connect(host: &str, port: u16) -> tokio_postgres::Client {
    let mut config = Config::new();
    config
        .host(host)
        .port(port)
        .dbname(format!("bench_{}", Ulid::new()))
        .user("bunkd")
        .password("bunkd");

    let (client, conn) = config.connect(NoTls).await.expect("connect failed");
    tokio::spawn(async move {
        if let Err(e) = conn.await {
            eprintln!("connection error: {e}");
        }
    });
    client
}

fn percentile(sorted: &[Duration], p: f64) -> Duration {
    if sorted.is_empty() {
        return Duration::ZERO;
    }
    let idx = ((sorted.len() as f64) * p / 100.0) as usize;
    sorted[idx.min(sorted.len() - 1)]
}

fn print_latency(label: &str, latencies: &mut [Duration]) {
    latencies.sort();
    let total: Duration = latencies.iter().sum();
    let avg = total / latencies.len() as u32;
    println!("  {label}:");
    println!(
        "    n={}, avg={:.2}ms, p50={:.2}ms, p95={:.2}ms, p99={:.2}ms, max={:.2}ms",
        latencies.len(),
        avg.as_secs_f64() * 1000.0,
        percentile(latencies, 50.0).as_secs_f64() * 1000.0,
        percentile(latencies, 95.0).as_secs_f64() * 1000.0,
        percentile(latencies, 99.0).as_secs_f64() * 1000.0,
        latencies.last().unwrap().as_secs_f64() * 1000.0,
    );
}

struct Site {
    building: Ulid,
    room: Ulid,
    beds: Vec<Ulid>,
}

/// One building, one mixed room, `n_beds` beds — created in the client's tenant.
async fn seed_site(client: &tokio_postgres::Client, n_beds: usize) -> Site {
    let building = Ulid::new();
    let room = Ulid::new();

    client
        .batch_execute(&format!(
            "INSERT INTO buildings (id, name) VALUES ('{building}', 'Bench Hall')"
        ))
        .await
        .unwrap();
    client
        .batch_execute(&format!(
            "INSERT INTO rooms (id, building_id, name, gender_policy, allocation) \
             VALUES ('{room}', '{building}', 'R1', 'mixed', 'guest_allowed')"
        ))
        .await
        .unwrap();

    let mut beds = Vec::with_capacity(n_beds);
    for i in 0..n_beds {
        let bed = Ulid::new();
        client
            .batch_execute(&format!(
                "INSERT INTO beds (id, room_id, label) VALUES ('{bed}', '{room}', 'B-{i}')"
            ))
            .await
            .unwrap();
        beds.push(bed);
    }

    beds.sort();
    Site { building, room, beds }
}

/// Submit a one-occupant request for [start, start+nights).
async fn submit_booking(
    client: &tokio_postgres::Client,
    start: i64,
    nights: i64,
) -> (Ulid, Ulid) {
    let request = Ulid::new();
    let occupant = Ulid::new();
    let end = start + nights;

    client
        .batch_execute(&format!(
            "INSERT INTO requests (id, requester, agency, purpose, check_in, check_out) \
             VALUES ('{request}', 'bench', 'bench', 'load test', {start}, {end})"
        ))
        .await
        .unwrap();
    client
        .batch_execute(&format!(
            "INSERT INTO occupants (id, request_id, name, identifier, kind, gender, check_in, check_out) \
             VALUES ('{occupant}', '{request}', 'bench occupant', 'B-{occupant}', 'employee', 'male', {start}, {end})"
        ))
        .await
        .unwrap();

    (request, occupant)
}

/// Stage the occupant onto a bed and approve the request.
async fn place_and_approve(
    client: &tokio_postgres::Client,
    site: &Site,
    request: Ulid,
    occupant: Ulid,
    bed: Ulid,
) {
    client
        .batch_execute(&format!(
            "UPDATE occupants SET building_id = '{}', room_id = '{}', bed_id = '{bed}' \
             WHERE id = '{occupant}'",
            site.building, site.room
        ))
        .await
        .unwrap();
    client
        .batch_execute(&format!(
            "UPDATE requests SET status = 'approved' WHERE id = '{request}'"
        ))
        .await
        .unwrap();
}

async fn phase1_sequential(host: &str, port: u16) {
    let client = connect(host, port).await;
    seed_site(&client, 10).await;

    let n = 2000;
    let mut latencies = Vec::with_capacity(n);
    let start = Instant::now();

    for i in 0..n {
        let day = BASE_DAY + (i as i64) * 3;
        let t = Instant::now();
        submit_booking(&client, day, 2).await;
        latencies.push(t.elapsed());
    }

    let elapsed = start.elapsed();
    let ops = n as f64 / elapsed.as_secs_f64();
    println!("  {n} requests in {:.2}s = {ops:.0} ops/sec", elapsed.as_secs_f64());
    print_latency("write latency", &mut latencies);
}

async fn phase2_concurrent(host: &str, port: u16) {
    let n_tasks = 10;
    let n_per_task = 200;

    let start = Instant::now();
    let mut handles = Vec::new();

    for _ in 0..n_tasks {
        let host = host.to_string();
        handles.push(tokio::spawn(async move {
            // Each task uses its own tenant (unique dbname from connect())
            let client = connect(&host, port).await;
            seed_site(&client, 10).await;

            for j in 0..n_per_task {
                let day = BASE_DAY + (j as i64) * 3;
                submit_booking(&client, day, 2).await;
            }
        }));
    }

    for h in handles {
        h.await.unwrap();
    }

    let elapsed = start.elapsed();
    let total = n_tasks * n_per_task;
    let ops = total as f64 / elapsed.as_secs_f64();
    println!(
        "  {n_tasks} tasks x {n_per_task} requests = {total} total in {:.2}s = {ops:.0} ops/sec",
        elapsed.as_secs_f64()
    );
}

async fn phase3_read_under_load(host: &str, port: u16) {
    // Writer tasks: continuously submit requests in their own tenants
    let stop = std::sync::Arc::new(std::sync::atomic::AtomicBool::new(false));
    let mut writer_handles = Vec::new();
    for _ in 0..5 {
        let host = host.to_string();
        let stop = stop.clone();
        writer_handles.push(tokio::spawn(async move {
            let client = connect(&host, port).await;
            seed_site(&client, 10).await;
            let mut i = 0i64;
            while !stop.load(std::sync::atomic::Ordering::Relaxed) {
                let _ = submit_booking(&client, BASE_DAY + i * 3, 2).await;
                i += 1;
            }
        }));
    }

    // Reader tasks: fill a room with approved stays, then hammer availability
    let n_readers = 10;
    let reads_per_reader = 500;
    let mut reader_handles = Vec::new();

    for _ in 0..n_readers {
        let host = host.to_string();
        reader_handles.push(tokio::spawn(async move {
            let client = connect(&host, port).await;
            let site = seed_site(&client, 10).await;

            // 50 approved stays spread over the beds, non-overlapping per bed
            for i in 0..50i64 {
                let bed = site.beds[(i % 10) as usize];
                let day = BASE_DAY + (i / 10) * 4;
                let (request, occupant) = submit_booking(&client, day, 3).await;
                place_and_approve(&client, &site, request, occupant, bed).await;
            }

            let mut latencies = Vec::with_capacity(reads_per_reader);
            for _ in 0..reads_per_reader {
                let t = Instant::now();
                client
                    .batch_execute(&format!(
                        "SELECT * FROM availability WHERE room_id = '{}' \
                         AND check_in >= {BASE_DAY} AND check_out <= {}",
                        site.room,
                        BASE_DAY + 30
                    ))
                    .await
                    .unwrap();
                latencies.push(t.elapsed());
            }
            latencies
        }));
    }

    let mut all_latencies = Vec::new();
    for h in reader_handles {
        all_latencies.extend(h.await.unwrap());
    }

    stop.store(true, std::sync::atomic::Ordering::Relaxed);
    for h in writer_handles {
        let _ = h.await;
    }

    print_latency("availability query", &mut all_latencies);
}

async fn phase4_connection_storm(host: &str, port: u16) {
    let n_conns = 50;
    let ops_per_conn = 10;

    let start = Instant::now();
    let mut handles = Vec::new();
    let success = std::sync::Arc::new(std::sync::atomic::AtomicUsize::new(0));

    for _ in 0..n_conns {
        let host = host.to_string();
        let success = success.clone();
        handles.push(tokio::spawn(async move {
            let client = connect(&host, port).await;
            seed_site(&client, 4).await;

            for i in 0..ops_per_conn {
                submit_booking(&client, BASE_DAY + (i as i64) * 3, 2).await;
            }
            success.fetch_add(1, std::sync::atomic::Ordering::Relaxed);
        }));
    }

    for h in handles {
        let _ = h.await;
    }

    let elapsed = start.elapsed();
    let ok = success.load(std::sync::atomic::Ordering::Relaxed);
    println!(
        "  {n_conns} connections, {ops_per_conn} ops each: {ok}/{n_conns} succeeded in {:.2}s",
        elapsed.as_secs_f64()
    );
}

#[tokio::main]
async fn main() {
    let host = std::env::var("BUNKD_HOST").unwrap_or_else(|_| "127.0.0.1".into());
    let port: u16 = std::env::var("BUNKD_PORT")
        .unwrap_or_else(|_| "5433".into())
        .parse()
        .expect("invalid BUNKD_PORT");

    println!("=== bunkd stress benchmark ===");
    println!("target: {host}:{port}\n");

    // Each phase uses its own tenant (unique dbname) to avoid interference

    println!("[phase 1] sequential write throughput");
    phase1_sequential(&host, port).await;

    println!("\n[phase 2] concurrent write throughput");
    phase2_concurrent(&host, port).await;

    println!("\n[phase 3] read latency under write load");
    phase3_read_under_load(&host, port).await;

    println!("\n[phase 4] connection storm");
    phase4_connection_storm(&host, port).await;

    println!("\n=== benchmark complete ===");
}
