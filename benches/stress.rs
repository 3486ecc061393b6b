use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::{Duration, Instant};

use tokio_postgres::{Client, Config, NoTls, SimpleQueryMessage};
use ulid::Ulid;

async fn connect(host: &str, port: u16) -> Client {
    let mut config = Config::new();
    config
        .host(host)
        .port(port)
        .dbname("hostel")
        .user("roomledger")
        .password(std::env::var("ROOMLEDGER_PASSWORD").unwrap_or_else(|_| "roomledger".into()));

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
    if latencies.is_empty() {
        println!("  {label}: no samples");
        return;
    }
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
        latencies[latencies.len() - 1].as_secs_f64() * 1000.0,
    );
}

async fn create_room(client: &Client, capacity: u32) -> Ulid {
    let id = Ulid::new();
    client
        .batch_execute(&format!(
            r#"INSERT INTO rooms (id, "type", capacity) VALUES ('{id}', 'Bench', {capacity})"#
        ))
        .await
        .unwrap();
    id
}

async fn admit(client: &Client, room: Ulid) -> Result<Ulid, tokio_postgres::Error> {
    let id = Ulid::new();
    client
        .batch_execute(&format!(
            "INSERT INTO students (id, name, room) VALUES ('{id}', 'bench', '{room}')"
        ))
        .await?;
    Ok(id)
}

async fn occupied(client: &Client, room: Ulid) -> Option<u32> {
    let messages = client
        .simple_query(&format!("SELECT * FROM rooms WHERE id = '{room}'"))
        .await
        .ok()?;
    messages.into_iter().find_map(|msg| match msg {
        SimpleQueryMessage::Row(row) => row.get("occupied").and_then(|v| v.parse().ok()),
        _ => None,
    })
}

async fn phase1_sequential(host: &str, port: u16) {
    let client = connect(host, port).await;
    // One room at the largest allowed capacity.
    let n = 1000;
    let room = create_room(&client, n).await;

    let mut latencies = Vec::with_capacity(n as usize);
    let start = Instant::now();
    for _ in 0..n {
        let t = Instant::now();
        admit(&client, room).await.unwrap();
        latencies.push(t.elapsed());
    }

    let elapsed = start.elapsed();
    let ops = f64::from(n) / elapsed.as_secs_f64();
    println!("  {n} admissions in {:.2}s = {ops:.0} ops/sec", elapsed.as_secs_f64());
    print_latency("admit latency", &mut latencies);
}

/// Many clients race for a handful of beds. Exactly `capacity` must win.
async fn phase2_contention(host: &str, port: u16) {
    let setup = connect(host, port).await;
    let capacities = [1, 2, 4, 8];
    let mut rooms = Vec::new();
    for &cap in &capacities {
        rooms.push((create_room(&setup, cap).await, cap));
    }

    let n_tasks = 40;
    let start = Instant::now();
    let mut handles = Vec::new();
    for i in 0..n_tasks {
        let host = host.to_string();
        let (room, _) = rooms[i % rooms.len()];
        handles.push(tokio::spawn(async move {
            let client = connect(&host, port).await;
            admit(&client, room).await.is_ok()
        }));
    }
    let mut admitted = 0;
    for h in handles {
        if h.await.unwrap() {
            admitted += 1;
        }
    }

    let elapsed = start.elapsed();
    let expected: u32 = capacities.iter().sum();
    println!(
        "  {n_tasks} racing admissions, {admitted} admitted (beds: {expected}) in {:.2}s",
        elapsed.as_secs_f64()
    );
    for (room, cap) in rooms {
        let seen = occupied(&setup, room).await;
        if seen != Some(cap) {
            println!("  !! room {room} capacity {cap} but occupied {seen:?}");
        }
    }
}

/// Read latency while writers shuffle students between two rooms.
async fn phase3_read_under_transfers(host: &str, port: u16) {
    let setup = connect(host, port).await;
    let a = create_room(&setup, 100).await;
    let b = create_room(&setup, 100).await;
    let mut students = Vec::new();
    for _ in 0..50 {
        students.push(admit(&setup, a).await.unwrap());
    }
    drop(setup);

    let stop = Arc::new(AtomicBool::new(false));
    let moves = Arc::new(AtomicUsize::new(0));
    let mut writer_handles = Vec::new();
    for chunk in students.chunks(10) {
        let host = host.to_string();
        let chunk = chunk.to_vec();
        let stop = stop.clone();
        let moves = moves.clone();
        writer_handles.push(tokio::spawn(async move {
            let client = connect(&host, port).await;
            let mut round = 0usize;
            while !stop.load(Ordering::Relaxed) {
                let target = if round % 2 == 0 { b } else { a };
                for sid in &chunk {
                    let sql = format!("UPDATE students SET room = '{target}' WHERE id = '{sid}'");
                    if client.batch_execute(&sql).await.is_ok() {
                        moves.fetch_add(1, Ordering::Relaxed);
                    }
                }
                round += 1;
            }
        }));
    }

    let n_readers = 10;
    let reads_per_reader = 500;
    let mut reader_handles = Vec::new();
    for _ in 0..n_readers {
        let host = host.to_string();
        reader_handles.push(tokio::spawn(async move {
            let client = connect(&host, port).await;
            let mut latencies = Vec::with_capacity(reads_per_reader);
            for _ in 0..reads_per_reader {
                let t = Instant::now();
                client.simple_query("SELECT * FROM occupancy").await.unwrap();
                latencies.push(t.elapsed());
            }
            latencies
        }));
    }

    let mut all_latencies = Vec::new();
    for h in reader_handles {
        all_latencies.extend(h.await.unwrap());
    }
    stop.store(true, Ordering::Relaxed);
    for h in writer_handles {
        let _ = h.await;
    }

    println!("  {} transfers during reads", moves.load(Ordering::Relaxed));
    print_latency("occupancy query", &mut all_latencies);

    let check = connect(host, port).await;
    let total = occupied(&check, a).await.unwrap_or(0) + occupied(&check, b).await.unwrap_or(0);
    if total != 50 {
        println!("  !! expected 50 beds in use across both rooms, found {total}");
    }
    let drift = check.simple_query("SELECT * FROM drift").await.unwrap();
    let drifted = drift
        .iter()
        .filter(|m| matches!(m, SimpleQueryMessage::Row(_)))
        .count();
    println!("  rooms in drift afterwards: {drifted}");
}

async fn phase4_connection_storm(host: &str, port: u16) {
    let n_conns = 50;
    let ops_per_conn = 10;

    let start = Instant::now();
    let mut handles = Vec::new();
    let success = Arc::new(AtomicUsize::new(0));

    for _ in 0..n_conns {
        let host = host.to_string();
        let success = success.clone();
        handles.push(tokio::spawn(async move {
            let client = connect(&host, port).await;
            let room = create_room(&client, ops_per_conn).await;
            for _ in 0..ops_per_conn {
                admit(&client, room).await.unwrap();
            }
            success.fetch_add(1, Ordering::Relaxed);
        }));
    }

    for h in handles {
        let _ = h.await;
    }

    let elapsed = start.elapsed();
    let ok = success.load(Ordering::Relaxed);
    println!(
        "  {n_conns} connections, {ops_per_conn} admissions each: {ok}/{n_conns} succeeded in {:.2}s",
        elapsed.as_secs_f64()
    );
}

#[tokio::main]
async fn main() {
    let host = std::env::var("ROOMLEDGER_HOST").unwrap_or_else(|_| "127.0.0.1".into());
    let port: u16 = std::env::var("ROOMLEDGER_PORT")
        .unwrap_or_else(|_| "5433".into())
        .parse()
        .expect("invalid ROOMLEDGER_PORT");

    println!("=== roomledger stress benchmark ===");
    println!("target: {host}:{port}\n");

    println!("[phase 1] sequential admission throughput");
    phase1_sequential(&host, port).await;

    println!("\n[phase 2] contention for the last beds");
    phase2_contention(&host, port).await;

    println!("\n[phase 3] read latency under transfer load");
    phase3_read_under_transfers(&host, port).await;

    println!("\n[phase 4] connection storm");
    phase4_connection_storm(&host, port).await;

    println!("\n=== benchmark complete ===");
}
