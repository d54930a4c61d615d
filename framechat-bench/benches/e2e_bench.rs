//! End-to-end client-server benchmarks.

use bytes::Bytes;
use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use framechat_client::{Client, ClientEvent, ConnectionConfig};
use framechat_protocol::Disposition;
use framechat_server::{Destination, Server, ServerConfig, ServerEvent};
use std::sync::Arc;
use std::time::Duration;
use tokio::runtime::Runtime;
use tokio::sync::mpsc;

struct TestSetup {
    server: Arc<Server>,
    clients: Vec<Client>,
    /// Messages the server has received from clients.
    inbound: mpsc::UnboundedReceiver<()>,
}

fn setup_server_and_clients(rt: &Runtime, count: usize) -> TestSetup {
    rt.block_on(async {
        let (server, mut events) = Server::new(ServerConfig::new("127.0.0.1:0".parse().unwrap()));
        let server = Arc::new(server);
        let listener = server.bind().await.unwrap();
        let addr = listener.local_addr().unwrap();

        let task = server.clone();
        tokio::spawn(async move {
            let _ = task.serve(listener).await;
        });

        let (inbound_tx, inbound) = mpsc::unbounded_channel();
        let handler = server.clone();
        tokio::spawn(async move {
            while let Some(event) = events.recv().await {
                match event {
                    ServerEvent::MessageReceived { .. } => {
                        let _ = inbound_tx.send(());
                    }
                    ServerEvent::AttachmentOffered(offer) => {
                        let _ = handler
                            .resolve_attachment(offer.id, Disposition::Discard)
                            .await;
                    }
                    _ => {}
                }
            }
        });

        let mut clients = Vec::with_capacity(count);
        for _ in 0..count {
            let (client, mut client_events) =
                Client::new(ConnectionConfig::new("127.0.0.1", addr.port()));
            client.connect().await.unwrap();
            client.wait_for_identity(Duration::from_secs(5)).await.unwrap();
            // Keep the event queue drained
            tokio::spawn(async move {
                while let Some(event) = client_events.recv().await {
                    if let ClientEvent::Disconnected = event {
                        break;
                    }
                }
            });
            clients.push(client);
        }

        // Wait until every client is registered
        while server.peers().len() < count {
            tokio::task::yield_now().await;
        }

        TestSetup {
            server,
            clients,
            inbound,
        }
    })
}

fn bench_broadcast(c: &mut Criterion) {
    let rt = Runtime::new().unwrap();
    let mut group = c.benchmark_group("e2e_broadcast");

    for peers in [1, 10, 50] {
        let setup = setup_server_and_clients(&rt, peers);

        group.throughput(Throughput::Elements(peers as u64));
        group.bench_with_input(BenchmarkId::from_parameter(peers), &setup, |b, setup| {
            b.to_async(&rt).iter(|| async {
                black_box(
                    setup
                        .server
                        .send_message(Destination::Broadcast, "hello everyone")
                        .await
                        .unwrap(),
                )
            });
        });

        rt.block_on(async { setup.server.shutdown() });
    }

    group.finish();
}

fn bench_client_message(c: &mut Criterion) {
    let rt = Runtime::new().unwrap();
    let mut setup = setup_server_and_clients(&rt, 1);

    let mut group = c.benchmark_group("e2e_client_message");
    group.throughput(Throughput::Elements(1));

    group.bench_function("send_and_receive", |b| {
        b.iter(|| {
            rt.block_on(async {
                setup.clients[0].send_message("ping").await.unwrap();
                black_box(setup.inbound.recv().await.unwrap())
            })
        });
    });

    group.finish();
    setup.server.shutdown();
}

fn bench_attachment(c: &mut Criterion) {
    let rt = Runtime::new().unwrap();
    let setup = setup_server_and_clients(&rt, 1);
    let client = &setup.clients[0];

    let mut group = c.benchmark_group("e2e_attachment");

    for size in [1024, 1024 * 1024] {
        let payload = Bytes::from(vec![0u8; size]);

        group.throughput(Throughput::Bytes(size as u64));
        group.bench_with_input(BenchmarkId::from_parameter(size), &payload, |b, payload| {
            b.to_async(&rt).iter(|| async {
                client
                    .send_attachment("bench.bin", payload.clone())
                    .await
                    .unwrap()
            });
        });
    }

    group.finish();
    setup.server.shutdown();
}

criterion_group!(
    benches,
    bench_broadcast,
    bench_client_message,
    bench_attachment,
);

criterion_main!(benches);
