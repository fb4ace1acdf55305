//! Integration tests for the reader/writer protocol and its stages

use seqio::combinators::reduce_parts;
use seqio::prelude::*;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::time::Duration;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct Order {
    id: u32,
    customer: String,
    total_cents: i64,
    tags: Vec<String>,
}

fn orders(n: u32) -> Vec<Order> {
    (0..n)
        .map(|id| Order {
            id,
            customer: format!("customer-{}", id % 3),
            total_cents: i64::from(id) * 125 - 300,
            tags: (0..id % 4).map(|t| format!("tag{t}")).collect(),
        })
        .collect()
}

#[tokio::test]
async fn test_filter_map_pipe() -> Result<()> {
    let token = CancellationToken::new();
    let reader = VecReader::new((1..=10).collect::<Vec<i64>>())
        .filter(|x| x % 2 == 0)
        .map(|x| x * 3);
    let sink = CollectWriter::new();

    let moved = Pipe::new(reader, sink.clone()).run(&token).await?;

    assert_eq!(moved, 5);
    assert_eq!(sink.into_items().await, vec![6, 12, 18, 24, 30]);
    Ok(())
}

#[tokio::test]
async fn test_absent_parts() {
    let token = CancellationToken::new();

    // Missing reader: empty stream.
    let mut missing: Option<VecReader<i32>> = None;
    assert_eq!(missing.read(&token).await.unwrap(), None);

    // Missing writer: closed pipe.
    let mut nowhere: Option<CollectWriter<i32>> = None;
    assert!(matches!(nowhere.write(&token, 1).await, Err(Error::ClosedPipe)));

    // Identity filter, fail-closed map.
    let upstream = Some(VecReader::new(vec![1, 2]));
    let identity = Filter::from_parts(upstream, None::<fn(&i32) -> bool>);
    assert_eq!(read_all(identity, &token).await.unwrap(), vec![1, 2]);
    let upstream = Some(VecReader::new(vec![1, 2]));
    let closed = Map::from_parts(upstream, None::<fn(i32) -> i32>);
    assert!(read_all(closed, &token).await.unwrap().is_empty());

    let zero: i32 = reduce_parts(None::<VecReader<i32>>, &token, Some(|a: i32, b: i32| a + b))
        .await
        .unwrap();
    assert_eq!(zero, 0);
}

#[tokio::test]
async fn test_reduce_sum() {
    let token = CancellationToken::new();
    let sum: i32 = reduce(VecReader::new(vec![1, 2, 3]), &token, |acc, x| acc + x)
        .await
        .unwrap();
    assert_eq!(sum, 6);
}

#[tokio::test]
async fn test_binary_round_trip_through_memory_transport() {
    let token = CancellationToken::new();
    let (client, server) = tokio::io::duplex(64);

    let expected = orders(50);
    let to_send = expected.clone();
    let sender = tokio::spawn(async move {
        let token = CancellationToken::new();
        let mut writer = EncodeWriter::new(client);
        write_all(&mut writer, &token, to_send).await?;
        writer.close().await
    });

    let reader = DecodeReader::<_, BinaryCodec<Order>>::new(server);
    let received = read_all(reader, &token).await.unwrap();

    sender.await.unwrap().unwrap();
    assert_eq!(received, expected);
}

#[tokio::test]
async fn test_json_lines_round_trip_through_file() {
    let token = CancellationToken::new();
    let file = tempfile::NamedTempFile::new().unwrap();

    let out = tokio::fs::File::create(file.path()).await.unwrap();
    let mut writer = EncodeWriter::with_codec(out, JsonLinesCodec::<Order>::new());
    let written = Pipe::new(VecReader::new(orders(10)), &mut writer)
        .close_on_end(false)
        .run(&token)
        .await
        .unwrap();
    writer.close().await.unwrap();
    assert_eq!(written, 10);

    let text = tokio::fs::read_to_string(file.path()).await.unwrap();
    assert_eq!(text.lines().count(), 10);

    let input = tokio::fs::File::open(file.path()).await.unwrap();
    let reader = DecodeReader::with_codec(input, JsonLinesCodec::<Order>::new());
    assert_eq!(read_all(reader, &token).await.unwrap(), orders(10));
}

#[tokio::test]
async fn test_encode_reader_feeds_decode_writer() {
    let token = CancellationToken::new();
    let mut source = EncodeReader::new(VecReader::new(orders(20)), token.clone());
    let sink = CollectWriter::new();
    let mut decoder = DecodeWriter::<_, BinaryCodec<Order>>::new(sink.clone());

    let mut chunk = vec![0u8; 7];
    loop {
        let n = tokio::io::AsyncReadExt::read(&mut source, &mut chunk).await.unwrap();
        if n == 0 {
            break;
        }
        decoder
            .write(&token, bytes::Bytes::copy_from_slice(&chunk[..n]))
            .await
            .unwrap();
    }
    decoder.close().await.unwrap();

    assert_eq!(sink.into_items().await, orders(20));
}

#[tokio::test]
async fn test_batching_properties() {
    let token = CancellationToken::new();

    let chunks = read_all(VecReader::new(vec![1, 2, 3]).chunked(2), &token)
        .await
        .unwrap();
    assert_eq!(chunks, vec![vec![1, 2], vec![3]]);

    let sink = CollectWriter::new();
    let mut writer = sink.clone().batched(2, FlushPolicy::default());
    write_all(&mut writer, &token, [1, 2, 3]).await.unwrap();
    writer.close().await.unwrap();
    assert_eq!(sink.into_items().await, vec![1, 2]);
}

#[tokio::test]
async fn test_pagination() {
    let token = CancellationToken::new();
    let pages = read_all(VecReader::new(vec![7usize]).pages(3), &token)
        .await
        .unwrap();
    assert_eq!(
        pages,
        vec![
            Page { skip: 0, limit: 3 },
            Page { skip: 3, limit: 3 },
            Page { skip: 6, limit: 1 },
        ]
    );
}

#[tokio::test(start_paused = true)]
async fn test_stats_on_paced_reader() {
    let token = CancellationToken::new();
    let stats = CollectWriter::new();
    let reader = VecReader::new(vec!["a", "b"])
        .paced(Duration::from_millis(20))
        .stats("paced", stats.clone());

    assert_eq!(read_all(reader, &token).await.unwrap(), vec!["a", "b"]);

    let stats: Vec<ReadStat<&str>> = stats.into_items().await;
    let elapsed: Vec<_> = stats.iter().map(|s| s.elapsed).collect();
    assert_eq!(
        elapsed,
        vec![Duration::from_millis(20), Duration::from_millis(20), Duration::ZERO]
    );
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_work_pool_set_equality() {
    let token = CancellationToken::new();
    let input = from_iter(0..1000u32, &token, ChannelConfig::new(32));

    let output = WorkPool::new()
        .workers(8)
        .input(input)
        .transform(|x: u32| x)
        .spawn(&token);

    let results = tokio::time::timeout(Duration::from_secs(10), async {
        let mut reader = ChannelReader::new(output);
        read_all(&mut reader, &token).await
    })
    .await
    .expect("pool output did not close")
    .unwrap();

    assert_eq!(results.len(), 1000);
    let unique: HashSet<u32> = results.into_iter().collect();
    assert_eq!(unique, (0..1000).collect::<HashSet<u32>>());
}

#[tokio::test]
async fn test_pool_feeds_pipe_with_encoded_failures() {
    let token = CancellationToken::new();
    let input = from_iter(vec!["4", "x", "16"], &token, ChannelConfig::default());

    let output = WorkPool::new()
        .workers(2)
        .input(input)
        .transform(|s: &str| s.parse::<u32>().map_err(|e| e.to_string()))
        .spawn(&token);

    let parsed = ChannelReader::new(output).filter(|r| r.is_ok()).map(|r| r.unwrap_or(0));
    let total: u32 = reduce(parsed, &token, |acc, x| acc + x).await.unwrap();
    assert_eq!(total, 20);
}

#[tokio::test]
async fn test_cancelled_producer_stops() {
    let token = CancellationToken::new();
    let (rx, handle) = spawn_reader(IterReader::new(0u64..), &token, ChannelConfig::new(4));
    let mut reader = ChannelReader::new(rx);
    assert_eq!(reader.read(&token).await.unwrap(), Some(0));

    token.cancel();
    assert!(matches!(handle.await.unwrap(), Err(Error::Cancelled)));

    let leftover = read_all(&mut reader, &CancellationToken::new()).await.unwrap();
    assert!(leftover.len() <= 4);
}
