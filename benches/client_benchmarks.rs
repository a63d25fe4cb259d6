//! Performance benchmarks for the RTVI client
//!
//! Run with: cargo bench
//! Or for specific benchmarks: cargo bench -- <filter>

use criterion::{BenchmarkId, Criterion, Throughput, black_box, criterion_group, criterion_main};
use rtvi_client::core::dispatcher::MessageDispatcher;
use rtvi_client::core::handshake::parse_event_stream;
use rtvi_client::core::transport::websocket::pcm16_level;
use rtvi_client::{ConfigOption, RtviConfig, RtviMessage, ServiceConfig};
use serde_json::json;
use std::time::Duration;

fn service_config(service: &str, options: usize) -> ServiceConfig {
    ServiceConfig::new(
        service,
        (0..options)
            .map(|i| ConfigOption::new(format!("option_{i}"), json!(i)))
            .collect(),
    )
}

/// Benchmark envelope decoding and encoding
fn bench_envelope_codec(c: &mut Criterion) {
    let mut group = c.benchmark_group("envelope_codec");
    group.measurement_time(Duration::from_secs(5));

    let transcript = r#"{"id":"a1b2c3d4","label":"rtvi-ai","type":"user-transcription","data":{"text":"What's the weather like in Paris?","final":true,"timestamp":"2024-01-01T00:00:00Z","user_id":"local"}}"#;
    let llm_text = r#"{"id":"e5f6a7b8","label":"rtvi-ai","type":"bot-llm-text","data":{"text":"It"}}"#;
    let large_config = json!({
        "id": "c9d0e1f2",
        "label": "rtvi-ai",
        "type": "config",
        "data": {"config": (0..8).map(|i| service_config(&format!("service_{i}"), 16)).collect::<Vec<_>>()}
    })
    .to_string();

    for (name, msg) in [
        ("user_transcription", transcript),
        ("bot_llm_text", llm_text),
        ("large_config", large_config.as_str()),
    ] {
        group.throughput(Throughput::Bytes(msg.len() as u64));
        group.bench_with_input(BenchmarkId::new("decode", name), &msg, |b, msg| {
            b.iter(|| {
                let _ = RtviMessage::from_json(black_box(msg));
            });
        });
    }

    let update = RtviMessage::update_config(
        &(0..4)
            .map(|i| service_config(&format!("service_{i}"), 8))
            .collect::<Vec<_>>(),
        false,
    );
    group.bench_function("encode_update_config", |b| {
        b.iter(|| {
            let _ = black_box(&update).to_json();
        });
    });

    group.finish();
}

/// Benchmark config merges of varying size
fn bench_config_merge(c: &mut Criterion) {
    let mut group = c.benchmark_group("config_merge");

    for services in [1usize, 8, 32] {
        let config = RtviConfig::new(
            (0..services)
                .map(|i| service_config(&format!("service_{i}"), 16))
                .collect(),
        );
        let update = vec![
            service_config("service_0", 4),
            service_config("new_service", 4),
        ];

        group.bench_with_input(
            BenchmarkId::new("with_options", services),
            &config,
            |b, config| {
                b.iter(|| {
                    let _ = black_box(config).with_options(black_box(&update));
                });
            },
        );
    }

    let config = RtviConfig::new(
        (0..32)
            .map(|i| service_config(&format!("service_{i}"), 16))
            .collect(),
    );
    group.bench_function("get_value", |b| {
        b.iter(|| {
            let _ = black_box(&config).get_value("service_31", "option_15");
        });
    });

    group.finish();
}

/// Benchmark request registration and settlement
fn bench_dispatcher(c: &mut Criterion) {
    let mut group = c.benchmark_group("dispatcher");
    let dispatcher = MessageDispatcher::new(None);

    group.bench_function("register_resolve", |b| {
        b.iter(|| {
            let request = RtviMessage::get_config();
            let pending = dispatcher.register(&request);
            let response = RtviMessage::with_id(request.id(), "config", json!({"config": []}));
            let settled = dispatcher.resolve(black_box(&response));
            drop(pending);
            settled
        });
    });

    group.bench_function("resolve_uncorrelated", |b| {
        let message = RtviMessage::with_id("unknown", "bot-llm-text", json!({"text": "Hi"}));
        b.iter(|| dispatcher.resolve(black_box(&message)));
    });

    group.finish();
}

/// Benchmark parsing of server-sent action responses
fn bench_event_stream(c: &mut Criterion) {
    let mut group = c.benchmark_group("event_stream");

    for tokens in [4usize, 64] {
        let mut body = String::from(
            "data: {\"id\":\"s\",\"label\":\"rtvi-ai\",\"type\":\"bot-llm-started\",\"data\":{}}\n\n",
        );
        for i in 0..tokens {
            body.push_str(&format!(
                "data: {{\"id\":\"t{i}\",\"label\":\"rtvi-ai\",\"type\":\"bot-llm-text\",\"data\":{{\"text\":\"token{i} \"}}}}\n\n"
            ));
        }
        body.push_str(
            "data: {\"id\":\"r\",\"label\":\"rtvi-ai\",\"type\":\"action-response\",\"data\":{\"result\":true}}\n\n",
        );

        group.throughput(Throughput::Bytes(body.len() as u64));
        group.bench_with_input(BenchmarkId::new("parse", tokens), &body, |b, body| {
            b.iter(|| {
                let _ = parse_event_stream("request-1", black_box(body));
            });
        });
    }

    group.finish();
}

/// Benchmark audio level computation on PCM16 frames
fn bench_audio_level(c: &mut Criterion) {
    let mut group = c.benchmark_group("audio_level");

    // 20ms at 16kHz and 48kHz
    for samples in [320usize, 960] {
        let frame: Vec<u8> = (0..samples)
            .flat_map(|i| (((i % 64) as i16 - 32) * 512).to_le_bytes())
            .collect();
        group.throughput(Throughput::Bytes(frame.len() as u64));
        group.bench_with_input(BenchmarkId::new("pcm16", samples), &frame, |b, frame| {
            b.iter(|| pcm16_level(black_box(frame)));
        });
    }

    group.finish();
}

criterion_group!(
    benches,
    bench_envelope_codec,
    bench_config_merge,
    bench_dispatcher,
    bench_event_stream,
    bench_audio_level,
);

criterion_main!(benches);
