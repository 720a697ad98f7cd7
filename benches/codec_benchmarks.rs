use criterion::{Criterion, Throughput, criterion_group, criterion_main};
use rask_log_relay::codec::{CodecConfig, EventCodec};
use rask_log_relay::domain::MessageContext;
use rask_log_relay::transport::{FrameEncoder, TransportMode};

const SIMPLE: &str = r#"{"timestamp":"2024-01-15T10:30:45.123Z","message":"order 42 failed","level":"ERROR","service":"checkout"}"#;
const WITH_EXTRAS: &str = r#"{"timestamp":1705314645123,"message":"upstream timed out","level":"warning","service":"gateway","request_id":"7f3c","status":504,"latency_ms":30012.5,"route":"/api/orders"}"#;

fn codec() -> EventCodec {
    EventCodec::new(CodecConfig {
        host: "bench-host".to_string(),
        ..CodecConfig::default()
    })
}

fn benchmark_decode(c: &mut Criterion) {
    let codec = codec();
    let ctx = MessageContext::detached();

    let mut group = c.benchmark_group("decode");
    group.throughput(Throughput::Bytes(SIMPLE.len() as u64));
    group.bench_function("simple_record", |b| {
        b.iter(|| codec.decode(std::hint::black_box(SIMPLE.as_bytes()), &ctx));
    });

    group.throughput(Throughput::Bytes(WITH_EXTRAS.len() as u64));
    group.bench_function("record_with_extras", |b| {
        b.iter(|| codec.decode(std::hint::black_box(WITH_EXTRAS.as_bytes()), &ctx));
    });
    group.finish();
}

fn benchmark_encode(c: &mut Criterion) {
    let codec = codec();
    let ctx = MessageContext::detached();
    let event = codec.decode(WITH_EXTRAS.as_bytes(), &ctx).unwrap();
    let wire = codec.encode(&event, WITH_EXTRAS.as_bytes());

    let mut group = c.benchmark_group("encode");
    group.bench_function("wire_message", |b| {
        b.iter(|| codec.encode(std::hint::black_box(&event), WITH_EXTRAS.as_bytes()));
    });
    group.bench_function("gelf_json", |b| {
        b.iter(|| std::hint::black_box(&wire).to_gelf_json());
    });
    group.finish();
}

fn benchmark_framing(c: &mut Criterion) {
    let codec = codec();
    let event = codec
        .decode(WITH_EXTRAS.as_bytes(), &MessageContext::detached())
        .unwrap();
    let payload = codec
        .encode(&event, WITH_EXTRAS.as_bytes())
        .to_gelf_json()
        .unwrap();

    let tcp = FrameEncoder::new(TransportMode::Tcp, false, 8192);
    let udp_gzip = FrameEncoder::new(TransportMode::Udp, true, 8192);

    let mut group = c.benchmark_group("framing");
    group.throughput(Throughput::Bytes(payload.len() as u64));
    group.bench_function("tcp_nul_frame", |b| {
        b.iter(|| tcp.encode(std::hint::black_box(&payload)));
    });
    group.bench_function("udp_gzip", |b| {
        b.iter(|| udp_gzip.encode(std::hint::black_box(&payload)));
    });
    group.finish();
}

criterion_group!(
    benches,
    benchmark_decode,
    benchmark_encode,
    benchmark_framing
);
criterion_main!(benches);
