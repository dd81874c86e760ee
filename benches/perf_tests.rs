use async_binary_logger::protocol::{encode, encoded_len, Arity, HeaderData};
use async_binary_logger::{
    log_error, FixedWidth, Hex, InitResult, Literal, Loggable, Logger, LoggerConfig, Severity,
    Sink,
};
use criterion::{black_box, criterion_group, criterion_main, Criterion};

// Sink that does nothing - for measuring the producer side only
struct NullSink;

impl Sink for NullSink {
    fn write(&mut self, _severity: Severity, _line: &[u8]) -> bool {
        true
    }

    fn raw_write(&mut self, _severity: Severity, _msg: &str) {}

    fn flush(&mut self) {}
}

fn bench_encode(c: &mut Criterion) {
    let literal = Literal::new("Event id={} active={} value={} mask={} desc={}");
    let header = HeaderData::new(Severity::Error, Arity::Format);
    let mut buf = vec![0u8; 256];

    c.bench_function("encode_five_fields", |b| {
        b.iter(|| {
            let fields: [&dyn Loggable; 6] = [
                &literal,
                &black_box(42i32),
                &black_box(true),
                &black_box(3.25f64),
                &Hex(black_box(0xdead_beefu32)),
                &black_box("benchmark entry"),
            ];
            let len = encoded_len(&header, &fields);
            black_box(encode(&mut buf[..len], &header, &fields))
        })
    });
}

fn bench_push(c: &mut Criterion) {
    let logger = Logger::new(LoggerConfig::default());
    assert_eq!(logger.init_backend(NullSink), InitResult::Ok);

    c.bench_function("push_three_fields", |b| {
        let mut i = 0u64;
        b.iter(|| {
            i += 1;
            black_box(log_error!(logger, "idx {} of {} at {}", i, FixedWidth(7u16), "bench"))
        })
    });

    logger.set_severity(Severity::Off);
    logger.set_console_severity(Severity::Off);
    c.bench_function("push_filtered", |b| {
        b.iter(|| black_box(log_error!(logger, "never {}", 1u8)))
    });

    logger.on_termination();
}

criterion_group!(benches, bench_encode, bench_push);
criterion_main!(benches);
