use criterion::{black_box, criterion_group, criterion_main, Criterion};
use cacheprobe::resp::{encode_command, parse_reply};

fn bench_resp_parse(c: &mut Criterion) {
    let mut group = c.benchmark_group("resp");
    group.bench_function("parse_replies_1k", |b| {
        let mut buf = Vec::new();
        for i in 0..1000 {
            let val = format!("val{}", i);
            buf.extend_from_slice(format!("${}\r\n{}\r\n", val.len(), val).as_bytes());
        }
        b.iter(|| {
            let mut cursor = 0;
            let mut count = 0;
            while let Some((used, reply)) = parse_reply(&buf[cursor..]).unwrap() {
                cursor += used;
                count += 1;
                black_box(reply);
            }
            black_box(count);
        });
    });
    group.bench_function("encode_set", |b| {
        b.iter(|| black_box(encode_command(&[b"SET", b"key", b"value"])));
    });
    group.finish();
}

criterion_group!(benches, bench_resp_parse);
criterion_main!(benches);
