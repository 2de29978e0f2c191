use criterion::{black_box, criterion_group, criterion_main, Criterion};

use dts_compiler::{parser::parse, source::SourceMap, validate::validate};

pub fn pipeline(c: &mut Criterion) {
    let source = include_str!("board.dts");

    c.bench_function("from_str board.dts", |b| {
        b.iter(|| dts_compiler::from_str(black_box(source)))
    });

    c.bench_function("parse + validate board.dts", |b| {
        b.iter(|| {
            let mut sources = SourceMap::default();
            let id = sources.add("board.dts", black_box(source));
            parse(&mut sources, id).map(validate)
        })
    });
}

criterion_group!(benches, pipeline);
criterion_main!(benches);
