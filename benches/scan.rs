use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};

use pac_scanner::{FlowGraph, FlowOptions, Parser, ParserOptions, Templates};

const DEFINITIONS: &str = "\
25;01;00;00;4;cmd_end;End;;0;0
25;01;00;01;8;cmd_jmp;Jump;;1;jump;target;0
25;02;00;00;C;cmd_set;Set;;2;variable;dst;variable;src;0
25;07;00;12;0;cmd_msg;Message;;2;varc;speaker;string;text;0
";

/// A script of `blocks` repetitions of set, message, jump.
fn build_script(blocks: usize) -> Vec<u8> {
    let mut data = Vec::new();
    for i in 0..blocks {
        data.extend_from_slice(&[0x25, 0x02, 0x00, 0x00]);
        data.extend_from_slice(&[0x20, 0, 0, 0, 1, 0, 0, 0, 0x02, 0, 0, 0, 5, 0, 0, 0]);
        data.extend_from_slice(&[0x25, 0x07, 0x00, 0x12, 0x40, 3, 0, 0, 0]);
        data.extend_from_slice(b"hello\0");
        while data.len() % 4 != 0 {
            data.push(0);
        }
        let target = u32::try_from((i + 1) * 48).unwrap_or(0);
        data.extend_from_slice(&[0x25, 0x01, 0x00, 0x01]);
        data.extend_from_slice(&target.to_le_bytes());
        data.extend_from_slice(&[0xDE, 0xAD, 0xBE, 0xEF]);
    }
    data.extend_from_slice(&[0x25, 0x01, 0x00, 0x00]);
    data
}

fn bench_scan(c: &mut Criterion) {
    let templates = Templates::load(DEFINITIONS).unwrap();
    let mut group = c.benchmark_group("scan");
    for &blocks in &[16_usize, 256, 4096] {
        let data = build_script(blocks);
        for (name, options) in [
            ("permissive", ParserOptions::new()),
            ("known_only", ParserOptions::known_only()),
        ] {
            let parser = Parser::new(&templates, options);
            group.bench_with_input(BenchmarkId::new(name, blocks), &data, |b, data| {
                b.iter(|| black_box(parser.parse(data).unwrap()));
            });
        }
    }
    group.finish();
}

fn bench_flow(c: &mut Criterion) {
    let templates = Templates::load(DEFINITIONS).unwrap();
    let parser = Parser::new(&templates, ParserOptions::new());
    let options = FlowOptions::new().with_terminator(0x2501_0000);
    let mut group = c.benchmark_group("flow");
    for &blocks in &[16_usize, 256, 4096] {
        let file = parser.parse(&build_script(blocks)).unwrap();
        group.bench_with_input(BenchmarkId::from_parameter(blocks), &file, |b, file| {
            b.iter(|| black_box(FlowGraph::build(file, &options)));
        });
    }
    group.finish();
}

criterion_group!(benches, bench_scan, bench_flow);
criterion_main!(benches);
