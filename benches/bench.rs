use criterion::{criterion_group, criterion_main, Criterion};
use fy_yaml::{Document, Parser};

static VERY_LARGE_YAML: &[u8] = include_bytes!("very_large.yml");

pub fn parser(c: &mut Criterion) {
    c.bench_function("fy-yaml scan+parse large", |b| {
        b.iter(|| {
            let mut input = VERY_LARGE_YAML;
            let mut parser = Parser::new();
            parser.set_input(&mut input);
            while let Ok(event) = parser.parse() {
                if matches!(event.data, fy_yaml::EventData::StreamEnd) {
                    break;
                }
            }
        });
    });

    c.bench_function("fy-yaml load document large", |b| {
        b.iter(|| {
            let mut input = VERY_LARGE_YAML;
            let mut parser = Parser::new();
            parser.set_input(&mut input);
            Document::load(&mut parser)
        });
    });

    c.bench_function("fy-yaml walk large", |b| {
        let mut input = VERY_LARGE_YAML;
        let mut parser = Parser::new();
        parser.set_input(&mut input);
        let doc = Document::load(&mut parser).unwrap();

        b.iter_custom(|iters| {
            let mut measurement = std::time::Duration::ZERO;
            for _ in 0..iters {
                let mut doc = doc.clone();
                let Some(root) = doc.root_index() else {
                    continue;
                };
                let start_time = std::time::Instant::now();
                let _ = doc.walk(root, "/**");
                measurement += start_time.elapsed();
            }
            measurement
        });
    });
}

criterion_group!(benches, parser);
criterion_main!(benches);
