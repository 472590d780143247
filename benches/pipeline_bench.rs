/*!
 * Benchmarks for text pipeline operations.
 *
 * Measures performance of:
 * - Local preprocessing steps over batches of lines
 * - Subword segmentation with a small merge model
 * - Sentence splitting
 */

use criterion::{BenchmarkId, Criterion, Throughput, black_box, criterion_group, criterion_main};

use mtworker::language_utils::LanguagePair;
use mtworker::translation::pipeline::sentences::{force_split, split_text};
use mtworker::translation::pipeline::subword::SubwordSegmenter;
use mtworker::translation::{Pipeline, StepSpec};
use mtworker::translation::pipeline::StepContext;

const CODES: &str = "#version: 0.2\ne n\ni e\ns c\nsc h\nd e\ner</w>\nen</w>\nu n\nun d</w>\nt e\n";

/// Generate German test lines.
fn generate_lines(count: usize) -> Vec<String> {
    let texts = [
        "Am 3.10.1990  wurde Deutschland   wiedervereinigt .",
        "Die Verhandlungen   dauerten bis spät in die Nacht .",
        "„Wir schaffen das\" , sagte die Kanzlerin .",
        "Es regnete den ganzen Tag und niemand ging hinaus .",
        "Der Zug nach Berlin hat zwanzig Minuten Verspätung .",
    ];

    (0..count).map(|i| texts[i % texts.len()].to_string()).collect()
}

fn bench_local_pipeline(c: &mut Criterion) {
    let mut group = c.benchmark_group("local_pipeline");
    let runtime = tokio::runtime::Runtime::new().unwrap();

    let context = StepContext::new(".", LanguagePair::new("de", "en"));
    let specs = vec![
        StepSpec::new("normalize-unicode").with_parameter("form", "NFC"),
        StepSpec::new("normalize-whitespace"),
        StepSpec::new("split-dates"),
        StepSpec::new("normalize-punctuation"),
        StepSpec::new("fix-quotes"),
    ];
    let pipeline = Pipeline::new("bench", &specs, &context).unwrap();

    for size in [10, 100, 1000].iter() {
        group.throughput(Throughput::Elements(*size as u64));
        group.bench_with_input(BenchmarkId::from_parameter(size), size, |b, &size| {
            let lines = generate_lines(size);
            b.iter(|| black_box(runtime.block_on(pipeline.run(lines.clone())).unwrap()));
        });
    }

    group.finish();
}

fn bench_subword_segmentation(c: &mut Criterion) {
    let mut group = c.benchmark_group("subword_segmentation");
    let segmenter = SubwordSegmenter::from_codes(CODES, None, "@@", None, Vec::new()).unwrap();
    let lines = generate_lines(100);

    group.bench_function("segment_lines", |b| {
        b.iter(|| {
            for line in &lines {
                black_box(segmenter.segment_line(line));
            }
        });
    });

    group.bench_function("segment_word_cached", |b| {
        b.iter(|| black_box(segmenter.segment_word("Verhandlungen")));
    });

    group.finish();
}

fn bench_sentence_splitting(c: &mut Criterion) {
    let mut group = c.benchmark_group("sentence_splitting");
    let text = generate_lines(50).join(" ");

    group.bench_function("split_text", |b| {
        b.iter(|| black_box(split_text(&text)));
    });

    group.bench_function("force_split", |b| {
        let sentences = split_text(&text);
        b.iter(|| black_box(force_split(sentences.clone(), 4)));
    });

    group.finish();
}

criterion_group!(
    benches,
    bench_local_pipeline,
    bench_subword_segmentation,
    bench_sentence_splitting
);
criterion_main!(benches);
