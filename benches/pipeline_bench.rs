//! Benchmarks for path resolution, variable substitution and hashing.

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use artifact_collector::filesystem::pipeline::resolve;
use artifact_collector::filesystem::OsFileSystem;
use artifact_collector::utils::hash::MultiHasher;
use artifact_collector::variables::HostVariables;
use std::fs;
use tempfile::TempDir;

/// Builds `width` directories per level, `depth` levels deep, each holding a
/// few files.
fn create_tree(width: usize, depth: usize) -> TempDir {
    let temp_dir = TempDir::new().unwrap();
    let mut level = vec![temp_dir.path().to_path_buf()];
    for _ in 0..depth {
        let mut next = Vec::new();
        for dir in &level {
            for f in 0..4 {
                fs::write(dir.join(format!("file{}.log", f)), b"entry").unwrap();
            }
            for d in 0..width {
                let child = dir.join(format!("dir{}", d));
                fs::create_dir(&child).unwrap();
                next.push(child);
            }
        }
        level = next;
    }
    temp_dir
}

/// Benchmark glob patterns of increasing cost
fn bench_resolve_patterns(c: &mut Criterion) {
    let mut group = c.benchmark_group("resolve_patterns");
    let tree = create_tree(4, 4);
    let fs = OsFileSystem::new(tree.path());

    for pattern in ["dir1/dir2/file1.log", "*/*/*.log", "**/*.log", "**-1"] {
        group.bench_with_input(BenchmarkId::new("resolve", pattern), &pattern, |b, pattern| {
            b.iter(|| resolve(&fs, black_box(pattern), false).count());
        });
    }

    group.finish();
}

/// Benchmark expansion of multi-valued variables
fn bench_substitution(c: &mut Criterion) {
    let variables = HostVariables::new(|v| {
        for user in 0..50 {
            v.add_variable("users.homedir", format!("/home/user{}", user));
            v.add_variable("users.username", format!("user{}", user));
        }
        v.add_variable("systemroot", "/");
    });

    c.bench_function("substitute_homedir", |b| {
        b.iter(|| variables.substitute(black_box("%%users.homedir%%/.config/*/history")));
    });
    c.bench_function("substitute_no_tokens", |b| {
        b.iter(|| variables.substitute(black_box("/var/log/syslog")));
    });
}

/// Benchmark streaming MD5 + SHA-1 + SHA-256 over different chunk sizes
fn bench_multi_hasher(c: &mut Criterion) {
    let mut group = c.benchmark_group("multi_hasher");
    let data = vec![0u8; 4 * 1024 * 1024];
    group.throughput(Throughput::Bytes(data.len() as u64));

    for chunk_size in [64 * 1024, 1024 * 1024] {
        group.bench_with_input(BenchmarkId::new("chunk", chunk_size), &chunk_size, |b, &size| {
            b.iter(|| {
                let mut hasher = MultiHasher::new();
                for chunk in data.chunks(size) {
                    hasher.update(black_box(chunk));
                }
                hasher.finalize()
            });
        });
    }

    group.finish();
}

criterion_group!(benches, bench_resolve_patterns, bench_substitution, bench_multi_hasher);
criterion_main!(benches);
