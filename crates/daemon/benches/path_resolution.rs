//! Performance benchmarks for path resolution.
//!
//! These benchmarks measure the hot paths every request goes through:
//! - Virtual path resolution against a mapping set
//! - Access guard checks (lexical and canonical)
//! - Reverse mapping for archive entry names

use std::fs;

use criterion::{black_box, criterion_group, criterion_main, Criterion};
use daemon::files::{is_safe, DirectoryMapping, MappingSet, VirtualPathResolver};
use tempfile::TempDir;

/// Mapping set with `count` sibling prefixes plus a nested one.
fn mapping_set(root: &TempDir, count: usize) -> MappingSet {
    let mut mappings = Vec::with_capacity(count + 1);
    for i in 0..count {
        let source = root.path().join(format!("dir{i}"));
        fs::create_dir_all(source.join("sub")).unwrap();
        mappings.push(DirectoryMapping::new(source, &format!("/mount{i}")));
    }
    let nested = root.path().join("nested");
    fs::create_dir_all(&nested).unwrap();
    mappings.push(DirectoryMapping::new(nested, "/mount0/deep/er"));
    MappingSet::new(mappings)
}

/// Benchmark virtual-to-physical resolution.
fn bench_resolve(c: &mut Criterion) {
    let mut group = c.benchmark_group("resolve");
    let root = TempDir::new().unwrap();

    for count in [1, 16, 128] {
        let resolver = VirtualPathResolver::new(mapping_set(&root, count));
        let last = format!("/mount{}/sub/file.txt", count - 1);

        group.bench_function(format!("first_of_{count}"), |b| {
            b.iter(|| resolver.resolve(black_box("/mount0/sub/file.txt")))
        });
        group.bench_function(format!("last_of_{count}"), |b| {
            b.iter(|| resolver.resolve(black_box(&last)))
        });
        group.bench_function(format!("miss_of_{count}"), |b| {
            b.iter(|| resolver.resolve(black_box("/nowhere/file.txt")))
        });
    }

    group.finish();
}

/// Benchmark the access guard.
fn bench_guard(c: &mut Criterion) {
    let mut group = c.benchmark_group("guard");
    let root = TempDir::new().unwrap();
    let mappings = mapping_set(&root, 16);

    let inside_existing = root.path().join("dir3/sub");
    let inside_missing = root.path().join("dir3/sub/not/yet/created.txt");
    let escape = root.path().join("dir3/../../etc/passwd");

    group.bench_function("inside_existing", |b| {
        b.iter(|| is_safe(black_box(&inside_existing), &mappings))
    });
    group.bench_function("inside_missing", |b| {
        b.iter(|| is_safe(black_box(&inside_missing), &mappings))
    });
    group.bench_function("escape", |b| {
        b.iter(|| is_safe(black_box(&escape), &mappings))
    });

    group.finish();
}

/// Benchmark physical-to-virtual mapping.
fn bench_reverse(c: &mut Criterion) {
    let root = TempDir::new().unwrap();
    let resolver = VirtualPathResolver::new(mapping_set(&root, 16));
    let physical = root.path().join("nested/a/b/c.txt");

    c.bench_function("reverse_nested", |b| {
        b.iter(|| resolver.reverse(black_box(&physical)))
    });
}

criterion_group!(benches, bench_resolve, bench_guard, bench_reverse);
criterion_main!(benches);
