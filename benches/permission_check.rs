use criterion::{criterion_group, criterion_main, BenchmarkId, Criterion, SamplingMode, Throughput};
use std::sync::Arc;

use lendbook::clock::SystemClock;
use lendbook::identity::{seed_defaults, EngineSettings, PermissionEngine, User};
use lendbook::storage::{MemoryKvStore, MemoryRepository, RbacRepository};
use lendbook::identity::{LockoutPolicy, LoginAttemptGuard};

fn seeded_engine(settings: EngineSettings) -> (PermissionEngine, User) {
    let repo = Arc::new(MemoryRepository::new());
    let engine = PermissionEngine::over(repo.clone(), Arc::new(SystemClock), settings);
    seed_defaults(&engine).expect("seed");
    let user = repo
        .insert_user(User { name: "bench".into(), email: "bench@lib.test".into(), is_active: true, ..Default::default() })
        .expect("user");
    engine.assign_role(&user, "librarian", None).expect("assign");
    engine.assign_role(&user, "member", None).expect("assign");
    (engine, user)
}

fn bench_permission_check(c: &mut Criterion) {
    let mut group = c.benchmark_group("permission_check");
    group.sampling_mode(SamplingMode::Flat);
    group.sample_size(30);
    group.throughput(Throughput::Elements(1));

    for cached in [false, true] {
        let settings = EngineSettings { permission_cache_enabled: cached, ..EngineSettings::default() };
        let (engine, user) = seeded_engine(settings);
        let label = if cached { "cached" } else { "uncached" };

        group.bench_with_input(BenchmarkId::new("has_permission", label), &cached, |b, _| {
            b.iter(|| criterion::black_box(engine.has_permission(&user, "books_update")));
        });
        group.bench_with_input(BenchmarkId::new("can_access_resource", label), &cached, |b, _| {
            b.iter(|| criterion::black_box(engine.can_access_resource(&user, "update", "bundles", 7)));
        });
    }

    let (engine, _user) = seeded_engine(EngineSettings::default());
    group.bench_function("get_role_by_slug", |b| {
        b.iter(|| criterion::black_box(engine.get_role_by_slug("librarian").ok()));
    });
    group.finish();
}

fn bench_login_guard(c: &mut Criterion) {
    let mut group = c.benchmark_group("login_guard");
    group.sample_size(30);
    let clock = Arc::new(SystemClock);
    let guard = LoginAttemptGuard::new(
        Arc::new(MemoryKvStore::new(clock.clone())),
        clock,
        LockoutPolicy { max_attempts: u32::MAX, ..LockoutPolicy::default() },
    );
    group.bench_function("record_failed_attempt", |b| {
        b.iter(|| criterion::black_box(guard.record_failed_attempt("bench@lib.test").ok()));
    });
    group.bench_function("check_user_status", |b| {
        b.iter(|| criterion::black_box(guard.check_user_status("bench@lib.test").ok()));
    });
    group.finish();
}

criterion_group!(benches, bench_permission_check, bench_login_guard);
criterion_main!(benches);
