use std::collections::HashSet;

use criterion::{black_box, criterion_group, criterion_main, BatchSize, BenchmarkId, Criterion};

use allot::executable::{Executable, ExecutableId, ExecutableKind, ExecutableState};
use allot::executor::{ExecutionAction, ExecutionPlan};
use allot::value::{ValueAllocator, ValueProvider, ValueProviderId};
use allot::Slot;

const PLAN_SIZES: &[usize] = &[10, 100, 1000];
const TAKEN_COUNTS: &[usize] = &[0, 100, 900];

fn executable(id: i64, dependencies: Vec<ExecutableId>) -> Executable {
    Executable {
        id: ExecutableId(id),
        kind: ExecutableKind::Compartment {
            connections: Vec::new(),
        },
        slot: "2012-01-01T12:00:00Z/2012-01-01T14:00:00Z"
            .parse::<Slot>()
            .expect("valid slot"),
        state: ExecutableState::NotStarted,
        attempt_count: 0,
        next_attempt_at: None,
        room_id: None,
        dependencies,
        report: None,
    }
}

/// Starts where every executable depends on up to three predecessors, half
/// of them paired with a stop of an unrelated executable.
fn actions(count: usize) -> Vec<ExecutionAction> {
    let count = i64::try_from(count).expect("plan size fits i64");
    let mut actions = Vec::new();
    for id in 0..count {
        let dependencies = (1..=3)
            .filter(|offset| id - offset >= 0)
            .map(|offset| ExecutableId(id - offset))
            .collect();
        actions.push(ExecutionAction::Start(executable(id, dependencies)));
        if id % 2 == 0 {
            actions.push(ExecutionAction::Stop(executable(count + id, Vec::new())));
        }
    }
    actions
}

fn drain(mut plan: ExecutionPlan) -> usize {
    let mut batches = 0;
    while !plan.is_empty() {
        for id in plan.pop_actions() {
            plan.remove_action(id);
        }
        batches += 1;
    }
    batches
}

fn bench_plan(c: &mut Criterion) {
    let mut group = c.benchmark_group("execution_plan");

    for &size in PLAN_SIZES {
        group.bench_with_input(BenchmarkId::new("build", size), &size, |b, &size| {
            b.iter_batched(
                || actions(size),
                |actions| black_box(ExecutionPlan::build(actions).expect("acyclic plan")),
                BatchSize::SmallInput,
            );
        });

        group.bench_with_input(BenchmarkId::new("build_and_drain", size), &size, |b, &size| {
            b.iter_batched(
                || actions(size),
                |actions| black_box(drain(ExecutionPlan::build(actions).expect("acyclic plan"))),
                BatchSize::SmallInput,
            );
        });
    }

    group.finish();
}

fn bench_pattern_allocation(c: &mut Criterion) {
    let providers = vec![ValueProvider::patterns(["95{digit:3}"])];
    let allocator =
        ValueAllocator::resolve(&providers, ValueProviderId::new(0)).expect("valid provider");
    let mut group = c.benchmark_group("pattern_allocation");

    for &taken_count in TAKEN_COUNTS {
        let taken: HashSet<String> = (0..taken_count).map(|n| format!("95{n:03}")).collect();
        group.bench_with_input(
            BenchmarkId::new("first_free", taken_count),
            &taken,
            |b, taken| {
                b.iter(|| {
                    black_box(
                        allocator
                            .allocate(None, |value| taken.contains(value))
                            .expect("values left"),
                    )
                });
            },
        );
    }

    group.bench_function("requested_value", |b| {
        b.iter(|| {
            black_box(
                allocator
                    .allocate(Some(black_box("95123")), |_| false)
                    .expect("requested value free"),
            )
        });
    });

    group.finish();
}

criterion_group!(benches, bench_plan, bench_pattern_allocation);
criterion_main!(benches);
