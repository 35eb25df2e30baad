// SPDX-FileCopyrightText: Copyright (c) 2024 NVIDIA CORPORATION & AFFILIATES. All rights reserved.
// SPDX-License-Identifier: Apache-2.0
//! Benchmarks for the wire-value solver on inverter chains.

use criterion::{black_box, criterion_group, criterion_main, BatchSize, BenchmarkId, Criterion};
use mosnet::loader::CircuitFile;
use mosnet::sim::Simulator;

/// Chain of `stages` NMOS inverters with pullups, driven from wire `IN`.
fn inverter_chain(stages: usize) -> Simulator {
    let mut names: Vec<String> = vec!["VCC".into(), "VSS".into(), "IN".into()];
    for i in 0..stages {
        names.push(format!("N{}", i));
    }
    let name_refs: Vec<&str> = names.iter().map(|s| s.as_str()).collect();

    let mut pulled = vec![0u8, 0, 2];
    pulled.resize(3 + stages, 1);

    let fets: Vec<(u32, u32, u32)> = (0..stages as u32)
        .map(|i| {
            let gate = if i == 0 { 2 } else { 2 + i };
            (gate, 3 + i, 1)
        })
        .collect();

    Simulator::from_circuit_file(&CircuitFile::from_components(&name_refs, &pulled, &fets))
        .unwrap()
}

fn bench_settle(c: &mut Criterion) {
    let mut group = c.benchmark_group("settle");
    for stages in [16, 64, 256] {
        group.bench_with_input(BenchmarkId::from_parameter(stages), &stages, |b, &stages| {
            b.iter_batched(
                || inverter_chain(stages),
                |mut sim| {
                    sim.recalc_all().unwrap();
                    black_box(sim.wires_state())
                },
                BatchSize::SmallInput,
            );
        });
    }
    group.finish();
}

fn bench_toggle(c: &mut Criterion) {
    let mut group = c.benchmark_group("toggle_propagation");
    for stages in [16, 64, 256] {
        group.bench_with_input(BenchmarkId::from_parameter(stages), &stages, |b, &stages| {
            let mut sim = inverter_chain(stages);
            sim.recalc_all().unwrap();
            sim.advance_half_clock();
            let mut high = false;
            b.iter(|| {
                high = !high;
                sim.set_pulled(2, high);
                sim.recalc_wire_list(black_box(&[2])).unwrap();
            });
        });
    }
    group.finish();
}

criterion_group!(benches, bench_settle, bench_toggle);
criterion_main!(benches);
