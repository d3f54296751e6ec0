/*
Measures the analysis side per frame: the brightness integrator on a camera-sized
frame, and one analysis-loop iteration (slot hand-off, analyzer lock, event log,
statistics). The loop runs as fast as frames arrive, so this bounds the frame rate
it can keep up with.
*/

use criterion::{Criterion, criterion_group, criterion_main};
use std::{
    hint::black_box,
    sync::{Arc, atomic::AtomicBool},
};

use laser_feedback::{
    component_a::{
        analysis_loop::{AnalysisLoop, AnalysisTiming, FrameFeed},
        analyzer::{Analyzer, SharedAnalyzer},
        frame::{Frame, Roi},
        frame_slot::frame_slot,
        integrator::Integrator,
    },
    context::RuntimeContext,
};

fn integrator_bench(c: &mut Criterion) {
    let frame = Frame::uniform(512, 512, 120, 1);
    let mut integrator = Integrator::new();

    c.bench_function("integrator_512x512_full_frame", |b| {
        b.iter(|| integrator.process_image(black_box(&frame)))
    });

    integrator.set_roi(Some(Roi::new(128, 128, 256, 256)));
    c.bench_function("integrator_512x512_roi_256", |b| {
        b.iter(|| integrator.process_image(black_box(&frame)))
    });
}

fn analysis_loop_bench(c: &mut Criterion) {
    let (tx, rx) = frame_slot();
    let mut worker = AnalysisLoop::new(
        SharedAnalyzer::new(Box::new(Integrator::new())),
        FrameFeed::Push(rx),
        Arc::new(AtomicBool::new(true)),
        RuntimeContext::new(),
        AnalysisTiming::default(),
    );
    let handle = worker.handle();
    let mut seq = 0u64;

    c.bench_function("analysis_loop_process_next_256x256", |b| {
        b.iter(|| {
            seq += 1;
            tx.publish(Frame::uniform(256, 256, (seq % 1000) as u16, seq));
            black_box(worker.process_next().unwrap());
            black_box(handle.drain_batch_output())
        })
    });
}

criterion_group!(benches, integrator_bench, analysis_loop_bench);
criterion_main!(benches);
