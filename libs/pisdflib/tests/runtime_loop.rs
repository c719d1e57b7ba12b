//! End-to-end iterations through the thread runtime: real workers, real
//! queues, data observed from the outside through kernels and external
//! buffers.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use pisdflib::core::{
    AppBuilder, KernelFn, KernelIo, KernelRegistry, Param, Platform, Runtime, RuntimeConfig,
};

fn single_pe_platform() -> Platform {
    let mut builder = Platform::builder();
    let hw = builder.add_hw_type("x86");
    let cluster = builder.add_cluster("main");
    builder.add_pe("P0", hw, cluster);
    builder.build().unwrap()
}

fn noop_kernel() -> KernelFn {
    Arc::new(|_io: &mut KernelIo<'_>| Ok(()))
}

fn constant_kernel(value: u8) -> KernelFn {
    Arc::new(move |io: &mut KernelIo<'_>| {
        for output in io.outputs.iter_mut() {
            output.fill(value);
        }
        Ok(())
    })
}

fn recording_kernel(log: Arc<Mutex<Vec<u8>>>) -> KernelFn {
    Arc::new(move |io: &mut KernelIo<'_>| {
        log.lock().extend_from_slice(&io.inputs[0]);
        Ok(())
    })
}

// =========================================================================
// Static pipeline with a fork
// =========================================================================

#[test]
fn fork_scatters_data_across_sinks() {
    let platform = single_pe_platform();
    let mut kernels = KernelRegistry::new();
    let source = kernels.register(Arc::new(|io: &mut KernelIo<'_>| {
        for (ix, byte) in io.outputs[0].iter_mut().enumerate() {
            *byte = ix as u8 + 1;
        }
        Ok(())
    }));
    let x_log = Arc::new(Mutex::new(Vec::new()));
    let y_log = Arc::new(Mutex::new(Vec::new()));
    let x_sink = kernels.register(recording_kernel(Arc::clone(&x_log)));
    let y_sink = kernels.register(recording_kernel(Arc::clone(&y_log)));

    let mut b = AppBuilder::new("forked", &platform);
    let g = b.root();
    let a = b.add_actor(g, "A", 0, 1);
    let fork = b.add_fork(g, "F", 2);
    let x = b.add_actor(g, "X", 1, 0);
    let y = b.add_actor(g, "Y", 1, 0);
    b.connect_const(g, a, 0, fork, 0, 4, 4).unwrap();
    b.connect_const(g, fork, 0, x, 0, 2, 2).unwrap();
    b.connect_const(g, fork, 1, y, 0, 2, 2).unwrap();
    b.rt_mut(g, a).set_kernel_ix(source);
    b.rt_mut(g, x).set_kernel_ix(x_sink);
    b.rt_mut(g, y).set_kernel_ix(y_sink);
    let app = b.finalize().unwrap();

    let mut runtime =
        Runtime::new(app, platform, RuntimeConfig::default(), kernels, vec![]).unwrap();
    runtime.execute().unwrap();
    assert_eq!(
        runtime.memory().live_buffer_count(),
        0,
        "every buffer drains its reference count"
    );
    runtime.shutdown();
    assert_eq!(*x_log.lock(), vec![1, 2]);
    assert_eq!(*y_log.lock(), vec![3, 4]);
}

#[test]
fn join_gathers_data_in_port_order() {
    let platform = single_pe_platform();
    let mut kernels = KernelRegistry::new();
    let a_src = kernels.register(constant_kernel(5));
    let b_src = kernels.register(constant_kernel(9));
    let log = Arc::new(Mutex::new(Vec::new()));
    let sink = kernels.register(recording_kernel(Arc::clone(&log)));

    let mut b = AppBuilder::new("joined", &platform);
    let g = b.root();
    let a = b.add_actor(g, "A", 0, 1);
    let c = b.add_actor(g, "B", 0, 1);
    let join = b.add_join(g, "J", 2);
    let sink_v = b.add_actor(g, "out", 1, 0);
    b.connect_const(g, a, 0, join, 0, 2, 2).unwrap();
    b.connect_const(g, c, 0, join, 1, 2, 2).unwrap();
    b.connect_const(g, join, 0, sink_v, 0, 4, 4).unwrap();
    b.rt_mut(g, a).set_kernel_ix(a_src);
    b.rt_mut(g, c).set_kernel_ix(b_src);
    b.rt_mut(g, sink_v).set_kernel_ix(sink);
    let app = b.finalize().unwrap();

    let mut runtime =
        Runtime::new(app, platform, RuntimeConfig::default(), kernels, vec![]).unwrap();
    runtime.execute().unwrap();
    runtime.shutdown();
    assert_eq!(*log.lock(), vec![5, 5, 9, 9]);
}

// =========================================================================
// Delays: initial tokens, then persistence across iterations
// =========================================================================

#[test]
fn persistent_delay_feeds_init_tokens_and_survives_iterations() {
    let platform = single_pe_platform();
    let mut kernels = KernelRegistry::new();
    let pace = kernels.register(noop_kernel());
    let producer = kernels.register(constant_kernel(7));
    let log = Arc::new(Mutex::new(Vec::new()));
    let sink = kernels.register(recording_kernel(Arc::clone(&log)));

    let mut b = AppBuilder::new("delayed", &platform);
    let g = b.root();
    let pace_v = b.add_actor(g, "pace", 0, 1);
    let a = b.add_actor(g, "A", 1, 1);
    let v = b.add_actor(g, "B", 1, 0);
    b.connect_const(g, pace_v, 0, a, 0, 4, 1).unwrap();
    let e = b.connect_const(g, a, 0, v, 0, 1, 1).unwrap();
    b.add_delay(g, e, "2", true).unwrap();
    b.rt_mut(g, pace_v).set_kernel_ix(pace);
    b.rt_mut(g, a).set_kernel_ix(producer);
    b.rt_mut(g, v).set_kernel_ix(sink);
    let app = b.finalize().unwrap();

    let mut runtime =
        Runtime::new(app, platform, RuntimeConfig::default(), kernels, vec![]).unwrap();
    // First iteration: B#0/#1 read the (zeroed) initial tokens, B#2/#3
    // read A#0/#1; A#2/#3 drain into the delay for next time.
    runtime.execute().unwrap();
    assert_eq!(*log.lock(), vec![0, 0, 7, 7]);
    assert_eq!(runtime.memory().live_buffer_count(), 0);
    // Second iteration: the persisted tokens come back through INIT.
    runtime.execute().unwrap();
    assert_eq!(*log.lock(), vec![0, 0, 7, 7, 7, 7, 7, 7]);
    runtime.shutdown();
}

// =========================================================================
// External buffers
// =========================================================================

#[test]
fn extern_in_to_extern_out_transforms_the_buffer() {
    let mut builder = Platform::builder();
    let hw = builder.add_hw_type("x86");
    let cluster = builder.add_cluster("main");
    builder.add_pe("P0", hw, cluster);
    let input_buffer = builder.register_external_buffer(4);
    let output_buffer = builder.register_external_buffer(4);
    let platform = builder.build().unwrap();

    let mut kernels = KernelRegistry::new();
    let increment = kernels.register(Arc::new(|io: &mut KernelIo<'_>| {
        for (out, &byte) in io.outputs[0].iter_mut().zip(io.inputs[0].iter()) {
            *out = byte + 1;
        }
        Ok(())
    }));

    let mut b = AppBuilder::new("extern", &platform);
    let g = b.root();
    let ein = b.add_extern_in(g, "in", input_buffer);
    let t = b.add_actor(g, "T", 1, 1);
    let eout = b.add_extern_out(g, "out", output_buffer);
    b.connect_const(g, ein, 0, t, 0, 4, 4).unwrap();
    b.connect_const(g, t, 0, eout, 0, 4, 4).unwrap();
    b.rt_mut(g, t).set_kernel_ix(increment);
    let app = b.finalize().unwrap();

    let mut runtime = Runtime::new(
        app,
        platform,
        RuntimeConfig::default(),
        kernels,
        vec![vec![1, 2, 3, 4]],
    )
    .unwrap();
    runtime.execute().unwrap();
    let externals = runtime.shutdown();
    assert_eq!(externals[0], vec![1, 2, 3, 4], "inputs are never written");
    assert_eq!(externals[1], vec![2, 3, 4, 5]);
}

// =========================================================================
// Dynamic parameters
// =========================================================================

#[test]
fn config_actor_resolves_the_subgraph_mid_iteration() {
    let platform = single_pe_platform();
    let mut kernels = KernelRegistry::new();
    let config = kernels.register(Arc::new(|io: &mut KernelIo<'_>| {
        io.output_params.push(3);
        Ok(())
    }));
    let src = kernels.register(noop_kernel());
    let fired = Arc::new(AtomicUsize::new(0));
    let counter = {
        let fired = Arc::clone(&fired);
        kernels.register(Arc::new(move |_io: &mut KernelIo<'_>| {
            fired.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }))
    };

    let mut b = AppBuilder::new("dynamic", &platform);
    let g = b.root();
    let n = b.add_param(g, Param::dynamic("n"));
    let cfg = b.add_config(g, "C", 0, 0);
    b.set_output_params(g, cfg, &[n]);
    b.rt_mut(g, cfg).set_kernel_ix(config);
    let (_sv, sub) = b.add_subgraph(g, "S", 0, 0);
    let inner_n = b.add_param(sub, Param::inherited("n", n));
    let src_v = b.add_actor(sub, "src", 0, 1);
    let v = b.add_actor(sub, "V", 1, 0);
    b.connect(sub, src_v, 0, v, 0, "n", "1").unwrap();
    b.rt_mut(sub, src_v).set_kernel_ix(src);
    b.rt_mut(sub, v).set_kernel_ix(counter);
    let _ = inner_n;
    let app = b.finalize().unwrap();

    let mut runtime =
        Runtime::new(app, platform, RuntimeConfig::default(), kernels, vec![]).unwrap();
    // Pass 1 runs C alone; the parameter message resolves S; pass 2 runs
    // V n=3 times; the driver then sees no outstanding parameters.
    runtime.execute().unwrap();
    assert_eq!(fired.load(Ordering::SeqCst), 3);
    // The next iteration re-runs the config from scratch.
    runtime.execute().unwrap();
    assert_eq!(fired.load(Ordering::SeqCst), 6);
    runtime.shutdown();
}
