//! Component-level scenarios: scheduling, mapping and FIFO allocation are
//! driven directly (no worker threads) so the schedule and the emitted
//! job messages can be inspected.

use pisdflib::core::archi::{LrtId, MemoryBus, PeId, Platform};
use pisdflib::core::firing::Handlers;
use pisdflib::core::graph::{App, AppBuilder};
use pisdflib::core::scheduling::{
    make_mapper, make_scheduler, CountUpdate, ExecutionPolicy, JobSink, MappingPolicy,
    ResourcesAllocator, Schedule, SchedulingPolicy, SyncKind, Task, TaskKind,
};
use pisdflib::core::graph::{GraphId, VertexKind};
use pisdflib::core::Expression;
use pisdflib_ipc_types::{kernel_ix, FifoAttribute, JobMessage};

#[derive(Default)]
struct CollectSink {
    messages: Vec<(u16, JobMessage)>,
    updates: Vec<CountUpdate>,
}

impl JobSink for CollectSink {
    fn dispatch(&mut self, lrt: LrtId, message: JobMessage) {
        self.messages.push((lrt.0, message));
    }

    fn update_count(&mut self, update: CountUpdate) {
        self.updates.push(update);
    }
}

/// Bind a placeholder user-kernel index to every actor of a graph; these
/// scenarios never run the jobs, only inspect the messages.
fn bind_kernels(b: &mut AppBuilder<'_>, graph: GraphId) {
    let ids: Vec<_> = b
        .graph(graph)
        .vertices
        .iter()
        .filter(|v| matches!(v.kind, VertexKind::Normal | VertexKind::Config))
        .map(|v| v.ix)
        .collect();
    for vertex in ids {
        b.rt_mut(graph, vertex).set_kernel_ix(kernel_ix::FIRST_USER);
    }
}

fn single_pe_platform() -> Platform {
    let mut builder = Platform::builder();
    let hw = builder.add_hw_type("x86");
    let cluster = builder.add_cluster("main");
    builder.add_pe("P0", hw, cluster);
    builder.build().unwrap()
}

fn run_pass(app: &App, platform: &Platform) -> (Handlers, ResourcesAllocator, CollectSink) {
    let mut handlers = Handlers::new(app);
    handlers.resolve_all(app).unwrap();
    let mut resources = ResourcesAllocator::new(
        SchedulingPolicy::List,
        MappingPolicy::BestFit,
        ExecutionPolicy::Jit,
        platform,
        app.first_dynamic_address(),
    );
    let mut sink = CollectSink::default();
    resources
        .execute(app, platform, &mut handlers, &mut sink)
        .unwrap();
    (handlers, resources, sink)
}

fn find_task<'s>(
    schedule: &'s Schedule,
    handlers: &Handlers,
    app: &App,
    name: &str,
    k: u32,
) -> &'s Task {
    schedule
        .tasks()
        .iter()
        .find(|t| match t.kind {
            TaskKind::Vertex {
                firing,
                vertex,
                vertex_firing,
            } => {
                let graph = app.graph(handlers.graph_of(firing));
                graph.vertex(vertex).name == name && vertex_firing == k
            }
            TaskKind::Sync { .. } => false,
        })
        .unwrap_or_else(|| panic!("no task for {name}#{k}"))
}

// =========================================================================
// Fork aliasing
// =========================================================================

#[test]
fn fork_outputs_alias_the_input_buffer() {
    let platform = single_pe_platform();
    let mut b = AppBuilder::new("fork", &platform);
    let g = b.root();
    let a = b.add_actor(g, "A", 0, 1);
    let fork = b.add_fork(g, "F", 3);
    let sinks = ["B", "C", "D"].map(|name| b.add_actor(g, name, 1, 0));
    b.connect_const(g, a, 0, fork, 0, 6, 6).unwrap();
    for (port, &sink) in sinks.iter().enumerate() {
        b.connect_const(g, fork, port as u32, sink, 0, 2, 2).unwrap();
    }
    bind_kernels(&mut b, g);
    let app = b.finalize().unwrap();
    let (handlers, resources, _sink) = run_pass(&app, &platform);
    let schedule = resources.schedule();

    let a_task = find_task(schedule, &handlers, &app, "A", 0);
    let a_address = a_task.output_fifos[0].address;
    let fork_task = find_task(schedule, &handlers, &app, "F", 0);
    let offsets: Vec<u32> = fork_task.output_fifos.iter().map(|f| f.offset).collect();
    assert_eq!(offsets, vec![0, 2, 4]);
    for fifo in &fork_task.output_fifos {
        assert_eq!(fifo.address, a_address, "fork outputs alias A's buffer");
        assert_eq!(fifo.attribute, FifoAttribute::RwOnly);
        assert_eq!(fifo.size, 2);
    }
    // Consumers read A's buffer directly at the fork offsets.
    for (ix, name) in ["B", "C", "D"].iter().enumerate() {
        let task = find_task(schedule, &handlers, &app, name, 0);
        assert_eq!(task.input_fifos[0].address, a_address);
        assert_eq!(task.input_fifos[0].offset, 2 * ix as u32);
    }
    // No new virtual address was allocated for the fork outputs.
    let addresses: std::collections::HashSet<u64> = schedule
        .tasks()
        .iter()
        .flat_map(|t| t.output_fifos.iter().map(|f| f.address))
        .collect();
    assert_eq!(addresses.len(), 1);
    // A's buffer is read by the fork and the three consumers.
    assert_eq!(a_task.output_fifos[0].count, 4);
}

// =========================================================================
// Cross-cluster mapping
// =========================================================================

#[test]
fn cross_cluster_mapping_inserts_send_receive() {
    let mut builder = Platform::builder();
    let hw = builder.add_hw_type("x86");
    let cx = builder.add_cluster("X");
    let cy = builder.add_cluster("Y");
    builder.add_pe("P0", hw, cx);
    builder.add_pe("P1", hw, cx);
    builder.add_pe("P2", hw, cy);
    builder.connect_clusters(cx, cy, MemoryBus::fixed(5), MemoryBus::fixed(5));
    let platform = builder.build().unwrap();

    let mut b = AppBuilder::new("comm", &platform);
    let g = b.root();
    let a = b.add_actor(g, "A", 0, 1);
    let v = b.add_actor(g, "B", 1, 0);
    b.connect_const(g, a, 0, v, 0, 16, 16).unwrap();
    b.rt_mut(g, a).set_timing_on_all_hw_types(Expression::constant(10));
    b.rt_mut(g, a).set_mappable_only_on_cluster(cx);
    b.rt_mut(g, v).set_timing_on_all_hw_types(Expression::constant(10));
    b.rt_mut(g, v).set_mappable_only_on_cluster(cy);
    bind_kernels(&mut b, g);
    let app = b.finalize().unwrap();

    let (handlers, resources, _sink) = run_pass(&app, &platform);
    let schedule = resources.schedule();
    assert_eq!(schedule.len(), 4, "A, SEND, RECEIVE, B");

    let a_task = find_task(schedule, &handlers, &app, "A", 0);
    assert_eq!((a_task.start_time, a_task.end_time), (0, 10));
    assert_eq!(a_task.mapped_pe, Some(PeId(0)));

    let send = schedule
        .tasks()
        .iter()
        .find(|t| matches!(t.kind, TaskKind::Sync { kind: SyncKind::Send, .. }))
        .expect("a SEND was inserted");
    assert_eq!((send.start_time, send.end_time), (10, 15));
    assert_eq!(platform.pe(send.mapped_pe.unwrap()).cluster, cx);

    let recv = schedule
        .tasks()
        .iter()
        .find(|t| matches!(t.kind, TaskKind::Sync { kind: SyncKind::Receive, .. }))
        .expect("a RECEIVE was inserted");
    assert_eq!((recv.start_time, recv.end_time), (15, 20));
    assert_eq!(recv.mapped_pe, Some(PeId(2)));

    let b_task = find_task(schedule, &handlers, &app, "B", 0);
    assert_eq!((b_task.start_time, b_task.end_time), (20, 30));
    assert_eq!(b_task.mapped_pe, Some(PeId(2)));
    assert_eq!(schedule.stats().makespan, 30);

    // The RECEIVE waits on the SEND across the LRT boundary; the consumer
    // shares the RECEIVE's worker, so queue order covers the rest.
    let send_lrt = send.mapped_lrt.unwrap();
    assert_eq!(
        recv.sync_exec_ix_on_lrt[send_lrt.0 as usize],
        send.job_exec_ix
    );
    assert!(send.notify_flags[recv.mapped_lrt.unwrap().0 as usize]);
    assert!(b_task
        .sync_exec_ix_on_lrt
        .iter()
        .all(|&job| job == pisdflib::core::UNSET_IX));
}

#[test]
fn missing_bus_is_a_routing_error() {
    let mut builder = Platform::builder();
    let hw = builder.add_hw_type("x86");
    let cx = builder.add_cluster("X");
    let cy = builder.add_cluster("Y");
    builder.add_pe("P0", hw, cx);
    builder.add_pe("P1", hw, cy);
    let platform = builder.build().unwrap();

    let mut b = AppBuilder::new("noroute", &platform);
    let g = b.root();
    let a = b.add_actor(g, "A", 0, 1);
    let v = b.add_actor(g, "B", 1, 0);
    b.connect_const(g, a, 0, v, 0, 4, 4).unwrap();
    b.rt_mut(g, a).set_mappable_only_on_cluster(cx);
    b.rt_mut(g, v).set_mappable_only_on_cluster(cy);
    bind_kernels(&mut b, g);
    let app = b.finalize().unwrap();

    let mut handlers = Handlers::new(&app);
    handlers.resolve_all(&app).unwrap();
    let mut resources = ResourcesAllocator::new(
        SchedulingPolicy::List,
        MappingPolicy::BestFit,
        ExecutionPolicy::Jit,
        &platform,
        0,
    );
    let mut sink = CollectSink::default();
    let err = resources
        .execute(&app, &platform, &mut handlers, &mut sink)
        .unwrap_err();
    assert!(matches!(err, pisdflib::PisdfError::NoRoute { .. }));
}

// =========================================================================
// Best-fit vs round-robin
// =========================================================================

fn three_identical_tasks(platform: &Platform) -> App {
    let mut b = AppBuilder::new("three", platform);
    let g = b.root();
    for name in ["X", "A", "B", "C"] {
        let v = b.add_actor(g, name, 0, 0);
        let timing = if name == "X" { 50 } else { 60 };
        b.rt_mut(g, v)
            .set_timing_on_all_hw_types(Expression::constant(timing));
    }
    b.finalize().unwrap()
}

fn map_three(platform: &Platform, app: &App, policy: MappingPolicy) -> Vec<(String, u32)> {
    let mut handlers = Handlers::new(app);
    handlers.resolve_all(app).unwrap();
    let mut schedule = Schedule::new(platform);
    // Preload P0: X occupies it until t=50.
    let graph = app.graph(app.root());
    let x = graph.vertices.iter().find(|v| v.name == "X").unwrap().ix;
    let root_firing = handlers.handler(handlers.root()).firings[0];
    let ix = schedule.add_task(Task::vertex(root_firing, x, 0, platform.lrt_count() as usize));
    schedule.update_task_and_set_ready(ix, PeId(0), LrtId(0), 0, 50);
    handlers.set_task_ix(root_firing, x, 0, ix);

    let mut scheduler = make_scheduler(SchedulingPolicy::List);
    scheduler
        .schedule(app, platform, &mut handlers, &mut schedule)
        .unwrap();
    let mut mapper = make_mapper(policy);
    mapper.set_start_time(schedule.min_pe_end_time());
    let mut ix = 1u32;
    while (ix as usize) < schedule.len() {
        ix = mapper
            .map(app, platform, &mut handlers, &mut schedule, ix)
            .unwrap()
            + 1;
        mapper.set_start_time(schedule.min_pe_end_time());
    }
    schedule
        .tasks()
        .iter()
        .skip(1)
        .map(|t| {
            let TaskKind::Vertex { firing, vertex, .. } = t.kind else {
                panic!("no sync tasks expected");
            };
            let graph = app.graph(handlers.graph_of(firing));
            (graph.vertex(vertex).name.clone(), t.mapped_pe.unwrap().0)
        })
        .collect()
}

#[test]
fn best_fit_avoids_the_loaded_pe_until_it_pays_off() {
    let mut builder = Platform::builder();
    let hw = builder.add_hw_type("x86");
    let cluster = builder.add_cluster("main");
    builder.add_pe("P0", hw, cluster);
    builder.add_pe("P1", hw, cluster);
    builder.add_pe("P2", hw, cluster);
    let platform = builder.build().unwrap();
    let app = three_identical_tasks(&platform);
    let placements = map_three(&platform, &app, MappingPolicy::BestFit);
    let pes: Vec<u32> = placements.iter().map(|(_, pe)| *pe).collect();
    assert_eq!(pes, vec![1, 2, 0]);
}

#[test]
fn round_robin_cycles_in_pe_order() {
    let mut builder = Platform::builder();
    let hw = builder.add_hw_type("x86");
    let cluster = builder.add_cluster("main");
    builder.add_pe("P0", hw, cluster);
    builder.add_pe("P1", hw, cluster);
    builder.add_pe("P2", hw, cluster);
    let platform = builder.build().unwrap();
    let app = three_identical_tasks(&platform);
    let placements = map_three(&platform, &app, MappingPolicy::RoundRobin);
    let pes: Vec<u32> = placements.iter().map(|(_, pe)| *pe).collect();
    assert_eq!(pes, vec![0, 1, 2]);
}

// =========================================================================
// Merged-input memoisation
// =========================================================================

#[test]
fn identical_merged_inputs_reuse_one_buffer() {
    let platform = single_pe_platform();
    let mut b = AppBuilder::new("merge", &platform);
    let g = b.root();
    let p = b.add_actor(g, "P", 0, 1);
    let (sv, sub) = b.add_subgraph(g, "S", 1, 0);
    b.connect_const(g, p, 0, sv, 0, 1, 3).unwrap();
    // V fires twice, each firing re-reads the interface's 3-byte window.
    let pace = b.add_actor(sub, "pace", 0, 1);
    let v = b.add_actor(sub, "V", 2, 0);
    let in_if = b.input_interface(sub, 0);
    b.connect_const(sub, in_if, 0, v, 0, 3, 3).unwrap();
    b.connect_const(sub, pace, 0, v, 1, 2, 1).unwrap();
    bind_kernels(&mut b, g);
    bind_kernels(&mut b, sub);
    let app = b.finalize().unwrap();

    let (handlers, resources, sink) = run_pass(&app, &platform);
    let schedule = resources.schedule();
    let v0 = find_task(schedule, &handlers, &app, "V", 0);
    let v1 = find_task(schedule, &handlers, &app, "V", 1);

    // V#0 owns the merge: head + 3 constituents from P#0..2.
    let head = v0.input_fifos[0];
    assert_eq!(head.attribute, FifoAttribute::RMerge);
    assert_eq!(head.offset, 3, "three constituents follow");
    assert_eq!(head.size, 3);
    assert_eq!(head.count, 2, "two readers after memoisation");

    // V#1 reuses the same buffer; its constituents are absorbed.
    let reused = v1.input_fifos[0];
    assert_eq!(reused.attribute, FifoAttribute::RwOwn);
    assert_eq!(reused.address, head.address);
    let dummies = v1.input_fifos[1..4]
        .iter()
        .filter(|f| f.attribute == FifoAttribute::Dummy)
        .count();
    assert_eq!(dummies, 3);

    // V#0 was already dispatched (JIT), so the extra reader travelled as a
    // count update to its worker; the absorbed constituents returned their
    // reads to P#0..2 the same way.
    let head_updates: Vec<_> = sink
        .updates
        .iter()
        .filter(|u| u.address == head.address)
        .collect();
    assert_eq!(head_updates.len(), 1);
    assert_eq!(head_updates[0].delta, 1);
    assert_eq!(head_updates[0].lrt, v0.mapped_lrt.unwrap());
    let retired: Vec<_> = sink.updates.iter().filter(|u| u.delta == -1).collect();
    assert_eq!(retired.len(), 3, "one retired read per absorbed producer");
}

// =========================================================================
// Determinism
// =========================================================================

#[test]
fn identical_static_passes_emit_identical_messages() {
    let platform = single_pe_platform();
    let mut b = AppBuilder::new("det", &platform);
    let g = b.root();
    let a = b.add_actor(g, "A", 0, 1);
    let f = b.add_fork(g, "F", 2);
    let x = b.add_actor(g, "X", 1, 0);
    let y = b.add_actor(g, "Y", 1, 0);
    b.connect_const(g, a, 0, f, 0, 4, 4).unwrap();
    b.connect_const(g, f, 0, x, 0, 2, 1).unwrap();
    b.connect_const(g, f, 1, y, 0, 2, 2).unwrap();
    bind_kernels(&mut b, g);
    let app = b.finalize().unwrap();

    let (_, _, first) = run_pass(&app, &platform);
    let (_, _, second) = run_pass(&app, &platform);
    assert_eq!(first.messages.len(), second.messages.len());
    for ((lrt_a, msg_a), (lrt_b, msg_b)) in first.messages.iter().zip(&second.messages) {
        assert_eq!(lrt_a, lrt_b);
        assert_eq!(msg_a, msg_b);
        // The wire form round-trips bit-exactly too.
        assert_eq!(
            JobMessage::from_bytes(&msg_a.to_bytes()).unwrap(),
            *msg_a
        );
    }
}

// =========================================================================
// Delayed execution policy / greedy scheduling
// =========================================================================

#[test]
fn delayed_policy_patches_counts_before_dispatch() {
    let platform = single_pe_platform();
    let mut b = AppBuilder::new("delayed-policy", &platform);
    let g = b.root();
    let a = b.add_actor(g, "A", 0, 1);
    let fork = b.add_fork(g, "F", 2);
    let x = b.add_actor(g, "X", 1, 0);
    let y = b.add_actor(g, "Y", 1, 0);
    b.connect_const(g, a, 0, fork, 0, 4, 4).unwrap();
    b.connect_const(g, fork, 0, x, 0, 2, 2).unwrap();
    b.connect_const(g, fork, 1, y, 0, 2, 2).unwrap();
    bind_kernels(&mut b, g);
    let app = b.finalize().unwrap();

    let mut handlers = Handlers::new(&app);
    handlers.resolve_all(&app).unwrap();
    let mut resources = ResourcesAllocator::new(
        SchedulingPolicy::List,
        MappingPolicy::BestFit,
        ExecutionPolicy::Delayed,
        &platform,
        app.first_dynamic_address(),
    );
    let mut sink = CollectSink::default();
    resources
        .execute(&app, &platform, &mut handlers, &mut sink)
        .unwrap();
    // Everything is allocated before anything is dispatched, so the alias
    // readers land in the message itself instead of travelling as fix-ups.
    assert!(sink.updates.is_empty());
    let a_message = &sink.messages[0].1;
    assert_eq!(a_message.output_fifos[0].count, 3, "fork read + two sinks");
    assert_eq!(sink.messages.len(), 4);
}

#[test]
fn greedy_scheduler_keeps_a_topological_order() {
    let platform = single_pe_platform();
    let mut b = AppBuilder::new("greedy", &platform);
    let g = b.root();
    let a = b.add_actor(g, "A", 0, 1);
    let v = b.add_actor(g, "B", 1, 1);
    let c = b.add_actor(g, "C", 1, 0);
    b.connect_const(g, a, 0, v, 0, 2, 1).unwrap();
    b.connect_const(g, v, 0, c, 0, 1, 2).unwrap();
    bind_kernels(&mut b, g);
    let app = b.finalize().unwrap();

    let mut handlers = Handlers::new(&app);
    handlers.resolve_all(&app).unwrap();
    let mut resources = ResourcesAllocator::new(
        SchedulingPolicy::Greedy,
        MappingPolicy::RoundRobin,
        ExecutionPolicy::Jit,
        &platform,
        app.first_dynamic_address(),
    );
    let mut sink = CollectSink::default();
    resources
        .execute(&app, &platform, &mut handlers, &mut sink)
        .unwrap();
    let schedule = resources.schedule();
    // rv: A=1, B=2, C=1; the DFS order lists producers before consumers.
    let names: Vec<String> = schedule
        .tasks()
        .iter()
        .map(|t| {
            let TaskKind::Vertex { firing, vertex, vertex_firing } = t.kind else {
                panic!("no sync tasks on one PE");
            };
            let graph = app.graph(handlers.graph_of(firing));
            format!("{}#{}", graph.vertex(vertex).name, vertex_firing)
        })
        .collect();
    assert_eq!(names, vec!["A#0", "B#0", "B#1", "C#0"]);
    // Schedule monotonicity on the single PE.
    let mut last_end = 0;
    for task in schedule.tasks() {
        assert!(task.start_time >= last_end || task.start_time == 0);
        assert!(task.end_time >= task.start_time);
        last_end = task.end_time;
    }
}
