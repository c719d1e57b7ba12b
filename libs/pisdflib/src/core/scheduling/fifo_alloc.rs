use pisdflib_ipc_types::{Fifo, FifoAttribute};
use tracing::trace;

use crate::core::archi::LrtId;
use crate::core::deps::{cons_dependency_count, exec_dependencies};
use crate::core::error::Result;
use crate::core::firing::{FiringId, Handlers, UNSET_IX};
use crate::core::graph::{App, VertexId, VertexKind};
use crate::core::scheduling::schedule::Schedule;
use crate::core::scheduling::task::TaskKind;

/// Count fix-up for a buffer whose job message may already be out; applied
/// by the owning LRT's memory interface. Additive and idempotent per
/// (address, delta) pair; negative deltas retire reads that were absorbed
/// by a memoised merge.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CountUpdate {
    pub lrt: LrtId,
    pub address: u64,
    pub delta: i32,
}

#[derive(Debug, Clone, Copy)]
struct MergedFifo {
    task_ix: u32,
    input_pos: usize,
    ghost_count: usize,
}

#[derive(Debug, Clone, Copy)]
enum InputSource {
    None,
    /// Single producer entry: the task and output port it came from.
    Single {
        producer_task: u32,
        producer_firing: FiringId,
        producer_vertex: VertexId,
        producer_port: u32,
        producer_k: u32,
    },
    /// Merged input: the task holding the merge head (this task, or an
    /// earlier one when memoised) and the head's position.
    Merged { holder_task: u32, input_pos: usize },
}

/// Assigns virtual addresses, sizes, attributes and reference counts to
/// every FIFO of a task.
///
/// Reference-count protocol: a NEW buffer starts with one count per owned
/// read that will target its address; each completing consumer decrements
/// by its input entry count (1 for owned and alias reads, 0 for DUMMY and
/// external entries). Aliasing vertices (fork, duplicate, repeat) add
/// their consumers' reads onto the producer's count when they allocate;
/// if the producer's message already left, the delta travels as a
/// MEM_UPDATE_COUNT fix-up instead.
pub struct FifoAllocator {
    first_address: u64,
    next_address: u64,
    merged: Vec<MergedFifo>,
    updates: Vec<CountUpdate>,
}

impl FifoAllocator {
    pub fn new(first_address: u64) -> Self {
        Self {
            first_address,
            next_address: first_address,
            merged: Vec::new(),
            updates: Vec::new(),
        }
    }

    pub fn clear(&mut self) {
        self.next_address = self.first_address;
        self.merged.clear();
        self.updates.clear();
    }

    /// Count fix-ups produced since the last drain.
    pub fn take_updates(&mut self) -> Vec<CountUpdate> {
        std::mem::take(&mut self.updates)
    }

    fn new_address(&mut self) -> u64 {
        let address = self.next_address;
        self.next_address += 1;
        address
    }

    pub fn allocate(
        &mut self,
        app: &App,
        handlers: &mut Handlers,
        schedule: &mut Schedule,
        task_ix: u32,
    ) -> Result<()> {
        let TaskKind::Vertex {
            firing,
            vertex,
            vertex_firing,
        } = schedule.task(task_ix).kind
        else {
            return Ok(());
        };
        let (input_fifos, sources) =
            self.allocate_inputs(app, handlers, schedule, task_ix, firing, vertex, vertex_firing)?;
        schedule.task_mut(task_ix).input_fifos = input_fifos;
        let output_fifos = self.allocate_outputs(
            app,
            handlers,
            schedule,
            task_ix,
            firing,
            vertex,
            vertex_firing,
            &sources,
        )?;
        // Producers of this task's inputs learn their final window through
        // the edge registers; outputs register likewise for our consumers.
        let graph_id = handlers.graph_of(firing);
        for (port, fifo) in output_fifos.iter().enumerate() {
            if let Some(edge) = app.graph(graph_id).vertex(vertex).output_edge(port) {
                handlers.set_edge_fifo(firing, edge, vertex_firing, *fifo);
            }
        }
        schedule.task_mut(task_ix).output_fifos = output_fifos;
        Ok(())
    }

    // =====================================================================
    // Inputs
    // =====================================================================

    #[allow(clippy::too_many_arguments)]
    fn allocate_inputs(
        &mut self,
        app: &App,
        handlers: &mut Handlers,
        schedule: &mut Schedule,
        task_ix: u32,
        firing: FiringId,
        vertex: VertexId,
        vertex_firing: u32,
    ) -> Result<(Vec<Fifo>, Vec<InputSource>)> {
        let graph_id = handlers.graph_of(firing);
        let port_count = app.graph(graph_id).vertex(vertex).inputs.len();
        let mut fifos = Vec::new();
        let mut sources = Vec::with_capacity(port_count);
        for port in 0..port_count {
            let mut entries: Vec<(Fifo, InputSource)> = Vec::new();
            let deps: Vec<_> =
                exec_dependencies(app, handlers, firing, vertex, vertex_firing, port)?
                    .collect::<Result<_>>()?;
            for dep in deps {
                let Some((dep_firing, dep_vertex)) = dep.vertex else {
                    continue;
                };
                if dep.rate <= 0 {
                    continue;
                }
                for j in dep.firing_start..=dep.firing_end {
                    let dep_graph = app.graph(handlers.graph_of(dep_firing));
                    let edge = dep_graph
                        .vertex(dep_vertex)
                        .output_edge(dep.edge_ix as usize)
                        .expect("dependency edges are connected");
                    let producer = handlers.edge_fifo(dep_firing, edge, j);
                    let window_start = if j == dep.firing_start {
                        u64::from(dep.memory_start)
                    } else {
                        0
                    };
                    let size = dep.bytes_for_firing(j) as u64;
                    let producer_task = handlers.task_ix(dep_firing, dep_vertex, j);
                    if producer.attribute == FifoAttribute::RwAuto {
                        // Consumer count was unknown when the producer was
                        // allocated; register this read now.
                        self.bump_producer_count(
                            handlers,
                            schedule,
                            dep_firing,
                            edge,
                            j,
                            producer_task,
                            dep.edge_ix,
                            1,
                        );
                    }
                    let (attribute, count) = match producer.attribute {
                        FifoAttribute::RwExt => (FifoAttribute::RwExt, 0),
                        _ => (FifoAttribute::RwOwn, 1),
                    };
                    entries.push((
                        Fifo {
                            address: producer.address,
                            offset: producer.offset + window_start as u32,
                            size: size as u32,
                            count,
                            attribute,
                        },
                        InputSource::Single {
                            producer_task,
                            producer_firing: dep_firing,
                            producer_vertex: dep_vertex,
                            producer_port: dep.edge_ix,
                            producer_k: j,
                        },
                    ));
                }
            }
            match entries.len() {
                0 => {
                    // Nil edge: the kernel still sees a (empty) buffer at
                    // this port position.
                    fifos.push(Fifo {
                        attribute: FifoAttribute::RwOwn,
                        ..Fifo::default()
                    });
                    sources.push(InputSource::None);
                }
                1 => {
                    let (fifo, source) = entries.pop().expect("one entry");
                    fifos.push(fifo);
                    sources.push(source);
                }
                _ => {
                    let source = self.allocate_merged_input(
                        app, handlers, schedule, task_ix, &mut fifos, entries,
                    );
                    sources.push(source);
                }
            }
        }
        Ok((fifos, sources))
    }

    /// Merge a multi-producer read into one runtime-concatenated buffer,
    /// reusing an identical merge emitted earlier in this iteration.
    fn allocate_merged_input(
        &mut self,
        app: &App,
        handlers: &mut Handlers,
        schedule: &mut Schedule,
        task_ix: u32,
        fifos: &mut Vec<Fifo>,
        entries: Vec<(Fifo, InputSource)>,
    ) -> InputSource {
        let total: u64 = entries.iter().map(|(f, _)| u64::from(f.size)).sum();
        let existing = self.merged.iter().copied().find(|merged| {
            let head = schedule.task(merged.task_ix).input_fifos[merged.input_pos];
            if u64::from(head.size) != total || merged.ghost_count != entries.len() {
                return false;
            }
            let ghosts = &schedule.task(merged.task_ix).input_fifos[merged.input_pos + 1..]
                [..merged.ghost_count];
            ghosts.iter().zip(&entries).all(|(ghost, (entry, _))| {
                ghost.address == entry.address
                    && ghost.offset == entry.offset
                    && ghost.size == entry.size
            })
        });
        if let Some(merged) = existing {
            // Same pattern: reuse the buffer, one more reader.
            let head = schedule.task(merged.task_ix).input_fifos[merged.input_pos];
            let mut head_fifo = head;
            head_fifo.count += 1;
            schedule.task_mut(merged.task_ix).input_fifos[merged.input_pos] = head_fifo;
            let holder = schedule.task(merged.task_ix);
            if holder.dispatched {
                self.updates.push(CountUpdate {
                    lrt: holder.mapped_lrt.expect("dispatched tasks are mapped"),
                    address: head.address,
                    delta: 1,
                });
            }
            fifos.push(Fifo {
                address: head.address,
                offset: 0,
                size: total as u32,
                count: 1,
                attribute: FifoAttribute::RwOwn,
            });
            // The constituents are absorbed: present for shape, never
            // read. Their producers lose the read this task would have
            // performed.
            for (entry, source) in entries {
                self.patch_alias_source(app, handlers, schedule, source, -1);
                fifos.push(Fifo {
                    count: 0,
                    attribute: FifoAttribute::Dummy,
                    ..entry
                });
            }
            trace!(address = head.address, "merged input reused");
            return InputSource::Merged {
                holder_task: merged.task_ix,
                input_pos: merged.input_pos,
            };
        }
        let address = self.new_address();
        let input_pos = fifos.len();
        fifos.push(Fifo {
            address,
            // Readers skip this many constituent entries.
            offset: entries.len() as u32,
            size: total as u32,
            count: 1,
            attribute: FifoAttribute::RMerge,
        });
        for (entry, _) in entries {
            fifos.push(entry);
        }
        self.merged.push(MergedFifo {
            task_ix,
            input_pos,
            ghost_count: fifos.len() - input_pos - 1,
        });
        InputSource::Merged {
            holder_task: task_ix,
            input_pos,
        }
    }

    // =====================================================================
    // Outputs
    // =====================================================================

    #[allow(clippy::too_many_arguments)]
    fn allocate_outputs(
        &mut self,
        app: &App,
        handlers: &mut Handlers,
        schedule: &mut Schedule,
        task_ix: u32,
        firing: FiringId,
        vertex: VertexId,
        vertex_firing: u32,
        sources: &[InputSource],
    ) -> Result<Vec<Fifo>> {
        let graph_id = handlers.graph_of(firing);
        let kind = app.graph(graph_id).vertex(vertex).kind;
        let port_count = app.graph(graph_id).vertex(vertex).outputs.len();
        let mut rates = Vec::with_capacity(port_count);
        let mut counts = Vec::with_capacity(port_count);
        for port in 0..port_count {
            let edge = app
                .graph(graph_id)
                .vertex(vertex)
                .output_edge(port)
                .expect("ports are connected");
            rates.push(handlers.src_rate(app, firing, edge)?.max(0) as u64);
            counts.push(cons_dependency_count(
                app,
                handlers,
                firing,
                vertex,
                vertex_firing,
                port,
            )?);
        }
        let mut fifos = Vec::with_capacity(port_count);
        match kind {
            VertexKind::Fork | VertexKind::Duplicate | VertexKind::Repeat => {
                let input = schedule.task(task_ix).input_fifos.first().copied();
                let base = input.unwrap_or_default();
                let alias_base = match sources.first() {
                    Some(InputSource::Merged { .. }) => Fifo {
                        offset: 0,
                        ..base
                    },
                    _ => base,
                };
                let repeat_copies = matches!(kind, VertexKind::Repeat)
                    && rates.first().copied().unwrap_or(0) != u64::from(base.size);
                if repeat_copies {
                    // Tiling repeat: a real buffer filled by the kernel.
                    let (rate, count) = (rates[0], normalized_count(counts[0]));
                    fifos.push(Fifo {
                        address: self.new_address(),
                        offset: 0,
                        size: rate as u32,
                        count,
                        attribute: FifoAttribute::RRepeat,
                    });
                } else {
                    let mut alias_reads: u32 = 0;
                    let mut prefix: u64 = 0;
                    for port in 0..port_count {
                        let count = normalized_count(counts[port]);
                        let offset = if matches!(kind, VertexKind::Fork) {
                            prefix
                        } else {
                            0
                        };
                        fifos.push(Fifo {
                            address: alias_base.address,
                            offset: alias_base.offset + offset as u32,
                            size: rates[port] as u32,
                            count,
                            attribute: if alias_base.attribute == FifoAttribute::RwExt {
                                FifoAttribute::RwExt
                            } else {
                                FifoAttribute::RwOnly
                            },
                        });
                        prefix += rates[port];
                        alias_reads += u32::from(count);
                    }
                    // The aliased buffer now has this many extra readers.
                    if alias_base.attribute != FifoAttribute::RwExt && alias_reads > 0 {
                        self.patch_alias_source(
                            app,
                            handlers,
                            schedule,
                            sources.first().copied().unwrap_or(InputSource::None),
                            alias_reads as i32,
                        );
                    }
                }
            }
            VertexKind::ExternIn { buffer } => {
                fifos.push(Fifo {
                    address: u64::from(buffer),
                    offset: 0,
                    size: rates[0] as u32,
                    count: 0,
                    attribute: FifoAttribute::RwExt,
                });
            }
            _ => {
                for port in 0..port_count {
                    let unresolved = counts[port] < 0;
                    fifos.push(Fifo {
                        address: self.new_address(),
                        offset: 0,
                        size: rates[port] as u32,
                        count: normalized_count(counts[port]),
                        // Unknown consumer counts are patched as consumers
                        // allocate.
                        attribute: if unresolved {
                            FifoAttribute::RwAuto
                        } else {
                            FifoAttribute::RwOwn
                        },
                    });
                }
            }
        }
        Ok(fifos)
    }

    /// Adjust the reader count of the buffer backing an input source.
    fn patch_alias_source(
        &mut self,
        app: &App,
        handlers: &mut Handlers,
        schedule: &mut Schedule,
        source: InputSource,
        delta: i32,
    ) {
        match source {
            InputSource::None => {}
            InputSource::Single {
                producer_task,
                producer_firing,
                producer_vertex,
                producer_port,
                producer_k,
            } => {
                let dep_graph = app.graph(handlers.graph_of(producer_firing));
                let Some(edge) = dep_graph
                    .vertex(producer_vertex)
                    .output_edge(producer_port as usize)
                else {
                    return;
                };
                self.bump_producer_count(
                    handlers,
                    schedule,
                    producer_firing,
                    edge,
                    producer_k,
                    producer_task,
                    producer_port,
                    delta,
                );
            }
            InputSource::Merged {
                holder_task,
                input_pos,
            } => {
                let mut head = schedule.task(holder_task).input_fifos[input_pos];
                head.count = apply_delta(head.count, delta);
                schedule.task_mut(holder_task).input_fifos[input_pos] = head;
                let holder = schedule.task(holder_task);
                if holder.dispatched {
                    self.updates.push(CountUpdate {
                        lrt: holder.mapped_lrt.expect("dispatched tasks are mapped"),
                        address: head.address,
                        delta,
                    });
                }
            }
        }
    }

    #[allow(clippy::too_many_arguments)]
    fn bump_producer_count(
        &mut self,
        handlers: &mut Handlers,
        schedule: &mut Schedule,
        producer_firing: FiringId,
        edge: crate::core::graph::EdgeId,
        producer_k: u32,
        producer_task: u32,
        producer_port: u32,
        delta: i32,
    ) {
        let mut fifo = handlers.edge_fifo(producer_firing, edge, producer_k);
        fifo.count = apply_delta(fifo.count, delta);
        handlers.set_edge_fifo(producer_firing, edge, producer_k, fifo);
        if producer_task != UNSET_IX && (producer_task as usize) < schedule.len() {
            let task = schedule.task_mut(producer_task);
            if let Some(slot) = task.output_fifos.get_mut(producer_port as usize) {
                slot.count = fifo.count;
            }
            if task.dispatched {
                let lrt = task.mapped_lrt.expect("dispatched tasks are mapped");
                self.updates.push(CountUpdate {
                    lrt,
                    address: fifo.address,
                    delta,
                });
            }
        }
    }
}

fn apply_delta(count: u16, delta: i32) -> u16 {
    (i32::from(count) + delta).max(0) as u16
}

fn normalized_count(count: i64) -> u16 {
    count.max(0).min(i64::from(u16::MAX)) as u16
}
