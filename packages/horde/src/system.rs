//! Systems and the ordered group which runs them each tick.
//!
//! A system is one pass of the tick pipeline. Systems run one after another in
//! insertion order. Inside a system, chunk work may be split across rayon
//! workers with `SystemContext::map_chunks`, and structural changes are handed
//! back to the context as `CommandBuffer`s.

use rayon::prelude::*;

use crate::command_buffer::{CommandBuffer, PlaybackReport};
use crate::error::WorldError;
use crate::query::{ChunkGuard, Query};
use crate::sim::render::FramebufferSink;
use crate::sim::TickStats;
use crate::world::World;

/// How chunk work and command playback are scheduled.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ExecutionMode {
    /// Every chunk on the calling thread. Commands play back after each pass.
    Sequential,
    /// Chunks spread over the rayon pool. Per-chunk command segments are
    /// merged in chunk order and play back after each pass.
    Parallel,
    /// As `Parallel`, but passes which allow it share a single command buffer
    /// which plays back at the end of the tick.
    Jobs,
}

impl ExecutionMode {
    /// Every execution mode.
    pub const ALL: [ExecutionMode; 3] = [
        ExecutionMode::Sequential,
        ExecutionMode::Parallel,
        ExecutionMode::Jobs,
    ];

    /// Returns true if chunk work is spread over worker threads.
    pub fn is_parallel(&self) -> bool {
        !matches!(self, ExecutionMode::Sequential)
    }
}

impl Default for ExecutionMode {
    fn default() -> Self {
        ExecutionMode::Sequential
    }
}

/// When a system's structural changes become visible.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Flush {
    /// Before the next system runs.
    Immediate,
    /// At the end of the tick in `Jobs` mode, otherwise immediately.
    EndOfTick,
}

/// Everything a system may touch while it updates.
pub struct SystemContext<'a> {
    world: &'a mut World,
    mode: ExecutionMode,
    end_of_tick: &'a mut CommandBuffer,
    sink: &'a mut dyn FramebufferSink,
    stats: &'a mut TickStats,
}

impl<'a> SystemContext<'a> {
    /// Create a context for a single tick.
    pub fn new(
        world: &'a mut World,
        mode: ExecutionMode,
        end_of_tick: &'a mut CommandBuffer,
        sink: &'a mut dyn FramebufferSink,
        stats: &'a mut TickStats,
    ) -> SystemContext<'a> {
        SystemContext {
            world,
            mode,
            end_of_tick,
            sink,
            stats,
        }
    }

    /// The execution mode of this tick.
    pub fn mode(&self) -> ExecutionMode {
        self.mode
    }

    pub fn world(&self) -> &World {
        &*self.world
    }

    pub fn world_mut(&mut self) -> &mut World {
        &mut *self.world
    }

    /// Borrow the world together with the framebuffer sink.
    pub fn world_and_sink(&mut self) -> (&World, &mut (dyn FramebufferSink + 'a)) {
        (&*self.world, &mut *self.sink)
    }

    pub fn stats(&self) -> &TickStats {
        &*self.stats
    }

    pub fn stats_mut(&mut self) -> &mut TickStats {
        &mut *self.stats
    }

    /// Run `f` over every chunk matched by `query`.
    ///
    /// Each invocation records into its own command buffer. Outputs and
    /// buffers are returned in chunk order whichever mode runs them, so the
    /// result never depends on scheduling.
    pub fn map_chunks<R, F>(&mut self, query: &mut Query, f: F) -> Result<(CommandBuffer, Vec<R>), WorldError>
    where
        R: Send,
        F: Fn(&ChunkGuard<'_>, &mut CommandBuffer) -> Result<R, WorldError> + Sync,
    {
        let mode = self.mode;
        let guards = query.chunks_mut(&mut *self.world);

        if !mode.is_parallel() {
            let mut commands = CommandBuffer::new();
            let outputs = guards.iter()
                .map(|guard| f(guard, &mut commands))
                .collect::<Result<Vec<_>, _>>()?;
            return Ok((commands, outputs));
        }

        let segments = guards.into_par_iter()
            .map(|guard| {
                let mut commands = CommandBuffer::new();
                let output = f(&guard, &mut commands)?;
                Ok((commands, output))
            })
            .collect::<Result<Vec<_>, WorldError>>()?;

        let mut commands = CommandBuffer::new();
        let mut outputs = Vec::with_capacity(segments.len());
        for (segment, output) in segments {
            commands.append(segment);
            outputs.push(output);
        }

        Ok((commands, outputs))
    }

    /// Hand a system's structural changes over for playback.
    pub fn apply(&mut self, commands: CommandBuffer, flush: Flush) -> Result<(), WorldError> {
        if commands.is_empty() {
            return Ok(());
        }

        if flush == Flush::EndOfTick && self.mode == ExecutionMode::Jobs {
            self.end_of_tick.append(commands);
            return Ok(());
        }

        let mut commands = commands;
        let report = commands.playback(&mut *self.world)?;
        self.record(&report);
        Ok(())
    }

    /// Play back everything deferred to the end of the tick.
    pub fn flush_end_of_tick(&mut self) -> Result<(), WorldError> {
        if self.end_of_tick.is_empty() {
            return Ok(());
        }

        let report = self.end_of_tick.playback(&mut *self.world)?;
        self.record(&report);
        Ok(())
    }

    fn record(&mut self, report: &PlaybackReport) {
        self.stats.commands_applied += report.applied;
        self.stats.playback_failures += report.failed.len();
        for failure in report.failed.iter() {
            log::warn!("command {} failed during playback: {}", failure.index, failure.error);
        }
    }
}

/// An ECS system: one pass of the tick pipeline.
pub trait System: Send {
    /// A short name for logging.
    fn name(&self) -> &'static str;

    /// Run the system for one tick.
    fn update(&mut self, ctx: &mut SystemContext<'_>) -> Result<(), WorldError>;
}

/// A token which represents a system in a `SystemGroup`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct SystemToken(pub usize);

/// A boxed `System`.
pub type BoxSystem = Box<dyn System + 'static>;

/// An ordered list of systems run once per tick.
#[derive(Default)]
pub struct SystemGroup {
    systems: Vec<BoxSystem>,
}

impl SystemGroup {
    /// Create a new empty group.
    pub fn new() -> SystemGroup {
        SystemGroup::default()
    }

    /// Append a system. It will run after every system inserted before it.
    pub fn insert(&mut self, system: impl System + 'static) -> SystemToken {
        self.systems.push(Box::new(system));
        SystemToken(self.systems.len() - 1)
    }

    /// Append a system, builder style.
    pub fn with(mut self, system: impl System + 'static) -> SystemGroup {
        self.insert(system);
        self
    }

    /// The number of systems in the group.
    pub fn len(&self) -> usize {
        self.systems.len()
    }

    /// Returns true if the group has no systems.
    pub fn is_empty(&self) -> bool {
        self.systems.is_empty()
    }

    /// The names of the systems in run order.
    pub fn names(&self) -> Vec<&'static str> {
        self.systems.iter().map(|s| s.name()).collect()
    }

    /// Run every system once, in order, then play back the end-of-tick buffer.
    ///
    /// A fatal error aborts the tick and is returned.
    pub fn update(&mut self, world: &mut World, mode: ExecutionMode, sink: &mut dyn FramebufferSink) -> Result<TickStats, WorldError> {
        let mut stats = TickStats::default();
        let mut end_of_tick = CommandBuffer::new();
        let mut ctx = SystemContext::new(world, mode, &mut end_of_tick, sink, &mut stats);

        for system in self.systems.iter_mut() {
            log::trace!("running system {}", system.name());
            if let Err(err) = system.update(&mut ctx) {
                log::error!("system {} aborted the tick: {}", system.name(), err);
                return Err(err);
            }
        }

        ctx.flush_end_of_tick()?;
        drop(ctx);
        Ok(stats)
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::component_data::EntityTemplate;
    use crate::sim::render::NullSink;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    #[derive(Debug, Clone, Copy, Default, PartialEq)]
    struct Counter(u32);

    #[derive(Debug, Clone, Copy, Default, PartialEq)]
    struct Marked;

    crate::component!(Counter, Marked);

    struct Increment {
        query: Query,
    }

    impl System for Increment {
        fn name(&self) -> &'static str {
            "increment"
        }

        fn update(&mut self, ctx: &mut SystemContext<'_>) -> Result<(), WorldError> {
            let (commands, _) = ctx.map_chunks(&mut self.query, |chunk, commands| {
                let entities = chunk.entities();
                let counters = chunk.components_mut::<Counter>()?;
                for (entity, counter) in entities.iter().zip(counters.iter_mut()) {
                    counter.0 += 1;
                    if counter.0 % 2 == 0 {
                        commands.record_add(*entity, Marked);
                    }
                }
                Ok(entities.len())
            })?;

            ctx.apply(commands, Flush::EndOfTick)
        }
    }

    struct CountMarked {
        query: Query,
        seen: Arc<AtomicUsize>,
    }

    impl System for CountMarked {
        fn name(&self) -> &'static str {
            "count-marked"
        }

        fn update(&mut self, ctx: &mut SystemContext<'_>) -> Result<(), WorldError> {
            self.seen.store(self.query.count(ctx.world()), Ordering::SeqCst);
            Ok(())
        }
    }

    fn world() -> World {
        let mut world = World::with_config(crate::world::WorldConfig::default().with_chunk_capacity(4));
        for i in 0..20 {
            world.create_from(&EntityTemplate::new().with(Counter(i))).unwrap();
        }
        world
    }

    #[test]
    fn test_modes_agree() {
        let mut results = Vec::new();
        for mode in ExecutionMode::ALL.iter().copied() {
            let mut world = world();
            let mut group = SystemGroup::new()
                .with(Increment { query: Query::new().write::<Counter>().exclude::<Marked>() });

            let stats = group.update(&mut world, mode, &mut NullSink).unwrap();
            assert_eq!(stats.commands_applied, 10);

            let mut marked = Query::new().read::<Counter>().read::<Marked>();
            let mut values = marked.iter_chunks(&world)
                .flat_map(|c| c.components::<Counter>().unwrap().to_vec())
                .map(|c| c.0)
                .collect::<Vec<_>>();
            values.sort_unstable();
            results.push(values);
        }

        assert_eq!(results[0], (1..=10).map(|i| i * 2).collect::<Vec<_>>());
        assert_eq!(results[0], results[1]);
        assert_eq!(results[0], results[2]);
    }

    #[test]
    fn test_jobs_defers_to_end_of_tick() {
        for (mode, expected) in [(ExecutionMode::Parallel, 10), (ExecutionMode::Jobs, 0)].iter().copied() {
            let seen = Arc::new(AtomicUsize::new(usize::MAX));
            let mut world = world();
            let mut group = SystemGroup::new()
                .with(Increment { query: Query::new().write::<Counter>().exclude::<Marked>() });
            group.insert(CountMarked { query: Query::new().read::<Marked>(), seen: seen.clone() });
            assert_eq!(group.names(), vec!["increment", "count-marked"]);

            group.update(&mut world, mode, &mut NullSink).unwrap();
            assert_eq!(seen.load(Ordering::SeqCst), expected);
            assert_eq!(Query::new().read::<Marked>().count(&world), 10);
        }
    }

    #[test]
    fn test_access_errors_abort() {
        struct Bad(Query);

        impl System for Bad {
            fn name(&self) -> &'static str {
                "bad"
            }

            fn update(&mut self, ctx: &mut SystemContext<'_>) -> Result<(), WorldError> {
                let (commands, _) = ctx.map_chunks(&mut self.0, |chunk, _| {
                    chunk.components_mut::<Counter>().map(|_| ())
                })?;
                ctx.apply(commands, Flush::Immediate)
            }
        }

        let mut world = world();
        let mut group = SystemGroup::new().with(Bad(Query::new().read::<Counter>()));
        let result = group.update(&mut world, ExecutionMode::Parallel, &mut NullSink);
        assert!(matches!(result, Err(WorldError::AccessDenied { .. })));
    }
}
