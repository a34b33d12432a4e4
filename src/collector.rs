use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;

use crate::global_state::GlobalState;
use crate::plan::driver::{self, CycleStats, DriverPhase, GcCause, GcRequest};
use crate::plan::mark::Marker;
use crate::plan::relocate::Relocation;
use crate::policy::Heap;
use crate::scheduler::WorkerPool;
use crate::util::address::{Address, ObjectReference};
use crate::util::error::GcError;
use crate::util::heap::backing::{heap_memory, Numa};
use crate::util::mark_stack::MarkStackAllocator;
use crate::util::metronome::Metronome;
use crate::util::options::Options;
use crate::util::os::{AnonymousMemory, MmapAnnotation, VirtualMemory};
use crate::vm::VMBinding;

/// A collector instance managing one heap for one VM.
///
/// Creating a collector reserves the heap, starts the GC and runtime worker pools, the driver
/// thread and, unless disabled, the director thread.  [`Collector::shutdown`] (or dropping the
/// collector) stops them again.
///
/// Note that this will attempt to initialize a logger. If the VM would like to use its own logger,
/// it should initialize the logger before creating a collector.
pub struct Collector<VM: VMBinding> {
    global: Arc<GlobalState<VM>>,
    metronome: Arc<Metronome>,
    threads: Mutex<Vec<JoinHandle<()>>>,
}

impl<VM: VMBinding> Collector<VM> {
    /// Create a collector with heap memory as configured by `options`.
    pub fn new(options: Options, binding: VM) -> Result<Self, GcError> {
        match crate::util::logger::try_init() {
            Ok(_) => debug!("The collector initialized the logger."),
            Err(_) => debug!(
                "The collector failed to initialize the logger. Possibly a logger has been initialized by user."
            ),
        }
        options.validate()?;
        info!("{}", crate::build_info::describe());
        let heap_memory = heap_memory(&options)?;
        let mark_stack_memory: Arc<dyn VirtualMemory> =
            Arc::new(AnonymousMemory::new(MmapAnnotation::MarkStack));
        Self::with_memory(options, binding, heap_memory, mark_stack_memory)
    }

    /// Create a collector on the given memory providers.
    pub fn with_memory(
        options: Options,
        binding: VM,
        heap_memory: Arc<dyn VirtualMemory>,
        mark_stack_memory: Arc<dyn VirtualMemory>,
    ) -> Result<Self, GcError> {
        options.validate()?;
        let options = Arc::new(options);
        let numa = Numa::new(options.use_numa);
        let numa_nodes = numa.count();
        let heap = Heap::new(&options, heap_memory, numa)?;
        let mark_stack =
            MarkStackAllocator::new(mark_stack_memory, options.mark_stack_space_limit)?;
        let marker = Marker::new(heap.table().log_region_size(), options.conc_threads);
        let gc_workers = WorkerPool::new("RGC GC", options.conc_threads)?;
        let runtime_workers = WorkerPool::new("RGC Runtime", options.threads)?;
        info!(
            "Collector: {} GC workers, {} runtime workers, {} NUMA node(s)",
            options.conc_threads, options.threads, numa_nodes
        );

        let global = Arc::new(GlobalState::new(
            options.clone(),
            binding,
            heap,
            mark_stack,
            marker,
            Relocation::new(numa_nodes),
            gc_workers,
            runtime_workers,
        ));
        let metronome = Arc::new(Metronome::new(options.director_hz)?);
        let collector = Collector {
            global: global.clone(),
            metronome: metronome.clone(),
            threads: Mutex::new(vec![]),
        };

        let driver = {
            let global = global.clone();
            spawn("RGC Driver", move || driver::driver_loop(global))?
        };
        collector.threads.lock().unwrap().push(driver);
        if options.use_director {
            let director = spawn("RGC Director", move || {
                driver::director_loop(global, metronome)
            })?;
            collector.threads.lock().unwrap().push(director);
        }
        Ok(collector)
    }

    pub(crate) fn global(&self) -> &Arc<GlobalState<VM>> {
        &self.global
    }

    pub fn binding(&self) -> &VM {
        &self.global.binding
    }

    pub fn options(&self) -> &Options {
        &self.global.options
    }

    pub fn heap(&self) -> &Heap {
        &self.global.heap
    }

    /// The phase the driver is in.
    pub fn phase(&self) -> DriverPhase {
        self.global.phase()
    }

    /// Run a cycle with all GC workers and wait for it.  Return its statistics, or `None` if the
    /// collector shut down first.
    pub fn collect(&self, cause: GcCause) -> Option<CycleStats> {
        self.collect_with(GcRequest::new(cause, self.global.options.conc_threads))
    }

    /// Like `collect`, with an explicit request.
    pub fn collect_with(&self, request: GcRequest) -> Option<CycleStats> {
        let id = self.global.port.send_sync(request)?;
        self.global.cycle(id)
    }

    /// Ask for a cycle without waiting for it.
    pub fn request_collection(&self, cause: GcCause) {
        self.global
            .port
            .send_async(GcRequest::new(cause, self.global.options.conc_threads));
    }

    /// Statistics of the last completed cycle.
    pub fn last_cycle(&self) -> Option<CycleStats> {
        self.global.last_cycle()
    }

    /// Load barrier slow path: the current location of `object`.
    pub fn remap(&self, object: ObjectReference) -> ObjectReference {
        self.global.remap(object)
    }

    /// Load barrier slow path while marking: heal `object` and make sure it gets marked.
    pub fn mark_barrier(&self, object: ObjectReference) -> ObjectReference {
        self.global.mark_barrier(object)
    }

    /// Allocate `bytes` of zeroed memory.  If the heap is full, run a cycle and try once more.
    /// `None` if that did not free enough memory, or if `bytes` does not fit in a region.
    pub fn alloc(&self, bytes: usize) -> Option<Address> {
        let addr = self.global.alloc(bytes);
        if addr.is_some() || bytes > self.global.heap.table().region_size() {
            return addr;
        }
        debug!("Allocation of {} bytes stalled", bytes);
        self.collect(GcCause::AllocationStall);
        self.global.alloc(bytes)
    }

    /// Did the last cycle find `object` live?  Every object is live while a cycle marks and
    /// after an aborted cycle.
    pub fn is_live(&self, object: ObjectReference) -> bool {
        self.global.is_live(object)
    }

    /// Stop the director and the driver.  A running cycle is finished first.  Calling this more
    /// than once is fine.
    pub fn shutdown(&self) {
        let threads: Vec<JoinHandle<()>> = self.threads.lock().unwrap().drain(..).collect();
        if threads.is_empty() {
            return;
        }
        debug!("Shutting down the collector");
        self.metronome.stop();
        self.global.port.shutdown();
        for handle in threads {
            if handle.join().is_err() {
                error!("A collector thread panicked");
            }
        }
    }
}

fn spawn(name: &str, f: impl FnOnce() + Send + 'static) -> Result<JoinHandle<()>, GcError> {
    std::thread::Builder::new()
        .name(name.to_string())
        .spawn(f)
        .map_err(|source| {
            error!("Failed to start {}: {}", name, source);
            GcError::WorkerStartup {
                pool: name.to_string(),
                requested: 1,
                started: 0,
                source,
            }
        })
}

impl<VM: VMBinding> Drop for Collector<VM> {
    fn drop(&mut self) {
        self.shutdown();
    }
}
