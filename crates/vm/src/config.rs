/// Tunables of a [`Vm`](crate::vm::Vm).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VmConfig {
    /// Maximum call depth. Exceeding it is a stack overflow.
    pub frames_max: usize,
    /// Maximum number of values on the value stack.
    pub stack_max: usize,
    /// Heap size, in bytes, that triggers the first collection. Later
    /// thresholds never drop below it.
    pub initial_gc_threshold: usize,
    /// After a collection, the next one runs once the heap has grown to
    /// this multiple of what survived.
    pub gc_growth_factor: usize,
    /// Collect before every allocation.
    pub stress_gc: bool,
    /// Log the stack and every instruction before executing it.
    pub trace_execution: bool,
}

pub const FRAMES_MAX: usize = 64;
pub const STACK_MAX_PER_FRAME: usize = u8::MAX as usize + 1;

impl Default for VmConfig {
    fn default() -> Self {
        VmConfig {
            frames_max: FRAMES_MAX,
            stack_max: FRAMES_MAX * STACK_MAX_PER_FRAME,
            initial_gc_threshold: 1024 * 1024,
            gc_growth_factor: 2,
            stress_gc: false,
            trace_execution: false,
        }
    }
}

impl VmConfig {
    pub fn with_stress_gc(mut self, stress_gc: bool) -> Self {
        self.stress_gc = stress_gc;
        self
    }

    pub fn with_trace_execution(mut self, trace_execution: bool) -> Self {
        self.trace_execution = trace_execution;
        self
    }

    pub fn with_gc_threshold(mut self, initial_gc_threshold: usize) -> Self {
        self.initial_gc_threshold = initial_gc_threshold;
        self
    }

    pub fn with_frames_max(mut self, frames_max: usize) -> Self {
        self.frames_max = frames_max;
        self
    }

    pub fn with_stack_max(mut self, stack_max: usize) -> Self {
        self.stack_max = stack_max;
        self
    }
}
