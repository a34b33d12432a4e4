use crate::util::address::ObjectReference;

/// Callback trait of scanning functions that directly trace through references.
pub trait ObjectTracer {
    /// Call this function for the content of each reference slot, and assign the returned value
    /// back to the slot.
    fn trace_object(&mut self, object: ObjectReference) -> ObjectReference;
}

/// This lets us use closures as ObjectTracer.
impl<F: FnMut(ObjectReference) -> ObjectReference> ObjectTracer for F {
    fn trace_object(&mut self, object: ObjectReference) -> ObjectReference {
        self(object)
    }
}

/// Reference processing callbacks, handed to [`Scanning::process_weak_refs`] once marking is
/// complete.
pub trait WeakRefProcessor {
    /// Is the (possibly stale) `object` reachable?  The VM should clear weak references to
    /// unreachable objects.
    fn is_live(&self, object: ObjectReference) -> bool;

    /// Keep `object` and everything reachable from it alive.  Return the reference to store
    /// back.
    fn keep_alive(&mut self, object: ObjectReference) -> ObjectReference;

    /// The current location of a live, possibly stale, `object`.
    fn remap(&self, object: ObjectReference) -> ObjectReference;
}

/// Root and object scanning.
pub trait Scanning {
    /// Report every root.  Called with all mutators stopped.
    fn scan_roots(&self, tracer: &mut dyn ObjectTracer);

    /// Report every strong reference held by `object`.  Called by GC workers while mutators
    /// run.
    fn scan_object(&self, object: ObjectReference, tracer: &mut dyn ObjectTracer);

    /// Process weak references, soft references and finalizers.  Called once per cycle after
    /// marking, while mutators run.  The default does nothing.
    fn process_weak_refs(&self, _processor: &mut dyn WeakRefProcessor) {}
}
