/// Thread control around pauses.
pub trait Collection {
    /// Bring every mutator to a safe point and keep it there.  On return, no mutator runs managed
    /// code until `resume_mutators` is called.
    fn stop_mutators(&self);

    /// Let the mutators stopped by `stop_mutators` continue.
    fn resume_mutators(&self);
}
