use crate::util::address::{Address, ObjectReference};

/// Object layout queries.
pub trait ObjectModel {
    /// The size of `object` in bytes, including any header.  Objects start at their reference.
    fn object_size(&self, object: ObjectReference) -> usize;

    /// Copy `from` to `to`, which has room for `object_size(from)` bytes, and return the
    /// reference of the copy.  The default copies the bytes.
    fn copy_object(&self, from: ObjectReference, to: Address) -> ObjectReference {
        let bytes = self.object_size(from);
        unsafe {
            std::ptr::copy_nonoverlapping(
                from.to_raw_address().to_ptr::<u8>(),
                to.to_mut_ptr::<u8>(),
                bytes,
            );
            ObjectReference::from_raw_address_unchecked(to)
        }
    }
}
