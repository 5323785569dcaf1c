use core::fmt;

use crate::sync::{AtomicUsize, Ordering};
use crate::word::WordDescriptor;

/// The most significant bit of a word marks it as a descriptor reference.
///
/// Values therefore get one bit less than a machine word. Heap and stack
/// addresses on the supported 64-bit platforms never set this bit, which is
/// what makes thin pointers eligible target values.
pub(crate) const DESCRIPTOR_TAG: usize = 1 << (usize::BITS - 1);

/// Types whose bit pattern may live in an [AtomicField].
///
/// Only the machine-word unsigned integer and thin pointers are eligible:
/// anything else either does not fit in a word or cannot guarantee that the
/// descriptor tag bit stays clear. Passing an ineligible type to
/// [`add_target`](crate::MwCasDescriptor::add_target) is a compile error.
pub trait MwCasValue: Copy {
    /// The raw word for this value. The descriptor tag bit must be clear,
    /// which debug builds assert.
    fn into_word(self) -> usize;

    /// Rebuilds the value from a raw word.
    fn from_word(word: usize) -> Self;
}

impl MwCasValue for usize {
    fn into_word(self) -> usize {
        self
    }

    fn from_word(word: usize) -> Self {
        word
    }
}

impl<T> MwCasValue for *mut T {
    fn into_word(self) -> usize {
        self as usize
    }

    fn from_word(word: usize) -> Self {
        word as *mut T
    }
}

impl<T> MwCasValue for *const T {
    fn into_word(self) -> usize {
        self as usize
    }

    fn from_word(word: usize) -> Self {
        word as *const T
    }
}

/// A word observed in (or destined for) a target cell: either a client value
/// or a tagged reference to a [WordDescriptor]. Equality is bitwise.
#[derive(Clone, Copy, Eq, PartialEq)]
pub(crate) struct Field(usize);

impl Field {
    /// Encode a client value. Debug builds reject values which collide with
    /// the descriptor tag.
    pub(crate) fn from_value<T: MwCasValue>(value: T) -> Self {
        let word: usize = value.into_word();
        debug_assert_eq!(
            word & DESCRIPTOR_TAG,
            0,
            "value 0x{word:x} collides with the descriptor tag bit"
        );
        Self(word)
    }

    /// Encode a tagged reference to a word descriptor.
    pub(crate) fn descriptor_ref(word: *const WordDescriptor) -> Self {
        let addr: usize = word as usize;
        debug_assert_eq!(
            addr & DESCRIPTOR_TAG,
            0,
            "descriptor at 0x{addr:x} collides with the tag bit"
        );
        Self(addr | DESCRIPTOR_TAG)
    }

    pub(crate) fn from_raw(raw: usize) -> Self {
        Self(raw)
    }

    pub(crate) fn into_raw(self) -> usize {
        self.0
    }

    pub(crate) fn is_descriptor_ref(self) -> bool {
        self.0 & DESCRIPTOR_TAG != 0
    }

    /// The referenced word descriptor. Meaningless unless
    /// [is_descriptor_ref](Self::is_descriptor_ref) returned true.
    pub(crate) fn as_descriptor_ptr(self) -> *const WordDescriptor {
        (self.0 & !DESCRIPTOR_TAG) as *const WordDescriptor
    }

    /// Whether this field is a tagged reference to exactly `word`.
    pub(crate) fn is_ref_to(self, word: &WordDescriptor) -> bool {
        self.is_descriptor_ref() && core::ptr::eq(self.as_descriptor_ptr(), word)
    }

    /// Reinterpret the payload as a client value.
    pub(crate) fn as_value<T: MwCasValue>(self) -> T {
        debug_assert!(!self.is_descriptor_ref());
        T::from_word(self.0)
    }
}

impl fmt::Debug for Field {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_descriptor_ref() {
            write!(f, "Field::DescriptorRef({:p})", self.as_descriptor_ptr())
        } else {
            write!(f, "Field::Value(0x{:x})", self.0)
        }
    }
}

/// A word-sized atomic cell eligible as a multi-word CAS target.
///
/// Any memory that ever participates in a multi-word CAS must be declared as
/// an `AtomicField` and read through [`read`](crate::read); a direct load
/// could observe a transient descriptor reference instead of a value.
///
/// The cell must stay alive until every operation that targeted it has been
/// completed and reclaimed; in practice that means target cells outlive all
/// threads performing operations on them, or [`stop_gc`](crate::stop_gc).
#[repr(transparent)]
pub struct AtomicField(AtomicUsize);

impl AtomicField {
    /// Creates a cell holding `value`.
    pub fn new<T: MwCasValue>(value: T) -> Self {
        Self(AtomicUsize::new(Field::from_value(value).into_raw()))
    }

    pub(crate) fn load(&self, order: Ordering) -> Field {
        Field::from_raw(self.0.load(order))
    }

    pub(crate) fn compare_exchange(
        &self,
        current: Field,
        new: Field,
        success: Ordering,
        failure: Ordering,
    ) -> Result<Field, Field> {
        self.0
            .compare_exchange(current.into_raw(), new.into_raw(), success, failure)
            .map(Field::from_raw)
            .map_err(Field::from_raw)
    }
}

impl fmt::Debug for AtomicField {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("AtomicField")
            .field(&self.load(Ordering::Relaxed))
            .finish()
    }
}

#[cfg(all(test, not(loom), not(feature = "shuttle")))]
mod tests {
    use crate::field::{AtomicField, Field, DESCRIPTOR_TAG};
    use crate::sync::Ordering;
    use crate::word::WordDescriptor;

    #[test]
    fn test_value_fields_round_trip() {
        let field: Field = Field::from_value(42usize);
        assert!(!field.is_descriptor_ref());
        assert_eq!(field.as_value::<usize>(), 42);
    }

    #[test]
    fn test_pointer_values_round_trip() {
        let target: Box<u64> = Box::new(7);
        let pointer: *const u64 = &*target;
        let field: Field = Field::from_value(pointer);
        assert!(!field.is_descriptor_ref());
        assert_eq!(field.as_value::<*const u64>(), pointer);
    }

    #[test]
    fn test_descriptor_refs_are_distinguishable_from_values() {
        let word: Box<WordDescriptor> = Box::new(WordDescriptor::empty());
        let field: Field = Field::descriptor_ref(&*word);
        assert!(field.is_descriptor_ref());
        assert!(core::ptr::eq(field.as_descriptor_ptr(), &*word));
        assert!(field.is_ref_to(&word));
        assert_ne!(field, Field::from_value(field.into_raw() & !DESCRIPTOR_TAG));
    }

    #[test]
    fn test_cell_compare_exchange_is_bitwise() {
        let cell: AtomicField = AtomicField::new(5usize);
        let observed: Field = cell.load(Ordering::Acquire);
        assert_eq!(observed, Field::from_value(5usize));

        let result = cell.compare_exchange(
            Field::from_value(5usize),
            Field::from_value(6usize),
            Ordering::AcqRel,
            Ordering::Acquire,
        );
        assert!(result.is_ok());
        assert_eq!(cell.load(Ordering::Acquire), Field::from_value(6usize));

        let failed = cell.compare_exchange(
            Field::from_value(5usize),
            Field::from_value(7usize),
            Ordering::AcqRel,
            Ordering::Acquire,
        );
        assert_eq!(failed, Err(Field::from_value(6usize)));
    }
}
